//! Synchronization primitives.
//!
//! This module wraps the two Vulkan synchronization objects the frame loop
//! needs:
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signalling
//!
//! # Overview
//!
//! Each frame slot owns one fence and two semaphores:
//!
//! - **Semaphores** chain acquire, submit and present. The acquire signals
//!   "image available", the submit waits on it and signals "render
//!   finished", and the present waits on that.
//!
//! - **Fences** tell the host that a slot's submission has retired. The slot
//!   waits on its fence before touching any of its uniforms or command
//!   buffers, and resets it only right before the next submit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use umbra_rhi::device::Device;
//! use umbra_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
//! let image_available = Semaphore::new(device.clone())?;
//!
//! // Starts signaled so the first frame does not block.
//! let in_flight = Fence::new(device, true)?;
//! if in_flight.wait(Duration::from_secs(1))? {
//!     in_flight.reset()?;
//! }
//! # let _ = image_available;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore for GPU-to-GPU ordering.
///
/// Created unsignaled. Used as the "image available" and "render finished"
/// signals of a frame slot.
///
/// # Thread Safety
///
/// The semaphore is immutable after creation and can be shared between
/// threads. Each signal must still be paired with exactly one wait.
pub struct Semaphore {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new unsignaled semaphore.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        debug!("Created semaphore");
        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
        debug!("Destroyed semaphore");
    }
}

/// Fence for GPU-to-CPU completion signalling.
///
/// # Thread Safety
///
/// Wait and status queries may come from any thread. Resetting while
/// another thread waits, or while the fence is attached to a pending
/// submission, is a caller error.
pub struct Fence {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan fence handle.
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Creates the fence signaled. Frame fences start
    ///   signaled so the first wait returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence signals or `timeout` elapses.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum wait; saturates at `u64::MAX` nanoseconds
    ///
    /// # Returns
    ///
    /// `Ok(true)` once signaled, `Ok(false)` if the timeout elapsed first.
    ///
    /// # Errors
    ///
    /// Returns an error on device loss or any other wait failure.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use std::time::Duration;
    /// # use umbra_rhi::device::Device;
    /// # use umbra_rhi::sync::Fence;
    /// # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
    /// let fence = Fence::new(device, false)?;
    /// // Nothing was submitted with it, so this times out.
    /// assert!(!fence.wait(Duration::ZERO)?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn wait(&self, timeout: Duration) -> RhiResult<bool> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, nanos)
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// Must only be called on a fence with no pending submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
        debug!("Destroyed fence");
    }
}
