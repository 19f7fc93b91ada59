//! Per-slot fences and semaphores, and the acquire/submit/present cycle.
//!
//! Each frame slot cycles through
//!
//! ```text
//! Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle
//! ```
//!
//! `begin_frame` performs the only two blocking waits of the frame loop:
//! the slot fence (the GPU finished the slot's previous submission) and
//! swap image acquisition. Both are bounded by the configured timeouts.
//!
//! The fence is reset only once an image was actually acquired. A stale
//! acquisition leaves the fence signaled and the slot unchanged, so the
//! retried frame passes the fence wait immediately.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::backend::{
    AcquireOutcome, CommandBufferKey, FenceKey, GpuBackend, PresentOutcome, SemaphoreKey,
};
use crate::error::{RenderError, RenderResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug)]
struct SlotSync {
    command_buffer: CommandBufferKey,
    image_available: SemaphoreKey,
    render_finished: SemaphoreKey,
    in_flight: FenceKey,
    phase: FramePhase,
}

/// A frame slot whose fence has been waited on and whose swap image has
/// been acquired. Uniform writes for `slot` are safe while this is held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTicket {
    pub slot: usize,
    pub image_index: u32,
    pub suboptimal: bool,
    pub command_buffer: CommandBufferKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeginFrame {
    Ready(FrameTicket),
    /// The surface must be rebuilt before the frame can be retried.
    Stale,
}

#[derive(Debug)]
pub struct FrameSynchronizer {
    slots: Vec<SlotSync>,
    current: usize,
    fence_timeout: Duration,
    acquire_timeout: Duration,
}

impl FrameSynchronizer {
    /// Creates sync objects for `frame_count` slots. Fences start signaled
    /// so the first wait of every slot returns immediately.
    pub fn new<B: GpuBackend>(
        backend: &mut B,
        frame_count: usize,
        fence_timeout: Duration,
        acquire_timeout: Duration,
    ) -> RenderResult<Self> {
        let mut slots = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            slots.push(SlotSync {
                command_buffer: backend.allocate_command_buffer()?,
                image_available: backend.create_semaphore()?,
                render_finished: backend.create_semaphore()?,
                in_flight: backend.create_fence(true)?,
                phase: FramePhase::Idle,
            });
        }
        info!("Created sync objects for {} frames in flight", frame_count);
        Ok(Self {
            slots,
            current: 0,
            fence_timeout,
            acquire_timeout,
        })
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn phase(&self, slot: usize) -> Option<FramePhase> {
        self.slots.get(slot).map(|s| s.phase)
    }

    fn slot_mut(&mut self, slot: usize, expected: FramePhase) -> RenderResult<&mut SlotSync> {
        let sync = self
            .slots
            .get_mut(slot)
            .ok_or(RenderError::UnknownHandle("frame slot"))?;
        if sync.phase != expected {
            return Err(RenderError::FrameOutOfOrder {
                expected,
                found: sync.phase,
            });
        }
        Ok(sync)
    }

    /// Waits for the current slot to retire and acquires a swap image.
    ///
    /// # Errors
    ///
    /// [`RenderError::Timeout`] when either bounded wait elapses.
    pub fn begin_frame<B: GpuBackend>(&mut self, backend: &mut B) -> RenderResult<BeginFrame> {
        let slot = self.current;
        let (fence_timeout, acquire_timeout) = (self.fence_timeout, self.acquire_timeout);
        let sync = self.slot_mut(slot, FramePhase::Idle)?;
        sync.phase = FramePhase::Acquiring;

        if !backend.wait_fence(sync.in_flight, fence_timeout)? {
            sync.phase = FramePhase::Idle;
            error!("Frame slot {} fence not signaled within {:?}", slot, fence_timeout);
            return Err(RenderError::Timeout("frame fence"));
        }

        let acquired = match backend.acquire_next_image(sync.image_available, acquire_timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                sync.phase = FramePhase::Idle;
                return Err(e);
            }
        };
        match acquired {
            AcquireOutcome::Stale => {
                sync.phase = FramePhase::Idle;
                warn!("Swap image acquisition reported a stale surface");
                Ok(BeginFrame::Stale)
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                backend.reset_fence(sync.in_flight)?;
                sync.phase = FramePhase::Recording;
                Ok(BeginFrame::Ready(FrameTicket {
                    slot,
                    image_index,
                    suboptimal,
                    command_buffer: sync.command_buffer,
                }))
            }
        }
    }

    /// Submits the recorded command buffer, waiting on image acquisition
    /// and signaling render completion plus the slot fence.
    pub fn submit<B: GpuBackend>(&mut self, backend: &mut B, ticket: &FrameTicket) -> RenderResult<()> {
        let sync = self.slot_mut(ticket.slot, FramePhase::Recording)?;
        if let Err(e) = backend.submit(
            sync.command_buffer,
            sync.image_available,
            sync.render_finished,
            sync.in_flight,
        ) {
            error!("Queue submission failed for slot {}: {}", ticket.slot, e);
            return Err(e);
        }
        sync.phase = FramePhase::Submitted;
        Ok(())
    }

    /// Queues presentation behind render completion and advances to the
    /// next slot. The slot advances even when presentation reports a stale
    /// surface, since its submission is already in flight.
    pub fn present<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        ticket: &FrameTicket,
    ) -> RenderResult<PresentOutcome> {
        let sync = self.slot_mut(ticket.slot, FramePhase::Submitted)?;
        sync.phase = FramePhase::Presenting;
        let outcome = backend.present(ticket.image_index, sync.render_finished);
        sync.phase = FramePhase::Idle;
        self.current = (ticket.slot + 1) % self.slots.len();
        let outcome = outcome?;
        if outcome == PresentOutcome::Stale {
            warn!("Presentation reported a stale surface");
        }
        Ok(outcome)
    }

    /// Blocks until the device has retired every submission.
    pub fn wait_all<B: GpuBackend>(&self, backend: &mut B) -> RenderResult<()> {
        backend.wait_idle()
    }

    /// Caller must have waited for the device first.
    pub fn destroy<B: GpuBackend>(&mut self, backend: &mut B) {
        for sync in self.slots.drain(..) {
            backend.free_command_buffer(sync.command_buffer);
            backend.destroy_semaphore(sync.image_available);
            backend.destroy_semaphore(sync.render_finished);
            backend.destroy_fence(sync.in_flight);
        }
        self.current = 0;
        debug!("Frame sync objects destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;

    const SECOND: Duration = Duration::from_secs(1);

    fn ticket(outcome: BeginFrame) -> FrameTicket {
        match outcome {
            BeginFrame::Ready(ticket) => ticket,
            BeginFrame::Stale => panic!("unexpected stale surface"),
        }
    }

    fn run_frame(sync: &mut FrameSynchronizer, backend: &mut HeadlessBackend) -> FrameTicket {
        let t = ticket(sync.begin_frame(backend).unwrap());
        backend.record(t.command_buffer, &[]).unwrap();
        sync.submit(backend, &t).unwrap();
        sync.present(backend, &t).unwrap();
        t
    }

    #[test]
    fn slots_rotate() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut sync = FrameSynchronizer::new(&mut backend, 2, SECOND, SECOND).unwrap();
        let slots: Vec<usize> = (0..4).map(|_| run_frame(&mut sync, &mut backend).slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert_eq!(sync.phase(0), Some(FramePhase::Idle));
        assert!(backend.hazards().is_empty());
    }

    #[test]
    fn stale_acquire_keeps_the_slot_and_the_fence() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut sync = FrameSynchronizer::new(&mut backend, 2, SECOND, SECOND).unwrap();
        run_frame(&mut sync, &mut backend);

        backend.inject_stale_acquires(1);
        assert_eq!(sync.begin_frame(&mut backend).unwrap(), BeginFrame::Stale);
        assert_eq!(sync.current_slot(), 1);

        let retried = ticket(sync.begin_frame(&mut backend).unwrap());
        assert_eq!(retried.slot, 1);
        assert!(backend.hazards().is_empty());
    }

    #[test]
    fn hung_gpu_times_out() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut sync = FrameSynchronizer::new(&mut backend, 1, SECOND, SECOND).unwrap();
        run_frame(&mut sync, &mut backend);

        backend.set_gpu_hung(true);
        assert!(matches!(
            sync.begin_frame(&mut backend),
            Err(RenderError::Timeout(_))
        ));
        assert_eq!(sync.phase(0), Some(FramePhase::Idle));
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut sync = FrameSynchronizer::new(&mut backend, 1, SECOND, SECOND).unwrap();
        let t = ticket(sync.begin_frame(&mut backend).unwrap());
        assert!(matches!(
            sync.present(&mut backend, &t),
            Err(RenderError::FrameOutOfOrder {
                expected: FramePhase::Submitted,
                found: FramePhase::Recording
            })
        ));
        assert!(sync.begin_frame(&mut backend).is_err());
    }

    #[test]
    fn destroy_releases_sync_objects() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut sync = FrameSynchronizer::new(&mut backend, 3, SECOND, SECOND).unwrap();
        run_frame(&mut sync, &mut backend);
        sync.wait_all(&mut backend).unwrap();
        sync.destroy(&mut backend);
        let live = backend.live_objects();
        assert_eq!(live.fences, 0);
        assert_eq!(live.semaphores, 0);
        assert_eq!(live.command_buffers, 0);
    }
}
