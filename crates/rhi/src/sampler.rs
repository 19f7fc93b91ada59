//! Texture samplers.
//!
//! One sampler per [`SamplerKind`] is created up front and shared by every
//! descriptor that samples that kind of image.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra_rhi::device::Device;
//! use umbra_rhi::sampler::{Sampler, SamplerKind};
//!
//! # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
//! let material = Sampler::new(device.clone(), SamplerKind::Material)?;
//! let sky = Sampler::new(device, SamplerKind::Cubemap)?;
//! # let _ = (material, sky);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// How a sampler addresses texels outside `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerKind {
    /// Linear, repeating, anisotropic. Material textures.
    Material,
    /// Linear, clamped to edge, anisotropic. Cube textures, so face seams
    /// never wrap to the opposite edge.
    Cubemap,
    /// Linear, clamped to edge. Shadow depth maps.
    ShadowMap,
}

impl SamplerKind {
    fn address_mode(self) -> vk::SamplerAddressMode {
        match self {
            SamplerKind::Material => vk::SamplerAddressMode::REPEAT,
            SamplerKind::Cubemap | SamplerKind::ShadowMap => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        }
    }

    fn anisotropic(self) -> bool {
        matches!(self, SamplerKind::Material | SamplerKind::Cubemap)
    }
}

/// Vulkan sampler wrapper. Destroyed when dropped.
///
/// # Thread Safety
///
/// Samplers are immutable after creation and can be shared between threads.
pub struct Sampler {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan sampler handle.
    sampler: vk::Sampler,
    /// Addressing kind, for logs.
    kind: SamplerKind,
}

impl Sampler {
    /// Creates a sampler of `kind`.
    ///
    /// Anisotropic kinds use the device's maximum anisotropy.
    ///
    /// # Errors
    ///
    /// Returns an error if sampler creation fails.
    pub fn new(device: Arc<Device>, kind: SamplerKind) -> RhiResult<Self> {
        let address_mode = kind.address_mode();
        let anisotropy = kind.anisotropic();
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                device.properties().limits.max_sampler_anisotropy
            } else {
                1.0
            })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        debug!("Created {:?} sampler", kind);
        Ok(Self {
            device,
            sampler,
            kind,
        })
    }

    /// Returns the Vulkan sampler handle.
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_sampler(self.sampler, None) };
        debug!("Destroyed {:?} sampler", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_maps_clamp() {
        assert_eq!(
            SamplerKind::ShadowMap.address_mode(),
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        );
        assert_eq!(
            SamplerKind::Material.address_mode(),
            vk::SamplerAddressMode::REPEAT
        );
    }

    #[test]
    fn cubemaps_clamp_with_anisotropy() {
        assert_eq!(
            SamplerKind::Cubemap.address_mode(),
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        );
        assert!(SamplerKind::Cubemap.anisotropic());
        assert!(!SamplerKind::ShadowMap.anisotropic());
    }
}
