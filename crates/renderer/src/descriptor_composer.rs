//! Descriptor layouts, the single reserved pool, and set writes.
//!
//! Capacity is reserved exactly once, after the caller has counted the
//! demand of every material instance in every frame slot. Allocation
//! tracks what is left so that under-sizing fails at the first set that
//! does not fit, independent of how the backend pools memory.

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::backend::{GpuBackend, LayoutKey, PoolKey, PoolSizes, ResourceRef, SetKey};
use crate::binding_layout::DescriptorBindingSpec;
use crate::error::{RenderError, RenderResult};

#[derive(Debug)]
struct ReservedPool {
    key: PoolKey,
    capacity: PoolSizes,
    max_sets: u32,
    used: PoolSizes,
    sets: u32,
}

#[derive(Debug, Default)]
pub struct DescriptorComposer {
    layouts: HashMap<LayoutKey, DescriptorBindingSpec>,
    pool: Option<ReservedPool>,
}

impl DescriptorComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set layout for `spec`. Equal specs produce compatible
    /// layouts; they are not deduplicated.
    pub fn declare_layout<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        spec: &DescriptorBindingSpec,
    ) -> RenderResult<LayoutKey> {
        let layout = backend.create_set_layout(spec)?;
        self.layouts.insert(layout, spec.clone());
        debug!("Declared set layout with {} bindings", spec.bindings().len());
        Ok(layout)
    }

    pub fn layout_spec(&self, layout: LayoutKey) -> Option<&DescriptorBindingSpec> {
        self.layouts.get(&layout)
    }

    /// Creates the one pool every set is allocated from.
    ///
    /// # Errors
    ///
    /// [`RenderError::CapacityAlreadyReserved`] on a second call.
    pub fn reserve_capacity<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        sizes: PoolSizes,
        max_sets: u32,
    ) -> RenderResult<()> {
        if self.pool.is_some() {
            return Err(RenderError::CapacityAlreadyReserved);
        }
        let key = backend.create_descriptor_pool(&sizes, max_sets)?;
        info!(
            "Reserved descriptor pool: {} sets, {} uniform buffers, {} image samplers",
            max_sets, sizes.uniform_buffers, sizes.combined_image_samplers
        );
        self.pool = Some(ReservedPool {
            key,
            capacity: sizes,
            max_sets,
            used: PoolSizes::default(),
            sets: 0,
        });
        Ok(())
    }

    pub fn allocate<B: GpuBackend>(&mut self, backend: &mut B, layout: LayoutKey) -> RenderResult<SetKey> {
        let demand = self
            .layouts
            .get(&layout)
            .ok_or(RenderError::UnknownHandle("set layout"))?
            .demand();
        let pool = self.pool.as_mut().ok_or(RenderError::CapacityNotReserved)?;

        if pool.sets + 1 > pool.max_sets {
            error!("Descriptor pool out of sets ({} reserved)", pool.max_sets);
            return Err(RenderError::PoolExhausted {
                kind: "descriptor sets",
                requested: pool.sets + 1,
                capacity: pool.max_sets,
            });
        }
        let used = pool.used + demand;
        if used.uniform_buffers > pool.capacity.uniform_buffers {
            error!("Descriptor pool out of uniform buffer descriptors");
            return Err(RenderError::PoolExhausted {
                kind: "uniform buffers",
                requested: used.uniform_buffers,
                capacity: pool.capacity.uniform_buffers,
            });
        }
        if used.combined_image_samplers > pool.capacity.combined_image_samplers {
            error!("Descriptor pool out of image sampler descriptors");
            return Err(RenderError::PoolExhausted {
                kind: "combined image samplers",
                requested: used.combined_image_samplers,
                capacity: pool.capacity.combined_image_samplers,
            });
        }

        let set = backend.allocate_set(pool.key, layout)?;
        pool.used = used;
        pool.sets += 1;
        Ok(set)
    }

    /// Points one binding of `set` at `resource`. Calling it again for the
    /// same binding repoints it.
    pub fn write<B: GpuBackend>(
        &self,
        backend: &mut B,
        set: SetKey,
        binding: u32,
        resource: ResourceRef,
    ) -> RenderResult<()> {
        backend.write_set(set, binding, resource)
    }

    /// Sets handed out so far.
    pub fn allocated_sets(&self) -> u32 {
        self.pool.as_ref().map_or(0, |p| p.sets)
    }

    pub fn is_reserved(&self) -> bool {
        self.pool.is_some()
    }

    /// Destroys the pool (freeing every set) and all declared layouts.
    pub fn destroy<B: GpuBackend>(&mut self, backend: &mut B) {
        if let Some(pool) = self.pool.take() {
            backend.destroy_descriptor_pool(pool.key);
        }
        for (layout, _) in self.layouts.drain() {
            backend.destroy_set_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_layout::{BindingLayout, ShaderVisibility};
    use crate::headless::HeadlessBackend;

    fn ubo_spec() -> DescriptorBindingSpec {
        DescriptorBindingSpec::new().uniform_buffer(0, ShaderVisibility::Vertex)
    }

    #[test]
    fn allocation_requires_reservation() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut composer = DescriptorComposer::new();
        let layout = composer.declare_layout(&mut backend, &ubo_spec()).unwrap();
        assert!(matches!(
            composer.allocate(&mut backend, layout),
            Err(RenderError::CapacityNotReserved)
        ));
    }

    #[test]
    fn reserve_is_once_only() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut composer = DescriptorComposer::new();
        composer
            .reserve_capacity(&mut backend, PoolSizes::new(1, 0), 1)
            .unwrap();
        assert!(matches!(
            composer.reserve_capacity(&mut backend, PoolSizes::new(1, 0), 1),
            Err(RenderError::CapacityAlreadyReserved)
        ));
    }

    #[test]
    fn undersized_pool_fails_on_the_last_allocation() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut composer = DescriptorComposer::new();
        let layout = composer
            .declare_layout(&mut backend, &BindingLayout::new(1, 1).spec())
            .unwrap();
        let per_set = BindingLayout::new(1, 1).spec().demand();

        // Four sets worth of descriptors, minus one uniform buffer.
        let mut sizes = per_set * 4;
        sizes.uniform_buffers -= 1;
        composer.reserve_capacity(&mut backend, sizes, 4).unwrap();

        for _ in 0..3 {
            composer.allocate(&mut backend, layout).unwrap();
        }
        assert!(matches!(
            composer.allocate(&mut backend, layout),
            Err(RenderError::PoolExhausted {
                kind: "uniform buffers",
                ..
            })
        ));
        assert_eq!(composer.allocated_sets(), 3);
    }

    #[test]
    fn destroy_releases_everything() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut composer = DescriptorComposer::new();
        let layout = composer.declare_layout(&mut backend, &ubo_spec()).unwrap();
        composer
            .reserve_capacity(&mut backend, PoolSizes::new(2, 0), 2)
            .unwrap();
        composer.allocate(&mut backend, layout).unwrap();

        composer.destroy(&mut backend);
        let live = backend.live_objects();
        assert_eq!(live.set_layouts, 0);
        assert_eq!(live.descriptor_pools, 0);
        assert_eq!(live.descriptor_sets, 0);
    }
}
