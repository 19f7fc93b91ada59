//! Host-mapped uniform buffers.
//!
//! [`PerFrameUniformStore`] hands out one physical buffer per handle and
//! validates write sizes. Per-frame multiplicity lives one level up in
//! [`PerFrameUniform`], which holds one handle per frame slot.
//!
//! Writes are plain host copies. The caller guarantees, by waiting on the
//! slot's fence first, that the GPU is no longer reading the target buffer.

use std::collections::HashMap;
use std::marker::PhantomData;

use bytemuck::Pod;
use tracing::debug;

use crate::backend::{BufferKey, GpuBackend};
use crate::error::{RenderError, RenderResult};

/// One host-mapped buffer of a fixed size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformHandle {
    buffer: BufferKey,
    size: u64,
}

impl UniformHandle {
    #[inline]
    pub fn buffer(&self) -> BufferKey {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug, Default)]
pub struct PerFrameUniformStore {
    live: HashMap<BufferKey, u64>,
}

impl PerFrameUniformStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<B: GpuBackend>(&mut self, backend: &mut B, size: u64) -> RenderResult<UniformHandle> {
        let buffer = backend.create_host_buffer(size)?;
        self.live.insert(buffer, size);
        Ok(UniformHandle { buffer, size })
    }

    /// Copies `bytes` into the buffer.
    ///
    /// # Errors
    ///
    /// [`RenderError::SizeMismatch`] unless `bytes` covers the whole buffer;
    /// nothing is written in that case.
    pub fn write<B: GpuBackend>(
        &self,
        backend: &mut B,
        handle: UniformHandle,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let size = *self
            .live
            .get(&handle.buffer)
            .ok_or(RenderError::UnknownHandle("uniform"))?;
        if bytes.len() as u64 != size {
            return Err(RenderError::SizeMismatch {
                expected: size,
                actual: bytes.len() as u64,
            });
        }
        backend.write_host_buffer(handle.buffer, 0, bytes)
    }

    pub fn destroy<B: GpuBackend>(&mut self, backend: &mut B, handle: UniformHandle) {
        if self.live.remove(&handle.buffer).is_some() {
            backend.destroy_buffer(handle.buffer);
        }
    }

    /// Frees every buffer still alive.
    pub fn destroy_all<B: GpuBackend>(&mut self, backend: &mut B) {
        let count = self.live.len();
        for (buffer, _) in self.live.drain() {
            backend.destroy_buffer(buffer);
        }
        if count > 0 {
            debug!("Destroyed {} uniform buffers", count);
        }
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// One logical `T`, one physical buffer per frame slot.
#[derive(Debug)]
pub struct PerFrameUniform<T> {
    slots: Vec<UniformHandle>,
    _marker: PhantomData<T>,
}

impl<T: Pod> PerFrameUniform<T> {
    pub fn new<B: GpuBackend>(
        store: &mut PerFrameUniformStore,
        backend: &mut B,
        frame_count: usize,
    ) -> RenderResult<Self> {
        let size = std::mem::size_of::<T>() as u64;
        let slots = (0..frame_count)
            .map(|_| store.create(backend, size))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self {
            slots,
            _marker: PhantomData,
        })
    }

    pub fn write<B: GpuBackend>(
        &self,
        store: &PerFrameUniformStore,
        backend: &mut B,
        slot: usize,
        value: &T,
    ) -> RenderResult<()> {
        store.write(backend, self.handle(slot)?, bytemuck::bytes_of(value))
    }

    /// Same value into every slot; used for initial contents.
    pub fn write_all<B: GpuBackend>(
        &self,
        store: &PerFrameUniformStore,
        backend: &mut B,
        value: &T,
    ) -> RenderResult<()> {
        for slot in 0..self.slots.len() {
            self.write(store, backend, slot, value)?;
        }
        Ok(())
    }

    pub fn handle(&self, slot: usize) -> RenderResult<UniformHandle> {
        self.slots
            .get(slot)
            .copied()
            .ok_or(RenderError::UnknownHandle("frame slot"))
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn destroy<B: GpuBackend>(self, store: &mut PerFrameUniformStore, backend: &mut B) {
        for handle in self.slots {
            store.destroy(backend, handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::ubo::MvpUniform;
    use glam::Mat4;

    #[test]
    fn wrong_length_leaves_contents_untouched() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut store = PerFrameUniformStore::new();
        let handle = store.create(&mut backend, 16).unwrap();

        let sentinel = [0xAB_u8; 16];
        store.write(&mut backend, handle, &sentinel).unwrap();

        for len in [0, 15, 17, 64] {
            let err = store.write(&mut backend, handle, &vec![0; len]).unwrap_err();
            assert!(matches!(err, RenderError::SizeMismatch { expected: 16, .. }));
            assert_eq!(backend.read_host_buffer(handle.buffer()).unwrap(), sentinel);
        }
    }

    #[test]
    fn destroyed_handles_are_rejected() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut store = PerFrameUniformStore::new();
        let handle = store.create(&mut backend, 4).unwrap();
        store.destroy(&mut backend, handle);
        assert!(matches!(
            store.write(&mut backend, handle, &[0; 4]),
            Err(RenderError::UnknownHandle(_))
        ));
        assert_eq!(backend.live_objects().buffers, 0);
    }

    #[test]
    fn per_frame_slots_are_independent() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut store = PerFrameUniformStore::new();
        let mvp = PerFrameUniform::<MvpUniform>::new(&mut store, &mut backend, 2).unwrap();
        assert_eq!(store.live_count(), 2);

        let value = MvpUniform::new(Mat4::from_scale(glam::Vec3::splat(2.0)), Mat4::IDENTITY, Mat4::IDENTITY);
        mvp.write(&store, &mut backend, 1, &value).unwrap();

        let slot0 = backend.read_host_buffer(mvp.handle(0).unwrap().buffer()).unwrap();
        let slot1 = backend.read_host_buffer(mvp.handle(1).unwrap().buffer()).unwrap();
        assert_eq!(bytemuck::pod_read_unaligned::<MvpUniform>(&slot1), value);
        assert!(slot0.iter().all(|&b| b == 0));
        assert!(mvp.handle(2).is_err());

        mvp.destroy(&mut store, &mut backend);
        assert_eq!(store.live_count(), 0);
    }
}
