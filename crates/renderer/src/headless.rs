//! A recording GPU stand-in.
//!
//! [`HeadlessBackend`] keeps every object in CPU memory and executes
//! nothing. It models just enough of the queue to catch ordering bugs:
//!
//! - A submission stays in flight until its fence is waited on (or the
//!   device idles). Buffers named by its descriptor sets and meshes count
//!   as read by it.
//! - Writing or destroying a buffer an in-flight submission reads, resetting
//!   a fence with pending work, and submitting with a signaled fence are
//!   logged as [`Hazard`]s.
//! - Semaphores must be signaled before they are waited on.
//!
//! Tests can inject stale surface reports and a hung GPU.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use slotmap::SlotMap;
use tracing::{debug, warn};

use umbra_resources::{MeshData, TextureData};
use umbra_rhi::{RhiError, vk};

use crate::backend::{
    AcquireOutcome, Barrier, BufferKey, CommandBufferKey, FenceKey, FramebufferKey, GpuBackend, GpuMesh,
    ImageKey, LayoutKey, PipelineDesc, PipelineKey, PoolKey, PoolSizes, PresentOutcome,
    RenderCommand, RenderPassKey, ResourceRef, SemaphoreKey, SetKey, ShadowTarget,
};
use crate::binding_layout::{DescriptorBindingSpec, DescriptorKind};
use crate::error::{RenderError, RenderResult};

const DEFAULT_IMAGE_COUNT: u32 = 3;

/// An ordering violation observed by the headless queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hazard {
    /// The CPU wrote a buffer that an unretired submission reads.
    WriteWhileInFlight { buffer: BufferKey },
    /// An object was destroyed while an unretired submission used it.
    DestroyWhileInFlight { what: &'static str },
    ResetPendingFence { fence: FenceKey },
    SubmitSignaledFence { fence: FenceKey },
    RecordWhilePending { command_buffer: CommandBufferKey },
    WaitOnUnsignaledSemaphore { semaphore: SemaphoreKey },
}

/// Counts of live objects by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub images: usize,
    pub framebuffers: usize,
    pub set_layouts: usize,
    pub descriptor_pools: usize,
    pub descriptor_sets: usize,
    pub render_passes: usize,
    pub pipelines: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub command_buffers: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Texture,
    Cubemap,
    ShadowDepth,
}

#[derive(Debug)]
struct ImageRecord {
    kind: ImageKind,
    extent: vk::Extent2D,
}

#[derive(Debug)]
struct PoolRecord {
    capacity: PoolSizes,
    max_sets: u32,
    used: PoolSizes,
    sets: Vec<SetKey>,
}

#[derive(Debug)]
struct SetRecord {
    layout: LayoutKey,
    bindings: HashMap<u32, ResourceRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PassKind {
    Shadow,
    Main,
}

#[derive(Debug, Default)]
struct FenceRecord {
    signaled: bool,
    pending: Option<usize>,
}

/// One queue submission as the headless queue saw it.
#[derive(Clone, Debug)]
pub struct Submission {
    pub command_buffer: CommandBufferKey,
    pub commands: Vec<RenderCommand>,
    pub fence: FenceKey,
    pub retired: bool,
    reads: HashSet<BufferKey>,
    images: HashSet<ImageKey>,
}

impl Submission {
    pub fn reads(&self, buffer: BufferKey) -> bool {
        self.reads.contains(&buffer)
    }
}

#[derive(Debug)]
pub struct HeadlessBackend {
    buffers: SlotMap<BufferKey, Vec<u8>>,
    images: SlotMap<ImageKey, ImageRecord>,
    framebuffers: SlotMap<FramebufferKey, ImageKey>,
    layouts: SlotMap<LayoutKey, DescriptorBindingSpec>,
    pools: SlotMap<PoolKey, PoolRecord>,
    sets: SlotMap<SetKey, SetRecord>,
    passes: SlotMap<RenderPassKey, PassKind>,
    pipelines: SlotMap<PipelineKey, PipelineDesc>,
    fences: SlotMap<FenceKey, FenceRecord>,
    semaphores: SlotMap<SemaphoreKey, bool>,
    command_buffers: SlotMap<CommandBufferKey, Vec<RenderCommand>>,

    main_pass: RenderPassKey,
    extent: vk::Extent2D,
    image_count: u32,
    next_image: u32,
    surface_rebuilds: u32,

    submissions: Vec<Submission>,
    presented: Vec<u32>,
    hazards: Vec<Hazard>,

    stale_acquires: u32,
    stale_presents: u32,
    failing_pipelines: u32,
    gpu_hung: bool,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let mut passes = SlotMap::with_key();
        let main_pass = passes.insert(PassKind::Main);
        Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            pools: SlotMap::with_key(),
            sets: SlotMap::with_key(),
            passes,
            pipelines: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            command_buffers: SlotMap::with_key(),
            main_pass,
            extent: vk::Extent2D { width, height },
            image_count: DEFAULT_IMAGE_COUNT,
            next_image: 0,
            surface_rebuilds: 0,
            submissions: Vec::new(),
            presented: Vec::new(),
            hazards: Vec::new(),
            stale_acquires: 0,
            stale_presents: 0,
            failing_pipelines: 0,
            gpu_hung: false,
        }
    }

    pub fn with_image_count(mut self, count: u32) -> Self {
        self.image_count = count.max(1);
        self
    }

    /// The next `count` acquisitions report a stale surface.
    pub fn inject_stale_acquires(&mut self, count: u32) {
        self.stale_acquires = count;
    }

    /// The next `count` presentations report a stale surface.
    pub fn inject_stale_presents(&mut self, count: u32) {
        self.stale_presents = count;
    }

    /// The next `count` pipeline creations fail.
    pub fn inject_pipeline_failures(&mut self, count: u32) {
        self.failing_pipelines = count;
    }

    /// While hung, fence waits on pending work time out.
    pub fn set_gpu_hung(&mut self, hung: bool) {
        self.gpu_hung = hung;
    }

    pub fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            buffers: self.buffers.len(),
            images: self.images.len(),
            framebuffers: self.framebuffers.len(),
            set_layouts: self.layouts.len(),
            descriptor_pools: self.pools.len(),
            descriptor_sets: self.sets.len(),
            render_passes: self.passes.len(),
            pipelines: self.pipelines.len(),
            fences: self.fences.len(),
            semaphores: self.semaphores.len(),
            command_buffers: self.command_buffers.len(),
        }
    }

    /// What `binding` of `set` currently points at.
    pub fn set_binding(&self, set: SetKey, binding: u32) -> Option<ResourceRef> {
        self.sets.get(set)?.bindings.get(&binding).copied()
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Swap image indices in presentation order.
    pub fn presented_images(&self) -> &[u32] {
        &self.presented
    }

    pub fn surface_rebuilds(&self) -> u32 {
        self.surface_rebuilds
    }

    pub fn recorded(&self, cmd: CommandBufferKey) -> Option<&[RenderCommand]> {
        self.command_buffers.get(cmd).map(Vec::as_slice)
    }

    pub fn image_kind(&self, image: ImageKey) -> Option<ImageKind> {
        self.images.get(image).map(|i| i.kind)
    }

    pub fn image_extent(&self, image: ImageKey) -> Option<vk::Extent2D> {
        self.images.get(image).map(|i| i.extent)
    }

    pub fn pipeline_desc(&self, pipeline: PipelineKey) -> Option<&PipelineDesc> {
        self.pipelines.get(pipeline)
    }

    fn in_flight(&self) -> impl Iterator<Item = &Submission> {
        self.submissions.iter().filter(|s| !s.retired)
    }

    fn buffer_in_flight(&self, buffer: BufferKey) -> bool {
        self.in_flight().any(|s| s.reads.contains(&buffer))
    }

    fn image_in_flight(&self, image: ImageKey) -> bool {
        self.in_flight().any(|s| s.images.contains(&image))
    }

    fn retire(&mut self, index: usize) {
        if let Some(submission) = self.submissions.get_mut(index) {
            submission.retired = true;
            if let Some(fence) = self.fences.get_mut(submission.fence) {
                fence.signaled = true;
                fence.pending = None;
            }
        }
    }

    fn hazard(&mut self, hazard: Hazard) {
        warn!("Headless queue hazard: {:?}", hazard);
        self.hazards.push(hazard);
    }

    fn new_buffer(&mut self, bytes: Vec<u8>) -> BufferKey {
        self.buffers.insert(bytes)
    }

    /// Buffers and images a command list reads through its bindings.
    fn collect_reads(&self, commands: &[RenderCommand]) -> (HashSet<BufferKey>, HashSet<ImageKey>) {
        let mut buffers = HashSet::new();
        let mut images = HashSet::new();
        for command in commands {
            match command {
                RenderCommand::BindDescriptorSet { set, .. } => {
                    let Some(record) = self.sets.get(*set) else {
                        continue;
                    };
                    for resource in record.bindings.values() {
                        match *resource {
                            ResourceRef::UniformBuffer(buffer) => {
                                buffers.insert(buffer);
                            }
                            ResourceRef::Texture(image)
                            | ResourceRef::Cubemap(image)
                            | ResourceRef::ShadowMap(image) => {
                                images.insert(image);
                            }
                        }
                    }
                }
                RenderCommand::BindMesh(mesh) => {
                    buffers.insert(mesh.vertex_buffer);
                    buffers.insert(mesh.index_buffer);
                }
                RenderCommand::PipelineBarrier(Barrier::DepthWriteToShaderRead { image }) => {
                    images.insert(*image);
                }
                _ => {}
            }
        }
        (buffers, images)
    }

    fn consume_semaphore(&mut self, semaphore: SemaphoreKey) -> RenderResult<()> {
        let signaled = self
            .semaphores
            .get_mut(semaphore)
            .ok_or(RenderError::UnknownHandle("semaphore"))?;
        if !*signaled {
            self.hazard(Hazard::WaitOnUnsignaledSemaphore { semaphore });
            return Ok(());
        }
        *signaled = false;
        Ok(())
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_host_buffer(&mut self, size: u64) -> RenderResult<BufferKey> {
        Ok(self.new_buffer(vec![0; size as usize]))
    }

    fn write_host_buffer(&mut self, buffer: BufferKey, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        if self.buffer_in_flight(buffer) {
            self.hazard(Hazard::WriteWhileInFlight { buffer });
        }
        let data = self
            .buffers
            .get_mut(buffer)
            .ok_or(RenderError::UnknownHandle("buffer"))?;
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            return Err(RenderError::SizeMismatch {
                expected: data.len() as u64,
                actual: end as u64,
            });
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read_host_buffer(&self, buffer: BufferKey) -> RenderResult<Vec<u8>> {
        self.buffers
            .get(buffer)
            .cloned()
            .ok_or(RenderError::UnknownHandle("buffer"))
    }

    fn upload_mesh(&mut self, mesh: &MeshData) -> RenderResult<GpuMesh> {
        let vertex_buffer = self.new_buffer(mesh.vertex_bytes().to_vec());
        let index_buffer = self.new_buffer(mesh.index_bytes().to_vec());
        Ok(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferKey) {
        if self.buffer_in_flight(buffer) {
            self.hazard(Hazard::DestroyWhileInFlight { what: "buffer" });
        }
        self.buffers.remove(buffer);
    }

    fn create_texture(&mut self, texture: &TextureData) -> RenderResult<ImageKey> {
        let kind = if texture.is_cube() {
            ImageKind::Cubemap
        } else {
            ImageKind::Texture
        };
        Ok(self.images.insert(ImageRecord {
            kind,
            extent: vk::Extent2D {
                width: texture.width,
                height: texture.height,
            },
        }))
    }

    fn create_shadow_target(&mut self, extent: vk::Extent2D, pass: RenderPassKey) -> RenderResult<ShadowTarget> {
        if self.passes.get(pass) != Some(&PassKind::Shadow) {
            return Err(RenderError::UnknownHandle("shadow render pass"));
        }
        let image = self.images.insert(ImageRecord {
            kind: ImageKind::ShadowDepth,
            extent,
        });
        let framebuffer = self.framebuffers.insert(image);
        Ok(ShadowTarget { image, framebuffer })
    }

    fn destroy_image(&mut self, image: ImageKey) {
        if self.image_in_flight(image) {
            self.hazard(Hazard::DestroyWhileInFlight { what: "image" });
        }
        self.images.remove(image);
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferKey) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_set_layout(&mut self, spec: &DescriptorBindingSpec) -> RenderResult<LayoutKey> {
        Ok(self.layouts.insert(spec.clone()))
    }

    fn destroy_set_layout(&mut self, layout: LayoutKey) {
        self.layouts.remove(layout);
    }

    fn create_descriptor_pool(&mut self, sizes: &PoolSizes, max_sets: u32) -> RenderResult<PoolKey> {
        Ok(self.pools.insert(PoolRecord {
            capacity: *sizes,
            max_sets,
            used: PoolSizes::default(),
            sets: Vec::new(),
        }))
    }

    fn destroy_descriptor_pool(&mut self, pool: PoolKey) {
        if let Some(record) = self.pools.remove(pool) {
            for set in record.sets {
                self.sets.remove(set);
            }
        }
    }

    fn allocate_set(&mut self, pool: PoolKey, layout: LayoutKey) -> RenderResult<SetKey> {
        let demand = self
            .layouts
            .get(layout)
            .ok_or(RenderError::UnknownHandle("set layout"))?
            .demand();
        let record = self
            .pools
            .get_mut(pool)
            .ok_or(RenderError::UnknownHandle("descriptor pool"))?;
        let used = record.used + demand;
        if record.sets.len() as u32 >= record.max_sets || !used.fits_within(&record.capacity) {
            return Err(RenderError::PoolExhausted {
                kind: "headless pool",
                requested: record.sets.len() as u32 + 1,
                capacity: record.max_sets,
            });
        }
        record.used = used;
        let set = self.sets.insert(SetRecord {
            layout,
            bindings: HashMap::new(),
        });
        record.sets.push(set);
        Ok(set)
    }

    fn write_set(&mut self, set: SetKey, binding: u32, resource: ResourceRef) -> RenderResult<()> {
        let image = match resource {
            ResourceRef::UniformBuffer(_) => None,
            ResourceRef::Texture(image) => Some((image, ImageKind::Texture)),
            ResourceRef::Cubemap(image) => Some((image, ImageKind::Cubemap)),
            ResourceRef::ShadowMap(image) => Some((image, ImageKind::ShadowDepth)),
        };
        if let Some((image, wanted)) = image {
            let found = self.image_kind(image).ok_or(RenderError::UnknownHandle("image"))?;
            if found != wanted {
                return Err(RenderError::Config(format!(
                    "binding {binding} written with {:?}, image is a {:?}",
                    resource, found
                )));
            }
        }
        let record = self
            .sets
            .get_mut(set)
            .ok_or(RenderError::UnknownHandle("descriptor set"))?;
        let spec = self
            .layouts
            .get(record.layout)
            .and_then(|layout| layout.get(binding))
            .ok_or(RenderError::UnknownHandle("descriptor binding"))?;
        let expected = match resource {
            ResourceRef::UniformBuffer(_) => DescriptorKind::UniformBuffer,
            ResourceRef::Texture(_) | ResourceRef::Cubemap(_) | ResourceRef::ShadowMap(_) => {
                DescriptorKind::CombinedImageSampler
            }
        };
        if spec.kind != expected {
            return Err(RenderError::Config(format!(
                "binding {binding} is {:?}, written with {:?}",
                spec.kind, resource
            )));
        }
        record.bindings.insert(binding, resource);
        Ok(())
    }

    fn create_shadow_render_pass(&mut self) -> RenderResult<RenderPassKey> {
        Ok(self.passes.insert(PassKind::Shadow))
    }

    fn main_render_pass(&self) -> RenderPassKey {
        self.main_pass
    }

    fn destroy_render_pass(&mut self, pass: RenderPassKey) {
        if pass != self.main_pass {
            self.passes.remove(pass);
        }
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> RenderResult<PipelineKey> {
        if self.failing_pipelines > 0 {
            self.failing_pipelines -= 1;
            return Err(RhiError::PipelineError(format!("injected failure for '{}'", desc.name)).into());
        }
        if !self.passes.contains_key(desc.pass) {
            return Err(RenderError::UnknownHandle("render pass"));
        }
        if !self.layouts.contains_key(desc.set_layout) {
            return Err(RenderError::UnknownHandle("set layout"));
        }
        Ok(self.pipelines.insert(desc.clone()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineKey) {
        self.pipelines.remove(pipeline);
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn surface_image_count(&self) -> u32 {
        self.image_count
    }

    fn rebuild_surface(&mut self, extent: vk::Extent2D) -> RenderResult<vk::Extent2D> {
        self.extent = extent;
        self.next_image = 0;
        self.surface_rebuilds += 1;
        debug!("Headless surface rebuilt at {}x{}", extent.width, extent.height);
        Ok(extent)
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceKey> {
        Ok(self.fences.insert(FenceRecord {
            signaled,
            pending: None,
        }))
    }

    fn destroy_fence(&mut self, fence: FenceKey) {
        if self.fences.get(fence).is_some_and(|f| f.pending.is_some()) {
            self.hazard(Hazard::DestroyWhileInFlight { what: "fence" });
        }
        self.fences.remove(fence);
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreKey> {
        Ok(self.semaphores.insert(false))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreKey) {
        self.semaphores.remove(semaphore);
    }

    fn allocate_command_buffer(&mut self) -> RenderResult<CommandBufferKey> {
        Ok(self.command_buffers.insert(Vec::new()))
    }

    fn free_command_buffer(&mut self, cmd: CommandBufferKey) {
        self.command_buffers.remove(cmd);
    }

    fn wait_fence(&mut self, fence: FenceKey, _timeout: Duration) -> RenderResult<bool> {
        let (pending, signaled) = self
            .fences
            .get(fence)
            .map(|f| (f.pending, f.signaled))
            .ok_or(RenderError::UnknownHandle("fence"))?;
        match pending {
            Some(_) if self.gpu_hung => Ok(false),
            Some(index) => {
                self.retire(index);
                Ok(true)
            }
            // Unsignaled with nothing pending never signals.
            None => Ok(signaled),
        }
    }

    fn reset_fence(&mut self, fence: FenceKey) -> RenderResult<()> {
        let pending = self
            .fences
            .get(fence)
            .ok_or(RenderError::UnknownHandle("fence"))?
            .pending
            .is_some();
        if pending {
            self.hazard(Hazard::ResetPendingFence { fence });
        }
        if let Some(record) = self.fences.get_mut(fence) {
            record.signaled = false;
        }
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: SemaphoreKey, _timeout: Duration) -> RenderResult<AcquireOutcome> {
        if self.stale_acquires > 0 {
            self.stale_acquires -= 1;
            return Ok(AcquireOutcome::Stale);
        }
        let semaphore = self
            .semaphores
            .get_mut(signal)
            .ok_or(RenderError::UnknownHandle("semaphore"))?;
        *semaphore = true;
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn record(&mut self, cmd: CommandBufferKey, commands: &[RenderCommand]) -> RenderResult<()> {
        let pending = self
            .in_flight()
            .any(|s| s.command_buffer == cmd);
        if pending {
            self.hazard(Hazard::RecordWhilePending { command_buffer: cmd });
        }
        let buffer = self
            .command_buffers
            .get_mut(cmd)
            .ok_or(RenderError::UnknownHandle("command buffer"))?;
        buffer.clear();
        buffer.extend_from_slice(commands);
        Ok(())
    }

    fn submit(
        &mut self,
        cmd: CommandBufferKey,
        wait: SemaphoreKey,
        signal: SemaphoreKey,
        fence: FenceKey,
    ) -> RenderResult<()> {
        let commands = self
            .command_buffers
            .get(cmd)
            .ok_or(RenderError::UnknownHandle("command buffer"))?
            .clone();
        let signaled = self
            .fences
            .get(fence)
            .ok_or(RenderError::UnknownHandle("fence"))?
            .signaled;
        if signaled {
            self.hazard(Hazard::SubmitSignaledFence { fence });
        }
        self.consume_semaphore(wait)?;

        let (reads, images) = self.collect_reads(&commands);
        let index = self.submissions.len();
        self.submissions.push(Submission {
            command_buffer: cmd,
            commands,
            fence,
            retired: false,
            reads,
            images,
        });
        if let Some(record) = self.fences.get_mut(fence) {
            record.signaled = false;
            record.pending = Some(index);
        }
        // Signaled at submit; only the wait order is checked.
        if let Some(semaphore) = self.semaphores.get_mut(signal) {
            *semaphore = true;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreKey) -> RenderResult<PresentOutcome> {
        self.consume_semaphore(wait)?;
        self.presented.push(image_index);
        if self.stale_presents > 0 {
            self.stale_presents -= 1;
            return Ok(PresentOutcome::Stale);
        }
        Ok(PresentOutcome::Presented)
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        for index in 0..self.submissions.len() {
            if !self.submissions[index].retired {
                self.retire(index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClearValues, FramebufferTarget};
    use crate::binding_layout::ShaderVisibility;

    fn submit_reading(backend: &mut HeadlessBackend, buffer: BufferKey) -> FenceKey {
        let spec = DescriptorBindingSpec::new().uniform_buffer(0, ShaderVisibility::Vertex);
        let layout = backend.create_set_layout(&spec).unwrap();
        let pool = backend.create_descriptor_pool(&PoolSizes::new(1, 0), 1).unwrap();
        let set = backend.allocate_set(pool, layout).unwrap();
        backend.write_set(set, 0, ResourceRef::UniformBuffer(buffer)).unwrap();

        let pass = backend.main_render_pass();
        let pipeline = backend
            .create_pipeline(&PipelineDesc {
                name: "test".into(),
                pass,
                vertex_shader: "test.vert.spv".into(),
                fragment_shader: None,
                set_layout: layout,
                cull_mode: Default::default(),
                depth_bias: None,
            })
            .unwrap();
        let cmd = backend.allocate_command_buffer().unwrap();
        let extent = backend.surface_extent();
        backend
            .record(
                cmd,
                &[
                    RenderCommand::BeginRenderPass {
                        pass,
                        framebuffer: FramebufferTarget::Swapchain(0),
                        extent,
                        clear: ClearValues::depth_only(),
                    },
                    RenderCommand::BindDescriptorSet { pipeline, set },
                    RenderCommand::EndRenderPass,
                ],
            )
            .unwrap();

        let acquired = backend.create_semaphore().unwrap();
        let finished = backend.create_semaphore().unwrap();
        let fence = backend.create_fence(false).unwrap();
        backend.acquire_next_image(acquired, Duration::ZERO).unwrap();
        backend.submit(cmd, acquired, finished, fence).unwrap();
        fence
    }

    #[test]
    fn writes_before_the_fence_wait_are_hazards() {
        let mut backend = HeadlessBackend::new(4, 4);
        let buffer = backend.create_host_buffer(4).unwrap();
        let fence = submit_reading(&mut backend, buffer);

        backend.write_host_buffer(buffer, 0, &[1; 4]).unwrap();
        assert_eq!(backend.hazards(), &[Hazard::WriteWhileInFlight { buffer }]);

        assert!(backend.wait_fence(fence, Duration::ZERO).unwrap());
        backend.write_host_buffer(buffer, 0, &[2; 4]).unwrap();
        assert_eq!(backend.hazards().len(), 1);
        assert_eq!(backend.read_host_buffer(buffer).unwrap(), vec![2; 4]);
    }

    #[test]
    fn resetting_a_pending_fence_is_a_hazard() {
        let mut backend = HeadlessBackend::new(4, 4);
        let buffer = backend.create_host_buffer(4).unwrap();
        let fence = submit_reading(&mut backend, buffer);
        backend.reset_fence(fence).unwrap();
        assert_eq!(backend.hazards(), &[Hazard::ResetPendingFence { fence }]);
    }

    #[test]
    fn reset_fence_without_work_never_signals() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fence = backend.create_fence(true).unwrap();
        assert!(backend.wait_fence(fence, Duration::ZERO).unwrap());
        backend.reset_fence(fence).unwrap();
        assert!(!backend.wait_fence(fence, Duration::ZERO).unwrap());
    }

    #[test]
    fn pool_capacity_is_enforced() {
        let mut backend = HeadlessBackend::new(4, 4);
        let spec = DescriptorBindingSpec::new().uniform_buffer(0, ShaderVisibility::Vertex);
        let layout = backend.create_set_layout(&spec).unwrap();
        let pool = backend.create_descriptor_pool(&PoolSizes::new(1, 0), 4).unwrap();
        backend.allocate_set(pool, layout).unwrap();
        assert!(matches!(
            backend.allocate_set(pool, layout),
            Err(RenderError::PoolExhausted { .. })
        ));
        backend.destroy_descriptor_pool(pool);
        assert_eq!(backend.live_objects().descriptor_sets, 0);
    }

    #[test]
    fn binding_kinds_are_checked() {
        let mut backend = HeadlessBackend::new(4, 4);
        let spec = DescriptorBindingSpec::new().combined_image_sampler(0, ShaderVisibility::Fragment);
        let layout = backend.create_set_layout(&spec).unwrap();
        let pool = backend.create_descriptor_pool(&PoolSizes::new(0, 1), 1).unwrap();
        let set = backend.allocate_set(pool, layout).unwrap();
        let buffer = backend.create_host_buffer(4).unwrap();
        assert!(backend.write_set(set, 0, ResourceRef::UniformBuffer(buffer)).is_err());
        assert!(backend.write_set(set, 1, ResourceRef::UniformBuffer(buffer)).is_err());
    }

    #[test]
    fn image_refs_must_match_the_image_kind() {
        let mut backend = HeadlessBackend::new(4, 4);
        let spec = DescriptorBindingSpec::new().combined_image_sampler(0, ShaderVisibility::Fragment);
        let layout = backend.create_set_layout(&spec).unwrap();
        let pool = backend.create_descriptor_pool(&PoolSizes::new(0, 1), 1).unwrap();
        let set = backend.allocate_set(pool, layout).unwrap();

        let flat = backend.create_texture(&TextureData::white()).unwrap();
        let faces = std::array::from_fn(|_| TextureData::white());
        let cube = backend
            .create_texture(&TextureData::cube("sky", faces).unwrap())
            .unwrap();
        assert_eq!(backend.image_kind(flat), Some(ImageKind::Texture));
        assert_eq!(backend.image_kind(cube), Some(ImageKind::Cubemap));

        assert!(backend.write_set(set, 0, ResourceRef::Cubemap(flat)).is_err());
        assert!(backend.write_set(set, 0, ResourceRef::Texture(cube)).is_err());
        assert!(backend.write_set(set, 0, ResourceRef::ShadowMap(cube)).is_err());
        backend.write_set(set, 0, ResourceRef::Cubemap(cube)).unwrap();
        backend.write_set(set, 0, ResourceRef::Texture(flat)).unwrap();
    }

    #[test]
    fn acquisition_is_round_robin_and_injectable() {
        let mut backend = HeadlessBackend::new(4, 4).with_image_count(2);
        let semaphore = backend.create_semaphore().unwrap();
        backend.inject_stale_acquires(1);
        assert_eq!(
            backend.acquire_next_image(semaphore, Duration::ZERO).unwrap(),
            AcquireOutcome::Stale
        );
        let indices: Vec<_> = (0..3)
            .map(|_| match backend.acquire_next_image(semaphore, Duration::ZERO).unwrap() {
                AcquireOutcome::Acquired { image_index, .. } => image_index,
                AcquireOutcome::Stale => u32::MAX,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);
    }
}
