//! [`GpuBackend`] over `umbra_rhi`.
//!
//! The backend owns the instance, surface, device and swapchain, plus the
//! main render pass with one framebuffer per swap image. Everything else is
//! created on request and named by slotmap keys.
//!
//! # Resource Destruction Order
//!
//! Object maps are cleared first (each rhi wrapper destroys its handle on
//! drop). The remaining fields are declared so that the swapchain drops
//! before the last device `Arc`, the device before the surface, and the
//! instance last.

mod record;

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use slotmap::SlotMap;
use tracing::{debug, error, info, warn};

use umbra_platform::{Surface, Window};
use umbra_resources::{MeshData, TextureData};
use umbra_rhi::buffer::{Buffer, BufferUsage};
use umbra_rhi::command::CommandPool;
use umbra_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, write_combined_image,
    write_uniform_buffer,
};
use umbra_rhi::device::Device;
use umbra_rhi::image::{Image, find_depth_format};
use umbra_rhi::instance::Instance;
use umbra_rhi::physical_device::select_physical_device;
use umbra_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use umbra_rhi::render_pass::{Framebuffer, RenderPass};
use umbra_rhi::sampler::{Sampler, SamplerKind};
use umbra_rhi::shader::{Shader, ShaderStage};
use umbra_rhi::swapchain::{AcquiredImage, Swapchain};
use umbra_rhi::sync::{Fence, Semaphore};
use umbra_rhi::vertex::VertexLayout;
use umbra_rhi::RhiError;

use crate::backend::{
    AcquireOutcome, BufferKey, CommandBufferKey, FenceKey, FramebufferKey, GpuBackend, GpuMesh,
    ImageKey, LayoutKey, PipelineDesc, PipelineKey, PoolKey, PoolSizes, PresentOutcome,
    RenderCommand, RenderPassKey, ResourceRef, SemaphoreKey, SetKey, ShadowTarget,
};
use crate::binding_layout::{DescriptorBindingSpec, DescriptorKind, ShaderVisibility};
use crate::error::{RenderError, RenderResult};

struct PipelineEntry {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

struct SetEntry {
    set: vk::DescriptorSet,
    pool: PoolKey,
}

/// The swap-image framebuffers and the depth image they share.
struct SurfaceTargets {
    framebuffers: Vec<Framebuffer>,
    /// Attached to every framebuffer.
    _depth: Image,
}

pub struct VulkanBackend {
    buffers: SlotMap<BufferKey, Buffer>,
    images: SlotMap<ImageKey, Image>,
    framebuffers: SlotMap<FramebufferKey, Framebuffer>,
    layouts: SlotMap<LayoutKey, DescriptorSetLayout>,
    pools: SlotMap<PoolKey, DescriptorPool>,
    sets: SlotMap<SetKey, SetEntry>,
    pipelines: SlotMap<PipelineKey, PipelineEntry>,
    passes: SlotMap<RenderPassKey, RenderPass>,
    fences: SlotMap<FenceKey, Fence>,
    semaphores: SlotMap<SemaphoreKey, Semaphore>,
    command_buffers: SlotMap<CommandBufferKey, vk::CommandBuffer>,

    main_pass: RenderPassKey,
    /// `None` only while the swapchain is being rebuilt.
    surface_targets: Option<SurfaceTargets>,
    depth_format: vk::Format,
    material_sampler: Sampler,
    cubemap_sampler: Sampler,
    shadow_sampler: Sampler,
    command_pool: CommandPool,
    upload_pool: CommandPool,

    swapchain: Swapchain,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl VulkanBackend {
    /// Brings up Vulkan for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if no GPU can present to the window's surface, or
    /// any Vulkan object creation fails.
    pub fn new(window: &Window, enable_validation: bool) -> RenderResult<Self> {
        let (width, height) = window.inner_size();
        info!("Initializing Vulkan backend ({}x{})", width, height);

        let instance = Instance::new(enable_validation, window.required_extensions()?)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let gpu = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &gpu)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            vk::Extent2D { width, height },
        )?;
        let depth_format = find_depth_format(&device)?;
        let main_pass = RenderPass::main(device.clone(), swapchain.format(), depth_format)?;
        let surface_targets = create_surface_targets(&device, &swapchain, &main_pass, depth_format)?;

        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or_else(|| RhiError::InvalidHandle("device has no graphics queue".into()))?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let upload_pool = CommandPool::new_transient(device.clone(), graphics_family)?;
        let material_sampler = Sampler::new(device.clone(), SamplerKind::Material)?;
        let cubemap_sampler = Sampler::new(device.clone(), SamplerKind::Cubemap)?;
        let shadow_sampler = Sampler::new(device.clone(), SamplerKind::ShadowMap)?;

        let mut passes = SlotMap::with_key();
        let main_pass = passes.insert(main_pass);

        info!(
            "Vulkan backend ready: {} swap images at {}x{}",
            swapchain.image_count(),
            swapchain.extent().width,
            swapchain.extent().height
        );
        Ok(Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            pools: SlotMap::with_key(),
            sets: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            passes,
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            command_buffers: SlotMap::with_key(),
            main_pass,
            surface_targets: Some(surface_targets),
            depth_format,
            material_sampler,
            cubemap_sampler,
            shadow_sampler,
            command_pool,
            upload_pool,
            swapchain,
            device,
            surface,
            instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn buffer(&self, key: BufferKey) -> RenderResult<&Buffer> {
        self.buffers.get(key).ok_or(RenderError::UnknownHandle("buffer"))
    }

    fn image(&self, key: ImageKey) -> RenderResult<&Image> {
        self.images.get(key).ok_or(RenderError::UnknownHandle("image"))
    }

    fn pass(&self, key: RenderPassKey) -> RenderResult<&RenderPass> {
        self.passes.get(key).ok_or(RenderError::UnknownHandle("render pass"))
    }

    fn fence(&self, key: FenceKey) -> RenderResult<&Fence> {
        self.fences.get(key).ok_or(RenderError::UnknownHandle("fence"))
    }

    fn semaphore(&self, key: SemaphoreKey) -> RenderResult<vk::Semaphore> {
        self.semaphores
            .get(key)
            .map(Semaphore::handle)
            .ok_or(RenderError::UnknownHandle("semaphore"))
    }

    fn command_buffer(&self, key: CommandBufferKey) -> RenderResult<vk::CommandBuffer> {
        self.command_buffers
            .get(key)
            .copied()
            .ok_or(RenderError::UnknownHandle("command buffer"))
    }
}

fn create_surface_targets(
    device: &Arc<Device>,
    swapchain: &Swapchain,
    main_pass: &RenderPass,
    depth_format: vk::Format,
) -> RenderResult<SurfaceTargets> {
    let extent = swapchain.extent();
    let depth = Image::depth_attachment(device.clone(), extent, depth_format, false)?;
    let framebuffers = swapchain
        .image_views()
        .iter()
        .map(|&view| Framebuffer::new(device.clone(), main_pass, &[view, depth.view()], extent))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Created {} swapchain framebuffers", framebuffers.len());
    Ok(SurfaceTargets {
        framebuffers,
        _depth: depth,
    })
}

fn stage_flags(visibility: ShaderVisibility) -> vk::ShaderStageFlags {
    match visibility {
        ShaderVisibility::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderVisibility::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderVisibility::VertexFragment => {
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        }
    }
}

fn pool_sizes(sizes: &PoolSizes) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::UNIFORM_BUFFER, sizes.uniform_buffers),
        (
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            sizes.combined_image_samplers,
        ),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
        ty,
        descriptor_count,
    })
    .collect()
}

impl GpuBackend for VulkanBackend {
    fn create_host_buffer(&mut self, size: u64) -> RenderResult<BufferKey> {
        let buffer = Buffer::new(self.device.clone(), BufferUsage::Uniform, size)?;
        Ok(self.buffers.insert(buffer))
    }

    fn write_host_buffer(&mut self, buffer: BufferKey, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        self.buffer(buffer)?.write_data(offset, bytes)?;
        Ok(())
    }

    fn read_host_buffer(&self, buffer: BufferKey) -> RenderResult<Vec<u8>> {
        Ok(self.buffer(buffer)?.read_data()?)
    }

    fn upload_mesh(&mut self, mesh: &MeshData) -> RenderResult<GpuMesh> {
        let vertex =
            Buffer::new_with_data(self.device.clone(), BufferUsage::Vertex, mesh.vertex_bytes())?;
        let index =
            Buffer::new_with_data(self.device.clone(), BufferUsage::Index, mesh.index_bytes())?;
        Ok(GpuMesh {
            vertex_buffer: self.buffers.insert(vertex),
            index_buffer: self.buffers.insert(index),
            index_count: mesh.index_count(),
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferKey) {
        self.buffers.remove(buffer);
    }

    fn create_texture(&mut self, texture: &TextureData) -> RenderResult<ImageKey> {
        let image = if texture.is_cube() {
            Image::texture_cube_rgba8(
                self.device.clone(),
                &self.upload_pool,
                texture.width,
                &texture.pixels,
            )?
        } else {
            Image::texture_rgba8(
                self.device.clone(),
                &self.upload_pool,
                texture.width,
                texture.height,
                &texture.pixels,
            )?
        };
        Ok(self.images.insert(image))
    }

    fn create_shadow_target(
        &mut self,
        extent: vk::Extent2D,
        pass: RenderPassKey,
    ) -> RenderResult<ShadowTarget> {
        let image = Image::depth_attachment(self.device.clone(), extent, self.depth_format, true)?;
        let framebuffer = Framebuffer::new(self.device.clone(), self.pass(pass)?, &[image.view()], extent)?;
        Ok(ShadowTarget {
            image: self.images.insert(image),
            framebuffer: self.framebuffers.insert(framebuffer),
        })
    }

    fn destroy_image(&mut self, image: ImageKey) {
        self.images.remove(image);
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferKey) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_set_layout(&mut self, spec: &DescriptorBindingSpec) -> RenderResult<LayoutKey> {
        let bindings: Vec<_> = spec
            .bindings()
            .iter()
            .map(|b| match b.kind {
                DescriptorKind::UniformBuffer => {
                    DescriptorBindingBuilder::uniform_buffer(b.binding, stage_flags(b.visibility))
                }
                DescriptorKind::CombinedImageSampler => DescriptorBindingBuilder::combined_image_sampler(
                    b.binding,
                    stage_flags(b.visibility),
                ),
            })
            .collect();
        let layout = DescriptorSetLayout::new(self.device.clone(), &bindings)?;
        Ok(self.layouts.insert(layout))
    }

    fn destroy_set_layout(&mut self, layout: LayoutKey) {
        self.layouts.remove(layout);
    }

    fn create_descriptor_pool(&mut self, sizes: &PoolSizes, max_sets: u32) -> RenderResult<PoolKey> {
        let pool = DescriptorPool::new(self.device.clone(), max_sets, &pool_sizes(sizes))?;
        Ok(self.pools.insert(pool))
    }

    fn destroy_descriptor_pool(&mut self, pool: PoolKey) {
        if self.pools.remove(pool).is_some() {
            self.sets.retain(|_, entry| entry.pool != pool);
        }
    }

    fn allocate_set(&mut self, pool: PoolKey, layout: LayoutKey) -> RenderResult<SetKey> {
        let layout = self
            .layouts
            .get(layout)
            .ok_or(RenderError::UnknownHandle("set layout"))?
            .handle();
        let set = self
            .pools
            .get(pool)
            .ok_or(RenderError::UnknownHandle("descriptor pool"))?
            .allocate_one(layout)?;
        Ok(self.sets.insert(SetEntry { set, pool }))
    }

    fn write_set(&mut self, set: SetKey, binding: u32, resource: ResourceRef) -> RenderResult<()> {
        let set = self
            .sets
            .get(set)
            .ok_or(RenderError::UnknownHandle("descriptor set"))?
            .set;
        match resource {
            ResourceRef::UniformBuffer(key) => {
                let buffer = self.buffer(key)?;
                write_uniform_buffer(&self.device, set, binding, buffer.handle(), buffer.size());
            }
            ResourceRef::Texture(key) => {
                write_combined_image(
                    &self.device,
                    set,
                    binding,
                    self.image(key)?.view(),
                    self.material_sampler.handle(),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
            ResourceRef::Cubemap(key) => {
                let image = self.image(key)?;
                if !image.is_cube() {
                    return Err(RenderError::Config(format!(
                        "binding {binding} expects a cube image"
                    )));
                }
                write_combined_image(
                    &self.device,
                    set,
                    binding,
                    image.view(),
                    self.cubemap_sampler.handle(),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
            ResourceRef::ShadowMap(key) => {
                write_combined_image(
                    &self.device,
                    set,
                    binding,
                    self.image(key)?.view(),
                    self.shadow_sampler.handle(),
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                );
            }
        }
        Ok(())
    }

    fn create_shadow_render_pass(&mut self) -> RenderResult<RenderPassKey> {
        let pass = RenderPass::shadow(self.device.clone(), self.depth_format)?;
        Ok(self.passes.insert(pass))
    }

    fn main_render_pass(&self) -> RenderPassKey {
        self.main_pass
    }

    fn destroy_render_pass(&mut self, pass: RenderPassKey) {
        if pass == self.main_pass {
            return;
        }
        self.passes.remove(pass);
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> RenderResult<PipelineKey> {
        let set_layout = self
            .layouts
            .get(desc.set_layout)
            .ok_or(RenderError::UnknownHandle("set layout"))?
            .handle();
        let layout = PipelineLayout::new(self.device.clone(), &[set_layout])?;

        let vertex = Shader::from_spirv_file(self.device.clone(), &desc.vertex_shader, ShaderStage::Vertex)?;
        let fragment = desc
            .fragment_shader
            .as_deref()
            .map(|path| Shader::from_spirv_file(self.device.clone(), path, ShaderStage::Fragment))
            .transpose()?;

        let mut builder = GraphicsPipelineBuilder::new(self.pass(desc.pass)?)
            .vertex_shader(&vertex)
            .vertex_layout(VertexLayout::POSITION_NORMAL_UV)
            .cull_mode(desc.cull_mode);
        if let Some(fragment) = &fragment {
            builder = builder.fragment_shader(fragment);
        }
        if let Some(bias) = desc.depth_bias {
            builder = builder.depth_bias(bias);
        }
        let pipeline = builder.build(self.device.clone(), &layout)?;
        debug!("Pipeline '{}' created", desc.name);
        Ok(self.pipelines.insert(PipelineEntry { pipeline, layout }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineKey) {
        self.pipelines.remove(pipeline);
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn surface_image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    fn rebuild_surface(&mut self, extent: vk::Extent2D) -> RenderResult<vk::Extent2D> {
        self.device.wait_idle()?;
        self.surface_targets = None;
        self.swapchain
            .recreate(&self.instance, self.surface.handle(), extent)?;
        let main_pass = self.pass(self.main_pass)?;
        let targets = create_surface_targets(&self.device, &self.swapchain, main_pass, self.depth_format)?;
        self.surface_targets = Some(targets);
        Ok(self.swapchain.extent())
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceKey> {
        let fence = Fence::new(self.device.clone(), signaled)?;
        Ok(self.fences.insert(fence))
    }

    fn destroy_fence(&mut self, fence: FenceKey) {
        self.fences.remove(fence);
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreKey> {
        let semaphore = Semaphore::new(self.device.clone())?;
        Ok(self.semaphores.insert(semaphore))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreKey) {
        self.semaphores.remove(semaphore);
    }

    fn allocate_command_buffer(&mut self) -> RenderResult<CommandBufferKey> {
        let cmd = self.command_pool.allocate_command_buffer()?;
        Ok(self.command_buffers.insert(cmd))
    }

    fn free_command_buffer(&mut self, cmd: CommandBufferKey) {
        if let Some(cmd) = self.command_buffers.remove(cmd) {
            // SAFETY: callers free command buffers only after the device is idle.
            unsafe {
                self.device
                    .handle()
                    .free_command_buffers(self.command_pool.handle(), &[cmd]);
            }
        }
    }

    fn wait_fence(&mut self, fence: FenceKey, timeout: Duration) -> RenderResult<bool> {
        Ok(self.fence(fence)?.wait(timeout)?)
    }

    fn reset_fence(&mut self, fence: FenceKey) -> RenderResult<()> {
        self.fence(fence)?.reset()?;
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        signal: SemaphoreKey,
        timeout: Duration,
    ) -> RenderResult<AcquireOutcome> {
        match self.swapchain.acquire_next_image(self.semaphore(signal)?, timeout)? {
            AcquiredImage::Ready { index, suboptimal } => Ok(AcquireOutcome::Acquired {
                image_index: index,
                suboptimal,
            }),
            AcquiredImage::OutOfDate => Ok(AcquireOutcome::Stale),
            AcquiredImage::Timeout => {
                warn!("No swap image became available within {:?}", timeout);
                Err(RenderError::Timeout("swap image"))
            }
        }
    }

    fn record(&mut self, cmd: CommandBufferKey, commands: &[RenderCommand]) -> RenderResult<()> {
        let cmd = self.command_buffer(cmd)?;
        self.record_commands(cmd, commands)
    }

    fn submit(
        &mut self,
        cmd: CommandBufferKey,
        wait: SemaphoreKey,
        signal: SemaphoreKey,
        fence: FenceKey,
    ) -> RenderResult<()> {
        let command_buffers = [self.command_buffer(cmd)?];
        let wait_semaphores = [self.semaphore(wait)?];
        let signal_semaphores = [self.semaphore(signal)?];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        let fence = self.fence(fence)?.handle();
        // SAFETY: `cmd` was recorded by `record`, and the frame synchronizer
        // resets `fence` right before recording.
        unsafe { self.device.submit_graphics(&[submit], fence)? };
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreKey) -> RenderResult<PresentOutcome> {
        let wait = self.semaphore(wait)?;
        match self
            .swapchain
            .present(self.device.present_queue(), image_index, wait)
        {
            Ok(status) if status.is_stale() => Ok(PresentOutcome::Stale),
            Ok(_) => Ok(PresentOutcome::Presented),
            Err(e) if e.is_out_of_date() => Ok(PresentOutcome::Stale),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during backend drop: {:?}", e);
        }

        self.sets.clear();
        self.pipelines.clear();
        self.pools.clear();
        self.layouts.clear();
        self.framebuffers.clear();
        self.images.clear();
        self.buffers.clear();
        self.fences.clear();
        self.semaphores.clear();
        self.command_buffers.clear();

        self.surface_targets = None;
        self.passes.clear();
        // The remaining fields drop in declaration order.
        info!("Vulkan backend destroyed");
    }
}
