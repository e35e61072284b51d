// Vulkan render backend
//
// Owns every backend object behind typed handles and drives them through
// the command-list, swapchain and stash machinery. Generic over the raw
// device so the whole backend runs against the recording mock in tests.

use super::buffer::Buffer;
use super::command::{CommandBuffer, CommandPool, RecordingState, RenderPassBegin};
use super::descriptor::{DescriptorPool, PoolCapacity};
use super::error::{ensure, BackendError};
use super::raw::RawDevice;
use super::stash::Stashes;
use super::swapchain::Swapchain;
use super::texture::Texture;
use super::transition::ImageAccess;
use crate::handles::{BufferHandle, CmdListHandle, HandleTable, IndexBufferHandle, TextureHandle, VertexBufferHandle};
use crate::interface::RenderBackend;
use crate::types::{
    AttachmentType, BufferUsage, DescriptorSetLayoutInfo, Extent, IndexType, LoadOp, MemoryType, PipelineInfo,
    QueueUsage, Rectangle, RenderPassInfo, SamplerInfo, ShaderObjectInfo, ShaderObjectType, ShaderStage,
    SwapchainInfo, TextureDescription, Viewport,
};
use anyhow::{Context, Result};
use ash::vk;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything the backend needs besides the device
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub swapchain: SwapchainInfo,
    pub clear_color: [f32; 4],
    pub shader_dir: PathBuf,
    pub descriptor_capacity: PoolCapacity,
}

struct IndexBuffer<D: RawDevice> {
    buffer: Buffer<D>,
    index_type: IndexType,
}

pub struct VkRenderBackend<D: RawDevice> {
    device: Arc<D>,
    clear_color: [f32; 4],

    // Declaration order is teardown order after the explicit drains in Drop
    command_lists: HandleTable<CmdListHandle, CommandBuffer<D>>,
    /// Destroyed while still executing; freed by `cleanup`. The handle stays
    /// so a swapchain slot can still wait on its last consumer.
    retired: Vec<(CmdListHandle, CommandBuffer<D>)>,
    textures: HandleTable<TextureHandle, Texture<D>>,
    buffers: HandleTable<BufferHandle, Buffer<D>>,
    vertex_buffers: HandleTable<VertexBufferHandle, Buffer<D>>,
    index_buffers: HandleTable<IndexBufferHandle, IndexBuffer<D>>,
    target_framebuffers: HashMap<(vk::RenderPass, Vec<vk::ImageView>), vk::Framebuffer>,
    swapchain: Swapchain<D>,
    descriptors: DescriptorPool<D>,
    stashes: Stashes<D>,
    command_pools: HashMap<u32, CommandPool<D>>,
}

impl<D: RawDevice> VkRenderBackend<D> {
    pub fn new(device: Arc<D>, settings: BackendSettings) -> Result<Self> {
        log::info!("Initializing render backend (shaders from {:?})", settings.shader_dir);
        let swapchain = Swapchain::new(device.clone(), settings.swapchain)?;
        let descriptors = DescriptorPool::new(device.clone(), settings.descriptor_capacity)?;
        let stashes = Stashes::new(device.clone(), settings.shader_dir);

        Ok(Self {
            device,
            clear_color: settings.clear_color,
            command_lists: HandleTable::new(),
            retired: Vec::new(),
            textures: HandleTable::new(),
            buffers: HandleTable::new(),
            vertex_buffers: HandleTable::new(),
            index_buffers: HandleTable::new(),
            target_framebuffers: HashMap::new(),
            swapchain,
            descriptors,
            stashes,
            command_pools: HashMap::new(),
        })
    }

    /// The recording list `cmd`, checked for an open recording
    fn recording(&mut self, cmd: CmdListHandle, operation: &'static str) -> Result<&mut CommandBuffer<D>> {
        let list = self.command_lists.get_mut(cmd)?;
        ensure(
            list.state() == RecordingState::Recording,
            BackendError::InvalidState {
                operation,
                actual: list.state(),
                expected: "Recording",
            },
        )?;
        Ok(list)
    }

    /// Device-local buffer filled through a staging copy recorded on `cmd`
    fn staged_buffer(
        &mut self,
        cmd: CmdListHandle,
        name: &'static str,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<Buffer<D>> {
        let device = self.device.clone();
        let list = self.recording(cmd, name)?;
        let staging = Buffer::staging(device.clone(), data)?;
        let buffer = Buffer::acquire(
            device,
            name,
            data.len() as u64,
            usage | BufferUsage::TRANSFER_DST,
            MemoryType::DEVICE_LOCAL,
        )?;
        list.copy_buffer(&staging, &buffer)?;
        list.attach_staging(staging);
        Ok(buffer)
    }

    /// Resolves `binding` of the bound layout and checks its declared type
    fn shader_object(
        &mut self,
        cmd: CmdListHandle,
        operation: &'static str,
        binding: u32,
        kind: ShaderObjectType,
    ) -> Result<(DescriptorSetLayoutInfo, ShaderObjectInfo)> {
        let list = self.command_lists.get_mut(cmd)?;
        let set_layout = list.bound_for_binding(operation)?.set_layout.clone();
        let object = *set_layout
            .binding(binding)
            .ok_or(BackendError::UnknownBinding(binding))?;
        ensure(
            object.kind == kind,
            BackendError::BindingTypeMismatch {
                binding,
                declared: object.kind,
                requested: kind,
            },
        )?;
        Ok((set_layout, object))
    }

    fn bind_buffer_as(
        &mut self,
        cmd: CmdListHandle,
        buffer: BufferHandle,
        set: u32,
        binding: u32,
        kind: ShaderObjectType,
    ) -> Result<()> {
        let operation = match kind {
            ShaderObjectType::Uniform => "bind_uniform_buffer",
            _ => "bind_buffer",
        };
        let (set_layout, object) = self.shader_object(cmd, operation, binding, kind)?;
        self.command_lists.get(cmd)?.check_set_index(set)?;
        let resource = self.buffers.get_mut(buffer)?;
        let descriptor = resource.descriptor_set(
            &set_layout,
            &object,
            &mut self.descriptors,
            &mut self.stashes.layouts,
        )?;
        self.command_lists.get_mut(cmd)?.bind_descriptor_set(set, descriptor)
    }

    fn bind_texture_as(
        &mut self,
        cmd: CmdListHandle,
        texture: TextureHandle,
        set: u32,
        binding: u32,
        kind: ShaderObjectType,
    ) -> Result<()> {
        let (operation, access) = match kind {
            ShaderObjectType::StorageImage => ("bind_image", ImageAccess::StorageReadWrite),
            _ => ("bind_texture", ImageAccess::ShaderRead),
        };
        let (set_layout, object) = self.shader_object(cmd, operation, binding, kind)?;
        let resource = self.textures.get_mut(texture)?;
        // The set is shared per layout, so nothing is written unless the bind can finish
        self.command_lists
            .get(cmd)?
            .check_texture_bind(resource, access, set)?;
        let descriptor = resource.descriptor_set(
            &set_layout,
            &object,
            &mut self.descriptors,
            &mut self.stashes.layouts,
        )?;
        self.command_lists
            .get_mut(cmd)?
            .bind_texture(resource, access, set, descriptor)
    }

    fn clear_values(&self, info: &RenderPassInfo) -> Vec<vk::ClearValue> {
        info.attachments
            .iter()
            .map(|attachment| match attachment.kind {
                AttachmentType::Color => vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.clear_color,
                    },
                },
                AttachmentType::Depth | AttachmentType::DepthStencil => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
            })
            .collect()
    }

    /// Destroys cached target framebuffers that reference `view`
    fn forget_view(&mut self, view: vk::ImageView) {
        let device = &self.device;
        self.target_framebuffers.retain(|(_, views), framebuffer| {
            let keep = !views.contains(&view);
            if !keep {
                device.destroy_framebuffer(*framebuffer);
            }
            keep
        });
    }

    pub fn live_command_lists(&self) -> usize {
        self.command_lists.len()
    }

    pub fn retired_command_lists(&self) -> usize {
        self.retired.len()
    }
}

impl<D: RawDevice + 'static> RenderBackend for VkRenderBackend<D> {
    fn cleanup(&mut self) -> Result<()> {
        // Only lists still executing are retired; dropping one releases it
        self.retired.retain(|(_, list)| match list.is_completed() {
            Ok(done) => !done,
            Err(e) => {
                log::error!("Failed to query retired command list: {:?}", e);
                true
            }
        });

        for list in self.command_lists.values_mut() {
            list.collect_staging()?;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.swapchain.resize(Extent::new(width, height));
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle().context("Failed waiting for device idle")
    }

    fn swapchain_extent(&self) -> Extent {
        let extent = self.swapchain.extent();
        Extent::new(extent.width, extent.height)
    }

    fn swapchain_render_pass(&self, want_depth: bool) -> RenderPassInfo {
        self.swapchain.render_pass_info(want_depth)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Command lists
    // ─────────────────────────────────────────────────────────────────────────

    fn create_command_list(&mut self, usage: QueueUsage, presentable: bool) -> Result<CmdListHandle> {
        let family = *self.device.queues().by_usage(usage, presentable)?;
        let pool = match self.command_pools.entry(family.index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(CommandPool::new(self.device.clone(), family)?),
        };
        let list = CommandBuffer::new(self.device.clone(), pool, usage, presentable)?;
        let handle = self.command_lists.insert(list);
        log::debug!("Created command list {:?} ({:?}, family {})", handle, usage, family.index);
        Ok(handle)
    }

    fn destroy_command_list(&mut self, cmd: CmdListHandle) -> Result<()> {
        let mut list = self.command_lists.remove(cmd)?;
        let in_flight = list.state() == RecordingState::Submitted && !list.is_completed()?;
        if in_flight {
            log::debug!("Deferring destruction of in-flight command list {:?}", cmd);
            self.retired.push((cmd, list));
        } else {
            list.release();
        }
        Ok(())
    }

    fn start_recording(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.command_lists.get_mut(cmd)?.start_recording()
    }

    fn end_recording(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.command_lists.get_mut(cmd)?.end_recording()
    }

    fn submit(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.command_lists.get_mut(cmd)?.submit()
    }

    fn reset(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.command_lists.get_mut(cmd)?.reset()
    }

    fn wait_on(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.command_lists.get(cmd)?.wait_for_completion()
    }

    fn is_completed(&self, cmd: CmdListHandle) -> Result<bool> {
        self.command_lists.get(cmd)?.is_completed()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline state
    // ─────────────────────────────────────────────────────────────────────────

    fn set_viewport(&mut self, cmd: CmdListHandle, viewport: &Viewport) -> Result<()> {
        self.command_lists.get_mut(cmd)?.set_viewport(viewport)
    }

    fn set_scissor(&mut self, cmd: CmdListHandle, scissor: &Rectangle) -> Result<()> {
        self.command_lists.get_mut(cmd)?.set_scissor(scissor)
    }

    fn bind_pipeline(&mut self, cmd: CmdListHandle, info: &PipelineInfo) -> Result<()> {
        self.command_lists
            .get_mut(cmd)?
            .bind_pipeline(info, &mut self.stashes)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binding
    // ─────────────────────────────────────────────────────────────────────────

    fn bind_vertex_buffer(&mut self, cmd: CmdListHandle, buffer: VertexBufferHandle) -> Result<()> {
        let buffer = self.vertex_buffers.get(buffer)?;
        self.command_lists.get_mut(cmd)?.bind_vertex_buffer(buffer)
    }

    fn bind_index_buffer(&mut self, cmd: CmdListHandle, buffer: IndexBufferHandle, index_type: IndexType) -> Result<()> {
        let indices = self.index_buffers.get(buffer)?;
        ensure(
            indices.index_type == index_type,
            BackendError::SizeMismatch {
                expected: indices.index_type.size(),
                actual: index_type.size(),
            },
        )?;
        self.command_lists
            .get_mut(cmd)?
            .bind_index_buffer(&indices.buffer, index_type)
    }

    fn bind_texture(&mut self, cmd: CmdListHandle, texture: TextureHandle, set: u32, binding: u32) -> Result<()> {
        self.bind_texture_as(cmd, texture, set, binding, ShaderObjectType::CombinedImageSampler)
    }

    fn bind_image(&mut self, cmd: CmdListHandle, texture: TextureHandle, set: u32, binding: u32) -> Result<()> {
        self.bind_texture_as(cmd, texture, set, binding, ShaderObjectType::StorageImage)
    }

    fn bind_buffer(&mut self, cmd: CmdListHandle, buffer: BufferHandle, set: u32, binding: u32) -> Result<()> {
        self.bind_buffer_as(cmd, buffer, set, binding, ShaderObjectType::StorageBuffer)
    }

    fn bind_uniform_buffer(&mut self, cmd: CmdListHandle, buffer: BufferHandle, set: u32, binding: u32) -> Result<()> {
        self.bind_buffer_as(cmd, buffer, set, binding, ShaderObjectType::Uniform)
    }

    fn update_constant_buffer(&mut self, cmd: CmdListHandle, stages: ShaderStage, offset: u32, data: &[u8]) -> Result<()> {
        self.command_lists
            .get_mut(cmd)?
            .push_constants(stages, offset, data)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resources
    // ─────────────────────────────────────────────────────────────────────────

    fn create_texture(&mut self, description: &TextureDescription, sampler: &SamplerInfo) -> Result<TextureHandle> {
        let sampler = self.stashes.samplers.find_or_create(sampler)?;
        let texture = Texture::acquire(self.device.clone(), "texture", description, sampler)?;
        Ok(self.textures.insert(texture))
    }

    fn create_texture_with_texels(
        &mut self,
        cmd: CmdListHandle,
        description: &TextureDescription,
        sampler: &SamplerInfo,
        texels: &[u8],
    ) -> Result<TextureHandle> {
        ensure(
            texels.len() as u64 == description.size(),
            BackendError::SizeMismatch {
                expected: description.size(),
                actual: texels.len() as u64,
            },
        )?;
        let sampler = self.stashes.samplers.find_or_create(sampler)?;
        let device = self.device.clone();
        let list = self.recording(cmd, "create_texture_with_texels")?;

        let mut texture = Texture::acquire(device.clone(), "texture", description, sampler)?;
        let staging = Buffer::staging(device, texels)?;
        list.upload_to_texture(&staging, &mut texture)?;
        list.attach_staging(staging);
        // Leave it ready for sampling so binds inside render passes need no barrier
        list.transition(&mut texture, ImageAccess::ShaderRead)?;
        Ok(self.textures.insert(texture))
    }

    fn create_vertex_buffer(&mut self, cmd: CmdListHandle, vertices: &[u8]) -> Result<VertexBufferHandle> {
        let buffer = self.staged_buffer(cmd, "vertex buffer", vertices, BufferUsage::VERTEX)?;
        Ok(self.vertex_buffers.insert(buffer))
    }

    fn create_index_buffer(&mut self, cmd: CmdListHandle, indices: &[u8], index_type: IndexType) -> Result<IndexBufferHandle> {
        ensure(
            indices.len() as u64 % index_type.size() == 0,
            BackendError::SizeMismatch {
                expected: indices.len() as u64 / index_type.size() * index_type.size(),
                actual: indices.len() as u64,
            },
        )?;
        let buffer = self.staged_buffer(cmd, "index buffer", indices, BufferUsage::INDEX)?;
        Ok(self.index_buffers.insert(IndexBuffer { buffer, index_type }))
    }

    fn create_uniform_buffer(&mut self, size: u64) -> Result<BufferHandle> {
        self.create_buffer(
            size,
            BufferUsage::UNIFORM,
            MemoryType::HOST_VISIBLE | MemoryType::HOST_COHERENT,
        )
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage, memory: MemoryType) -> Result<BufferHandle> {
        let buffer = Buffer::acquire(self.device.clone(), "buffer", size, usage, memory)?;
        Ok(self.buffers.insert(buffer))
    }

    fn copy_to_buffer(&mut self, buffer: BufferHandle, data: &[u8], offset: u64) -> Result<()> {
        self.buffers.get_mut(buffer)?.copy_to_buffer(data, offset)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<()> {
        let mut texture = self.textures.remove(texture)?;
        self.forget_view(texture.view());
        texture.release(Some(&mut self.descriptors))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.buffers.remove(buffer)?.release(Some(&mut self.descriptors))
    }

    fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle) -> Result<()> {
        self.vertex_buffers.remove(buffer)?.release(None)
    }

    fn destroy_index_buffer(&mut self, buffer: IndexBufferHandle) -> Result<()> {
        self.index_buffers.remove(buffer)?.buffer.release(None)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frame
    // ─────────────────────────────────────────────────────────────────────────

    fn prepare_frame(&mut self) -> Result<()> {
        // The slot's semaphores are reused only after its last consumer finished
        if let Some(consumer) = self.swapchain.slot_consumer() {
            let list = match self.command_lists.get(consumer) {
                Ok(list) => Some(list),
                Err(_) => self
                    .retired
                    .iter()
                    .find(|(handle, _)| *handle == consumer)
                    .map(|(_, list)| list),
            };
            if let Some(list) = list.filter(|list| list.state() == RecordingState::Submitted) {
                list.wait_for_completion()?;
            }
        }

        if self.swapchain.needs_rebuild() {
            self.device.wait_idle()?;
            self.swapchain.rebuild()?;
        }

        self.cleanup()
    }

    fn begin_render_pass_swapchain(&mut self, cmd: CmdListHandle, want_depth: bool) -> Result<()> {
        // Surface errors about the list before touching the swapchain
        let list = self.recording(cmd, "begin_render_pass_swapchain")?;
        ensure(
            list.usage().contains(QueueUsage::GRAPHICS),
            BackendError::UnsupportedUsage(QueueUsage::GRAPHICS),
        )?;

        let info = self.swapchain.render_pass_info(want_depth);
        let render_pass = self.stashes.render_passes.find_or_create(&info)?;
        self.swapchain.acquire_image(cmd)?;
        self.swapchain.init_framebuffers(&info, render_pass)?;
        let framebuffer = self.swapchain.current_framebuffer()?;
        let sync = self.swapchain.frame_sync();

        let begin = RenderPassBegin {
            render_pass,
            framebuffer,
            extent: self.swapchain.extent(),
            clear_values: self.clear_values(&info),
        };
        let list = self.command_lists.get_mut(cmd)?;
        list.wait_on_semaphore(sync.image_available);
        list.signal_semaphore(sync.render_finished);
        list.begin_render_pass(&begin)
    }

    fn begin_render_pass_targets(
        &mut self,
        cmd: CmdListHandle,
        info: &RenderPassInfo,
        targets: &[TextureHandle],
    ) -> Result<()> {
        ensure(
            info.attachments.len() == targets.len(),
            BackendError::SizeMismatch {
                expected: info.attachments.len() as u64,
                actual: targets.len() as u64,
            },
        )?;
        self.recording(cmd, "begin_render_pass_targets")?;
        let render_pass = self.stashes.render_passes.find_or_create(info)?;

        let list = self.command_lists.get_mut(cmd)?;
        let mut views = Vec::with_capacity(targets.len());
        let mut extent = vk::Extent2D::default();
        for (attachment, &handle) in info.attachments.iter().zip(targets) {
            let texture = self.textures.get_mut(handle)?;
            // Loaded contents must already sit in the attachment layout
            if attachment.load_op == LoadOp::Load {
                let access = match attachment.kind {
                    AttachmentType::Color => ImageAccess::ColorAttachment,
                    AttachmentType::Depth | AttachmentType::DepthStencil => ImageAccess::DepthAttachment,
                };
                list.transition(texture, access)?;
            }
            views.push(texture.view());
            extent = vk::Extent2D {
                width: texture.description().width,
                height: texture.description().height,
            };
        }

        let key = (render_pass, views);
        let framebuffer = match self.target_framebuffers.get(&key).copied() {
            Some(framebuffer) => framebuffer,
            None => {
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&key.1)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                let framebuffer = self
                    .device
                    .create_framebuffer(&framebuffer_info)
                    .context("Failed to create render target framebuffer")?;
                self.target_framebuffers.insert(key, framebuffer);
                framebuffer
            }
        };

        let begin = RenderPassBegin {
            render_pass,
            framebuffer,
            extent,
            clear_values: self.clear_values(info),
        };
        self.command_lists.get_mut(cmd)?.begin_render_pass(&begin)?;

        // The pass leaves every attachment in its declared final layout
        for (attachment, &handle) in info.attachments.iter().zip(targets) {
            self.textures.get_mut(handle)?.set_layout(attachment.layout);
        }
        Ok(())
    }

    fn end_render_pass(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.command_lists.get_mut(cmd)?.end_render_pass()
    }

    fn draw_vertices(&mut self, cmd: CmdListHandle, vertex_count: u32) -> Result<()> {
        self.command_lists.get_mut(cmd)?.draw(vertex_count)
    }

    fn draw_vertices_indexed(&mut self, cmd: CmdListHandle, index_count: u32) -> Result<()> {
        self.command_lists.get_mut(cmd)?.draw_indexed(index_count)
    }

    fn dispatch(&mut self, cmd: CmdListHandle, x: u32, y: u32, z: u32) -> Result<()> {
        self.command_lists.get_mut(cmd)?.dispatch(x, y, z)
    }

    fn present_frame(&mut self) -> Result<()> {
        self.swapchain.present()
    }
}

impl<D: RawDevice> Drop for VkRenderBackend<D> {
    fn drop(&mut self) {
        log::info!("Shutting down render backend");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during backend teardown: {:?}", e);
        }

        self.command_lists.drain().for_each(drop);
        self.retired.clear();
        for mut texture in self.textures.drain() {
            if let Err(e) = texture.release(Some(&mut self.descriptors)) {
                log::error!("Failed to release texture: {:?}", e);
            }
        }
        for mut buffer in self.buffers.drain() {
            if let Err(e) = buffer.release(Some(&mut self.descriptors)) {
                log::error!("Failed to release buffer: {:?}", e);
            }
        }
        self.vertex_buffers.drain().for_each(drop);
        self.index_buffers.drain().for_each(drop);
        for (_, framebuffer) in self.target_framebuffers.drain() {
            self.device.destroy_framebuffer(framebuffer);
        }
        // Swapchain, descriptor pool, stashes and command pools drop in field order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{self, Call, MockDevice};
    use crate::types::{
        Attachment, ComputePipelineInfo, GraphicsPipelineInfo, ImageLayout, ImageUsage, PipelineLayoutInfo,
        PixelFormat, StoreOp,
    };

    struct Fixture {
        _shaders: tempfile::TempDir,
        device: Arc<MockDevice>,
        backend: VkRenderBackend<MockDevice>,
    }

    fn fixture() -> Fixture {
        let shaders = mock::shader_dir();
        let device = Arc::new(MockDevice::new());
        let backend = VkRenderBackend::new(device.clone(), mock::backend_settings(shaders.path())).unwrap();
        Fixture {
            _shaders: shaders,
            device,
            backend,
        }
    }

    fn single_object_layout(kind: ShaderObjectType, stages: ShaderStage) -> PipelineLayoutInfo {
        PipelineLayoutInfo {
            push_constant_ranges: Vec::new(),
            set_layout: DescriptorSetLayoutInfo {
                shader_objects: vec![ShaderObjectInfo { kind, stages, binding: 0 }],
            },
        }
    }

    /// Samples one texture at binding 0 of the fragment stage
    fn sampling_pipeline() -> PipelineInfo {
        PipelineInfo::Graphics(GraphicsPipelineInfo {
            shaders: vec!["test_vert.spv".to_string(), "test_frag.spv".to_string()],
            render_pass: mock::swapchain_render_pass(),
            layout: single_object_layout(ShaderObjectType::CombinedImageSampler, ShaderStage::FRAGMENT),
            primitive: Default::default(),
            polygon_mode: Default::default(),
            extent: Extent::new(800, 600),
        })
    }

    fn storage_pipeline() -> PipelineInfo {
        PipelineInfo::Compute(ComputePipelineInfo {
            shader: "test_comp.spv".to_string(),
            layout: single_object_layout(ShaderObjectType::StorageImage, ShaderStage::COMPUTE),
        })
    }

    impl Fixture {
        fn graphics_list(&mut self) -> CmdListHandle {
            let cmd = self
                .backend
                .create_command_list(QueueUsage::GRAPHICS, true)
                .unwrap();
            self.backend.start_recording(cmd).unwrap();
            self.backend.bind_pipeline(cmd, &mock::graphics_pipeline()).unwrap();
            cmd
        }
    }

    #[test]
    fn uniform_buffer_scenario() {
        let mut f = fixture();
        let uniforms = f.backend.create_uniform_buffer(256).unwrap();
        let data: Vec<u8> = (0..=255).collect();
        f.backend.copy_to_buffer(uniforms, &data, 0).unwrap();

        let cmd = f.graphics_list();
        f.backend.bind_uniform_buffer(cmd, uniforms, 0, 0).unwrap();

        assert_eq!(f.device.count(Call::AllocateDescriptorSet), 1);
        assert_eq!(f.device.count(Call::WriteDescriptorSet), 1);
        assert_eq!(f.device.count(Call::CmdBindDescriptorSet), 1);

        // Binding again in a later recording reuses the set without rewriting it
        f.backend.end_recording(cmd).unwrap();
        f.backend.start_recording(cmd).unwrap();
        f.backend.bind_pipeline(cmd, &mock::graphics_pipeline()).unwrap();
        f.backend.bind_uniform_buffer(cmd, uniforms, 0, 0).unwrap();
        assert_eq!(f.device.count(Call::AllocateDescriptorSet), 1);
        assert_eq!(f.device.count(Call::WriteDescriptorSet), 1);
        assert_eq!(f.device.count(Call::CmdBindDescriptorSet), 2);
    }

    #[test]
    fn binding_checks_the_declared_layout() {
        let mut f = fixture();
        let uniforms = f.backend.create_uniform_buffer(64).unwrap();
        let cmd = f.graphics_list();

        let err = f.backend.bind_uniform_buffer(cmd, uniforms, 0, 3).unwrap_err();
        assert_eq!(err.downcast_ref::<BackendError>(), Some(&BackendError::UnknownBinding(3)));

        let err = f.backend.bind_buffer(cmd, uniforms, 0, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::BindingTypeMismatch { binding: 0, .. })
        ));

        let err = f.backend.bind_uniform_buffer(cmd, uniforms, 1, 0).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BackendError>(),
            Some(&BackendError::SetOutOfRange { set: 1, count: 1 })
        );
        // Rejected binds never touch the shared set
        assert_eq!(f.device.count(Call::WriteDescriptorSet), 0);
        assert_eq!(f.device.count(Call::CmdBindDescriptorSet), 0);
    }

    #[test]
    fn sampled_textures_transition_and_write_once() {
        let mut f = fixture();
        let desc = TextureDescription::sampled(4, 4, PixelFormat::Rgba8Unorm);
        let texture = f.backend.create_texture(&desc, &SamplerInfo::default()).unwrap();
        let cmd = f.backend.create_command_list(QueueUsage::GRAPHICS, false).unwrap();
        f.backend.start_recording(cmd).unwrap();
        f.backend.bind_pipeline(cmd, &sampling_pipeline()).unwrap();

        f.backend.bind_texture(cmd, texture, 0, 0).unwrap();
        assert_eq!(f.device.count(Call::CmdImageBarrier), 1);
        assert_eq!(
            f.device.last_barrier(),
            Some((vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
        );
        assert_eq!(f.device.count(Call::WriteDescriptorSet), 1);
        assert_eq!(f.backend.textures.get(texture).unwrap().layout(), ImageLayout::ShaderRead);

        // Already readable and already written
        f.backend.bind_texture(cmd, texture, 0, 0).unwrap();
        assert_eq!(f.device.count(Call::CmdImageBarrier), 1);
        assert_eq!(f.device.count(Call::WriteDescriptorSet), 1);
        assert_eq!(f.device.count(Call::CmdBindDescriptorSet), 2);
    }

    #[test]
    fn storage_images_move_to_general() {
        let mut f = fixture();
        let mut desc = TextureDescription::sampled(8, 8, PixelFormat::Rgba8Unorm);
        desc.usage = ImageUsage::STORAGE | ImageUsage::SAMPLED;
        let image = f.backend.create_texture(&desc, &SamplerInfo::default()).unwrap();
        let cmd = f.backend.create_command_list(QueueUsage::COMPUTE, false).unwrap();
        f.backend.start_recording(cmd).unwrap();
        f.backend.bind_pipeline(cmd, &storage_pipeline()).unwrap();

        let err = f.backend.bind_texture(cmd, image, 0, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::BindingTypeMismatch { binding: 0, .. })
        ));

        f.backend.bind_image(cmd, image, 0, 0).unwrap();
        assert_eq!(
            f.device.last_barrier(),
            Some((vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL))
        );
        assert_eq!(f.backend.textures.get(image).unwrap().layout(), ImageLayout::General);
        f.backend.dispatch(cmd, 1, 1, 1).unwrap();
        assert_eq!(f.device.count(Call::CmdDispatch), 1);
    }

    #[test]
    fn texture_binds_needing_a_barrier_inside_a_pass_change_nothing() {
        let mut f = fixture();
        let cmd = f.backend.create_command_list(QueueUsage::GRAPHICS, true).unwrap();
        f.backend.prepare_frame().unwrap();
        f.backend.start_recording(cmd).unwrap();

        let desc = TextureDescription::sampled(2, 2, PixelFormat::Rgba8Srgb);
        let uploaded = f
            .backend
            .create_texture_with_texels(cmd, &desc, &SamplerInfo::default(), &[255; 16])
            .unwrap();
        let placeholder = f.backend.create_texture(&desc, &SamplerInfo::default()).unwrap();

        f.backend.begin_render_pass_swapchain(cmd, true).unwrap();
        f.backend.bind_pipeline(cmd, &sampling_pipeline()).unwrap();
        f.backend.bind_texture(cmd, uploaded, 0, 0).unwrap();
        let barriers = f.device.count(Call::CmdImageBarrier);
        let writes = f.device.count(Call::WriteDescriptorSet);
        let binds = f.device.count(Call::CmdBindDescriptorSet);

        let err = f.backend.bind_texture(cmd, placeholder, 0, 0).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BackendError>(),
            Some(&BackendError::InsideRenderPass {
                operation: "image layout transition"
            })
        );
        assert_eq!(f.device.count(Call::CmdImageBarrier), barriers);
        assert_eq!(f.device.count(Call::WriteDescriptorSet), writes);
        assert_eq!(f.device.count(Call::CmdBindDescriptorSet), binds);
        assert_eq!(f.backend.textures.get(placeholder).unwrap().layout(), ImageLayout::Undefined);

        // Outside the pass the same bind goes through
        f.backend.end_render_pass(cmd).unwrap();
        f.backend.bind_texture(cmd, placeholder, 0, 0).unwrap();
        assert_eq!(f.device.count(Call::CmdImageBarrier), barriers + 1);
        assert_eq!(f.device.count(Call::WriteDescriptorSet), writes + 1);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut f = fixture();
        let buffer = f.backend.create_uniform_buffer(16).unwrap();
        f.backend.destroy_buffer(buffer).unwrap();
        let err = f.backend.copy_to_buffer(buffer, &[0; 4], 0).unwrap_err();
        assert_eq!(err.downcast_ref::<BackendError>(), Some(&BackendError::UnknownHandle("buffer")));
        assert!(f.backend.destroy_buffer(buffer).is_err());
    }

    #[test]
    fn destroying_a_bound_buffer_frees_its_set_once() {
        let mut f = fixture();
        let a = f.backend.create_uniform_buffer(64).unwrap();
        let b = f.backend.create_uniform_buffer(64).unwrap();
        let cmd = f.graphics_list();
        f.backend.bind_uniform_buffer(cmd, a, 0, 0).unwrap();
        f.backend.bind_uniform_buffer(cmd, b, 0, 0).unwrap();
        // Same layout, same set
        assert_eq!(f.device.count(Call::AllocateDescriptorSet), 1);
        assert_eq!(f.device.count(Call::WriteDescriptorSet), 2);

        f.backend.destroy_buffer(a).unwrap();
        f.backend.destroy_buffer(b).unwrap();
        assert_eq!(f.device.count(Call::FreeDescriptorSet), 1);
    }

    #[test]
    fn frame_loop_pairs_semaphores_with_the_ring() {
        let mut f = fixture();
        let cmd = f.backend.create_command_list(QueueUsage::GRAPHICS, true).unwrap();

        for _ in 0..3 {
            f.backend.prepare_frame().unwrap();
            f.backend.start_recording(cmd).unwrap();
            f.backend.begin_render_pass_swapchain(cmd, true).unwrap();
            f.backend.bind_pipeline(cmd, &mock::graphics_pipeline()).unwrap();
            f.backend.draw_vertices(cmd, 3).unwrap();
            f.backend.end_render_pass(cmd).unwrap();
            f.backend.end_recording(cmd).unwrap();
            f.backend.submit(cmd).unwrap();
            f.backend.present_frame().unwrap();
        }

        let submits = f.device.submits();
        assert_eq!(submits.len(), 3);
        assert!(submits.iter().all(|s| s.waits == 1 && s.signals == 1));
        assert_eq!(f.device.count(Call::QueuePresent), 3);
        // The swapchain pass and the pipeline's pass are the same cached object
        assert_eq!(f.device.count(Call::CreateRenderPass), 1);
    }

    #[test]
    fn prepare_frame_waits_for_the_slot_consumer() {
        let mut f = fixture();
        f.device.set_auto_complete(false);
        let cmd = f.backend.create_command_list(QueueUsage::GRAPHICS, true).unwrap();

        f.backend.prepare_frame().unwrap();
        f.backend.start_recording(cmd).unwrap();
        f.backend.begin_render_pass_swapchain(cmd, false).unwrap();
        f.backend.end_render_pass(cmd).unwrap();
        f.backend.end_recording(cmd).unwrap();
        f.backend.submit(cmd).unwrap();
        f.backend.present_frame().unwrap();
        assert!(!f.backend.is_completed(cmd).unwrap());

        // Slot 1 was never used
        f.backend.prepare_frame().unwrap();
        assert_eq!(f.device.count(Call::WaitForFence), 0);

        let other = f.backend.create_command_list(QueueUsage::GRAPHICS, true).unwrap();
        f.backend.start_recording(other).unwrap();
        f.backend.begin_render_pass_swapchain(other, false).unwrap();
        f.backend.end_render_pass(other).unwrap();
        f.backend.end_recording(other).unwrap();
        f.backend.submit(other).unwrap();
        f.backend.present_frame().unwrap();

        // Back on slot 0, whose consumer is still executing
        f.backend.prepare_frame().unwrap();
        assert_eq!(f.device.count(Call::WaitForFence), 1);
        assert!(f.backend.is_completed(cmd).unwrap());
    }

    #[test]
    fn retired_slot_consumers_are_still_waited_on() {
        let mut f = fixture();
        f.device.set_auto_complete(false);
        let record_frame = |f: &mut Fixture, cmd: CmdListHandle| {
            f.backend.prepare_frame().unwrap();
            f.backend.start_recording(cmd).unwrap();
            f.backend.begin_render_pass_swapchain(cmd, false).unwrap();
            f.backend.end_render_pass(cmd).unwrap();
            f.backend.end_recording(cmd).unwrap();
            f.backend.submit(cmd).unwrap();
            f.backend.present_frame().unwrap();
        };

        let first = f.backend.create_command_list(QueueUsage::GRAPHICS, true).unwrap();
        record_frame(&mut f, first);
        f.backend.destroy_command_list(first).unwrap();
        assert_eq!(f.backend.retired_command_lists(), 1);

        let second = f.backend.create_command_list(QueueUsage::GRAPHICS, true).unwrap();
        record_frame(&mut f, second);
        assert_eq!(f.device.count(Call::WaitForFence), 0);

        // Slot 0 again: its consumer was destroyed but is still executing
        f.backend.prepare_frame().unwrap();
        assert_eq!(f.device.count(Call::WaitForFence), 1);
        assert_eq!(f.backend.retired_command_lists(), 0);
        assert_eq!(f.device.count(Call::FreeCommandBuffer), 1);
    }

    #[test]
    fn empty_vertex_payloads_are_rejected() {
        let mut f = fixture();
        let cmd = f.backend.create_command_list(QueueUsage::TRANSFER, false).unwrap();
        f.backend.start_recording(cmd).unwrap();
        let err = f.backend.create_vertex_buffer(cmd, &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::EmptyBuffer(_))
        ));
        assert!(f.backend.create_index_buffer(cmd, &[], IndexType::U32).is_err());
        assert_eq!(f.device.count(Call::CreateBuffer), 0);
    }

    #[test]
    fn destroying_an_in_flight_list_is_deferred() {
        let mut f = fixture();
        f.device.set_auto_complete(false);
        let cmd = f.backend.create_command_list(QueueUsage::GRAPHICS, false).unwrap();
        f.backend.start_recording(cmd).unwrap();
        f.backend.end_recording(cmd).unwrap();
        f.backend.submit(cmd).unwrap();

        f.backend.destroy_command_list(cmd).unwrap();
        assert_eq!(f.backend.retired_command_lists(), 1);
        assert_eq!(f.device.count(Call::FreeCommandBuffer), 0);
        assert!(f.backend.start_recording(cmd).is_err());

        f.backend.cleanup().unwrap();
        assert_eq!(f.backend.retired_command_lists(), 1);

        f.device.complete_all();
        f.backend.cleanup().unwrap();
        assert_eq!(f.backend.retired_command_lists(), 0);
        assert_eq!(f.device.count(Call::FreeCommandBuffer), 1);
    }

    #[test]
    fn vertex_and_index_uploads_are_staged() {
        let mut f = fixture();
        let cmd = f.backend.create_command_list(QueueUsage::TRANSFER, false).unwrap();
        f.backend.start_recording(cmd).unwrap();
        let vertices = f.backend.create_vertex_buffer(cmd, &[0u8; 52 * 3]).unwrap();
        let indices = f
            .backend
            .create_index_buffer(cmd, &[0u8; 6], IndexType::U16)
            .unwrap();
        f.backend.end_recording(cmd).unwrap();
        f.backend.submit(cmd).unwrap();
        assert_eq!(f.device.count(Call::CmdCopyBuffer), 2);

        // Staging buffers die once the upload has completed
        f.backend.cleanup().unwrap();
        assert_eq!(f.device.count(Call::DestroyBuffer), 2);

        let draw = f.graphics_list();
        f.backend.bind_vertex_buffer(draw, vertices).unwrap();
        f.backend.bind_index_buffer(draw, indices, IndexType::U16).unwrap();
        assert!(f.backend.bind_index_buffer(draw, indices, IndexType::U32).is_err());
    }

    #[test]
    fn odd_index_payloads_are_rejected() {
        let mut f = fixture();
        let cmd = f.backend.create_command_list(QueueUsage::TRANSFER, false).unwrap();
        f.backend.start_recording(cmd).unwrap();
        assert!(f.backend.create_index_buffer(cmd, &[0u8; 6], IndexType::U32).is_err());
        assert_eq!(f.device.count(Call::CreateBuffer), 0);
    }

    #[test]
    fn texel_uploads_end_shader_readable() {
        let mut f = fixture();
        let cmd = f.backend.create_command_list(QueueUsage::GRAPHICS, true).unwrap();
        f.backend.start_recording(cmd).unwrap();
        let desc = TextureDescription::sampled(2, 2, PixelFormat::Rgba8Srgb);
        let texture = f
            .backend
            .create_texture_with_texels(cmd, &desc, &SamplerInfo::default(), &[255; 16])
            .unwrap();
        assert_eq!(f.device.count(Call::CmdImageBarrier), 2);
        assert_eq!(
            f.device.last_barrier(),
            Some((vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
        );
        assert_eq!(f.backend.textures.get(texture).unwrap().layout(), ImageLayout::ShaderRead);

        let err = f
            .backend
            .create_texture_with_texels(cmd, &desc, &SamplerInfo::default(), &[255; 15])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::SizeMismatch { .. })
        ));
        assert_eq!(f.device.count(Call::CreateSampler), 1);
    }

    #[test]
    fn render_targets_advance_to_their_final_layout() {
        let mut f = fixture();
        let mut desc = TextureDescription::sampled(64, 64, PixelFormat::Rgba8Unorm);
        desc.usage = ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED;
        let target = f.backend.create_texture(&desc, &SamplerInfo::default()).unwrap();

        let pass = RenderPassInfo {
            attachments: vec![Attachment {
                format: PixelFormat::Rgba8Unorm,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                kind: AttachmentType::Color,
                layout: ImageLayout::ShaderRead,
            }],
        };
        let cmd = f.backend.create_command_list(QueueUsage::GRAPHICS, false).unwrap();
        for _ in 0..2 {
            f.backend.start_recording(cmd).unwrap();
            f.backend.begin_render_pass_targets(cmd, &pass, &[target]).unwrap();
            f.backend.end_render_pass(cmd).unwrap();
            f.backend.end_recording(cmd).unwrap();
            f.backend.submit(cmd).unwrap();
        }
        assert_eq!(f.backend.textures.get(target).unwrap().layout(), ImageLayout::ShaderRead);
        assert_eq!(f.device.count(Call::CmdImageBarrier), 0);
        // Cached across both recordings
        assert_eq!(f.device.count(Call::CreateFramebuffer), 1);

        f.backend.destroy_texture(target).unwrap();
        assert_eq!(f.device.count(Call::DestroyFramebuffer), 1);
    }

    #[test]
    fn compute_lists_dispatch_outside_render_passes() {
        let mut f = fixture();
        let cmd = f
            .backend
            .create_command_list(QueueUsage::COMPUTE, false)
            .unwrap();
        f.backend.start_recording(cmd).unwrap();
        f.backend.bind_pipeline(cmd, &mock::compute_pipeline()).unwrap();
        f.backend.dispatch(cmd, 4, 4, 1).unwrap();
        let err = f.backend.begin_render_pass_swapchain(cmd, false).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BackendError>(),
            Some(&BackendError::UnsupportedUsage(QueueUsage::GRAPHICS))
        );
        assert_eq!(f.device.count(Call::AcquireNextImage), 0);
        assert_eq!(f.device.count(Call::CmdDispatch), 1);
    }

    #[test]
    fn resize_rebuilds_on_the_next_frame() {
        let mut f = fixture();
        f.backend.resize(1024, 768).unwrap();
        assert_eq!(f.device.count(Call::CreateSwapchain), 1);
        f.backend.prepare_frame().unwrap();
        assert_eq!(f.device.count(Call::CreateSwapchain), 2);
        assert_eq!(f.backend.swapchain_extent(), Extent::new(1024, 768));
    }
}
