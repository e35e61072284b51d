// Recording stand-in for the Vulkan device
//
// Hands out unique fake handles, remembers every call in order, and can be
// told to fail the next call of a kind. Fences complete on submit unless
// auto-completion is switched off, in which case they complete when waited on.

use super::descriptor::PoolCapacity;
use super::queue::{QueueFamily, QueueSet};
use super::raw::{RawDevice, SwapchainImages};
use super::vk_backend::BackendSettings;
use crate::types::{
    Attachment, AttachmentType, ColorSpace, ComputePipelineInfo, DescriptorSetLayoutInfo, Extent,
    GraphicsPipelineInfo, ImageLayout, LoadOp, PipelineInfo, PipelineLayoutInfo, PixelFormat, PresentMode,
    QueueUsage, RenderPassInfo, ShaderObjectInfo, ShaderObjectType, ShaderStage, StoreOp, SwapchainInfo,
};
use anyhow::{bail, Result};
use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

pub const SWAPCHAIN_IMAGES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    CreateRenderPass,
    DestroyRenderPass,
    CreateDescriptorSetLayout,
    DestroyDescriptorSetLayout,
    CreatePipelineLayout,
    DestroyPipelineLayout,
    CreateGraphicsPipeline,
    CreateComputePipeline,
    DestroyPipeline,
    CreateShaderModule,
    DestroyShaderModule,
    CreateSampler,
    DestroySampler,
    CreateDescriptorPool,
    DestroyDescriptorPool,
    AllocateDescriptorSet,
    FreeDescriptorSet,
    WriteDescriptorSet,
    CreateCommandPool,
    DestroyCommandPool,
    AllocateCommandBuffer,
    FreeCommandBuffer,
    BeginCommandBuffer,
    EndCommandBuffer,
    ResetCommandBuffer,
    CreateFence,
    DestroyFence,
    WaitForFence,
    ResetFence,
    CreateSemaphore,
    DestroySemaphore,
    CreateBuffer,
    DestroyBuffer,
    WriteAllocation,
    CreateImage,
    DestroyImage,
    CreateImageView,
    DestroyImageView,
    CreateFramebuffer,
    DestroyFramebuffer,
    CmdBindPipeline,
    CmdBindVertexBuffer,
    CmdBindIndexBuffer,
    CmdBindDescriptorSet,
    CmdPushConstants,
    CmdSetViewport,
    CmdSetScissor,
    CmdBeginRenderPass,
    CmdEndRenderPass,
    CmdDraw,
    CmdDrawIndexed,
    CmdDispatch,
    CmdCopyBuffer,
    CmdCopyBufferToImage,
    CmdImageBarrier,
    QueueSubmit,
    CreateSwapchain,
    DestroySwapchain,
    AcquireNextImage,
    QueuePresent,
    WaitIdle,
}

#[derive(Debug)]
pub struct MockAllocation {
    id: u64,
    host_visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitRecord {
    pub waits: usize,
    pub signals: usize,
    pub fence: vk::Fence,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    failures: Vec<Call>,
    next_handle: u64,
    manual_completion: bool,
    fences: HashMap<vk::Fence, bool>,
    memory: HashMap<u64, Vec<u8>>,
    last_set_layout_count: Option<u32>,
    last_framebuffer_attachments: Option<u32>,
    last_barrier: Option<(vk::ImageLayout, vk::ImageLayout)>,
    last_push_constants: Vec<u8>,
    submits: Vec<SubmitRecord>,
    next_image: u32,
}

pub struct MockDevice {
    queues: QueueSet,
    state: Mutex<State>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A universal presentable family plus a dedicated transfer family
    pub fn new() -> Self {
        let queues = QueueSet::new(vec![
            QueueFamily {
                index: 0,
                queue: vk::Queue::from_raw(0x100),
                usage: QueueUsage::GRAPHICS | QueueUsage::COMPUTE | QueueUsage::TRANSFER,
                presentable: true,
            },
            QueueFamily {
                index: 1,
                queue: vk::Queue::from_raw(0x101),
                usage: QueueUsage::TRANSFER,
                presentable: false,
            },
        ]);
        Self {
            queues,
            state: Mutex::new(State {
                next_handle: 1,
                ..State::default()
            }),
        }
    }

    pub fn count(&self, call: Call) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// The call log restricted to `kinds`, in order
    pub fn calls_matching(&self, kinds: &[Call]) -> Vec<Call> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| kinds.contains(c))
            .copied()
            .collect()
    }

    /// Makes the next call of this kind fail
    pub fn fail_next(&self, call: Call) {
        self.state.lock().failures.push(call);
    }

    /// When off, submitted work only completes once a fence is waited on
    pub fn set_auto_complete(&self, enabled: bool) {
        self.state.lock().manual_completion = !enabled;
    }

    /// Marks every pending fence signaled, as if the GPU caught up
    pub fn complete_all(&self) {
        for signaled in self.state.lock().fences.values_mut() {
            *signaled = true;
        }
    }

    pub fn last_set_layout_count(&self) -> Option<u32> {
        self.state.lock().last_set_layout_count
    }

    pub fn last_framebuffer_attachments(&self) -> Option<u32> {
        self.state.lock().last_framebuffer_attachments
    }

    pub fn last_barrier(&self) -> Option<(vk::ImageLayout, vk::ImageLayout)> {
        self.state.lock().last_barrier
    }

    pub fn last_push_constants(&self) -> Vec<u8> {
        self.state.lock().last_push_constants.clone()
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.state.lock().submits.clone()
    }

    /// Contents of a host-visible buffer's memory
    pub fn allocation_bytes(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().memory.get(&buffer.as_raw()).cloned()
    }

    /// Records `call`, failing it if a failure was queued
    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(at) = state.failures.iter().position(|c| *c == call) {
            state.failures.remove(at);
            bail!("injected {:?} failure", call);
        }
        Ok(())
    }

    fn record_vk(&self, call: Call, error: vk::Result) -> VkResult<()> {
        self.record(call).map_err(|_| error)
    }

    fn handle<H: Handle>(&self) -> H {
        let mut state = self.state.lock();
        let raw = state.next_handle;
        state.next_handle += 1;
        H::from_raw(raw)
    }

    fn create<H: Handle>(&self, call: Call) -> Result<H> {
        self.record(call)?;
        Ok(self.handle())
    }

    fn log(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl RawDevice for MockDevice {
    type Allocation = MockAllocation;

    fn queues(&self) -> &QueueSet {
        &self.queues
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass> {
        self.create(Call::CreateRenderPass)
    }

    fn destroy_render_pass(&self, _render_pass: vk::RenderPass) {
        self.log(Call::DestroyRenderPass);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> Result<vk::DescriptorSetLayout> {
        self.create(Call::CreateDescriptorSetLayout)
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.log(Call::DestroyDescriptorSetLayout);
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> Result<vk::PipelineLayout> {
        self.record(Call::CreatePipelineLayout)?;
        self.state.lock().last_set_layout_count = Some(info.set_layout_count);
        Ok(self.handle())
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.log(Call::DestroyPipelineLayout);
    }

    fn create_graphics_pipeline(&self, _info: &vk::GraphicsPipelineCreateInfo) -> Result<vk::Pipeline> {
        self.create(Call::CreateGraphicsPipeline)
    }

    fn create_compute_pipeline(&self, _info: &vk::ComputePipelineCreateInfo) -> Result<vk::Pipeline> {
        self.create(Call::CreateComputePipeline)
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {
        self.log(Call::DestroyPipeline);
    }

    fn create_shader_module(&self, _code: &[u32]) -> Result<vk::ShaderModule> {
        self.create(Call::CreateShaderModule)
    }

    fn destroy_shader_module(&self, _module: vk::ShaderModule) {
        self.log(Call::DestroyShaderModule);
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> Result<vk::Sampler> {
        self.create(Call::CreateSampler)
    }

    fn destroy_sampler(&self, _sampler: vk::Sampler) {
        self.log(Call::DestroySampler);
    }

    fn create_descriptor_pool(&self, _info: &vk::DescriptorPoolCreateInfo) -> Result<vk::DescriptorPool> {
        self.create(Call::CreateDescriptorPool)
    }

    fn destroy_descriptor_pool(&self, _pool: vk::DescriptorPool) {
        self.log(Call::DestroyDescriptorPool);
    }

    fn allocate_descriptor_set(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        self.record_vk(Call::AllocateDescriptorSet, vk::Result::ERROR_OUT_OF_POOL_MEMORY)?;
        Ok(self.handle())
    }

    fn free_descriptor_set(&self, _pool: vk::DescriptorPool, _set: vk::DescriptorSet) -> Result<()> {
        self.record(Call::FreeDescriptorSet)
    }

    fn write_descriptor_set(&self, _write: &vk::WriteDescriptorSet) {
        self.log(Call::WriteDescriptorSet);
    }

    fn create_command_pool(&self, _queue_family: u32) -> Result<vk::CommandPool> {
        self.create(Call::CreateCommandPool)
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.log(Call::DestroyCommandPool);
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        self.create(Call::AllocateCommandBuffer)
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, _cmd: vk::CommandBuffer) {
        self.log(Call::FreeCommandBuffer);
    }

    fn begin_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        self.record(Call::BeginCommandBuffer)
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        self.record(Call::EndCommandBuffer)
    }

    fn reset_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<()> {
        self.record(Call::ResetCommandBuffer)
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let fence: vk::Fence = self.create(Call::CreateFence)?;
        self.state.lock().fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.log(Call::DestroyFence);
        self.state.lock().fences.remove(&fence);
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        match self.state.lock().fences.get(&fence) {
            Some(signaled) => Ok(*signaled),
            None => bail!("unknown fence {:?}", fence),
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> Result<()> {
        self.record(Call::WaitForFence)?;
        match self.state.lock().fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = true;
                Ok(())
            }
            None => bail!("unknown fence {:?}", fence),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        self.record(Call::ResetFence)?;
        if let Some(signaled) = self.state.lock().fences.get_mut(&fence) {
            *signaled = false;
        }
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        self.create(Call::CreateSemaphore)
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.log(Call::DestroySemaphore);
    }

    fn create_buffer(
        &self,
        _name: &str,
        size: u64,
        _usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<(vk::Buffer, MockAllocation)> {
        let buffer: vk::Buffer = self.create(Call::CreateBuffer)?;
        let host_visible = location != MemoryLocation::GpuOnly;
        if host_visible {
            self.state.lock().memory.insert(buffer.as_raw(), vec![0; size as usize]);
        }
        let allocation = MockAllocation {
            id: buffer.as_raw(),
            host_visible,
        };
        Ok((buffer, allocation))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, _allocation: MockAllocation) {
        self.log(Call::DestroyBuffer);
        self.state.lock().memory.remove(&buffer.as_raw());
    }

    fn write_allocation(&self, allocation: &mut MockAllocation, offset: u64, data: &[u8]) -> Result<()> {
        self.record(Call::WriteAllocation)?;
        if !allocation.host_visible {
            bail!("allocation {} is not mapped", allocation.id);
        }
        let mut state = self.state.lock();
        let Some(bytes) = state.memory.get_mut(&allocation.id) else {
            bail!("allocation {} was freed", allocation.id);
        };
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_image(
        &self,
        _name: &str,
        _info: &vk::ImageCreateInfo,
        _location: MemoryLocation,
    ) -> Result<(vk::Image, MockAllocation)> {
        let image: vk::Image = self.create(Call::CreateImage)?;
        let allocation = MockAllocation {
            id: image.as_raw(),
            host_visible: false,
        };
        Ok((image, allocation))
    }

    fn destroy_image(&self, _image: vk::Image, _allocation: MockAllocation) {
        self.log(Call::DestroyImage);
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        self.create(Call::CreateImageView)
    }

    fn destroy_image_view(&self, _view: vk::ImageView) {
        self.log(Call::DestroyImageView);
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer> {
        self.record(Call::CreateFramebuffer)?;
        self.state.lock().last_framebuffer_attachments = Some(info.attachment_count);
        Ok(self.handle())
    }

    fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {
        self.log(Call::DestroyFramebuffer);
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, _pipeline: vk::Pipeline) {
        self.log(Call::CmdBindPipeline);
    }

    fn cmd_bind_vertex_buffer(&self, _cmd: vk::CommandBuffer, _buffer: vk::Buffer) {
        self.log(Call::CmdBindVertexBuffer);
    }

    fn cmd_bind_index_buffer(&self, _cmd: vk::CommandBuffer, _buffer: vk::Buffer, _index_type: vk::IndexType) {
        self.log(Call::CmdBindIndexBuffer);
    }

    fn cmd_bind_descriptor_set(
        &self,
        _cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        _set_index: u32,
        _set: vk::DescriptorSet,
    ) {
        self.log(Call::CmdBindDescriptorSet);
    }

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.log(Call::CmdPushConstants);
        self.state.lock().last_push_constants = data.to_vec();
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, _viewport: &vk::Viewport) {
        self.log(Call::CmdSetViewport);
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, _scissor: &vk::Rect2D) {
        self.log(Call::CmdSetScissor);
    }

    fn cmd_begin_render_pass(&self, _cmd: vk::CommandBuffer, _info: &vk::RenderPassBeginInfo) {
        self.log(Call::CmdBeginRenderPass);
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.log(Call::CmdEndRenderPass);
    }

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, _vertex_count: u32) {
        self.log(Call::CmdDraw);
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, _index_count: u32) {
        self.log(Call::CmdDrawIndexed);
    }

    fn cmd_dispatch(&self, _cmd: vk::CommandBuffer, _x: u32, _y: u32, _z: u32) {
        self.log(Call::CmdDispatch);
    }

    fn cmd_copy_buffer(&self, _cmd: vk::CommandBuffer, _src: vk::Buffer, _dst: vk::Buffer, _size: u64) {
        self.log(Call::CmdCopyBuffer);
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _image: vk::Image,
        _region: &vk::BufferImageCopy,
    ) {
        self.log(Call::CmdCopyBufferToImage);
    }

    fn cmd_image_barrier(
        &self,
        _cmd: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        self.log(Call::CmdImageBarrier);
        self.state.lock().last_barrier = Some((barrier.old_layout, barrier.new_layout));
    }

    fn queue_submit(&self, _queue: vk::Queue, submit: &vk::SubmitInfo, fence: vk::Fence) -> Result<()> {
        self.record(Call::QueueSubmit)?;
        let mut state = self.state.lock();
        let completed = !state.manual_completion;
        if let Some(signaled) = state.fences.get_mut(&fence) {
            *signaled = completed;
        }
        state.submits.push(SubmitRecord {
            waits: submit.wait_semaphore_count as usize,
            signals: submit.signal_semaphore_count as usize,
            fence,
        });
        Ok(())
    }

    fn create_swapchain(&self, info: &SwapchainInfo, _old: vk::SwapchainKHR) -> Result<SwapchainImages> {
        let handle = self.create(Call::CreateSwapchain)?;
        let images = (0..SWAPCHAIN_IMAGES).map(|_| self.handle()).collect();
        Ok(SwapchainImages {
            handle,
            images,
            format: info.format.into(),
            extent: info.extent.into(),
        })
    }

    fn destroy_swapchain(&self, _swapchain: vk::SwapchainKHR) {
        self.log(Call::DestroySwapchain);
    }

    fn acquire_next_image(&self, _swapchain: vk::SwapchainKHR, _signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        self.record_vk(Call::AcquireNextImage, vk::Result::ERROR_OUT_OF_DATE_KHR)?;
        let mut state = self.state.lock();
        let index = state.next_image;
        state.next_image = (index + 1) % SWAPCHAIN_IMAGES as u32;
        Ok((index, false))
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        _swapchain: vk::SwapchainKHR,
        _image_index: u32,
        _wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.record_vk(Call::QueuePresent, vk::Result::ERROR_OUT_OF_DATE_KHR)?;
        Ok(false)
    }

    fn wait_idle(&self) -> Result<()> {
        self.record(Call::WaitIdle)?;
        self.complete_all();
        Ok(())
    }
}

/// Temporary shader directory holding `test_{vert,frag,comp}.spv`
pub fn shader_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    let module: Vec<u8> = [0x0723_0203u32, 0x0001_0000]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();
    for name in ["test_vert.spv", "test_frag.spv", "test_comp.spv"] {
        std::fs::write(dir.path().join(name), &module).expect("write shader");
    }
    dir
}

/// One uniform at binding 0 of the vertex stage
pub fn uniform_layout() -> PipelineLayoutInfo {
    PipelineLayoutInfo {
        push_constant_ranges: Vec::new(),
        set_layout: DescriptorSetLayoutInfo {
            shader_objects: vec![ShaderObjectInfo {
                kind: ShaderObjectType::Uniform,
                stages: ShaderStage::VERTEX,
                binding: 0,
            }],
        },
    }
}

/// Color + depth render pass presenting to a swapchain
pub fn swapchain_render_pass() -> RenderPassInfo {
    RenderPassInfo {
        attachments: vec![
            Attachment {
                format: PixelFormat::Bgra8Srgb,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                kind: AttachmentType::Color,
                layout: ImageLayout::Presentation,
            },
            Attachment {
                format: PixelFormat::D32Sfloat,
                load_op: LoadOp::Clear,
                store_op: StoreOp::DontCare,
                kind: AttachmentType::Depth,
                layout: ImageLayout::DepthStencil,
            },
        ],
    }
}

pub fn graphics_pipeline() -> PipelineInfo {
    PipelineInfo::Graphics(GraphicsPipelineInfo {
        shaders: vec!["test_vert.spv".to_string(), "test_frag.spv".to_string()],
        render_pass: swapchain_render_pass(),
        layout: uniform_layout(),
        primitive: Default::default(),
        polygon_mode: Default::default(),
        extent: Extent::new(800, 600),
    })
}

pub fn compute_pipeline() -> PipelineInfo {
    PipelineInfo::Compute(ComputePipelineInfo {
        shader: "test_comp.spv".to_string(),
        layout: PipelineLayoutInfo::default(),
    })
}

/// 800x600 FIFO swapchain with the default descriptor pool
pub fn backend_settings(shader_dir: &Path) -> BackendSettings {
    BackendSettings {
        swapchain: SwapchainInfo {
            extent: Extent::new(800, 600),
            format: PixelFormat::Bgra8Srgb,
            color_space: ColorSpace::SrgbNonlinear,
            present_mode: PresentMode::Fifo,
        },
        clear_color: [0.0, 0.0, 0.0, 1.0],
        shader_dir: shader_dir.to_path_buf(),
        descriptor_capacity: PoolCapacity::default(),
    }
}
