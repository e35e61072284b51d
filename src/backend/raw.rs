// Raw device seam
//
// Every native call the backend makes goes through this trait. The Vulkan
// implementation lives in `device.rs`; tests drive the same code through a
// recording mock. Methods are safe: implementors own the unsafe blocks.

use super::queue::QueueSet;
use crate::types::SwapchainInfo;
use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Images owned by a freshly created swapchain
#[derive(Debug, Clone)]
pub struct SwapchainImages {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

pub trait RawDevice {
    /// Backing memory of one buffer or image
    type Allocation;

    fn queues(&self) -> &QueueSet;

    // Cached objects
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> Result<vk::Pipeline>;
    fn create_compute_pipeline(&self, info: &vk::ComputePipelineCreateInfo) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Descriptors
    fn create_descriptor_pool(&self, info: &vk::DescriptorPoolCreateInfo) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Raw result so callers can tell pool exhaustion from other failures
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> Result<()>;
    fn write_descriptor_set(&self, write: &vk::WriteDescriptorSet);

    // Command recording objects
    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, cmd: vk::CommandBuffer);
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    // Synchronization
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Memory-backed resources
    fn create_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<(vk::Buffer, Self::Allocation)>;
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Self::Allocation);
    /// Copies `data` into mapped memory; fails for device-local memory
    fn write_allocation(&self, allocation: &mut Self::Allocation, offset: u64, data: &[u8]) -> Result<()>;
    fn create_image(
        &self,
        name: &str,
        info: &vk::ImageCreateInfo,
        location: MemoryLocation,
    ) -> Result<(vk::Image, Self::Allocation)>;
    fn destroy_image(&self, image: vk::Image, allocation: Self::Allocation);
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Recorded commands
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D);
    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32);
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64);
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        region: &vk::BufferImageCopy,
    );
    fn cmd_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    );

    fn queue_submit(&self, queue: vk::Queue, submit: &vk::SubmitInfo, fence: vk::Fence) -> Result<()>;

    // Presentation
    fn create_swapchain(&self, info: &SwapchainInfo, old: vk::SwapchainKHR) -> Result<SwapchainImages>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Ok((index, suboptimal)); out-of-date comes back as the raw error
    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> VkResult<(u32, bool)>;
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    fn wait_idle(&self) -> Result<()>;
}
