// Backend module - Vulkan implementation of the render interface
//
// Layering, bottom up:
//   raw (device seam) -> device (ash + gpu-allocator) / mock (tests)
//   stashes (render passes, layouts, shaders, pipelines, samplers)
//   descriptor pool, buffers, textures, transition table
//   command lists, swapchain + frame ring
//   vk_backend (handle tables, implements RenderBackend)

pub mod buffer;
pub mod command;
pub mod convert;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod layouts;
pub mod pipeline;
pub mod queue;
pub mod raw;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod stash;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod transition;
pub mod vk_backend;

#[cfg(test)]
pub(crate) mod mock;

pub use descriptor::PoolCapacity;
pub use device::VulkanDevice;
pub use error::BackendError;
pub use raw::RawDevice;
pub use swapchain::Swapchain;
pub use vk_backend::{BackendSettings, VkRenderBackend};
