// Stash-based Vulkan renderer
//
// Declarative pipeline, render pass and resource descriptions go in; cached
// native objects and handle-addressed resources come out. See
// `interface::RenderInterface` for the entry point.

pub mod backend;
pub mod config;
pub mod handles;
pub mod interface;
pub mod static_pipelines;
pub mod types;

pub use config::Config;
pub use handles::{BufferHandle, CmdListHandle, IndexBufferHandle, TextureHandle, VertexBufferHandle};
pub use interface::{BackendKind, IndexFormat, RenderBackend, RenderInterface};
pub use static_pipelines::StaticPipelines;
