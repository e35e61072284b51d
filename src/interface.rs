// Render interface - the public surface of the renderer
//
// `RenderInterface` owns the one active backend behind the `RenderBackend`
// trait and forwards handle-based calls to it. Its only logic of its own is
// static pipeline lookup and the typed index/vertex helpers.
//
// Typical frame:
//   prepare_frame -> start_recording -> begin_render_pass_swapchain
//   -> bind/draw ... -> end_render_pass -> end_recording -> submit
//   -> present_frame

use crate::backend::texture::load_texels;
use crate::backend::{BackendError, BackendSettings, VkRenderBackend, VulkanDevice};
use crate::config::Config;
use crate::handles::{BufferHandle, CmdListHandle, IndexBufferHandle, TextureHandle, VertexBufferHandle};
use crate::static_pipelines::StaticPipelines;
use crate::types::{
    BufferUsage, ColorSpace, Extent, ImageType, ImageUsage, IndexType, MemoryType, PipelineInfo, PixelFormat,
    QueueUsage, Rectangle, RenderPassInfo, SamplerInfo, ShaderStage, SwapchainInfo, TextureDescription, Vertex,
    Viewport,
};
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which graphics API drives the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Vulkan,
    /// Declared for configuration compatibility; not implemented
    OpenGl,
}

impl BackendKind {
    fn ensure_supported(self) -> Result<(), BackendError> {
        match self {
            BackendKind::Vulkan => Ok(()),
            BackendKind::OpenGl => Err(BackendError::Unimplemented("OpenGL")),
        }
    }
}

/// Contract every backend implements. Object safe; the interface holds it
/// as `Box<dyn RenderBackend>`.
pub trait RenderBackend {
    /// Frees retired command lists and finished staging buffers
    fn cleanup(&mut self) -> Result<()>;
    /// New window size; the swapchain is rebuilt on the next `prepare_frame`
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;
    fn swapchain_extent(&self) -> Extent;
    /// Render pass description matching the swapchain images
    fn swapchain_render_pass(&self, want_depth: bool) -> RenderPassInfo;

    fn create_command_list(&mut self, usage: QueueUsage, presentable: bool) -> Result<CmdListHandle>;
    fn destroy_command_list(&mut self, cmd: CmdListHandle) -> Result<()>;
    fn start_recording(&mut self, cmd: CmdListHandle) -> Result<()>;
    fn end_recording(&mut self, cmd: CmdListHandle) -> Result<()>;
    fn submit(&mut self, cmd: CmdListHandle) -> Result<()>;
    fn reset(&mut self, cmd: CmdListHandle) -> Result<()>;
    fn wait_on(&mut self, cmd: CmdListHandle) -> Result<()>;
    fn is_completed(&self, cmd: CmdListHandle) -> Result<bool>;

    fn set_viewport(&mut self, cmd: CmdListHandle, viewport: &Viewport) -> Result<()>;
    fn set_scissor(&mut self, cmd: CmdListHandle, scissor: &Rectangle) -> Result<()>;
    fn bind_pipeline(&mut self, cmd: CmdListHandle, info: &PipelineInfo) -> Result<()>;

    fn bind_vertex_buffer(&mut self, cmd: CmdListHandle, buffer: VertexBufferHandle) -> Result<()>;
    fn bind_index_buffer(&mut self, cmd: CmdListHandle, buffer: IndexBufferHandle, index_type: IndexType) -> Result<()>;
    fn bind_texture(&mut self, cmd: CmdListHandle, texture: TextureHandle, set: u32, binding: u32) -> Result<()>;
    fn bind_image(&mut self, cmd: CmdListHandle, texture: TextureHandle, set: u32, binding: u32) -> Result<()>;
    fn bind_buffer(&mut self, cmd: CmdListHandle, buffer: BufferHandle, set: u32, binding: u32) -> Result<()>;
    fn bind_uniform_buffer(&mut self, cmd: CmdListHandle, buffer: BufferHandle, set: u32, binding: u32) -> Result<()>;
    /// Push constants for the bound pipeline layout
    fn update_constant_buffer(&mut self, cmd: CmdListHandle, stages: ShaderStage, offset: u32, data: &[u8]) -> Result<()>;

    /// Texture with undefined contents, usable as a render target
    fn create_texture(&mut self, description: &TextureDescription, sampler: &SamplerInfo) -> Result<TextureHandle>;
    /// Texture filled by a copy recorded on `cmd`, ready for sampling once
    /// `cmd` has executed
    fn create_texture_with_texels(
        &mut self,
        cmd: CmdListHandle,
        description: &TextureDescription,
        sampler: &SamplerInfo,
        texels: &[u8],
    ) -> Result<TextureHandle>;
    fn create_vertex_buffer(&mut self, cmd: CmdListHandle, vertices: &[u8]) -> Result<VertexBufferHandle>;
    fn create_index_buffer(&mut self, cmd: CmdListHandle, indices: &[u8], index_type: IndexType) -> Result<IndexBufferHandle>;
    /// Host-visible uniform buffer
    fn create_uniform_buffer(&mut self, size: u64) -> Result<BufferHandle>;
    fn create_buffer(&mut self, size: u64, usage: BufferUsage, memory: MemoryType) -> Result<BufferHandle>;
    fn copy_to_buffer(&mut self, buffer: BufferHandle, data: &[u8], offset: u64) -> Result<()>;
    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<()>;
    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<()>;
    fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle) -> Result<()>;
    fn destroy_index_buffer(&mut self, buffer: IndexBufferHandle) -> Result<()>;

    fn prepare_frame(&mut self) -> Result<()>;
    fn begin_render_pass_swapchain(&mut self, cmd: CmdListHandle, want_depth: bool) -> Result<()>;
    fn begin_render_pass_targets(&mut self, cmd: CmdListHandle, info: &RenderPassInfo, targets: &[TextureHandle]) -> Result<()>;
    fn end_render_pass(&mut self, cmd: CmdListHandle) -> Result<()>;
    fn draw_vertices(&mut self, cmd: CmdListHandle, vertex_count: u32) -> Result<()>;
    fn draw_vertices_indexed(&mut self, cmd: CmdListHandle, index_count: u32) -> Result<()>;
    fn dispatch(&mut self, cmd: CmdListHandle, x: u32, y: u32, z: u32) -> Result<()>;
    fn present_frame(&mut self) -> Result<()>;

    /// Decodes image files into one texture. Six files make a cube map, any
    /// other count above one an array texture.
    fn create_texture_from_files(
        &mut self,
        cmd: CmdListHandle,
        paths: &[PathBuf],
        sampler: &SamplerInfo,
    ) -> Result<TextureHandle> {
        let texels = load_texels(paths)?;
        let kind = match texels.layers {
            6 => ImageType::Cube,
            1 => ImageType::Image2d,
            _ => ImageType::Image2dArray,
        };
        let description = TextureDescription {
            width: texels.width,
            height: texels.height,
            kind,
            format: PixelFormat::Rgba8Srgb,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            layers: texels.layers,
        };
        self.create_texture_with_texels(cmd, &description, sampler, &texels.bytes)
    }

    fn create_texture_from_file(&mut self, cmd: CmdListHandle, path: &Path, sampler: &SamplerInfo) -> Result<TextureHandle> {
        self.create_texture_from_files(cmd, &[path.to_path_buf()], sampler)
    }
}

/// Integer types usable as indices
pub trait IndexFormat: bytemuck::Pod {
    const INDEX_TYPE: IndexType;
}

impl IndexFormat for u16 {
    const INDEX_TYPE: IndexType = IndexType::U16;
}

impl IndexFormat for u32 {
    const INDEX_TYPE: IndexType = IndexType::U32;
}

pub struct RenderInterface {
    backend: Box<dyn RenderBackend>,
    static_pipelines: StaticPipelines,
}

impl RenderInterface {
    /// Brings up the backend named in `config` for `window`
    pub fn init<W>(window: &W, config: &Config) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        config.graphics.backend.ensure_supported()?;
        log::info!("Initializing {:?} backend", config.graphics.backend);

        let static_pipelines = StaticPipelines::load(&config.graphics.pipelines_file)?;
        let device = VulkanDevice::new(window, &config.window.title, config.debug.validation_layers)?;
        let settings = BackendSettings {
            swapchain: SwapchainInfo {
                extent: Extent::new(config.window.width, config.window.height),
                format: PixelFormat::Bgra8Srgb,
                color_space: ColorSpace::SrgbNonlinear,
                present_mode: config.present_mode(),
            },
            clear_color: config.graphics.clear_color,
            shader_dir: config.graphics.shader_dir.clone(),
            descriptor_capacity: config.graphics.descriptors,
        };
        let backend = VkRenderBackend::new(device, settings)?;
        Ok(Self::with_backend(Box::new(backend), static_pipelines))
    }

    pub fn with_backend(backend: Box<dyn RenderBackend>, static_pipelines: StaticPipelines) -> Self {
        Self {
            backend,
            static_pipelines,
        }
    }

    /// Waits for the GPU, then tears the backend down
    pub fn uninit(self) -> Result<()> {
        self.backend.wait_idle()?;
        log::info!("Render interface shut down");
        Ok(())
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    pub fn static_pipelines(&self) -> &StaticPipelines {
        &self.static_pipelines
    }

    pub fn cleanup(&mut self) -> Result<()> {
        self.backend.cleanup()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.backend.resize(width, height)
    }

    pub fn swapchain_extent(&self) -> Extent {
        self.backend.swapchain_extent()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Command lists
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_command_list(&mut self, usage: QueueUsage, presentable: bool) -> Result<CmdListHandle> {
        self.backend.create_command_list(usage, presentable)
    }

    pub fn destroy_command_list(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.backend.destroy_command_list(cmd)
    }

    pub fn start_recording(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.backend.start_recording(cmd)
    }

    pub fn end_recording(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.backend.end_recording(cmd)
    }

    pub fn submit(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.backend.submit(cmd)
    }

    pub fn reset(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.backend.reset(cmd)
    }

    pub fn wait_on(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.backend.wait_on(cmd)
    }

    pub fn is_completed(&self, cmd: CmdListHandle) -> Result<bool> {
        self.backend.is_completed(cmd)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline state
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_viewport(&mut self, cmd: CmdListHandle, viewport: &Viewport) -> Result<()> {
        self.backend.set_viewport(cmd, viewport)
    }

    pub fn set_scissor(&mut self, cmd: CmdListHandle, scissor: &Rectangle) -> Result<()> {
        self.backend.set_scissor(cmd, scissor)
    }

    pub fn bind_pipeline(&mut self, cmd: CmdListHandle, info: &PipelineInfo) -> Result<()> {
        self.backend.bind_pipeline(cmd, info)
    }

    pub fn bind_static_pipeline(&mut self, cmd: CmdListHandle, name: &str) -> Result<()> {
        let info = self.static_pipelines.get(name)?.resolve(self.backend.as_ref());
        self.backend.bind_pipeline(cmd, &info)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binding
    // ─────────────────────────────────────────────────────────────────────────

    pub fn bind_vertex_buffer(&mut self, cmd: CmdListHandle, buffer: VertexBufferHandle) -> Result<()> {
        self.backend.bind_vertex_buffer(cmd, buffer)
    }

    pub fn bind_index_buffer<T: IndexFormat>(&mut self, cmd: CmdListHandle, buffer: IndexBufferHandle) -> Result<()> {
        self.backend.bind_index_buffer(cmd, buffer, T::INDEX_TYPE)
    }

    pub fn bind_texture(&mut self, cmd: CmdListHandle, texture: TextureHandle, set: u32, binding: u32) -> Result<()> {
        self.backend.bind_texture(cmd, texture, set, binding)
    }

    pub fn bind_image(&mut self, cmd: CmdListHandle, texture: TextureHandle, set: u32, binding: u32) -> Result<()> {
        self.backend.bind_image(cmd, texture, set, binding)
    }

    pub fn bind_buffer(&mut self, cmd: CmdListHandle, buffer: BufferHandle, set: u32, binding: u32) -> Result<()> {
        self.backend.bind_buffer(cmd, buffer, set, binding)
    }

    pub fn bind_uniform_buffer(&mut self, cmd: CmdListHandle, buffer: BufferHandle, set: u32, binding: u32) -> Result<()> {
        self.backend.bind_uniform_buffer(cmd, buffer, set, binding)
    }

    pub fn update_constant_buffer(&mut self, cmd: CmdListHandle, stages: ShaderStage, offset: u32, data: &[u8]) -> Result<()> {
        self.backend.update_constant_buffer(cmd, stages, offset, data)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resources
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_texture(&mut self, description: &TextureDescription, sampler: &SamplerInfo) -> Result<TextureHandle> {
        self.backend.create_texture(description, sampler)
    }

    pub fn create_texture_with_texels(
        &mut self,
        cmd: CmdListHandle,
        description: &TextureDescription,
        sampler: &SamplerInfo,
        texels: &[u8],
    ) -> Result<TextureHandle> {
        self.backend.create_texture_with_texels(cmd, description, sampler, texels)
    }

    pub fn create_texture_from_file(&mut self, cmd: CmdListHandle, path: &Path, sampler: &SamplerInfo) -> Result<TextureHandle> {
        self.backend.create_texture_from_file(cmd, path, sampler)
    }

    pub fn create_texture_from_files(
        &mut self,
        cmd: CmdListHandle,
        paths: &[PathBuf],
        sampler: &SamplerInfo,
    ) -> Result<TextureHandle> {
        self.backend.create_texture_from_files(cmd, paths, sampler)
    }

    pub fn create_vertex_buffer(&mut self, cmd: CmdListHandle, vertices: &[Vertex]) -> Result<VertexBufferHandle> {
        self.backend.create_vertex_buffer(cmd, bytemuck::cast_slice(vertices))
    }

    pub fn create_index_buffer<T: IndexFormat>(&mut self, cmd: CmdListHandle, indices: &[T]) -> Result<IndexBufferHandle> {
        self.backend
            .create_index_buffer(cmd, bytemuck::cast_slice(indices), T::INDEX_TYPE)
    }

    pub fn create_uniform_buffer(&mut self, size: u64) -> Result<BufferHandle> {
        self.backend.create_uniform_buffer(size)
    }

    pub fn create_buffer(&mut self, size: u64, usage: BufferUsage, memory: MemoryType) -> Result<BufferHandle> {
        self.backend.create_buffer(size, usage, memory)
    }

    pub fn copy_to_buffer(&mut self, buffer: BufferHandle, data: &[u8], offset: u64) -> Result<()> {
        self.backend.copy_to_buffer(buffer, data, offset)
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) -> Result<()> {
        self.backend.destroy_texture(texture)
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.backend.destroy_buffer(buffer)
    }

    pub fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle) -> Result<()> {
        self.backend.destroy_vertex_buffer(buffer)
    }

    pub fn destroy_index_buffer(&mut self, buffer: IndexBufferHandle) -> Result<()> {
        self.backend.destroy_index_buffer(buffer)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frame
    // ─────────────────────────────────────────────────────────────────────────

    pub fn prepare_frame(&mut self) -> Result<()> {
        self.backend.prepare_frame()
    }

    pub fn begin_render_pass_swapchain(&mut self, cmd: CmdListHandle, want_depth: bool) -> Result<()> {
        self.backend.begin_render_pass_swapchain(cmd, want_depth)
    }

    pub fn begin_render_pass_targets(
        &mut self,
        cmd: CmdListHandle,
        info: &RenderPassInfo,
        targets: &[TextureHandle],
    ) -> Result<()> {
        self.backend.begin_render_pass_targets(cmd, info, targets)
    }

    pub fn end_render_pass(&mut self, cmd: CmdListHandle) -> Result<()> {
        self.backend.end_render_pass(cmd)
    }

    pub fn draw_vertices(&mut self, cmd: CmdListHandle, vertex_count: u32) -> Result<()> {
        self.backend.draw_vertices(cmd, vertex_count)
    }

    pub fn draw_vertices_indexed(&mut self, cmd: CmdListHandle, index_count: u32) -> Result<()> {
        self.backend.draw_vertices_indexed(cmd, index_count)
    }

    pub fn dispatch(&mut self, cmd: CmdListHandle, x: u32, y: u32, z: u32) -> Result<()> {
        self.backend.dispatch(cmd, x, y, z)
    }

    pub fn present_frame(&mut self) -> Result<()> {
        self.backend.present_frame()
    }
}
