// =============================================================================
// STASH RENDERER DEMO - spinning cube through the render interface
// =============================================================================
//
// The demo owns the window and the frame loop; everything GPU-side goes
// through `RenderInterface`.
//
// FRAME FLOW:
// 1. prepare_frame   (wait for the slot's last consumer, rebuild if resized)
// 2. record          (swapchain pass, static "default" pipeline, MVP push)
// 3. submit          (waits image-available, signals render-finished)
// 4. present_frame   (waits render-finished, advances the ring)
//
// =============================================================================

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use stash_render::backend::swapchain::MAX_FRAMES_IN_FLIGHT;
use stash_render::backend::BackendError;
use stash_render::static_pipelines::DEFAULT_PIPELINE;
use stash_render::types::{QueueUsage, ShaderStage, Vertex};
use stash_render::{CmdListHandle, Config, IndexBufferHandle, RenderInterface, VertexBufferHandle};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting stash renderer demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Backend: {:?}, present mode: {}", config.graphics.backend, config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== Stash Renderer Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

// =============================================================================
// SCENE DATA
// =============================================================================

/// Unit cube, four vertices per face so every face gets its own normal
fn cube() -> (Vec<Vertex>, Vec<u16>) {
    const FACES: [([f32; 3], [f32; 3], [f32; 3], [f32; 4]); 6] = [
        // normal, u axis, v axis, color
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.9, 0.2, 0.2, 1.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.2, 0.9, 0.2, 1.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [0.2, 0.2, 0.9, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.9, 0.9, 0.2, 1.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.2, 0.9, 0.9, 1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.9, 0.2, 0.9, 1.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v, color) in FACES {
        let (n, u, v) = (Vec3::from(normal), Vec3::from(u), Vec3::from(v));
        let base = vertices.len() as u16;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = (n + u * su + v * sv) * 0.5;
            vertices.push(Vertex {
                position: position.to_array(),
                color,
                uv: [(su + 1.0) * 0.5, (sv + 1.0) * 0.5, 0.0],
                normal,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// GPU-side objects created once the window exists
struct Scene {
    vertices: VertexBufferHandle,
    indices: IndexBufferHandle,
    index_count: u32,
    /// One graphics list per ring slot
    frame_lists: Vec<CmdListHandle>,
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

pub struct App {
    config: Config,

    // Field order matters for Drop: the interface goes before the window
    interface: Option<RenderInterface>,
    scene: Option<Scene>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    /// Set to true when window is minimized (size = 0) - skip rendering
    is_minimized: bool,
    /// Counts presented frames; selects the command list for the ring slot
    frame_index: usize,

    // FPS tracking
    started: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            interface: None,
            scene: None,
            window: None,
            is_fullscreen,
            is_minimized: false,
            frame_index: 0,
            started: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let mut interface = RenderInterface::init(window, &self.config)?;

        // Upload the cube through a one-off transfer list
        let (vertices, indices) = cube();
        let upload = interface.create_command_list(QueueUsage::TRANSFER, false)?;
        interface.start_recording(upload)?;
        let vertex_buffer = interface.create_vertex_buffer(upload, &vertices)?;
        let index_buffer = interface.create_index_buffer(upload, &indices)?;
        interface.end_recording(upload)?;
        interface.submit(upload)?;
        interface.wait_on(upload)?;
        interface.destroy_command_list(upload)?;

        let frame_lists = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| interface.create_command_list(QueueUsage::GRAPHICS, true))
            .collect::<Result<Vec<_>>>()?;

        log::info!("Scene ready: {} vertices, {} indices", vertices.len(), indices.len());
        self.scene = Some(Scene {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
            frame_lists,
        });
        self.interface = Some(interface);
        Ok(())
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    /// Records, submits and presents one frame. Returns false when the frame
    /// was skipped.
    pub fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        let interface = self.interface.as_mut().context("Renderer not initialized")?;
        let scene = self.scene.as_ref().context("Scene not initialized")?;

        interface.prepare_frame()?;
        let cmd = scene.frame_lists[self.frame_index % MAX_FRAMES_IN_FLIGHT];

        interface.start_recording(cmd)?;
        if let Err(e) = interface.begin_render_pass_swapchain(cmd, true) {
            interface.reset(cmd)?;
            // The next prepare_frame rebuilds the swapchain
            if e.downcast_ref::<BackendError>() == Some(&BackendError::SwapchainOutOfDate) {
                return Ok(false);
            }
            return Err(e);
        }

        let mvp = model_view_projection(interface.swapchain_extent(), self.started.elapsed().as_secs_f32());
        interface.bind_static_pipeline(cmd, DEFAULT_PIPELINE)?;
        interface.bind_vertex_buffer(cmd, scene.vertices)?;
        interface.bind_index_buffer::<u16>(cmd, scene.indices)?;
        interface.update_constant_buffer(cmd, ShaderStage::VERTEX, 0, bytemuck::bytes_of(&mvp))?;
        interface.draw_vertices_indexed(cmd, scene.index_count)?;
        interface.end_render_pass(cmd)?;
        interface.end_recording(cmd)?;

        interface.submit(cmd)?;
        interface.present_frame()?;
        self.frame_index += 1;
        Ok(true)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            self.is_minimized = true;
            return;
        }
        self.is_minimized = false;
        if let Some(interface) = self.interface.as_mut() {
            if let Err(e) = interface.resize(width, height) {
                log::error!("Resize failed: {:?}", e);
            }
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    pub fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self) {
        self.scene = None;
        if let Some(interface) = self.interface.take() {
            if let Err(e) = interface.uninit() {
                log::error!("Renderer shutdown failed: {:?}", e);
            }
        }
    }
}

/// Spinning cube seen from a fixed camera, Vulkan clip space
fn model_view_projection(extent: stash_render::types::Extent, seconds: f32) -> Mat4 {
    let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
    let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
    // Vulkan's Y axis points down
    projection.y_axis.y *= -1.0;
    let view = Mat4::look_at_rh(Vec3::new(2.0, 1.5, 2.5), Vec3::ZERO, Vec3::Y);
    let model = Mat4::from_rotation_y(seconds) * Mat4::from_rotation_x(seconds * 0.5);
    projection * view * model
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resize(size.width, size.height);
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => log::error!("Render error: {:?}", e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        // Bindings name keys the way winit spells them
                        let name = format!("{:?}", key);
                        if name == self.config.controls.quit_key {
                            log::info!("{} pressed, exiting...", name);
                            self.shutdown();
                            event_loop.exit();
                        } else if name == self.config.controls.fullscreen_key {
                            self.toggle_fullscreen();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
        log::info!("Cleanup complete");
    }
}
