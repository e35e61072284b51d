// Command lists
//
// A CommandBuffer wraps one primary VkCommandBuffer and the fence that tells
// the CPU when the GPU is done with it. Recording follows a strict state
// machine:
//
//   Idle -> Recording -> Recorded -> Submitted -> (reset) Idle
//
// and Released once its native objects are freed. A submitted buffer is
// always waited on before it is re-recorded or resubmitted.

use super::buffer::Buffer;
use super::error::{ensure, BackendError};
use super::queue::QueueFamily;
use super::raw::RawDevice;
use super::stash::{BoundPipeline, Stashes};
use super::texture::Texture;
use super::transition::{self, ImageAccess};
use crate::types::{IndexType, PipelineInfo, QueueUsage, Rectangle, ShaderStage, Viewport};
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingState {
    Idle,
    Recording,
    Recorded,
    Submitted,
    Released,
}

/// One command pool per queue family
pub struct CommandPool<D: RawDevice> {
    device: Arc<D>,
    pool: vk::CommandPool,
    family: QueueFamily,
}

impl<D: RawDevice> CommandPool<D> {
    pub fn new(device: Arc<D>, family: QueueFamily) -> Result<Self> {
        let pool = device
            .create_command_pool(family.index)
            .with_context(|| format!("Failed to create command pool for family {}", family.index))?;
        Ok(Self { device, pool, family })
    }

    pub fn family(&self) -> &QueueFamily {
        &self.family
    }
}

impl<D: RawDevice> Drop for CommandPool<D> {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
    }
}

/// Everything `vkCmdBeginRenderPass` needs. No `Debug`: `vk::ClearValue` is a union.
#[derive(Clone)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: Vec<vk::ClearValue>,
}

pub struct CommandBuffer<D: RawDevice> {
    device: Arc<D>,
    pool: vk::CommandPool,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    usage: QueueUsage,
    presentable: bool,
    state: RecordingState,
    submitted_once: bool,

    // Transient recording state
    bound: Option<BoundPipeline>,
    open_render_pass: Option<vk::RenderPass>,
    wait_semaphores: Vec<vk::Semaphore>,
    signal_semaphores: Vec<vk::Semaphore>,
    /// Upload sources kept alive until the GPU has consumed them
    staging: Vec<Buffer<D>>,
}

impl<D: RawDevice> CommandBuffer<D> {
    pub fn new(device: Arc<D>, pool: &CommandPool<D>, usage: QueueUsage, presentable: bool) -> Result<Self> {
        let cmd = device
            .allocate_command_buffer(pool.pool)
            .context("Failed to allocate command buffer")?;
        let fence = match device.create_fence(false) {
            Ok(fence) => fence,
            Err(e) => {
                device.free_command_buffer(pool.pool, cmd);
                return Err(e.context("Failed to create command buffer fence"));
            }
        };

        Ok(Self {
            device,
            pool: pool.pool,
            queue: pool.family.queue,
            cmd,
            fence,
            usage,
            presentable,
            state: RecordingState::Idle,
            submitted_once: false,
            bound: None,
            open_render_pass: None,
            wait_semaphores: Vec::new(),
            signal_semaphores: Vec::new(),
            staging: Vec::new(),
        })
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn usage(&self) -> QueueUsage {
        self.usage
    }

    pub fn is_presentable(&self) -> bool {
        self.presentable
    }

    pub fn bound_pipeline(&self) -> Option<&BoundPipeline> {
        self.bound.as_ref()
    }

    pub fn in_render_pass(&self) -> bool {
        self.open_render_pass.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contract checks
    // ─────────────────────────────────────────────────────────────────────────

    fn expect_recording(&self, operation: &'static str) -> Result<(), BackendError> {
        ensure(
            self.state == RecordingState::Recording,
            BackendError::InvalidState {
                operation,
                actual: self.state,
                expected: "Recording",
            },
        )
    }

    fn require_usage(&self, usage: QueueUsage) -> Result<(), BackendError> {
        ensure(self.usage.contains(usage), BackendError::UnsupportedUsage(usage))
    }

    fn require_bound(
        &self,
        operation: &'static str,
        bind_point: vk::PipelineBindPoint,
    ) -> Result<&BoundPipeline, BackendError> {
        let bound = self.bound.as_ref().ok_or(BackendError::NoBoundPipeline(operation))?;
        ensure(
            bound.bind_point == bind_point,
            BackendError::WrongPipelineKind {
                operation,
                expected: if bind_point == vk::PipelineBindPoint::COMPUTE {
                    "compute"
                } else {
                    "graphics"
                },
            },
        )?;
        Ok(bound)
    }

    fn expect_outside_pass(&self, operation: &'static str) -> Result<(), BackendError> {
        ensure(self.open_render_pass.is_none(), BackendError::InsideRenderPass { operation })
    }

    /// The bound pipeline's set layout, for callers materializing descriptors
    pub fn bound_for_binding(&self, operation: &'static str) -> Result<&BoundPipeline, BackendError> {
        self.expect_recording(operation)?;
        self.bound.as_ref().ok_or(BackendError::NoBoundPipeline(operation))
    }

    fn require_completion_tracking(&self, operation: &'static str) -> Result<(), BackendError> {
        ensure(
            self.state != RecordingState::Released,
            BackendError::InvalidState {
                operation,
                actual: self.state,
                expected: "a live command list",
            },
        )?;
        ensure(self.submitted_once, BackendError::NeverSubmitted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn start_recording(&mut self) -> Result<()> {
        match self.state {
            RecordingState::Recording | RecordingState::Released => {
                return Err(BackendError::InvalidState {
                    operation: "start_recording",
                    actual: self.state,
                    expected: "Idle, Recorded or Submitted",
                }
                .into());
            }
            // The GPU may still be reading the previous recording
            RecordingState::Submitted => self.wait_for_completion()?,
            RecordingState::Idle | RecordingState::Recorded => {}
        }

        self.staging.clear();
        self.clear_transient();
        self.device
            .begin_command_buffer(self.cmd)
            .context("Failed to begin command buffer")?;
        self.state = RecordingState::Recording;
        Ok(())
    }

    pub fn end_recording(&mut self) -> Result<()> {
        self.expect_recording("end_recording")?;
        self.expect_outside_pass("end_recording")?;
        self.device
            .end_command_buffer(self.cmd)
            .context("Failed to end command buffer")?;
        self.bound = None;
        self.state = RecordingState::Recorded;
        Ok(())
    }

    pub fn submit(&mut self) -> Result<()> {
        ensure(
            matches!(self.state, RecordingState::Recorded | RecordingState::Submitted),
            BackendError::InvalidState {
                operation: "submit",
                actual: self.state,
                expected: "Recorded or Submitted",
            },
        )?;

        // Reuse barrier: the previous submission must be finished
        if self.submitted_once {
            self.device
                .wait_for_fence(self.fence, u64::MAX)
                .context("Failed waiting on command list fence")?;
            self.device.reset_fence(self.fence)?;
            self.submitted_once = false;
        }

        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; self.wait_semaphores.len()];
        let command_buffers = [self.cmd];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&self.signal_semaphores);

        if let Err(e) = self.device.queue_submit(self.queue, &submit_info, self.fence) {
            // Nothing is pending on the fence; leave the recording resubmittable
            self.state = RecordingState::Recorded;
            return Err(e.context("Failed to submit command list"));
        }

        self.wait_semaphores.clear();
        self.signal_semaphores.clear();
        self.submitted_once = true;
        self.state = RecordingState::Submitted;
        Ok(())
    }

    pub fn is_completed(&self) -> Result<bool> {
        self.require_completion_tracking("is_completed")?;
        self.device.fence_signaled(self.fence)
    }

    pub fn wait_for_completion(&self) -> Result<()> {
        self.require_completion_tracking("wait_for_completion")?;
        self.device
            .wait_for_fence(self.fence, u64::MAX)
            .context("Failed waiting on command list fence")
    }

    /// Discards the recording. Refused while the GPU still executes it.
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            RecordingState::Released => {
                return Err(BackendError::InvalidState {
                    operation: "reset",
                    actual: self.state,
                    expected: "a live command list",
                }
                .into());
            }
            RecordingState::Submitted if !self.device.fence_signaled(self.fence)? => {
                return Err(BackendError::InFlight.into());
            }
            _ => {}
        }

        self.device
            .reset_command_buffer(self.cmd)
            .context("Failed to reset command buffer")?;
        self.staging.clear();
        self.clear_transient();
        self.state = RecordingState::Idle;
        Ok(())
    }

    /// Frees the native objects. Safe to call more than once.
    pub fn release(&mut self) {
        if self.cmd == vk::CommandBuffer::null() {
            return;
        }
        self.staging.clear();
        self.clear_transient();
        self.device.free_command_buffer(self.pool, self.cmd);
        self.device.destroy_fence(self.fence);
        self.cmd = vk::CommandBuffer::null();
        self.fence = vk::Fence::null();
        self.state = RecordingState::Released;
    }

    /// Drops staging buffers once the GPU is done with them
    pub fn collect_staging(&mut self) -> Result<usize> {
        if self.staging.is_empty() || self.state != RecordingState::Submitted {
            return Ok(0);
        }
        if !self.device.fence_signaled(self.fence)? {
            return Ok(0);
        }
        let freed = self.staging.len();
        self.staging.clear();
        Ok(freed)
    }

    pub fn attach_staging(&mut self, buffer: Buffer<D>) {
        self.staging.push(buffer);
    }

    fn clear_transient(&mut self) {
        self.bound = None;
        self.open_render_pass = None;
        self.wait_semaphores.clear();
        self.signal_semaphores.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_viewport(&mut self, viewport: &Viewport) -> Result<()> {
        self.expect_recording("set_viewport")?;
        self.require_usage(QueueUsage::GRAPHICS)?;
        self.device.cmd_set_viewport(self.cmd, &(*viewport).into());
        Ok(())
    }

    pub fn set_scissor(&mut self, scissor: &Rectangle) -> Result<()> {
        self.expect_recording("set_scissor")?;
        self.require_usage(QueueUsage::GRAPHICS)?;
        self.device.cmd_set_scissor(self.cmd, &(*scissor).into());
        Ok(())
    }

    /// Resolves the pipeline through the stashes and binds it
    pub fn bind_pipeline(&mut self, info: &PipelineInfo, stashes: &mut Stashes<D>) -> Result<()> {
        self.expect_recording("bind_pipeline")?;
        self.require_usage(info.required_usage())?;
        let bound = stashes.resolve(info)?;
        self.device.cmd_bind_pipeline(self.cmd, bound.bind_point, bound.pipeline);
        self.bound = Some(bound);
        Ok(())
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Buffer<D>) -> Result<()> {
        self.expect_recording("bind_vertex_buffer")?;
        self.require_usage(QueueUsage::GRAPHICS)?;
        self.device.cmd_bind_vertex_buffer(self.cmd, buffer.handle());
        Ok(())
    }

    pub fn bind_index_buffer(&mut self, buffer: &Buffer<D>, index_type: IndexType) -> Result<()> {
        self.expect_recording("bind_index_buffer")?;
        self.require_usage(QueueUsage::GRAPHICS)?;
        self.device
            .cmd_bind_index_buffer(self.cmd, buffer.handle(), index_type.into());
        Ok(())
    }

    /// Fails when `set_index` is past the sets of the bound layout
    pub fn check_set_index(&self, set_index: u32) -> Result<(), BackendError> {
        let bound = self.bound_for_binding("bind_descriptor_set")?;
        let count = bound.set_layout.shader_objects.len();
        ensure(
            (set_index as usize) < count,
            BackendError::SetOutOfRange { set: set_index, count },
        )
    }

    /// Fails exactly when `bind_texture` would, without recording anything.
    /// Descriptor writes are shared, so they happen only after this passes.
    pub fn check_texture_bind(
        &self,
        texture: &Texture<D>,
        access: ImageAccess,
        set_index: u32,
    ) -> Result<(), BackendError> {
        self.expect_recording("bind_texture")?;
        if transition::required(texture.layout(), access).is_some() {
            self.expect_outside_pass("image layout transition")?;
        }
        self.check_set_index(set_index)
    }

    /// Binds a resource's descriptor set at `set_index` of the bound layout
    pub fn bind_descriptor_set(&mut self, set_index: u32, set: vk::DescriptorSet) -> Result<()> {
        self.check_set_index(set_index)?;
        let bound = self.bound_for_binding("bind_descriptor_set")?;
        self.device
            .cmd_bind_descriptor_set(self.cmd, bound.bind_point, bound.layout, set_index, set);
        Ok(())
    }

    /// Transitions `texture` for `access` if needed, then binds its set
    pub fn bind_texture(
        &mut self,
        texture: &mut Texture<D>,
        access: ImageAccess,
        set_index: u32,
        set: vk::DescriptorSet,
    ) -> Result<()> {
        self.expect_recording("bind_texture")?;
        self.transition(texture, access)?;
        self.bind_descriptor_set(set_index, set)
    }

    /// Records the barrier `access` needs and updates the tracked layout.
    /// Returns whether a barrier was recorded.
    pub(crate) fn transition(&mut self, texture: &mut Texture<D>, access: ImageAccess) -> Result<bool> {
        self.expect_recording("transition")?;
        let Some(transition) = transition::required(texture.layout(), access) else {
            return Ok(false);
        };
        // Barriers inside a subpass need a self-dependency the render passes do not declare
        self.expect_outside_pass("image layout transition")?;

        let transition = transition.for_queue(self.usage);
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(transition.old.into())
            .new_layout(transition.new.into())
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(texture.image())
            .subresource_range(texture.subresource_range())
            .build();
        self.device
            .cmd_image_barrier(self.cmd, transition.src_stage, transition.dst_stage, &barrier);
        texture.set_layout(transition.new);
        Ok(true)
    }

    pub fn push_constants(&mut self, stages: ShaderStage, offset: u32, data: &[u8]) -> Result<()> {
        let bound = self.bound_for_binding("push_constants")?;
        self.device
            .cmd_push_constants(self.cmd, bound.layout, stages.into(), offset, data);
        Ok(())
    }

    /// Opens a render pass; viewport and scissor default to the full extent
    pub fn begin_render_pass(&mut self, begin: &RenderPassBegin) -> Result<()> {
        self.expect_recording("begin_render_pass")?;
        self.require_usage(QueueUsage::GRAPHICS)?;
        self.expect_outside_pass("begin_render_pass")?;

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: begin.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(render_area)
            .clear_values(&begin.clear_values);
        self.device.cmd_begin_render_pass(self.cmd, &begin_info);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: begin.extent.width as f32,
            height: begin.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.device.cmd_set_viewport(self.cmd, &viewport);
        self.device.cmd_set_scissor(self.cmd, &render_area);

        self.open_render_pass = Some(begin.render_pass);
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> Result<()> {
        self.expect_recording("end_render_pass")?;
        ensure(
            self.open_render_pass.is_some(),
            BackendError::NoRenderPass {
                operation: "end_render_pass",
            },
        )?;
        self.device.cmd_end_render_pass(self.cmd);
        self.open_render_pass = None;
        Ok(())
    }

    /// Wait on `semaphore` at color output before this list runs
    pub fn wait_on_semaphore(&mut self, semaphore: vk::Semaphore) {
        if !self.wait_semaphores.contains(&semaphore) {
            self.wait_semaphores.push(semaphore);
        }
    }

    pub fn signal_semaphore(&mut self, semaphore: vk::Semaphore) {
        if !self.signal_semaphores.contains(&semaphore) {
            self.signal_semaphores.push(semaphore);
        }
    }

    fn expect_draw(&self, operation: &'static str) -> Result<(), BackendError> {
        self.expect_recording(operation)?;
        self.require_usage(QueueUsage::GRAPHICS)?;
        self.require_bound(operation, vk::PipelineBindPoint::GRAPHICS)?;
        ensure(self.open_render_pass.is_some(), BackendError::NoRenderPass { operation })
    }

    pub fn draw(&mut self, vertex_count: u32) -> Result<()> {
        self.expect_draw("draw")?;
        self.device.cmd_draw(self.cmd, vertex_count);
        Ok(())
    }

    pub fn draw_indexed(&mut self, index_count: u32) -> Result<()> {
        self.expect_draw("draw_indexed")?;
        self.device.cmd_draw_indexed(self.cmd, index_count);
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.expect_recording("dispatch")?;
        self.require_usage(QueueUsage::COMPUTE)?;
        self.require_bound("dispatch", vk::PipelineBindPoint::COMPUTE)?;
        self.expect_outside_pass("dispatch")?;
        self.device.cmd_dispatch(self.cmd, x, y, z);
        Ok(())
    }

    pub fn copy_buffer(&mut self, src: &Buffer<D>, dst: &Buffer<D>) -> Result<()> {
        self.expect_recording("copy_buffer")?;
        self.expect_outside_pass("copy_buffer")?;
        ensure(
            src.size() == dst.size(),
            BackendError::SizeMismatch {
                expected: dst.size(),
                actual: src.size(),
            },
        )?;
        self.device
            .cmd_copy_buffer(self.cmd, src.handle(), dst.handle(), src.size());
        Ok(())
    }

    /// Copies every layer of `dst` out of `src`, leaving it in TransferDst
    pub fn upload_to_texture(&mut self, src: &Buffer<D>, dst: &mut Texture<D>) -> Result<()> {
        self.expect_recording("upload_to_texture")?;
        self.expect_outside_pass("upload_to_texture")?;
        let description = *dst.description();
        ensure(
            src.size() == description.size(),
            BackendError::SizeMismatch {
                expected: description.size(),
                actual: src.size(),
            },
        )?;

        self.transition(dst, ImageAccess::TransferDst)?;

        let range = dst.subresource_range();
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: range.aspect_mask,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: range.layer_count,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: description.width,
                height: description.height,
                depth: 1,
            },
        };
        self.device
            .cmd_copy_buffer_to_image(self.cmd, src.handle(), dst.image(), &region);
        Ok(())
    }
}

impl<D: RawDevice> Drop for CommandBuffer<D> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{self, Call, MockDevice};
    use crate::types::{BufferUsage, ImageLayout, MemoryType, PixelFormat, TextureDescription};

    struct Fixture {
        _shaders: tempfile::TempDir,
        device: Arc<MockDevice>,
        stashes: Stashes<MockDevice>,
        pool: CommandPool<MockDevice>,
    }

    fn fixture() -> Fixture {
        let shaders = mock::shader_dir();
        let device = Arc::new(MockDevice::new());
        let family = *device.queues().by_usage(QueueUsage::GRAPHICS, true).unwrap();
        Fixture {
            stashes: Stashes::new(device.clone(), shaders.path()),
            pool: CommandPool::new(device.clone(), family).unwrap(),
            device,
            _shaders: shaders,
        }
    }

    impl Fixture {
        fn command_buffer(&self, usage: QueueUsage) -> CommandBuffer<MockDevice> {
            CommandBuffer::new(self.device.clone(), &self.pool, usage, false).unwrap()
        }

        fn texture(&self) -> Texture<MockDevice> {
            let desc = TextureDescription::sampled(4, 4, PixelFormat::Rgba8Unorm);
            Texture::acquire(self.device.clone(), "t", &desc, vk::Sampler::null()).unwrap()
        }
    }

    fn state_error(err: &anyhow::Error) -> Option<RecordingState> {
        match err.downcast_ref::<BackendError>() {
            Some(BackendError::InvalidState { actual, .. }) => Some(*actual),
            _ => None,
        }
    }

    #[test]
    fn submit_before_recording_is_rejected() {
        let f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        let err = cmd.submit().unwrap_err();
        assert_eq!(state_error(&err), Some(RecordingState::Idle));
        assert_eq!(f.device.count(Call::QueueSubmit), 0);
    }

    #[test]
    fn binds_outside_recording_are_rejected() {
        let mut f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        let pipeline = mock::graphics_pipeline();

        let err = cmd.bind_pipeline(&pipeline, &mut f.stashes).unwrap_err();
        assert_eq!(state_error(&err), Some(RecordingState::Idle));

        cmd.start_recording().unwrap();
        cmd.bind_pipeline(&pipeline, &mut f.stashes).unwrap();
        cmd.end_recording().unwrap();

        let err = cmd.bind_pipeline(&pipeline, &mut f.stashes).unwrap_err();
        assert_eq!(state_error(&err), Some(RecordingState::Recorded));
        assert_eq!(f.device.count(Call::CmdBindPipeline), 1);
    }

    #[test]
    fn double_start_is_rejected() {
        let f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        cmd.start_recording().unwrap();
        let err = cmd.start_recording().unwrap_err();
        assert_eq!(state_error(&err), Some(RecordingState::Recording));
    }

    #[test]
    fn end_recording_clears_bound_state() {
        let mut f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        cmd.start_recording().unwrap();
        cmd.bind_pipeline(&mock::graphics_pipeline(), &mut f.stashes).unwrap();
        assert!(cmd.bound_pipeline().is_some());
        cmd.end_recording().unwrap();
        assert!(cmd.bound_pipeline().is_none());
        assert_eq!(cmd.state(), RecordingState::Recorded);
    }

    #[test]
    fn resubmission_waits_for_the_previous_submission() {
        let f = fixture();
        f.device.set_auto_complete(false);
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);

        cmd.start_recording().unwrap();
        cmd.end_recording().unwrap();
        cmd.submit().unwrap();
        assert!(!cmd.is_completed().unwrap());

        cmd.submit().unwrap();
        let calls = f.device.calls_matching(&[
            Call::QueueSubmit,
            Call::WaitForFence,
            Call::ResetFence,
        ]);
        assert_eq!(
            calls,
            vec![Call::QueueSubmit, Call::WaitForFence, Call::ResetFence, Call::QueueSubmit]
        );

        cmd.wait_for_completion().unwrap();
        assert!(cmd.is_completed().unwrap());
    }

    #[test]
    fn completion_queries_need_a_submission() {
        let f = fixture();
        let cmd = f.command_buffer(QueueUsage::GRAPHICS);
        let err = cmd.is_completed().unwrap_err();
        assert_eq!(err.downcast_ref::<BackendError>(), Some(&BackendError::NeverSubmitted));
        assert!(cmd.wait_for_completion().is_err());
    }

    #[test]
    fn rerecording_a_submitted_list_waits_first() {
        let f = fixture();
        f.device.set_auto_complete(false);
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        cmd.start_recording().unwrap();
        cmd.end_recording().unwrap();
        cmd.submit().unwrap();

        cmd.start_recording().unwrap();
        let calls = f.device.calls_matching(&[Call::WaitForFence, Call::BeginCommandBuffer]);
        assert_eq!(
            calls,
            vec![Call::BeginCommandBuffer, Call::WaitForFence, Call::BeginCommandBuffer]
        );
    }

    #[test]
    fn reset_is_refused_while_in_flight() {
        let f = fixture();
        f.device.set_auto_complete(false);
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        cmd.start_recording().unwrap();
        cmd.end_recording().unwrap();
        cmd.submit().unwrap();

        let err = cmd.reset().unwrap_err();
        assert_eq!(err.downcast_ref::<BackendError>(), Some(&BackendError::InFlight));

        cmd.wait_for_completion().unwrap();
        cmd.reset().unwrap();
        assert_eq!(cmd.state(), RecordingState::Idle);
    }

    #[test]
    fn release_is_idempotent_and_terminal() {
        let f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        cmd.release();
        cmd.release();
        drop(cmd);
        assert_eq!(f.device.count(Call::FreeCommandBuffer), 1);
        assert_eq!(f.device.count(Call::DestroyFence), 1);

        let mut released = f.command_buffer(QueueUsage::GRAPHICS);
        released.release();
        let err = released.start_recording().unwrap_err();
        assert_eq!(state_error(&err), Some(RecordingState::Released));
    }

    #[test]
    fn texture_binding_converges_on_shader_read() {
        let mut f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        let mut texture = f.texture();
        let set = vk::DescriptorSet::null();

        cmd.start_recording().unwrap();
        cmd.bind_pipeline(&mock::graphics_pipeline(), &mut f.stashes).unwrap();
        cmd.bind_texture(&mut texture, ImageAccess::ShaderRead, 0, set).unwrap();
        assert_eq!(texture.layout(), ImageLayout::ShaderRead);
        assert_eq!(f.device.count(Call::CmdImageBarrier), 1);

        cmd.bind_texture(&mut texture, ImageAccess::ShaderRead, 0, set).unwrap();
        assert_eq!(f.device.count(Call::CmdImageBarrier), 1);
        assert_eq!(f.device.count(Call::CmdBindDescriptorSet), 2);
    }

    #[test]
    fn transitions_inside_a_render_pass_are_refused() {
        let mut f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        let mut texture = f.texture();

        cmd.start_recording().unwrap();
        cmd.bind_pipeline(&mock::graphics_pipeline(), &mut f.stashes).unwrap();
        cmd.begin_render_pass(&RenderPassBegin {
            render_pass: cmd.bound_pipeline().and_then(|b| b.render_pass).unwrap(),
            framebuffer: vk::Framebuffer::null(),
            extent: vk::Extent2D { width: 4, height: 4 },
            clear_values: vec![],
        })
        .unwrap();

        let err = cmd
            .bind_texture(&mut texture, ImageAccess::ShaderRead, 0, vk::DescriptorSet::null())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::InsideRenderPass { .. })
        ));
        assert_eq!(texture.layout(), ImageLayout::Undefined);
    }

    #[test]
    fn draws_need_a_graphics_pipeline_and_render_pass() {
        let mut f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::GRAPHICS);
        cmd.start_recording().unwrap();

        let err = cmd.draw(3).unwrap_err();
        assert_eq!(err.downcast_ref::<BackendError>(), Some(&BackendError::NoBoundPipeline("draw")));

        cmd.bind_pipeline(&mock::graphics_pipeline(), &mut f.stashes).unwrap();
        let err = cmd.draw(3).unwrap_err();
        assert_eq!(
            err.downcast_ref::<BackendError>(),
            Some(&BackendError::NoRenderPass { operation: "draw" })
        );
        assert_eq!(f.device.count(Call::CmdDraw), 0);
    }

    #[test]
    fn pipeline_kind_must_match_command_usage() {
        let mut f = fixture();
        let mut graphics_only = f.command_buffer(QueueUsage::GRAPHICS);
        graphics_only.start_recording().unwrap();
        let err = graphics_only
            .bind_pipeline(&mock::compute_pipeline(), &mut f.stashes)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BackendError>(),
            Some(&BackendError::UnsupportedUsage(QueueUsage::COMPUTE))
        );

        let mut compute = f.command_buffer(QueueUsage::GRAPHICS | QueueUsage::COMPUTE);
        compute.start_recording().unwrap();
        compute.bind_pipeline(&mock::compute_pipeline(), &mut f.stashes).unwrap();
        compute.dispatch(8, 8, 1).unwrap();
        let err = compute.draw(3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::WrongPipelineKind { .. })
        ));
        assert_eq!(f.device.count(Call::CmdDispatch), 1);
    }

    #[test]
    fn uploads_move_textures_to_transfer_dst_and_keep_staging_alive() {
        let f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::TRANSFER);
        let mut texture = f.texture();
        let staging = Buffer::staging(f.device.clone(), &[0u8; 64]).unwrap();

        cmd.start_recording().unwrap();
        cmd.upload_to_texture(&staging, &mut texture).unwrap();
        cmd.attach_staging(staging);
        cmd.end_recording().unwrap();
        assert_eq!(texture.layout(), ImageLayout::TransferDst);
        assert_eq!(f.device.count(Call::CmdCopyBufferToImage), 1);

        cmd.submit().unwrap();
        assert_eq!(f.device.count(Call::DestroyBuffer), 0);
        assert_eq!(cmd.collect_staging().unwrap(), 1);
        assert_eq!(f.device.count(Call::DestroyBuffer), 1);
    }

    #[test]
    fn copies_check_sizes() {
        let f = fixture();
        let mut cmd = f.command_buffer(QueueUsage::TRANSFER);
        let memory = MemoryType::HOST_VISIBLE;
        let small = Buffer::acquire(f.device.clone(), "a", 16, BufferUsage::TRANSFER_SRC, memory).unwrap();
        let large = Buffer::acquire(f.device.clone(), "b", 32, BufferUsage::TRANSFER_DST, memory).unwrap();

        cmd.start_recording().unwrap();
        let err = cmd.copy_buffer(&small, &large).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::SizeMismatch { .. })
        ));
        assert_eq!(f.device.count(Call::CmdCopyBuffer), 0);
    }
}
