// Swapchain - Window presentation
//
// Owns the chain of images we render to and present, one shared depth
// buffer, and a ring of MAX_FRAMES_IN_FLIGHT semaphore pairs. Each slot
// remembers which command list consumed it so the next use of the slot can
// wait for that list before touching its semaphores again.

use super::convert::pixel_format_of;
use super::error::BackendError;
use super::raw::RawDevice;
use super::sync::FrameSync;
use super::texture::Texture;
use crate::handles::CmdListHandle;
use crate::types::{
    Attachment, AttachmentType, Extent, ImageLayout, ImageType, ImageUsage, LoadOp, PixelFormat, RenderPassInfo,
    StoreOp, SwapchainInfo, TextureDescription,
};
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

pub const DEPTH_FORMAT: PixelFormat = PixelFormat::D32Sfloat;

pub struct Swapchain<D: RawDevice> {
    device: Arc<D>,
    info: SwapchainInfo,
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<Texture<D>>,

    // Framebuffers belong to the render pass they were built against
    framebuffers: Vec<vk::Framebuffer>,
    framebuffer_pass: vk::RenderPass,

    frames: Vec<FrameSync>,
    frame: usize,
    image_index: Option<u32>,
    consumers: [Option<CmdListHandle>; MAX_FRAMES_IN_FLIGHT],
    needs_rebuild: bool,
}

impl<D: RawDevice> Swapchain<D> {
    pub fn new(device: Arc<D>, info: SwapchainInfo) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", info.extent.width, info.extent.height);

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            match FrameSync::new(device.as_ref()) {
                Ok(sync) => frames.push(sync),
                Err(e) => {
                    frames.iter().for_each(|sync| sync.destroy(device.as_ref()));
                    return Err(e);
                }
            }
        }

        let mut swapchain = Self {
            device,
            info,
            handle: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            framebuffer_pass: vk::RenderPass::null(),
            frames,
            frame: 0,
            image_index: None,
            consumers: [None; MAX_FRAMES_IN_FLIGHT],
            needs_rebuild: false,
        };
        // Drop cleans up whatever was built if this fails
        swapchain.build()?;
        Ok(swapchain)
    }

    /// (Re)creates the chain, its views and the depth buffer for `self.info`
    fn build(&mut self) -> Result<()> {
        let created = self
            .device
            .create_swapchain(&self.info, self.handle)
            .context("Failed to create swapchain")?;
        if self.handle != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.handle);
        }

        self.handle = created.handle;
        self.format = created.format;
        self.extent = created.extent;
        self.images = created.images;
        log::info!(
            "Created swapchain with {} images ({}x{}, {:?})",
            self.images.len(),
            self.extent.width,
            self.extent.height,
            self.format
        );

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = self
                .device
                .create_image_view(&view_info)
                .context("Failed to create swapchain image view")?;
            self.views.push(view);
        }

        let depth = TextureDescription {
            width: self.extent.width,
            height: self.extent.height,
            kind: ImageType::Image2d,
            format: DEPTH_FORMAT,
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT,
            layers: 1,
        };
        self.depth = Some(Texture::acquire(
            self.device.clone(),
            "swapchain depth",
            &depth,
            vk::Sampler::null(),
        )?);
        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        self.framebuffer_pass = vk::RenderPass::null();
    }

    fn destroy_views(&mut self) {
        for view in self.views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.depth = None;
    }

    /// Recreates the chain after a resize or an out-of-date report.
    /// The caller guarantees the GPU is idle.
    pub fn rebuild(&mut self) -> Result<()> {
        self.destroy_framebuffers();
        self.destroy_views();
        self.image_index = None;
        self.build()?;
        self.needs_rebuild = false;
        Ok(())
    }

    /// New window size; takes effect on the next rebuild
    pub fn resize(&mut self, extent: Extent) {
        if extent != self.info.extent {
            self.info.extent = extent;
            self.needs_rebuild = true;
        }
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// The color format the chain was actually created with
    pub fn format(&self) -> PixelFormat {
        pixel_format_of(self.format).unwrap_or(self.info.format)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn current_frame(&self) -> usize {
        self.frame
    }

    pub fn frame_sync(&self) -> FrameSync {
        self.frames[self.frame]
    }

    /// The command list that last consumed the current slot
    pub fn slot_consumer(&self) -> Option<CmdListHandle> {
        self.consumers[self.frame]
    }

    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    /// Render pass description that targets the swapchain images
    pub fn render_pass_info(&self, want_depth: bool) -> RenderPassInfo {
        let mut attachments = vec![Attachment {
            format: self.format(),
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            kind: AttachmentType::Color,
            layout: ImageLayout::Presentation,
        }];
        if want_depth {
            attachments.push(Attachment {
                format: DEPTH_FORMAT,
                load_op: LoadOp::Clear,
                store_op: StoreOp::DontCare,
                kind: AttachmentType::Depth,
                layout: ImageLayout::DepthStencil,
            });
        }
        RenderPassInfo { attachments }
    }

    /// Acquires the next image for `consumer`. Repeated calls within one
    /// frame return the same image.
    pub fn acquire_image(&mut self, consumer: CmdListHandle) -> Result<u32> {
        if let Some(index) = self.image_index {
            self.consumers[self.frame] = Some(consumer);
            return Ok(index);
        }

        let semaphore = self.frames[self.frame].image_available;
        match self.device.acquire_next_image(self.handle, semaphore) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain is suboptimal, rebuilding next frame");
                    self.needs_rebuild = true;
                }
                self.image_index = Some(index);
                self.consumers[self.frame] = Some(consumer);
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_rebuild = true;
                Err(BackendError::SwapchainOutOfDate.into())
            }
            Err(e) => Err(anyhow::Error::from(e).context("Failed to acquire swapchain image")),
        }
    }

    /// Builds one framebuffer per image for `render_pass`, unless they
    /// already target it
    pub fn init_framebuffers(&mut self, info: &RenderPassInfo, render_pass: vk::RenderPass) -> Result<()> {
        if render_pass == self.framebuffer_pass && !self.framebuffers.is_empty() {
            return Ok(());
        }
        self.destroy_framebuffers();

        let depth_view = match (&self.depth, info.has_depth()) {
            (Some(depth), true) => Some(depth.view()),
            _ => None,
        };

        for &view in &self.views {
            let attachments: Vec<_> = std::iter::once(view).chain(depth_view).collect();
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = self
                .device
                .create_framebuffer(&framebuffer_info)
                .context("Failed to create swapchain framebuffer")?;
            self.framebuffers.push(framebuffer);
        }
        self.framebuffer_pass = render_pass;
        Ok(())
    }

    /// Framebuffer of the acquired image
    pub fn current_framebuffer(&self) -> Result<vk::Framebuffer, BackendError> {
        let index = self.image_index.ok_or(BackendError::NoAcquiredImage)?;
        self.framebuffers
            .get(index as usize)
            .copied()
            .ok_or(BackendError::NoAcquiredImage)
    }

    /// Presents the acquired image once the slot's render-done semaphore
    /// fires, then advances the ring
    pub fn present(&mut self) -> Result<()> {
        let index = self.image_index.ok_or(BackendError::NoAcquiredImage)?;
        let queue = self.device.queues().present()?.queue;
        let wait = self.frames[self.frame].render_finished;

        match self.device.queue_present(queue, self.handle, index, wait) {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date after present, rebuilding next frame");
                self.needs_rebuild = true;
            }
            Err(e) => return Err(anyhow::Error::from(e).context("Failed to present")),
        }

        self.image_index = None;
        self.frame = (self.frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(())
    }
}

impl<D: RawDevice> Drop for Swapchain<D> {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        self.destroy_views();
        for sync in self.frames.drain(..) {
            sync.destroy(self.device.as_ref());
        }
        if self.handle != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.handle);
        }
    }
}
