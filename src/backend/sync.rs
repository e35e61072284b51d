// Synchronization primitives
//
// Semaphores for GPU-GPU ordering between acquire, render and present.
// Completion of a frame's GPU work is tracked by the fence of the command
// list that consumed the frame, not here.

use super::raw::RawDevice;
use anyhow::{Context, Result};
use ash::vk;

/// Semaphore pair for one ring slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSync {
    /// Signaled by acquire, waited on by the frame's submission
    pub image_available: vk::Semaphore,
    /// Signaled by the frame's submission, waited on by present
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new<D: RawDevice>(device: &D) -> Result<Self> {
        let image_available = device
            .create_semaphore()
            .context("Failed to create image-available semaphore")?;
        let render_finished = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(e.context("Failed to create render-finished semaphore"));
            }
        };
        Ok(Self {
            image_available,
            render_finished,
        })
    }

    pub fn destroy<D: RawDevice>(&self, device: &D) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
    }
}
