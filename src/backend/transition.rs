// Image layout transition table
//
// Textures change layout only as a side effect of how they are used next.
// `required` maps (tracked layout, intended access) to the barrier that has
// to be recorded first, or None when the texture is already in place.

use crate::types::{ImageLayout, QueueUsage};
use ash::vk;

/// How a command is about to touch an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAccess {
    /// Sampled from a shader
    ShaderRead,
    /// Bound as a storage image
    StorageReadWrite,
    /// Destination of a buffer-to-image copy
    TransferDst,
    TransferSrc,
    ColorAttachment,
    DepthAttachment,
}

impl ImageAccess {
    pub const ALL: [ImageAccess; 6] = [
        ImageAccess::ShaderRead,
        ImageAccess::StorageReadWrite,
        ImageAccess::TransferDst,
        ImageAccess::TransferSrc,
        ImageAccess::ColorAttachment,
        ImageAccess::DepthAttachment,
    ];

    /// Layout the image must be in for this access
    pub fn layout(self) -> ImageLayout {
        match self {
            ImageAccess::ShaderRead => ImageLayout::ShaderRead,
            ImageAccess::StorageReadWrite => ImageLayout::General,
            ImageAccess::TransferDst => ImageLayout::TransferDst,
            ImageAccess::TransferSrc => ImageLayout::TransferSrc,
            ImageAccess::ColorAttachment => ImageLayout::Color,
            ImageAccess::DepthAttachment => ImageLayout::DepthStencil,
        }
    }

    fn destination_scope(self) -> (vk::AccessFlags, vk::PipelineStageFlags) {
        match self {
            ImageAccess::ShaderRead => (
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::VERTEX_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::COMPUTE_SHADER,
            ),
            ImageAccess::StorageReadWrite => (
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
            ),
            ImageAccess::TransferDst => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
            ImageAccess::TransferSrc => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
            ImageAccess::ColorAttachment => (
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            ImageAccess::DepthAttachment => (
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            ),
        }
    }
}

/// Work that may still touch an image in `layout`
fn source_scope(layout: ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        ImageLayout::Undefined | ImageLayout::Presentation => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        }
        ImageLayout::General => (
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        ImageLayout::Color => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ImageLayout::TransferSrc => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        ImageLayout::TransferDst => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        ImageLayout::ShaderRead => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        ImageLayout::DepthStencil => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub old: ImageLayout,
    pub new: ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

const GRAPHICS_ONLY_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

impl Transition {
    /// Drops stages the recording queue cannot execute.
    ///
    /// Compute and transfer queues reject graphics stages in barriers; an
    /// emptied mask falls back to TOP_OF_PIPE / BOTTOM_OF_PIPE.
    pub fn for_queue(mut self, usage: QueueUsage) -> Self {
        if usage.contains(QueueUsage::GRAPHICS) {
            return self;
        }
        let mut src = self.src_stage & !GRAPHICS_ONLY_STAGES;
        let mut dst = self.dst_stage & !GRAPHICS_ONLY_STAGES;
        if !usage.contains(QueueUsage::COMPUTE) {
            src &= !vk::PipelineStageFlags::COMPUTE_SHADER;
            dst &= !vk::PipelineStageFlags::COMPUTE_SHADER;
        }
        if src.is_empty() {
            src = vk::PipelineStageFlags::TOP_OF_PIPE;
            self.src_access = vk::AccessFlags::empty();
        }
        if dst.is_empty() {
            dst = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
            self.dst_access = vk::AccessFlags::empty();
        }
        self.src_stage = src;
        self.dst_stage = dst;
        self
    }
}

/// The barrier needed before `access`, if any
pub fn required(current: ImageLayout, access: ImageAccess) -> Option<Transition> {
    let new = access.layout();
    if current == new {
        return None;
    }
    let (src_access, src_stage) = source_scope(current);
    let (dst_access, dst_stage) = access.destination_scope();
    Some(Transition {
        old: current,
        new,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pair_converges_in_one_step() {
        for layout in ImageLayout::ALL {
            for access in ImageAccess::ALL {
                match required(layout, access) {
                    None => assert_eq!(layout, access.layout(), "{layout:?} -> {access:?}"),
                    Some(t) => {
                        assert_ne!(layout, access.layout());
                        assert_eq!(t.old, layout);
                        assert_eq!(t.new, access.layout());
                        assert!(!t.dst_stage.is_empty());
                        assert!(!t.src_stage.is_empty());
                        // Applying the transition leaves nothing left to do
                        assert_eq!(required(t.new, access), None);
                    }
                }
            }
        }
    }

    #[test]
    fn undefined_sources_wait_on_nothing() {
        let t = required(ImageLayout::Undefined, ImageAccess::TransferDst).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn upload_then_sample_waits_on_the_copy() {
        let t = required(ImageLayout::TransferDst, ImageAccess::ShaderRead).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert!(t.dst_access.contains(vk::AccessFlags::SHADER_READ));
    }

    #[test]
    fn transfer_queue_barriers_drop_shader_stages() {
        let t = required(ImageLayout::ShaderRead, ImageAccess::TransferDst)
            .unwrap()
            .for_queue(QueueUsage::TRANSFER);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let compute = required(ImageLayout::TransferDst, ImageAccess::ShaderRead)
            .unwrap()
            .for_queue(QueueUsage::COMPUTE);
        assert_eq!(compute.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);

        let graphics = required(ImageLayout::TransferDst, ImageAccess::ShaderRead).unwrap();
        assert_eq!(graphics.for_queue(QueueUsage::GRAPHICS), graphics);
    }
}
