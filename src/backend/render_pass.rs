// Render pass cache
//
// One subpass, every attachment described by the RenderPassInfo. Attachments
// leave the pass in the layout their description names; the initial layout
// is UNDEFINED unless the contents are loaded.

use super::raw::RawDevice;
use super::stash::Stash;
use crate::types::{Attachment, AttachmentType, LoadOp, RenderPassInfo};
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

pub struct RenderPassStash<D: RawDevice> {
    device: Arc<D>,
    passes: Stash<RenderPassInfo, vk::RenderPass>,
}

impl<D: RawDevice> RenderPassStash<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            passes: Stash::new(),
        }
    }

    pub fn find_or_create(&mut self, info: &RenderPassInfo) -> Result<vk::RenderPass> {
        let device = &self.device;
        self.passes.find_or_try_create(info, |info| {
            log::debug!("Creating render pass with {} attachments", info.attachments.len());
            create_render_pass(device.as_ref(), info)
        })
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }
}

impl<D: RawDevice> Drop for RenderPassStash<D> {
    fn drop(&mut self) {
        for pass in self.passes.drain() {
            self.device.destroy_render_pass(pass);
        }
    }
}

/// Layout the attachment is used in during the subpass
pub fn attachment_optimal_layout(kind: AttachmentType) -> vk::ImageLayout {
    match kind {
        AttachmentType::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        AttachmentType::Depth | AttachmentType::DepthStencil => {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        }
    }
}

fn describe(attachment: &Attachment) -> vk::AttachmentDescription {
    let initial_layout = match attachment.load_op {
        LoadOp::Load => attachment_optimal_layout(attachment.kind),
        LoadOp::Clear | LoadOp::DontCare => vk::ImageLayout::UNDEFINED,
    };
    let (stencil_load, stencil_store) = match attachment.kind {
        AttachmentType::DepthStencil => (attachment.load_op.into(), attachment.store_op.into()),
        _ => (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE),
    };

    vk::AttachmentDescription::builder()
        .format(attachment.format.into())
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(attachment.load_op.into())
        .store_op(attachment.store_op.into())
        .stencil_load_op(stencil_load)
        .stencil_store_op(stencil_store)
        .initial_layout(initial_layout)
        .final_layout(attachment.layout.into())
        .build()
}

fn create_render_pass<D: RawDevice>(device: &D, info: &RenderPassInfo) -> Result<vk::RenderPass> {
    let attachments: Vec<_> = info.attachments.iter().map(describe).collect();

    let color_refs: Vec<_> = info
        .attachments
        .iter()
        .enumerate()
        .filter(|(_, a)| a.kind == AttachmentType::Color)
        .map(|(i, _)| vk::AttachmentReference {
            attachment: i as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .collect();

    let depth_ref = info
        .attachments
        .iter()
        .position(|a| a.kind != AttachmentType::Color)
        .map(|i| vk::AttachmentReference {
            attachment: i as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass.build()];

    // Wait for the previous user of the attachments before writing them
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();
    let dependencies = [dependency];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    device
        .create_render_pass(&create_info)
        .context("Failed to create render pass")
}
