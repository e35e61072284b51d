// Descriptor set layout + pipeline layout cache
//
// Each resource owns its own descriptor set built from the pipeline's one
// set layout and is bound at its own set index. The pipeline layout therefore
// repeats that set layout once per shader object so every index in
// 0..shader_objects.len() is addressable.

use super::raw::RawDevice;
use super::stash::Stash;
use crate::types::{DescriptorSetLayoutInfo, PipelineLayoutInfo};
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

pub struct LayoutStash<D: RawDevice> {
    device: Arc<D>,
    pipeline_layouts: Stash<PipelineLayoutInfo, vk::PipelineLayout>,
    set_layouts: Stash<DescriptorSetLayoutInfo, vk::DescriptorSetLayout>,
}

impl<D: RawDevice> LayoutStash<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            pipeline_layouts: Stash::new(),
            set_layouts: Stash::new(),
        }
    }

    pub fn find_or_create_set_layout(
        &mut self,
        info: &DescriptorSetLayoutInfo,
    ) -> Result<vk::DescriptorSetLayout> {
        let device = &self.device;
        self.set_layouts.find_or_try_create(info, |info| {
            log::debug!("Creating descriptor set layout with {} bindings", info.shader_objects.len());
            let bindings: Vec<_> = info
                .shader_objects
                .iter()
                .map(|object| {
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(object.binding)
                        .descriptor_type(object.kind.into())
                        .descriptor_count(1)
                        .stage_flags(object.stages.into())
                        .build()
                })
                .collect();
            let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            device
                .create_descriptor_set_layout(&create_info)
                .context("Failed to create descriptor set layout")
        })
    }

    pub fn find_or_create(&mut self, info: &PipelineLayoutInfo) -> Result<vk::PipelineLayout> {
        if let Some(layout) = self.pipeline_layouts.get(info) {
            return Ok(layout);
        }

        let set_layouts = if info.set_layout.shader_objects.is_empty() {
            Vec::new()
        } else {
            let set_layout = self.find_or_create_set_layout(&info.set_layout)?;
            vec![set_layout; info.set_layout.shader_objects.len()]
        };

        let device = &self.device;
        self.pipeline_layouts.find_or_try_create(info, |info| {
            log::debug!(
                "Creating pipeline layout: {} sets, {} push constant ranges",
                set_layouts.len(),
                info.push_constant_ranges.len()
            );
            let ranges: Vec<_> = info
                .push_constant_ranges
                .iter()
                .map(|range| vk::PushConstantRange {
                    stage_flags: range.stages.into(),
                    offset: range.offset,
                    size: range.size,
                })
                .collect();
            let create_info = vk::PipelineLayoutCreateInfo::builder()
                .set_layouts(&set_layouts)
                .push_constant_ranges(&ranges);
            device
                .create_pipeline_layout(&create_info)
                .context("Failed to create pipeline layout")
        })
    }
}

impl<D: RawDevice> Drop for LayoutStash<D> {
    fn drop(&mut self) {
        for layout in self.pipeline_layouts.drain() {
            self.device.destroy_pipeline_layout(layout);
        }
        for layout in self.set_layouts.drain() {
            self.device.destroy_descriptor_set_layout(layout);
        }
    }
}
