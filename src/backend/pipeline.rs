// Pipeline cache
//
// Graphics and compute pipelines keyed by their full description. A miss
// resolves shaders by name, then the render pass, then the pipeline layout
// (which resolves its descriptor set layout), then builds the fixed-function
// state. The fixed-function defaults below are shared by every pipeline:
// depth test LESS, single sample, no blending, back-face culling, clockwise
// front faces. Viewport and scissor are dynamic; the pipeline extent only
// provides the baked-in defaults.

use super::layouts::LayoutStash;
use super::raw::RawDevice;
use super::render_pass::RenderPassStash;
use super::shader::ShaderStash;
use super::stash::Stash;
use crate::types::{ComputePipelineInfo, GraphicsPipelineInfo, PipelineInfo, ShaderStage, Vertex};
use anyhow::{bail, Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::mem::{offset_of, size_of};
use std::path::PathBuf;
use std::sync::Arc;

const SHADER_ENTRY: &CStr = c"main";

const DYNAMIC_STATES: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Field order is drop order: pipelines before their shader modules.
pub struct PipelineStash<D: RawDevice> {
    device: Arc<D>,
    pipelines: Stash<PipelineInfo, vk::Pipeline>,
    shaders: ShaderStash<D>,
}

impl<D: RawDevice> PipelineStash<D> {
    pub fn new(device: Arc<D>, shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shaders: ShaderStash::new(device.clone(), shader_dir),
            device,
            pipelines: Stash::new(),
        }
    }

    pub fn find_or_create(
        &mut self,
        info: &PipelineInfo,
        render_passes: &mut RenderPassStash<D>,
        layouts: &mut LayoutStash<D>,
    ) -> Result<vk::Pipeline> {
        let device = &self.device;
        let shaders = &mut self.shaders;
        self.pipelines.find_or_try_create(info, |info| match info {
            PipelineInfo::Graphics(graphics) => {
                create_graphics_pipeline(device.as_ref(), graphics, shaders, render_passes, layouts)
            }
            PipelineInfo::Compute(compute) => {
                create_compute_pipeline(device.as_ref(), compute, shaders, layouts)
            }
        })
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }
}

impl<D: RawDevice> Drop for PipelineStash<D> {
    fn drop(&mut self) {
        for pipeline in self.pipelines.drain() {
            self.device.destroy_pipeline(pipeline);
        }
    }
}

/// Vertex input for the fixed `Vertex` layout: position, color, uv, normal
pub fn vertex_input_description() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 4],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };

    let attribute = |location: u32, format: vk::Format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    };

    let attributes = [
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, color)),
        attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, uv)),
        attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
    ];

    (binding, attributes)
}

fn create_graphics_pipeline<D: RawDevice>(
    device: &D,
    info: &GraphicsPipelineInfo,
    shaders: &mut ShaderStash<D>,
    render_passes: &mut RenderPassStash<D>,
    layouts: &mut LayoutStash<D>,
) -> Result<vk::Pipeline> {
    log::debug!("Creating graphics pipeline from {:?}", info.shaders);

    // Step 1: Shaders
    let mut stages = Vec::with_capacity(info.shaders.len());
    for name in &info.shaders {
        let shader = shaders.get(name)?;
        if shader.stage == ShaderStage::COMPUTE {
            bail!("Compute shader '{}' used in a graphics pipeline", name);
        }
        stages.push(
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(shader.stage_flags())
                .module(shader.module)
                .name(SHADER_ENTRY)
                .build(),
        );
    }

    // Step 2: Render pass and layout
    let render_pass = render_passes.find_or_create(&info.render_pass)?;
    let layout = layouts.find_or_create(&info.layout)?;

    // Step 3: Fixed-function state
    let (binding, attributes) = vertex_input_description();
    let bindings = [binding];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(info.primitive.into())
        .primitive_restart_enable(false);

    let extent: vk::Extent2D = info.extent.into();
    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(info.polygon_mode.into())
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // One opaque blend state per color attachment
    let blend_attachments = vec![
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();
        info.render_pass.color_count()
    ];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

    // Step 4: Pipeline
    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    device
        .create_graphics_pipeline(&create_info)
        .context("Failed to create graphics pipeline")
}

fn create_compute_pipeline<D: RawDevice>(
    device: &D,
    info: &ComputePipelineInfo,
    shaders: &mut ShaderStash<D>,
    layouts: &mut LayoutStash<D>,
) -> Result<vk::Pipeline> {
    log::debug!("Creating compute pipeline from {}", info.shader);

    let shader = shaders.get(&info.shader)?;
    if shader.stage != ShaderStage::COMPUTE {
        bail!("Shader '{}' is not a compute shader", info.shader);
    }
    let layout = layouts.find_or_create(&info.layout)?;

    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader.module)
        .name(SHADER_ENTRY)
        .build();
    let create_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout);

    device
        .create_compute_pipeline(&create_info)
        .context("Failed to create compute pipeline")
}
