// Named pipelines declared ahead of time
//
// `pipelines.toml` holds a list of `[[pipeline]]` entries, each a name plus a
// full pipeline description. Entries marked `swapchain_target` leave their
// render pass and extent empty; those are filled from the live swapchain at
// bind time, so a resize changes the resolved description and the stash
// hands out a matching pipeline.

use crate::backend::BackendError;
use crate::interface::RenderBackend;
use crate::types::{GraphicsPipelineInfo, PipelineInfo, PipelineLayoutInfo, PushConstantRange, ShaderStage};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Name of the pipeline that always exists
pub const DEFAULT_PIPELINE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticPipeline {
    pub name: String,
    /// Render into the swapchain images instead of a declared render pass
    #[serde(default)]
    pub swapchain_target: bool,
    /// Adds a depth attachment to the swapchain render pass
    #[serde(default)]
    pub depth: bool,
    pub info: PipelineInfo,
}

impl StaticPipeline {
    /// The description to bind, with swapchain targets filled in
    pub fn resolve(&self, backend: &dyn RenderBackend) -> PipelineInfo {
        match &self.info {
            PipelineInfo::Graphics(graphics) if self.swapchain_target => PipelineInfo::Graphics(GraphicsPipelineInfo {
                render_pass: backend.swapchain_render_pass(self.depth),
                extent: backend.swapchain_extent(),
                ..graphics.clone()
            }),
            info => info.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PipelineFile {
    #[serde(default)]
    pipeline: Vec<StaticPipeline>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticPipelines {
    pipelines: HashMap<String, StaticPipeline>,
}

impl StaticPipelines {
    /// Just the built-in default pipeline
    pub fn builtin() -> Self {
        let mut pipelines = Self::default();
        pipelines.insert(default_pipeline());
        pipelines
    }

    /// Reads `path`, or falls back to the built-ins when it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No pipeline file at {:?}, using the built-in pipelines", path);
            return Ok(Self::builtin());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {:?}", path))?;
        let pipelines = Self::from_toml(&text)
            .with_context(|| format!("Failed to parse pipeline file: {:?}", path))?;
        log::info!("Loaded {} static pipelines from {:?}", pipelines.len(), path);
        Ok(pipelines)
    }

    /// Parses pipeline declarations. The built-in default is kept unless the
    /// text overrides it.
    pub fn from_toml(text: &str) -> Result<Self> {
        let file: PipelineFile = toml::from_str(text)?;
        let mut pipelines = Self::builtin();
        for pipeline in file.pipeline {
            if pipelines.pipelines.contains_key(&pipeline.name) && pipeline.name != DEFAULT_PIPELINE {
                log::warn!("Static pipeline '{}' is declared twice, keeping the last", pipeline.name);
            }
            pipelines.insert(pipeline);
        }
        Ok(pipelines)
    }

    pub fn insert(&mut self, pipeline: StaticPipeline) {
        self.pipelines.insert(pipeline.name.clone(), pipeline);
    }

    pub fn get(&self, name: &str) -> Result<&StaticPipeline, BackendError> {
        self.pipelines
            .get(name)
            .ok_or_else(|| BackendError::UnknownStaticPipeline(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// Vertex-colored geometry with a 64-byte MVP push constant
fn default_pipeline() -> StaticPipeline {
    StaticPipeline {
        name: DEFAULT_PIPELINE.to_string(),
        swapchain_target: true,
        depth: true,
        info: PipelineInfo::Graphics(GraphicsPipelineInfo {
            shaders: vec!["default_vert.spv".to_string(), "default_frag.spv".to_string()],
            render_pass: Default::default(),
            layout: PipelineLayoutInfo {
                push_constant_ranges: vec![PushConstantRange {
                    stages: ShaderStage::VERTEX,
                    offset: 0,
                    size: 64,
                }],
                set_layout: Default::default(),
            },
            primitive: Default::default(),
            polygon_mode: Default::default(),
            extent: Default::default(),
        }),
    }
}
