// Shader module cache
//
// Vulkan consumes SPIR-V bytecode. Shaders are looked up by file name in the
// configured shader directory and compiled into modules once. The stage comes
// from the name: `default_vert.spv` or `default.vert.spv` is a vertex shader.

use super::raw::RawDevice;
use crate::types::ShaderStage;
use anyhow::{bail, Context, Result};
use ash::vk;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shader {
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,
}

impl Shader {
    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stage.into()
    }
}

/// Infers the pipeline stage from a shader file name
pub fn stage_from_name(name: &str) -> Option<ShaderStage> {
    let stem = name.strip_suffix(".spv").unwrap_or(name);
    let suffix = stem.rsplit(['_', '.']).next()?;
    match suffix {
        "vert" => Some(ShaderStage::VERTEX),
        "geom" => Some(ShaderStage::GEOMETRY),
        "frag" => Some(ShaderStage::FRAGMENT),
        "comp" => Some(ShaderStage::COMPUTE),
        _ => None,
    }
}

pub struct ShaderStash<D: RawDevice> {
    device: Arc<D>,
    directory: PathBuf,
    shaders: HashMap<String, Shader>,
}

impl<D: RawDevice> ShaderStash<D> {
    pub fn new(device: Arc<D>, directory: impl Into<PathBuf>) -> Self {
        Self {
            device,
            directory: directory.into(),
            shaders: HashMap::new(),
        }
    }

    /// Loads `name` from the shader directory on first use
    pub fn get(&mut self, name: &str) -> Result<Shader> {
        if let Some(shader) = self.shaders.get(name) {
            return Ok(*shader);
        }

        let Some(stage) = stage_from_name(name) else {
            bail!("Cannot infer shader stage from file name '{}'", name);
        };

        let path = self.directory.join(name);
        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open shader {:?}", path))?;
        // read_spv checks the magic number and realigns the words
        let code = ash::util::read_spv(&mut file)
            .with_context(|| format!("Invalid SPIR-V in {:?}", path))?;

        let module = self
            .device
            .create_shader_module(&code)
            .with_context(|| format!("Failed to create shader module for {}", name))?;

        log::debug!("Loaded shader {} ({:?})", name, stage);
        let shader = Shader { module, stage };
        self.shaders.insert(name.to_string(), shader);
        Ok(shader)
    }
}

impl<D: RawDevice> Drop for ShaderStash<D> {
    fn drop(&mut self) {
        for (_, shader) in self.shaders.drain() {
            self.device.destroy_shader_module(shader.module);
        }
    }
}
