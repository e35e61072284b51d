// Stash - find-or-create caches keyed by descriptor values
//
// A hit costs one hash lookup and no device call. A miss runs the creation
// closure once and stores the result only if it succeeded. Entries are never
// evicted; each concrete stash destroys its objects when it is dropped.

use super::layouts::LayoutStash;
use super::pipeline::PipelineStash;
use super::raw::RawDevice;
use super::render_pass::RenderPassStash;
use super::sampler::SamplerStash;
use crate::types::{DescriptorSetLayoutInfo, PipelineInfo};
use anyhow::Result;
use ash::vk;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;

/// Content-addressed map from a descriptor value to a native handle
pub struct Stash<K, V> {
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V: Copy> Stash<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn find_or_try_create<F>(&mut self, key: &K, create: F) -> Result<V>
    where
        F: FnOnce(&K) -> Result<V>,
    {
        if let Some(value) = self.entries.get(key) {
            return Ok(*value);
        }
        let value = create(key)?;
        self.entries.insert(key.clone(), value);
        Ok(value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the stash, handing every value out for destruction
    pub fn drain(&mut self) -> impl Iterator<Item = V> + '_ {
        self.entries.drain().map(|(_, value)| value)
    }
}

impl<K: Eq + Hash + Clone, V: Copy> Default for Stash<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a command list needs to know about its bound pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// None for compute pipelines
    pub render_pass: Option<vk::RenderPass>,
    pub bind_point: vk::PipelineBindPoint,
    pub set_layout: DescriptorSetLayoutInfo,
}

/// The backend's four object caches.
///
/// Field order is drop order: pipelines go before the layouts and render
/// passes they were built from.
pub struct Stashes<D: RawDevice> {
    pub pipelines: PipelineStash<D>,
    pub layouts: LayoutStash<D>,
    pub render_passes: RenderPassStash<D>,
    pub samplers: SamplerStash<D>,
}

impl<D: RawDevice> Stashes<D> {
    pub fn new(device: Arc<D>, shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipelines: PipelineStash::new(device.clone(), shader_dir),
            layouts: LayoutStash::new(device.clone()),
            render_passes: RenderPassStash::new(device.clone()),
            samplers: SamplerStash::new(device),
        }
    }

    /// Resolves a pipeline description and every object it depends on
    pub fn resolve(&mut self, info: &PipelineInfo) -> Result<BoundPipeline> {
        let pipeline = self
            .pipelines
            .find_or_create(info, &mut self.render_passes, &mut self.layouts)?;
        let layout = self.layouts.find_or_create(info.layout())?;
        let (render_pass, bind_point) = match info {
            PipelineInfo::Graphics(graphics) => (
                Some(self.render_passes.find_or_create(&graphics.render_pass)?),
                vk::PipelineBindPoint::GRAPHICS,
            ),
            PipelineInfo::Compute(_) => (None, vk::PipelineBindPoint::COMPUTE),
        };
        Ok(BoundPipeline {
            pipeline,
            layout,
            render_pass,
            bind_point,
            set_layout: info.layout().set_layout.clone(),
        })
    }
}
