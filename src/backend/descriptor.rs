// Descriptor pool and set allocator
//
// Sets are cached by their layout description, like the stashes, but come
// from one fixed-size pool. Running out is an error; the pool never grows.
// Resources sharing a layout share the set, so the pool remembers which
// resource last wrote each binding and skips redundant writes.

use super::error::BackendError;
use super::layouts::LayoutStash;
use super::raw::RawDevice;
use crate::types::{DescriptorSetLayoutInfo, ShaderObjectInfo};
use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed pool size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolCapacity {
    pub max_sets: u32,
    /// Per descriptor type
    pub descriptors_per_type: u32,
}

impl Default for PoolCapacity {
    fn default() -> Self {
        Self {
            max_sets: 32,
            descriptors_per_type: 32,
        }
    }
}

/// What a binding points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        range: u64,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

pub struct DescriptorPool<D: RawDevice> {
    device: Arc<D>,
    pool: vk::DescriptorPool,
    capacity: PoolCapacity,
    sets: HashMap<DescriptorSetLayoutInfo, vk::DescriptorSet>,
    /// (set, binding) -> raw handle of the resource written there
    writers: HashMap<(vk::DescriptorSet, u32), u64>,
}

impl<D: RawDevice> DescriptorPool<D> {
    pub fn new(device: Arc<D>, capacity: PoolCapacity) -> Result<Self> {
        let pool_sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::STORAGE_IMAGE,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: capacity.descriptors_per_type,
        });

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(capacity.max_sets)
            .pool_sizes(&pool_sizes);
        let pool = device
            .create_descriptor_pool(&create_info)
            .context("Failed to create descriptor pool")?;

        log::info!(
            "Created descriptor pool: {} sets, {} descriptors per type",
            capacity.max_sets,
            capacity.descriptors_per_type
        );

        Ok(Self {
            device,
            pool,
            capacity,
            sets: HashMap::new(),
            writers: HashMap::new(),
        })
    }

    pub fn find_or_allocate(
        &mut self,
        info: &DescriptorSetLayoutInfo,
        layouts: &mut LayoutStash<D>,
    ) -> Result<vk::DescriptorSet> {
        if let Some(set) = self.sets.get(info) {
            return Ok(*set);
        }
        if self.sets.len() as u32 >= self.capacity.max_sets {
            return Err(BackendError::PoolExhausted(self.capacity.max_sets).into());
        }

        let layout = layouts.find_or_create_set_layout(info)?;
        let set = match self.device.allocate_descriptor_set(self.pool, layout) {
            Ok(set) => set,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                return Err(BackendError::PoolExhausted(self.capacity.max_sets).into());
            }
            Err(e) => return Err(e).context("Failed to allocate descriptor set"),
        };

        self.sets.insert(info.clone(), set);
        Ok(set)
    }

    /// A resource's cached set, re-fetched if another resource freed it
    pub fn materialize(
        &mut self,
        cached: &mut Option<vk::DescriptorSet>,
        info: &DescriptorSetLayoutInfo,
        layouts: &mut LayoutStash<D>,
    ) -> Result<vk::DescriptorSet> {
        if let Some(set) = *cached {
            if self.sets.get(info) == Some(&set) {
                return Ok(set);
            }
        }
        let set = self.find_or_allocate(info, layouts)?;
        *cached = Some(set);
        Ok(set)
    }

    /// Returns the set to the pool. Freeing a set that is not live is a no-op.
    pub fn free(&mut self, set: vk::DescriptorSet) -> Result<()> {
        if !self.is_live(set) {
            return Ok(());
        }
        self.sets.retain(|_, live| *live != set);
        self.writers.retain(|(written, _), _| *written != set);
        self.device
            .free_descriptor_set(self.pool, set)
            .context("Failed to free descriptor set")
    }

    pub fn is_live(&self, set: vk::DescriptorSet) -> bool {
        self.sets.values().any(|live| *live == set)
    }

    pub fn live_sets(&self) -> usize {
        self.sets.len()
    }

    /// Points `object.binding` of `set` at `resource` unless `owner` already did
    pub fn write(
        &mut self,
        set: vk::DescriptorSet,
        object: &ShaderObjectInfo,
        owner: u64,
        resource: DescriptorResource,
    ) -> bool {
        let key = (set, object.binding);
        if self.writers.get(&key) == Some(&owner) {
            return false;
        }

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(object.binding)
            .dst_array_element(0)
            .descriptor_type(object.kind.into());
        match resource {
            DescriptorResource::Buffer { buffer, range } => {
                let infos = [vk::DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range,
                }];
                self.device.write_descriptor_set(&write.buffer_info(&infos));
            }
            DescriptorResource::Image { view, sampler, layout } => {
                let infos = [vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                }];
                self.device.write_descriptor_set(&write.image_info(&infos));
            }
        }

        self.writers.insert(key, owner);
        true
    }
}

impl<D: RawDevice> Drop for DescriptorPool<D> {
    fn drop(&mut self) {
        // Destroying the pool frees every set still allocated from it
        self.device.destroy_descriptor_pool(self.pool);
    }
}
