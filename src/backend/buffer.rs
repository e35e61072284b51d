// GPU buffers
//
// One allocation + one VkBuffer, sized once. Host-visible buffers are written
// directly through their mapping; device-local buffers are filled by a copy
// recorded on a transfer command list.

use super::descriptor::{DescriptorPool, DescriptorResource};
use super::error::{ensure, BackendError};
use super::layouts::LayoutStash;
use super::raw::RawDevice;
use crate::types::{BufferUsage, DescriptorSetLayoutInfo, MemoryType, ShaderObjectInfo};
use anyhow::{Context, Result};
use ash::vk;
use ash::vk::Handle;
use std::sync::Arc;

pub struct Buffer<D: RawDevice> {
    device: Arc<D>,
    buffer: vk::Buffer,
    allocation: Option<D::Allocation>,
    size: u64,
    usage: BufferUsage,
    memory: MemoryType,
    descriptor: Option<vk::DescriptorSet>,
}

impl<D: RawDevice> std::fmt::Debug for Buffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("memory", &self.memory)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<D: RawDevice> Buffer<D> {
    pub fn acquire(
        device: Arc<D>,
        name: &str,
        size: u64,
        usage: BufferUsage,
        memory: MemoryType,
    ) -> Result<Self> {
        ensure(size > 0, BackendError::EmptyBuffer(name.to_string()))?;
        let (buffer, allocation) = device
            .create_buffer(name, size, usage.into(), memory.into())
            .with_context(|| format!("Failed to create buffer '{}' ({} bytes)", name, size))?;

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            memory,
            descriptor: None,
        })
    }

    /// Host-visible staging buffer holding `data`
    pub fn staging(device: Arc<D>, data: &[u8]) -> Result<Self> {
        let mut buffer = Self::acquire(
            device,
            "staging",
            data.len() as u64,
            BufferUsage::TRANSFER_SRC,
            MemoryType::HOST_VISIBLE | MemoryType::HOST_COHERENT,
        )?;
        buffer.map_memory(data)?;
        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory.contains(MemoryType::HOST_VISIBLE)
    }

    /// Writes the whole buffer
    pub fn map_memory(&mut self, data: &[u8]) -> Result<()> {
        ensure(
            data.len() as u64 == self.size,
            BackendError::SizeMismatch {
                expected: self.size,
                actual: data.len() as u64,
            },
        )?;
        self.copy_to_buffer(data, 0)
    }

    /// Writes `data` at `offset`
    pub fn copy_to_buffer(&mut self, data: &[u8], offset: u64) -> Result<()> {
        ensure(self.is_host_visible(), BackendError::NotHostVisible)?;
        let len = data.len() as u64;
        ensure(
            offset.checked_add(len).is_some_and(|end| end <= self.size),
            BackendError::OutOfBounds {
                offset,
                len,
                size: self.size,
            },
        )?;

        let allocation = self
            .allocation
            .as_mut()
            .ok_or(BackendError::UnknownHandle("buffer"))?;
        self.device.write_allocation(allocation, offset, data)
    }

    /// The descriptor set this buffer binds through, written for `object`
    pub fn descriptor_set(
        &mut self,
        set_layout: &DescriptorSetLayoutInfo,
        object: &ShaderObjectInfo,
        pool: &mut DescriptorPool<D>,
        layouts: &mut LayoutStash<D>,
    ) -> Result<vk::DescriptorSet> {
        let set = pool.materialize(&mut self.descriptor, set_layout, layouts)?;
        pool.write(
            set,
            object,
            self.buffer.as_raw(),
            DescriptorResource::Buffer {
                buffer: self.buffer,
                range: self.size,
            },
        );
        Ok(set)
    }

    /// Frees the buffer, its memory and (when a pool is given) its descriptor
    /// set. Safe to call more than once.
    pub fn release(&mut self, pool: Option<&mut DescriptorPool<D>>) -> Result<()> {
        if let (Some(set), Some(pool)) = (self.descriptor.take(), pool) {
            pool.free(set)?;
        }
        if self.buffer == vk::Buffer::null() {
            return Ok(());
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.destroy_buffer(self.buffer, allocation);
        }
        self.buffer = vk::Buffer::null();
        Ok(())
    }
}

impl<D: RawDevice> Drop for Buffer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.release(None) {
            log::error!("Failed to release buffer: {:?}", e);
        }
    }
}
