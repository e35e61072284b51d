// Sampler cache

use super::raw::RawDevice;
use super::stash::Stash;
use crate::types::SamplerInfo;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

pub struct SamplerStash<D: RawDevice> {
    device: Arc<D>,
    samplers: Stash<SamplerInfo, vk::Sampler>,
}

impl<D: RawDevice> SamplerStash<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            samplers: Stash::new(),
        }
    }

    pub fn find_or_create(&mut self, info: &SamplerInfo) -> Result<vk::Sampler> {
        let device = &self.device;
        self.samplers.find_or_try_create(info, |info| {
            let address_mode: vk::SamplerAddressMode = info.address_mode.into();
            let create_info = vk::SamplerCreateInfo::builder()
                .mag_filter(info.mag_filter.into())
                .min_filter(info.min_filter.into())
                .address_mode_u(address_mode)
                .address_mode_v(address_mode)
                .address_mode_w(address_mode)
                .anisotropy_enable(info.use_anisotropy)
                .max_anisotropy(info.max_anisotropy)
                .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
                .unnormalized_coordinates(false)
                .compare_enable(false)
                .compare_op(vk::CompareOp::ALWAYS)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .mip_lod_bias(0.0)
                .min_lod(0.0)
                .max_lod(0.0);
            device
                .create_sampler(&create_info)
                .context("Failed to create sampler")
        })
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }
}

impl<D: RawDevice> Drop for SamplerStash<D> {
    fn drop(&mut self) {
        for sampler in self.samplers.drain() {
            self.device.destroy_sampler(sampler);
        }
    }
}
