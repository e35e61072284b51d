// Textures
//
// One optimal-tiling image, one view over all its layers, and the layout the
// image was last left in. The layout only moves when a command list records
// a transition for a bind, a copy, or a render pass.

use super::convert::aspect_of;
use super::descriptor::{DescriptorPool, DescriptorResource};
use super::layouts::LayoutStash;
use super::raw::RawDevice;
use crate::types::{
    DescriptorSetLayoutInfo, ImageLayout, ImageType, PixelFormat, ShaderObjectInfo, ShaderObjectType,
    TextureDescription,
};
use anyhow::{bail, Context, Result};
use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;
use std::path::Path;
use std::sync::Arc;

pub struct Texture<D: RawDevice> {
    device: Arc<D>,
    image: vk::Image,
    allocation: Option<D::Allocation>,
    view: vk::ImageView,
    sampler: vk::Sampler,
    description: TextureDescription,
    layout: ImageLayout,
    descriptor: Option<vk::DescriptorSet>,
}

impl<D: RawDevice> Texture<D> {
    pub fn acquire(
        device: Arc<D>,
        name: &str,
        description: &TextureDescription,
        sampler: vk::Sampler,
    ) -> Result<Self> {
        if description.kind == ImageType::Cube && description.layers != 6 {
            bail!("Cube texture '{}' needs 6 layers, got {}", name, description.layers);
        }
        if description.width == 0 || description.height == 0 || description.layers == 0 {
            bail!("Texture '{}' has an empty extent", name);
        }

        let flags = match description.kind {
            ImageType::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ImageType::Image2d | ImageType::Image2dArray => vk::ImageCreateFlags::empty(),
        };
        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(description.format.into())
            .extent(vk::Extent3D {
                width: description.width,
                height: description.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(description.layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(description.usage.into())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) = device
            .create_image(name, &image_info, MemoryLocation::GpuOnly)
            .with_context(|| format!("Failed to create texture '{}'", name))?;

        let view_type = match description.kind {
            ImageType::Cube => vk::ImageViewType::CUBE,
            ImageType::Image2dArray => vk::ImageViewType::TYPE_2D_ARRAY,
            ImageType::Image2d if description.layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
            ImageType::Image2d => vk::ImageViewType::TYPE_2D,
        };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(description.format.into())
            .subresource_range(subresource_range(description.format, description.layers));

        let view = match device.create_image_view(&view_info) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image, allocation);
                return Err(e.context(format!("Failed to create view for texture '{}'", name)));
            }
        };

        Ok(Self {
            device,
            image,
            allocation: Some(allocation),
            view,
            sampler,
            description: *description,
            layout: ImageLayout::Undefined,
            descriptor: None,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn description(&self) -> &TextureDescription {
        &self.description
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// Only command lists move the layout, as they record the barrier
    pub(crate) fn set_layout(&mut self, layout: ImageLayout) {
        self.layout = layout;
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        subresource_range(self.description.format, self.description.layers)
    }

    /// The descriptor set this texture binds through, written for `object`
    pub fn descriptor_set(
        &mut self,
        set_layout: &DescriptorSetLayoutInfo,
        object: &ShaderObjectInfo,
        pool: &mut DescriptorPool<D>,
        layouts: &mut LayoutStash<D>,
    ) -> Result<vk::DescriptorSet> {
        let image_layout = match object.kind {
            ShaderObjectType::StorageImage => vk::ImageLayout::GENERAL,
            _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let set = pool.materialize(&mut self.descriptor, set_layout, layouts)?;
        pool.write(
            set,
            object,
            self.view.as_raw(),
            DescriptorResource::Image {
                view: self.view,
                sampler: self.sampler,
                layout: image_layout,
            },
        );
        Ok(set)
    }

    /// Frees the view, image and memory (and the descriptor set when a pool
    /// is given). Safe to call more than once.
    pub fn release(&mut self, pool: Option<&mut DescriptorPool<D>>) -> Result<()> {
        if let (Some(set), Some(pool)) = (self.descriptor.take(), pool) {
            pool.free(set)?;
        }
        if self.image == vk::Image::null() {
            return Ok(());
        }
        self.device.destroy_image_view(self.view);
        if let Some(allocation) = self.allocation.take() {
            self.device.destroy_image(self.image, allocation);
        }
        self.view = vk::ImageView::null();
        self.image = vk::Image::null();
        Ok(())
    }
}

impl<D: RawDevice> Drop for Texture<D> {
    fn drop(&mut self) {
        if let Err(e) = self.release(None) {
            log::error!("Failed to release texture: {:?}", e);
        }
    }
}

pub fn subresource_range(format: PixelFormat, layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_of(format),
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers,
    }
}

/// Decoded RGBA8 texels, one layer per file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texels {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub bytes: Vec<u8>,
}

/// Decodes image files into RGBA8 layers. Layers after the first are resized
/// to the first layer's dimensions.
pub fn load_texels<P: AsRef<Path>>(paths: &[P]) -> Result<Texels> {
    let mut texels = Texels {
        width: 0,
        height: 0,
        layers: 0,
        bytes: Vec::new(),
    };

    for path in paths {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to load texture {:?}", path))?
            .to_rgba8();

        let image = if texels.layers == 0 {
            texels.width = image.width();
            texels.height = image.height();
            image
        } else if image.width() != texels.width || image.height() != texels.height {
            log::warn!(
                "Resizing {:?} from {}x{} to {}x{}",
                path,
                image.width(),
                image.height(),
                texels.width,
                texels.height
            );
            image::imageops::resize(&image, texels.width, texels.height, image::imageops::FilterType::Lanczos3)
        } else {
            image
        };

        texels.bytes.extend_from_slice(image.as_raw());
        texels.layers += 1;
    }

    if texels.layers == 0 {
        bail!("No texture files given");
    }
    Ok(texels)
}
