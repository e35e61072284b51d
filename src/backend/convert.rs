// Descriptor value -> Vulkan enum conversions

use crate::types::*;
use ash::vk;
use gpu_allocator::MemoryLocation;

impl From<PixelFormat> for vk::Format {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            PixelFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            PixelFormat::D32Sfloat => vk::Format::D32_SFLOAT,
        }
    }
}

impl From<ColorSpace> for vk::ColorSpaceKHR {
    fn from(space: ColorSpace) -> Self {
        match space {
            ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }
}

impl From<PresentMode> for vk::PresentModeKHR {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

impl From<LoadOp> for vk::AttachmentLoadOp {
    fn from(op: LoadOp) -> Self {
        match op {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl From<StoreOp> for vk::AttachmentStoreOp {
    fn from(op: StoreOp) -> Self {
        match op {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

impl From<ImageLayout> for vk::ImageLayout {
    fn from(layout: ImageLayout) -> Self {
        match layout {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::General => vk::ImageLayout::GENERAL,
            ImageLayout::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::Presentation => vk::ImageLayout::PRESENT_SRC_KHR,
            ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::DepthStencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

impl From<DrawPrimitive> for vk::PrimitiveTopology {
    fn from(primitive: DrawPrimitive) -> Self {
        match primitive {
            DrawPrimitive::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
            DrawPrimitive::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            DrawPrimitive::Lines => vk::PrimitiveTopology::LINE_LIST,
            DrawPrimitive::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            DrawPrimitive::Points => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

impl From<PolygonMode> for vk::PolygonMode {
    fn from(mode: PolygonMode) -> Self {
        match mode {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
            PolygonMode::Point => vk::PolygonMode::POINT,
        }
    }
}

impl From<ShaderObjectType> for vk::DescriptorType {
    fn from(kind: ShaderObjectType) -> Self {
        match kind {
            ShaderObjectType::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            ShaderObjectType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ShaderObjectType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            ShaderObjectType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

impl From<Filter> for vk::Filter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
            Filter::Cubic => vk::Filter::CUBIC_EXT,
        }
    }
}

impl From<AddressMode> for vk::SamplerAddressMode {
    fn from(mode: AddressMode) -> Self {
        match mode {
            AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
            AddressMode::MirrorClampToEdge => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
        }
    }
}

impl From<IndexType> for vk::IndexType {
    fn from(kind: IndexType) -> Self {
        match kind {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

impl From<Extent> for vk::Extent2D {
    fn from(extent: Extent) -> Self {
        vk::Extent2D {
            width: extent.width,
            height: extent.height,
        }
    }
}

impl From<Rectangle> for vk::Rect2D {
    fn from(rect: Rectangle) -> Self {
        vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.offset[0],
                y: rect.offset[1],
            },
            extent: rect.extent.into(),
        }
    }
}

impl From<Viewport> for vk::Viewport {
    fn from(viewport: Viewport) -> Self {
        vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        }
    }
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stages: ShaderStage) -> Self {
        if stages.contains(ShaderStage::ALL) {
            return vk::ShaderStageFlags::ALL;
        }
        if stages == ShaderStage::ALL_GRAPHICS {
            return vk::ShaderStageFlags::ALL_GRAPHICS;
        }
        let mut flags = vk::ShaderStageFlags::empty();
        if stages.contains(ShaderStage::VERTEX) {
            flags |= vk::ShaderStageFlags::VERTEX;
        }
        if stages.contains(ShaderStage::GEOMETRY) {
            flags |= vk::ShaderStageFlags::GEOMETRY;
        }
        if stages.contains(ShaderStage::FRAGMENT) {
            flags |= vk::ShaderStageFlags::FRAGMENT;
        }
        if stages.contains(ShaderStage::COMPUTE) {
            flags |= vk::ShaderStageFlags::COMPUTE;
        }
        flags
    }
}

impl From<BufferUsage> for vk::BufferUsageFlags {
    fn from(usage: BufferUsage) -> Self {
        let mut flags = vk::BufferUsageFlags::empty();
        if usage.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if usage.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if usage.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if usage.contains(BufferUsage::TRANSFER_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if usage.contains(BufferUsage::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

impl From<ImageUsage> for vk::ImageUsageFlags {
    fn from(usage: ImageUsage) -> Self {
        let mut flags = vk::ImageUsageFlags::empty();
        if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if usage.contains(ImageUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if usage.contains(ImageUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if usage.contains(ImageUsage::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if usage.contains(ImageUsage::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

impl From<MemoryType> for MemoryLocation {
    fn from(memory: MemoryType) -> Self {
        if memory.contains(MemoryType::HOST_VISIBLE) {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        }
    }
}

pub fn aspect_of(format: PixelFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Reverse of `From<PixelFormat>` for formats the swapchain may report
pub fn pixel_format_of(format: vk::Format) -> Option<PixelFormat> {
    match format {
        vk::Format::B8G8R8A8_UNORM => Some(PixelFormat::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(PixelFormat::Bgra8Srgb),
        vk::Format::R8G8B8A8_UNORM => Some(PixelFormat::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(PixelFormat::Rgba8Srgb),
        vk::Format::D32_SFLOAT => Some(PixelFormat::D32Sfloat),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_stage_groups_map_to_vulkan_groups() {
        assert_eq!(vk::ShaderStageFlags::from(ShaderStage::ALL), vk::ShaderStageFlags::ALL);
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::ALL_GRAPHICS),
            vk::ShaderStageFlags::ALL_GRAPHICS
        );
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::VERTEX | ShaderStage::FRAGMENT),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn host_visible_memory_is_mappable() {
        assert_eq!(
            MemoryLocation::from(MemoryType::HOST_VISIBLE | MemoryType::HOST_COHERENT),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(MemoryLocation::from(MemoryType::DEVICE_LOCAL), MemoryLocation::GpuOnly);
    }

    #[test]
    fn swapchain_formats_round_trip() {
        for format in [PixelFormat::Bgra8Unorm, PixelFormat::Bgra8Srgb, PixelFormat::D32Sfloat] {
            assert_eq!(pixel_format_of(format.into()), Some(format));
        }
        assert_eq!(pixel_format_of(vk::Format::R16G16_SFLOAT), None);
    }
}
