// Descriptor values - plain, hashable descriptions of GPU state
//
// Every struct here is a cache key: two values that compare equal resolve to
// the same native object. Nothing in this module owns GPU memory.
// All types deserialize from TOML so static pipelines can live in a file.

use serde::Deserialize;
use std::hash::{Hash, Hasher};

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $flag:ident = $bits:expr, $label:literal; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
        #[serde(try_from = "Vec<String>")]
        pub struct $name(u32);

        impl $name {
            $( pub const $flag: Self = Self($bits); )*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// True when every bit of `other` is set in `self`
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl TryFrom<Vec<String>> for $name {
            type Error = String;

            fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
                names.iter().try_fold(Self::empty(), |acc, name| match name.as_str() {
                    $( $label => Ok(acc | Self::$flag), )*
                    other => Err(format!("unknown {} flag '{}'", stringify!($name), other)),
                })
            }
        }
    };
}

flag_set! {
    /// Which queue capabilities a command list needs
    pub struct QueueUsage {
        GRAPHICS = 1 << 0, "graphics";
        COMPUTE = 1 << 1, "compute";
        TRANSFER = 1 << 2, "transfer";
    }
}

flag_set! {
    pub struct BufferUsage {
        VERTEX = 1 << 0, "vertex";
        INDEX = 1 << 1, "index";
        UNIFORM = 1 << 2, "uniform";
        STORAGE = 1 << 3, "storage";
        TRANSFER_SRC = 1 << 4, "transfer_src";
        TRANSFER_DST = 1 << 5, "transfer_dst";
    }
}

flag_set! {
    pub struct ImageUsage {
        COLOR_ATTACHMENT = 1 << 0, "color_attachment";
        DEPTH_STENCIL_ATTACHMENT = 1 << 1, "depth_stencil_attachment";
        SAMPLED = 1 << 2, "sampled";
        STORAGE = 1 << 3, "storage";
        TRANSFER_SRC = 1 << 4, "transfer_src";
        TRANSFER_DST = 1 << 5, "transfer_dst";
    }
}

flag_set! {
    /// Memory properties requested for a buffer
    pub struct MemoryType {
        DEVICE_LOCAL = 1 << 0, "device_local";
        HOST_VISIBLE = 1 << 1, "host_visible";
        HOST_COHERENT = 1 << 2, "host_coherent";
    }
}

flag_set! {
    pub struct ShaderStage {
        VERTEX = 1 << 0, "vertex";
        GEOMETRY = 1 << 1, "geometry";
        FRAGMENT = 1 << 2, "fragment";
        COMPUTE = 1 << 3, "compute";
        ALL_GRAPHICS = 0b0111, "all_graphics";
        ALL = 0b1111, "all";
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba8Srgb,
    D32Sfloat,
}

impl PixelFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, PixelFormat::D32Sfloat)
    }

    pub fn bytes_per_pixel(self) -> u64 {
        4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    #[default]
    SrgbNonlinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    Immediate,
    Mailbox,
    #[default]
    Fifo,
    FifoRelaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Color,
    Depth,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawPrimitive {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

/// Logical image layouts a texture can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageLayout {
    Undefined,
    General,
    Color,
    Presentation,
    TransferSrc,
    TransferDst,
    ShaderRead,
    DepthStencil,
}

impl ImageLayout {
    pub const ALL: [ImageLayout; 8] = [
        ImageLayout::Undefined,
        ImageLayout::General,
        ImageLayout::Color,
        ImageLayout::Presentation,
        ImageLayout::TransferSrc,
        ImageLayout::TransferDst,
        ImageLayout::ShaderRead,
        ImageLayout::DepthStencil,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    #[default]
    Image2d,
    Image2dArray,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderObjectType {
    Uniform,
    CombinedImageSampler,
    StorageBuffer,
    StorageImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Nearest,
    Linear,
    Cubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
    MirrorClampToEdge,
}

/// Width of the indices in an index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct Rectangle {
    pub offset: [i32; 2],
    pub extent: Extent,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with the standard 0..1 depth range
    pub fn from_extent(extent: Extent) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// The one vertex layout every graphics pipeline consumes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub uv: [f32; 3],
    pub normal: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct Attachment {
    pub format: PixelFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    /// Layout the attachment is left in when the render pass ends
    pub layout: ImageLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct RenderPassInfo {
    pub attachments: Vec<Attachment>,
}

impl RenderPassInfo {
    pub fn has_depth(&self) -> bool {
        self.attachments.iter().any(|a| a.kind != AttachmentType::Color)
    }

    pub fn color_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.kind == AttachmentType::Color).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct ShaderObjectInfo {
    #[serde(rename = "type")]
    pub kind: ShaderObjectType,
    pub stages: ShaderStage,
    pub binding: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct DescriptorSetLayoutInfo {
    #[serde(default)]
    pub shader_objects: Vec<ShaderObjectInfo>,
}

impl DescriptorSetLayoutInfo {
    pub fn binding(&self, binding: u32) -> Option<&ShaderObjectInfo> {
        self.shader_objects.iter().find(|o| o.binding == binding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct PushConstantRange {
    pub stages: ShaderStage,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct PipelineLayoutInfo {
    #[serde(default)]
    pub push_constant_ranges: Vec<PushConstantRange>,
    #[serde(default)]
    pub set_layout: DescriptorSetLayoutInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct GraphicsPipelineInfo {
    /// SPIR-V file names, resolved against the shader directory
    pub shaders: Vec<String>,
    /// Left empty by static pipelines that target the swapchain
    #[serde(default)]
    pub render_pass: RenderPassInfo,
    #[serde(default)]
    pub layout: PipelineLayoutInfo,
    #[serde(default)]
    pub primitive: DrawPrimitive,
    #[serde(default)]
    pub polygon_mode: PolygonMode,
    #[serde(default)]
    pub extent: Extent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ComputePipelineInfo {
    pub shader: String,
    #[serde(default)]
    pub layout: PipelineLayoutInfo,
}

/// A pipeline description, graphics or compute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineInfo {
    Graphics(GraphicsPipelineInfo),
    Compute(ComputePipelineInfo),
}

impl PipelineInfo {
    pub fn layout(&self) -> &PipelineLayoutInfo {
        match self {
            PipelineInfo::Graphics(info) => &info.layout,
            PipelineInfo::Compute(info) => &info.layout,
        }
    }

    /// Queue capability a command list needs to bind this pipeline
    pub fn required_usage(&self) -> QueueUsage {
        match self {
            PipelineInfo::Graphics(_) => QueueUsage::GRAPHICS,
            PipelineInfo::Compute(_) => QueueUsage::COMPUTE,
        }
    }
}

/// Sampler description. Float fields compare and hash by bit pattern.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SamplerInfo {
    pub use_anisotropy: bool,
    pub max_anisotropy: f32,
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub address_mode: AddressMode,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        Self {
            use_anisotropy: true,
            max_anisotropy: 16.0,
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            address_mode: AddressMode::Repeat,
        }
    }
}

impl PartialEq for SamplerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.use_anisotropy == other.use_anisotropy
            && self.max_anisotropy.to_bits() == other.max_anisotropy.to_bits()
            && self.mag_filter == other.mag_filter
            && self.min_filter == other.min_filter
            && self.address_mode == other.address_mode
    }
}

impl Eq for SamplerInfo {}

impl Hash for SamplerInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.use_anisotropy.hash(state);
        self.max_anisotropy.to_bits().hash(state);
        self.mag_filter.hash(state);
        self.min_filter.hash(state);
        self.address_mode.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescription {
    pub width: u32,
    pub height: u32,
    pub kind: ImageType,
    pub format: PixelFormat,
    pub usage: ImageUsage,
    /// Array layers; 6 for cube maps
    pub layers: u32,
}

impl TextureDescription {
    /// Sampled 2D texture that can be filled through a staging copy
    pub fn sampled(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            kind: ImageType::Image2d,
            format,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            layers: 1,
        }
    }

    /// Size in bytes of the full texel payload
    pub fn size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() * self.layers as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainInfo {
    pub extent: Extent,
    pub format: PixelFormat,
    pub color_space: ColorSpace,
    pub present_mode: PresentMode,
}
