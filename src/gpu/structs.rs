use bitflags::bitflags;
use smallvec::SmallVec;

#[cfg(feature = "tessel-serde")]
use serde::{Deserialize, Serialize};

use super::error::{GPUError, Result};

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Copy,
}

/// Memory a resource lives in. Only `Default` resources change state;
/// upload and readback resources keep their creation state for life.
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum HeapType {
    #[default]
    Default,
    Upload,
    Readback,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum Format {
    Unknown,
    R8Unorm,
    R16Uint,
    R32Uint,
    R32Float,
    RG32Float,
    RGB32Float,
    #[default]
    RGBA8Unorm,
    RGBA8Srgb,
    BGRA8Unorm,
    RGBA16Float,
    RGBA32Float,
    D32Float,
    D24S8,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Float | Format::D24S8)
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::R16Uint => 2,
            Format::R32Uint | Format::R32Float | Format::RGBA8Unorm | Format::RGBA8Srgb => 4,
            Format::BGRA8Unorm | Format::D32Float | Format::D24S8 => 4,
            Format::RG32Float | Format::RGBA16Float => 8,
            Format::RGB32Float => 12,
            Format::RGBA32Float => 16,
        }
    }
}

bitflags! {
    /// Ways a resource may be bound. Decides which steady views are created
    /// alongside it.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
    pub struct ResourceUsage: u32 {
        const SHADER_RESOURCE  = 0x1;
        const UNORDERED_ACCESS = 0x2;
        const RENDER_TARGET    = 0x4;
        const DEPTH_STENCIL    = 0x8;
        const VERTEX           = 0x10;
        const INDEX            = 0x20;
        const CONSTANT         = 0x40;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct TextureDesc {
    pub debug_name: String,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub usage: ResourceUsage,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            width: 1,
            height: 1,
            array_layers: 1,
            mip_levels: 1,
            format: Format::default(),
            usage: ResourceUsage::SHADER_RESOURCE,
        }
    }
}

impl TextureDesc {
    pub fn subresources(&self) -> u32 {
        self.mip_levels.max(1) * self.array_layers.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct BufferDesc {
    pub debug_name: String,
    pub byte_size: u64,
    /// Element stride for structured views; zero for raw buffers.
    pub stride: u32,
    pub usage: ResourceUsage,
    pub heap: HeapType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

impl ResourceDesc {
    pub fn subresources(&self) -> u32 {
        match self {
            ResourceDesc::Texture(tex) => tex.subresources(),
            ResourceDesc::Buffer(_) => 1,
        }
    }

    pub fn heap(&self) -> HeapType {
        match self {
            ResourceDesc::Texture(_) => HeapType::Default,
            ResourceDesc::Buffer(buf) => buf.heap,
        }
    }

    pub fn usage(&self) -> ResourceUsage {
        match self {
            ResourceDesc::Texture(tex) => tex.usage,
            ResourceDesc::Buffer(buf) => buf.usage,
        }
    }

    pub fn debug_name(&self) -> &str {
        match self {
            ResourceDesc::Texture(tex) => &tex.debug_name,
            ResourceDesc::Buffer(buf) => &buf.debug_name,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureDesc> {
        match self {
            ResourceDesc::Texture(tex) => Some(tex),
            ResourceDesc::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&BufferDesc> {
        match self {
            ResourceDesc::Buffer(buf) => Some(buf),
            ResourceDesc::Texture(_) => None,
        }
    }
}

/// Interpretation of a resource written into a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil { read_only: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1024.0,
            height: 1024.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct RasterizerState {
    pub fill: FillMode,
    pub cull: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub scissor_enable: bool,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare: CompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enable: true,
            write_enable: true,
            compare: CompareOp::Less,
        }
    }
}

#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum BlendFactor {
    #[default]
    One,
    Zero,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
    DstColor,
    InvDstColor,
}

#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    InvSubtract,
    Min,
    Max,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct BlendState {
    pub enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: u8,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enable: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: 0xF,
        }
    }
}

impl BlendState {
    pub fn alpha_blended() -> Self {
        Self {
            enable: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::InvSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::InvSrcAlpha,
            ..Default::default()
        }
    }
}

#[derive(Hash, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct VertexElement {
    pub semantic: String,
    pub format: Format,
    pub slot: u32,
    pub offset: u32,
}

#[derive(Hash, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct VertexLayout {
    pub elements: SmallVec<[VertexElement; 8]>,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an element right after the previous one in the same slot.
    pub fn with(mut self, semantic: impl Into<String>, format: Format, slot: u32) -> Self {
        let offset = self
            .elements
            .iter()
            .filter(|e| e.slot == slot)
            .map(|e| e.offset + e.format.bytes_per_texel())
            .max()
            .unwrap_or(0);
        self.elements.push(VertexElement {
            semantic: semantic.into(),
            format,
            slot,
            offset,
        });
        self
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub address_mode: SamplerAddressMode,
    pub max_anisotropy: u8,
    pub compare: Option<CompareOp>,
}

/// Capacities of the context's pools and descriptor heaps.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "tessel-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "tessel-serde", serde(default))]
pub struct ContextInfo {
    /// Shader-visible view descriptors reserved for steady allocations.
    pub view_heap_steady: u32,
    /// Shader-visible view descriptors carved into temporary blocks.
    pub view_heap_temporary: u32,
    pub sampler_heap_steady: u32,
    pub sampler_heap_temporary: u32,
    pub render_target_heap: u32,
    pub depth_stencil_heap: u32,
    /// Descriptors claimed from a heap each time a steady bucket runs dry.
    pub steady_block_size: u32,
    /// Descriptors per temporary block.
    pub temporary_block_size: u32,
    /// Fence slots; handles older than this many signals read as complete.
    pub fence_ring_size: u32,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            view_heap_steady: 16 * 1024,
            view_heap_temporary: 64 * 1024,
            sampler_heap_steady: 512,
            sampler_heap_temporary: 1536,
            render_target_heap: 1024,
            depth_stencil_heap: 256,
            steady_block_size: 64,
            temporary_block_size: 1024,
            fence_ring_size: 1024,
        }
    }
}

impl ContextInfo {
    /// Rejects layouts the allocators cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.temporary_block_size == 0 || self.steady_block_size == 0 {
            return Err(GPUError::Config("block sizes must be non-zero".into()));
        }
        if self.view_heap_temporary < self.temporary_block_size
            || self.sampler_heap_temporary < self.temporary_block_size
        {
            return Err(GPUError::Config(
                "temporary heap region smaller than one block".into(),
            ));
        }
        if self.fence_ring_size == 0 {
            return Err(GPUError::Config("fence ring needs at least one slot".into()));
        }
        Ok(())
    }

    #[cfg(feature = "tessel-serde")]
    pub fn from_yaml(s: &str) -> Result<Self> {
        let info: Self = serde_yaml::from_str(s).map_err(|e| GPUError::Config(e.to_string()))?;
        info.validate()?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_subresources_cover_mips_and_layers() {
        let desc = TextureDesc {
            mip_levels: 4,
            array_layers: 6,
            ..Default::default()
        };
        assert_eq!(desc.subresources(), 24);
        assert_eq!(ResourceDesc::Texture(desc).heap(), HeapType::Default);
    }

    #[test]
    fn vertex_layout_packs_elements_per_slot() {
        let layout = VertexLayout::new()
            .with("POSITION", Format::RGB32Float, 0)
            .with("TEXCOORD", Format::RG32Float, 0)
            .with("COLOR", Format::RGBA8Unorm, 1);
        let offsets: Vec<_> = layout.elements.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 12, 0]);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let info = ContextInfo {
            temporary_block_size: 0,
            ..Default::default()
        };
        assert!(matches!(info.validate(), Err(GPUError::Config(_))));
    }

    #[cfg(feature = "tessel-serde")]
    #[test]
    fn context_info_from_yaml_fills_missing_fields() {
        let info = ContextInfo::from_yaml("temporary_block_size: 256\nfence_ring_size: 64\n")
            .expect("parse context info");
        assert_eq!(info.temporary_block_size, 256);
        assert_eq!(info.fence_ring_size, 64);
        assert_eq!(info.view_heap_steady, ContextInfo::default().view_heap_steady);
    }
}
