//! GPU Abstraction Layer
//!
//! The renderer core (batching, pass-graph compilation, asset cache, frame
//! scheduling) never talks to a graphics API directly. Everything goes through
//! the [`RenderDevice`] trait with opaque handles, so the same core drives:
//!
//! - [`WgpuDevice`](wgpu_backend::WgpuDevice): the production backend
//! - [`HeadlessDevice`](headless::HeadlessDevice): a recording backend used by
//!   tests and benches, no GPU required
//!
//! Handles are plain `u64` newtypes allocated by the device. When a resource
//! is destroyed its id is never reused, which makes stale-handle bugs loud.

pub mod command;
pub mod device;
pub mod headless;
pub mod shaders;
pub mod wgpu_backend;

pub use command::{Command, CommandList, PassEncoder};
pub use device::{RenderDevice, SubmitFence, UploadQueue, UploadTicket};

use bitflags::bitflags;
use smallvec::SmallVec;

// ─── Handles ──────────────────────────────────────────────────────────────────

/// Opaque handle to a GPU buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Opaque handle to a GPU texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Opaque handle to a compiled render or compute pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u64);

/// A view into one mip level of a texture. `base_mip == 0` with
/// `mip_count == None` means "the whole texture".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentView {
    pub texture: TextureId,
    pub base_mip: u32,
    /// `Some(1)` restricts the view to a single level (mip blits); `None`
    /// exposes the full chain (sampling).
    pub mip_count: Option<u32>,
}

impl AttachmentView {
    #[must_use]
    pub fn full(texture: TextureId) -> Self {
        Self {
            texture,
            base_mip: 0,
            mip_count: None,
        }
    }

    #[must_use]
    pub fn mip(texture: TextureId, level: u32) -> Self {
        Self {
            texture,
            base_mip: level,
            mip_count: Some(1),
        }
    }
}

// ─── Formats & Usages ─────────────────────────────────────────────────────────

/// Texture formats the renderer allocates. A deliberate subset of what the
/// hardware offers; the composite pipeline knows how to read all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    R32Uint,
    R8Unorm,
    Depth16Unorm,
    Depth32Float,
}

impl TextureFormat {
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth16Unorm | Self::Depth32Float)
    }

    #[must_use]
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Depth16Unorm => 2,
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Uint | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    D3,
}

bitflags! {
    /// How a buffer may be used. Mirrors the backend's usage validation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX   = 1 << 0;
        const INDEX    = 1 << 1;
        const UNIFORM  = 1 << 2;
        const STORAGE  = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        const MAP_READ = 1 << 6;
    }
}

bitflags! {
    /// How a texture may be used.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const RENDER_ATTACHMENT = 1 << 0;
        const SAMPLED           = 1 << 1;
        const COPY_SRC          = 1 << 2;
        const COPY_DST          = 1 << 3;
        const STORAGE           = 1 << 4;
    }
}

// ─── Descriptors ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub mip_level_count: u32,
    pub dimension: TextureDimension,
}

impl TextureDesc {
    /// Flat 2-D render-attachment-and-sampled texture, one mip.
    #[must_use]
    pub fn attachment(label: &'static str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            depth: 1,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::SAMPLED,
            mip_level_count: 1,
            dimension: TextureDimension::D2,
        }
    }
}

/// Sampler selection. The device owns one sampler per kind; passes select by
/// enum rather than creating sampler objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SamplerKind {
    #[default]
    LinearRepeat,
    LinearClamp,
    NearestClamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendPreset {
    #[default]
    Off,
    Alpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CompareFn {
    Never,
    Less,
    #[default]
    GreaterEqual,
    Always,
}

/// Depth configuration for a graphics pipeline. The scene passes use reverse
/// depth (clear to 0.0, compare GreaterEqual).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub format: TextureFormat,
    pub depth_write: bool,
    pub compare: CompareFn,
}

/// Fixed-function state for a graphics pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphicsState {
    pub cull_mode: CullMode,
    pub blend: BlendPreset,
    pub color_formats: SmallVec<[TextureFormat; 5]>,
    pub depth: Option<DepthState>,
    /// `false` for fullscreen-triangle pipelines that synthesize positions
    /// from the vertex index instead of reading a vertex buffer.
    pub vertex_input: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics(GraphicsState),
    Compute,
}

/// Everything the device needs to compile a pipeline. `shader` names a module
/// previously registered with [`RenderDevice::register_shader`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    pub label: &'static str,
    pub shader: String,
    pub kind: PipelineKind,
}

// ─── Clear Values ─────────────────────────────────────────────────────────────

/// Clear value for a declared attachment. Applied by the first pass that
/// writes the attachment; later writers load the previous contents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    ColorU32([u32; 4]),
    Depth(f32),
}
