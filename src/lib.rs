//! # Sigil
//!
//! A pass-graph based real-time scene renderer: drawable instances plus a
//! camera in, composited frames out. The interesting machinery is the
//! per-frame [pass graph](graph) with derived execution order, the
//! [batcher](scene::batch) that packs instances into contiguous buffers for
//! one instanced draw per (material, mesh) pair, the content-addressed
//! [GPU asset cache](cache) with frame-scoped lifetimes, and the
//! [frame scheduler](renderer) that sequences updates, upload
//! synchronization and presentation over a triple-buffered pipeline.
//!
//! Everything runs against the [`RenderDevice`](gpu::RenderDevice) trait;
//! the wgpu backend does the real work, and the headless backend lets the
//! whole pipeline run (and be asserted on) without a GPU.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod assets;
pub mod cache;
pub mod camera;
pub mod errors;
pub mod frame;
pub mod gpu;
pub mod graph;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod uniforms;
pub mod utils;

pub use assets::{content_hash, AssetSource, MaterialData, MeshData, TextureData, Vertex};
pub use cache::GpuAssetCache;
pub use camera::{Camera, Viewport};
pub use errors::{Result, SigilError};
pub use frame::FrameArena;
pub use gpu::headless::HeadlessDevice;
pub use gpu::wgpu_backend::WgpuDevice;
pub use gpu::RenderDevice;
pub use graph::{Access, Pass, RenderGraph};
pub use renderer::{OverlayPass, RenderStage, Renderer};
pub use scene::{EmitterSpec, PickReceiver, Renderable, RenderScene, SceneData};
pub use settings::RenderSettings;
pub use uniforms::DebugView;
