//! Frame Scheduler
//!
//! [`Renderer`] owns the N-buffered frame pipeline (N = 3) and drives each
//! frame through a fixed sequence:
//!
//! 1. block until the frame-resource slot from N frames ago is free;
//! 2. drain pending asset-upload tickets — the hard synchronization point:
//!    no pass graph is compiled while an upload it might depend on is in
//!    flight;
//! 3. run each scene's update callback;
//! 4. prepare each scene (asset resolution, batching, frame buffers), then
//!    drain the uploads that preparation itself enqueued;
//! 5. build every scene's pass graph and merge them into the presentation
//!    graph together with the opaque overlay pass;
//! 6. compile, record, submit;
//! 7. present;
//! 8. sweep frame-scoped renderables, cache entries and the frame arena.
//!
//! `render()` is a guarded state machine: it errors (and does nothing) unless
//! the scheduler is `Inactive`, which catches re-entrant frame submission.
//! A zero-area resize suspends submission entirely until a real size arrives.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::assets::AssetSource;
use crate::cache::GpuAssetCache;
use crate::errors::{Result, SigilError};
use crate::frame::FrameArena;
use crate::gpu::shaders::builtin_shaders;
use crate::gpu::{
    ClearValue, CompareFn, CullMode, DepthState, GraphicsState, PassEncoder, PipelineDesc,
    PipelineId, PipelineKind, RenderDevice, SamplerKind, TextureDesc, TextureDimension,
    TextureFormat, TextureId, TextureUsage, UploadQueue,
};
use crate::graph::{Access, Pass, RenderGraph};
use crate::scene::RenderScene;
use crate::settings::RenderSettings;

/// Frames that may be in flight on the GPU at once.
pub const INFLIGHT_FRAME_COUNT: usize = 3;

/// Scheduler state machine. `Inactive → Setup (once) → {Inactive →
/// BuildingGraph → Presenting → Inactive}*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderStage {
    /// Between frames; the only state `render()` accepts.
    Inactive,
    /// Before `setup()` has run.
    Setup,
    /// Scene graphs are being declared and compiled.
    BuildingGraph,
    /// The frame is submitted and awaiting presentation.
    Presenting,
}

/// Pipelines and fallback resources shared by every scene's passes.
#[derive(Clone, Copy, Debug)]
pub struct BuiltinPipelines {
    pub shadow: PipelineId,
    pub voxelize: PipelineId,
    pub particles: PipelineId,
    pub composite: PipelineId,
    pub present_blit: PipelineId,
    pub emitter_update: PipelineId,
    /// 1×1 white fallback for materials without textures.
    pub white_texture: TextureId,
    /// 1×1×1 fallback volume bound when volumetrics are disabled.
    pub dummy_voxel: TextureId,
}

/// Opaque UI/editor overlay merged into the presentation graph. The
/// scheduler never inspects what it records.
pub trait OverlayPass {
    fn record(&mut self, encoder: &mut PassEncoder);
}

// ─── Renderer ─────────────────────────────────────────────────────────────────

pub struct Renderer {
    device: Arc<dyn RenderDevice>,
    source: Box<dyn AssetSource>,
    settings: RenderSettings,

    stage: RenderStage,
    suspended: bool,
    frame_index: u64,
    frame_fences: [Option<crate::gpu::SubmitFence>; INFLIGHT_FRAME_COUNT],

    scenes: Vec<RenderScene>,
    cache: GpuAssetCache,
    uploads: Arc<UploadQueue>,
    frame_arena: FrameArena,
    timer: crate::utils::Timer,
    window_size: (u32, u32),

    builtins: Option<BuiltinPipelines>,
}

impl Renderer {
    #[must_use]
    pub fn new(
        device: Arc<dyn RenderDevice>,
        source: Box<dyn AssetSource>,
        settings: RenderSettings,
    ) -> Self {
        let uploads = Arc::new(UploadQueue::new());
        Self {
            device,
            source,
            settings: settings.validated(),
            stage: RenderStage::Setup,
            suspended: false,
            frame_index: 0,
            frame_fences: [None, None, None],
            scenes: Vec::new(),
            cache: GpuAssetCache::new(Arc::clone(&uploads)),
            uploads,
            frame_arena: FrameArena::new(),
            timer: crate::utils::Timer::new(),
            window_size: (1280, 720),
            builtins: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    #[must_use]
    pub fn stage(&self) -> RenderStage {
        self.stage
    }

    #[must_use]
    pub fn suspended(&self) -> bool {
        self.suspended
    }

    #[must_use]
    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn cache_mut(&mut self) -> &mut GpuAssetCache {
        &mut self.cache
    }

    #[must_use]
    pub fn cache(&self) -> &GpuAssetCache {
        &self.cache
    }

    #[must_use]
    pub fn upload_queue(&self) -> &Arc<UploadQueue> {
        &self.uploads
    }

    #[must_use]
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    // ── Scene Management ─────────────────────────────────────────────────

    /// Register a scene. Scenes added after setup get their GPU state
    /// initialized immediately.
    pub fn add_scene(&mut self, mut scene: RenderScene) {
        debug_assert!(!scene.name.is_empty(), "scenes must be named");
        if self.stage != RenderStage::Setup {
            scene.ensure_target(&*self.device);
        }
        self.scenes.push(scene);
    }

    /// Remove (and clean up) a scene by name.
    pub fn remove_scene(&mut self, name: &str) -> Option<RenderScene> {
        let index = self.scenes.iter().position(|scene| scene.name == name)?;
        let mut scene = self.scenes.remove(index);
        scene.cleanup(&*self.device);
        Some(scene)
    }

    #[must_use]
    pub fn scene(&self, name: &str) -> Option<&RenderScene> {
        self.scenes.iter().find(|scene| scene.name == name)
    }

    pub fn scene_mut(&mut self, name: &str) -> Option<&mut RenderScene> {
        self.scenes.iter_mut().find(|scene| scene.name == name)
    }

    #[must_use]
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    // ── Setup ────────────────────────────────────────────────────────────

    /// One-time initialization: builtin shaders and pipelines, default
    /// cache entries, per-scene targets.
    pub fn setup(&mut self) -> Result<()> {
        if self.stage != RenderStage::Setup {
            return Err(SigilError::InvalidRenderStage { stage: self.stage });
        }

        for (name, source) in builtin_shaders() {
            self.device.register_shader(name, &source);
        }

        let device = &*self.device;
        let surface_format = TextureFormat::Bgra8Unorm;
        let scene_depth = Some(DepthState {
            format: crate::cache::SCENE_DEPTH_FORMAT,
            depth_write: true,
            compare: CompareFn::GreaterEqual,
        });

        let shadow = device.create_pipeline(&PipelineDesc {
            label: "sun depth",
            shader: "directional_depth".to_string(),
            kind: PipelineKind::Graphics(GraphicsState {
                cull_mode: CullMode::None,
                blend: crate::gpu::BlendPreset::Off,
                color_formats: SmallVec::new(),
                depth: Some(DepthState {
                    format: TextureFormat::Depth16Unorm,
                    depth_write: true,
                    compare: CompareFn::GreaterEqual,
                }),
                vertex_input: true,
            }),
        })?;
        let voxelize = device.create_pipeline(&PipelineDesc {
            label: "voxelize",
            shader: "voxelize".to_string(),
            kind: PipelineKind::Graphics(GraphicsState {
                cull_mode: CullMode::None,
                blend: crate::gpu::BlendPreset::Off,
                color_formats: SmallVec::from_slice(&[TextureFormat::R8Unorm]),
                depth: None,
                vertex_input: true,
            }),
        })?;
        let particles = device.create_pipeline(&PipelineDesc {
            label: "particles",
            shader: "particles".to_string(),
            kind: PipelineKind::Graphics(GraphicsState {
                cull_mode: CullMode::None,
                blend: crate::gpu::BlendPreset::Off,
                color_formats: SmallVec::from_slice(&crate::cache::FORWARD_COLOR_FORMATS),
                depth: scene_depth,
                vertex_input: true,
            }),
        })?;
        let composite = device.create_pipeline(&PipelineDesc {
            label: "composite",
            shader: "composite".to_string(),
            kind: PipelineKind::Graphics(GraphicsState {
                cull_mode: CullMode::None,
                blend: crate::gpu::BlendPreset::Off,
                color_formats: SmallVec::from_slice(&[surface_format]),
                depth: None,
                vertex_input: false,
            }),
        })?;
        let present_blit = device.create_pipeline(&PipelineDesc {
            label: "present blit",
            shader: "present_blit".to_string(),
            kind: PipelineKind::Graphics(GraphicsState {
                cull_mode: CullMode::None,
                blend: crate::gpu::BlendPreset::Off,
                color_formats: SmallVec::from_slice(&[surface_format]),
                depth: None,
                vertex_input: false,
            }),
        })?;
        let emitter_update = device.create_pipeline(&PipelineDesc {
            label: "emitter update",
            shader: "emitter_update".to_string(),
            kind: PipelineKind::Compute,
        })?;

        let (white_texture, white_ticket) = device.create_texture_with_data(
            &TextureDesc {
                label: "white fallback",
                width: 1,
                height: 1,
                depth: 1,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
                mip_level_count: 1,
                dimension: TextureDimension::D2,
            },
            &[255, 255, 255, 255],
        );
        self.uploads.enqueue(white_ticket);
        let dummy_voxel = device.create_texture(&TextureDesc {
            label: "voxel fallback",
            width: 1,
            height: 1,
            depth: 1,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::SAMPLED,
            mip_level_count: 1,
            dimension: TextureDimension::D3,
        });

        self.builtins = Some(BuiltinPipelines {
            shadow,
            voxelize,
            particles,
            composite,
            present_blit,
            emitter_update,
            white_texture,
            dummy_voxel,
        });

        self.cache.upload_defaults(&*self.device);

        // OPTIMIZATION: per-scene setup is independent and could fan out to
        // worker threads; the scene list is tiny in practice.
        for scene in &mut self.scenes {
            scene.ensure_target(&*self.device);
        }

        self.uploads.drain(&*self.device);
        self.stage = RenderStage::Inactive;
        Ok(())
    }

    // ── Frame Loop ───────────────────────────────────────────────────────

    /// Render and present one frame. No-op while suspended; errors without
    /// side effects if a frame is already in flight.
    pub fn render(&mut self, mut overlay: Option<&mut dyn OverlayPass>) -> Result<()> {
        if self.suspended {
            return Ok(());
        }
        if self.stage != RenderStage::Inactive {
            log::error!("render() called during {:?}", self.stage);
            return Err(SigilError::InvalidRenderStage { stage: self.stage });
        }
        let builtins = self
            .builtins
            .ok_or_else(|| SigilError::NotSetUp("setup() has not run".to_string()))?;

        self.timer.tick();
        let time = self.timer.elapsed_seconds();
        let delta_time = self.timer.delta_seconds();

        // (a) Block until the frame slot from N frames ago is reusable.
        let slot = (self.frame_index % INFLIGHT_FRAME_COUNT as u64) as usize;
        if let Some(fence) = self.frame_fences[slot].take() {
            fence.block_on(&*self.device);
        }

        // (b) Hard sync: every upload enqueued so far must land first.
        self.uploads.drain(&*self.device);

        // (c) Scene update callbacks.
        for scene in &mut self.scenes {
            scene.update();
        }

        // (d) Preparation may enqueue further uploads (lazy asset
        // resolution); drain again so the graphs we are about to compile
        // only reference resident data.
        for scene in &mut self.scenes {
            scene.prepare_frame(
                &*self.device,
                &mut self.cache,
                &*self.source,
                &mut self.frame_arena,
                time,
                delta_time,
            )?;
        }
        self.uploads.drain(&*self.device);

        let surface_target = self.device.acquire_frame()?;
        self.stage = RenderStage::BuildingGraph;

        // (e) Build, compile and record the merged presentation graph.
        let frame = {
            let Self {
                device,
                scenes,
                cache,
                settings,
                frame_arena,
                window_size,
                ..
            } = self;

            let mut graph = RenderGraph::new();
            graph.attach_image_cleared(
                "swapchain",
                surface_target,
                *window_size,
                ClearValue::Color(settings.clear_color),
            );

            let mut scene_outputs: Vec<String> = Vec::with_capacity(scenes.len());
            for scene in scenes.iter() {
                scene_outputs.push(scene.render(&mut graph, &builtins, cache, settings)?);
            }

            let mut presentation = Pass::new("presentation").writes(
                "swapchain",
                Access::ColorWrite,
                "swapchain_presented",
            );
            for output in &scene_outputs {
                presentation = presentation.reads(output.clone(), Access::Sampled);
            }
            let blit = builtins.present_blit;
            graph.add_pass(presentation.execute(move |encoder, resources| {
                encoder.set_pipeline(blit);
                for output in &scene_outputs {
                    encoder.bind_texture(5, resources.image(output), SamplerKind::LinearClamp);
                    encoder.draw(3, 1);
                }
            }));

            if let Some(overlay) = overlay.as_deref_mut() {
                graph.add_pass(
                    Pass::new("overlay")
                        .writes("swapchain_presented", Access::ColorWrite, "swapchain_final")
                        .execute(move |encoder, _| overlay.record(encoder)),
                );
            }

            graph.compile().record(&**device, frame_arena)
        };

        self.stage = RenderStage::Presenting;
        let fence = self.device.submit(frame);
        self.frame_fences[slot] = Some(fence);

        // (f) Present.
        self.device.present(surface_target)?;

        // (g) Sweep frame-scoped state.
        for scene in &mut self.scenes {
            scene.end_frame();
        }
        self.cache.clear_frame_allocated(&*self.device);
        self.frame_arena.reset();

        self.frame_index += 1;
        self.stage = RenderStage::Inactive;
        Ok(())
    }

    // ── Resize / Suspend ─────────────────────────────────────────────────

    /// A zero-area size suspends submission; the next real size rebuilds
    /// swapchain-equivalent resources and resumes.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            self.suspended = true;
            return Ok(());
        }
        // In-flight frames may still reference pooled attachments.
        self.device.wait_idle();
        self.device.resize_surface(width, height)?;
        self.window_size = (width, height);
        // Pooled attachments are resolution-dependent; start the pool over.
        self.frame_arena.release_all(&*self.device);
        self.suspended = false;
        Ok(())
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Tear down GPU state. Every scene must have been removed first — the
    /// cache cannot be cleared while renderables still reference it.
    pub fn shutdown(&mut self) {
        self.device.wait_idle();
        assert!(
            self.scenes.is_empty(),
            "shutdown with {} scene(s) still registered",
            self.scenes.len()
        );
        self.cache.clear(&*self.device);
        self.frame_arena.release_all(&*self.device);
        self.builtins = None;
        self.stage = RenderStage::Setup;
    }
}
