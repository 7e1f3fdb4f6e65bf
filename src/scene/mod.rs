//! Render Scene
//!
//! A [`RenderScene`] owns drawable instances, overlay widgets and particle
//! emitters, and knows how to turn them into the canonical pass sequence:
//! sun shadow depth, optional voxelization with its mip chain, emitter
//! update, opaque forward, widget overlay, composite, and a conditional
//! pick read-back. Passes declare resource edges only; execution order is
//! the graph compiler's business.
//!
//! The per-frame flow is two-phase:
//!
//! 1. [`prepare_frame`](RenderScene::prepare_frame) (mutable): prune
//!    emitters, resolve assets through the cache, rebuild the batch, upload
//!    the frame's uniform and instance buffers into the frame arena.
//! 2. [`render`](RenderScene::render) (shared): declare passes whose execute
//!    closures borrow the prepared state.
//!
//! When the scene is paused — explicitly or by visibility culling — both
//! phases short-circuit and the graph simply re-exports the previously
//! rendered target image.

pub mod batch;
pub mod emitter;
pub mod renderable;

pub use batch::{build_batch, BuiltBatch, MaterialGroup, MeshGroup};
pub use emitter::{EmitterSpec, GpuEmitter};
pub use renderable::{Renderable, RenderableKey, RenderableRegistry};

use std::cell::{Cell, RefCell};

use glam::{Mat4, Quat, UVec2, Vec3};

use crate::assets::AssetSource;
use crate::cache::{
    GpuAssetCache, FORWARD_COLOR_FORMATS, OVERLAY_COLOR_FORMATS, SCENE_DEPTH_FORMAT,
};
use crate::camera::Viewport;
use crate::errors::{Result, SigilError};
use crate::frame::FrameArena;
use crate::gpu::{
    AttachmentView, BufferId, BufferUsage, ClearValue, RenderDevice, SamplerKind, TextureDesc,
    TextureDimension, TextureFormat, TextureId, TextureUsage,
};
use crate::graph::{Access, Pass, RenderGraph};
use crate::renderer::BuiltinPipelines;
use crate::settings::RenderSettings;
use crate::uniforms::{CameraUniforms, CompositeUniforms, DebugView, VoxelCameraUniforms};

/// Half-extent of the world region the voxelization pass captures.
const VOXELIZATION_EXTENT: f32 = 5.0;

// ─── Scene Ambience ───────────────────────────────────────────────────────────

/// Lighting and fog parameters consumed by the forward and composite passes.
#[derive(Clone, Copy, Debug)]
pub struct SceneData {
    pub ambient: [f32; 4],
    pub fog_color: [f32; 4],
    pub fog_depth: f32,
    pub sun_direction: Quat,
    pub sun_intensity: f32,
}

impl Default for SceneData {
    fn default() -> Self {
        Self {
            ambient: [1.0, 1.0, 1.0, 0.2],
            fog_color: [0.0, 0.0, 0.0, 1.0],
            fog_depth: -1.0,
            sun_direction: Quat::from_xyzw(0.243_210_3, 0.350_366_1, 0.088_521_3, 0.907_673_4),
            sun_intensity: 1.0,
        }
    }
}

impl SceneData {
    /// World-space direction sunlight travels.
    #[must_use]
    pub fn sun_vector(&self) -> Vec3 {
        (self.sun_direction * Vec3::Z).normalize()
    }

    /// Reverse-depth orthographic sun view-projection.
    #[must_use]
    pub fn light_view_proj(&self) -> Mat4 {
        let sun = self.sun_vector();
        let projection = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 30.0, 0.0);
        let view = Mat4::look_at_rh(sun * 15.0, Vec3::ZERO, Vec3::Z);
        projection * view
    }
}

// ─── Pick Queries ─────────────────────────────────────────────────────────────

/// One-shot receiver for a pick query result.
///
/// Fire-and-forget: the value arrives after the frame that declared the
/// read-back pass completes on the GPU. There is no timeout — poll with
/// [`try_get`](Self::try_get) and discard stale receivers.
pub struct PickReceiver {
    rx: flume::Receiver<u32>,
}

impl PickReceiver {
    /// `Ok(None)` while in flight; [`SigilError::PickDiscarded`] if the
    /// query was replaced or dropped before producing a value.
    pub fn try_get(&self) -> Result<Option<u32>> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => Err(SigilError::PickDiscarded),
        }
    }

    /// Pump the device until the value lands.
    pub fn block_on(&self, device: &dyn RenderDevice) -> Result<u32> {
        loop {
            if let Some(value) = self.try_get()? {
                return Ok(value);
            }
            device.tick();
        }
    }
}

// ─── Per-Frame Buffers ────────────────────────────────────────────────────────

/// Frame-arena buffer handles produced by `prepare_frame`.
#[derive(Clone, Copy)]
struct SceneFrameData {
    camera: BufferId,
    sun_camera: BufferId,
    voxel_camera: BufferId,
    composite: BufferId,
    transforms: BufferId,
    ids: BufferId,
    /// Present only when a pick query was pending and in bounds.
    info_readback: Option<BufferId>,
}

// ─── Scene ────────────────────────────────────────────────────────────────────

pub struct RenderScene {
    pub name: String,
    pub viewport: Viewport,
    pub scene_data: SceneData,
    pub debug_view: DebugView,
    pub render_widgets: bool,
    /// Explicit user pause: keep presenting the last rendered image.
    pub user_pause: bool,
    /// Visibility-driven pause set by whoever culls offscreen scenes.
    pub cull_pause: bool,

    renderables: RenderableRegistry,
    widget_renderables: RenderableRegistry,
    emitters: Vec<GpuEmitter>,

    render_target: Option<TextureId>,
    target_size: UVec2,

    query: Cell<Option<UVec2>>,
    pick_reply: RefCell<Option<flume::Sender<u32>>>,

    batch: BuiltBatch,
    batch_revision: u64,
    frame_data: Option<SceneFrameData>,
}

impl RenderScene {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            viewport: Viewport::default(),
            scene_data: SceneData::default(),
            debug_view: DebugView::default(),
            render_widgets: true,
            user_pause: false,
            cull_pause: false,
            renderables: RenderableRegistry::new(),
            widget_renderables: RenderableRegistry::new(),
            emitters: Vec::new(),
            render_target: None,
            target_size: UVec2::ZERO,
            query: Cell::new(None),
            pick_reply: RefCell::new(None),
            batch: BuiltBatch::default(),
            batch_revision: 0,
            frame_data: None,
        }
    }

    // ── Renderable Management ────────────────────────────────────────────

    pub fn add_renderable(&mut self, renderable: Renderable) -> RenderableKey {
        self.renderables.add(renderable)
    }

    pub fn remove_renderable(&mut self, key: RenderableKey) {
        self.renderables.remove(key);
    }

    pub fn renderable_mut(&mut self, key: RenderableKey) -> Option<&mut Renderable> {
        self.renderables.get_mut(key)
    }

    pub fn add_widget_renderable(&mut self, renderable: Renderable) -> RenderableKey {
        self.widget_renderables.add(renderable)
    }

    pub fn remove_widget_renderable(&mut self, key: RenderableKey) {
        self.widget_renderables.remove(key);
    }

    pub fn add_emitter(&mut self, device: &dyn RenderDevice, spec: &EmitterSpec, now: f32) {
        self.emitters.push(GpuEmitter::new(device, spec, now));
    }

    #[must_use]
    pub fn renderable_count(&self) -> usize {
        self.renderables.len()
    }

    #[must_use]
    pub fn widget_count(&self) -> usize {
        self.widget_renderables.len()
    }

    #[must_use]
    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.renderables.is_empty() && self.widget_renderables.is_empty() && self.emitters.is_empty()
    }

    /// The most recent batch build. Rebuilt during `prepare_frame`.
    #[must_use]
    pub fn batch(&self) -> &BuiltBatch {
        &self.batch
    }

    /// Increments every time the batch is rebuilt.
    #[must_use]
    pub fn batch_revision(&self) -> u64 {
        self.batch_revision
    }

    #[must_use]
    pub fn paused(&self) -> bool {
        self.user_pause || self.cull_pause
    }

    // ── Pick Queries ─────────────────────────────────────────────────────

    /// Request a read-back of the picking id under `coord` at the next
    /// rendered frame. Replaces any still-pending query (whose receiver
    /// then reports [`SigilError::PickDiscarded`]).
    pub fn query_pick(&self, coord: UVec2) -> PickReceiver {
        let (tx, rx) = flume::bounded(1);
        self.query.set(Some(coord));
        *self.pick_reply.borrow_mut() = Some(tx);
        PickReceiver { rx }
    }

    /// The coordinate of the pending pick query, if any.
    #[must_use]
    pub fn pending_query(&self) -> Option<UVec2> {
        self.query.get()
    }

    // ── Frame Phases ─────────────────────────────────────────────────────

    /// Per-frame update hook, run by the scheduler before preparation.
    pub fn update(&mut self) {}

    /// Allocate (or re-allocate) the persistent per-scene render target.
    pub fn ensure_target(&mut self, device: &dyn RenderDevice) {
        let wanted = self.viewport.size.max(UVec2::splat(2));
        if self.render_target.is_some() && self.target_size == wanted {
            return;
        }
        if let Some(old) = self.render_target.take() {
            device.destroy_texture(old);
        }
        self.render_target = Some(device.create_texture(&TextureDesc::attachment(
            "scene render target",
            wanted.x,
            wanted.y,
            TextureFormat::Bgra8Unorm,
        )));
        self.target_size = wanted;
    }

    /// Phase 1: resolve assets, rebuild the batch, upload frame buffers.
    ///
    /// Skipped entirely while paused — the batch from the last live frame
    /// stays untouched and no GPU work is scheduled.
    pub fn prepare_frame(
        &mut self,
        device: &dyn RenderDevice,
        cache: &mut GpuAssetCache,
        source: &dyn AssetSource,
        arena: &mut FrameArena,
        time: f32,
        delta_time: f32,
    ) -> Result<()> {
        if self.paused() {
            return Ok(());
        }
        self.ensure_target(device);

        emitter::prune_expired(&mut self.emitters, device, time);

        // Lazy upload of everything this frame references. Misses are fine;
        // the batcher skips what still does not resolve.
        for (_, renderable) in self.renderables.iter() {
            let _ = cache.get_or_upload_mesh(device, source, renderable.mesh_id, renderable.frame_allocated);
            let _ = cache.get_or_upload_material(
                device,
                source,
                renderable.material_id,
                renderable.frame_allocated,
            );
        }
        for (_, widget) in self.widget_renderables.iter() {
            let _ = cache.get_or_upload_mesh(device, source, widget.mesh_id, widget.frame_allocated);
            let _ =
                cache.get_or_upload_material(device, source, widget.material_id, widget.frame_allocated);
        }
        for emitter in &self.emitters {
            let _ = cache.get_or_upload_mesh(device, source, emitter.mesh_id, false);
        }

        self.batch = build_batch(&self.renderables, &self.widget_renderables, cache);
        self.batch_revision += 1;

        for (index, emitter) in self.emitters.iter().enumerate() {
            emitter.write_params(device, delta_time, index as u32);
        }

        // Frame-lifetime uniform and instance buffers.
        let camera = &self.viewport.camera;
        let camera_uniforms = CameraUniforms::new(camera.view_proj, camera.position);
        let sun_vp = self.scene_data.light_view_proj();
        let sun_uniforms = CameraUniforms::new(sun_vp, self.scene_data.sun_vector() * 15.0);
        let voxel_uniforms = VoxelCameraUniforms::axis_aligned(VOXELIZATION_EXTENT);
        let composite_uniforms = CompositeUniforms {
            inverse_vp: camera.inverse_view_proj().to_cols_array_2d(),
            light_vp: sun_vp.to_cols_array_2d(),
            camera_position: camera.position.extend(1.0).to_array(),
            sun_data: self
                .scene_data
                .sun_vector()
                .extend(self.scene_data.sun_intensity)
                .to_array(),
            ambient: self.scene_data.ambient,
            debug_mode: self.debug_view as u32,
            time,
            voxel_lod: 0,
            _pad: 0,
        };

        let uniform = BufferUsage::UNIFORM;
        let storage = BufferUsage::STORAGE;
        let frame_data = SceneFrameData {
            camera: arena.alloc_buffer_with_data(
                device,
                "camera uniforms",
                uniform,
                bytemuck::bytes_of(&camera_uniforms),
            ),
            sun_camera: arena.alloc_buffer_with_data(
                device,
                "sun camera uniforms",
                uniform,
                bytemuck::bytes_of(&sun_uniforms),
            ),
            voxel_camera: arena.alloc_buffer_with_data(
                device,
                "voxel camera uniforms",
                uniform,
                bytemuck::bytes_of(&voxel_uniforms),
            ),
            composite: arena.alloc_buffer_with_data(
                device,
                "composite uniforms",
                uniform,
                bytemuck::bytes_of(&composite_uniforms),
            ),
            transforms: arena.alloc_buffer_with_data(
                device,
                "packed transforms",
                storage,
                bytemuck::cast_slice(&self.batch.transforms),
            ),
            ids: arena.alloc_buffer_with_data(
                device,
                "packed ids",
                storage,
                bytemuck::cast_slice(&self.batch.ids),
            ),
            info_readback: match self.query.get() {
                Some(coord) if self.viewport.contains(coord) => Some(arena.alloc_buffer(
                    device,
                    "pick readback",
                    4,
                    BufferUsage::COPY_DST | BufferUsage::MAP_READ,
                )),
                _ => None,
            },
        };
        self.frame_data = Some(frame_data);
        Ok(())
    }

    /// Phase 2: declare this scene's passes into `graph` and return the
    /// label of the composited target.
    pub fn render<'s>(
        &'s self,
        graph: &mut RenderGraph<'s>,
        builtins: &BuiltinPipelines,
        cache: &'s GpuAssetCache,
        settings: &RenderSettings,
    ) -> Result<String> {
        let target = self.render_target.ok_or_else(|| {
            SigilError::NotSetUp(format!("scene {:?} has no render target", self.name))
        })?;
        let target_label = self.label("target");
        let size = (self.target_size.x, self.target_size.y);

        // Paused scenes re-present the previous image: attach it, declare
        // nothing, return it unchanged.
        if self.paused() {
            graph.attach_image(target_label.clone(), target, size);
            return Ok(target_label);
        }

        let Some(frame_data) = self.frame_data else {
            return Err(SigilError::NotSetUp(format!(
                "scene {:?} was not prepared this frame",
                self.name
            )));
        };

        graph.attach_image_cleared(
            target_label.clone(),
            target,
            size,
            ClearValue::Color([0.1, 0.1, 0.1, 1.0]),
        );
        self.declare_attachments(graph, settings);

        self.add_sun_depth_pass(graph, builtins, cache, frame_data);
        let voxel_label = if settings.volumetrics {
            Some(self.add_voxelization_passes(graph, builtins, cache, frame_data, settings))
        } else {
            None
        };
        self.add_emitter_update_pass(graph, builtins);
        self.add_forward_pass(graph, builtins, cache, frame_data);
        self.add_widget_pass(graph, cache, frame_data);
        let composited = self.add_composite_pass(
            graph,
            builtins,
            frame_data,
            &target_label,
            voxel_label.as_deref(),
        );
        self.add_info_read_pass(graph, frame_data);

        Ok(composited)
    }

    /// End-of-frame sweep of frame-scoped renderables and widgets.
    pub fn end_frame(&mut self) {
        self.renderables.clear_frame_allocated();
        self.widget_renderables.clear_frame_allocated();
    }

    /// Release GPU resources owned by this scene. Called when the scene is
    /// removed from the scheduler.
    pub fn cleanup(&mut self, device: &dyn RenderDevice) {
        if let Some(target) = self.render_target.take() {
            device.destroy_texture(target);
        }
        for emitter in self.emitters.drain(..) {
            emitter.destroy(device);
        }
        self.renderables.clear();
        self.widget_renderables.clear();
    }

    // ── Pass Declarations ────────────────────────────────────────────────

    fn label(&self, suffix: &str) -> String {
        format!("{}.{}", self.name, suffix)
    }

    fn declare_attachments(&self, graph: &mut RenderGraph<'_>, settings: &RenderSettings) {
        let (width, height) = (self.target_size.x, self.target_size.y);
        let scene_image = |label: &'static str, format: TextureFormat| TextureDesc {
            label,
            width,
            height,
            depth: 1,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::SAMPLED,
            mip_level_count: 1,
            dimension: TextureDimension::D2,
        };

        graph.declare_image(
            self.label("sun_depth"),
            TextureDesc {
                label: "sun depth",
                width: settings.shadow_resolution,
                height: settings.shadow_resolution,
                depth: 1,
                format: TextureFormat::Depth16Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::SAMPLED,
                mip_level_count: 1,
                dimension: TextureDimension::D2,
            },
            Some(ClearValue::Depth(0.0)),
        );
        graph.declare_image(
            self.label("base_color"),
            scene_image("base color", FORWARD_COLOR_FORMATS[0]),
            Some(ClearValue::Color(self.scene_data.fog_color)),
        );
        graph.declare_image(
            self.label("emissive"),
            scene_image("emissive", FORWARD_COLOR_FORMATS[1]),
            Some(ClearValue::Color([0.0; 4])),
        );
        graph.declare_image(
            self.label("normal"),
            scene_image("normal", FORWARD_COLOR_FORMATS[2]),
            Some(ClearValue::Color([0.0; 4])),
        );
        graph.declare_image(
            self.label("info"),
            scene_image("info", FORWARD_COLOR_FORMATS[3]),
            Some(ClearValue::ColorU32([u32::MAX; 4])),
        );
        graph.declare_image(
            self.label("depth"),
            scene_image("scene depth", SCENE_DEPTH_FORMAT),
            Some(ClearValue::Depth(0.0)),
        );
        graph.declare_image(
            self.label("widget_color"),
            scene_image("widget color", OVERLAY_COLOR_FORMATS[0]),
            Some(ClearValue::Color([0.0; 4])),
        );
        graph.declare_image(
            self.label("widget_depth"),
            scene_image("widget depth", SCENE_DEPTH_FORMAT),
            Some(ClearValue::Depth(0.0)),
        );

        if settings.volumetrics {
            let resolution = settings.voxel_resolution;
            graph.declare_image(
                self.label("voxel_volume"),
                TextureDesc {
                    label: "voxel volume",
                    width: resolution,
                    height: resolution,
                    depth: resolution,
                    format: TextureFormat::Rgba16Float,
                    usage: TextureUsage::SAMPLED | TextureUsage::STORAGE,
                    mip_level_count: settings.voxel_mip_count,
                    dimension: TextureDimension::D3,
                },
                None,
            );
            graph.declare_image(
                self.label("voxel_fake"),
                TextureDesc {
                    label: "voxel raster target",
                    width: resolution,
                    height: resolution,
                    depth: 1,
                    format: TextureFormat::R8Unorm,
                    usage: TextureUsage::RENDER_ATTACHMENT,
                    mip_level_count: 1,
                    dimension: TextureDimension::D2,
                },
                Some(ClearValue::Color([0.0; 4])),
            );
        }
    }

    /// Draw every batched group into the shadow map, one instanced draw per
    /// (material, mesh) pair, material state irrelevant for depth.
    fn add_sun_depth_pass<'s>(
        &'s self,
        graph: &mut RenderGraph<'s>,
        builtins: &BuiltinPipelines,
        cache: &'s GpuAssetCache,
        frame_data: SceneFrameData,
    ) {
        let shadow_pipeline = builtins.shadow;
        graph.add_pass(
            Pass::new(self.label("sun_depth"))
                .writes(
                    self.label("sun_depth"),
                    Access::DepthStencilWrite,
                    self.label("sun_depth_out"),
                )
                .execute(move |encoder, _| {
                    encoder.set_pipeline(shadow_pipeline);
                    encoder.bind_uniform(0, frame_data.sun_camera);
                    encoder.bind_storage(1, frame_data.transforms);
                    for group in &self.batch.groups {
                        for mesh_group in &group.meshes {
                            let Some(mesh) = cache.mesh(mesh_group.mesh_id) else {
                                log::warn!("mesh {:#018x} vanished mid-frame", mesh_group.mesh_id);
                                continue;
                            };
                            encoder.set_vertex_buffer(0, mesh.vertex_buffer);
                            encoder.set_index_buffer(mesh.index_buffer);
                            encoder.draw_indexed(
                                mesh.index_count,
                                mesh_group.instance_count(),
                                mesh_group.first_instance,
                            );
                        }
                    }
                }),
        );
    }

    /// Voxelize the batched geometry, then lower the volume's mip chain one
    /// blit per level, each level depending on the previous.
    fn add_voxelization_passes<'s>(
        &'s self,
        graph: &mut RenderGraph<'s>,
        builtins: &BuiltinPipelines,
        cache: &'s GpuAssetCache,
        frame_data: SceneFrameData,
        settings: &RenderSettings,
    ) -> String {
        let voxel_pipeline = builtins.voxelize;
        let volume_label = self.label("voxel_volume");
        let sun_label = self.label("sun_depth_out");
        let first_version = self.label("voxel_v0");
        {
            let volume_label = volume_label.clone();
            let sun_label = sun_label.clone();
            graph.add_pass(
                Pass::new(self.label("voxelization"))
                    .reads(sun_label.clone(), Access::Sampled)
                    .writes(volume_label.clone(), Access::StorageWrite, first_version.clone())
                    .writes(
                        self.label("voxel_fake"),
                        Access::ColorWrite,
                        self.label("voxel_fake_out"),
                    )
                    .execute(move |encoder, resources| {
                        encoder.set_pipeline(voxel_pipeline);
                        encoder.bind_uniform(0, frame_data.voxel_camera);
                        encoder.bind_storage(1, frame_data.transforms);
                        encoder.bind_texture_raw(12, resources.image(&sun_label));
                        encoder.bind_storage_texture(15, resources.image_mip(&volume_label, 0));
                        for group in &self.batch.groups {
                            for mesh_group in &group.meshes {
                                let Some(mesh) = cache.mesh(mesh_group.mesh_id) else {
                                    continue;
                                };
                                encoder.set_vertex_buffer(0, mesh.vertex_buffer);
                                encoder.set_index_buffer(mesh.index_buffer);
                                encoder.draw_indexed(
                                    mesh.index_count,
                                    mesh_group.instance_count(),
                                    mesh_group.first_instance,
                                );
                            }
                        }
                    }),
            );
        }

        // Mip chain: level N reads the volume as left by level N-1.
        let mut previous_version = first_version;
        for level in 1..settings.voxel_mip_count {
            let next_version = self.label(&format!("voxel_m{level}"));
            let volume_label = volume_label.clone();
            graph.add_pass(
                Pass::new(self.label(&format!("voxel_mip{level}")))
                    .writes(
                        previous_version.clone(),
                        Access::TransferWrite,
                        next_version.clone(),
                    )
                    .execute(move |encoder, resources| {
                        encoder.blit_mip(
                            resources.image_mip(&volume_label, level - 1),
                            resources.image_mip(&volume_label, level),
                        );
                    }),
            );
            previous_version = next_version;
        }
        previous_version
    }

    /// Side-effecting simulation pass: no declared resources, ordered before
    /// the forward pass purely by declaration order.
    fn add_emitter_update_pass<'s>(&'s self, graph: &mut RenderGraph<'s>, builtins: &BuiltinPipelines) {
        let update_pipeline = builtins.emitter_update;
        graph.add_pass(Pass::new(self.label("emitter_update")).execute(move |encoder, _| {
            for emitter in &self.emitters {
                encoder.set_pipeline(update_pipeline);
                encoder.bind_uniform(0, emitter.params_buffer);
                encoder.bind_storage(1, emitter.particle_buffer);
                encoder.dispatch(emitter.dispatch_size(), 1, 1);
            }
        }));
    }

    /// The batching payoff: one pipeline/material bind and one instanced
    /// draw per (material, mesh) group; state changes scale with the group
    /// count, not the instance count.
    fn add_forward_pass<'s>(
        &'s self,
        graph: &mut RenderGraph<'s>,
        builtins: &BuiltinPipelines,
        cache: &'s GpuAssetCache,
        frame_data: SceneFrameData,
    ) {
        let particles_pipeline = builtins.particles;
        let white_fallback = builtins.white_texture;
        graph.add_pass(
            Pass::new(self.label("forward"))
                .writes(
                    self.label("base_color"),
                    Access::ColorWrite,
                    self.label("base_color_out"),
                )
                .writes(
                    self.label("emissive"),
                    Access::ColorWrite,
                    self.label("emissive_out"),
                )
                .writes(self.label("normal"), Access::ColorWrite, self.label("normal_out"))
                .writes(self.label("info"), Access::ColorWrite, self.label("info_out"))
                .writes(
                    self.label("depth"),
                    Access::DepthStencilWrite,
                    self.label("depth_out"),
                )
                .execute(move |encoder, _| {
                    for group in &self.batch.groups {
                        let Some(material) = cache.material(group.material_id) else {
                            log::warn!("material {:#018x} vanished mid-frame", group.material_id);
                            continue;
                        };
                        if material.overlay {
                            log::warn!(
                                "overlay material {:#018x} on a scene renderable; skipped",
                                group.material_id
                            );
                            continue;
                        }
                        encoder.set_pipeline(material.pipeline);
                        encoder.bind_uniform(0, frame_data.camera);
                        encoder.bind_storage(1, frame_data.transforms);
                        encoder.bind_storage(2, frame_data.ids);
                        encoder.bind_uniform(4, material.params_buffer);
                        let base_color = material
                            .textures
                            .first()
                            .and_then(|&id| cache.texture(id))
                            .map_or(
                                (AttachmentView::full(white_fallback), SamplerKind::LinearRepeat),
                                |texture| (AttachmentView::full(texture.texture), texture.sampler),
                            );
                        encoder.bind_texture(5, base_color.0, base_color.1);

                        for mesh_group in &group.meshes {
                            let Some(mesh) = cache.mesh(mesh_group.mesh_id) else {
                                continue;
                            };
                            encoder.set_vertex_buffer(0, mesh.vertex_buffer);
                            encoder.set_index_buffer(mesh.index_buffer);
                            encoder.draw_indexed(
                                mesh.index_count,
                                mesh_group.instance_count(),
                                mesh_group.first_instance,
                            );
                        }
                    }

                    // Particles draw after the batched groups, reading the
                    // transforms their update pass produced this frame.
                    for emitter in &self.emitters {
                        let Some(mesh) = cache.mesh(emitter.mesh_id) else {
                            continue;
                        };
                        encoder.set_pipeline(particles_pipeline);
                        encoder.bind_uniform(0, frame_data.camera);
                        encoder.bind_storage(1, emitter.particle_buffer);
                        encoder.set_vertex_buffer(0, mesh.vertex_buffer);
                        encoder.set_index_buffer(mesh.index_buffer);
                        encoder.draw_indexed(mesh.index_count, emitter.particle_count, 0);
                    }
                }),
        );
    }

    /// Overlay widgets: separate attachments, shared camera, one draw per
    /// widget from the packed-buffer tail.
    fn add_widget_pass<'s>(
        &'s self,
        graph: &mut RenderGraph<'s>,
        cache: &'s GpuAssetCache,
        frame_data: SceneFrameData,
    ) {
        let widget_base = self.batch.widget_base;
        graph.add_pass(
            Pass::new(self.label("widget"))
                .writes(
                    self.label("widget_color"),
                    Access::ColorWrite,
                    self.label("widget_out"),
                )
                .writes(
                    self.label("widget_depth"),
                    Access::DepthStencilWrite,
                    self.label("widget_depth_out"),
                )
                .execute(move |encoder, _| {
                    if !self.render_widgets {
                        return;
                    }
                    for (index, (_, widget)) in self.widget_renderables.iter().enumerate() {
                        let Some(material) = cache.material(widget.material_id) else {
                            continue;
                        };
                        if !material.overlay {
                            log::warn!(
                                "non-overlay material {:#018x} on a widget; skipped",
                                widget.material_id
                            );
                            continue;
                        }
                        let Some(mesh) = cache.mesh(widget.mesh_id) else {
                            continue;
                        };
                        encoder.set_pipeline(material.pipeline);
                        encoder.bind_uniform(0, frame_data.camera);
                        encoder.bind_storage(1, frame_data.transforms);
                        encoder.bind_uniform(4, material.params_buffer);
                        encoder.set_vertex_buffer(0, mesh.vertex_buffer);
                        encoder.set_index_buffer(mesh.index_buffer);
                        encoder.draw_indexed(mesh.index_count, 1, widget_base + index as u32);
                    }
                }),
        );
    }

    /// Fold every attachment into the presentable scene target.
    fn add_composite_pass<'s>(
        &'s self,
        graph: &mut RenderGraph<'s>,
        builtins: &BuiltinPipelines,
        frame_data: SceneFrameData,
        target_label: &str,
        voxel_label: Option<&str>,
    ) -> String {
        let composite_pipeline = builtins.composite;
        let dummy_voxel = builtins.dummy_voxel;
        let output = self.label("target_out");

        let base_color = self.label("base_color_out");
        let emissive = self.label("emissive_out");
        let normal = self.label("normal_out");
        let depth = self.label("depth_out");
        let widget = self.label("widget_out");
        let widget_depth = self.label("widget_depth_out");
        let sun_depth = self.label("sun_depth_out");
        let voxel = voxel_label.map(str::to_string);

        let mut pass = Pass::new(self.label("composite"))
            .reads(base_color.clone(), Access::Sampled)
            .reads(emissive.clone(), Access::Sampled)
            .reads(normal.clone(), Access::Sampled)
            .reads(depth.clone(), Access::Sampled)
            .reads(widget.clone(), Access::Sampled)
            .reads(widget_depth.clone(), Access::Sampled)
            .reads(sun_depth.clone(), Access::Sampled)
            .writes(target_label.to_string(), Access::ColorWrite, output.clone());
        if let Some(voxel) = &voxel {
            pass = pass.reads(voxel.clone(), Access::Sampled);
        }

        graph.add_pass(pass.execute(move |encoder, resources| {
            encoder.set_pipeline(composite_pipeline);
            encoder.bind_uniform(0, frame_data.composite);
            encoder.bind_texture(5, resources.image(&base_color), SamplerKind::LinearClamp);
            encoder.bind_texture(6, resources.image(&emissive), SamplerKind::LinearClamp);
            encoder.bind_texture(7, resources.image(&normal), SamplerKind::LinearClamp);
            encoder.bind_texture(8, resources.image(&widget), SamplerKind::LinearClamp);
            let voxel_view = match &voxel {
                Some(label) => resources.image(label),
                None => AttachmentView::full(dummy_voxel),
            };
            encoder.bind_texture(9, voxel_view, SamplerKind::LinearClamp);
            encoder.bind_texture_raw(10, resources.image(&depth));
            encoder.bind_texture_raw(11, resources.image(&widget_depth));
            encoder.bind_texture_raw(12, resources.image(&sun_depth));
            encoder.draw(3, 1);
        }));
        output
    }

    /// Declared only when a pick query is pending and in bounds; consumes
    /// the query at declaration so it fires at most once.
    fn add_info_read_pass<'s>(&'s self, graph: &mut RenderGraph<'s>, frame_data: SceneFrameData) {
        let Some(coord) = self.query.take() else {
            return;
        };
        let Some(reply) = self.pick_reply.borrow_mut().take() else {
            return;
        };
        if !self.viewport.contains(coord) {
            // Out of bounds: dropped silently; the receiver observes a
            // disconnect instead of a value.
            return;
        }
        let Some(readback) = frame_data.info_readback else {
            return;
        };

        let storage_label = self.label("info_storage");
        let info_label = self.label("info_out");
        graph.attach_buffer(storage_label.clone(), readback);
        graph.add_pass(
            Pass::new(self.label("info_read"))
                .reads(info_label.clone(), Access::TransferRead)
                .writes(
                    storage_label.clone(),
                    Access::TransferWrite,
                    self.label("info_readable"),
                )
                .execute(move |encoder, resources| {
                    encoder.copy_texel_to_buffer(
                        resources.image(&info_label),
                        [coord.x, coord.y],
                        resources.buffer(&storage_label),
                    );
                    encoder.read_buffer_u32(readback, reply);
                }),
        );
    }
}
