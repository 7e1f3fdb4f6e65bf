//! GPU Asset Cache
//!
//! Content-hash-keyed store mapping stable ids to uploaded GPU meshes,
//! materials and textures. Entries are created lazily on first reference: a
//! miss consults the external [`AssetSource`]; if the loader reports absence
//! the cache returns `None` and inserts nothing — the caller may simply ask
//! again next frame. There is no retry bookkeeping in here.
//!
//! Every entry carries a `frame_allocated` flag. Frame-scoped entries are
//! evicted by [`GpuAssetCache::clear_frame_allocated`] right after the frame
//! that created them presents; persistent entries live until
//! [`GpuAssetCache::clear`] at shutdown.
//!
//! Insertions and evictions happen only on the render thread, strictly
//! between frames. The upload *completions* are asynchronous: every upload
//! enqueues a ticket with the shared [`UploadQueue`], which the scheduler
//! drains before compiling the next pass graph.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::assets::{
    default_material_id, default_mesh_id, generate_cube, AssetSource, MaterialData, MeshData,
    TextureData,
};
use crate::gpu::{
    BlendPreset, BufferDesc, BufferId, BufferUsage, CompareFn, DepthState, GraphicsState,
    PipelineDesc, PipelineId, PipelineKind, RenderDevice, SamplerKind, TextureDesc, TextureFormat,
    TextureId, TextureUsage, UploadQueue,
};

/// Color target layout of the opaque forward pass.
pub const FORWARD_COLOR_FORMATS: [TextureFormat; 4] = [
    TextureFormat::Rgba16Float, // base color
    TextureFormat::Rgba16Float, // emissive
    TextureFormat::Rgba16Float, // normal
    TextureFormat::R32Uint,     // info / picking id
];

/// Color target layout of the widget/overlay pass.
pub const OVERLAY_COLOR_FORMATS: [TextureFormat; 1] = [TextureFormat::Rgba16Float];

/// Depth format shared by the forward and widget passes.
pub const SCENE_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Well-known id of the 1×1 white texture seeded by `upload_defaults`.
#[must_use]
pub fn white_texture_id() -> u64 {
    crate::assets::content_hash("texture/white")
}

// ─── Entries ──────────────────────────────────────────────────────────────────

/// GPU-resident mesh: vertex/index buffers plus element count.
#[derive(Clone, Copy, Debug)]
pub struct GpuMesh {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub index_count: u32,
    pub frame_allocated: bool,
}

/// GPU-resident material: compiled pipeline, parameter block, bound textures.
#[derive(Clone, Debug)]
pub struct GpuMaterial {
    pub pipeline: PipelineId,
    pub params_buffer: BufferId,
    /// Content hashes of the bound texture set, resolved at draw time.
    pub textures: SmallVec<[u64; 4]>,
    /// Compiled against the widget pass's target layout; never drawn in the
    /// opaque forward pass (and vice versa).
    pub overlay: bool,
    pub frame_allocated: bool,
}

/// GPU-resident texture: image handle plus sampler state.
#[derive(Clone, Copy, Debug)]
pub struct GpuTexture {
    pub texture: TextureId,
    pub sampler: SamplerKind,
    pub frame_allocated: bool,
}

// ─── Cache ────────────────────────────────────────────────────────────────────

pub struct GpuAssetCache {
    meshes: FxHashMap<u64, GpuMesh>,
    materials: FxHashMap<u64, GpuMaterial>,
    textures: FxHashMap<u64, GpuTexture>,
    uploads: Arc<UploadQueue>,
}

impl GpuAssetCache {
    #[must_use]
    pub fn new(uploads: Arc<UploadQueue>) -> Self {
        Self {
            meshes: FxHashMap::default(),
            materials: FxHashMap::default(),
            textures: FxHashMap::default(),
            uploads,
        }
    }

    // ── Lookups (no upload) ──────────────────────────────────────────────

    #[must_use]
    pub fn mesh(&self, id: u64) -> Option<&GpuMesh> {
        self.meshes.get(&id)
    }

    #[must_use]
    pub fn material(&self, id: u64) -> Option<&GpuMaterial> {
        self.materials.get(&id)
    }

    #[must_use]
    pub fn texture(&self, id: u64) -> Option<&GpuTexture> {
        self.textures.get(&id)
    }

    #[must_use]
    pub fn contains_mesh(&self, id: u64) -> bool {
        self.meshes.contains_key(&id)
    }

    #[must_use]
    pub fn contains_material(&self, id: u64) -> bool {
        self.materials.contains_key(&id)
    }

    // ── Upload-on-demand ─────────────────────────────────────────────────

    /// Resolve a mesh, uploading from the loader on a miss. `None` means the
    /// source asset is absent; nothing is inserted.
    pub fn get_or_upload_mesh(
        &mut self,
        device: &dyn RenderDevice,
        source: &dyn AssetSource,
        id: u64,
        frame_allocated: bool,
    ) -> Option<&GpuMesh> {
        if !self.meshes.contains_key(&id) {
            let data = source.load_mesh(id)?;
            let mesh = self.upload_mesh_data(device, &data, frame_allocated);
            self.meshes.insert(id, mesh);
        }
        self.meshes.get(&id)
    }

    /// Resolve a material, uploading from the loader on a miss. Textures the
    /// material references are uploaded transitively; a texture the loader
    /// cannot produce is tolerated (draws fall back to the white texture).
    pub fn get_or_upload_material(
        &mut self,
        device: &dyn RenderDevice,
        source: &dyn AssetSource,
        id: u64,
        frame_allocated: bool,
    ) -> Option<&GpuMaterial> {
        if !self.materials.contains_key(&id) {
            let data = source.load_material(id)?;
            for &texture_id in &data.texture_refs {
                if self
                    .get_or_upload_texture(device, source, texture_id, frame_allocated)
                    .is_none()
                {
                    log::warn!("material {id:#018x}: texture {texture_id:#018x} is absent");
                }
            }
            let material = self.upload_material_data(device, &data, frame_allocated)?;
            self.materials.insert(id, material);
        }
        self.materials.get(&id)
    }

    /// Resolve a texture, uploading from the loader on a miss.
    pub fn get_or_upload_texture(
        &mut self,
        device: &dyn RenderDevice,
        source: &dyn AssetSource,
        id: u64,
        frame_allocated: bool,
    ) -> Option<&GpuTexture> {
        if !self.textures.contains_key(&id) {
            let data = source.load_texture(id)?;
            let texture = self.upload_texture_data(device, &data, frame_allocated);
            self.textures.insert(id, texture);
        }
        self.textures.get(&id)
    }

    // ── Manual insertion ─────────────────────────────────────────────────

    /// Upload and insert a mesh directly, bypassing the loader.
    pub fn insert_mesh(
        &mut self,
        device: &dyn RenderDevice,
        id: u64,
        data: &MeshData,
        frame_allocated: bool,
    ) {
        let mesh = self.upload_mesh_data(device, data, frame_allocated);
        self.meshes.insert(id, mesh);
    }

    /// Upload and insert a material directly, bypassing the loader.
    pub fn insert_material(
        &mut self,
        device: &dyn RenderDevice,
        id: u64,
        data: &MaterialData,
        frame_allocated: bool,
    ) {
        if let Some(material) = self.upload_material_data(device, data, frame_allocated) {
            self.materials.insert(id, material);
        }
    }

    /// Upload and insert a texture directly, bypassing the loader.
    pub fn insert_texture(
        &mut self,
        device: &dyn RenderDevice,
        id: u64,
        data: &TextureData,
        frame_allocated: bool,
    ) {
        let texture = self.upload_texture_data(device, data, frame_allocated);
        self.textures.insert(id, texture);
    }

    /// Seed the well-known default assets (unit cube, default material,
    /// white texture) so freshly created renderables always have a fallback.
    pub fn upload_defaults(&mut self, device: &dyn RenderDevice) {
        let white = TextureData {
            pixels: vec![255, 255, 255, 255],
            format: TextureFormat::Rgba8Unorm,
            width: 1,
            height: 1,
        };
        self.insert_texture(device, white_texture_id(), &white, false);
        self.insert_mesh(device, default_mesh_id(), &generate_cube(0.5), false);
        let mut default_material = MaterialData::default();
        default_material.texture_refs.push(white_texture_id());
        self.insert_material(device, default_material_id(), &default_material, false);
    }

    // ── Upload internals ─────────────────────────────────────────────────

    fn upload_mesh_data(
        &self,
        device: &dyn RenderDevice,
        data: &MeshData,
        frame_allocated: bool,
    ) -> GpuMesh {
        let (vertex_buffer, vertex_ticket) = device.create_buffer_with_data(
            &BufferDesc {
                label: "mesh vertices",
                size: std::mem::size_of_val(data.vertices.as_slice()) as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(&data.vertices),
        );
        let (index_buffer, index_ticket) = device.create_buffer_with_data(
            &BufferDesc {
                label: "mesh indices",
                size: std::mem::size_of_val(data.indices.as_slice()) as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(&data.indices),
        );
        self.uploads.enqueue(vertex_ticket);
        self.uploads.enqueue(index_ticket);
        GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: data.index_count(),
            frame_allocated,
        }
    }

    fn upload_material_data(
        &self,
        device: &dyn RenderDevice,
        data: &MaterialData,
        frame_allocated: bool,
    ) -> Option<GpuMaterial> {
        let color_formats: SmallVec<[TextureFormat; 5]> = if data.overlay {
            SmallVec::from_slice(&OVERLAY_COLOR_FORMATS)
        } else {
            SmallVec::from_slice(&FORWARD_COLOR_FORMATS)
        };
        let desc = PipelineDesc {
            label: "material pipeline",
            shader: data.shader.clone(),
            kind: PipelineKind::Graphics(GraphicsState {
                cull_mode: data.cull_mode,
                blend: data.blend,
                color_formats,
                depth: Some(DepthState {
                    format: SCENE_DEPTH_FORMAT,
                    depth_write: !matches!(data.blend, BlendPreset::Alpha) || data.overlay,
                    compare: CompareFn::GreaterEqual,
                }),
                vertex_input: true,
            }),
        };
        let pipeline = match device.create_pipeline(&desc) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                log::error!("material pipeline creation failed: {err}");
                return None;
            }
        };

        let (params_buffer, params_ticket) = device.create_buffer_with_data(
            &BufferDesc {
                label: "material params",
                size: std::mem::size_of_val(&data.params) as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            },
            bytemuck::bytes_of(&data.params),
        );
        self.uploads.enqueue(params_ticket);

        Some(GpuMaterial {
            pipeline,
            params_buffer,
            textures: data.texture_refs.clone(),
            overlay: data.overlay,
            frame_allocated,
        })
    }

    fn upload_texture_data(
        &self,
        device: &dyn RenderDevice,
        data: &TextureData,
        frame_allocated: bool,
    ) -> GpuTexture {
        let (texture, ticket) = device.create_texture_with_data(
            &TextureDesc {
                label: "cache texture",
                width: data.width,
                height: data.height,
                depth: 1,
                format: data.format,
                usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
                mip_level_count: 1,
                dimension: crate::gpu::TextureDimension::D2,
            },
            &data.pixels,
        );
        self.uploads.enqueue(ticket);
        GpuTexture {
            texture,
            sampler: SamplerKind::LinearRepeat,
            frame_allocated,
        }
    }

    // ── Eviction ─────────────────────────────────────────────────────────

    /// Evict every frame-scoped entry. Called once per frame after
    /// presentation, never concurrently with pass execution.
    pub fn clear_frame_allocated(&mut self, device: &dyn RenderDevice) {
        self.meshes.retain(|_, mesh| {
            if mesh.frame_allocated {
                device.destroy_buffer(mesh.vertex_buffer);
                device.destroy_buffer(mesh.index_buffer);
                false
            } else {
                true
            }
        });
        self.materials.retain(|_, material| {
            if material.frame_allocated {
                device.destroy_pipeline(material.pipeline);
                device.destroy_buffer(material.params_buffer);
                false
            } else {
                true
            }
        });
        self.textures.retain(|_, texture| {
            if texture.frame_allocated {
                device.destroy_texture(texture.texture);
                false
            } else {
                true
            }
        });
    }

    /// Drop everything. Only valid at shutdown, once no renderable
    /// references remain — the scheduler asserts that before calling this.
    pub fn clear(&mut self, device: &dyn RenderDevice) {
        for mesh in self.meshes.values() {
            device.destroy_buffer(mesh.vertex_buffer);
            device.destroy_buffer(mesh.index_buffer);
        }
        for material in self.materials.values() {
            device.destroy_pipeline(material.pipeline);
            device.destroy_buffer(material.params_buffer);
        }
        for texture in self.textures.values() {
            device.destroy_texture(texture.texture);
        }
        self.meshes.clear();
        self.materials.clear();
        self.textures.clear();
    }

    // ── Stats ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    #[must_use]
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}
