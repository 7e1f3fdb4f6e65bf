//! CPU-Side Asset Descriptions & Content Addressing
//!
//! The renderer never touches the disk. All source data arrives through the
//! [`AssetSource`] trait, keyed by a stable content hash over the asset's
//! canonical path. The same hash is the key shared between renderables and
//! the GPU asset cache, so a renderable holds nothing but two `u64`s and a
//! transform.

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use crate::gpu::{BlendPreset, CullMode, TextureFormat};

/// Stable content hash over a resource's canonical path.
///
/// This is the cache key shared between [`Renderable`](crate::scene::Renderable)s
/// and [`GpuAssetCache`](crate::cache::GpuAssetCache) entries. The hash is
/// deterministic across runs and platforms.
#[must_use]
pub fn content_hash(canonical_path: &str) -> u64 {
    xxh3_64(canonical_path.as_bytes())
}

/// Well-known id of the mesh seeded by `upload_defaults`.
#[must_use]
pub fn default_mesh_id() -> u64 {
    content_hash("mesh/default_cube")
}

/// Well-known id of the material seeded by `upload_defaults`.
#[must_use]
pub fn default_material_id() -> u64 {
    content_hash("material/default")
}

// ─── Vertex ───────────────────────────────────────────────────────────────────

/// Interleaved vertex format shared by every mesh the renderer draws.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    #[must_use]
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            normal: [0.0, 0.0, 1.0],
            tangent: [1.0, 0.0, 0.0],
            color: [1.0, 1.0, 1.0],
            uv: [0.0, 0.0],
        }
    }
}

// ─── CPU Asset Data ───────────────────────────────────────────────────────────

/// CPU-side mesh description as delivered by an [`AssetSource`].
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Small parameter block bound alongside a material's textures.
///
/// Layout matches the `MaterialParams` uniform in the builtin shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialParams {
    pub base_color_tint: [f32; 4],
    pub emissive: [f32; 4],
    /// x = roughness, y = metallic, z = normal strength, w unused.
    pub surface: [f32; 4],
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color_tint: [1.0, 1.0, 1.0, 1.0],
            emissive: [0.0, 0.0, 0.0, 0.0],
            surface: [0.5, 0.0, 1.0, 0.0],
        }
    }
}

/// CPU-side material description.
///
/// `texture_refs` are content hashes of texture assets; they are uploaded
/// transitively when the material is uploaded.
#[derive(Clone, Debug)]
pub struct MaterialData {
    /// Name of a registered shader module.
    pub shader: String,
    pub params: MaterialParams,
    pub texture_refs: SmallVec<[u64; 4]>,
    pub cull_mode: CullMode,
    pub blend: BlendPreset,
    /// Overlay materials compile against the widget pass's target layout
    /// instead of the opaque forward layout.
    pub overlay: bool,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            shader: "standard_forward".to_string(),
            params: MaterialParams::default(),
            texture_refs: SmallVec::new(),
            cull_mode: CullMode::Back,
            blend: BlendPreset::Off,
            overlay: false,
        }
    }
}

impl MaterialData {
    /// Default widget/overlay material.
    #[must_use]
    pub fn widget() -> Self {
        Self {
            shader: "widget".to_string(),
            blend: BlendPreset::Alpha,
            cull_mode: CullMode::None,
            overlay: true,
            ..Self::default()
        }
    }
}

/// CPU-side texture description. Tightly packed pixel rows.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub pixels: Vec<u8>,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

// ─── Asset Source ─────────────────────────────────────────────────────────────

/// External loader consumed by the GPU asset cache on a miss.
///
/// Implementations resolve a content hash back to CPU data (from disk, over
/// the network, from a conversion pipeline). Returning `None` reports absence;
/// the cache records the miss and does not retry on its own.
///
/// Loader calls happen synchronously on the render thread; implementations
/// that convert assets on other threads should complete the conversion there
/// and only hand finished data back through this trait.
pub trait AssetSource {
    fn load_mesh(&self, id: u64) -> Option<MeshData>;
    fn load_material(&self, id: u64) -> Option<MaterialData>;
    fn load_texture(&self, id: u64) -> Option<TextureData>;
}

/// An [`AssetSource`] with nothing in it. Every lookup misses.
#[derive(Default, Debug, Clone, Copy)]
pub struct EmptySource;

impl AssetSource for EmptySource {
    fn load_mesh(&self, _id: u64) -> Option<MeshData> {
        None
    }
    fn load_material(&self, _id: u64) -> Option<MaterialData> {
        None
    }
    fn load_texture(&self, _id: u64) -> Option<TextureData> {
        None
    }
}

// ─── Default Geometry ─────────────────────────────────────────────────────────

/// Unit cube centered at the origin, used as the default mesh so renderables
/// with unresolved meshes still have something to fall back on once the
/// defaults are seeded.
#[must_use]
pub fn generate_cube(extent: f32) -> MeshData {
    let e = extent;
    // (face normal, tangent, four corners)
    let faces: [([f32; 3], [f32; 3], [[f32; 3]; 4]); 6] = [
        (
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
            [[-e, -e, e], [e, -e, e], [e, e, e], [-e, e, e]],
        ),
        (
            [0.0, 0.0, -1.0],
            [-1.0, 0.0, 0.0],
            [[e, -e, -e], [-e, -e, -e], [-e, e, -e], [e, e, -e]],
        ),
        (
            [1.0, 0.0, 0.0],
            [0.0, 0.0, -1.0],
            [[e, -e, e], [e, -e, -e], [e, e, -e], [e, e, e]],
        ),
        (
            [-1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [[-e, -e, -e], [-e, -e, e], [-e, e, e], [-e, e, -e]],
        ),
        (
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [[-e, e, e], [e, e, e], [e, e, -e], [-e, e, -e]],
        ),
        (
            [0.0, -1.0, 0.0],
            [1.0, 0.0, 0.0],
            [[-e, -e, -e], [e, -e, -e], [e, -e, e], [-e, -e, e]],
        ),
    ];

    let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
    let mut mesh = MeshData {
        vertices: Vec::with_capacity(24),
        indices: Vec::with_capacity(36),
    };
    for (normal, tangent, corners) in faces {
        let base = mesh.vertices.len() as u32;
        for (corner, uv) in corners.iter().zip(uvs) {
            mesh.vertices.push(Vertex {
                position: *corner,
                normal,
                tangent,
                color: [1.0, 1.0, 1.0],
                uv,
            });
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("mesh/rock"), content_hash("mesh/rock"));
        assert_ne!(content_hash("mesh/rock"), content_hash("mesh/rock2"));
    }

    #[test]
    fn cube_has_closed_topology() {
        let cube = generate_cube(1.0);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
    }
}
