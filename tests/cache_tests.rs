//! GPU Asset Cache Tests
//!
//! Tests for:
//! - Lazy upload-on-demand with loader-reported absence
//! - Upload-ticket enqueueing on the shared queue
//! - Frame-scoped eviction vs. persistent lifetime
//! - Transitive texture upload for materials
//! - Default asset seeding

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use sigil::assets::{
    default_material_id, default_mesh_id, generate_cube, AssetSource, MaterialData, MeshData,
    TextureData,
};
use sigil::cache::{white_texture_id, GpuAssetCache};
use sigil::gpu::headless::HeadlessDevice;
use sigil::gpu::{TextureFormat, UploadQueue};
use sigil::RenderDevice;

/// Loader over fixed tables, counting how often it is consulted.
#[derive(Default)]
struct StaticSource {
    meshes: HashMap<u64, MeshData>,
    materials: HashMap<u64, MaterialData>,
    textures: HashMap<u64, TextureData>,
    mesh_loads: Cell<u32>,
}

impl AssetSource for StaticSource {
    fn load_mesh(&self, id: u64) -> Option<MeshData> {
        self.mesh_loads.set(self.mesh_loads.get() + 1);
        self.meshes.get(&id).cloned()
    }
    fn load_material(&self, id: u64) -> Option<MaterialData> {
        self.materials.get(&id).cloned()
    }
    fn load_texture(&self, id: u64) -> Option<TextureData> {
        self.textures.get(&id).cloned()
    }
}

fn white_pixel() -> TextureData {
    TextureData {
        pixels: vec![255; 4],
        format: TextureFormat::Rgba8Unorm,
        width: 1,
        height: 1,
    }
}

fn test_setup() -> (HeadlessDevice, Arc<UploadQueue>, GpuAssetCache, StaticSource) {
    let device = HeadlessDevice::new();
    device.register_shader("standard_forward", "");
    let uploads = Arc::new(UploadQueue::new());
    let cache = GpuAssetCache::new(Arc::clone(&uploads));

    let mut source = StaticSource::default();
    source.meshes.insert(1, generate_cube(1.0));
    let mut material = MaterialData::default();
    material.texture_refs.push(50);
    source.materials.insert(2, material);
    source.textures.insert(50, white_pixel());

    (device, uploads, cache, source)
}

#[test]
fn absent_source_asset_is_a_miss_without_insertion() {
    let (device, _uploads, mut cache, source) = test_setup();

    assert!(cache.get_or_upload_mesh(&device, &source, 999, false).is_none());
    assert_eq!(cache.mesh_count(), 0);

    // No negative caching: the loader is consulted again on the next ask,
    // so an asset that appears later resolves without cache involvement.
    assert!(cache.get_or_upload_mesh(&device, &source, 999, false).is_none());
    assert_eq!(source.mesh_loads.get(), 2);
}

#[test]
fn hit_uploads_once_and_stops_consulting_the_loader() {
    let (device, _uploads, mut cache, source) = test_setup();

    assert!(cache.get_or_upload_mesh(&device, &source, 1, false).is_some());
    assert!(cache.get_or_upload_mesh(&device, &source, 1, false).is_some());
    assert_eq!(source.mesh_loads.get(), 1);
    assert_eq!(cache.mesh_count(), 1);
}

#[test]
fn uploads_enqueue_tickets_on_the_shared_queue() {
    let (device, uploads, mut cache, source) = test_setup();
    device.set_deferred_uploads(true);

    cache.get_or_upload_mesh(&device, &source, 1, false);
    assert!(uploads.pending_count() > 0);

    uploads.drain(&device);
    assert_eq!(uploads.pending_count(), 0);
}

#[test]
fn material_upload_is_transitive_over_textures() {
    let (device, _uploads, mut cache, source) = test_setup();

    assert!(cache.get_or_upload_material(&device, &source, 2, false).is_some());
    assert_eq!(cache.material_count(), 1);
    assert_eq!(cache.texture_count(), 1, "referenced texture uploaded too");
    assert!(cache.texture(50).is_some());
}

#[test]
fn unknown_shader_fails_material_upload_without_insertion() {
    let device = HeadlessDevice::new(); // no shaders registered
    let uploads = Arc::new(UploadQueue::new());
    let mut cache = GpuAssetCache::new(uploads);
    let mut source = StaticSource::default();
    source.materials.insert(7, MaterialData::default());

    assert!(cache.get_or_upload_material(&device, &source, 7, false).is_none());
    assert_eq!(cache.material_count(), 0);
}

#[test]
fn frame_scoped_entries_are_evicted_persistent_survive() {
    let (device, _uploads, mut cache, source) = test_setup();

    cache.get_or_upload_mesh(&device, &source, 1, true);
    cache.insert_mesh(&device, 3, &generate_cube(0.5), false);
    cache.insert_texture(&device, 60, &white_pixel(), true);
    assert_eq!(cache.mesh_count(), 2);
    assert_eq!(cache.texture_count(), 1);

    cache.clear_frame_allocated(&device);
    assert!(cache.mesh(1).is_none(), "frame-scoped mesh swept");
    assert!(cache.mesh(3).is_some(), "persistent mesh survives");
    assert_eq!(cache.texture_count(), 0);
}

#[test]
fn clear_releases_everything() {
    let (device, _uploads, mut cache, source) = test_setup();
    cache.get_or_upload_mesh(&device, &source, 1, false);
    cache.get_or_upload_material(&device, &source, 2, false);

    let buffers_before = device.buffer_count();
    assert!(buffers_before > 0);

    cache.clear(&device);
    assert_eq!(cache.mesh_count(), 0);
    assert_eq!(cache.material_count(), 0);
    assert_eq!(cache.texture_count(), 0);
    assert!(device.buffer_count() < buffers_before);
}

#[test]
fn upload_defaults_seeds_well_known_ids() {
    let (device, _uploads, mut cache, _source) = test_setup();
    cache.upload_defaults(&device);

    assert!(cache.mesh(default_mesh_id()).is_some());
    assert!(cache.material(default_material_id()).is_some());
    assert!(cache.texture(white_texture_id()).is_some());
}
