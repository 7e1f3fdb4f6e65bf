//! Batcher Integration Tests
//!
//! Tests for:
//! - Stable (material, mesh, insertion-order) grouping
//! - Contiguous packed-buffer subranges with per-group base offsets
//! - Exclusion of renderables whose assets do not resolve
//! - Widget tail placement after the batched rows

use sigil::assets::{generate_cube, MaterialData};
use sigil::cache::GpuAssetCache;
use sigil::gpu::headless::HeadlessDevice;
use sigil::gpu::UploadQueue;
use sigil::RenderDevice;
use sigil::scene::batch::build_batch;
use sigil::scene::renderable::{Renderable, RenderableRegistry};

use std::sync::Arc;

const MESH_A: u64 = 0xA;
const MESH_B: u64 = 0xB;
const MAT_M: u64 = 0x100;
const MAT_N: u64 = 0x200;

fn cache_with_assets(device: &HeadlessDevice) -> GpuAssetCache {
    device.register_shader("standard_forward", "");
    let mut cache = GpuAssetCache::new(Arc::new(UploadQueue::new()));
    let cube = generate_cube(0.5);
    cache.insert_mesh(device, MESH_A, &cube, false);
    cache.insert_mesh(device, MESH_B, &cube, false);
    cache.insert_material(device, MAT_M, &MaterialData::default(), false);
    cache.insert_material(device, MAT_N, &MaterialData::default(), false);
    cache
}

fn renderable(mesh: u64, material: u64, selection_id: u32) -> Renderable {
    Renderable::new(mesh, material).with_selection_id(selection_id)
}

#[test]
fn three_key_grouping_with_contiguous_rows() {
    let device = HeadlessDevice::new();
    let cache = cache_with_assets(&device);

    let mut registry = RenderableRegistry::new();
    // R1..R3: (M, A); R4: (M, B); R5: (N, A).
    registry.add(renderable(MESH_A, MAT_M, 1));
    registry.add(renderable(MESH_A, MAT_M, 2));
    registry.add(renderable(MESH_A, MAT_M, 3));
    registry.add(renderable(MESH_B, MAT_M, 4));
    registry.add(renderable(MESH_A, MAT_N, 5));

    let widgets = RenderableRegistry::new();
    let batch = build_batch(&registry, &widgets, &cache);

    assert_eq!(batch.total, 5);
    assert_eq!(batch.transforms.len(), 5);
    assert_eq!(batch.ids.len(), 5);
    assert_eq!(batch.groups.len(), 2);

    let m_group = &batch.groups[0];
    assert_eq!(m_group.material_id, MAT_M);
    assert_eq!(m_group.meshes.len(), 2);
    assert_eq!(m_group.meshes[0].mesh_id, MESH_A);
    assert_eq!(m_group.meshes[0].first_instance, 0);
    assert_eq!(m_group.meshes[0].selection_ids, vec![1, 2, 3]);
    assert_eq!(m_group.meshes[1].mesh_id, MESH_B);
    assert_eq!(m_group.meshes[1].first_instance, 3);
    assert_eq!(m_group.meshes[1].selection_ids, vec![4]);

    let n_group = &batch.groups[1];
    assert_eq!(n_group.material_id, MAT_N);
    assert_eq!(n_group.meshes[0].mesh_id, MESH_A);
    assert_eq!(n_group.meshes[0].first_instance, 4);
    assert_eq!(n_group.meshes[0].selection_ids, vec![5]);

    // Packed id rows follow group order.
    assert_eq!(batch.ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn interleaved_registration_preserves_insertion_order_within_groups() {
    let device = HeadlessDevice::new();
    let cache = cache_with_assets(&device);

    let mut registry = RenderableRegistry::new();
    registry.add(renderable(MESH_A, MAT_M, 10));
    registry.add(renderable(MESH_A, MAT_N, 20));
    registry.add(renderable(MESH_A, MAT_M, 11));
    registry.add(renderable(MESH_A, MAT_N, 21));
    registry.add(renderable(MESH_A, MAT_M, 12));

    let batch = build_batch(&registry, &RenderableRegistry::new(), &cache);

    assert_eq!(batch.groups[0].meshes[0].selection_ids, vec![10, 11, 12]);
    assert_eq!(batch.groups[1].meshes[0].selection_ids, vec![20, 21]);
    // First-seen material order, not id order.
    assert_eq!(batch.groups[0].material_id, MAT_M);
    assert_eq!(batch.groups[1].material_id, MAT_N);
}

#[test]
fn unresolvable_renderables_are_excluded_without_corrupting_rows() {
    let device = HeadlessDevice::new();
    let cache = cache_with_assets(&device);

    let mut registry = RenderableRegistry::new();
    registry.add(renderable(MESH_A, MAT_M, 1));
    registry.add(renderable(0xDEAD, MAT_M, 2)); // mesh never uploaded
    registry.add(renderable(MESH_A, 0xBEEF, 3)); // material never uploaded
    registry.add(renderable(MESH_A, MAT_M, 4));

    let batch = build_batch(&registry, &RenderableRegistry::new(), &cache);

    assert_eq!(batch.total, 2);
    assert_eq!(batch.transforms.len(), 2);
    assert_eq!(batch.ids, vec![1, 4]);
    assert_eq!(batch.groups[0].meshes[0].selection_ids, vec![1, 4]);
}

#[test]
fn late_cache_fill_makes_renderable_eligible_next_build() {
    let device = HeadlessDevice::new();
    let mut cache = cache_with_assets(&device);

    let missing_mesh = 0x777;
    let mut registry = RenderableRegistry::new();
    registry.add(renderable(missing_mesh, MAT_M, 9));

    let batch = build_batch(&registry, &RenderableRegistry::new(), &cache);
    assert_eq!(batch.total, 0);
    assert!(batch.transforms.is_empty());

    // Manual insertion; no registry special-casing needed.
    cache.insert_mesh(&device, missing_mesh, &generate_cube(1.0), false);
    let batch = build_batch(&registry, &RenderableRegistry::new(), &cache);
    assert_eq!(batch.total, 1);
    assert_eq!(batch.ids, vec![9]);
}

#[test]
fn widget_tail_follows_batched_rows() {
    let device = HeadlessDevice::new();
    let cache = cache_with_assets(&device);

    let mut registry = RenderableRegistry::new();
    registry.add(renderable(MESH_A, MAT_M, 1));
    registry.add(renderable(0xDEAD, MAT_M, 2)); // unresolvable
    registry.add(renderable(MESH_B, MAT_M, 3));

    let mut widgets = RenderableRegistry::new();
    widgets.add(renderable(MESH_A, MAT_M, 100));
    widgets.add(renderable(MESH_A, MAT_M, 101));

    let batch = build_batch(&registry, &widgets, &cache);

    // Widget base counts resolvable instances, not raw registry length.
    assert_eq!(batch.total, 2);
    assert_eq!(batch.widget_base, 2);
    assert_eq!(batch.transforms.len(), 4);
    // Ids cover only the batched rows.
    assert_eq!(batch.ids.len(), 2);
}

#[test]
fn empty_registry_builds_empty_batch() {
    let device = HeadlessDevice::new();
    let cache = cache_with_assets(&device);
    let batch = build_batch(
        &RenderableRegistry::new(),
        &RenderableRegistry::new(),
        &cache,
    );
    assert_eq!(batch.total, 0);
    assert_eq!(batch.group_count(), 0);
    assert!(batch.transforms.is_empty());
}
