//! Renderable Batching
//!
//! Groups the live renderable set by (material, mesh) and packs per-instance
//! data into two contiguous buffers, one transform row and one id row per
//! instance. Instances sharing a (material, mesh) pair occupy a contiguous
//! subrange of both buffers, so each group is drawable with a single
//! instanced draw whose `first_instance` is the group's base row.
//!
//! Grouping is stable on three keys: material id (first-seen order), mesh id
//! (first-seen order within its material), and registry iteration order
//! within the group. The row order is load-bearing — shaders index the packed
//! buffers with the instance index.
//!
//! A renderable whose mesh or material does not resolve in the asset cache
//! this frame is skipped: it claims no row, breaks no other instance's
//! indexing, and becomes eligible again the moment a later frame's cache
//! fill makes both ids resolve.

use glam::Mat4;
use rustc_hash::FxHashMap;

use crate::cache::GpuAssetCache;

use super::renderable::RenderableRegistry;

/// Instances of one (material, mesh) pair, contiguous in the packed buffers.
#[derive(Clone, Debug)]
pub struct MeshGroup {
    pub mesh_id: u64,
    /// Base row of this group in the packed buffers.
    pub first_instance: u32,
    /// Selection ids in packed row order.
    pub selection_ids: Vec<u32>,
}

impl MeshGroup {
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.selection_ids.len() as u32
    }
}

/// All mesh groups sharing one material.
#[derive(Clone, Debug)]
pub struct MaterialGroup {
    pub material_id: u64,
    pub meshes: Vec<MeshGroup>,
}

/// Result of one batch build. Rebuilt from scratch every frame; never
/// persisted.
#[derive(Clone, Debug, Default)]
pub struct BuiltBatch {
    pub groups: Vec<MaterialGroup>,
    /// One transform per resolvable instance, then one per widget instance.
    pub transforms: Vec<Mat4>,
    /// One selection id per resolvable instance (widgets excluded).
    pub ids: Vec<u32>,
    /// Count of resolvable scene instances (excludes the widget tail).
    pub total: u32,
    /// First row of the widget tail in `transforms`.
    pub widget_base: u32,
}

impl BuiltBatch {
    /// Total state changes a draw loop needs: one per (material, mesh) pair.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.iter().map(|g| g.meshes.len()).sum()
    }
}

/// Build the frame's batch from the live renderable set.
///
/// Widget renderables are appended to the transform buffer tail in registry
/// order but never grouped; the typically tiny overlay set is drawn one
/// instance at a time.
#[must_use]
pub fn build_batch(
    renderables: &RenderableRegistry,
    widgets: &RenderableRegistry,
    cache: &GpuAssetCache,
) -> BuiltBatch {
    // Pass 1: group resolvable instances, preserving first-seen order on
    // both keys.
    struct PendingGroup {
        material_id: u64,
        meshes: Vec<(u64, Vec<(u32, Mat4)>)>,
    }
    let mut groups: Vec<PendingGroup> = Vec::new();
    let mut material_index: FxHashMap<u64, usize> = FxHashMap::default();
    let mut total: u32 = 0;

    for (_, renderable) in renderables.iter() {
        if !cache.contains_material(renderable.material_id) {
            continue;
        }
        if !cache.contains_mesh(renderable.mesh_id) {
            continue;
        }

        let group_index = *material_index
            .entry(renderable.material_id)
            .or_insert_with(|| {
                groups.push(PendingGroup {
                    material_id: renderable.material_id,
                    meshes: Vec::new(),
                });
                groups.len() - 1
            });
        let group = &mut groups[group_index];
        let mesh_index = group
            .meshes
            .iter()
            .position(|(mesh_id, _)| *mesh_id == renderable.mesh_id)
            .unwrap_or_else(|| {
                group.meshes.push((renderable.mesh_id, Vec::new()));
                group.meshes.len() - 1
            });
        group.meshes[mesh_index]
            .1
            .push((renderable.selection_id, renderable.transform));
        total += 1;
    }

    // Pass 2: flatten in group order into exactly-sized packed buffers.
    let widget_count = widgets.len() as u32;
    let mut batch = BuiltBatch {
        groups: Vec::with_capacity(groups.len()),
        transforms: Vec::with_capacity((total + widget_count) as usize),
        ids: Vec::with_capacity(total as usize),
        total,
        widget_base: total,
    };

    for pending in groups {
        let mut material_group = MaterialGroup {
            material_id: pending.material_id,
            meshes: Vec::with_capacity(pending.meshes.len()),
        };
        for (mesh_id, instances) in pending.meshes {
            let first_instance = batch.transforms.len() as u32;
            let mut selection_ids = Vec::with_capacity(instances.len());
            for (selection_id, transform) in instances {
                batch.transforms.push(transform);
                batch.ids.push(selection_id);
                selection_ids.push(selection_id);
            }
            material_group.meshes.push(MeshGroup {
                mesh_id,
                first_instance,
                selection_ids,
            });
        }
        batch.groups.push(material_group);
    }

    // Widget tail: transforms only, never grouped.
    for (_, widget) in widgets.iter() {
        batch.transforms.push(widget.transform);
    }

    debug_assert_eq!(batch.transforms.len() as u32, total + widget_count);
    debug_assert_eq!(batch.ids.len() as u32, total);
    batch
}
