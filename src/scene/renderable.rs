//! Renderable Instances & Registry
//!
//! A [`Renderable`] is one drawable instance: two content-hash ids, a
//! transform, a lifetime flag and a selection id. The ids are opaque lookup
//! keys, not owning references — whether they resolve against the GPU asset
//! cache is re-checked every frame at batch time, because the referenced
//! asset may not be resident yet or may have been evicted.
//!
//! The registry hands out stable generational keys (slotmap): removal during
//! iteration is safe, freed slots are recycled, and a stale key is
//! invalidated by its generation rather than aliasing a newcomer.

use glam::Mat4;
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Stable handle to a renderable in a [`RenderableRegistry`].
    pub struct RenderableKey;
}

/// One drawable instance.
#[derive(Clone, Copy, Debug)]
pub struct Renderable {
    /// Content hash of the mesh asset.
    pub mesh_id: u64,
    /// Content hash of the material asset.
    pub material_id: u64,
    pub transform: Mat4,
    /// Swept automatically at the end of the frame that created it.
    pub frame_allocated: bool,
    /// Written to the info attachment for pick read-back.
    pub selection_id: u32,
}

impl Default for Renderable {
    fn default() -> Self {
        Self {
            mesh_id: crate::assets::default_mesh_id(),
            material_id: crate::assets::default_material_id(),
            transform: Mat4::IDENTITY,
            frame_allocated: false,
            selection_id: 0,
        }
    }
}

impl Renderable {
    #[must_use]
    pub fn new(mesh_id: u64, material_id: u64) -> Self {
        Self {
            mesh_id,
            material_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn with_selection_id(mut self, selection_id: u32) -> Self {
        self.selection_id = selection_id;
        self
    }

    #[must_use]
    pub fn frame_scoped(mut self) -> Self {
        self.frame_allocated = true;
        self
    }
}

/// Stable-handle collection of renderables.
#[derive(Default)]
pub struct RenderableRegistry {
    items: SlotMap<RenderableKey, Renderable>,
}

impl RenderableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, renderable: Renderable) -> RenderableKey {
        self.items.insert(renderable)
    }

    /// Remove by key. Removing an already-removed key is a no-op.
    pub fn remove(&mut self, key: RenderableKey) {
        self.items.remove(key);
    }

    #[must_use]
    pub fn get(&self, key: RenderableKey) -> Option<&Renderable> {
        self.items.get(key)
    }

    pub fn get_mut(&mut self, key: RenderableKey) -> Option<&mut Renderable> {
        self.items.get_mut(key)
    }

    /// Registry iteration order: slot order, which is the batcher's tertiary
    /// sort key.
    pub fn iter(&self) -> impl Iterator<Item = (RenderableKey, &Renderable)> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// End-of-frame sweep of frame-scoped instances.
    pub fn clear_frame_allocated(&mut self) {
        self.items.retain(|_, renderable| !renderable.frame_allocated);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_keys_do_not_alias_new_entries() {
        let mut registry = RenderableRegistry::new();
        let first = registry.add(Renderable::new(1, 1));
        registry.remove(first);
        let second = registry.add(Renderable::new(2, 2));
        assert!(registry.get(first).is_none());
        assert_eq!(registry.get(second).map(|r| r.mesh_id), Some(2));
    }

    #[test]
    fn frame_allocated_sweep_keeps_persistent_entries() {
        let mut registry = RenderableRegistry::new();
        let keep = registry.add(Renderable::new(1, 1));
        let sweep = registry.add(Renderable::new(2, 2).frame_scoped());
        registry.clear_frame_allocated();
        assert!(registry.get(keep).is_some());
        assert!(registry.get(sweep).is_none());
        assert_eq!(registry.len(), 1);
    }
}
