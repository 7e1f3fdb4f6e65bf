//! Per-Frame GPU Allocations
//!
//! [`FrameArena`] owns every buffer and texture whose lifetime is exactly one
//! frame: packed instance buffers, per-scene uniform blocks, pass attachments,
//! read-back staging. Allocations are recycled rather than destroyed —
//! `reset()` moves the frame's allocations to a free pool keyed by their
//! descriptor, and the next frame draws from the pool before asking the
//! device for fresh memory.
//!
//! The pool only ever grows during rendering; call
//! [`FrameArena::release_all`] after a resolution change (or at shutdown) to
//! return everything to the device.

use rustc_hash::FxHashMap;

use crate::gpu::{BufferDesc, BufferId, BufferUsage, RenderDevice, TextureDesc, TextureId};

#[derive(Clone, PartialEq, Eq, Hash)]
struct BufferKey {
    size: u64,
    usage: BufferUsage,
}

pub struct FrameArena {
    active_buffers: Vec<(BufferKey, BufferId)>,
    free_buffers: FxHashMap<BufferKey, Vec<BufferId>>,
    active_textures: Vec<(TextureDesc, TextureId)>,
    free_textures: FxHashMap<TextureDesc, Vec<TextureId>>,
}

impl Default for FrameArena {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameArena {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active_buffers: Vec::new(),
            free_buffers: FxHashMap::default(),
            active_textures: Vec::new(),
            free_textures: FxHashMap::default(),
        }
    }

    /// Allocate (or recycle) a frame-lifetime buffer.
    pub fn alloc_buffer(
        &mut self,
        device: &dyn RenderDevice,
        label: &'static str,
        size: u64,
        usage: BufferUsage,
    ) -> BufferId {
        let key = BufferKey { size, usage };
        let id = self
            .free_buffers
            .get_mut(&key)
            .and_then(Vec::pop)
            .unwrap_or_else(|| {
                device.create_buffer(&BufferDesc { label, size, usage })
            });
        self.active_buffers.push((key, id));
        id
    }

    /// Allocate a frame-lifetime buffer and fill it immediately.
    pub fn alloc_buffer_with_data(
        &mut self,
        device: &dyn RenderDevice,
        label: &'static str,
        usage: BufferUsage,
        data: &[u8],
    ) -> BufferId {
        let id = self.alloc_buffer(
            device,
            label,
            data.len().max(4) as u64,
            usage | BufferUsage::COPY_DST,
        );
        device.write_buffer(id, 0, data);
        id
    }

    /// Allocate (or recycle) a frame-lifetime texture.
    pub fn alloc_texture(&mut self, device: &dyn RenderDevice, desc: &TextureDesc) -> TextureId {
        let id = self
            .free_textures
            .get_mut(desc)
            .and_then(Vec::pop)
            .unwrap_or_else(|| device.create_texture(desc));
        self.active_textures.push((desc.clone(), id));
        id
    }

    /// End-of-frame sweep: everything allocated this frame becomes reusable.
    pub fn reset(&mut self) {
        for (key, id) in self.active_buffers.drain(..) {
            self.free_buffers.entry(key).or_default().push(id);
        }
        for (desc, id) in self.active_textures.drain(..) {
            self.free_textures.entry(desc).or_default().push(id);
        }
    }

    /// Return every pooled resource to the device. Used on resize and at
    /// shutdown; must not be called mid-frame.
    pub fn release_all(&mut self, device: &dyn RenderDevice) {
        self.reset();
        for (_, ids) in self.free_buffers.drain() {
            for id in ids {
                device.destroy_buffer(id);
            }
        }
        for (_, ids) in self.free_textures.drain() {
            for id in ids {
                device.destroy_texture(id);
            }
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_buffers.len() + self.active_textures.len()
    }

    #[must_use]
    pub fn pooled_count(&self) -> usize {
        self.free_buffers.values().map(Vec::len).sum::<usize>()
            + self.free_textures.values().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;

    #[test]
    fn arena_recycles_buffers_across_frames() {
        let device = HeadlessDevice::new();
        let mut arena = FrameArena::new();

        let first = arena.alloc_buffer(&device, "a", 256, BufferUsage::UNIFORM);
        arena.reset();
        let second = arena.alloc_buffer(&device, "a", 256, BufferUsage::UNIFORM);
        assert_eq!(first, second, "same-shaped allocation should be recycled");

        let third = arena.alloc_buffer(&device, "a", 512, BufferUsage::UNIFORM);
        assert_ne!(second, third, "different size must not share a slot");
    }

    #[test]
    fn release_all_empties_the_pool() {
        let device = HeadlessDevice::new();
        let mut arena = FrameArena::new();
        arena.alloc_buffer(&device, "a", 64, BufferUsage::STORAGE);
        arena.reset();
        assert_eq!(arena.pooled_count(), 1);
        arena.release_all(&device);
        assert_eq!(arena.pooled_count(), 0);
        assert_eq!(device.buffer_count(), 0);
    }
}
