//! Headless Recording Device
//!
//! A [`RenderDevice`] that allocates handles and records submissions without a
//! GPU. Tests and benches use it to assert on the exact command stream a frame
//! produces: pass order, draw calls, instance ranges, read-backs.
//!
//! Uploads complete immediately unless [`HeadlessDevice::set_deferred_uploads`]
//! is enabled, in which case tickets only complete on [`RenderDevice::tick`] —
//! that mode exercises the scheduler's drain-before-compile synchronization.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::Result;

use super::command::{Command, PassTarget, RecordedFrame};
use super::device::{RenderDevice, SubmitFence, UploadTicket};
use super::{BufferDesc, BufferId, PipelineDesc, PipelineId, TextureDesc, TextureId};

// ─── Frame Summaries ──────────────────────────────────────────────────────────

/// One draw call as seen by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawRecord {
    pub pipeline: Option<PipelineId>,
    pub index_count: u32,
    pub instance_count: u32,
    pub first_instance: u32,
}

/// Flattened record of one executed pass.
#[derive(Clone, Debug, Default)]
pub struct PassRecord {
    pub name: String,
    pub is_graphics: bool,
    pub color_attachment_count: usize,
    pub draws: Vec<DrawRecord>,
    pub dispatches: u32,
    pub blits: u32,
    pub texel_copies: u32,
}

/// Flattened record of one submitted frame.
#[derive(Clone, Debug, Default)]
pub struct FrameRecord {
    pub passes: Vec<PassRecord>,
}

impl FrameRecord {
    #[must_use]
    pub fn pass(&self, name: &str) -> Option<&PassRecord> {
        self.passes.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }

    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.passes.iter().map(|p| p.draws.len()).sum()
    }
}

// ─── Device ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct HeadlessState {
    buffers: FxHashMap<BufferId, BufferDesc>,
    textures: FxHashMap<TextureId, TextureDesc>,
    pipelines: FxHashSet<PipelineId>,
    shaders: FxHashSet<String>,
    deferred: Vec<flume::Sender<()>>,
    frames: Vec<FrameRecord>,
}

/// Recording device for tests and benches.
pub struct HeadlessDevice {
    next_id: AtomicU64,
    defer_uploads: std::sync::atomic::AtomicBool,
    /// Value delivered to `ReadBufferU32` replies; tests inject the expected
    /// pick id here.
    readback_value: AtomicU32,
    surface_target: Mutex<Option<TextureId>>,
    surface_size: Mutex<(u32, u32)>,
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            defer_uploads: std::sync::atomic::AtomicBool::new(false),
            readback_value: AtomicU32::new(0),
            surface_target: Mutex::new(None),
            surface_size: Mutex::new((1280, 720)),
            state: Mutex::new(HeadlessState::default()),
        }
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// When enabled, upload tickets stay pending until the next `tick()`.
    pub fn set_deferred_uploads(&self, deferred: bool) {
        self.defer_uploads.store(deferred, Ordering::Relaxed);
    }

    /// Inject the value future `ReadBufferU32` commands will deliver.
    pub fn set_readback_value(&self, value: u32) {
        self.readback_value.store(value, Ordering::Relaxed);
    }

    fn make_ticket(&self) -> UploadTicket {
        if self.defer_uploads.load(Ordering::Relaxed) {
            let (tx, rx) = flume::bounded(1);
            self.state.lock().deferred.push(tx);
            UploadTicket::new(rx)
        } else {
            UploadTicket::ready()
        }
    }

    // ── Inspection ───────────────────────────────────────────────────────

    #[must_use]
    pub fn submitted_frames(&self) -> Vec<FrameRecord> {
        self.state.lock().frames.clone()
    }

    #[must_use]
    pub fn last_frame(&self) -> Option<FrameRecord> {
        self.state.lock().frames.last().cloned()
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    #[must_use]
    pub fn pending_upload_count(&self) -> usize {
        self.state.lock().deferred.len()
    }
}

impl RenderDevice for HeadlessDevice {
    fn register_shader(&self, name: &str, _source: &str) {
        self.state.lock().shaders.insert(name.to_string());
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId> {
        let mut state = self.state.lock();
        if !state.shaders.contains(&desc.shader) {
            return Err(crate::errors::SigilError::ShaderNotFound(desc.shader.clone()));
        }
        let id = PipelineId(self.next());
        state.pipelines.insert(id);
        Ok(id)
    }

    fn destroy_pipeline(&self, id: PipelineId) {
        self.state.lock().pipelines.remove(&id);
    }

    fn create_buffer(&self, desc: &BufferDesc) -> BufferId {
        let id = BufferId(self.next());
        self.state.lock().buffers.insert(id, desc.clone());
        id
    }

    fn create_buffer_with_data(&self, desc: &BufferDesc, _data: &[u8]) -> (BufferId, UploadTicket) {
        let id = self.create_buffer(desc);
        (id, self.make_ticket())
    }

    fn write_buffer(&self, id: BufferId, _offset: u64, _data: &[u8]) {
        debug_assert!(
            self.state.lock().buffers.contains_key(&id),
            "write to destroyed buffer {id:?}"
        );
    }

    fn destroy_buffer(&self, id: BufferId) {
        self.state.lock().buffers.remove(&id);
    }

    fn create_texture(&self, desc: &TextureDesc) -> TextureId {
        let id = TextureId(self.next());
        self.state.lock().textures.insert(id, desc.clone());
        id
    }

    fn create_texture_with_data(&self, desc: &TextureDesc, _data: &[u8]) -> (TextureId, UploadTicket) {
        let id = self.create_texture(desc);
        (id, self.make_ticket())
    }

    fn destroy_texture(&self, id: TextureId) {
        self.state.lock().textures.remove(&id);
    }

    fn acquire_frame(&self) -> Result<TextureId> {
        let mut target = self.surface_target.lock();
        if let Some(id) = *target {
            return Ok(id);
        }
        let (width, height) = *self.surface_size.lock();
        let id = self.create_texture(&TextureDesc::attachment(
            "headless surface",
            width,
            height,
            super::TextureFormat::Bgra8Unorm,
        ));
        *target = Some(id);
        Ok(id)
    }

    fn submit(&self, frame: RecordedFrame) -> SubmitFence {
        let mut record = FrameRecord::default();
        let readback = self.readback_value.load(Ordering::Relaxed);

        for pass in frame.passes {
            let mut pass_record = PassRecord {
                name: pass.name,
                ..PassRecord::default()
            };
            if let PassTarget::Graphics { colors, .. } = &pass.target {
                pass_record.is_graphics = true;
                pass_record.color_attachment_count = colors.len();
            }
            let mut current_pipeline = None;
            for command in pass.commands.commands {
                match command {
                    Command::SetPipeline(id) => current_pipeline = Some(id),
                    Command::DrawIndexed {
                        index_count,
                        instance_count,
                        first_instance,
                    } => pass_record.draws.push(DrawRecord {
                        pipeline: current_pipeline,
                        index_count,
                        instance_count,
                        first_instance,
                    }),
                    Command::Draw {
                        vertex_count,
                        instance_count,
                    } => pass_record.draws.push(DrawRecord {
                        pipeline: current_pipeline,
                        index_count: vertex_count,
                        instance_count,
                        first_instance: 0,
                    }),
                    Command::Dispatch { .. } => pass_record.dispatches += 1,
                    Command::BlitMip { .. } => pass_record.blits += 1,
                    Command::CopyTexelToBuffer { .. } => pass_record.texel_copies += 1,
                    Command::ReadBufferU32 { reply, .. } => {
                        let _ = reply.send(readback);
                    }
                    _ => {}
                }
            }
            record.passes.push(pass_record);
        }

        self.state.lock().frames.push(record);
        SubmitFence::ready()
    }

    fn present(&self, _target: TextureId) -> Result<()> {
        Ok(())
    }

    fn resize_surface(&self, width: u32, height: u32) -> Result<()> {
        *self.surface_size.lock() = (width, height);
        // Next acquire_frame allocates a fresh target at the new size.
        let old = self.surface_target.lock().take();
        if let Some(id) = old {
            self.destroy_texture(id);
        }
        Ok(())
    }

    fn tick(&self) {
        let deferred = std::mem::take(&mut self.state.lock().deferred);
        for tx in deferred {
            let _ = tx.send(());
        }
    }

    fn wait_idle(&self) {
        self.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::BufferUsage;

    #[test]
    fn deferred_uploads_complete_on_tick() {
        let device = HeadlessDevice::new();
        device.set_deferred_uploads(true);
        let desc = BufferDesc {
            label: "test",
            size: 16,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        };
        let (_, ticket) = device.create_buffer_with_data(&desc, &[0u8; 16]);
        assert!(!ticket.is_done());
        device.tick();
        assert!(ticket.is_done());
    }

    #[test]
    fn pipeline_requires_registered_shader() {
        let device = HeadlessDevice::new();
        let desc = PipelineDesc {
            label: "missing",
            shader: "nope".to_string(),
            kind: crate::gpu::PipelineKind::Compute,
        };
        assert!(device.create_pipeline(&desc).is_err());
        device.register_shader("nope", "");
        assert!(device.create_pipeline(&desc).is_ok());
    }
}
