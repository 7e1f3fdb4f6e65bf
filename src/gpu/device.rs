//! Render Device Trait & Upload Synchronization
//!
//! [`RenderDevice`] is the seam between the renderer core and a concrete
//! graphics API. All methods take `&self`; implementations use interior
//! mutability, which lets the device sit behind an `Arc` and be shared with
//! asset-conversion threads that enqueue uploads concurrently.
//!
//! # Upload synchronization
//!
//! Resource creation is synchronous from the caller's point of view, but the
//! actual GPU transfer completes asynchronously. Creation methods that move
//! data return an [`UploadTicket`]; the frame scheduler drains all outstanding
//! tickets before compiling a frame's pass graph, so no pass ever samples a
//! half-uploaded resource.

use parking_lot::Mutex;

use crate::errors::Result;

use super::command::RecordedFrame;
use super::{BufferDesc, BufferId, PipelineDesc, PipelineId, TextureDesc, TextureId};

// ─── Tickets & Fences ─────────────────────────────────────────────────────────

/// Completion handle for an asynchronous GPU upload.
///
/// Done when the channel has been signalled *or* dropped — a dropped sender
/// means the transfer queue finished and discarded its completion callbacks,
/// which counts as done rather than as an error.
pub struct UploadTicket {
    rx: flume::Receiver<()>,
}

impl UploadTicket {
    #[must_use]
    pub fn new(rx: flume::Receiver<()>) -> Self {
        Self { rx }
    }

    /// A ticket that is already complete.
    #[must_use]
    pub fn ready() -> Self {
        let (tx, rx) = flume::bounded(1);
        let _ = tx.send(());
        Self { rx }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) | Err(flume::TryRecvError::Disconnected) => true,
            Err(flume::TryRecvError::Empty) => false,
        }
    }

    /// Block until the upload lands, pumping the device so completion
    /// callbacks actually run.
    pub fn block_on(&self, device: &dyn RenderDevice) {
        while !self.is_done() {
            device.tick();
        }
    }
}

/// Completion handle for a submitted frame. Same semantics as
/// [`UploadTicket`], kept distinct because the scheduler stores one per
/// in-flight frame slot.
pub struct SubmitFence {
    rx: flume::Receiver<()>,
}

impl SubmitFence {
    #[must_use]
    pub fn new(rx: flume::Receiver<()>) -> Self {
        Self { rx }
    }

    #[must_use]
    pub fn ready() -> Self {
        let (tx, rx) = flume::bounded(1);
        let _ = tx.send(());
        Self { rx }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) | Err(flume::TryRecvError::Disconnected) => true,
            Err(flume::TryRecvError::Empty) => false,
        }
    }

    pub fn block_on(&self, device: &dyn RenderDevice) {
        while !self.is_done() {
            device.tick();
        }
    }
}

/// Lock-protected list of outstanding upload tickets.
///
/// The render thread drains it between frames; asset-conversion code running
/// on other threads may push into it concurrently, hence the mutex.
#[derive(Default)]
pub struct UploadQueue {
    pending: Mutex<Vec<UploadTicket>>,
}

impl UploadQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, ticket: UploadTicket) {
        self.pending.lock().push(ticket);
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Block until every outstanding upload has landed. Hard synchronization
    /// point: called before a frame's pass graph is compiled.
    pub fn drain(&self, device: &dyn RenderDevice) {
        let tickets = std::mem::take(&mut *self.pending.lock());
        for ticket in &tickets {
            ticket.block_on(device);
        }
    }
}

// ─── Device Trait ─────────────────────────────────────────────────────────────

/// The renderer's view of a graphics device.
///
/// Implementations: [`WgpuDevice`](super::wgpu_backend::WgpuDevice) and
/// [`HeadlessDevice`](super::headless::HeadlessDevice).
pub trait RenderDevice: Send + Sync {
    // ── Shaders & Pipelines ──────────────────────────────────────────────

    /// Register a named shader module. Pipelines reference modules by name.
    fn register_shader(&self, name: &str, source: &str);

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineId>;

    fn destroy_pipeline(&self, id: PipelineId);

    // ── Buffers ──────────────────────────────────────────────────────────

    fn create_buffer(&self, desc: &BufferDesc) -> BufferId;

    /// Create a buffer and schedule its contents for upload. The returned
    /// ticket completes when the data is GPU-visible.
    fn create_buffer_with_data(&self, desc: &BufferDesc, data: &[u8]) -> (BufferId, UploadTicket);

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]);

    fn destroy_buffer(&self, id: BufferId);

    // ── Textures ─────────────────────────────────────────────────────────

    fn create_texture(&self, desc: &TextureDesc) -> TextureId;

    fn create_texture_with_data(&self, desc: &TextureDesc, data: &[u8]) -> (TextureId, UploadTicket);

    fn destroy_texture(&self, id: TextureId);

    // ── Frame Execution ──────────────────────────────────────────────────

    /// Acquire the presentable target for the current frame.
    fn acquire_frame(&self) -> Result<TextureId>;

    /// Execute a recorded frame. The fence completes when the GPU is done
    /// with every resource the frame referenced.
    fn submit(&self, frame: RecordedFrame) -> SubmitFence;

    /// Present the previously acquired frame target.
    fn present(&self, target: TextureId) -> Result<()>;

    /// Tear down and rebuild swapchain-equivalent resources.
    fn resize_surface(&self, width: u32, height: u32) -> Result<()>;

    // ── Synchronization ──────────────────────────────────────────────────

    /// Pump asynchronous completions (upload callbacks, map callbacks).
    fn tick(&self);

    /// Block until the GPU has finished all submitted work.
    fn wait_idle(&self);
}
