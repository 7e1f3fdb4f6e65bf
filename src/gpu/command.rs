//! Command Recording with State Tracking
//!
//! Pass execute closures record into a [`PassEncoder`], which elides redundant
//! state changes (re-binding the same pipeline or buffer is free). The result
//! is a [`CommandList`] a backend replays verbatim — one list per pass, draws
//! in recorded order, which is what makes the batcher's `first_instance`
//! base-offset scheme sound.

use smallvec::SmallVec;

use super::{AttachmentView, BufferId, PipelineId, SamplerKind};

/// A single backend-agnostic command.
pub enum Command {
    SetPipeline(PipelineId),
    SetVertexBuffer {
        slot: u32,
        buffer: BufferId,
    },
    SetIndexBuffer {
        buffer: BufferId,
    },
    BindUniform {
        binding: u32,
        buffer: BufferId,
    },
    BindStorage {
        binding: u32,
        buffer: BufferId,
    },
    BindTexture {
        binding: u32,
        view: AttachmentView,
        sampler: SamplerKind,
    },
    /// Bind a texture without a companion sampler (depth attachments and
    /// integer textures read via `textureLoad`).
    BindTextureRaw {
        binding: u32,
        view: AttachmentView,
    },
    /// Bind a texture mip as a writable storage image (compute passes).
    BindStorageTexture {
        binding: u32,
        view: AttachmentView,
    },
    /// Non-indexed draw (fullscreen triangles).
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// Downsample one mip level into the next within the same texture.
    BlitMip {
        src: AttachmentView,
        dst: AttachmentView,
    },
    /// Copy a single texel into a CPU-visible buffer.
    CopyTexelToBuffer {
        src: AttachmentView,
        origin: [u32; 2],
        buffer: BufferId,
    },
    /// Read the first `u32` of a mappable buffer after submission and deliver
    /// it through `reply`. The channel end is dropped if delivery fails, which
    /// surfaces to the caller as a disconnected pick future.
    ReadBufferU32 {
        buffer: BufferId,
        reply: flume::Sender<u32>,
    },
}

/// Ordered command sequence for one pass.
#[derive(Default)]
pub struct CommandList {
    pub commands: Vec<Command>,
}

impl CommandList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of draw calls in the list. Test and profiling helper.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawIndexed { .. } | Command::Draw { .. }))
            .count()
    }
}

// ─── Pass Encoder ─────────────────────────────────────────────────────────────

/// Recording handle passed to pass execute closures.
///
/// Tracks the currently bound pipeline, vertex buffers and index buffer so
/// that per-group loops can bind unconditionally; duplicate binds are dropped
/// at record time instead of reaching the GPU.
pub struct PassEncoder {
    list: CommandList,
    current_pipeline: Option<PipelineId>,
    current_vertex_buffers: [Option<BufferId>; 4],
    current_index_buffer: Option<BufferId>,
    draw_count: u32,
}

impl PassEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: CommandList::default(),
            current_pipeline: None,
            current_vertex_buffers: [None; 4],
            current_index_buffer: None,
            draw_count: 0,
        }
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) {
        if self.current_pipeline != Some(pipeline) {
            self.list.commands.push(Command::SetPipeline(pipeline));
            self.current_pipeline = Some(pipeline);
        }
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferId) {
        let index = slot as usize;
        if self.current_vertex_buffers[index] != Some(buffer) {
            self.list
                .commands
                .push(Command::SetVertexBuffer { slot, buffer });
            self.current_vertex_buffers[index] = Some(buffer);
        }
    }

    pub fn set_index_buffer(&mut self, buffer: BufferId) {
        if self.current_index_buffer != Some(buffer) {
            self.list.commands.push(Command::SetIndexBuffer { buffer });
            self.current_index_buffer = Some(buffer);
        }
    }

    pub fn bind_uniform(&mut self, binding: u32, buffer: BufferId) {
        self.list
            .commands
            .push(Command::BindUniform { binding, buffer });
    }

    pub fn bind_storage(&mut self, binding: u32, buffer: BufferId) {
        self.list
            .commands
            .push(Command::BindStorage { binding, buffer });
    }

    pub fn bind_texture(&mut self, binding: u32, view: AttachmentView, sampler: SamplerKind) {
        self.list.commands.push(Command::BindTexture {
            binding,
            view,
            sampler,
        });
    }

    pub fn bind_texture_raw(&mut self, binding: u32, view: AttachmentView) {
        self.list
            .commands
            .push(Command::BindTextureRaw { binding, view });
    }

    pub fn bind_storage_texture(&mut self, binding: u32, view: AttachmentView) {
        self.list
            .commands
            .push(Command::BindStorageTexture { binding, view });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.list.commands.push(Command::Draw {
            vertex_count,
            instance_count,
        });
        self.draw_count += 1;
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_instance: u32) {
        self.list.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_instance,
        });
        self.draw_count += 1;
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.list.commands.push(Command::Dispatch { x, y, z });
    }

    pub fn blit_mip(&mut self, src: AttachmentView, dst: AttachmentView) {
        self.list.commands.push(Command::BlitMip { src, dst });
    }

    pub fn copy_texel_to_buffer(&mut self, src: AttachmentView, origin: [u32; 2], buffer: BufferId) {
        self.list
            .commands
            .push(Command::CopyTexelToBuffer { src, origin, buffer });
    }

    pub fn read_buffer_u32(&mut self, buffer: BufferId, reply: flume::Sender<u32>) {
        self.list.commands.push(Command::ReadBufferU32 { buffer, reply });
    }

    #[must_use]
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    #[must_use]
    pub fn finish(self) -> CommandList {
        self.list
    }
}

impl Default for PassEncoder {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Recorded Frame ───────────────────────────────────────────────────────────

/// Target a recorded pass renders into. `General` covers compute, transfer and
/// pure side-effect passes — anything without framebuffer attachments.
pub enum PassTarget {
    Graphics {
        colors: SmallVec<[ColorAttachment; 5]>,
        depth: Option<DepthAttachment>,
    },
    General,
}

pub struct ColorAttachment {
    pub view: AttachmentView,
    /// `Some` on the first write of the frame, `None` to load previous contents.
    pub clear: Option<super::ClearValue>,
}

pub struct DepthAttachment {
    pub view: AttachmentView,
    pub clear: Option<f32>,
}

/// One fully recorded pass: where to render and what to replay.
pub struct RecordedPass {
    pub name: String,
    pub target: PassTarget,
    pub commands: CommandList,
}

/// Everything a backend needs to execute one frame, in execution order.
pub struct RecordedFrame {
    pub passes: Vec<RecordedPass>,
}

impl RecordedFrame {
    /// Total draw calls across all passes.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.passes.iter().map(|p| p.commands.draw_count()).sum()
    }

    #[must_use]
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_elides_redundant_pipeline_binds() {
        let mut enc = PassEncoder::new();
        enc.set_pipeline(PipelineId(1));
        enc.set_pipeline(PipelineId(1));
        enc.set_pipeline(PipelineId(2));
        let list = enc.finish();
        let pipeline_binds = list
            .commands
            .iter()
            .filter(|c| matches!(c, Command::SetPipeline(_)))
            .count();
        assert_eq!(pipeline_binds, 2);
    }

    #[test]
    fn encoder_elides_redundant_buffer_binds() {
        let mut enc = PassEncoder::new();
        enc.set_vertex_buffer(0, BufferId(7));
        enc.set_vertex_buffer(0, BufferId(7));
        enc.set_index_buffer(BufferId(8));
        enc.set_index_buffer(BufferId(8));
        enc.draw_indexed(3, 1, 0);
        let list = enc.finish();
        assert_eq!(list.len(), 3); // vertex + index + draw
        assert_eq!(list.draw_count(), 1);
    }
}
