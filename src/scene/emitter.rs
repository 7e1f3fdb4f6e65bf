//! GPU Particle Emitters
//!
//! Emitters own a persistent particle-transform buffer that a compute pass
//! integrates in place each frame; the forward pass then draws the emitter's
//! mesh instanced over that buffer. The update pass declares no graph
//! resources — declaration order places it before the forward pass that
//! samples its results.
//!
//! An emitter expires at a fixed time; expired emitters are pruned during
//! scene preparation, slightly after their expiry so in-flight frames never
//! reference a destroyed buffer.

use glam::Mat4;

use crate::gpu::{BufferDesc, BufferId, BufferUsage, RenderDevice};
use crate::uniforms::EmitterParams;

/// Construction parameters for an emitter.
#[derive(Clone, Debug)]
pub struct EmitterSpec {
    /// Mesh drawn once per particle.
    pub mesh_id: u64,
    pub particle_count: u32,
    /// Seconds until the emitter removes itself.
    pub lifetime: f32,
    /// Initial transform shared by every particle.
    pub transform: Mat4,
}

/// A live emitter with GPU-resident simulation state.
pub struct GpuEmitter {
    pub mesh_id: u64,
    pub particle_count: u32,
    pub expires_at: f32,
    /// `particle_count` transforms, updated in place by the compute pass.
    pub particle_buffer: BufferId,
    /// Per-frame [`EmitterParams`] block.
    pub params_buffer: BufferId,
}

impl GpuEmitter {
    /// Allocate GPU state for a new emitter. Buffers are persistent (owned
    /// by the emitter, not the frame arena) because the simulation state
    /// must survive across frames.
    pub fn new(device: &dyn RenderDevice, spec: &EmitterSpec, now: f32) -> Self {
        let seed_transforms = vec![spec.transform; spec.particle_count as usize];
        let (particle_buffer, _ticket) = device.create_buffer_with_data(
            &BufferDesc {
                label: "emitter particles",
                size: std::mem::size_of_val(seed_transforms.as_slice()) as u64,
                usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(&seed_transforms),
        );
        let params_buffer = device.create_buffer(&BufferDesc {
            label: "emitter params",
            size: std::mem::size_of::<EmitterParams>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        });
        Self {
            mesh_id: spec.mesh_id,
            particle_count: spec.particle_count,
            expires_at: now + spec.lifetime,
            particle_buffer,
            params_buffer,
        }
    }

    /// Upload this frame's simulation parameters.
    pub fn write_params(&self, device: &dyn RenderDevice, delta_time: f32, seed: u32) {
        let params = EmitterParams {
            count: self.particle_count,
            delta_time,
            seed,
            _pad: 0,
        };
        device.write_buffer(self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    pub fn destroy(&self, device: &dyn RenderDevice) {
        device.destroy_buffer(self.particle_buffer);
        device.destroy_buffer(self.params_buffer);
    }

    /// Workgroups needed to cover every particle (workgroup size 64).
    #[must_use]
    pub fn dispatch_size(&self) -> u32 {
        self.particle_count.div_ceil(64)
    }
}

/// Drop emitters whose expiry lies behind `now`, with a small grace period
/// so a frame already recorded against the buffer finishes first.
pub fn prune_expired(emitters: &mut Vec<GpuEmitter>, device: &dyn RenderDevice, now: f32) {
    emitters.retain(|emitter| {
        if emitter.expires_at <= now - 0.1 {
            emitter.destroy(device);
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;

    fn spec(lifetime: f32) -> EmitterSpec {
        EmitterSpec {
            mesh_id: 1,
            particle_count: 100,
            lifetime,
            transform: Mat4::IDENTITY,
        }
    }

    #[test]
    fn expired_emitters_are_pruned_after_grace() {
        let device = HeadlessDevice::new();
        let mut emitters = vec![
            GpuEmitter::new(&device, &spec(1.0), 0.0),
            GpuEmitter::new(&device, &spec(10.0), 0.0),
        ];

        prune_expired(&mut emitters, &device, 1.05);
        assert_eq!(emitters.len(), 2, "grace period keeps the emitter alive");

        prune_expired(&mut emitters, &device, 1.2);
        assert_eq!(emitters.len(), 1);
        assert_eq!(emitters[0].expires_at, 10.0);
    }

    #[test]
    fn dispatch_covers_all_particles() {
        let device = HeadlessDevice::new();
        let emitter = GpuEmitter::new(&device, &spec(1.0), 0.0);
        assert_eq!(emitter.dispatch_size(), 2); // 100 particles / 64
    }
}
