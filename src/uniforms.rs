//! GPU Uniform Block Layouts
//!
//! Plain-old-data structs uploaded once per frame. Field order and padding
//! must match the builtin WGSL declarations in
//! [`gpu::shaders`](crate::gpu::shaders); every struct here is 16-byte
//! aligned per uniform buffer rules.

use glam::{Mat4, Vec3};

/// `Camera` in WGSL: view-projection plus eye position.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

impl CameraUniforms {
    #[must_use]
    pub fn new(view_proj: Mat4, eye: Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            eye: eye.extend(1.0).to_array(),
        }
    }
}

/// `VoxelCameras` in WGSL: one orthographic projection per major axis plus
/// the half-extent of the voxelized region.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VoxelCameraUniforms {
    pub axes: [[[f32; 4]; 4]; 3],
    pub extent: [f32; 4],
}

impl VoxelCameraUniforms {
    /// Axis-aligned orthographic cameras covering a cube of `half_extent`.
    #[must_use]
    pub fn axis_aligned(half_extent: f32) -> Self {
        let e = half_extent;
        let ortho = Mat4::orthographic_rh(-e, e, -e, e, 0.0, 2.0 * e);
        let looks = [
            Mat4::look_at_rh(Vec3::new(-e, 0.0, 0.0), Vec3::ZERO, Vec3::Z),
            Mat4::look_at_rh(Vec3::new(0.0, -e, 0.0), Vec3::ZERO, Vec3::Z),
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, -e), Vec3::ZERO, Vec3::X),
        ];
        Self {
            axes: looks.map(|look| (ortho * look).to_cols_array_2d()),
            extent: [half_extent, 0.0, 0.0, 0.0],
        }
    }
}

/// `CompositeData` in WGSL: everything the composite pass needs to fold the
/// scene attachments into the final image.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeUniforms {
    pub inverse_vp: [[f32; 4]; 4],
    pub light_vp: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub sun_data: [f32; 4],
    pub ambient: [f32; 4],
    pub debug_mode: u32,
    pub time: f32,
    pub voxel_lod: u32,
    pub _pad: u32,
}

/// `EmitterParams` in WGSL.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EmitterParams {
    pub count: u32,
    pub delta_time: f32,
    pub seed: u32,
    pub _pad: u32,
}

/// Debug view selector consumed by the composite pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum DebugView {
    #[default]
    Lit = 0,
    BaseColor = 1,
    Emissive = 2,
    Position = 3,
    Normal = 4,
    Depth = 5,
    Voxelization = 6,
    None = 7,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<CameraUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<VoxelCameraUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<CompositeUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<EmitterParams>() % 16, 0);
    }
}
