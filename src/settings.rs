//! Renderer Settings
//!
//! Static configuration resolved before the first frame. Runtime toggles
//! (pause, debug view) live on the scene; anything here requires tearing down
//! frame resources to change, so it is set once at construction.

/// Configuration for the frame scheduler and the builtin pass set.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    /// Side length of the square sun shadow map.
    pub shadow_resolution: u32,
    /// Side length of the cubic voxel volume.
    pub voxel_resolution: u32,
    /// Mip levels generated for the voxel volume.
    pub voxel_mip_count: u32,
    /// Whether the voxelization pass and its mip chain run at all.
    pub volumetrics: bool,
    /// Presentation clear color.
    pub clear_color: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_resolution: 2048,
            voxel_resolution: 128,
            voxel_mip_count: 6,
            volumetrics: true,
            clear_color: [0.1, 0.05, 0.1, 1.0],
        }
    }
}

impl RenderSettings {
    /// Voxel extent must survive `voxel_mip_count` halvings.
    #[must_use]
    pub fn validated(mut self) -> Self {
        let max_mips = 32 - self.voxel_resolution.max(1).leading_zeros();
        if self.voxel_mip_count > max_mips {
            log::warn!(
                "voxel_mip_count {} exceeds what a {}^3 volume supports; clamping to {}",
                self.voxel_mip_count,
                self.voxel_resolution,
                max_mips
            );
            self.voxel_mip_count = max_mips;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_is_clamped_to_resolution() {
        let settings = RenderSettings {
            voxel_resolution: 8,
            voxel_mip_count: 10,
            ..RenderSettings::default()
        }
        .validated();
        assert_eq!(settings.voxel_mip_count, 4); // 8 -> 4 -> 2 -> 1
    }
}
