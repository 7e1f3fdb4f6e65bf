//! Builtin WGSL Shader Sources
//!
//! The scene passes share one bind-group convention (group 0):
//!
//! | Binding | Contents                                   |
//! |---------|--------------------------------------------|
//! | 0       | per-pass uniform (camera / composite data) |
//! | 1       | model matrix storage                       |
//! | 2       | instance id storage                        |
//! | 4       | material parameter block                   |
//! | 5..12   | sampled pass inputs / material textures    |
//! | 15      | storage texture (voxel write target)       |
//! | b + 16  | sampler companion of texture binding `b`   |
//!
//! Depth and integer textures are read with `textureLoad` and carry no
//! sampler. Closures that record a pass must bind exactly the set a shader
//! declares; the backend builds bind groups from the pipeline's reflected
//! layout.

/// Common vertex input layout. Must match [`crate::assets::Vertex`].
const VERTEX_INPUT: &str = "
struct VertexIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tangent: vec3<f32>,
    @location(3) color: vec3<f32>,
    @location(4) uv: vec2<f32>,
    @builtin(instance_index) instance: u32,
};

struct Camera {
    view_proj: mat4x4<f32>,
    eye: vec4<f32>,
};
";

/// Depth-only shadow pass from the sun's point of view.
pub const DIRECTIONAL_DEPTH: &str = "
@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<storage, read> models: array<mat4x4<f32>>;

@vertex
fn vs_main(in: VertexIn) -> @builtin(position) vec4<f32> {
    return camera.view_proj * models[in.instance] * vec4<f32>(in.position, 1.0);
}
";

/// Opaque forward shading with base-color / emissive / normal / info targets.
pub const STANDARD_FORWARD: &str = "
struct MaterialParams {
    base_color_tint: vec4<f32>,
    emissive: vec4<f32>,
    surface: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<storage, read> models: array<mat4x4<f32>>;
@group(0) @binding(2) var<storage, read> ids: array<u32>;
@group(0) @binding(4) var<uniform> material: MaterialParams;
@group(0) @binding(5) var base_color_tex: texture_2d<f32>;
@group(0) @binding(21) var base_color_samp: sampler;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) @interpolate(flat) id: u32,
};

struct FragmentOut {
    @location(0) base_color: vec4<f32>,
    @location(1) emissive: vec4<f32>,
    @location(2) normal: vec4<f32>,
    @location(3) info: u32,
};

@vertex
fn vs_main(in: VertexIn) -> VertexOut {
    let model = models[in.instance];
    var out: VertexOut;
    out.clip = camera.view_proj * model * vec4<f32>(in.position, 1.0);
    out.normal = normalize((model * vec4<f32>(in.normal, 0.0)).xyz);
    out.color = in.color;
    out.uv = in.uv;
    out.id = ids[in.instance];
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> FragmentOut {
    let albedo = textureSample(base_color_tex, base_color_samp, in.uv)
        * material.base_color_tint
        * vec4<f32>(in.color, 1.0);
    var out: FragmentOut;
    out.base_color = albedo;
    out.emissive = material.emissive;
    out.normal = vec4<f32>(in.normal * 0.5 + vec3<f32>(0.5), 1.0);
    out.info = in.id;
    return out;
}
";

/// Overlay geometry (gizmos, selection outlines): single color target.
pub const WIDGET: &str = "
struct MaterialParams {
    base_color_tint: vec4<f32>,
    emissive: vec4<f32>,
    surface: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<storage, read> models: array<mat4x4<f32>>;
@group(0) @binding(4) var<uniform> material: MaterialParams;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec3<f32>,
};

@vertex
fn vs_main(in: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.clip = camera.view_proj * models[in.instance] * vec4<f32>(in.position, 1.0);
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return material.base_color_tint * vec4<f32>(in.color, 1.0);
}
";

/// Particle instances drawn at the tail of the forward pass; instance data
/// comes from the emitter's simulation buffer bound in place of the model
/// matrices.
pub const PARTICLES: &str = "
@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<storage, read> particles: array<mat4x4<f32>>;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec3<f32>,
};

struct FragmentOut {
    @location(0) base_color: vec4<f32>,
    @location(1) emissive: vec4<f32>,
    @location(2) normal: vec4<f32>,
    @location(3) info: u32,
};

@vertex
fn vs_main(in: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.clip = camera.view_proj * particles[in.instance] * vec4<f32>(in.position, 1.0);
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> FragmentOut {
    var out: FragmentOut;
    out.base_color = vec4<f32>(in.color, 1.0);
    out.emissive = vec4<f32>(in.color, 1.0);
    out.normal = vec4<f32>(0.5, 0.5, 1.0, 1.0);
    out.info = 0xffffffffu;
    return out;
}
";

/// Scene voxelization. Rasterizes into a throwaway 2-D target while writing
/// radiance into the 3-D volume with `textureStore`.
pub const VOXELIZE: &str = "
struct VoxelCameras {
    axes: array<mat4x4<f32>, 3>,
    extent: vec4<f32>,
};

@group(0) @binding(0) var<uniform> voxel_cameras: VoxelCameras;
@group(0) @binding(1) var<storage, read> models: array<mat4x4<f32>>;
@group(0) @binding(12) var sun_depth: texture_depth_2d;
@group(0) @binding(15) var volume: texture_storage_3d<rgba16float, write>;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) world: vec3<f32>,
    @location(1) color: vec3<f32>,
};

@vertex
fn vs_main(in: VertexIn) -> VertexOut {
    let world = models[in.instance] * vec4<f32>(in.position, 1.0);
    var out: VertexOut;
    out.clip = voxel_cameras.axes[0] * world;
    out.world = world.xyz;
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) f32 {
    let res = f32(textureDimensions(volume).x);
    let extent = voxel_cameras.extent.x;
    let normalized = (in.world / extent) * 0.5 + vec3<f32>(0.5);
    let texel = vec3<i32>(normalized * res);
    let dims = vec3<i32>(textureDimensions(volume));
    if (all(texel >= vec3<i32>(0)) && all(texel < dims)) {
        textureStore(volume, texel, vec4<f32>(in.color, 1.0));
    }
    return 0.0;
}
";

/// Fullscreen composite: folds every scene attachment into the presentable
/// target and implements the debug view modes.
pub const COMPOSITE: &str = "
struct CompositeData {
    inverse_vp: mat4x4<f32>,
    light_vp: mat4x4<f32>,
    camera_position: vec4<f32>,
    sun_data: vec4<f32>,
    ambient: vec4<f32>,
    debug_mode: u32,
    time: f32,
    voxel_lod: u32,
    _pad: u32,
};

@group(0) @binding(0) var<uniform> composite: CompositeData;
@group(0) @binding(5) var base_color_tex: texture_2d<f32>;
@group(0) @binding(21) var base_color_samp: sampler;
@group(0) @binding(6) var emissive_tex: texture_2d<f32>;
@group(0) @binding(22) var emissive_samp: sampler;
@group(0) @binding(7) var normal_tex: texture_2d<f32>;
@group(0) @binding(23) var normal_samp: sampler;
@group(0) @binding(8) var widget_tex: texture_2d<f32>;
@group(0) @binding(24) var widget_samp: sampler;
@group(0) @binding(9) var voxel_tex: texture_3d<f32>;
@group(0) @binding(25) var voxel_samp: sampler;
@group(0) @binding(10) var depth_tex: texture_depth_2d;
@group(0) @binding(11) var widget_depth_tex: texture_depth_2d;
@group(0) @binding(12) var sun_depth_tex: texture_depth_2d;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    // Oversized triangle covering the viewport.
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOut;
    out.clip = vec4<f32>(uv * 2.0 - vec2<f32>(1.0), 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let texel = vec2<i32>(in.clip.xy);
    let base_color = textureSample(base_color_tex, base_color_samp, in.uv);
    let emissive = textureSample(emissive_tex, emissive_samp, in.uv);
    let normal = textureSample(normal_tex, normal_samp, in.uv) * 2.0 - vec4<f32>(1.0);
    let widget = textureSample(widget_tex, widget_samp, in.uv);
    let depth = textureLoad(depth_tex, texel, 0);
    let widget_depth = textureLoad(widget_depth_tex, texel, 0);
    let _sun_depth = textureLoad(sun_depth_tex, vec2<i32>(0), 0);

    let sun = normalize(composite.sun_data.xyz);
    let n_dot_l = max(dot(normal.xyz, -sun), 0.0);
    let lit = base_color.rgb * (composite.ambient.rgb * composite.ambient.a + vec3<f32>(n_dot_l))
        + emissive.rgb;

    var out = vec4<f32>(lit, 1.0);
    switch composite.debug_mode {
        case 1u: { out = vec4<f32>(base_color.rgb, 1.0); }
        case 2u: { out = vec4<f32>(emissive.rgb, 1.0); }
        case 3u: {
            let world = composite.inverse_vp * vec4<f32>(in.uv * 2.0 - vec2<f32>(1.0), depth, 1.0);
            out = vec4<f32>(world.xyz / world.w, 1.0);
        }
        case 4u: { out = vec4<f32>(normal.xyz * 0.5 + vec3<f32>(0.5), 1.0); }
        case 5u: { out = vec4<f32>(vec3<f32>(depth), 1.0); }
        case 6u: {
            let voxel = textureSampleLevel(
                voxel_tex, voxel_samp,
                vec3<f32>(in.uv, 0.5),
                f32(composite.voxel_lod));
            out = vec4<f32>(voxel.rgb, 1.0);
        }
        case 7u: { out = vec4<f32>(0.0, 0.0, 0.0, 1.0); }
        default: {}
    }

    // Overlay widgets with their own depth test already applied.
    if (widget_depth > 0.0) {
        out = vec4<f32>(mix(out.rgb, widget.rgb, widget.a), 1.0);
    }
    return out;
}
";

/// Presentation blit: stretches a composited scene target over the
/// swapchain image.
pub const PRESENT_BLIT: &str = "
@group(0) @binding(5) var scene_tex: texture_2d<f32>;
@group(0) @binding(21) var scene_samp: sampler;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOut;
    out.clip = vec4<f32>(uv * 2.0 - vec2<f32>(1.0), 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(scene_tex, scene_samp, in.uv);
}
";

/// Emitter simulation: integrates particle transforms in place.
pub const EMITTER_UPDATE: &str = "
struct EmitterParams {
    count: u32,
    delta_time: f32,
    seed: u32,
    _pad: u32,
};

@group(0) @binding(0) var<uniform> params: EmitterParams;
@group(0) @binding(1) var<storage, read_write> particles: array<mat4x4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let index = gid.x;
    if (index >= params.count) {
        return;
    }
    var transform = particles[index];
    let drift = f32(index % 7u) * 0.1 + 0.3;
    transform[3].z = transform[3].z + drift * params.delta_time;
    particles[index] = transform;
}
";

/// Internal 3-D mip downsample used by the backend to lower the voxel volume
/// mip chain (2×2×2 box filter).
pub const BLIT_3D: &str = "
@group(0) @binding(0) var src: texture_3d<f32>;
@group(0) @binding(1) var dst: texture_storage_3d<rgba16float, write>;

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dst_dims = textureDimensions(dst);
    if (any(gid >= dst_dims)) {
        return;
    }
    let base = vec3<i32>(gid) * 2;
    var sum = vec4<f32>(0.0);
    for (var z = 0; z < 2; z++) {
        for (var y = 0; y < 2; y++) {
            for (var x = 0; x < 2; x++) {
                sum += textureLoad(src, base + vec3<i32>(x, y, z), 0);
            }
        }
    }
    textureStore(dst, vec3<i32>(gid), sum / 8.0);
}
";

/// The builtin shader set, registered by the scheduler during setup.
#[must_use]
pub fn builtin_shaders() -> Vec<(&'static str, String)> {
    let with_vertex_input = |body: &str| format!("{VERTEX_INPUT}\n{body}");
    vec![
        ("directional_depth", with_vertex_input(DIRECTIONAL_DEPTH)),
        ("standard_forward", with_vertex_input(STANDARD_FORWARD)),
        ("widget", with_vertex_input(WIDGET)),
        ("particles", with_vertex_input(PARTICLES)),
        ("voxelize", with_vertex_input(VOXELIZE)),
        ("composite", COMPOSITE.to_string()),
        ("present_blit", PRESENT_BLIT.to_string()),
        ("emitter_update", EMITTER_UPDATE.to_string()),
        ("__blit_3d", BLIT_3D.to_string()),
    ]
}
