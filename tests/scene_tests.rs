//! Scene & Pass-Graph Integration Tests
//!
//! Runs whole frames against the headless device and asserts on the
//! recorded command stream: pass presence and ordering, instanced draw
//! shapes, pause short-circuiting, pick-query lifecycle, frame-scoped
//! sweeps.

use std::collections::HashMap;
use std::sync::Arc;

use glam::UVec2;

use sigil::assets::{generate_cube, AssetSource, MaterialData, MeshData, TextureData};
use sigil::gpu::headless::HeadlessDevice;
use sigil::scene::{Renderable, RenderScene};
use sigil::settings::RenderSettings;
use sigil::renderer::Renderer;

#[derive(Default)]
struct StaticSource {
    meshes: HashMap<u64, MeshData>,
    materials: HashMap<u64, MaterialData>,
    textures: HashMap<u64, TextureData>,
}

impl AssetSource for StaticSource {
    fn load_mesh(&self, id: u64) -> Option<MeshData> {
        self.meshes.get(&id).cloned()
    }
    fn load_material(&self, id: u64) -> Option<MaterialData> {
        self.materials.get(&id).cloned()
    }
    fn load_texture(&self, id: u64) -> Option<TextureData> {
        self.textures.get(&id).cloned()
    }
}

const MESH_A: u64 = 0xA;
const MESH_B: u64 = 0xB;
const MAT_M: u64 = 0x100;
const MAT_N: u64 = 0x200;

fn source_with_assets() -> StaticSource {
    let mut source = StaticSource::default();
    source.meshes.insert(MESH_A, generate_cube(1.0));
    source.meshes.insert(MESH_B, generate_cube(2.0));
    source.materials.insert(MAT_M, MaterialData::default());
    source.materials.insert(MAT_N, MaterialData::default());
    source
}

fn test_renderer(settings: RenderSettings) -> (Arc<HeadlessDevice>, Renderer) {
    let device = Arc::new(HeadlessDevice::new());
    let mut renderer = Renderer::new(device.clone(), Box::new(source_with_assets()), settings);
    renderer.add_scene(RenderScene::new("main"));
    renderer.setup().expect("setup");
    (device, renderer)
}

fn populate_grouped_scene(scene: &mut RenderScene) {
    scene.add_renderable(Renderable::new(MESH_A, MAT_M).with_selection_id(1));
    scene.add_renderable(Renderable::new(MESH_A, MAT_M).with_selection_id(2));
    scene.add_renderable(Renderable::new(MESH_A, MAT_M).with_selection_id(3));
    scene.add_renderable(Renderable::new(MESH_B, MAT_M).with_selection_id(4));
    scene.add_renderable(Renderable::new(MESH_A, MAT_N).with_selection_id(5));
}

#[test]
fn full_frame_declares_the_canonical_pass_sequence() {
    let (device, mut renderer) = test_renderer(RenderSettings::default());
    populate_grouped_scene(renderer.scene_mut("main").unwrap());
    renderer.render(None).expect("render");

    let frame = device.last_frame().expect("one submitted frame");
    let names = frame.pass_names();
    let position = |name: &str| {
        names
            .iter()
            .position(|&n| n == name)
            .unwrap_or_else(|| panic!("pass {name:?} missing from {names:?}"))
    };

    // Dependency-implied ordering.
    assert!(position("main.sun_depth") < position("main.voxelization"));
    assert!(position("main.voxelization") < position("main.voxel_mip1"));
    assert!(position("main.voxel_mip1") < position("main.voxel_mip2"));
    assert!(position("main.voxel_mip5") < position("main.composite"));
    assert!(position("main.forward") < position("main.composite"));
    assert!(position("main.widget") < position("main.composite"));
    assert!(position("main.composite") < position("presentation"));
    // Declaration-order tie-break for the side-effecting pass.
    assert!(position("main.emitter_update") < position("main.forward"));
}

#[test]
fn forward_pass_issues_one_instanced_draw_per_group() {
    let (device, mut renderer) = test_renderer(RenderSettings::default());
    populate_grouped_scene(renderer.scene_mut("main").unwrap());
    renderer.render(None).expect("render");

    let frame = device.last_frame().unwrap();
    let forward = frame.pass("main.forward").expect("forward pass");

    // Three (material, mesh) groups: (M,A)x3, (M,B)x1, (N,A)x1.
    assert_eq!(forward.draws.len(), 3);
    let shapes: Vec<(u32, u32)> = forward
        .draws
        .iter()
        .map(|d| (d.instance_count, d.first_instance))
        .collect();
    assert_eq!(shapes, vec![(3, 0), (1, 3), (1, 4)]);

    // The shadow pass draws the same groups from the same packed rows.
    let shadow = frame.pass("main.sun_depth").expect("shadow pass");
    let shadow_shapes: Vec<(u32, u32)> = shadow
        .draws
        .iter()
        .map(|d| (d.instance_count, d.first_instance))
        .collect();
    assert_eq!(shadow_shapes, shapes);

    // State changes scale with groups: M's pipeline is bound once for two
    // mesh groups, N's once.
    let pipelines: Vec<_> = forward.draws.iter().map(|d| d.pipeline).collect();
    assert_eq!(pipelines[0], pipelines[1], "same material, same pipeline");
    assert_ne!(pipelines[1], pipelines[2]);
}

#[test]
fn paused_scene_re_presents_without_rebuilding() {
    let (device, mut renderer) = test_renderer(RenderSettings::default());
    populate_grouped_scene(renderer.scene_mut("main").unwrap());

    renderer.render(None).expect("live frame");
    let live_revision = renderer.scene("main").unwrap().batch_revision();

    renderer.scene_mut("main").unwrap().user_pause = true;
    renderer.render(None).expect("paused frame");

    let frame = device.last_frame().unwrap();
    assert_eq!(
        frame.pass_names(),
        vec!["presentation"],
        "paused scene declares no draw-producing passes"
    );
    assert_eq!(
        renderer.scene("main").unwrap().batch_revision(),
        live_revision,
        "batch must not be rebuilt while paused"
    );

    // cull_pause behaves identically.
    let scene = renderer.scene_mut("main").unwrap();
    scene.user_pause = false;
    scene.cull_pause = true;
    renderer.render(None).expect("culled frame");
    assert_eq!(device.last_frame().unwrap().pass_names(), vec!["presentation"]);
}

#[test]
fn in_bounds_pick_query_fires_exactly_once() {
    let (device, mut renderer) = test_renderer(RenderSettings::default());
    device.set_readback_value(42);
    populate_grouped_scene(renderer.scene_mut("main").unwrap());

    let receiver = renderer.scene("main").unwrap().query_pick(UVec2::new(10, 20));
    renderer.render(None).expect("render");

    let frame = device.last_frame().unwrap();
    let read = frame.pass("main.info_read").expect("read-back pass declared");
    assert_eq!(read.texel_copies, 1);
    assert_eq!(
        renderer.scene("main").unwrap().pending_query(),
        None,
        "query consumed at declaration"
    );
    assert_eq!(receiver.try_get().expect("value"), Some(42));

    // No second firing.
    renderer.render(None).expect("second frame");
    assert!(device.last_frame().unwrap().pass("main.info_read").is_none());
}

#[test]
fn out_of_bounds_pick_query_never_declares_a_pass() {
    let (device, mut renderer) = test_renderer(RenderSettings::default());
    populate_grouped_scene(renderer.scene_mut("main").unwrap());

    let size = renderer.scene("main").unwrap().viewport.size;
    let receiver = renderer.scene("main").unwrap().query_pick(size); // == size is out of bounds
    renderer.render(None).expect("render");

    assert!(device.last_frame().unwrap().pass("main.info_read").is_none());
    assert!(receiver.try_get().is_err(), "discarded query disconnects");
}

#[test]
fn frame_allocated_state_is_swept_after_presentation() {
    let (_device, mut renderer) = test_renderer(RenderSettings::default());

    let frame_mesh = 0x5005;
    {
        let device = renderer.device().clone();
        renderer
            .cache_mut()
            .insert_mesh(&*device, frame_mesh, &generate_cube(1.0), true);
    }
    let scene = renderer.scene_mut("main").unwrap();
    let key = scene.add_renderable(Renderable::new(MESH_A, MAT_M).frame_scoped());
    scene.add_renderable(Renderable::new(MESH_A, MAT_M));

    renderer.render(None).expect("render");

    assert!(renderer.cache().mesh(frame_mesh).is_none(), "cache entry swept");
    let scene = renderer.scene("main").unwrap();
    assert_eq!(scene.renderable_count(), 1, "frame-scoped renderable swept");
    assert!(renderer.scene("main").unwrap().pending_query().is_none());
    let _ = key; // stale key; generation mismatch makes it inert
}

#[test]
fn volumetrics_can_be_disabled() {
    let settings = RenderSettings {
        volumetrics: false,
        ..RenderSettings::default()
    };
    let (device, mut renderer) = test_renderer(settings);
    populate_grouped_scene(renderer.scene_mut("main").unwrap());
    renderer.render(None).expect("render");

    let frame = device.last_frame().unwrap();
    assert!(frame.pass("main.voxelization").is_none());
    assert!(frame.pass("main.voxel_mip1").is_none());
    assert!(frame.pass("main.composite").is_some());
}

#[test]
fn voxel_mip_chain_lowers_level_by_level() {
    let settings = RenderSettings {
        voxel_resolution: 16,
        voxel_mip_count: 4,
        ..RenderSettings::default()
    };
    let (device, mut renderer) = test_renderer(settings);
    populate_grouped_scene(renderer.scene_mut("main").unwrap());
    renderer.render(None).expect("render");

    let frame = device.last_frame().unwrap();
    for level in 1..4 {
        let pass = frame
            .pass(&format!("main.voxel_mip{level}"))
            .unwrap_or_else(|| panic!("mip pass {level} missing"));
        assert_eq!(pass.blits, 1);
    }
    assert!(frame.pass("main.voxel_mip4").is_none());
}

#[test]
fn widget_draws_index_the_packed_buffer_tail() {
    let (device, mut renderer) = test_renderer(RenderSettings::default());
    {
        let device = renderer.device().clone();
        renderer
            .cache_mut()
            .insert_material(&*device, 0x900, &MaterialData::widget(), false);
    }
    let scene = renderer.scene_mut("main").unwrap();
    scene.add_renderable(Renderable::new(MESH_A, MAT_M).with_selection_id(1));
    scene.add_renderable(Renderable::new(MESH_B, MAT_M).with_selection_id(2));
    scene.add_widget_renderable(Renderable::new(MESH_A, 0x900));

    renderer.render(None).expect("render");

    let frame = device.last_frame().unwrap();
    let widget = frame.pass("main.widget").expect("widget pass");
    assert_eq!(widget.draws.len(), 1);
    assert_eq!(widget.draws[0].instance_count, 1);
    assert_eq!(
        widget.draws[0].first_instance, 2,
        "widget rows start after the batched rows"
    );
}

#[test]
fn emitters_update_and_draw_until_expiry() {
    let (device, mut renderer) = test_renderer(RenderSettings::default());
    {
        let device = renderer.device().clone();
        let scene = renderer.scene_mut("main").unwrap();
        scene.add_emitter(
            &*device,
            &sigil::scene::EmitterSpec {
                mesh_id: MESH_A,
                particle_count: 128,
                lifetime: 1000.0,
                transform: glam::Mat4::IDENTITY,
            },
            0.0,
        );
    }
    renderer.render(None).expect("render");

    let frame = device.last_frame().unwrap();
    let update = frame.pass("main.emitter_update").expect("update pass");
    assert_eq!(update.dispatches, 1);
    let forward = frame.pass("main.forward").expect("forward pass");
    assert_eq!(forward.draws.len(), 1, "particle draw at the pass tail");
    assert_eq!(forward.draws[0].instance_count, 128);
}
