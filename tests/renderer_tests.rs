//! Frame Scheduler Tests
//!
//! Tests for:
//! - The render-stage state machine (no re-entrant submission)
//! - Upload draining before graph compilation
//! - Suspend/resume on zero-area resize
//! - Shutdown ordering invariants

use std::collections::HashMap;
use std::sync::Arc;

use sigil::assets::{generate_cube, AssetSource, MaterialData, MeshData, TextureData};
use sigil::errors::SigilError;
use sigil::gpu::headless::HeadlessDevice;
use sigil::gpu::PassEncoder;
use sigil::renderer::{OverlayPass, Renderer, RenderStage};
use sigil::scene::{Renderable, RenderScene};
use sigil::settings::RenderSettings;

const MESH: u64 = 0xA;
const MATERIAL: u64 = 0x100;

#[derive(Default)]
struct StaticSource {
    meshes: HashMap<u64, MeshData>,
    materials: HashMap<u64, MaterialData>,
}

impl AssetSource for StaticSource {
    fn load_mesh(&self, id: u64) -> Option<MeshData> {
        self.meshes.get(&id).cloned()
    }
    fn load_material(&self, id: u64) -> Option<MaterialData> {
        self.materials.get(&id).cloned()
    }
    fn load_texture(&self, _id: u64) -> Option<TextureData> {
        None
    }
}

fn test_renderer() -> (Arc<HeadlessDevice>, Renderer) {
    let device = Arc::new(HeadlessDevice::new());
    let mut source = StaticSource::default();
    source.meshes.insert(MESH, generate_cube(1.0));
    source.materials.insert(MATERIAL, MaterialData::default());

    let mut renderer = Renderer::new(device.clone(), Box::new(source), RenderSettings::default());
    let mut scene = RenderScene::new("main");
    scene.add_renderable(Renderable::new(MESH, MATERIAL));
    renderer.add_scene(scene);
    (device, renderer)
}

#[test]
fn render_before_setup_is_rejected() {
    let (_device, mut renderer) = test_renderer();
    assert_eq!(renderer.stage(), RenderStage::Setup);
    match renderer.render(None) {
        Err(SigilError::InvalidRenderStage { stage }) => assert_eq!(stage, RenderStage::Setup),
        other => panic!("expected InvalidRenderStage, got {other:?}"),
    }
}

#[test]
fn frame_returns_scheduler_to_inactive() {
    let (device, mut renderer) = test_renderer();
    renderer.setup().expect("setup");
    assert_eq!(renderer.stage(), RenderStage::Inactive);

    renderer.render(None).expect("frame");
    assert_eq!(renderer.stage(), RenderStage::Inactive);
    assert_eq!(device.submitted_frames().len(), 1);
}

#[test]
fn uploads_are_drained_before_compilation() {
    let (device, mut renderer) = test_renderer();
    device.set_deferred_uploads(true);
    renderer.setup().expect("setup");

    renderer.render(None).expect("frame");
    assert_eq!(
        renderer.upload_queue().pending_count(),
        0,
        "every ticket drained before submit"
    );
    assert_eq!(device.pending_upload_count(), 0);
}

#[test]
fn zero_area_resize_suspends_submission() {
    let (device, mut renderer) = test_renderer();
    renderer.setup().expect("setup");
    renderer.render(None).expect("first frame");
    assert_eq!(device.submitted_frames().len(), 1);

    renderer.resize(0, 0).expect("suspend");
    assert!(renderer.suspended());
    renderer.render(None).expect("suspended render is a no-op");
    assert_eq!(device.submitted_frames().len(), 1, "nothing submitted");

    renderer.resize(800, 600).expect("resume");
    assert!(!renderer.suspended());
    renderer.render(None).expect("resumed frame");
    assert_eq!(device.submitted_frames().len(), 2);
}

#[test]
fn frames_cycle_through_inflight_slots() {
    let (device, mut renderer) = test_renderer();
    renderer.setup().expect("setup");
    for _ in 0..5 {
        renderer.render(None).expect("frame");
    }
    assert_eq!(device.submitted_frames().len(), 5);
}

struct FlagOverlay {
    recorded: bool,
}

impl OverlayPass for FlagOverlay {
    fn record(&mut self, _encoder: &mut PassEncoder) {
        self.recorded = true;
    }
}

#[test]
fn overlay_pass_is_merged_after_presentation() {
    let (device, mut renderer) = test_renderer();
    renderer.setup().expect("setup");

    let mut overlay = FlagOverlay { recorded: false };
    renderer.render(Some(&mut overlay)).expect("frame");

    assert!(overlay.recorded);
    let frame = device.last_frame().unwrap();
    let names = frame.pass_names();
    let presentation = names.iter().position(|&n| n == "presentation").unwrap();
    let overlay_index = names.iter().position(|&n| n == "overlay").unwrap();
    assert!(presentation < overlay_index);
}

#[test]
fn remove_scene_hands_the_scene_back() {
    let (_device, mut renderer) = test_renderer();
    renderer.setup().expect("setup");

    let scene = renderer.remove_scene("main").expect("scene exists");
    assert_eq!(scene.name, "main");
    assert_eq!(renderer.scene_count(), 0);
    assert!(renderer.remove_scene("main").is_none());
}

#[test]
fn shutdown_clears_the_cache_once_scenes_are_gone() {
    let (_device, mut renderer) = test_renderer();
    renderer.setup().expect("setup");
    renderer.render(None).expect("frame");
    assert!(renderer.cache().mesh_count() > 0);

    renderer.remove_scene("main");
    renderer.shutdown();
    assert_eq!(renderer.cache().mesh_count(), 0);
    assert_eq!(renderer.cache().material_count(), 0);
}

#[test]
#[should_panic(expected = "scene(s) still registered")]
fn shutdown_with_live_scenes_asserts() {
    let (_device, mut renderer) = test_renderer();
    renderer.setup().expect("setup");
    renderer.shutdown();
}
