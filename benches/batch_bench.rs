//! Batcher throughput: grouping + packing cost per frame over a large
//! renderable set with a realistic material/mesh spread.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use sigil::assets::{generate_cube, MaterialData};
use sigil::cache::GpuAssetCache;
use sigil::gpu::headless::HeadlessDevice;
use sigil::gpu::UploadQueue;
use sigil::scene::batch::build_batch;
use sigil::scene::renderable::{Renderable, RenderableRegistry};

const MATERIAL_COUNT: u64 = 16;
const MESH_COUNT: u64 = 8;

fn populated(count: usize) -> (GpuAssetCache, RenderableRegistry) {
    let device = HeadlessDevice::new();
    device.register_shader("standard_forward", "");
    let mut cache = GpuAssetCache::new(Arc::new(UploadQueue::new()));
    let cube = generate_cube(0.5);
    for mesh in 0..MESH_COUNT {
        cache.insert_mesh(&device, mesh, &cube, false);
    }
    for material in 0..MATERIAL_COUNT {
        cache.insert_material(&device, 1000 + material, &MaterialData::default(), false);
    }

    let mut registry = RenderableRegistry::new();
    for i in 0..count as u64 {
        registry.add(
            Renderable::new(i % MESH_COUNT, 1000 + (i * 7) % MATERIAL_COUNT)
                .with_selection_id(i as u32),
        );
    }
    (cache, registry)
}

fn bench_build_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_batch");
    for &count in &[1_000usize, 10_000, 50_000] {
        let (cache, registry) = populated(count);
        let widgets = RenderableRegistry::new();
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| build_batch(&registry, &widgets, &cache));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_batch);
criterion_main!(benches);
