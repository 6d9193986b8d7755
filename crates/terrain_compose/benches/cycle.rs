mod common;

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use terrain_compose::prelude::*;

const SIDES: [usize; 4] = [1, 2, 4, 8];
const RESOLUTIONS: [u32; 3] = [16, 32, 64];

fn populated(side: usize, resolution: u32) -> Terrain {
    let mut terrain = Terrain::new(common::bench_config(resolution), CpuBackend::new());
    for desc in common::layer_field(side) {
        terrain.on_layer_added(desc).expect("valid layer");
    }
    terrain
}

fn cycle_full_rebuild_benches(c: &mut Criterion) {
    for &resolution in &RESOLUTIONS {
        let mut group = c.benchmark_group(format!("cycle/full_rebuild/res_{resolution}"));

        for &side in &SIDES {
            let mut probe = populated(side, resolution);
            probe.run_until_idle(10_000).expect("settles");
            group.throughput(common::regions_throughput(probe.active_regions().len()));

            group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, &side| {
                b.iter_batched(
                    || populated(side, resolution),
                    |mut terrain| {
                        let reports = terrain.run_until_idle(10_000).expect("settles");
                        black_box(reports.len());
                    },
                    BatchSize::SmallInput,
                );
            });
        }

        group.finish();
    }
}

fn cycle_single_move_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle/single_move");

    for &side in &SIDES {
        let mut terrain = populated(side, 32);
        terrain.run_until_idle(10_000).expect("settles");
        let id = terrain.registry().ids()[0];
        let mut step = 0u32;

        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, _| {
            b.iter(|| {
                step += 1;
                let dx = if step % 2 == 0 { 4.0 } else { -4.0 };
                terrain.translate_layer(id, [dx, 0.0]).expect("known layer");
                let reports = terrain.run_until_idle(10_000).expect("settles");
                black_box(reports.len());
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = common::default_criterion();
    targets = cycle_full_rebuild_benches, cycle_single_move_benches
}
criterion_main!(benches);
