use std::time::Duration;

use criterion::{Criterion, Throughput};
use glam::Vec2;
use terrain_compose::prelude::*;

pub const SAMPLE_SIZE: usize = 20;
pub const WARM_UP: Duration = Duration::from_secs(1);
pub const MEASUREMENT_TIME: Duration = Duration::from_secs(3);

pub fn default_criterion() -> Criterion {
    Criterion::default()
        .configure_from_args()
        .sample_size(SAMPLE_SIZE)
        .warm_up_time(WARM_UP)
        .measurement_time(MEASUREMENT_TIME)
}

pub fn regions_throughput(regions: usize) -> Throughput {
    Throughput::Elements(regions.max(1) as u64)
}

#[allow(dead_code)]
pub fn bench_config(resolution: u32) -> TerrainConfig {
    TerrainConfig::new()
        .with_region_size(64.0)
        .with_region_resolution(resolution)
        .with_context_halo(1)
        .with_frame_budget(256)
}

/// A `side × side` field of overlapping height and texture layers.
#[allow(dead_code)]
pub fn layer_field(side: usize) -> Vec<LayerDesc> {
    let mut layers = Vec::with_capacity(side * side * 2);
    for y in 0..side {
        for x in 0..side {
            let min = Vec2::new(x as f32 * 48.0, y as f32 * 48.0);
            let bounds = WorldBounds::new(min, min + Vec2::splat(80.0));
            layers.push(LayerDesc::height("hill", bounds, 4.0).with_falloff(Falloff::linear(0.5)));
            layers.push(LayerDesc::texture("grass", bounds, MaterialPaint::new(2)));
        }
    }
    layers
}
