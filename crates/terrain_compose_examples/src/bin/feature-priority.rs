use glam::Vec2;
use terrain_compose::prelude::*;
use terrain_compose_examples::{init_tracing, render_terrain_to_png, RenderConfig};
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = TerrainConfig::new()
        .with_region_size(64.0)
        .with_region_resolution(32);
    let mut terrain = Terrain::try_new(config, CpuBackend::new())?;

    terrain.on_layer_added(
        LayerDesc::height(
            "hills",
            WorldBounds::new(Vec2::ZERO, Vec2::new(128.0, 128.0)),
            4.0,
        )
        .with_mask(Mask::new(MaskKernel::Noise {
            seed: 11,
            frequency: 0.04,
            octaves: 4,
        })),
    )?;

    // The river runs diagonally, the road crosses it and wins where they overlap.
    let river = FeatureGeometry::new(
        vec![Vec2::new(8.0, 8.0), Vec2::new(64.0, 72.0), Vec2::new(120.0, 100.0)],
        6.0,
        6.0,
    );
    let road = FeatureGeometry::new(vec![Vec2::new(8.0, 64.0), Vec2::new(120.0, 56.0)], 3.0, 2.0);
    terrain.on_layer_added(
        LayerDesc::feature(
            "river",
            river,
            FeatureParams {
                depth: 3.0,
                core_material: 4,
                shoulder_material: 3,
            },
        )
        .with_priority(1),
    )?;
    let road = terrain.on_layer_added(
        LayerDesc::feature(
            "road",
            road,
            FeatureParams {
                depth: -0.5,
                core_material: 0,
                shoulder_material: 2,
            },
        )
        .with_priority(10),
    )?;
    terrain.run_until_idle(1_000)?;
    render_terrain_to_png(&terrain, &RenderConfig::new(), "feature-priority-before.png")?;

    // Moving the road re-resolves the river wherever they share a region.
    terrain.translate_layer(road, [0.0, 12.0])?;
    for report in terrain.run_until_idle(1_000)? {
        for edge in &report.edges {
            info!(
                source = %edge.source,
                dependent = %edge.dependent,
                region = %edge.region,
                "dependency followed"
            );
        }
    }
    render_terrain_to_png(&terrain, &RenderConfig::new(), "feature-priority-after.png")?;
    Ok(())
}
