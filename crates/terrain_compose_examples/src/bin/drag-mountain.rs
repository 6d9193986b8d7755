use glam::Vec2;
use terrain_compose::prelude::*;
use terrain_compose_examples::{init_tracing, render_terrain_to_png, RenderConfig};
use tracing::info;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = TerrainConfig::new()
        .with_region_size(64.0)
        .with_region_resolution(32)
        .with_frame_budget(16);
    let mut terrain = Terrain::try_new(config, CpuBackend::new())?;

    // A mountain over grass, with snow above a height band.
    let mountain = terrain.on_layer_added(
        LayerDesc::height(
            "Mountain",
            WorldBounds::new(Vec2::new(16.0, 16.0), Vec2::new(80.0, 80.0)),
            8.0,
        )
        .with_mask(Mask::new(MaskKernel::Radial { inner: 0.2 })),
    )?;
    terrain.on_layer_added(LayerDesc::texture(
        "grass",
        WorldBounds::new(Vec2::ZERO, Vec2::new(192.0, 128.0)),
        MaterialPaint::new(1),
    ))?;
    terrain.on_layer_added(
        LayerDesc::texture(
            "snow",
            WorldBounds::new(Vec2::ZERO, Vec2::new(192.0, 128.0)),
            MaterialPaint::new(5),
        )
        .with_mask(Mask::new(MaskKernel::HeightRange {
            min: 5.0,
            max: 100.0,
            smoothness: 1.0,
        })),
    )?;
    terrain.run_until_idle(1_000)?;

    // Drag: one edit and one tick per frame, at preview quality.
    let mut sink = FnSink::new(|event| {
        if let TerrainEvent::CycleSuperseded { cycle, retained } = event {
            info!(%cycle, retained, "preview superseded by a newer drag step");
        }
    });
    terrain.begin_interaction();
    for frame in 0..24 {
        if frame % 3 == 0 {
            terrain.translate_layer(mountain, [6.0, 2.0])?;
        }
        if let Some(report) = terrain.tick_with_events(&mut sink)? {
            info!(
                frame,
                cycle = %report.id,
                committed = report.committed.len(),
                "preview cycle finished"
            );
        }
    }
    terrain.end_interaction();

    let reports = terrain.run_until_idle(1_000)?;
    for report in &reports {
        info!(
            cycle = %report.id,
            mode = ?report.mode,
            committed = report.committed.len(),
            deactivated = report.deactivated.len(),
            edges = report.edges.len(),
            "final cycle"
        );
    }

    let out = "drag-mountain.png";
    render_terrain_to_png(&terrain, &RenderConfig::new().with_height_range(-1.0, 9.0), out)?;
    info!(out, "rendered");
    Ok(())
}
