use std::fs;

use glam::Vec2;
use terrain_compose::prelude::*;
use terrain_compose_examples::init_tracing;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = TerrainConfig::new()
        .with_region_size(64.0)
        .with_region_resolution(16);
    // Batches take two polls, so previews observe half-finished staging buffers.
    let mut terrain = Terrain::try_new(config, CpuBackend::new().with_latency(2))?;

    let crater = terrain.on_layer_added(
        LayerDesc::height(
            "crater",
            WorldBounds::new(Vec2::new(32.0, 32.0), Vec2::new(96.0, 96.0)),
            -6.0,
        )
        .with_mask(Mask::new(MaskKernel::Stamp {
            resource: "crater".into(),
        })),
    )?;

    // The stamp is not uploaded yet: the layer is retained and the regions stay flat.
    let mut sink = VecSink::only([TerrainEventKind::LayerRetained]);
    while terrain.tick_with_events(&mut sink)?.is_none() {}
    for event in sink.as_slice() {
        if let TerrainEvent::LayerRetained { region, reason, .. } = event {
            warn!(%region, %reason, "layer retained");
        }
    }

    let stamp = StampImage::from_fn(32, 32, |x, y| {
        let d = Vec2::new(x as f32 - 15.5, y as f32 - 15.5).length() / 16.0;
        (1.0 - d).clamp(0.0, 1.0)
    })
    .ok_or_else(|| anyhow::anyhow!("stamp dimensions"))?;
    terrain.backend_mut().upload_stamp("crater", stamp);
    terrain.mark_dirty(crater)?;

    // Watch one region through its staging buffers until the cycle commits.
    let watched = RegionCoord(0, 0);
    loop {
        if let Some(preview) = terrain.preview(watched) {
            info!(
                source = ?preview.source,
                center = preview.height_at(12, 12).unwrap_or_default(),
                "preview"
            );
        }
        if let Some(report) = terrain.tick()? {
            info!(cycle = %report.id, committed = report.committed.len(), "cycle done");
            if !terrain.has_pending() {
                break;
            }
        }
    }

    fs::create_dir_all("region-handoff")?;
    for coord in terrain.active_regions() {
        let Some(snapshot) = terrain.region_snapshot(coord) else {
            continue;
        };
        let stem = format!("region-handoff/{}_{}", coord.0, coord.1);
        fs::write(format!("{stem}.height"), &snapshot.height)?;
        fs::write(format!("{stem}.material"), &snapshot.material)?;
        info!(region = %coord, revision = snapshot.revision, "wrote region");
    }
    Ok(())
}
