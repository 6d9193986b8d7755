use std::collections::BTreeSet;

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::backend::StampImage;
use crate::layer::{FeatureGeometry, FeatureParams, Mask, MaskKernel, MaterialPaint};
use crate::pipeline::{Phase, SkipReason};
use crate::scheduler::TaskKind;

fn config() -> TerrainConfig {
    TerrainConfig::new()
        .with_region_size(64.0)
        .with_region_resolution(8)
        .with_context_halo(1)
}

fn terrain() -> Terrain {
    Terrain::try_new(config(), CpuBackend::new()).expect("valid config")
}

fn bounds(min: (f32, f32), max: (f32, f32)) -> WorldBounds {
    WorldBounds::new(Vec2::new(min.0, min.1), Vec2::new(max.0, max.1))
}

fn settle(terrain: &mut Terrain) -> Vec<CycleReport> {
    terrain.run_until_idle(1_000).expect("terrain settles")
}

/// Ticks until the running (or next) cycle reports.
fn next_report(terrain: &mut Terrain) -> CycleReport {
    for _ in 0..1_000 {
        if let Some(report) = terrain.tick().expect("tick") {
            return report;
        }
    }
    panic!("no cycle finished");
}

fn horizontal(y: f32) -> FeatureGeometry {
    FeatureGeometry::new(vec![Vec2::new(8.0, y), Vec2::new(52.0, y)], 4.0, 2.0)
}

fn vertical(x: f32) -> FeatureGeometry {
    FeatureGeometry::new(vec![Vec2::new(x, 8.0), Vec2::new(x, 52.0)], 4.0, 2.0)
}

fn feature(name: &str, geometry: FeatureGeometry, depth: f32, priority: i32) -> LayerDesc {
    let params = FeatureParams {
        depth,
        ..FeatureParams::default()
    };
    LayerDesc::feature(name, geometry, params).with_priority(priority)
}

#[test]
fn layer_activates_every_region_it_overlaps() {
    let mut terrain = terrain();
    terrain
        .on_layer_added(LayerDesc::height("hill", bounds((32.0, 32.0), (96.0, 96.0)), 10.0))
        .unwrap();

    let reports = settle(&mut terrain);
    assert_eq!(reports.len(), 1);
    let expected = vec![
        RegionCoord(0, 0),
        RegionCoord(0, 1),
        RegionCoord(1, 0),
        RegionCoord(1, 1),
    ];
    assert_eq!(terrain.active_regions(), expected);
    assert_eq!(reports[0].activated.len(), 4);
    assert_eq!(terrain.cycle_state(), CycleState::Complete);

    let heights = terrain.region_snapshot(RegionCoord(0, 0)).unwrap().heights();
    assert_eq!(heights[63], 10.0);
    assert_eq!(heights[0], 0.0);
}

#[test]
fn moving_a_mountain_dirties_its_region_and_overlapping_textures() {
    let mut terrain = terrain();
    let mountain = terrain
        .on_layer_added(LayerDesc::height("Mountain", bounds((8.0, 8.0), (24.0, 24.0)), 5.0))
        .unwrap();
    let texture = terrain
        .on_layer_added(LayerDesc::texture(
            "grass",
            bounds((0.0, 0.0), (60.0, 60.0)),
            MaterialPaint::new(3),
        ))
        .unwrap();
    settle(&mut terrain);

    terrain.translate_layer(mountain, [10.0, 0.0]).unwrap();
    assert_eq!(terrain.dirty_regions(), BTreeSet::from([RegionCoord(0, 0)]));
    assert!(!terrain.is_layer_dirty(texture));

    let report = next_report(&mut terrain);
    let edge = DependencyEdge {
        source: mountain,
        dependent: texture,
        region: RegionCoord(0, 0),
    };
    assert!(report.edges.contains(&edge));
    assert!(report.trace.iter().any(|t| t.phase == Phase::TextureMask
        && t.kind == TaskKind::Mask
        && t.layer == Some(texture)));
    assert!(!report
        .trace
        .iter()
        .any(|t| t.region.is_some()
            && matches!(t.phase, Phase::FeatureMask | Phase::FeatureApplication)));
    assert_eq!(report.scheduled_regions(), vec![RegionCoord(0, 0)]);
}

#[test]
fn straddling_regions_pass_height_phases_before_either_textures() {
    let mut terrain = terrain();
    terrain
        .on_layer_added(LayerDesc::height("ridge", bounds((40.0, 8.0), (88.0, 24.0)), 4.0))
        .unwrap();
    terrain
        .on_layer_added(LayerDesc::texture(
            "rock",
            bounds((8.0, 8.0), (120.0, 56.0)),
            MaterialPaint::new(2),
        ))
        .unwrap();
    assert_eq!(
        terrain.dirty_regions(),
        BTreeSet::from([RegionCoord(0, 0), RegionCoord(1, 0)])
    );

    let report = next_report(&mut terrain);
    let work: Vec<_> = report.trace.iter().filter(|t| t.region.is_some()).collect();
    let height_settled = work
        .iter()
        .filter(|t| t.phase <= Phase::HeightComposite)
        .filter_map(|t| t.settled)
        .max()
        .unwrap();
    let texture_dispatched = work
        .iter()
        .filter(|t| t.phase >= Phase::TextureMask)
        .filter_map(|t| t.dispatched)
        .min()
        .unwrap();
    assert!(height_settled < texture_dispatched);
    assert_eq!(report.committed, vec![RegionCoord(0, 0), RegionCoord(1, 0)]);
}

#[test]
fn higher_priority_features_are_applied_last() {
    let mut terrain = terrain();
    let road = terrain
        .on_layer_added(feature("road", horizontal(28.0), 5.0, 10))
        .unwrap();
    let river = terrain
        .on_layer_added(feature("river", vertical(28.0), 1.0, 1))
        .unwrap();
    settle(&mut terrain);
    // Cell (3, 3) sits on both centerlines.
    let crossing = 3 * 8 + 3;
    let heights = terrain.region_snapshot(RegionCoord(0, 0)).unwrap().heights();
    assert_eq!(heights[crossing], -5.0);

    terrain.translate_layer(road, [2.0, 0.0]).unwrap();
    let report = next_report(&mut terrain);
    assert!(report.edges.contains(&DependencyEdge {
        source: road,
        dependent: river,
        region: RegionCoord(0, 0),
    }));
    let heights = terrain.region_snapshot(RegionCoord(0, 0)).unwrap().heights();
    assert_eq!(heights[crossing], -5.0);

    terrain.translate_layer(river, [0.0, 2.0]).unwrap();
    let report = next_report(&mut terrain);
    assert!(report.edges.iter().all(|e| e.source != river));
    let heights = terrain.region_snapshot(RegionCoord(0, 0)).unwrap().heights();
    assert_eq!(heights[crossing], -5.0);
}

#[test]
fn recomputing_without_changes_is_idempotent() {
    let mut terrain = terrain();
    terrain
        .on_layer_added(
            LayerDesc::height("dunes", bounds((0.0, 0.0), (100.0, 60.0)), 3.0).with_mask(
                Mask::new(MaskKernel::Noise {
                    seed: 7,
                    frequency: 0.05,
                    octaves: 3,
                }),
            ),
        )
        .unwrap();
    terrain
        .on_layer_added(LayerDesc::texture(
            "sand",
            bounds((0.0, 0.0), (100.0, 60.0)),
            MaterialPaint::new(4),
        ))
        .unwrap();
    settle(&mut terrain);
    let before = terrain.region_snapshot(RegionCoord(1, 0)).unwrap();

    terrain.invalidate_all();
    settle(&mut terrain);
    let after = terrain.region_snapshot(RegionCoord(1, 0)).unwrap();
    assert_eq!(before.height, after.height);
    assert_eq!(before.material, after.material);
    assert!(after.revision > before.revision);
}

#[test]
fn removing_the_last_layer_tears_regions_down() {
    let mut terrain = terrain();
    let id = terrain
        .on_layer_added(LayerDesc::height("hill", bounds((32.0, 8.0), (96.0, 24.0)), 2.0))
        .unwrap();
    settle(&mut terrain);
    assert_eq!(terrain.active_regions().len(), 2);

    terrain.on_layer_removed(id).unwrap();
    let reports = settle(&mut terrain);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].deactivated, vec![RegionCoord(0, 0), RegionCoord(1, 0)]);
    assert_eq!(reports[0].tasks, 0);
    assert_eq!(terrain.region_state(RegionCoord(0, 0)), RegionState::Inactive);
    assert_eq!(terrain.backend().live_buffers(), 0);
    assert!(!terrain.is_layer_dirty(id));
}

#[test]
fn moving_away_prunes_the_vacated_region() {
    let mut terrain = terrain();
    let id = terrain
        .on_layer_added(LayerDesc::height("hill", bounds((8.0, 8.0), (24.0, 24.0)), 2.0))
        .unwrap();
    settle(&mut terrain);

    terrain.translate_layer(id, [128.0, 0.0]).unwrap();
    let report = next_report(&mut terrain);
    assert_eq!(report.deactivated, vec![RegionCoord(0, 0)]);
    assert_eq!(report.scheduled_regions(), vec![RegionCoord(2, 0)]);
    assert_eq!(terrain.active_regions(), vec![RegionCoord(2, 0)]);
}

#[test]
fn layers_waiting_on_a_resource_stay_dirty_until_it_arrives() {
    let mut terrain = terrain();
    let id = terrain
        .on_layer_added(
            LayerDesc::height("crater", bounds((0.0, 0.0), (64.0, 64.0)), 6.0).with_mask(
                Mask::new(MaskKernel::Stamp {
                    resource: "crater".into(),
                }),
            ),
        )
        .unwrap();

    let report = next_report(&mut terrain);
    assert_eq!(report.retained, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].layer, Some(id));
    assert!(matches!(
        report.skipped[0].reason,
        SkipReason::ResourceNotReady { .. }
    ));
    assert!(terrain.is_layer_dirty(id));
    assert!(matches!(
        terrain.run_until_idle(50),
        Err(Error::Stalled { .. })
    ));

    let image = StampImage::from_fn(4, 4, |_, _| 1.0).unwrap();
    terrain.backend_mut().upload_stamp("crater", image);
    settle(&mut terrain);
    assert!(!terrain.is_layer_dirty(id));
    let heights = terrain.region_snapshot(RegionCoord(0, 0)).unwrap().heights();
    assert!(heights.iter().all(|&h| h == 6.0));
}

#[test]
fn editing_during_interaction_supersedes_the_preview_cycle() {
    let mut terrain = terrain();
    let id = terrain
        .on_layer_added(LayerDesc::height("hill", bounds((8.0, 8.0), (40.0, 40.0)), 2.0))
        .unwrap();
    terrain.begin_interaction();
    assert!(terrain.tick().unwrap().is_none());
    assert_eq!(
        terrain.current_cycle().map(|(_, mode)| mode),
        Some(CycleMode::Interactive)
    );

    terrain.translate_layer(id, [4.0, 0.0]).unwrap();
    let superseded = next_report(&mut terrain);
    assert!(superseded.superseded);
    assert!(superseded.committed.is_empty());
    assert!(terrain.active_regions().is_empty());
    assert!(terrain.has_pending());

    let preview = next_report(&mut terrain);
    assert_eq!(preview.mode, CycleMode::Interactive);
    assert!(!preview.superseded);
    assert_eq!(terrain.active_regions(), vec![RegionCoord(0, 0)]);

    terrain.end_interaction();
    assert!(terrain.has_pending());
    let reports = settle(&mut terrain);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].mode, CycleMode::Full);
    assert_eq!(reports[0].committed, vec![RegionCoord(0, 0)]);
}

#[test]
fn full_cycles_are_not_superseded() {
    let mut terrain = terrain();
    let id = terrain
        .on_layer_added(LayerDesc::height("hill", bounds((8.0, 8.0), (40.0, 40.0)), 2.0))
        .unwrap();
    terrain.tick().unwrap();
    terrain.translate_layer(id, [4.0, 0.0]).unwrap();

    let report = next_report(&mut terrain);
    assert!(!report.superseded);
    assert_eq!(report.committed, vec![RegionCoord(0, 0)]);
    assert!(terrain.has_pending());
    assert_eq!(settle(&mut terrain).len(), 1);
}

#[test]
fn events_follow_the_cycle() {
    let mut terrain = terrain();
    terrain
        .on_layer_added(LayerDesc::height("ridge", bounds((40.0, 8.0), (88.0, 24.0)), 4.0))
        .unwrap();
    let mut sink = VecSink::new();
    while !terrain.is_idle() {
        terrain.tick_with_events(&mut sink).unwrap();
    }

    assert_eq!(sink.count(TerrainEventKind::CycleStarted), 1);
    assert_eq!(sink.count(TerrainEventKind::PhasePassed), Phase::ALL.len());
    assert_eq!(sink.count(TerrainEventKind::RegionActivated), 2);
    assert_eq!(sink.count(TerrainEventKind::RegionCommitted), 2);
    assert_eq!(sink.count(TerrainEventKind::CycleCompleted), 1);
    let phases: Vec<Phase> = sink
        .as_slice()
        .iter()
        .filter_map(|e| match e {
            TerrainEvent::PhasePassed { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, Phase::ALL.to_vec());
    matches!(sink.as_slice().last(), Some(TerrainEvent::CycleCompleted { .. }))
        .then_some(())
        .expect("cycle completed last");
}

#[test]
fn preview_reads_staging_while_a_cycle_runs() {
    let mut terrain = terrain();
    terrain
        .on_layer_added(LayerDesc::height("hill", bounds((0.0, 0.0), (64.0, 64.0)), 2.0))
        .unwrap();
    assert!(terrain.preview(RegionCoord(0, 0)).is_none());

    terrain.tick().unwrap();
    let preview = terrain.preview(RegionCoord(0, 0)).unwrap();
    assert_eq!(preview.source, PreviewSource::Staging);

    settle(&mut terrain);
    let preview = terrain.preview(RegionCoord(0, 0)).unwrap();
    assert_eq!(preview.source, PreviewSource::Committed);
    assert_eq!(preview.height_at(0, 0), Some(2.0));
    assert_eq!(preview.height_at(8, 0), None);
}

#[test]
fn frame_budget_limits_dispatch_per_tick() {
    let config = config().with_frame_budget(1);
    let mut terrain = Terrain::try_new(config, CpuBackend::new()).unwrap();
    for i in 0..3 {
        let x = 8.0 + 16.0 * i as f32;
        terrain
            .on_layer_added(LayerDesc::height("bump", bounds((x, 8.0), (x + 8.0, 16.0)), 1.0))
            .unwrap();
    }

    let report = next_report(&mut terrain);
    let mut ticks: Vec<u64> = report
        .trace
        .iter()
        .filter(|t| t.kind != TaskKind::Barrier)
        .filter_map(|t| t.dispatched)
        .collect();
    let dispatched = ticks.len();
    ticks.sort_unstable();
    ticks.dedup();
    assert_eq!(ticks.len(), dispatched);
    assert!(report.ticks >= dispatched as u64);
}

#[test]
fn allocation_failure_retains_the_region() {
    let backend = CpuBackend::new().with_buffer_limit(1);
    let mut terrain = Terrain::try_new(config(), backend).unwrap();
    let id = terrain
        .on_layer_added(LayerDesc::height("hill", bounds((8.0, 8.0), (24.0, 24.0)), 2.0))
        .unwrap();

    let report = next_report(&mut terrain);
    assert!(report.committed.is_empty());
    assert_eq!(report.retained, 1);
    assert!(report
        .skipped
        .iter()
        .any(|s| s.layer.is_none() && matches!(s.reason, SkipReason::Allocation(_))));
    assert_eq!(terrain.region_state(RegionCoord(0, 0)), RegionState::Inactive);
    assert!(terrain.is_layer_dirty(id));

    terrain.backend_mut().set_buffer_limit(None);
    settle(&mut terrain);
    assert_eq!(terrain.active_regions(), vec![RegionCoord(0, 0)]);
}

#[test]
fn skipped_layers_keep_their_committed_contribution() {
    let mut terrain = terrain();
    let hill = terrain
        .on_layer_added(LayerDesc::height("hill", bounds((8.0, 8.0), (40.0, 40.0)), 10.0))
        .unwrap();
    terrain
        .on_layer_added(LayerDesc::height("bump", bounds((16.0, 16.0), (56.0, 56.0)), 3.0))
        .unwrap();
    settle(&mut terrain);
    let before = terrain.region_snapshot(RegionCoord(0, 0)).unwrap();

    // Room for the staging buffers but not for the mask context.
    let live = terrain.backend().live_buffers();
    terrain.backend_mut().set_buffer_limit(Some(live + 2));
    terrain.mark_dirty(hill).unwrap();
    let report = next_report(&mut terrain);
    assert_eq!(report.committed, vec![RegionCoord(0, 0)]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].layer, Some(hill));
    assert_eq!(report.retained, 1);
    let during = terrain.region_snapshot(RegionCoord(0, 0)).unwrap();
    assert_eq!(during.heights(), before.heights());
    assert!(terrain.is_layer_dirty(hill));

    terrain.backend_mut().set_buffer_limit(None);
    settle(&mut terrain);
    let after = terrain.region_snapshot(RegionCoord(0, 0)).unwrap();
    assert_eq!(after.heights(), before.heights());
    assert!(!terrain.is_layer_dirty(hill));
}

#[test]
fn regions_that_stitched_a_failed_neighbor_are_held_back() {
    let config = config().with_frame_budget(1);
    let mut terrain = Terrain::try_new(config, CpuBackend::new()).unwrap();
    let image = StampImage::from_fn(4, 4, |_, _| 1.0).unwrap();
    terrain.backend_mut().upload_stamp("cliff", image.clone());
    let stamped = |name: &str| {
        LayerDesc::height(name, bounds((64.0, 0.0), (128.0, 64.0)), 10.0).with_mask(Mask::new(
            MaskKernel::Stamp {
                resource: "cliff".into(),
            },
        ))
    };
    terrain.on_layer_added(stamped("upper")).unwrap();
    terrain.on_layer_added(stamped("lower")).unwrap();
    let scree = terrain
        .on_layer_added(
            LayerDesc::texture("scree", bounds((0.0, 0.0), (64.0, 64.0)), MaterialPaint::new(2))
                .with_mask(Mask::new(MaskKernel::Slope {
                    min_degrees: 20.0,
                    max_degrees: 90.0,
                })),
        )
        .unwrap();
    settle(&mut terrain);
    // Cell (7, 3) borders the cliff region.
    let edge = 3 * 8 + 7;
    let weight = |terrain: &Terrain| {
        terrain.region_snapshot(RegionCoord(0, 0)).unwrap().materials()[edge].weight()
    };
    let before = weight(&terrain);
    assert!(before > 0);

    // One stamp mask goes out on the first tick, the other is rejected on the second.
    terrain.invalidate_all();
    assert!(terrain.tick().unwrap().is_none());
    terrain.backend_mut().declare_stamp("cliff");
    let report = next_report(&mut terrain);
    assert!(report.committed.is_empty());
    assert_eq!(weight(&terrain), before);
    assert!(terrain.is_layer_dirty(scree));

    terrain.backend_mut().upload_stamp("cliff", image);
    let reports = settle(&mut terrain);
    assert_eq!(
        reports.last().map(|r| r.committed.clone()),
        Some(vec![RegionCoord(0, 0), RegionCoord(1, 0)])
    );
    assert_eq!(weight(&terrain), before);
}

#[test]
fn drained_cycles_leave_no_batch_state_behind() {
    let mut terrain = terrain();
    terrain
        .on_layer_added(LayerDesc::height("ridge", bounds((40.0, 8.0), (88.0, 24.0)), 4.0))
        .unwrap();
    settle(&mut terrain);
    assert_eq!(terrain.backend().pending_batches(), 0);
    assert_eq!(terrain.backend().unpolled_batches(), 0);
    assert!(terrain.backend().history().is_empty());
}

#[test]
fn editing_a_propagated_layer_does_not_supersede_the_preview_cycle() {
    let mut terrain = terrain();
    let hill = terrain
        .on_layer_added(LayerDesc::height("hill", bounds((8.0, 8.0), (40.0, 40.0)), 2.0))
        .unwrap();
    let grass = terrain
        .on_layer_added(LayerDesc::texture(
            "grass",
            bounds((0.0, 0.0), (60.0, 60.0)),
            MaterialPaint::new(3),
        ))
        .unwrap();
    settle(&mut terrain);

    terrain.begin_interaction();
    terrain.translate_layer(hill, [4.0, 0.0]).unwrap();
    assert!(terrain.tick().unwrap().is_none());
    assert!(terrain.is_layer_dirty(grass));

    terrain.mark_dirty(grass).unwrap();
    let report = next_report(&mut terrain);
    assert!(!report.superseded);
    assert_eq!(report.committed, vec![RegionCoord(0, 0)]);
    assert!(terrain.has_pending());

    terrain.translate_layer(hill, [4.0, 0.0]).unwrap();
    assert!(terrain.tick().unwrap().is_none());
    terrain.translate_layer(hill, [4.0, 0.0]).unwrap();
    assert!(next_report(&mut terrain).superseded);
}

#[test]
fn degenerate_layers_cover_nothing() {
    let mut terrain = terrain();
    let id = terrain
        .on_layer_added(LayerDesc::height("flat", bounds((8.0, 8.0), (8.0, 24.0)), 1.0))
        .unwrap();
    assert!(terrain.is_idle());
    terrain.mark_dirty(id).unwrap();
    assert!(!terrain.has_pending());
    assert!(terrain.tick().unwrap().is_none());
    assert!(terrain.active_regions().is_empty());
}

#[test]
fn unknown_layers_are_reported() {
    let mut terrain = terrain();
    let err = terrain.mark_dirty(LayerId(42)).expect_err("unknown layer");
    assert!(matches!(err, Error::UnknownLayer { .. }));
    assert!(terrain.on_layer_removed(LayerId(42)).is_err());
}

#[test]
fn random_edits_converge_to_the_layer_footprints() {
    let mut rng = StdRng::seed_from_u64(0x7e55);
    let mut terrain = terrain();
    let mut ids = Vec::new();

    let coord = |rng: &mut StdRng, span: u32| (rng.next_u32() % span) as f32;
    for step in 0..60 {
        match rng.next_u32() % 5 {
            0 | 1 => {
                let (x, y) = (coord(&mut rng, 240), coord(&mut rng, 240));
                let (w, h) = (4.0 + coord(&mut rng, 80), 4.0 + coord(&mut rng, 80));
                let desc = if step % 2 == 0 {
                    LayerDesc::height("h", bounds((x, y), (x + w, y + h)), 1.0)
                } else {
                    LayerDesc::texture("t", bounds((x, y), (x + w, y + h)), MaterialPaint::new(1))
                };
                ids.push(terrain.on_layer_added(desc).unwrap());
            }
            2 if !ids.is_empty() => {
                let id = ids[rng.next_u32() as usize % ids.len()];
                let delta = [coord(&mut rng, 128) - 64.0, coord(&mut rng, 128) - 64.0];
                terrain.translate_layer(id, delta).unwrap();
            }
            3 if !ids.is_empty() => {
                let id = ids.swap_remove(rng.next_u32() as usize % ids.len());
                terrain.on_layer_removed(id).unwrap();
            }
            4 if !ids.is_empty() => {
                let id = ids[rng.next_u32() as usize % ids.len()];
                let enabled = terrain.registry().get(id).is_some_and(|l| l.enabled);
                terrain.set_layer_enabled(id, !enabled).unwrap();
            }
            _ => {}
        }
        for _ in 0..(rng.next_u32() % 4) {
            terrain.tick().unwrap();
        }
    }
    settle(&mut terrain);

    let expected: BTreeSet<RegionCoord> = terrain
        .registry()
        .iter()
        .filter(|l| l.contributes())
        .flat_map(|l| terrain.grid().regions_overlapping(&l.bounds).iter().collect::<Vec<_>>())
        .collect();
    let active: BTreeSet<RegionCoord> = terrain.active_regions().into_iter().collect();
    assert_eq!(active, expected);
}
