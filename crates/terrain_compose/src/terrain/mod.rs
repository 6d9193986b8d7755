//! The terrain context: layer registry, dirty tracking, compositing and scheduling behind
//! one object driven from the host's update loop.
//!
//! Layer edits go through the `on_layer_*` hooks and the other mutators, each of which
//! records dirty marks. [`Terrain::tick`] does a bounded amount of work per call: when no
//! cycle is running and marks are pending it builds one (expanding the marks through the
//! causal graph and planning the compositor phases), then every tick drains the task
//! graph a little further. When the graph settles, completed regions are committed and
//! anything that could not finish is handed back to the tracker for the next cycle.
//!
//! Only one cycle drains at a time. Interactive cycles (between
//! [`Terrain::begin_interaction`] and [`Terrain::end_interaction`]) run masks at preview
//! quality and are superseded when a layer that seeded them is edited again; Full cycles
//! always run to completion.
pub mod config;
pub mod cycle;
pub mod events;
pub mod handoff;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use glam::Vec2;
use tracing::{debug, info, warn};

pub use config::TerrainConfig;
pub use cycle::{CycleId, CycleMode, CycleReport, CycleState};
pub use events::{EventSink, FnSink, MultiSink, TerrainEvent, TerrainEventKind, VecSink};
pub use handoff::{PreviewSource, RegionPreview, RegionSnapshot};

use crate::backend::{BufferHandle, ComputeBackend, CpuBackend};
use crate::dirty::{
    CausalGraph, DependencyEdge, DirtySet, DirtyStateTracker, RegionIndex, SpatialResolver,
};
use crate::error::{Error, Result};
use crate::layer::{LayerChange, LayerDesc, LayerId, LayerRegistry};
use crate::pipeline::{
    CompositeInputs, CyclePlan, InfluenceCache, LayerMaskPipeline, Quality, RegionCompositor,
};
use crate::region::{RegionCoord, RegionGrid, RegionState, RegionStore, WorldBounds};
use crate::scheduler::TaskGraphScheduler;

/// A cycle between Building and Complete.
struct ActiveCycle {
    id: CycleId,
    mode: CycleMode,
    plan: CyclePlan,
    scheduler: TaskGraphScheduler,
    edges: Vec<DependencyEdge>,
    /// Layers that were marked before propagation added their dependents.
    seeds: BTreeSet<LayerId>,
    superseded: bool,
}

pub struct Terrain<B: ComputeBackend = CpuBackend> {
    config: TerrainConfig,
    grid: RegionGrid,
    registry: LayerRegistry,
    tracker: DirtyStateTracker,
    causal: CausalGraph,
    compositor: RegionCompositor,
    cache: InfluenceCache,
    store: RegionStore,
    backend: B,
    interacting: bool,
    next_cycle: u64,
    cycle: Option<ActiveCycle>,
    state: CycleState,
}

impl<B: ComputeBackend> Terrain<B> {
    pub fn try_new(config: TerrainConfig, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config, backend))
    }

    pub fn new(config: TerrainConfig, backend: B) -> Self {
        debug_assert!(config.region_size > 0.0, "region_size must be > 0");
        debug_assert!(config.region_resolution > 0, "region_resolution must be > 0");
        debug_assert!(config.frame_budget > 0, "frame_budget must be > 0");

        let grid = config.grid();
        Self {
            tracker: DirtyStateTracker::new(SpatialResolver::new(grid.clone())),
            causal: CausalGraph::new().with_texture_propagation(config.texture_propagation),
            compositor: RegionCompositor::new(LayerMaskPipeline::new(config.context_halo)),
            grid,
            config,
            registry: LayerRegistry::new(),
            cache: InfluenceCache::new(),
            store: RegionStore::new(),
            backend,
            interacting: false,
            next_cycle: 1,
            cycle: None,
            state: CycleState::Idle,
        }
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn grid(&self) -> &RegionGrid {
        &self.grid
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access, e.g. to upload stamp resources. Buffers owned by the
    /// terrain must not be released through it.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // Layer edits.

    /// Registers a layer and marks the regions it overlaps dirty.
    pub fn on_layer_added(&mut self, desc: LayerDesc) -> Result<LayerId> {
        let change = self.registry.add(desc)?;
        let id = change.layer_id();
        self.apply(change);
        Ok(id)
    }

    /// Removes a layer; its former regions get one cleanup pass.
    pub fn on_layer_removed(&mut self, id: LayerId) -> Result<()> {
        let change = self.registry.remove(id)?;
        self.apply(change);
        Ok(())
    }

    pub fn on_layer_bounds_changed(&mut self, id: LayerId, bounds: WorldBounds) -> Result<()> {
        let change = self.registry.set_bounds(id, bounds)?;
        self.apply(change);
        Ok(())
    }

    pub fn translate_layer(
        &mut self,
        id: LayerId,
        delta: impl Into<mint::Vector2<f32>>,
    ) -> Result<()> {
        let change = self.registry.translate(id, Vec2::from(delta.into()))?;
        self.apply(change);
        Ok(())
    }

    /// Edits a layer's description (masks, operation, priority, ...).
    pub fn update_layer(&mut self, id: LayerId, f: impl FnOnce(&mut LayerDesc)) -> Result<()> {
        let change = self.registry.update(id, f)?;
        self.apply(change);
        Ok(())
    }

    pub fn set_layer_enabled(&mut self, id: LayerId, enabled: bool) -> Result<()> {
        let change = self.registry.set_enabled(id, enabled)?;
        self.apply(change);
        Ok(())
    }

    pub fn reorder_layer(&mut self, id: LayerId, index: usize) -> Result<()> {
        let change = self.registry.reorder(id, index)?;
        self.apply(change);
        Ok(())
    }

    /// Marks a layer dirty without changing it, e.g. after one of its resources arrived.
    ///
    /// Disabled layers and layers with degenerate bounds cover no region and are skipped.
    pub fn mark_dirty(&mut self, id: LayerId) -> Result<()> {
        let layer = self.registry.get(id).ok_or(Error::UnknownLayer { id })?;
        if layer.bounds.is_degenerate() {
            debug!(error = %Error::InvalidGeometry { id }, "nothing to mark");
            return Ok(());
        }
        let Some(footprint) = layer.footprint() else {
            return Ok(());
        };
        self.tracker.mark_layer_dirty(id, &footprint);
        self.supersede_if_touched(id);
        Ok(())
    }

    /// Marks every layer dirty.
    pub fn invalidate_all(&mut self) {
        let footprints: Vec<_> = self
            .registry
            .iter()
            .filter_map(|l| l.footprint().map(|f| (l.id, f)))
            .collect();
        for (id, footprint) in footprints {
            self.tracker.mark_layer_dirty(id, &footprint);
            self.supersede_if_touched(id);
        }
    }

    /// Records a registry change produced elsewhere.
    fn apply(&mut self, change: LayerChange) {
        debug!(layer = %change.id, kind = ?change.kind, "layer changed");
        self.tracker.apply(&change);
        self.supersede_if_touched(change.id);
    }

    fn supersede_if_touched(&mut self, id: LayerId) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };
        if cycle.mode != CycleMode::Interactive
            || cycle.superseded
            || !cycle.seeds.contains(&id)
        {
            return;
        }
        let cancelled = cycle.scheduler.cancel();
        cycle.superseded = true;
        info!(cycle = %cycle.id, layer = %id, cancelled, "interactive cycle superseded");
    }

    // Interaction.

    /// Subsequent cycles run at preview quality until [`Terrain::end_interaction`].
    pub fn begin_interaction(&mut self) {
        self.interacting = true;
    }

    /// Returns to full quality and re-queues everything last computed at preview quality.
    pub fn end_interaction(&mut self) {
        self.interacting = false;
        let mut requeue = DirtySet::new();
        for (layer, region) in self.cache.preview_entries() {
            requeue.insert(layer, region);
        }
        if !requeue.is_empty() {
            debug!(items = requeue.len(), "re-queueing preview results at full quality");
            self.tracker.restore(requeue);
        }
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    // Driving.

    pub fn tick(&mut self) -> Result<Option<CycleReport>> {
        self.tick_with_events(&mut ())
    }

    /// Advances by one tick, reporting progress to `sink`. Returns the report of a cycle
    /// that finished during this tick.
    pub fn tick_with_events(&mut self, sink: &mut dyn EventSink) -> Result<Option<CycleReport>> {
        if self.cycle.is_none() {
            if !self.tracker.has_pending() {
                self.state = CycleState::Idle;
                return Ok(None);
            }
            self.build_cycle(sink)?;
        }

        let Some(cycle) = self.cycle.as_mut() else {
            return Ok(None);
        };
        let report = match cycle.scheduler.tick(&mut self.backend) {
            Ok(report) => report,
            Err(err) => {
                cycle.scheduler.cancel();
                cycle.superseded = true;
                return Err(err);
            }
        };
        if sink.wants(TerrainEventKind::PhasePassed) && !cycle.superseded {
            for &phase in &report.barriers {
                sink.send(TerrainEvent::PhasePassed {
                    cycle: cycle.id,
                    phase,
                    tick: report.tick,
                });
            }
        }
        if sink.wants(TerrainEventKind::TaskFailed) {
            for (task, error) in &report.failed {
                let label = cycle
                    .scheduler
                    .graph()
                    .get(*task)
                    .map(|t| t.label.clone())
                    .unwrap_or_default();
                sink.send(TerrainEvent::TaskFailed {
                    cycle: cycle.id,
                    task: *task,
                    label,
                    error: error.clone(),
                });
            }
        }

        if !cycle.scheduler.is_settled() {
            return Ok(None);
        }
        let Some(cycle) = self.cycle.take() else {
            return Ok(None);
        };
        Ok(Some(self.finish_cycle(cycle, sink)))
    }

    /// Ticks until no cycle is running and nothing is pending, returning every report.
    ///
    /// Layers waiting on a resource stay dirty, so this returns [`Error::Stalled`] until
    /// the resource is ready.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> Result<Vec<CycleReport>> {
        let mut reports = Vec::new();
        for _ in 0..max_ticks {
            if self.is_idle() {
                return Ok(reports);
            }
            if let Some(report) = self.tick()? {
                reports.push(report);
            }
        }
        if self.is_idle() {
            return Ok(reports);
        }
        warn!(max_ticks, "terrain did not settle");
        Err(Error::Stalled { ticks: max_ticks })
    }

    /// No cycle is running and no marks are pending.
    pub fn is_idle(&self) -> bool {
        self.cycle.is_none() && !self.tracker.has_pending()
    }

    fn build_cycle(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        self.state = CycleState::Building;
        let id = CycleId(self.next_cycle);
        self.next_cycle += 1;
        let (mode, quality) = if self.interacting {
            (CycleMode::Interactive, self.config.preview_quality())
        } else {
            (CycleMode::Full, Quality::Full)
        };

        let mut items = self.tracker.take();
        let seeds = items.layer_ids();
        let index =
            RegionIndex::build(&self.registry, self.tracker.resolver(), &items.regions());
        let edges = self.causal.propagate(&mut items, &index);
        let inputs = CompositeInputs {
            registry: &self.registry,
            index: &index,
            grid: &self.grid,
            store: &self.store,
            quality,
        };
        let mut plan = self
            .compositor
            .plan(&inputs, &mut self.cache, &mut self.backend, items);

        if sink.wants(TerrainEventKind::LayerRetained) {
            for skip in &plan.skipped {
                sink.send(TerrainEvent::LayerRetained {
                    layer: skip.layer,
                    region: skip.region,
                    reason: skip.reason.to_string(),
                });
            }
        }

        let tasks = std::mem::take(&mut plan.tasks);
        let scheduler = match TaskGraphScheduler::build(tasks, self.config.frame_budget) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                self.discard(&mut plan);
                self.tracker.restore(std::mem::take(&mut plan.items));
                self.tracker.restore(std::mem::take(&mut plan.retained));
                self.state = CycleState::Idle;
                return Err(err);
            }
        };

        info!(
            cycle = %id,
            mode = ?mode,
            regions = plan.scheduled.len(),
            teardown = plan.teardown.len(),
            tasks = scheduler.graph().work_count(),
            edges = edges.len(),
            "cycle started"
        );
        if sink.wants(TerrainEventKind::CycleStarted) {
            sink.send(TerrainEvent::CycleStarted {
                cycle: id,
                mode,
                regions: plan.scheduled.len(),
                tasks: scheduler.graph().work_count(),
                edges: edges.len(),
            });
        }

        self.cycle = Some(ActiveCycle {
            id,
            mode,
            plan,
            scheduler,
            edges,
            seeds,
            superseded: false,
        });
        self.state = CycleState::Draining;
        Ok(())
    }

    fn finish_cycle(&mut self, cycle: ActiveCycle, sink: &mut dyn EventSink) -> CycleReport {
        let ActiveCycle {
            id,
            mode,
            mut plan,
            scheduler,
            edges,
            superseded,
            ..
        } = cycle;

        let mut report = CycleReport::new(id, mode);
        report.superseded = superseded;
        report.ticks = scheduler.ticks();
        report.tasks = scheduler.graph().work_count();
        report.trace = scheduler.trace();
        report.edges = edges;
        report.skipped = std::mem::take(&mut plan.skipped);

        let mut retained = std::mem::take(&mut plan.retained);
        if superseded {
            self.discard(&mut plan);
            retained.merge(std::mem::take(&mut plan.items));
        } else {
            if mode == CycleMode::Full {
                self.backend.synchronize();
            }
            self.commit(&mut plan, &scheduler, &mut retained, &mut report, sink);
        }
        self.release_stale_influence();
        for handle in plan.scratch.drain(..) {
            self.backend.release(handle);
        }

        report.retained = retained.len();
        self.tracker.restore(retained);

        if superseded {
            self.state = CycleState::Idle;
            if sink.wants(TerrainEventKind::CycleSuperseded) {
                sink.send(TerrainEvent::CycleSuperseded {
                    cycle: id,
                    retained: report.retained,
                });
            }
        } else {
            self.state = CycleState::Complete;
            info!(
                cycle = %id,
                committed = report.committed.len(),
                deactivated = report.deactivated.len(),
                retained = report.retained,
                ticks = report.ticks,
                "cycle complete"
            );
            if sink.wants(TerrainEventKind::CycleCompleted) {
                sink.send(TerrainEvent::CycleCompleted {
                    report: report.clone(),
                });
            }
        }
        report
    }

    /// Installs staging buffers of fully completed regions and tears down empty ones.
    ///
    /// A region whose topological masks stitched the staging height of a region that did
    /// not complete is held back with it; both stay dirty.
    fn commit(
        &mut self,
        plan: &mut CyclePlan,
        scheduler: &TaskGraphScheduler,
        retained: &mut DirtySet,
        report: &mut CycleReport,
        sink: &mut dyn EventSink,
    ) {
        let failed: BTreeSet<RegionCoord> = plan
            .staging
            .keys()
            .copied()
            .filter(|&r| !scheduler.graph().region_complete(r))
            .collect();
        let withheld = plan.withheld(&failed);
        for (region, staging) in std::mem::take(&mut plan.staging) {
            if withheld.contains(&region) {
                if failed.contains(&region) {
                    warn!(region = %region, "region did not complete; keeping previous buffers");
                } else {
                    warn!(
                        region = %region,
                        "region read an uncommitted neighbor; keeping previous buffers"
                    );
                }
                self.backend.release(staging.height);
                self.backend.release(staging.material);
                retained.merge(plan.items.split_region(region));
                continue;
            }
            let outcome = self.store.commit(region, staging.height, staging.material);
            if let Some((height, material)) = outcome.replaced {
                self.backend.release(height);
                self.backend.release(material);
            }
            if outcome.activated {
                debug!(region = %region, "region activated");
                report.activated.push(region);
                sink.send(TerrainEvent::RegionActivated { region });
            }
            report.committed.push(region);
            if sink.wants(TerrainEventKind::RegionCommitted) {
                let revision = self.store.get(region).map_or(0, |r| r.revision());
                sink.send(TerrainEvent::RegionCommitted { region, revision });
            }
        }

        for &region in &plan.teardown {
            let Some(old) = self.store.deactivate(region) else {
                continue;
            };
            self.backend.release(old.height());
            self.backend.release(old.material());
            debug!(region = %region, "region deactivated");
            report.deactivated.push(region);
            sink.send(TerrainEvent::RegionDeactivated { region });
        }
    }

    /// Releases staging buffers of a cycle whose results are discarded.
    fn discard(&mut self, plan: &mut CyclePlan) {
        let handles: Vec<BufferHandle> = plan.staging_handles().collect();
        for handle in handles {
            self.backend.release(handle);
        }
        plan.staging.clear();
        for handle in plan.scratch.drain(..) {
            self.backend.release(handle);
        }
    }

    /// Drops cached influence of layers that no longer contribute to a region.
    fn release_stale_influence(&mut self) {
        let stale: Vec<(LayerId, RegionCoord)> = self
            .cache
            .iter()
            .map(|(key, _)| key)
            .filter(|&(id, region)| {
                !self.registry.get(id).is_some_and(|layer| {
                    layer.contributes()
                        && self.grid.regions_overlapping(&layer.bounds).contains(region)
                })
            })
            .collect();
        for (id, region) in stale {
            if let Some(handle) = self.cache.remove(id, region) {
                self.backend.release(handle);
            }
        }
    }

    // Queries.

    pub fn cycle_state(&self) -> CycleState {
        self.state
    }

    pub fn current_cycle(&self) -> Option<(CycleId, CycleMode)> {
        self.cycle.as_ref().map(|c| (c.id, c.mode))
    }

    pub fn region_state(&self, coord: RegionCoord) -> RegionState {
        self.store.state(coord)
    }

    pub fn active_regions(&self) -> Vec<RegionCoord> {
        self.store.coords().collect()
    }

    /// Dirty now or being recomputed by the running cycle.
    pub fn is_layer_dirty(&self, id: LayerId) -> bool {
        self.tracker.is_layer_dirty(id)
            || self
                .cycle
                .as_ref()
                .is_some_and(|c| c.plan.items.is_layer_dirty(id))
    }

    pub fn has_pending(&self) -> bool {
        self.tracker.has_pending()
    }

    /// Regions with pending marks, vacated regions included.
    pub fn dirty_regions(&self) -> BTreeSet<RegionCoord> {
        self.tracker.pending().regions()
    }

    /// Committed buffers of an active region, as little-endian bytes.
    pub fn region_snapshot(&self, coord: RegionCoord) -> Option<RegionSnapshot> {
        let region = self.store.get(coord)?;
        let height = self.backend.read(region.height())?;
        let material = self.backend.read(region.material())?;
        Some(RegionSnapshot {
            coord,
            revision: region.revision(),
            resolution: self.grid.resolution,
            height: height.to_le_bytes(),
            material: material.to_le_bytes(),
        })
    }

    /// The running cycle's staging buffers for `coord`, or the committed ones.
    pub fn preview(&self, coord: RegionCoord) -> Option<RegionPreview<'_>> {
        let staged = self
            .cycle
            .as_ref()
            .filter(|c| !c.superseded)
            .and_then(|c| c.plan.staging.get(&coord))
            .map(|s| (PreviewSource::Staging, s.height, s.material));
        let committed = self
            .store
            .get(coord)
            .map(|r| (PreviewSource::Committed, r.height(), r.material()));
        let (source, height, material) = staged.or(committed)?;
        Some(RegionPreview {
            coord,
            source,
            resolution: self.grid.resolution,
            height: self.backend.read(height)?.as_f32()?,
            material: self.backend.read(material)?.as_u32()?,
        })
    }
}
