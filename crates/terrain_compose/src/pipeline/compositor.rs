//! Macro pipeline: the six compositing phases for every region of a cycle.
//!
//! [`RegionCompositor::plan`] turns an expanded dirty set into task specs. Each scheduled
//! region gets fresh staging buffers; composites rebuild them from zero by folding the
//! influence of every overlapping layer in registration order. Only dirty layers rerun
//! their mask pipelines, clean layers contribute their cached influence. Feature layers
//! are rasterized in ascending priority so higher priorities claim cells last.
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::backend::{
    BackendError, BufferDesc, BufferHandle, ClearValue, CommandBatch, CompositeOp,
    ComputeBackend, ComputeOp, RegionFrame, StitchSources,
};
use crate::dirty::{DirtySet, IndexedLayer, RegionIndex};
use crate::layer::{FeatureClaim, Layer, LayerId, LayerKind, LayerOperation, LayerRegistry};
use crate::pipeline::influence::{InfluenceCache, InfluenceEntry};
use crate::pipeline::micro::{LayerMaskPipeline, MaskTarget, Quality};
use crate::pipeline::phase::Phase;
use crate::region::{RegionCoord, RegionGrid, RegionStore};
use crate::scheduler::{TaskKind, TaskSpec};

/// Claim slots available per region; slot values are stored plus one in eight bits.
pub const MAX_FEATURE_SLOTS: usize = u8::MAX as usize;

/// Buffers a cycle composites into before committing them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Staging {
    pub height: BufferHandle,
    pub material: BufferHandle,
}

/// Why work was left out of a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    ResourceNotReady { resource: String },
    Allocation(BackendError),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ResourceNotReady { resource } => {
                write!(f, "resource '{resource}' is not ready")
            }
            SkipReason::Allocation(err) => write!(f, "{err}"),
        }
    }
}

/// A layer (or, with `layer: None`, a whole region) skipped this cycle; its items stay
/// dirty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Skip {
    pub layer: Option<LayerId>,
    pub region: RegionCoord,
    pub reason: SkipReason,
}

/// Read-only state the compositor plans against.
#[derive(Clone, Copy, Debug)]
pub struct CompositeInputs<'a> {
    pub registry: &'a LayerRegistry,
    pub index: &'a RegionIndex,
    pub grid: &'a RegionGrid,
    pub store: &'a RegionStore,
    pub quality: Quality,
}

/// Everything a cycle will do, plus the buffers it owns.
#[derive(Debug, Default)]
pub struct CyclePlan {
    pub tasks: Vec<TaskSpec>,
    /// Regions that get staging buffers and tasks.
    pub scheduled: BTreeSet<RegionCoord>,
    /// Active regions that no longer have layers; released when the cycle commits.
    pub teardown: BTreeSet<RegionCoord>,
    pub staging: BTreeMap<RegionCoord, Staging>,
    /// Per-cycle buffers released when the cycle ends.
    pub scratch: Vec<BufferHandle>,
    pub skipped: Vec<Skip>,
    /// Items processed by this cycle.
    pub items: DirtySet,
    /// Items left dirty for the next cycle.
    pub retained: DirtySet,
    /// Regions whose topological masks read another region's staging height, with the
    /// regions they read.
    pub stitched: BTreeMap<RegionCoord, BTreeSet<RegionCoord>>,
}

impl CyclePlan {
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty() && self.teardown.is_empty()
    }

    pub fn staging_handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.staging.values().flat_map(|s| [s.height, s.material])
    }

    /// Regions that must not commit when `failed` regions do not: every region that
    /// stitched the staging height of a withheld region, transitively.
    pub fn withheld(&self, failed: &BTreeSet<RegionCoord>) -> BTreeSet<RegionCoord> {
        let mut withheld = failed.clone();
        loop {
            let before = withheld.len();
            for (&reader, read) in &self.stitched {
                if !withheld.contains(&reader) && read.iter().any(|r| withheld.contains(r)) {
                    withheld.insert(reader);
                }
            }
            if withheld.len() == before {
                return withheld;
            }
        }
    }
}

/// A layer whose influence is available to this cycle's composite.
struct Contribution<'a> {
    indexed: IndexedLayer,
    layer: &'a Layer,
    influence: BufferHandle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionCompositor {
    pipeline: LayerMaskPipeline,
}

impl RegionCompositor {
    pub fn new(pipeline: LayerMaskPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &LayerMaskPipeline {
        &self.pipeline
    }

    /// Plans the cycle for `items`, allocating staging, influence and scratch buffers.
    ///
    /// Allocation failures and unready resources never fail the plan: the affected items
    /// move to [`CyclePlan::retained`] and the rest of the cycle proceeds.
    pub fn plan<B: ComputeBackend>(
        &self,
        inputs: &CompositeInputs<'_>,
        cache: &mut InfluenceCache,
        backend: &mut B,
        mut items: DirtySet,
    ) -> CyclePlan {
        let mut plan = CyclePlan::default();
        let resolution = inputs.grid.resolution;

        for region in items.regions() {
            if !inputs.index.has_layers(region) {
                if inputs.store.is_active(region) {
                    debug!(region = %region, "region lost its last layer");
                    plan.teardown.insert(region);
                }
                continue;
            }
            for layer in inputs.index.layers(region) {
                if !cache.contains(layer.id, region) {
                    items.insert(layer.id, region);
                }
            }
            match allocate_staging(backend, region, resolution) {
                Ok(staging) => {
                    plan.staging.insert(region, staging);
                    plan.scheduled.insert(region);
                }
                Err(err) => {
                    warn!(
                        region = %region, error = %err,
                        "staging allocation failed; region stays dirty"
                    );
                    plan.retained.merge(items.split_region(region));
                    plan.skipped.push(Skip {
                        layer: None,
                        region,
                        reason: SkipReason::Allocation(err),
                    });
                }
            }
        }

        let scheduled: Vec<RegionCoord> = plan.scheduled.iter().copied().collect();
        for region in scheduled {
            let Some(staging) = plan.staging.get(&region).copied() else {
                continue;
            };
            let frame = RegionFrame {
                origin: inputs.grid.region_origin(region),
                cell_size: inputs.grid.cell_size(),
                resolution,
            };
            for kind in LayerKind::ALL {
                let layers: Vec<IndexedLayer> =
                    inputs.index.layers_of_kind(region, kind).copied().collect();
                if layers.is_empty() {
                    continue;
                }
                let phase = Phase::mask_of(kind);
                let sources = stitch_sources(phase, region, staging, &plan.staging, inputs.store);

                let mut ready = Vec::with_capacity(layers.len());
                for indexed in layers {
                    let Some(layer) = inputs.registry.get(indexed.id) else {
                        continue;
                    };
                    let previous = cache.get(indexed.id, region);
                    if !items.contains(indexed.id, region) {
                        if let Some(entry) = previous {
                            ready.push(Contribution {
                                indexed,
                                layer,
                                influence: entry.handle,
                            });
                        }
                        continue;
                    }
                    match self.record_mask(
                        backend,
                        cache,
                        &mut plan.scratch,
                        layer,
                        region,
                        frame,
                        sources,
                        inputs.quality,
                    ) {
                        Ok((spec, influence)) => {
                            plan.tasks.push(spec);
                            if phase != Phase::HeightMask && layer.has_topological_mask() {
                                let read = stitched_staging(region, &plan.staging);
                                if !read.is_empty() {
                                    plan.stitched.entry(region).or_default().extend(read);
                                }
                            }
                            ready.push(Contribution {
                                indexed,
                                layer,
                                influence,
                            });
                        }
                        Err(reason) => {
                            match &reason {
                                SkipReason::ResourceNotReady { resource } => info!(
                                    layer = %indexed.id, region = %region, resource = %resource,
                                    "waiting on resource; layer stays dirty"
                                ),
                                SkipReason::Allocation(err) => warn!(
                                    layer = %indexed.id, region = %region, error = %err,
                                    "influence allocation failed; layer stays dirty"
                                ),
                            }
                            items.remove(indexed.id, region);
                            plan.retained.insert(indexed.id, region);
                            plan.skipped.push(Skip {
                                layer: Some(indexed.id),
                                region,
                                reason,
                            });
                            // The region keeps the influence it was last composited with.
                            // Without an entry the layer never reached committed storage.
                            if let Some(entry) = previous {
                                ready.push(Contribution {
                                    indexed,
                                    layer,
                                    influence: entry.handle,
                                });
                            }
                        }
                    }
                }

                match kind {
                    LayerKind::Height | LayerKind::Texture => {
                        plan.tasks.push(composite_task(kind, region, staging, &ready));
                    }
                    LayerKind::Feature => {
                        self.plan_features(
                            backend, &mut plan, &mut items, region, frame, staging, ready,
                        );
                    }
                }
            }
        }

        plan.items = items;
        debug!(
            scheduled = plan.scheduled.len(),
            teardown = plan.teardown.len(),
            tasks = plan.tasks.len(),
            skipped = plan.skipped.len(),
            "planned cycle"
        );
        plan
    }

    #[allow(clippy::too_many_arguments)]
    fn record_mask<B: ComputeBackend>(
        &self,
        backend: &mut B,
        cache: &mut InfluenceCache,
        scratch: &mut Vec<BufferHandle>,
        layer: &Layer,
        region: RegionCoord,
        frame: RegionFrame,
        sources: StitchSources,
        quality: Quality,
    ) -> Result<(TaskSpec, BufferHandle), SkipReason> {
        if let Some(resource) = self.pipeline.missing_resource(layer, backend) {
            return Err(SkipReason::ResourceNotReady {
                resource: resource.to_string(),
            });
        }

        let resolution = frame.resolution;
        let cached = cache.get(layer.id, region).map(|e| e.handle);
        let influence = match cached {
            Some(handle) => handle,
            None => backend
                .allocate(&BufferDesc::f32(
                    format!("influence:{}:{region}", layer.id),
                    resolution,
                    resolution,
                ))
                .map_err(SkipReason::Allocation)?,
        };
        let size = self.pipeline.context_size(resolution);
        let context = match backend.allocate(&BufferDesc::f32(
            format!("context:{}:{region}", layer.id),
            size,
            size,
        )) {
            Ok(handle) => handle,
            Err(err) => {
                if cached.is_none() {
                    backend.release(influence);
                }
                return Err(SkipReason::Allocation(err));
            }
        };
        scratch.push(context);
        cache.insert(
            layer.id,
            region,
            InfluenceEntry {
                handle: influence,
                quality,
            },
        );

        let phase = Phase::mask_of(layer.kind());
        let batch = self.pipeline.record(
            format!("{phase}:{region}:{}", layer.id),
            layer,
            frame,
            sources,
            MaskTarget { influence, context },
            quality,
        );
        Ok((
            TaskSpec {
                phase,
                region,
                layer: Some(layer.id),
                kind: TaskKind::Mask,
                batch,
            },
            influence,
        ))
    }

    /// Rasterizes feature claims in ascending `(priority, registration order)` and applies
    /// them to the staging buffers.
    #[allow(clippy::too_many_arguments)]
    fn plan_features<B: ComputeBackend>(
        &self,
        backend: &mut B,
        plan: &mut CyclePlan,
        items: &mut DirtySet,
        region: RegionCoord,
        frame: RegionFrame,
        staging: Staging,
        mut features: Vec<Contribution<'_>>,
    ) {
        features.sort_by_key(|c| (c.indexed.priority, c.indexed.order));
        if features.len() > MAX_FEATURE_SLOTS {
            warn!(
                region = %region,
                features = features.len(),
                "too many features in one region; lowest priorities dropped"
            );
            features.drain(..features.len() - MAX_FEATURE_SLOTS);
        }

        let claim = match backend.allocate(&BufferDesc::u32(
            format!("claim:{region}"),
            frame.resolution,
            frame.resolution,
        )) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(
                    region = %region, error = %err,
                    "claim allocation failed; features stay dirty"
                );
                for c in &features {
                    items.remove(c.indexed.id, region);
                    plan.retained.insert(c.indexed.id, region);
                }
                plan.skipped.push(Skip {
                    layer: None,
                    region,
                    reason: SkipReason::Allocation(err),
                });
                return;
            }
        };
        plan.scratch.push(claim);

        let mut rasterize =
            CommandBatch::new(format!("{}:{region}:rasterize", Phase::FeatureMask));
        rasterize
            .push(ComputeOp::Clear {
                target: claim,
                value: ClearValue::U32(FeatureClaim::UNCLAIMED.0),
            })
            .barrier();
        let mut params = Vec::with_capacity(features.len());
        for c in &features {
            let LayerOperation::Feature {
                geometry,
                params: p,
            } = &c.layer.operation
            else {
                continue;
            };
            let slot = params.len() as u8;
            params.push(*p);
            rasterize
                .push(ComputeOp::Rasterize {
                    influence: c.influence,
                    claim,
                    frame,
                    slot,
                    geometry: geometry.clone(),
                })
                .barrier();
            debug!(
                region = %region,
                layer = %c.indexed.id,
                priority = c.indexed.priority,
                slot,
                "rasterize feature"
            );
        }

        let mut apply = CommandBatch::new(format!("{}:{region}", Phase::FeatureApplication));
        apply.push(ComputeOp::ApplyFeatures {
            claim,
            height: staging.height,
            material: staging.material,
            features: params,
        });

        plan.tasks.push(TaskSpec {
            phase: Phase::FeatureMask,
            region,
            layer: None,
            kind: TaskKind::Rasterize,
            batch: rasterize,
        });
        plan.tasks.push(TaskSpec {
            phase: Phase::FeatureApplication,
            region,
            layer: None,
            kind: TaskKind::Apply,
            batch: apply,
        });
    }
}

fn allocate_staging<B: ComputeBackend>(
    backend: &mut B,
    region: RegionCoord,
    resolution: u32,
) -> Result<Staging, BackendError> {
    let height = backend.allocate(&BufferDesc::f32(
        format!("staging:height:{region}"),
        resolution,
        resolution,
    ))?;
    match backend.allocate(&BufferDesc::u32(
        format!("staging:material:{region}"),
        resolution,
        resolution,
    )) {
        Ok(material) => Ok(Staging { height, material }),
        Err(err) => {
            backend.release(height);
            Err(err)
        }
    }
}

/// Height buffers stitched into a mask context.
///
/// Height masks see the committed terrain; later phases see this cycle's staging height
/// wherever a region is being recomposited, and committed height elsewhere.
fn stitch_sources(
    phase: Phase,
    region: RegionCoord,
    staging: Staging,
    all_staging: &BTreeMap<RegionCoord, Staging>,
    store: &RegionStore,
) -> StitchSources {
    let lookup = |r: RegionCoord| {
        let committed = store.get(r).map(|c| c.height());
        if phase == Phase::HeightMask {
            committed
        } else {
            all_staging.get(&r).map(|s| s.height).or(committed)
        }
    };
    StitchSources {
        center: lookup(region).unwrap_or(staging.height),
        neighbors: region.neighbors().map(lookup),
    }
}

/// Other regions whose staging height a region's context reads.
fn stitched_staging(
    region: RegionCoord,
    all_staging: &BTreeMap<RegionCoord, Staging>,
) -> BTreeSet<RegionCoord> {
    region
        .neighbors()
        .into_iter()
        .filter(|r| all_staging.contains_key(r))
        .collect()
}

fn composite_task(
    kind: LayerKind,
    region: RegionCoord,
    staging: Staging,
    ready: &[Contribution<'_>],
) -> TaskSpec {
    let (phase, target, clear) = match kind {
        LayerKind::Height => (Phase::HeightComposite, staging.height, ClearValue::F32(0.0)),
        _ => (Phase::TextureComposite, staging.material, ClearValue::U32(0)),
    };
    let mut batch = CommandBatch::new(format!("{phase}:{region}"));
    batch.push(ComputeOp::Clear { target, value: clear }).barrier();
    for c in ready {
        let op = match &c.layer.operation {
            LayerOperation::Height {
                operation,
                amplitude,
            } => CompositeOp::Height {
                operation: *operation,
                amplitude: *amplitude,
            },
            LayerOperation::Texture { operation, paint } => CompositeOp::Material {
                operation: *operation,
                paint: *paint,
            },
            LayerOperation::Feature { .. } => continue,
        };
        batch
            .push(ComputeOp::Composite {
                source: c.influence,
                target,
                op,
            })
            .barrier();
    }
    TaskSpec {
        phase,
        region,
        layer: None,
        kind: TaskKind::Composite,
        batch,
    }
}
