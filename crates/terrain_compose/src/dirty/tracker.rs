//! Per-layer and per-region dirty state.
//!
//! The tracker is the single source of truth for "needs recompute". Marks accumulate in a
//! pending [`DirtySet`] until a cycle takes them; items a cycle could not finish are
//! restored so they are retried by the next one.
use std::collections::{BTreeMap, BTreeSet};

use crate::dirty::spatial::SpatialResolver;
use crate::layer::registry::{Footprint, LayerChange};
use crate::layer::{LayerId, LayerKind};
use crate::region::RegionCoord;

/// Stale contribution of a layer to regions it no longer covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vacated {
    /// Kind of the layer when it last contributed.
    pub kind: LayerKind,
    pub priority: i32,
    pub regions: BTreeSet<RegionCoord>,
}

/// Dirty `(layer, region)` items plus the stale contributions to clear.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtySet {
    pub layers: BTreeMap<LayerId, BTreeSet<RegionCoord>>,
    pub vacated: BTreeMap<LayerId, Vacated>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.vacated.is_empty()
    }

    /// Marks `(layer, region)` dirty. Returns `true` when the item is new.
    pub fn insert(&mut self, layer: LayerId, region: RegionCoord) -> bool {
        self.layers.entry(layer).or_default().insert(region)
    }

    /// Records that `layer` left `region`. Returns `true` when the item is new.
    pub fn insert_vacated(
        &mut self,
        layer: LayerId,
        kind: LayerKind,
        priority: i32,
        region: RegionCoord,
    ) -> bool {
        self.vacated
            .entry(layer)
            .or_insert_with(|| Vacated {
                kind,
                priority,
                regions: BTreeSet::new(),
            })
            .regions
            .insert(region)
    }

    pub fn contains(&self, layer: LayerId, region: RegionCoord) -> bool {
        self.layers
            .get(&layer)
            .is_some_and(|regions| regions.contains(&region))
    }

    pub fn is_layer_dirty(&self, layer: LayerId) -> bool {
        self.layers.contains_key(&layer) || self.vacated.contains_key(&layer)
    }

    /// Layers with at least one dirty or vacated item.
    pub fn layer_ids(&self) -> BTreeSet<LayerId> {
        self.layers.keys().chain(self.vacated.keys()).copied().collect()
    }

    pub fn is_region_dirty(&self, region: RegionCoord) -> bool {
        self.layers.values().any(|r| r.contains(&region))
            || self.vacated.values().any(|v| v.regions.contains(&region))
    }

    /// Every region referenced by a dirty or vacated item.
    pub fn regions(&self) -> BTreeSet<RegionCoord> {
        self.layers
            .values()
            .flatten()
            .chain(self.vacated.values().flat_map(|v| &v.regions))
            .copied()
            .collect()
    }

    /// Dirty `(layer, region)` items in ascending order.
    pub fn items(&self) -> impl Iterator<Item = (LayerId, RegionCoord)> + '_ {
        self.layers
            .iter()
            .flat_map(|(&id, regions)| regions.iter().map(move |&r| (id, r)))
    }

    pub fn len(&self) -> usize {
        self.layers.values().map(BTreeSet::len).sum::<usize>()
            + self.vacated.values().map(|v| v.regions.len()).sum::<usize>()
    }

    pub fn merge(&mut self, other: DirtySet) {
        for (id, regions) in other.layers {
            self.layers.entry(id).or_default().extend(regions);
        }
        for (id, vacated) in other.vacated {
            match self.vacated.get_mut(&id) {
                Some(existing) => existing.regions.extend(vacated.regions),
                None => {
                    self.vacated.insert(id, vacated);
                }
            }
        }
    }

    /// Removes and returns every item that refers to `region`.
    pub fn split_region(&mut self, region: RegionCoord) -> DirtySet {
        let mut out = DirtySet::new();
        for (&id, regions) in &mut self.layers {
            if regions.remove(&region) {
                out.insert(id, region);
            }
        }
        for (&id, vacated) in &mut self.vacated {
            if vacated.regions.remove(&region) {
                out.insert_vacated(id, vacated.kind, vacated.priority, region);
            }
        }
        self.layers.retain(|_, regions| !regions.is_empty());
        self.vacated.retain(|_, v| !v.regions.is_empty());
        out
    }

    pub fn remove(&mut self, layer: LayerId, region: RegionCoord) -> bool {
        let Some(regions) = self.layers.get_mut(&layer) else {
            return false;
        };
        let removed = regions.remove(&region);
        if regions.is_empty() {
            self.layers.remove(&layer);
        }
        removed
    }
}

/// Accumulates dirty marks between cycles.
#[derive(Debug)]
pub struct DirtyStateTracker {
    resolver: SpatialResolver,
    pending: DirtySet,
}

impl DirtyStateTracker {
    pub fn new(resolver: SpatialResolver) -> Self {
        Self {
            resolver,
            pending: DirtySet::new(),
        }
    }

    pub fn resolver(&self) -> &SpatialResolver {
        &self.resolver
    }

    /// Records a registry edit.
    pub fn apply(&mut self, change: &LayerChange) {
        match (&change.before, &change.after) {
            (None, Some(after)) => self.mark_layer_dirty(change.id, after),
            (Some(before), None) => self.mark_layer_removed(change.id, before),
            (Some(before), Some(after)) if before.kind != after.kind => {
                self.mark_layer_removed(change.id, before);
                self.mark_layer_dirty(change.id, after);
            }
            (Some(before), Some(after)) => self.mark_layer_moved(change.id, before, after),
            (None, None) => {}
        }
    }

    /// Marks every region under the layer's bounds dirty for that layer.
    pub fn mark_layer_dirty(&mut self, id: LayerId, footprint: &Footprint) {
        for region in self.resolver.resolve(&footprint.bounds) {
            self.pending.insert(id, region);
        }
    }

    /// Marks the new footprint dirty and queues a cleanup for each region only the old
    /// footprint covered.
    pub fn mark_layer_moved(&mut self, id: LayerId, old: &Footprint, new: &Footprint) {
        let delta = self.resolver.resolve_move(&old.bounds, &new.bounds);
        for region in delta.covered() {
            self.pending.insert(id, region);
        }
        for region in delta.vacated {
            self.pending
                .insert_vacated(id, old.kind, old.priority, region);
        }
    }

    /// Queues a one-shot cleanup for every region the layer covered.
    pub fn mark_layer_removed(&mut self, id: LayerId, footprint: &Footprint) {
        for region in self.resolver.resolve(&footprint.bounds) {
            self.pending
                .insert_vacated(id, footprint.kind, footprint.priority, region);
        }
        self.pending.layers.remove(&id);
    }

    /// Takes the pending set, leaving the tracker clean.
    pub fn take(&mut self) -> DirtySet {
        std::mem::take(&mut self.pending)
    }

    /// Folds items back in, typically work a cycle could not finish.
    pub fn restore(&mut self, items: DirtySet) {
        self.pending.merge(items);
    }

    pub fn pending(&self) -> &DirtySet {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_layer_dirty(&self, id: LayerId) -> bool {
        self.pending.is_layer_dirty(id)
    }

    pub fn is_region_dirty(&self, region: RegionCoord) -> bool {
        self.pending.is_region_dirty(region)
    }
}
