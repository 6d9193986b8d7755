//! Causal propagation of dirty state across layer kinds.
//!
//! Dirty items are expanded per region along the fixed hierarchy Height < Texture <
//! Feature. Within Feature layers a higher priority forces lower priorities dirty, so
//! overlapping paths are re-resolved together. Propagation never crosses regions and
//! never points from a higher tier to a lower one.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dirty::spatial::SpatialResolver;
use crate::dirty::tracker::DirtySet;
use crate::layer::{LayerId, LayerKind, LayerRegistry};
use crate::region::RegionCoord;

/// A contributing layer as seen from one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexedLayer {
    pub id: LayerId,
    pub kind: LayerKind,
    pub priority: i32,
    /// Position in registration order.
    pub order: usize,
    /// Whether the mask stack reads composited height.
    pub topological: bool,
}

/// Enabled, non-degenerate layers per region, in registration order.
#[derive(Clone, Debug, Default)]
pub struct RegionIndex {
    regions: BTreeMap<RegionCoord, Vec<IndexedLayer>>,
}

impl RegionIndex {
    /// Indexes the layers overlapping each region of `regions`.
    pub fn build(
        registry: &LayerRegistry,
        resolver: &SpatialResolver,
        regions: &BTreeSet<RegionCoord>,
    ) -> Self {
        let mut index: BTreeMap<RegionCoord, Vec<IndexedLayer>> =
            regions.iter().map(|&r| (r, Vec::new())).collect();
        for (order, layer) in registry.iter().enumerate() {
            if !layer.contributes() {
                continue;
            }
            let entry = IndexedLayer {
                id: layer.id,
                kind: layer.kind(),
                priority: layer.priority,
                order,
                topological: layer.has_topological_mask(),
            };
            for region in resolver.resolve(&layer.bounds) {
                if let Some(layers) = index.get_mut(&region) {
                    layers.push(entry);
                }
            }
        }
        Self { regions: index }
    }

    pub fn layers(&self, region: RegionCoord) -> &[IndexedLayer] {
        self.regions.get(&region).map_or(&[], Vec::as_slice)
    }

    pub fn has_layers(&self, region: RegionCoord) -> bool {
        !self.layers(region).is_empty()
    }

    pub fn layers_of_kind(
        &self,
        region: RegionCoord,
        kind: LayerKind,
    ) -> impl Iterator<Item = &IndexedLayer> + '_ {
        self.layers(region).iter().filter(move |l| l.kind == kind)
    }

    pub fn find(&self, region: RegionCoord, id: LayerId) -> Option<&IndexedLayer> {
        self.layers(region).iter().find(|l| l.id == id)
    }

    pub fn regions(&self) -> impl Iterator<Item = RegionCoord> + '_ {
        self.regions.keys().copied()
    }
}

/// Derived edge: `source` being dirty in `region` forces `dependent` dirty there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub source: LayerId,
    pub dependent: LayerId,
    pub region: RegionCoord,
}

/// Whether a dirty Height layer forces overlapping Texture layers dirty.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TexturePropagation {
    /// Always; texture compositing reads freshly composited height.
    #[default]
    Unconditional,
    /// Only Texture layers whose mask stack contains a topological mask.
    TopologicalOnly,
}

#[derive(Clone, Copy, Debug)]
struct Seed {
    id: LayerId,
    kind: LayerKind,
    priority: i32,
    region: RegionCoord,
}

/// Rule table for cross-kind dirty propagation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CausalGraph {
    texture_propagation: TexturePropagation,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_texture_propagation(mut self, policy: TexturePropagation) -> Self {
        self.texture_propagation = policy;
        self
    }

    pub fn texture_propagation(&self) -> TexturePropagation {
        self.texture_propagation
    }

    /// Whether a dirty source of `kind`/`priority` forces `dependent` dirty.
    pub fn forces(&self, kind: LayerKind, priority: i32, dependent: &IndexedLayer) -> bool {
        match (kind, dependent.kind) {
            (LayerKind::Height, LayerKind::Texture) => match self.texture_propagation {
                TexturePropagation::Unconditional => true,
                TexturePropagation::TopologicalOnly => dependent.topological,
            },
            (LayerKind::Height | LayerKind::Texture, LayerKind::Feature) => true,
            (LayerKind::Feature, LayerKind::Feature) => priority > dependent.priority,
            _ => false,
        }
    }

    /// Expands `set` in place and returns the edges that were followed.
    ///
    /// Items whose layer no longer contributes to the region are dropped; vacated
    /// contributions act as sources under the layer's last known kind and priority.
    pub fn propagate(&self, set: &mut DirtySet, index: &RegionIndex) -> Vec<DependencyEdge> {
        let mut queue = VecDeque::new();
        let mut stale = Vec::new();
        for (id, region) in set.items() {
            match index.find(region, id) {
                Some(layer) => queue.push_back(Seed {
                    id,
                    kind: layer.kind,
                    priority: layer.priority,
                    region,
                }),
                None => stale.push((id, region)),
            }
        }
        for (id, region) in stale {
            set.remove(id, region);
        }
        for (&id, vacated) in &set.vacated {
            for &region in &vacated.regions {
                queue.push_back(Seed {
                    id,
                    kind: vacated.kind,
                    priority: vacated.priority,
                    region,
                });
            }
        }

        let mut edges = BTreeSet::new();
        while let Some(seed) = queue.pop_front() {
            for dependent in index.layers(seed.region) {
                if dependent.id == seed.id || !self.forces(seed.kind, seed.priority, dependent) {
                    continue;
                }
                debug_assert!(
                    seed.kind <= dependent.kind,
                    "dependency edge from {:?} to {:?}",
                    seed.kind,
                    dependent.kind
                );
                edges.insert(DependencyEdge {
                    source: seed.id,
                    dependent: dependent.id,
                    region: seed.region,
                });
                if set.insert(dependent.id, seed.region) {
                    queue.push_back(Seed {
                        id: dependent.id,
                        kind: dependent.kind,
                        priority: dependent.priority,
                        region: seed.region,
                    });
                }
            }
        }
        debug!(edges = edges.len(), items = set.len(), "propagated dirty set");
        edges.into_iter().collect()
    }
}
