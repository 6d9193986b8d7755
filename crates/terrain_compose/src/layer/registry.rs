//! Ordered layer registry.
//!
//! The registry owns every [`Layer`] in registration order, which is also the order
//! height and texture layers are folded into region buffers. Every mutator returns a
//! [`LayerChange`] describing the layer's footprint before and after the edit; feeding
//! that value to the dirty tracker is what schedules recomputation.
use std::collections::HashMap;

use glam::Vec2;

use crate::error::{Error, Result};
use crate::layer::{Layer, LayerDesc, LayerId, LayerKind, LayerOperation};
use crate::region::WorldBounds;

/// The part of a layer that decides which regions and dependents it touches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Footprint {
    pub bounds: WorldBounds,
    pub kind: LayerKind,
    pub priority: i32,
}

impl Layer {
    /// Footprint while the layer is enabled.
    pub fn footprint(&self) -> Option<Footprint> {
        self.enabled.then_some(Footprint {
            bounds: self.bounds,
            kind: self.kind(),
            priority: self.priority,
        })
    }
}

/// What kind of edit produced a [`LayerChange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    Moved,
    Modified,
    Reordered,
    Enabled,
    Disabled,
}

/// Description of one registry edit, to be handed to the dirty tracker.
#[must_use = "a layer change does nothing until it is applied to the terrain"]
#[derive(Clone, Debug, PartialEq)]
pub struct LayerChange {
    pub id: LayerId,
    pub kind: ChangeKind,
    /// Footprint before the edit, `None` if the layer did not contribute.
    pub before: Option<Footprint>,
    /// Footprint after the edit, `None` if the layer no longer contributes.
    pub after: Option<Footprint>,
}

impl LayerChange {
    pub fn layer_id(&self) -> LayerId {
        self.id
    }
}

/// Ordered collection of layers with add/remove/reorder/update operations.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: HashMap<LayerId, Layer>,
    order: Vec<LayerId>,
    next_id: u64,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self {
            layers: HashMap::new(),
            order: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    /// Layers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.order.iter().filter_map(|id| self.layers.get(id))
    }

    pub fn ids(&self) -> &[LayerId] {
        &self.order
    }

    /// Position of a layer in registration order.
    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.order.iter().position(|&other| other == id)
    }

    fn layer(&self, id: LayerId) -> Result<&Layer> {
        self.layers.get(&id).ok_or(Error::UnknownLayer { id })
    }

    /// Validates and appends a layer.
    pub fn add(&mut self, desc: LayerDesc) -> Result<LayerChange> {
        desc.validate()?;
        let id = LayerId(self.next_id);
        self.next_id += 1;

        let layer = Layer::from_desc(id, desc);
        let after = layer.footprint();
        self.layers.insert(id, layer);
        self.order.push(id);

        Ok(LayerChange {
            id,
            kind: ChangeKind::Added,
            before: None,
            after,
        })
    }

    /// Removes a layer and returns its final footprint as the change.
    pub fn remove(&mut self, id: LayerId) -> Result<LayerChange> {
        let layer = self.layers.remove(&id).ok_or(Error::UnknownLayer { id })?;
        self.order.retain(|&other| other != id);
        Ok(LayerChange {
            id,
            kind: ChangeKind::Removed,
            before: layer.footprint(),
            after: None,
        })
    }

    /// Moves a layer to new bounds.
    ///
    /// Feature layers keep their geometry's shape: the centerline is translated so the
    /// derived bounds are centered on the requested bounds.
    pub fn set_bounds(&mut self, id: LayerId, bounds: WorldBounds) -> Result<LayerChange> {
        let current = self.layer(id)?.bounds;
        let delta = bounds.center() - current.center();
        self.edit(id, ChangeKind::Moved, |desc| match &mut desc.operation {
            LayerOperation::Feature { geometry, .. } => {
                geometry.translate(delta);
                desc.bounds = geometry.bounds();
            }
            _ => desc.bounds = bounds,
        })
    }

    pub fn translate(&mut self, id: LayerId, delta: Vec2) -> Result<LayerChange> {
        let bounds = self.layer(id)?.bounds.translated(delta);
        self.set_bounds(id, bounds)
    }

    pub fn set_enabled(&mut self, id: LayerId, enabled: bool) -> Result<LayerChange> {
        let kind = if enabled {
            ChangeKind::Enabled
        } else {
            ChangeKind::Disabled
        };
        self.edit(id, kind, |desc| desc.enabled = enabled)
    }

    /// Moves a layer to `index` in registration order, clamping to the end.
    pub fn reorder(&mut self, id: LayerId, index: usize) -> Result<LayerChange> {
        let from = self.index_of(id).ok_or(Error::UnknownLayer { id })?;
        self.order.remove(from);
        let to = index.min(self.order.len());
        self.order.insert(to, id);
        let footprint = self.layer(id)?.footprint();
        Ok(LayerChange {
            id,
            kind: ChangeKind::Reordered,
            before: footprint,
            after: footprint,
        })
    }

    /// Applies an arbitrary edit to a layer's description.
    ///
    /// The edited description is validated before it replaces the layer; on failure the
    /// layer is left untouched. Feature bounds are re-derived from the geometry.
    pub fn update(&mut self, id: LayerId, f: impl FnOnce(&mut LayerDesc)) -> Result<LayerChange> {
        self.edit(id, ChangeKind::Modified, |desc| {
            f(desc);
            if let LayerOperation::Feature { geometry, .. } = &desc.operation {
                desc.bounds = geometry.bounds();
            }
        })
    }

    fn edit(
        &mut self,
        id: LayerId,
        kind: ChangeKind,
        f: impl FnOnce(&mut LayerDesc),
    ) -> Result<LayerChange> {
        let layer = self.layer(id)?;
        let before = layer.footprint();
        let mut desc = layer.to_desc();
        f(&mut desc);
        desc.validate()?;

        let layer = Layer::from_desc(id, desc);
        let after = layer.footprint();
        let kind = match (kind, before.is_some(), after.is_some()) {
            (ChangeKind::Modified, false, true) => ChangeKind::Enabled,
            (ChangeKind::Modified, true, false) => ChangeKind::Disabled,
            (ChangeKind::Modified, true, true)
                if before.map(|f| f.bounds) != after.map(|f| f.bounds) =>
            {
                ChangeKind::Moved
            }
            (kind, _, _) => kind,
        };
        self.layers.insert(id, layer);

        Ok(LayerChange {
            id,
            kind,
            before,
            after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{FeatureGeometry, FeatureParams, MaterialPaint};

    fn bounds(x: f32) -> WorldBounds {
        WorldBounds::new(Vec2::new(x, 0.0), Vec2::new(x + 10.0, 10.0))
    }

    #[test]
    fn add_assigns_increasing_ids_in_order() {
        let mut registry = LayerRegistry::new();
        let a = registry.add(LayerDesc::height("a", bounds(0.0), 1.0)).unwrap();
        let b = registry
            .add(LayerDesc::texture("b", bounds(0.0), MaterialPaint::new(1)))
            .unwrap();
        assert!(a.id < b.id);
        assert_eq!(registry.ids(), &[a.id, b.id]);
        assert_eq!(a.kind, ChangeKind::Added);
        assert!(a.before.is_none());
        assert_eq!(a.after.map(|f| f.kind), Some(LayerKind::Height));
    }

    #[test]
    fn add_rejects_invalid_desc() {
        let mut registry = LayerRegistry::new();
        let err = registry
            .add(LayerDesc::texture("bad", bounds(0.0), MaterialPaint::new(99)))
            .expect_err("invalid material");
        assert!(matches!(err, Error::InvalidLayer { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_reports_last_footprint() {
        let mut registry = LayerRegistry::new();
        let id = registry.add(LayerDesc::height("a", bounds(0.0), 1.0)).unwrap().id;
        let change = registry.remove(id).unwrap();
        assert_eq!(change.kind, ChangeKind::Removed);
        assert_eq!(change.before.map(|f| f.bounds), Some(bounds(0.0)));
        assert!(change.after.is_none());
        assert!(registry.get(id).is_none());
        assert!(matches!(
            registry.remove(id),
            Err(Error::UnknownLayer { .. })
        ));
    }

    #[test]
    fn set_bounds_reports_old_and_new() {
        let mut registry = LayerRegistry::new();
        let id = registry.add(LayerDesc::height("a", bounds(0.0), 1.0)).unwrap().id;
        let change = registry.set_bounds(id, bounds(10.0)).unwrap();
        assert_eq!(change.kind, ChangeKind::Moved);
        assert_eq!(change.before.unwrap().bounds, bounds(0.0));
        assert_eq!(change.after.unwrap().bounds, bounds(10.0));
    }

    #[test]
    fn moving_a_feature_translates_its_centerline() {
        let mut registry = LayerRegistry::new();
        let geometry = FeatureGeometry::new(vec![Vec2::ZERO, Vec2::new(10.0, 0.0)], 2.0, 1.0);
        let id = registry
            .add(LayerDesc::feature("road", geometry, FeatureParams::default()))
            .unwrap()
            .id;
        let change = registry.translate(id, Vec2::new(5.0, 5.0)).unwrap();
        let layer = registry.get(id).unwrap();
        match &layer.operation {
            LayerOperation::Feature { geometry, .. } => {
                assert_eq!(geometry.centerline[0], Vec2::new(5.0, 5.0));
            }
            _ => panic!("expected feature"),
        }
        assert_eq!(change.after.unwrap().bounds, layer.bounds);
    }

    #[test]
    fn disable_clears_after_footprint() {
        let mut registry = LayerRegistry::new();
        let id = registry.add(LayerDesc::height("a", bounds(0.0), 1.0)).unwrap().id;
        let change = registry.set_enabled(id, false).unwrap();
        assert_eq!(change.kind, ChangeKind::Disabled);
        assert!(change.before.is_some());
        assert!(change.after.is_none());
    }

    #[test]
    fn reorder_clamps_index() {
        let mut registry = LayerRegistry::new();
        let a = registry.add(LayerDesc::height("a", bounds(0.0), 1.0)).unwrap().id;
        let b = registry.add(LayerDesc::height("b", bounds(0.0), 1.0)).unwrap().id;
        let c = registry.add(LayerDesc::height("c", bounds(0.0), 1.0)).unwrap().id;
        let change = registry.reorder(a, 99).unwrap();
        assert_eq!(change.kind, ChangeKind::Reordered);
        assert_eq!(registry.ids(), &[b, c, a]);
        let _ = registry.reorder(a, 0).unwrap();
        assert_eq!(registry.ids(), &[a, b, c]);
    }

    #[test]
    fn failed_update_leaves_layer_untouched() {
        let mut registry = LayerRegistry::new();
        let id = registry.add(LayerDesc::height("a", bounds(0.0), 1.0)).unwrap().id;
        let before = registry.get(id).cloned();
        let result = registry.update(id, |desc| desc.falloff.width = 0.0);
        assert!(result.is_err());
        assert_eq!(registry.get(id).cloned(), before);
    }

    #[test]
    fn update_that_moves_is_reported_as_move() {
        let mut registry = LayerRegistry::new();
        let id = registry.add(LayerDesc::height("a", bounds(0.0), 1.0)).unwrap().id;
        let change = registry
            .update(id, |desc| desc.bounds = bounds(3.0))
            .unwrap();
        assert_eq!(change.kind, ChangeKind::Moved);
        let change = registry.update(id, |desc| desc.priority = 4).unwrap();
        assert_eq!(change.kind, ChangeKind::Modified);
    }
}
