//! Layer data model: kinds, operations, masks and the ordered registry.
//!
//! Layers are user-authored, non-destructive contributions to the regions they overlap.
//! The three kinds form a fixed hierarchy, Height < Texture < Feature, which drives both
//! compositing order and causal dirty propagation.
pub mod feature;
pub mod mask;
pub mod registry;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use feature::{FeatureClaim, FeatureGeometry, FeatureParams, FeatureZone};
pub use mask::{Falloff, FalloffShape, Mask, MaskBlend, MaskKernel, ResponseCurve};
pub use registry::{ChangeKind, Footprint, LayerChange, LayerRegistry};

use crate::error::{Error, Result};
use crate::region::material::{MATERIAL_COUNT, MAX_UV_ANGLE, MAX_UV_SCALE};
use crate::region::WorldBounds;

/// Stable identifier of a registered layer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Kind of a layer. The derived ordering is the dependency hierarchy.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Height,
    Texture,
    Feature,
}

impl LayerKind {
    pub const ALL: [LayerKind; 3] = [LayerKind::Height, LayerKind::Texture, LayerKind::Feature];

    /// Position in the hierarchy, `0` for Height.
    pub fn tier(self) -> u8 {
        match self {
            LayerKind::Height => 0,
            LayerKind::Texture => 1,
            LayerKind::Feature => 2,
        }
    }

    /// `true` when `self` sits strictly below `other` in the hierarchy.
    pub fn precedes(self, other: LayerKind) -> bool {
        self.tier() < other.tier()
    }

    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Height => "height",
            LayerKind::Texture => "texture",
            LayerKind::Feature => "feature",
        }
    }
}

/// Per-cell combination of a layer's influence with the region buffer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    Multiply,
    Replace,
    Mix,
}

/// Material painted by a texture layer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaterialPaint {
    pub material: u8,
    pub uv_angle: u8,
    pub uv_scale: u8,
}

impl MaterialPaint {
    pub fn new(material: u8) -> Self {
        Self {
            material,
            uv_angle: 0,
            uv_scale: 0,
        }
    }

    pub fn with_uv(mut self, angle: u8, scale: u8) -> Self {
        self.uv_angle = angle;
        self.uv_scale = scale;
        self
    }
}

/// What a layer does to the regions it overlaps; determines its [`LayerKind`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum LayerOperation {
    Height {
        operation: BlendOperation,
        /// Target elevation the influence scales.
        amplitude: f32,
    },
    Texture {
        operation: BlendOperation,
        paint: MaterialPaint,
    },
    Feature {
        geometry: FeatureGeometry,
        params: FeatureParams,
    },
}

impl LayerOperation {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerOperation::Height { .. } => LayerKind::Height,
            LayerOperation::Texture { .. } => LayerKind::Texture,
            LayerOperation::Feature { .. } => LayerKind::Feature,
        }
    }
}

/// Authoring description of a layer, validated on registration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct LayerDesc {
    pub name: String,
    pub bounds: WorldBounds,
    pub masks: Vec<Mask>,
    pub falloff: Falloff,
    pub operation: LayerOperation,
    /// Claim strength among overlapping features; ignored for other kinds.
    pub priority: i32,
    pub enabled: bool,
}

impl LayerDesc {
    pub fn height(name: impl Into<String>, bounds: WorldBounds, amplitude: f32) -> Self {
        Self::with_operation(
            name,
            bounds,
            LayerOperation::Height {
                operation: BlendOperation::Add,
                amplitude,
            },
        )
    }

    pub fn texture(name: impl Into<String>, bounds: WorldBounds, paint: MaterialPaint) -> Self {
        Self::with_operation(
            name,
            bounds,
            LayerOperation::Texture {
                operation: BlendOperation::Mix,
                paint,
            },
        )
    }

    /// Feature bounds are derived from the geometry.
    pub fn feature(
        name: impl Into<String>,
        geometry: FeatureGeometry,
        params: FeatureParams,
    ) -> Self {
        let bounds = geometry.bounds();
        Self::with_operation(name, bounds, LayerOperation::Feature { geometry, params })
    }

    pub fn with_operation(
        name: impl Into<String>,
        bounds: WorldBounds,
        operation: LayerOperation,
    ) -> Self {
        Self {
            name: name.into(),
            bounds,
            masks: Vec::new(),
            falloff: Falloff::none(),
            operation,
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.masks.push(mask);
        self
    }

    pub fn with_falloff(mut self, falloff: Falloff) -> Self {
        self.falloff = falloff;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Replaces the blend operation of a height or texture layer.
    pub fn with_blend(mut self, blend: BlendOperation) -> Self {
        match &mut self.operation {
            LayerOperation::Height { operation, .. }
            | LayerOperation::Texture { operation, .. } => *operation = blend,
            LayerOperation::Feature { .. } => {}
        }
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn kind(&self) -> LayerKind {
        self.operation.kind()
    }

    /// Checks the description for values the pipeline cannot honor.
    ///
    /// Degenerate bounds are accepted; such layers simply cover no region.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidLayer {
            name: self.name.clone(),
            reason,
        };

        for (i, mask) in self.masks.iter().enumerate() {
            if !(0.0..=1.0).contains(&mask.strength) {
                return Err(invalid(format!("mask {i} strength must be in [0, 1]")));
            }
            if mask.is_topological() && self.kind() == LayerKind::Height {
                return Err(invalid(format!(
                    "mask {i} ({}) reads composited height and cannot shape a height layer",
                    mask.kernel.name()
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.falloff.strength) {
            return Err(invalid("falloff strength must be in [0, 1]".into()));
        }
        if !(self.falloff.width > 0.0 && self.falloff.width <= 1.0) {
            return Err(invalid("falloff width must be in (0, 1]".into()));
        }

        match &self.operation {
            LayerOperation::Height { amplitude, .. } => {
                if !amplitude.is_finite() {
                    return Err(invalid("amplitude must be finite".into()));
                }
            }
            LayerOperation::Texture { paint, .. } => {
                if paint.material >= MATERIAL_COUNT {
                    return Err(invalid(format!(
                        "material id {} exceeds {}",
                        paint.material,
                        MATERIAL_COUNT - 1
                    )));
                }
                if paint.uv_angle > MAX_UV_ANGLE || paint.uv_scale > MAX_UV_SCALE {
                    return Err(invalid("uv angle or scale out of range".into()));
                }
            }
            LayerOperation::Feature { geometry, params } => {
                if geometry.centerline.is_empty() {
                    return Err(invalid("feature centerline has no points".into()));
                }
                if !(geometry.core_width > 0.0) || geometry.shoulder_width < 0.0 {
                    return Err(invalid("feature widths must be positive".into()));
                }
                if params.core_material >= MATERIAL_COUNT
                    || params.shoulder_material >= MATERIAL_COUNT
                {
                    return Err(invalid("feature material id out of range".into()));
                }
            }
        }
        Ok(())
    }
}

/// A registered layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub bounds: WorldBounds,
    pub masks: Vec<Mask>,
    pub falloff: Falloff,
    pub operation: LayerOperation,
    pub priority: i32,
    pub enabled: bool,
}

impl Layer {
    pub(crate) fn from_desc(id: LayerId, desc: LayerDesc) -> Self {
        Self {
            id,
            name: desc.name,
            bounds: desc.bounds,
            masks: desc.masks,
            falloff: desc.falloff,
            operation: desc.operation,
            priority: desc.priority,
            enabled: desc.enabled,
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.operation.kind()
    }

    /// Enabled with bounds of positive area.
    pub fn contributes(&self) -> bool {
        self.enabled && !self.bounds.is_degenerate()
    }

    pub fn has_topological_mask(&self) -> bool {
        self.masks.iter().any(Mask::is_topological)
    }

    /// Resources the mask stack samples.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.masks.iter().filter_map(|m| m.kernel.resource())
    }

    pub(crate) fn to_desc(&self) -> LayerDesc {
        LayerDesc {
            name: self.name.clone(),
            bounds: self.bounds,
            masks: self.masks.clone(),
            falloff: self.falloff.clone(),
            operation: self.operation.clone(),
            priority: self.priority,
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn bounds() -> WorldBounds {
        WorldBounds::new(Vec2::ZERO, Vec2::splat(10.0))
    }

    #[test]
    fn hierarchy_orders_kinds() {
        assert!(LayerKind::Height.precedes(LayerKind::Texture));
        assert!(LayerKind::Texture.precedes(LayerKind::Feature));
        assert!(!LayerKind::Feature.precedes(LayerKind::Height));
        assert!(LayerKind::Height < LayerKind::Feature);
    }

    #[test]
    fn height_layers_reject_topological_masks() {
        let desc = LayerDesc::height("h", bounds(), 5.0).with_mask(Mask::new(MaskKernel::Slope {
            min_degrees: 0.0,
            max_degrees: 20.0,
        }));
        let err = desc.validate().expect_err("topological mask on height layer");
        assert!(matches!(err, Error::InvalidLayer { .. }));
    }

    #[test]
    fn texture_layers_accept_topological_masks() {
        let desc = LayerDesc::texture("t", bounds(), MaterialPaint::new(4)).with_mask(Mask::new(
            MaskKernel::HeightRange {
                min: 0.0,
                max: 10.0,
                smoothness: 1.0,
            },
        ));
        desc.validate().expect("valid texture layer");
    }

    #[test]
    fn material_ids_are_range_checked() {
        let desc = LayerDesc::texture("t", bounds(), MaterialPaint::new(32));
        assert!(desc.validate().is_err());
    }

    #[test]
    fn feature_desc_derives_bounds_from_geometry() {
        let geometry = FeatureGeometry::new(vec![Vec2::ZERO, Vec2::new(10.0, 0.0)], 2.0, 1.0);
        let desc = LayerDesc::feature("road", geometry, FeatureParams::default());
        assert_eq!(desc.bounds.min, Vec2::new(-2.0, -2.0));
        assert_eq!(desc.kind(), LayerKind::Feature);
        desc.validate().expect("valid feature");
    }

    #[test]
    fn with_blend_changes_height_operation() {
        let desc = LayerDesc::height("h", bounds(), 1.0).with_blend(BlendOperation::Replace);
        assert!(matches!(
            desc.operation,
            LayerOperation::Height {
                operation: BlendOperation::Replace,
                ..
            }
        ));
    }
}
