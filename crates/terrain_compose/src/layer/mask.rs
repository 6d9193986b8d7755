//! Mask stack entries and edge falloff.
//!
//! A layer's influence is built by applying its [`Mask`]s in order to a cleared buffer,
//! then attenuating the result with a [`Falloff`]. This module holds the data model and
//! the scalar math for both; rasterization over a region lives in the backend.

use glam::Vec2;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::region::WorldBounds;

/// How a mask value is combined with the buffer state left by the previous mask.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaskBlend {
    /// Linear interpolation toward the mask value by strength.
    Mix,
    /// Multiply, then interpolate toward the product by strength.
    Multiply,
    /// Add the mask value scaled by strength.
    Add,
    /// Subtract the mask value scaled by strength.
    Subtract,
}

impl MaskBlend {
    /// Blends `value` into `current`, clamping the result to `[0, 1]`.
    #[inline]
    pub fn apply(self, current: f32, value: f32, strength: f32) -> f32 {
        let out = match self {
            MaskBlend::Mix => current + (value - current) * strength,
            MaskBlend::Multiply => current + (current * value - current) * strength,
            MaskBlend::Add => current + value * strength,
            MaskBlend::Subtract => current - value * strength,
        };
        out.clamp(0.0, 1.0)
    }
}

/// The shaping function a mask evaluates per cell.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum MaskKernel {
    /// Same value everywhere inside the layer bounds.
    Constant { value: f32 },
    /// `1` inside the layer bounds.
    Rectangle,
    /// `1` within `inner` (fraction of the half extent) of the center, fading to `0` at the edge.
    Radial { inner: f32 },
    /// Fractal value noise in `[0, 1]`.
    Noise {
        seed: u32,
        frequency: f32,
        octaves: u8,
    },
    /// Image-based stamp stretched over the layer bounds; needs an uploaded resource.
    Stamp { resource: String },
    /// Selects cells whose slope angle lies in `[min_degrees, max_degrees]`.
    Slope { min_degrees: f32, max_degrees: f32 },
    /// Selects cells whose height lies in `[min, max]`, softened by `smoothness`.
    HeightRange { min: f32, max: f32, smoothness: f32 },
    /// Positive curvature (valleys), scaled by `scale`.
    Concavity { scale: f32 },
    /// Sawtooth of height over `step`, producing terraced bands.
    Terrace { step: f32 },
}

impl MaskKernel {
    /// Topological kernels read the composited height of the region.
    pub fn is_topological(&self) -> bool {
        matches!(
            self,
            MaskKernel::Slope { .. }
                | MaskKernel::HeightRange { .. }
                | MaskKernel::Concavity { .. }
                | MaskKernel::Terrace { .. }
        )
    }

    /// External resource the kernel samples, if any.
    pub fn resource(&self) -> Option<&str> {
        match self {
            MaskKernel::Stamp { resource } => Some(resource.as_str()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MaskKernel::Constant { .. } => "constant",
            MaskKernel::Rectangle => "rectangle",
            MaskKernel::Radial { .. } => "radial",
            MaskKernel::Noise { .. } => "noise",
            MaskKernel::Stamp { .. } => "stamp",
            MaskKernel::Slope { .. } => "slope",
            MaskKernel::HeightRange { .. } => "height_range",
            MaskKernel::Concavity { .. } => "concavity",
            MaskKernel::Terrace { .. } => "terrace",
        }
    }
}

/// One entry of a layer's mask stack.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    pub kernel: MaskKernel,
    pub blend: MaskBlend,
    pub invert: bool,
    /// Blend strength in `[0, 1]`.
    pub strength: f32,
}

impl Mask {
    /// Creates a full-strength, non-inverted [`MaskBlend::Mix`] mask.
    pub fn new(kernel: MaskKernel) -> Self {
        Self {
            kernel,
            blend: MaskBlend::Mix,
            invert: false,
            strength: 1.0,
        }
    }

    pub fn with_blend(mut self, blend: MaskBlend) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    #[inline]
    pub fn is_topological(&self) -> bool {
        self.kernel.is_topological()
    }

    /// Combines a raw kernel value with the current buffer value.
    #[inline]
    pub fn blend_into(&self, current: f32, raw: f32) -> f32 {
        let value = if self.invert { 1.0 - raw } else { raw };
        self.blend.apply(current, value, self.strength)
    }
}

/// Shape of the edge fade.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FalloffShape {
    None,
    /// Fades by distance to the nearest bounds edge.
    Linear,
    /// Fades by normalized elliptical distance from the bounds center.
    Circular,
}

/// Remaps a fade parameter `t` in `[0, 1]`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseCurve {
    Linear,
    SmoothStep,
    Power(f32),
    /// Piecewise-linear control points `(t, value)` sorted by `t`.
    Points(Vec<(f32, f32)>),
}

impl ResponseCurve {
    pub fn eval(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            ResponseCurve::Linear => t,
            ResponseCurve::SmoothStep => t * t * (3.0 - 2.0 * t),
            ResponseCurve::Power(exp) => t.powf(exp.max(f32::EPSILON)),
            ResponseCurve::Points(points) => eval_points(points, t),
        }
    }
}

fn eval_points(points: &[(f32, f32)], t: f32) -> f32 {
    let Some(&(first_t, first_v)) = points.first() else {
        return t;
    };
    if t <= first_t {
        return first_v;
    }
    for pair in points.windows(2) {
        let (t0, v0) = pair[0];
        let (t1, v1) = pair[1];
        if t <= t1 {
            let span = t1 - t0;
            if span <= f32::EPSILON {
                return v1;
            }
            return v0 + (v1 - v0) * (t - t0) / span;
        }
    }
    points.last().map_or(t, |&(_, v)| v)
}

/// Edge attenuation applied after mask stacking.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Falloff {
    pub shape: FalloffShape,
    /// Width of the fade band as a fraction of the half extent, in `(0, 1]`.
    pub width: f32,
    pub curve: ResponseCurve,
    /// How much of the fade is applied, in `[0, 1]`.
    pub strength: f32,
}

impl Default for Falloff {
    fn default() -> Self {
        Self::none()
    }
}

impl Falloff {
    pub fn none() -> Self {
        Self {
            shape: FalloffShape::None,
            width: 1.0,
            curve: ResponseCurve::Linear,
            strength: 1.0,
        }
    }

    pub fn linear(width: f32) -> Self {
        Self {
            shape: FalloffShape::Linear,
            width,
            ..Self::none()
        }
    }

    pub fn circular(width: f32) -> Self {
        Self {
            shape: FalloffShape::Circular,
            width,
            ..Self::none()
        }
    }

    pub fn with_curve(mut self, curve: ResponseCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn is_none(&self) -> bool {
        matches!(self.shape, FalloffShape::None) || self.strength <= 0.0
    }

    /// Attenuation factor in `[0, 1]` for a point inside `bounds`.
    pub fn attenuation(&self, bounds: &WorldBounds, p: Vec2) -> f32 {
        if self.is_none() {
            return 1.0;
        }
        let half = bounds.size() * 0.5;
        if half.x <= 0.0 || half.y <= 0.0 {
            return 0.0;
        }
        // 1 at the center, 0 on the boundary.
        let interior = match self.shape {
            FalloffShape::None => 1.0,
            FalloffShape::Linear => {
                let d = (p - bounds.min).min(bounds.max - p);
                (d.x.min(d.y) / half.x.min(half.y)).clamp(0.0, 1.0)
            }
            FalloffShape::Circular => {
                let r = ((p - bounds.center()) / half).length();
                (1.0 - r).clamp(0.0, 1.0)
            }
        };
        let width = self.width.max(f32::EPSILON);
        let faded = self.curve.eval((interior / width).min(1.0));
        1.0 + (faded - 1.0) * self.strength.clamp(0.0, 1.0)
    }
}
