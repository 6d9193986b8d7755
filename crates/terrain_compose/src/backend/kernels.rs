//! Reference CPU kernels for every [`crate::backend::ComputeOp`].
//!
//! Buffers are row-major with `resolution` cells per row. Context buffers produced by
//! [`stitch`] carry `halo` extra cells on every side.
use glam::Vec2;

use crate::backend::command::RegionFrame;
use crate::backend::cpu::StampImage;
use crate::layer::{
    BlendOperation, Falloff, FeatureClaim, FeatureGeometry, FeatureParams, FeatureZone, Mask,
    MaskKernel, MaterialPaint,
};
use crate::region::material::weight_to_u8;
use crate::region::{MaterialControl, WorldBounds, NEIGHBOR_OFFSETS};

#[inline]
fn index(x: i32, y: i32, width: i32) -> usize {
    (y * width + x) as usize
}

fn neighbor_slot(dx: i32, dy: i32) -> Option<usize> {
    NEIGHBOR_OFFSETS.iter().position(|&o| o == (dx, dy))
}

#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x >= edge1 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Copies a region and its halo into `target`, clamping where a neighbor is missing.
pub fn stitch(
    target: &mut [f32],
    center: &[f32],
    neighbors: [Option<&[f32]>; 8],
    resolution: u32,
    halo: u32,
) {
    let res = resolution as i32;
    let h = halo as i32;
    let width = res + 2 * h;
    for cy in 0..width {
        for cx in 0..width {
            let (x, y) = (cx - h, cy - h);
            let dx = if x < 0 { -1 } else { i32::from(x >= res) };
            let dy = if y < 0 { -1 } else { i32::from(y >= res) };
            let neighbor = neighbor_slot(dx, dy).and_then(|slot| neighbors[slot]);
            let value = match neighbor {
                Some(buf) => buf[index(x - dx * res, y - dy * res, res)],
                None => center[index(x.clamp(0, res - 1), y.clamp(0, res - 1), res)],
            };
            target[index(cx, cy, width)] = value;
        }
    }
}

/// Height samples around a cell of a stitched context buffer.
pub struct ContextSampler<'a> {
    pub context: &'a [f32],
    pub resolution: u32,
    pub halo: u32,
    pub cell_size: f32,
}

impl ContextSampler<'_> {
    /// Height at region cell `(ix + dx, iy + dy)`, clamped to the context.
    #[inline]
    pub fn at(&self, ix: u32, iy: u32, dx: i32, dy: i32) -> f32 {
        let width = (self.resolution + 2 * self.halo) as i32;
        if self.context.len() < (width * width) as usize || width == 0 {
            return 0.0;
        }
        let x = (ix as i32 + self.halo as i32 + dx).clamp(0, width - 1);
        let y = (iy as i32 + self.halo as i32 + dy).clamp(0, width - 1);
        self.context[index(x, y, width)]
    }

    pub fn slope_degrees(&self, ix: u32, iy: u32) -> f32 {
        let gx = (self.at(ix, iy, 1, 0) - self.at(ix, iy, -1, 0)) / (2.0 * self.cell_size);
        let gy = (self.at(ix, iy, 0, 1) - self.at(ix, iy, 0, -1)) / (2.0 * self.cell_size);
        Vec2::new(gx, gy).length().atan().to_degrees()
    }

    pub fn laplacian(&self, ix: u32, iy: u32) -> f32 {
        let c = self.at(ix, iy, 0, 0);
        let sum = self.at(ix, iy, 1, 0)
            + self.at(ix, iy, -1, 0)
            + self.at(ix, iy, 0, 1)
            + self.at(ix, iy, 0, -1);
        (sum - 4.0 * c) / (self.cell_size * self.cell_size)
    }
}

fn hash(x: i32, y: i32, seed: u32) -> f32 {
    let mut h = (x as u32).wrapping_mul(0x8da6_b343)
        ^ (y as u32).wrapping_mul(0xd816_3841)
        ^ seed.wrapping_mul(0xcb1a_b31f);
    h ^= h >> 13;
    h = h.wrapping_mul(0x5bd1_e995);
    h ^= h >> 15;
    (h & 0x00ff_ffff) as f32 / 0x00ff_ffff as f32
}

fn value_noise(p: Vec2, seed: u32) -> f32 {
    let cell = p.floor();
    let f = p - cell;
    let u = f * f * (Vec2::splat(3.0) - 2.0 * f);
    let (x, y) = (cell.x as i32, cell.y as i32);
    let a = hash(x, y, seed);
    let b = hash(x + 1, y, seed);
    let c = hash(x, y + 1, seed);
    let d = hash(x + 1, y + 1, seed);
    let bottom = a + (b - a) * u.x;
    let top = c + (d - c) * u.x;
    bottom + (top - bottom) * u.y
}

/// Fractal value noise in `[0, 1]`.
pub fn fbm(p: Vec2, seed: u32, frequency: f32, octaves: u8) -> f32 {
    let mut amplitude = 0.5;
    let mut freq = frequency;
    let mut sum = 0.0;
    let mut norm = 0.0;
    for octave in 0..octaves.max(1) {
        sum += amplitude * value_noise(p * freq, seed.wrapping_add(u32::from(octave)));
        norm += amplitude;
        amplitude *= 0.5;
        freq *= 2.0;
    }
    sum / norm
}

/// Raw kernel value at cell `(ix, iy)` with world position `p`.
pub fn eval_kernel(
    kernel: &MaskKernel,
    p: Vec2,
    bounds: &WorldBounds,
    ix: u32,
    iy: u32,
    context: &ContextSampler<'_>,
    stamp: Option<&StampImage>,
) -> f32 {
    match kernel {
        MaskKernel::Constant { value } => value.clamp(0.0, 1.0),
        MaskKernel::Rectangle => 1.0,
        MaskKernel::Radial { inner } => {
            let half = bounds.size() * 0.5;
            let r = ((p - bounds.center()) / half).length();
            1.0 - smoothstep(inner.clamp(0.0, 1.0), 1.0, r)
        }
        MaskKernel::Noise {
            seed,
            frequency,
            octaves,
        } => fbm(p, *seed, *frequency, *octaves),
        MaskKernel::Stamp { .. } => {
            let uv = (p - bounds.min) / bounds.size();
            stamp.map_or(0.0, |image| image.sample(uv))
        }
        MaskKernel::Slope {
            min_degrees,
            max_degrees,
        } => {
            let slope = context.slope_degrees(ix, iy);
            if slope >= *min_degrees && slope <= *max_degrees {
                1.0
            } else {
                0.0
            }
        }
        MaskKernel::HeightRange {
            min,
            max,
            smoothness,
        } => {
            let h = context.at(ix, iy, 0, 0);
            let s = smoothness.max(0.0);
            smoothstep(min - s, *min, h) * (1.0 - smoothstep(*max, max + s, h))
        }
        MaskKernel::Concavity { scale } => (context.laplacian(ix, iy) * scale).clamp(0.0, 1.0),
        MaskKernel::Terrace { step } => {
            if *step <= 0.0 {
                0.0
            } else {
                (context.at(ix, iy, 0, 0) / step).rem_euclid(1.0)
            }
        }
    }
}

/// Blends one mask into `target` for cells inside `bounds`.
///
/// Kernels are evaluated once per `stride × stride` block at the block's anchor cell and
/// the result is blended into every cell of the block.
pub fn apply_mask(
    target: &mut [f32],
    frame: &RegionFrame,
    bounds: &WorldBounds,
    mask: &Mask,
    stride: u32,
    context: &ContextSampler<'_>,
    stamp: Option<&StampImage>,
) {
    let stride = stride.max(1);
    let res = frame.resolution;
    let anchors = res.div_ceil(stride);
    let mut raw = vec![0.0f32; (anchors * anchors) as usize];
    for ay in 0..anchors {
        for ax in 0..anchors {
            let (ix, iy) = (ax * stride, ay * stride);
            let p = frame.cell_center(ix, iy);
            raw[(ay * anchors + ax) as usize] =
                eval_kernel(&mask.kernel, p, bounds, ix, iy, context, stamp);
        }
    }
    for iy in 0..res {
        for ix in 0..res {
            if !bounds.contains(frame.cell_center(ix, iy)) {
                continue;
            }
            let value = raw[((iy / stride) * anchors + ix / stride) as usize];
            let cell = (iy * res + ix) as usize;
            target[cell] = mask.blend_into(target[cell], value);
        }
    }
}

pub fn apply_falloff(
    target: &mut [f32],
    frame: &RegionFrame,
    bounds: &WorldBounds,
    falloff: &Falloff,
    stride: u32,
) {
    if falloff.is_none() {
        return;
    }
    let stride = stride.max(1);
    let res = frame.resolution;
    for iy in 0..res {
        for ix in 0..res {
            if !bounds.contains(frame.cell_center(ix, iy)) {
                continue;
            }
            let anchor = frame.cell_center(ix - ix % stride, iy - iy % stride);
            let cell = (iy * res + ix) as usize;
            target[cell] *= falloff.attenuation(bounds, anchor);
        }
    }
}

/// Folds a height influence into a height buffer.
pub fn composite_height(
    target: &mut [f32],
    source: &[f32],
    operation: BlendOperation,
    amplitude: f32,
) {
    for (h, &w) in target.iter_mut().zip(source) {
        if w <= 0.0 {
            continue;
        }
        *h = match operation {
            BlendOperation::Add => *h + amplitude * w,
            BlendOperation::Subtract => *h - amplitude * w,
            BlendOperation::Multiply => *h * (1.0 + (amplitude - 1.0) * w),
            BlendOperation::Replace => amplitude * w,
            BlendOperation::Mix => *h + (amplitude - *h) * w,
        };
    }
}

/// Folds a texture influence into a material-control buffer.
///
/// Only the overlay id, blend weight, base id (for `Replace`) and UV fields change;
/// flags and reserved bits are preserved.
pub fn composite_material(
    target: &mut [u32],
    source: &[f32],
    operation: BlendOperation,
    paint: &MaterialPaint,
) {
    for (word, &w) in target.iter_mut().zip(source) {
        if w <= 0.0 {
            continue;
        }
        let control = MaterialControl(*word);
        let current = if control.overlay() == paint.material {
            f32::from(control.weight()) / 255.0
        } else {
            0.0
        };
        let updated = match operation {
            BlendOperation::Replace => {
                if w < 0.5 {
                    continue;
                }
                control.with_base(paint.material).with_weight(0)
            }
            BlendOperation::Mix => control
                .with_overlay(paint.material)
                .with_weight(weight_to_u8(current + (1.0 - current) * w)),
            BlendOperation::Add => control
                .with_overlay(paint.material)
                .with_weight(weight_to_u8(current + w)),
            BlendOperation::Subtract | BlendOperation::Multiply => {
                if control.overlay() != paint.material {
                    continue;
                }
                let scaled = if operation == BlendOperation::Subtract {
                    current - w
                } else {
                    current * w
                };
                control.with_weight(weight_to_u8(scaled))
            }
        };
        *word = updated
            .with_uv_angle(paint.uv_angle)
            .with_uv_scale(paint.uv_scale)
            .0;
    }
}

/// Claims cells for a feature, overriding claims written earlier.
pub fn rasterize(
    claim: &mut [u32],
    influence: &[f32],
    frame: &RegionFrame,
    slot: u8,
    geometry: &FeatureGeometry,
) {
    let res = frame.resolution;
    for iy in 0..res {
        for ix in 0..res {
            let cell = (iy * res + ix) as usize;
            let Some((zone, zone_weight)) = geometry.classify(frame.cell_center(ix, iy)) else {
                continue;
            };
            let weight = weight_to_u8(zone_weight * influence[cell]);
            if weight > 0 {
                claim[cell] = FeatureClaim::new(slot, zone, weight).0;
            }
        }
    }
}

/// Applies claimed feature zones to height and material.
pub fn apply_features(
    claim: &[u32],
    height: &mut [f32],
    material: &mut [u32],
    features: &[FeatureParams],
) {
    for ((&c, h), word) in claim.iter().zip(height.iter_mut()).zip(material.iter_mut()) {
        let claim = FeatureClaim(c);
        let (Some(slot), Some(zone)) = (claim.slot(), claim.zone()) else {
            continue;
        };
        let Some(params) = features.get(slot as usize) else {
            continue;
        };
        let w = f32::from(claim.weight()) / 255.0;
        *h -= params.depth * w;
        let control = MaterialControl(*word);
        *word = match zone {
            FeatureZone::Core => control
                .with_base(params.core_material)
                .with_overlay(params.core_material)
                .with_weight(0),
            FeatureZone::Shoulder => control
                .with_overlay(params.shoulder_material)
                .with_weight(claim.weight()),
        }
        .0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    fn frame(res: u32) -> RegionFrame {
        RegionFrame {
            origin: Vec2::ZERO,
            cell_size: 1.0,
            resolution: res,
        }
    }

    fn flat_context(res: u32, halo: u32, f: impl Fn(i32, i32) -> f32) -> Vec<f32> {
        let width = (res + 2 * halo) as i32;
        let mut out = Vec::with_capacity((width * width) as usize);
        for y in 0..width {
            for x in 0..width {
                out.push(f(x - halo as i32, y - halo as i32));
            }
        }
        out
    }

    #[test]
    fn stitch_reads_neighbors_and_clamps_missing_ones() {
        let center = vec![1.0; 4];
        let east = vec![2.0; 4];
        let mut neighbors: [Option<&[f32]>; 8] = [None; 8];
        neighbors[4] = Some(&east);
        let mut target = vec![0.0; 16];
        stitch(&mut target, &center, neighbors, 2, 1);
        // Row y = 1 (first interior row): west halo clamps, east halo reads the neighbor.
        assert_eq!(&target[4..8], &[1.0, 1.0, 1.0, 2.0]);
        // Corner without a neighbor clamps to the center.
        assert_eq!(target[0], 1.0);
    }

    #[test]
    fn slope_of_a_ramp_matches_its_gradient() {
        let context = flat_context(4, 1, |x, _| x as f32);
        let sampler = ContextSampler {
            context: &context,
            resolution: 4,
            halo: 1,
            cell_size: 1.0,
        };
        approx_eq(sampler.slope_degrees(1, 1), 45.0);
        approx_eq(sampler.laplacian(1, 1), 0.0);
    }

    #[test]
    fn masks_only_touch_cells_inside_bounds() {
        let mut target = vec![0.0; 16];
        let bounds = WorldBounds::new(Vec2::ZERO, Vec2::new(2.0, 4.0));
        let context = vec![0.0; 36];
        let sampler = ContextSampler {
            context: &context,
            resolution: 4,
            halo: 1,
            cell_size: 1.0,
        };
        apply_mask(
            &mut target,
            &frame(4),
            &bounds,
            &Mask::new(MaskKernel::Rectangle),
            1,
            &sampler,
            None,
        );
        assert_eq!(&target[0..4], &[1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn stride_evaluates_kernels_at_block_anchors() {
        let mut target = vec![0.0; 16];
        let bounds = WorldBounds::new(Vec2::ZERO, Vec2::splat(4.0));
        let context = flat_context(4, 0, |x, _| x as f32);
        let sampler = ContextSampler {
            context: &context,
            resolution: 4,
            halo: 0,
            cell_size: 1.0,
        };
        let mask = Mask::new(MaskKernel::Terrace { step: 4.0 });
        apply_mask(&mut target, &frame(4), &bounds, &mask, 2, &sampler, None);
        assert_eq!(&target[0..4], &[0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn noise_is_deterministic_and_normalized() {
        let a = fbm(Vec2::new(3.3, 7.1), 42, 0.1, 4);
        let b = fbm(Vec2::new(3.3, 7.1), 42, 0.1, 4);
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
        assert_ne!(fbm(Vec2::new(3.3, 7.1), 43, 0.1, 4), a);
    }

    #[test]
    fn height_operations_scale_with_influence() {
        let source = [1.0, 0.5, 0.0];
        let mut h = vec![2.0; 3];
        composite_height(&mut h, &source, BlendOperation::Add, 4.0);
        assert_eq!(h, vec![6.0, 4.0, 2.0]);
        let mut h = vec![2.0; 3];
        composite_height(&mut h, &source, BlendOperation::Mix, 4.0);
        assert_eq!(h, vec![4.0, 3.0, 2.0]);
        let mut h = vec![2.0; 3];
        composite_height(&mut h, &source, BlendOperation::Replace, 4.0);
        assert_eq!(h, vec![4.0, 2.0, 2.0]);
        let mut h = vec![2.0; 3];
        composite_height(&mut h, &source, BlendOperation::Multiply, 3.0);
        assert_eq!(h, vec![6.0, 4.0, 2.0]);
    }

    #[test]
    fn material_composite_preserves_flags() {
        let flagged = MaterialControl::default().with_flag(1, true).0;
        let mut target = vec![flagged; 2];
        let paint = MaterialPaint::new(7).with_uv(3, 2);
        composite_material(&mut target, &[1.0, 0.0], BlendOperation::Mix, &paint);
        let painted = MaterialControl(target[0]);
        assert_eq!(painted.overlay(), 7);
        assert_eq!(painted.weight(), 255);
        assert_eq!(painted.uv_angle(), 3);
        assert!(painted.flag(1));
        assert_eq!(target[1], flagged);
    }

    #[test]
    fn subtract_only_fades_a_matching_overlay() {
        let word = MaterialControl::default().with_overlay(2).with_weight(200).0;
        let mut target = vec![word];
        composite_material(&mut target, &[1.0], BlendOperation::Subtract, &MaterialPaint::new(5));
        assert_eq!(target[0], word);
        composite_material(&mut target, &[1.0], BlendOperation::Subtract, &MaterialPaint::new(2));
        assert_eq!(MaterialControl(target[0]).weight(), 0);
    }

    #[test]
    fn later_rasterization_overrides_earlier_claims() {
        let influence = vec![1.0; 16];
        let mut claim = vec![0u32; 16];
        let centerline = vec![Vec2::new(0.0, 2.0), Vec2::new(4.0, 2.0)];
        let geometry = FeatureGeometry::new(centerline, 4.0, 0.0);
        rasterize(&mut claim, &influence, &frame(4), 0, &geometry);
        rasterize(&mut claim, &influence, &frame(4), 1, &geometry);
        assert!(claim.iter().all(|&c| FeatureClaim(c).slot() == Some(1)));

        let mut height = vec![5.0; 16];
        let mut material = vec![0u32; 16];
        let params = FeatureParams {
            depth: 2.0,
            core_material: 4,
            shoulder_material: 6,
        };
        apply_features(&claim, &mut height, &mut material, &[FeatureParams::default(), params]);
        approx_eq(height[0], 3.0);
        assert_eq!(MaterialControl(material[0]).base(), 4);
    }
}
