//! Packed material-control word stored per cell of a region's material buffer.
//!
//! Layout, least significant bit first:
//!
//! | bits   | field               |
//! |--------|---------------------|
//! | 0..5   | base material id    |
//! | 5..10  | overlay material id |
//! | 10..18 | blend weight        |
//! | 18..22 | UV angle            |
//! | 22..25 | UV scale            |
//! | 25..28 | flags               |
//! | 28..32 | reserved            |
//!
//! Setters touch only their own field so compositing can update weight and ids without
//! rewriting the whole word.

const BASE_SHIFT: u32 = 0;
const BASE_BITS: u32 = 5;
const OVERLAY_SHIFT: u32 = 5;
const OVERLAY_BITS: u32 = 5;
const WEIGHT_SHIFT: u32 = 10;
const WEIGHT_BITS: u32 = 8;
const UV_ANGLE_SHIFT: u32 = 18;
const UV_ANGLE_BITS: u32 = 4;
const UV_SCALE_SHIFT: u32 = 22;
const UV_SCALE_BITS: u32 = 3;
const FLAGS_SHIFT: u32 = 25;
const FLAGS_BITS: u32 = 3;

/// Number of distinct material ids addressable by the base and overlay fields.
pub const MATERIAL_COUNT: u8 = 1 << BASE_BITS;
/// Largest UV angle step.
pub const MAX_UV_ANGLE: u8 = (1 << UV_ANGLE_BITS) - 1;
/// Largest UV scale step.
pub const MAX_UV_SCALE: u8 = (1 << UV_SCALE_BITS) - 1;
/// Mask of the bits that must always be zero.
pub const RESERVED_MASK: u32 = !((1u32 << (FLAGS_SHIFT + FLAGS_BITS)) - 1);

#[inline]
const fn field_mask(bits: u32) -> u32 {
    (1u32 << bits) - 1
}

#[inline]
fn get(word: u32, shift: u32, bits: u32) -> u8 {
    ((word >> shift) & field_mask(bits)) as u8
}

#[inline]
fn set(word: u32, shift: u32, bits: u32, value: u8) -> u32 {
    let mask = field_mask(bits);
    debug_assert!(
        u32::from(value) <= mask,
        "value {value} does not fit in {bits} bits"
    );
    (word & !(mask << shift)) | ((u32::from(value) & mask) << shift)
}

/// One cell of a material-control buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaterialControl(pub u32);

impl MaterialControl {
    /// Packs all fields into a word. Out-of-range values are truncated to their field width.
    pub fn pack(base: u8, overlay: u8, weight: u8, uv_angle: u8, uv_scale: u8, flags: u8) -> Self {
        Self(0)
            .with_base(base)
            .with_overlay(overlay)
            .with_weight(weight)
            .with_uv_angle(uv_angle)
            .with_uv_scale(uv_scale)
            .with_flags(flags)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn base(self) -> u8 {
        get(self.0, BASE_SHIFT, BASE_BITS)
    }

    #[inline]
    pub fn overlay(self) -> u8 {
        get(self.0, OVERLAY_SHIFT, OVERLAY_BITS)
    }

    /// Overlay blend weight, 0 = pure base, 255 = pure overlay.
    #[inline]
    pub fn weight(self) -> u8 {
        get(self.0, WEIGHT_SHIFT, WEIGHT_BITS)
    }

    #[inline]
    pub fn uv_angle(self) -> u8 {
        get(self.0, UV_ANGLE_SHIFT, UV_ANGLE_BITS)
    }

    #[inline]
    pub fn uv_scale(self) -> u8 {
        get(self.0, UV_SCALE_SHIFT, UV_SCALE_BITS)
    }

    #[inline]
    pub fn flags(self) -> u8 {
        get(self.0, FLAGS_SHIFT, FLAGS_BITS)
    }

    #[inline]
    pub fn flag(self, index: u8) -> bool {
        debug_assert!(u32::from(index) < FLAGS_BITS, "flag index out of range");
        self.flags() & (1 << index) != 0
    }

    #[must_use]
    pub fn with_base(self, base: u8) -> Self {
        Self(set(self.0, BASE_SHIFT, BASE_BITS, base & field_mask(BASE_BITS) as u8))
    }

    #[must_use]
    pub fn with_overlay(self, overlay: u8) -> Self {
        Self(set(
            self.0,
            OVERLAY_SHIFT,
            OVERLAY_BITS,
            overlay & field_mask(OVERLAY_BITS) as u8,
        ))
    }

    #[must_use]
    pub fn with_weight(self, weight: u8) -> Self {
        Self(set(self.0, WEIGHT_SHIFT, WEIGHT_BITS, weight))
    }

    #[must_use]
    pub fn with_uv_angle(self, angle: u8) -> Self {
        Self(set(
            self.0,
            UV_ANGLE_SHIFT,
            UV_ANGLE_BITS,
            angle & field_mask(UV_ANGLE_BITS) as u8,
        ))
    }

    #[must_use]
    pub fn with_uv_scale(self, scale: u8) -> Self {
        Self(set(
            self.0,
            UV_SCALE_SHIFT,
            UV_SCALE_BITS,
            scale & field_mask(UV_SCALE_BITS) as u8,
        ))
    }

    #[must_use]
    pub fn with_flags(self, flags: u8) -> Self {
        Self(set(
            self.0,
            FLAGS_SHIFT,
            FLAGS_BITS,
            flags & field_mask(FLAGS_BITS) as u8,
        ))
    }

    #[must_use]
    pub fn with_flag(self, index: u8, on: bool) -> Self {
        let flags = if on {
            self.flags() | (1 << index)
        } else {
            self.flags() & !(1 << index)
        };
        self.with_flags(flags)
    }
}

/// Converts a weight in `[0, 1]` to the 8-bit blend field.
#[inline]
pub fn weight_to_u8(w: f32) -> u8 {
    (w.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_places_fields_at_documented_offsets() {
        let word = MaterialControl::pack(3, 17, 200, 9, 5, 0b101);
        assert_eq!(word.base(), 3);
        assert_eq!(word.overlay(), 17);
        assert_eq!(word.weight(), 200);
        assert_eq!(word.uv_angle(), 9);
        assert_eq!(word.uv_scale(), 5);
        assert_eq!(word.flags(), 0b101);
        assert_eq!(word.bits() & 0x1F, 3);
        assert_eq!((word.bits() >> 10) & 0xFF, 200);
        assert_eq!(word.bits() & RESERVED_MASK, 0);
    }

    #[test]
    fn setters_leave_other_fields_untouched() {
        let word = MaterialControl::pack(31, 31, 255, 15, 7, 0b111);
        let changed = word.with_weight(0);
        assert_eq!(changed.weight(), 0);
        assert_eq!(changed.base(), 31);
        assert_eq!(changed.overlay(), 31);
        assert_eq!(changed.uv_angle(), 15);
        assert_eq!(changed.uv_scale(), 7);
        assert_eq!(changed.flags(), 0b111);
    }

    #[test]
    fn individual_flags_toggle() {
        let word = MaterialControl::default().with_flag(1, true);
        assert!(word.flag(1));
        assert!(!word.flag(0));
        assert!(!word.with_flag(1, false).flag(1));
    }

    #[test]
    fn weight_conversion_rounds_and_clamps() {
        assert_eq!(weight_to_u8(0.5), 128);
        assert_eq!(weight_to_u8(-1.0), 0);
        assert_eq!(weight_to_u8(2.0), 255);
    }

    #[test]
    fn reserved_bits_start_at_bit_28() {
        assert_eq!(RESERVED_MASK, 0xF000_0000);
    }
}
