//! Q16.16 Fixed-Point Arithmetic
//!
//! Every rate, multiplier and percentage in combat (crit rate, accuracy,
//! evasion, reaction multipliers, status magnitudes) is a Q16.16 value.
//! Combat resolution uses integer arithmetic only, so a seeded battle
//! replays bit-for-bit on any platform.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ────┘└──── 16 bits ────┘                 │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  1.0   = 65536                                              │
//! │  150%  = 98304                                              │
//! │  5%    = 3277                                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Integer stats (HP, ATK, DEF) stay plain `i32`; use [`scale_int`] to
//! multiply one by a fixed-point factor.

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE; // 65536

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1; // 32768

// =============================================================================
// CONVERSIONS
// =============================================================================

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in combat resolution.
///
/// # Example
/// ```
/// use chroma_clash::core::fixed::{to_fixed, FIXED_ONE};
/// const MY_VALUE: i32 = to_fixed(2.5);
/// assert_eq!(MY_VALUE, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Whole-number percentage to fixed-point (`percent(150)` = 1.5), rounded
/// to the nearest representable value.
///
/// # Example
/// ```
/// use chroma_clash::core::fixed::{percent, FIXED_ONE, FIXED_HALF};
/// assert_eq!(percent(100), FIXED_ONE);
/// assert_eq!(percent(50), FIXED_HALF);
/// ```
#[inline]
pub const fn percent(p: i32) -> Fixed {
    ((p as i64 * FIXED_ONE as i64 + 50) / 100) as Fixed
}

/// Convert fixed-point to float for display/logging.
///
/// # Warning
/// Only use for visual output. NEVER use result in game logic.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

// =============================================================================
// CORE OPERATIONS
// =============================================================================

/// Multiply two fixed-point numbers.
///
/// Uses i64 intermediate to prevent overflow, then truncates.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    value.min(max).max(min)
}

/// Clamp to the unit interval [0, 1].
#[inline]
pub fn clamp_unit(value: Fixed) -> Fixed {
    fixed_clamp(value, 0, FIXED_ONE)
}

/// Multiply an integer stat by a fixed-point factor, rounding down.
///
/// Saturates at `i32::MAX` instead of wrapping.
#[inline]
pub fn scale_int(value: i32, factor: Fixed) -> i32 {
    let wide = (value as i64 * factor as i64) >> FIXED_SCALE;
    wide.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Ratio of two integers as fixed-point (`num / den`). Zero denominator yields 0.
#[inline]
pub fn ratio(num: i32, den: i32) -> Fixed {
    if den == 0 {
        return 0;
    }
    (((num as i64) << FIXED_SCALE) / den as i64) as Fixed
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 65536);
        assert_eq!(FIXED_HALF, 32768);
        assert_eq!(FIXED_SCALE, 16);
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(1.0), FIXED_ONE);
        assert_eq!(to_fixed(0.5), FIXED_HALF);
        assert_eq!(to_fixed(2.0), FIXED_ONE * 2);
        assert_eq!(to_fixed(-1.0), -FIXED_ONE);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(200), FIXED_ONE * 2);
        assert_eq!(percent(25), FIXED_ONE / 4);
        assert_eq!(percent(0), 0);
        assert_eq!(percent(5), 3277);
        assert_eq!(percent(130), 85197);
    }

    #[test]
    fn test_fixed_mul() {
        assert_eq!(fixed_mul(to_fixed(2.0), to_fixed(3.0)), to_fixed(6.0));
        assert_eq!(fixed_mul(FIXED_HALF, FIXED_HALF), to_fixed(0.25));
        assert_eq!(fixed_mul(to_fixed(-2.0), to_fixed(3.0)), to_fixed(-6.0));
    }

    #[test]
    fn test_scale_int_floors() {
        assert_eq!(scale_int(100, percent(150)), 150);
        assert_eq!(scale_int(7, FIXED_HALF), 3);
        assert_eq!(scale_int(0, percent(300)), 0);
        assert_eq!(scale_int(i32::MAX, percent(300)), i32::MAX);
    }

    #[test]
    fn test_ratio_and_clamp() {
        assert_eq!(ratio(1, 2), FIXED_HALF);
        assert_eq!(ratio(5, 0), 0);
        assert_eq!(clamp_unit(FIXED_ONE * 3), FIXED_ONE);
        assert_eq!(clamp_unit(-5), 0);
        assert_eq!(fixed_clamp(percent(2), percent(5), FIXED_ONE), percent(5));
    }
}
