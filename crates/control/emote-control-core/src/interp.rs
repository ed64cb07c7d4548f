//! Scalar interpolation helpers.

use crate::data::Interpolation;

/// Control points of the default ease-in-out timing curve.
pub const EASE_CTRL: [f32; 4] = [0.42, 0.0, 0.58, 1.0];

#[inline]
pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
fn cubic_bezier(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let u = 1.0 - t;
    u * u * u * p0 + 3.0 * u * u * t * p1 + 3.0 * u * t * t * p2 + t * t * t * p3
}

/// Given control points (x1, y1, x2, y2) and an input t in [0,1],
/// compute the eased y by inverting the x bezier via binary search.
#[inline]
pub fn bezier_ease_t(t: f32, ctrl: [f32; 4]) -> f32 {
    let [x1, y1, x2, y2] = ctrl;
    let t = t.clamp(0.0, 1.0);
    if x1 == 0.0 && y1 == 0.0 && x2 == 1.0 && y2 == 1.0 {
        return t;
    }
    let mut lo = 0.0f32;
    let mut hi = 1.0f32;
    let mut mid = t;
    for _ in 0..24 {
        let x = cubic_bezier(0.0, x1, x2, 1.0, mid);
        if (x - t).abs() < 1e-6 {
            break;
        }
        if x < t {
            lo = mid;
        } else {
            hi = mid;
        }
        mid = 0.5 * (lo + hi);
    }
    cubic_bezier(0.0, y1, y2, 1.0, mid)
}

/// Blend `a` toward `b` at local segment time `t` using `mode`.
#[inline]
pub fn interpolate(a: f32, b: f32, t: f32, mode: Interpolation) -> f32 {
    let t = match mode {
        Interpolation::Linear => t.clamp(0.0, 1.0),
        Interpolation::Eased => bezier_ease_t(t, EASE_CTRL),
    };
    lerp_f32(a, b, t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ease_keeps_endpoints_and_midpoint() {
        assert_eq!(bezier_ease_t(0.0, EASE_CTRL), 0.0);
        assert!((bezier_ease_t(1.0, EASE_CTRL) - 1.0).abs() < 1e-5);
        assert!((bezier_ease_t(0.5, EASE_CTRL) - 0.5).abs() < 1e-3);
        // Ease-in: slower than linear early on.
        assert!(bezier_ease_t(0.2, EASE_CTRL) < 0.2);
    }

    #[test]
    fn linear_interpolate_clamps_t() {
        assert_eq!(interpolate(0.0, 2.0, 0.25, Interpolation::Linear), 0.5);
        assert_eq!(interpolate(0.0, 2.0, 1.5, Interpolation::Linear), 2.0);
    }
}
