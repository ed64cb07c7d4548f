//! Track sampling.
//!
//! Tracks are sampled in clip seconds. Before the first point a track holds
//! its first value, after the last it holds the last. Between points the
//! segment's shape comes from the left point's interpolation mode.

use crate::data::{AnimationClip, TrackPoint};
use crate::interp::interpolate;

/// Find the segment [i, i+1] containing `t` and the local time within it.
/// Returns (i, i, 0) when `t` falls outside the keyed range.
fn find_segment(points: &[TrackPoint], t: f32) -> (usize, usize, f32) {
    let n = points.len();
    if n <= 1 || t <= points[0].time {
        return (0, 0, 0.0);
    }
    if t >= points[n - 1].time {
        return (n - 1, n - 1, 0.0);
    }
    // First point strictly after t; points are strictly increasing.
    let hi = points.partition_point(|p| p.time <= t);
    let lo = hi - 1;
    let t0 = points[lo].time;
    let t1 = points[hi].time;
    let denom = (t1 - t0).max(f32::EPSILON);
    (lo, hi, ((t - t0) / denom).clamp(0.0, 1.0))
}

/// Sample one track at clip time `t`. `None` for an empty track.
pub fn sample_points(points: &[TrackPoint], t: f32) -> Option<f32> {
    if points.is_empty() {
        return None;
    }
    let (i0, i1, lt) = find_segment(points, t);
    if i0 == i1 {
        return Some(points[i0].value);
    }
    let left = &points[i0];
    Some(interpolate(left.value, points[i1].value, lt, left.interpolation))
}

/// Sample every track of `clip` at `t`, calling `sink(param, value)`.
pub fn sample_clip(clip: &AnimationClip, t: f32, mut sink: impl FnMut(&str, f32)) {
    let t = t.clamp(0.0, clip.duration());
    for track in clip.tracks() {
        if let Some(v) = sample_points(&track.points, t) {
            sink(&track.param, v);
        }
    }
}
