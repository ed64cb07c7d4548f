//! Gaze follow: point the head and eyes at a normalized target.
//!
//! The target lives in [-1, 1] on both axes (+x right, +y up). The followed
//! point eases toward it with an EMA, and each gaze role receives
//! `axis * gain * half_span` on top of its base value. Clearing the target
//! eases back to center.

use crate::binding::Role;
use crate::config::GazeConfig;
use crate::error::{ControlError, Result};

/// Roles the gaze layer writes to.
pub const GAZE_ROLES: [Role; 4] = [Role::HeadLr, Role::HeadUd, Role::EyeLr, Role::EyeUd];

#[derive(Clone, Debug)]
pub struct GazeController {
    head_gain: f32,
    eye_gain: f32,
    smoothing_s: f32,
    target: Option<(f32, f32)>,
    current: (f32, f32),
}

impl GazeController {
    pub fn new(cfg: &GazeConfig) -> Self {
        Self {
            head_gain: cfg.head_gain,
            eye_gain: cfg.eye_gain,
            smoothing_s: cfg.smoothing_ms / 1000.0,
            target: None,
            current: (0.0, 0.0),
        }
    }

    pub fn look_at(&mut self, x: f32, y: f32) -> Result<()> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(ControlError::invalid(format!(
                "gaze target must be finite (got {x}, {y})"
            )));
        }
        self.target = Some((x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0)));
        Ok(())
    }

    /// Release the target; the gaze drifts back to center.
    pub fn clear(&mut self) {
        self.target = None;
    }

    /// Drop the target and snap to center.
    pub fn reset(&mut self) {
        self.target = None;
        self.current = (0.0, 0.0);
    }

    pub fn target(&self) -> Option<(f32, f32)> {
        self.target
    }

    pub fn current(&self) -> (f32, f32) {
        self.current
    }

    pub fn tick(&mut self, dt: f32) -> (f32, f32) {
        let (tx, ty) = self.target.unwrap_or((0.0, 0.0));
        let a = 1.0 - (-dt.max(0.0) / self.smoothing_s).exp();
        self.current.0 += a * (tx - self.current.0);
        self.current.1 += a * (ty - self.current.1);
        self.current
    }

    /// Normalized offset for `role` at the current gaze point, in half spans.
    pub fn offset(&self, role: Role) -> f32 {
        let (x, y) = self.current;
        match role {
            Role::HeadLr => x * self.head_gain,
            Role::HeadUd => y * self.head_gain,
            Role::EyeLr => x * self.eye_gain,
            Role::EyeUd => y * self.eye_gain,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eases_toward_target_and_back() {
        let mut g = GazeController::new(&GazeConfig::default());
        g.look_at(2.0, -0.5).unwrap();
        assert_eq!(g.target(), Some((1.0, -0.5)));
        for _ in 0..120 {
            g.tick(1.0 / 60.0);
        }
        let (x, y) = g.current();
        assert!((x - 1.0).abs() < 1e-3 && (y + 0.5).abs() < 1e-3);
        assert!((g.offset(Role::EyeLr) - 1.0).abs() < 1e-3);
        assert!((g.offset(Role::HeadLr) - 0.5).abs() < 1e-3);
        assert_eq!(g.offset(Role::MouthOpen), 0.0);

        g.clear();
        for _ in 0..120 {
            g.tick(1.0 / 60.0);
        }
        assert!(g.current().0.abs() < 1e-3);
        assert!(g.look_at(f32::NAN, 0.0).is_err());
    }
}
