//! Host-set parameter values.
//!
//! An override replaces the mixer's base value for one parameter. Additive
//! layers (differential clips, gaze, lip-sync, physics) still apply on top, and
//! the result is clamped with everything else. A non-zero duration tweens
//! linearly from the value the parameter had when the override was set.

use hashbrown::HashMap;

use crate::interp::lerp_f32;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tween {
    from: f32,
    to: f32,
    elapsed: f32,
    duration: f32,
}

impl Tween {
    fn value(&self) -> f32 {
        if self.duration <= 0.0 || self.elapsed >= self.duration {
            self.to
        } else {
            lerp_f32(self.from, self.to, self.elapsed / self.duration)
        }
    }
}

#[derive(Debug, Default)]
pub struct ParameterOverrides {
    entries: HashMap<String, Tween>,
}

impl ParameterOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or retarget) an override. `duration_s <= 0` applies at once.
    pub fn set(&mut self, name: &str, from: f32, to: f32, duration_s: f32) {
        self.entries.insert(
            name.to_string(),
            Tween {
                from,
                to,
                elapsed: 0.0,
                duration: duration_s.max(0.0),
            },
        );
    }

    /// Current override value for `name`, if one is held.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.entries.get(name).map(Tween::value)
    }

    pub fn target(&self, name: &str) -> Option<f32> {
        self.entries.get(name).map(|t| t.to)
    }

    pub fn clear(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn advance(&mut self, dt: f32) {
        for t in self.entries.values_mut() {
            if t.elapsed < t.duration {
                t.elapsed = (t.elapsed + dt).min(t.duration);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_and_tweened() {
        let mut o = ParameterOverrides::new();
        o.set("a", 0.0, 1.0, 0.0);
        assert_eq!(o.get("a"), Some(1.0));
        o.set("b", 0.0, 10.0, 2.0);
        assert_eq!(o.get("b"), Some(0.0));
        o.advance(0.5);
        assert_eq!(o.get("b"), Some(2.5));
        o.advance(5.0);
        assert_eq!(o.get("b"), Some(10.0));
        assert_eq!(o.target("b"), Some(10.0));
        assert!(o.clear("a"));
        assert!(!o.clear("a"));
        assert_eq!(o.len(), 1);
        o.clear_all();
        assert!(o.is_empty());
    }
}
