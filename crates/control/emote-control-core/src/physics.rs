//! Secondary motion for physics-category parameters.
//!
//! Every physics parameter becomes a damped spring in normalized units
//! ([-1, 1] maps onto the parameter's half range). The spring's rest point is
//! pushed by gusting wind and by decaying pointer drag. Integration uses a
//! fixed sub-step; leftover time carries into the next tick.

use std::f32::consts::TAU;
use std::fmt;
use std::str::FromStr;

use hashbrown::HashMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::binding::{BindingTable, Category};
use crate::config::PhysicsConfig;
use crate::error::{ControlError, Result};

/// Part group with its own gain, matching the hair/parts/bust split of
/// typical rigs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhysicsGroup {
    Hair,
    Parts,
    Bust,
    Other,
}

impl PhysicsGroup {
    pub const ALL: [PhysicsGroup; 4] = [
        PhysicsGroup::Hair,
        PhysicsGroup::Parts,
        PhysicsGroup::Bust,
        PhysicsGroup::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhysicsGroup::Hair => "hair",
            PhysicsGroup::Parts => "parts",
            PhysicsGroup::Bust => "bust",
            PhysicsGroup::Other => "other",
        }
    }

    fn infer(name_lower: &str) -> Self {
        if name_lower.contains("hair") {
            PhysicsGroup::Hair
        } else if name_lower.contains("bust") || name_lower.contains("breast") {
            PhysicsGroup::Bust
        } else if ["skirt", "ribbon", "accessory", "cloth", "tail", "part"]
            .iter()
            .any(|k| name_lower.contains(k))
        {
            PhysicsGroup::Parts
        } else {
            PhysicsGroup::Other
        }
    }
}

impl fmt::Display for PhysicsGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhysicsGroup {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase();
        PhysicsGroup::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == norm)
            .ok_or_else(|| ControlError::not_found("physics group", s))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl Axis {
    /// Vertical when a whole name token marks it so (`hair_side_y`,
    /// `bust_ud`); substrings such as the `ud` in `cloud` do not count.
    fn infer(name_lower: &str) -> Self {
        let vertical = name_lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|tok| matches!(tok, "y" | "v" | "ud" | "vert" | "vertical"));
        if vertical {
            Axis::Vertical
        } else {
            Axis::Horizontal
        }
    }
}

#[derive(Clone, Debug)]
struct Channel {
    name: String,
    axis: Axis,
    group: PhysicsGroup,
    half_span: f32,
    phase: f32,
    x: f32,
    v: f32,
}

#[derive(Debug)]
pub struct PhysicsSimulator {
    cfg: PhysicsConfig,
    channels: Vec<Channel>,
    wind_strength: f32,
    wind_direction: f32,
    sway_gain: f32,
    group_gains: HashMap<PhysicsGroup, f32>,
    drag: [f32; 2],
    time: f32,
    leftover: f32,
    deltas: HashMap<String, f32>,
}

fn check_gain(what: &str, v: f32) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid(format!("{what} must be >= 0 (got {v})")))
    }
}

impl PhysicsSimulator {
    pub fn new(cfg: &PhysicsConfig, table: &BindingTable) -> Self {
        let mut sim = Self {
            cfg: cfg.clone(),
            channels: Vec::new(),
            wind_strength: 0.0,
            wind_direction: 0.0,
            sway_gain: 1.0,
            group_gains: HashMap::new(),
            drag: [0.0; 2],
            time: 0.0,
            leftover: 0.0,
            deltas: HashMap::new(),
        };
        sim.rebuild(table);
        sim
    }

    /// Re-read physics channels from `table`, keeping motion state for
    /// parameters that survive.
    pub fn rebuild(&mut self, table: &BindingTable) {
        let mut old: HashMap<String, Channel> = self
            .channels
            .drain(..)
            .map(|c| (c.name.clone(), c))
            .collect();
        for (i, d) in table.by_category(Category::Physics).enumerate() {
            if d.constant {
                continue;
            }
            let lower = d.name.to_lowercase();
            let prev = old.remove(&d.name);
            self.channels.push(Channel {
                name: d.name.clone(),
                axis: Axis::infer(&lower),
                group: PhysicsGroup::infer(&lower),
                half_span: d.span() * 0.5,
                // Spread gust phases so parts do not move in lockstep.
                phase: i as f32 * 1.618,
                x: prev.as_ref().map(|c| c.x).unwrap_or(0.0),
                v: prev.as_ref().map(|c| c.v).unwrap_or(0.0),
            });
        }
        self.deltas.clear();
        debug!("physics channels: {}", self.channels.len());
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    pub fn group_of(&self, name: &str) -> Option<PhysicsGroup> {
        self.channels.iter().find(|c| c.name == name).map(|c| c.group)
    }

    /// `direction` is in radians; 0 blows toward +x.
    pub fn set_wind(&mut self, strength: f32, direction: f32) -> Result<()> {
        check_gain("wind strength", strength)?;
        if !direction.is_finite() {
            return Err(ControlError::invalid("wind direction must be finite"));
        }
        self.wind_strength = strength;
        self.wind_direction = direction;
        Ok(())
    }

    pub fn wind(&self) -> (f32, f32) {
        (self.wind_strength, self.wind_direction)
    }

    pub fn set_sway_gain(&mut self, factor: f32) -> Result<()> {
        check_gain("sway gain", factor)?;
        self.sway_gain = factor;
        Ok(())
    }

    pub fn sway_gain(&self) -> f32 {
        self.sway_gain
    }

    pub fn set_group_gain(&mut self, group: PhysicsGroup, factor: f32) -> Result<()> {
        check_gain("group gain", factor)?;
        self.group_gains.insert(group, factor);
        Ok(())
    }

    pub fn group_gain(&self, group: PhysicsGroup) -> f32 {
        self.group_gains.get(&group).copied().unwrap_or(1.0)
    }

    /// Transient push, e.g. pointer drag velocity. Decays over later ticks.
    pub fn apply_drag(&mut self, dx: f32, dy: f32) -> Result<()> {
        if !(dx.is_finite() && dy.is_finite()) {
            return Err(ControlError::invalid("drag must be finite"));
        }
        self.drag[0] += dx;
        self.drag[1] += dy;
        Ok(())
    }

    /// Return to rest with no wind, no drag and unit gains.
    pub fn reset(&mut self) {
        for c in &mut self.channels {
            c.x = 0.0;
            c.v = 0.0;
        }
        self.wind_strength = 0.0;
        self.wind_direction = 0.0;
        self.sway_gain = 1.0;
        self.group_gains.clear();
        self.drag = [0.0; 2];
        self.time = 0.0;
        self.leftover = 0.0;
        self.deltas.clear();
    }

    pub fn deltas(&self) -> &HashMap<String, f32> {
        &self.deltas
    }

    fn step(&mut self, h: f32) {
        let k = self.cfg.stiffness;
        let c = 2.0 * self.cfg.damping_ratio * k.sqrt();
        let gust_phase = TAU * self.cfg.wind_frequency_hz * self.time;
        let (wind_x, wind_y) = (
            self.wind_strength * self.wind_direction.cos(),
            self.wind_strength * self.wind_direction.sin(),
        );
        let drag_x = self.drag[0] * self.cfg.drag_gain;
        let drag_y = self.drag[1] * self.cfg.drag_gain;

        for ch in &mut self.channels {
            let gust = 0.5 * (1.0 + (gust_phase + ch.phase).sin());
            let (wind, drag) = match ch.axis {
                Axis::Horizontal => (wind_x, drag_x),
                Axis::Vertical => (wind_y, drag_y),
            };
            let target = (wind * gust + drag).clamp(-1.0, 1.0);
            let a = k * (target - ch.x) - c * ch.v;
            ch.v += a * h;
            ch.x += ch.v * h;
        }

        let decay = (-h * 1000.0 / self.cfg.drag_decay_ms).exp();
        self.drag[0] *= decay;
        self.drag[1] *= decay;
        self.time += h;
    }

    /// Advance by `dt` seconds and return per-parameter deltas.
    pub fn tick(&mut self, dt: f32) -> &HashMap<String, f32> {
        let h = 1.0 / self.cfg.substep_hz;
        if dt.is_finite() && dt > 0.0 {
            self.leftover += dt;
        }
        let mut steps = (self.leftover / h).floor() as u32;
        if steps > self.cfg.max_substeps {
            let dropped = self.leftover - self.cfg.max_substeps as f32 * h;
            warn!("physics fell behind; dropping {dropped:.4}s");
            steps = self.cfg.max_substeps;
            self.leftover = 0.0;
        } else {
            self.leftover -= steps as f32 * h;
        }
        for _ in 0..steps {
            self.step(h);
        }

        self.deltas.clear();
        for ch in &self.channels {
            let gain = self.sway_gain * self.group_gains.get(&ch.group).copied().unwrap_or(1.0);
            self.deltas
                .insert(ch.name.clone(), ch.x * gain * ch.half_span);
        }
        &self.deltas
    }
}
