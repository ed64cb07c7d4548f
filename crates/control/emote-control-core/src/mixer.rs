//! AnimationMixer: one primary clip with cross-fades plus additive
//! differential clips in named slots.
//!
//! Each tick first advances fades and clip time, then samples. Entries being
//! replaced or stopped move to a retiring list and fade out there, so the live
//! handle is free immediately and a second `stop` finds nothing to do.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::accumulate::Accumulator;
use crate::data::{AnimationClip, ClipKind, ClipLibrary};
use crate::error::{ControlError, Result};
use crate::sampling::sample_clip;

/// Addresses a playing clip.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipHandle {
    Primary,
    Slot(String),
}

impl ClipHandle {
    pub fn slot(name: impl Into<String>) -> Self {
        ClipHandle::Slot(name.into())
    }
}

impl fmt::Display for ClipHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipHandle::Primary => f.write_str("primary"),
            ClipHandle::Slot(s) => write!(f, "slot:{s}"),
        }
    }
}

/// Runtime state of one playing clip.
#[derive(Clone, Debug)]
pub struct ActiveClipState {
    clip: Arc<AnimationClip>,
    elapsed: f32,
    speed: f32,
    blend_weight: f32,
    fade_target: f32,
    /// Weight change per second.
    fade_rate: f32,
}

impl ActiveClipState {
    fn fade_in(clip: Arc<AnimationClip>, speed: f32, fade_s: f32) -> Self {
        let (blend_weight, fade_rate) = if fade_s > 0.0 {
            (0.0, 1.0 / fade_s)
        } else {
            (1.0, 0.0)
        };
        Self {
            clip,
            elapsed: 0.0,
            speed,
            blend_weight,
            fade_target: 1.0,
            fade_rate,
        }
    }

    /// Start fading to zero so the weight reaches 0 after `fade_s` seconds.
    fn retire(&mut self, fade_s: f32) {
        self.fade_target = 0.0;
        self.fade_rate = if fade_s > 0.0 {
            self.blend_weight / fade_s
        } else {
            f32::INFINITY
        };
    }

    pub fn clip(&self) -> &Arc<AnimationClip> {
        &self.clip
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn blend_weight(&self) -> f32 {
        self.blend_weight
    }

    pub fn fade_target(&self) -> f32 {
        self.fade_target
    }

    pub fn fade_rate(&self) -> f32 {
        self.fade_rate
    }

    fn advance_fade(&mut self, dt: f32) {
        if self.blend_weight < self.fade_target {
            self.blend_weight = (self.blend_weight + self.fade_rate * dt).min(self.fade_target);
        } else if self.blend_weight > self.fade_target {
            self.blend_weight = (self.blend_weight - self.fade_rate * dt).max(self.fade_target);
        }
    }

    /// Advance clip time. Returns true when a one-shot clip reached its end.
    fn advance_time(&mut self, dt: f32) -> bool {
        let duration = self.clip.duration();
        self.elapsed += dt * self.speed;
        if self.clip.is_looping() {
            if self.elapsed >= duration {
                self.elapsed = self.elapsed.rem_euclid(duration);
            }
            false
        } else if self.elapsed >= duration {
            self.elapsed = duration;
            true
        } else {
            false
        }
    }

    fn faded_out(&self) -> bool {
        self.fade_target == 0.0 && self.blend_weight <= 0.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MixerEvent {
    ClipStarted { handle: ClipHandle, clip: String },
    ClipFinished { handle: ClipHandle, clip: String },
}

/// Mixer output for one tick.
#[derive(Clone, Debug, Default)]
pub struct MixFrame {
    /// Primary base values: blended clip values plus held pose.
    pub base: HashMap<String, f32>,
    /// Summed differential deltas, already scaled by blend weight.
    pub deltas: HashMap<String, f32>,
}

#[derive(Debug, Default)]
pub struct AnimationMixer {
    library: ClipLibrary,
    defaults: HashMap<String, f32>,
    primary: Option<ActiveClipState>,
    retiring_primary: Vec<ActiveClipState>,
    slots: BTreeMap<String, ActiveClipState>,
    retiring_slots: Vec<ActiveClipState>,
    /// Last fully-weighted primary value per parameter.
    held: HashMap<String, f32>,
    accum: Accumulator,
    frame: MixFrame,
    events: Vec<MixerEvent>,
}

fn check_speed(speed: f32) -> Result<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid(format!("speed must be > 0 (got {speed})")))
    }
}

fn ms_to_s(ms: f32, what: &str) -> Result<f32> {
    if ms.is_finite() && ms >= 0.0 {
        Ok(ms / 1000.0)
    } else {
        Err(ControlError::invalid(format!("{what} must be >= 0 ms (got {ms})")))
    }
}

impl AnimationMixer {
    pub fn new(library: ClipLibrary) -> Self {
        Self {
            library,
            ..Default::default()
        }
    }

    pub fn library(&self) -> &ClipLibrary {
        &self.library
    }

    /// Register an extra clip (e.g. from a plugin).
    pub fn add_clip(&mut self, clip: AnimationClip) -> Result<()> {
        self.library.insert(clip).map(|_| ())
    }

    /// Fallback values for parameters with no held pose.
    pub fn set_defaults(&mut self, defaults: HashMap<String, f32>) {
        self.defaults = defaults;
    }

    fn lookup(&self, name: &str, kind: ClipKind) -> Result<Arc<AnimationClip>> {
        let clip = self.library.get(name)?;
        if clip.kind() != kind {
            return Err(ControlError::invalid(format!(
                "clip '{name}' is {:?}, expected {:?}",
                clip.kind(),
                kind
            )));
        }
        Ok(clip)
    }

    pub fn play_primary(&mut self, clip: &str, speed: f32, transition_ms: f32) -> Result<()> {
        check_speed(speed)?;
        let fade_s = ms_to_s(transition_ms, "transition")?;
        let clip = self.lookup(clip, ClipKind::Primary)?;

        for r in &mut self.retiring_primary {
            r.retire(fade_s);
        }
        if let Some(mut old) = self.primary.take() {
            if fade_s > 0.0 {
                old.retire(fade_s);
                self.retiring_primary.push(old);
            }
        }
        if fade_s == 0.0 {
            self.retiring_primary.clear();
        }
        debug!("play primary '{}' (speed {speed}, fade {fade_s}s)", clip.name());
        self.events.push(MixerEvent::ClipStarted {
            handle: ClipHandle::Primary,
            clip: clip.name().to_string(),
        });
        self.primary = Some(ActiveClipState::fade_in(clip, speed, fade_s));
        Ok(())
    }

    pub fn play_differential(
        &mut self,
        slot: &str,
        clip: &str,
        speed: f32,
        fade_ms: f32,
    ) -> Result<()> {
        check_speed(speed)?;
        let fade_s = ms_to_s(fade_ms, "fade")?;
        let clip = self.lookup(clip, ClipKind::Differential)?;

        if let Some(mut old) = self.slots.remove(slot) {
            if fade_s > 0.0 {
                old.retire(fade_s);
                self.retiring_slots.push(old);
            }
        }
        debug!("play '{}' in slot '{slot}' (speed {speed}, fade {fade_s}s)", clip.name());
        self.events.push(MixerEvent::ClipStarted {
            handle: ClipHandle::slot(slot),
            clip: clip.name().to_string(),
        });
        self.slots
            .insert(slot.to_string(), ActiveClipState::fade_in(clip, speed, fade_s));
        Ok(())
    }

    /// Fade a clip out and remove it. Unknown handles are ignored.
    pub fn stop(&mut self, handle: &ClipHandle, fade_ms: f32) -> Result<()> {
        let fade_s = ms_to_s(fade_ms, "fade")?;
        let taken = match handle {
            ClipHandle::Primary => self.primary.take(),
            ClipHandle::Slot(s) => self.slots.remove(s),
        };
        let Some(mut state) = taken else {
            return Ok(());
        };
        debug!("stop {handle} (fade {fade_s}s)");
        if fade_s > 0.0 {
            state.retire(fade_s);
            match handle {
                ClipHandle::Primary => self.retiring_primary.push(state),
                ClipHandle::Slot(_) => self.retiring_slots.push(state),
            }
        }
        Ok(())
    }

    pub fn set_speed(&mut self, handle: &ClipHandle, speed: f32) -> Result<()> {
        check_speed(speed)?;
        let state = match handle {
            ClipHandle::Primary => self.primary.as_mut(),
            ClipHandle::Slot(s) => self.slots.get_mut(s),
        };
        match state {
            Some(st) => {
                st.speed = speed;
                Ok(())
            }
            None => Err(ControlError::not_found("clip handle", handle.to_string())),
        }
    }

    /// Drop every active clip and the held pose.
    pub fn reset(&mut self) {
        self.primary = None;
        self.retiring_primary.clear();
        self.slots.clear();
        self.retiring_slots.clear();
        self.held.clear();
        self.frame.base.clear();
        self.frame.deltas.clear();
    }

    pub fn active_primary(&self) -> Option<&ActiveClipState> {
        self.primary.as_ref()
    }

    pub fn active_slots(&self) -> impl Iterator<Item = (&str, &ActiveClipState)> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_idle(&self) -> bool {
        self.primary.is_none()
            && self.slots.is_empty()
            && self.retiring_primary.is_empty()
            && self.retiring_slots.is_empty()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = MixerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn frame(&self) -> &MixFrame {
        &self.frame
    }

    /// Advance all clips by `dt` seconds and resolve the mix.
    pub fn tick(&mut self, dt: f32) -> &MixFrame {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        // Primary layer.
        self.accum.clear();
        let mut primary_done = false;
        if let Some(st) = self.primary.as_mut() {
            st.advance_fade(dt);
            primary_done = st.advance_time(dt);
            let w = st.blend_weight;
            let accum = &mut self.accum;
            sample_clip(&st.clip, st.elapsed, |p, v| accum.add(p, v, w));
        }
        for st in &mut self.retiring_primary {
            st.advance_fade(dt);
            st.advance_time(dt);
            let w = st.blend_weight;
            let accum = &mut self.accum;
            sample_clip(&st.clip, st.elapsed, |p, v| accum.add(p, v, w));
        }
        self.retiring_primary.retain(|s| !s.faded_out());

        let mut resolved: Vec<(String, f32, bool)> = {
            let held = &self.held;
            let defaults = &self.defaults;
            self.accum
                .resolve(|n| held.get(n).or_else(|| defaults.get(n)).copied())
                .map(|(n, v, full)| (n.to_string(), v, full))
                .collect()
        };
        self.frame.base.clear();
        self.frame.base.extend(self.held.iter().map(|(k, v)| (k.clone(), *v)));
        for (name, value, full) in resolved.drain(..) {
            if full {
                self.held.insert(name.clone(), value);
            }
            self.frame.base.insert(name, value);
        }

        if primary_done {
            if let Some(st) = self.primary.take() {
                // Finished clips leave their final pose in the held map.
                for track in st.clip.tracks() {
                    if let Some(v) = self.frame.base.get(&track.param) {
                        self.held.insert(track.param.clone(), *v);
                    }
                }
                debug!("primary '{}' finished", st.clip.name());
                self.events.push(MixerEvent::ClipFinished {
                    handle: ClipHandle::Primary,
                    clip: st.clip.name().to_string(),
                });
            }
        }

        // Differential layer.
        self.frame.deltas.clear();
        let mut finished_slots = Vec::new();
        for (slot, st) in self.slots.iter_mut() {
            st.advance_fade(dt);
            if st.advance_time(dt) {
                finished_slots.push(slot.clone());
            }
            let w = st.blend_weight;
            let deltas = &mut self.frame.deltas;
            sample_clip(&st.clip, st.elapsed, |p, v| add_delta(deltas, p, v * w));
        }
        for st in &mut self.retiring_slots {
            st.advance_fade(dt);
            st.advance_time(dt);
            let w = st.blend_weight;
            let deltas = &mut self.frame.deltas;
            sample_clip(&st.clip, st.elapsed, |p, v| add_delta(deltas, p, v * w));
        }
        self.retiring_slots.retain(|s| !s.faded_out());
        for slot in finished_slots {
            if let Some(st) = self.slots.remove(&slot) {
                debug!("slot '{slot}' clip '{}' finished", st.clip.name());
                self.events.push(MixerEvent::ClipFinished {
                    handle: ClipHandle::Slot(slot),
                    clip: st.clip.name().to_string(),
                });
            }
        }

        &self.frame
    }
}

fn add_delta(deltas: &mut HashMap<String, f32>, name: &str, delta: f32) {
    match deltas.get_mut(name) {
        Some(d) => *d += delta,
        None => {
            deltas.insert(name.to_string(), delta);
        }
    }
}
