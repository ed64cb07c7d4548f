//! Engine configuration.
//!
//! Every section carries `#[serde(default)]`, so a config file only needs the
//! keys it wants to override.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::binding::rules::{default_rules, SemanticRule};
use crate::error::{ControlError, Result};

/// Top-level configuration for a [`ControlEngine`](crate::ControlEngine).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub animation: AnimationConfig,
    pub lip_sync: LipSyncConfig,
    pub file_streaming: FileStreamingConfig,
    pub physics: PhysicsConfig,
    pub gaze: GazeConfig,
    pub binding: BindingConfig,
}

impl ControlConfig {
    /// Parse a JSON document, filling omitted keys with defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: ControlConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let ls = &self.lip_sync;
        positive("lip_sync.sample_rate_hz", ls.sample_rate_hz)?;
        positive("lip_sync.attack_ms", ls.attack_ms)?;
        positive("lip_sync.release_ms", ls.release_ms)?;
        positive("lip_sync.smoothing_ms", ls.smoothing_ms)?;
        positive("lip_sync.curve", ls.curve)?;
        positive("lip_sync.oversaturation", ls.oversaturation)?;
        non_negative("lip_sync.gain", ls.gain)?;
        non_negative("lip_sync.noise_gate", ls.noise_gate)?;
        non_negative("lip_sync.idle_timeout_ms", ls.idle_timeout_ms)?;
        non_negative("lip_sync.close_mouth_ms", ls.close_mouth_ms)?;
        if ls.queue_capacity == 0 {
            return Err(ControlError::Config(
                "lip_sync.queue_capacity must be > 0".into(),
            ));
        }
        positive("file_streaming.blocksize_hz", self.file_streaming.blocksize_hz)?;

        let ph = &self.physics;
        positive("physics.substep_hz", ph.substep_hz)?;
        positive("physics.stiffness", ph.stiffness)?;
        positive("physics.drag_decay_ms", ph.drag_decay_ms)?;
        non_negative("physics.damping_ratio", ph.damping_ratio)?;
        non_negative("physics.wind_frequency_hz", ph.wind_frequency_hz)?;
        non_negative("physics.drag_gain", ph.drag_gain)?;
        if ph.max_substeps == 0 {
            return Err(ControlError::Config(
                "physics.max_substeps must be > 0".into(),
            ));
        }

        positive("gaze.smoothing_ms", self.gaze.smoothing_ms)?;
        non_negative("gaze.head_gain", self.gaze.head_gain)?;
        non_negative("gaze.eye_gain", self.gaze.eye_gain)?;
        Ok(())
    }
}

fn positive(key: &str, v: f32) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ControlError::Config(format!("{key} must be > 0 (got {v})")))
    }
}

fn non_negative(key: &str, v: f32) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ControlError::Config(format!("{key} must be >= 0 (got {v})")))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnimationConfig {
    /// Primary clip started automatically after `reset()`, if any.
    pub initial_clip: Option<String>,
}

/// Dual-EMA envelope tuning.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Rate at which amplitude frames arrive (frames per second).
    pub sample_rate_hz: f32,
    /// Fast EMA time constant.
    pub attack_ms: f32,
    /// Slow (noise floor) EMA time constant.
    pub release_ms: f32,
    /// The floor only rises while input stays within this distance of it.
    pub noise_gate: f32,
    pub gain: f32,
    /// Exponent applied to the gated ratio; < 1 lifts quiet speech.
    pub curve: f32,
    /// Multiplier after the curve; > 1 lets loud passages saturate.
    pub oversaturation: f32,
    /// Output EMA time constant that removes per-frame jitter.
    pub smoothing_ms: f32,
    pub queue_capacity: usize,
    /// How long a source may go quiet before the envelope is fed silence.
    pub idle_timeout_ms: f32,
    /// Duration of the ramp that closes the mouth after a source ends.
    pub close_mouth_ms: f32,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 30.0,
            attack_ms: 30.0,
            release_ms: 800.0,
            noise_gate: 0.05,
            gain: 1.0,
            curve: 0.35,
            oversaturation: 1.1,
            smoothing_ms: 20.0,
            queue_capacity: 1024,
            idle_timeout_ms: 250.0,
            close_mouth_ms: 200.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileStreamingConfig {
    /// Amplitude frames produced per second of decoded audio.
    pub blocksize_hz: f32,
    /// Sleep between blocks so frames arrive at the file's native pace.
    pub realtime: bool,
}

impl Default for FileStreamingConfig {
    fn default() -> Self {
        Self {
            blocksize_hz: 30.0,
            realtime: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhysicsConfig {
    pub substep_hz: f32,
    pub max_substeps: u32,
    pub stiffness: f32,
    pub damping_ratio: f32,
    pub wind_frequency_hz: f32,
    pub drag_decay_ms: f32,
    /// Equilibrium shift per unit of pointer drag.
    pub drag_gain: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            substep_hz: 120.0,
            max_substeps: 8,
            stiffness: 60.0,
            damping_ratio: 0.35,
            wind_frequency_hz: 0.6,
            drag_decay_ms: 250.0,
            drag_gain: 0.01,
        }
    }
}

/// Gaze follow tuning. Gains are fractions of a parameter's half range.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GazeConfig {
    pub head_gain: f32,
    pub eye_gain: f32,
    pub smoothing_ms: f32,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            head_gain: 0.5,
            eye_gain: 1.0,
            smoothing_ms: 150.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BindingConfig {
    pub rules: Vec<SemanticRule>,
    pub cache_dir: PathBuf,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            cache_dir: PathBuf::from(".emote_cache"),
        }
    }
}
