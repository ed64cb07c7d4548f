//! Dual-EMA envelope follower.
//!
//! `fast` tracks the attack of the amplitude stream. `slow` tracks the noise
//! floor: it always follows the input down, but only follows it up while the
//! input stays within `noise_gate` of the floor. Speech therefore opens the
//! mouth by `fast - slow` while steady background hum cancels out.

use serde::Serialize;

use crate::config::LipSyncConfig;
use crate::error::{ControlError, Result};

/// EMA coefficient for a time constant at a given update rate.
#[inline]
pub fn ema_alpha(tau_ms: f32, rate_hz: f32) -> f32 {
    let tau_s = tau_ms / 1000.0;
    1.0 - (-1.0 / (tau_s * rate_hz)).exp()
}

fn check_positive(what: &str, v: f32) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid(format!("{what} must be > 0 (got {v})")))
    }
}

/// Runtime accumulators. Reset on stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AudioEnvelopeState {
    pub fast: f32,
    pub slow: f32,
    pub last_input: f32,
    /// Shaped ratio before output smoothing.
    pub last_output: f32,
    /// Smoothed ratio in [0, 1].
    pub smoothed: f32,
}

#[derive(Clone, Debug)]
pub struct Envelope {
    attack_ms: f32,
    release_ms: f32,
    smoothing_ms: f32,
    rate_hz: f32,
    noise_gate: f32,
    gain: f32,
    curve: f32,
    oversaturation: f32,
    a_fast: f32,
    a_slow: f32,
    a_out: f32,
    state: AudioEnvelopeState,
}

impl Envelope {
    pub fn new(cfg: &LipSyncConfig) -> Self {
        let mut env = Self {
            attack_ms: cfg.attack_ms,
            release_ms: cfg.release_ms,
            smoothing_ms: cfg.smoothing_ms,
            rate_hz: cfg.sample_rate_hz,
            noise_gate: cfg.noise_gate,
            gain: cfg.gain,
            curve: cfg.curve,
            oversaturation: cfg.oversaturation,
            a_fast: 0.0,
            a_slow: 0.0,
            a_out: 0.0,
            state: AudioEnvelopeState::default(),
        };
        env.recompute();
        env
    }

    fn recompute(&mut self) {
        self.a_fast = ema_alpha(self.attack_ms, self.rate_hz);
        self.a_slow = ema_alpha(self.release_ms, self.rate_hz);
        self.a_out = ema_alpha(self.smoothing_ms, self.rate_hz);
    }

    pub fn set_time_constants(&mut self, attack_ms: f32, release_ms: f32) -> Result<()> {
        check_positive("attack_ms", attack_ms)?;
        check_positive("release_ms", release_ms)?;
        self.attack_ms = attack_ms;
        self.release_ms = release_ms;
        self.recompute();
        Ok(())
    }

    pub fn set_sample_rate(&mut self, rate_hz: f32) -> Result<()> {
        check_positive("sample rate", rate_hz)?;
        self.rate_hz = rate_hz;
        self.recompute();
        Ok(())
    }

    pub fn time_constants(&self) -> (f32, f32) {
        (self.attack_ms, self.release_ms)
    }

    pub fn sample_rate(&self) -> f32 {
        self.rate_hz
    }

    pub fn state(&self) -> &AudioEnvelopeState {
        &self.state
    }

    /// Smoothed ratio in [0, 1].
    pub fn output(&self) -> f32 {
        self.state.smoothed
    }

    pub fn reset(&mut self) {
        self.state = AudioEnvelopeState::default();
    }

    /// Feed one amplitude frame and return the smoothed ratio.
    pub fn process(&mut self, amplitude: f32) -> f32 {
        let x = if amplitude.is_finite() {
            amplitude.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut s = self.state;
        s.last_input = x;
        s.fast += self.a_fast * (x - s.fast);
        if x <= s.slow + self.noise_gate {
            s.slow += self.a_slow * (x - s.slow);
        }
        let raw = (s.fast - s.slow).max(0.0) * self.gain;
        s.last_output = self.shape(raw);
        s.smoothed += self.a_out * (s.last_output - s.smoothed);
        self.state = s;
        s.smoothed
    }

    /// Response curve: `raw^curve * oversaturation`, clamped to [0, 1].
    pub fn shape(&self, raw: f32) -> f32 {
        if raw <= 0.0 {
            return 0.0;
        }
        (raw.powf(self.curve) * self.oversaturation).clamp(0.0, 1.0)
    }

    /// Ungated difference for telemetry.
    pub fn raw(&self) -> f32 {
        (self.state.fast - self.state.slow).max(0.0) * self.gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LipSyncConfig {
        LipSyncConfig {
            sample_rate_hz: 100.0,
            attack_ms: 30.0,
            release_ms: 150.0,
            ..LipSyncConfig::default()
        }
    }

    #[test]
    fn alpha_matches_time_constant() {
        // One time constant worth of updates covers 1 - 1/e of a step.
        let a = ema_alpha(100.0, 100.0);
        let mut y = 0.0f32;
        for _ in 0..10 {
            y += a * (1.0 - y);
        }
        assert!((y - (1.0 - (-1.0f32).exp())).abs() < 1e-4);
    }

    #[test]
    fn steady_hum_cancels() {
        let mut env = Envelope::new(&cfg());
        for _ in 0..500 {
            env.process(0.03);
        }
        assert!(env.output() < 0.05, "output {}", env.output());
    }

    #[test]
    fn silence_after_speech_closes_mouth() {
        let mut env = Envelope::new(&cfg());
        for _ in 0..50 {
            env.process(0.8);
        }
        assert!(env.output() > 0.95);
        for _ in 0..100 {
            env.process(0.0);
        }
        assert!(env.output() < 0.05);
    }

    #[test]
    fn floor_follows_drops_but_not_jumps() {
        let mut env = Envelope::new(&cfg());
        for _ in 0..200 {
            env.process(0.04);
        }
        let floor = env.state().slow;
        assert!((floor - 0.04).abs() < 1e-3, "floor {floor}");
        env.process(0.5);
        assert_eq!(env.state().slow, floor);
        env.process(0.0);
        assert!(env.state().slow < floor);
    }

    #[test]
    fn rejects_non_positive_constants() {
        let mut env = Envelope::new(&cfg());
        assert!(env.set_time_constants(0.0, 100.0).is_err());
        assert!(env.set_time_constants(10.0, f32::NAN).is_err());
        assert_eq!(env.time_constants(), (30.0, 150.0));
        assert!(env.set_sample_rate(-1.0).is_err());
    }
}
