//! ControlEngine: one loaded model with its bindings, mixer, lip-sync and
//! physics, composed into a clamped frame per tick.
//!
//! Per tick: queued commands → cache/audio status → mixer → lip-sync →
//! physics → gaze → compose. A host override replaces the mixer base; the
//! rest is additive (differential, gaze, lip-sync, physics) and clamps once
//! at the very end.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use hashbrown::HashMap;
use log::{debug, info, warn};

use crate::binding::{BindingCache, BindingTable, ParameterDescriptor, RawParameter, Role};
use crate::config::ControlConfig;
use crate::data::{ClipKind, ClipLibrary};
use crate::error::{ControlError, Result};
use crate::gaze::{GazeController, GAZE_ROLES};
use crate::inputs::{command_channel, Command, CommandSender};
use crate::lipsync::{
    CaptureBackend, LipSyncEngine, LipSyncEvent, LipSyncTelemetry, SampleSink,
};
use crate::mixer::{AnimationMixer, ClipHandle, MixerEvent};
use crate::outputs::{ControlEvent, ResolvedFrame};
use crate::overrides::ParameterOverrides;
use crate::physics::{PhysicsGroup, PhysicsSimulator};
use crate::plugin::{ClipProvider, PhysicsPerturber};

pub struct ControlEngine {
    model_id: String,
    config: ControlConfig,
    table: Arc<BindingTable>,
    cache: Option<BindingCache>,
    mixer: AnimationMixer,
    lipsync: LipSyncEngine,
    physics: PhysicsSimulator,
    overrides: ParameterOverrides,
    gaze: GazeController,
    last_values: HashMap<String, f32>,
    commands_tx: CommandSender,
    commands_rx: Receiver<Command>,
    perturbers: Vec<Box<dyn PhysicsPerturber>>,
    events: Vec<ControlEvent>,
    tick: u64,
    fault: Option<String>,
}

impl std::fmt::Debug for ControlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlEngine")
            .field("model_id", &self.model_id)
            .field("tick", &self.tick)
            .field("parameters", &self.table.len())
            .field("fault", &self.fault)
            .finish()
    }
}

impl ControlEngine {
    /// Build an engine for one model. With a cache, bindings are read from and
    /// written back to it; without one they are derived every time.
    pub fn load(
        model_id: &str,
        raw: &[RawParameter],
        clips: ClipLibrary,
        config: ControlConfig,
        cache: Option<BindingCache>,
    ) -> Result<Self> {
        config.validate()?;
        let table = match &cache {
            Some(c) => c.load(model_id, raw, &config.binding.rules)?,
            None => BindingTable::derive(model_id, raw, &config.binding.rules)?,
        };
        let table = Arc::new(table);

        let mut mixer = AnimationMixer::new(clips);
        mixer.set_defaults(table.defaults());
        let mut lipsync = LipSyncEngine::new(&config.lip_sync, &config.file_streaming);
        lipsync.set_mouth_range(mouth_range(&table));
        let physics = PhysicsSimulator::new(&config.physics, &table);
        let gaze = GazeController::new(&config.gaze);
        let (commands_tx, commands_rx) = command_channel();

        let clip_names = mixer.library().names();
        info!(
            "loaded model '{model_id}': {} parameters, {} clips",
            table.len(),
            clip_names.len()
        );
        let mut engine = Self {
            model_id: model_id.to_string(),
            config,
            table,
            cache,
            mixer,
            lipsync,
            physics,
            overrides: ParameterOverrides::new(),
            gaze,
            last_values: HashMap::new(),
            commands_tx,
            commands_rx,
            perturbers: Vec::new(),
            events: Vec::new(),
            tick: 0,
            fault: None,
        };
        engine.events.push(ControlEvent::ModelReady {
            model_id: model_id.to_string(),
            clips: clip_names,
        });
        engine.start_initial_clip();
        Ok(engine)
    }

    /// Like [`load`](Self::load), with a cache rooted at `config.binding.cache_dir`.
    pub fn load_cached(
        model_id: &str,
        raw: &[RawParameter],
        clips: ClipLibrary,
        config: ControlConfig,
    ) -> Result<Self> {
        let cache = BindingCache::new(config.binding.cache_dir.clone())?;
        Self::load(model_id, raw, clips, config, Some(cache))
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn bindings(&self) -> &Arc<BindingTable> {
        &self.table
    }

    pub fn mixer(&self) -> &AnimationMixer {
        &self.mixer
    }

    pub fn lip_sync(&self) -> &LipSyncEngine {
        &self.lipsync
    }

    pub fn physics(&self) -> &PhysicsSimulator {
        &self.physics
    }

    pub fn gaze(&self) -> &GazeController {
        &self.gaze
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// Handle for queueing commands from other threads.
    pub fn command_sender(&self) -> CommandSender {
        self.commands_tx.clone()
    }

    // --- animation ---

    pub fn play_primary(&mut self, clip: &str, speed: f32, transition_ms: f32) -> Result<()> {
        self.mixer.play_primary(clip, speed, transition_ms)
    }

    pub fn play_differential(
        &mut self,
        slot: &str,
        clip: &str,
        speed: f32,
        fade_ms: f32,
    ) -> Result<()> {
        self.mixer.play_differential(slot, clip, speed, fade_ms)
    }

    pub fn stop(&mut self, handle: &ClipHandle, fade_ms: f32) -> Result<()> {
        self.mixer.stop(handle, fade_ms)
    }

    pub fn set_speed(&mut self, handle: &ClipHandle, speed: f32) -> Result<()> {
        self.mixer.set_speed(handle, speed)
    }

    /// Stop everything, return to defaults and clear a fault. Plays the
    /// configured initial clip, if any.
    pub fn reset(&mut self) {
        info!("reset '{}'", self.model_id);
        self.mixer.reset();
        self.physics.reset();
        self.lipsync.stop();
        self.overrides.clear_all();
        self.gaze.reset();
        self.last_values.clear();
        self.fault = None;
        self.start_initial_clip();
    }

    fn start_initial_clip(&mut self) {
        let Some(clip) = self.config.animation.initial_clip.clone() else {
            return;
        };
        if let Err(e) = self.mixer.play_primary(&clip, 1.0, 0.0) {
            warn!("initial clip '{clip}' could not start: {e}");
            self.events.push(ControlEvent::CommandRejected {
                command: "initial_clip".into(),
                message: e.to_string(),
            });
        }
    }

    // --- parameters ---

    /// Hold `name` at `value` (clamped into its range), tweening from its
    /// current value over `duration_ms`. Overrides persist until cleared or
    /// until [`reset`](Self::reset).
    pub fn set_parameter(&mut self, name: &str, value: f32, duration_ms: f32) -> Result<()> {
        let d = self.table.descriptor(name)?;
        if !value.is_finite() {
            return Err(ControlError::invalid(format!(
                "value for '{name}' must be finite (got {value})"
            )));
        }
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(ControlError::invalid(format!(
                "duration_ms must be >= 0 (got {duration_ms})"
            )));
        }
        let to = d.clamp(value);
        let from = self
            .overrides
            .get(name)
            .or_else(|| self.last_values.get(name).copied())
            .unwrap_or(d.default);
        self.overrides.set(name, from, to, duration_ms / 1000.0);
        debug!("override '{name}': {from} -> {to} over {duration_ms} ms");
        Ok(())
    }

    /// Release an override so the parameter follows the mixer again.
    pub fn clear_parameter(&mut self, name: &str) -> Result<()> {
        self.table.descriptor(name)?;
        self.overrides.clear(name);
        Ok(())
    }

    /// Value of `name` in the last resolved frame; its default before the
    /// first tick.
    pub fn parameter(&self, name: &str) -> Result<f32> {
        let d = self.table.descriptor(name)?;
        Ok(self.last_values.get(name).copied().unwrap_or(d.default))
    }

    // --- gaze ---

    /// Turn head and eyes toward a normalized point (+x right, +y up),
    /// clamped to [-1, 1].
    pub fn look_at(&mut self, x: f32, y: f32) -> Result<()> {
        self.gaze.look_at(x, y)?;
        if !GAZE_ROLES
            .iter()
            .any(|r| self.table.resolve_role(*r).is_some())
        {
            warn!("look_at on '{}': no head or eye roles are bound", self.model_id);
        }
        Ok(())
    }

    pub fn clear_look_at(&mut self) {
        self.gaze.clear();
    }

    // --- physics ---

    pub fn set_wind(&mut self, strength: f32, direction: f32) -> Result<()> {
        self.physics.set_wind(strength, direction)
    }

    pub fn set_sway_gain(&mut self, factor: f32) -> Result<()> {
        self.physics.set_sway_gain(factor)
    }

    pub fn set_group_gain(&mut self, group: PhysicsGroup, factor: f32) -> Result<()> {
        self.physics.set_group_gain(group, factor)
    }

    pub fn apply_drag(&mut self, dx: f32, dy: f32) -> Result<()> {
        self.physics.apply_drag(dx, dy)
    }

    // --- lip-sync ---

    pub fn set_time_constants(&mut self, attack_ms: f32, release_ms: f32) -> Result<()> {
        self.lipsync.set_time_constants(attack_ms, release_ms)
    }

    pub fn set_sample_rate(&mut self, rate_hz: f32) -> Result<()> {
        self.lipsync.set_sample_rate(rate_hz)
    }

    pub fn set_capture_backend(&mut self, backend: Box<dyn CaptureBackend>) {
        self.lipsync.set_capture_backend(backend);
    }

    pub fn start_manual_lip_sync(&mut self) {
        self.lipsync.start_manual();
    }

    pub fn push_sample(&mut self, amplitude: f32) -> bool {
        self.lipsync.push_sample(amplitude)
    }

    pub fn start_lip_sync_stream(&mut self) -> SampleSink {
        self.lipsync.start_stream()
    }

    pub fn start_lip_sync_from_device(&mut self) -> Result<()> {
        self.lipsync.start_from_device()
    }

    pub fn start_lip_sync_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.lipsync.start_from_file(path)
    }

    pub fn stop_lip_sync(&mut self) {
        self.lipsync.stop();
    }

    pub fn lip_sync_telemetry(&self) -> LipSyncTelemetry {
        self.lipsync.telemetry()
    }

    // --- bindings ---

    pub fn edit_binding(&mut self, name: &str, descriptor: ParameterDescriptor) -> Result<()> {
        let table = self.table.edit(name, descriptor)?;
        self.install_table(table);
        Ok(())
    }

    pub fn reassign_role(&mut self, role: Role, name: &str) -> Result<()> {
        let table = self.table.reassign_role(role, name)?;
        self.install_table(table);
        Ok(())
    }

    fn install_table(&mut self, table: BindingTable) {
        let table = Arc::new(table);
        self.mixer.set_defaults(table.defaults());
        self.lipsync.set_mouth_range(mouth_range(&table));
        self.physics.rebuild(&table);
        if let Some(cache) = &self.cache {
            cache.persist(&table);
        }
        self.table = table;
        debug!("bindings changed for '{}'", self.model_id);
        self.events.push(ControlEvent::BindingsChanged {
            model_id: self.model_id.clone(),
        });
    }

    /// Block until queued cache writes are on disk.
    pub fn flush_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.flush();
        }
    }

    // --- plugins ---

    /// Add a provider's clips. All clips must be differential and new; on
    /// error nothing is added.
    pub fn register_clip_provider(&mut self, provider: &dyn ClipProvider) -> Result<Vec<String>> {
        let clips = provider.clips();
        for clip in &clips {
            if clip.kind() != ClipKind::Differential {
                return Err(ControlError::invalid(format!(
                    "provider '{}' offered non-differential clip '{}'",
                    provider.name(),
                    clip.name()
                )));
            }
            if self.mixer.library().contains(clip.name()) {
                return Err(ControlError::validation(format!(
                    "provider '{}' clip '{}' already exists",
                    provider.name(),
                    clip.name()
                )));
            }
        }
        let mut names = Vec::with_capacity(clips.len());
        for clip in clips {
            names.push(clip.name().to_string());
            self.mixer.add_clip(clip)?;
        }
        info!("provider '{}' added {} clips", provider.name(), names.len());
        Ok(names)
    }

    pub fn register_perturber(&mut self, perturber: Box<dyn PhysicsPerturber>) {
        info!("physics perturber '{}' registered", perturber.name());
        self.perturbers.push(perturber);
    }

    // --- tick ---

    fn apply(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::PlayPrimary {
                clip,
                speed,
                transition_ms,
            } => self.play_primary(&clip, speed, transition_ms),
            Command::PlayDifferential {
                slot,
                clip,
                speed,
                fade_ms,
            } => self.play_differential(&slot, &clip, speed, fade_ms),
            Command::Stop { handle, fade_ms } => self.stop(&handle, fade_ms),
            Command::SetSpeed { handle, speed } => self.set_speed(&handle, speed),
            Command::Reset => {
                self.reset();
                Ok(())
            }
            Command::SetWind {
                strength,
                direction,
            } => self.set_wind(strength, direction),
            Command::SetSwayGain { factor } => self.set_sway_gain(factor),
            Command::SetGroupGain { group, factor } => self.set_group_gain(group, factor),
            Command::ApplyDrag { dx, dy } => self.apply_drag(dx, dy),
            Command::SetTimeConstants {
                attack_ms,
                release_ms,
            } => self.set_time_constants(attack_ms, release_ms),
            Command::StopLipSync => {
                self.stop_lip_sync();
                Ok(())
            }
            Command::EditBinding { name, descriptor } => self.edit_binding(&name, descriptor),
            Command::ReassignRole { role, name } => self.reassign_role(role, &name),
            Command::SetParameter {
                name,
                value,
                duration_ms,
            } => self.set_parameter(&name, value, duration_ms),
            Command::ClearParameter { name } => self.clear_parameter(&name),
            Command::LookAt { x, y } => self.look_at(x, y),
            Command::ClearLookAt => {
                self.clear_look_at();
                Ok(())
            }
        }
    }

    fn apply_queued_commands(&mut self) {
        let queued: Vec<Command> = self.commands_rx.try_iter().collect();
        for cmd in queued {
            let label = cmd.label();
            if let Err(e) = self.apply(cmd) {
                warn!("queued {label} rejected: {e}");
                self.events.push(ControlEvent::CommandRejected {
                    command: label.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn collect_background_results(&mut self) {
        if let Some(cache) = &self.cache {
            for outcome in cache.drain_outcomes() {
                if let Err(e) = outcome.result {
                    self.events.push(ControlEvent::CachePersistFailed {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn fail(&mut self, msg: String) -> ControlError {
        warn!("engine fault on '{}': {msg}", self.model_id);
        self.fault = Some(msg.clone());
        ControlError::EngineFault(msg)
    }

    /// Advance every component by `dt` seconds and compose the frame.
    ///
    /// After an `EngineFault` every call fails until [`reset`](Self::reset).
    pub fn tick(&mut self, dt: f32) -> Result<ResolvedFrame> {
        if let Some(msg) = &self.fault {
            return Err(ControlError::EngineFault(msg.clone()));
        }
        if !dt.is_finite() || dt < 0.0 {
            return Err(self.fail(format!("invalid tick dt {dt}")));
        }

        self.apply_queued_commands();
        self.collect_background_results();
        for p in &mut self.perturbers {
            let (dx, dy) = p.perturb(dt);
            if let Err(e) = self.physics.apply_drag(dx, dy) {
                warn!("perturber '{}' ignored: {e}", p.name());
            }
        }

        let mix = self.mixer.tick(dt);
        self.lipsync.tick(dt);
        let phys = self.physics.tick(dt);
        self.gaze.tick(dt);
        self.overrides.advance(dt);

        let mouth = self.table.resolve_role(Role::MouthOpen);
        let lip_ratio = self.lipsync.ratio();
        let mut values = HashMap::with_capacity(self.table.len());
        let mut bad: Option<String> = None;
        for d in self.table.iter() {
            let name = d.name.as_str();
            let mut v = match self.overrides.get(name) {
                Some(held) => held,
                None => mix.base.get(name).copied().unwrap_or(d.default),
            };
            v += mix.deltas.get(name).copied().unwrap_or(0.0);
            if let Some(role) = d.role {
                v += self.gaze.offset(role) * d.span() * 0.5;
            }
            if mouth == Some(name) {
                v += lip_ratio * d.span();
            }
            v += phys.get(name).copied().unwrap_or(0.0);
            if !v.is_finite() {
                bad = Some(format!("non-finite value for '{name}'"));
                break;
            }
            values.insert(d.name.clone(), d.clamp(v));
        }
        if let Some(msg) = bad {
            return Err(self.fail(msg));
        }
        self.last_values.clone_from(&values);

        for ev in self.mixer.drain_events() {
            self.events.push(match ev {
                MixerEvent::ClipStarted { handle, clip } => ControlEvent::ClipStarted { handle, clip },
                MixerEvent::ClipFinished { handle, clip } => {
                    ControlEvent::ClipFinished { handle, clip }
                }
            });
        }
        for ev in self.lipsync.drain_events() {
            self.events.push(match ev {
                LipSyncEvent::SourceEnded(source) => ControlEvent::AudioSourceEnded { source },
                LipSyncEvent::SourceFailed(source, message) => {
                    ControlEvent::AudioSourceFailed { source, message }
                }
            });
        }

        self.tick += 1;
        Ok(ResolvedFrame {
            tick: self.tick,
            values,
            events: std::mem::take(&mut self.events),
        })
    }
}

fn mouth_range(table: &BindingTable) -> Option<(f32, f32)> {
    table.role_descriptor(Role::MouthOpen).map(|d| (d.min, d.max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AnimationClip, Keyframe};

    fn raw() -> Vec<RawParameter> {
        vec![
            RawParameter::new("head_lr", 0.0, -30.0, 30.0),
            RawParameter::new("mouth_open", 0.0, 0.0, 1.0),
            RawParameter::new("hair_front", 0.0, -1.0, 1.0),
        ]
    }

    fn clips() -> ClipLibrary {
        let mut lib = ClipLibrary::new();
        lib.insert(
            AnimationClip::new(
                "nod",
                ClipKind::Primary,
                true,
                1.0,
                vec![
                    Keyframe::new(0.0, &[("head_lr", 10.0)]),
                    Keyframe::new(1.0, &[("head_lr", 10.0)]),
                ],
            )
            .unwrap(),
        )
        .unwrap();
        lib
    }

    fn engine() -> ControlEngine {
        ControlEngine::load("m", &raw(), clips(), ControlConfig::default(), None).unwrap()
    }

    #[test]
    fn first_frame_carries_model_ready() {
        let mut e = engine();
        let f = e.tick(0.016).unwrap();
        assert_eq!(f.tick, 1);
        assert!(matches!(
            f.events.first(),
            Some(ControlEvent::ModelReady { clips, .. }) if clips == &vec!["nod".to_string()]
        ));
        assert_eq!(f.get("head_lr"), Some(0.0));
    }

    #[test]
    fn queued_commands_apply_at_tick_boundary() {
        let mut e = engine();
        let tx = e.command_sender();
        tx.play_primary("nod", 1.0, 0.0).unwrap();
        tx.play_primary("missing", 1.0, 0.0).unwrap();
        let f = e.tick(0.016).unwrap();
        assert_eq!(f.get("head_lr"), Some(10.0));
        assert!(f
            .events
            .iter()
            .any(|ev| matches!(ev, ControlEvent::CommandRejected { command, .. } if command == "play_primary")));
    }

    #[test]
    fn bad_dt_faults_until_reset() {
        let mut e = engine();
        assert!(matches!(
            e.tick(f32::NAN),
            Err(ControlError::EngineFault(_))
        ));
        assert!(e.is_faulted());
        assert!(e.tick(0.016).is_err());
        e.reset();
        assert!(e.tick(0.016).is_ok());
    }

    #[test]
    fn initial_clip_plays_after_reset() {
        let mut cfg = ControlConfig::default();
        cfg.animation.initial_clip = Some("nod".into());
        let mut e = ControlEngine::load("m", &raw(), clips(), cfg, None).unwrap();
        assert_eq!(e.tick(0.0).unwrap().get("head_lr"), Some(10.0));
        e.reset();
        assert_eq!(e.tick(0.0).unwrap().get("head_lr"), Some(10.0));
    }

    struct Blink;

    impl ClipProvider for Blink {
        fn name(&self) -> &str {
            "blink"
        }

        fn clips(&self) -> Vec<AnimationClip> {
            vec![AnimationClip::new(
                "blink",
                ClipKind::Differential,
                false,
                0.2,
                vec![Keyframe::new(0.0, &[("head_lr", 1.0)])],
            )
            .unwrap()]
        }
    }

    struct Push;

    impl PhysicsPerturber for Push {
        fn name(&self) -> &str {
            "push"
        }

        fn perturb(&mut self, _dt: f32) -> (f32, f32) {
            (20.0, 0.0)
        }
    }

    #[test]
    fn plugins_feed_clips_and_drag() {
        let mut e = engine();
        assert_eq!(e.register_clip_provider(&Blink).unwrap(), vec!["blink"]);
        assert!(e.register_clip_provider(&Blink).is_err());
        e.play_differential("eyes", "blink", 1.0, 0.0).unwrap();
        e.register_perturber(Box::new(Push));
        let f = e.tick(0.05).unwrap();
        assert_eq!(f.get("head_lr"), Some(1.0));
        assert!(f.get("hair_front").unwrap() > 0.0);
    }
}
