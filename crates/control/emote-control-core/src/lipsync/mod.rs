//! LipSyncEngine: amplitude stream in, mouth-open value out.
//!
//! Producers only touch a [`SampleSink`]. All filtering happens in
//! [`LipSyncEngine::tick`], which drains whatever arrived since the previous
//! tick and runs the envelope once per frame. A source that goes quiet for
//! longer than `idle_timeout_ms` is fed silence at the sample rate, so a
//! stalled producer lets the mouth fall shut. When a source ends or fails the
//! mouth ramps closed over `close_mouth_ms` instead of snapping.

pub mod envelope;
pub mod sink;
pub mod source;

use std::path::Path;

use crossbeam_channel::Receiver;
use log::{info, warn};
use serde::Serialize;

use crate::config::{FileStreamingConfig, LipSyncConfig};
use crate::error::{ControlError, Result};

pub use envelope::{ema_alpha, AudioEnvelopeState, Envelope};
pub use sink::SampleSink;
pub use source::{CaptureBackend, CaptureStream, FileSource, SourceStatus, StatusReporter};

use sink::{sample_channel, SampleQueue};
use source::status_channel;

/// Which kind of source is currently feeding the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Manual,
    External,
    Device,
    File,
}

enum ActiveSource {
    Manual(SampleSink),
    External,
    Device(Box<dyn CaptureStream>),
    File(FileSource),
}

impl ActiveSource {
    fn kind(&self) -> SourceKind {
        match self {
            ActiveSource::Manual(_) => SourceKind::Manual,
            ActiveSource::External => SourceKind::External,
            ActiveSource::Device(_) => SourceKind::Device,
            ActiveSource::File(_) => SourceKind::File,
        }
    }

    fn shutdown(&mut self) {
        match self {
            ActiveSource::Device(stream) => stream.stop(),
            ActiveSource::File(f) => f.stop(),
            ActiveSource::Manual(_) | ActiveSource::External => {}
        }
    }
}

/// Snapshot of the filter after the most recent frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LipSyncTelemetry {
    pub amplitude: f32,
    pub fast: f32,
    pub slow: f32,
    pub raw: f32,
    pub output: f32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
}

/// Upper bound on silent frames synthesized in one tick.
const MAX_SILENT_FRAMES: u32 = 256;

/// Linear ramp from the ratio held when a source went away down to zero.
#[derive(Clone, Copy, Debug)]
struct MouthClose {
    from: f32,
    elapsed: f32,
}

impl MouthClose {
    fn value(&self, duration: f32) -> f32 {
        self.from * (1.0 - self.elapsed / duration).max(0.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LipSyncEvent {
    SourceEnded(SourceKind),
    SourceFailed(SourceKind, String),
}

pub struct LipSyncEngine {
    envelope: Envelope,
    queue_capacity: usize,
    file_cfg: FileStreamingConfig,
    mouth_range: Option<(f32, f32)>,
    idle_timeout_s: f32,
    close_mouth_s: f32,
    idle_s: f32,
    silence_debt: f32,
    closing: Option<MouthClose>,
    source: Option<ActiveSource>,
    queue: Option<SampleQueue>,
    status: Option<Receiver<SourceStatus>>,
    backend: Option<Box<dyn CaptureBackend>>,
    telemetry: LipSyncTelemetry,
    events: Vec<LipSyncEvent>,
}

impl std::fmt::Debug for LipSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LipSyncEngine")
            .field("source", &self.source_kind())
            .field("mouth_range", &self.mouth_range)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

impl LipSyncEngine {
    pub fn new(cfg: &LipSyncConfig, file_cfg: &FileStreamingConfig) -> Self {
        Self {
            envelope: Envelope::new(cfg),
            queue_capacity: cfg.queue_capacity,
            file_cfg: file_cfg.clone(),
            mouth_range: None,
            idle_timeout_s: cfg.idle_timeout_ms / 1000.0,
            close_mouth_s: cfg.close_mouth_ms / 1000.0,
            idle_s: 0.0,
            silence_debt: 0.0,
            closing: None,
            source: None,
            queue: None,
            status: None,
            backend: None,
            telemetry: LipSyncTelemetry::default(),
            events: Vec::new(),
        }
    }

    /// Range of the bound mouth-open parameter; `None` yields the raw ratio.
    pub fn set_mouth_range(&mut self, range: Option<(f32, f32)>) {
        self.mouth_range = range;
    }

    pub fn set_capture_backend(&mut self, backend: Box<dyn CaptureBackend>) {
        self.backend = Some(backend);
    }

    pub fn set_time_constants(&mut self, attack_ms: f32, release_ms: f32) -> Result<()> {
        self.envelope.set_time_constants(attack_ms, release_ms)
    }

    pub fn set_sample_rate(&mut self, rate_hz: f32) -> Result<()> {
        self.envelope.set_sample_rate(rate_hz)
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source.as_ref().map(ActiveSource::kind)
    }

    pub fn telemetry(&self) -> LipSyncTelemetry {
        self.telemetry
    }

    /// Smoothed ratio in [0, 1].
    ///
    /// While a closing ramp runs, a newly started source takes over as soon
    /// as its envelope rises above the ramp.
    pub fn ratio(&self) -> f32 {
        let out = self.envelope.output();
        match &self.closing {
            Some(c) => out.max(c.value(self.close_mouth_s)),
            None => out,
        }
    }

    /// True while the mouth is ramping shut after a source went away.
    pub fn is_closing(&self) -> bool {
        self.closing.is_some()
    }

    /// Current ratio mapped onto the mouth range.
    pub fn mouth_value(&self) -> f32 {
        let r = self.ratio();
        match self.mouth_range {
            Some((min, max)) => min + r * (max - min),
            None => r,
        }
    }

    fn begin(&mut self) -> (SampleSink, StatusReporter) {
        self.stop_source();
        let (sink, queue) = sample_channel(self.queue_capacity);
        let (reporter, status) = status_channel();
        self.queue = Some(queue);
        self.status = Some(status);
        self.idle_s = 0.0;
        self.silence_debt = 0.0;
        (sink, reporter)
    }

    /// Accept frames through [`push_sample`](Self::push_sample).
    pub fn start_manual(&mut self) {
        let (sink, _) = self.begin();
        self.source = Some(ActiveSource::Manual(sink));
        info!("lip-sync source: manual");
    }

    /// Hand out a sink for a producer on another thread.
    pub fn start_stream(&mut self) -> SampleSink {
        let (sink, _) = self.begin();
        self.source = Some(ActiveSource::External);
        info!("lip-sync source: external stream");
        sink
    }

    pub fn start_from_device(&mut self) -> Result<()> {
        if self.backend.is_none() {
            self.stop();
            return Err(ControlError::AudioSource(
                "no capture backend configured".into(),
            ));
        }
        let (sink, reporter) = self.begin();
        let opened = match self.backend.as_mut() {
            Some(b) => b.open(sink, reporter),
            None => Err(ControlError::AudioSource("no capture backend configured".into())),
        };
        match opened {
            Ok(stream) => {
                self.source = Some(ActiveSource::Device(stream));
                info!("lip-sync source: device");
                Ok(())
            }
            Err(e) => {
                self.detach();
                Err(match e {
                    ControlError::AudioSource(_) => e,
                    other => ControlError::AudioSource(other.to_string()),
                })
            }
        }
    }

    pub fn start_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let (sink, reporter) = self.begin();
        match FileSource::start(path.as_ref(), &self.file_cfg, sink, reporter) {
            Ok(src) => {
                self.source = Some(ActiveSource::File(src));
                Ok(())
            }
            Err(e) => {
                self.detach();
                Err(match e {
                    ControlError::AudioSource(_) => e,
                    other => ControlError::AudioSource(other.to_string()),
                })
            }
        }
    }

    /// Feed the manual source. Returns false when no manual source is active
    /// or its queue is full.
    pub fn push_sample(&mut self, amplitude: f32) -> bool {
        match self.source.as_mut() {
            Some(ActiveSource::Manual(sink)) => sink.push_sample(amplitude),
            _ => false,
        }
    }

    fn stop_source(&mut self) {
        if let Some(mut src) = self.source.take() {
            src.shutdown();
        }
    }

    fn detach(&mut self) {
        self.stop_source();
        self.queue = None;
        self.status = None;
    }

    /// Stop the active source and close the mouth immediately.
    pub fn stop(&mut self) {
        if self.source.is_some() {
            info!("lip-sync source stopped");
        }
        self.detach();
        self.envelope.reset();
        self.closing = None;
        self.telemetry = LipSyncTelemetry::default();
    }

    /// Start the closing ramp from the current ratio and clear the filter.
    fn close_mouth(&mut self) {
        let from = self.ratio();
        self.envelope.reset();
        self.closing = (self.close_mouth_s > 0.0 && from > 0.0).then_some(MouthClose {
            from,
            elapsed: 0.0,
        });
        self.telemetry.output = 0.0;
    }

    /// Run silent frames once the source has been quiet past the idle timeout.
    fn feed_silence(&mut self, dt: f32) {
        self.idle_s += dt;
        if self.idle_s <= self.idle_timeout_s {
            return;
        }
        self.silence_debt += dt * self.envelope.sample_rate();
        let mut fed = 0;
        while self.silence_debt >= 1.0 && fed < MAX_SILENT_FRAMES {
            self.envelope.process(0.0);
            self.silence_debt -= 1.0;
            fed += 1;
        }
        if fed == MAX_SILENT_FRAMES {
            self.silence_debt = 0.0;
        }
        if fed > 0 {
            self.telemetry.amplitude = 0.0;
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = LipSyncEvent> + '_ {
        self.events.drain(..)
    }

    /// Drain queued frames through the envelope and return the mouth value.
    ///
    /// `dt` is the wall time since the previous tick; it drives the idle
    /// timeout and the closing ramp.
    pub fn tick(&mut self, dt: f32) -> f32 {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        // Read status before frames: a source pushes everything before it
        // reports, so frames seen after `Ended` are complete.
        let status = self.status.as_ref().and_then(|rx| rx.try_recv().ok());

        if let Some(c) = self.closing.as_mut() {
            c.elapsed += dt;
            if c.elapsed >= self.close_mouth_s {
                self.closing = None;
            }
        }

        if let Some(queue) = self.queue.as_mut() {
            let mut fresh = 0u64;
            while let Some(a) = queue.pop() {
                self.envelope.process(a);
                self.telemetry.amplitude = a;
                fresh += 1;
            }
            self.telemetry.frames_processed += fresh;
            self.telemetry.frames_dropped = queue.dropped();
            if fresh > 0 {
                self.idle_s = 0.0;
                self.silence_debt = 0.0;
            } else {
                self.feed_silence(dt);
            }
            let st = self.envelope.state();
            self.telemetry.fast = st.fast;
            self.telemetry.slow = st.slow;
            self.telemetry.raw = self.envelope.raw();
            self.telemetry.output = st.smoothed;
        }

        if let Some(status) = status {
            let kind = self.source_kind().unwrap_or(SourceKind::External);
            self.detach();
            self.close_mouth();
            match status {
                SourceStatus::Ended => {
                    info!("lip-sync {kind:?} source ended");
                    self.events.push(LipSyncEvent::SourceEnded(kind));
                }
                SourceStatus::Failed(msg) => {
                    warn!("lip-sync {kind:?} source failed: {msg}");
                    self.events.push(LipSyncEvent::SourceFailed(kind, msg));
                }
            }
        }

        self.mouth_value()
    }
}

impl Drop for LipSyncEngine {
    fn drop(&mut self) {
        self.stop_source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeStream;

    impl CaptureStream for FakeStream {
        fn stop(&mut self) {}
    }

    struct FakeBackend {
        sink: std::sync::Arc<std::sync::Mutex<Option<SampleSink>>>,
    }

    impl CaptureBackend for FakeBackend {
        fn open(&mut self, sink: SampleSink, _status: StatusReporter) -> Result<Box<dyn CaptureStream>> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(Box::new(FakeStream))
        }
    }

    fn engine() -> LipSyncEngine {
        LipSyncEngine::new(&LipSyncConfig::default(), &FileStreamingConfig::default())
    }

    #[test]
    fn short_gap_holds_then_silence_closes() {
        let mut e = engine();
        e.start_manual();
        for _ in 0..10 {
            assert!(e.push_sample(0.8));
        }
        let v = e.tick(1.0 / 30.0);
        assert!(v > 0.0);
        // Within the idle timeout nothing is synthesized.
        assert_eq!(e.tick(0.1), v);
        for _ in 0..120 {
            e.tick(1.0 / 30.0);
        }
        assert!(e.ratio() < 0.05, "ratio {}", e.ratio());
        assert_eq!(e.telemetry().frames_processed, 10);
    }

    #[test]
    fn ended_source_ramps_shut() {
        let mut e = engine();
        let (_sink, reporter) = e.begin();
        e.source = Some(ActiveSource::External);
        e.envelope.process(0.9);
        let open = e.ratio();
        reporter.ended();
        assert_eq!(e.tick(0.0), open);
        assert!(e.is_closing());
        let half = e.tick(0.1);
        assert!(half > 0.0 && half < open, "half {half}");
        e.tick(0.15);
        assert_eq!(e.ratio(), 0.0);
        assert!(!e.is_closing());
        assert!(matches!(
            e.drain_events().next(),
            Some(LipSyncEvent::SourceEnded(SourceKind::External))
        ));
    }

    #[test]
    fn maps_onto_mouth_range() {
        let mut e = engine();
        e.set_mouth_range(Some((0.2, 0.6)));
        assert_eq!(e.tick(0.0), 0.2);
        e.start_manual();
        for _ in 0..60 {
            e.push_sample(1.0);
        }
        let v = e.tick(0.0);
        assert!(v > 0.5 && v <= 0.6 + 1e-6);
    }

    #[test]
    fn device_without_backend_is_an_error() {
        let mut e = engine();
        assert!(matches!(
            e.start_from_device(),
            Err(ControlError::AudioSource(_))
        ));
        assert_eq!(e.source_kind(), None);
    }

    #[test]
    fn device_backend_receives_sink_and_new_source_replaces_old() {
        let slot = std::sync::Arc::new(std::sync::Mutex::new(None));
        let mut e = engine();
        e.set_capture_backend(Box::new(FakeBackend { sink: slot.clone() }));
        e.start_manual();
        e.start_from_device().unwrap();
        assert_eq!(e.source_kind(), Some(SourceKind::Device));
        assert!(!e.push_sample(0.5));
        let mut sink = slot.lock().unwrap().take().unwrap();
        assert!(sink.push_sample(0.9));
        e.tick(0.0);
        assert_eq!(e.telemetry().frames_processed, 1);
        e.start_manual();
        assert!(sink.is_closed());
    }

    #[test]
    fn missing_file_is_an_audio_source_error() {
        let mut e = engine();
        assert!(matches!(
            e.start_from_file("/definitely/not/here.wav"),
            Err(ControlError::AudioSource(_))
        ));
        assert_eq!(e.source_kind(), None);
    }
}
