use std::thread;
use std::time::Duration;

use emote_control_core::{
    ClipLibrary, ControlConfig, ControlEngine, ControlError, ControlEvent, FileStreamingConfig,
    LipSyncConfig, LipSyncEngine, RawParameter, SourceKind,
};

fn approx(a: f32, b: f32, eps: f32) {
    assert!((a - b).abs() <= eps, "left={a} right={b} eps={eps}");
}

fn mk_lipsync(attack_ms: f32, release_ms: f32) -> LipSyncEngine {
    let cfg = LipSyncConfig {
        sample_rate_hz: 100.0,
        attack_ms,
        release_ms,
        ..LipSyncConfig::default()
    };
    let mut ls = LipSyncEngine::new(&cfg, &FileStreamingConfig::default());
    ls.set_mouth_range(Some((0.0, 1.0)));
    ls
}

fn write_constant_wav(path: &std::path::Path, rate: u32, seconds: f32, value: i16) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(rate as f32 * seconds) as usize {
        w.write_sample(value).unwrap();
    }
    w.finalize().unwrap();
}

/// it should open monotonically under sustained input and close monotonically after it
#[test]
fn attack_and_release_are_monotonic() {
    let mut ls = mk_lipsync(30.0, 150.0);
    ls.start_manual();

    let mut prev = 0.0;
    for _ in 0..30 {
        assert!(ls.push_sample(0.8));
        let v = ls.tick(0.01);
        assert!(v >= prev, "attack dipped: {v} < {prev}");
        prev = v;
    }
    assert!(prev > 0.9, "mouth only reached {prev}");

    for _ in 0..60 {
        assert!(ls.push_sample(0.0));
        let v = ls.tick(0.01);
        assert!(v <= prev, "release rose: {v} > {prev}");
        prev = v;
    }
    assert!(prev < 0.05, "mouth still at {prev}");
}

/// it should open faster with a shorter attack time
#[test]
fn shorter_attack_opens_sooner() {
    let mut quick = mk_lipsync(10.0, 150.0);
    let mut slow = mk_lipsync(120.0, 150.0);
    quick.start_manual();
    slow.start_manual();
    for _ in 0..5 {
        quick.push_sample(0.6);
        slow.push_sample(0.6);
        quick.tick(0.01);
        slow.tick(0.01);
    }
    assert!(quick.ratio() > slow.ratio());
    assert!(matches!(
        quick.set_time_constants(0.0, 100.0),
        Err(ControlError::InvalidArgument(_))
    ));
}

/// it should let the mouth fall shut when a stream stops delivering frames
#[test]
fn stalled_stream_closes_mouth() {
    let mut ls = LipSyncEngine::new(&LipSyncConfig::default(), &FileStreamingConfig::default());
    ls.set_mouth_range(Some((0.0, 1.0)));
    let mut sink = ls.start_stream();
    for _ in 0..30 {
        assert!(sink.push_sample(0.9));
    }
    let open = ls.tick(1.0 / 60.0);
    assert!(open > 0.9, "mouth only reached {open}");

    let mut prev = open;
    for _ in 0..600 {
        let v = ls.tick(1.0 / 60.0);
        assert!(v <= prev, "stalled mouth rose: {v} > {prev}");
        prev = v;
    }
    assert!(prev < 0.05, "mouth stuck at {prev}");
    assert_eq!(ls.source_kind(), Some(SourceKind::External));
    assert_eq!(ls.telemetry().frames_processed, 30);
}

/// it should hold steady background level near closed
#[test]
fn steady_hum_cancels_out() {
    let mut ls = mk_lipsync(30.0, 150.0);
    ls.start_manual();
    for _ in 0..400 {
        ls.push_sample(0.03);
        ls.tick(0.01);
    }
    assert!(ls.ratio() < 0.05, "hum leaked: {}", ls.ratio());
}

/// it should accept frames from another thread through a stream sink
#[test]
fn stream_sink_feeds_from_another_thread() {
    let mut ls = mk_lipsync(30.0, 150.0);
    let mut sink = ls.start_stream();
    assert_eq!(ls.source_kind(), Some(SourceKind::External));
    let producer = thread::spawn(move || {
        for _ in 0..20 {
            sink.push_sample(0.7);
        }
    });
    producer.join().unwrap();
    ls.tick(0.01);
    assert_eq!(ls.telemetry().frames_processed, 20);
    approx(ls.telemetry().amplitude, 0.7, 1e-6);
    assert!(ls.ratio() > 0.0);

    ls.stop();
    assert_eq!(ls.ratio(), 0.0);
    assert_eq!(ls.source_kind(), None);
}

/// it should stream a WAV file block by block and report the end of the file
#[test]
fn file_source_streams_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("half.wav");
    write_constant_wav(&wav, 8000, 0.5, 16384);

    let mut cfg = ControlConfig::default();
    cfg.file_streaming.blocksize_hz = 20.0;
    cfg.file_streaming.realtime = false;
    let raw = vec![RawParameter::new("mouth_open", 0.0, 0.0, 1.0)];
    let mut engine = ControlEngine::load("m", &raw, ClipLibrary::new(), cfg, None).unwrap();
    engine.start_lip_sync_from_file(&wav).unwrap();
    assert_eq!(engine.lip_sync().source_kind(), Some(SourceKind::File));

    let mut ended = false;
    for _ in 0..500 {
        let frame = engine.tick(0.01).unwrap();
        if frame.events.iter().any(|e| {
            matches!(e, ControlEvent::AudioSourceEnded { source } if *source == SourceKind::File)
        }) {
            ended = true;
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert!(ended, "file source never reported its end");

    let t = engine.lip_sync_telemetry();
    assert_eq!(t.frames_processed, 10);
    assert_eq!(t.frames_dropped, 0);
    approx(t.amplitude, 0.5, 1e-4);
    assert_eq!(engine.lip_sync().source_kind(), None);

    // The mouth eases shut over close_mouth_ms rather than snapping.
    let closing = engine.tick(0.05).unwrap().get("mouth_open").unwrap();
    assert!(closing > 0.0 && closing < 1.0, "closing at {closing}");
    assert!(engine.lip_sync().is_closing());
    for _ in 0..4 {
        engine.tick(0.05).unwrap();
    }
    assert_eq!(engine.tick(0.01).unwrap().get("mouth_open"), Some(0.0));
}

/// it should fail fast on a missing file and without a capture backend
#[test]
fn unavailable_sources_are_rejected() {
    let raw = vec![RawParameter::new("mouth_open", 0.0, 0.0, 1.0)];
    let mut engine =
        ControlEngine::load("m", &raw, ClipLibrary::new(), ControlConfig::default(), None).unwrap();
    assert!(matches!(
        engine.start_lip_sync_from_file("/definitely/not/here.wav"),
        Err(ControlError::AudioSource(_))
    ));
    assert!(matches!(
        engine.start_lip_sync_from_device(),
        Err(ControlError::AudioSource(_))
    ));
    assert_eq!(engine.lip_sync().source_kind(), None);
}
