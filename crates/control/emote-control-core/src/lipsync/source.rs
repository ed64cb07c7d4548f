//! Audio sources feeding a [`SampleSink`].
//!
//! Device capture is supplied by the host through [`CaptureBackend`]. File
//! playback decodes WAV with `hound` on a worker thread and reduces each
//! block of frames to one RMS amplitude.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use hound::{SampleFormat, WavReader};
use log::{debug, info, warn};

use super::sink::SampleSink;
use crate::config::FileStreamingConfig;
use crate::error::{ControlError, Result};

/// Terminal state reported by a running source.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceStatus {
    Ended,
    Failed(String),
}

/// Handle a source uses to report completion or failure.
#[derive(Clone, Debug)]
pub struct StatusReporter {
    tx: Sender<SourceStatus>,
}

impl StatusReporter {
    pub fn ended(&self) {
        let _ = self.tx.send(SourceStatus::Ended);
    }

    pub fn failed(&self, msg: impl Into<String>) {
        let _ = self.tx.send(SourceStatus::Failed(msg.into()));
    }
}

pub(crate) fn status_channel() -> (StatusReporter, Receiver<SourceStatus>) {
    let (tx, rx) = unbounded();
    (StatusReporter { tx }, rx)
}

/// A running capture. Dropping or stopping it must release the device.
pub trait CaptureStream: Send {
    fn stop(&mut self);
}

/// Host-provided access to a live capture device.
///
/// `open` receives the sink the device callback should push amplitudes
/// into, plus a reporter for asynchronous device errors.
pub trait CaptureBackend: Send {
    fn open(&mut self, sink: SampleSink, status: StatusReporter) -> Result<Box<dyn CaptureStream>>;
}

/// Background WAV decoder.
pub struct FileSource {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FileSource {
    /// Open `path` and start streaming. Header errors are returned here;
    /// decode errors later in the file arrive through `status`.
    pub fn start(
        path: &Path,
        cfg: &FileStreamingConfig,
        mut sink: SampleSink,
        status: StatusReporter,
    ) -> Result<Self> {
        let reader = WavReader::open(path)
            .map_err(|e| ControlError::AudioSource(format!("{}: {e}", path.display())))?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(ControlError::AudioSource(format!(
                "{}: empty channel layout or sample rate",
                path.display()
            )));
        }
        let block_frames = ((spec.sample_rate as f32 / cfg.blocksize_hz).round() as usize).max(1);
        let block_time = Duration::from_secs_f32(block_frames as f32 / spec.sample_rate as f32);
        let realtime = cfg.realtime;
        info!(
            "streaming {} ({} Hz, {} ch, {} frames per block)",
            path.display(),
            spec.sample_rate,
            spec.channels,
            block_frames
        );

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("emote-file-source".into())
            .spawn(move || {
                let mut blocks = BlockReducer::new(spec.channels as usize, block_frames);
                let result = decode(reader, &mut |frame_value| {
                    if let Some(rms) = blocks.push(frame_value) {
                        if !push_waiting(&mut sink, rms, &stop_flag) {
                            return false;
                        }
                        if realtime {
                            thread::sleep(block_time);
                        }
                    }
                    !stop_flag.load(Ordering::Acquire)
                });
                if stop_flag.load(Ordering::Acquire) {
                    debug!("file source stopped");
                    return;
                }
                match result {
                    Ok(()) => {
                        if let Some(rms) = blocks.finish() {
                            push_waiting(&mut sink, rms, &stop_flag);
                        }
                        status.ended();
                    }
                    Err(e) => {
                        warn!("file source failed: {e}");
                        status.failed(e.to_string());
                    }
                }
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            stop,
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signal the worker to exit. Does not wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Detach; the worker notices the flag within one block.
        self.worker.take();
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// File decoding is not real-time, so wait for queue space instead of
/// dropping frames.
fn push_waiting(sink: &mut SampleSink, amplitude: f32, stop: &AtomicBool) -> bool {
    while sink.available() == 0 {
        if stop.load(Ordering::Acquire) || sink.is_closed() {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    sink.push_sample(amplitude)
}

/// Decode every sample as f32 in [-1, 1]; `f` returns false to stop early.
fn decode<R: std::io::Read>(
    reader: WavReader<R>,
    f: &mut dyn FnMut(f32) -> bool,
) -> std::result::Result<(), hound::Error> {
    let spec = reader.spec();
    match spec.sample_format {
        SampleFormat::Float => {
            for s in reader.into_samples::<f32>() {
                if !f(s?) {
                    break;
                }
            }
        }
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            for s in reader.into_samples::<i32>() {
                if !f(s? as f32 * scale) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Mixes interleaved samples to mono and emits the RMS of each block.
struct BlockReducer {
    channels: usize,
    block_frames: usize,
    channel_idx: usize,
    frame_sum: f32,
    sq_sum: f32,
    frames: usize,
}

impl BlockReducer {
    fn new(channels: usize, block_frames: usize) -> Self {
        Self {
            channels: channels.max(1),
            block_frames: block_frames.max(1),
            channel_idx: 0,
            frame_sum: 0.0,
            sq_sum: 0.0,
            frames: 0,
        }
    }

    fn push(&mut self, sample: f32) -> Option<f32> {
        self.frame_sum += sample;
        self.channel_idx += 1;
        if self.channel_idx < self.channels {
            return None;
        }
        let mono = self.frame_sum / self.channels as f32;
        self.channel_idx = 0;
        self.frame_sum = 0.0;
        self.sq_sum += mono * mono;
        self.frames += 1;
        if self.frames == self.block_frames {
            Some(self.take())
        } else {
            None
        }
    }

    /// RMS of a trailing partial block, if any.
    fn finish(&mut self) -> Option<f32> {
        (self.frames > 0).then(|| self.take())
    }

    fn take(&mut self) -> f32 {
        let rms = (self.sq_sum / self.frames as f32).sqrt();
        self.sq_sum = 0.0;
        self.frames = 0;
        rms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reducer_mixes_channels_and_blocks() {
        let mut r = BlockReducer::new(2, 2);
        assert_eq!(r.push(0.5), None);
        assert_eq!(r.push(0.5), None);
        assert_eq!(r.push(1.0), None);
        // Frame of (1, -1) mixes to 0; block RMS = sqrt((0.25 + 0) / 2).
        assert_eq!(r.push(-1.0), Some((0.125f32).sqrt()));
        assert_eq!(r.finish(), None);
        r.push(0.3);
        r.push(0.3);
        assert!((r.finish().unwrap() - 0.3).abs() < 1e-6);
    }
}
