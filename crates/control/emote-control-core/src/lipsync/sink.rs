//! Lock-free amplitude ingest.
//!
//! A [`SampleSink`] is the producer half of a single-producer ring buffer. It
//! is safe to call from a real-time audio callback: `push_sample` never
//! blocks or allocates. The consumer half stays with the lip-sync engine and
//! is drained in `tick`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

pub struct SampleSink {
    producer: Producer<f32>,
    dropped: Arc<AtomicU64>,
}

impl SampleSink {
    /// Queue one amplitude frame, clamped to [0, 1]. Returns false and counts
    /// a drop when the queue is full.
    #[inline]
    pub fn push_sample(&mut self, amplitude: f32) -> bool {
        let a = if amplitude.is_finite() {
            amplitude.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if self.producer.push(a).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Free slots in the queue.
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// True once the engine has dropped the consumer side.
    pub fn is_closed(&self) -> bool {
        self.producer.is_abandoned()
    }
}

impl std::fmt::Debug for SampleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleSink")
            .field("available", &self.available())
            .finish()
    }
}

/// Consumer side held by the engine.
pub(crate) struct SampleQueue {
    consumer: Consumer<f32>,
    dropped: Arc<AtomicU64>,
}

impl SampleQueue {
    pub(crate) fn pop(&mut self) -> Option<f32> {
        self.consumer.pop().ok()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a connected sink/queue pair.
pub(crate) fn sample_channel(capacity: usize) -> (SampleSink, SampleQueue) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        SampleSink {
            producer,
            dropped: Arc::clone(&dropped),
        },
        SampleQueue { consumer, dropped },
    )
}
