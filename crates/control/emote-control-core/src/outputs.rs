//! Per-tick output handed to the renderer.

use hashbrown::HashMap;
use serde::Serialize;

use crate::lipsync::SourceKind;
use crate::mixer::ClipHandle;

/// Discrete lifecycle signals, drained into the next frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[non_exhaustive]
pub enum ControlEvent {
    ModelReady {
        model_id: String,
        clips: Vec<String>,
    },
    ClipStarted {
        handle: ClipHandle,
        clip: String,
    },
    ClipFinished {
        handle: ClipHandle,
        clip: String,
    },
    BindingsChanged {
        model_id: String,
    },
    CachePersistFailed {
        message: String,
    },
    AudioSourceEnded {
        source: SourceKind,
    },
    AudioSourceFailed {
        source: SourceKind,
        message: String,
    },
    CommandRejected {
        command: String,
        message: String,
    },
}

/// Clamped parameter values for one tick plus the events raised since the
/// previous frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ResolvedFrame {
    pub tick: u64,
    pub values: HashMap<String, f32>,
    pub events: Vec<ControlEvent>,
}

impl ResolvedFrame {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }
}
