//! Emote Control Core
//!
//! Non-visual control engine for a 2D puppet model. It turns a flat raw
//! parameter list into a validated binding table, plays layered animation
//! clips, follows an audio amplitude stream to drive the mouth, adds spring
//! based secondary motion, and composes everything into one clamped
//! parameter frame per tick. Rendering and UI live elsewhere.

pub mod accumulate;
pub mod binding;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod gaze;
pub mod inputs;
pub mod interp;
pub mod lipsync;
pub mod mixer;
pub mod outputs;
pub mod overrides;
pub mod physics;
pub mod plugin;
pub mod sampling;

// Re-exports for hosts
pub use binding::{
    BindingCache, BindingTable, CacheRecord, Category, FrameLabel, ParameterDescriptor,
    RawParameter, Role, SemanticRule,
};
pub use config::{
    AnimationConfig, BindingConfig, ControlConfig, FileStreamingConfig, GazeConfig,
    LipSyncConfig, PhysicsConfig,
};
pub use data::{AnimationClip, ClipKind, ClipLibrary, Interpolation, Keyframe};
pub use engine::ControlEngine;
pub use error::{ControlError, Result};
pub use gaze::GazeController;
pub use inputs::{Command, CommandSender};
pub use lipsync::{
    CaptureBackend, CaptureStream, LipSyncEngine, LipSyncTelemetry, SampleSink, SourceKind,
    StatusReporter,
};
pub use mixer::{ActiveClipState, AnimationMixer, ClipHandle};
pub use outputs::{ControlEvent, ResolvedFrame};
pub use overrides::ParameterOverrides;
pub use physics::{PhysicsGroup, PhysicsSimulator};
pub use plugin::{ClipProvider, PhysicsPerturber};
