//! Error taxonomy shared by every control-engine operation.

use thiserror::Error;

/// Result alias carrying [`ControlError`].
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors produced by the binding table, mixer, lip-sync engine and engine.
///
/// Per-operation errors (`NotFound`, `Validation`, `InvalidArgument`,
/// `AudioSource`) leave prior state untouched. `EngineFault` is the only
/// variant raised by `tick` and requires a reset or reload.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown {kind} '{name}'")]
    NotFound { kind: &'static str, name: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("binding cache persist failed: {0}")]
    CachePersist(String),
    #[error("audio source error: {0}")]
    AudioSource(String),
    #[error("engine fault: {0}")]
    EngineFault(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ControlError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<hound::Error> for ControlError {
    fn from(value: hound::Error) -> Self {
        Self::AudioSource(value.to_string())
    }
}
