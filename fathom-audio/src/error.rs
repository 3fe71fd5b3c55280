//! Error types for the audio engine

use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by an [`AudioDevice`](crate::device::AudioDevice) implementation.
///
/// These mirror the failure classes of a slot/buffer hardware API: stale or
/// unknown handles, operations that are illegal in the current source state,
/// and loss of the underlying device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("invalid source handle")]
    InvalidSource,
    #[error("invalid buffer handle")]
    InvalidBuffer,
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("audio device disconnected")]
    Disconnected,
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the engine, asset loading and device setup.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("failed to open audio device: {0}")]
    DeviceOpen(String),
    #[error("sound file not found: {}", .0.display())]
    AssetNotFound(PathBuf),
    #[error("malformed sound file {}: {reason}", path.display())]
    MalformedAsset { path: PathBuf, reason: String },
    #[error("unsupported sound format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("voice codec error: {0}")]
    Codec(String),
    #[error("operation requires a streaming channel")]
    NotStreaming,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<fathom_qoa::QoaError> for AudioError {
    fn from(err: fathom_qoa::QoaError) -> Self {
        AudioError::Codec(err.to_string())
    }
}

pub type Result<T, E = AudioError> = std::result::Result<T, E>;
