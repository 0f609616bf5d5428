//! Error types for ChorusField

use thiserror::Error;

/// Kind of media device, as reported by the host or the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AudioOutput,
    AudioInput,
    VideoInput,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AudioOutput => "audiooutput",
            Self::AudioInput => "audioinput",
            Self::VideoInput => "videoinput",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ChorusError {
    /// A spatialization tier could not be constructed. Only seen inside
    /// capability probing, which falls back to the next tier.
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Invalid device kind: expected {expected}, got {actual}")]
    InvalidDeviceKind {
        expected: DeviceKind,
        actual: DeviceKind,
    },

    #[error("No audio source registered for '{0}'")]
    MissingSource(String),

    #[error("Failed to load clip: {0}")]
    LoadFailure(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Audio graph error: {0}")]
    Graph(String),

    #[error("Spatialization error: {0}")]
    Spatialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ChorusError>;
