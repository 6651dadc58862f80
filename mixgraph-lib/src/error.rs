use std::fmt::{Display, Formatter};

use crate::mixer::{SourceId, SubmixId};

/// Error type for control-thread mixer operations.
#[derive(Debug)]
pub enum MixerError {
    Io(std::io::Error),
    Config(String),
    UnknownSubmix(SubmixId),
    UnknownSource(SourceId),
    InvalidChannelCount(usize),
    InvalidTopology(String),
    SoundfieldConflict(SubmixId),
    /// The configured submix capacity is used up.
    RegistryFull(usize),
    QueueAllocation,
}

impl Display for MixerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Config(err) => write!(f, "config error: {}", err),
            Self::UnknownSubmix(id) => write!(f, "unknown submix {}", id),
            Self::UnknownSource(id) => write!(f, "unknown source {}", id),
            Self::InvalidChannelCount(count) => write!(f, "invalid channel count {}", count),
            Self::InvalidTopology(err) => write!(f, "invalid topology: {}", err),
            Self::SoundfieldConflict(id) => write!(
                f,
                "child {} was given both a soundfield encoder and a transcoder",
                id
            ),
            Self::RegistryFull(max) => write!(f, "submix registry is full ({} submixes)", max),
            Self::QueueAllocation => write!(f, "command queue allocation failed"),
        }
    }
}

impl std::error::Error for MixerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MixerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MixerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MixerError>;
