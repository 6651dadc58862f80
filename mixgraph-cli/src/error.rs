use std::fmt::{Display, Formatter};

use mixgraph_lib::MixerError;

/// Errors surfaced by the `mixgraph` binary.
#[derive(Debug)]
pub enum CliError {
    Mixer(MixerError),
    Wav(hound::Error),
    Io(std::io::Error),
    Usage(String),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mixer(err) => write!(f, "{}", err),
            Self::Wav(err) => write!(f, "wav error: {}", err),
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Usage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Mixer(err) => Some(err),
            Self::Wav(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Usage(_) => None,
        }
    }
}

impl From<MixerError> for CliError {
    fn from(value: MixerError) -> Self {
        Self::Mixer(value)
    }
}

impl From<hound::Error> for CliError {
    fn from(value: hound::Error) -> Self {
        Self::Wav(value)
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
