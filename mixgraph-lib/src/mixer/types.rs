//! Handles and small shared types for the mixing graph.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Upper bound on device channels a submix will render.
pub const MAX_OUTPUT_CHANNELS: usize = 8;

/// Stable handle of a submix. Never reused within one mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmixId(pub(crate) u32);

impl SubmixId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubmixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submix#{}", self.0)
    }
}

/// Stable handle of a source voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) u32);

impl SourceId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Where a source send enters a submix relative to its effect chains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStage {
    /// Summed with the children before the dry snapshot and effects.
    #[default]
    PreEffect,
    /// Summed after wet/dry recombination, bypassing the effects.
    PostEffect,
}

/// How a submix reaches a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Summed into a parent, or the master.
    #[default]
    None,
    /// Rendered every callback and summed into the main output.
    Default,
    /// Rendered every callback into its own sink.
    External,
}

impl EndpointKind {
    pub fn is_endpoint(self) -> bool {
        !matches!(self, EndpointKind::None)
    }
}

/// Per-callback switches that steer the render path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Skip every submix effect chain.
    pub bypass_submix_effects: bool,
    /// Add a 440 Hz tone to channel 0 of the device output.
    pub debug_tone: bool,
}

/// Read-only environment for one render callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    /// Device time at the start of this callback.
    pub audio_clock: f64,
    pub settings: RenderSettings,
}

impl RenderContext {
    pub fn samples(&self) -> usize {
        self.channels * self.frames
    }

    pub fn callback_seconds(&self) -> f32 {
        self.frames as f32 / self.sample_rate.max(1) as f32
    }
}

/// At most one log line per second for a recurring render-thread condition.
#[derive(Debug, Default)]
pub(crate) struct LogThrottle {
    last: Option<Instant>,
}

impl LogThrottle {
    pub(crate) fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last).as_secs_f64() < 1.0 => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_first_and_blocks_burst() {
        let mut throttle = LogThrottle::default();
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn stages_and_kinds_use_snake_case() {
        let stage: SendStage = serde_json::from_str("\"post_effect\"").unwrap();
        assert_eq!(stage, SendStage::PostEffect);
        let kind: EndpointKind = serde_json::from_str("\"external\"").unwrap();
        assert!(kind.is_endpoint());
        assert!(!EndpointKind::None.is_endpoint());
    }
}
