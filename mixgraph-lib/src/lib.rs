//! # mixgraph
//!
//! Real-time submix graph mixing engine.
//!
//! Control threads shape a graph of submixes and source voices through a
//! [`mixer::MixerHandle`]; every change travels to the render thread over
//! lock-free queues ([`queue`]). The render thread drives one
//! [`output::OutputBuffer`] per device, which ticks the graph once per
//! callback and stages converted samples for the device.

pub mod config;
pub mod dsp;
pub mod error;
pub mod mixer;
pub mod output;
pub mod queue;
pub mod soundfield;

pub use config::{GraphConfig, MixerConfig};
pub use error::{MixerError, Result};
pub use mixer::{create_mixer, MixerHandle};
pub use output::{OutputBuffer, SampleFormat};
