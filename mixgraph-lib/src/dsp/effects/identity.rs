//! Exact passthrough stage.

use serde::{Deserialize, Serialize};

use super::{EffectContext, SubmixEffect};

/// Leaves samples untouched. Useful as a chain placeholder and for checking
/// that the wet path is bit-exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEffect;

impl SubmixEffect for IdentityEffect {
    fn name(&self) -> &str {
        "identity"
    }

    fn process(&mut self, _samples: &mut [f32], _context: &EffectContext) {}

    fn reset_state(&mut self) {}
}
