//! Click-free parameter transitions.
//!
//! [`ParamFader`] is a time-based ramp used to fade effect chains in and out.
//! [`LevelRamp`] is the per-callback gain ramp used for output volume and the
//! wet/dry levels: a buffer is faded from the previous level to the new target
//! in one callback, and once the two agree the cheaper constant multiply is used.

use super::buffer::{fade_in_place, mix_in_faded, multiply_in_place, nearly_equal};

/// Linear ramp from `current` to `target` at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamFader {
    current: f32,
    target: f32,
    /// Units per second; zero when idle.
    rate: f32,
}

impl ParamFader {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            rate: 0.0,
        }
    }

    /// Start ramping toward `target`, arriving after `duration_secs`.
    /// A non-positive duration jumps immediately.
    pub fn fade_to(&mut self, target: f32, duration_secs: f32) {
        self.target = target;
        if duration_secs > 0.0 && duration_secs.is_finite() {
            self.rate = (target - self.current).abs() / duration_secs;
        } else {
            self.set_value(target);
        }
    }

    /// Jump to `value` with no ramp.
    pub fn set_value(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.rate = 0.0;
    }

    /// Advance the ramp by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        if self.is_done() {
            return;
        }
        let remaining = self.target - self.current;
        let step = self.rate * dt.max(0.0);
        if remaining.abs() <= step {
            self.current = self.target;
            self.rate = 0.0;
        } else {
            self.current += step.copysign(remaining);
        }
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_done(&self) -> bool {
        self.current == self.target
    }
}

impl Default for ParamFader {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Gain that moves to a new target over exactly one callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRamp {
    current: f32,
    target: f32,
}

impl LevelRamp {
    pub fn new(level: f32) -> Self {
        Self {
            current: level,
            target: level,
        }
    }

    /// Request a new level; the next callback ramps toward it.
    pub fn set_target(&mut self, level: f32) {
        self.target = level;
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        nearly_equal(self.current, self.target)
    }

    /// `true` when the level contributes audio this callback.
    pub fn is_audible(&self) -> bool {
        !(self.is_settled() && self.target.abs() <= f32::EPSILON)
    }

    /// Scale `buffer` by the level, ramping if a new target is pending.
    pub fn apply(&mut self, buffer: &mut [f32], channels: usize) {
        if self.is_settled() {
            multiply_in_place(buffer, self.target);
        } else {
            fade_in_place(buffer, self.current, self.target, channels);
        }
        self.current = self.target;
    }

    /// Add `src` scaled by the level into `dst`, ramping if needed.
    pub fn mix_into(&mut self, src: &[f32], dst: &mut [f32], channels: usize) {
        mix_in_faded(src, dst, self.current, self.target, channels);
        self.current = self.target;
    }
}

impl Default for LevelRamp {
    fn default() -> Self {
        Self::new(1.0)
    }
}
