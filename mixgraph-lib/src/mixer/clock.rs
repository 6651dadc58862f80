//! Tempo clock that releases scheduled events on beat or bar boundaries.

use serde::{Deserialize, Serialize};

const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_BEATS_PER_BAR: u32 = 4;
const PENDING_CAPACITY: usize = 64;

/// Boundary an event waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    /// Fire in the next block.
    Immediate,
    Beat,
    Bar,
}

/// Frame-accurate musical clock.
#[derive(Debug)]
pub struct QuantizedClock<T> {
    sample_rate: u32,
    bpm: f64,
    beats_per_bar: u32,
    frame: u64,
    pending: Vec<(Quantization, T)>,
}

impl<T> QuantizedClock<T> {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            bpm: DEFAULT_BPM,
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            frame: 0,
            pending: Vec::with_capacity(PENDING_CAPACITY),
        }
    }

    /// Change tempo. Invalid values keep the previous setting.
    pub fn set_tempo(&mut self, bpm: f64, beats_per_bar: u32) {
        if bpm.is_finite() && bpm > 0.0 {
            self.bpm = bpm;
        }
        if beats_per_bar > 0 {
            self.beats_per_bar = beats_per_bar;
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn frames_per_beat(&self) -> f64 {
        self.sample_rate as f64 * 60.0 / self.bpm
    }

    fn frames_per(&self, quantization: Quantization) -> f64 {
        match quantization {
            Quantization::Immediate => 0.0,
            Quantization::Beat => self.frames_per_beat(),
            Quantization::Bar => self.frames_per_beat() * self.beats_per_bar as f64,
        }
    }

    /// Whole beats elapsed since the clock started.
    pub fn beat(&self) -> u64 {
        (self.frame as f64 / self.frames_per_beat()).floor() as u64
    }

    pub fn bar(&self) -> u64 {
        self.beat() / self.beats_per_bar as u64
    }

    pub fn schedule(&mut self, quantization: Quantization, event: T) {
        self.pending.push((quantization, event));
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Advance by `frames` and move every event whose boundary lies in
    /// `[frame, frame + frames)` into `fired`, in scheduling order.
    pub fn update(&mut self, frames: usize, fired: &mut Vec<T>) {
        let start = self.frame as f64;
        let end = start + frames as f64;
        let mut index = 0;
        while index < self.pending.len() {
            let period = self.frames_per(self.pending[index].0);
            let due = period <= 0.0 || (start / period).ceil() * period < end;
            if due {
                fired.push(self.pending.remove(index).1);
            } else {
                index += 1;
            }
        }
        self.frame += frames as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> QuantizedClock<&'static str> {
        // 60 bpm at 100 Hz: one beat every 100 frames, bars every 400.
        let mut clock = QuantizedClock::new(100);
        clock.set_tempo(60.0, 4);
        clock
    }

    #[test]
    fn immediate_fires_in_next_block() {
        let mut clock = clock();
        clock.update(10, &mut Vec::new());
        clock.schedule(Quantization::Immediate, "now");
        let mut fired = Vec::new();
        clock.update(10, &mut fired);
        assert_eq!(fired, vec!["now"]);
    }

    #[test]
    fn beat_waits_for_boundary() {
        let mut clock = clock();
        clock.update(10, &mut Vec::new());
        clock.schedule(Quantization::Beat, "beat");
        clock.schedule(Quantization::Bar, "bar");

        let mut fired = Vec::new();
        for _ in 0..9 {
            clock.update(10, &mut fired);
        }
        assert!(fired.is_empty());
        clock.update(10, &mut fired);
        assert_eq!(fired, vec!["beat"]);
        assert_eq!(clock.beat(), 1);

        fired.clear();
        while clock.frame() <= 400 {
            clock.update(10, &mut fired);
        }
        assert_eq!(fired, vec!["bar"]);
        assert_eq!(clock.bar(), 1);
    }

    #[test]
    fn boundary_at_block_start_fires() {
        let mut clock = clock();
        clock.update(100, &mut Vec::new());
        clock.schedule(Quantization::Beat, "on");
        let mut fired = Vec::new();
        clock.update(1, &mut fired);
        assert_eq!(fired, vec!["on"]);
    }

    #[test]
    fn invalid_tempo_is_ignored() {
        let mut clock = clock();
        clock.set_tempo(f64::NAN, 0);
        assert_eq!(clock.bpm(), 60.0);
        assert!((clock.frames_per_beat() - 100.0).abs() < 1e-9);
    }
}
