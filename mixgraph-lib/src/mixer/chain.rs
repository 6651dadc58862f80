//! Effect chains and the crossfading chain stack of a submix.
//!
//! A submix can hold several chains at once while a swap is in progress: the
//! current chain fades in while retired chains fade out. Every chain runs over
//! the same input and the outputs are summed, each weighted by its own fade
//! amplitude interpolated across the callback. Retired chains are dropped once
//! silent, except for the base chain, which stays for reuse.

use crate::dsp::buffer::{mix_in_faded, reset_to_silence};
use crate::dsp::effects::{AudioEffect, EffectContext, SubmixEffect};
use crate::dsp::fader::ParamFader;

/// Ordered list of effect stages applied in place.
#[derive(Default)]
pub struct EffectChain {
    effects: Vec<Box<dyn SubmixEffect>>,
}

impl EffectChain {
    pub fn new(effects: Vec<Box<dyn SubmixEffect>>) -> Self {
        Self { effects }
    }

    pub fn from_effects(effects: Vec<AudioEffect>) -> Self {
        Self::new(effects.into_iter().map(AudioEffect::boxed).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.effects.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn warm_up(&mut self, context: &EffectContext) {
        for effect in self.effects.iter_mut() {
            effect.warm_up(context);
        }
    }

    pub fn process(&mut self, samples: &mut [f32], context: &EffectContext) {
        for effect in self.effects.iter_mut() {
            effect.process(samples, context);
        }
    }

    pub fn reset_state(&mut self) {
        for effect in self.effects.iter_mut() {
            effect.reset_state();
        }
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.effects.iter().map(|e| e.name()))
            .finish()
    }
}

struct ChainSlot {
    chain: EffectChain,
    fader: ParamFader,
    is_current: bool,
    is_base: bool,
}

impl ChainSlot {
    fn new(chain: EffectChain, start: f32) -> Self {
        Self {
            chain,
            fader: ParamFader::new(start),
            is_current: false,
            is_base: false,
        }
    }

    fn retire(&mut self, fade_seconds: f32) {
        self.is_current = false;
        self.fader.fade_to(0.0, fade_seconds);
    }

    fn activate(&mut self, fade_seconds: f32) {
        self.is_current = true;
        self.fader.fade_to(1.0, fade_seconds);
    }
}

/// All chains attached to one submix.
#[derive(Default)]
pub struct ChainStack {
    slots: Vec<ChainSlot>,
    chain_out: Vec<f32>,
    wet: Vec<f32>,
}

impl ChainStack {
    /// Preallocate scratch for `samples` interleaved samples.
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            slots: Vec::with_capacity(4),
            chain_out: Vec::with_capacity(samples),
            wet: Vec::with_capacity(samples),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    fn current_index(&self) -> Option<usize> {
        self.slots.iter().rposition(|slot| slot.is_current)
    }

    fn retire_current(&mut self, fade_seconds: f32) {
        for slot in self.slots.iter_mut().filter(|slot| slot.is_current) {
            slot.retire(fade_seconds);
        }
    }

    /// Make `chain` current, fading the previous current chain out.
    pub fn push(&mut self, chain: EffectChain, fade_seconds: f32) {
        self.retire_current(fade_seconds);
        let mut slot = ChainSlot::new(chain, 0.0);
        slot.activate(fade_seconds);
        self.slots.push(slot);
    }

    /// Fade the current chain out and bring back the most recent remaining
    /// chain, falling back to the base chain.
    pub fn pop(&mut self, fade_seconds: f32) {
        let Some(current) = self.current_index() else {
            return;
        };
        self.slots[current].retire(fade_seconds);
        let previous = self.slots[..current]
            .iter()
            .rposition(|slot| !slot.is_base)
            .or_else(|| self.slots.iter().position(|slot| slot.is_base));
        if let Some(index) = previous {
            self.slots[index].activate(fade_seconds);
        }
    }

    /// Replace the base chain. It becomes current when nothing else is.
    ///
    /// An old base that is still audible is demoted to an ordinary retiring
    /// chain and crossfades into the new one over `fade_seconds`.
    pub fn set_base(&mut self, chain: EffectChain, fade_seconds: f32) {
        let mut replaced_audible = false;
        if let Some(index) = self.slots.iter().position(|slot| slot.is_base) {
            if self.slots[index].fader.value() > 0.0 {
                let old = &mut self.slots[index];
                replaced_audible = old.is_current;
                old.is_base = false;
                old.retire(fade_seconds);
            } else {
                self.slots.remove(index);
            }
        }

        let has_current = self.current_index().is_some();
        let mut slot = ChainSlot::new(chain, 0.0);
        slot.is_base = true;
        if !has_current {
            if replaced_audible {
                slot.activate(fade_seconds);
            } else {
                slot.fader.set_value(1.0);
                slot.is_current = true;
            }
        }
        self.slots.insert(0, slot);
    }

    /// Fade every chain out except the base chain, which fades back in.
    pub fn clear(&mut self, fade_seconds: f32) {
        for slot in self.slots.iter_mut() {
            if slot.is_base {
                slot.activate(fade_seconds);
            } else {
                slot.retire(fade_seconds);
            }
        }
    }

    /// Run the chains over `buffer`. Returns `true` when at least one chain
    /// produced output, in which case `buffer` now holds the wet signal.
    pub fn process(&mut self, buffer: &mut [f32], context: &EffectContext, dt: f32) -> bool {
        reset_to_silence(&mut self.wet, buffer.len());
        let mut processed = false;

        let mut index = self.slots.len();
        while index > 0 {
            index -= 1;
            let slot = &mut self.slots[index];
            if slot.fader.is_done() && !slot.is_current && !slot.is_base {
                log::debug!("retiring effect chain {:?}", slot.chain);
                self.slots.remove(index);
                continue;
            }
            if slot.chain.is_empty() {
                slot.fader.update(dt);
                continue;
            }

            self.chain_out.clear();
            self.chain_out.extend_from_slice(buffer);
            slot.chain.process(&mut self.chain_out, context);

            let start = slot.fader.value();
            slot.fader.update(dt);
            let end = slot.fader.value();
            mix_in_faded(&self.chain_out, &mut self.wet, start, end, context.channels);
            processed = true;
        }

        if processed {
            buffer.copy_from_slice(&self.wet);
        }
        processed
    }
}
