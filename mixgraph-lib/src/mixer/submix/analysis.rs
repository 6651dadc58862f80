//! State a submix shares with control threads: buffer listeners, the
//! recording store, the spectrum analyzer and published envelope values.
//!
//! Each concern sits behind its own mutex. The render thread holds these locks
//! only for short copies, and takes the analyzer lock with `try_lock` so a
//! busy analyzer costs one skipped analysis instead of a stall.

use std::sync::{Arc, Mutex, TryLockError};

use crate::dsp::buffer::downmix_to_mono;
use crate::dsp::spectrum::SpectrumAnalyzer;
use crate::mixer::types::{RenderContext, SubmixId};

/// Receives every buffer a submix renders.
///
/// Called on the render thread. Implementations must not block for long and
/// must not assume a particular thread.
pub trait SubmixBufferListener: Send + Sync {
    fn on_new_submix_buffer(
        &self,
        owner: SubmixId,
        samples: &[f32],
        channels: usize,
        sample_rate: u32,
        audio_clock: f64,
    );
}

/// Audio captured between `start_recording` and `stop_recording`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedAudio {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl RecordedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }
}

#[derive(Debug, Default)]
struct Recording {
    active: bool,
    audio: RecordedAudio,
}

/// Cross-thread state of one submix.
#[derive(Default)]
pub struct SubmixShared {
    listeners: Mutex<Vec<Arc<dyn SubmixBufferListener>>>,
    recording: Mutex<Recording>,
    analyzer: Mutex<Option<SpectrumAnalyzer>>,
    envelope: Mutex<Vec<f32>>,
}

impl SubmixShared {
    pub fn add_listener(&self, listener: Arc<dyn SubmixBufferListener>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                listeners.push(listener);
            }
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SubmixBufferListener>) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Start capturing, discarding any previous capture. `reserve` samples
    /// are allocated up front.
    pub fn start_recording(&self, channels: usize, sample_rate: u32, reserve: usize) {
        if let Ok(mut recording) = self.recording.lock() {
            recording.active = true;
            recording.audio = RecordedAudio {
                samples: Vec::with_capacity(reserve),
                channels,
                sample_rate,
            };
        }
    }

    /// Stop capturing and hand the captured audio to the caller.
    pub fn stop_recording(&self) -> RecordedAudio {
        match self.recording.lock() {
            Ok(mut recording) => {
                recording.active = false;
                std::mem::take(&mut recording.audio)
            }
            Err(_) => RecordedAudio::default(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().map(|r| r.active).unwrap_or(false)
    }

    pub fn set_analyzer(&self, analyzer: Option<SpectrumAnalyzer>) {
        if let Ok(mut slot) = self.analyzer.lock() {
            *slot = analyzer;
        }
    }

    pub fn has_analyzer(&self) -> bool {
        self.analyzer.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    pub fn spectrum_magnitudes(&self) -> Option<Vec<f32>> {
        let analyzer = self.analyzer.lock().ok()?;
        analyzer.as_ref()?.magnitudes().map(|m| m.to_vec())
    }

    pub fn band_magnitude(&self, hz: f32) -> Option<f32> {
        let analyzer = self.analyzer.lock().ok()?;
        analyzer.as_ref().map(|a| a.band_magnitude(hz))
    }

    pub fn envelope_values(&self) -> Vec<f32> {
        self.envelope.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub(crate) fn clear_envelope(&self) {
        if let Ok(mut envelope) = self.envelope.lock() {
            envelope.clear();
        }
    }

    // Render-thread side.

    pub(crate) fn append_recording(&self, samples: &[f32]) {
        if let Ok(mut recording) = self.recording.lock() {
            if recording.active {
                recording.audio.samples.extend_from_slice(samples);
            }
        }
    }

    /// Feed the analyzer if it is enabled and free. Returns `false` when the
    /// analyzer was busy and this buffer was skipped.
    pub(crate) fn analyze(&self, samples: &[f32], channels: usize, mono: &mut Vec<f32>) -> bool {
        let mut guard = match self.analyzer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => return false,
        };
        let Some(analyzer) = guard.as_mut() else {
            return true;
        };
        downmix_to_mono(samples, channels, mono);
        analyzer.push_audio(mono);
        analyzer.perform_analysis_if_possible();
        true
    }

    pub(crate) fn publish_envelope(&self, values: &[f32]) {
        if let Ok(mut envelope) = self.envelope.lock() {
            envelope.clear();
            envelope.extend_from_slice(values);
        }
    }

    pub(crate) fn notify_listeners(&self, owner: SubmixId, samples: &[f32], ctx: &RenderContext) {
        let Ok(listeners) = self.listeners.lock() else {
            return;
        };
        for listener in listeners.iter() {
            listener.on_new_submix_buffer(
                owner,
                samples,
                ctx.channels,
                ctx.sample_rate,
                ctx.audio_clock,
            );
        }
    }
}

impl std::fmt::Debug for SubmixShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmixShared")
            .field("listeners", &self.listener_count())
            .field("recording", &self.is_recording())
            .field("analyzer", &self.has_analyzer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectrum::SpectrumSettings;
    use crate::mixer::types::RenderSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl SubmixBufferListener for Counter {
        fn on_new_submix_buffer(&self, _: SubmixId, samples: &[f32], _: usize, _: u32, _: f64) {
            self.0.fetch_add(samples.len(), Ordering::SeqCst);
        }
    }

    fn ctx() -> RenderContext {
        RenderContext {
            sample_rate: 48_000,
            channels: 2,
            frames: 2,
            audio_clock: 0.0,
            settings: RenderSettings::default(),
        }
    }

    #[test]
    fn listeners_register_once_and_unregister() {
        let shared = SubmixShared::default();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let listener: Arc<dyn SubmixBufferListener> = counter.clone();
        shared.add_listener(listener.clone());
        shared.add_listener(listener.clone());
        assert_eq!(shared.listener_count(), 1);

        shared.notify_listeners(SubmixId(1), &[0.0; 4], &ctx());
        assert_eq!(counter.0.load(Ordering::SeqCst), 4);

        assert!(shared.remove_listener(&listener));
        assert!(!shared.remove_listener(&listener));
    }

    #[test]
    fn recording_only_captures_while_active() {
        let shared = SubmixShared::default();
        shared.append_recording(&[1.0, 1.0]);
        shared.start_recording(2, 48_000, 16);
        shared.append_recording(&[0.5, -0.5]);
        let audio = shared.stop_recording();
        shared.append_recording(&[2.0, 2.0]);
        assert_eq!(audio.samples, vec![0.5, -0.5]);
        assert_eq!(audio.frames(), 1);
        assert!(!shared.is_recording());
    }

    #[test]
    fn busy_analyzer_skips_buffer() {
        let shared = SubmixShared::default();
        shared.set_analyzer(Some(SpectrumAnalyzer::new(SpectrumSettings::default(), 48_000)));
        let mut mono = Vec::new();
        let guard = shared.analyzer.lock().unwrap();
        assert!(!shared.analyze(&[0.0; 4], 2, &mut mono));
        drop(guard);
        assert!(shared.analyze(&[0.0; 4], 2, &mut mono));
    }
}
