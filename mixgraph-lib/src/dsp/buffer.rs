//! Interleaved buffer arithmetic used by the mixing path.
//!
//! All helpers work in place on caller-owned slices so the render thread never
//! allocates. Length mismatches are tolerated by processing the overlapping
//! prefix.

/// Gains closer than this are treated as equal.
pub const GAIN_EPSILON: f32 = 1.0e-6;

pub fn nearly_equal(a: f32, b: f32) -> bool {
    (a - b).abs() <= GAIN_EPSILON
}

pub fn nearly_zero(a: f32) -> bool {
    a.abs() <= GAIN_EPSILON
}

/// `dst += src`
pub fn mix_in(src: &[f32], dst: &mut [f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}

/// `dst += src * gain`
pub fn mix_in_scaled(src: &[f32], dst: &mut [f32], gain: f32) {
    if nearly_zero(gain) {
        return;
    }
    if nearly_equal(gain, 1.0) {
        mix_in(src, dst);
        return;
    }
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s * gain;
    }
}

/// `dst += src * g(frame)` where `g` ramps linearly from `start` toward `end`
/// across the frames of the buffer.
pub fn mix_in_faded(src: &[f32], dst: &mut [f32], start: f32, end: f32, channels: usize) {
    if nearly_equal(start, end) {
        mix_in_scaled(src, dst, start);
        return;
    }
    let channels = channels.max(1);
    let frames = dst.len().min(src.len()) / channels;
    if frames == 0 {
        return;
    }
    let step = (end - start) / frames as f32;
    let mut gain = start;
    for (d, s) in dst.chunks_mut(channels).zip(src.chunks(channels)) {
        for (d, s) in d.iter_mut().zip(s) {
            *d += *s * gain;
        }
        gain += step;
    }
}

/// `buf *= gain`
pub fn multiply_in_place(buf: &mut [f32], gain: f32) {
    if nearly_equal(gain, 1.0) {
        return;
    }
    if nearly_zero(gain) {
        buf.fill(0.0);
        return;
    }
    for sample in buf.iter_mut() {
        *sample *= gain;
    }
}

/// Apply a per-frame linear gain ramp from `start` toward `end`.
pub fn fade_in_place(buf: &mut [f32], start: f32, end: f32, channels: usize) {
    if nearly_equal(start, end) {
        multiply_in_place(buf, start);
        return;
    }
    let channels = channels.max(1);
    let frames = buf.len() / channels;
    if frames == 0 {
        return;
    }
    let step = (end - start) / frames as f32;
    let mut gain = start;
    for frame in buf.chunks_mut(channels) {
        for sample in frame.iter_mut() {
            *sample *= gain;
        }
        gain += step;
    }
}

pub fn clamp_in_place(buf: &mut [f32], min: f32, max: f32) {
    for sample in buf.iter_mut() {
        *sample = sample.clamp(min, max);
    }
}

/// Average each frame's channels into `mono`, which is cleared first.
///
/// `mono` keeps its capacity between calls.
pub fn downmix_to_mono(src: &[f32], channels: usize, mono: &mut Vec<f32>) {
    mono.clear();
    let channels = channels.max(1);
    let scale = 1.0 / channels as f32;
    mono.extend(
        src.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Resize `buf` to `len` samples of silence. Only allocates when `len`
/// exceeds the buffer's capacity.
pub fn reset_to_silence(buf: &mut Vec<f32>, len: usize) {
    buf.clear();
    buf.resize(len, 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_in_scaled_adds_weighted_source() {
        let mut dst = vec![1.0_f32, 1.0];
        mix_in_scaled(&[0.5, -0.5], &mut dst, 2.0);
        assert_eq!(dst, vec![2.0, 0.0]);
    }

    #[test]
    fn mix_in_tolerates_length_mismatch() {
        let mut dst = vec![0.0_f32; 3];
        mix_in(&[1.0, 1.0], &mut dst);
        assert_eq!(dst, vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn fade_ramps_per_frame() {
        let mut buf = vec![1.0_f32; 8];
        fade_in_place(&mut buf, 0.0, 1.0, 2);
        assert_eq!(buf, vec![0.0, 0.0, 0.25, 0.25, 0.5, 0.5, 0.75, 0.75]);
    }

    #[test]
    fn faded_mix_matches_fade_then_mix() {
        let src: Vec<f32> = (0..16).map(|i| (i as f32 * 0.3).sin()).collect();
        let mut expected = src.clone();
        fade_in_place(&mut expected, 0.2, 0.9, 2);

        let mut dst = vec![0.0_f32; 16];
        mix_in_faded(&src, &mut dst, 0.2, 0.9, 2);
        for (a, b) in dst.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn multiply_by_zero_silences() {
        let mut buf = vec![0.7_f32, -0.2];
        multiply_in_place(&mut buf, 0.0);
        assert_eq!(buf, vec![0.0, 0.0]);
    }

    #[test]
    fn downmix_averages_frames() {
        let mut mono = Vec::with_capacity(2);
        downmix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2, &mut mono);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[1.0_f32; 10]);
        reset_to_silence(&mut buf, 32);
        assert_eq!(buf.len(), 32);
        assert!(buf.iter().all(|s| *s == 0.0));
        assert!(buf.capacity() >= 64);
    }
}
