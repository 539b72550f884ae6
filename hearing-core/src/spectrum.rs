//! # Spectrum Diagnostics Module
//!
//! Offline frequency check for synthesized tones. Used by the `tone`
//! diagnostic to confirm what is about to be played and by tests to confirm
//! the synthesizer hits the requested pitch.
//!
//! ## Processing
//! - DC offset removal
//! - Hann windowing against spectral leakage
//! - forward FFT sized to the whole input
//! - peak picking with parabolic interpolation on log magnitudes

use rustfft::{FftPlanner, num_complex::Complex};

/// Makes the average value of the signal zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Tapers the buffer to zero at both edges.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Magnitudes of the positive-frequency half of the windowed spectrum.
/// Bin `k` sits at `k * sample_rate / signal.len()` Hz.
pub fn magnitude_spectrum(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mut processed = signal.to_vec();
    remove_dc_offset(&mut processed);
    apply_hann_window(&mut processed);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer: Vec<Complex<f32>> = processed
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();
    fft.process(&mut buffer);

    buffer.iter().take(n / 2).map(|c| c.norm()).collect()
}

/// Strongest frequency in a mono signal, in Hz.
///
/// Returns `None` for silence or a signal too short to analyse.
pub fn dominant_frequency(signal: &[f32], sample_rate: u32) -> Option<f32> {
    let magnitudes = magnitude_spectrum(signal);
    if magnitudes.len() < 3 {
        return None;
    }
    // Bin 0 is DC and carries nothing useful after offset removal.
    let (peak_bin, &peak) = magnitudes
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if peak <= f32::EPSILON {
        return None;
    }

    let bin_hz = sample_rate as f32 / signal.len() as f32;
    Some(interpolate_peak(&magnitudes, peak_bin) * bin_hz)
}

/// Fractional bin of a peak, from a parabola through the log magnitudes of
/// the peak and its two neighbours.
fn interpolate_peak(magnitudes: &[f32], peak_bin: usize) -> f32 {
    if peak_bin == 0 || peak_bin >= magnitudes.len() - 1 {
        return peak_bin as f32;
    }
    let y1 = magnitudes[peak_bin - 1].ln();
    let y2 = magnitudes[peak_bin].ln();
    let y3 = magnitudes[peak_bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return peak_bin as f32;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return peak_bin as f32;
    }
    peak_bin as f32 + (y3 - y1) / (2.0 * denominator)
}

/// Root mean square level of a signal.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{FadeShape, ToneRequest, synthesize};

    fn tone(frequency_hz: f64) -> Vec<f32> {
        let request = ToneRequest {
            frequency_hz,
            intensity: 1.0,
            duration_s: 0.5,
            fade_s: 0.01,
            fade_shape: FadeShape::Linear,
            calibration_volume: 0.5,
        };
        synthesize(&request, 44_100).unwrap().samples
    }

    #[test]
    fn finds_synthesized_pitch() {
        for target in [250.0, 1_000.0, 6_300.0] {
            let found = dominant_frequency(&tone(target), 44_100).unwrap();
            // Two bins at 0.5 s is 4 Hz.
            assert!(
                (found as f64 - target).abs() < 4.0,
                "expected ~{target} Hz, found {found} Hz"
            );
        }
    }

    #[test]
    fn silence_has_no_dominant_frequency() {
        assert_eq!(dominant_frequency(&vec![0.0; 4_096], 44_100), None);
        assert_eq!(dominant_frequency(&[], 44_100), None);
    }

    #[test]
    fn rms_of_full_scale_sine() {
        let samples: Vec<f32> = (0..44_100)
            .map(|i| (2.0 * std::f32::consts::PI * 441.0 * i as f32 / 44_100.0).sin())
            .collect();
        assert!((rms(&samples) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }
}
