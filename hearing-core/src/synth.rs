//! # Tone Synthesizer Module
//!
//! Renders the sine bursts used as test stimuli. Intensity is mapped to
//! amplitude on a logarithmic scale so equal intensity steps sound like
//! roughly equal loudness steps, and every tone is faded in and out to keep
//! the onset and offset free of clicks.
//!
//! All functions here are pure: the calibration volume is an explicit input,
//! and the same request always produces bit-identical samples.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::HearingConfig;
use crate::error::{ConfigWarning, HearingError, Result};

/// Span of the intensity scale in decibels. Intensity 0.0+ sits 40 dB
/// (1 %) below the calibration volume, intensity 1.0 at it.
pub const DYNAMIC_RANGE_DB: f64 = 40.0;

/// Duration of the "just audible" reference tone.
const SOFTEST_TONE_SECONDS: f64 = 5.0;
/// Intensity of the "just audible" reference tone.
const SOFTEST_TONE_INTENSITY: f64 = 0.1;

/// Shape of the fade-in/fade-out ramps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FadeShape {
    #[default]
    Linear,
    RaisedCosine,
}

impl FadeShape {
    /// Gain for a ramp position `x` in `[0, 1]`.
    fn gain(self, x: f64) -> f64 {
        match self {
            FadeShape::Linear => x,
            FadeShape::RaisedCosine => 0.5 * (1.0 - (PI * x).cos()),
        }
    }
}

/// Everything needed to render one tone.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneRequest {
    pub frequency_hz: f64,
    /// Relative level in `[0, 1]`, mapped logarithmically.
    pub intensity: f64,
    pub duration_s: f64,
    pub fade_s: f64,
    pub fade_shape: FadeShape,
    /// Output level that intensity 1.0 corresponds to, in `[0, 1]`.
    pub calibration_volume: f64,
}

/// A rendered mono tone plus any corrections applied while rendering it.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub samples: Vec<f32>,
    pub warnings: Vec<ConfigWarning>,
}

/// Converts an intensity to decibels relative to the calibration volume.
pub fn intensity_to_db(intensity: f64) -> f64 {
    DYNAMIC_RANGE_DB * (intensity - 1.0)
}

/// Fraction of the calibration volume used for `intensity`.
///
/// * 1.0 → 1.0
/// * 0.6 → ≈0.158
/// * 0.3 → ≈0.040
/// * 0.1 → ≈0.016
/// * 0.0 → 0.0 (silence)
pub fn amplitude_ratio(intensity: f64) -> f64 {
    if intensity <= 0.0 {
        return 0.0;
    }
    10f64.powf(intensity_to_db(intensity) / 20.0)
}

/// Synthesizes a faded sine tone at `sample_rate`.
///
/// The buffer holds `round(duration_s * sample_rate)` samples. A fade longer
/// than half the tone is clamped and reported as a [`ConfigWarning`].
///
/// # Errors
/// [`HearingError::InvalidParameter`] when the frequency is not below the
/// Nyquist frequency, or any level or duration is out of range.
pub fn synthesize(request: &ToneRequest, sample_rate: u32) -> Result<Synthesized> {
    if !(request.intensity.is_finite() && (0.0..=1.0).contains(&request.intensity)) {
        return Err(HearingError::invalid(
            "intensity",
            format!("{} is outside [0, 1]", request.intensity),
        ));
    }
    check_volume(request.calibration_volume)?;
    let amplitude = request.calibration_volume * amplitude_ratio(request.intensity);
    render_sine(
        request.frequency_hz,
        amplitude,
        request.duration_s,
        request.fade_s,
        request.fade_shape,
        sample_rate,
    )
}

/// Renders the calibration reference at the raw volume, bypassing the
/// logarithmic intensity mapping. Used to pick a comfortable listening level.
pub fn calibration_tone(
    frequency_hz: f64,
    volume: f64,
    duration_s: f64,
    fade_s: f64,
    fade_shape: FadeShape,
    sample_rate: u32,
) -> Result<Synthesized> {
    check_volume(volume)?;
    render_sine(frequency_hz, volume, duration_s, fade_s, fade_shape, sample_rate)
}

/// The quietest grid level at the calibration frequency, held long enough
/// for the listener to judge whether it is just audible.
pub fn softest_reference_tone(config: &HearingConfig) -> Result<Synthesized> {
    let request = ToneRequest {
        frequency_hz: config.calibration.calibration_frequency,
        intensity: SOFTEST_TONE_INTENSITY,
        duration_s: SOFTEST_TONE_SECONDS,
        fade_s: config.audio.fade_duration,
        fade_shape: config.audio.fade_shape,
        calibration_volume: config.calibration_volume(),
    };
    synthesize(&request, config.audio.sample_rate)
}

fn check_volume(volume: f64) -> Result<()> {
    if volume.is_finite() && (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(HearingError::invalid(
            "calibration_volume",
            format!("{volume} is outside [0, 1]"),
        ))
    }
}

fn render_sine(
    frequency_hz: f64,
    amplitude: f64,
    duration_s: f64,
    fade_s: f64,
    fade_shape: FadeShape,
    sample_rate: u32,
) -> Result<Synthesized> {
    if sample_rate == 0 {
        return Err(HearingError::invalid("sample_rate", "must be positive"));
    }
    let sr = sample_rate as f64;
    let nyquist = sr / 2.0;
    if !(frequency_hz.is_finite() && frequency_hz > 0.0 && frequency_hz < nyquist) {
        return Err(HearingError::invalid(
            "frequency_hz",
            format!("{frequency_hz} Hz must be above 0 and below the Nyquist frequency {nyquist} Hz"),
        ));
    }
    if !(duration_s.is_finite() && duration_s > 0.0) {
        return Err(HearingError::invalid(
            "duration_s",
            format!("{duration_s} is not a positive duration"),
        ));
    }
    if !(fade_s.is_finite() && fade_s >= 0.0) {
        return Err(HearingError::invalid(
            "fade_s",
            format!("{fade_s} must be zero or positive"),
        ));
    }

    let mut warnings = Vec::new();
    let applied_fade = if fade_s > duration_s / 2.0 {
        let applied_s = duration_s / 2.0;
        warnings.push(ConfigWarning::FadeClamped {
            requested_s: fade_s,
            applied_s,
        });
        applied_s
    } else {
        fade_s
    };

    let len = (duration_s * sr).round() as usize;
    let fade_len = ((applied_fade * sr).round() as usize).min(len / 2);
    let omega = 2.0 * PI * frequency_hz / sr;

    let samples = (0..len)
        .map(|n| {
            let edge = n.min(len - 1 - n);
            let envelope = if edge < fade_len {
                fade_shape.gain(edge as f64 / fade_len as f64)
            } else {
                1.0
            };
            (amplitude * envelope * (omega * n as f64).sin()) as f32
        })
        .collect();

    Ok(Synthesized { samples, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(frequency_hz: f64, intensity: f64) -> ToneRequest {
        ToneRequest {
            frequency_hz,
            intensity,
            duration_s: 0.5,
            fade_s: 0.01,
            fade_shape: FadeShape::Linear,
            calibration_volume: 1.0,
        }
    }

    fn assert_ratio(intensity: f64, expected: f64) {
        let ratio = amplitude_ratio(intensity);
        assert!(
            (ratio - expected).abs() <= expected * 0.01,
            "intensity {intensity}: ratio {ratio}, expected {expected}"
        );
    }

    #[test]
    fn intensity_mapping_is_logarithmic() {
        assert_eq!(amplitude_ratio(1.0), 1.0);
        assert_ratio(0.1, 0.0158);
        assert_ratio(0.3, 0.0398);
        assert_ratio(0.6, 0.158);
        assert_eq!(amplitude_ratio(0.0), 0.0);
    }

    #[test]
    fn length_matches_duration() {
        let tone = synthesize(&request(1_000.0, 1.0), 44_100).unwrap();
        assert_eq!(tone.samples.len(), 22_050);

        let mut odd = request(1_000.0, 1.0);
        odd.duration_s = 0.33;
        let tone = synthesize(&odd, 44_100).unwrap();
        assert!((tone.samples.len() as f64 - 0.33 * 44_100.0).abs() <= 1.0);
    }

    #[test]
    fn midpoint_peak_matches_scaled_volume() {
        let mut req = request(1_000.0, 0.6);
        req.calibration_volume = 0.5;
        let tone = synthesize(&req, 44_100).unwrap();
        let mid = tone.samples.len() / 2;
        let peak = tone.samples[mid - 50..mid + 50]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        let expected = 0.5 * amplitude_ratio(0.6);
        assert!(
            ((peak as f64) - expected).abs() <= expected * 0.01,
            "peak {peak}, expected {expected}"
        );
    }

    #[test]
    fn envelope_starts_and_ends_silent() {
        for shape in [FadeShape::Linear, FadeShape::RaisedCosine] {
            let mut req = request(440.0, 1.0);
            req.fade_shape = shape;
            let tone = synthesize(&req, 48_000).unwrap();
            assert_eq!(tone.samples[0], 0.0);
            assert!(tone.samples.last().unwrap().abs() < 1e-3);
            assert!(tone.warnings.is_empty());
        }
    }

    #[test]
    fn oversized_fade_is_clamped_with_warning() {
        let mut req = request(1_000.0, 1.0);
        req.duration_s = 0.1;
        req.fade_s = 0.2;
        let tone = synthesize(&req, 44_100).unwrap();
        assert_eq!(
            tone.warnings,
            vec![ConfigWarning::FadeClamped {
                requested_s: 0.2,
                applied_s: 0.05
            }]
        );
        assert_eq!(tone.samples.len(), 4_410);
    }

    #[test]
    fn frequency_at_or_above_nyquist_is_rejected() {
        for freq in [22_050.0, 30_000.0] {
            let err = synthesize(&request(freq, 1.0), 44_100).unwrap_err();
            assert!(matches!(
                err,
                HearingError::InvalidParameter {
                    parameter: "frequency_hz",
                    ..
                }
            ));
        }
        assert!(synthesize(&request(22_000.0, 1.0), 44_100).is_ok());
    }

    #[test]
    fn out_of_range_inputs_are_rejected() {
        assert!(synthesize(&request(1_000.0, 1.2), 44_100).is_err());
        let mut req = request(1_000.0, 0.5);
        req.duration_s = 0.0;
        assert!(synthesize(&req, 44_100).is_err());
        let mut req = request(1_000.0, 0.5);
        req.calibration_volume = 2.0;
        assert!(synthesize(&req, 44_100).is_err());
    }

    #[test]
    fn output_is_deterministic() {
        let a = synthesize(&request(3_150.0, 0.3), 44_100).unwrap();
        let b = synthesize(&request(3_150.0, 0.3), 44_100).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn calibration_tone_uses_raw_volume() {
        let tone = calibration_tone(1_000.0, 0.4, 1.0, 0.01, FadeShape::Linear, 44_100).unwrap();
        let peak = tone.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 0.4).abs() < 0.005);
    }

    #[test]
    fn softest_tone_sits_at_one_tenth_intensity() {
        let config = HearingConfig::default();
        let tone = softest_reference_tone(&config).unwrap();
        assert_eq!(tone.samples.len(), 5 * 44_100);
        let peak = tone.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs())) as f64;
        let expected = 0.5 * amplitude_ratio(0.1);
        assert!((peak - expected).abs() <= expected * 0.01);
    }
}
