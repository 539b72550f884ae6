//! # Hearing Profile Module
//!
//! Reduces scored results to one threshold per ear and frequency. The
//! threshold is the lowest intensity that was heard; inconsistent answers
//! (a louder tone missed while a quieter one was heard) are kept as data and
//! resolved only by that selection rule.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Ear;
use crate::correlate::ScoredResult;

/// Reported level for a frequency where nothing was heard.
pub const NOT_DETECTED_DB: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Threshold {
    /// Lowest intensity heard.
    Detected { intensity: f64 },
    /// Nothing heard within the tested range.
    NotDetected,
}

impl Threshold {
    pub fn intensity(&self) -> Option<f64> {
        match self {
            Threshold::Detected { intensity } => Some(*intensity),
            Threshold::NotDetected => None,
        }
    }

    /// Presentation scale: `-20 log10(intensity)`, floored at 0 dB.
    /// Larger means a louder tone was needed.
    pub fn relative_db(&self) -> f64 {
        match self {
            Threshold::Detected { intensity } => (-20.0 * intensity.log10()).max(0.0),
            Threshold::NotDetected => NOT_DETECTED_DB,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPoint {
    pub frequency_hz: f64,
    pub threshold: Threshold,
}

/// Threshold curve per ear, ascending in frequency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HearingProfile {
    pub ears: BTreeMap<Ear, Vec<ThresholdPoint>>,
    /// False when the session stopped before every stimulus played.
    pub complete: bool,
}

impl HearingProfile {
    pub fn ear(&self, ear: Ear) -> &[ThresholdPoint] {
        self.ears.get(&ear).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Threshold at an exact tested frequency.
    pub fn threshold(&self, ear: Ear, frequency_hz: f64) -> Option<Threshold> {
        self.ear(ear)
            .iter()
            .find(|p| p.frequency_hz == frequency_hz)
            .map(|p| p.threshold)
    }
}

/// Groups results by (ear, frequency) and selects each threshold.
pub fn aggregate(results: &[ScoredResult], complete: bool) -> HearingProfile {
    aggregate_outcomes(
        results.iter().map(|r| {
            (
                r.stimulus.ear,
                r.stimulus.frequency_hz,
                r.stimulus.intensity,
                r.heard,
            )
        }),
        complete,
    )
}

/// Same reduction over bare `(ear, frequency, intensity, heard)` tuples, as
/// found in a stored result document.
pub fn aggregate_outcomes<I>(outcomes: I, complete: bool) -> HearingProfile
where
    I: IntoIterator<Item = (Ear, f64, f64, bool)>,
{
    // Bit patterns of positive finite floats sort like the values themselves.
    let mut groups: BTreeMap<(Ear, u64), Option<f64>> = BTreeMap::new();
    for (ear, frequency_hz, intensity, heard) in outcomes {
        let lowest = groups.entry((ear, frequency_hz.to_bits())).or_insert(None);
        if heard {
            *lowest = Some(lowest.map_or(intensity, |current| current.min(intensity)));
        }
    }

    let mut ears: BTreeMap<Ear, Vec<ThresholdPoint>> = BTreeMap::new();
    for ((ear, bits), lowest) in groups {
        let threshold = match lowest {
            Some(intensity) => Threshold::Detected { intensity },
            None => Threshold::NotDetected,
        };
        ears.entry(ear).or_default().push(ThresholdPoint {
            frequency_hz: f64::from_bits(bits),
            threshold,
        });
    }
    HearingProfile { ears, complete }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_heard_intensity_wins_over_anomalies() {
        let outcomes = [
            (Ear::Left, 2_000.0, 0.1, false),
            (Ear::Left, 2_000.0, 0.3, true),
            (Ear::Left, 2_000.0, 0.6, false),
            (Ear::Left, 2_000.0, 1.0, true),
        ];
        let profile = aggregate_outcomes(outcomes, true);
        assert_eq!(
            profile.threshold(Ear::Left, 2_000.0),
            Some(Threshold::Detected { intensity: 0.3 })
        );
    }

    #[test]
    fn nothing_heard_is_not_detected() {
        let outcomes = [(Ear::Right, 8_000.0, 0.6, false), (Ear::Right, 8_000.0, 1.0, false)];
        let profile = aggregate_outcomes(outcomes, true);
        let threshold = profile.threshold(Ear::Right, 8_000.0).unwrap();
        assert_eq!(threshold, Threshold::NotDetected);
        assert_eq!(threshold.relative_db(), NOT_DETECTED_DB);
        assert!(profile.ear(Ear::Left).is_empty());
    }

    #[test]
    fn points_are_sorted_by_frequency() {
        let outcomes = [
            (Ear::Left, 4_000.0, 1.0, true),
            (Ear::Left, 125.0, 1.0, true),
            (Ear::Left, 1_000.0, 1.0, true),
        ];
        let profile = aggregate_outcomes(outcomes, false);
        let freqs: Vec<f64> = profile.ear(Ear::Left).iter().map(|p| p.frequency_hz).collect();
        assert_eq!(freqs, vec![125.0, 1_000.0, 4_000.0]);
        assert!(!profile.complete);
    }

    #[test]
    fn relative_db_scale() {
        assert_eq!(Threshold::Detected { intensity: 1.0 }.relative_db(), 0.0);
        let db = Threshold::Detected { intensity: 0.1 }.relative_db();
        assert!((db - 20.0).abs() < 1e-9);
    }
}
