//! # Result Document Module
//!
//! The JSON shape results are stored in. Frequencies are keyed by their
//! decimal string so the document stays readable and diffable; the profile
//! can be rebuilt from a document without replaying a session.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};

use crate::Ear;
use crate::correlate::ScoredResult;
use crate::error::{HearingError, Result};
use crate::profile::{self, HearingProfile};

/// One presentation of a tone and whether it was heard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityOutcome {
    pub intensity: f64,
    pub heard: bool,
}

/// Per-ear map from frequency key to outcomes, ascending in intensity.
pub type EarResults = BTreeMap<String, Vec<IntensityOutcome>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub timestamp: String,
    #[serde(default = "ResultDocument::default_calibration_volume")]
    pub calibration_volume: f64,
    #[serde(default)]
    pub frequency_bands: Vec<f64>,
    #[serde(default)]
    pub intensity_levels: Vec<f64>,
    /// Frequency keys are written in ascending numeric order.
    #[serde(default, serialize_with = "serialize_by_frequency")]
    pub results: BTreeMap<Ear, EarResults>,
    /// Documents written before this field existed were always complete.
    #[serde(default = "ResultDocument::default_complete")]
    pub complete: bool,
}

impl ResultDocument {
    fn default_calibration_volume() -> f64 {
        0.5
    }
    fn default_complete() -> bool {
        true
    }

    /// Builds a document from finalized results, stamped with the local time.
    pub fn from_results(
        results: &[ScoredResult],
        calibration_volume: f64,
        frequency_bands: Vec<f64>,
        intensity_levels: Vec<f64>,
        complete: bool,
    ) -> Self {
        let mut by_ear: BTreeMap<Ear, EarResults> =
            Ear::BOTH.iter().map(|&ear| (ear, EarResults::new())).collect();
        for result in results {
            let stimulus = &result.stimulus;
            by_ear
                .entry(stimulus.ear)
                .or_default()
                .entry(frequency_key(stimulus.frequency_hz))
                .or_default()
                .push(IntensityOutcome {
                    intensity: stimulus.intensity,
                    heard: result.heard,
                });
        }
        for outcomes in by_ear.values_mut().flat_map(|ear| ear.values_mut()) {
            outcomes.sort_by(|a, b| a.intensity.total_cmp(&b.intensity));
        }

        Self {
            timestamp: Local::now().to_rfc3339(),
            calibration_volume,
            frequency_bands,
            intensity_levels,
            results: by_ear,
            complete,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses the timestamp. Accepts RFC 3339 and offset-less ISO 8601,
    /// which is read as local time.
    pub fn recorded_at(&self) -> Option<DateTime<FixedOffset>> {
        if let Ok(stamp) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(stamp);
        }
        let naive = NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        naive
            .and_local_timezone(Local)
            .single()
            .map(|local| local.fixed_offset())
    }

    /// Rebuilds the threshold profile from the stored outcomes.
    ///
    /// # Errors
    /// [`HearingError::InvalidParameter`] when a frequency key is not a number.
    pub fn to_profile(&self) -> Result<HearingProfile> {
        let mut outcomes = Vec::new();
        for (&ear, frequencies) in &self.results {
            for (key, entries) in frequencies {
                let frequency_hz = parse_frequency_key(key)?;
                outcomes.extend(
                    entries
                        .iter()
                        .map(|o| (ear, frequency_hz, o.intensity, o.heard)),
                );
            }
        }
        Ok(profile::aggregate_outcomes(outcomes, self.complete))
    }

    /// Number of stored outcomes across both ears.
    pub fn outcome_count(&self) -> usize {
        self.results
            .values()
            .flat_map(|ear| ear.values())
            .map(Vec::len)
            .sum()
    }
}

/// Shortest decimal form that parses back to the same value.
fn frequency_key(frequency_hz: f64) -> String {
    format!("{frequency_hz}")
}

/// Per-ear view that writes its entries lowest frequency first. Keys that
/// are not numbers go last, in string order.
struct ByFrequency<'a>(&'a EarResults);

impl Serialize for ByFrequency<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut entries: Vec<_> = self
            .0
            .iter()
            .map(|(key, outcomes)| (key.trim().parse::<f64>().ok(), key, outcomes))
            .collect();
        entries.sort_by(|a, b| match (a.0, b.0) {
            (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.1.cmp(b.1)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.1.cmp(b.1),
        });
        serializer.collect_map(entries.into_iter().map(|(_, key, outcomes)| (key, outcomes)))
    }
}

fn serialize_by_frequency<S: Serializer>(
    results: &BTreeMap<Ear, EarResults>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(results.iter().map(|(ear, frequencies)| (ear, ByFrequency(frequencies))))
}

fn parse_frequency_key(key: &str) -> Result<f64> {
    key.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f > 0.0)
        .ok_or_else(|| HearingError::invalid("results", format!("`{key}` is not a frequency")))
}
