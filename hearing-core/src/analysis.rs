//! # Hearing Analysis Module
//!
//! Screening-level interpretation of a [`HearingProfile`]: overall
//! classification per ear, high-frequency loss, left/right asymmetry and an
//! optional comparison against typical thresholds for the listener's age.
//! All levels are on the relative dB scale of [`crate::profile::Threshold::relative_db`],
//! which is not calibrated dB HL.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::Ear;
use crate::profile::HearingProfile;

/// Frequencies at or above this count toward high-frequency loss.
pub const HIGH_FREQUENCY_HZ: f64 = 4_000.0;

/// Typical thresholds (dB) by age group at the standard audiometric
/// frequencies.
static AGE_NORMS: Lazy<BTreeMap<u32, [(f64, f64); 7]>> = Lazy::new(|| {
    let freqs = [125.0, 250.0, 500.0, 1_000.0, 2_000.0, 4_000.0, 8_000.0];
    let table: [(u32, [f64; 7]); 6] = [
        (20, [5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 10.0]),
        (30, [5.0, 5.0, 5.0, 5.0, 10.0, 15.0, 20.0]),
        (40, [5.0, 5.0, 5.0, 10.0, 15.0, 25.0, 30.0]),
        (50, [10.0, 10.0, 10.0, 15.0, 20.0, 35.0, 40.0]),
        (60, [15.0, 15.0, 15.0, 20.0, 30.0, 45.0, 50.0]),
        (70, [20.0, 20.0, 20.0, 25.0, 35.0, 55.0, 60.0]),
    ];
    table
        .into_iter()
        .map(|(age, levels)| (age, std::array::from_fn(|i| (freqs[i], levels[i]))))
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    Mild,
    Moderate,
    Severe,
    Profound,
    /// No data for this ear.
    Unknown,
}

impl Classification {
    pub fn from_average_db(average_db: Option<f64>) -> Self {
        match average_db {
            None => Classification::Unknown,
            Some(db) if db <= 15.0 => Classification::Normal,
            Some(db) if db <= 25.0 => Classification::Mild,
            Some(db) if db <= 40.0 => Classification::Moderate,
            Some(db) if db <= 70.0 => Classification::Severe,
            Some(_) => Classification::Profound,
        }
    }

    fn needs_referral(self) -> bool {
        matches!(self, Classification::Moderate | Classification::Severe)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Normal => "normal hearing",
            Classification::Mild => "mild hearing loss",
            Classification::Moderate => "moderate hearing loss",
            Classification::Severe => "severe hearing loss",
            Classification::Profound => "profound hearing loss",
            Classification::Unknown => "no data",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Mild,
    Moderate,
    Severe,
    /// No tested frequency reaches the high band.
    Unknown,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Normal => "normal",
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HighFrequencyLoss {
    pub severity: Severity,
    pub average_db: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarAnalysis {
    pub frequencies: Vec<f64>,
    pub thresholds_db: Vec<f64>,
    pub average_db: Option<f64>,
    pub high_frequency_loss: HighFrequencyLoss,
    pub classification: Classification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Asymmetry {
    Symmetrical,
    Mild,
    Significant,
}

impl fmt::Display for Asymmetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Asymmetry::Symmetrical => "symmetrical",
            Asymmetry::Mild => "mild asymmetry",
            Asymmetry::Significant => "significant asymmetry",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EarComparison {
    pub asymmetry: Asymmetry,
    pub difference_db: f64,
    pub better_ear: Ear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeAssessment {
    WithinNorms,
    SlightlyWorse,
    SignificantlyWorse,
}

impl fmt::Display for AgeAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgeAssessment::WithinNorms => "within normal limits for age",
            AgeAssessment::SlightlyWorse => "slightly worse than age norms",
            AgeAssessment::SignificantlyWorse => "significantly worse than age norms",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgeComparison {
    pub average_deviation_db: f64,
    pub assessment: AgeAssessment,
    /// The norm table row that was used.
    pub reference_age: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HearingAnalysis {
    pub ears: BTreeMap<Ear, EarAnalysis>,
    pub comparison: Option<EarComparison>,
    pub age_comparison: BTreeMap<Ear, AgeComparison>,
    pub recommendations: Vec<String>,
}

impl HearingAnalysis {
    pub fn ear(&self, ear: Ear) -> Option<&EarAnalysis> {
        self.ears.get(&ear)
    }
}

/// Interprets a profile, comparing against age norms when `age` is given.
pub fn analyse(profile: &HearingProfile, age: Option<u32>) -> HearingAnalysis {
    let ears: BTreeMap<Ear, EarAnalysis> = Ear::BOTH
        .iter()
        .map(|&ear| (ear, analyse_ear(profile, ear)))
        .collect();

    let comparison = compare_ears(&ears[&Ear::Left], &ears[&Ear::Right]);
    let age_comparison = match age {
        Some(age) => ears
            .iter()
            .filter_map(|(&ear, analysis)| compare_to_age(analysis, age).map(|c| (ear, c)))
            .collect(),
        None => BTreeMap::new(),
    };
    let recommendations = recommendations(&ears, comparison.as_ref());

    HearingAnalysis {
        ears,
        comparison,
        age_comparison,
        recommendations,
    }
}

fn analyse_ear(profile: &HearingProfile, ear: Ear) -> EarAnalysis {
    let points = profile.ear(ear);
    let frequencies: Vec<f64> = points.iter().map(|p| p.frequency_hz).collect();
    let thresholds_db: Vec<f64> = points.iter().map(|p| p.threshold.relative_db()).collect();
    let average_db = mean(thresholds_db.iter().copied());

    let high_average = mean(
        frequencies
            .iter()
            .zip(&thresholds_db)
            .filter(|&(&f, _)| f >= HIGH_FREQUENCY_HZ)
            .map(|(_, &db)| db),
    );
    let severity = match high_average {
        None => Severity::Unknown,
        Some(db) if db < 15.0 => Severity::Normal,
        Some(db) if db < 25.0 => Severity::Mild,
        Some(db) if db < 40.0 => Severity::Moderate,
        Some(_) => Severity::Severe,
    };

    EarAnalysis {
        frequencies,
        thresholds_db,
        average_db,
        high_frequency_loss: HighFrequencyLoss {
            severity,
            average_db: high_average,
        },
        classification: Classification::from_average_db(average_db),
    }
}

fn compare_ears(left: &EarAnalysis, right: &EarAnalysis) -> Option<EarComparison> {
    let (left_db, right_db) = (left.average_db?, right.average_db?);
    let difference_db = (left_db - right_db).abs();
    let asymmetry = if difference_db < 5.0 {
        Asymmetry::Symmetrical
    } else if difference_db < 15.0 {
        Asymmetry::Mild
    } else {
        Asymmetry::Significant
    };
    let better_ear = if left_db < right_db { Ear::Left } else { Ear::Right };
    Some(EarComparison {
        asymmetry,
        difference_db,
        better_ear,
    })
}

fn compare_to_age(analysis: &EarAnalysis, age: u32) -> Option<AgeComparison> {
    // Ties go to the younger group.
    let (&reference_age, norms) = AGE_NORMS
        .iter()
        .min_by_key(|&(&group, _)| group.abs_diff(age))?;

    let deviations = analysis
        .frequencies
        .iter()
        .zip(&analysis.thresholds_db)
        .filter_map(|(&frequency, &db)| {
            norms
                .iter()
                .min_by(|a, b| (a.0 - frequency).abs().total_cmp(&(b.0 - frequency).abs()))
                .map(|&(_, norm_db)| db - norm_db)
        });
    let average_deviation_db = mean(deviations)?;

    let assessment = if average_deviation_db < 5.0 {
        AgeAssessment::WithinNorms
    } else if average_deviation_db < 15.0 {
        AgeAssessment::SlightlyWorse
    } else {
        AgeAssessment::SignificantlyWorse
    };
    Some(AgeComparison {
        average_deviation_db,
        assessment,
        reference_age,
    })
}

fn recommendations(ears: &BTreeMap<Ear, EarAnalysis>, comparison: Option<&EarComparison>) -> Vec<String> {
    let mut out = Vec::new();

    for (ear, analysis) in ears {
        if analysis.classification.needs_referral() {
            out.push(format!(
                "Consider consulting an audiologist about {} in your {ear} ear",
                analysis.classification
            ));
        }
    }
    if comparison.is_some_and(|c| c.asymmetry == Asymmetry::Significant) {
        out.push(
            "Significant hearing difference between ears detected. Consider professional evaluation."
                .to_string(),
        );
    }
    for (ear, analysis) in ears {
        if matches!(
            analysis.high_frequency_loss.severity,
            Severity::Moderate | Severity::Severe
        ) {
            out.push(format!(
                "High-frequency hearing loss detected in {ear} ear. \
                 This may affect speech understanding in noisy environments."
            ));
        }
    }

    if out.is_empty() {
        out.push("Your hearing appears to be within normal ranges.".to_string());
    }
    out.push("Regular hearing checks are recommended, especially if you notice changes.".to_string());
    out
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::aggregate_outcomes;
    use pretty_assertions::assert_eq;

    /// 0.1 -> 20 dB, 0.3 -> ~10.5 dB, 1.0 -> 0 dB, miss -> 60 dB.
    fn profile(left: &[(f64, Option<f64>)], right: &[(f64, Option<f64>)]) -> HearingProfile {
        let mut outcomes = Vec::new();
        for (ear, points) in [(Ear::Left, left), (Ear::Right, right)] {
            for &(frequency, heard_at) in points {
                match heard_at {
                    Some(intensity) => outcomes.push((ear, frequency, intensity, true)),
                    None => outcomes.push((ear, frequency, 1.0, false)),
                }
            }
        }
        aggregate_outcomes(outcomes, true)
    }

    #[test]
    fn good_hearing_is_normal_and_symmetrical() {
        let points = [(500.0, Some(1.0)), (1_000.0, Some(1.0)), (4_000.0, Some(1.0))];
        let analysis = analyse(&profile(&points, &points), None);

        let left = analysis.ear(Ear::Left).unwrap();
        assert_eq!(left.classification, Classification::Normal);
        assert_eq!(left.high_frequency_loss.severity, Severity::Normal);
        let comparison = analysis.comparison.unwrap();
        assert_eq!(comparison.asymmetry, Asymmetry::Symmetrical);
        assert_eq!(comparison.better_ear, Ear::Right);
        assert_eq!(
            analysis.recommendations,
            vec![
                "Your hearing appears to be within normal ranges.".to_string(),
                "Regular hearing checks are recommended, especially if you notice changes.".to_string(),
            ]
        );
        assert!(analysis.age_comparison.is_empty());
    }

    #[test]
    fn missed_high_tones_in_one_ear_are_flagged() {
        let left = [(1_000.0, Some(1.0)), (4_000.0, None), (8_000.0, None)];
        let right = [(1_000.0, Some(1.0)), (4_000.0, Some(1.0)), (8_000.0, Some(1.0))];
        let analysis = analyse(&profile(&left, &right), None);

        let left = analysis.ear(Ear::Left).unwrap();
        assert_eq!(left.average_db, Some(40.0));
        assert_eq!(left.classification, Classification::Moderate);
        assert_eq!(left.high_frequency_loss.severity, Severity::Severe);

        let comparison = analysis.comparison.unwrap();
        assert_eq!(comparison.asymmetry, Asymmetry::Significant);
        assert_eq!(comparison.better_ear, Ear::Right);

        let recs = &analysis.recommendations;
        assert_eq!(recs.len(), 4);
        assert!(recs[0].contains("moderate hearing loss in your left ear"));
        assert!(recs[1].starts_with("Significant hearing difference"));
        assert!(recs[2].contains("left ear"));
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(Classification::from_average_db(Some(15.0)), Classification::Normal);
        assert_eq!(Classification::from_average_db(Some(25.0)), Classification::Mild);
        assert_eq!(Classification::from_average_db(Some(40.0)), Classification::Moderate);
        assert_eq!(Classification::from_average_db(Some(60.0)), Classification::Severe);
        assert_eq!(Classification::from_average_db(Some(70.1)), Classification::Profound);
        assert_eq!(Classification::from_average_db(None), Classification::Unknown);
    }

    #[test]
    fn age_norms_use_closest_group_and_frequency() {
        // 20 dB everywhere.
        let points = [(1_000.0, Some(0.1)), (7_500.0, Some(0.1))];
        let analysis = analyse(&profile(&points, &points), Some(63));

        let left = analysis.age_comparison[&Ear::Left];
        assert_eq!(left.reference_age, 60);
        // (20 - 20) at 1 kHz, (20 - 50) at the 8 kHz norm.
        assert!((left.average_deviation_db - -15.0).abs() < 1e-9);
        assert_eq!(left.assessment, AgeAssessment::WithinNorms);

        let young = analyse(&profile(&points, &points), Some(25));
        assert_eq!(young.age_comparison[&Ear::Right].reference_age, 20);
        assert_eq!(young.age_comparison[&Ear::Right].assessment, AgeAssessment::SlightlyWorse);
    }

    #[test]
    fn empty_ear_is_unknown() {
        let analysis = analyse(&profile(&[(1_000.0, Some(1.0))], &[]), Some(40));
        let right = analysis.ear(Ear::Right).unwrap();
        assert_eq!(right.classification, Classification::Unknown);
        assert_eq!(right.high_frequency_loss.severity, Severity::Unknown);
        assert!(analysis.comparison.is_none());
        assert!(!analysis.age_comparison.contains_key(&Ear::Right));
    }
}
