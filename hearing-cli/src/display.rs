//! Plain-text rendering of profiles and analyses for the terminal.

use std::fmt::Write;

use hearing_core::Ear;
use hearing_core::analysis::HearingAnalysis;
use hearing_core::profile::{HearingProfile, Threshold};
use hearing_core::session::SessionReport;

pub fn profile_table(profile: &HearingProfile) -> String {
    let mut out = String::new();
    for ear in Ear::BOTH {
        let _ = writeln!(out, "{} ear:", capitalize(ear.as_str()));
        let points = profile.ear(ear);
        if points.is_empty() {
            let _ = writeln!(out, "  (no data)");
        }
        for point in points {
            let level = match point.threshold {
                Threshold::Detected { intensity } => format!("heard at {intensity:.2}"),
                Threshold::NotDetected => "not heard".to_string(),
            };
            let _ = writeln!(
                out,
                "  {:>8.0} Hz  {:<14} {:>5.1} dB",
                point.frequency_hz,
                level,
                point.threshold.relative_db()
            );
        }
    }
    if !profile.complete {
        let _ = writeln!(out, "(partial: the test ended early)");
    }
    out
}

pub fn session_summary(report: &SessionReport) -> String {
    let heard = report.results.iter().filter(|r| r.heard).count();
    format!(
        "Session {:?}: {heard}/{} tones heard, {} stray and {} repeated responses (seed {})",
        report.state,
        report.results.len(),
        report.stats.unattributable,
        report.stats.duplicates,
        report.seed
    )
}

pub fn analysis_report(analysis: &HearingAnalysis) -> String {
    let mut out = String::from("Hearing Analysis Results\n");
    out.push_str(&"=".repeat(40));
    out.push('\n');

    for (ear, ear_analysis) in &analysis.ears {
        let _ = writeln!(out, "\n{} ear:", capitalize(ear.as_str()));
        let _ = writeln!(out, "  Classification: {}", ear_analysis.classification);
        match ear_analysis.average_db {
            Some(db) => {
                let _ = writeln!(out, "  Average threshold: {db:.1} dB");
            }
            None => {
                let _ = writeln!(out, "  Average threshold: n/a");
            }
        }
        let _ = writeln!(
            out,
            "  High-frequency loss: {}",
            ear_analysis.high_frequency_loss.severity
        );
        if let Some(age) = analysis.age_comparison.get(ear) {
            let _ = writeln!(
                out,
                "  Age comparison: {} ({:+.1} dB vs. age {})",
                age.assessment, age.average_deviation_db, age.reference_age
            );
        }
    }

    if let Some(comparison) = &analysis.comparison {
        let _ = writeln!(
            out,
            "\nEar comparison: {} ({:.1} dB, better ear: {})",
            comparison.asymmetry, comparison.difference_db, comparison.better_ear
        );
    }

    out.push_str("\nRecommendations:\n");
    for (i, rec) in analysis.recommendations.iter().enumerate() {
        let _ = writeln!(out, "  {}. {rec}", i + 1);
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
