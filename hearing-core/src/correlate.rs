//! # Response Correlation Module
//!
//! Credits each "I heard it" response to the stimulus it most plausibly
//! refers to. A stimulus is a candidate while the response time lies within
//! `[scheduled_start_s, scheduled_end_s + reaction_tolerance]`; when several
//! unscored candidates overlap, the configured [`TieBreak`] decides.
//!
//! Stray and repeated responses are not errors. They are returned as
//! [`ResponseOutcome`] variants and counted in [`CorrelationStats`].

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::schedule::{StimulusSpec, Timeline};

/// Which unscored candidate wins when tolerance windows overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The most recently started stimulus: a response refers to the last
    /// thing heard.
    #[default]
    MostRecent,
    /// The earliest started stimulus still waiting for a response.
    Earliest,
}

/// A listener response, timestamped on the playback clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseEvent {
    /// Position on the timeline clock when the response arrived.
    pub received_at_s: f64,
    pub wallclock: SystemTime,
}

impl ResponseEvent {
    pub fn at(received_at_s: f64) -> Self {
        Self {
            received_at_s,
            wallclock: SystemTime::now(),
        }
    }
}

/// Final verdict for one stimulus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub stimulus: StimulusSpec,
    pub heard: bool,
}

/// What happened to a single response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// The response was credited to this stimulus.
    Scored(ScoredResult),
    /// No stimulus window contains the response time.
    Unattributable,
    /// Every candidate was already credited; `sequence_index` names the most
    /// recent one.
    Duplicate { sequence_index: usize },
    /// Results were already finalized.
    AfterFinalize,
}

impl ResponseOutcome {
    pub fn scored(&self) -> Option<&ScoredResult> {
        match self {
            ResponseOutcome::Scored(result) => Some(result),
            _ => None,
        }
    }
}

/// Response accounting for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationStats {
    pub scored: usize,
    pub unattributable: usize,
    pub duplicates: usize,
    pub after_finalize: usize,
}

/// Scoring state for one session. Callers share it behind a single mutex.
#[derive(Debug)]
pub struct Correlator {
    /// Sorted by start time, which is also sequence order.
    stimuli: Vec<StimulusSpec>,
    heard: Vec<bool>,
    reaction_tolerance_s: f64,
    tie_break: TieBreak,
    stats: CorrelationStats,
    finalized: bool,
}

impl Correlator {
    pub fn new(timeline: &Timeline, reaction_tolerance_s: f64, tie_break: TieBreak) -> Self {
        let stimuli: Vec<StimulusSpec> = timeline.stimuli().cloned().collect();
        let heard = vec![false; stimuli.len()];
        Self {
            stimuli,
            heard,
            reaction_tolerance_s,
            tie_break,
            stats: CorrelationStats::default(),
            finalized: false,
        }
    }

    /// Scores a response against the schedule. Never blocks and never fails.
    pub fn on_response(&mut self, event: &ResponseEvent) -> ResponseOutcome {
        if self.finalized {
            self.stats.after_finalize += 1;
            debug!("[CORRELATE] response at {:.3}s after finalize", event.received_at_s);
            return ResponseOutcome::AfterFinalize;
        }

        let t = event.received_at_s;
        // Starts and ends both increase with index, so the candidates form a
        // contiguous run that ends just before the first stimulus starting after t.
        let upper = self.stimuli.partition_point(|s| s.scheduled_start_s <= t);
        let candidates: Vec<usize> = (0..upper)
            .rev()
            .take_while(|&i| self.stimuli[i].scheduled_end_s + self.reaction_tolerance_s >= t)
            .collect();

        let Some(&most_recent) = candidates.first() else {
            self.stats.unattributable += 1;
            info!("[CORRELATE] response at {t:.3}s matches no stimulus, discarded");
            return ResponseOutcome::Unattributable;
        };

        let mut unscored = candidates.iter().copied().filter(|&i| !self.heard[i]);
        let chosen = match self.tie_break {
            TieBreak::MostRecent => unscored.next(),
            TieBreak::Earliest => unscored.last(),
        };

        match chosen {
            Some(index) => {
                self.heard[index] = true;
                self.stats.scored += 1;
                let stimulus = &self.stimuli[index];
                debug!(
                    "[CORRELATE] response at {t:.3}s -> #{} {:.0} Hz @ {:.2} ({})",
                    stimulus.sequence_index, stimulus.frequency_hz, stimulus.intensity, stimulus.ear
                );
                ResponseOutcome::Scored(ScoredResult {
                    stimulus: stimulus.clone(),
                    heard: true,
                })
            }
            None => {
                self.stats.duplicates += 1;
                let sequence_index = self.stimuli[most_recent].sequence_index;
                debug!("[CORRELATE] duplicate response at {t:.3}s for #{sequence_index}");
                ResponseOutcome::Duplicate { sequence_index }
            }
        }
    }

    /// Closes scoring and returns exactly one result per stimulus, in
    /// schedule order. Stimuli never matched are reported as not heard.
    /// Calling it again returns the same results.
    pub fn finalize(&mut self) -> Vec<ScoredResult> {
        if !self.finalized {
            self.finalized = true;
            info!(
                "[CORRELATE] finalized: {}/{} heard, {} unattributable, {} duplicate",
                self.stats.scored,
                self.stimuli.len(),
                self.stats.unattributable,
                self.stats.duplicates
            );
        }
        self.stimuli
            .iter()
            .zip(&self.heard)
            .map(|(stimulus, &heard)| ScoredResult {
                stimulus: stimulus.clone(),
                heard,
            })
            .collect()
    }

    pub fn stats(&self) -> CorrelationStats {
        self.stats
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn stimulus_count(&self) -> usize {
        self.stimuli.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HearingConfig;
    use crate::schedule::build_schedule;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Two stimuli: #0 at [0, 0.33], #1 at [0.5, 0.83].
    fn two_tone_timeline() -> Timeline {
        let mut config = HearingConfig::default();
        config.testing.frequency_bands = 1;
        config.testing.min_frequency = 1_000.0;
        config.testing.max_frequency = 1_000.0;
        config.testing.intensity_levels = vec![1.0];
        config.testing.randomize_order = false;
        config.testing.inter_test_delay_range = [0.17, 0.17];
        build_schedule(&config, &mut StdRng::seed_from_u64(0)).unwrap()
    }

    fn scored_index(outcome: &ResponseOutcome) -> usize {
        outcome
            .scored()
            .map(|r| r.stimulus.sequence_index)
            .unwrap_or_else(|| panic!("expected a scored outcome, got {outcome:?}"))
    }

    #[test]
    fn overlapping_windows_prefer_most_recent() {
        let mut correlator = Correlator::new(&two_tone_timeline(), 1.0, TieBreak::MostRecent);
        let outcome = correlator.on_response(&ResponseEvent::at(0.6));
        assert_eq!(scored_index(&outcome), 1);

        // #1 is taken, so the next response in the overlap goes to #0.
        let outcome = correlator.on_response(&ResponseEvent::at(0.7));
        assert_eq!(scored_index(&outcome), 0);
    }

    #[test]
    fn earliest_tie_break_is_selectable() {
        let mut correlator = Correlator::new(&two_tone_timeline(), 1.0, TieBreak::Earliest);
        let outcome = correlator.on_response(&ResponseEvent::at(0.6));
        assert_eq!(scored_index(&outcome), 0);
    }

    #[test]
    fn second_response_to_same_stimulus_is_duplicate() {
        let mut correlator = Correlator::new(&two_tone_timeline(), 1.0, TieBreak::MostRecent);
        assert_eq!(scored_index(&correlator.on_response(&ResponseEvent::at(0.2))), 0);
        assert_eq!(
            correlator.on_response(&ResponseEvent::at(0.3)),
            ResponseOutcome::Duplicate { sequence_index: 0 }
        );
        assert_eq!(correlator.stats().duplicates, 1);
        assert_eq!(correlator.stats().scored, 1);
    }

    #[test]
    fn responses_outside_all_windows_are_unattributable() {
        let mut correlator = Correlator::new(&two_tone_timeline(), 1.0, TieBreak::MostRecent);
        assert_eq!(
            correlator.on_response(&ResponseEvent::at(-0.01)),
            ResponseOutcome::Unattributable
        );
        assert_eq!(
            correlator.on_response(&ResponseEvent::at(1.84)),
            ResponseOutcome::Unattributable
        );
        assert_eq!(correlator.stats().unattributable, 2);

        let results = correlator.finalize();
        assert!(results.iter().all(|r| !r.heard));
    }

    #[test]
    fn window_edges_are_inclusive() {
        let mut correlator = Correlator::new(&two_tone_timeline(), 0.1, TieBreak::MostRecent);
        assert_eq!(scored_index(&correlator.on_response(&ResponseEvent::at(0.0))), 0);
        // Inside #1's tolerance, which ends at 0.93.
        assert_eq!(scored_index(&correlator.on_response(&ResponseEvent::at(0.92))), 1);
        // Gap between #0's window (ends 0.43) and #1's start.
        assert_eq!(
            correlator.on_response(&ResponseEvent::at(0.45)),
            ResponseOutcome::Unattributable
        );
    }

    #[test]
    fn finalize_is_total_and_closes_scoring() {
        let timeline = two_tone_timeline();
        let mut correlator = Correlator::new(&timeline, 1.0, TieBreak::MostRecent);
        correlator.on_response(&ResponseEvent::at(0.1));
        let results = correlator.finalize();
        assert_eq!(results.len(), timeline.stimulus_count());
        assert_eq!(
            results.iter().map(|r| r.stimulus.sequence_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(results.iter().map(|r| r.heard).collect::<Vec<_>>(), vec![true, false]);

        assert_eq!(
            correlator.on_response(&ResponseEvent::at(0.6)),
            ResponseOutcome::AfterFinalize
        );
        assert_eq!(correlator.finalize(), results);
    }
}
