//! # Stimulus Scheduler Module
//!
//! Expands the testing grid (frequency bands × intensity levels × ears) into a
//! [`Timeline`]: the stimuli in presentation order with a randomized silence
//! gap between consecutive tones. The timeline is the single time axis shared
//! by playback and response correlation.
//!
//! Segment boundaries are quantized to whole sample frames, so a time read off
//! the timeline and a frame count read off the playback stream always agree.
//!
//! Randomness comes from an injected [`Rng`]; the same configuration and seed
//! always yield the same timeline.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Ear;
use crate::config::HearingConfig;
use crate::error::Result;

/// One scheduled test tone. Immutable once the timeline is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusSpec {
    pub frequency_hz: f64,
    pub intensity: f64,
    pub ear: Ear,
    pub duration_s: f64,
    pub scheduled_start_s: f64,
    pub scheduled_end_s: f64,
    /// Position in presentation order, unique within a timeline.
    pub sequence_index: usize,
}

/// A gap between two stimuli.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceSpec {
    pub duration_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Stimulus(StimulusSpec),
    Silence(SilenceSpec),
}

impl Segment {
    pub fn duration_s(&self) -> f64 {
        match self {
            Segment::Stimulus(stimulus) => stimulus.duration_s,
            Segment::Silence(silence) => silence.duration_s,
        }
    }

    /// Length of the segment in sample frames at `sample_rate`.
    pub fn frames(&self, sample_rate: u32) -> usize {
        (self.duration_s() * sample_rate as f64).round() as usize
    }
}

/// Contiguous, non-overlapping segments laid end to end from t = 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    segments: Vec<Segment>,
    sample_rate: u32,
    total_frames: u64,
}

impl Timeline {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn duration_s(&self) -> f64 {
        self.total_frames as f64 / self.sample_rate as f64
    }

    /// Stimuli in presentation order.
    pub fn stimuli(&self) -> impl Iterator<Item = &StimulusSpec> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Stimulus(stimulus) => Some(stimulus),
            Segment::Silence(_) => None,
        })
    }

    pub fn stimulus_count(&self) -> usize {
        self.stimuli().count()
    }

    pub fn silence_count(&self) -> usize {
        self.segments.len() - self.stimulus_count()
    }
}

/// Log-spaced band centres from `min_hz` to `max_hz` inclusive:
/// `f_i = min * (max / min)^(i / (bands - 1))`.
pub fn frequency_bands(min_hz: f64, max_hz: f64, bands: usize) -> Vec<f64> {
    match bands {
        0 => Vec::new(),
        1 => vec![min_hz],
        _ => {
            let ratio = max_hz / min_hz;
            let last = bands - 1;
            (0..bands)
                .map(|i| {
                    if i == last {
                        max_hz
                    } else {
                        min_hz * ratio.powf(i as f64 / last as f64)
                    }
                })
                .collect()
        }
    }
}

/// Builds the session timeline from the configuration.
///
/// Emits one stimulus per (frequency, intensity, ear), ordered by frequency,
/// then intensity as configured, then left before right, unless
/// `randomize_order` asks for a uniform shuffle. Each gap between stimuli is
/// drawn independently from `inter_test_delay_range`.
///
/// # Errors
/// Any [`crate::HearingError::InvalidParameter`] reported by
/// [`HearingConfig::validate`].
pub fn build_schedule<R: Rng + ?Sized>(config: &HearingConfig, rng: &mut R) -> Result<Timeline> {
    config.validate()?;
    let testing = config.effective_testing();
    let sample_rate = config.audio.sample_rate;
    let sr = sample_rate as f64;

    let bands = frequency_bands(
        testing.min_frequency,
        testing.max_frequency,
        testing.frequency_bands,
    );
    let mut grid = Vec::with_capacity(bands.len() * testing.intensity_levels.len() * 2);
    for &frequency_hz in &bands {
        for &intensity in &testing.intensity_levels {
            for ear in Ear::BOTH {
                grid.push((frequency_hz, intensity, ear));
            }
        }
    }
    if testing.randomize_order {
        grid.shuffle(rng);
    }

    let tone_frames = (config.audio.tone_duration * sr).round() as u64;
    let [gap_lo, gap_hi] = testing.inter_test_delay_range;
    let mut segments = Vec::with_capacity(grid.len() * 2);
    let mut cursor: u64 = 0;

    for (sequence_index, (frequency_hz, intensity, ear)) in grid.into_iter().enumerate() {
        if sequence_index > 0 {
            let gap_s = rng.random_range(gap_lo..=gap_hi);
            let gap_frames = (gap_s * sr).round() as u64;
            segments.push(Segment::Silence(SilenceSpec {
                duration_s: gap_frames as f64 / sr,
            }));
            cursor += gap_frames;
        }
        let start = cursor;
        cursor += tone_frames;
        segments.push(Segment::Stimulus(StimulusSpec {
            frequency_hz,
            intensity,
            ear,
            duration_s: tone_frames as f64 / sr,
            scheduled_start_s: start as f64 / sr,
            scheduled_end_s: cursor as f64 / sr,
            sequence_index,
        }));
    }

    let timeline = Timeline {
        segments,
        sample_rate,
        total_frames: cursor,
    };
    debug!(
        "[SCHEDULE] {} stimuli, {} gaps, {:.1}s",
        timeline.stimulus_count(),
        timeline.silence_count(),
        timeline.duration_s()
    );
    Ok(timeline)
}
