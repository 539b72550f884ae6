//! # Test Session Module
//!
//! Ties the engine together: validates the configuration, builds the
//! timeline, renders it, starts continuous playback and scores responses as
//! they arrive. The front-end only starts and stops a [`Session`] and forwards
//! responses; it never looks at the schedule.
//!
//! ## Threads
//! - playback runs on the [`PlaybackEngine`] worker thread
//! - responses may arrive from any thread; scoring is serialized by one mutex
//!   and never waits on playback (the clock is lock-free)

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::HearingConfig;
use crate::correlate::{CorrelationStats, Correlator, ResponseEvent, ResponseOutcome, ScoredResult};
use crate::error::{ConfigWarning, Result};
use crate::playback::{self, OutputSink, PlaybackEngine, PlaybackOutcome, RenderSettings};
use crate::profile::{self, HearingProfile};
use crate::report::ResultDocument;
use crate::schedule::{self, Timeline};

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Running,
    /// Every segment and the tail played.
    Completed,
    /// Stopped on request before the end.
    Stopped,
    /// The output device failed; results are partial.
    Aborted(String),
}

/// Snapshot for progress displays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionProgress {
    pub position_s: f64,
    pub duration_s: f64,
    /// Played fraction in `[0, 1]`.
    pub fraction: f64,
    pub finished: bool,
}

/// Everything a finished session hands back.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub state: SessionState,
    /// One per stimulus, in schedule order.
    pub results: Vec<ScoredResult>,
    pub profile: HearingProfile,
    pub stats: CorrelationStats,
    pub seed: u64,
    pub warnings: Vec<ConfigWarning>,
    pub calibration_volume: f64,
    pub frequency_bands: Vec<f64>,
    pub intensity_levels: Vec<f64>,
}

impl SessionReport {
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Result document for storage, stamped with the current time.
    pub fn to_document(&self) -> ResultDocument {
        ResultDocument::from_results(
            &self.results,
            self.calibration_volume,
            self.frequency_bands.clone(),
            self.intensity_levels.clone(),
            self.is_complete(),
        )
    }
}

/// A running hearing test.
pub struct Session {
    config: HearingConfig,
    timeline: Arc<Timeline>,
    correlator: Mutex<Correlator>,
    engine: PlaybackEngine,
    seed: u64,
    warnings: Vec<ConfigWarning>,
}

impl Session {
    /// Validates, schedules, renders and starts playing a session.
    ///
    /// Everything that can be checked up front is checked before any audio
    /// plays: invalid parameters and a missing output device are returned
    /// as errors and no session exists.
    pub fn start<S: OutputSink>(config: HearingConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let seed = config.testing.seed.unwrap_or_else(rand::random);
        info!("[SESSION] Starting {:?} test with seed {}", config.testing.mode, seed);

        let timeline = Arc::new(schedule::build_schedule(
            &config,
            &mut StdRng::seed_from_u64(seed),
        )?);
        let (program, warnings) =
            playback::render_timeline(&timeline, &RenderSettings::from_config(&config))?;
        for warning in &warnings {
            warn!("[SESSION] {}", warning);
        }

        let testing = config.effective_testing();
        let correlator = Correlator::new(&timeline, testing.reaction_tolerance, testing.tie_break);

        let mut engine = PlaybackEngine::new();
        engine.start(Arc::new(program), sink)?;
        info!(
            "[SESSION] Playing {} tones over {:.1}s",
            timeline.stimulus_count(),
            timeline.duration_s()
        );

        Ok(Self {
            config,
            timeline,
            correlator: Mutex::new(correlator),
            engine,
            seed,
            warnings,
        })
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn config(&self) -> &HearingConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Position on the timeline clock, in seconds.
    pub fn position_s(&self) -> f64 {
        self.engine.current_position_s()
    }

    pub fn progress(&self) -> SessionProgress {
        let (position_s, duration_s, fraction) = match self.engine.clock() {
            Some(clock) => (clock.position_s(), clock.duration_s(), clock.progress()),
            None => (0.0, self.timeline.duration_s(), 0.0),
        };
        SessionProgress {
            position_s,
            duration_s,
            fraction,
            finished: self.engine.is_finished(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.engine.is_finished()
    }

    /// Scores a response that was timestamped by the caller.
    pub fn submit_response(&self, event: ResponseEvent) -> ResponseOutcome {
        lock(&self.correlator).on_response(&event)
    }

    /// Scores a response stamped with the current playback position.
    pub fn respond_now(&self) -> ResponseOutcome {
        self.submit_response(ResponseEvent::at(self.position_s()))
    }

    /// Stops playback promptly and finalizes whatever was gathered.
    /// Safe to call repeatedly and from any thread.
    pub fn stop(&self) -> SessionReport {
        let outcome = self.engine.stop();
        self.finish(outcome)
    }

    /// Waits for playback to end, then finalizes.
    pub fn wait(&self) -> SessionReport {
        let outcome = self.engine.wait();
        self.finish(outcome)
    }

    fn finish(&self, outcome: Option<PlaybackOutcome>) -> SessionReport {
        let state = match outcome {
            Some(PlaybackOutcome::Completed) => SessionState::Completed,
            Some(PlaybackOutcome::Stopped) => SessionState::Stopped,
            Some(PlaybackOutcome::Failed(reason)) => SessionState::Aborted(reason),
            None => SessionState::Stopped,
        };

        let (results, stats) = {
            let mut correlator = lock(&self.correlator);
            (correlator.finalize(), correlator.stats())
        };
        let complete = state == SessionState::Completed;
        if !complete {
            warn!("[SESSION] Session ended early ({:?}); results are partial", state);
        }

        let testing = self.config.effective_testing();
        SessionReport {
            profile: profile::aggregate(&results, complete),
            state,
            results,
            stats,
            seed: self.seed,
            warnings: self.warnings.clone(),
            calibration_volume: self.config.calibration_volume(),
            frequency_bands: schedule::frequency_bands(
                testing.min_frequency,
                testing.max_frequency,
                testing.frequency_bands,
            ),
            intensity_levels: testing.intensity_levels,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
