//! # Configuration Module
//!
//! Serde structures for the `audio`, `testing` and `calibration` sections.
//! Every field carries a default so partial documents (or none at all) load
//! cleanly; validation is a separate step run before a session starts.

use serde::{Deserialize, Serialize};

use crate::correlate::TieBreak;
use crate::error::{HearingError, Result};
use crate::synth::FadeShape;

/// Trailing silence in seconds when `audio.tail_duration` is unset.
pub const DEFAULT_TAIL_DURATION: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,
    /// Length of each test tone in seconds.
    #[serde(default = "AudioConfig::default_tone_duration")]
    pub tone_duration: f64,
    #[serde(default = "AudioConfig::default_fade_duration")]
    pub fade_duration: f64,
    #[serde(default)]
    pub fade_shape: FadeShape,
    /// Silence played after the last tone. Defaults to
    /// [`DEFAULT_TAIL_DURATION`], stretched to the reaction tolerance if longer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail_duration: Option<f64>,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        44_100
    }
    fn default_tone_duration() -> f64 {
        0.33
    }
    fn default_fade_duration() -> f64 {
        0.01
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            tone_duration: Self::default_tone_duration(),
            fade_duration: Self::default_fade_duration(),
            fade_shape: FadeShape::default(),
            tail_duration: None,
        }
    }
}

/// Which stimulus grid a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestMode {
    /// 8 bands between 250 Hz and 8 kHz at three levels, about two minutes.
    Quick,
    /// The configured grid.
    #[default]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestingConfig {
    #[serde(default = "TestingConfig::default_frequency_bands")]
    pub frequency_bands: usize,
    #[serde(default = "TestingConfig::default_min_frequency")]
    pub min_frequency: f64,
    #[serde(default = "TestingConfig::default_max_frequency")]
    pub max_frequency: f64,
    #[serde(default = "TestingConfig::default_intensity_levels")]
    pub intensity_levels: Vec<f64>,
    #[serde(default = "TestingConfig::default_randomize_order")]
    pub randomize_order: bool,
    /// Bounds of the uniformly drawn silence between tones, in seconds.
    #[serde(default = "TestingConfig::default_inter_test_delay_range")]
    pub inter_test_delay_range: [f64; 2],
    /// How long after a tone ends a response is still credited to it.
    #[serde(default = "TestingConfig::default_reaction_tolerance")]
    pub reaction_tolerance: f64,
    #[serde(default)]
    pub tie_break: TieBreak,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub mode: TestMode,
}

impl TestingConfig {
    fn default_frequency_bands() -> usize {
        15
    }
    fn default_min_frequency() -> f64 {
        125.0
    }
    fn default_max_frequency() -> f64 {
        16_000.0
    }
    fn default_intensity_levels() -> Vec<f64> {
        vec![0.1, 0.3, 0.6, 1.0]
    }
    fn default_randomize_order() -> bool {
        true
    }
    fn default_inter_test_delay_range() -> [f64; 2] {
        [0.75, 1.25]
    }
    fn default_reaction_tolerance() -> f64 {
        1.0
    }

    /// The grid used by [`TestMode::Quick`], keeping every other setting.
    pub fn quick(&self) -> Self {
        Self {
            frequency_bands: 8,
            min_frequency: 250.0,
            max_frequency: 8_000.0,
            intensity_levels: vec![0.2, 0.6, 1.0],
            mode: TestMode::Quick,
            ..self.clone()
        }
    }
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            frequency_bands: Self::default_frequency_bands(),
            min_frequency: Self::default_min_frequency(),
            max_frequency: Self::default_max_frequency(),
            intensity_levels: Self::default_intensity_levels(),
            randomize_order: Self::default_randomize_order(),
            inter_test_delay_range: Self::default_inter_test_delay_range(),
            reaction_tolerance: Self::default_reaction_tolerance(),
            tie_break: TieBreak::default(),
            seed: None,
            mode: TestMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "CalibrationConfig::default_volume")]
    pub default_volume: f64,
    /// Volume chosen by the user during calibration, overriding the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_volume: Option<f64>,
    #[serde(default = "CalibrationConfig::default_calibration_frequency")]
    pub calibration_frequency: f64,
    #[serde(default = "CalibrationConfig::default_calibration_intensity")]
    pub calibration_intensity: f64,
}

impl CalibrationConfig {
    fn default_volume() -> f64 {
        0.5
    }
    fn default_calibration_frequency() -> f64 {
        1_000.0
    }
    fn default_calibration_intensity() -> f64 {
        0.5
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            default_volume: Self::default_volume(),
            saved_volume: None,
            calibration_frequency: Self::default_calibration_frequency(),
            calibration_intensity: Self::default_calibration_intensity(),
        }
    }
}

/// The complete engine configuration. Missing sections fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HearingConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub testing: TestingConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

impl HearingConfig {
    /// Parses a (possibly partial) JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rewrites `calibration.saved_volume` in an existing document. Keys this
    /// struct does not model are carried through untouched.
    pub fn save_calibration_volume(document: &str, volume: f64) -> Result<String> {
        let mut root: serde_json::Value = serde_json::from_str(document)?;
        let Some(sections) = root.as_object_mut() else {
            return Err(HearingError::invalid(
                "calibration",
                "configuration document is not a JSON object",
            ));
        };
        let calibration = sections
            .entry("calibration")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        let Some(calibration) = calibration.as_object_mut() else {
            return Err(HearingError::invalid("calibration", "section is not a JSON object"));
        };
        calibration.insert("saved_volume".to_string(), serde_json::Value::from(volume));
        Ok(serde_json::to_string_pretty(&root)?)
    }

    /// The reference output level all intensities are scaled against.
    pub fn calibration_volume(&self) -> f64 {
        self.calibration
            .saved_volume
            .unwrap_or(self.calibration.default_volume)
    }

    /// Testing settings with the selected [`TestMode`] applied.
    pub fn effective_testing(&self) -> TestingConfig {
        match self.testing.mode {
            TestMode::Quick => self.testing.quick(),
            TestMode::Full => self.testing.clone(),
        }
    }

    /// Silence appended after the final tone so its response window plays out.
    pub fn tail_duration(&self) -> f64 {
        self.audio
            .tail_duration
            .unwrap_or(DEFAULT_TAIL_DURATION.max(self.testing.reaction_tolerance))
    }

    /// Checks every bound a session depends on. Called before scheduling so a
    /// bad value is reported before any audio plays.
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(HearingError::invalid("audio.sample_rate", "must be positive"));
        }
        let nyquist = audio.sample_rate as f64 / 2.0;
        if !(audio.tone_duration.is_finite() && audio.tone_duration > 0.0) {
            return Err(HearingError::invalid(
                "audio.tone_duration",
                format!("{} is not a positive duration", audio.tone_duration),
            ));
        }
        if !(audio.fade_duration.is_finite() && audio.fade_duration >= 0.0) {
            return Err(HearingError::invalid(
                "audio.fade_duration",
                format!("{} must be zero or positive", audio.fade_duration),
            ));
        }
        if let Some(tail) = audio.tail_duration {
            if !(tail.is_finite() && tail >= 0.0) {
                return Err(HearingError::invalid(
                    "audio.tail_duration",
                    format!("{tail} must be zero or positive"),
                ));
            }
        }

        let testing = self.effective_testing();
        if testing.frequency_bands == 0 {
            return Err(HearingError::invalid(
                "testing.frequency_bands",
                "at least one band is required",
            ));
        }
        if !(testing.min_frequency.is_finite() && testing.min_frequency > 0.0) {
            return Err(HearingError::invalid(
                "testing.min_frequency",
                format!("{} Hz is not a positive frequency", testing.min_frequency),
            ));
        }
        if !(testing.max_frequency.is_finite() && testing.max_frequency >= testing.min_frequency) {
            return Err(HearingError::invalid(
                "testing.max_frequency",
                format!(
                    "{} Hz is below min_frequency {} Hz",
                    testing.max_frequency, testing.min_frequency
                ),
            ));
        }
        if testing.max_frequency >= nyquist {
            return Err(HearingError::invalid(
                "testing.max_frequency",
                format!(
                    "{} Hz is at or above the Nyquist frequency {nyquist} Hz",
                    testing.max_frequency
                ),
            ));
        }
        if testing.intensity_levels.is_empty() {
            return Err(HearingError::invalid(
                "testing.intensity_levels",
                "at least one level is required",
            ));
        }
        if let Some(bad) = testing
            .intensity_levels
            .iter()
            .find(|&&level| !(level.is_finite() && level > 0.0 && level <= 1.0))
        {
            return Err(HearingError::invalid(
                "testing.intensity_levels",
                format!("{bad} is outside (0, 1]"),
            ));
        }
        let [lo, hi] = testing.inter_test_delay_range;
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo <= hi) {
            return Err(HearingError::invalid(
                "testing.inter_test_delay_range",
                format!("[{lo}, {hi}] must satisfy 0 <= low <= high"),
            ));
        }
        if !(testing.reaction_tolerance.is_finite() && testing.reaction_tolerance >= 0.0) {
            return Err(HearingError::invalid(
                "testing.reaction_tolerance",
                format!("{} must be zero or positive", testing.reaction_tolerance),
            ));
        }

        let volume = self.calibration_volume();
        if !(volume.is_finite() && (0.0..=1.0).contains(&volume)) {
            return Err(HearingError::invalid(
                "calibration.volume",
                format!("{volume} is outside [0, 1]"),
            ));
        }
        Ok(())
    }
}
