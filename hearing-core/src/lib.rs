// hearing-core/src/lib.rs

//! The core engine for the hearing threshold screener.
//! This crate builds the stimulus schedule, plays it through one continuous
//! output stream, matches listener responses to stimuli and reduces the
//! results to a per-ear threshold profile. It is completely headless
//! and contains no user interface code.

pub mod analysis;
pub mod config;
pub mod correlate;
pub mod error;
pub mod playback;
pub mod profile;
pub mod report;
pub mod schedule;
pub mod session;
pub mod spectrum;
pub mod synth;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use config::HearingConfig;
pub use error::{ConfigWarning, HearingError, Result};

/// The ear a stimulus is routed to. Left plays on output channel 0,
/// right on channel 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ear {
    Left,
    Right,
}

impl Ear {
    pub const BOTH: [Ear; 2] = [Ear::Left, Ear::Right];

    /// Output channel index for this ear.
    pub fn channel(self) -> usize {
        match self {
            Ear::Left => 0,
            Ear::Right => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Ear::Left => "left",
            Ear::Right => "right",
        }
    }
}

impl fmt::Display for Ear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ear {
    type Err = HearingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Ear::Left),
            "right" => Ok(Ear::Right),
            other => Err(HearingError::InvalidParameter {
                parameter: "ear",
                reason: format!("`{other}` is neither left nor right"),
            }),
        }
    }
}
