//! # Hearing Screener CLI
//!
//! Thin terminal front-end over `hearing-core`. It parses arguments, starts
//! and stops sessions and forwards Enter presses as responses; all timing,
//! scoring and analysis live in the core crate.
//!
//! ## Threads
//! - **Main thread**: session loop, `select!` over keyboard events and a
//!   progress tick
//! - **Keyboard thread**: blocking stdin reader
//! - **Playback thread**: owned by the core playback engine

mod display;
mod keyboard;
mod telemetry;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::select;
use hearing_core::config::TestMode;
use hearing_core::correlate::ResponseOutcome;
use hearing_core::playback::{self, CpalSink, PlaybackEngine, PlaybackOutcome, RenderedProgram, SimulatedSink};
use hearing_core::report::ResultDocument;
use hearing_core::session::{Session, SessionReport};
use hearing_core::synth::{self, Synthesized, ToneRequest};
use hearing_core::{Ear, HearingConfig, analysis, spectrum};
use tracing::{info, warn};

use keyboard::KeyEvent;

const PROGRESS_TICK: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(
    name = "hearing",
    version,
    about = "Pure-tone hearing threshold screener",
    long_about = "Plays short sine tones at several frequencies and levels to each ear \
                  and records which ones you hear. This is a screening aid, not a \
                  calibrated audiometer."
)]
struct Args {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a single tone with the test's intensity scaling
    Tone {
        /// Frequency in Hz (20-20000)
        frequency: f64,
        /// Intensity (0.0-1.0, logarithmic)
        intensity: f64,
        /// Duration in seconds (0.1-10.0)
        duration: f64,
        /// left, right or both
        #[arg(default_value = "both")]
        ear: String,
        /// Volume at intensity 1.0 (0.0-1.0)
        #[arg(default_value_t = 1.0)]
        max_volume: f64,
        /// Print the measured frequency of the synthesized tone
        #[arg(long)]
        verify: bool,
        /// Output device name (default device when omitted)
        #[arg(long)]
        device: Option<String>,
    },
    /// Play the calibration reference, optionally saving the volume
    Calibrate {
        /// Path to the JSON configuration
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        /// Reference volume to try (0.0-1.0); defaults to the configured one
        #[arg(long)]
        volume: Option<f64>,
        /// Play the 5 s "just audible" tone instead
        #[arg(long)]
        softest: bool,
        /// Store the volume as `calibration.saved_volume`
        #[arg(long)]
        save: bool,
        #[arg(long)]
        device: Option<String>,
    },
    /// Run a hearing test; press Enter whenever you hear a tone, q to stop
    Test {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        /// Use the short 8-band grid
        #[arg(long)]
        quick: bool,
        /// Seed for the presentation order and gaps
        #[arg(long)]
        seed: Option<u64>,
        /// Play into a simulated device instead of the sound card
        #[arg(long)]
        simulate: bool,
        /// Where to write the result document
        #[arg(long, default_value = "results.json")]
        output: PathBuf,
        #[arg(long)]
        device: Option<String>,
    },
    /// Analyse a saved result document
    Analyse {
        /// Result document written by `test`
        #[arg(default_value = "results.json")]
        file: PathBuf,
        /// Age in years, for comparison against typical thresholds
        #[arg(long)]
        age: Option<u32>,
        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// List output devices
    Devices,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.verbose);

    match args.command {
        Command::Tone {
            frequency,
            intensity,
            duration,
            ear,
            max_volume,
            verify,
            device,
        } => run_tone(frequency, intensity, duration, &ear, max_volume, verify, device),
        Command::Calibrate {
            config,
            volume,
            softest,
            save,
            device,
        } => run_calibrate(&config, volume, softest, save, device),
        Command::Test {
            config,
            quick,
            seed,
            simulate,
            output,
            device,
        } => run_test(&config, quick, seed, simulate, &output, device),
        Command::Analyse { file, age, json } => run_analyse(&file, age, json),
        Command::Devices => {
            for name in playback::list_output_devices()? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn run_tone(
    frequency: f64,
    intensity: f64,
    duration: f64,
    ear: &str,
    max_volume: f64,
    verify: bool,
    device: Option<String>,
) -> anyhow::Result<()> {
    let errors = tone_parameter_errors(frequency, intensity, duration, ear, max_volume);
    if !errors.is_empty() {
        bail!("parameter errors:\n  - {}", errors.join("\n  - "));
    }
    let ears = parse_ears(ear)?;
    let config = HearingConfig::default();
    let request = ToneRequest {
        frequency_hz: frequency,
        intensity,
        duration_s: duration,
        fade_s: config.audio.fade_duration,
        fade_shape: config.audio.fade_shape,
        calibration_volume: max_volume,
    };
    let tone = synth::synthesize(&request, config.audio.sample_rate)?;
    println!(
        "Playing: {frequency} Hz, intensity {intensity:.2} -> volume {:.4}, {duration}s, ear: {ear}",
        max_volume * synth::amplitude_ratio(intensity)
    );
    if verify {
        match spectrum::dominant_frequency(&tone.samples, config.audio.sample_rate) {
            Some(found) => println!("Measured frequency: {found:.1} Hz"),
            None => println!("Measured frequency: none (silent tone)"),
        }
    }
    play_tone(tone, config.audio.sample_rate, &ears, device)?;
    println!("Tone completed");
    Ok(())
}

/// Range checks for the `tone` command, all reported at once.
fn tone_parameter_errors(frequency: f64, intensity: f64, duration: f64, ear: &str, max_volume: f64) -> Vec<String> {
    let mut errors = Vec::new();
    if !(20.0..=20_000.0).contains(&frequency) {
        errors.push(format!("Frequency {frequency} Hz is out of range (20-20000 Hz)"));
    }
    if !(0.0..=1.0).contains(&intensity) {
        errors.push(format!("Intensity {intensity} is out of range (0.0-1.0)"));
    }
    if !(0.1..=10.0).contains(&duration) {
        errors.push(format!("Duration {duration} seconds is out of range (0.1-10.0 seconds)"));
    }
    if parse_ears(ear).is_err() {
        errors.push(format!("Ear '{ear}' is invalid (must be 'left', 'right', or 'both')"));
    }
    if !(0.0..=1.0).contains(&max_volume) {
        errors.push(format!("Max volume {max_volume} is out of range (0.0-1.0)"));
    }
    errors
}

fn parse_ears(ear: &str) -> anyhow::Result<Vec<Ear>> {
    if ear.trim().eq_ignore_ascii_case("both") {
        return Ok(Ear::BOTH.to_vec());
    }
    Ok(vec![ear.parse::<Ear>()?])
}

fn play_tone(tone: Synthesized, sample_rate: u32, ears: &[Ear], device: Option<String>) -> anyhow::Result<()> {
    for warning in &tone.warnings {
        warn!("{warning}");
    }
    let program = Arc::new(RenderedProgram::from_tone(&tone.samples, sample_rate, ears));
    let mut engine = PlaybackEngine::new();
    engine.start(program, cpal_sink(sample_rate, device))?;
    match engine.wait() {
        Some(PlaybackOutcome::Failed(reason)) => bail!("audio error: {reason}"),
        _ => Ok(()),
    }
}

fn cpal_sink(sample_rate: u32, device: Option<String>) -> CpalSink {
    let sink = CpalSink::new(sample_rate);
    match device {
        Some(name) => sink.with_device(name),
        None => sink,
    }
}

fn run_calibrate(
    config_path: &Path,
    volume: Option<f64>,
    softest: bool,
    save: bool,
    device: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(volume) = volume {
        config.calibration.saved_volume = Some(volume);
    }
    config.validate()?;

    let sample_rate = config.audio.sample_rate;
    let tone = if softest {
        println!("Playing the softest test level for 5 s; it should be just audible.");
        synth::softest_reference_tone(&config)?
    } else {
        println!(
            "Playing {} Hz at volume {:.2}; adjust until it is comfortable.",
            config.calibration.calibration_frequency,
            config.calibration_volume()
        );
        synth::calibration_tone(
            config.calibration.calibration_frequency,
            config.calibration_volume(),
            1.0,
            config.audio.fade_duration,
            config.audio.fade_shape,
            sample_rate,
        )?
    };
    play_tone(tone, sample_rate, &Ear::BOTH, device)?;

    if save {
        let document = if config_path.exists() {
            let text = fs::read_to_string(config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            HearingConfig::save_calibration_volume(&text, config.calibration_volume())?
        } else {
            config.to_json_string()?
        };
        fs::write(config_path, document)
            .with_context(|| format!("writing {}", config_path.display()))?;
        info!(
            "Saved calibration volume {:.2} to {}",
            config.calibration_volume(),
            config_path.display()
        );
    }
    Ok(())
}

fn run_test(
    config_path: &Path,
    quick: bool,
    seed: Option<u64>,
    simulate: bool,
    output: &Path,
    device: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if quick {
        config.testing.mode = TestMode::Quick;
    }
    if seed.is_some() {
        config.testing.seed = seed;
    }

    println!("Press Enter each time you hear a tone. Type q and Enter to stop.");
    let session = if simulate {
        Session::start(config, SimulatedSink::default())?
    } else {
        let sink = cpal_sink(config.audio.sample_rate, device);
        Session::start(config, sink)?
    };
    println!(
        "{} tones over {:.0} s.",
        session.timeline().stimulus_count(),
        session.timeline().duration_s()
    );

    let report = drive_session(&session, &keyboard::spawn_listener());
    println!("\n{}", display::session_summary(&report));
    print!("{}", display::profile_table(&report.profile));

    let document = report.to_document();
    fs::write(output, document.to_json_string()?)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Results saved to {}", output.display());
    Ok(())
}

/// Forwards key presses until playback ends or the listener quits.
fn drive_session(session: &Session, keys: &crossbeam_channel::Receiver<KeyEvent>) -> SessionReport {
    let ticker = crossbeam_channel::tick(PROGRESS_TICK);
    let mut last_percent = None;
    loop {
        if session.is_finished() {
            return session.wait();
        }
        select! {
            recv(keys) -> key => match key {
                Ok(KeyEvent::Heard) => match session.respond_now() {
                    ResponseOutcome::Scored(_) => info!("Response recorded"),
                    other => info!("Response not counted ({other:?})"),
                },
                Ok(KeyEvent::Quit) | Err(_) => {
                    info!("Stopping test");
                    return session.stop();
                }
            },
            recv(ticker) -> _ => {
                let progress = session.progress();
                let percent = (progress.fraction * 100.0).floor() as u32;
                if last_percent != Some(percent / 10) {
                    last_percent = Some(percent / 10);
                    info!("Progress {percent}% ({:.0}/{:.0} s)", progress.position_s, progress.duration_s);
                }
            },
        }
    }
}

fn run_analyse(file: &Path, age: Option<u32>, json: bool) -> anyhow::Result<()> {
    let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let document =
        ResultDocument::from_json_str(&text).with_context(|| format!("parsing {}", file.display()))?;
    if !document.complete {
        warn!("{} holds a partial test", file.display());
    }
    let profile = document.to_profile()?;
    let result = analysis::analyse(&profile, age);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", display::analysis_report(&result));
    }
    Ok(())
}

/// Reads the configuration, falling back to defaults when the file is absent.
fn load_config(path: &Path) -> anyhow::Result<HearingConfig> {
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(HearingConfig::default());
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config =
        HearingConfig::from_json_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
