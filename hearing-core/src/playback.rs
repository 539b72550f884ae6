//! # Continuous Playback Module
//!
//! Plays a whole session through one uninterrupted output stream. Wireless
//! sinks pause and resync whenever a stream stops, so instead of opening a
//! stream per tone the timeline is rendered up front into a single
//! [`RenderedProgram`] and fed to the device until it drains.
//!
//! ## Pieces
//! - [`render_timeline`]: tones and silences, routed to their ear's channel,
//!   plus a silent tail so the last response window plays out
//! - [`ProgramCursor`]: copies frames into device buffers and advances the
//!   [`PlaybackClock`]
//! - [`OutputSink`]: where frames go; [`CpalSink`] for real hardware,
//!   [`SimulatedSink`] for headless runs and tests
//! - [`PlaybackEngine`]: owns the stream on a worker thread and stops it on
//!   request, on drain or on device failure

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, warn};

use crate::Ear;
use crate::config::HearingConfig;
use crate::error::{ConfigWarning, HearingError, Result};
use crate::schedule::{Segment, Timeline};
use crate::synth::{self, FadeShape, ToneRequest};

/// Channels in a rendered program: left, right.
pub const PROGRAM_CHANNELS: usize = 2;

/// Frames per block pulled by [`SimulatedSink`].
pub const SIMULATED_BLOCK_FRAMES: usize = 1024;

/// Rendering inputs that are not part of the timeline itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub fade_s: f64,
    pub fade_shape: FadeShape,
    pub calibration_volume: f64,
    /// Silence appended after the last segment.
    pub tail_s: f64,
}

impl RenderSettings {
    pub fn from_config(config: &HearingConfig) -> Self {
        Self {
            fade_s: config.audio.fade_duration,
            fade_shape: config.audio.fade_shape,
            calibration_volume: config.calibration_volume(),
            tail_s: config.tail_duration(),
        }
    }
}

/// The full session audio, stereo interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedProgram {
    samples: Vec<f32>,
    sample_rate: u32,
    timeline_frames: u64,
}

impl RenderedProgram {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames including the tail.
    pub fn total_frames(&self) -> u64 {
        (self.samples.len() / PROGRAM_CHANNELS) as u64
    }

    /// Frames covered by the timeline, excluding the tail.
    pub fn timeline_frames(&self) -> u64 {
        self.timeline_frames
    }

    pub fn duration_s(&self) -> f64 {
        self.total_frames() as f64 / self.sample_rate as f64
    }

    /// A single tone routed to `ears`, without a tail. Used for one-off
    /// tones such as the calibration reference.
    pub fn from_tone(tone: &[f32], sample_rate: u32, ears: &[Ear]) -> Self {
        let mut samples = vec![0.0f32; tone.len() * PROGRAM_CHANNELS];
        for ear in ears {
            let channel = ear.channel();
            for (frame, &sample) in tone.iter().enumerate() {
                samples[frame * PROGRAM_CHANNELS + channel] = sample;
            }
        }
        Self {
            samples,
            sample_rate,
            timeline_frames: tone.len() as u64,
        }
    }

    /// `[left, right]` at `index`, or silence past the end.
    pub fn frame(&self, index: usize) -> [f32; 2] {
        let base = index * PROGRAM_CHANNELS;
        match self.samples.get(base..base + PROGRAM_CHANNELS) {
            Some(&[left, right]) => [left, right],
            _ => [0.0, 0.0],
        }
    }
}

/// Renders every timeline segment into one continuous program.
///
/// Each distinct (frequency, intensity) pair is synthesized once and reused
/// for both ears. Warnings raised while synthesizing are returned once each.
pub fn render_timeline(
    timeline: &Timeline,
    settings: &RenderSettings,
) -> Result<(RenderedProgram, Vec<ConfigWarning>)> {
    let sample_rate = timeline.sample_rate();
    let tail_frames = (settings.tail_s * sample_rate as f64).round() as usize;
    let total_frames = timeline.total_frames() as usize + tail_frames;
    let mut samples = vec![0.0f32; total_frames * PROGRAM_CHANNELS];
    let mut warnings: Vec<ConfigWarning> = Vec::new();
    let mut tones: HashMap<(u64, u64), Vec<f32>> = HashMap::new();

    let mut cursor = 0usize;
    for segment in timeline.segments() {
        let frames = segment.frames(sample_rate);
        if let Segment::Stimulus(stimulus) = segment {
            let key = (stimulus.frequency_hz.to_bits(), stimulus.intensity.to_bits());
            if !tones.contains_key(&key) {
                let request = ToneRequest {
                    frequency_hz: stimulus.frequency_hz,
                    intensity: stimulus.intensity,
                    duration_s: stimulus.duration_s,
                    fade_s: settings.fade_s,
                    fade_shape: settings.fade_shape,
                    calibration_volume: settings.calibration_volume,
                };
                let tone = synth::synthesize(&request, sample_rate)?;
                for warning in tone.warnings {
                    if !warnings.contains(&warning) {
                        warnings.push(warning);
                    }
                }
                tones.insert(key, tone.samples);
            }
            let channel = stimulus.ear.channel();
            if let Some(tone) = tones.get(&key) {
                for (offset, &sample) in tone.iter().take(frames).enumerate() {
                    samples[(cursor + offset) * PROGRAM_CHANNELS + channel] = sample;
                }
            }
        }
        cursor += frames;
    }

    let program = RenderedProgram {
        samples,
        sample_rate,
        timeline_frames: timeline.total_frames(),
    };
    info!(
        "[PLAYBACK] Rendered {:.1}s program ({} distinct tones, {:.1} MB)",
        program.duration_s(),
        tones.len(),
        (program.samples.len() * std::mem::size_of::<f32>()) as f64 / 1_048_576.0
    );
    Ok((program, warnings))
}

/// Authoritative session clock: frames delivered to the sink, minus the
/// output latency the sink reports.
///
/// Readings never go backwards, even when the reported latency grows.
#[derive(Debug)]
pub struct PlaybackClock {
    sample_rate: u32,
    total_frames: u64,
    frames_written: AtomicU64,
    latency_frames: AtomicU64,
    last_reported: AtomicU64,
}

impl PlaybackClock {
    pub fn new(sample_rate: u32, total_frames: u64) -> Self {
        Self {
            sample_rate,
            total_frames,
            frames_written: AtomicU64::new(0),
            latency_frames: AtomicU64::new(0),
            last_reported: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Current playback position in seconds on the timeline axis.
    pub fn position_s(&self) -> f64 {
        let written = self.frames_written.load(Ordering::Acquire);
        let latency = self.latency_frames.load(Ordering::Acquire);
        let audible = written.saturating_sub(latency).min(self.total_frames);
        let position = audible as f64 / self.sample_rate as f64;
        // Non-negative floats order like their bit patterns.
        let previous = self
            .last_reported
            .fetch_max(position.to_bits(), Ordering::AcqRel);
        position.max(f64::from_bits(previous))
    }

    pub fn duration_s(&self) -> f64 {
        self.total_frames as f64 / self.sample_rate as f64
    }

    /// Fraction of the program played, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let duration = self.duration_s();
        if duration <= 0.0 {
            1.0
        } else {
            (self.position_s() / duration).clamp(0.0, 1.0)
        }
    }

    fn advance(&self, frames: u64) -> u64 {
        self.frames_written.fetch_add(frames, Ordering::AcqRel) + frames
    }

    fn set_latency(&self, latency: Duration) {
        let frames = (latency.as_secs_f64() * self.sample_rate as f64).round() as u64;
        self.latency_frames.store(frames, Ordering::Release);
    }

    fn audible_end_reached(&self, written: u64) -> bool {
        written.saturating_sub(self.latency_frames.load(Ordering::Acquire)) >= self.total_frames
    }
}

/// Notifications from a running sink to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// The last program frame has been played.
    Drained,
    /// The device failed or disconnected.
    Failed(String),
}

/// Read position into a program. Lives inside the device callback.
pub struct ProgramCursor {
    program: Arc<RenderedProgram>,
    clock: Arc<PlaybackClock>,
    position: usize,
    events: Sender<SinkEvent>,
    drained: bool,
}

impl ProgramCursor {
    pub fn new(
        program: Arc<RenderedProgram>,
        clock: Arc<PlaybackClock>,
        events: Sender<SinkEvent>,
    ) -> Self {
        Self {
            program,
            clock,
            position: 0,
            events,
            drained: false,
        }
    }

    /// Fills an interleaved device buffer with `channels` channels.
    ///
    /// Left and right go to the first two channels, any others are silent,
    /// and silence follows once the program is exhausted.
    pub fn fill(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let n_frames = out.len() / channels;
        for (frame, chunk) in out.chunks_exact_mut(channels).enumerate() {
            let [left, right] = self.program.frame(self.position + frame);
            chunk.fill(0.0);
            chunk[0] = left;
            if channels > 1 {
                chunk[1] = right;
            }
        }
        self.position += n_frames;

        let written = self.clock.advance(n_frames as u64);
        if !self.drained && self.clock.audible_end_reached(written) {
            self.drained = true;
            let _ = self.events.try_send(SinkEvent::Drained);
        }
    }

    /// Records the delay between handing a buffer over and hearing it.
    pub fn set_output_latency(&self, latency: Duration) {
        self.clock.set_latency(latency);
    }
}

/// Destination for program frames.
///
/// `open` runs on the engine's worker thread and the returned stream stays
/// there until playback ends; dropping it must release the device.
pub trait OutputSink: Send + 'static {
    type Stream;

    fn open(self, cursor: ProgramCursor, events: Sender<SinkEvent>) -> anyhow::Result<Self::Stream>;

    fn describe(&self) -> String;
}

/// Plays through a cpal output device.
#[derive(Debug, Clone, Default)]
pub struct CpalSink {
    /// Output device to use; the host default when `None`.
    pub device_name: Option<String>,
    pub sample_rate: u32,
}

impl CpalSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            device_name: None,
            sample_rate,
        }
    }

    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }
}

impl OutputSink for CpalSink {
    type Stream = cpal::Stream;

    fn open(self, mut cursor: ProgramCursor, events: Sender<SinkEvent>) -> anyhow::Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = match &self.device_name {
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("Output device `{name}` not found"))?,
            None => host
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device available"))?,
        };

        info!("[PLAYBACK] Using audio output device: {}", device.name()?);

        let configs = device.supported_output_configs()?.collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, self.sample_rate).ok_or_else(|| {
            anyhow!(
                "No stereo f32 output format at {} Hz on this device",
                self.sample_rate
            )
        })?;

        let config = supported_config.with_sample_rate(cpal::SampleRate(self.sample_rate));
        let channels = config.channels() as usize;
        let config: cpal::StreamConfig = config.into();

        info!(
            "[PLAYBACK] Output stream: {} Hz, {} channels",
            config.sample_rate.0, channels
        );

        let err_fn = move |err: cpal::StreamError| {
            error!("[PLAYBACK] An error occurred on the output stream: {}", err);
            let _ = events.try_send(SinkEvent::Failed(err.to_string()));
        };

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                let timestamp = info.timestamp();
                if let Some(latency) = timestamp.playback.duration_since(&timestamp.callback) {
                    cursor.set_output_latency(latency);
                }
                cursor.fill(data, channels);
            },
            err_fn,
            None,
        )?;

        stream.play()?;
        Ok(stream)
    }

    fn describe(&self) -> String {
        match &self.device_name {
            Some(name) => format!("cpal output `{name}`"),
            None => "default cpal output".to_string(),
        }
    }
}

/// Finds the best supported output configuration for the target sample rate.
///
/// Requires at least two channels (one per ear), 32-bit float samples, and a
/// range containing `target_rate`. Prefers the fewest channels.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() >= 2 && c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0)
        .min_by_key(|c| c.channels())
}

/// Names of the host's output devices.
pub fn list_output_devices() -> anyhow::Result<Vec<String>> {
    let host = cpal::default_host();
    let names = host
        .output_devices()?
        .filter_map(|device| device.name().ok())
        .collect();
    Ok(names)
}

/// A device stand-in: a thread pulling blocks from the cursor at real time
/// multiplied by `speed`.
#[derive(Debug, Clone)]
pub struct SimulatedSink {
    pub block_frames: usize,
    pub channels: usize,
    /// Playback speed relative to real time. Zero or less pulls without pausing.
    pub speed: f64,
    pub latency: Duration,
    /// Report a device failure once this many frames have been pulled.
    pub fail_after_frames: Option<u64>,
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self {
            block_frames: SIMULATED_BLOCK_FRAMES,
            channels: PROGRAM_CHANNELS,
            speed: 1.0,
            latency: Duration::ZERO,
            fail_after_frames: None,
        }
    }
}

impl SimulatedSink {
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }
}

/// Handle to a [`SimulatedSink`] thread; dropping it stops the thread.
pub struct SimulatedStream {
    stop: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl OutputSink for SimulatedSink {
    type Stream = SimulatedStream;

    fn open(self, mut cursor: ProgramCursor, events: Sender<SinkEvent>) -> anyhow::Result<SimulatedStream> {
        if self.block_frames == 0 || self.channels < 2 {
            return Err(anyhow!(
                "simulated sink needs a positive block size and at least two channels"
            ));
        }
        let sample_rate = cursor.program.sample_rate() as f64;
        let pause = if self.speed > 0.0 {
            Some(Duration::from_secs_f64(
                self.block_frames as f64 / sample_rate / self.speed,
            ))
        } else {
            None
        };
        cursor.set_output_latency(self.latency);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread_handle = thread::spawn(move || {
            let mut buffer = vec![0.0f32; self.block_frames * self.channels];
            let mut pulled: u64 = 0;
            while !stop_flag.load(Ordering::Acquire) {
                if let Some(limit) = self.fail_after_frames {
                    if pulled >= limit {
                        let _ = events.try_send(SinkEvent::Failed(
                            "simulated device disconnected".to_string(),
                        ));
                        break;
                    }
                }
                cursor.fill(&mut buffer, self.channels);
                pulled += self.block_frames as u64;
                match pause {
                    Some(pause) => thread::sleep(pause),
                    None => thread::yield_now(),
                }
            }
        });

        Ok(SimulatedStream {
            stop,
            thread_handle: Some(thread_handle),
        })
    }

    fn describe(&self) -> String {
        format!("simulated output ({}x)", self.speed)
    }
}

/// How a playback run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    /// The whole program played.
    Completed,
    /// [`PlaybackEngine::stop`] was called first.
    Stopped,
    /// The device failed mid-stream.
    Failed(String),
}

/// Drives one program through one sink.
///
/// `stop` and the position/status queries take `&self` and may be called
/// from any thread.
#[derive(Debug, Default)]
pub struct PlaybackEngine {
    clock: Option<Arc<PlaybackClock>>,
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Mutex<Option<JoinHandle<PlaybackOutcome>>>,
    outcome: Mutex<Option<PlaybackOutcome>>,
    finished: Arc<AtomicBool>,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the sink on a dedicated thread and starts playing `program`.
    ///
    /// Returns once the stream is running. A sink that cannot be opened is
    /// reported as [`HearingError::AudioDevice`] and nothing plays.
    pub fn start<S: OutputSink>(&mut self, program: Arc<RenderedProgram>, sink: S) -> Result<()> {
        if self.clock.is_some() {
            return Err(HearingError::AudioDevice(
                "playback engine already started".to_string(),
            ));
        }
        let clock = Arc::new(PlaybackClock::new(program.sample_rate(), program.total_frames()));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (events_tx, events_rx) = crossbeam_channel::bounded::<SinkEvent>(4);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
        let finished = self.finished.clone();
        let thread_clock = clock.clone();
        let description = sink.describe();

        let thread_handle = thread::spawn(move || {
            info!("[PLAYBACK-THREAD] Opening {}", description);
            let cursor = ProgramCursor::new(program, thread_clock, events_tx.clone());
            let stream = match sink.open(cursor, events_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    error!("[PLAYBACK-THREAD] Fatal error opening output: {:#}", e);
                    let reason = format!("{e:#}");
                    let _ = ready_tx.send(Err(reason.clone()));
                    finished.store(true, Ordering::Release);
                    return PlaybackOutcome::Failed(reason);
                }
            };

            let outcome = run_until_done(&events_rx, &shutdown_rx);

            info!("[PLAYBACK-THREAD] Releasing output stream ({:?})", outcome);
            drop(stream);
            finished.store(true, Ordering::Release);
            outcome
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.clock = Some(clock);
                self.shutdown_tx = Some(shutdown_tx);
                *lock(&self.thread_handle) = Some(thread_handle);
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = thread_handle.join();
                Err(HearingError::AudioDevice(reason))
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(HearingError::AudioDevice(
                    "playback thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Playback position in seconds; 0 before start.
    pub fn current_position_s(&self) -> f64 {
        self.clock.as_ref().map_or(0.0, |clock| clock.position_s())
    }

    pub fn clock(&self) -> Option<&Arc<PlaybackClock>> {
        self.clock.as_ref()
    }

    /// True once the stream has been released for any reason.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Halts playback and releases the device, waiting for the worker to
    /// exit. Idempotent; a no-op returning `None` before `start`.
    pub fn stop(&self) -> Option<PlaybackOutcome> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.try_send(());
        }
        self.join_worker()
    }

    /// Blocks until playback ends on its own, fails, or is stopped elsewhere.
    pub fn wait(&self) -> Option<PlaybackOutcome> {
        self.join_worker()
    }

    fn join_worker(&self) -> Option<PlaybackOutcome> {
        let mut handle = lock(&self.thread_handle);
        if let Some(handle) = handle.take() {
            let outcome = handle.join().unwrap_or_else(|_| {
                PlaybackOutcome::Failed("playback thread panicked".to_string())
            });
            *lock(&self.outcome) = Some(outcome);
        }
        lock(&self.outcome).clone()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if lock(&self.thread_handle).is_some() {
            warn!("[PLAYBACK] Engine dropped while playing, stopping stream");
            self.stop();
        }
    }
}

fn run_until_done(events_rx: &Receiver<SinkEvent>, shutdown_rx: &Receiver<()>) -> PlaybackOutcome {
    crossbeam_channel::select! {
        recv(events_rx) -> msg => match msg {
            Ok(SinkEvent::Drained) => PlaybackOutcome::Completed,
            Ok(SinkEvent::Failed(reason)) => {
                error!("[PLAYBACK-THREAD] Device failure: {}", reason);
                PlaybackOutcome::Failed(reason)
            }
            Err(_) => PlaybackOutcome::Failed("sink event channel closed".to_string()),
        },
        recv(shutdown_rx) -> _ => {
            info!("[PLAYBACK-THREAD] Received shutdown signal");
            PlaybackOutcome::Stopped
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ear;
    use crate::schedule::build_schedule;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn short_config() -> HearingConfig {
        let mut config = HearingConfig::default();
        config.audio.sample_rate = 8_000;
        config.audio.tone_duration = 0.1;
        config.testing.frequency_bands = 1;
        config.testing.min_frequency = 1_000.0;
        config.testing.max_frequency = 1_000.0;
        config.testing.intensity_levels = vec![1.0];
        config.testing.randomize_order = false;
        config.testing.inter_test_delay_range = [0.05, 0.05];
        config.testing.reaction_tolerance = 0.2;
        config.audio.tail_duration = Some(0.2);
        config
    }

    fn short_program() -> (Timeline, RenderedProgram) {
        let config = short_config();
        let timeline = build_schedule(&config, &mut StdRng::seed_from_u64(0)).unwrap();
        let (program, warnings) =
            render_timeline(&timeline, &RenderSettings::from_config(&config)).unwrap();
        assert!(warnings.is_empty());
        (timeline, program)
    }

    #[test]
    fn program_routes_each_ear_to_its_channel() {
        let (timeline, program) = short_program();
        // 0.1s tone, 0.05s gap, 0.1s tone, 0.2s tail at 8 kHz.
        assert_eq!(program.timeline_frames(), timeline.total_frames());
        assert_eq!(program.total_frames(), 800 + 400 + 800 + 1_600);

        let stimuli: Vec<_> = timeline.stimuli().collect();
        assert_eq!(stimuli[0].ear, Ear::Left);
        let left_energy: f32 = (0..800).map(|i| program.frame(i)[0].abs()).sum();
        let right_leak: f32 = (0..800).map(|i| program.frame(i)[1].abs()).sum();
        assert!(left_energy > 1.0);
        assert_eq!(right_leak, 0.0);

        let right_energy: f32 = (1_200..2_000).map(|i| program.frame(i)[1].abs()).sum();
        let left_leak: f32 = (1_200..2_000).map(|i| program.frame(i)[0].abs()).sum();
        assert!(right_energy > 1.0);
        assert_eq!(left_leak, 0.0);

        for i in 800..1_200 {
            assert_eq!(program.frame(i), [0.0, 0.0]);
        }
        assert_eq!(program.frame(10_000), [0.0, 0.0]);
    }

    #[test]
    fn single_tone_program_plays_on_requested_ears() {
        let tone = [0.25f32, -0.5, 0.75];
        let left = RenderedProgram::from_tone(&tone, 8_000, &[Ear::Left]);
        assert_eq!(left.total_frames(), 3);
        assert_eq!(left.frame(1), [-0.5, 0.0]);

        let both = RenderedProgram::from_tone(&tone, 8_000, &Ear::BOTH);
        assert_eq!(both.frame(2), [0.75, 0.75]);
        assert_eq!(both.timeline_frames(), both.total_frames());
    }

    #[test]
    fn cursor_fills_extra_channels_with_silence_and_drains_once() {
        let (_, program) = short_program();
        let program = Arc::new(program);
        let clock = Arc::new(PlaybackClock::new(8_000, program.total_frames()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut cursor = ProgramCursor::new(program.clone(), clock.clone(), tx);

        let mut buffer = vec![1.0f32; 4 * 100];
        cursor.fill(&mut buffer, 4);
        for (frame, chunk) in buffer.chunks_exact(4).enumerate() {
            assert_eq!(chunk[0], program.frame(frame)[0]);
            assert_eq!(chunk[1], program.frame(frame)[1]);
            assert_eq!(&chunk[2..], &[0.0, 0.0]);
        }
        assert!((clock.position_s() - 100.0 / 8_000.0).abs() < 1e-12);
        assert!(rx.try_recv().is_err());

        let mut rest = vec![0.0f32; 2 * 4_000];
        cursor.fill(&mut rest, 2);
        cursor.fill(&mut rest, 2);
        assert_eq!(rx.try_recv(), Ok(SinkEvent::Drained));
        assert!(rx.try_recv().is_err());
        assert!((clock.position_s() - program.duration_s()).abs() < 1e-12);
    }

    #[test]
    fn clock_never_runs_backwards() {
        let clock = PlaybackClock::new(1_000, 10_000);
        clock.advance(500);
        let before = clock.position_s();
        assert_eq!(before, 0.5);
        clock.set_latency(Duration::from_millis(200));
        assert_eq!(clock.position_s(), before);
        clock.advance(500);
        assert!((clock.position_s() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn stop_before_start_is_a_noop() {
        let engine = PlaybackEngine::new();
        assert_eq!(engine.stop(), None);
        assert_eq!(engine.stop(), None);
        assert_eq!(engine.current_position_s(), 0.0);
    }

    #[test]
    fn simulated_playback_runs_to_completion() {
        let (_, program) = short_program();
        let duration = program.duration_s();
        let mut engine = PlaybackEngine::new();
        engine
            .start(Arc::new(program), SimulatedSink::default().with_speed(0.0))
            .unwrap();
        assert_eq!(engine.wait(), Some(PlaybackOutcome::Completed));
        assert!(engine.is_finished());
        assert!((engine.current_position_s() - duration).abs() < 1e-9);
        // Stopping afterwards reports the same outcome.
        assert_eq!(engine.stop(), Some(PlaybackOutcome::Completed));
    }

    #[test]
    fn stop_is_idempotent_and_halts_playback() {
        let (_, program) = short_program();
        let mut engine = PlaybackEngine::new();
        engine
            .start(Arc::new(program), SimulatedSink::default().with_speed(1.0))
            .unwrap();
        assert_eq!(engine.stop(), Some(PlaybackOutcome::Stopped));
        assert_eq!(engine.stop(), Some(PlaybackOutcome::Stopped));
        assert!(engine.is_finished());
    }

    #[test]
    fn device_failure_halts_the_engine() {
        let (_, program) = short_program();
        let mut engine = PlaybackEngine::new();
        engine
            .start(
                Arc::new(program),
                SimulatedSink::default().with_speed(0.0).failing_after(1_024),
            )
            .unwrap();
        assert!(matches!(engine.wait(), Some(PlaybackOutcome::Failed(_))));
    }

    struct MissingDevice;

    impl OutputSink for MissingDevice {
        type Stream = ();

        fn open(self, _cursor: ProgramCursor, _events: Sender<SinkEvent>) -> anyhow::Result<()> {
            Err(anyhow!("No output device available"))
        }

        fn describe(&self) -> String {
            "missing device".to_string()
        }
    }

    #[test]
    fn missing_device_fails_start() {
        let (_, program) = short_program();
        let mut engine = PlaybackEngine::new();
        let err = engine.start(Arc::new(program), MissingDevice).unwrap_err();
        assert!(matches!(err, HearingError::AudioDevice(_)));
        assert_eq!(engine.stop(), None);
    }
}
