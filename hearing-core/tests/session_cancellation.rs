use hearing_core::HearingConfig;
use hearing_core::HearingError;
use hearing_core::playback::SimulatedSink;
use hearing_core::session::{Session, SessionState};

fn config() -> HearingConfig {
    let mut config = HearingConfig::default();
    config.testing.frequency_bands = 2;
    config.testing.min_frequency = 500.0;
    config.testing.max_frequency = 2_000.0;
    config.testing.intensity_levels = vec![0.3, 1.0];
    config.testing.seed = Some(7);
    config
}

#[test]
fn stop_returns_a_partial_profile() {
    let session = Session::start(config(), SimulatedSink::default().with_speed(1.0)).unwrap();
    let report = session.stop();

    assert_eq!(report.state, SessionState::Stopped);
    assert!(!report.is_complete());
    assert!(!report.profile.complete);
    // Every stimulus is still reported; unplayed ones count as not heard.
    assert_eq!(report.results.len(), 8);
    assert!(report.results.iter().all(|r| !r.heard));
    assert!(session.is_finished());

    let again = session.stop();
    assert_eq!(again.state, SessionState::Stopped);
    assert_eq!(again.results, report.results);
    assert!(!again.to_document().complete);
}

#[test]
fn device_failure_aborts_with_results_kept() {
    let sink = SimulatedSink::default().with_speed(0.0).failing_after(1_024);
    let session = Session::start(config(), sink).unwrap();
    let report = session.wait();

    assert!(matches!(report.state, SessionState::Aborted(ref reason) if reason.contains("disconnected")));
    assert_eq!(report.results.len(), 8);
    assert!(!report.profile.complete);
}

#[test]
fn unusable_device_fails_start() {
    let sink = SimulatedSink {
        channels: 1,
        ..SimulatedSink::default()
    };
    let err = Session::start(config(), sink).err().unwrap();
    assert!(matches!(err, HearingError::AudioDevice(_)));
}

#[test]
fn invalid_configuration_fails_before_playback() {
    let mut bad = config();
    bad.testing.intensity_levels = vec![0.5, 1.5];
    let err = Session::start(bad, SimulatedSink::default()).err().unwrap();
    assert!(matches!(
        err,
        HearingError::InvalidParameter { parameter: "testing.intensity_levels", .. }
    ));

    let mut above_nyquist = config();
    above_nyquist.audio.sample_rate = 8_000;
    above_nyquist.testing.max_frequency = 4_000.0;
    let err = Session::start(above_nyquist, SimulatedSink::default()).err().unwrap();
    assert!(matches!(
        err,
        HearingError::InvalidParameter { parameter: "testing.max_frequency", .. }
    ));
}
