use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hearing_core::HearingConfig;
use hearing_core::correlate::{ResponseEvent, ResponseOutcome};
use hearing_core::playback::SimulatedSink;
use hearing_core::session::{Session, SessionState};

/// Eight stimuli with roughly 1 s gaps: far longer than any test here runs.
fn config() -> HearingConfig {
    let mut config = HearingConfig::default();
    config.testing.frequency_bands = 2;
    config.testing.min_frequency = 500.0;
    config.testing.max_frequency = 2_000.0;
    config.testing.intensity_levels = vec![0.3, 1.0];
    config.testing.seed = Some(11);
    config
}

#[test]
fn stop_from_another_thread_ends_a_waiting_session() {
    let session = Arc::new(Session::start(config(), SimulatedSink::default().with_speed(1.0)).unwrap());
    let stimulus_count = session.timeline().stimulus_count();
    assert_eq!(stimulus_count, 8);

    let responder = {
        let session = session.clone();
        thread::spawn(move || {
            let mut outcomes = Vec::new();
            while !session.is_finished() {
                outcomes.push(session.respond_now());
                thread::sleep(Duration::from_millis(5));
            }
            outcomes
        })
    };
    let stopper = {
        let session = session.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            session.stop()
        })
    };

    let started = Instant::now();
    let waited = session.wait();
    assert!(started.elapsed() < Duration::from_secs(5));

    let stopped = stopper.join().unwrap();
    let outcomes = responder.join().unwrap();

    assert_eq!(waited.state, SessionState::Stopped);
    assert_eq!(stopped.state, SessionState::Stopped);
    assert_eq!(waited.results.len(), stimulus_count);
    assert_eq!(waited.results, stopped.results);
    assert!(!waited.profile.complete);

    // Only the first stimulus can have started in 300 ms, so at most it is heard.
    let scored = outcomes.iter().filter(|o| o.scored().is_some()).count();
    assert!(scored <= 1, "scored {scored} responses");
    assert_eq!(
        waited.results.iter().filter(|r| r.heard).count(),
        scored
    );

    assert_eq!(
        session.submit_response(ResponseEvent::at(0.1)),
        ResponseOutcome::AfterFinalize
    );
}

#[test]
fn concurrent_stops_agree() {
    let session = Arc::new(Session::start(config(), SimulatedSink::default().with_speed(1.0)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || session.stop())
        })
        .collect();
    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for report in &reports {
        assert_eq!(report.state, SessionState::Stopped);
        assert_eq!(report.results, reports[0].results);
    }
    assert!(session.is_finished());
}
