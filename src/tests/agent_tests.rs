//! # Control Loop Scenarios
//!
//! End-to-end behaviour of the agent: detection feeding transmission, heartbeat
//! cadence, reconnect budgets, authentication failures and the display rotation.
//! Time only moves when the agent sleeps, so every run is deterministic.

use super::support::{
    test_config, Harness, RecordingPanel, RecordingPoster, ScriptedMeter, SwitchLink,
    UnpluggedOled,
};
use crate::agent::Agent;
use crate::clock::{Clock, ManualClock};
use crate::display::panel::{DisplayError, GraphicPanel, MonoFrameBuffer};
use crate::display::DisplayView;
use crate::sensor::SensorAcquisition;
use crate::transmit::{TransmissionClient, TransmitSettings};
use proptest::prelude::*;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// A 25 W step against a 20 W threshold is an event.
#[test]
fn step_above_threshold_is_sent_as_event() {
    let mut h = Harness::start(
        ScriptedMeter::new(vec![Some(100.0), Some(125.0)]),
        SwitchLink::up(),
        RecordingPoster::always(200),
    );

    // 0 W -> 100 W on the very first sample
    assert!(h.agent.run_once().event);
    assert_eq!(h.agent.state().counters.events_detected(), 1);

    h.agent.sleep_until_next_due();
    let iteration = h.agent.run_once();
    assert!(iteration.sampled);
    assert!(iteration.event);
    assert_eq!(h.agent.state().counters.events_detected(), 2);
    assert_eq!(h.poster.count_of("event"), 2);
    assert_eq!(h.agent.state().counters.data_points_sent(), 2);
}

/// A 15 W step against a 20 W threshold is not.
#[test]
fn step_below_threshold_is_not_an_event() {
    let mut h = Harness::start(
        ScriptedMeter::new(vec![Some(100.0), Some(115.0)]),
        SwitchLink::up(),
        RecordingPoster::always(200),
    );

    h.agent.run_once();
    h.agent.sleep_until_next_due();
    let iteration = h.agent.run_once();

    assert!(iteration.sampled);
    assert!(!iteration.event);
    assert_eq!(h.agent.state().counters.events_detected(), 1);
    assert_eq!(h.poster.count(), 1);
    assert_eq!(
        h.agent.state().latest.map(|sample| sample.power),
        Some(115.0)
    );
}

/// 401 enters the auth-failure state, shows the overlay and is neither counted
/// as a failure nor retried.
#[test]
fn rejected_api_key_shows_overlay_without_counting_failure() {
    let mut h = Harness::start(
        ScriptedMeter::constant(100.0),
        SwitchLink::up(),
        RecordingPoster::always(401),
    );

    let iteration = h.agent.run_once();
    assert!(iteration.event);
    assert!(iteration.fault);

    let state = h.agent.state();
    assert!(state.auth_failed);
    assert_eq!(state.last_status, Some(401));
    assert_eq!(state.counters.failed_requests(), 0);
    assert_eq!(state.counters.data_points_sent(), 0);
    assert_eq!(h.poster.count(), 1);
    assert_eq!(h.panel.last_title().as_deref(), Some("! AUTH FAILED"));

    // No retry while the power stays flat; the Network view keeps flagging it
    h.run_until(secs(9));
    assert_eq!(h.poster.count(), 1);
    assert_eq!(h.agent.view(), DisplayView::NetworkStatus);
    let frames = h.panel.frames.borrow();
    let network = frames.last().unwrap();
    assert_eq!(network.title, "Network");
    assert!(network.alert);
    assert!(network.lines.iter().any(|line| line == "AUTH FAIL"));
}

#[test]
fn successful_send_clears_auth_failure() {
    let mut h = Harness::start(
        ScriptedMeter::constant(100.0),
        SwitchLink::up(),
        RecordingPoster::new(vec![Some(401), Some(200)]),
    );

    h.agent.run_once();
    assert!(h.agent.state().auth_failed);

    // The heartbeat at 10 s goes through
    h.run_until(secs(10));
    let state = h.agent.state();
    assert!(!state.auth_failed);
    assert_eq!(state.last_status, Some(200));
    assert_eq!(state.counters.data_points_sent(), 1);
    assert_eq!(state.counters.failed_requests(), 0);
    assert_eq!(h.poster.count_of("periodic"), 1);
}

/// Link down and every one of the 10 reconnect attempts fails: the send is
/// dropped and counted once.
#[test]
fn exhausted_reconnect_budget_counts_one_failure() {
    let mut h = Harness::start(
        ScriptedMeter::constant(100.0),
        SwitchLink::down(),
        RecordingPoster::always(200),
    );

    // The startup check spends a budget too, but counts nothing
    assert_eq!(h.link.reconnects.get(), 10);
    assert_eq!(h.agent.state().counters.failed_requests(), 0);
    assert_eq!(h.clock.now(), Duration::from_millis(4500));

    let iteration = h.agent.run_once();
    assert!(iteration.event);
    assert_eq!(h.link.reconnects.get(), 20);

    let state = h.agent.state();
    assert_eq!(state.counters.failed_requests(), 1);
    assert_eq!(state.counters.data_points_sent(), 0);
    assert!(!state.connectivity.is_connected());
    assert_eq!(state.connectivity.reconnect_attempts(), 10);
    assert_eq!(h.poster.count(), 0);
    assert_eq!(h.panel.last_title().as_deref(), Some("! NO NETWORK"));
}

#[test]
fn sustained_outage_fails_every_send_exactly_once() {
    let mut h = Harness::start(
        ScriptedMeter::new(vec![Some(100.0), Some(400.0), Some(90.0), Some(90.0)]),
        SwitchLink::down(),
        RecordingPoster::always(200),
    );

    let iterations = h.run_until(secs(60));
    let attempted = iterations
        .iter()
        .map(|it| usize::from(it.event) + usize::from(it.heartbeat))
        .sum::<usize>() as u64;

    let counters = &h.agent.state().counters;
    assert!(attempted >= 3, "attempted {attempted}");
    assert_eq!(counters.failed_requests(), attempted);
    assert_eq!(counters.data_points_sent(), 0);
    assert_eq!(h.poster.count(), 0);
    assert_eq!(u64::from(h.link.reconnects.get()), 10 * (attempted + 1));
}

#[test]
fn link_recovery_resumes_delivery() {
    let mut h = Harness::start(
        ScriptedMeter::constant(100.0),
        SwitchLink::down(),
        RecordingPoster::always(200),
    );

    h.agent.run_once();
    assert_eq!(h.agent.state().counters.failed_requests(), 1);

    h.link.up.set(true);
    h.run_until(secs(20));
    let state = h.agent.state();
    assert!(state.connectivity.is_connected());
    assert_eq!(state.connectivity.reconnect_attempts(), 0);
    assert!(state.counters.data_points_sent() >= 1);
    assert_eq!(state.counters.failed_requests(), 1);
}

/// 10 s heartbeat, flat load, 25 s of stable connectivity: at least two heartbeats.
#[test]
fn heartbeat_fires_without_events() {
    let mut h = Harness::start(
        ScriptedMeter::constant(10.0),
        SwitchLink::up(),
        RecordingPoster::always(200),
    );

    let iterations = h.run_until(secs(25));

    assert!(iterations.iter().all(|it| !it.event));
    assert_eq!(iterations.iter().filter(|it| it.heartbeat).count(), 2);
    assert!(h.poster.count_of("periodic") >= 2);
    assert_eq!(h.poster.count_of("event"), 0);
    assert_eq!(h.agent.state().counters.events_detected(), 0);
    assert_eq!(h.agent.state().counters.data_points_sent(), 2);
}

#[test]
fn heartbeat_waits_for_first_valid_sample() {
    let mut h = Harness::start(
        ScriptedMeter::new(vec![None]),
        SwitchLink::up(),
        RecordingPoster::always(200),
    );

    let iterations = h.run_until(secs(25));

    assert!(iterations.iter().all(|it| !it.sampled && !it.heartbeat));
    assert!(h.agent.state().latest.is_none());
    assert_eq!(h.poster.count(), 0);
    assert_eq!(h.agent.state().counters.failed_requests(), 0);
}

/// The sensor overlay replaces the view for one frame only; the next tick
/// shows the view the rotation would have reached anyway.
#[test]
fn sensor_overlay_lasts_until_next_display_tick() {
    let mut h = Harness::start(
        ScriptedMeter::new(vec![None, Some(10.0)]),
        SwitchLink::up(),
        RecordingPoster::always(200),
    );

    let first = h.agent.run_once();
    assert!(first.fault);
    assert!(!first.sampled);
    assert_eq!(h.panel.last_title().as_deref(), Some("! SENSOR ERROR"));

    h.run_until(secs(3));
    assert_eq!(
        h.panel.titles(),
        vec!["Voltage/Current", "! SENSOR ERROR", "Power/Energy"]
    );
}

/// Views advance every 3 s in fixed order whatever the meter and endpoint do.
#[test]
fn display_period_ignores_sensor_and_network_activity() {
    let powers = (0..60)
        .map(|i| match i % 3 {
            0 => Some(0.0),
            1 => Some(500.0),
            _ => None,
        })
        .collect();
    let mut h = Harness::start(
        ScriptedMeter::new(powers),
        SwitchLink::up(),
        RecordingPoster::new(vec![Some(200), Some(500), None, Some(401), Some(429)]),
    );

    let mut visited = Vec::new();
    while h.clock.now() <= secs(45) {
        h.agent.run_once();
        let expected = (h.clock.now().as_millis() / 3000 % 5) as usize;
        assert_eq!(h.agent.view().index(), expected, "at {:?}", h.clock.now());
        if visited.last() != Some(&h.agent.view()) {
            visited.push(h.agent.view());
        }
        h.agent.sleep_until_next_due();
    }

    assert_eq!(&visited[..5], &DisplayView::ALL);
    assert_eq!(&visited[5..10], &DisplayView::ALL);
}

#[test]
fn display_failure_at_startup_is_fatal() {
    let config = test_config();
    let panel = RecordingPanel {
        fail_init: true,
        ..RecordingPanel::default()
    };
    let transmitter = TransmissionClient::new(
        TransmitSettings::from(&config.network),
        Box::new(SwitchLink::up()),
        Box::new(RecordingPoster::always(200)),
    );

    let started = Agent::start(
        &config,
        ManualClock::new(),
        SensorAcquisition::new(Box::new(ScriptedMeter::constant(10.0))),
        transmitter,
        Box::new(panel.clone()),
    );

    assert!(started.is_err());
    assert!(panel.frames.borrow().is_empty());
}

/// A graphics panel whose bus does not answer stops startup before anything is
/// sampled or sent.
#[test]
fn unanswered_display_bus_is_fatal() {
    let config = test_config();
    let link = SwitchLink::up();
    let poster = RecordingPoster::always(200);
    let transmitter = TransmissionClient::new(
        TransmitSettings::from(&config.network),
        Box::new(link.clone()),
        Box::new(poster.clone()),
    );

    let started = Agent::start(
        &config,
        ManualClock::new(),
        SensorAcquisition::new(Box::new(ScriptedMeter::constant(10.0))),
        transmitter,
        Box::new(GraphicPanel::new(UnpluggedOled(MonoFrameBuffer::new(128, 64)))),
    );

    assert!(matches!(started, Err(DisplayError::Bus(_))));
    assert_eq!(link.reconnects.get(), 0);
    assert_eq!(poster.count(), 0);
}

#[test]
fn run_honours_stop_flag_and_iteration_limit() {
    let mut h = Harness::start(
        ScriptedMeter::constant(10.0),
        SwitchLink::up(),
        RecordingPoster::always(200),
    );

    assert_eq!(h.agent.run(&AtomicBool::new(false), None), 0);
    assert_eq!(h.clock.now(), Duration::ZERO);

    assert_eq!(h.agent.run(&AtomicBool::new(true), Some(3)), 3);
    assert_eq!(h.clock.now(), secs(2));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the endpoint answers and however the link flaps, no counter
    /// ever goes backwards.
    #[test]
    fn counters_never_decrease(
        statuses in prop::collection::vec(
            prop::option::of(prop::sample::select(vec![200u16, 201, 400, 401, 429, 500])),
            1..20,
        ),
        link_states in prop::collection::vec(any::<bool>(), 1..20),
        powers in prop::collection::vec(prop::option::of(0.0f32..3000.0), 1..40),
    ) {
        let link = SwitchLink::up();
        let mut h = Harness::start(ScriptedMeter::new(powers), link.clone(), RecordingPoster::new(statuses));

        let mut previous = (0, 0, 0);
        for step in 0..40 {
            link.up.set(link_states[step % link_states.len()]);
            h.agent.run_once();
            h.agent.sleep_until_next_due();

            let counters = &h.agent.state().counters;
            let current = (
                counters.data_points_sent(),
                counters.events_detected(),
                counters.failed_requests(),
            );
            prop_assert!(current.0 >= previous.0);
            prop_assert!(current.1 >= previous.1);
            prop_assert!(current.2 >= previous.2);
            previous = current;
        }
    }
}
