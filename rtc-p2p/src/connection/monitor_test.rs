use super::monitor::*;
use super::*;
use std::time::{Duration, Instant};

fn drain(monitor: &mut ConnectionMonitor) -> Vec<ConnectionEvent> {
    let mut events = vec![];
    while let Some(event) = monitor.poll_event() {
        events.push(event);
    }
    events
}

fn writable_monitor(now: Instant) -> ConnectionMonitor {
    let mut monitor = ConnectionMonitor::new();
    monitor.ping(now);
    monitor.received_ping_response(Duration::from_millis(100));
    drain(&mut monitor);
    monitor
}

#[test]
fn test_monitor_initial_state() {
    let monitor = ConnectionMonitor::new();
    assert_eq!(monitor.read_state(), ReadState::Init);
    assert_eq!(monitor.write_state(), WriteState::Init);
    assert_eq!(monitor.state(), CandidatePairState::Waiting);
    assert!(monitor.connected());
    assert_eq!(monitor.rtt(), DEFAULT_RTT);
    assert_eq!(monitor.last_ping_sent(), None);
}

#[test]
fn test_monitor_ping_and_response() {
    let now = Instant::now();
    let mut monitor = ConnectionMonitor::new();

    monitor.ping(now);
    assert_eq!(monitor.state(), CandidatePairState::InProgress);
    assert_eq!(monitor.last_ping_sent(), Some(now));
    assert_eq!(monitor.pending_pings(), 1);
    assert!(drain(&mut monitor).is_empty());

    monitor.received_ping_response(Duration::from_millis(200));
    assert_eq!(monitor.write_state(), WriteState::Writable);
    assert_eq!(monitor.state(), CandidatePairState::Succeeded);
    assert_eq!(monitor.pending_pings(), 0);
    // (3 * 3000 + 200) / 4
    assert_eq!(monitor.rtt(), Duration::from_millis(2300));
    assert_eq!(drain(&mut monitor), vec![ConnectionEvent::StateChange]);
}

#[test]
fn test_monitor_read_timeout() {
    let now = Instant::now();
    let mut monitor = ConnectionMonitor::new();

    monitor.received_ping(now);
    assert_eq!(monitor.read_state(), ReadState::Readable);
    assert_eq!(drain(&mut monitor), vec![ConnectionEvent::StateChange]);

    monitor.update_state(now + CONNECTION_READ_TIMEOUT - Duration::from_millis(1));
    assert_eq!(monitor.read_state(), ReadState::Readable);

    monitor.update_state(now + CONNECTION_READ_TIMEOUT);
    assert_eq!(monitor.read_state(), ReadState::Timeout);
    assert_eq!(drain(&mut monitor), vec![ConnectionEvent::StateChange]);
}

#[test]
fn test_monitor_writable_becomes_unreliable() {
    let start = Instant::now();
    let mut monitor = writable_monitor(start);

    for i in 0..CONNECTION_WRITE_CONNECT_FAILURES as u64 {
        monitor.ping(start + Duration::from_millis(100 * i));
    }

    // five failures but the first ping is not yet 5 seconds old
    monitor.update_state(start + Duration::from_secs(4));
    assert_eq!(monitor.write_state(), WriteState::Writable);

    monitor.update_state(start + CONNECTION_WRITE_CONNECT_TIMEOUT + Duration::from_millis(1));
    assert_eq!(monitor.write_state(), WriteState::Unreliable);
    assert_eq!(drain(&mut monitor), vec![ConnectionEvent::StateChange]);

    monitor.update_state(start + CONNECTION_WRITE_TIMEOUT + Duration::from_millis(1));
    assert_eq!(monitor.write_state(), WriteState::Timeout);
}

#[test]
fn test_monitor_too_few_failures_stay_writable() {
    let start = Instant::now();
    let mut monitor = writable_monitor(start);

    for i in 0..(CONNECTION_WRITE_CONNECT_FAILURES as u64 - 1) {
        monitor.ping(start + Duration::from_millis(100 * i));
    }

    monitor.update_state(start + Duration::from_secs(10));
    assert_eq!(monitor.write_state(), WriteState::Writable);
}

#[test]
fn test_monitor_init_times_out() {
    let start = Instant::now();
    let mut monitor = ConnectionMonitor::new();

    monitor.ping(start);
    monitor.update_state(start + CONNECTION_WRITE_TIMEOUT);
    assert_eq!(monitor.write_state(), WriteState::Init);

    monitor.update_state(start + CONNECTION_WRITE_TIMEOUT + Duration::from_millis(1));
    assert_eq!(monitor.write_state(), WriteState::Timeout);
}

#[test]
fn test_monitor_received_ping_revives_timed_out_writer() {
    let now = Instant::now();
    let mut monitor = ConnectionMonitor::new();

    monitor.received_error_response(400);
    assert_eq!(monitor.write_state(), WriteState::Timeout);
    assert_eq!(monitor.state(), CandidatePairState::Failed);

    monitor.received_ping(now);
    assert_eq!(monitor.write_state(), WriteState::Init);
}

#[test]
fn test_monitor_pruned_stays_timed_out() {
    let now = Instant::now();
    let mut monitor = writable_monitor(now);

    monitor.prune();
    assert!(monitor.pruned());
    assert_eq!(monitor.write_state(), WriteState::Timeout);

    monitor.received_ping(now);
    assert_eq!(monitor.write_state(), WriteState::Timeout);

    // a response still brings it back
    monitor.received_ping_response(Duration::from_millis(50));
    assert_eq!(monitor.write_state(), WriteState::Writable);
}

#[test]
fn test_monitor_recoverable_error_responses() {
    let mut monitor = ConnectionMonitor::new();

    for code in [420, 487, 500, 401, 430] {
        monitor.received_error_response(code);
        assert_eq!(monitor.write_state(), WriteState::Init, "code {code}");
    }
    assert!(drain(&mut monitor).is_empty());
}

#[test]
fn test_monitor_destroy_reports_once() {
    let now = Instant::now();
    let mut monitor = writable_monitor(now);

    monitor.destroy();
    assert_eq!(monitor.read_state(), ReadState::Timeout);
    assert_eq!(monitor.write_state(), WriteState::Timeout);
    assert_eq!(
        drain(&mut monitor),
        vec![
            ConnectionEvent::StateChange,
            ConnectionEvent::StateChange,
            ConnectionEvent::Destroyed
        ]
    );

    monitor.destroy();
    monitor.update_state(now + Duration::from_secs(60));
    assert!(drain(&mut monitor).is_empty());
}

#[test]
fn test_pair_priority() {
    let host = 2130706431;
    let srflx = 1694498815;

    assert_eq!(pair_priority(host, host, true), pair_priority(host, host, false));
    assert_eq!(
        pair_priority(host, srflx, true),
        pair_priority(host, srflx, false) + 1
    );
    assert_eq!(pair_priority(host, srflx, true), pair_priority(srflx, host, false));
    assert!(pair_priority(host, host, true) > pair_priority(host, srflx, true));
}
