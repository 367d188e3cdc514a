use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};

use tierpoll::{
    api::{Publisher, Transport},
    protocol::{
        DatapointDescriptor, DatapointValue, Decoder, Outcome, PollRequest, Reading,
        RequestHandle, RequestOrigin, Tier, WriteAck,
    },
    scheduler::{
        ConfigAck, ConfigCommand, Coordinator, HealthSnapshot, StartupPolicy, TickAction,
        Timestamp,
    },
};

/// Transport that records every submission and can be told to refuse.
#[derive(Default)]
struct RecordingTransport {
    sent: Vec<(RequestHandle, PollRequest)>,
    refuse: bool,
}

impl Transport for RecordingTransport {
    fn submit(&mut self, request: &PollRequest) -> Result<RequestHandle> {
        if self.refuse {
            bail!("link busy");
        }
        let handle = RequestHandle(100 + self.sent.len() as u64);
        self.sent.push((handle, request.clone()));
        Ok(handle)
    }
}

impl RecordingTransport {
    fn ids(&self) -> Vec<&str> {
        self.sent
            .iter()
            .map(|(_, r)| r.descriptor.id.as_str())
            .collect()
    }
}

#[derive(Default, Clone)]
struct RecordingPublisher {
    readings: Arc<Mutex<Vec<Reading>>>,
    writes: Arc<Mutex<Vec<WriteAck>>>,
    health: Arc<Mutex<Vec<HealthSnapshot>>>,
}

impl Publisher for RecordingPublisher {
    fn publish_reading(&self, reading: &Reading) -> Result<()> {
        self.readings.lock().unwrap().push(reading.clone());
        Ok(())
    }

    fn publish_write(&self, ack: &WriteAck) -> Result<()> {
        self.writes.lock().unwrap().push(ack.clone());
        Ok(())
    }

    fn publish_health(&self, snapshot: &HealthSnapshot) -> Result<()> {
        self.health.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

fn at(ms: u32) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn temp(id: &str, address: u16) -> DatapointDescriptor {
    DatapointDescriptor::new(id, address, 2, Decoder::Div10).unwrap()
}

fn relay(id: &str, address: u16) -> DatapointDescriptor {
    DatapointDescriptor::new(id, address, 1, Decoder::NoConv).unwrap()
}

fn heat_pump(
    startup: StartupPolicy,
) -> (
    Coordinator<RecordingTransport, RecordingPublisher>,
    RecordingPublisher,
) {
    let publisher = RecordingPublisher::default();
    let coordinator = Coordinator::builder()
        .with_group(
            Tier::Fast,
            vec![temp("flow_temp", 0x0105), temp("return_temp", 0x0106)],
            5,
        )
        .with_group(
            Tier::Medium,
            vec![temp("outside_temp", 0x0101), relay("circulation_pump", 0x0490)],
            60,
        )
        .with_group(
            Tier::Slow,
            vec![temp("room_setpoint", 0x2000).with_writable(10.0, 30.0).unwrap()],
            300,
        )
        .with_error_threshold(3)
        .with_startup(startup)
        .build(RecordingTransport::default(), publisher.clone(), at(0))
        .unwrap();
    (coordinator, publisher)
}

fn submitted(action: TickAction) -> RequestHandle {
    match action {
        TickAction::Submitted { handle, .. } => handle,
        other => panic!("expected a submission, got {other:?}"),
    }
}

#[test]
fn test_two_point_fast_group_immediate_startup() {
    let (mut c, publisher) = heat_pump(StartupPolicy::Immediate);

    let h0 = submitted(c.tick(at(0)));
    assert!(c.on_complete(h0, Outcome::Success(vec![0x5F, 0x01])));

    let h1 = submitted(c.tick(at(5050)));
    assert_eq!(c.tick(at(5100)), TickAction::Busy);
    assert!(c.on_complete(h1, Outcome::Success(vec![0x2C, 0x01])));
    assert_eq!(c.group(Tier::Fast).state().index, 0);
    // Point 1 did not start a sweep; the sweep mark is still t=0.
    assert_eq!(c.group(Tier::Fast).state().round_started_at, Some(at(0)));

    submitted(c.tick(at(10_100)));
    assert_eq!(
        c.transport().ids(),
        ["flow_temp", "return_temp", "flow_temp"]
    );
    let fast = c.group(Tier::Fast).state();
    assert_eq!(fast.round_started_at, Some(at(10_100)));
    assert_eq!(fast.last_request_at, Some(at(10_100)));

    let readings = publisher.readings.lock().unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].value, DatapointValue::Float(35.1));
    assert_eq!(readings[1].datapoint, "return_temp");
    assert_eq!(readings[1].value, DatapointValue::Float(30.0));
}

#[test]
fn test_finished_sweep_restarts_once_interval_has_passed() {
    let (mut c, _) = heat_pump(StartupPolicy::Immediate);

    let h0 = submitted(c.tick(at(0)));
    c.on_complete(h0, Outcome::Success(vec![0, 0]));
    let h1 = submitted(c.tick(at(5050)));
    c.on_complete(h1, Outcome::Success(vec![0, 0]));

    // The sweep that started at t=0 is over and more than one interval has
    // passed since, so point 0 goes out again right away.
    let h2 = submitted(c.tick(at(5200)));
    assert_eq!(c.transport().ids(), ["flow_temp", "return_temp", "flow_temp"]);
    let fast = c.group(Tier::Fast).state();
    assert_eq!(fast.round_started_at, Some(at(5200)));
    c.on_complete(h2, Outcome::Success(vec![0, 0]));

    // Point 1 of the new sweep waits until 10200; the unswept medium group fills the gap.
    assert!(matches!(
        c.tick(at(5300)),
        TickAction::Submitted {
            origin: RequestOrigin::Group(Tier::Medium),
            ..
        }
    ));
}

#[test]
fn test_two_point_fast_group_deferred_startup() {
    let (mut c, _) = heat_pump(StartupPolicy::Deferred);

    // The first sweep waits one interval after start-up.
    assert_eq!(c.tick(at(0)), TickAction::Idle);
    assert_eq!(c.tick(at(4999)), TickAction::Idle);

    let h0 = submitted(c.tick(at(5000)));
    c.on_complete(h0, Outcome::Success(vec![0, 0]));
    assert_eq!(c.group(Tier::Fast).state().round_started_at, Some(at(5000)));

    // Point 1 waits for the interval measured from the sweep start.
    assert_eq!(c.tick(at(5100)), TickAction::Idle);
    let h1 = submitted(c.tick(at(10_050)));
    assert_eq!(c.tick(at(10_100)), TickAction::Busy);
    c.on_complete(h1, Outcome::Success(vec![0, 0]));

    submitted(c.tick(at(10_150)));
    assert_eq!(
        c.transport().ids(),
        ["flow_temp", "return_temp", "flow_temp"]
    );
    assert_eq!(
        c.group(Tier::Fast).state().round_started_at,
        Some(at(10_150))
    );
}

#[test]
fn test_never_two_requests_on_the_link() {
    let (mut c, _) = heat_pump(StartupPolicy::Immediate);
    let handle = submitted(c.tick(at(0)));
    for t in (10..2000).step_by(10) {
        assert_eq!(c.tick(at(t)), TickAction::Busy);
    }
    assert_eq!(c.transport().sent.len(), 1);
    c.on_complete(handle, Outcome::Success(vec![0, 0]));
    submitted(c.tick(at(2000)));
    assert_eq!(c.transport().sent.len(), 2);
}

#[test]
fn test_priority_fast_then_medium_then_slow() {
    let (mut c, _) = heat_pump(StartupPolicy::Immediate);
    let mut order = Vec::new();
    let mut now = 0;
    for _ in 0..3 {
        match c.tick(at(now)) {
            TickAction::Submitted { origin, handle } => {
                order.push(origin);
                c.on_complete(handle, Outcome::Success(vec![1, 0]));
            }
            other => panic!("unexpected {other:?}"),
        }
        now += 10;
    }
    assert_eq!(
        order,
        [
            RequestOrigin::Group(Tier::Fast),
            RequestOrigin::Group(Tier::Medium),
            RequestOrigin::Group(Tier::Slow),
        ]
    );
    // Every group is mid-sweep, and the rest of a sweep waits for the interval
    // measured from its start.
    assert_eq!(c.tick(at(now)), TickAction::Idle);
    assert_eq!(c.group(Tier::Fast).state().index, 1);
}

#[test]
fn test_fault_raised_and_cleared_with_health_published() {
    let (mut c, publisher) = heat_pump(StartupPolicy::Immediate);
    let mut now = 0;
    let mut fail_next = |c: &mut Coordinator<RecordingTransport, RecordingPublisher>,
                         outcome: Outcome| {
        // Push time far enough for something to be due every step.
        now += 400_000;
        let handle = submitted(c.tick(at(now)));
        c.on_complete(handle, outcome);
    };

    fail_next(&mut c, Outcome::Failure("no response".into()));
    fail_next(&mut c, Outcome::Failure("no response".into()));
    assert!(!c.is_faulted());
    fail_next(&mut c, Outcome::Failure("no response".into()));
    assert!(c.is_faulted());
    fail_next(&mut c, Outcome::Success(vec![0, 0]));
    assert!(!c.is_faulted());
    fail_next(&mut c, Outcome::Failure("no response".into()));
    fail_next(&mut c, Outcome::Failure("no response".into()));
    assert!(!c.is_faulted());
    assert_eq!(c.errors().total_failures(), 5);

    let health = publisher.health.lock().unwrap();
    assert_eq!(health.len(), 2);
    assert!(health[0].faulted);
    assert!(!health[1].faulted);
}

#[test]
fn test_failures_still_advance_the_sweep() {
    let (mut c, publisher) = heat_pump(StartupPolicy::Immediate);
    let h = submitted(c.tick(at(0)));
    c.on_complete(h, Outcome::Failure("checksum".into()));
    assert_eq!(c.group(Tier::Fast).state().index, 1);
    assert!(publisher.readings.lock().unwrap().is_empty());
}

#[test]
fn test_timeout_then_late_completion() {
    let (mut c, _) = heat_pump(StartupPolicy::Immediate);
    let h = submitted(c.tick(at(0)));
    assert_eq!(c.tick(at(2999)), TickAction::Busy);
    assert_eq!(
        c.tick(at(3000)),
        TickAction::TimedOut {
            origin: RequestOrigin::Group(Tier::Fast),
            handle: h
        }
    );
    assert!(!c.on_complete(h, Outcome::Success(vec![0, 0])));
    assert_eq!(c.errors().consecutive_failures(), 1);
    // The link is free again on the following tick.
    assert!(matches!(c.tick(at(3001)), TickAction::Submitted { .. }));
}

#[test]
fn test_refused_submission_retries_next_tick() {
    let (mut c, _) = heat_pump(StartupPolicy::Immediate);
    c.transport_mut().refuse = true;
    assert_eq!(
        c.tick(at(0)),
        TickAction::Refused {
            origin: RequestOrigin::Group(Tier::Fast)
        }
    );
    assert_eq!(c.errors().total_failures(), 0);
    c.transport_mut().refuse = false;
    submitted(c.tick(at(10)));
    assert_eq!(c.transport().ids(), ["flow_temp"]);
}

#[test]
fn test_configuration_is_clamped_and_reported() -> Result<()> {
    let (mut c, _) = heat_pump(StartupPolicy::Deferred);
    assert_eq!(
        c.apply("interval fast 1".parse::<ConfigCommand>()?)?,
        ConfigAck::GroupInterval {
            tier: Tier::Fast,
            seconds: 5
        }
    );
    assert_eq!(c.interval_ms(Tier::Fast), 5000);
    assert_eq!(
        c.apply("threshold 500".parse::<ConfigCommand>()?)?,
        ConfigAck::ErrorThreshold(100)
    );
    assert_eq!(
        c.apply("threshold 0".parse::<ConfigCommand>()?)?,
        ConfigAck::ErrorThreshold(1)
    );
    assert_eq!(
        c.apply("interval medium 100000".parse::<ConfigCommand>()?)?,
        ConfigAck::GroupInterval {
            tier: Tier::Medium,
            seconds: 600
        }
    );
    Ok(())
}

#[test]
fn test_write_round_trip_publishes_ack() -> Result<()> {
    let (mut c, publisher) = heat_pump(StartupPolicy::Deferred);
    c.apply(ConfigCommand::QueueWrite {
        datapoint: "room_setpoint".into(),
        value: DatapointValue::Float(20.5),
    })?;
    // Writes go out even when no group is due.
    let handle = submitted(c.tick(at(0)));
    c.on_complete(handle, Outcome::Failure("nak".into()));
    assert_eq!(c.errors().consecutive_failures(), 1);

    let acks = publisher.writes.lock().unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].datapoint, "room_setpoint");
    assert!(!acks[0].success);
    assert_eq!(c.tick(at(1)), TickAction::Idle);
    Ok(())
}

#[test]
fn test_queued_writes_do_not_starve_fast_group() -> Result<()> {
    let (mut c, publisher) = heat_pump(StartupPolicy::Immediate);
    let mut fast_at = Vec::new();
    let mut writes = 0;
    for step in 0..50u32 {
        let now = step * 200;
        if c.health().pending_writes == 0 {
            c.queue_write("room_setpoint", DatapointValue::Float(21.0))?;
        }
        let (origin, handle) = match c.tick(at(now)) {
            TickAction::Submitted { origin, handle } => (origin, handle),
            other => panic!("unexpected {other:?} at {now}"),
        };
        match origin {
            RequestOrigin::Group(Tier::Fast) => fast_at.push(now),
            RequestOrigin::Write => writes += 1,
            RequestOrigin::Group(_) => {}
        }
        c.on_complete(handle, Outcome::Success(vec![0, 0]));
    }
    assert_eq!(fast_at, [0, 5000, 5200]);
    assert_eq!(writes, 45);
    assert_eq!(publisher.writes.lock().unwrap().len(), 45);
    Ok(())
}

#[test]
fn test_writes_to_sensors_and_out_of_range_values_are_rejected() {
    let (mut c, _) = heat_pump(StartupPolicy::Deferred);
    assert!(c
        .queue_write("outside_temp", DatapointValue::Float(99.0))
        .is_err());
    assert!(c
        .apply(ConfigCommand::QueueWrite {
            datapoint: "room_setpoint".into(),
            value: DatapointValue::Float(500.0),
        })
        .is_err());
    assert_eq!(c.health().pending_writes, 0);
    assert_eq!(c.tick(at(0)), TickAction::Idle);
}

#[test]
fn test_due_check_survives_clock_rollover() {
    let start = u32::MAX - 1000;
    let (mut c, _) = heat_pump(StartupPolicy::Immediate);
    let h = submitted(c.tick(at(start)));
    c.on_complete(h, Outcome::Success(vec![0, 0]));
    // Medium and slow start their first sweep.
    for t in [start + 1, start + 2] {
        let h = submitted(c.tick(at(t)));
        c.on_complete(h, Outcome::Success(vec![0, 0]));
    }
    assert_eq!(c.tick(at(3998)), TickAction::Idle);
    assert!(matches!(
        c.tick(at(3999)),
        TickAction::Submitted {
            origin: RequestOrigin::Group(Tier::Fast),
            ..
        }
    ));
}
