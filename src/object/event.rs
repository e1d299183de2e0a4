//! Intrinsic Reporting
//!
//! Built-in alarm/event detection performed by the object itself. Each
//! monitored point carries an [`IntrinsicReporting`] block with its limits,
//! time-delay hysteresis counters and acknowledgment bookkeeping. The
//! evaluator runs once per monitoring tick per object and hands realized
//! transitions to the injected [`NotificationSink`], the seam to the
//! Notification Class fan-out.
//!
//! State machine: NORMAL moves to HIGH_LIMIT or LOW_LIMIT after the limit
//! condition holds for `time_delay` consecutive ticks; a reliability fault
//! preempts everything and forces FAULT; fault recovery returns to NORMAL
//! with no delay. Returning from a limit state requires the present value
//! to clear the limit by `deadband`, sustained the same way, or happens
//! immediately when the limit-enable bit is cleared administratively.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use log::debug;

use crate::object::commandable::CommandableStore;
use crate::object::{EventState, ObjectError, ObjectIdentifier, Reliability, Result, StatusFlags};

bitflags! {
    /// Which limits the point monitors
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct LimitEnable: u8 {
        const LOW_LIMIT = 1 << 0;
        const HIGH_LIMIT = 1 << 1;
    }
}

bitflags! {
    /// Which transitions produce notifications
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventEnable: u8 {
        const TO_OFFNORMAL = 1 << 0;
        const TO_FAULT = 1 << 1;
        const TO_NORMAL = 1 << 2;
    }
}

impl Default for EventEnable {
    fn default() -> Self {
        EventEnable::all()
    }
}

/// The three acknowledgable transition categories, in the protocol's
/// array order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    ToOffnormal = 0,
    ToFault = 1,
    ToNormal = 2,
}

impl TransitionKind {
    pub fn index(self) -> usize {
        self as usize
    }

    /// Transition category a move into `state` belongs to.
    pub fn for_state(state: EventState) -> Self {
        match state {
            EventState::Offnormal | EventState::HighLimit | EventState::LowLimit => {
                TransitionKind::ToOffnormal
            }
            EventState::Fault => TransitionKind::ToFault,
            EventState::Normal => TransitionKind::ToNormal,
        }
    }

    fn enable_bit(self) -> EventEnable {
        match self {
            TransitionKind::ToOffnormal => EventEnable::TO_OFFNORMAL,
            TransitionKind::ToFault => EventEnable::TO_FAULT,
            TransitionKind::ToNormal => EventEnable::TO_NORMAL,
        }
    }
}

/// Acknowledgment state for one transition category
#[derive(Debug, Clone, Copy)]
pub struct AckEntry {
    pub acked: bool,
    pub time_stamp: Option<DateTime<Utc>>,
}

impl Default for AckEntry {
    fn default() -> Self {
        Self {
            acked: true,
            time_stamp: None,
        }
    }
}

/// Per-transition acknowledgment bookkeeping
#[derive(Debug, Clone, Copy, Default)]
pub struct AckedTransitions {
    entries: [AckEntry; 3],
}

impl AckedTransitions {
    pub fn get(&self, kind: TransitionKind) -> AckEntry {
        self.entries[kind.index()]
    }

    fn get_mut(&mut self, kind: TransitionKind) -> &mut AckEntry {
        &mut self.entries[kind.index()]
    }
}

/// An alarm acknowledgment received from a client
#[derive(Debug, Clone, Copy)]
pub struct AlarmAck {
    /// Event state whose transition is being acknowledged
    pub event_state_acked: EventState,
    /// Client's timestamp; must not predate the recorded transition
    pub time_stamp: DateTime<Utc>,
}

/// Fully populated event-notification record handed to the fan-out layer.
#[derive(Debug, Clone)]
pub struct EventNotification {
    pub object: ObjectIdentifier,
    pub notification_class: u32,
    pub from_state: EventState,
    pub to_state: EventState,
    pub exceeded_limit: f32,
    pub status_flags: StatusFlags,
    pub message: String,
    pub time_stamp: DateTime<Utc>,
    /// True for acknowledgment notifications, false for state transitions
    pub ack_notification: bool,
}

/// Seam to the Notification Class fan-out collaborator.
pub trait NotificationSink {
    fn notify(&mut self, event: EventNotification);
}

/// Intrinsic-reporting configuration and state for one point.
#[derive(Debug, Clone)]
pub struct IntrinsicReporting {
    pub high_limit: f32,
    pub low_limit: f32,
    pub deadband: f32,
    /// Hysteresis in monitoring ticks
    pub time_delay: u32,
    /// Countdown toward the next limit transition; resets to `time_delay`
    /// whenever the triggering condition is not met
    pub remaining_time_delay: u32,
    pub limit_enable: LimitEnable,
    pub event_enable: EventEnable,
    pub notification_class: u32,
    pub acked_transitions: AckedTransitions,
    pub event_time_stamps: [Option<DateTime<Utc>>; 3],
    /// Pending ack notification; flushed before new transitions are
    /// evaluated, so at most one notification leaves per tick
    ack_notify: Option<EventState>,
    /// Reliability code that produced the current FAULT state
    last_fault: Reliability,
}

impl IntrinsicReporting {
    pub fn new(high_limit: f32, low_limit: f32, deadband: f32, time_delay: u32) -> Self {
        Self {
            high_limit,
            low_limit,
            deadband,
            time_delay,
            remaining_time_delay: time_delay,
            limit_enable: LimitEnable::empty(),
            event_enable: EventEnable::all(),
            notification_class: 0,
            acked_transitions: AckedTransitions::default(),
            event_time_stamps: [None; 3],
            ack_notify: None,
            last_fault: Reliability::NoFaultDetected,
        }
    }
}

/// Outcome of one tick's guard evaluation
enum TickOutcome {
    None,
    AckNotify {
        state: EventState,
        notification_class: u32,
    },
    Transition {
        to: EventState,
        exceeded: f32,
    },
}

impl CommandableStore {
    /// Run one intrinsic-reporting tick for `instance`.
    ///
    /// Points without the intrinsic-reporting capability, or with all
    /// limit-enable bits clear, are skipped without state change.
    pub fn intrinsic_reporting(&mut self, instance: u32, sink: &mut dyn NotificationSink) {
        let object = self.object_id(instance);
        let Some(point) = self.point_mut(instance) else {
            return;
        };
        let present_value = point.present_value();
        let reliability = point.reliability;
        let from_state = point.event_state;

        let outcome = {
            let Some(ev) = point.event.as_mut() else {
                return;
            };
            // monitoring disabled
            if ev.limit_enable.is_empty() {
                return;
            }
            if let Some(state) = ev.ack_notify.take() {
                TickOutcome::AckNotify {
                    state,
                    notification_class: ev.notification_class,
                }
            } else {
                evaluate_tick(ev, from_state, present_value, reliability)
            }
        };

        match outcome {
            TickOutcome::None => {}
            TickOutcome::AckNotify {
                state,
                notification_class,
            } => {
                let status_flags = point.status_flags();
                let notification = EventNotification {
                    object,
                    notification_class,
                    from_state: state,
                    to_state: state,
                    exceeded_limit: 0.0,
                    status_flags,
                    message: format!("{:?} transition acknowledged", state),
                    time_stamp: Utc::now(),
                    ack_notification: true,
                };
                debug!(
                    "intrinsic: {:?} instance {} ack-notify {:?}",
                    object.object_type, instance, state
                );
                sink.notify(notification);
            }
            TickOutcome::Transition { to, exceeded } => {
                point.event_state = to;
                let status_flags = point.status_flags();
                let now = Utc::now();
                let Some(ev) = point.event.as_mut() else {
                    return;
                };
                let kind = TransitionKind::for_state(to);
                ev.event_time_stamps[kind.index()] = Some(now);
                if to == EventState::Fault {
                    ev.last_fault = reliability;
                }
                if ev.event_enable.contains(kind.enable_bit()) {
                    ev.acked_transitions.get_mut(kind).acked = false;
                    let notification = EventNotification {
                        object,
                        notification_class: ev.notification_class,
                        from_state,
                        to_state: to,
                        exceeded_limit: exceeded,
                        status_flags,
                        message: format!("{:?} to {:?}", from_state, to),
                        time_stamp: now,
                        ack_notification: false,
                    };
                    debug!(
                        "intrinsic: {:?} instance {} {:?} -> {:?}",
                        object.object_type, instance, from_state, to
                    );
                    sink.notify(notification);
                }
            }
        }
    }

    /// Acknowledge an alarm transition.
    ///
    /// Stale acknowledgments (timestamp earlier than the recorded
    /// transition) are rejected; acknowledging a transition that is not
    /// pending and does not match the current event state is rejected.
    pub fn alarm_ack(&mut self, instance: u32, ack: AlarmAck) -> Result<()> {
        let point = self
            .point_mut(instance)
            .ok_or(ObjectError::UnknownObject)?;
        let event_state = point.event_state;
        let ev = point.event.as_mut().ok_or(ObjectError::InvalidEventState)?;

        let kind = TransitionKind::for_state(ack.event_state_acked);
        let recorded = ev.event_time_stamps[kind.index()].ok_or(ObjectError::InvalidEventState)?;
        if ev.acked_transitions.get(kind).acked && ack.event_state_acked != event_state {
            return Err(ObjectError::InvalidEventState);
        }
        if ack.time_stamp < recorded {
            return Err(ObjectError::InvalidTimeStamp);
        }
        let entry = ev.acked_transitions.get_mut(kind);
        entry.acked = true;
        entry.time_stamp = Some(ack.time_stamp);
        ev.ack_notify = Some(ack.event_state_acked);
        Ok(())
    }
}

/// Evaluate the guard chain for one tick. Fault preempts limit logic; limit
/// transitions consume the time-delay countdown; a non-qualifying tick
/// resets the countdown (no partial credit).
fn evaluate_tick(
    ev: &mut IntrinsicReporting,
    from_state: EventState,
    present_value: f32,
    reliability: Reliability,
) -> TickOutcome {
    let faulted = reliability != Reliability::NoFaultDetected;
    if faulted {
        // re-entering FAULT with a different underlying code also notifies
        if from_state != EventState::Fault || reliability != ev.last_fault {
            return TickOutcome::Transition {
                to: EventState::Fault,
                exceeded: 0.0,
            };
        }
        return TickOutcome::None;
    }
    if from_state == EventState::Fault {
        // fault recovery carries no time delay
        return TickOutcome::Transition {
            to: EventState::Normal,
            exceeded: 0.0,
        };
    }

    let high_enabled = ev.limit_enable.contains(LimitEnable::HIGH_LIMIT);
    let low_enabled = ev.limit_enable.contains(LimitEnable::LOW_LIMIT);

    match from_state {
        EventState::Normal => {
            if high_enabled && present_value > ev.high_limit {
                countdown(ev, EventState::HighLimit, ev.high_limit)
            } else if low_enabled && present_value < ev.low_limit {
                countdown(ev, EventState::LowLimit, ev.low_limit)
            } else {
                ev.remaining_time_delay = ev.time_delay;
                TickOutcome::None
            }
        }
        EventState::HighLimit => {
            if !high_enabled {
                // administrative clear, immediate return to normal
                ev.remaining_time_delay = ev.time_delay;
                TickOutcome::Transition {
                    to: EventState::Normal,
                    exceeded: ev.high_limit,
                }
            } else if present_value < ev.high_limit - ev.deadband {
                countdown(ev, EventState::Normal, ev.high_limit)
            } else {
                ev.remaining_time_delay = ev.time_delay;
                TickOutcome::None
            }
        }
        EventState::LowLimit => {
            if !low_enabled {
                ev.remaining_time_delay = ev.time_delay;
                TickOutcome::Transition {
                    to: EventState::Normal,
                    exceeded: ev.low_limit,
                }
            } else if present_value > ev.low_limit + ev.deadband {
                countdown(ev, EventState::Normal, ev.low_limit)
            } else {
                ev.remaining_time_delay = ev.time_delay;
                TickOutcome::None
            }
        }
        EventState::Fault | EventState::Offnormal => TickOutcome::None,
    }
}

fn countdown(ev: &mut IntrinsicReporting, to: EventState, exceeded: f32) -> TickOutcome {
    if ev.remaining_time_delay > 0 {
        ev.remaining_time_delay -= 1;
    }
    if ev.remaining_time_delay == 0 {
        ev.remaining_time_delay = ev.time_delay;
        TickOutcome::Transition { to, exceeded }
    } else {
        TickOutcome::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::analog::AnalogValueStore;
    use chrono::Duration;

    #[derive(Default)]
    struct Capture(Vec<EventNotification>);

    impl NotificationSink for Capture {
        fn notify(&mut self, event: EventNotification) {
            self.0.push(event);
        }
    }

    fn monitored_store() -> AnalogValueStore {
        let mut store = AnalogValueStore::new();
        store.create(1).unwrap();
        let mut reporting = IntrinsicReporting::new(80.0, 20.0, 5.0, 3);
        reporting.limit_enable = LimitEnable::HIGH_LIMIT;
        store.point_mut(1).unwrap().event = Some(reporting);
        store
    }

    fn hold(store: &mut AnalogValueStore, value: f32, ticks: u32, sink: &mut Capture) {
        store.present_value_set(1, value, 8).unwrap();
        for _ in 0..ticks {
            store.intrinsic_reporting(1, sink);
        }
    }

    #[test]
    fn test_high_limit_hysteresis() {
        let mut store = monitored_store();
        let mut sink = Capture::default();

        // two qualifying ticks: no transition yet, countdown 3 -> 2 -> 1
        hold(&mut store, 85.0, 2, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::Normal);
        assert_eq!(
            store
                .point(1)
                .unwrap()
                .event
                .as_ref()
                .unwrap()
                .remaining_time_delay,
            1
        );
        assert!(sink.0.is_empty());

        // third tick fires the transition
        hold(&mut store, 85.0, 1, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::HighLimit);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].to_state, EventState::HighLimit);
        assert_eq!(sink.0[0].exceeded_limit, 80.0);

        // 77 is not below high_limit - deadband (75), so no return
        hold(&mut store, 77.0, 1, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::HighLimit);

        // 74 sustained for three ticks returns to normal
        hold(&mut store, 74.0, 3, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::Normal);
        assert_eq!(sink.0.len(), 2);
        assert_eq!(sink.0[1].to_state, EventState::Normal);
    }

    #[test]
    fn test_countdown_resets_without_partial_credit() {
        let mut store = monitored_store();
        let mut sink = Capture::default();

        hold(&mut store, 85.0, 2, &mut sink);
        // one non-qualifying tick resets the countdown
        hold(&mut store, 70.0, 1, &mut sink);
        hold(&mut store, 85.0, 2, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::Normal);
        hold(&mut store, 85.0, 1, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::HighLimit);
    }

    #[test]
    fn test_fault_preempts_and_recovers_without_delay() {
        let mut store = monitored_store();
        let mut sink = Capture::default();

        store.point_mut(1).unwrap().reliability = Reliability::NoSensor;
        store.intrinsic_reporting(1, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::Fault);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].to_state, EventState::Fault);

        store.point_mut(1).unwrap().reliability = Reliability::NoFaultDetected;
        store.intrinsic_reporting(1, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::Normal);
        assert_eq!(sink.0.len(), 2);
    }

    #[test]
    fn test_monitoring_disabled_no_evaluation() {
        let mut store = monitored_store();
        let mut sink = Capture::default();
        store
            .point_mut(1)
            .unwrap()
            .event
            .as_mut()
            .unwrap()
            .limit_enable = LimitEnable::empty();

        hold(&mut store, 95.0, 10, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::Normal);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_alarm_ack_and_ack_notify_priority() {
        let mut store = monitored_store();
        let mut sink = Capture::default();

        hold(&mut store, 85.0, 3, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::HighLimit);
        let recorded = store.point(1).unwrap().event.as_ref().unwrap().event_time_stamps
            [TransitionKind::ToOffnormal.index()]
        .unwrap();

        // stale ack rejected
        let stale = AlarmAck {
            event_state_acked: EventState::HighLimit,
            time_stamp: recorded - Duration::seconds(10),
        };
        assert_eq!(store.alarm_ack(1, stale), Err(ObjectError::InvalidTimeStamp));

        // valid ack accepted and produces an ack notification on the next
        // tick, deferring any new transition
        let ack = AlarmAck {
            event_state_acked: EventState::HighLimit,
            time_stamp: recorded + Duration::seconds(1),
        };
        store.alarm_ack(1, ack).unwrap();
        assert!(store
            .point(1)
            .unwrap()
            .event
            .as_ref()
            .unwrap()
            .acked_transitions
            .get(TransitionKind::ToOffnormal)
            .acked);

        // value has returned below the deadband; the ack-notify still wins
        // this tick
        hold(&mut store, 60.0, 1, &mut sink);
        let last = sink.0.last().unwrap();
        assert!(last.ack_notification);
        assert_eq!(store.point(1).unwrap().event_state, EventState::HighLimit);

        // state transition follows on later ticks
        hold(&mut store, 60.0, 3, &mut sink);
        assert_eq!(store.point(1).unwrap().event_state, EventState::Normal);
    }

    #[test]
    fn test_ack_of_unrelated_state_rejected() {
        let mut store = monitored_store();
        let mut sink = Capture::default();
        hold(&mut store, 85.0, 3, &mut sink);

        let ack = AlarmAck {
            event_state_acked: EventState::Fault,
            time_stamp: Utc::now(),
        };
        assert_eq!(store.alarm_ack(1, ack), Err(ObjectError::InvalidEventState));
    }
}
