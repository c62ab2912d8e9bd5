//! Event sink — trait for emitting sequence lifecycle events from any module.
//!
//! Engines accept an `Arc<dyn EventSink>` so that enrollment, rule, and
//! experiment activity can be routed to whatever audit pipeline the host
//! application wires in.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of events emitted by the engine crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EnrollmentCreated,
    EnrollmentReactivated,
    EnrollmentPaused,
    EnrollmentResumed,
    EnrollmentStopped,
    EnrollmentCompleted,
    EnrollmentFailed,
    StepScheduled,
    OutcomeRecorded,
    VariantAssigned,
    TestStarted,
    TestConcluded,
    RuleTriggered,
    RuleSkipped,
    SuppressionAdded,
}

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub organization_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for emitting sequence events. Implementations route events to the
/// host's audit log, message bus, or analytics store.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SequenceEvent);
}

/// No-op sink for modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: SequenceEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<SequenceEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<SequenceEvent> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event sink mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event sink mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: SequenceEvent) {
        self.events.lock().expect("event sink mutex poisoned").push(event);
    }
}

/// Convenience builder for creating a `SequenceEvent` with minimal
/// boilerplate.
pub fn make_event(
    event_type: EventType,
    organization_id: Uuid,
    lead_id: Option<Uuid>,
    enrollment_id: Option<Uuid>,
    detail: Option<String>,
) -> SequenceEvent {
    SequenceEvent {
        event_id: Uuid::new_v4(),
        event_type,
        organization_id,
        lead_id,
        enrollment_id,
        detail,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event sink for modules that don't need one.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        let org = Uuid::new_v4();
        let lead = Uuid::new_v4();
        sink.emit(make_event(
            EventType::EnrollmentCreated,
            org,
            Some(lead),
            None,
            None,
        ));
        sink.emit(make_event(
            EventType::StepScheduled,
            org,
            Some(lead),
            Some(Uuid::new_v4()),
            Some("step 1".into()),
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(EventType::EnrollmentCreated), 1);
        assert_eq!(sink.count_type(EventType::StepScheduled), 1);

        let events = sink.events();
        assert_eq!(events[0].organization_id, org);
        assert_eq!(events[1].detail, Some("step 1".into()));
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event(
            EventType::RuleTriggered,
            Uuid::new_v4(),
            None,
            None,
            None,
        ));
    }
}
