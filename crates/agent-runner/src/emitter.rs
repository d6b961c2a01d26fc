//! Per-run event stamping

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use conductor_core::run::{Event, EventPayload};
use conductor_core::EventBus;

/// Emits events for one run onto the bus.
///
/// Clones share a clock, so timestamps of a run never go backwards even when
/// several components (the loop and a handoff) emit on the same stream.
#[derive(Clone)]
pub struct RunEmitter {
    bus: EventBus,
    run_id: Uuid,
    agent_id: String,
    agent_name: String,
    last: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl RunEmitter {
    pub fn new(bus: EventBus, run_id: Uuid, agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            bus,
            run_id,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Stamp and publish an event, returning the published copy
    pub fn emit(&self, payload: EventPayload) -> Event {
        let mut event = Event::new(self.run_id, self.agent_id.clone(), self.agent_name.clone(), payload);
        event.timestamp = self.next_timestamp(event.timestamp);
        self.bus.emit(event.clone());
        event
    }

    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stamped = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamped);
        stamped
    }
}
