use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::event::Event;
use super::repository::Storage;
use super::run_model::{Run, RunUpdate};
use crate::bus::{EventBus, Unsubscribe};
use crate::{Error, Result};

/// Queue depth for consumers of newly stored events
pub const STORE_NOTIFY_CAPACITY: usize = 1024;

#[derive(Default)]
struct MemoryInner {
    runs: HashMap<Uuid, Run>,
    events: HashMap<Uuid, Vec<Event>>,
    seen: HashSet<Uuid>,
}

/// Process-local storage, used by tests and when no data directory is configured
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    notify: EventBus,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            notify: EventBus::with_capacity(STORE_NOTIFY_CAPACITY),
        }
    }

    /// Total number of stored events across all runs
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.seen.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create_run(&self, run: Run) -> Result<Run> {
        let mut inner = self.inner.write().await;
        if inner.runs.contains_key(&run.id) {
            return Err(Error::InvalidInput(format!("Run already exists: {}", run.id)));
        }
        inner.runs.insert(run.id, run.clone());
        debug!("Created run {}", run.id);
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.inner.read().await.runs.get(&id).cloned())
    }

    async fn update_run(&self, id: Uuid, update: RunUpdate) -> Result<Run> {
        let mut inner = self.inner.write().await;
        let run = inner.runs.get_mut(&id).ok_or(Error::RunNotFound(id))?;
        run.apply(update);
        Ok(run.clone())
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.inner.read().await.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(runs)
    }

    async fn add_event(&self, event: &Event) -> Result<bool> {
        {
            let mut inner = self.inner.write().await;
            if !inner.seen.insert(event.id) {
                debug!("Ignoring duplicate event {}", event.id);
                return Ok(false);
            }
            inner.events.entry(event.run_id).or_default().push(event.clone());
        }
        self.notify.emit(event.clone());
        Ok(true)
    }

    async fn get_events(&self, run_id: Uuid, after: Option<DateTime<Utc>>) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        let events = inner
            .events
            .get(&run_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| after.map_or(true, |after| e.timestamp > after))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }

    fn subscribe_all(&self) -> (mpsc::Receiver<Event>, Unsubscribe) {
        self.notify.subscribe_all()
    }
}
