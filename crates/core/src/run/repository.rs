//! Run storage trait
//!
//! Defines the interface the runtime persists runs and events through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::event::Event;
use super::run_model::{Run, RunUpdate};
use crate::bus::Unsubscribe;
use crate::Result;

/// Repository interface for runs and their event logs
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a new run record; fails if the id is already taken
    async fn create_run(&self, run: Run) -> Result<Run>;

    /// Get a run by ID
    async fn get_run(&self, id: Uuid) -> Result<Option<Run>>;

    /// Apply a partial update to an existing run
    async fn update_run(&self, id: Uuid, update: RunUpdate) -> Result<Run>;

    /// All runs, newest first
    async fn list_runs(&self) -> Result<Vec<Run>>;

    /// Append an event. Returns `false` when an event with the same ID was
    /// already stored, in which case nothing is written or announced.
    async fn add_event(&self, event: &Event) -> Result<bool>;

    /// Events of one run in insertion order, optionally only those strictly after `after`
    async fn get_events(&self, run_id: Uuid, after: Option<DateTime<Utc>>) -> Result<Vec<Event>>;

    /// Stream of every newly stored event
    fn subscribe_all(&self) -> (mpsc::Receiver<Event>, Unsubscribe);
}
