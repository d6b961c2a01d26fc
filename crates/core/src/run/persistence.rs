use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event::Event;
use super::memory_store::STORE_NOTIFY_CAPACITY;
use super::repository::Storage;
use super::run_model::{Run, RunUpdate};
use crate::bus::{EventBus, Unsubscribe};
use crate::{Error, Result};

#[derive(Default)]
struct FileIndex {
    runs: HashMap<Uuid, Run>,
    seen: HashSet<Uuid>,
}

/// File-backed storage: `runs/<run_id>/run.json` plus an append-only `events.jsonl`
pub struct FileRunStore {
    base_dir: PathBuf,
    index: Mutex<FileIndex>,
    notify: EventBus,
}

impl FileRunStore {
    /// Open (or create) a store under `data_dir`, rebuilding the index from disk
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = data_dir.as_ref().join("runs");
        fs::create_dir_all(&base_dir).await?;

        let store = Self {
            base_dir,
            index: Mutex::new(FileIndex::default()),
            notify: EventBus::with_capacity(STORE_NOTIFY_CAPACITY),
        };

        let index = store.scan().await?;
        info!(
            "Opened run store at {} ({} runs, {} events)",
            store.base_dir.display(),
            index.runs.len(),
            index.seen.len()
        );
        *store.index.lock().await = index;

        Ok(store)
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.base_dir.join(run_id.to_string())
    }

    fn run_metadata_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join("run.json")
    }

    fn events_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join("events.jsonl")
    }

    async fn scan(&self) -> Result<FileIndex> {
        let mut index = FileIndex::default();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            let Some(run_id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };

            match self.load_run(run_id).await {
                Ok(Some(run)) => {
                    index.runs.insert(run_id, run);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load run {}: {}", run_id, e),
            }

            for event in self.load_events(run_id).await? {
                index.seen.insert(event.id);
            }
        }

        Ok(index)
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        fs::create_dir_all(self.run_dir(run.id)).await?;
        let path = self.run_metadata_path(run.id);
        fs::write(&path, serde_json::to_vec(run)?).await?;
        debug!("Saved run metadata: {}", path.display());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        match fs::read(self.run_metadata_path(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_event(&self, event: &Event) -> Result<()> {
        fs::create_dir_all(self.run_dir(event.run_id)).await?;

        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(event.run_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_events(&self, run_id: Uuid) -> Result<Vec<Event>> {
        let path = self.events_path(run_id);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();
        let mut line_num = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_num += 1;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Failed to parse event at line {} in {}: {}",
                    line_num,
                    path.display(),
                    e
                ),
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl Storage for FileRunStore {
    async fn create_run(&self, run: Run) -> Result<Run> {
        let mut index = self.index.lock().await;
        if index.runs.contains_key(&run.id) {
            return Err(Error::InvalidInput(format!("Run already exists: {}", run.id)));
        }
        self.save_run(&run).await?;
        index.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.index.lock().await.runs.get(&id).cloned())
    }

    async fn update_run(&self, id: Uuid, update: RunUpdate) -> Result<Run> {
        let mut index = self.index.lock().await;
        let mut run = index.runs.get(&id).cloned().ok_or(Error::RunNotFound(id))?;
        run.apply(update);
        self.save_run(&run).await?;
        index.runs.insert(id, run.clone());
        Ok(run)
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.index.lock().await.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(runs)
    }

    async fn add_event(&self, event: &Event) -> Result<bool> {
        {
            let mut index = self.index.lock().await;
            if index.seen.contains(&event.id) {
                debug!("Ignoring duplicate event {}", event.id);
                return Ok(false);
            }
            self.append_event(event).await?;
            index.seen.insert(event.id);
        }
        self.notify.emit(event.clone());
        Ok(true)
    }

    async fn get_events(&self, run_id: Uuid, after: Option<DateTime<Utc>>) -> Result<Vec<Event>> {
        let _index = self.index.lock().await;
        let events = self.load_events(run_id).await?;
        Ok(match after {
            Some(after) => events.into_iter().filter(|e| e.timestamp > after).collect(),
            None => events,
        })
    }

    fn subscribe_all(&self) -> (mpsc::Receiver<Event>, Unsubscribe) {
        self.notify.subscribe_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{EventPayload, MessageData, MessageRole, RunStatus};
    use tempfile::TempDir;

    fn message(run_id: Uuid, content: &str) -> Event {
        Event::new(
            run_id,
            "writer",
            "Writer",
            EventPayload::Message(MessageData {
                role: MessageRole::Assistant,
                content: content.to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn test_runs_and_events_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let run = Run::new(Uuid::new_v4(), "writer", "draft a post", "model");
        let run_id = run.id;
        let event = message(run_id, "hello");

        {
            let store = FileRunStore::open(dir.path()).await.unwrap();
            store.create_run(run).await.unwrap();
            store
                .update_run(run_id, RunUpdate::status(RunStatus::Success))
                .await
                .unwrap();
            assert!(store.add_event(&event).await.unwrap());
        }

        let store = FileRunStore::open(dir.path()).await.unwrap();
        let loaded = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);

        let events = store.get_events(run_id, None).await.unwrap();
        assert_eq!(events, vec![event.clone()]);

        // The dedupe index is rebuilt from disk.
        assert!(!store.add_event(&event).await.unwrap());
        assert_eq!(store.get_events(run_id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_event_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        let run_id = Uuid::new_v4();

        store.add_event(&message(run_id, "one")).await.unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(store.events_path(run_id))
                .await
                .unwrap();
            file.write_all(b"{not json\n").await.unwrap();
        }
        store.add_event(&message(run_id, "two")).await.unwrap();

        assert_eq!(store.get_events(run_id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_runs_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();

        let mut older = Run::new(Uuid::new_v4(), "a", "first", "model");
        older.start_time = Utc::now() - chrono::Duration::seconds(10);
        let newer = Run::new(Uuid::new_v4(), "b", "second", "model");

        store.create_run(older.clone()).await.unwrap();
        store.create_run(newer.clone()).await.unwrap();

        let runs = store.list_runs().await.unwrap();
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(runs[1].id, older.id);
    }

    #[tokio::test]
    async fn test_reopen_with_events_but_no_run_record() {
        let dir = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let event = message(run_id, "orphan");

        {
            let store = FileRunStore::open(dir.path()).await.unwrap();
            store.add_event(&event).await.unwrap();
        }

        let store = FileRunStore::open(dir.path()).await.unwrap();
        assert!(store.get_run(run_id).await.unwrap().is_none());
        assert!(!store.add_event(&event).await.unwrap());

        let raw = fs::read_to_string(store.events_path(run_id)).await.unwrap();
        assert_eq!(raw.lines().count(), 1);
    }
}
