//! Event bridge
//!
//! Consumes every event on the bus, persists it, and projects it onto the
//! run record. The bridge's subscription is unbounded, so a burst that
//! overflows live-tail subscribers never loses an event here. Storage
//! deduplicates by event id, so a redelivered event is neither stored nor
//! projected twice.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use conductor_core::run::{Event, EventPayload, Run, RunUpdate, Storage};
use conductor_core::{EventBus, Result};

pub struct EventBridge {
    storage: Arc<dyn Storage>,
    created: Mutex<HashSet<Uuid>>,
}

impl EventBridge {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe to every run on `bus` and project events until the bus closes
    pub fn spawn(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let (mut rx, unsubscribe) = bus.subscribe_all_unbounded();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle(&event).await;
            }
            unsubscribe.unsubscribe();
            debug!("Event bridge stopped");
        })
    }

    /// Project one event, logging instead of failing
    pub async fn handle(&self, event: &Event) {
        if let Err(e) = self.project(event).await {
            warn!(
                "Failed to project {} event {} for run {}: {}",
                event.event_type(),
                event.id,
                event.run_id,
                e
            );
        }
    }

    pub async fn project(&self, event: &Event) -> Result<()> {
        if !self.storage.add_event(event).await? {
            debug!("Skipping duplicate event {}", event.id);
            return Ok(());
        }

        match &event.payload {
            EventPayload::RunStart(start) => {
                let mut created = self.created.lock().await;
                if !created.insert(event.run_id) {
                    return Ok(());
                }
                if self.storage.get_run(event.run_id).await?.is_some() {
                    return Ok(());
                }

                let mut run = Run::new(event.run_id, &event.agent_id, &start.prompt, &start.model);
                run.agent_name = event.agent_name.clone();
                run.start_time = event.timestamp;
                run.parent_run_id = start.parent_run_id;
                run.is_handoff = start.is_handoff;
                self.storage.create_run(run).await?;
            }
            EventPayload::Iteration(data) => {
                self.storage
                    .update_run(
                        event.run_id,
                        RunUpdate {
                            iterations: Some(data.iteration),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            EventPayload::ApiResponse(data) => {
                self.storage
                    .update_run(
                        event.run_id,
                        RunUpdate {
                            add_usage: Some(data.usage),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            EventPayload::ToolCall(_) => {
                if let Some(run) = self.storage.get_run(event.run_id).await? {
                    self.storage
                        .update_run(
                            event.run_id,
                            RunUpdate {
                                tool_calls: Some(run.tool_calls + 1),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }
            EventPayload::AgentHandoff(data) => {
                self.storage
                    .update_run(event.run_id, RunUpdate::append_sub_run(data.sub_run_id))
                    .await?;
            }
            EventPayload::RunEnd(end) => {
                self.storage
                    .update_run(
                        event.run_id,
                        RunUpdate {
                            status: Some(end.status),
                            end_time: Some(event.timestamp),
                            iterations: Some(end.iterations),
                            tool_calls: Some(end.tool_calls),
                            error: end.error.clone(),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            EventPayload::ApiRequest(_)
            | EventPayload::AgentHandoffComplete(_)
            | EventPayload::ToolResult(_)
            | EventPayload::Message(_)
            | EventPayload::Error(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::run::{
        HandoffCompleteData, HandoffData, IterationData, MemoryStore, RunEndData, RunStartData,
        RunStatus, TokenUsage, ToolCallData,
    };
    use serde_json::json;

    fn start(run_id: Uuid, parent: Option<Uuid>) -> Event {
        Event::new(
            run_id,
            "agent",
            "Agent",
            EventPayload::RunStart(RunStartData {
                prompt: "do it".to_string(),
                model: "m".to_string(),
                parent_run_id: parent,
                is_handoff: parent.is_some(),
            }),
        )
    }

    fn event(run_id: Uuid, payload: EventPayload) -> Event {
        Event::new(run_id, "agent", "Agent", payload)
    }

    #[tokio::test]
    async fn test_projects_run_lifecycle() {
        let storage = Arc::new(MemoryStore::new());
        let bridge = EventBridge::new(storage.clone());
        let run_id = Uuid::new_v4();

        let start = start(run_id, None);
        bridge.project(&start).await.unwrap();
        bridge
            .project(&event(run_id, EventPayload::Iteration(IterationData { iteration: 1 })))
            .await
            .unwrap();
        for n in 0..2 {
            bridge
                .project(&event(
                    run_id,
                    EventPayload::ToolCall(ToolCallData {
                        tool_use_id: format!("t{}", n),
                        tool_name: "echo".to_string(),
                        input: json!({}),
                    }),
                ))
                .await
                .unwrap();
        }

        let run = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.agent_name, "Agent");
        assert_eq!(run.start_time, start.timestamp);
        assert_eq!(run.iterations, 1);
        assert_eq!(run.tool_calls, 2);

        let end = event(
            run_id,
            EventPayload::RunEnd(RunEndData {
                status: RunStatus::Failed,
                success: false,
                error: Some("boom".to_string()),
                iterations: 3,
                tool_calls: 2,
                duration_ms: 10,
                usage: TokenUsage::new(1, 1),
            }),
        );
        bridge.project(&end).await.unwrap();

        let run = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert_eq!(run.iterations, 3);
        assert_eq!(run.end_time, Some(end.timestamp));
        assert_eq!(storage.get_events(run_id, None).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let storage = Arc::new(MemoryStore::new());
        let bridge = EventBridge::new(storage.clone());
        let run_id = Uuid::new_v4();

        let start = start(run_id, None);
        let call = event(
            run_id,
            EventPayload::ToolCall(ToolCallData {
                tool_use_id: "t".to_string(),
                tool_name: "echo".to_string(),
                input: json!({}),
            }),
        );

        for _ in 0..3 {
            bridge.project(&start).await.unwrap();
            bridge.project(&call).await.unwrap();
        }

        assert_eq!(storage.list_runs().await.unwrap().len(), 1);
        assert_eq!(storage.get_run(run_id).await.unwrap().unwrap().tool_calls, 1);
        assert_eq!(storage.event_count().await, 2);
    }

    fn run_end(run_id: Uuid, status: RunStatus) -> Event {
        event(
            run_id,
            EventPayload::RunEnd(RunEndData {
                status,
                success: status == RunStatus::Success,
                error: None,
                iterations: 1,
                tool_calls: 0,
                duration_ms: 1,
                usage: TokenUsage::default(),
            }),
        )
    }

    #[tokio::test]
    async fn test_handoff_links_sub_run_once() {
        let storage = Arc::new(MemoryStore::new());
        let bridge = EventBridge::new(storage.clone());
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        bridge.project(&start(parent, None)).await.unwrap();
        bridge
            .project(&event(
                parent,
                EventPayload::AgentHandoff(HandoffData {
                    target_agent_id: "helper".to_string(),
                    sub_run_id: child,
                    task_description: "help".to_string(),
                }),
            ))
            .await
            .unwrap();
        bridge.project(&start(child, Some(parent))).await.unwrap();
        bridge
            .project(&event(
                parent,
                EventPayload::AgentHandoffComplete(HandoffCompleteData {
                    target_agent_id: "helper".to_string(),
                    sub_run_id: child,
                    success: true,
                    summary: "done".to_string(),
                    error: None,
                    duration_ms: 5,
                }),
            ))
            .await
            .unwrap();

        let parent_run = storage.get_run(parent).await.unwrap().unwrap();
        assert_eq!(parent_run.sub_run_ids, vec![child]);
        let child_run = storage.get_run(child).await.unwrap().unwrap();
        assert!(child_run.is_handoff);
        assert_eq!(child_run.parent_run_id, Some(parent));
    }

    #[tokio::test]
    async fn test_spawned_bridge_drains_bus() {
        let storage = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let bridge = Arc::new(EventBridge::new(storage.clone()));
        let handle = bridge.spawn(&bus);

        let run_id = Uuid::new_v4();
        bus.emit(start(run_id, None));
        bus.close();
        handle.await.unwrap();

        assert!(storage.get_run(run_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_burst_larger_than_live_queues_still_projects_run_end() {
        let storage = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let bridge = Arc::new(EventBridge::new(storage.clone()));
        let handle = bridge.spawn(&bus);

        let run_id = Uuid::new_v4();
        bus.emit(start(run_id, None));
        for n in 0..12_000 {
            bus.emit(event(run_id, EventPayload::Iteration(IterationData { iteration: n })));
        }
        bus.emit(run_end(run_id, RunStatus::Success));
        bus.close();
        handle.await.unwrap();

        let events = storage.get_events(run_id, None).await.unwrap();
        assert_eq!(events.len(), 12_002);
        assert_eq!(events.last().unwrap().event_type(), conductor_core::run::EventType::RunEnd);

        let run = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn test_pause_after_run_end_leaves_record_terminal() {
        let storage = Arc::new(MemoryStore::new());
        let bridge = EventBridge::new(storage.clone());
        let run_id = Uuid::new_v4();

        bridge.project(&start(run_id, None)).await.unwrap();
        bridge.project(&run_end(run_id, RunStatus::Cancelled)).await.unwrap();

        let run = storage
            .update_run(run_id, RunUpdate::status(RunStatus::Paused))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_run_is_logged_not_fatal() {
        let storage = Arc::new(MemoryStore::new());
        let bridge = EventBridge::new(storage.clone());
        let run_id = Uuid::new_v4();

        let orphan = event(run_id, EventPayload::Iteration(IterationData { iteration: 1 }));
        assert!(bridge.project(&orphan).await.is_err());
        bridge.handle(&orphan).await;
        assert_eq!(storage.get_events(run_id, None).await.unwrap().len(), 1);
    }
}
