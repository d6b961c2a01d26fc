//! Replay of stored events to a newly connected client

use std::collections::HashSet;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use axum::extract::ws::Message;
use conductor_core::run::{Event, Storage};
use futures::{FutureExt, Sink, SinkExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// The client went away during replay
#[derive(Debug)]
pub struct ReplayAborted;

enum SendFailure {
    Encode(serde_json::Error),
    Timeout,
    Closed(String),
}

/// Stored events for `scope`, oldest run first when unscoped
async fn history(storage: &dyn Storage, scope: Option<Uuid>) -> conductor_core::Result<Vec<Event>> {
    match scope {
        Some(run_id) => storage.get_events(run_id, None).await,
        None => {
            let mut events = Vec::new();
            for run in storage.list_runs().await?.into_iter().rev() {
                events.extend(storage.get_events(run.id, None).await?);
            }
            Ok(events)
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &Event, send_timeout: Duration) -> Result<(), SendFailure>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = serde_json::to_string(event).map_err(SendFailure::Encode)?;
    match tokio::time::timeout(send_timeout, sink.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SendFailure::Closed(e.to_string())),
        Err(_) => Err(SendFailure::Timeout),
    }
}

/// Send every stored event in scope, returning the ids that were delivered.
///
/// Each event is isolated: an encoding failure, a send timeout or a panic
/// skips that event only. A closed socket aborts the replay.
pub async fn replay<S>(
    sink: &mut S,
    storage: &dyn Storage,
    scope: Option<Uuid>,
    send_timeout: Duration,
) -> Result<HashSet<Uuid>, ReplayAborted>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut replayed = HashSet::new();

    let events = match history(storage, scope).await {
        Ok(events) => events,
        Err(e) => {
            warn!("Failed to load events for replay: {}", e);
            return Ok(replayed);
        }
    };

    for event in &events {
        let outcome = AssertUnwindSafe(send_event(sink, event, send_timeout))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                replayed.insert(event.id);
            }
            Ok(Err(SendFailure::Encode(e))) => {
                warn!("Skipping event {} during replay: {}", event.id, e);
            }
            Ok(Err(SendFailure::Timeout)) => {
                warn!("Timed out replaying event {}", event.id);
            }
            Ok(Err(SendFailure::Closed(e))) => {
                debug!("Client closed during replay: {}", e);
                return Err(ReplayAborted);
            }
            Err(_) => {
                warn!("Panic while replaying event {}", event.id);
            }
        }
    }

    debug!("Replayed {} of {} events", replayed.len(), events.len());
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::run::{EventPayload, IterationData, MemoryStore, Run};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Sink that records text frames and can misbehave on chosen frames
    #[derive(Default)]
    struct TestSink {
        sent: Vec<String>,
        attempts: usize,
        panic_on: Option<usize>,
        stall_on: Option<usize>,
        close_on: Option<usize>,
        stalled: bool,
    }

    impl Sink<Message> for TestSink {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            self.get_mut().stalled = false;
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), String> {
            let this = self.get_mut();
            let n = this.attempts;
            this.attempts += 1;
            if this.panic_on == Some(n) {
                panic!("bad frame");
            }
            if this.close_on == Some(n) {
                return Err("connection reset".to_string());
            }
            if this.stall_on == Some(n) {
                this.stalled = true;
                return Ok(());
            }
            if let Message::Text(text) = item {
                this.sent.push(text.as_str().to_string());
            }
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            if self.stalled {
                Poll::Pending
            } else {
                Poll::Ready(Ok(()))
            }
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn seeded(runs: usize, per_run: u32) -> (MemoryStore, Vec<Uuid>) {
        let storage = MemoryStore::new();
        let mut ids = Vec::new();
        for _ in 0..runs {
            let run_id = Uuid::new_v4();
            storage.create_run(Run::new(run_id, "a", "p", "m")).await.unwrap();
            for n in 0..per_run {
                let event = Event::new(
                    run_id,
                    "a",
                    "A",
                    EventPayload::Iteration(IterationData { iteration: n }),
                );
                storage.add_event(&event).await.unwrap();
            }
            ids.push(run_id);
        }
        (storage, ids)
    }

    fn run_ids(sink: &TestSink) -> Vec<Uuid> {
        sink.sent
            .iter()
            .map(|s| serde_json::from_str::<Event>(s).unwrap().run_id)
            .collect()
    }

    #[tokio::test]
    async fn test_scoped_replay_sends_only_that_run() {
        let (storage, runs) = seeded(2, 3).await;
        let mut sink = TestSink::default();

        let replayed = replay(&mut sink, &storage, Some(runs[1]), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(replayed.len(), 3);
        assert_eq!(run_ids(&sink), vec![runs[1]; 3]);
    }

    #[tokio::test]
    async fn test_unscoped_replay_sends_every_run() {
        let (storage, _) = seeded(3, 2).await;
        let mut sink = TestSink::default();

        let replayed = replay(&mut sink, &storage, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(replayed.len(), 6);
        assert_eq!(sink.sent.len(), 6);
    }

    #[tokio::test]
    async fn test_panic_skips_one_event() {
        let (storage, runs) = seeded(1, 4).await;
        let mut sink = TestSink {
            panic_on: Some(1),
            ..Default::default()
        };

        let replayed = replay(&mut sink, &storage, Some(runs[0]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(sink.sent.len(), 3);
    }

    #[tokio::test]
    async fn test_stalled_send_times_out_and_continues() {
        let (storage, runs) = seeded(1, 3).await;
        let mut sink = TestSink {
            stall_on: Some(0),
            ..Default::default()
        };

        let replayed = tokio::time::timeout(
            Duration::from_secs(2),
            replay(&mut sink, &storage, Some(runs[0]), Duration::from_millis(50)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_socket_aborts() {
        let (storage, runs) = seeded(1, 3).await;
        let mut sink = TestSink {
            close_on: Some(1),
            ..Default::default()
        };

        assert!(replay(&mut sink, &storage, Some(runs[0]), Duration::from_secs(5))
            .await
            .is_err());
        assert_eq!(sink.sent.len(), 1);
    }
}
