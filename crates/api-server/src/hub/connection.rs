//! Per-connection WebSocket handling
//!
//! Each connection registers with the hub before replaying stored events, so
//! nothing published during replay is missed. The write pump then skips live
//! events that replay already delivered, until the live queue has moved past
//! the replay snapshot.

use std::collections::HashSet;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::replay::replay;
use super::Outbound;
use crate::state::AppState;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Only stream this run; all runs when absent
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    debug!("WebSocket upgrade requested (run_id: {:?})", query.run_id);
    ws.on_upgrade(move |socket| handle_socket(socket, query.run_id, state))
}

async fn handle_socket(socket: WebSocket, scope: Option<Uuid>, state: AppState) {
    let hub = state.hub().clone();
    let config = hub.config().clone();
    let (mut sender, receiver) = socket.split();

    let client = hub.register(scope).await;
    let client_id = client.id;

    let replayed = match replay(
        &mut sender,
        state.storage().as_ref(),
        scope,
        config.replay_send_timeout,
    )
    .await
    {
        Ok(replayed) => replayed,
        Err(_) => {
            hub.unregister(client_id).await;
            return;
        }
    };

    let mut write_task = tokio::spawn(write_pump(sender, client.rx, replayed, config.ping_period));
    let mut read_task = tokio::spawn(read_pump(receiver, config.pong_wait));

    // whichever side finishes first takes the other down
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.unregister(client_id).await;
    info!("WebSocket client {} closed", client_id);
}

/// Replayed ids that may still show up in the live queue
struct ReplayFilter {
    pending: HashSet<Uuid>,
}

impl ReplayFilter {
    fn new(replayed: HashSet<Uuid>) -> Self {
        Self { pending: replayed }
    }

    /// Whether replay already delivered `id`.
    ///
    /// The live queue is in storage order, so the first event replay did not
    /// deliver is newer than the snapshot and the remaining ids are released.
    fn already_sent(&mut self, id: Uuid) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        if self.pending.remove(&id) {
            return true;
        }
        debug!("Live delivery passed replay cut-off, releasing {} ids", self.pending.len());
        self.pending = HashSet::new();
        false
    }
}

/// Forward hub events to the socket and keep it alive with pings.
///
/// Ends when the hub drops the client (eviction or shutdown) or a send fails.
async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Outbound>,
    replayed: HashSet<Uuid>,
    ping_period: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let mut replayed = ReplayFilter::new(replayed);
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(outbound) = outbound else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if replayed.already_sent(outbound.id) {
                    continue;
                }
                if sink.send(Message::Text(outbound.payload.as_ref().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Read and discard client frames; any frame counts as liveness.
async fn read_pump<S, E>(mut stream: S, pong_wait: Duration)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        match tokio::time::timeout(pong_wait, stream.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                debug!("WebSocket read error: {}", e);
                break;
            }
            Err(_) => {
                warn!("WebSocket client missed pong deadline");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::sync::Arc;
    use tokio::time::timeout;

    fn outbound(id: Uuid, text: &str) -> Outbound {
        Outbound {
            id,
            payload: Arc::from(text),
        }
    }

    #[tokio::test]
    async fn test_write_pump_skips_replayed_and_closes() {
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(8);

        let seen = Uuid::new_v4();
        let replayed: HashSet<Uuid> = [seen].into_iter().collect();
        let pump = tokio::spawn(write_pump(sink, rx, replayed, Duration::from_secs(60)));

        tx.send(outbound(seen, "old")).await.unwrap();
        tx.send(outbound(Uuid::new_v4(), "new")).await.unwrap();
        drop(tx);
        pump.await.unwrap();

        match frames.next().await.unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), "new"),
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(matches!(frames.next().await.unwrap(), Message::Close(None)));
    }

    #[test]
    fn test_replay_filter_releases_ids_after_cut_off() {
        let (a, b, fresh) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut filter = ReplayFilter::new([a, b].into_iter().collect());

        assert!(filter.already_sent(a));
        assert_eq!(filter.pending.len(), 1);

        assert!(!filter.already_sent(fresh));
        assert!(filter.pending.is_empty());
        assert!(!filter.already_sent(b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_pump_pings() {
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let (_tx, rx) = mpsc::channel::<Outbound>(8);
        tokio::spawn(write_pump(sink, rx, HashSet::new(), Duration::from_secs(54)));

        let frame = timeout(Duration::from_secs(100), frames.next()).await.unwrap().unwrap();
        assert!(matches!(frame, Message::Ping(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_pump_gives_up_without_pong() {
        let (tx, rx) = fmpsc::unbounded::<Result<Message, String>>();
        tx.unbounded_send(Ok(Message::Pong(Vec::new().into()))).unwrap();

        // the sender stays open, so only the deadline can end the pump
        timeout(Duration::from_secs(100), read_pump(rx, Duration::from_secs(60)))
            .await
            .unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_read_pump_stops_on_close() {
        let (tx, rx) = fmpsc::unbounded::<Result<Message, String>>();
        tx.unbounded_send(Ok(Message::Text("ignored".into()))).unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        timeout(Duration::from_secs(1), read_pump(rx, Duration::from_secs(60)))
            .await
            .unwrap();
    }
}
