//! WebSocket hub - live fan-out of run events to observers
//!
//! A single coordinator task owns the client map; connections, the storage
//! forwarder and shutdown talk to it through [`Hub`] commands.

mod connection;
mod replay;

pub use connection::ws_handler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conductor_core::run::{Event, Storage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMMAND_CAPACITY: usize = 1024;

/// Hub tuning
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue per client; a client that fills it is evicted.
    ///
    /// A connecting client is registered before its history replay starts,
    /// and live events queue here until replay finishes. A replay that takes
    /// longer than it takes live traffic to fill this buffer evicts the client
    /// before it goes live; it has to reconnect.
    pub send_buffer: usize,
    pub ping_period: Duration,
    /// A client must produce a frame (usually a pong) within this window
    pub pong_wait: Duration,
    pub replay_send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_buffer: 256,
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            replay_send_timeout: Duration::from_secs(5),
        }
    }
}

/// One serialized event queued for a client
#[derive(Debug, Clone)]
pub struct Outbound {
    pub id: Uuid,
    pub payload: Arc<str>,
}

/// A registered client's receiving side
pub struct ClientHandle {
    pub id: u64,
    pub rx: mpsc::Receiver<Outbound>,
}

struct ClientEntry {
    scope: Option<Uuid>,
    tx: mpsc::Sender<Outbound>,
}

impl ClientEntry {
    fn wants(&self, run_id: Uuid) -> bool {
        self.scope.map_or(true, |scope| scope == run_id)
    }
}

enum HubCommand {
    Register { id: u64, entry: ClientEntry },
    Unregister { id: u64 },
    Broadcast { event: Event },
    ClientCount { reply: oneshot::Sender<usize> },
    Shutdown,
}

/// Handle to the hub coordinator
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
    config: HubConfig,
}

impl Hub {
    /// Start the coordinator task
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = tokio::spawn(run_coordinator(rx));
        let hub = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            config,
        };
        (hub, handle)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add a client that receives events of `scope`, or of every run when `None`
    pub async fn register(&self, scope: Option<Uuid>) -> ClientHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.send_buffer);
        self.send(HubCommand::Register {
            id,
            entry: ClientEntry { scope, tx },
        })
        .await;
        ClientHandle { id, rx }
    }

    pub async fn unregister(&self, id: u64) {
        self.send(HubCommand::Unregister { id }).await;
    }

    pub async fn broadcast(&self, event: Event) {
        self.send(HubCommand::Broadcast { event }).await;
    }

    pub async fn client_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::ClientCount { reply }).await;
        rx.await.unwrap_or(0)
    }

    /// Disconnect every client and stop the coordinator
    pub async fn shutdown(&self) {
        self.send(HubCommand::Shutdown).await;
    }

    /// Broadcast every event newly stored in `storage`.
    ///
    /// Storage only announces fresh inserts, so redelivered events are not
    /// broadcast twice.
    pub fn forward_from(&self, storage: &dyn Storage) -> JoinHandle<()> {
        let (mut events, unsubscribe) = storage.subscribe_all();
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                hub.broadcast(event).await;
            }
            unsubscribe.unsubscribe();
            debug!("Hub forwarder stopped");
        })
    }

    async fn send(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("Hub coordinator is not running");
        }
    }
}

async fn run_coordinator(mut commands: mpsc::Receiver<HubCommand>) {
    let mut clients: HashMap<u64, ClientEntry> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, entry } => {
                info!("WebSocket client {} connected (scope: {:?})", id, entry.scope);
                clients.insert(id, entry);
            }
            HubCommand::Unregister { id } => {
                if clients.remove(&id).is_some() {
                    info!("WebSocket client {} disconnected", id);
                }
            }
            HubCommand::Broadcast { event } => {
                let payload: Arc<str> = match serde_json::to_string(&event) {
                    Ok(json) => json.into(),
                    Err(e) => {
                        error!("Failed to serialize event {}: {}", event.id, e);
                        continue;
                    }
                };

                let mut evicted = Vec::new();
                for (id, client) in clients.iter().filter(|(_, c)| c.wants(event.run_id)) {
                    let outbound = Outbound {
                        id: event.id,
                        payload: Arc::clone(&payload),
                    };
                    match client.tx.try_send(outbound) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Evicting slow WebSocket client {}", id);
                            evicted.push(*id);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(*id),
                    }
                }
                // dropping the sender closes the client's write pump
                for id in evicted {
                    clients.remove(&id);
                }
            }
            HubCommand::ClientCount { reply } => {
                let _ = reply.send(clients.len());
            }
            HubCommand::Shutdown => {
                info!("Hub shutting down, closing {} clients", clients.len());
                clients.clear();
                break;
            }
        }
    }
}
