//! The hub owns the set of live connections and fans broadcasts out to them.
//!
//! All membership changes and every broadcast pass run on a single task,
//! in the order their requests are pulled off the intake channels. Pumps only
//! ever talk to the hub through a [`HubHandle`], so the live set needs no lock.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tracing::{debug, info, warn};

use crate::{
    config::HubConfig,
    error::{ConfigError, HubClosed},
};

/// Pending broadcasts held before publishers have to wait on the hub.
const BROADCAST_BACKLOG: usize = 64;

/// Opaque identity of one accepted connection. Used only for membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sending side of a connection's outbound queue. Only the hub holds it, so
/// dropping it is how the queue gets closed.
pub type Outbox = mpsc::Sender<Arc<str>>;

struct Registration {
    id: ConnectionId,
    outbox: Outbox,
}

enum HubQuery {
    Members {
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },
}

/// Cloneable entry point into a running hub.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Arc<str>>,
    query_tx: mpsc::UnboundedSender<HubQuery>,
    next_id: Arc<AtomicU64>,
    config: HubConfig,
}

impl HubHandle {
    pub fn config(&self) -> HubConfig {
        self.config
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a connection to the live set. Each id should register once.
    pub fn register(&self, id: ConnectionId, outbox: Outbox) -> Result<(), HubClosed> {
        self.register_tx
            .send(Registration { id, outbox })
            .map_err(|_| HubClosed)
    }

    /// Removes a connection and closes its outbound queue. Safe to repeat.
    ///
    /// Synchronous so it can run from a `Drop` impl.
    pub fn unregister(&self, id: ConnectionId) -> Result<(), HubClosed> {
        self.unregister_tx.send(id).map_err(|_| HubClosed)
    }

    /// Queues a line for delivery to every live connection, the sender included.
    pub async fn broadcast(&self, line: impl Into<Arc<str>>) -> Result<(), HubClosed> {
        self.broadcast_tx
            .send(line.into())
            .await
            .map_err(|_| HubClosed)
    }

    /// Snapshot of the live set, sorted by id.
    pub async fn members(&self) -> Result<Vec<ConnectionId>, HubClosed> {
        let (respond_to, response) = oneshot::channel();
        self.query_tx
            .send(HubQuery::Members { respond_to })
            .map_err(|_| HubClosed)?;
        response.await.map_err(|_| HubClosed)
    }

    pub async fn connection_count(&self) -> Result<usize, HubClosed> {
        Ok(self.members().await?.len())
    }
}

/// The coordinating task's state. Built with [`Hub::new`], driven by [`Hub::run`].
pub struct Hub {
    clients: HashMap<ConnectionId, Outbox>,
    register_rx: mpsc::UnboundedReceiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<Arc<str>>,
    query_rx: mpsc::UnboundedReceiver<HubQuery>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Result<(Self, HubHandle), ConfigError> {
        let config = config.validate()?;
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_BACKLOG);
        let (query_tx, query_rx) = mpsc::unbounded_channel();

        let hub = Self {
            clients: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            query_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            query_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            config,
        };
        Ok((hub, handle))
    }

    /// Builds a hub and runs it on the current Tokio runtime.
    pub fn spawn(config: HubConfig) -> Result<HubHandle, ConfigError> {
        let (hub, handle) = Self::new(config)?;
        tokio::spawn(hub.run());
        Ok(handle)
    }

    /// Processes requests one at a time until every handle is dropped.
    ///
    /// Membership changes are polled ahead of broadcasts so a registration
    /// sent before a broadcast is always applied first.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(Registration { id, outbox }) = self.register_rx.recv() => {
                    self.register(id, outbox);
                }
                Some(id) = self.unregister_rx.recv() => self.unregister(id),
                Some(query) = self.query_rx.recv() => self.answer(query),
                Some(line) = self.broadcast_rx.recv() => self.broadcast(line),
                else => break,
            }
        }
        debug!(remaining = self.clients.len(), "hub stopped");
    }

    fn register(&mut self, id: ConnectionId, outbox: Outbox) {
        if self.clients.insert(id, outbox).is_some() {
            warn!(connection = %id, "connection registered twice; keeping newest queue");
        }
        info!(connection = %id, live = self.clients.len(), "connection registered");
    }

    fn unregister(&mut self, id: ConnectionId) {
        // Dropping the outbox closes the queue and wakes the outbound pump.
        if self.clients.remove(&id).is_some() {
            info!(connection = %id, live = self.clients.len(), "connection unregistered");
        }
    }

    fn broadcast(&mut self, line: Arc<str>) {
        self.clients
            .retain(|id, outbox| match outbox.try_send(Arc::clone(&line)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, "outbound queue full; evicting connection");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "outbound pump already gone; dropping connection");
                    false
                }
            });
    }

    fn answer(&self, query: HubQuery) {
        match query {
            HubQuery::Members { respond_to } => {
                let mut members: Vec<_> = self.clients.keys().copied().collect();
                members.sort_unstable();
                let _ = respond_to.send(members);
            }
        }
    }
}
