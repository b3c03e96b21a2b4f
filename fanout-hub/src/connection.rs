//! Per-connection pumps.
//!
//! Accepting a transport registers a fresh connection with the hub and spawns
//! two tasks over it:
//!
//! - the inbound pump reads frames, learns the display name from the first
//!   non-empty message and submits every later message as a broadcast;
//! - the outbound pump drains the connection's queue to the transport in
//!   batches and pings the peer on a fixed interval.
//!
//! Whichever pump stops first unregisters the connection and tells its sibling
//! to close, so a failure on either side tears the whole connection down.

use std::{fmt, sync::Arc};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::{
    config::HubConfig,
    error::{ConnectionError, TransportError},
    hub::{ConnectionId, HubHandle},
    message,
    transport::{Inbound, Outbound},
};

/// Why a pump stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    PeerClosed,
    SiblingStopped,
    QueueClosed,
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::PeerClosed => f.write_str("peer closed the connection"),
            Exit::SiblingStopped => f.write_str("sibling pump stopped"),
            Exit::QueueClosed => f.write_str("outbound queue closed"),
        }
    }
}

/// Runs on every pump exit path, panics included: unregisters the connection,
/// then drops the close signal so the sibling pump lets go of its half.
struct ReleaseGuard {
    id: ConnectionId,
    hub: HubHandle,
    close_sibling: Option<oneshot::Sender<()>>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.hub.unregister(self.id).is_err() {
            debug!(connection = %self.id, "hub gone before unregister");
        }
        self.close_sibling.take();
    }
}

/// Handles to the two pump tasks of an accepted connection.
pub struct ConnectionTasks {
    id: ConnectionId,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl ConnectionTasks {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolves once both pumps have exited, i.e. the connection is closed.
    pub async fn join(self) {
        let (inbound, outbound) = tokio::join!(self.inbound, self.outbound);
        for result in [inbound, outbound] {
            if let Err(err) = result {
                warn!(connection = %self.id, error = %err, "pump task failed");
            }
        }
    }
}

/// Accepts a transport: registers a new connection and starts both pumps.
pub fn accept<R, W>(hub: &HubHandle, source: R, sink: W, peer: Option<String>) -> ConnectionTasks
where
    R: Stream<Item = Result<Inbound, TransportError>> + Unpin + Send + 'static,
    W: Sink<Outbound, Error = TransportError> + Unpin + Send + 'static,
{
    let id = hub.next_connection_id();
    let config = hub.config();
    let span = info_span!("connection", id = %id, peer = peer.as_deref().unwrap_or("-"));

    let (outbox, queue) = mpsc::channel(config.queue_capacity);
    if let Err(err) = hub.register(id, outbox) {
        // The queue's sender is already dropped, so the outbound pump closes
        // immediately and takes the inbound pump with it.
        span.in_scope(|| warn!(error = %err, "could not register connection"));
    }

    let (close_outbound, inbound_stopped) = oneshot::channel();
    let (close_inbound, outbound_stopped) = oneshot::channel();

    let reader = InboundPump {
        connection: Connection::new(id),
        hub: hub.clone(),
        config,
        guard: ReleaseGuard {
            id,
            hub: hub.clone(),
            close_sibling: Some(close_outbound),
        },
    };
    let writer = OutboundPump {
        id,
        config,
        guard: ReleaseGuard {
            id,
            hub: hub.clone(),
            close_sibling: Some(close_inbound),
        },
    };

    let inbound = tokio::spawn(
        reader
            .run(source, outbound_stopped)
            .instrument(Span::clone(&span)),
    );
    let outbound = tokio::spawn(writer.run(queue, sink, inbound_stopped).instrument(span));

    ConnectionTasks {
        id,
        inbound,
        outbound,
    }
}

/// Connection state owned by the inbound pump.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    display_name: Option<String>,
}

impl Connection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            display_name: None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Turns a data frame into the line to broadcast, if any.
    ///
    /// The first non-empty message names the connection and is not broadcast.
    /// The name is never reassigned.
    pub fn accept_frame(&mut self, payload: &[u8]) -> Option<String> {
        let text = message::normalize(payload);
        match &self.display_name {
            Some(name) => Some(message::chat_line(name, &text)),
            None => {
                if !text.is_empty() {
                    info!(connection = %self.id, name = %text, "connection named");
                    self.display_name = Some(text);
                }
                None
            }
        }
    }
}

struct InboundPump {
    connection: Connection,
    hub: HubHandle,
    config: HubConfig,
    guard: ReleaseGuard,
}

impl InboundPump {
    async fn run<R>(mut self, mut source: R, mut sibling: oneshot::Receiver<()>)
    where
        R: Stream<Item = Result<Inbound, TransportError>> + Unpin,
    {
        match self.read_loop(&mut source, &mut sibling).await {
            Ok(exit) => debug!(reason = %exit, "inbound pump stopped"),
            Err(err) => warn!(error = %err, "inbound pump failed"),
        }
        drop(self.guard);
        drop(source);
    }

    async fn read_loop<R>(
        &mut self,
        source: &mut R,
        sibling: &mut oneshot::Receiver<()>,
    ) -> Result<Exit, ConnectionError>
    where
        R: Stream<Item = Result<Inbound, TransportError>> + Unpin,
    {
        let mut deadline = Instant::now() + self.config.pong_wait;
        loop {
            let next = tokio::select! {
                _ = &mut *sibling => return Ok(Exit::SiblingStopped),
                next = time::timeout_at(deadline, source.next()) => next,
            };
            let frame = match next {
                Err(_) => return Err(ConnectionError::LivenessTimeout(self.config.pong_wait)),
                Ok(None) => return Ok(Exit::PeerClosed),
                Ok(Some(frame)) => frame?,
            };

            match frame {
                Inbound::Pong => deadline = Instant::now() + self.config.pong_wait,
                Inbound::Close => return Ok(Exit::PeerClosed),
                Inbound::Data(payload) => {
                    if payload.len() > self.config.max_frame_bytes {
                        return Err(ConnectionError::FrameTooLarge {
                            len: payload.len(),
                            limit: self.config.max_frame_bytes,
                        });
                    }
                    if let Some(line) = self.connection.accept_frame(&payload) {
                        self.hub.broadcast(line).await?;
                    }
                }
            }
        }
    }
}

struct OutboundPump {
    id: ConnectionId,
    config: HubConfig,
    guard: ReleaseGuard,
}

impl OutboundPump {
    async fn run<W>(
        self,
        mut queue: mpsc::Receiver<Arc<str>>,
        mut sink: W,
        mut sibling: oneshot::Receiver<()>,
    ) where
        W: Sink<Outbound, Error = TransportError> + Unpin,
    {
        match self.write_loop(&mut queue, &mut sink, &mut sibling).await {
            Ok(exit) => {
                debug!(reason = %exit, "outbound pump stopped");
                if let Err(err) = self.write(&mut sink, Outbound::Close).await {
                    debug!(error = %err, "close notification not delivered");
                }
            }
            Err(err) => warn!(error = %err, "outbound pump failed"),
        }
        debug!(connection = %self.id, "releasing transport");
        drop(self.guard);
        drop(sink);
    }

    async fn write_loop<W>(
        &self,
        queue: &mut mpsc::Receiver<Arc<str>>,
        sink: &mut W,
        sibling: &mut oneshot::Receiver<()>,
    ) -> Result<Exit, ConnectionError>
    where
        W: Sink<Outbound, Error = TransportError> + Unpin,
    {
        let period = self.config.ping_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                queued = queue.recv() => {
                    let Some(first) = queued else {
                        return Ok(Exit::QueueClosed);
                    };
                    // Flush whatever else is already waiting in the same frame.
                    let pending = queue.len();
                    let rest = std::iter::from_fn(|| queue.try_recv().ok()).take(pending);
                    let batch = message::frame_batch(first, rest);
                    self.write(sink, Outbound::Text(batch)).await?;
                }
                _ = ticker.tick() => self.write(sink, Outbound::Ping).await?,
                _ = &mut *sibling => return Ok(Exit::SiblingStopped),
            }
        }
    }

    async fn write<W>(&self, sink: &mut W, frame: Outbound) -> Result<(), ConnectionError>
    where
        W: Sink<Outbound, Error = TransportError> + Unpin,
    {
        match time::timeout(self.config.write_wait, sink.send(frame)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::WriteTimeout(self.config.write_wait)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;

    fn fresh_connection() -> Connection {
        let (_hub, handle) = Hub::new(HubConfig::default()).unwrap();
        Connection::new(handle.next_connection_id())
    }

    #[test]
    fn first_message_names_connection() {
        let mut connection = fresh_connection();
        assert_eq!(connection.accept_frame(b"alice"), None);
        assert_eq!(connection.display_name(), Some("alice"));
        assert_eq!(
            connection.accept_frame(b"hello").as_deref(),
            Some("alice: hello")
        );
    }

    #[test]
    fn name_is_normalized_and_never_reassigned() {
        let mut connection = fresh_connection();
        connection.accept_frame(b"  al\nice  ");
        assert_eq!(connection.display_name(), Some("al ice"));
        assert_eq!(
            connection.accept_frame(b"  hi\nthere  ").as_deref(),
            Some("al ice: hi there")
        );
        assert_eq!(connection.display_name(), Some("al ice"));
    }

    #[test]
    fn blank_frames_do_not_claim_the_name() {
        let mut connection = fresh_connection();
        assert_eq!(connection.accept_frame(b"   "), None);
        assert_eq!(connection.display_name(), None);
        assert_eq!(connection.accept_frame(b"bob"), None);
        assert_eq!(connection.accept_frame(b"").as_deref(), Some("bob: "));
    }
}
