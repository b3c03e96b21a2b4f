//! Real-time fan-out hub for chat-style WebSocket clients.
//!
//! Every line a client sends is broadcast to every connected client, the
//! sender included. Slow or dead peers are evicted rather than allowed to
//! hold up everyone else. Each module has one job:
//!
//! - [`hub`] owns the live-connection set on a single task and fans
//!   broadcasts out with a non-blocking enqueue-or-evict pass.
//! - [`connection`] accepts a transport and runs its inbound and outbound
//!   pumps, including liveness pings and read/write deadlines.
//! - [`transport`] defines the frames the pumps exchange and adapts an axum
//!   WebSocket to them.
//! - [`message`] normalizes inbound text and frames outbound batches.
//! - [`server`] exposes `/` and `/ws` over HTTP.
//! - [`config`] and [`cli`] carry the tunables; [`error`] the failure taxonomy.

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod server;
pub mod transport;

pub use config::HubConfig;
pub use connection::{ConnectionTasks, accept};
pub use hub::{ConnectionId, Hub, HubHandle};
