//! HTTP surface: the chat page at `/` and the WebSocket endpoint at `/ws`.

use std::{future::Future, io, net::SocketAddr, path::PathBuf};

use axum::{
    Router,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::{services::ServeFile, trace::TraceLayer};
use tracing::{info, warn};

use crate::{connection, hub::HubHandle, transport};

/// Builds the application router around a running hub.
pub fn router(hub: HubHandle, index: impl Into<PathBuf>) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .route_service("/", ServeFile::new(index.into()))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn upgrade(
    State(hub): State<HubHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let limit = hub.config().max_frame_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(move |err| warn!(%peer, error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (source, sink) = transport::split_websocket(socket);
            connection::accept(&hub, source, sink, Some(peer.to_string()));
        })
}

/// Serves `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Serves until Ctrl-C.
pub async fn serve_until_ctrl_c(listener: TcpListener, app: Router) -> io::Result<()> {
    serve(listener, app, async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutting down"),
            Err(err) => warn!(error = ?err, "failed to install ctrl-c handler"),
        }
    })
    .await
}
