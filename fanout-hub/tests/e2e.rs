use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use fanout_hub::{Hub, HubConfig, HubHandle, server};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(2);
const INDEX: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static/index.html");

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    hub: HubHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(config: HubConfig) -> Result<Self> {
        let hub = Hub::spawn(config)?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = server::router(hub.clone(), INDEX);
        let task = tokio::spawn(server::serve(listener, app, async move {
            let _ = shutdown_rx.await;
        }));
        Ok(Self {
            addr,
            hub,
            shutdown,
            task,
        })
    }

    async fn join(&self, name: &str) -> Result<Client> {
        let (mut client, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .context("websocket handshake")?;
        client.send(Message::Text(name.to_string())).await?;
        Ok(client)
    }

    async fn wait_for_members(&self, expected: usize) -> Result<()> {
        timeout(WAIT, async {
            loop {
                if self.hub.connection_count().await? == expected {
                    return Ok::<_, anyhow::Error>(());
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| format!("hub never reached {expected} members"))?
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = timeout(WAIT, self.task).await;
    }
}

async fn next_text(client: &mut Client) -> Result<String> {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .context("timed out waiting for a message")?
            .ok_or_else(|| anyhow!("server closed the stream"))??;
        match message {
            Message::Text(text) => return Ok(text),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Err(anyhow!("unexpected message: {other:?}")),
        }
    }
}

#[tokio::test]
async fn chat_lines_reach_every_client_including_sender() -> Result<()> {
    let server = TestServer::start(HubConfig::default()).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;
    server.wait_for_members(2).await?;

    alice.send(Message::Text("hello bob".into())).await?;
    assert_eq!(next_text(&mut bob).await?, "alice: hello bob\n");
    assert_eq!(next_text(&mut alice).await?, "alice: hello bob\n");

    bob.send(Message::Text("  hi\nthere  ".into())).await?;
    assert_eq!(next_text(&mut alice).await?, "bob: hi there\n");
    assert_eq!(next_text(&mut bob).await?, "bob: hi there\n");

    alice.close(None).await?;
    server.wait_for_members(1).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn oversized_message_disconnects_the_sender_only() -> Result<()> {
    let server = TestServer::start(HubConfig {
        max_frame_bytes: 64,
        ..HubConfig::default()
    })
    .await?;
    let mut loud = server.join("loud").await?;
    let mut quiet = server.join("quiet").await?;
    server.wait_for_members(2).await?;

    loud.send(Message::Text("x".repeat(256))).await?;
    server.wait_for_members(1).await?;

    // The offender's stream ends with a close frame or an error.
    let ended = timeout(WAIT, async {
        loop {
            match loud.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "oversized sender was not disconnected");

    quiet.send(Message::Text("still here".into())).await?;
    assert_eq!(next_text(&mut quiet).await?, "quiet: still here\n");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn index_page_is_served_at_root() -> Result<()> {
    let hub = Hub::spawn(HubConfig::default())?;
    let app = server::router(hub, INDEX);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let page = String::from_utf8(body.to_vec())?;
    assert!(page.contains("/ws"), "page should open the websocket endpoint");
    Ok(())
}
