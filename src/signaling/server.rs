use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::{RelayCommand, RelayHandle, relay_actor};
use super::keepalive::{Beat, Heartbeat, Keepalive};
use super::messages::ClientEvent;
use super::relay::Relay;
use super::types::{ConnectionId, OutboundMessage};
use crate::config::RelayConfig;

pub const DEFAULT_SIGNALING_PORT: u16 = 3479;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct SignalingServer {
    listener: TcpListener,
    handle: RelayHandle,
    keepalive: Keepalive,
}

impl SignalingServer {
    /// Bind the listener and start the relay actor.
    pub async fn bind(config: &RelayConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        let (tx, rx) = mpsc::channel::<RelayCommand>(1024);
        tokio::spawn(relay_actor(rx, Relay::new(config.admission_policy())));

        Ok(Self {
            listener,
            handle: RelayHandle { tx },
            keepalive: Keepalive {
                ping_interval: config.ping_interval(),
                pong_timeout: config.pong_timeout(),
            },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    /// Accept failures (fd exhaustion and the like) are logged and retried.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = &mut shutdown => {
                    info!("Signaling server shutting down");
                    return Ok(());
                }
            };
            let Some((stream, addr)) = recover_accept(accepted).await else {
                continue;
            };
            let handle = self.handle.clone();
            let keepalive = self.keepalive;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle, keepalive).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Passes an accepted socket through; on error logs, backs off and yields nothing.
async fn recover_accept(
    accepted: io::Result<(TcpStream, SocketAddr)>,
) -> Option<(TcpStream, SocketAddr)> {
    match accepted {
        Ok(accepted) => Some(accepted),
        Err(e) => {
            error!("Accept failed: {}", e);
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RelayHandle,
    keepalive: Keepalive,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("WebSocket connection from {}", addr);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    let conn_id = match handle.connect(tx).await {
        Ok(id) => id,
        Err(e) => {
            send_task.abort();
            return Err(e.into());
        }
    };
    info!("Connection {} assigned to {}", conn_id, addr);

    let mut heartbeat = Heartbeat::new(keepalive);

    loop {
        tokio::select! {
            beat = heartbeat.next() => match beat {
                Beat::Ping => {
                    if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                        break;
                    }
                    debug!("Ping sent to {}", conn_id);
                }
                Beat::Expired => {
                    warn!("Pong timeout, disconnecting {}", conn_id);
                    break;
                }
            },

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", conn_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => handle_text_message(&text, conn_id, &handle).await,
                    Message::Pong(_) => {
                        heartbeat.pong_received();
                        debug!("Pong received from {}", conn_id);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", conn_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.disconnect(conn_id).await;

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", conn_id, addr);

    Ok(())
}

/// Decoded events and undecodable joins both go through the relay, so a
/// sender's replies come back in the order it sent its frames.
async fn handle_text_message(text: &str, conn_id: ConnectionId, handle: &RelayHandle) {
    match ClientEvent::parse(text) {
        Ok(event) => handle.dispatch(conn_id, event).await,
        Err(e) => {
            warn!("Rejected frame from {}: {}", conn_id, e);
            if e.event() == Some(ClientEvent::JOIN_ROOM) {
                handle.reject_join(conn_id, e.to_string()).await;
            }
        }
    }
}
