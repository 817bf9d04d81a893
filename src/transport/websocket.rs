//! WebSocket front-end
//!
//! Accepts WebSocket connections and translates protocol JSON frames into
//! broker operations. Responsibilities:
//! - Answer unary `send` and `health_check` requests
//! - Run one `SubscriptionSession` per `subscribe` request, streaming the
//!   topic's messages back over the same connection
//! - Cancel every subscription a connection opened once it goes away
//!
//! Each connection has a writer task fed by a bounded queue. Subscribers
//! push into that queue without waiting; when the writer fails the queue
//! closes, and when the peer stops reading it fills up. Either way the next
//! delivery fails, which is how a vanished or stuck peer is detected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::transport::message::{ClientMessage, HealthStatus, ServerMessage};
use crate::transport::session::{CloseReason, CloseSignal, SubscriptionSession};
use crate::utils::error::GatewayError;

/// Frames buffered per connection before its subscriptions start failing.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// State shared by every connection.
pub struct GatewayState {
    broker: Arc<Broker>,
    next_client: AtomicU64,
}

impl GatewayState {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            next_client: AtomicU64::new(0),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// `cli-1`, `cli-2`, ... for subscribers that did not name themselves.
    pub fn next_client_id(&self) -> String {
        format!("cli-{}", self.next_client.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct GatewayServer {
    listener: TcpListener,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    pub async fn bind(addr: &str, broker: Arc<Broker>) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            state: Arc::new(GatewayState::new(broker)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("gateway listening on ws://{addr}"),
            Err(e) => warn!("gateway listening on an unknown address: {e}"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let state = self.state.clone();
                    tokio::spawn(handle_connection(stream, peer, state));
                }
                Err(e) => error!("failed to accept connection: {e}"),
            }
        }
    }
}

pub async fn start_websocket_server(addr: &str, broker: Arc<Broker>) -> Result<(), GatewayError> {
    GatewayServer::bind(addr, broker).await?.run().await;
    Ok(())
}

struct SessionHandle {
    signal: Arc<CloseSignal>,
    task: JoinHandle<()>,
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<GatewayState>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error from {peer}: {e}");
            return;
        }
    };
    debug!("connection from {peer}");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_CAPACITY);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize frame: {e}");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                debug!("failed to write to {peer}: {e}");
                break;
            }
        }
        // dropping `rx` here makes every later delivery to this peer fail
        let _ = ws_sender.close().await;
        debug!("send loop closed for {peer}");
    });

    let mut sessions: HashMap<String, SessionHandle> = HashMap::new();

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                handle_text(&state, &tx, &mut sessions, text.as_str()).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("read error from {peer}: {e}");
                break;
            }
        }
    }

    info!("{peer} disconnected, closing {} subscriptions", sessions.len());
    for (_, session) in sessions.drain() {
        session.signal.trigger(CloseReason::Cancelled);
        let _ = session.task.await;
    }
}

async fn handle_text(
    state: &GatewayState,
    tx: &Sender<ServerMessage>,
    sessions: &mut HashMap<String, SessionHandle>,
    text: &str,
) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Send { topic, body }) => Some(handle_send(&state.broker, &topic, &body).await),
        Ok(ClientMessage::Subscribe { topic, client_id }) => {
            handle_subscribe(state, tx, sessions, topic, client_id)
        }
        Ok(ClientMessage::Unsubscribe { topic }) => match sessions.remove(&topic) {
            Some(session) if !session.task.is_finished() => {
                session.signal.trigger(CloseReason::Cancelled);
                None
            }
            _ => Some(ServerMessage::invalid_argument(format!(
                "not subscribed to topic {topic}"
            ))),
        },
        Ok(ClientMessage::HealthCheck { service }) => Some(health_report(&state.broker, &service)),
        Err(err) => {
            warn!(
                "invalid client message: {err} | {}",
                text.chars().take(100).collect::<String>()
            );
            Some(ServerMessage::invalid_argument(format!("invalid message: {err}")))
        }
    };

    if let Some(reply) = reply {
        let _ = tx.send(reply).await;
    }
}

fn handle_subscribe(
    state: &GatewayState,
    tx: &Sender<ServerMessage>,
    sessions: &mut HashMap<String, SessionHandle>,
    topic: String,
    client_id: Option<String>,
) -> Option<ServerMessage> {
    if topic.is_empty() {
        return Some(ServerMessage::invalid_argument("topic cannot be empty"));
    }
    if sessions
        .get(&topic)
        .is_some_and(|session| !session.task.is_finished())
    {
        return Some(ServerMessage::invalid_argument(format!(
            "already subscribed to topic {topic}"
        )));
    }

    let client_id = client_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| state.next_client_id());
    let mut session =
        SubscriptionSession::new(state.broker.clone(), topic.clone(), client_id, tx.clone());
    let signal = session.signal();
    let task = tokio::spawn(async move {
        if let Err(e) = session.run().await {
            warn!("subscription of {} failed: {e}", session.client_id());
        }
    });
    sessions.insert(topic, SessionHandle { signal, task });
    None
}

/// Unary send: validates the request, publishes, and maps the outcome to a
/// reply frame.
pub(crate) async fn handle_send(broker: &Broker, topic: &str, body: &str) -> ServerMessage {
    if topic.is_empty() {
        return ServerMessage::invalid_argument("topic cannot be empty");
    }
    if body.is_empty() {
        return ServerMessage::invalid_argument("message body cannot be empty");
    }

    debug!("sending message to topic: {topic}");
    match broker.send(topic, body).await {
        Ok(receipt) => ServerMessage::SendResult {
            result: receipt.to_string(),
        },
        Err(e) => ServerMessage::internal(e.to_string(), Some(topic)),
    }
}

pub(crate) fn health_report(broker: &Broker, service: &str) -> ServerMessage {
    if !broker.is_producer_ready() {
        warn!("health check for '{service}' failed: producer not initialized");
        return ServerMessage::Health {
            status: HealthStatus::NotServing,
            message: "producer not initialized".to_string(),
            stats: None,
        };
    }

    let stats = broker.stats();
    info!(
        "health check for '{service}' - sent: {}, received: {}, subscribers: {}, errors: {}",
        stats.messages_sent, stats.messages_received, stats.subscriber_count, stats.errors
    );
    ServerMessage::Health {
        status: HealthStatus::Serving,
        message: "gateway is healthy".to_string(),
        stats: Some(stats),
    }
}
