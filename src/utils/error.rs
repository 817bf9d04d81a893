//! The `error` module defines the error types used within the `mqgate` application.
//!
//! Errors are split by the layer that produces them: the upstream broker
//! client, the fan-out broker core, a single subscriber's transport, and
//! process startup.

use thiserror::Error;

/// Failures reported by the upstream message-queue client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream connection is closed")]
    Closed,
    #[error("failed to create {0}: {1}")]
    Create(&'static str, String),
    #[error("failed to subscribe to topic {topic}: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("upstream send failed: {0}")]
    Send(String),
}

/// Failures surfaced by the fan-out broker to its immediate caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("producer not initialized")]
    NotInitialized,
    #[error("failed to send message: {0}")]
    PublishFailed(#[source] UpstreamError),
    #[error("failed to start consumer: {0}")]
    ConsumerStartFailed(#[source] UpstreamError),
    #[error("failed to start producer: {0}")]
    ProducerStartFailed(#[source] UpstreamError),
}

/// A subscriber's transport rejected a message; the remote end is gone.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("delivery to {client_id} failed: {reason}")]
pub struct DeliveryError {
    pub client_id: String,
    pub reason: String,
}

/// The HTTP side channel could not hand a message over.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("callback answered with status {0}")]
    Status(u16),
}

/// Fatal startup failures of the gateway process.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to initialize producer: {0}")]
    Producer(#[from] BrokerError),
    #[error("callback forwarder: {0}")]
    Forwarder(#[from] ForwardError),
}

/// Failures of the WebSocket client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed by the gateway")]
    Closed,
}
