//! The upstream message-queue seam.
//!
//! The gateway holds one publish connection and, per `(topic, group)`, one
//! push consumer on the upstream broker. This module defines the capability
//! the broker core consumes (`Upstream`, `Producer`, `ConsumerHandle`) and an
//! in-process loopback implementation, `MemoryUpstream`.
//!
//! Consumers are push-style: the upstream client invokes a `BatchHandler` on
//! its own task for every delivered batch and expects a `ConsumeResult` back.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::utils::error::UpstreamError;

pub use memory::MemoryUpstream;

/// One message as delivered by an upstream consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub message_id: String,
    pub body: Bytes,
}

/// Acknowledgment returned to the upstream client for a batch.
///
/// `RetryLater` asks the upstream to redeliver the batch. The gateway's own
/// handler always answers `Success`: a message nobody could take is counted
/// and dropped, never redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    Success,
    RetryLater,
}

/// Callback invoked by a running consumer for each delivered batch.
pub type BatchHandler = Arc<dyn Fn(Vec<InboundMessage>) -> ConsumeResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    SendOk,
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStatus::SendOk => f.write_str("SEND_OK"),
        }
    }
}

/// Receipt for a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub status: SendStatus,
    pub message_id: String,
    pub topic: String,
}

impl fmt::Display for SendReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SendResult [sendStatus={}, msgId={}, topic={}]",
            self.status, self.message_id, self.topic
        )
    }
}

/// A started publish connection. Safe for concurrent use.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<SendReceipt, UpstreamError>;

    async fn shutdown(&self);
}

/// A running push consumer bound to one `(topic, group)`.
#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    fn topic(&self) -> &str;

    fn group(&self) -> &str;

    async fn shutdown(&self);
}

/// Factory for upstream connections.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn start_producer(&self) -> Result<Arc<dyn Producer>, UpstreamError>;

    async fn start_consumer(
        &self,
        topic: &str,
        group: &str,
        handler: BatchHandler,
    ) -> Result<Box<dyn ConsumerHandle>, UpstreamError>;
}

#[cfg(test)]
mod tests;
