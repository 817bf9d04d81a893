//! Topic consumer registry
//!
//! Holds at most one running upstream consumer per `(topic, group)` pair.
//! Entries are created lazily by the first subscriber of a topic and stay
//! until the broker shuts down, even when the topic has no subscribers left.
//! After `shutdown_all` the registry refuses to start anything new.
//!
//! Creation is double-checked: a shared-lock lookup answers the common case,
//! and a miss re-checks under the exclusive lock, which stays held while the
//! upstream consumer starts. Concurrent callers for the same key therefore
//! wait for the first one and then see a running entry.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::upstream::ConsumerHandle;
use crate::utils::error::UpstreamError;

type ConsumerKey = (String, String);

fn consumer_key(topic: &str, group: &str) -> ConsumerKey {
    (topic.to_string(), group.to_string())
}

#[derive(Default)]
struct Consumers {
    running: HashMap<ConsumerKey, Box<dyn ConsumerHandle>>,
    closed: bool,
}

#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: RwLock<Consumers>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a consumer runs for `(topic, group)`, calling `start` only if
    /// none does. Returns `true` when this call started it.
    ///
    /// If `start` fails nothing is recorded and a later call may retry. Once
    /// the registry is shut down every call fails with `UpstreamError::Closed`.
    pub async fn ensure<F, Fut>(&self, topic: &str, group: &str, start: F) -> Result<bool, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Box<dyn ConsumerHandle>, UpstreamError>>,
    {
        let key = consumer_key(topic, group);
        {
            let consumers = self.consumers.read().await;
            if consumers.closed {
                return Err(UpstreamError::Closed);
            }
            if consumers.running.contains_key(&key) {
                debug!("consumer for {topic}:{group} already exists");
                return Ok(false);
            }
        }

        let mut consumers = self.consumers.write().await;
        if consumers.closed {
            return Err(UpstreamError::Closed);
        }
        if consumers.running.contains_key(&key) {
            return Ok(false);
        }

        info!("starting consumer for topic: {topic}, group: {group}");
        let handle = start().await?;
        consumers.running.insert(key, handle);
        info!("consumer started for topic: {topic}, group: {group}");
        Ok(true)
    }

    pub async fn contains(&self, topic: &str, group: &str) -> bool {
        self.consumers
            .read()
            .await
            .running
            .contains_key(&consumer_key(topic, group))
    }

    pub async fn len(&self) -> usize {
        self.consumers.read().await.running.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        self.consumers.read().await.closed
    }

    /// Stop and forget every consumer, and refuse new ones from now on.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(ConsumerKey, Box<dyn ConsumerHandle>)> = {
            let mut consumers = self.consumers.write().await;
            consumers.closed = true;
            consumers.running.drain().collect()
        };

        info!("shutting down {} consumers", drained.len());
        for ((topic, group), consumer) in drained {
            debug!("shutting down consumer: {topic}:{group}");
            consumer.shutdown().await;
        }
    }
}
