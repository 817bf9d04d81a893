//! In-process loopback upstream
//!
//! `MemoryUpstream` behaves like a single-node message queue living inside the
//! gateway process: whatever the producer publishes to a topic is pushed to
//! every consumer group subscribed to that topic. Within a group only the
//! first registered consumer receives a message (clustering delivery).
//!
//! Each consumer owns a tokio task that drains its queue and invokes the batch
//! handler, so handlers never run on the publisher's task. A batch answered
//! with `RetryLater` is redelivered up to `retry` times, then dropped.
//!
//! Fault injection hooks (`set_fail_producer_start`, `set_fail_consumer_start`,
//! `fail_next_publishes`) let callers exercise the gateway's error paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BatchHandler, ConsumeResult, ConsumerHandle, InboundMessage, Producer, SendReceipt,
    SendStatus, Upstream,
};
use crate::config::UpstreamSettings;
use crate::utils::error::UpstreamError;

#[derive(Clone)]
pub struct MemoryUpstream {
    inner: Arc<Inner>,
}

struct Route {
    id: u64,
    group: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

struct Inner {
    name_server: String,
    retry: u32,
    routes: RwLock<HashMap<String, Vec<Route>>>,
    next_route: AtomicU64,
    consumers_started: AtomicUsize,
    pending_publish_failures: AtomicUsize,
    fail_producer_start: AtomicBool,
    fail_consumer_start: AtomicBool,
    consumer_start_delay_ms: AtomicU64,
}

impl MemoryUpstream {
    pub fn new(name_server: impl Into<String>, retry: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                name_server: name_server.into(),
                retry,
                routes: RwLock::new(HashMap::new()),
                next_route: AtomicU64::new(1),
                consumers_started: AtomicUsize::new(0),
                pending_publish_failures: AtomicUsize::new(0),
                fail_producer_start: AtomicBool::new(false),
                fail_consumer_start: AtomicBool::new(false),
                consumer_start_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self::new(settings.name_server.clone(), settings.retry)
    }

    /// Push a message with a caller-chosen id to every subscribed group, as if
    /// it had been published by some other client of the upstream broker.
    /// Returns the number of consumers it was handed to.
    pub fn inject(&self, topic: &str, message_id: &str, body: impl Into<Bytes>) -> usize {
        self.inner.dispatch(InboundMessage {
            topic: topic.to_string(),
            message_id: message_id.to_string(),
            body: body.into(),
        })
    }

    /// Total number of consumers ever started, including stopped ones.
    pub fn consumers_started(&self) -> usize {
        self.inner.consumers_started.load(Ordering::SeqCst)
    }

    /// Number of consumers currently attached to `topic`.
    pub fn active_consumers(&self, topic: &str) -> usize {
        self.inner
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// The next `n` publish attempts fail with a transient send error.
    pub fn fail_next_publishes(&self, n: usize) {
        self.inner
            .pending_publish_failures
            .store(n, Ordering::SeqCst);
    }

    pub fn set_fail_producer_start(&self, fail: bool) {
        self.inner.fail_producer_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_consumer_start(&self, fail: bool) {
        self.inner.fail_consumer_start.store(fail, Ordering::SeqCst);
    }

    /// Simulated connection latency when starting a consumer.
    pub fn set_consumer_start_delay(&self, delay: Duration) {
        self.inner
            .consumer_start_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Inner {
    fn dispatch(&self, msg: InboundMessage) -> usize {
        let table = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(routes) = table.get(&msg.topic) else {
            debug!("no consumer for topic {}, message {} dropped", msg.topic, msg.message_id);
            return 0;
        };

        let mut groups = HashSet::new();
        let mut delivered = 0;
        for route in routes {
            if !groups.insert(route.group.as_str()) {
                continue;
            }
            if route.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn try_publish(&self, topic: &str, body: &Bytes) -> Result<SendReceipt, UpstreamError> {
        let injected = self
            .pending_publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(UpstreamError::Send(format!(
                "broker {} did not answer",
                self.name_server
            )));
        }

        let message_id = Uuid::new_v4().simple().to_string().to_uppercase();
        self.dispatch(InboundMessage {
            topic: topic.to_string(),
            message_id: message_id.clone(),
            body: body.clone(),
        });

        Ok(SendReceipt {
            status: SendStatus::SendOk,
            message_id,
            topic: topic.to_string(),
        })
    }

    fn remove_route(&self, topic: &str, id: u64) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = routes.get_mut(topic) {
            list.retain(|r| r.id != id);
            if list.is_empty() {
                routes.remove(topic);
            }
        }
    }
}

#[async_trait]
impl Upstream for MemoryUpstream {
    async fn start_producer(&self) -> Result<Arc<dyn Producer>, UpstreamError> {
        if self.inner.fail_producer_start.load(Ordering::SeqCst) {
            return Err(UpstreamError::Create(
                "producer",
                format!("name server {} unreachable", self.inner.name_server),
            ));
        }

        info!(
            "producer started, name server: {}, retry: {}",
            self.inner.name_server, self.inner.retry
        );
        Ok(Arc::new(MemoryProducer {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn start_consumer(
        &self,
        topic: &str,
        group: &str,
        handler: BatchHandler,
    ) -> Result<Box<dyn ConsumerHandle>, UpstreamError> {
        let delay = self.inner.consumer_start_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.inner.fail_consumer_start.load(Ordering::SeqCst) {
            return Err(UpstreamError::Subscribe {
                topic: topic.to_string(),
                reason: format!("name server {} refused the subscription", self.inner.name_server),
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let id = self.inner.next_route.fetch_add(1, Ordering::SeqCst);

        let retry = self.inner.retry;
        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let mut attempt = 0;
                while handler(vec![msg.clone()]) == ConsumeResult::RetryLater {
                    if attempt == retry {
                        warn!(
                            "message {} not consumed after {retry} redeliveries, dropping it",
                            msg.message_id
                        );
                        break;
                    }
                    attempt += 1;
                    debug!("redelivering message {}, attempt {attempt}", msg.message_id);
                }
            }
        });

        self.inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(Route {
                id,
                group: group.to_string(),
                tx,
            });
        self.inner.consumers_started.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryConsumer {
            id,
            topic: topic.to_string(),
            group: group.to_string(),
            inner: self.inner.clone(),
            task: Mutex::new(Some(task)),
        }))
    }
}

struct MemoryProducer {
    inner: Arc<Inner>,
    closed: AtomicBool,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<SendReceipt, UpstreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(UpstreamError::Closed);
        }

        let mut attempt = 0;
        loop {
            match self.inner.try_publish(topic, &body) {
                Ok(receipt) => return Ok(receipt),
                Err(e) if attempt < self.inner.retry => {
                    attempt += 1;
                    debug!("publish to {topic} failed ({e}), retry {attempt}");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MemoryConsumer {
    id: u64,
    topic: String,
    group: String,
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ConsumerHandle for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn group(&self) -> &str {
        &self.group
    }

    async fn shutdown(&self) {
        // dropping the route closes the queue; the task drains and exits
        self.inner.remove_route(&self.topic, self.id);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
