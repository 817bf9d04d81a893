//! Broker engine
//!
//! The fan-out core of the gateway. One `Broker` owns:
//! - the upstream publish connection, started once by `init_producer`
//! - the topic consumer registry (one upstream consumer per `topic:group`)
//! - the subscription registry (topic -> client id -> subscriber)
//! - the stats counters
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>`; every method takes `&self` and
//!   may be called from any number of tasks at once.
//! - The two registries and the counters each have their own lock, and no
//!   method holds more than one of them at a time.
//! - Consumer callbacks run on the upstream client's tasks. They count the
//!   message, hand it to the HTTP forwarder if one is attached, and broadcast
//!   it. A failing subscriber never affects the consumer or other subscribers.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::broker::consumer::ConsumerRegistry;
use crate::broker::message::Delivery;
use crate::broker::registry::{BroadcastOutcome, ClientId, Registration, SubscriptionRegistry};
use crate::broker::stats::{Stats, StatsSnapshot};
use crate::broker::subscriber::Subscriber;
use crate::forward::CallbackForwarder;
use crate::upstream::{BatchHandler, ConsumeResult, InboundMessage, Producer, SendReceipt, Upstream};
use crate::utils::error::BrokerError;

pub struct Broker {
    upstream: Arc<dyn Upstream>,
    group: String,
    producer: OnceCell<Arc<dyn Producer>>,
    consumers: ConsumerRegistry,
    subscriptions: Arc<SubscriptionRegistry>,
    stats: Arc<Stats>,
    forwarder: Option<CallbackForwarder>,
}

impl Broker {
    /// Creates a broker on top of `upstream`. `group` is the consumer group
    /// the front-end subscribes with.
    pub fn new(upstream: Arc<dyn Upstream>, group: impl Into<String>) -> Self {
        Self {
            upstream,
            group: group.into(),
            producer: OnceCell::new(),
            consumers: ConsumerRegistry::new(),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            stats: Arc::new(Stats::new()),
            forwarder: None,
        }
    }

    /// Attach the HTTP side channel. Only consumers started afterwards use it.
    pub fn with_forwarder(mut self, forwarder: CallbackForwarder) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn default_group(&self) -> &str {
        &self.group
    }

    /// Start the publish connection. Calling it again after success is a no-op.
    pub async fn init_producer(&self) -> Result<(), BrokerError> {
        self.producer
            .get_or_try_init(|| async {
                info!("initializing producer");
                self.upstream
                    .start_producer()
                    .await
                    .map_err(BrokerError::ProducerStartFailed)
            })
            .await?;
        Ok(())
    }

    pub fn is_producer_ready(&self) -> bool {
        self.producer.initialized()
    }

    /// Publish `body` to `topic` through the shared producer.
    pub async fn send(&self, topic: &str, body: &str) -> Result<SendReceipt, BrokerError> {
        let Some(producer) = self.producer.get() else {
            self.stats.error();
            return Err(BrokerError::NotInitialized);
        };

        match producer
            .publish(topic, Bytes::copy_from_slice(body.as_bytes()))
            .await
        {
            Ok(receipt) => {
                self.stats.message_sent();
                debug!("sent to {topic}: {receipt}");
                Ok(receipt)
            }
            Err(e) => {
                self.stats.error();
                warn!("failed to send to {topic}: {e}");
                Err(BrokerError::PublishFailed(e))
            }
        }
    }

    /// Make sure an upstream consumer runs for `(topic, group)`. Idempotent;
    /// concurrent callers for the same key end up with a single consumer.
    /// After `shutdown` it fails with `UpstreamError::Closed`.
    pub async fn ensure_consumer(&self, group: &str, topic: &str) -> Result<(), BrokerError> {
        let handler = self.batch_handler(topic);
        let result = self
            .consumers
            .ensure(topic, group, || {
                self.upstream.start_consumer(topic, group, handler)
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.stats.error();
                error!("failed to start consumer for topic {topic}: {e}");
                Err(BrokerError::ConsumerStartFailed(e))
            }
        }
    }

    fn batch_handler(&self, topic: &str) -> BatchHandler {
        let topic = topic.to_string();
        let subscriptions = self.subscriptions.clone();
        let stats = self.stats.clone();
        let forwarder = self.forwarder.clone();

        Arc::new(move |batch: Vec<InboundMessage>| {
            for msg in batch {
                debug!("received from upstream, topic: {topic}, msg id: {}", msg.message_id);
                stats.message_received();
                if let Some(forwarder) = &forwarder {
                    forwarder.forward(msg.body.clone());
                }
                subscriptions.broadcast(&Delivery::from_inbound(&topic, &msg));
            }
            ConsumeResult::Success
        })
    }

    /// Register `subscriber` for `topic` under `client_id`.
    ///
    /// If the slot is already taken the previous subscriber is closed and
    /// replaced; the subscriber count is unchanged in that case.
    pub fn register_subscriber(
        &self,
        topic: &str,
        client_id: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Registration {
        let (registration, displaced) = self.subscriptions.register(topic, client_id, subscriber);
        match displaced {
            Some(previous) => {
                info!("client {client_id} re-subscribed to {topic}, closing the previous stream");
                previous.close();
            }
            None => self.stats.subscriber_added(),
        }
        registration
    }

    /// Remove and close the subscriber under `(topic, client_id)`, if any.
    /// Returns whether something was removed. The topic's consumer keeps running.
    pub fn unregister_subscriber(&self, topic: &str, client_id: &str) -> bool {
        match self.subscriptions.unregister(topic, client_id) {
            Some(subscriber) => {
                subscriber.close();
                self.stats.subscriber_removed();
                true
            }
            None => false,
        }
    }

    /// Like `unregister_subscriber`, but only if the slot still belongs to
    /// `registration`.
    pub fn release(&self, registration: &Registration) -> bool {
        match self.subscriptions.release(registration) {
            Some(subscriber) => {
                subscriber.close();
                self.stats.subscriber_removed();
                true
            }
            None => false,
        }
    }

    pub(crate) fn broadcast(&self, delivery: &Delivery) -> BroadcastOutcome {
        self.subscriptions.broadcast(delivery)
    }

    pub fn subscriber_ids(&self, topic: &str) -> Vec<ClientId> {
        self.subscriptions.subscriber_ids(topic)
    }

    pub async fn consumer_count(&self) -> usize {
        self.consumers.len().await
    }

    pub async fn has_consumer(&self, group: &str, topic: &str) -> bool {
        self.consumers.contains(topic, group).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Stop every consumer, then the producer.
    pub async fn shutdown(&self) {
        self.consumers.shutdown_all().await;
        if let Some(producer) = self.producer.get() {
            info!("shutting down producer");
            producer.shutdown().await;
        }
    }
}
