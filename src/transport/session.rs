//! Per-client subscription lifecycle
//!
//! One `SubscriptionSession` drives one streaming subscription through
//! `Idle -> Registered -> Active -> Closing -> Closed`. While `Active` the
//! session task is parked on its `CloseSignal`; the signal is fired by the
//! first of:
//! - a failed delivery (the connection's writer is gone)
//! - an explicit unsubscribe or the connection closing
//! - the broker closing the subscriber because a newer registration took
//!   its `(topic, client_id)` slot
//!
//! Later triggers are no-ops. Once the signal fired no further deliveries
//! are attempted, and the session unregisters and ends.

use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Delivery, Subscriber};
use crate::transport::message::ServerMessage;
use crate::utils::error::{BrokerError, DeliveryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Registered,
    Active,
    Closing,
    Closed,
}

/// What moved a session to `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    DeliveryFailed,
    Cancelled,
    Unregistered,
}

/// One-shot, idempotent close signal.
#[derive(Debug, Default)]
pub struct CloseSignal {
    reason: OnceLock<CloseReason>,
    notify: Notify,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self, reason: CloseReason) -> bool {
        if self.reason.set(reason).is_ok() {
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn closed(&self) -> CloseReason {
        loop {
            let notified = self.notify.notified();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

/// `Subscriber` that writes into a connection's bounded outbound queue.
///
/// A full queue means the peer stopped reading; it fails the delivery the
/// same way a closed connection does.
pub struct StreamSubscriber {
    client_id: String,
    outbound: Sender<ServerMessage>,
    signal: Arc<CloseSignal>,
}

impl StreamSubscriber {
    pub fn new(
        client_id: &str,
        outbound: Sender<ServerMessage>,
        signal: Arc<CloseSignal>,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            outbound,
            signal,
        }
    }

    fn failure(&self, reason: &str) -> DeliveryError {
        DeliveryError {
            client_id: self.client_id.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Subscriber for StreamSubscriber {
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        if self.signal.is_closed() {
            return Err(self.failure("subscription is closing"));
        }

        let frame = ServerMessage::Message {
            topic: delivery.topic.clone(),
            body: delivery.body.clone(),
            message_id: delivery.message_id.clone(),
            timestamp: delivery.timestamp,
        };
        let reason = match self.outbound.try_send(frame) {
            Ok(()) => {
                debug!("forwarded {} to {}", delivery.message_id, self.client_id);
                return Ok(());
            }
            Err(TrySendError::Full(_)) => "outbound queue full",
            Err(TrySendError::Closed(_)) => "stream closed",
        };
        if self.signal.trigger(CloseReason::DeliveryFailed) {
            warn!("closing subscription of client {}: {reason}", self.client_id);
        }
        Err(self.failure(reason))
    }

    fn close(&self) {
        self.signal.trigger(CloseReason::Unregistered);
    }
}

pub struct SubscriptionSession {
    broker: Arc<Broker>,
    topic: String,
    client_id: String,
    outbound: Sender<ServerMessage>,
    signal: Arc<CloseSignal>,
    state: SessionState,
}

impl SubscriptionSession {
    pub fn new(
        broker: Arc<Broker>,
        topic: String,
        client_id: String,
        outbound: Sender<ServerMessage>,
    ) -> Self {
        Self {
            broker,
            topic,
            client_id,
            outbound,
            signal: Arc::new(CloseSignal::new()),
            state: SessionState::Idle,
        }
    }

    /// Handle for cancelling the session from outside.
    pub fn signal(&self) -> Arc<CloseSignal> {
        self.signal.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "subscription {}@{}: {:?} -> {:?}",
            self.client_id, self.topic, self.state, next
        );
        self.state = next;
    }

    /// Drive the subscription until it is closed. Fails only if the topic's
    /// upstream consumer cannot be started, in which case the registration
    /// is rolled back before returning.
    pub async fn run(&mut self) -> Result<CloseReason, BrokerError> {
        info!("client {} subscribing to topic: {}", self.client_id, self.topic);
        let subscriber = Arc::new(StreamSubscriber::new(
            &self.client_id,
            self.outbound.clone(),
            self.signal.clone(),
        ));
        let registration = self
            .broker
            .register_subscriber(&self.topic, &self.client_id, subscriber);
        self.transition(SessionState::Registered);

        let group = self.broker.default_group().to_string();
        if let Err(e) = self.broker.ensure_consumer(&group, &self.topic).await {
            self.broker.release(&registration);
            self.transition(SessionState::Closed);
            let _ = self
                .outbound
                .try_send(ServerMessage::internal(e.to_string(), Some(&self.topic)));
            return Err(e);
        }
        self.transition(SessionState::Active);

        let ack = ServerMessage::Subscribed {
            topic: self.topic.clone(),
            client_id: self.client_id.clone(),
        };
        if self.outbound.try_send(ack).is_err() {
            self.signal.trigger(CloseReason::DeliveryFailed);
        }

        let reason = self.signal.closed().await;
        self.transition(SessionState::Closing);

        self.broker.release(&registration);
        self.transition(SessionState::Closed);
        info!(
            "client {} unsubscribed from topic: {} ({reason:?})",
            self.client_id, self.topic
        );

        let _ = self.outbound.try_send(ServerMessage::Unsubscribed {
            topic: self.topic.clone(),
            client_id: self.client_id.clone(),
        });
        Ok(reason)
    }
}
