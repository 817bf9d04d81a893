use serde::{Deserialize, Serialize};

use crate::upstream::InboundMessage;

/// One message on its way to a subscriber.
///
/// Built once per upstream message and handed by reference to every
/// subscriber of the topic during a broadcast.
///
/// # Fields
///
/// - `topic` - The topic the consumer was subscribed to.
/// - `body` - The upstream payload, decoded as UTF-8 (lossily).
/// - `message_id` - The id the upstream broker assigned.
/// - `timestamp` - Milliseconds since the UNIX epoch at which the gateway received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub topic: String,
    pub body: String,
    pub message_id: String,
    pub timestamp: i64,
}

impl Delivery {
    pub fn new(topic: &str, body: &str, message_id: &str) -> Self {
        Self {
            topic: topic.to_string(),
            body: body.to_string(),
            message_id: message_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn from_inbound(topic: &str, msg: &InboundMessage) -> Self {
        Self::new(topic, &String::from_utf8_lossy(&msg.body), &msg.message_id)
    }
}
