use serde::{Deserialize, Serialize};

use crate::broker::StatsSnapshot;

/// Frames sent by a client. Every frame is a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Send {
        topic: String,
        body: String,
    },
    Subscribe {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    Unsubscribe {
        topic: String,
    },
    HealthCheck {
        #[serde(default)]
        service: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Serving,
    NotServing,
}

/// Frames sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SendResult {
        result: String,
    },
    Subscribed {
        topic: String,
        client_id: String,
    },
    Unsubscribed {
        topic: String,
        client_id: String,
    },
    Message {
        topic: String,
        body: String,
        message_id: String,
        timestamp: i64,
    },
    Health {
        status: HealthStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<StatsSnapshot>,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
}

impl ServerMessage {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: ErrorCode::InvalidArgument,
            message: message.into(),
            topic: None,
        }
    }

    pub fn internal(message: impl Into<String>, topic: Option<&str>) -> Self {
        ServerMessage::Error {
            code: ErrorCode::Internal,
            message: message.into(),
            topic: topic.map(str::to_string),
        }
    }
}
