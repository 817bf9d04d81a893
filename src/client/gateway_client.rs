//! Gateway client
//!
//! `GatewayClient` speaks the JSON frame protocol over one WebSocket. Request
//! helpers wait for their reply; frames that arrive in the meantime (stream
//! messages, acks for other topics) are queued and handed out by
//! `next_event` in arrival order.

use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use tungstenite::protocol::Message as WsMessage;

use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::ClientError;

pub struct GatewayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<ServerMessage>,
}

impl GatewayClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _response) = connect_async(url).await?;
        debug!("connected to {url}");
        Ok(Self {
            ws,
            pending: VecDeque::new(),
        })
    }

    /// Publish one message. Returns the `send_result` or `error` reply.
    pub async fn send(&mut self, topic: &str, body: &str) -> Result<ServerMessage, ClientError> {
        self.write(&ClientMessage::Send {
            topic: topic.to_string(),
            body: body.to_string(),
        })
        .await?;
        self.wait_for(|msg| match msg {
            ServerMessage::SendResult { .. } => true,
            other => is_error_for(other, topic),
        })
        .await
    }

    /// Open a stream on `topic`. Returns the `subscribed` ack or an error.
    pub async fn subscribe(
        &mut self,
        topic: &str,
        client_id: Option<&str>,
    ) -> Result<ServerMessage, ClientError> {
        self.write(&ClientMessage::Subscribe {
            topic: topic.to_string(),
            client_id: client_id.map(str::to_string),
        })
        .await?;
        self.wait_for(|msg| match msg {
            ServerMessage::Subscribed { topic: t, .. } => t == topic,
            other => is_error_for(other, topic),
        })
        .await
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<ServerMessage, ClientError> {
        self.write(&ClientMessage::Unsubscribe {
            topic: topic.to_string(),
        })
        .await?;
        self.wait_for(|msg| match msg {
            ServerMessage::Unsubscribed { topic: t, .. } => t == topic,
            other => is_error_for(other, topic),
        })
        .await
    }

    pub async fn health_check(&mut self, service: &str) -> Result<ServerMessage, ClientError> {
        self.write(&ClientMessage::HealthCheck {
            service: service.to_string(),
        })
        .await?;
        self.wait_for(|msg| matches!(msg, ServerMessage::Health { .. } | ServerMessage::Error { .. }))
            .await
    }

    /// Next frame not consumed by a request helper.
    pub async fn next_event(&mut self) -> Result<ServerMessage, ClientError> {
        match self.pending.pop_front() {
            Some(msg) => Ok(msg),
            None => self.read().await,
        }
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }

    async fn write(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(WsMessage::text(json)).await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<ServerMessage, ClientError> {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(serde_json::from_str(text.as_str())?);
                }
                Some(Ok(WsMessage::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn wait_for<F>(&mut self, matches: F) -> Result<ServerMessage, ClientError>
    where
        F: Fn(&ServerMessage) -> bool,
    {
        let queued = self
            .pending
            .iter()
            .position(&matches)
            .and_then(|pos| self.pending.remove(pos));
        if let Some(msg) = queued {
            return Ok(msg);
        }
        loop {
            let msg = self.read().await?;
            if matches(&msg) {
                return Ok(msg);
            }
            self.pending.push_back(msg);
        }
    }
}

/// Error frames either carry the topic they concern or no topic at all.
pub(crate) fn is_error_for(msg: &ServerMessage, topic: &str) -> bool {
    match msg {
        ServerMessage::Error { topic: None, .. } => true,
        ServerMessage::Error { topic: Some(t), .. } => t == topic,
        _ => false,
    }
}
