//! HTTP side channel
//!
//! Every message a topic consumer receives may also be POSTed, raw, to a
//! configured callback URL. This is best effort: the request runs on its own
//! task, failures are logged and otherwise ignored, and nothing about it feeds
//! back into broker state.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::config::CallbackSettings;
use crate::utils::error::ForwardError;

#[derive(Clone)]
pub struct CallbackForwarder {
    client: reqwest::Client,
    url: Arc<str>,
}

impl CallbackForwarder {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: Arc::from(url),
        })
    }

    /// `None` when no callback URL is configured.
    pub fn from_settings(settings: &CallbackSettings) -> Result<Option<Self>, ForwardError> {
        settings
            .url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_millis(settings.timeout_ms)))
            .transpose()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fire-and-forget POST of `body`. Must be called from within a tokio
    /// runtime; outside one the message is skipped.
    pub fn forward(&self, body: Bytes) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime to forward callback to {}", self.url);
            return;
        };

        let this = self.clone();
        handle.spawn(async move {
            if let Err(e) = this.post(body).await {
                warn!("callback to {} failed: {e}", this.url);
            }
        });
    }

    pub async fn post(&self, body: Bytes) -> Result<(), ForwardError> {
        let resp = self
            .client
            .post(self.url.as_ref())
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!("callback to {} answered {status}", self.url);
            Ok(())
        } else {
            Err(ForwardError::Status(status.as_u16()))
        }
    }
}
