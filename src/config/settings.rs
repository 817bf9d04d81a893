use serde::Deserialize;

/// Top-level configuration settings for the gateway.
///
/// Includes the listener, the upstream broker client, the HTTP side channel
/// and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub callback: CallbackSettings,
    pub log: LogSettings,
}

/// Configuration settings for the front-end listener.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the upstream message broker.
///
/// `retry` is handed to the upstream client; the gateway core never retries
/// a publish on its own.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UpstreamSettings {
    pub name_server: String,
    pub group: String,
    pub topic: String,
    pub retry: u32,
}

/// Where received messages are additionally POSTed. `url: None` disables it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CallbackSettings {
    pub url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub upstream: Option<PartialUpstreamSettings>,
    pub callback: Option<PartialCallbackSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialUpstreamSettings {
    pub name_server: Option<String>,
    pub group: Option<String>,
    pub topic: Option<String>,
    pub retry: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialCallbackSettings {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            upstream: UpstreamSettings {
                name_server: "127.0.0.1:9876".to_string(),
                group: "gateway-group".to_string(),
                topic: "gateway-topic".to_string(),
                retry: 2,
            },
            callback: CallbackSettings {
                url: None,
                timeout_ms: 5000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Merge onto `Settings::default()`, field by field.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let server = self.server.unwrap_or_default();
        let upstream = self.upstream.unwrap_or_default();
        let callback = self.callback.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            upstream: UpstreamSettings {
                name_server: upstream
                    .name_server
                    .unwrap_or(default.upstream.name_server),
                group: upstream.group.unwrap_or(default.upstream.group),
                topic: upstream.topic.unwrap_or(default.upstream.topic),
                retry: upstream.retry.unwrap_or(default.upstream.retry),
            },
            callback: CallbackSettings {
                // an empty url in a file or env var means "disabled"
                url: callback
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .or(default.callback.url),
                timeout_ms: callback.timeout_ms.unwrap_or(default.callback.timeout_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
