use std::time::Duration;

use serde::Deserialize;

use crate::transport::ReconnectPolicy;

/// Top-level configuration settings for the application.
///
/// Groups the relay server address, client connection policy and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub connection: ConnectionSettings,
    pub logging: LoggingSettings,
}

/// Address the relay server binds to and clients connect to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    /// `host:port`, suitable for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL a client uses to reach this server.
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Client connect timeout and reconnect backoff, in milliseconds.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl ConnectionSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.connect_timeout_ms),
            Duration::from_millis(self.retry_initial_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub connection: Option<PartialConnectionSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialConnectionSettings {
    pub connect_timeout_ms: Option<u64>,
    pub retry_initial_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            connection: ConnectionSettings {
                connect_timeout_ms: 5000,
                retry_initial_ms: 250,
                retry_max_ms: 5000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let server = self.server;
        let connection = self.connection;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(defaults.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(defaults.server.port),
            },
            connection: ConnectionSettings {
                connect_timeout_ms: connection
                    .as_ref()
                    .and_then(|c| c.connect_timeout_ms)
                    .unwrap_or(defaults.connection.connect_timeout_ms),
                retry_initial_ms: connection
                    .as_ref()
                    .and_then(|c| c.retry_initial_ms)
                    .unwrap_or(defaults.connection.retry_initial_ms),
                retry_max_ms: connection
                    .as_ref()
                    .and_then(|c| c.retry_max_ms)
                    .unwrap_or(defaults.connection.retry_max_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(defaults.logging.level),
            },
        }
    }
}
