use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::utils::{Error, Result};

pub const DEFAULT_ADDRESS: &str = "tcp://127.0.0.1:23100";
pub const DEFAULT_PORT: u16 = 23100;
pub const DEFAULT_TLS_PORT: u16 = 23443;
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Top-level configuration settings for the application.
///
/// Includes the client identity, how to reach the broker and the log level.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientSettings,
    pub net: NetConfig,
    pub log: LogSettings,
}

/// How a [`Client`](crate::client::Client) presents itself and handles messages.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    /// Device id. A random id is generated when empty.
    pub name: String,
    /// Auth token sent in the `proto/hi` handshake. No handshake when empty.
    pub auth: String,
    pub request_timeout_ms: u64,
    pub handle_concurrent: bool,
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Which peers a listener accepts.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    None,
    /// Only peers that presented a verified client certificate.
    Certificate,
}

/// Where and how to connect or listen.
///
/// `address` has the form `scheme://host:port`. Supported schemes are `tcp`
/// and `tcp+tls`; without a scheme `tcp` is assumed and without a port the
/// scheme's default port is used.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NetConfig {
    pub address: String,
    pub auth: AuthMode,
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub authority: Option<PathBuf>,
    /// Seconds between keepalive bytes on dialed connections, 0 for the default.
    pub keepalive_secs: u64,
}

impl NetConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn keepalive(&self) -> Duration {
        match self.keepalive_secs {
            0 => DEFAULT_KEEPALIVE,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        let (scheme, rest) = self
            .address
            .split_once("://")
            .unwrap_or(("tcp", self.address.as_str()));

        let tls = match scheme {
            "tcp" => false,
            "tcp+tls" => true,
            other => {
                return Err(Error::InvalidAddress(format!(
                    "unsupported scheme {other:?} in {:?}",
                    self.address
                )));
            }
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            // a bare IPv6 literal has colons but no port
            Some((host, port)) if !port.ends_with(']') => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::InvalidAddress(format!("invalid port in {:?}", self.address))
                })?;
                (host, port)
            }
            _ if tls => (rest, DEFAULT_TLS_PORT),
            _ => (rest, DEFAULT_PORT),
        };

        Ok(Endpoint {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            auth: AuthMode::None,
            certificate: None,
            key: None,
            authority: None,
            keepalive_secs: 0,
        }
    }
}

/// A parsed [`NetConfig::address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// May be empty, meaning "this machine".
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// Address to dial.
    pub fn addr(&self) -> String {
        let host = if self.host.is_empty() {
            "localhost"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }

    /// Address to bind. An empty host listens on every interface.
    pub fn listen_addr(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub net: Option<PartialNetConfig>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialClientSettings {
    pub name: Option<String>,
    pub auth: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub handle_concurrent: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialNetConfig {
    pub address: Option<String>,
    pub auth: Option<AuthMode>,
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub authority: Option<PathBuf>,
    pub keepalive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every value missing here from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let client = self.client.unwrap_or_default();
        let net = self.net.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            client: ClientSettings {
                name: client.name.unwrap_or(default.client.name),
                auth: client.auth.unwrap_or(default.client.auth),
                request_timeout_ms: client
                    .request_timeout_ms
                    .unwrap_or(default.client.request_timeout_ms),
                handle_concurrent: client
                    .handle_concurrent
                    .unwrap_or(default.client.handle_concurrent),
            },
            net: NetConfig {
                address: net.address.unwrap_or(default.net.address),
                auth: net.auth.unwrap_or(default.net.auth),
                certificate: net.certificate.or(default.net.certificate),
                key: net.key.or(default.net.key),
                authority: net.authority.or(default.net.authority),
                keepalive_secs: net.keepalive_secs.unwrap_or(default.net.keepalive_secs),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                name: String::new(),
                auth: String::new(),
                request_timeout_ms: 30_000,
                handle_concurrent: true,
            },
            net: NetConfig::default(),
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
