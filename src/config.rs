use std::env;
use std::time::Duration;

use rand::Rng;
use reqwest::Url;
use thiserror::Error;

pub const API_URL_VAR: &str = "API_URL";
pub const SOCKET_URL_VAR: &str = "SOCKET_URL";
pub const API_TOKEN_VAR: &str = "API_TOKEN";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} is not a valid URL: {value}")]
    InvalidUrl { var: &'static str, value: String },
}

/// Reconnection behavior of the realtime channel.
///
/// `max_attempts` counts reconnection attempts after the first failed
/// connect, so a session gives up after `max_attempts + 1` failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub randomization: f64,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            randomization: 0.5,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.initial_delay.as_secs_f64() * f64::from(1u32 << exponent);

        let jittered = if self.randomization > 0.0 {
            let mut rng = rand::thread_rng();
            let deviation = rng.gen::<f64>() * self.randomization * base;
            if rng.gen_bool(0.5) {
                base - deviation
            } else {
                base + deviation
            }
        } else {
            base
        };

        Duration::from_secs_f64(jittered.max(0.0)).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    api_url: Option<String>,
    socket_url: Option<String>,
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(api_url: Option<String>, socket_url: Option<String>) -> Self {
        ClientConfig {
            api_url,
            socket_url,
            ..Default::default()
        }
    }

    pub fn from_env() -> Self {
        let read = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());

        ClientConfig {
            api_url: read(API_URL_VAR),
            socket_url: read(SOCKET_URL_VAR),
            token: read(API_TOKEN_VAR),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn api_url(&self) -> Result<Url, ConfigError> {
        parse_url(API_URL_VAR, self.api_url.as_deref())
    }

    /// Gateway URL for `user_id`, with the scheme mapped to `ws`/`wss`.
    pub fn socket_url(&self, user_id: &str) -> Result<Url, ConfigError> {
        let mut url = parse_url(SOCKET_URL_VAR, self.socket_url.as_deref())?;

        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            "ws" | "wss" => None,
            _ => {
                return Err(ConfigError::InvalidUrl {
                    var: SOCKET_URL_VAR,
                    value: url.to_string(),
                })
            }
        };
        if let Some(scheme) = scheme {
            // http -> ws keeps the URL special, so this cannot fail
            let _ = url.set_scheme(scheme);
        }

        url.query_pairs_mut().append_pair("userId", user_id);
        Ok(url)
    }
}

fn parse_url(var: &'static str, value: Option<&str>) -> Result<Url, ConfigError> {
    let value = value.ok_or(ConfigError::Missing(var))?;
    Url::parse(value.trim()).map_err(|_| ConfigError::InvalidUrl {
        var,
        value: value.to_string(),
    })
}
