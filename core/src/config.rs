//! Broker profile configuration.
//!
//! A [`BrokerProfile`] describes one broker connection the gateway uses:
//! addresses, consumer group, security protocol, the two timeout bounds, and
//! the list of command-group topics the profile "handles". Profiles are
//! type-safe serde structs with an environment-variable loader and explicit
//! validation so misconfiguration fails process startup, not the first
//! request.
//!
//! # Timeout Bounds
//!
//! `sync_timeout_ms` bounds a caller's wait for a correlated response;
//! `receive_wait_timeout_ms` bounds the transport's internal poll cycle per
//! consumption iteration. The two are independent.
//!
//! # Environment Surface
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CBQ_BROKERS` | `localhost:9092` |
//! | `CBQ_GROUP_ID` | `cbq-gateway` |
//! | `CBQ_TOPICS` | `cmd` (pipe-separated) |
//! | `CBQ_REPLY_TOPIC` | `{group_id}.replies` |
//! | `CBQ_SYNC_TIMEOUT_MS` | `5000` |
//! | `CBQ_RECEIVE_WAIT_TIMEOUT_MS` | `5000` |
//! | `CBQ_SECURITY_PROTOCOL` | `PLAINTEXT` |
//! | `CBQ_SASL_USERNAME` / `CBQ_SASL_PASSWORD` | empty |
//! | `CBQ_AWS_REGION` | empty |

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// The offending variable.
        var: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// Unknown security protocol name.
    #[error("Invalid security protocol: {0}")]
    InvalidSecurityProtocol(String),

    /// Profile validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Broker security protocol selection.
///
/// Covers the deployment surfaces the gateway targets, from local
/// plaintext brokers to SASL-authenticated clusters and AWS MSK. Each
/// variant maps onto librdkafka client configuration in
/// [`SecurityProtocol::librdkafka_pairs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    /// No transport security (local development).
    #[default]
    Plaintext,

    /// SASL authentication over an unencrypted connection.
    SaslPlaintext {
        /// SASL username.
        username: String,
        /// SASL password.
        password: String,
    },

    /// SASL authentication over TLS.
    SaslSsl {
        /// SASL username.
        username: String,
        /// SASL password.
        password: String,
    },

    /// AWS MSK IAM authentication.
    MskIam {
        /// AWS region of the MSK cluster.
        region: String,
    },
}

impl SecurityProtocol {
    /// Parse a protocol name plus its credentials from strings.
    ///
    /// Accepted names: `PLAINTEXT`, `SASL_PLAINTEXT`, `SASL_SSL`,
    /// `MSK_IAM_SASL`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSecurityProtocol`] for unknown names.
    pub fn parse(name: &str, username: &str, password: &str, region: &str) -> Result<Self, ConfigError> {
        match name.to_uppercase().as_str() {
            "PLAINTEXT" => Ok(Self::Plaintext),
            "SASL_PLAINTEXT" => Ok(Self::SaslPlaintext {
                username: username.to_string(),
                password: password.to_string(),
            }),
            "SASL_SSL" => Ok(Self::SaslSsl {
                username: username.to_string(),
                password: password.to_string(),
            }),
            "MSK_IAM_SASL" => Ok(Self::MskIam {
                region: region.to_string(),
            }),
            other => Err(ConfigError::InvalidSecurityProtocol(other.to_string())),
        }
    }

    /// The librdkafka configuration pairs this protocol expands to.
    ///
    /// Kept transport-agnostic as plain key/value pairs so the mapping is
    /// unit-testable without a broker client.
    #[must_use]
    pub fn librdkafka_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Plaintext => vec![("security.protocol", "plaintext".to_string())],
            Self::SaslPlaintext { username, password } => vec![
                ("security.protocol", "sasl_plaintext".to_string()),
                ("sasl.mechanisms", "PLAIN".to_string()),
                ("sasl.username", username.clone()),
                ("sasl.password", password.clone()),
            ],
            Self::SaslSsl { username, password } => vec![
                ("security.protocol", "sasl_ssl".to_string()),
                ("sasl.mechanisms", "PLAIN".to_string()),
                ("sasl.username", username.clone()),
                ("sasl.password", password.clone()),
            ],
            Self::MskIam { region } => vec![
                ("security.protocol", "sasl_ssl".to_string()),
                ("sasl.mechanisms", "OAUTHBEARER".to_string()),
                ("sasl.oauthbearer.config", format!("region={region}")),
            ],
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "cbq-gateway".to_string()
}

fn default_handles() -> Vec<String> {
    vec!["cmd".to_string()]
}

const fn default_timeout_ms() -> u64 {
    5000
}

/// One named broker connection profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerProfile {
    /// Comma-separated broker addresses.
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Consumer group id shared by this profile's subscriptions.
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Security protocol and credentials.
    #[serde(default)]
    pub security: SecurityProtocol,

    /// Bound on the transport's per-iteration poll/receive cycle.
    #[serde(default = "default_timeout_ms")]
    pub receive_wait_timeout_ms: u64,

    /// Bound on a caller's wait for a correlated response.
    #[serde(default = "default_timeout_ms")]
    pub sync_timeout_ms: u64,

    /// Command-group topics this profile consumes (e.g. `["cmd"]`). An
    /// operation named `cmd.public.products.create.v1` routes to the `cmd`
    /// topic through its leading group segment.
    #[serde(default = "default_handles")]
    pub handles: Vec<String>,

    /// Topic the correlation engine subscribes to for responses.
    #[serde(default)]
    pub reply_topic: String,
}

impl Default for BrokerProfile {
    fn default() -> Self {
        let group_id = default_group_id();
        let reply_topic = format!("{group_id}.replies");
        Self {
            brokers: default_brokers(),
            group_id,
            security: SecurityProtocol::default(),
            receive_wait_timeout_ms: default_timeout_ms(),
            sync_timeout_ms: default_timeout_ms(),
            handles: default_handles(),
            reply_topic,
        }
    }
}

impl BrokerProfile {
    /// Load a profile from `CBQ_*` environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a timeout does not parse as an integer, the
    /// security protocol name is unknown, or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut profile = Self::default();

        if let Ok(brokers) = std::env::var("CBQ_BROKERS") {
            profile.brokers = brokers;
        }
        if let Ok(group_id) = std::env::var("CBQ_GROUP_ID") {
            profile.reply_topic = format!("{group_id}.replies");
            profile.group_id = group_id;
        }
        if let Ok(topics) = std::env::var("CBQ_TOPICS") {
            profile.handles = topics
                .split('|')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(reply_topic) = std::env::var("CBQ_REPLY_TOPIC") {
            profile.reply_topic = reply_topic;
        }
        profile.sync_timeout_ms = env_ms("CBQ_SYNC_TIMEOUT_MS", profile.sync_timeout_ms)?;
        profile.receive_wait_timeout_ms =
            env_ms("CBQ_RECEIVE_WAIT_TIMEOUT_MS", profile.receive_wait_timeout_ms)?;

        if let Ok(protocol) = std::env::var("CBQ_SECURITY_PROTOCOL") {
            let username = std::env::var("CBQ_SASL_USERNAME").unwrap_or_default();
            let password = std::env::var("CBQ_SASL_PASSWORD").unwrap_or_default();
            let region = std::env::var("CBQ_AWS_REGION").unwrap_or_default();
            profile.security = SecurityProtocol::parse(&protocol, &username, &password, &region)?;
        }

        profile.validate()?;
        Ok(profile)
    }

    /// Validate the profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for empty broker addresses,
    /// zero timeouts, or an empty handles list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "brokers must not be empty".to_string(),
            ));
        }
        if self.sync_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sync_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.receive_wait_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "receive_wait_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.handles.is_empty() {
            return Err(ConfigError::ValidationError(
                "handles must list at least one command topic".to_string(),
            ));
        }
        if self.reply_topic.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "reply_topic must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The caller-facing sync wait bound as a [`Duration`].
    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// The transport poll bound as a [`Duration`].
    #[must_use]
    pub const fn receive_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_wait_timeout_ms)
    }
}

fn env_ms(var: &str, fallback: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            reason: format!("'{raw}' is not a millisecond count"),
        }),
        Err(_) => Ok(fallback),
    }
}
