// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::auth::{TokenFactory, DEFAULT_METADATA_HOST};
use crate::consumer::ConsumerConfig;
use crate::errors::ConfigError;
use crate::forwarder::{HecForwarderConfig, DEFAULT_SPLUNK_TIMEOUT};
use crate::names::validate_resource_name;
use crate::pubsub::{PubSubClientConfig, PUBSUB_ENDPOINT};
use relay_fips::reqwest_adapter::create_reqwest_client_builder;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TOPIC_NAME: &str = "splunk";
pub const DEFAULT_SUBSCRIPTION_NAME: &str = "splunk";
pub const DEFAULT_PURGE_SETTLE_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_LOG_LEVEL: &str = "info";

const PUBSUB_TIMEOUT: Duration = Duration::from_secs(60);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Relay settings, read once at startup and passed down explicitly.
#[derive(Clone)]
pub struct RelayConfig {
    /// Project that owns the topic and subscription
    pub project_id: Option<String>,
    pub topic_name: String,
    pub subscription_name: String,
    /// Discard the subscription backlog before consuming
    pub purge_subscription: bool,
    /// Wait after a purge before consuming starts
    pub purge_settle_delay: Duration,
    /// Splunk HTTP Event Collector URL
    pub splunk_url: Option<String>,
    /// Splunk HEC token
    pub splunk_token: Option<String>,
    pub splunk_timeout: Duration,
    pub splunk_verify_tls: bool,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Upper bound on messages being forwarded at once
    pub max_outstanding_messages: usize,
    pub max_messages_per_pull: u32,
    /// `host:port` of a Pub/Sub emulator
    pub pubsub_emulator_host: Option<String>,
    /// Pre-issued OAuth access token; the metadata server is used otherwise
    pub access_token: Option<String>,
    pub metadata_host: String,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            topic_name: DEFAULT_TOPIC_NAME.to_string(),
            subscription_name: DEFAULT_SUBSCRIPTION_NAME.to_string(),
            purge_subscription: false,
            purge_settle_delay: DEFAULT_PURGE_SETTLE_DELAY,
            splunk_url: None,
            splunk_token: None,
            splunk_timeout: DEFAULT_SPLUNK_TIMEOUT,
            splunk_verify_tls: false,
            https_proxy: None,
            max_outstanding_messages: 100,
            max_messages_per_pull: 100,
            pubsub_emulator_host: None,
            access_token: None,
            metadata_host: DEFAULT_METADATA_HOST.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("project_id", &self.project_id)
            .field("topic_name", &self.topic_name)
            .field("subscription_name", &self.subscription_name)
            .field("purge_subscription", &self.purge_subscription)
            .field("purge_settle_delay", &self.purge_settle_delay)
            .field("splunk_url", &self.splunk_url)
            .field("splunk_timeout", &self.splunk_timeout)
            .field("splunk_verify_tls", &self.splunk_verify_tls)
            .field("https_proxy", &self.https_proxy)
            .field("max_outstanding_messages", &self.max_outstanding_messages)
            .field("max_messages_per_pull", &self.max_messages_per_pull)
            .field("pubsub_emulator_host", &self.pubsub_emulator_host)
            .field("metadata_host", &self.metadata_host)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

/// Set and non-empty.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match var(name) {
        None => Ok(None),
        Some(val) => val.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::Invalid(format!("{name} must be a non-negative integer, got '{val}'"))
        }),
    }
}

/// FIPS builds cannot turn certificate verification off.
fn check_tls_policy(verify_tls: bool, fips_mode: bool) -> Result<(), ConfigError> {
    if fips_mode && !verify_tls {
        return Err(ConfigError::Invalid(
            "SPLUNK_VERIFY_TLS must be enabled in FIPS mode".to_string(),
        ));
    }
    Ok(())
}

impl RelayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            project_id: var("GOOGLE_CLOUD_PROJECT"),
            topic_name: var("TOPIC_NAME").unwrap_or(defaults.topic_name),
            subscription_name: var("SUB_NAME").unwrap_or(defaults.subscription_name),
            purge_subscription: var("PURGE_SUBSCRIPTION").is_some(),
            purge_settle_delay: parse_var::<u64>("PURGE_SETTLE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.purge_settle_delay),
            splunk_url: var("SPLUNK_URL"),
            splunk_token: var("SPLUNK_TOKEN"),
            splunk_timeout: parse_var::<u64>("SPLUNK_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.splunk_timeout),
            splunk_verify_tls: var("SPLUNK_VERIFY_TLS")
                .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1"))
                .unwrap_or(defaults.splunk_verify_tls),
            https_proxy: var("HTTPS_PROXY").or_else(|| var("https_proxy")),
            max_outstanding_messages: parse_var("RELAY_MAX_OUTSTANDING")?
                .unwrap_or(defaults.max_outstanding_messages),
            max_messages_per_pull: parse_var("RELAY_MAX_MESSAGES_PER_PULL")?
                .unwrap_or(defaults.max_messages_per_pull),
            pubsub_emulator_host: var("PUBSUB_EMULATOR_HOST"),
            access_token: var("GOOGLE_OAUTH_ACCESS_TOKEN"),
            metadata_host: var("GCE_METADATA_HOST").unwrap_or(defaults.metadata_host),
            log_level: var("RELAY_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_resource_name(&self.topic_name)
            .map_err(|e| ConfigError::Invalid(format!("TOPIC_NAME: {e}")))?;
        validate_resource_name(&self.subscription_name)
            .map_err(|e| ConfigError::Invalid(format!("SUB_NAME: {e}")))?;

        if self.max_outstanding_messages == 0 {
            return Err(ConfigError::Invalid(
                "RELAY_MAX_OUTSTANDING must be greater than 0".to_string(),
            ));
        }
        if self.max_messages_per_pull == 0 {
            return Err(ConfigError::Invalid(
                "RELAY_MAX_MESSAGES_PER_PULL must be greater than 0".to_string(),
            ));
        }
        if self.splunk_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "SPLUNK_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        check_tls_policy(self.splunk_verify_tls, cfg!(feature = "fips"))
    }

    /// Forwarder settings. Both the endpoint and the token are required.
    pub fn sink_settings(&self) -> Result<HecForwarderConfig, ConfigError> {
        let (Some(url), Some(token)) = (
            self.splunk_url.as_deref().filter(|s| !s.is_empty()),
            self.splunk_token.as_deref().filter(|s| !s.is_empty()),
        ) else {
            return Err(ConfigError::MissingSink);
        };
        Ok(HecForwarderConfig {
            endpoint: url.to_string(),
            token: token.to_string(),
            timeout: self.splunk_timeout,
            verify_certificates: self.splunk_verify_tls,
            https_proxy: self.https_proxy.clone(),
        })
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            max_outstanding_messages: self.max_outstanding_messages,
            ..ConsumerConfig::default()
        }
    }

    /// Pub/Sub client settings: the emulator when configured, otherwise the
    /// public endpoint with a static token or metadata server credentials.
    pub fn pubsub_client_config(&self) -> Result<PubSubClientConfig, ConfigError> {
        if let Some(host) = &self.pubsub_emulator_host {
            return Ok(PubSubClientConfig::emulator(host, PUBSUB_TIMEOUT));
        }

        let token_factory = match &self.access_token {
            Some(token) => TokenFactory::new_from_static_token(token),
            None => {
                let client = create_reqwest_client_builder(true)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?
                    .timeout(METADATA_TIMEOUT)
                    .no_proxy()
                    .build()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                TokenFactory::new_from_metadata_server(client, &self.metadata_host)
            }
        };

        Ok(PubSubClientConfig {
            endpoint: PUBSUB_ENDPOINT.to_string(),
            token_factory,
            timeout: PUBSUB_TIMEOUT,
            https_proxy: self.https_proxy.clone(),
        })
    }
}
