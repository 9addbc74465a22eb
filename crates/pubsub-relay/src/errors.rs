// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the relay.
//!
//! Anything raised during startup is fatal and ends the process with exit
//! code 1. Errors raised while handling a single message never leave the
//! message processor.

use reqwest::StatusCode;

/// Configuration could not be loaded or is incomplete.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Splunk endpoint and token must both be configured (SPLUNK_URL, SPLUNK_TOKEN)")]
    MissingSink,
}

/// A call against the message bus failed.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("Failed to decode {operation} response: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    #[error("Failed to obtain access token: {0}")]
    Auth(String),
}

impl BusError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => matches!(
                *status,
                StatusCode::REQUEST_TIMEOUT
                    | StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            Self::Decode { .. } | Self::Auth(_) => false,
        }
    }
}

/// The outbound HTTP client could not be built.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Invalid proxy '{proxy}': {reason}")]
    Proxy { proxy: String, reason: String },
}

/// Startup failed; the relay does not run half-initialized.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Pub/Sub topic: {0} does not exist")]
    TopicNotFound(String),

    #[error("Failed to check existence of {resource}: {source}")]
    ExistenceCheck {
        resource: String,
        #[source]
        source: BusError,
    },

    #[error("Subscription: {0} not created")]
    SubscriptionNotCreated(String),

    #[error("Failed to create subscription {name}: {source}")]
    SubscriptionCreate {
        name: String,
        #[source]
        source: BusError,
    },

    #[error("Subscription: {name} could not be purged: {source}")]
    Purge {
        name: String,
        #[source]
        source: BusError,
    },

    #[error("Subscription: {0} could not be purged")]
    PurgeNotIssued(String),

    #[error(transparent)]
    Forwarder(#[from] ForwarderError),

    #[error("Consumption stopped: {0}")]
    Consume(#[source] BusError),

    #[error("Consumption task failed: {0}")]
    ConsumerTask(String),
}
