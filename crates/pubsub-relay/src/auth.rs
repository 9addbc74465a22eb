// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Access tokens for the Pub/Sub API.

use crate::errors::BusError;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{future::Future, pin::Pin};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const TOKEN_OPERATION: &str = "token request";

pub type TokenResolverFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<AccessToken, BusError>> + Send>> + Send + Sync>;

#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_at: expires_in.map(|ttl| Instant::now() + ttl),
        }
    }

    fn needs_refresh(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() + REFRESH_MARGIN >= expires_at)
    }
}

#[derive(Clone)]
pub enum TokenFactory {
    /// No credentials, e.g. against the Pub/Sub emulator.
    Anonymous,
    Static(String),
    Refreshing {
        resolver_fn: TokenResolverFn,
        cached: Arc<Mutex<Option<AccessToken>>>,
    },
}

impl TokenFactory {
    pub fn new_from_resolver(resolver_fn: TokenResolverFn) -> Self {
        Self::Refreshing {
            resolver_fn,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    pub fn new_from_static_token(token: &str) -> Self {
        Self::Static(token.to_string())
    }

    /// Tokens from the instance metadata server of the default service account.
    pub fn new_from_metadata_server(client: reqwest::Client, host: &str) -> Self {
        Self::new_from_resolver(metadata_server_resolver(client, host.to_string()))
    }

    /// Returns the bearer token to send, or `None` for anonymous access.
    pub async fn get_token(&self) -> Result<Option<String>, BusError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::Refreshing {
                resolver_fn,
                cached,
            } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if !token.needs_refresh() {
                        return Ok(Some(token.value.clone()));
                    }
                }
                debug!("Refreshing Pub/Sub access token");
                let token = (resolver_fn)().await?;
                let value = token.value.clone();
                *cached = Some(token);
                Ok(Some(value))
            }
        }
    }
}

impl Debug for TokenFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "TokenFactory::Anonymous"),
            Self::Static(_) => write!(f, "TokenFactory::Static"),
            Self::Refreshing { .. } => write!(f, "TokenFactory::Refreshing"),
        }
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: Option<u64>,
}

/// Timeouts, throttling and server errors stay retryable; any other refusal
/// means the credentials themselves are unusable.
fn status_error(status: StatusCode, body: String) -> BusError {
    let error = BusError::Status {
        operation: TOKEN_OPERATION,
        status,
        body,
    };
    if error.is_retryable() {
        error
    } else {
        BusError::Auth(error.to_string())
    }
}

fn metadata_server_resolver(client: reqwest::Client, host: String) -> TokenResolverFn {
    Arc::new(move || {
        let client = client.clone();
        let url = format!(
            "http://{host}/computeMetadata/v1/instance/service-accounts/default/token"
        );
        Box::pin(async move {
            let resp = client
                .get(&url)
                .header("Metadata-Flavor", "Google")
                .send()
                .await
                .map_err(|source| BusError::Transport {
                    operation: TOKEN_OPERATION,
                    source,
                })?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(status_error(status, body));
            }
            let token: MetadataToken = resp
                .json()
                .await
                .map_err(|e| BusError::Auth(e.to_string()))?;
            Ok(AccessToken::new(
                token.access_token,
                token.expires_in.map(Duration::from_secs),
            ))
        })
    })
}
