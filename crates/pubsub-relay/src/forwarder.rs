// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwarding of message payloads to a Splunk HTTP Event Collector (HEC).
//!
//! A payload is decoded as UTF-8 (invalid sequences are dropped), parsed as
//! JSON and posted as `{"event": <payload>}`. Every failure is reported as a
//! [`ForwardOutcome::Failed`] value; nothing is raised to the caller.

use crate::errors::ForwarderError;
use async_trait::async_trait;
use relay_fips::reqwest_adapter::create_reqwest_client_builder;
use reqwest::redirect;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_SPLUNK_TIMEOUT: Duration = Duration::from_secs(3);

const MAX_REDIRECTS: usize = 10;

/// Why a forwarding attempt did not deliver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("payload is not valid JSON: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("status code: {status}, response: {body}")]
    Status { status: u16, body: String },

    #[error("handler panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    Delivered,
    Failed(FailureReason),
}

impl ForwardOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Destination of decoded message payloads.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn forward(&self, payload: &[u8]) -> ForwardOutcome;
}

/// Decodes `payload` as UTF-8, dropping invalid byte sequences.
pub fn decode_lossy(payload: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(payload) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let mut text = String::with_capacity(payload.len());
            let mut rest = payload;
            loop {
                match std::str::from_utf8(rest) {
                    Ok(valid) => {
                        text.push_str(valid);
                        break;
                    }
                    Err(e) => {
                        let (valid, after) = rest.split_at(e.valid_up_to());
                        text.push_str(&String::from_utf8_lossy(valid));
                        match e.error_len() {
                            Some(len) => rest = &after[len..],
                            None => break,
                        }
                    }
                }
            }
            Cow::Owned(text)
        }
    }
}

/// Parses a payload into the event envelope the HEC expects.
pub fn build_event(payload: &[u8]) -> Result<Value, FailureReason> {
    let event: Value = serde_json::from_str(&decode_lossy(payload))
        .map_err(|e| FailureReason::Decode(e.to_string()))?;
    Ok(json!({ "event": event }))
}

#[derive(Clone)]
pub struct HecForwarderConfig {
    pub endpoint: String,
    pub token: String,
    pub timeout: Duration,
    /// Off by default: collectors are often reached through infrastructure
    /// with self-signed or internally issued certificates.
    pub verify_certificates: bool,
    pub https_proxy: Option<String>,
}

impl HecForwarderConfig {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            timeout: DEFAULT_SPLUNK_TIMEOUT,
            verify_certificates: false,
            https_proxy: None,
        }
    }
}

impl fmt::Debug for HecForwarderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HecForwarderConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("verify_certificates", &self.verify_certificates)
            .field("https_proxy", &self.https_proxy)
            .finish()
    }
}

#[derive(Clone)]
pub struct HecForwarder {
    client: reqwest::Client,
    endpoint: String,
    authorization: String,
}

impl HecForwarder {
    pub fn new(config: HecForwarderConfig) -> Result<Self, ForwarderError> {
        let mut builder = create_reqwest_client_builder(config.verify_certificates)
            .map_err(|e| ForwarderError::Client(e.to_string()))?
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS));
        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy).map_err(|e| ForwarderError::Proxy {
                proxy: proxy.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ForwarderError::Client(e.to_string()))?;

        if !config.verify_certificates {
            debug!("Certificate verification is disabled for {}", config.endpoint);
        }

        Ok(Self {
            client,
            endpoint: config.endpoint,
            authorization: format!("Splunk {}", config.token),
        })
    }

    async fn post(&self, body: &Value) -> ForwardOutcome {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(body)
            .send()
            .await;

        match resp {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return ForwardOutcome::Delivered;
                }
                let body = resp.text().await.unwrap_or_default();
                error!("Error sending message. Status code: {status}, Response: {body}");
                ForwardOutcome::Failed(FailureReason::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => {
                error!("Exception sending message to Splunk. Error: {e}");
                ForwardOutcome::Failed(FailureReason::Transport(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for HecForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HecForwarder")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSink for HecForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardOutcome {
        let body = match build_event(payload) {
            Ok(body) => body,
            Err(reason) => {
                error!("Dropping message: {reason}");
                return ForwardOutcome::Failed(reason);
            }
        };
        self.post(&body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn forwarder(url: String) -> HecForwarder {
        HecForwarder::new(HecForwarderConfig::new(url, "mock-token")).expect("forwarder")
    }

    #[test]
    fn decode_lossy_drops_invalid_sequences() {
        assert_eq!(decode_lossy(b"plain"), "plain");
        assert_eq!(decode_lossy(b"{\"a\":1}\xff"), "{\"a\":1}");
        assert_eq!(decode_lossy(b"\xfe{\"a\":\"b\xc3\x28\"}"), "{\"a\":\"b(\"}");
        assert_eq!(decode_lossy(b"caf\xc3\xa9"), "café");
        // truncated multi-byte sequence at the end
        assert_eq!(decode_lossy(b"ok\xe2\x82"), "ok");
    }

    #[test]
    fn build_event_wraps_payload() {
        assert_eq!(
            build_event(br#"{"msg":"hello"}"#).expect("event"),
            json!({"event": {"msg": "hello"}})
        );
        assert_eq!(build_event(b"42").expect("event"), json!({"event": 42}));
        assert!(matches!(
            build_event(b"not-json"),
            Err(FailureReason::Decode(_))
        ));
        assert!(matches!(build_event(b""), Err(FailureReason::Decode(_))));
    }

    #[tokio::test]
    async fn delivers_on_success_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/services/collector/event")
            .match_header("authorization", "Splunk mock-token")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"event": {"msg": "hello"}})))
            .with_status(200)
            .with_body(r#"{"text":"Success","code":0}"#)
            .expect(1)
            .create_async()
            .await;

        let forwarder = forwarder(format!("{}/services/collector/event", server.url()));
        let outcome = forwarder.forward(br#"{"msg":"hello"}"#).await;

        assert_eq!(outcome, ForwardOutcome::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn any_2xx_status_is_delivered() {
        for status in [200, 201, 202, 204, 299] {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/")
                .with_status(status)
                .create_async()
                .await;
            let outcome = forwarder(server.url()).forward(b"{}").await;
            assert!(outcome.is_delivered(), "status {status}");
        }
    }

    #[tokio::test]
    async fn invalid_json_never_reaches_the_sink() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let outcome = forwarder(server.url()).forward(b"not-json").await;

        assert!(matches!(
            outcome,
            ForwardOutcome::Failed(FailureReason::Decode(_))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_carries_status_and_body() {
        for (status, body) in [(400, "Invalid data format"), (403, "Invalid token"), (503, "busy")] {
            let mut server = Server::new_async().await;
            let _mock = server
                .mock("POST", "/")
                .with_status(status)
                .with_body(body)
                .create_async()
                .await;

            let outcome = forwarder(server.url()).forward(b"{\"a\":1}").await;

            assert_eq!(
                outcome,
                ForwardOutcome::Failed(FailureReason::Status {
                    status: status as u16,
                    body: body.to_string(),
                })
            );
        }
    }

    #[tokio::test]
    async fn redirects_are_followed() {
        let mut server = Server::new_async().await;
        let redirect = server
            .mock("POST", "/old")
            .with_status(307)
            .with_header("location", &format!("{}/new", server.url()))
            .create_async()
            .await;
        let target = server
            .mock("POST", "/new")
            .match_header("authorization", "Splunk mock-token")
            .with_status(200)
            .create_async()
            .await;

        let outcome = forwarder(format!("{}/old", server.url()))
            .forward(b"{\"a\":1}")
            .await;

        assert_eq!(outcome, ForwardOutcome::Delivered);
        redirect.assert_async().await;
        target.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_sink_is_transport_failure() {
        // Nothing listens on the discard port of localhost.
        let outcome = forwarder("http://127.0.0.1:9/".to_string())
            .forward(b"{}")
            .await;
        assert!(matches!(
            outcome,
            ForwardOutcome::Failed(FailureReason::Transport(_))
        ));
    }

    #[test]
    fn debug_output_hides_token() {
        let config = HecForwarderConfig::new("http://localhost", "secret-token");
        assert!(!format!("{config:?}").contains("secret-token"));
    }
}
