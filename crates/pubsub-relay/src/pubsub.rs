// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pub/Sub REST (v1) implementation of [`SubscriberClient`].
//!
//! Every call carries a bearer token from the configured [`TokenFactory`];
//! against the emulator the factory is anonymous and no header is sent.

use crate::auth::TokenFactory;
use crate::bus::{ReceivedMessage, SubscriberClient};
use crate::errors::{BusError, ForwarderError};
use crate::names::{SubscriptionRef, TopicRef};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use relay_fips::reqwest_adapter::create_reqwest_client_builder;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";

const LIST_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone)]
pub struct PubSubClientConfig {
    /// Base URL including the API version, e.g. `https://pubsub.googleapis.com/v1`.
    pub endpoint: String,
    pub token_factory: TokenFactory,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
}

impl PubSubClientConfig {
    /// Settings for a locally running emulator, given as `host:port`.
    pub fn emulator(host: &str, timeout: Duration) -> Self {
        Self {
            endpoint: format!("http://{host}/v1"),
            token_factory: TokenFactory::Anonymous,
            timeout,
            https_proxy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PubSubClient {
    client: reqwest::Client,
    endpoint: String,
    token_factory: TokenFactory,
}

impl PubSubClient {
    pub fn new(config: PubSubClientConfig) -> Result<Self, ForwarderError> {
        let mut builder = create_reqwest_client_builder(true)
            .map_err(|e| ForwarderError::Client(e.to_string()))?
            .timeout(config.timeout);
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

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token_factory: config.token_factory,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, BusError> {
        let request = match self.token_factory.get_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let resp = request
            .send()
            .await
            .map_err(|source| BusError::Transport { operation, source })?;
        let status = resp.status();
        if status.is_success() {
            trace!("{operation} returned {status}");
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BusError::Status {
            operation,
            status,
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, BusError> {
        let resp = self.send(operation, request).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|source| BusError::Transport { operation, source })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            // Empty responses stand for messages with every field unset.
            return serde_json::from_str("{}").map_err(|e| BusError::Decode {
                operation,
                reason: e.to_string(),
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| BusError::Decode {
            operation,
            reason: e.to_string(),
        })
    }

    async fn list_names<P: DeserializeOwned + Page>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<Vec<String>, BusError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let request = self.client.get(self.url(path)).query(&query);
            let page: P = self.send_json(operation, request).await?;
            let (page_names, next) = page.into_parts();
            names.extend(page_names);
            match next {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!("{operation} found {} entries in {path}", names.len());
        Ok(names)
    }
}

trait Page {
    fn into_parts(self) -> (Vec<String>, Option<String>);
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTopicsResponse {
    #[serde(default)]
    topics: Vec<Named>,
    next_page_token: Option<String>,
}

impl Page for ListTopicsResponse {
    fn into_parts(self) -> (Vec<String>, Option<String>) {
        (
            self.topics.into_iter().map(|t| t.name).collect(),
            self.next_page_token,
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSubscriptionsResponse {
    #[serde(default)]
    subscriptions: Vec<Named>,
    next_page_token: Option<String>,
}

impl Page for ListSubscriptionsResponse {
    fn into_parts(self) -> (Vec<String>, Option<String>) {
        (
            self.subscriptions.into_iter().map(|s| s.name).collect(),
            self.next_page_token,
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
    publish_time: Option<String>,
}

impl WireReceivedMessage {
    fn into_received(self) -> ReceivedMessage {
        let WireMessage {
            data,
            message_id,
            publish_time,
        } = self.message;
        let data = match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Hand the raw text on; the forwarder reports what it cannot parse.
                warn!("Message {message_id} carries data that is not base64: {e}");
                data.into_bytes()
            }
        };
        ReceivedMessage {
            ack_id: self.ack_id,
            message_id,
            data,
            publish_time,
        }
    }
}

#[async_trait]
impl SubscriberClient for PubSubClient {
    async fn list_topics(&self, project: &str) -> Result<Vec<String>, BusError> {
        self.list_names::<ListTopicsResponse>("list topics", &format!("projects/{project}/topics"))
            .await
    }

    async fn list_subscriptions(&self, project: &str) -> Result<Vec<String>, BusError> {
        self.list_names::<ListSubscriptionsResponse>(
            "list subscriptions",
            &format!("projects/{project}/subscriptions"),
        )
        .await
    }

    async fn create_subscription(
        &self,
        subscription: &SubscriptionRef,
        topic: &TopicRef,
    ) -> Result<(), BusError> {
        let request = self
            .client
            .put(self.url(&subscription.path()))
            .json(&json!({ "topic": topic.path() }));
        self.send("create subscription", request).await?;
        Ok(())
    }

    async fn seek(
        &self,
        subscription: &SubscriptionRef,
        time: DateTime<Utc>,
    ) -> Result<(), BusError> {
        let request = self
            .client
            .post(self.url(&format!("{}:seek", subscription.path())))
            .json(&json!({ "time": time.to_rfc3339_opts(SecondsFormat::Nanos, true) }));
        self.send("seek", request).await?;
        Ok(())
    }

    async fn pull(
        &self,
        subscription: &SubscriptionRef,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        let request = self
            .client
            .post(self.url(&format!("{}:pull", subscription.path())))
            .json(&json!({ "maxMessages": max_messages }));
        let resp: PullResponse = self.send_json("pull", request).await?;
        Ok(resp
            .received_messages
            .into_iter()
            .map(WireReceivedMessage::into_received)
            .collect())
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionRef,
        ack_ids: &[String],
    ) -> Result<(), BusError> {
        let request = self
            .client
            .post(self.url(&format!("{}:acknowledge", subscription.path())))
            .json(&json!({ "ackIds": ack_ids }));
        self.send("acknowledge", request).await?;
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionRef,
        ack_ids: &[String],
        ack_deadline_seconds: u32,
    ) -> Result<(), BusError> {
        let request = self
            .client
            .post(self.url(&format!("{}:modifyAckDeadline", subscription.path())))
            .json(&json!({
                "ackIds": ack_ids,
                "ackDeadlineSeconds": ack_deadline_seconds,
            }));
        self.send("modify ack deadline", request).await?;
        Ok(())
    }
}
