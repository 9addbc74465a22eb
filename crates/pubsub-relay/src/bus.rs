// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message bus abstractions.
//!
//! [`SubscriberClient`] is the set of bus operations the relay depends on.
//! [`InboundMessage`] is one delivered message together with the
//! [`AckToken`] that must answer it.

use crate::errors::BusError;
use crate::names::{SubscriptionRef, TopicRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;

/// A message as returned by a pull, before it is bound to an ack sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
    pub publish_time: Option<String>,
}

#[async_trait]
pub trait SubscriberClient: Send + Sync + 'static {
    /// Fully-qualified paths of every topic in the project.
    async fn list_topics(&self, project: &str) -> Result<Vec<String>, BusError>;

    /// Fully-qualified paths of every subscription in the project.
    async fn list_subscriptions(&self, project: &str) -> Result<Vec<String>, BusError>;

    async fn create_subscription(
        &self,
        subscription: &SubscriptionRef,
        topic: &TopicRef,
    ) -> Result<(), BusError>;

    /// Marks every message published at or before `time` as acknowledged.
    async fn seek(&self, subscription: &SubscriptionRef, time: DateTime<Utc>)
        -> Result<(), BusError>;

    async fn pull(
        &self,
        subscription: &SubscriptionRef,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, BusError>;

    async fn acknowledge(
        &self,
        subscription: &SubscriptionRef,
        ack_ids: &[String],
    ) -> Result<(), BusError>;

    /// A deadline of zero hands the messages back for immediate redelivery.
    async fn modify_ack_deadline(
        &self,
        subscription: &SubscriptionRef,
        ack_ids: &[String],
        ack_deadline_seconds: u32,
    ) -> Result<(), BusError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReply {
    Ack,
    Nack,
}

/// Receives the answer for an ack id.
pub trait AckSink: Send + Sync + Debug {
    fn reply(&self, ack_id: &str, reply: AckReply);
}

/// Acknowledgment handle of a single message.
///
/// `ack` and `nack` consume the token, so a message is answered at most once.
/// A token dropped without an answer nacks the message.
#[derive(Debug)]
pub struct AckToken {
    ack_id: String,
    sink: Arc<dyn AckSink>,
    answered: bool,
}

impl AckToken {
    pub fn new(ack_id: impl Into<String>, sink: Arc<dyn AckSink>) -> Self {
        Self {
            ack_id: ack_id.into(),
            sink,
            answered: false,
        }
    }

    pub fn ack_id(&self) -> &str {
        &self.ack_id
    }

    pub fn ack(mut self) {
        self.answer(AckReply::Ack);
    }

    pub fn nack(mut self) {
        self.answer(AckReply::Nack);
    }

    fn answer(&mut self, reply: AckReply) {
        self.answered = true;
        self.sink.reply(&self.ack_id, reply);
    }
}

impl Drop for AckToken {
    fn drop(&mut self) {
        if !self.answered {
            self.answer(AckReply::Nack);
        }
    }
}

/// A delivered message. The payload is opaque bytes.
#[derive(Debug)]
pub struct InboundMessage {
    message_id: String,
    payload: Vec<u8>,
    publish_time: Option<String>,
    ack: AckToken,
}

impl InboundMessage {
    pub fn new(
        message_id: impl Into<String>,
        payload: Vec<u8>,
        publish_time: Option<String>,
        ack: AckToken,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
            publish_time,
            ack,
        }
    }

    /// Binds a pulled message to the sink that will receive its answer.
    pub fn from_received(message: ReceivedMessage, sink: Arc<dyn AckSink>) -> Self {
        let ack = AckToken::new(message.ack_id, sink);
        Self::new(message.message_id, message.data, message.publish_time, ack)
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn publish_time(&self) -> Option<&str> {
        self.publish_time.as_deref()
    }

    pub fn into_parts(self) -> (Vec<u8>, AckToken) {
        (self.payload, self.ack)
    }
}
