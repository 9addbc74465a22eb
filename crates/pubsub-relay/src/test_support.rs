// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory bus used by unit tests.

use crate::bus::{ReceivedMessage, SubscriberClient};
use crate::errors::BusError;
use crate::names::{SubscriptionRef, TopicRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    ListTopics(String),
    ListSubscriptions(String),
    CreateSubscription { subscription: String, topic: String },
    Seek { subscription: String, time: DateTime<Utc> },
    Pull,
    Acknowledge(Vec<String>),
    ModifyAckDeadline(Vec<String>, u32),
}

#[derive(Debug, Default)]
pub(crate) struct FakeSubscriberClient {
    pub(crate) topics: Mutex<Vec<String>>,
    pub(crate) subscriptions: Mutex<Vec<String>>,
    pub(crate) pending: Mutex<VecDeque<ReceivedMessage>>,
    pub(crate) pull_failures: Mutex<VecDeque<StatusCode>>,
    pub(crate) calls: Mutex<Vec<Call>>,
    pub(crate) fail_create: bool,
    pub(crate) fail_seek: bool,
    pub(crate) fail_list: bool,
}

fn status_error(operation: &'static str, status: StatusCode) -> BusError {
    BusError::Status {
        operation,
        status,
        body: format!("{operation} failed"),
    }
}

impl FakeSubscriberClient {
    pub(crate) fn with_topics(self, topics: &[&str]) -> Self {
        *self.topics.lock().expect("lock poisoned") =
            topics.iter().map(ToString::to_string).collect();
        self
    }

    pub(crate) fn with_subscriptions(self, subscriptions: &[&str]) -> Self {
        *self.subscriptions.lock().expect("lock poisoned") =
            subscriptions.iter().map(ToString::to_string).collect();
        self
    }

    pub(crate) fn push_message(&self, ack_id: &str, data: &[u8]) {
        self.pending
            .lock()
            .expect("lock poisoned")
            .push_back(ReceivedMessage {
                ack_id: ack_id.to_string(),
                message_id: format!("id-{ack_id}"),
                data: data.to_vec(),
                publish_time: None,
            });
    }

    /// The next pulls fail with these statuses, in order.
    pub(crate) fn fail_pulls(&self, statuses: &[StatusCode]) {
        self.pull_failures
            .lock()
            .expect("lock poisoned")
            .extend(statuses.iter().copied());
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn acked(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Acknowledge(ids) => Some(ids),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub(crate) fn nacked(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ModifyAckDeadline(ids, 0) => Some(ids),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("lock poisoned").push(call);
    }
}

#[async_trait]
impl SubscriberClient for FakeSubscriberClient {
    async fn list_topics(&self, project: &str) -> Result<Vec<String>, BusError> {
        self.record(Call::ListTopics(project.to_string()));
        if self.fail_list {
            return Err(status_error("list topics", StatusCode::FORBIDDEN));
        }
        Ok(self.topics.lock().expect("lock poisoned").clone())
    }

    async fn list_subscriptions(&self, project: &str) -> Result<Vec<String>, BusError> {
        self.record(Call::ListSubscriptions(project.to_string()));
        if self.fail_list {
            return Err(status_error("list subscriptions", StatusCode::FORBIDDEN));
        }
        Ok(self.subscriptions.lock().expect("lock poisoned").clone())
    }

    async fn create_subscription(
        &self,
        subscription: &SubscriptionRef,
        topic: &TopicRef,
    ) -> Result<(), BusError> {
        self.record(Call::CreateSubscription {
            subscription: subscription.path(),
            topic: topic.path(),
        });
        if self.fail_create {
            return Err(status_error(
                "create subscription",
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
        self.subscriptions
            .lock()
            .expect("lock poisoned")
            .push(subscription.path());
        Ok(())
    }

    async fn seek(
        &self,
        subscription: &SubscriptionRef,
        time: DateTime<Utc>,
    ) -> Result<(), BusError> {
        self.record(Call::Seek {
            subscription: subscription.path(),
            time,
        });
        if self.fail_seek {
            return Err(status_error("seek", StatusCode::NOT_FOUND));
        }
        self.pending.lock().expect("lock poisoned").clear();
        Ok(())
    }

    async fn pull(
        &self,
        _subscription: &SubscriptionRef,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        self.record(Call::Pull);
        if let Some(status) = self.pull_failures.lock().expect("lock poisoned").pop_front() {
            return Err(status_error("pull", status));
        }
        let mut pending = self.pending.lock().expect("lock poisoned");
        let n = pending.len().min(max_messages as usize);
        Ok(pending.drain(..n).collect())
    }

    async fn acknowledge(
        &self,
        _subscription: &SubscriptionRef,
        ack_ids: &[String],
    ) -> Result<(), BusError> {
        self.record(Call::Acknowledge(ack_ids.to_vec()));
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        _subscription: &SubscriptionRef,
        ack_ids: &[String],
        ack_deadline_seconds: u32,
    ) -> Result<(), BusError> {
        self.record(Call::ModifyAckDeadline(
            ack_ids.to_vec(),
            ack_deadline_seconds,
        ));
        Ok(())
    }
}
