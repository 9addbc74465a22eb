// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Subscription lifecycle: existence checks, creation and backlog purge.
//!
//! Every mutating call is preceded by an existence check, so restarting the
//! relay against an existing subscription never fails with "already exists".

use crate::bus::SubscriberClient;
use crate::errors::BusError;
use crate::names::{paths_match, SubscriptionRef, TopicRef};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SubscriptionManager<C> {
    client: Arc<C>,
    project: Option<String>,
}

impl<C: SubscriberClient> SubscriptionManager<C> {
    pub fn new(client: Arc<C>, project: Option<String>) -> Self {
        Self { client, project }
    }

    fn project(&self) -> Option<&str> {
        let project = self.project.as_deref().filter(|p| !p.is_empty());
        if project.is_none() {
            warn!("Project ID for current project not found");
        }
        project
    }

    /// Whether `topic_name` exists in the project. `false` when no project is
    /// configured.
    pub async fn topic_exists(&self, topic_name: &str) -> Result<bool, BusError> {
        let Some(project) = self.project() else {
            return Ok(false);
        };
        let topic_path = TopicRef::new(project, topic_name).path();

        debug!("Listing topics in project: projects/{project}");
        let found = self
            .client
            .list_topics(project)
            .await?
            .iter()
            .any(|name| paths_match(name, &topic_path));
        if found {
            info!("Found topic: {topic_path}");
        }
        Ok(found)
    }

    /// Whether `sub_name` exists in the project. `false` when no project is
    /// configured.
    pub async fn subscription_exists(&self, sub_name: &str) -> Result<bool, BusError> {
        let Some(project) = self.project() else {
            return Ok(false);
        };
        let sub_path = SubscriptionRef::new(project, sub_name).path();

        debug!("Listing subscriptions in project: projects/{project}");
        let found = self
            .client
            .list_subscriptions(project)
            .await?
            .iter()
            .any(|name| paths_match(name, &sub_path));
        if found {
            info!("Found subscription: {sub_path}");
        }
        Ok(found)
    }

    /// Creates `sub_name` on `topic_name` unless it already exists.
    ///
    /// Returns whether the subscription is now known to exist. Creation is
    /// attempted once; a failure is returned to the caller.
    pub async fn ensure_subscription(
        &self,
        topic_name: &str,
        sub_name: &str,
    ) -> Result<bool, BusError> {
        if self.subscription_exists(sub_name).await? {
            return Ok(true);
        }
        let Some(project) = self.project() else {
            return Ok(false);
        };

        let topic = TopicRef::new(project, topic_name);
        let subscription = SubscriptionRef::new(project, sub_name);
        info!("Creating subscription: {subscription} on topic: {topic}");
        self.client.create_subscription(&subscription, &topic).await?;
        Ok(true)
    }

    /// Discards the backlog of `sub_name` by seeking it to the current instant.
    ///
    /// Returns whether the seek was issued.
    pub async fn purge(&self, sub_name: &str) -> Result<bool, BusError> {
        let Some(project) = self.project() else {
            return Ok(false);
        };
        let subscription = SubscriptionRef::new(project, sub_name);
        let now = Utc::now();

        info!("Purging subscription: {subscription} up to {now}");
        self.client.seek(&subscription, now).await?;
        Ok(true)
    }
}
