// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Startup sequencing.
//!
//! Each step aborts the remaining ones on failure:
//!
//! 1. the Splunk endpoint and token are configured
//! 2. topic and subscription names are resolved
//! 3. the topic exists (topics are never created)
//! 4. the subscription exists, created if needed
//! 5. when purging is enabled, the backlog is discarded and the settle delay
//!    waited out
//! 6. messages are consumed until cancelled

use crate::bus::SubscriberClient;
use crate::config::RelayConfig;
use crate::consumer::ConsumptionLoop;
use crate::errors::{ConfigError, RelayError};
use crate::forwarder::HecForwarder;
use crate::names::SubscriptionRef;
use crate::processor::MessageProcessor;
use crate::source::PullSource;
use crate::subscription::SubscriptionManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Everything consumption needs once startup checks have passed.
#[derive(Debug)]
pub struct Prepared {
    pub subscription: SubscriptionRef,
    pub forwarder: HecForwarder,
    pub purged: bool,
}

pub struct Relay<C> {
    client: Arc<C>,
    config: RelayConfig,
}

impl<C: SubscriberClient> Relay<C> {
    pub fn new(client: Arc<C>, config: RelayConfig) -> Self {
        Self { client, config }
    }

    /// Runs steps 1 to 5.
    pub async fn prepare(&self, cancel: &CancellationToken) -> Result<Prepared, RelayError> {
        let sink = self.config.sink_settings().inspect_err(|e| error!("{e}"))?;
        let forwarder = HecForwarder::new(sink)?;

        let topic_name = self.config.topic_name.as_str();
        let sub_name = self.config.subscription_name.as_str();
        let manager =
            SubscriptionManager::new(Arc::clone(&self.client), self.config.project_id.clone());

        let topic_exists = manager
            .topic_exists(topic_name)
            .await
            .map_err(|source| RelayError::ExistenceCheck {
                resource: format!("topic {topic_name}"),
                source,
            })?;
        if !topic_exists {
            error!("Pub/Sub topic: {topic_name} does not exist");
            return Err(RelayError::TopicNotFound(topic_name.to_string()));
        }

        let created = manager
            .ensure_subscription(topic_name, sub_name)
            .await
            .map_err(|source| RelayError::SubscriptionCreate {
                name: sub_name.to_string(),
                source,
            })
            .inspect_err(|e| error!("{e}"))?;
        if !created {
            error!("Subscription: {sub_name} not created");
            return Err(RelayError::SubscriptionNotCreated(sub_name.to_string()));
        }

        let project = self
            .config
            .project_id
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::Invalid("GOOGLE_CLOUD_PROJECT is not set".to_string()))?;
        let subscription = SubscriptionRef::new(project, sub_name);

        let purged = self.config.purge_subscription;
        if purged {
            let issued = manager
                .purge(sub_name)
                .await
                .map_err(|source| RelayError::Purge {
                    name: sub_name.to_string(),
                    source,
                })
                .inspect_err(|e| error!("{e}"))?;
            if !issued {
                error!("Subscription: {sub_name} could not be purged");
                return Err(RelayError::PurgeNotIssued(sub_name.to_string()));
            }

            // Seeking is applied asynchronously by the bus; the delay only
            // bounds how long we give it.
            let delay = self.config.purge_settle_delay;
            info!("Waiting {delay:?} for the purge of {subscription} to settle");
            tokio::select! {
                _ = cancel.cancelled() => debug!("Cancelled while waiting for purge to settle"),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Ok(Prepared {
            subscription,
            forwarder,
            purged,
        })
    }

    /// Runs every step, consuming until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RelayError> {
        let prepared = self.prepare(&cancel).await?;

        info!("Listening for messages on {}", prepared.subscription);
        let source = PullSource::start(
            Arc::clone(&self.client),
            prepared.subscription,
            self.config.max_messages_per_pull,
        );
        let processor = MessageProcessor::new(Arc::new(prepared.forwarder));

        ConsumptionLoop::new(source, processor, self.config.consumer_config(), cancel)
            .run()
            .await
            .map_err(RelayError::Consume)
    }
}
