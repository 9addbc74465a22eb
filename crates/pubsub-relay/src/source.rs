// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where the consumption loop gets its messages from.

use crate::ack_service::{AckHandle, AckService};
use crate::bus::{AckSink, InboundMessage, SubscriberClient};
use crate::errors::BusError;
use crate::names::SubscriptionRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[async_trait]
pub trait MessageSource: Send {
    /// Next batch of messages. An empty batch means nothing is available
    /// right now; `None` means the stream has ended.
    async fn receive(&mut self) -> Result<Option<Vec<InboundMessage>>, BusError>;

    /// Called once after every delivered message has been answered.
    async fn close(&mut self);
}

/// Pulls from a subscription and batches acknowledgments through an
/// [`AckService`].
pub struct PullSource<C> {
    client: Arc<C>,
    subscription: SubscriptionRef,
    max_messages: u32,
    acks: AckHandle,
    ack_sink: Arc<dyn AckSink>,
    ack_task: Option<JoinHandle<()>>,
}

impl<C: SubscriberClient> PullSource<C> {
    /// Spawns the ack service on the current runtime.
    pub fn start(client: Arc<C>, subscription: SubscriptionRef, max_messages: u32) -> Self {
        let (service, acks) = AckService::new(Arc::clone(&client), subscription.clone());
        let ack_task = tokio::spawn(service.run());
        Self {
            client,
            subscription,
            max_messages,
            ack_sink: Arc::new(acks.clone()),
            acks,
            ack_task: Some(ack_task),
        }
    }
}

#[async_trait]
impl<C: SubscriberClient> MessageSource for PullSource<C> {
    async fn receive(&mut self) -> Result<Option<Vec<InboundMessage>>, BusError> {
        let received = self
            .client
            .pull(&self.subscription, self.max_messages)
            .await?;
        if !received.is_empty() {
            debug!(
                "Pulled {} messages from {}",
                received.len(),
                self.subscription
            );
        }
        Ok(Some(
            received
                .into_iter()
                .map(|m| InboundMessage::from_received(m, Arc::clone(&self.ack_sink)))
                .collect(),
        ))
    }

    async fn close(&mut self) {
        if let Err(e) = self.acks.shutdown().await {
            error!("Failed to flush acknowledgments: {e}");
        }
        if let Some(task) = self.ack_task.take() {
            if let Err(e) = task.await {
                error!("Ack service task failed: {e}");
            }
        }
    }
}

/// In-memory source fed through a channel. The stream ends when every sender
/// is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundMessage>,
    max_batch: usize,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<InboundMessage>, max_batch: usize) -> Self {
        Self {
            rx,
            max_batch: max_batch.max(1),
        }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<InboundMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx, capacity))
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn receive(&mut self) -> Result<Option<Vec<InboundMessage>>, BusError> {
        let Some(first) = self.rx.recv().await else {
            return Ok(None);
        };
        let mut batch = vec![first];
        while batch.len() < self.max_batch {
            match self.rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }
        Ok(Some(batch))
    }

    async fn close(&mut self) {
        self.rx.close();
        // Anything still queued is dropped, which nacks it.
        while self.rx.try_recv().is_ok() {}
    }
}
