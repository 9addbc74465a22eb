// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches acknowledgments and sends them to the bus.
//!
//! Handlers answer messages from many tasks at once; they only push ack ids
//! into a channel. The service owns the pending ids and issues one
//! `acknowledge` (or `modifyAckDeadline` for nacks) call per batch.

use crate::bus::{AckReply, AckSink, SubscriberClient};
use crate::names::SubscriptionRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Largest number of ack ids sent in a single request.
pub const MAX_ACK_BATCH: usize = 2500;
pub const ACK_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum AckCommand {
    Reply(String, AckReply),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct AckHandle {
    tx: mpsc::UnboundedSender<AckCommand>,
}

impl AckHandle {
    /// Sends every pending answer and waits for the calls to complete.
    pub async fn flush(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AckCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;
        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    /// Flushes and stops the service.
    pub async fn shutdown(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AckCommand::Shutdown(response_tx))
            .map_err(|e| format!("Failed to send shutdown command: {}", e))?;
        response_rx
            .await
            .map_err(|e| format!("Failed to receive shutdown response: {}", e))
    }
}

impl AckSink for AckHandle {
    fn reply(&self, ack_id: &str, reply: AckReply) {
        if self
            .tx
            .send(AckCommand::Reply(ack_id.to_string(), reply))
            .is_err()
        {
            // The bus redelivers the message once its ack deadline passes.
            warn!("Ack service stopped, dropping {reply:?} for {ack_id}");
        }
    }
}

pub struct AckService<C> {
    client: Arc<C>,
    subscription: SubscriptionRef,
    rx: mpsc::UnboundedReceiver<AckCommand>,
    acks: Vec<String>,
    nacks: Vec<String>,
    flush_interval: Duration,
}

impl<C: SubscriberClient> AckService<C> {
    pub fn new(client: Arc<C>, subscription: SubscriptionRef) -> (Self, AckHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            client,
            subscription,
            rx,
            acks: Vec::new(),
            nacks: Vec::new(),
            flush_interval: ACK_FLUSH_INTERVAL,
        };
        (service, AckHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Ack service started for {}", self.subscription);

        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(AckCommand::Reply(ack_id, reply)) => {
                        match reply {
                            AckReply::Ack => self.acks.push(ack_id),
                            AckReply::Nack => self.nacks.push(ack_id),
                        }
                        if self.acks.len() >= MAX_ACK_BATCH || self.nacks.len() >= MAX_ACK_BATCH {
                            self.send_pending().await;
                        }
                    }
                    Some(AckCommand::Flush(response_tx)) => {
                        self.send_pending().await;
                        if response_tx.send(()).is_err() {
                            error!("Failed to send flush response - receiver dropped");
                        }
                    }
                    Some(AckCommand::Shutdown(response_tx)) => {
                        self.drain_replies();
                        self.send_pending().await;
                        let _ = response_tx.send(());
                        break;
                    }
                    None => {
                        self.send_pending().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !self.acks.is_empty() || !self.nacks.is_empty() {
                        self.send_pending().await;
                    }
                }
            }
        }

        debug!("Ack service stopped for {}", self.subscription);
    }

    /// Moves answers already queued behind a shutdown into the pending lists.
    fn drain_replies(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            match command {
                AckCommand::Reply(ack_id, AckReply::Ack) => self.acks.push(ack_id),
                AckCommand::Reply(ack_id, AckReply::Nack) => self.nacks.push(ack_id),
                AckCommand::Flush(response_tx) | AckCommand::Shutdown(response_tx) => {
                    let _ = response_tx.send(());
                }
            }
        }
    }

    async fn send_pending(&mut self) {
        while !self.acks.is_empty() {
            let n = self.acks.len().min(MAX_ACK_BATCH);
            let batch: Vec<String> = self.acks.drain(..n).collect();
            debug!("Acknowledging {} messages", batch.len());
            if let Err(e) = self.client.acknowledge(&self.subscription, &batch).await {
                error!("Failed to acknowledge {} messages: {e}", batch.len());
            }
        }
        while !self.nacks.is_empty() {
            let n = self.nacks.len().min(MAX_ACK_BATCH);
            let batch: Vec<String> = self.nacks.drain(..n).collect();
            debug!("Returning {} messages to the subscription", batch.len());
            if let Err(e) = self
                .client
                .modify_ack_deadline(&self.subscription, &batch, 0)
                .await
            {
                error!("Failed to nack {} messages: {e}", batch.len());
            }
        }
    }
}
