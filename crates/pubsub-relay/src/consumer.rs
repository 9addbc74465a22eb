// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Steady-state consumption.
//!
//! The loop receives batches from a [`MessageSource`] and hands every message
//! to [`MessageProcessor::handle`] on its own task, bounded by a semaphore.
//! On cancellation it stops receiving, waits for every in-flight handler to
//! finish so no acknowledgment is lost, then closes the source.

use crate::errors::{BusError, RelayError};
use crate::processor::MessageProcessor;
use crate::source::MessageSource;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Subscribing,
    Consuming,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Upper bound on concurrently running handlers.
    pub max_outstanding_messages: usize,
    /// Wait before pulling again after an empty batch.
    pub idle_wait: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 100,
            idle_wait: Duration::from_millis(250),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Exponential delay between failed receives.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(previous) => previous.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

pub struct ConsumptionLoop<S> {
    source: S,
    processor: MessageProcessor,
    config: ConsumerConfig,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
}

impl<S: MessageSource + 'static> ConsumptionLoop<S> {
    pub fn new(
        source: S,
        processor: MessageProcessor,
        config: ConsumerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            source,
            processor,
            config,
            cancel,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LoopState) {
        debug!("Consumption loop state: {state:?}");
        self.state.send_replace(state);
    }

    /// Runs until the source ends, the token is cancelled or a receive fails
    /// with a non-retryable error.
    pub async fn run(mut self) -> Result<(), BusError> {
        self.set_state(LoopState::Subscribing);
        let semaphore = Arc::new(Semaphore::new(self.config.max_outstanding_messages.max(1)));
        let mut tasks = JoinSet::new();
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

        self.set_state(LoopState::Consuming);
        info!("Listening for messages");

        let result = loop {
            reap_finished(&mut tasks);

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                received = self.source.receive() => received,
            };

            match received {
                Ok(None) => {
                    debug!("Message stream ended");
                    break Ok(());
                }
                Ok(Some(batch)) if batch.is_empty() => {
                    backoff.reset();
                    if wait_or_cancel(&self.cancel, self.config.idle_wait).await {
                        break Ok(());
                    }
                }
                Ok(Some(batch)) => {
                    backoff.reset();
                    for message in batch {
                        // Messages left in the batch after a cancel are
                        // dropped, which hands them back to the bus.
                        let Some(permit) = acquire(&self.cancel, &semaphore).await else {
                            break;
                        };
                        let processor = self.processor.clone();
                        tasks.spawn(async move {
                            let _permit = permit;
                            processor.handle(message).await;
                        });
                    }
                }
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next_delay();
                    warn!("Failed to receive messages, retrying in {delay:?}: {e}");
                    if wait_or_cancel(&self.cancel, delay).await {
                        break Ok(());
                    }
                }
                Err(e) => {
                    error!("Failed to receive messages: {e}");
                    break Err(e);
                }
            }
        };

        self.set_state(LoopState::Draining);
        if !tasks.is_empty() {
            info!("Waiting for {} in-flight messages", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Message handler task failed: {e}");
            }
        }
        self.source.close().await;
        self.set_state(LoopState::Stopped);
        info!("Stopped listening for messages");

        result
    }

    /// Runs the loop on its own task.
    pub fn spawn(self) -> ConsumerHandle {
        let cancel = self.cancel.clone();
        let state = self.state();
        let task = tokio::spawn(self.run());
        ConsumerHandle {
            cancel,
            state,
            task,
        }
    }
}

/// Returns `true` if cancelled while waiting.
async fn wait_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

async fn acquire(
    cancel: &CancellationToken,
    semaphore: &Arc<Semaphore>,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(Some(joined)) = tasks.join_next().now_or_never() {
        if let Err(e) = joined {
            error!("Message handler task failed: {e}");
        }
    }
}

/// Handle to a loop started with [`ConsumptionLoop::spawn`].
#[derive(Debug)]
pub struct ConsumerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<LoopState>,
    task: JoinHandle<Result<(), BusError>>,
}

impl ConsumerHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Requests a drain; use [`ConsumerHandle::join`] to wait for it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<(), RelayError> {
        match self.task.await {
            Ok(result) => result.map_err(RelayError::Consume),
            Err(e) => Err(RelayError::ConsumerTask(e.to_string())),
        }
    }
}
