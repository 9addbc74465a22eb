// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-message handler.
//!
//! [`MessageProcessor::handle`] forwards one message and then acknowledges
//! it, whatever the forwarding outcome. A panic inside the sink is caught at
//! this boundary and reported as a failed outcome, so one bad message never
//! stops consumption.

use crate::bus::InboundMessage;
use crate::forwarder::{EventSink, FailureReason, ForwardOutcome};
use chrono::Local;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Safe to clone and call from many tasks at once; holds no per-message state.
#[derive(Clone)]
pub struct MessageProcessor {
    sink: Arc<dyn EventSink>,
}

impl MessageProcessor {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn handle(&self, message: InboundMessage) -> ForwardOutcome {
        let message_id = message.message_id().to_string();
        let (payload, ack) = message.into_parts();
        let sink = Arc::clone(&self.sink);

        let forwarded = AssertUnwindSafe(async {
            debug!(
                "Processing message {message_id} at {}",
                Local::now().format("%a %b %e %H:%M:%S %Y")
            );
            sink.forward(&payload).await
        })
        .catch_unwind()
        .await;

        let outcome = match forwarded {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("Exception processing message {message_id}: {reason}");
                ForwardOutcome::Failed(FailureReason::Panicked(reason))
            }
        };

        // Failed messages are acknowledged too; they are not redelivered.
        ack.ack();

        match &outcome {
            ForwardOutcome::Delivered => debug!("Message {message_id} delivered"),
            ForwardOutcome::Failed(reason) => debug!("Message {message_id} dropped: {reason}"),
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
