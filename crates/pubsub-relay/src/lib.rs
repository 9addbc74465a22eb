// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relays messages from a Pub/Sub subscription to a Splunk HTTP Event
//! Collector.
//!
//! - [`relay`]: startup sequencing and the top-level run loop
//! - [`subscription`]: topic and subscription existence, creation, purge
//! - [`consumer`] and [`source`]: concurrent consumption with draining
//! - [`processor`]: forward-then-acknowledge for a single message
//! - [`forwarder`]: the HEC client
//! - [`pubsub`]: the Pub/Sub REST client

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod ack_service;
pub mod auth;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod forwarder;
pub mod names;
pub mod processor;
pub mod pubsub;
pub mod relay;
pub mod source;
pub mod subscription;

#[cfg(test)]
mod test_support;
