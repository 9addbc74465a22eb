// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::{process::ExitCode, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use pubsub_relay::{
    config::{RelayConfig, DEFAULT_LOG_LEVEL},
    errors::{ConfigError, RelayError},
    pubsub::PubSubClient,
    relay::Relay,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = RelayConfig::from_env();
    let log_level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |config| config.log_level.as_str());
    init_logging(log_level);

    let result = match config {
        Ok(config) => start(config).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => {
            info!("Relay stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Shutting down relay: {e}");
            ExitCode::FAILURE
        }
    }
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{log_level}")).unwrap_or_else(|_| {
        EnvFilter::new(format!("h2=off,hyper=off,rustls=off,{DEFAULT_LOG_LEVEL}"))
    })
}

fn init_logging(log_level: &str) {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level))
        .event_format(logger::Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {e}");
        return;
    }
    debug!("Logging subsystem enabled");
}

async fn start(config: RelayConfig) -> Result<(), RelayError> {
    debug!("Loaded configuration: {config:?}");
    relay_fips::prepare_client_provider()
        .map_err(|e| ConfigError::Invalid(format!("TLS setup failed: {e}")))?;

    let client = PubSubClient::new(config.pubsub_client_config()?)?;
    let relay = Relay::new(Arc::new(client), config);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    relay.run(cancel).await
}

async fn cancel_on_signal(cancel: CancellationToken) {
    wait_for_signal().await;
    info!("Shutdown signal received, draining in-flight messages");
    cancel.cancel();
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!("Failed to listen for SIGTERM: {e}");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}
