// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS setup shared by every outbound HTTP client of the relay.

pub mod reqwest_adapter;

use std::error::Error;

/// Installs the FIPS crypto provider as the process default.
///
/// Must run before any HTTP client is built.
#[cfg(feature = "fips")]
pub fn prepare_client_provider() -> Result<(), Box<dyn Error + Send + Sync>> {
    rustls::crypto::default_fips_provider()
        .install_default()
        .map_err(|e| format!("Failed to set up fips provider: {e:?}").into())
}

/// The default rustls provider is used outside FIPS builds.
#[cfg(not(feature = "fips"))]
pub fn prepare_client_provider() -> Result<(), Box<dyn Error + Send + Sync>> {
    Ok(())
}
