// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::ClientBuilder;
use std::error::Error;
#[cfg(feature = "fips")]
use tracing::debug;

/// Creates a reqwest client builder with the relay's TLS configuration.
///
/// `verify_certificates` controls server certificate validation. Sinks reached
/// through internal infrastructure often present self-signed certificates, so
/// callers decide the policy explicitly instead of inheriting a default here.
#[cfg(not(feature = "fips"))]
pub fn create_reqwest_client_builder(
    verify_certificates: bool,
) -> Result<ClientBuilder, Box<dyn Error + Send + Sync>> {
    Ok(reqwest::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(!verify_certificates))
}

/// Creates a reqwest client builder with FIPS-compliant TLS configuration.
///
/// Root certificates come from the native store. Certificate verification
/// cannot be switched off in this mode.
#[cfg(feature = "fips")]
pub fn create_reqwest_client_builder(
    verify_certificates: bool,
) -> Result<ClientBuilder, Box<dyn Error + Send + Sync>> {
    if !verify_certificates {
        return Err("Certificate verification cannot be disabled in FIPS mode".into());
    }

    // Installed at startup by crate::prepare_client_provider.
    let provider =
        rustls::crypto::CryptoProvider::get_default().ok_or("No crypto provider configured")?;

    if !provider.fips() {
        return Err("Crypto provider is not FIPS-compliant".into());
    }

    let mut root_cert_store = rustls::RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    let mut valid_count = 0;
    for cert in native_certs.certs {
        match root_cert_store.add(cert) {
            Ok(()) => valid_count += 1,
            Err(err) => {
                debug!("Skipping unparsable native certificate: {:?}", err);
            }
        }
    }
    if valid_count == 0 {
        return Err("No valid certificates found in native root store".into());
    }

    let versions = rustls::ALL_VERSIONS.to_vec();
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&versions)
        .map_err(|_| "Failed to set protocol versions")?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    if !config.fips() {
        return Err("The final TLS configuration is not FIPS-compliant".into());
    }
    debug!("Client builder is configured with FIPS.");

    Ok(reqwest::Client::builder().use_preconfigured_tls(config))
}
