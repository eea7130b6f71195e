//! TLS client configuration for device endpoints.
//!
//! Devices present self-signed certificates, so the command channel trusts
//! any server certificate. Hostname and chain checks are skipped; the TLS
//! handshake itself (and its signature checks) still runs.

use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};

/// Accepts any server certificate.
#[derive(Debug, Default)]
pub struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// rustls client config with relaxed trust
pub fn relaxed_client_config() -> Arc<ClientConfig> {
    tracing::debug!("Using relaxed certificate verification for device TLS");

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();

    Arc::new(config)
}
