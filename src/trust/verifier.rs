//! rustls certificate verifiers for the sync connection.
//!
//! `PinnedCertVerifier` trusts a single pinned certificate. A server whose
//! own (self-signed) certificate was pinned must present exactly those
//! bytes; otherwise the pin is the only root a normal chain is built to,
//! which covers servers signed by a private CA. `ChainRecorder` trusts
//! anything and keeps the presented chain so it can be shown to the user
//! before anything is pinned.

use std::sync::{Arc, Mutex, PoisonError};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use super::certificate_covers_host;
use crate::errors::{Result, SesamError};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client configuration whose only certificate check is `verifier`.
pub fn client_config(verifier: Arc<dyn ServerCertVerifier>) -> Result<ClientConfig> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| SesamError::Transport(format!("TLS setup: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

#[derive(Debug)]
pub struct PinnedCertVerifier {
    pinned: CertificateDer<'static>,
    anchored: Arc<WebPkiServerVerifier>,
}

impl PinnedCertVerifier {
    pub fn new(pinned_der: &[u8]) -> Result<Self> {
        let pinned = CertificateDer::from(pinned_der.to_vec());
        let mut roots = RootCertStore::empty();
        roots
            .add(pinned.clone())
            .map_err(|e| SesamError::TrustViolation(format!("pinned certificate: {e}")))?;
        let anchored = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .map_err(|e| SesamError::TrustViolation(format!("pinned certificate: {e}")))?;
        Ok(Self { pinned, anchored })
    }

    /// Check a chain (leaf first) for `host` the way a handshake would.
    pub fn check_chain(&self, chain: &[Vec<u8>], host: &str) -> Result<()> {
        let Some((leaf, rest)) = chain.split_first() else {
            return Err(SesamError::TrustViolation(format!(
                "{host} presented no certificate"
            )));
        };
        let name = ServerName::try_from(host)
            .map_err(|e| SesamError::InvalidInput(format!("invalid server name '{host}': {e}")))?;
        let intermediates: Vec<_> = rest
            .iter()
            .map(|der| CertificateDer::from(der.as_slice()))
            .collect();

        self.verify_server_cert(
            &CertificateDer::from(leaf.as_slice()),
            &intermediates,
            &name,
            &[],
            UnixTime::now(),
        )
        .map(drop)
        .map_err(|e| {
            SesamError::TrustViolation(format!("certificate is not valid for {host}: {e}"))
        })
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            return match certificate_covers_host(end_entity.as_ref(), &server_name.to_str()) {
                Ok(true) => Ok(ServerCertVerified::assertion()),
                _ => Err(TlsError::InvalidCertificate(CertificateError::NotValidForName)),
            };
        }
        self.anchored
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        self.anchored.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        self.anchored.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.anchored.supported_verify_schemes()
    }
}

/// Accepts any chain and remembers the last one presented.
///
/// Handshake signatures are still checked, so the recorded leaf belongs
/// to the peer that answered.
#[derive(Debug)]
pub struct ChainRecorder {
    provider: Arc<CryptoProvider>,
    chain: Mutex<Vec<Vec<u8>>>,
}

impl Default for ChainRecorder {
    fn default() -> Self {
        Self {
            provider: provider(),
            chain: Mutex::new(Vec::new()),
        }
    }
}

impl ChainRecorder {
    /// The recorded chain, leaf first. Empty if no handshake got that far.
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.chain.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ServerCertVerifier for ChainRecorder {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        let mut presented = vec![end_entity.as_ref().to_vec()];
        presented.extend(intermediates.iter().map(|der| der.as_ref().to_vec()));
        *self.chain.lock().unwrap_or_else(PoisonError::into_inner) = presented;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
