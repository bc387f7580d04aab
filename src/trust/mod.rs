//! Trust-on-first-use pinning of the sync server certificate.
//!
//! The first time a server is contacted the top certificate of the chain
//! it presents is shown to the user as a SHA-256 fingerprint. For a
//! self-signed server that is its own certificate; for a server signed by
//! a private CA it is that CA. Once accepted, the DER bytes are pinned and
//! later connections trust nothing else, the system roots included. A pin
//! that no longer matches is never silently replaced.

mod verifier;

pub use verifier::{client_config, ChainRecorder, PinnedCertVerifier};

use chrono::{DateTime, Utc};
use rustls_pki_types::{CertificateDer, ServerName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::errors::{Result, SesamError};
use crate::vault::format::{base64_decode, base64_encode};

/// A certificate the user accepted for a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedCertificate {
    pub host: String,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub der: Vec<u8>,

    pub fingerprint: String,
    pub pinned_at: DateTime<Utc>,
}

/// Asks the user whether to trust a certificate.
pub trait TrustPrompt {
    /// Return `true` to pin the certificate.
    fn confirm(&mut self, host: &str, fingerprint: &str) -> bool;
}

/// Result of a trust decision that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    AlreadyPinned,
    NewlyPinned { fingerprint: String },
}

/// Holds at most one pinned certificate.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    pinned: Option<PinnedCertificate>,
}

impl TrustStore {
    pub fn new(pinned: Option<PinnedCertificate>) -> Self {
        Self { pinned }
    }

    pub fn pinned(&self) -> Option<&PinnedCertificate> {
        self.pinned.as_ref()
    }

    /// DER bytes of the pinned certificate, if any.
    pub fn pinned_der(&self) -> Option<&[u8]> {
        self.pinned.as_ref().map(|p| p.der.as_slice())
    }

    /// Forget the pin. Returns `true` if there was one.
    pub fn clear(&mut self) -> bool {
        self.pinned.take().is_some()
    }

    /// Decide whether the chain `host` presented (leaf first) may be used.
    ///
    /// - pinned certificate in the chain: accepted without asking;
    /// - pinned and absent: rejected without asking;
    /// - not pinned: the chain must verify for `host` with its top
    ///   certificate as the only root, then the user is asked to confirm
    ///   that certificate's fingerprint.
    pub fn decide(
        &mut self,
        host: &str,
        chain: &[Vec<u8>],
        prompt: &mut dyn TrustPrompt,
    ) -> Result<TrustDecision> {
        let Some(anchor) = chain.last() else {
            return Err(SesamError::TrustViolation(format!(
                "{host} presented no certificate"
            )));
        };

        if let Some(pinned) = &self.pinned {
            if chain.iter().any(|der| *der == pinned.der) {
                return Ok(TrustDecision::AlreadyPinned);
            }
            warn!(host, pinned = %pinned.fingerprint, "server certificate changed");
            return Err(SesamError::TrustViolation(format!(
                "the certificate presented by {host} does not match the pinned one ({})",
                pinned.fingerprint
            )));
        }

        PinnedCertVerifier::new(anchor)?.check_chain(chain, host)?;

        let der = anchor.as_slice();
        let fingerprint = fingerprint(der);
        if !prompt.confirm(host, &fingerprint) {
            return Err(SesamError::TrustViolation(format!(
                "certificate for {host} was not accepted"
            )));
        }

        self.pinned = Some(PinnedCertificate {
            host: host.to_string(),
            der: der.to_vec(),
            fingerprint: fingerprint.clone(),
            pinned_at: Utc::now(),
        });
        info!(host, %fingerprint, "pinned server certificate");
        Ok(TrustDecision::NewlyPinned { fingerprint })
    }

    /// The configured server is now `host`.
    ///
    /// Keeps the pin for the same host, or when the pinned certificate
    /// itself covers the new one. Returns `true` if the pin was cleared.
    pub fn on_endpoint_changed(&mut self, host: &str) -> bool {
        let keep = match &self.pinned {
            None => return false,
            Some(pinned) if pinned.host == host => return false,
            Some(pinned) => certificate_covers_host(&pinned.der, host).unwrap_or(false),
        };
        if keep {
            if let Some(pinned) = &mut self.pinned {
                pinned.host = host.to_string();
            }
            return false;
        }
        info!(host, "server changed, clearing pinned certificate");
        self.pinned = None;
        true
    }
}

/// SHA-256 over the DER bytes as `AA:BB:...` upper-case hex pairs.
pub fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Whether the certificate's subject names cover `host`.
pub fn certificate_covers_host(der: &[u8], host: &str) -> Result<bool> {
    let der = CertificateDer::from(der);
    let cert = webpki::EndEntityCert::try_from(&der)
        .map_err(|e| SesamError::TrustViolation(format!("unreadable certificate: {e}")))?;
    let name = ServerName::try_from(host)
        .map_err(|e| SesamError::InvalidInput(format!("invalid server name '{host}': {e}")))?;
    Ok(cert.verify_is_valid_for_subject_name(&name).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNC_CERT: &[u8] = include_bytes!("../../tests/fixtures/sync_example_org.der");
    const OTHER_CERT: &[u8] = include_bytes!("../../tests/fixtures/other_example_net.der");
    const CA: &[u8] = include_bytes!("../../tests/fixtures/private_ca.der");
    const CA_SIGNED: &[u8] = include_bytes!("../../tests/fixtures/sync_example_org_ca_signed.der");

    fn chain(certs: &[&[u8]]) -> Vec<Vec<u8>> {
        certs.iter().map(|der| der.to_vec()).collect()
    }

    /// Answers with a fixed value and counts how often it was asked.
    struct Answer {
        accept: bool,
        asked: usize,
    }

    impl Answer {
        fn new(accept: bool) -> Self {
            Self { accept, asked: 0 }
        }
    }

    impl TrustPrompt for Answer {
        fn confirm(&mut self, _host: &str, _fingerprint: &str) -> bool {
            self.asked += 1;
            self.accept
        }
    }

    #[test]
    fn fingerprint_format() {
        assert_eq!(
            fingerprint(SYNC_CERT),
            "36:AF:ED:11:B3:B1:66:98:B8:15:B6:04:39:30:4D:86:C6:0C:29:60:6A:78:97:00:E7:38:68:72:48:FD:16:06"
        );
    }

    #[test]
    fn covers_only_its_own_host() {
        assert!(certificate_covers_host(SYNC_CERT, "sync.example.org").unwrap());
        assert!(!certificate_covers_host(SYNC_CERT, "other.example.net").unwrap());
    }

    #[test]
    fn first_use_prompts_then_pins() {
        let mut store = TrustStore::default();
        let mut prompt = Answer::new(true);
        let decision = store
            .decide("sync.example.org", &chain(&[SYNC_CERT]), &mut prompt)
            .unwrap();
        assert!(matches!(decision, TrustDecision::NewlyPinned { .. }));
        assert_eq!(prompt.asked, 1);

        let again = store
            .decide("sync.example.org", &chain(&[SYNC_CERT]), &mut prompt)
            .unwrap();
        assert_eq!(again, TrustDecision::AlreadyPinned);
        assert_eq!(prompt.asked, 1);
    }

    #[test]
    fn rejected_prompt_pins_nothing() {
        let mut store = TrustStore::default();
        let err = store
            .decide("sync.example.org", &chain(&[SYNC_CERT]), &mut Answer::new(false))
            .unwrap_err();
        assert!(matches!(err, SesamError::TrustViolation(_)));
        assert!(store.pinned().is_none());
    }

    #[test]
    fn name_mismatch_is_rejected_without_prompt() {
        let mut store = TrustStore::default();
        let mut prompt = Answer::new(true);
        assert!(store
            .decide("sync.example.org", &chain(&[OTHER_CERT]), &mut prompt)
            .is_err());
        assert_eq!(prompt.asked, 0);
    }

    #[test]
    fn changed_certificate_never_replaces_the_pin() {
        let mut store = TrustStore::default();
        store
            .decide("sync.example.org", &chain(&[SYNC_CERT]), &mut Answer::new(true))
            .unwrap();

        let mut prompt = Answer::new(true);
        let err = store
            .decide("sync.example.org", &chain(&[OTHER_CERT]), &mut prompt)
            .unwrap_err();
        assert!(matches!(err, SesamError::TrustViolation(_)));
        assert_eq!(prompt.asked, 0);
        assert_eq!(store.pinned_der(), Some(SYNC_CERT));
    }

    #[test]
    fn private_ca_is_pinned_instead_of_the_leaf() {
        let mut store = TrustStore::default();
        let mut prompt = Answer::new(true);
        let decision = store
            .decide("sync.example.org", &chain(&[CA_SIGNED, CA]), &mut prompt)
            .unwrap();
        assert_eq!(
            decision,
            TrustDecision::NewlyPinned {
                fingerprint: fingerprint(CA)
            }
        );
        assert_eq!(store.pinned_der(), Some(CA));

        // The CA stays pinned for its host and the next handshake passes.
        assert!(!store.on_endpoint_changed("sync.example.org"));
        PinnedCertVerifier::new(store.pinned_der().unwrap())
            .unwrap()
            .check_chain(&chain(&[CA_SIGNED]), "sync.example.org")
            .unwrap();
        assert_eq!(
            store
                .decide("sync.example.org", &chain(&[CA_SIGNED, CA]), &mut prompt)
                .unwrap(),
            TrustDecision::AlreadyPinned
        );
        assert_eq!(prompt.asked, 1);
    }

    #[test]
    fn chain_that_does_not_lead_to_its_top_is_rejected() {
        let mut store = TrustStore::default();
        let mut prompt = Answer::new(true);
        assert!(store
            .decide("sync.example.org", &chain(&[SYNC_CERT, CA]), &mut prompt)
            .is_err());
        assert!(store.decide("sync.example.org", &[], &mut prompt).is_err());
        assert_eq!(prompt.asked, 0);
        assert!(store.pinned().is_none());
    }

    #[test]
    fn endpoint_change_clears_uncovered_pin() {
        let mut store = TrustStore::default();
        store
            .decide("sync.example.org", &chain(&[SYNC_CERT]), &mut Answer::new(true))
            .unwrap();
        assert!(!store.on_endpoint_changed("sync.example.org"));
        assert!(store.pinned().is_some());
        assert!(store.on_endpoint_changed("other.example.net"));
        assert!(store.pinned().is_none());
    }
}
