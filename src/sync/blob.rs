//! The opaque blob stored on the sync server.
//!
//! On the wire it is base64 over JSON. The server never sees anything it
//! could decrypt: the KGK block is encrypted under the master-password
//! key and the settings are sealed under a key derived from the KGK.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SesamError};
use crate::vault::format::{base64_decode, base64_encode};
use crate::vault::kgk::EncryptedKgkBlock;
use crate::vault::VaultStore;

/// Current blob layout version.
pub const BLOB_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBlob {
    pub version: u8,

    /// Salt the KGK block was encrypted with.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kgk_block: Option<EncryptedKgkBlock>,

    #[serde(
        default,
        serialize_with = "base64_encode",
        deserialize_with = "base64_decode"
    )]
    pub settings: Vec<u8>,
}

impl SyncBlob {
    /// Snapshot an unlocked vault.
    pub fn from_store(store: &VaultStore) -> Result<Self> {
        Ok(Self {
            version: BLOB_VERSION,
            salt: store.salt().to_vec(),
            kgk_block: Some(store.encrypted_kgk()?),
            settings: store.sealed_settings()?,
        })
    }

    /// Whether the blob carries a KGK this version can use.
    pub fn has_usable_kgk(&self) -> bool {
        self.kgk_block
            .as_ref()
            .is_some_and(EncryptedKgkBlock::is_current)
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| SesamError::SerializationError(format!("sync blob: {e}")))?;
        Ok(BASE64.encode(json))
    }

    pub fn decode(data: &str) -> Result<Self> {
        let json = BASE64
            .decode(data.trim())
            .map_err(|e| SesamError::InvalidVaultFormat(format!("sync blob base64: {e}")))?;
        let blob: Self = serde_json::from_slice(&json)
            .map_err(|e| SesamError::InvalidVaultFormat(format!("sync blob JSON: {e}")))?;
        if blob.version != BLOB_VERSION {
            return Err(SesamError::InvalidVaultFormat(format!(
                "unsupported sync blob version {}, expected {BLOB_VERSION}",
                blob.version
            )));
        }
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            SyncBlob::decode("not base64!"),
            Err(SesamError::InvalidVaultFormat(_))
        ));
        let not_json = BASE64.encode(b"plain text");
        assert!(SyncBlob::decode(&not_json).is_err());
    }

    #[test]
    fn legacy_kgk_block_is_not_usable() {
        let blob = SyncBlob {
            version: BLOB_VERSION,
            salt: vec![1; 32],
            kgk_block: Some(EncryptedKgkBlock::LegacyFixed {
                data: vec![0; 112],
            }),
            settings: Vec::new(),
        };
        let decoded = SyncBlob::decode(&blob.encode().unwrap()).unwrap();
        assert_eq!(decoded, blob);
        assert!(!decoded.has_usable_kgk());
    }
}
