//! Binary state file format.
//!
//! A `sesam.vault` file has this layout:
//!
//! ```text
//! [SESM: 4 bytes][version: 1 byte][state JSON]
//! ```
//!
//! - **Magic** (`SESM`): identifies the file as a SESAM state file.
//! - **Version**: format version (currently `1`).
//! - **State JSON**: serialized `StoredState`.
//!
//! Nothing in the JSON is secret: the KGK block is CBC-encrypted under
//! the master-password key, and the domain settings are sealed with
//! AES-GCM under a key derived from the KGK.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kgk::EncryptedKgkBlock;
use crate::errors::{Result, SesamError};
use crate::trust::PinnedCertificate;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every state file.
const MAGIC: &[u8; 4] = b"SESM";

/// Current binary format version.
pub const CURRENT_VERSION: u8 = 1;

/// 4 (magic) + 1 (version).
const PREFIX_LEN: usize = 5;

// ---------------------------------------------------------------------------
// StoredState
// ---------------------------------------------------------------------------

/// Everything persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredState {
    /// Salt of the master-password KDF (base64 in JSON).
    #[serde(
        default,
        serialize_with = "base64_encode",
        deserialize_with = "base64_decode"
    )]
    pub salt: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kgk_block: Option<EncryptedKgkBlock>,

    /// Domain settings, sealed under the KGK settings key.
    #[serde(
        default,
        serialize_with = "base64_encode",
        deserialize_with = "base64_decode"
    )]
    pub settings: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_certificate: Option<PinnedCertificate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Write the state file **atomically** (temp file + rename).
pub fn write_state(path: &Path, state: &StoredState) -> Result<()> {
    let json = serde_json::to_vec(state)
        .map_err(|e| SesamError::SerializationError(format!("state: {e}")))?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + json.len());
    buf.extend_from_slice(MAGIC);
    buf.push(CURRENT_VERSION);
    buf.extend_from_slice(&json);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    fs::write(&tmp_path, &buf)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read and parse the state file.
pub fn read_state(path: &Path) -> Result<StoredState> {
    if !path.exists() {
        return Err(SesamError::VaultNotFound(path.to_path_buf()));
    }

    let data = fs::read(path)?;
    if data.len() < PREFIX_LEN {
        return Err(SesamError::InvalidVaultFormat(
            "file too small to be a state file".into(),
        ));
    }
    if &data[0..4] != MAGIC {
        return Err(SesamError::InvalidVaultFormat(
            "missing SESM magic bytes".into(),
        ));
    }
    let version = data[4];
    if version != CURRENT_VERSION {
        return Err(SesamError::InvalidVaultFormat(format!(
            "unsupported version {version}, expected {CURRENT_VERSION}"
        )));
    }

    serde_json::from_slice(&data[PREFIX_LEN..])
        .map_err(|e| SesamError::InvalidVaultFormat(format!("state JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
