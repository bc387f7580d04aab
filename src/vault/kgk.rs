//! The KGK vault: generation, at-rest encryption and migration of the
//! root secret.
//!
//! ```text
//!   Absent ──begin_decrypt──▶ Decrypting ──accept──▶ Ready ──migrate──▶ Migrating
//!     ▲                           │                    ▲                    │
//!     └───────abandon_decrypt─────┘                    └────────────────────┘
//! ```
//!
//! `create_new` and `adopt` jump straight to `Ready`.
//!
//! The encrypted block is a tagged envelope. Blocks written by the old
//! fixed-size format are kept as `LegacyFixed` so they can be recognized
//! and replaced, but they never yield a usable KGK.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::DomainSettingsStore;
use super::format::{base64_decode, base64_encode};
use crate::crypto::crypter::Crypter;
use crate::crypto::keys::{KeyMaterial, Kgk, KGK_LEN};
use crate::errors::{Result, SesamError};
use crate::password::engine::derive_vault;

/// Byte length of blocks written by the old fixed-size format.
pub const LEGACY_BLOCK_LEN: usize = 112;

/// Version written into every new block.
pub const CURRENT_BLOCK_VERSION: u8 = 1;

/// The KGK at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum EncryptedKgkBlock {
    /// Pre-envelope block; carried along but never decrypted.
    LegacyFixed {
        #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
        data: Vec<u8>,
    },
    /// AES-256-CBC of the raw KGK.
    Current {
        version: u8,
        #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
        ciphertext: Vec<u8>,
    },
}

impl EncryptedKgkBlock {
    pub fn is_current(&self) -> bool {
        matches!(self, Self::Current { .. })
    }
}

/// Lifecycle of the in-memory KGK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Absent,
    Decrypting,
    Ready,
    Migrating,
}

/// Outcome of a KGK migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Domains that received a frozen legacy password.
    pub frozen: usize,
    /// Domains that already had one and kept it.
    pub kept: usize,
}

/// Owner of the KGK.
#[derive(Debug)]
pub struct KgkVault {
    state: VaultState,
    kgk: Option<Kgk>,
}

impl Default for KgkVault {
    fn default() -> Self {
        Self::new()
    }
}

impl KgkVault {
    pub fn new() -> Self {
        Self {
            state: VaultState::Absent,
            kgk: None,
        }
    }

    pub fn state(&self) -> VaultState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == VaultState::Ready
    }

    /// The current KGK, only while `Ready`.
    pub fn kgk(&self) -> Result<&Kgk> {
        match (&self.state, &self.kgk) {
            (VaultState::Ready, Some(kgk)) => Ok(kgk),
            (state, _) => Err(SesamError::VaultNotReady(format!("vault is {state:?}"))),
        }
    }

    /// Generate a brand-new KGK. Only on explicit user request.
    pub fn create_new(&mut self) -> Result<()> {
        if self.state == VaultState::Migrating {
            return Err(SesamError::VaultNotReady("migration in progress".into()));
        }
        self.kgk = Some(Kgk::generate()?);
        self.state = VaultState::Ready;
        info!("generated a new KGK");
        Ok(())
    }

    /// Mark a decryption as in flight.
    pub fn begin_decrypt(&mut self) {
        if self.state == VaultState::Migrating {
            return;
        }
        debug!(from = ?self.state, "vault decrypting");
        self.kgk = None;
        self.state = VaultState::Decrypting;
    }

    /// Give up on an in-flight decryption.
    pub fn abandon_decrypt(&mut self) {
        if self.state == VaultState::Decrypting {
            self.state = VaultState::Absent;
        }
    }

    /// Finish a decryption with its result.
    pub fn accept(&mut self, kgk: Kgk) {
        self.kgk = Some(kgk);
        self.state = VaultState::Ready;
        debug!("vault ready");
    }

    /// Decrypt `block` and make the result current.
    pub fn unlock(&mut self, block: &EncryptedKgkBlock, material: &KeyMaterial) -> Result<()> {
        let kgk = Self::decrypt(block, material)?;
        self.accept(kgk);
        Ok(())
    }

    /// Encrypt the current KGK.
    ///
    /// Deterministic for identical key material; callers must pair each
    /// KGK with a fresh salt.
    pub fn encrypt(&self, material: &KeyMaterial) -> Result<EncryptedKgkBlock> {
        let kgk = self.kgk()?;
        let ciphertext = Crypter::new(material).encrypt(kgk.as_bytes())?;
        Ok(EncryptedKgkBlock::Current {
            version: CURRENT_BLOCK_VERSION,
            ciphertext,
        })
    }

    /// Re-encrypt the unchanged KGK under new key material, e.g. after
    /// the master password changed. Every derived password stays the same.
    pub fn rekey(&self, material: &KeyMaterial) -> Result<EncryptedKgkBlock> {
        let block = self.encrypt(material)?;
        info!("KGK re-encrypted under new key material");
        Ok(block)
    }

    /// Decrypt a block.
    ///
    /// A wrong key is **not** detected and returns a different KGK.
    /// Legacy blocks are rejected as unusable.
    pub fn decrypt(block: &EncryptedKgkBlock, material: &KeyMaterial) -> Result<Kgk> {
        let ciphertext = match block {
            EncryptedKgkBlock::LegacyFixed { .. } => {
                return Err(SesamError::InvalidVaultFormat(
                    "legacy fixed-size KGK block is not usable".into(),
                ));
            }
            EncryptedKgkBlock::Current { version, ciphertext } => {
                if *version != CURRENT_BLOCK_VERSION {
                    return Err(SesamError::InvalidVaultFormat(format!(
                        "unsupported KGK block version {version}, expected {CURRENT_BLOCK_VERSION}"
                    )));
                }
                ciphertext
            }
        };
        if ciphertext.len() != KGK_LEN {
            return Err(SesamError::InvalidVaultFormat(format!(
                "KGK block must be {KGK_LEN} bytes, got {}",
                ciphertext.len()
            )));
        }

        let mut plaintext = Crypter::new(material).decrypt(ciphertext)?;
        let mut bytes = [0u8; KGK_LEN];
        bytes.copy_from_slice(&plaintext);
        zeroize::Zeroize::zeroize(&mut plaintext);
        let kgk = Kgk::from_bytes(bytes);
        zeroize::Zeroize::zeroize(&mut bytes);
        Ok(kgk)
    }

    /// Replace the KGK wholesale; nothing local is preserved.
    pub fn adopt(&mut self, kgk: Kgk) {
        info!(previous = ?self.state, "adopting KGK without migration");
        self.kgk = Some(kgk);
        self.state = VaultState::Ready;
    }

    /// Switch to `remote_kgk`, freezing every domain's current password
    /// first.
    ///
    /// All passwords are computed under the old KGK before anything is
    /// written. If one derivation fails, the store and the KGK stay as
    /// they were.
    pub fn migrate(
        &mut self,
        remote_kgk: Kgk,
        domains: &mut DomainSettingsStore,
    ) -> Result<MigrationReport> {
        if self.state != VaultState::Ready {
            return Err(SesamError::VaultNotReady(format!(
                "cannot migrate from {:?}",
                self.state
            )));
        }
        self.state = VaultState::Migrating;

        let frozen = match self.compute_frozen(domains) {
            Ok(frozen) => frozen,
            Err(e) => {
                warn!(error = %e, "migration aborted, KGK unchanged");
                self.state = VaultState::Ready;
                return Err(e);
            }
        };

        let kept = domains.len() - frozen.len();
        let mut stored = 0;
        for (domain, password) in frozen {
            if domains.freeze_legacy_password(&domain, password)? {
                stored += 1;
            }
        }

        self.kgk = Some(remote_kgk);
        self.state = VaultState::Ready;
        info!(frozen = stored, kept, "KGK migrated");
        Ok(MigrationReport {
            frozen: stored,
            kept,
        })
    }

    fn compute_frozen(&self, domains: &DomainSettingsStore) -> Result<Vec<(String, String)>> {
        let old = self
            .kgk
            .as_ref()
            .ok_or_else(|| SesamError::VaultNotReady("no KGK to migrate from".into()))?;
        domains
            .entries()
            .iter()
            .filter(|setting| setting.legacy_password.is_none())
            .map(|setting| Ok((setting.domain.clone(), derive_vault(old, setting)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::derive_key_material;
    use crate::vault::domain::SettingDefaults;

    fn material(pw: &[u8]) -> KeyMaterial {
        derive_key_material(pw, b"vault-salt", 4).unwrap()
    }

    fn ready_vault() -> KgkVault {
        let mut vault = KgkVault::new();
        vault.create_new().unwrap();
        vault
    }

    #[test]
    fn starts_absent() {
        let vault = KgkVault::new();
        assert_eq!(vault.state(), VaultState::Absent);
        assert!(vault.kgk().is_err());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = ready_vault();
        let m = material(b"master");
        let block = vault.encrypt(&m).unwrap();
        assert!(block.is_current());
        assert_eq!(&KgkVault::decrypt(&block, &m).unwrap(), vault.kgk().unwrap());
    }

    #[test]
    fn decrypt_with_wrong_material_yields_a_different_kgk() {
        let vault = ready_vault();
        let block = vault.encrypt(&material(b"master")).unwrap();
        let wrong = KgkVault::decrypt(&block, &material(b"other")).unwrap();
        assert_ne!(&wrong, vault.kgk().unwrap());
    }

    #[test]
    fn rekey_keeps_the_kgk() {
        let vault = ready_vault();
        let new_material = derive_key_material(b"new", b"new-salt", 4).unwrap();
        let block = vault.rekey(&new_material).unwrap();
        assert_eq!(
            &KgkVault::decrypt(&block, &new_material).unwrap(),
            vault.kgk().unwrap()
        );
    }

    #[test]
    fn legacy_block_is_unusable() {
        let block = EncryptedKgkBlock::LegacyFixed {
            data: vec![0u8; LEGACY_BLOCK_LEN],
        };
        assert!(!block.is_current());
        assert!(matches!(
            KgkVault::decrypt(&block, &material(b"master")),
            Err(SesamError::InvalidVaultFormat(_))
        ));
    }

    #[test]
    fn envelope_serializes_with_its_tag() {
        let block = EncryptedKgkBlock::Current {
            version: 1,
            ciphertext: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"format\":\"current\""));
        let back: EncryptedKgkBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn abandoned_decrypt_returns_to_absent() {
        let mut vault = KgkVault::new();
        vault.begin_decrypt();
        assert_eq!(vault.state(), VaultState::Decrypting);
        vault.abandon_decrypt();
        assert_eq!(vault.state(), VaultState::Absent);
    }

    #[test]
    fn migrate_requires_ready() {
        let mut vault = KgkVault::new();
        let mut domains = DomainSettingsStore::new();
        assert!(vault
            .migrate(Kgk::generate().unwrap(), &mut domains)
            .is_err());
    }

    #[test]
    fn migrate_freezes_old_passwords_then_switches() {
        let mut vault = ready_vault();
        let mut domains = DomainSettingsStore::new();
        let defaults = SettingDefaults {
            iterations: 8,
            ..SettingDefaults::default()
        };
        domains.get_or_create("a.org", &defaults).unwrap();
        domains.get_or_create("b.org", &defaults).unwrap();
        domains.set_legacy_password("b.org", "kept-as-is").unwrap();

        let before_a = derive_vault(vault.kgk().unwrap(), domains.get("a.org").unwrap()).unwrap();
        let remote = Kgk::generate().unwrap();

        let report = vault.migrate(remote.clone(), &mut domains).unwrap();
        assert_eq!(report, MigrationReport { frozen: 1, kept: 1 });
        assert_eq!(vault.state(), VaultState::Ready);
        assert_eq!(vault.kgk().unwrap(), &remote);
        assert_eq!(
            domains.get("a.org").unwrap().legacy_password.as_deref(),
            Some(before_a.as_str())
        );
        assert_eq!(
            domains.get("b.org").unwrap().legacy_password.as_deref(),
            Some("kept-as-is")
        );
    }
}
