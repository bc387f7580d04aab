//! High-level vault operations used by the session, the sync engine and
//! the CLI.
//!
//! `VaultStore` ties the on-disk `StoredState` to the in-memory KGK
//! vault, the domain settings and the certificate pin, so callers work
//! with `store.unlock_with(material)` and `store.save()` instead of
//! juggling ciphertexts.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::crypto::encryption::{open, seal};
use crate::crypto::keys::{KeyMaterial, Kgk};
use crate::errors::{Result, SesamError};
use crate::trust::TrustStore;

use super::domain::{DomainSetting, DomainSettingsStore};
use super::format::{self, StoredState};
use super::kgk::{EncryptedKgkBlock, KgkVault, MigrationReport};

/// The vault handle. Create one with `VaultStore::create` or
/// `VaultStore::open`, then unlock it with key material.
pub struct VaultStore {
    /// Path to the state file on disk.
    path: PathBuf,

    /// Last persisted (or loaded) state.
    state: StoredState,

    kgk_vault: KgkVault,
    domains: DomainSettingsStore,
    trust: TrustStore,

    /// Material the KGK block is encrypted under; bound to `state.salt`.
    key_material: Option<KeyMaterial>,
}

impl VaultStore {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a brand-new vault with a fresh KGK and write it to disk.
    ///
    /// `material` must have been derived for a freshly generated salt.
    pub fn create(path: &Path, material: KeyMaterial) -> Result<Self> {
        if path.exists() {
            return Err(SesamError::VaultAlreadyExists(path.to_path_buf()));
        }
        Self::create_replacing(path, material, TrustStore::default())
    }

    /// Like `create`, but an existing state file at `path` is replaced.
    ///
    /// The old file stays intact until the new one has been renamed over
    /// it, so a failure here leaves the previous vault usable.
    pub fn create_replacing(path: &Path, material: KeyMaterial, trust: TrustStore) -> Result<Self> {
        let mut kgk_vault = KgkVault::new();
        kgk_vault.create_new()?;

        let mut store = Self {
            path: path.to_path_buf(),
            state: StoredState {
                salt: material.salt().to_vec(),
                ..StoredState::default()
            },
            kgk_vault,
            domains: DomainSettingsStore::new(),
            trust,
            key_material: Some(material),
        };
        store.save()?;
        info!(path = %path.display(), "created vault");
        Ok(store)
    }

    /// Open the state file at `path`, still locked.
    ///
    /// A missing file yields an empty store with no KGK, which is the
    /// normal state of a first run or a legacy-only installation.
    pub fn open(path: &Path) -> Result<Self> {
        let mut state = match format::read_state(path) {
            Ok(state) => state,
            Err(SesamError::VaultNotFound(_)) => StoredState::default(),
            Err(e) => return Err(e),
        };
        let trust = TrustStore::new(state.pinned_certificate.take());

        Ok(Self {
            path: path.to_path_buf(),
            state,
            kgk_vault: KgkVault::new(),
            domains: DomainSettingsStore::new(),
            trust,
            key_material: None,
        })
    }

    /// Decrypt the stored KGK and the settings payload.
    ///
    /// The KGK itself cannot tell a wrong password from a right one; the
    /// sealed settings can, which is what `DecryptionMismatch` reports.
    pub fn unlock_with(&mut self, material: KeyMaterial) -> Result<()> {
        if material.salt() != self.state.salt.as_slice() {
            return Err(SesamError::InvalidInput(
                "key material was derived for a different salt".into(),
            ));
        }
        let block = self
            .state
            .kgk_block
            .clone()
            .ok_or_else(|| SesamError::VaultNotReady("no KGK stored".into()))?;

        self.kgk_vault.begin_decrypt();
        let unlocked = KgkVault::decrypt(&block, &material).and_then(|kgk| {
            let settings = open_settings(&kgk, &self.state.settings)?;
            Ok((kgk, settings))
        });

        match unlocked {
            Ok((kgk, settings)) => {
                self.kgk_vault.accept(kgk);
                self.domains = DomainSettingsStore::from_entries(settings);
                self.key_material = Some(material);
                debug!(domains = self.domains.len(), "vault unlocked");
                Ok(())
            }
            Err(e) => {
                self.kgk_vault.abandon_decrypt();
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Re-encrypt everything that changed and write the state file.
    pub fn save(&mut self) -> Result<()> {
        if self.kgk_vault.is_ready() {
            self.state.kgk_block = Some(self.encrypted_kgk()?);
            self.state.settings = self.sealed_settings()?;
        }
        self.state.pinned_certificate = self.trust.pinned().cloned();
        format::write_state(&self.path, &self.state)
    }

    /// Re-encrypt the KGK under new key material (new master password
    /// and salt). Site passwords do not change.
    pub fn rekey(&mut self, material: KeyMaterial) -> Result<()> {
        let block = self.kgk_vault.rekey(&material)?;
        self.state.kgk_block = Some(block);
        self.state.salt = material.salt().to_vec();
        self.key_material = Some(material);
        self.save()
    }

    /// Drop the decrypted KGK and settings ahead of a new unlock.
    pub fn lock(&mut self) {
        self.kgk_vault.begin_decrypt();
        self.domains = DomainSettingsStore::new();
        self.key_material = None;
    }

    /// Give up on a pending unlock.
    pub fn abandon_unlock(&mut self) {
        self.kgk_vault.abandon_decrypt();
    }

    /// Current KGK block for the wire.
    pub fn encrypted_kgk(&self) -> Result<EncryptedKgkBlock> {
        let material = self
            .key_material
            .as_ref()
            .ok_or_else(|| SesamError::VaultNotReady("no key material".into()))?;
        self.kgk_vault.encrypt(material)
    }

    /// Current domain settings, sealed under the KGK settings key.
    pub fn sealed_settings(&self) -> Result<Vec<u8>> {
        seal_settings(self.kgk_vault.kgk()?, self.domains.entries())
    }

    // ------------------------------------------------------------------
    // KGK changes driven by sync
    // ------------------------------------------------------------------

    /// Freeze every local password, then switch to `remote`.
    pub fn migrate_to(&mut self, remote: Kgk) -> Result<MigrationReport> {
        self.kgk_vault.migrate(remote, &mut self.domains)
    }

    /// Take over a KGK wholesale.
    pub fn adopt(&mut self, kgk: Kgk) {
        self.kgk_vault.adopt(kgk);
    }

    /// Bind the vault to other key material (and its salt).
    pub fn set_key_material(&mut self, material: KeyMaterial) {
        self.state.salt = material.salt().to_vec();
        self.key_material = Some(material);
    }

    pub fn record_sync(&mut self) {
        self.state.last_sync = Some(Utc::now());
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn salt(&self) -> &[u8] {
        &self.state.salt
    }

    pub fn stored_kgk_block(&self) -> Option<&EncryptedKgkBlock> {
        self.state.kgk_block.as_ref()
    }

    /// A current-format KGK block and its salt are on disk.
    pub fn can_unlock(&self) -> bool {
        !self.state.salt.is_empty()
            && self
                .state
                .kgk_block
                .as_ref()
                .is_some_and(EncryptedKgkBlock::is_current)
    }

    pub fn last_sync(&self) -> Option<chrono::DateTime<Utc>> {
        self.state.last_sync
    }

    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.key_material.as_ref()
    }

    pub fn kgk_vault(&self) -> &KgkVault {
        &self.kgk_vault
    }

    pub fn is_ready(&self) -> bool {
        self.kgk_vault.is_ready()
    }

    pub fn domains(&self) -> &DomainSettingsStore {
        &self.domains
    }

    pub fn domains_mut(&mut self) -> &mut DomainSettingsStore {
        &mut self.domains
    }

    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    pub fn trust_mut(&mut self) -> &mut TrustStore {
        &mut self.trust
    }
}

/// Seal domain settings as JSON under the KGK's settings key.
pub fn seal_settings(kgk: &Kgk, settings: &[DomainSetting]) -> Result<Vec<u8>> {
    let mut json = serde_json::to_vec(settings)
        .map_err(|e| SesamError::SerializationError(format!("settings: {e}")))?;
    let mut key = kgk.settings_key()?;
    let sealed = seal(&key, &json);
    key.zeroize();
    json.zeroize();
    sealed
}

/// Open a sealed settings payload. An empty payload is an empty list.
pub fn open_settings(kgk: &Kgk, sealed: &[u8]) -> Result<Vec<DomainSetting>> {
    if sealed.is_empty() {
        return Ok(Vec::new());
    }
    let mut key = kgk.settings_key()?;
    let opened = open(&key, sealed);
    key.zeroize();
    let mut json = opened?;

    let settings = serde_json::from_slice(&json)
        .map_err(|e| SesamError::InvalidVaultFormat(format!("settings JSON: {e}")));
    json.zeroize();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::{derive_key_material, generate_salt};
    use crate::vault::domain::SettingDefaults;
    use crate::vault::kgk::VaultState;

    fn material(pw: &[u8], salt: &[u8]) -> KeyMaterial {
        derive_key_material(pw, salt, 4).unwrap()
    }

    #[test]
    fn create_open_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesam.vault");
        let salt = generate_salt().unwrap();

        let mut store = VaultStore::create(&path, material(b"pw", &salt)).unwrap();
        store
            .domains_mut()
            .get_or_create("example.com", &SettingDefaults::default())
            .unwrap();
        store.save().unwrap();
        let kgk = store.kgk_vault().kgk().unwrap().clone();

        let mut reopened = VaultStore::open(&path).unwrap();
        assert!(!reopened.is_ready());
        reopened.unlock_with(material(b"pw", &salt)).unwrap();
        assert_eq!(reopened.kgk_vault().kgk().unwrap(), &kgk);
        assert_eq!(reopened.domains().domain_list(), vec!["example.com"]);
    }

    #[test]
    fn wrong_password_is_a_mismatch_after_settings_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesam.vault");
        let salt = generate_salt().unwrap();
        VaultStore::create(&path, material(b"right", &salt)).unwrap();

        let mut store = VaultStore::open(&path).unwrap();
        let err = store.unlock_with(material(b"wrong", &salt)).unwrap_err();
        assert!(matches!(err, SesamError::DecryptionMismatch));
        assert_eq!(store.kgk_vault().state(), VaultState::Absent);
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesam.vault");
        let salt = generate_salt().unwrap();
        VaultStore::create(&path, material(b"pw", &salt)).unwrap();
        assert!(matches!(
            VaultStore::create(&path, material(b"pw", &salt)),
            Err(SesamError::VaultAlreadyExists(_))
        ));
    }

    #[test]
    fn create_replacing_swaps_the_key_and_keeps_the_pin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesam.vault");
        let old_salt = generate_salt().unwrap();
        let old = VaultStore::create(&path, material(b"old", &old_salt)).unwrap();
        let old_kgk = old.kgk_vault().kgk().unwrap().clone();

        let new_salt = generate_salt().unwrap();
        let trust = old.trust().clone();
        let replaced =
            VaultStore::create_replacing(&path, material(b"new", &new_salt), trust).unwrap();
        assert_ne!(replaced.kgk_vault().kgk().unwrap(), &old_kgk);

        let mut reopened = VaultStore::open(&path).unwrap();
        assert_eq!(reopened.salt(), new_salt.as_slice());
        reopened.unlock_with(material(b"new", &new_salt)).unwrap();
        assert_eq!(
            reopened.kgk_vault().kgk().unwrap(),
            replaced.kgk_vault().kgk().unwrap()
        );
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(&dir.path().join("none.vault")).unwrap();
        assert!(!store.path().exists());
        assert!(store.stored_kgk_block().is_none());
        assert!(store.salt().is_empty());
    }

    #[test]
    fn rekey_keeps_the_kgk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sesam.vault");
        let salt = generate_salt().unwrap();
        let mut store = VaultStore::create(&path, material(b"old", &salt)).unwrap();
        let kgk = store.kgk_vault().kgk().unwrap().clone();

        let new_salt = generate_salt().unwrap();
        store.rekey(material(b"new", &new_salt)).unwrap();

        let mut reopened = VaultStore::open(&path).unwrap();
        assert_eq!(reopened.salt(), new_salt.as_slice());
        reopened.unlock_with(material(b"new", &new_salt)).unwrap();
        assert_eq!(reopened.kgk_vault().kgk().unwrap(), &kgk);
    }
}
