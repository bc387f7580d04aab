//! Integration tests for the vault: persistence, rotation and migration.

use sesam::crypto::{derive_key_material, generate_salt, KeyMaterial};
use sesam::errors::SesamError;
use sesam::password::{derive_vault, password_for};
use sesam::vault::{DomainSetting, KgkVault, SettingDefaults, VaultState, VaultStore};
use tempfile::TempDir;

const ITERATIONS: u32 = 8;

/// Helper: a temporary vault file path inside a fresh temp dir.
fn vault_path() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("test.vault");
    (dir, path)
}

fn material(password: &str) -> KeyMaterial {
    let salt = generate_salt().unwrap();
    derive_key_material(password.as_bytes(), &salt, ITERATIONS).unwrap()
}

fn material_for(store: &VaultStore, password: &str) -> KeyMaterial {
    derive_key_material(password.as_bytes(), store.salt(), ITERATIONS).unwrap()
}

fn defaults() -> SettingDefaults {
    SettingDefaults {
        iterations: 16,
        ..SettingDefaults::default()
    }
}

// ---------------------------------------------------------------------------
// Create and re-open round-trip
// ---------------------------------------------------------------------------

#[test]
fn create_vault_and_reopen() {
    let (_dir, path) = vault_path();

    let mut store = VaultStore::create(&path, material("pw")).unwrap();
    store
        .domains_mut()
        .get_or_create("example.com", &defaults())
        .unwrap();
    store.save().unwrap();
    let kgk = store.kgk_vault().kgk().unwrap().clone();
    let expected = password_for(&kgk, store.domains().get("example.com").unwrap()).unwrap();

    let mut reopened = VaultStore::open(&path).unwrap();
    assert!(reopened.can_unlock());
    assert!(!reopened.is_ready());
    let m = material_for(&reopened, "pw");
    reopened.unlock_with(m).unwrap();

    assert_eq!(reopened.kgk_vault().kgk().unwrap(), &kgk);
    assert_eq!(reopened.domains().domain_list(), vec!["example.com"]);
    let setting = reopened.domains().get("example.com").unwrap();
    assert_eq!(password_for(&kgk, setting).unwrap(), expected);
}

#[test]
fn wrong_password_is_a_mismatch_and_leaves_vault_absent() {
    let (_dir, path) = vault_path();
    VaultStore::create(&path, material("pw")).unwrap();

    let mut store = VaultStore::open(&path).unwrap();
    let wrong = material_for(&store, "nope");
    assert!(matches!(
        store.unlock_with(wrong),
        Err(SesamError::DecryptionMismatch)
    ));
    assert!(!store.is_ready());
    assert_eq!(store.kgk_vault().state(), VaultState::Absent);
}

#[test]
fn missing_file_opens_as_empty_store() {
    let (_dir, path) = vault_path();
    let store = VaultStore::open(&path).unwrap();
    assert!(!store.exists());
    assert!(!store.can_unlock());
    assert!(store.domains().is_empty());
}

#[test]
fn create_refuses_existing_file() {
    let (_dir, path) = vault_path();
    VaultStore::create(&path, material("pw")).unwrap();
    assert!(matches!(
        VaultStore::create(&path, material("pw")),
        Err(SesamError::VaultAlreadyExists(_))
    ));
}

#[test]
fn corrupted_file_is_rejected() {
    let (_dir, path) = vault_path();
    std::fs::write(&path, b"definitely not a vault").unwrap();
    assert!(matches!(
        VaultStore::open(&path),
        Err(SesamError::InvalidVaultFormat(_))
    ));
}

// ---------------------------------------------------------------------------
// Master password rotation
// ---------------------------------------------------------------------------

#[test]
fn rekey_keeps_every_password() {
    let (_dir, path) = vault_path();
    let mut store = VaultStore::create(&path, material("old")).unwrap();
    store
        .domains_mut()
        .get_or_create("example.com", &defaults())
        .unwrap();
    store.save().unwrap();
    let before = password_for(
        store.kgk_vault().kgk().unwrap(),
        store.domains().get("example.com").unwrap(),
    )
    .unwrap();
    let old_salt = store.salt().to_vec();

    store.rekey(material("new")).unwrap();
    assert_ne!(store.salt(), old_salt.as_slice());

    let mut reopened = VaultStore::open(&path).unwrap();
    let stale = material_for(&reopened, "old");
    assert!(reopened.unlock_with(stale).is_err());
    let fresh = material_for(&reopened, "new");
    reopened.unlock_with(fresh).unwrap();
    let after = password_for(
        reopened.kgk_vault().kgk().unwrap(),
        reopened.domains().get("example.com").unwrap(),
    )
    .unwrap();
    assert_eq!(before, after);
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

#[test]
fn migration_preserves_old_passwords_and_uses_new_key_afterwards() {
    let (_dir, path) = vault_path();
    let mut store = VaultStore::create(&path, material("pw")).unwrap();
    for domain in ["a.example", "b.example"] {
        store.domains_mut().get_or_create(domain, &defaults()).unwrap();
    }
    store
        .domains_mut()
        .set_legacy_password("b.example", "already-pinned")
        .unwrap();

    let old_kgk = store.kgk_vault().kgk().unwrap().clone();
    let before_a = derive_vault(&old_kgk, store.domains().get("a.example").unwrap()).unwrap();

    let mut remote = KgkVault::new();
    remote.create_new().unwrap();
    let remote_kgk = remote.kgk().unwrap().clone();

    let report = store.migrate_to(remote_kgk.clone()).unwrap();
    assert_eq!(report.frozen, 1);
    assert_eq!(report.kept, 1);
    assert_eq!(store.kgk_vault().kgk().unwrap(), &remote_kgk);

    let kgk = store.kgk_vault().kgk().unwrap();
    let a = store.domains().get("a.example").unwrap();
    assert_eq!(password_for(kgk, a).unwrap(), before_a);
    let b = store.domains().get("b.example").unwrap();
    assert_eq!(password_for(kgk, b).unwrap(), "already-pinned");

    // New domains derive under the remote key.
    store.domains_mut().get_or_create("c.example", &defaults()).unwrap();
    let c: DomainSetting = store.domains().get("c.example").unwrap().clone();
    assert_eq!(
        password_for(store.kgk_vault().kgk().unwrap(), &c).unwrap(),
        derive_vault(&remote_kgk, &c).unwrap()
    );
}

#[test]
fn migrated_state_survives_save_and_reopen() {
    let (_dir, path) = vault_path();
    let mut store = VaultStore::create(&path, material("pw")).unwrap();
    store
        .domains_mut()
        .get_or_create("a.example", &defaults())
        .unwrap();
    let before = password_for(
        store.kgk_vault().kgk().unwrap(),
        store.domains().get("a.example").unwrap(),
    )
    .unwrap();

    let mut remote = KgkVault::new();
    remote.create_new().unwrap();
    store.migrate_to(remote.kgk().unwrap().clone()).unwrap();
    store.save().unwrap();

    let mut reopened = VaultStore::open(&path).unwrap();
    let m = material_for(&reopened, "pw");
    reopened.unlock_with(m).unwrap();
    let a = reopened.domains().get("a.example").unwrap();
    assert_eq!(a.legacy_password.as_deref(), Some(before.as_str()));
}
