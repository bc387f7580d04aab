//! Integration tests for password derivation.

use sesam::crypto::keys::{Kgk, MasterPassword};
use sesam::password::alphabet::{CharacterClasses, DIGITS, LOWERCASE, MAX_COMPLEXITY};
use sesam::password::{derive_legacy, derive_vault, password_for, LegacyRequest};
use sesam::vault::{DomainSetting, SettingDefaults};

fn setting(domain: &str, complexity: u8, length: usize) -> DomainSetting {
    let mut s = DomainSetting::new(
        domain,
        &SettingDefaults {
            iterations: 32,
            length,
            complexity,
        },
    )
    .unwrap();
    s.username = "alice".into();
    s
}

fn legacy(master: &MasterPassword, domain: &str, complexity: u8, length: usize) -> String {
    derive_legacy(&LegacyRequest {
        master_password: master,
        domain,
        username: "alice",
        classes: CharacterClasses::from_complexity(complexity).unwrap(),
        length,
        iterations: 32,
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn vault_mode_is_deterministic() {
    let kgk = Kgk::generate().unwrap();
    let s = setting("example.com", MAX_COMPLEXITY, 16);
    assert_eq!(derive_vault(&kgk, &s).unwrap(), derive_vault(&kgk, &s).unwrap());
}

#[test]
fn legacy_mode_is_deterministic() {
    let master = MasterPassword::new("secret");
    assert_eq!(
        legacy(&master, "example.com", 6, 12),
        legacy(&master, "example.com", 6, 12)
    );
}

#[test]
fn every_input_changes_the_vault_password() {
    let kgk = Kgk::generate().unwrap();
    let base = setting("example.com", MAX_COMPLEXITY, 16);
    let reference = derive_vault(&kgk, &base).unwrap();

    let mut other_user = base.clone();
    other_user.username = "bob".into();
    assert_ne!(derive_vault(&kgk, &other_user).unwrap(), reference);

    let mut bumped = base.clone();
    bumped.iterations += 1;
    assert_ne!(derive_vault(&kgk, &bumped).unwrap(), reference);

    let other_domain = setting("example.org", MAX_COMPLEXITY, 16);
    assert_ne!(derive_vault(&kgk, &other_domain).unwrap(), reference);

    assert_ne!(derive_vault(&Kgk::generate().unwrap(), &base).unwrap(), reference);
}

#[test]
fn per_domain_salt_separates_identical_settings() {
    let kgk = Kgk::generate().unwrap();
    let a = setting("example.com", MAX_COMPLEXITY, 16);
    let b = setting("example.com", MAX_COMPLEXITY, 16);
    assert_ne!(a.salt, b.salt);
    assert_ne!(derive_vault(&kgk, &a).unwrap(), derive_vault(&kgk, &b).unwrap());
}

// ---------------------------------------------------------------------------
// Alphabet conformance and length
// ---------------------------------------------------------------------------

#[test]
fn every_complexity_stays_inside_its_alphabet() {
    let kgk = Kgk::generate().unwrap();
    for complexity in 0..=MAX_COMPLEXITY {
        let alphabet = CharacterClasses::from_complexity(complexity)
            .unwrap()
            .alphabet()
            .unwrap();
        let password = derive_vault(&kgk, &setting("example.com", complexity, 24)).unwrap();
        assert_eq!(password.chars().count(), 24, "complexity {complexity}");
        assert!(
            password.chars().all(|c| alphabet.contains(&c)),
            "complexity {complexity} produced {password}"
        );
    }
}

#[test]
fn digits_only_and_lowercase_only() {
    let kgk = Kgk::generate().unwrap();
    let digits = derive_vault(&kgk, &setting("pin.example", 0, 8)).unwrap();
    assert!(digits.chars().all(|c| DIGITS.contains(c)));

    let lower = derive_vault(&kgk, &setting("lower.example", 1, 8)).unwrap();
    assert!(lower.chars().all(|c| LOWERCASE.contains(c)));
}

#[test]
fn longer_password_extends_the_shorter_one() {
    let kgk = Kgk::generate().unwrap();
    let short = setting("example.com", MAX_COMPLEXITY, 8);
    let mut long = short.clone();
    long.length = 20;
    let a = derive_vault(&kgk, &short).unwrap();
    let b = derive_vault(&kgk, &long).unwrap();
    assert!(b.starts_with(&a));
}

#[test]
fn legacy_and_vault_modes_differ() {
    let master = MasterPassword::new("secret");
    let kgk = Kgk::generate().unwrap();
    assert_ne!(
        legacy(&master, "example.com", 6, 16),
        derive_vault(&kgk, &setting("example.com", 6, 16)).unwrap()
    );
}

#[test]
fn frozen_password_wins() {
    let kgk = Kgk::generate().unwrap();
    let mut s = setting("example.com", MAX_COMPLEXITY, 16);
    s.legacy_password = Some("kept-from-before".into());
    assert_eq!(password_for(&kgk, &s).unwrap(), "kept-from-before");
}

#[test]
fn empty_domain_is_rejected() {
    let master = MasterPassword::new("secret");
    let result = derive_legacy(&LegacyRequest {
        master_password: &master,
        domain: "",
        username: "alice",
        classes: CharacterClasses::ALL,
        length: 10,
        iterations: 32,
    });
    assert!(result.is_err());
}
