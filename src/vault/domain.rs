//! Per-domain derivation settings and the insertion-ordered store.
//!
//! Each `DomainSetting` carries its own salt so vault-mode passwords for
//! different sites never share stretching input. Settings are serialized
//! as JSON inside the sealed settings payload; `dirty` is runtime-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::format::{base64_decode, base64_encode};
use crate::crypto::kdf::generate_salt;
use crate::errors::{Result, SesamError};
use crate::password::alphabet::MAX_COMPLEXITY;

/// Defaults applied to a domain on first use.
#[derive(Debug, Clone, Copy)]
pub struct SettingDefaults {
    pub iterations: u32,
    pub length: usize,
    pub complexity: u8,
}

impl Default for SettingDefaults {
    fn default() -> Self {
        Self {
            iterations: crate::password::DEFAULT_ITERATIONS,
            length: 10,
            complexity: MAX_COMPLEXITY,
        }
    }
}

/// Derivation policy of one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSetting {
    pub domain: String,

    #[serde(default)]
    pub username: String,

    /// Per-domain PBKDF2 salt (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    pub iterations: u32,
    pub length: usize,
    pub complexity: u8,

    /// Frozen password that takes precedence over derivation until cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_password: Option<String>,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,

    /// Changed locally since the last successful sync.
    #[serde(skip)]
    pub dirty: bool,
}

impl DomainSetting {
    /// Create a setting with a fresh random salt.
    pub fn new(domain: &str, defaults: &SettingDefaults) -> Result<Self> {
        validate_domain(domain)?;
        let now = Utc::now();
        Ok(Self {
            domain: domain.to_string(),
            username: String::new(),
            salt: generate_salt()?.to_vec(),
            iterations: defaults.iterations,
            length: defaults.length,
            complexity: defaults.complexity,
            legacy_password: None,
            created_at: now,
            modified_at: now,
            dirty: true,
        })
    }

    fn touch(&mut self) {
        self.modified_at = Utc::now();
        self.dirty = true;
    }

    /// Equal in everything that is persisted.
    fn same_content(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.username == other.username
            && self.salt == other.salt
            && self.iterations == other.iterations
            && self.length == other.length
            && self.complexity == other.complexity
            && self.legacy_password == other.legacy_password
            && self.created_at == other.created_at
            && self.modified_at == other.modified_at
    }
}

/// What a merge of remote settings changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0
    }
}

/// All domain settings, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct DomainSettingsStore {
    entries: Vec<DomainSetting>,
}

impl DomainSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries (all clean).
    pub fn from_entries(entries: Vec<DomainSetting>) -> Self {
        let mut store = Self::new();
        for mut entry in entries {
            entry.dirty = false;
            match store.position(&entry.domain) {
                Some(i) => store.entries[i] = entry,
                None => store.entries.push(entry),
            }
        }
        store
    }

    pub fn get(&self, domain: &str) -> Option<&DomainSetting> {
        self.entries.iter().find(|e| e.domain == domain)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.position(domain).is_some()
    }

    /// Return the setting for `domain`, creating it on first use.
    pub fn get_or_create(
        &mut self,
        domain: &str,
        defaults: &SettingDefaults,
    ) -> Result<&mut DomainSetting> {
        validate_domain(domain)?;
        let index = match self.position(domain) {
            Some(i) => i,
            None => {
                self.entries.push(DomainSetting::new(domain, defaults)?);
                self.entries.len() - 1
            }
        };
        Ok(&mut self.entries[index])
    }

    /// Change the username, resetting the iteration count to
    /// `baseline_iterations`. Returns `true` if anything changed.
    pub fn set_username(
        &mut self,
        domain: &str,
        username: &str,
        baseline_iterations: u32,
    ) -> Result<bool> {
        let entry = self.entry_mut(domain)?;
        if entry.username == username {
            return Ok(false);
        }
        entry.username = username.to_string();
        entry.iterations = baseline_iterations;
        entry.touch();
        Ok(true)
    }

    /// Change length and complexity, resetting the iteration count to
    /// `baseline_iterations`. Returns `true` if anything changed.
    pub fn set_policy(
        &mut self,
        domain: &str,
        complexity: u8,
        length: usize,
        baseline_iterations: u32,
    ) -> Result<bool> {
        if complexity > MAX_COMPLEXITY {
            return Err(SesamError::InvalidPolicy(format!(
                "complexity must be between 0 and {MAX_COMPLEXITY} (got {complexity})"
            )));
        }
        if length == 0 {
            return Err(SesamError::InvalidPolicy("length must be at least 1".into()));
        }
        let entry = self.entry_mut(domain)?;
        if entry.complexity == complexity && entry.length == length {
            return Ok(false);
        }
        entry.complexity = complexity;
        entry.length = length;
        entry.iterations = baseline_iterations;
        entry.touch();
        Ok(true)
    }

    /// Ask for a different password: bump the iteration count by one.
    pub fn bump_iterations(&mut self, domain: &str) -> Result<u32> {
        let entry = self.entry_mut(domain)?;
        entry.iterations = entry.iterations.checked_add(1).ok_or_else(|| {
            SesamError::InvalidPolicy("iteration count exhausted for this domain".into())
        })?;
        entry.touch();
        Ok(entry.iterations)
    }

    /// Explicitly set (or replace) the legacy password.
    pub fn set_legacy_password(&mut self, domain: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(SesamError::InvalidInput(
                "legacy password must not be empty".into(),
            ));
        }
        let entry = self.entry_mut(domain)?;
        entry.legacy_password = Some(password.to_string());
        entry.touch();
        Ok(())
    }

    /// Freeze `password` as the legacy password unless one is already set.
    /// Returns `true` if it was stored.
    pub fn freeze_legacy_password(&mut self, domain: &str, password: String) -> Result<bool> {
        let entry = self.entry_mut(domain)?;
        if entry.legacy_password.is_some() {
            return Ok(false);
        }
        entry.legacy_password = Some(password);
        entry.touch();
        Ok(true)
    }

    /// Drop the legacy password so the domain derives again.
    pub fn clear_legacy_password(&mut self, domain: &str) -> Result<bool> {
        let entry = self.entry_mut(domain)?;
        if entry.legacy_password.take().is_none() {
            return Ok(false);
        }
        entry.touch();
        Ok(true)
    }

    /// Union remote settings into this store.
    ///
    /// The server wins on metadata for domains both sides know; local
    /// domains the server lacks are kept. A local legacy password survives
    /// when the remote entry carries none.
    pub fn merge_remote(&mut self, remote: Vec<DomainSetting>) -> MergeReport {
        let mut report = MergeReport::default();
        for mut incoming in remote {
            incoming.dirty = false;
            match self.position(&incoming.domain) {
                Some(i) => {
                    let local = &mut self.entries[i];
                    if incoming.legacy_password.is_none() && local.legacy_password.is_some() {
                        incoming.legacy_password = local.legacy_password.clone();
                        incoming.dirty = true;
                    }
                    if !local.same_content(&incoming) {
                        report.updated += 1;
                    }
                    *local = incoming;
                }
                None => {
                    self.entries.push(incoming);
                    report.added += 1;
                }
            }
        }
        report
    }

    /// Domain names in insertion order.
    pub fn domain_list(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.domain.clone()).collect()
    }

    pub fn entries(&self) -> &[DomainSetting] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_dirty(&self) -> bool {
        self.entries.iter().any(|e| e.dirty)
    }

    pub fn mark_all_clean(&mut self) {
        for entry in &mut self.entries {
            entry.dirty = false;
        }
    }

    fn position(&self, domain: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.domain == domain)
    }

    fn entry_mut(&mut self, domain: &str) -> Result<&mut DomainSetting> {
        validate_domain(domain)?;
        let index = self
            .position(domain)
            .ok_or_else(|| SesamError::InvalidInput(format!("unknown domain '{domain}'")))?;
        Ok(&mut self.entries[index])
    }
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.trim().is_empty() {
        return Err(SesamError::InvalidInput("domain must not be empty".into()));
    }
    Ok(())
}
