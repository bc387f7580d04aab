//! The interactive session: one explicit context object holding the
//! master password, the current domain selection, the vault and the
//! derivation worker.
//!
//! A front end drives it through the `on_*` callbacks and reads back the
//! derived password, the domain list, a status line and whether the
//! vault is ready. Key stretching never runs inside a callback: changing
//! the master password submits a derivation to the worker and returns;
//! `poll` or `wait_until_settled` applies the result if it is still
//! current.
//!
//! Without a usable vault the session falls back to legacy mode, where
//! passwords come from the master password directly.

use tracing::{debug, info};

use crate::crypto::kdf::generate_salt;
use crate::crypto::keys::{KeyMaterial, MasterPassword};
use crate::errors::{Result, SesamError};
use crate::password::alphabet::CharacterClasses;
use crate::password::engine::{derive_legacy, password_for, LegacyRequest};
use crate::sync::engine::{SyncEngine, SyncOutcome, SyncReport};
use crate::trust::{TrustDecision, TrustPrompt};
use crate::vault::domain::SettingDefaults;
use crate::vault::VaultStore;
use crate::worker::{DerivationRunner, DerivationStatus, PendingDerivation};

/// Tunables a session is created with.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Iterations for stretching the master password into key material.
    pub kdf_iterations: u32,
    /// Defaults for new domains; `defaults.iterations` is also the
    /// baseline every regeneration counter resets to.
    pub defaults: SettingDefaults,
}

/// Current domain selection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    domain: String,
    username: String,
}

pub struct Session {
    store: VaultStore,
    runner: DerivationRunner,
    options: SessionOptions,

    master: Option<MasterPassword>,
    pending: Option<PendingDerivation>,
    selection: Option<Selection>,

    /// Policy used in legacy mode (vault mode reads it from the setting).
    complexity: u8,
    length: usize,
    /// Legacy-mode iteration count; reset whenever an input changes.
    legacy_iterations: u32,

    derived: Option<String>,
    status: String,
}

impl Session {
    pub fn new(store: VaultStore, runner: DerivationRunner, options: SessionOptions) -> Self {
        let status = if store.can_unlock() {
            "vault locked"
        } else {
            "no vault, legacy mode"
        };
        Self {
            store,
            runner,
            options,
            master: None,
            pending: None,
            selection: None,
            complexity: options.defaults.complexity,
            length: options.defaults.length,
            legacy_iterations: options.defaults.iterations,
            derived: None,
            status: status.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// The master password changed.
    ///
    /// Invalidates every in-flight derivation and, if a vault exists,
    /// submits a new one. The vault stays locked until it is applied.
    pub fn on_master_password_changed(&mut self, password: MasterPassword) -> Result<()> {
        self.runner.invalidate();
        self.pending = None;
        self.derived = None;
        self.legacy_iterations = self.options.defaults.iterations;

        if password.is_empty() {
            self.master = None;
            if self.store.can_unlock() {
                self.store.lock();
                self.store.abandon_unlock();
            }
            self.status = "master password cleared".into();
            return Ok(());
        }

        if self.store.can_unlock() {
            self.store.lock();
            let pending = self.runner.submit(
                &password,
                self.store.salt(),
                self.options.kdf_iterations,
            )?;
            debug!(token = pending.token(), "submitted vault key derivation");
            self.pending = Some(pending);
            self.status = "unlocking vault".into();
        }
        self.master = Some(password);
        self.refresh()
    }

    /// Apply a finished derivation, if any. Returns `true` while one is
    /// still running.
    pub fn poll(&mut self) -> Result<bool> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(false);
        };
        let status = pending.poll();
        if matches!(status, Ok(DerivationStatus::Pending)) {
            return Ok(true);
        }
        self.pending = None;
        self.apply(status)?;
        Ok(false)
    }

    /// Wait for the in-flight derivation and apply it.
    pub async fn wait_until_settled(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            let status = pending.wait().await;
            self.apply(status)?;
        }
        Ok(())
    }

    /// The user picked a domain (and username).
    pub fn on_domain_committed(&mut self, domain: &str, username: &str) -> Result<()> {
        let domain = domain.trim();
        if domain.is_empty() {
            self.derived = None;
            return Err(SesamError::InvalidInput("domain must not be empty".into()));
        }
        let selection = Selection {
            domain: domain.to_string(),
            username: username.to_string(),
        };
        if self.selection.as_ref() != Some(&selection) {
            self.legacy_iterations = self.options.defaults.iterations;
        }

        if self.store.is_ready() {
            let defaults = self.options.defaults;
            let baseline = defaults.iterations;
            let created = !self.store.domains().contains(domain);
            let domains = self.store.domains_mut();
            domains.get_or_create(domain, &defaults)?;
            let changed = domains.set_username(domain, username, baseline)?;
            if created || changed {
                self.store.save()?;
            }
            if let Some(setting) = self.store.domains().get(domain) {
                self.complexity = setting.complexity;
                self.length = setting.length;
            }
        }

        self.selection = Some(selection);
        self.refresh()
    }

    /// The user changed complexity or length.
    pub fn on_policy_changed(&mut self, complexity: u8, length: usize) -> Result<()> {
        CharacterClasses::from_complexity(complexity)?;
        if length == 0 {
            return Err(SesamError::InvalidPolicy("length must be at least 1".into()));
        }
        if (complexity, length) != (self.complexity, self.length) {
            self.legacy_iterations = self.options.defaults.iterations;
        }
        self.complexity = complexity;
        self.length = length;

        if let (true, Some(selection)) = (self.store.is_ready(), &self.selection) {
            let baseline = self.options.defaults.iterations;
            let domain = selection.domain.clone();
            if self
                .store
                .domains_mut()
                .set_policy(&domain, complexity, length, baseline)?
            {
                self.store.save()?;
            }
        }
        self.refresh()
    }

    /// Ask for a different password for the current domain.
    pub fn regenerate(&mut self) -> Result<()> {
        let Some(selection) = &self.selection else {
            return Err(SesamError::InvalidInput("no domain selected".into()));
        };
        if self.store.is_ready() {
            let domain = selection.domain.clone();
            let iterations = self.store.domains_mut().bump_iterations(&domain)?;
            self.store.save()?;
            debug!(%domain, iterations, "regenerated");
        } else {
            self.legacy_iterations = self.legacy_iterations.checked_add(1).ok_or_else(|| {
                SesamError::InvalidPolicy("iteration count exhausted".into())
            })?;
        }
        self.refresh()
    }

    /// Pull, reconcile and push.
    pub async fn on_sync_requested(&mut self, engine: &SyncEngine) -> Result<SyncReport> {
        self.wait_until_settled().await?;
        let master = self
            .master
            .clone()
            .ok_or_else(|| SesamError::InvalidInput("master password required to sync".into()))?;

        match engine.sync(&mut self.store, &master, &self.runner).await {
            Ok(report) => {
                self.status = describe_sync(&report);
                self.refresh()?;
                Ok(report)
            }
            Err(e) => {
                self.status = format!("sync failed: {e}");
                Err(e)
            }
        }
    }

    /// Decide whether to trust the certificate chain `host` presented,
    /// leaf first.
    pub fn on_certificate_presented(
        &mut self,
        host: &str,
        chain: &[Vec<u8>],
        prompt: &mut dyn TrustPrompt,
    ) -> Result<TrustDecision> {
        match self.store.trust_mut().decide(host, chain, prompt) {
            Ok(decision) => {
                if let TrustDecision::NewlyPinned { fingerprint } = &decision {
                    self.status = format!("trusted certificate {fingerprint}");
                    self.store.save()?;
                }
                Ok(decision)
            }
            Err(e) => {
                self.status = format!("certificate rejected: {e}");
                Err(e)
            }
        }
    }

    /// The configured sync server moved to `host`.
    pub fn on_endpoint_changed(&mut self, host: &str) -> Result<bool> {
        let cleared = self.store.trust_mut().on_endpoint_changed(host);
        if cleared {
            self.status = "server changed, certificate must be trusted again".into();
            self.store.save()?;
        }
        Ok(cleared)
    }

    /// Create a fresh vault with a new KGK under the current master
    /// password. With `force` an existing KGK is replaced; the pinned
    /// certificate is kept either way.
    pub async fn create_vault(&mut self, force: bool) -> Result<()> {
        let master = self.require_master()?;
        let path = self.store.path().to_path_buf();
        if self.store.stored_kgk_block().is_some() && !force {
            return Err(SesamError::VaultAlreadyExists(path));
        }

        self.runner.invalidate();
        self.pending = None;
        let salt = generate_salt()?;
        let material = self
            .runner
            .derive_now(&master, &salt, self.options.kdf_iterations)
            .await?;

        let trust = self.store.trust().clone();
        self.store = VaultStore::create_replacing(&path, material, trust)?;
        self.status = "vault ready".into();
        self.reapply_selection()?;
        self.refresh()
    }

    /// Re-encrypt the vault under a new master password.
    pub async fn change_master_password(&mut self, new_password: MasterPassword) -> Result<()> {
        self.wait_until_settled().await?;
        if !self.store.is_ready() {
            return Err(SesamError::VaultNotReady("unlock the vault first".into()));
        }
        if new_password.is_empty() {
            return Err(SesamError::InvalidInput(
                "master password must not be empty".into(),
            ));
        }
        let salt = generate_salt()?;
        let material = self
            .runner
            .derive_now(&new_password, &salt, self.options.kdf_iterations)
            .await?;
        self.store.rekey(material)?;
        self.master = Some(new_password);
        self.status = "master password changed".into();
        info!("master password rotated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound reads
    // ------------------------------------------------------------------

    pub fn derived_password(&self) -> Option<&str> {
        self.derived.as_deref()
    }

    /// Known domains in insertion order.
    pub fn domain_list(&self) -> Vec<String> {
        self.store.domains().domain_list()
    }

    /// Human-readable state of the last unlock, sync or trust decision.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn vault_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Whether passwords currently come from the master password.
    pub fn legacy_mode(&self) -> bool {
        !self.store.is_ready() && self.pending.is_none()
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VaultStore {
        &mut self.store
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn apply(&mut self, status: Result<DerivationStatus<KeyMaterial>>) -> Result<()> {
        match status {
            Ok(DerivationStatus::Applied(material)) => match self.store.unlock_with(material) {
                Ok(()) => {
                    self.status = "vault ready".into();
                    info!(domains = self.store.domains().len(), "vault unlocked");
                    self.reapply_selection()?;
                    self.refresh()
                }
                Err(e) => {
                    self.status = format!("unlock failed: {e}");
                    Err(e)
                }
            },
            Ok(DerivationStatus::Stale) => {
                debug!("discarded stale derivation");
                Ok(())
            }
            Ok(DerivationStatus::Pending) => Ok(()),
            Err(e) => {
                self.store.abandon_unlock();
                self.status = format!("unlock failed: {e}");
                Err(e)
            }
        }
    }

    /// After unlocking, make sure the selected domain has a setting.
    fn reapply_selection(&mut self) -> Result<()> {
        if let Some(selection) = self.selection.clone() {
            self.on_domain_committed(&selection.domain, &selection.username)?;
        }
        Ok(())
    }

    fn require_master(&self) -> Result<MasterPassword> {
        self.master
            .clone()
            .ok_or_else(|| SesamError::InvalidInput("master password required".into()))
    }

    /// Recompute the derived password from the current inputs.
    fn refresh(&mut self) -> Result<()> {
        self.derived = None;
        let (Some(master), Some(selection)) = (&self.master, &self.selection) else {
            return Ok(());
        };

        if self.store.is_ready() {
            let kgk = self.store.kgk_vault().kgk()?;
            let Some(setting) = self.store.domains().get(&selection.domain) else {
                return Ok(());
            };
            self.derived = Some(password_for(kgk, setting)?);
            return Ok(());
        }
        if self.pending.is_some() {
            return Ok(());
        }

        let classes = CharacterClasses::from_complexity(self.complexity)?;
        let password = derive_legacy(&LegacyRequest {
            master_password: master,
            domain: &selection.domain,
            username: &selection.username,
            classes,
            length: self.length,
            iterations: self.legacy_iterations,
        })?;
        self.derived = Some(password);
        Ok(())
    }
}

fn describe_sync(report: &SyncReport) -> String {
    match report.outcome {
        SyncOutcome::Uploaded => format!("synced, uploaded {} domains", report.domains),
        SyncOutcome::Merged(merge) if merge.is_noop() => "synced, already up to date".into(),
        SyncOutcome::Merged(merge) | SyncOutcome::Adopted(merge) => format!(
            "synced, {} new and {} updated domains",
            merge.added, merge.updated
        ),
        SyncOutcome::Migrated { migration, .. } => format!(
            "synced, switched to the server's key; {} passwords kept as legacy passwords",
            migration.frozen
        ),
    }
}
