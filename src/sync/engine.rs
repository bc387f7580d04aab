//! Sync engine: pull, reconcile the KGK, merge settings, push.
//!
//! The server holds a single blob. One sync cycle:
//!
//! 1. Read the remote blob.
//! 2. If it carries a usable KGK, decrypt it with key material for the
//!    remote salt, open its settings and reconcile with the local vault:
//!    - no current-format local KGK: adopt the remote KGK;
//!    - a current-format local KGK that is still locked: refuse;
//!    - same KGK: merge settings;
//!    - different KGK and local domains exist: freeze every local
//!      password, switch to the remote KGK, merge;
//!    - different KGK and nothing local: adopt.
//! 3. Push the resulting state and persist it.
//!
//! Failing to open the remote settings aborts the cycle before anything is
//! pushed, so a wrong master password never overwrites the server.

use tracing::{info, warn};

use super::blob::SyncBlob;
use super::transport::SyncTransport;
use crate::crypto::keys::MasterPassword;
use crate::errors::{Result, SesamError};
use crate::vault::domain::MergeReport;
use crate::vault::kgk::{KgkVault, MigrationReport};
use crate::vault::store::open_settings;
use crate::vault::VaultStore;
use crate::worker::DerivationRunner;

/// What a sync cycle did to the local vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server had nothing usable; local state was uploaded.
    Uploaded,
    /// Same KGK on both sides; settings merged.
    Merged(MergeReport),
    /// The remote KGK was taken over as is.
    Adopted(MergeReport),
    /// Local passwords were frozen before switching to the remote KGK.
    Migrated {
        migration: MigrationReport,
        merge: MergeReport,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub domains: usize,
}

/// Orchestrates one pull/reconcile/push cycle.
pub struct SyncEngine {
    transport: Box<dyn SyncTransport>,
    kdf_iterations: u32,
}

impl SyncEngine {
    pub fn new(transport: Box<dyn SyncTransport>, kdf_iterations: u32) -> Self {
        Self {
            transport,
            kdf_iterations,
        }
    }

    /// Run a full sync cycle against `store`.
    ///
    /// `store` is borrowed exclusively for the whole cycle, so no other
    /// change can interleave between pull and push.
    pub async fn sync(
        &self,
        store: &mut VaultStore,
        master: &MasterPassword,
        runner: &DerivationRunner,
    ) -> Result<SyncReport> {
        let remote = match self.transport.read().await? {
            Some(data) => Some(SyncBlob::decode(&data)?),
            None => None,
        };

        let outcome = match remote {
            Some(blob) if blob.has_usable_kgk() => {
                self.reconcile(store, master, runner, blob).await?
            }
            other => {
                require_unlocked(store)?;
                if !store.is_ready() {
                    return Err(SesamError::VaultNotReady(
                        "neither a local nor a usable remote vault exists".into(),
                    ));
                }
                if other.is_some() {
                    warn!("remote blob has no usable KGK, replacing it");
                }
                SyncOutcome::Uploaded
            }
        };

        let blob = SyncBlob::from_store(store)?;
        self.transport.write(&blob.encode()?).await?;

        store.domains_mut().mark_all_clean();
        store.record_sync();
        store.save()?;

        let report = SyncReport {
            outcome,
            domains: store.domains().len(),
        };
        info!(?report.outcome, domains = report.domains, "sync finished");
        Ok(report)
    }

    async fn reconcile(
        &self,
        store: &mut VaultStore,
        master: &MasterPassword,
        runner: &DerivationRunner,
        blob: SyncBlob,
    ) -> Result<SyncOutcome> {
        require_unlocked(store)?;
        let material = match store.key_material() {
            Some(local) if local.salt() == blob.salt.as_slice() => local.clone(),
            _ => {
                runner
                    .derive_now(master, &blob.salt, self.kdf_iterations)
                    .await?
            }
        };

        let block = blob
            .kgk_block
            .as_ref()
            .ok_or_else(|| SesamError::InvalidVaultFormat("remote blob has no KGK".into()))?;
        let remote_kgk = KgkVault::decrypt(block, &material)?;
        let remote_settings = open_settings(&remote_kgk, &blob.settings)?;

        if !store.is_ready() {
            info!("no local KGK, adopting remote vault");
            store.adopt(remote_kgk);
            store.set_key_material(material);
            let merge = store.domains_mut().merge_remote(remote_settings);
            return Ok(SyncOutcome::Adopted(merge));
        }

        if store.kgk_vault().kgk()? == &remote_kgk {
            let merge = store.domains_mut().merge_remote(remote_settings);
            return Ok(SyncOutcome::Merged(merge));
        }

        if store.domains().is_empty() {
            info!("remote KGK differs and nothing local depends on ours, adopting");
            store.adopt(remote_kgk);
            store.set_key_material(material);
            let merge = store.domains_mut().merge_remote(remote_settings);
            return Ok(SyncOutcome::Adopted(merge));
        }

        warn!(
            domains = store.domains().len(),
            "remote KGK differs, freezing local passwords before switching"
        );
        let migration = store
            .migrate_to(remote_kgk)
            .map_err(|e| SesamError::SyncConflict(format!("KGK migration failed: {e}")))?;
        store.set_key_material(material);
        let merge = store.domains_mut().merge_remote(remote_settings);
        Ok(SyncOutcome::Migrated { migration, merge })
    }
}

/// A current-format KGK on disk may only change through migration, which
/// needs it decrypted.
fn require_unlocked(store: &VaultStore) -> Result<()> {
    if !store.is_ready() && store.can_unlock() {
        return Err(SesamError::VaultNotReady("unlock the local vault first".into()));
    }
    Ok(())
}
