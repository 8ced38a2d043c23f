//! Migration Runner - Applies changesets and reports status
//!
//! Every changeset runs in its own transaction together with its ledger write.
//! A failing changeset is rolled back on its own; changesets applied before it
//! in the same run stay committed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use keel_core::MigrationSettings;
use tracing::{debug, error, info, warn};

use crate::backends::{DatabasePool, DatabasePoolConfig, DatabaseTransaction, PostgresPool};
use crate::error::{MigrationError, MigrationResult, OrmResult};
use super::definitions::{
    Changeset, ChangesetTemplate, LedgerRecord, MigrationConfig, MigrationDirection, StatusReport, UpResult,
};
use super::ledger::{latest_batch, MigrationLedger};
use super::manager::MigrationManager;

/// Applies, reverts and reports changesets against one database
pub struct Migrator {
    pool: Arc<dyn DatabasePool>,
    manager: MigrationManager,
    pub(super) ledger: MigrationLedger,
}

impl Migrator {
    pub fn new(pool: Arc<dyn DatabasePool>, config: MigrationConfig) -> Self {
        let ledger = MigrationLedger::new(config.schema.clone(), config.ledger_table.clone());
        Self {
            pool,
            manager: MigrationManager::with_config(config),
            ledger,
        }
    }

    /// Connect to PostgreSQL at `database_url`
    pub async fn connect(database_url: &str, config: MigrationConfig) -> OrmResult<Self> {
        let pool = PostgresPool::connect(database_url, DatabasePoolConfig::default()).await?;
        Ok(Self::new(Arc::new(pool), config))
    }

    /// Connect using loaded settings; fails when no database URL is configured
    pub async fn from_settings(settings: &MigrationSettings) -> OrmResult<Self> {
        let database_url = settings.require_database_url()?;
        Self::connect(database_url, MigrationConfig::from_settings(settings)).await
    }

    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    pub fn config(&self) -> &MigrationConfig {
        self.manager.config()
    }

    /// Add a changeset defined in code
    pub fn register(&mut self, changeset: Changeset) -> &mut Self {
        self.manager.register(changeset);
        self
    }

    /// Create the ledger table
    pub async fn init(&self) -> MigrationResult<()> {
        self.ledger.ensure(self.pool.as_ref()).await?;
        info!("Migration ledger '{}' is ready", self.ledger.table());
        Ok(())
    }

    /// Apply every pending changeset in version order under one new batch
    pub async fn up(&self) -> MigrationResult<UpResult> {
        let start_time = Instant::now();
        let changesets = self.manager.discover()?;
        self.ledger.ensure(self.pool.as_ref()).await?;

        let records = self.ledger.records(self.pool.as_ref()).await?;
        let applied: HashSet<&str> = records.iter().map(|r| r.version.as_str()).collect();
        let pending: Vec<&Changeset> = changesets
            .iter()
            .filter(|c| !applied.contains(c.version.as_str()))
            .collect();
        let skipped_count = changesets.len() - pending.len();

        if pending.is_empty() {
            info!("Nothing to migrate");
            return Ok(UpResult {
                batch: None,
                applied: Vec::new(),
                skipped_count,
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        let batch = latest_batch(&records) + 1;
        let mut applied_versions = Vec::new();

        for changeset in pending {
            info!("Applying changeset {} (batch {})", changeset.version, batch);
            self.run_changeset(changeset, MigrationDirection::Up, batch).await?;
            applied_versions.push(changeset.version.clone());
        }

        Ok(UpResult {
            batch: Some(batch),
            applied: applied_versions,
            skipped_count,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Applied, pending and orphaned versions; never writes
    pub async fn status(&self) -> MigrationResult<StatusReport> {
        let changesets = self.manager.discover()?;
        let known: HashSet<&str> = changesets.iter().map(|c| c.version.as_str()).collect();

        let mut records = self.ledger.records(self.pool.as_ref()).await?;
        records.sort_by(|a, b| a.version.cmp(&b.version));
        let applied_versions: HashSet<&str> = records.iter().map(|r| r.version.as_str()).collect();

        let pending = changesets
            .iter()
            .filter(|c| !applied_versions.contains(c.version.as_str()))
            .map(|c| c.version.clone())
            .collect();
        let (applied, orphaned): (Vec<LedgerRecord>, Vec<LedgerRecord>) = records
            .iter()
            .cloned()
            .partition(|r| known.contains(r.version.as_str()));

        Ok(StatusReport {
            applied,
            pending,
            orphaned,
        })
    }

    /// Write a new changeset file from `template`; returns its filename
    pub fn create_changeset(&self, name: &str, template: &ChangesetTemplate) -> MigrationResult<String> {
        self.manager.create_changeset(name, template)
    }

    /// Run one direction of a changeset and its ledger write in a single transaction
    pub(super) async fn run_changeset(
        &self,
        changeset: &Changeset,
        direction: MigrationDirection,
        batch: i32,
    ) -> MigrationResult<()> {
        let failed = |source| MigrationError::ChangesetFailed {
            version: changeset.version.clone(),
            direction,
            source,
        };

        let mut tx = self.pool.begin_transaction().await.map_err(failed)?;
        match self.apply_step(tx.as_mut(), changeset, direction, batch).await {
            Ok(()) => {
                tx.commit().await.map_err(failed)?;
                debug!("Committed changeset {} ({})", changeset.version, direction);
                Ok(())
            }
            Err(source) => {
                error!("Changeset {} failed ({}): {}", changeset.version, direction, source);
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Failed to roll back changeset {}: {}", changeset.version, rollback_error);
                }
                Err(failed(source))
            }
        }
    }

    async fn apply_step(
        &self,
        tx: &mut dyn DatabaseTransaction,
        changeset: &Changeset,
        direction: MigrationDirection,
        batch: i32,
    ) -> OrmResult<()> {
        changeset
            .step(direction)
            .run(&mut *tx, &self.config().schema)
            .await?;

        match direction {
            MigrationDirection::Up => self.ledger.record(tx, &changeset.version, batch).await,
            MigrationDirection::Down => self.ledger.remove(tx, &changeset.version).await,
        }
    }
}
