//! Migration Rollback - Reverts the most recent batches
//!
//! Changesets are reverted newest version first, one transaction each, with the
//! ledger row removed inside that transaction.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::info;

use crate::error::{MigrationError, MigrationResult, OrmError};
use super::definitions::{Changeset, DownResult, LedgerRecord, MigrationDirection};
use super::runner::Migrator;

impl Migrator {
    /// Revert the `steps` most recent batches
    pub async fn down(&self, steps: u32) -> MigrationResult<DownResult> {
        if steps == 0 {
            return Err(OrmError::validation("Rollback steps must be at least 1").into());
        }
        self.revert(Some(steps as usize)).await
    }

    /// Revert every applied batch
    pub async fn reset(&self) -> MigrationResult<DownResult> {
        self.revert(None).await
    }

    async fn revert(&self, steps: Option<usize>) -> MigrationResult<DownResult> {
        let start_time = Instant::now();
        let records = self.ledger.records(self.pool().as_ref()).await?;

        let mut batches: Vec<i32> = records
            .iter()
            .map(|r| r.batch)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .rev()
            .collect();
        if let Some(steps) = steps {
            batches.truncate(steps);
        }

        let mut selected: Vec<&LedgerRecord> = records.iter().filter(|r| batches.contains(&r.batch)).collect();
        selected.sort_by(|a, b| b.version.cmp(&a.version));

        if selected.is_empty() {
            info!("Nothing to roll back");
            return Ok(DownResult {
                rolled_back: Vec::new(),
                batches: Vec::new(),
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        let changesets = self.manager().discover()?;
        let by_version: HashMap<&str, &Changeset> =
            changesets.iter().map(|c| (c.version.as_str(), c)).collect();
        let mut plan = Vec::with_capacity(selected.len());
        for record in &selected {
            let changeset = by_version
                .get(record.version.as_str())
                .ok_or_else(|| MigrationError::MissingChangeset(record.version.clone()))?;
            plan.push((*changeset, record.batch));
        }

        let mut rolled_back = Vec::with_capacity(plan.len());
        for (changeset, batch) in plan {
            info!("Rolling back changeset {} (batch {})", changeset.version, batch);
            self.run_changeset(changeset, MigrationDirection::Down, batch).await?;
            rolled_back.push(changeset.version.clone());
        }

        Ok(DownResult {
            rolled_back,
            batches,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}
