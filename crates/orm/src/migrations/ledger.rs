//! Migration ledger
//!
//! The table recording which changesets are applied and in which batch. Writes
//! happen inside the changeset's own transaction so the ledger can never
//! disagree with the schema.

use tracing::debug;

use crate::backends::{DatabasePool, DatabaseRowExt, DatabaseTransaction, DatabaseValue};
use crate::error::{OrmError, OrmResult};
use crate::schema::{quote_identifier, Introspector, SchemaBuilder};
use super::definitions::LedgerRecord;

/// Ledger table in a schema namespace
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    schema: String,
    table: String,
}

impl MigrationLedger {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn qualified(&self) -> OrmResult<String> {
        Ok(format!("{}.{}", quote_identifier(&self.schema)?, quote_identifier(&self.table)?))
    }

    /// Create the ledger table if it is missing
    pub async fn ensure(&self, pool: &dyn DatabasePool) -> OrmResult<()> {
        let unavailable = |e: OrmError| {
            OrmError::configuration(format!("Migration ledger '{}' is unavailable: {}", self.table, e))
        };

        let mut tx = pool.begin_transaction().await.map_err(unavailable)?;
        let created = {
            let mut schema = SchemaBuilder::new(tx.as_mut(), self.schema.as_str());
            schema
                .create_table_if_not_exists(&self.table, |t| {
                    t.string("version", Some(255)).primary();
                    t.integer("batch").not_null();
                    t.timestamp_tz("applied_at").not_null().default_raw("CURRENT_TIMESTAMP");
                })
                .await
        };

        match created {
            Ok(created) => {
                tx.commit().await.map_err(unavailable)?;
                if created {
                    debug!("Created migration ledger {}.{}", self.schema, self.table);
                }
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!("Failed to roll back ledger creation: {}", rollback_error);
                }
                Err(unavailable(e))
            }
        }
    }

    /// Applied changesets ordered by batch then version; empty when the ledger does not exist yet
    pub async fn records(&self, pool: &dyn DatabasePool) -> OrmResult<Vec<LedgerRecord>> {
        let mut tx = pool.begin_transaction().await?;
        let result = self.read(tx.as_mut()).await;
        tx.rollback().await?;
        result
    }

    async fn read(&self, tx: &mut dyn DatabaseTransaction) -> OrmResult<Vec<LedgerRecord>> {
        if !Introspector::new(self.schema.as_str()).has_table(tx, &self.table).await? {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT \"version\", \"batch\" FROM {}", self.qualified()?);
        let mut records = Vec::new();
        for row in tx.fetch_all(&sql, &[]).await? {
            let batch = row.get_i64("batch")?;
            records.push(LedgerRecord {
                version: row.get_string("version")?,
                batch: i32::try_from(batch)
                    .map_err(|_| OrmError::execution(format!("Ledger batch {} is out of range", batch)))?,
            });
        }

        records.sort_by(|a, b| a.batch.cmp(&b.batch).then_with(|| a.version.cmp(&b.version)));
        Ok(records)
    }

    /// Record `version` as applied in `batch`
    pub async fn record(&self, tx: &mut dyn DatabaseTransaction, version: &str, batch: i32) -> OrmResult<()> {
        let sql = format!("INSERT INTO {} (\"version\", \"batch\") VALUES ($1, $2)", self.qualified()?);
        tx.execute(&sql, &[DatabaseValue::from(version), DatabaseValue::from(batch)])
            .await?;
        Ok(())
    }

    /// Remove `version` from the ledger
    pub async fn remove(&self, tx: &mut dyn DatabaseTransaction, version: &str) -> OrmResult<()> {
        let sql = format!("DELETE FROM {} WHERE \"version\" = $1", self.qualified()?);
        let removed = tx.execute(&sql, &[DatabaseValue::from(version)]).await?;
        if removed == 0 {
            return Err(OrmError::not_found(format!("Version '{}' is not in the ledger", version)));
        }
        Ok(())
    }
}

/// Highest batch number in `records`, 0 when empty
pub fn latest_batch(records: &[LedgerRecord]) -> i32 {
    records.iter().map(|r| r.batch).max().unwrap_or(0)
}
