use std::path::Path;

use anyhow::{bail, Context};
use keel_core::{ConfigLoader, MigrationSettings};
use keel_orm::migrations::{ChangesetTemplate, MigrationConfig, MigrationManager, Migrator, StatusReport};

/// Template selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateChoice {
    Sql,
    CreateTable,
    AlterTable,
}

pub fn load_settings(root: &Path, database_url: Option<String>) -> anyhow::Result<MigrationSettings> {
    let mut settings = ConfigLoader::discover(root)
        .load()
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;

    if database_url.is_some() {
        settings.database_url = database_url;
        settings.validate()?;
    }
    if settings.migrations_dir.is_relative() {
        settings.migrations_dir = root.join(&settings.migrations_dir);
    }
    Ok(settings)
}

pub fn template(choice: TemplateChoice, table: Option<String>) -> anyhow::Result<ChangesetTemplate> {
    Ok(match (choice, table) {
        (TemplateChoice::Sql, None) => ChangesetTemplate::Sql,
        (TemplateChoice::Sql, Some(_)) => bail!("--table only applies to the create-table and alter-table templates"),
        (TemplateChoice::CreateTable, Some(table)) => ChangesetTemplate::CreateTable { table },
        (TemplateChoice::AlterTable, Some(table)) => ChangesetTemplate::AlterTable { table },
        (_, None) => bail!("--table is required for this template"),
    })
}

async fn connect(settings: &MigrationSettings) -> anyhow::Result<Migrator> {
    Migrator::from_settings(settings)
        .await
        .context("Failed to connect to the database")
}

pub async fn init(settings: &MigrationSettings) -> anyhow::Result<()> {
    connect(settings).await?.init().await?;
    println!("Ledger table {}.{} is ready", settings.schema, settings.ledger_table);
    Ok(())
}

pub async fn up(settings: &MigrationSettings) -> anyhow::Result<()> {
    let result = connect(settings).await?.up().await?;

    match result.batch {
        None => println!("Nothing to migrate"),
        Some(batch) => {
            println!("Batch {}:", batch);
            for version in &result.applied {
                println!("  applied {}", version);
            }
        }
    }
    println!("Done in {}ms", result.execution_time_ms);
    Ok(())
}

pub async fn down(settings: &MigrationSettings, steps: u32) -> anyhow::Result<()> {
    let result = connect(settings).await?.down(steps).await?;
    print_rolled_back(&result.rolled_back);
    Ok(())
}

pub async fn reset(settings: &MigrationSettings) -> anyhow::Result<()> {
    let result = connect(settings).await?.reset().await?;
    print_rolled_back(&result.rolled_back);
    Ok(())
}

fn print_rolled_back(versions: &[String]) {
    if versions.is_empty() {
        println!("Nothing to roll back");
    }
    for version in versions {
        println!("  rolled back {}", version);
    }
}

pub async fn status(settings: &MigrationSettings, json: bool) -> anyhow::Result<()> {
    let report = connect(settings).await?.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }
    Ok(())
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::from("Migration Status:\n================\n");
    if report.applied.is_empty() && report.pending.is_empty() && report.orphaned.is_empty() {
        out.push_str("No changesets found\n");
        return out;
    }
    for record in &report.applied {
        out.push_str(&format!("  [applied, batch {}] {}\n", record.batch, record.version));
    }
    for version in &report.pending {
        out.push_str(&format!("  [pending] {}\n", version));
    }
    for record in &report.orphaned {
        out.push_str(&format!("  [orphaned, batch {}] {}\n", record.batch, record.version));
    }
    out
}

/// Changeset files need no database connection
pub fn create(settings: &MigrationSettings, name: &str, template: &ChangesetTemplate) -> anyhow::Result<()> {
    let manager = MigrationManager::with_config(MigrationConfig::from_settings(settings));
    let filename = manager.create_changeset(name, template)?;
    println!("Created changeset: {}", settings.migrations_dir.join(filename).display());
    Ok(())
}
