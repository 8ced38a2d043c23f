mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use commands::migrate;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Versioned schema changesets for PostgreSQL")]
struct Cli {
    /// Directory searched for keel.toml, keel.yaml, keel.yml or keel.json
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Database URL, overriding configuration
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log every executed statement
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the migration ledger table
    Init,

    /// Apply pending changesets as one batch
    Up,

    /// Roll back the most recent batches
    Down {
        /// Number of batches to roll back
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },

    /// Roll back every applied batch
    Reset,

    /// Show applied, pending and orphaned changesets
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new changeset file
    Create {
        /// Changeset name, e.g. "create users"
        name: String,

        /// File template
        #[arg(long, value_enum, default_value = "sql")]
        template: TemplateKind,

        /// Table for the create-table and alter-table templates
        #[arg(long)]
        table: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TemplateKind {
    Sql,
    CreateTable,
    AlterTable,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let settings = migrate::load_settings(&cli.root, cli.database_url)?;

    match cli.command {
        Commands::Init => migrate::init(&settings).await?,
        Commands::Up => migrate::up(&settings).await?,
        Commands::Down { steps } => migrate::down(&settings, steps).await?,
        Commands::Reset => migrate::reset(&settings).await?,
        Commands::Status { json } => migrate::status(&settings, json).await?,
        Commands::Create { name, template, table } => {
            let template = migrate::template(template.into(), table)?;
            migrate::create(&settings, &name, &template)?;
        }
    }

    Ok(())
}

impl From<TemplateKind> for migrate::TemplateChoice {
    fn from(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::Sql => migrate::TemplateChoice::Sql,
            TemplateKind::CreateTable => migrate::TemplateChoice::CreateTable,
            TemplateKind::AlterTable => migrate::TemplateChoice::AlterTable,
        }
    }
}
