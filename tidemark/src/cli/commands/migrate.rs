use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Table};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::examples::ExampleGroup;
use crate::cli::output::{OutputManager, TableDisplay};
use crate::cli::project::ProjectContext;
use crate::cli::theme::ICONS;
use crate::config::TidemarkConfig;
use crate::registry::MigrationRegistry;
use crate::runner::{MigrationRunner, MigrationStats};
use crate::store::{RedisStore, Store};
use crate::watermark::{AppliedMigration, MigrationWatermark, WatermarkStore};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Deploy Migrations",
        commands: &[
            "tidemark migrate deploy                  # Run all pending migrations",
            "tidemark migrate deploy --dry-run        # Preview what would be migrated",
            "tidemark migrate deploy --timeout 600    # Stop after ten minutes",
        ],
    },
    ExampleGroup {
        title: "Inspect",
        commands: &[
            "tidemark migrate status                  # Current watermark and pending count",
            "tidemark migrate list                    # Every registered migration",
            "tidemark --output json migrate history   # Applied runs as JSON",
        ],
    },
    ExampleGroup {
        title: "Recovery",
        commands: &["tidemark migrate resolve 4 --applied      # Mark migration 4 as applied without running it"],
    },
];

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Run pending migrations against the configured store
    #[command(name = "deploy")]
    Deploy {
        /// Preview what would be migrated without making changes
        #[arg(long)]
        dry_run: bool,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Show the current watermark and pending migrations
    #[command(name = "status")]
    Status,

    /// List registered migrations and whether they are applied
    #[command(name = "list")]
    List,

    /// Show the history of applied migrations
    #[command(name = "history")]
    History,

    /// Manually advance the watermark to a registered migration
    #[command(name = "resolve")]
    Resolve {
        /// Sequence number of the migration to resolve
        sequence: u64,

        /// Mark the migration as applied
        #[arg(long, required = true)]
        applied: bool,
    },
}

pub async fn handle_migrate_commands(command: MigrateCommands, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;

    if !ctx.is_initialized() {
        output.error("tidemark is not initialized in this project.");
        output.info("Run 'tidemark init' first to initialize.");
        anyhow::bail!("Project not initialized");
    }

    let config = ctx.load_config()?;
    let registry = MigrationRegistry::from_inventory().context("Failed to discover migrations")?;
    output.verbose(&format!("{} migration(s) registered", registry.len()));

    let store = connect(&config, output).await?;
    let watermarks = WatermarkStore::new(store.clone(), &config.migrations.table, &config.migrations.dataset);

    match command {
        MigrateCommands::Deploy { dry_run, timeout } => {
            let runner = MigrationRunner::new(registry, store, config.migrations.clone())?
                .with_batch_config(config.batch.clone())?
                .with_dry_run(dry_run);
            let cancel = deploy_token(timeout);
            handle_deploy(&runner, &cancel, output).await?;
        }
        MigrateCommands::Status => {
            handle_status(&registry, &watermarks, output).await?;
        }
        MigrateCommands::List => {
            handle_list(&registry, &watermarks, output).await?;
        }
        MigrateCommands::History => {
            handle_history(&watermarks, output).await?;
        }
        MigrateCommands::Resolve { sequence, applied: _ } => {
            handle_resolve(&registry, &watermarks, sequence, output).await?;
        }
    }

    Ok(())
}

async fn connect(config: &TidemarkConfig, output: &OutputManager) -> Result<Arc<dyn Store>> {
    let url = config
        .store
        .resolved_url()
        .context("A valid store URL is required (set REDIS_URL or [store] url)")?;
    output.verbose(&format!("Store prefix: {}", config.store.prefix));

    output.progress("Connecting to Redis");
    let store = RedisStore::connect(&url, config.store.prefix.clone())
        .await
        .context("Failed to connect to Redis")?;
    output.clear_line();
    output.success("Connected to Redis");

    Ok(Arc::new(store))
}

/// Token cancelled by Ctrl-C or, when given, after `timeout` seconds.
fn deploy_token(timeout: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();

    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout {
        let on_timeout = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            on_timeout.cancel();
        });
    }

    token
}

async fn handle_deploy(runner: &MigrationRunner, cancel: &CancellationToken, output: &OutputManager) -> Result<()> {
    output.heading("Deploy Migrations");

    if runner.is_dry_run() {
        output.warning("DRY RUN MODE - No changes will be made");
    }

    let stats = match runner.run(cancel).await {
        Ok(stats) => stats,
        Err(err) if err.is_cancelled() => {
            output.warning("Deploy cancelled; the watermark stays at the last completed migration");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    output.heading("Summary");
    if runner.is_dry_run() {
        for sequence in &stats.applied {
            if let Ok(unit) = runner.registry().resolve(*sequence) {
                output.bullet(&format!("would apply {sequence}/{}", unit.name()));
            }
        }
    } else if stats.migrations_applied > 0 {
        output.success(&format!(
            "{} migration(s) applied in {}ms",
            stats.migrations_applied, stats.total_time_ms
        ));
    } else {
        output.success("Nothing to apply");
    }

    if stats.migrations_skipped > 0 {
        output.info(&format!("{} migration(s) already applied", stats.migrations_skipped));
    }

    output.display(&stats)?;

    if runner.is_dry_run() {
        output.warning("DRY RUN - No actual changes were made");
    }

    Ok(())
}

impl TableDisplay for MigrationStats {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, &["Metric", "Value"]);
        let applied = self
            .applied
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let rows = [
            (if self.dry_run { "Would apply" } else { "Applied" }, applied),
            ("Skipped", self.migrations_skipped.to_string()),
            ("Records migrated", self.records_migrated.to_string()),
            ("Watermark", self.watermark.to_string()),
            ("Elapsed", format!("{}ms", self.total_time_ms)),
        ];
        for (metric, value) in rows {
            table.add_row(vec![Cell::new(metric), Cell::new(value)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "applied={} skipped={} records={} watermark={}",
            self.applied.len(),
            self.migrations_skipped,
            self.records_migrated,
            self.watermark
        )
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    dataset: String,
    watermark: MigrationWatermark,
    registered: usize,
    applied: usize,
    pending: usize,
    latest: Option<u64>,
}

impl StatusReport {
    fn new(registry: &MigrationRegistry, dataset: &str, watermark: MigrationWatermark) -> Self {
        let pending = registry.pending(&watermark).count();
        Self {
            dataset: dataset.to_string(),
            registered: registry.len(),
            applied: registry.len() - pending,
            pending,
            latest: registry.latest(),
            watermark,
        }
    }
}

impl TableDisplay for StatusReport {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, &["Dataset", "Watermark", "Registered", "Applied", "Pending"]);
        table.add_row(vec![
            Cell::new(&self.dataset),
            Cell::new(self.watermark.to_string()),
            Cell::new(self.registered),
            Cell::new(self.applied),
            Cell::new(self.pending),
        ]);
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "{}: {} ({} applied, {} pending)",
            self.dataset, self.watermark, self.applied, self.pending
        )
    }
}

async fn handle_status(registry: &MigrationRegistry, watermarks: &WatermarkStore, output: &OutputManager) -> Result<()> {
    output.heading("Migration Status");

    let watermark = watermarks.current(&CancellationToken::new()).await?;
    if let Some(applied_at) = watermark.applied_at {
        output.key_value("Last applied at", &applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }

    let report = StatusReport::new(registry, watermarks.dataset(), watermark);
    output.display(&report)?;

    if report.pending > 0 {
        output.info("Run 'tidemark migrate deploy' to apply pending migrations");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct UnitRow {
    sequence: u64,
    name: String,
    applied: bool,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct UnitListing(Vec<UnitRow>);

impl UnitListing {
    fn new(registry: &MigrationRegistry, watermark: &MigrationWatermark) -> Self {
        Self(
            registry
                .units()
                .iter()
                .map(|unit| UnitRow {
                    sequence: unit.sequence(),
                    name: unit.name().to_string(),
                    applied: watermark.is_applied(unit.sequence()),
                })
                .collect(),
        )
    }
}

impl TableDisplay for UnitListing {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, &["Sequence", "Name", "State"]);
        for row in &self.0 {
            let state = if row.applied {
                format!("{} applied", ICONS.check)
            } else {
                format!("{} pending", ICONS.pending)
            };
            table.add_row(vec![Cell::new(row.sequence), Cell::new(&row.name), Cell::new(state)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.0
            .iter()
            .map(|row| format!("{}/{}{}", row.sequence, row.name, if row.applied { "" } else { "*" }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

async fn handle_list(registry: &MigrationRegistry, watermarks: &WatermarkStore, output: &OutputManager) -> Result<()> {
    output.heading("Registered Migrations");

    if registry.is_empty() {
        output.warning("No migrations are registered in this binary");
        output.info("Annotate async functions with #[tidemark::migration(sequence = N)]");
        return Ok(());
    }

    let watermark = watermarks.current(&CancellationToken::new()).await?;
    output.display(&UnitListing::new(registry, &watermark))
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct HistoryListing(Vec<AppliedMigration>);

impl TableDisplay for HistoryListing {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, &["Sequence", "Name", "Applied at"]);
        for run in &self.0 {
            table.add_row(vec![
                Cell::new(run.sequence),
                Cell::new(&run.name),
                Cell::new(run.applied_at.format("%Y-%m-%d %H:%M:%S UTC")),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        format!("Count: {}", self.0.len())
    }
}

async fn handle_history(watermarks: &WatermarkStore, output: &OutputManager) -> Result<()> {
    output.heading("Migration History");

    let history = watermarks.history(&CancellationToken::new()).await?;
    if history.is_empty() {
        output.info("No migrations have been applied yet");
        return Ok(());
    }
    output.display(&HistoryListing(history))
}

async fn handle_resolve(
    registry: &MigrationRegistry,
    watermarks: &WatermarkStore,
    sequence: u64,
    output: &OutputManager,
) -> Result<()> {
    let unit = registry.resolve(sequence)?;
    output.heading(&format!("Resolve Migration: {sequence}/{}", unit.name()));

    let cancel = CancellationToken::new();
    let current = watermarks.current(&cancel).await?;
    if current.is_applied(sequence) {
        output.warning(&format!("Watermark is already at {current}; nothing to resolve"));
        return Ok(());
    }

    let skipped = registry
        .pending(&current)
        .filter(|pending| pending.sequence() < sequence)
        .count();
    if skipped > 0 {
        output.warning(&format!("{skipped} earlier pending migration(s) will never run"));
    }

    let watermark = watermarks.advance(&current, sequence, unit.name(), &cancel).await?;
    output.success(&format!("Marked {watermark} as applied"));
    Ok(())
}
