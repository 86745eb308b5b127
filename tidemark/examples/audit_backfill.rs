//! A project binary with two registered migrations.
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1/ cargo run --example audit_backfill -- init
//! REDIS_URL=redis://127.0.0.1/ cargo run --example audit_backfill -- migrate deploy
//! REDIS_URL=redis://127.0.0.1/ cargo run --example audit_backfill -- migrate history
//! ```

use anyhow::Context;
use serde_json::json;
use tidemark::{MigrationContext, MigrationError, Record, migration};

const TABLE: &str = "app";

fn record(value: serde_json::Value) -> Result<Record, MigrationError> {
    value
        .as_object()
        .cloned()
        .context("record literal must be an object")
        .map_err(Into::into)
}

/// Seed a partition of users.
#[migration(sequence = 0, name = "seed_users")]
async fn seed_users(ctx: MigrationContext) -> Result<(), MigrationError> {
    let mut writer = ctx.batch_writer(TABLE);
    let users = (0..120)
        .map(|i| record(json!({"pk": "users", "sk": format!("user#{i:04}"), "active": i % 3 != 0})))
        .collect::<Result<Vec<_>, _>>()?;
    writer.write(users, true).await
}

/// Write one audit row for every active user.
#[migration(sequence = 1)]
async fn backfill_audit(ctx: MigrationContext) -> Result<(), MigrationError> {
    let users = ctx.query(TABLE, "users").await?;
    let mut writer = ctx.batch_writer(TABLE);

    for user in users.iter().filter(|user| user.get("active") == Some(&json!(true))) {
        ctx.checkpoint()?;
        let sk = user.get("sk").and_then(|sk| sk.as_str()).unwrap_or_default();
        writer.write([record(json!({"pk": "audit", "sk": sk, "event": "backfilled"}))?], false).await?;
    }
    writer.flush().await
}

#[tokio::main]
async fn main() {
    tidemark::cli::run().await;
}
