use std::sync::atomic::{AtomicU64, Ordering};

use tidemark::{CancellationToken, MemoryStore, MigrationContext, MigrationError, MigrationRegistry, MigrationRunner, RunnerConfig, migration};

static LAST_SEEN: AtomicU64 = AtomicU64::new(u64::MAX);

#[migration(sequence = 20, name = "rename_accounts")]
async fn rename_accounts(ctx: MigrationContext) -> Result<(), MigrationError> {
    LAST_SEEN.store(ctx.sequence(), Ordering::SeqCst);
    Ok(())
}

#[migration(sequence = 10)]
async fn seed_accounts(ctx: MigrationContext) -> Result<(), MigrationError> {
    ctx.report_processed(3);
    LAST_SEEN.store(ctx.sequence(), Ordering::SeqCst);
    Ok(())
}

#[test]
fn annotated_functions_are_collected_in_sequence_order() {
    let registry = MigrationRegistry::from_inventory().unwrap();

    let units: Vec<_> = registry
        .units()
        .iter()
        .map(|unit| (unit.sequence(), unit.name().to_string()))
        .collect();
    assert_eq!(
        units,
        vec![
            (10, "seed_accounts".to_string()),
            (20, "rename_accounts".to_string())
        ]
    );
}

#[tokio::test]
async fn inventory_registry_runs_end_to_end() {
    let store = MemoryStore::new();
    let registry = MigrationRegistry::from_inventory().unwrap();
    let runner = MigrationRunner::new(registry, std::sync::Arc::new(store.clone()), RunnerConfig::new("stack", "accounts")).unwrap();

    let stats = runner.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.applied, vec![10, 20]);
    assert_eq!(stats.records_migrated, 3);
    assert_eq!(LAST_SEEN.load(Ordering::SeqCst), 20);
    assert_eq!(stats.watermark.to_string(), "20/rename_accounts");
}
