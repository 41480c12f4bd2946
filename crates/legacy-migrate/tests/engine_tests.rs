//! End-to-end engine runs over the in-memory drivers.

use legacy_migrate::core::{Batch, SourceRow, SqlNullType, SqlValue};
use legacy_migrate::engine::UnitOutcome;
use legacy_migrate::progress::ProgressSink;
use legacy_migrate::source::MemorySource;
use legacy_migrate::target::MemoryTarget;
use legacy_migrate::unit::{MigrationUnit, Transform, ValidationCheck};
use legacy_migrate::{
    EngineConfig, MigrateError, MigrateOptions, MigrationEngine,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Item master: the minimal unit shape the engine runs.
struct ItemUnit;

impl MigrationUnit for ItemUnit {
    fn name(&self) -> &str {
        "item_master"
    }
    fn source_table(&self) -> &str {
        "TBL_ITEM"
    }
    fn select_query(&self) -> &str {
        "SELECT Id, Name FROM TBL_ITEM"
    }
    fn insert_query(&self) -> &str {
        "INSERT INTO item_master (id, name) VALUES ($1, $2)"
    }
    fn transform_notes(&self) -> Vec<String> {
        vec!["Direct".into(), "Direct".into()]
    }
    fn transform(&self, row: &SourceRow<'_>) -> Transform {
        match row.get("Name") {
            None | Some(SqlValue::Null(_)) => Transform::Skip("missing name".into()),
            Some(name) => Transform::Row(vec![
                row.get("Id").cloned().unwrap_or(SqlValue::Null(SqlNullType::I64)),
                name.clone(),
            ]),
        }
    }
    fn validation_checks(&self) -> Vec<ValidationCheck> {
        vec![ValidationCheck::new(
            "Null name",
            "SELECT COUNT(*) FROM TBL_ITEM WHERE Name IS NULL",
        )]
    }
}

fn items(rows: Vec<(i64, Option<&str>)>) -> Batch {
    Batch {
        columns: vec!["Id".into(), "Name".into()],
        rows: rows
            .into_iter()
            .map(|(id, name)| {
                vec![
                    SqlValue::I64(id),
                    name.map(|n| SqlValue::String(n.into()))
                        .unwrap_or(SqlValue::Null(SqlNullType::String)),
                ]
            })
            .collect(),
    }
}

fn engine_with(source: MemorySource, target: &MemoryTarget) -> MigrationEngine {
    let config = EngineConfig {
        batch_size: 2,
        ..EngineConfig::default()
    };
    MigrationEngine::new(Arc::new(source), Arc::new(target.clone()), config)
}

/// Sink recording every call, for asserting the terminal contract.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn report_progress(&self, processed: i64, total: i64, _operation: &str, _elapsed: Duration) {
        self.events
            .lock()
            .unwrap()
            .push(format!("progress {}/{}", processed, total));
    }
    fn report_completed(&self, total_processed: i64, total_inserted: i64, _total_time: Duration) {
        self.events
            .lock()
            .unwrap()
            .push(format!("completed {} {}", total_processed, total_inserted));
    }
    fn report_error(&self, _message: &str, processed_so_far: i64) {
        self.events
            .lock()
            .unwrap()
            .push(format!("error at {}", processed_so_far));
    }
}

#[tokio::test]
async fn migrate_inserts_and_accounts_skips() {
    let source = MemorySource::new().with_table(
        "TBL_ITEM",
        items(vec![(1, Some("a")), (2, None), (3, Some("c")), (4, None), (5, Some("e"))]),
    );
    let target = MemoryTarget::new();
    let engine = engine_with(source, &target);

    let report = engine
        .migrate(&ItemUnit, MigrateOptions::default())
        .await
        .unwrap();

    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.total_processed(), 5);
    assert_eq!(report.skipped, report.skip_reasons.values().sum::<i64>());
    assert_eq!(report.skip_reasons["missing name"], 2);
    assert_eq!(target.row_count("item_master"), 3);
}

#[tokio::test]
async fn migrate_count_returns_inserted() {
    let source = MemorySource::new()
        .with_table("TBL_ITEM", items(vec![(1, Some("a")), (2, Some("b"))]));
    let target = MemoryTarget::new();
    let engine = engine_with(source, &target);

    assert_eq!(engine.migrate_count(&ItemUnit).await.unwrap(), 2);
}

fn poison_on(id: i64) -> impl Fn(&str, &[SqlValue]) -> Option<String> + Send + Sync {
    move |_table, values| {
        (values.first() == Some(&SqlValue::I64(id))).then(|| "duplicate key".to_string())
    }
}

fn ten_items() -> Batch {
    items((1..=10).map(|i| (i, Some("x"))).collect())
}

#[tokio::test]
async fn transactional_failure_rolls_everything_back() {
    let source = MemorySource::new().with_table("TBL_ITEM", ten_items());
    let target = MemoryTarget::new().with_constraint(poison_on(7));
    let engine = engine_with(source, &target);

    let err = engine
        .migrate(&ItemUnit, MigrateOptions::default())
        .await
        .unwrap_err();

    match err {
        MigrateError::Constraint { row, table, .. } => {
            assert_eq!(row, Some(7));
            assert_eq!(table, "item_master");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(target.row_count("item_master"), 0);
}

#[tokio::test]
async fn non_transactional_failure_keeps_prior_rows() {
    let source = MemorySource::new().with_table("TBL_ITEM", ten_items());
    let target = MemoryTarget::new().with_constraint(poison_on(7));
    let engine = engine_with(source, &target);

    let sink = Arc::new(RecordingSink::default());
    let err = engine
        .migrate_without_transaction(&ItemUnit, sink.clone())
        .await
        .unwrap_err();

    match err {
        MigrateError::Constraint { row, .. } => assert_eq!(row, Some(7)),
        other => panic!("unexpected error: {}", other),
    }
    // Rows 1..=6 autocommitted before the poison row.
    assert_eq!(target.row_count("item_master"), 6);
    // Exactly one terminal event, and it is the error.
    let terminals: Vec<String> = sink
        .events()
        .into_iter()
        .filter(|e| !e.starts_with("progress"))
        .collect();
    assert_eq!(terminals, vec!["error at 6".to_string()]);
}

#[tokio::test]
async fn progress_reaches_total_and_completes_once() {
    let source = MemorySource::new().with_table(
        "TBL_ITEM",
        items((1..=5).map(|i| (i, Some("x"))).collect()),
    );
    let target = MemoryTarget::new();
    let engine = engine_with(source, &target);

    let sink = Arc::new(RecordingSink::default());
    engine
        .migrate(&ItemUnit, MigrateOptions::with_progress(sink.clone()))
        .await
        .unwrap();

    let events = sink.events();
    assert!(events.contains(&"progress 5/5".to_string()));
    let completions: Vec<&String> = events.iter().filter(|e| e.starts_with("completed")).collect();
    assert_eq!(completions, vec![&"completed 5 5".to_string()]);
}

#[tokio::test]
async fn cancellation_aborts_with_no_partial_effect() {
    let source = MemorySource::new().with_table("TBL_ITEM", ten_items());
    let target = MemoryTarget::new();
    let engine = engine_with(source, &target);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = engine
        .migrate(
            &ItemUnit,
            MigrateOptions {
                cancel: Some(rx),
                ..MigrateOptions::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Cancelled));
    assert_eq!(target.row_count("item_master"), 0);
}

#[tokio::test]
async fn validate_source_reports_checks_in_order() {
    let source = MemorySource::new()
        .with_table("TBL_ITEM", items(vec![(1, Some("a")), (2, None)]))
        .with_scalar("SELECT COUNT(*) FROM TBL_ITEM WHERE Name IS NULL", 1);
    let target = MemoryTarget::new();
    let engine = engine_with(source, &target);

    let diagnostics = engine.validate_source(&ItemUnit).await.unwrap();
    assert_eq!(diagnostics.table, "TBL_ITEM");
    assert_eq!(diagnostics.row_count, 2);
    assert_eq!(diagnostics.checks["Null name"], 1);
    assert!(!diagnostics.is_clean());
    // Read-only: nothing reached the target.
    assert_eq!(target.row_count("item_master"), 0);
}

#[tokio::test]
async fn validate_source_flags_missing_table() {
    let engine = engine_with(MemorySource::new(), &MemoryTarget::new());
    let err = engine.validate_source(&ItemUnit).await.unwrap_err();
    assert!(matches!(err, MigrateError::TableNotFound(t) if t == "TBL_ITEM"));
}

/// Second unit over the same source shape, writing to another table.
struct OtherUnit;

impl MigrationUnit for OtherUnit {
    fn name(&self) -> &str {
        "other_master"
    }
    fn source_table(&self) -> &str {
        "TBL_OTHER"
    }
    fn select_query(&self) -> &str {
        "SELECT Id, Name FROM TBL_OTHER"
    }
    fn insert_query(&self) -> &str {
        "INSERT INTO other_master (id, name) VALUES ($1, $2)"
    }
    fn transform_notes(&self) -> Vec<String> {
        vec!["Direct".into(), "Direct".into()]
    }
    fn transform(&self, row: &SourceRow<'_>) -> Transform {
        Transform::Row(vec![
            row.get("Id").cloned().unwrap_or(SqlValue::Null(SqlNullType::I64)),
            row.get("Name").cloned().unwrap_or(SqlValue::Null(SqlNullType::String)),
        ])
    }
}

#[tokio::test]
async fn common_transaction_failure_has_zero_partial_effect() {
    let source = MemorySource::new()
        .with_table("TBL_ITEM", items(vec![(1, Some("a"))]))
        .with_table("TBL_OTHER", items(vec![(7, Some("poison"))]));
    // Poison lives in the second unit's data.
    let target = MemoryTarget::new().with_constraint(poison_on(7));
    let engine = engine_with(source, &target);

    let units: Vec<Arc<dyn MigrationUnit>> = vec![Arc::new(ItemUnit), Arc::new(OtherUnit)];
    let err = engine.migrate_many(&units, true).await.unwrap_err();

    assert!(matches!(err, MigrateError::Constraint { .. }));
    assert_eq!(target.row_count("item_master"), 0);
    assert_eq!(target.row_count("other_master"), 0);
}

#[tokio::test]
async fn independent_transactions_isolate_failures()  {
    let source = MemorySource::new()
        .with_table("TBL_ITEM", items(vec![(1, Some("a")), (2, Some("b"))]))
        .with_table("TBL_OTHER", items(vec![(7, Some("poison")), (8, Some("late"))]));
    let target = MemoryTarget::new().with_constraint(poison_on(7));
    let engine = engine_with(source, &target);

    let units: Vec<Arc<dyn MigrationUnit>> = vec![Arc::new(ItemUnit), Arc::new(OtherUnit)];
    let multi = engine.migrate_many(&units, false).await.unwrap();

    assert!(!multi.all_succeeded());
    assert_eq!(multi.total_inserted(), 2);
    // Caller order preserved.
    let names: Vec<&String> = multi.units.keys().collect();
    assert_eq!(names, vec!["item_master", "other_master"]);

    match &multi.units["item_master"] {
        UnitOutcome::Succeeded(report) => assert_eq!(report.inserted, 2),
        UnitOutcome::Failed { error } => panic!("first unit failed: {}", error),
    }
    assert!(!multi.units["other_master"].is_success());

    // First unit committed; failed unit rolled back.
    assert_eq!(target.row_count("item_master"), 2);
    assert_eq!(target.row_count("other_master"), 0);
}
