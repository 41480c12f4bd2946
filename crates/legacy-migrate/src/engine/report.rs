//! Run results: per-unit reports, pre-flight diagnostics, and multi-unit
//! outcome maps.

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

/// Result of one migration run.
///
/// `skipped` always equals the sum of `skip_reasons` values; `add_skip` is
/// the only mutation path for either.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub inserted: i64,
    pub skipped: i64,
    pub skip_reasons: HashMap<String, i64>,
    /// Timestamped, append-only run log.
    pub logs: Vec<String>,
}

impl MigrationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_processed(&self) -> i64 {
        self.inserted + self.skipped
    }

    pub fn add_inserted(&mut self) {
        self.inserted += 1;
    }

    /// Record one skipped row under the given reason label.
    pub fn add_skip(&mut self, reason: &str) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn log(&mut self, message: impl AsRef<str>) {
        self.logs.push(format!(
            "[{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        ));
    }

    /// Human summary in the shape operators read after a run.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Total processed: {}, Inserted: {}, Skipped: {}",
            self.total_processed(),
            self.inserted,
            self.skipped
        );
        if !self.skip_reasons.is_empty() {
            let mut reasons: Vec<(&String, &i64)> = self.skip_reasons.iter().collect();
            reasons.sort();
            out.push_str("\nSkip reasons:");
            for (reason, count) in reasons {
                out.push_str(&format!("\n  {}: {}", reason, count));
            }
        }
        out
    }
}

/// Read-only pre-flight diagnostics for one unit's source table.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDiagnostics {
    pub table: String,
    pub row_count: i64,
    /// Labelled check results, in the unit's declared order.
    pub checks: IndexMap<String, i64>,
}

impl SourceDiagnostics {
    /// True when no check found an offending row.
    pub fn is_clean(&self) -> bool {
        self.checks.values().all(|&count| count == 0)
    }
}

/// Outcome of one unit within a multi-unit run.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Succeeded(MigrationReport),
    Failed { error: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded(_))
    }
}

/// Per-unit outcomes of a multi-unit run, in caller (dependency) order.
#[derive(Debug, Default, Serialize)]
pub struct MultiReport {
    pub units: IndexMap<String, UnitOutcome>,
}

impl MultiReport {
    pub fn all_succeeded(&self) -> bool {
        self.units.values().all(UnitOutcome::is_success)
    }

    pub fn total_inserted(&self) -> i64 {
        self.units
            .values()
            .map(|o| match o {
                UnitOutcome::Succeeded(report) => report.inserted,
                _ => 0,
            })
            .sum()
    }
}
