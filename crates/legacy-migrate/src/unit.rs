//! The per-entity migration contract and the registry that dispatches on
//! table name.
//!
//! A [`MigrationUnit`] is one self-contained extract-transform-load routine:
//! it names its source table, carries the SELECT and parameterized INSERT
//! statements, and transforms one source row at a time into target values or
//! a skip reason. The engine supplies everything else (batching,
//! transactions, progress, accounting).

use crate::core::{SourceRow, SqlValue};
use crate::mapping::{build_mappings, FieldMapping};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of transforming one source row.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Write these values, in INSERT parameter order.
    Row(Vec<SqlValue>),
    /// Do not write the row; account it under this reason label.
    Skip(String),
}

/// How callers consume a unit's result: simple units only care about the
/// inserted count, detailed units surface the full report with logs and
/// skip reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Simple,
    Detailed,
}

/// A labelled read-only diagnostic query against the source. The SQL must
/// return a single integer scalar (typically a COUNT of offending rows).
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub label: String,
    pub sql: String,
}

impl ValidationCheck {
    pub fn new(label: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sql: sql.into(),
        }
    }
}

/// One entity's migration routine.
pub trait MigrationUnit: Send + Sync {
    /// Registry key and log prefix, conventionally the target table name.
    fn name(&self) -> &str;

    /// Legacy table the SELECT reads from.
    fn source_table(&self) -> &str;

    fn select_query(&self) -> &str;

    /// Parameterized INSERT with `$n` placeholders matching
    /// [`Transform::Row`] value order.
    fn insert_query(&self) -> &str;

    /// Human transform notes, one per INSERT column.
    fn transform_notes(&self) -> Vec<String>;

    fn kind(&self) -> UnitKind {
        UnitKind::Simple
    }

    /// Transform one source row. Validation failures return
    /// [`Transform::Skip`], never an error.
    fn transform(&self, row: &SourceRow<'_>) -> Transform;

    /// Pre-flight diagnostic queries. Empty by default.
    fn validation_checks(&self) -> Vec<ValidationCheck> {
        Vec::new()
    }

    /// Field mappings derived from the unit's statements and notes.
    fn mappings(&self) -> Vec<FieldMapping> {
        build_mappings(
            self.select_query(),
            self.insert_query(),
            &self.transform_notes(),
        )
    }
}

/// Table-name to unit dispatch. Lookup is case-insensitive; adding an
/// entity is a registration, not a new dispatch arm.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: HashMap<String, Arc<dyn MigrationUnit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All units this build ships with.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::units::CompanyMasterUnit));
        registry.register(Arc::new(crate::units::MaterialGroupUnit));
        registry
    }

    pub fn register(&mut self, unit: Arc<dyn MigrationUnit>) {
        self.units.insert(unit.name().to_lowercase(), unit);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MigrationUnit>> {
        self.units.get(&name.to_lowercase()).cloned()
    }

    /// Registered unit names, sorted for stable display.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.values().map(|u| u.name().to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlNullType;

    struct StubUnit;

    impl MigrationUnit for StubUnit {
        fn name(&self) -> &str {
            "stub_master"
        }
        fn source_table(&self) -> &str {
            "TBL_STUB"
        }
        fn select_query(&self) -> &str {
            "SELECT Id, Name FROM TBL_STUB"
        }
        fn insert_query(&self) -> &str {
            "INSERT INTO stub_master (id, name) VALUES ($1, $2)"
        }
        fn transform_notes(&self) -> Vec<String> {
            vec!["Direct".into(), "Direct".into()]
        }
        fn transform(&self, row: &SourceRow<'_>) -> Transform {
            match row.get("Name") {
                Some(SqlValue::Null(_)) | None => Transform::Skip("missing name".into()),
                Some(name) => Transform::Row(vec![
                    row.get("Id").cloned().unwrap_or(SqlValue::Null(SqlNullType::I64)),
                    name.clone(),
                ]),
            }
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = UnitRegistry::new();
        registry.register(Arc::new(StubUnit));
        assert!(registry.get("STUB_MASTER").is_some());
        assert!(registry.get("stub_master").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn mappings_pair_select_and_insert_columns() {
        let mappings = StubUnit.mappings();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].source_field, "Id");
        assert_eq!(mappings[0].target_field, "id");
        assert_eq!(mappings[1].transform_note, "Direct");
    }

    #[test]
    fn default_registry_has_seed_units() {
        let registry = UnitRegistry::with_defaults();
        assert!(registry.get("company_master").is_some());
        assert!(registry.get("material_group_master").is_some());
    }
}
