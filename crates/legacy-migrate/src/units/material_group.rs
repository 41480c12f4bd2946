//! Material group master: TBL_MaterialGroupMaster -> material_group_master.

use crate::core::{SourceRow, SqlNullType, SqlValue};
use crate::unit::{MigrationUnit, Transform, UnitKind, ValidationCheck};

const SELECT: &str = "SELECT MaterialGroupId, SAPClientId, MaterialGroupCode, \
     MaterialGroupName, MaterialGroupDescription, IsActive \
     FROM TBL_MaterialGroupMaster";

const INSERT: &str = "INSERT INTO material_group_master (material_group_id, company_id, \
     material_group_code, material_group_name, material_group_description, created_by, \
     created_date, modified_by, modified_date, is_deleted, deleted_by, deleted_date) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)";

pub struct MaterialGroupUnit;

fn direct(row: &SourceRow<'_>, column: &str) -> SqlValue {
    row.get(column)
        .cloned()
        .unwrap_or(SqlValue::Null(SqlNullType::String))
}

/// Legacy IsActive is an int flag; anything but 1 counts as inactive.
fn is_active(value: Option<&SqlValue>) -> bool {
    match value {
        Some(SqlValue::Bool(b)) => *b,
        Some(v) => v.as_i64() == Some(1),
        None => false,
    }
}

impl MigrationUnit for MaterialGroupUnit {
    fn name(&self) -> &str {
        "material_group_master"
    }

    fn source_table(&self) -> &str {
        "TBL_MaterialGroupMaster"
    }

    fn select_query(&self) -> &str {
        SELECT
    }

    fn insert_query(&self) -> &str {
        INSERT
    }

    fn transform_notes(&self) -> Vec<String> {
        [
            "Direct",
            "FK: SAPClientId",
            "Direct",
            "Direct",
            "Direct",
            "Default: 0",
            "Default: Now",
            "Default: null",
            "Default: null",
            "IsActive inverted",
            "Default: null",
            "Default: null",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Detailed
    }

    fn transform(&self, row: &SourceRow<'_>) -> Transform {
        match row.get("MaterialGroupCode") {
            None | Some(SqlValue::Null(_)) => {
                return Transform::Skip("missing material group code".into())
            }
            _ => {}
        }
        match row.get("SAPClientId") {
            None | Some(SqlValue::Null(_)) => {
                return Transform::Skip("missing company reference".into())
            }
            _ => {}
        }

        let deleted = !is_active(row.get("IsActive"));
        Transform::Row(vec![
            direct(row, "MaterialGroupId"),
            direct(row, "SAPClientId"),
            direct(row, "MaterialGroupCode"),
            direct(row, "MaterialGroupName"),
            direct(row, "MaterialGroupDescription"),
            SqlValue::I32(0),
            SqlValue::DateTime(chrono::Utc::now().naive_utc()),
            SqlValue::Null(SqlNullType::I32),
            SqlValue::Null(SqlNullType::DateTime),
            SqlValue::Bool(deleted),
            SqlValue::Null(SqlNullType::I32),
            SqlValue::Null(SqlNullType::DateTime),
        ])
    }

    fn validation_checks(&self) -> Vec<ValidationCheck> {
        vec![
            ValidationCheck::new(
                "Null material group code",
                "SELECT CAST(COUNT(*) AS BIGINT) FROM TBL_MaterialGroupMaster \
                 WHERE MaterialGroupCode IS NULL",
            ),
            ValidationCheck::new(
                "Duplicate material group code",
                "SELECT CAST(COUNT(*) AS BIGINT) FROM (SELECT MaterialGroupCode \
                 FROM TBL_MaterialGroupMaster GROUP BY MaterialGroupCode \
                 HAVING COUNT(*) > 1) d",
            ),
            ValidationCheck::new(
                "Orphaned company reference",
                "SELECT CAST(COUNT(*) AS BIGINT) FROM TBL_MaterialGroupMaster m \
                 WHERE m.SAPClientId IS NOT NULL AND m.SAPClientId NOT IN \
                 (SELECT ClientSAPId FROM TBL_CLIENTSAPMASTER)",
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Batch;

    fn batch(code: SqlValue, client: SqlValue, active: SqlValue) -> Batch {
        Batch {
            columns: vec![
                "MaterialGroupId".into(),
                "SAPClientId".into(),
                "MaterialGroupCode".into(),
                "MaterialGroupName".into(),
                "MaterialGroupDescription".into(),
                "IsActive".into(),
            ],
            rows: vec![vec![
                SqlValue::I32(10),
                client,
                code,
                SqlValue::String("Steel".into()),
                SqlValue::String("Raw steel".into()),
                active,
            ]],
        }
    }

    #[test]
    fn inactive_rows_become_deleted() {
        let batch = batch(
            SqlValue::String("MG01".into()),
            SqlValue::I32(1),
            SqlValue::I32(0),
        );
        let row = batch.iter().next().unwrap();
        match MaterialGroupUnit.transform(&row) {
            Transform::Row(values) => {
                assert_eq!(values.len(), 12);
                assert_eq!(values[9], SqlValue::Bool(true));
            }
            Transform::Skip(reason) => panic!("unexpected skip: {}", reason),
        }
    }

    #[test]
    fn missing_company_reference_is_skipped() {
        let batch = batch(
            SqlValue::String("MG01".into()),
            SqlValue::Null(SqlNullType::I32),
            SqlValue::I32(1),
        );
        let row = batch.iter().next().unwrap();
        match MaterialGroupUnit.transform(&row) {
            Transform::Skip(reason) => assert_eq!(reason, "missing company reference"),
            Transform::Row(_) => panic!("expected a skip"),
        }
    }

    #[test]
    fn has_orphan_check() {
        let labels: Vec<String> = MaterialGroupUnit
            .validation_checks()
            .into_iter()
            .map(|c| c.label)
            .collect();
        assert!(labels.contains(&"Orphaned company reference".to_string()));
    }
}
