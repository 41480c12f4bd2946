//! Company master: TBL_CLIENTSAPMASTER -> company_master.
//!
//! Eight fields come across directly; the remaining target columns are
//! tenant defaults the redesigned schema requires on every company row.

use crate::core::{SourceRow, SqlNullType, SqlValue};
use crate::unit::{MigrationUnit, Transform, UnitKind, ValidationCheck};

const SELECT: &str = "SELECT ClientSAPId, ClientSAPCode, ClientSAPName, SAP, \
     PRAllocationLogic, Address, UploadDocument, DocumentName \
     FROM TBL_CLIENTSAPMASTER";

const INSERT: &str = "INSERT INTO company_master (company_id, company_code, company_name, \
     sap_version, pr_allocation_logic, address, company_logo_url, company_logo_name, \
     default_currency, qty_decimal_places, value_decimal_places, is_indian_currency, \
     date_format, rfq_prefix, rfq_length, auction_prefix, auction_length, \
     supplier_group_prefix, supplier_group_length, suppliercode_prefix, suppliercode_length, \
     workflow_prefix, workflow_length, workflow_version_length, participate_terms, \
     nfa_prefix, nfano_length, po_months_validity, time_format, site_url) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
     $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30)";

pub struct CompanyMasterUnit;

fn direct(row: &SourceRow<'_>, column: &str) -> SqlValue {
    row.get(column)
        .cloned()
        .unwrap_or(SqlValue::Null(SqlNullType::String))
}

impl MigrationUnit for CompanyMasterUnit {
    fn name(&self) -> &str {
        "company_master"
    }

    fn source_table(&self) -> &str {
        "TBL_CLIENTSAPMASTER"
    }

    fn select_query(&self) -> &str {
        SELECT
    }

    fn insert_query(&self) -> &str {
        INSERT
    }

    fn transform_notes(&self) -> Vec<String> {
        [
            "ClientSAPId (Direct)",
            "ClientSAPCode (Direct)",
            "ClientSAPName (Direct)",
            "SAP (Direct)",
            "PRAllocationLogic (Direct)",
            "Address (Direct)",
            "UploadDocument (Direct)",
            "DocumentName (Direct)",
            "Default: INR",
            "Default: 3",
            "Default: 2",
            "Default: true",
            "Default: dd/MM/yyyy",
            "Default: R",
            "Default: 4",
            "Default: A",
            "Default: 4",
            "Default: WCL",
            "Default: 7",
            "Default: T",
            "Default: 7",
            "Default: WF/",
            "Default: 5",
            "Default: 3",
            "Default: empty",
            "Default: empty",
            "Default: 6",
            "Default: 12",
            "Default: hh:mm tt",
            "Default: empty",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Simple
    }

    fn transform(&self, row: &SourceRow<'_>) -> Transform {
        match row.get("ClientSAPCode") {
            None | Some(SqlValue::Null(_)) => {
                return Transform::Skip("missing company code".into())
            }
            _ => {}
        }

        Transform::Row(vec![
            direct(row, "ClientSAPId"),
            direct(row, "ClientSAPCode"),
            direct(row, "ClientSAPName"),
            direct(row, "SAP"),
            direct(row, "PRAllocationLogic"),
            direct(row, "Address"),
            direct(row, "UploadDocument"),
            direct(row, "DocumentName"),
            SqlValue::String("INR".into()),
            SqlValue::I32(3),
            SqlValue::I32(2),
            SqlValue::Bool(true),
            SqlValue::String("dd/MM/yyyy".into()),
            SqlValue::String("R".into()),
            SqlValue::I32(4),
            SqlValue::String("A".into()),
            SqlValue::I32(4),
            SqlValue::String("WCL".into()),
            SqlValue::I32(7),
            SqlValue::String("T".into()),
            SqlValue::I32(7),
            SqlValue::String("WF/".into()),
            SqlValue::I32(5),
            SqlValue::I32(3),
            SqlValue::String(String::new()),
            SqlValue::String(String::new()),
            SqlValue::I32(6),
            SqlValue::I32(12),
            SqlValue::String("hh:mm tt".into()),
            SqlValue::String(String::new()),
        ])
    }

    fn validation_checks(&self) -> Vec<ValidationCheck> {
        vec![
            ValidationCheck::new(
                "Null company code",
                "SELECT CAST(COUNT(*) AS BIGINT) FROM TBL_CLIENTSAPMASTER \
                 WHERE ClientSAPCode IS NULL",
            ),
            ValidationCheck::new(
                "Duplicate company code",
                "SELECT CAST(COUNT(*) AS BIGINT) FROM (SELECT ClientSAPCode \
                 FROM TBL_CLIENTSAPMASTER GROUP BY ClientSAPCode \
                 HAVING COUNT(*) > 1) d",
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Batch;

    fn row_batch(code: SqlValue) -> Batch {
        Batch {
            columns: vec![
                "ClientSAPId".into(),
                "ClientSAPCode".into(),
                "ClientSAPName".into(),
                "SAP".into(),
                "PRAllocationLogic".into(),
                "Address".into(),
                "UploadDocument".into(),
                "DocumentName".into(),
            ],
            rows: vec![vec![
                SqlValue::I32(1),
                code,
                SqlValue::String("Acme".into()),
                SqlValue::String("ECC6".into()),
                SqlValue::String("auto".into()),
                SqlValue::String("HQ".into()),
                SqlValue::Null(SqlNullType::String),
                SqlValue::Null(SqlNullType::String),
            ]],
        }
    }

    #[test]
    fn transform_fills_tenant_defaults() {
        let batch = row_batch(SqlValue::String("ACME".into()));
        let row = batch.iter().next().unwrap();
        match CompanyMasterUnit.transform(&row) {
            Transform::Row(values) => {
                assert_eq!(values.len(), 30);
                assert_eq!(values[8], SqlValue::String("INR".into()));
                assert_eq!(values[27], SqlValue::I32(12));
            }
            Transform::Skip(reason) => panic!("unexpected skip: {}", reason),
        }
    }

    #[test]
    fn null_code_is_skipped() {
        let batch = row_batch(SqlValue::Null(SqlNullType::String));
        let row = batch.iter().next().unwrap();
        match CompanyMasterUnit.transform(&row) {
            Transform::Skip(reason) => assert_eq!(reason, "missing company code"),
            Transform::Row(_) => panic!("expected a skip"),
        }
    }

    #[test]
    fn mappings_cover_every_insert_column() {
        let mappings = CompanyMasterUnit.mappings();
        assert_eq!(mappings.len(), 30);
        assert_eq!(mappings[0].source_field, "ClientSAPId");
        assert_eq!(mappings[0].target_field, "company_id");
        // Default-filled columns have no source field.
        assert_eq!(mappings[8].source_field, "-");
        assert_eq!(mappings[8].transform_note, "Default: INR");
    }
}
