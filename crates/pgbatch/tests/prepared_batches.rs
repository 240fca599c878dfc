//! Public API checks that need no database.

use pgbatch::{
    BatchConfig, BatchError, BatchExecutor, BatchKind, BatchOutput, BatchResult, Record,
    Returning, TableMeta,
};
use serde_json::{Value, json};
use std::sync::Mutex;

struct Product;

impl TableMeta for Product {
    fn table_name() -> &'static str {
        "inventory.products"
    }

    fn primary_key() -> &'static str {
        "product_id"
    }

    fn columns() -> &'static [(&'static str, &'static str)] {
        &[
            ("product_id", "bigint"),
            ("sku", "character varying(64)"),
            ("Warehouse", "integer"),
            ("price", "numeric(10,2)"),
            ("updated_at", "timestamp with time zone"),
        ]
    }
}

fn rows(values: Value) -> Vec<Record> {
    serde_json::from_value(values).unwrap()
}

/// Answers every statement with one row per payload element.
struct EchoKeys {
    statements: Mutex<Vec<String>>,
}

impl BatchExecutor for EchoKeys {
    async fn exec_batch(&self, sql: &str, payload: &Value) -> BatchResult<Vec<Vec<Value>>> {
        self.statements.lock().unwrap().push(sql.to_string());
        let n = payload.as_array().map_or(0, Vec::len);
        Ok((1..=n as i64).map(|id| vec![json!(id)]).collect())
    }
}

#[test]
fn build_upsert_renders_one_parameter_statement() {
    let batch = Product::batch();
    let prepared = batch
        .build_upsert(
            &rows(json!([
                {"sku": "A-1", "Warehouse": 1, "price": "9.99"},
                {"sku": "B-2", "Warehouse": 1, "price": "4.50"},
            ])),
            &["sku", "Warehouse"],
            &[],
            "product_id",
        )
        .unwrap();

    assert_eq!(prepared.kind(), BatchKind::Upsert);
    assert_eq!(prepared.len(), 2);
    let sql = prepared.sql();
    assert!(sql.contains("INSERT INTO inventory.products"), "{sql}");
    assert!(sql.contains("ON CONFLICT (\"sku\", \"Warehouse\")"), "{sql}");
    assert!(sql.contains("\"updated_at\" = CURRENT_TIMESTAMP"), "{sql}");
    assert!(sql.contains("$1::jsonb"), "{sql}");
    assert!(!sql.contains("$2"), "{sql}");
    assert!(!sql.contains("A-1"), "values never reach the SQL text");
}

#[test]
fn build_select_keeps_only_key_columns_in_the_payload() {
    let prepared = Product::batch()
        .build_select(
            &rows(json!([{"sku": "A-1", "Warehouse": 1, "price": "9.99"}])),
            &["sku", "Warehouse"],
            "*",
        )
        .unwrap();
    assert_eq!(prepared.kind(), BatchKind::Select);
    assert_eq!(prepared.payload(), &json!([{"sku": "A-1", "Warehouse": 1}]));
    assert!(prepared.sql().contains("LEFT JOIN inventory.products AS selected"));
}

#[test]
fn contract_violations_surface_before_rendering() {
    let batch = Product::batch();

    let err = batch
        .build_upsert(&rows(json!([{"sku": "A-1"}])), &["missing"], &[], "*")
        .unwrap_err();
    assert!(err.is_invalid_input());

    let err = batch
        .build_upsert(&rows(json!([{"sku": "A-1", "colour": "red"}])), &["sku"], &[], "*")
        .unwrap_err();
    assert!(matches!(err, BatchError::UnknownColumn { ref column, .. } if column == "colour"));

    let err = batch
        .build_select(&rows(json!([{"sku": "A-1"}])), &["sku"], Returning::None)
        .unwrap_err();
    assert!(err.is_invalid_input());
}

#[test]
fn except_can_remove_a_column_the_table_does_not_have() {
    let prepared = Product::batch()
        .build_upsert(
            &rows(json!([{"sku": "A-1", "colour": "red"}])),
            &["sku"],
            &["colour"],
            Returning::None,
        )
        .unwrap();
    assert_eq!(prepared.payload(), &json!([{"sku": "A-1"}]));
}

#[tokio::test]
async fn interface_clones_share_metadata_and_run_on_any_executor() {
    let conn = EchoKeys {
        statements: Mutex::new(Vec::new()),
    };
    let batch = Product::batch().with_config(BatchConfig::new().no_truncate());
    let clone = batch.clone();

    let input = rows(json!([{"sku": "A-1"}, {"sku": "B-2"}]));
    let first = batch.upsert(&conn, &input, &["sku"], &[], "product_id").await.unwrap();
    let second = clone.upsert(&&conn, &input, &["sku"], &[], "product_id").await.unwrap();

    assert_eq!(first, BatchOutput::Scalars(vec![json!(1), json!(2)]));
    assert_eq!(first, second);
    let statements = conn.statements.lock().unwrap();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0], statements[1]);
}
