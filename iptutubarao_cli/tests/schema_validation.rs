use chrono::{NaiveDate, TimeZone, Utc};
use iptutubarao_lib::{extract_at, FetchError, IptuError, ResultCache, Stage, TaxpayerId};
use serde_json::Value;
use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("CLI crate should be inside workspace")
        .to_path_buf()
}

fn load_page(name: &str) -> String {
    let path = workspace_root()
        .join("iptutubarao_lib/tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read fixture {}: {}", path.display(), e))
}

fn load_schema(name: &str) -> Value {
    let path = workspace_root().join("schema").join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read schema {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("schema is valid JSON")
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn results_json() -> Value {
    let debtor = TaxpayerId::parse("123.456.789-09").unwrap();
    let clear = TaxpayerId::parse("987.654.321-00").unwrap();
    let results = vec![
        extract_at(&load_page("debt_found.html"), &debtor, today()).unwrap(),
        extract_at(&load_page("no_debt.html"), &clear, today()).unwrap(),
        extract_at(&load_page("layout_changed.html"), &clear, today()).unwrap(),
    ];
    serde_json::to_value(&results).unwrap()
}

fn snapshots_json() -> Value {
    let cache = ResultCache::new();
    let debtor = TaxpayerId::parse("12345678909").unwrap();
    let failing = TaxpayerId::parse("98765432100").unwrap();
    let debtor_gen = cache.register(&debtor);
    let failing_gen = cache.register(&failing);

    let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
    let result = extract_at(&load_page("debt_found.html"), &debtor, today()).unwrap();
    cache.record_success(debtor_gen, result, at);
    let err = IptuError::Fetch(FetchError::UnreachableOrRejected {
        stage: Stage::Submit,
        status: Some(500),
    });
    cache.record_failure(&failing, failing_gen, &err, at);

    serde_json::to_value(cache.snapshots()).unwrap()
}

// ---------------------------------------------------------------------------
// Positive validation: serialized output conforms to its schema
// ---------------------------------------------------------------------------

#[test]
fn test_results_conform_to_schema() {
    let schema = load_schema("debt_query_result.schema.json");
    let data = results_json();

    let validator = jsonschema::draft202012::new(&schema).expect("result schema compiles");
    let result = validator.validate(&data);
    if let Err(e) = &result {
        panic!("results failed validation: {e}");
    }
}

#[test]
fn test_snapshots_conform_to_schema() {
    let schema = load_schema("snapshot.schema.json");
    let data = snapshots_json();

    let validator = jsonschema::draft202012::new(&schema).expect("snapshot schema compiles");
    let result = validator.validate(&data);
    if let Err(e) = &result {
        panic!("snapshots failed validation: {e}");
    }
}

// ---------------------------------------------------------------------------
// Negative validation: schemas reject invalid data
// ---------------------------------------------------------------------------

#[test]
fn test_result_schema_rejects_missing_amount_field() {
    let schema = load_schema("debt_query_result.schema.json");
    let mut data = results_json();

    // Amounts must be present even when null.
    data[1]
        .as_object_mut()
        .expect("result is an object")
        .remove("total_amount");

    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&data).is_err(),
        "schema should reject result missing total_amount"
    );
}

#[test]
fn test_result_schema_rejects_unpadded_taxpayer_id() {
    let schema = load_schema("debt_query_result.schema.json");
    let mut data = results_json();

    data[0]
        .as_object_mut()
        .expect("result is an object")
        .insert("taxpayer_id".to_string(), Value::String("1234567".to_string()));

    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&data).is_err(),
        "schema should reject a taxpayer id that is not 11 digits"
    );
}

#[test]
fn test_result_schema_rejects_brazilian_date_order() {
    let schema = load_schema("debt_query_result.schema.json");
    let mut data = results_json();

    data[0]
        .as_object_mut()
        .expect("result is an object")
        .insert("next_due_date".to_string(), Value::String("10/03/2026".to_string()));

    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&data).is_err(),
        "schema should reject non-ISO dates"
    );
}

#[test]
fn test_snapshot_schema_rejects_additional_properties() {
    let schema = load_schema("snapshot.schema.json");
    let mut data = snapshots_json();

    data[0]
        .as_object_mut()
        .expect("snapshot is an object")
        .insert("checked_at".to_string(), Value::String("now".to_string()));

    let validator = jsonschema::draft202012::new(&schema).expect("schema compiles");
    assert!(
        validator.validate(&data).is_err(),
        "schema should reject additional properties"
    );
}

// ---------------------------------------------------------------------------
// Edge cases
// ---------------------------------------------------------------------------

#[test]
fn test_failed_snapshot_has_null_result() {
    let data = snapshots_json();
    let failing = &data[1];
    assert!(failing["result"].is_null());
    assert_eq!(failing["consecutive_failures"], 1);
    assert!(failing["last_error"]
        .as_str()
        .unwrap()
        .contains("POST request unreachable or rejected"));
}

#[test]
fn test_empty_array_conforms_to_all_schemas() {
    let empty = serde_json::json!([]);

    for schema_name in ["debt_query_result.schema.json", "snapshot.schema.json"] {
        let schema = load_schema(schema_name);
        let validator =
            jsonschema::draft202012::new(&schema).unwrap_or_else(|e| panic!("{schema_name}: {e}"));
        let result = validator.validate(&empty);
        if let Err(e) = &result {
            panic!("empty array should conform to {schema_name}: {e}");
        }
    }
}
