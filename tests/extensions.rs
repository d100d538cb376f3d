use std::collections::BTreeMap;
use std::sync::Arc;

use intravert::chain::Engine;
use intravert::construct::{OpKind, Operation, Param, Request, Row};
use intravert::datatype::Value;
use intravert::error::{IntraError, Result};
use intravert::extension::NativeLoader;
use intravert::memory::MemoryBackend;

fn capitalize(rows: Vec<Row>) -> Result<Vec<Row>> {
    Ok(rows
        .into_iter()
        .map(|mut row| {
            row.value = row.value.map(|v| Value::Text(v.to_string().to_uppercase()));
            row
        })
        .collect())
}

fn union(inputs: &BTreeMap<String, Vec<Row>>, params: &BTreeMap<String, Value>) -> Result<Vec<Row>> {
    let mut combined: Vec<Row> = inputs.values().flatten().cloned().collect();
    if let Some(limit) = params.get("limit").and_then(Value::as_i64) {
        combined.truncate(limit as usize);
    }
    Ok(combined)
}

// writes params.value under params.rowkey and reads it back
fn write_and_read(params: &BTreeMap<String, Value>) -> Result<Vec<Operation>> {
    let rowkey = params
        .get("rowkey")
        .cloned()
        .ok_or_else(|| IntraError::Validation("rowkey is required".into()))?;
    let value = params.get("value").cloned().unwrap_or(Value::from("default"));
    Ok(vec![
        Operation::set(rowkey.clone(), "service", value),
        Operation::get(rowkey, "service"),
    ])
}

fn broken(_: &BTreeMap<String, Value>) -> Result<Vec<Operation>> {
    Ok(vec![Operation::set_keyspace("ks"), Operation::get("r", "c").with_table("missing")])
}

fn engine() -> Engine {
    let engine = Engine::new(Arc::new(MemoryBackend::new()));
    let loader = NativeLoader::new()
        .processor("capitalize", capitalize)
        .multi_processor("union", union)
        .service_process("write_and_read", write_and_read)
        .service_process("broken", broken)
        .filter("everything", |_: &Row| true);
    engine.extensions().add_loader("native", loader).expect("loader registered");
    engine
}

fn schema(request: Request) -> Request {
    request
        .add(Operation::create_keyspace("ks", 1))
        .add(Operation::set_keyspace("ks"))
        .add(Operation::create_table("cf"))
        .add(Operation::set_table("cf"))
        .add(Operation::set_auto_timestamp(true))
        .add(Operation::assume("value", "UTF8Type"))
}

fn values(rows: Option<&Vec<Row>>) -> Vec<Value> {
    rows.expect("rows").iter().filter_map(|r| r.value.clone()).collect()
}

#[tokio::test]
async fn native_processor_transforms_a_captured_result() {
    let request = schema(Request::new())
        .add(Operation::set("r", "c", "hello"))
        .add(Operation::get("r", "c"))
        .add(Operation::create_processor("cap", "native", "capitalize"))
        .add(Operation::process("cap", 7));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(values(response.rows(9)), vec![Value::from("HELLO")]);
    // the processed input is left as it was
    assert_eq!(values(response.rows(7)), vec![Value::from("hello")]);
}

#[tokio::test]
async fn expression_processor_rewrites_rows() {
    let request = schema(Request::new())
        .add(Operation::set("r", "c", "quiet"))
        .add(Operation::get("r", "c"))
        .add(Operation::create_processor("shout", "expr", "value = upper(value), ttl = 60"))
        .add(Operation::process("shout", 7));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    let rows = response.rows(9).expect("rows");
    assert_eq!(rows[0].value, Some(Value::from("QUIET")));
    assert_eq!(rows[0].ttl, Some(60));
}

#[tokio::test]
async fn multi_processor_combines_named_results() {
    let request = schema(Request::new())
        .add(Operation::set("r1", "c", "one"))
        .add(Operation::set("r2", "c", "two"))
        .add(Operation::get("r1", "c"))
        .add(Operation::get("r2", "c"))
        .add(Operation::create_multi_processor("union", "native", "union"))
        .add(
            Operation::new(OpKind::MultiProcess)
                .param("name", "union")
                .param("inputs", vec![Value::from(9_i64), Value::from(8_i64)]),
        )
        .add(Operation::new(OpKind::MultiProcess).param("name", "union").param("params", {
            let mut params = BTreeMap::new();
            params.insert("limit".to_string(), Value::from(1_i64));
            Value::Map(params)
        }));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    // inputs are keyed by index as text, so "8" comes before "9"
    assert_eq!(values(response.rows(11)), vec![Value::from("one"), Value::from("two")]);
    assert_eq!(values(response.rows(12)), vec![Value::from("one")]);
}

#[tokio::test]
async fn multi_processor_inputs_are_checked_when_invoked() {
    let request = schema(Request::new())
        .add(Operation::create_multi_processor("union", "native", "union"))
        .add(
            Operation::new(OpKind::MultiProcess)
                .param("name", "union")
                .param("inputs", vec![Value::from(-4_i64)]),
        );
    let response = engine().execute(request).await;
    let exception = response.exception.expect("negative input should fail");
    assert_eq!(exception.index, 7);
    assert!(exception.message.contains("out of range"), "{}", exception.message);
}

#[tokio::test]
async fn filter_mode_applies_until_disabled() {
    let request = schema(Request::new())
        .add(Operation::set("r", "a", "keep"))
        .add(Operation::set("r", "b", "drop"))
        .add(Operation::create_filter("keepers", "expr", "value == 'keep' or value starts_with 'k'"))
        .add(Operation::filter_mode("keepers", true))
        .add(Operation::slice("r", "", "", 100))
        .add(Operation::get("r", "b"))
        .add(Operation::filter_mode("keepers", false))
        .add(Operation::slice("r", "", "", 100));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(values(response.rows(10)), vec![Value::from("keep")]);
    assert!(response.rows(11).expect("rows").is_empty());
    assert_eq!(values(response.rows(13)), vec![Value::from("keep"), Value::from("drop")]);
}

#[tokio::test]
async fn filter_mode_needs_a_registered_filter() {
    let request = schema(Request::new()).add(Operation::filter_mode("nobody", true));
    let response = engine().execute(request).await;
    let exception = response.exception.expect("unknown filter should fail");
    assert_eq!(exception.index, 6);
    assert!(exception.message.starts_with("Extension error"), "{}", exception.message);
}

#[tokio::test]
async fn loaders_refuse_shapes_they_cannot_build() {
    let engine = engine();
    let expression = schema(Request::new()).add(Operation::create_multi_processor("m", "expr", "value == 'x'"));
    let response = engine.execute(expression).await;
    let exception = response.exception.expect("expression multi-processor should fail");
    assert_eq!(exception.index, 6);
    assert!(exception.message.contains("cannot build"), "{}", exception.message);

    let native = Request::new().add(Operation::create_filter("f", "native", "capitalize"));
    let exception = engine.execute(native).await.exception.expect("shape mismatch should fail");
    assert!(exception.message.contains("not a filter"), "{}", exception.message);

    let unknown = Request::new().add(Operation::create_filter("f", "lua", "return true"));
    let exception = engine.execute(unknown).await.exception.expect("unknown loader should fail");
    assert!(exception.message.contains("lua"), "{}", exception.message);

    let garbage = Request::new().add(Operation::create_filter("f", "expr", "value ==="));
    let exception = engine.execute(garbage).await.exception.expect("bad source should fail");
    assert!(exception.message.starts_with("Extension error"), "{}", exception.message);
}

#[tokio::test]
async fn invoking_an_unregistered_capability_fails() {
    let request = schema(Request::new())
        .add(Operation::set("r", "c", "v"))
        .add(Operation::get("r", "c"))
        .add(Operation::process("ghost", 7));
    let response = engine().execute(request).await;
    let exception = response.exception.expect("unknown processor should fail");
    assert_eq!(exception.index, 8);
    assert!(exception.message.contains("ghost"), "{}", exception.message);
}

#[tokio::test]
async fn registering_a_name_again_replaces_it() {
    let request = schema(Request::new())
        .add(Operation::set("r", "c", "v"))
        .add(Operation::get("r", "c"))
        .add(Operation::create_processor("p", "expr", "value = 'first'"))
        .add(Operation::create_processor("p", "expr", "value = 'second'"))
        .add(Operation::process("p", 7));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(values(response.rows(10)), vec![Value::from("second")]);
}

#[tokio::test]
async fn service_process_runs_its_sub_chain() {
    let mut params = BTreeMap::new();
    params.insert("rowkey".to_string(), Value::from("svc"));
    params.insert("value".to_string(), Value::from("from service"));
    let request = schema(Request::new())
        .add(Operation::create_service_process("pair", "native", "write_and_read"))
        .add(
            Operation::new(OpKind::ServiceProcess)
                .param("name", "pair")
                .param("params", Value::Map(params)),
        )
        .add(Operation::get("svc", "service"));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(values(response.rows(7)), vec![Value::from("from service")]);
    assert_eq!(values(response.rows(8)), vec![Value::from("from service")]);
}

#[tokio::test]
async fn failing_service_process_names_its_step() {
    let request = schema(Request::new())
        .add(Operation::create_service_process("broken", "native", "broken"))
        .add(Operation::new(OpKind::ServiceProcess).param("name", "broken"));
    let response = engine().execute(request).await;
    let exception = response.exception.expect("broken service should fail");
    assert_eq!(exception.index, 7);
    assert!(exception.message.starts_with("Extension error"), "{}", exception.message);
    assert!(exception.message.contains("step 1"), "{}", exception.message);
}

#[tokio::test]
async fn process_input_can_come_from_a_reference() {
    let request = schema(Request::new())
        .add(Operation::set("r", "c", "abc"))
        .add(Operation::get("r", "c"))
        .add(Operation::create_processor("cap", "native", "capitalize"))
        .add(Operation::new(OpKind::Process).param("name", "cap").param("input", 7_i64))
        .add(Operation::set("copy", "c", Param::reference(9, Some("value"))))
        .add(Operation::get("copy", "c"));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(values(response.rows(11)), vec![Value::from("ABC")]);
}
