use std::sync::Arc;

use intravert::chain::Engine;
use intravert::construct::{OpKind, Operation, Param, Request, ResultRecord};
use intravert::datatype::Value;
use intravert::memory::MemoryBackend;

fn engine() -> Engine {
    Engine::new(Arc::new(MemoryBackend::new()))
}

// create and select a keyspace and table, with auto-timestamping on
fn schema(request: Request, keyspace: &str, table: &str) -> Request {
    request
        .add(Operation::create_keyspace(keyspace, 1))
        .add(Operation::set_keyspace(keyspace))
        .add(Operation::create_table(table))
        .add(Operation::set_table(table))
        .add(Operation::set_auto_timestamp(true))
}

#[tokio::test]
async fn write_then_read_round_trips_through_a_reference() {
    let request = schema(Request::new(), "myks", "mycf")
        .add(Operation::set("rowa", "col1", "7"))
        .add(Operation::get("rowa", "col1"))
        .add(Operation::set("rowb", "col1", Param::reference(6, Some("value"))))
        .add(Operation::get("rowb", "col1"));
    let response = engine().execute(request).await;

    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    let indexes: Vec<usize> = response.results.keys().copied().collect();
    assert_eq!(indexes, (0..=8).collect::<Vec<_>>());
    for admin in 0..=5 {
        assert_eq!(response.result(admin), Some(&ResultRecord::Ok));
    }
    let first = response.rows(6).expect("rows for the first get");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].value, Some(Value::Bytes(b"7".to_vec())));
    assert_eq!(first[0].name, Some(Value::Bytes(b"col1".to_vec())));
    assert!(first[0].timestamp.is_some());
    let second = response.rows(8).expect("rows for the second get");
    assert_eq!(second[0].value, first[0].value);
}

#[tokio::test]
async fn assumed_types_decode_names_and_values() {
    let request = schema(Request::new(), "ks", "cf")
        .add(Operation::assume("name", "UTF8Type"))
        .add(Operation::assume("value", "UTF8Type"))
        .add(Operation::set("row", "greeting", "hello"))
        .add(Operation::get("row", "greeting"));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none());
    let rows = response.rows(8).expect("rows");
    assert_eq!(rows[0].name, Some(Value::from("greeting")));
    assert_eq!(rows[0].value, Some(Value::from("hello")));
}

#[tokio::test]
async fn operation_overrides_win_over_session_defaults() {
    let request = schema(Request::new(), "one", "cf")
        .add(Operation::create_keyspace("two", 1))
        .add(Operation::create_table("cf").with_keyspace("two"))
        .add(Operation::set("row", "col", "in two").with_keyspace("two"))
        .add(Operation::set("row", "col", "in one"))
        .add(Operation::assume("value", "UTF8Type").with_keyspace("two"))
        .add(Operation::get("row", "col").with_keyspace("two"))
        .add(Operation::get("row", "col"));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(response.rows(10).expect("rows")[0].value, Some(Value::from("in two")));
    assert_eq!(
        response.rows(11).expect("rows")[0].value,
        Some(Value::Bytes(b"in one".to_vec()))
    );
}

#[tokio::test]
async fn slices_honour_bounds_and_limits() {
    let mut request = schema(Request::new(), "ks", "cf")
        .add(Operation::assume("name", "UTF8Type"))
        .add(Operation::assume("value", "UTF8Type"));
    for column in ["a", "b", "c", "d"] {
        request = request.add(Operation::set("row", column, column));
    }
    let request = request
        .add(Operation::slice("row", "b", "c", 100))
        .add(Operation::slice("row", "", "", 3))
        .add(Operation::new(OpKind::SliceByNames).param("rowkey", "row").param(
            "names",
            vec![Value::from("d"), Value::from("a"), Value::from("zz")],
        ));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);

    let bounded: Vec<Value> = response.rows(11).expect("rows").iter().filter_map(|r| r.name.clone()).collect();
    assert_eq!(bounded, vec![Value::from("b"), Value::from("c")]);
    assert_eq!(response.rows(12).expect("rows").len(), 3);
    let by_names: Vec<Value> = response.rows(13).expect("rows").iter().filter_map(|r| r.value.clone()).collect();
    assert_eq!(by_names, vec![Value::from("d"), Value::from("a")]);
}

#[tokio::test]
async fn batch_set_spans_keyspaces() {
    let mut row_in_other = std::collections::BTreeMap::new();
    row_in_other.insert("keyspace".to_string(), Value::from("other"));
    row_in_other.insert("columnfamily".to_string(), Value::from("cf"));
    row_in_other.insert("rowkey".to_string(), Value::from("r"));
    row_in_other.insert("name".to_string(), Value::from("c"));
    row_in_other.insert("value".to_string(), Value::from("there"));
    let mut row_here = row_in_other.clone();
    row_here.remove("keyspace");
    row_here.insert("value".to_string(), Value::from("here"));

    let request = schema(Request::new(), "home", "cf")
        .add(Operation::create_keyspace("other", 1))
        .add(Operation::create_table("cf").with_keyspace("other"))
        .add(Operation::new(OpKind::BatchSet).param(
            "rows",
            vec![Value::Map(row_in_other), Value::Map(row_here)],
        ))
        .add(Operation::get("r", "c").with_keyspace("other"))
        .add(Operation::get("r", "c"));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(response.rows(8).expect("rows")[0].value, Some(Value::Bytes(b"there".to_vec())));
    assert_eq!(response.rows(9).expect("rows")[0].value, Some(Value::Bytes(b"here".to_vec())));
}

#[tokio::test]
async fn listing_and_raw_queries() {
    let request = schema(Request::new(), "myks", "mycf")
        .add(Operation::set("r1", "c1", "v1"))
        .add(Operation::set("r2", "c1", "v2"))
        .add(Operation::new(OpKind::ListKeyspaces))
        .add(Operation::new(OpKind::ListTables))
        .add(
            Operation::new(OpKind::Query)
                .param("statement", "select * from mycf limit 1")
                .param("convert", true),
        );
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);

    let keyspaces = response.result(7).and_then(ResultRecord::scalar).expect("keyspace list");
    assert!(keyspaces.as_list().expect("a list").contains(&Value::from("myks")));
    let tables = response.result(8).and_then(ResultRecord::scalar).expect("table list");
    assert_eq!(tables, &Value::List(vec![Value::from("mycf")]));

    let rows = response.rows(9).expect("query rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, Some(Value::from("key")));
    assert_eq!(rows[0].value, Some(Value::from("r1")));
    assert_eq!(rows[1].value, Some(Value::from("v1")));
}

#[tokio::test]
async fn last_write_wins_by_timestamp() {
    let request = schema(Request::new(), "ks", "cf")
        .add(Operation::set_auto_timestamp(false))
        .add(Operation::set("r", "c", "new").param("timestamp", 10_i64))
        .add(Operation::set("r", "c", "old").param("timestamp", 5_i64))
        .add(Operation::get("r", "c"));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none());
    let rows = response.rows(8).expect("rows");
    assert_eq!(rows[0].value, Some(Value::Bytes(b"new".to_vec())));
    assert_eq!(rows[0].timestamp, Some(10));
}

#[tokio::test]
async fn set_without_timestamp_needs_auto_timestamping() {
    let request = schema(Request::new(), "ks", "cf")
        .add(Operation::set_auto_timestamp(false))
        .add(Operation::set("r", "c", "v"));
    let response = engine().execute(request).await;
    let exception = response.exception.expect("missing timestamp should fail");
    assert_eq!(exception.index, 6);
    assert!(exception.message.contains("timestamp"), "{}", exception.message);
}

#[tokio::test]
async fn requests_and_responses_travel_as_json() {
    let body = r#"{
        "operations": [
            {"type": "create_keyspace", "params": {"name": "jks", "replication": 1}},
            {"type": "set_keyspace", "params": {"keyspace": "jks"}},
            {"type": "create_table", "params": {"name": "cf"}},
            {"type": "set", "columnfamily": "cf", "params": {"rowkey": "r", "name": "c", "value": "v", "timestamp": 1}},
            {"type": "get", "columnfamily": "cf", "params": {"rowkey": "r", "name": "c"}},
            {"type": "set", "columnfamily": "cf", "params": {"rowkey": "r2", "name": "c", "value": {"$ref": 4, "field": "value"}, "timestamp": 2}}
        ]
    }"#;
    let request: Request = serde_json::from_str(body).expect("request parses");
    assert!(matches!(request.operations[5].params().get("value"), Some(Param::Reference(_))));

    let response = engine().execute(request).await;
    let json = serde_json::to_value(&response).expect("response serializes");
    assert_eq!(json["results"]["0"], "OK");
    assert_eq!(json["results"]["3"], "OK");
    assert_eq!(json["results"]["4"][0]["name"], "Yw==");
    assert_eq!(json["results"]["4"][0]["value"], "dg==");
    assert_eq!(json["results"]["4"][0]["timestamp"], 1);
    assert_eq!(json["results"]["5"], "OK");
    assert!(json.get("exception").is_none());
}
