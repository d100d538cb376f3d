use std::sync::Arc;
use std::time::Duration;

use intravert::chain::Engine;
use intravert::construct::{Component, ConsistencyLevel, Handle, OpKind, Operation, Param, Request, Response};
use intravert::datatype::Value;
use intravert::memory::MemoryBackend;

fn engine() -> Engine {
    Engine::new(Arc::new(MemoryBackend::new()))
}

fn schema(request: Request) -> Request {
    request
        .add(Operation::create_keyspace("ks", 1))
        .add(Operation::set_keyspace("ks"))
        .add(Operation::create_table("cf"))
        .add(Operation::set_table("cf"))
        .add(Operation::set_auto_timestamp(true))
}

fn handle_at(response: &Response, index: usize) -> Handle {
    let value = response
        .result(index)
        .and_then(|record| record.scalar())
        .and_then(Value::as_i64)
        .expect("a handle");
    Handle::try_from(value).expect("a non-negative handle")
}

#[tokio::test]
async fn saved_state_carries_over_to_a_later_request() {
    let engine = engine();
    let first = schema(Request::new())
        .add(Operation::assume("value", "UTF8Type"))
        .add(Operation::save_state());
    let response = engine.execute(first).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    let handle = handle_at(&response, 6);

    // keyspace, table, auto-timestamp and the assumption all come back
    let second = Request::new()
        .add(Operation::restore_state(handle))
        .add(Operation::set("r", "c", "restored"))
        .add(Operation::get("r", "c"));
    let response = engine.execute(second).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(response.rows(2).expect("rows")[0].value, Some(Value::from("restored")));
}

#[tokio::test]
async fn a_restore_hint_prepares_the_session_before_the_first_operation() {
    let engine = engine();
    let response = engine
        .execute(
            schema(Request::new())
                .add(Operation::assume("value", "UTF8Type"))
                .add(Operation::set("r", "c", "hinted"))
                .add(Operation::save_state()),
        )
        .await;
    let handle = handle_at(&response, 7);

    let response = engine.execute(Request::new().restoring(handle).add(Operation::get("r", "c"))).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(response.rows(0).expect("rows")[0].value, Some(Value::from("hinted")));
}

#[tokio::test]
async fn restored_consistency_applies_to_later_writes() {
    let engine = engine();
    let response = engine
        .execute(
            schema(Request::new())
                .add(Operation::set_consistency(ConsistencyLevel::Two))
                .add(Operation::save_state()),
        )
        .await;
    let handle = handle_at(&response, 6);

    let response = engine
        .execute(Request::new().add(Operation::restore_state(handle)).add(Operation::set("r", "c", "v")))
        .await;
    let exception = response.exception.expect("TWO cannot be met by one replica");
    assert_eq!(exception.index, 1);
    assert!(exception.message.contains("unavailable"), "{}", exception.message);

    // a consistency hint wins over the restored level
    let response = engine
        .execute(
            Request::new()
                .restoring(handle)
                .with_consistency(ConsistencyLevel::One)
                .add(Operation::set("r", "c", "v")),
        )
        .await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
}

#[tokio::test]
async fn unknown_state_handles_are_state_errors() {
    let engine = engine();
    let response = engine.execute(Request::new().add(Operation::restore_state(4242))).await;
    let exception = response.exception.expect("nothing was saved under 4242");
    assert_eq!(exception.index, 0);
    assert!(exception.message.starts_with("State error"), "{}", exception.message);

    let response = engine
        .execute(Request::new().restoring(4242).add(Operation::set_keyspace("ks")))
        .await;
    let exception = response.exception.expect("the hint names nothing");
    assert_eq!(exception.index, 0);
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn prepared_statements_run_with_bound_values() {
    let engine = engine();
    let template = schema(Request::new())
        .add(Operation::new(OpKind::Prepare))
        .add(Operation::set(Param::bind(0), "c", Param::bind(1)))
        .add(Operation::get(Param::bind(0), "c"));
    let response = engine.execute(template).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    // prepare ends the chain, the template itself is not run
    assert_eq!(response.results.len(), 6);
    let handle = handle_at(&response, 5);

    let run = Request::new()
        .add(Operation::set_keyspace("ks"))
        .add(Operation::set_table("cf"))
        .add(Operation::set_auto_timestamp(true))
        .add(Operation::assume("value", "UTF8Type"))
        .add(
            Operation::new(OpKind::ExecutePrepared)
                .param("id", handle as i64)
                .param("binds", vec![Value::from("row"), Value::from("bound")]),
        )
        .add(Operation::get("row", "c"));
    let response = engine.execute(run).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(response.rows(4).expect("rows")[0].value, Some(Value::from("bound")));
    assert_eq!(response.rows(5).expect("rows")[0].value, Some(Value::from("bound")));
}

#[tokio::test]
async fn prepared_statements_report_missing_binds() {
    let engine = engine();
    let response = engine
        .execute(
            schema(Request::new())
                .add(Operation::new(OpKind::Prepare))
                .add(Operation::set("r", "c", Param::bind(3))),
        )
        .await;
    let handle = handle_at(&response, 5);

    let run = Request::new()
        .add(Operation::set_keyspace("ks"))
        .add(Operation::set_table("cf"))
        .add(Operation::new(OpKind::ExecutePrepared).param("id", handle as i64));
    let response = engine.execute(run).await;
    let exception = response.exception.expect("position 3 was never bound");
    assert_eq!(exception.index, 2);
    assert!(exception.message.contains("position 3"), "{}", exception.message);
}

#[tokio::test]
async fn component_selection_trims_rows_until_reset() {
    let request = schema(Request::new())
        .add(Operation::set("r", "c", "v"))
        .add(Operation::component_select(&[Component::Value, Component::Timestamp]))
        .add(Operation::get("r", "c"))
        .add(Operation::component_select(&[]))
        .add(Operation::get("r", "c"));
    let response = engine().execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    let trimmed = &response.rows(7).expect("rows")[0];
    assert_eq!(trimmed.name, None);
    assert!(trimmed.value.is_some());
    assert!(trimmed.timestamp.is_some());
    let full = &response.rows(9).expect("rows")[0];
    assert!(full.name.is_some());
}

#[tokio::test]
async fn int32_assumptions_encode_and_reject_wide_values() {
    let request = schema(Request::new())
        .add(Operation::assume("value", "Int32Type"))
        .add(Operation::set("r", "small", 42_i64))
        .add(Operation::get("r", "small"))
        .add(Operation::set("r", "wide", 3_000_000_000_i64));
    let response = engine().execute(request).await;
    assert_eq!(response.rows(7).expect("rows")[0].value, Some(Value::Int(42)));
    let exception = response.exception.expect("three billion does not fit in 32 bits");
    assert_eq!(exception.index, 8);
    assert!(exception.message.starts_with("Validation error"), "{}", exception.message);
}

#[tokio::test]
async fn columns_written_with_a_ttl_expire() {
    let engine = engine();
    let response = engine
        .execute(
            schema(Request::new())
                .add(Operation::set("r", "short", "lived").with_ttl(1))
                .add(Operation::set("r", "long", "lived"))
                .add(Operation::get("r", "short")),
        )
        .await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(response.rows(7).expect("rows")[0].ttl, Some(1));

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let response = engine
        .execute(
            Request::new()
                .add(Operation::set_keyspace("ks"))
                .add(Operation::set_table("cf"))
                .add(Operation::slice("r", "", "", 10)),
        )
        .await;
    let rows = response.rows(2).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, Some(Value::Bytes(b"long".to_vec())));
}

#[tokio::test]
async fn released_handles_can_no_longer_be_used() {
    let engine = engine();
    let response = engine
        .execute(
            schema(Request::new())
                .add(Operation::save_state())
                .add(Operation::new(OpKind::Prepare))
                .add(Operation::set("r", "c", "v")),
        )
        .await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    let state = handle_at(&response, 5);
    let statement = handle_at(&response, 6);

    engine.release_state(state).expect("the state is kept");
    engine.release_prepared(statement).expect("the statement is kept");
    assert!(engine.release_state(state).is_err());

    let response = engine.execute(Request::new().add(Operation::restore_state(state))).await;
    let exception = response.exception.expect("the state was released");
    assert!(exception.message.contains("unknown saved state handle"), "{}", exception.message);

    let response = engine
        .execute(Request::new().add(Operation::new(OpKind::ExecutePrepared).param("id", statement as i64)))
        .await;
    let exception = response.exception.expect("the statement was released");
    assert!(exception.message.contains("unknown prepared statement handle"), "{}", exception.message);
}
