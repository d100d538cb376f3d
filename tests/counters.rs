use std::sync::Arc;

use intravert::chain::Engine;
use intravert::construct::{Operation, Request};
use intravert::datatype::Value;
use intravert::memory::MemoryBackend;

fn schema(request: Request) -> Request {
    request
        .add(Operation::create_keyspace("ks", 1))
        .add(Operation::set_keyspace("ks"))
        .add(Operation::create_table("counts"))
        .add(Operation::set_table("counts"))
        .add(Operation::set_auto_timestamp(true))
}

#[tokio::test]
async fn counters_grow_past_thirty_two_bits() {
    let request = schema(Request::new())
        .add(Operation::assume("value", "LongType"))
        .add(Operation::counter("visits", "total", 2_147_483_647))
        .add(Operation::counter("visits", "total", 1))
        .add(Operation::counter("visits", "total", 10))
        .add(Operation::get("visits", "total"));
    let response = Engine::new(Arc::new(MemoryBackend::new())).execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    let rows = response.rows(9).expect("rows");
    assert_eq!(rows[0].value, Some(Value::Int(2_147_483_658)));
}

#[tokio::test]
async fn counters_decrement_and_read_under_the_counter_alias() {
    let request = schema(Request::new())
        .add(Operation::assume("value", "CounterColumnType"))
        .add(Operation::counter("stock", "apples", 5))
        .add(Operation::counter("stock", "apples", -7))
        .add(Operation::get("stock", "apples"));
    let response = Engine::new(Arc::new(MemoryBackend::new())).execute(request).await;
    assert!(response.exception.is_none(), "unexpected exception: {:?}", response.exception);
    assert_eq!(response.rows(8).expect("rows")[0].value, Some(Value::Int(-2)));
}

#[tokio::test]
async fn counting_on_a_plain_column_fails() {
    let request = schema(Request::new())
        .add(Operation::set("r", "c", "text"))
        .add(Operation::counter("r", "c", 1));
    let response = Engine::new(Arc::new(MemoryBackend::new())).execute(request).await;
    let exception = response.exception.expect("a text column is not a counter");
    assert_eq!(exception.index, 6);
    assert!(exception.message.contains("counter"), "{}", exception.message);
}
