use std::sync::Arc;
use axum::{routing::post, Router, Json};
use axum::extract::State;
use tower_http::cors::{CorsLayer, Any};
use tracing::{info, warn};

use crate::chain::Engine;
use crate::construct::{Request, Response};

async fn execute_chain(State(engine): State<Arc<Engine>>, Json(request): Json<Request>) -> Json<Response> {
    let started = std::time::Instant::now();
    let operations = request.operations.len();
    let response = engine.execute(request).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match &response.exception {
        None => info!(ms = elapsed_ms, operations, results = response.results.len(), "chain served"),
        Some(exception) => warn!(
            ms = elapsed_ms,
            operations,
            index = exception.index,
            message = %exception.message,
            "chain served with exception"
        ),
    }
    Json(response)
}

/// `POST /v1/chain` takes a serialized chain and always answers 200 with the
/// response; failures inside the chain travel in its exception record.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/chain", post(execute_chain))
        .with_state(engine)
        .layer(cors)
}
