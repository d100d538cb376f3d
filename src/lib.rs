//! Intravert – an operation-chain execution engine over a wide-column store.
//!
//! A client submits one [`construct::Request`]: an ordered list of storage
//! operations (reads, writes, slices, counters, keyspace and table
//! administration, raw queries) mixed with extension invocations. Later
//! operations may point at the results of earlier ones, so a whole
//! read-transform-write round trip travels in a single request.
//!
//! * An [`construct::Operation`] has a fixed kind, named parameters and optional
//!   per-operation overrides (keyspace, table, consistency, timeout, ttl).
//! * A parameter is a literal, a reference `{"$ref": i, "field": f}` to the
//!   result of operation `i`, or a bind marker `{"$bind": n}` used by prepared
//!   statements.
//! * A [`session::Session`] carries the defaults operations inherit and the
//!   results captured so far; it can be saved and restored by handle.
//!
//! ## Modules
//! * [`chain`] – The [`chain::Engine`] that interprets chains and assembles responses.
//! * [`construct`] – Operations, requests, rows and responses.
//! * [`session`] – Session state, the result arena and the handle keepers.
//! * [`resolve`] – Reference and bind-marker resolution.
//! * [`extension`] – Filter, processor, multi-processor and service process
//!   capabilities, their loaders and the registry keeping them.
//! * [`expression`] – A small expression language compiled into filters and processors.
//! * [`datatype`] – Dynamic values and the types `assume` can attach to names and values.
//! * [`backend`] – The storage boundary, with [`memory`] and [`persist`] (SQLite) implementations.
//! * [`config`] and [`server`] – Settings and the HTTP surface used by the binary.
//!
//! ## Failure
//! The first failing operation ends the chain. Everything captured before it
//! stays in the [`construct::Response`], which also names the failing index
//! and the message of its [`error::IntraError`]. Nothing is rolled back.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use intravert::{chain::Engine, construct::{Operation, Request}, memory::MemoryBackend};
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = Engine::new(Arc::new(MemoryBackend::new()));
//! let request = Request::new()
//!     .add(Operation::create_keyspace("ks", 1))
//!     .add(Operation::set_keyspace("ks"))
//!     .add(Operation::create_table("cf"))
//!     .add(Operation::set_table("cf"))
//!     .add(Operation::set_auto_timestamp(true))
//!     .add(Operation::set("row", "col", "hello"))
//!     .add(Operation::get("row", "col"));
//! let response = engine.execute(request).await;
//! assert!(response.exception.is_none());
//! assert_eq!(response.results.len(), 7);
//! # });
//! ```

pub mod backend;
pub mod chain;
pub mod config;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod expression;
pub mod extension;
pub mod memory;
pub mod persist;
pub mod resolve;
pub mod server;
pub mod session;

pub use chain::Engine;
pub use error::{IntraError, Result};
