//! The chain interpreter.
//!
//! An [`Engine`] walks the operations of a [`Request`] in submission order,
//! one at a time. Each operation sees the session left behind by the ones
//! before it, has its references resolved against their captured results,
//! and is then dispatched by kind:
//!
//! * administrative kinds change the session and never touch storage,
//! * data kinds call the [`Backend`] under the effective timeout,
//! * registration kinds compile capabilities into the [`ExtensionKeeper`],
//! * invocation kinds run a registered capability over captured results.
//!
//! The first failure ends the chain. Results captured before it stay in the
//! [`Response`], which also records the failing index and message.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

// our own stuff that we need
use crate::backend::{now_micros, Backend, Cell, Mutation, SliceRange};
use crate::construct::{
    Component, ConsistencyLevel, ExceptionRecord, Handle, OpKind, Operation, Request, Response, ResultRecord, Row,
};
use crate::datatype::{self, DataType, Value};
use crate::error::{IntraError, Result};
use crate::extension::{ExtensionKeeper, Shape, EXPRESSION, NATIVE};
use crate::resolve::{resolve, Arguments, Binds};
use crate::session::{PreparedKeeper, Role, Session, StateKeeper};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_SLICE_LIMIT: i64 = 100;
pub const DEFAULT_PROTOCOL: &str = "3.0.0";

// What an operation sees once session defaults and its own overrides are merged.
struct Context {
    keyspace: Option<String>,
    table: Option<String>,
    consistency: ConsistencyLevel,
    timeout: Duration,
    ttl: Option<u32>,
}

impl Context {
    fn of(session: &Session, op: &Operation, default_timeout: Duration) -> Self {
        let overrides = op.overrides();
        Self {
            keyspace: overrides.keyspace.clone().or_else(|| session.keyspace.clone()),
            table: overrides.table.clone().or_else(|| session.table.clone()),
            consistency: overrides.consistency.unwrap_or(session.consistency),
            timeout: overrides.timeout.map(Duration::from_millis).unwrap_or(default_timeout),
            ttl: overrides.ttl,
        }
    }
    fn keyspace(&self) -> Result<&str> {
        self.keyspace
            .as_deref()
            .ok_or_else(|| IntraError::Validation("no keyspace has been set".into()))
    }
    fn table(&self) -> Result<&str> {
        self.table
            .as_deref()
            .ok_or_else(|| IntraError::Validation("no table has been set".into()))
    }
}

enum Step {
    Continue(ResultRecord),
    // ends the chain without an exception
    Halt(ResultRecord),
}

/// Results of a (sub-)chain and the failure that stopped it, if any.
#[derive(Debug, Default)]
struct Outcome {
    results: BTreeMap<usize, ResultRecord>,
    failure: Option<(usize, IntraError)>,
}

impl Outcome {
    fn last(mut self) -> ResultRecord {
        self.results.pop_last().map(|(_, r)| r).unwrap_or(ResultRecord::Ok)
    }
}

type Chain<'a> = Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

pub struct Engine {
    backend: Arc<dyn Backend>,
    extensions: Arc<ExtensionKeeper>,
    states: Arc<Mutex<StateKeeper>>,
    prepared: Arc<Mutex<PreparedKeeper>>,
    default_timeout: Duration,
    default_consistency: ConsistencyLevel,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            extensions: Arc::new(ExtensionKeeper::new()),
            states: Arc::new(Mutex::new(StateKeeper::for_states())),
            prepared: Arc::new(Mutex::new(PreparedKeeper::for_statements())),
            default_timeout: DEFAULT_TIMEOUT,
            default_consistency: ConsistencyLevel::default(),
        }
    }
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
    pub fn with_default_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.default_consistency = level;
        self
    }
    pub fn with_extensions(mut self, extensions: Arc<ExtensionKeeper>) -> Self {
        self.extensions = extensions;
        self
    }
    pub fn extensions(&self) -> &ExtensionKeeper {
        &self.extensions
    }
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    /// Runs a whole request and assembles its response.
    pub async fn execute(&self, request: Request) -> Response {
        let started = Instant::now();
        let operations = request.operations.len();
        let mut session = Session::new(
            request.hints.consistency.unwrap_or(self.default_consistency),
            operations,
        );
        if let Some(handle) = request.hints.restore {
            match self.saved_state(handle) {
                Ok(snapshot) => {
                    session.restore(&snapshot);
                    if let Some(level) = request.hints.consistency {
                        session.consistency = level;
                    }
                }
                Err(e) => {
                    warn!(handle, error = %e, "session could not be restored");
                    return Response {
                        results: BTreeMap::new(),
                        exception: Some(ExceptionRecord {
                            message: e.to_string(),
                            index: 0,
                        }),
                    };
                }
            }
        }
        let outcome = self.run(&request.operations, &mut session, None).await;
        let failed = outcome.failure.as_ref().map(|(index, _)| *index);
        info!(
            operations,
            executed = outcome.results.len(),
            failed = ?failed,
            ms = started.elapsed().as_millis() as u64,
            "chain complete"
        );
        Response {
            results: outcome.results,
            exception: outcome.failure.map(|(index, e)| ExceptionRecord {
                message: e.to_string(),
                index,
            }),
        }
    }

    fn run<'a>(&'a self, operations: &'a [Operation], session: &'a mut Session, binds: Option<&'a Binds>) -> Chain<'a> {
        Box::pin(async move {
            let mut outcome = Outcome::default();
            for (index, op) in operations.iter().enumerate() {
                debug!(index, kind = %op.kind(), "dispatching operation");
                match self.step(index, op, operations, session, binds).await {
                    Ok(Step::Continue(record)) => session.results.capture(index, record),
                    Ok(Step::Halt(record)) => {
                        session.results.capture(index, record);
                        break;
                    }
                    Err(e) => {
                        warn!(index, kind = %op.kind(), error = %e, "operation failed");
                        outcome.failure = Some((index, e));
                        break;
                    }
                }
            }
            // the store is the only copy of each result, so a cleared slot is already freed
            outcome.results = session.results.take_records();
            outcome
        })
    }

    async fn step(
        &self,
        index: usize,
        op: &Operation,
        operations: &[Operation],
        session: &mut Session,
        binds: Option<&Binds>,
    ) -> Result<Step> {
        let ctx = Context::of(session, op, self.default_timeout);
        let args = resolve(op, &session.results, binds)?;
        let record = match op.kind() {
            OpKind::Unknown(name) => {
                return Err(IntraError::Validation(format!("unknown operation type '{name}'")));
            }
            OpKind::SetKeyspace
            | OpKind::SetTable
            | OpKind::SetConsistency
            | OpKind::SetAutoTimestamp
            | OpKind::Assume
            | OpKind::FilterMode
            | OpKind::ComponentSelect
            | OpKind::Clear => self.administer(op.kind(), &ctx, &args, session)?,
            OpKind::CreateFilter => self.register(Shape::Filter, &args)?,
            OpKind::CreateProcessor => self.register(Shape::Processor, &args)?,
            OpKind::CreateMultiProcessor => self.register(Shape::MultiProcessor, &args)?,
            OpKind::CreateServiceProcess => self.register(Shape::ServiceProcess, &args)?,
            OpKind::SaveState => {
                let handle = self.states.lock()?.keep(session.snapshot());
                info!(handle, "session state saved");
                ResultRecord::Scalar(Value::Int(handle as i64))
            }
            OpKind::RestoreState => {
                let snapshot = self.saved_state(handle(&args, "id")?)?;
                session.restore(&snapshot);
                info!(keyspace = ?session.keyspace, table = ?session.table, "session state restored");
                ResultRecord::Ok
            }
            OpKind::Prepare => {
                let template = operations[index + 1..].to_vec();
                let statements = template.len();
                let handle = self.prepared.lock()?.keep(template);
                info!(handle, statements, "statement prepared");
                return Ok(Step::Halt(ResultRecord::Scalar(Value::Int(handle as i64))));
            }
            OpKind::Set
            | OpKind::Get
            | OpKind::Slice
            | OpKind::SliceByNames
            | OpKind::BatchSet
            | OpKind::Counter
            | OpKind::CreateKeyspace
            | OpKind::CreateTable
            | OpKind::ListKeyspaces
            | OpKind::ListTables
            | OpKind::Query
            | OpKind::ExecutePrepared
            | OpKind::Process
            | OpKind::MultiProcess
            | OpKind::ServiceProcess => {
                let millis = u64::try_from(ctx.timeout.as_millis()).unwrap_or(u64::MAX);
                let started = Instant::now();
                let record = tokio::time::timeout(ctx.timeout, self.timed(op.kind(), &ctx, &args, session))
                    .await
                    .map_err(|_| IntraError::Timeout { millis })??;
                // work that never yields finishes before the timer is polled
                if started.elapsed() > ctx.timeout {
                    return Err(IntraError::Timeout { millis });
                }
                record
            }
        };
        Ok(Step::Continue(record))
    }

    fn saved_state(&self, handle: Handle) -> Result<Arc<crate::session::SessionSnapshot>> {
        self.states.lock()?.get(handle)
    }

    /// Saved states and prepared statements live until released here.
    pub fn release_state(&self, handle: Handle) -> Result<()> {
        self.states.lock()?.release(handle)?;
        info!(handle, "saved state released");
        Ok(())
    }
    pub fn release_prepared(&self, handle: Handle) -> Result<()> {
        self.prepared.lock()?.release(handle)?;
        info!(handle, "prepared statement released");
        Ok(())
    }

    // ------------- Administration -------------
    fn administer(&self, kind: &OpKind, ctx: &Context, args: &Arguments, session: &mut Session) -> Result<ResultRecord> {
        match kind {
            OpKind::SetKeyspace => session.keyspace = Some(args.text("keyspace")?),
            OpKind::SetTable => session.table = Some(table_param(args)?.ok_or_else(|| {
                IntraError::Validation("set_table: missing required parameter 'table'".into())
            })?),
            OpKind::SetConsistency => session.consistency = args.text("level")?.parse()?,
            OpKind::SetAutoTimestamp => session.auto_timestamp = args.opt_boolean("enabled")?.unwrap_or(true),
            OpKind::Assume => {
                let keyspace = match args.opt_text("keyspace")? {
                    Some(ks) => ks,
                    None => ctx.keyspace()?.to_string(),
                };
                let table = match table_param(args)? {
                    Some(t) => t,
                    None => ctx.table()?.to_string(),
                };
                let role: Role = args.text("role")?.parse()?;
                let data_type: DataType = args.text("type")?.parse()?;
                session.assume(&keyspace, &table, role, data_type);
            }
            OpKind::FilterMode => {
                if args.opt_boolean("enabled")?.unwrap_or(true) {
                    let name = args.text("name")?;
                    self.extensions.filter(&name)?;
                    session.filter = Some(name);
                } else {
                    session.filter = None;
                }
            }
            OpKind::ComponentSelect => {
                let components = args
                    .list("components")?
                    .iter()
                    .map(|c| match c {
                        Value::Text(name) => name.parse::<Component>(),
                        other => Err(IntraError::Validation(format!(
                            "component_select expects component names, got {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                // an empty selection goes back to full rows
                session.components = if components.is_empty() { None } else { Some(components) };
            }
            OpKind::Clear => session.results.clear(args.integer("index")?)?,
            other => {
                return Err(IntraError::Validation(format!("{other} is not an administrative operation")));
            }
        }
        Ok(ResultRecord::Ok)
    }

    fn register(&self, shape: Shape, args: &Arguments) -> Result<ResultRecord> {
        let default_loader = match shape {
            Shape::Filter | Shape::Processor => EXPRESSION,
            Shape::MultiProcessor | Shape::ServiceProcess => NATIVE,
        };
        let name = args.text("name")?;
        let loader = args.opt_text("loader")?.unwrap_or_else(|| default_loader.to_string());
        let source = args.text("source")?;
        self.extensions.register(shape, &name, &loader, &source)?;
        Ok(ResultRecord::Ok)
    }

    // ------------- Timed operations -------------
    async fn timed(&self, kind: &OpKind, ctx: &Context, args: &Arguments, session: &Session) -> Result<ResultRecord> {
        match kind {
            OpKind::Set => {
                let (ks, table) = (ctx.keyspace()?, ctx.table()?);
                let mutation = Mutation {
                    keyspace: ks.to_string(),
                    table: table.to_string(),
                    rowkey: datatype::encode_natural(args.required("rowkey")?)?,
                    name: datatype::encode(args.required("name")?, session.assumed(ks, table, Role::Name))?,
                    value: datatype::encode(args.required("value")?, session.assumed(ks, table, Role::Value))?,
                    timestamp: timestamp(args.opt_integer("timestamp")?, session)?,
                    ttl: ttl(args.opt_integer("ttl")?.or(ctx.ttl.map(i64::from)))?,
                };
                self.backend.write(mutation, ctx.consistency).await?;
                Ok(ResultRecord::Ok)
            }
            OpKind::Get => {
                let (ks, table) = (ctx.keyspace()?, ctx.table()?);
                let rowkey = datatype::encode_natural(args.required("rowkey")?)?;
                let name = datatype::encode(args.required("name")?, session.assumed(ks, table, Role::Name))?;
                let cells = self.backend.read(ks, table, &rowkey, &[name], ctx.consistency).await?;
                self.finish(session, ks, table, cells).await
            }
            OpKind::Slice => {
                let (ks, table) = (ctx.keyspace()?, ctx.table()?);
                let name_type = session.assumed(ks, table, Role::Name);
                let bound = |key: &str| match args.get(key) {
                    None => Ok(Vec::new()),
                    Some(Value::Text(s)) if s.is_empty() => Ok(Vec::new()),
                    Some(v) => datatype::encode(v, name_type),
                };
                let limit = args.opt_integer("limit")?.unwrap_or(DEFAULT_SLICE_LIMIT);
                let range = SliceRange {
                    start: bound("start")?,
                    end: bound("end")?,
                    limit: usize::try_from(limit)
                        .map_err(|_| IntraError::Validation(format!("slice: invalid limit {limit}")))?,
                };
                let rowkey = datatype::encode_natural(args.required("rowkey")?)?;
                let cells = self.backend.read_slice(ks, table, &rowkey, &range, ctx.consistency).await?;
                self.finish(session, ks, table, cells).await
            }
            OpKind::SliceByNames => {
                let (ks, table) = (ctx.keyspace()?, ctx.table()?);
                let name_type = session.assumed(ks, table, Role::Name);
                let names = args
                    .list("names")?
                    .iter()
                    .map(|n| datatype::encode(n, name_type))
                    .collect::<Result<Vec<_>>>()?;
                let rowkey = datatype::encode_natural(args.required("rowkey")?)?;
                let cells = self.backend.read(ks, table, &rowkey, &names, ctx.consistency).await?;
                self.finish(session, ks, table, cells).await
            }
            OpKind::BatchSet => {
                let mutations = args
                    .list("rows")?
                    .iter()
                    .map(|row| batch_mutation(row, ctx, session))
                    .collect::<Result<Vec<_>>>()?;
                self.backend.batch_write(mutations, ctx.consistency).await?;
                Ok(ResultRecord::Ok)
            }
            OpKind::Counter => {
                let (ks, table) = (ctx.keyspace()?, ctx.table()?);
                let rowkey = datatype::encode_natural(args.required("rowkey")?)?;
                let name = datatype::encode(args.required("name")?, session.assumed(ks, table, Role::Name))?;
                let delta = args.opt_integer("delta")?.unwrap_or(1);
                self.backend
                    .increment_counter(ks, table, &rowkey, &name, delta, ctx.consistency)
                    .await?;
                Ok(ResultRecord::Ok)
            }
            OpKind::CreateKeyspace => {
                let name = match args.opt_text("name")? {
                    Some(name) => name,
                    None => args.text("keyspace")?,
                };
                let replication = args.opt_integer("replication")?.unwrap_or(1);
                let replication = u32::try_from(replication).map_err(|_| {
                    IntraError::Validation(format!("create_keyspace: invalid replication {replication}"))
                })?;
                self.backend.create_keyspace(&name, replication).await?;
                Ok(ResultRecord::Ok)
            }
            OpKind::CreateTable => {
                let name = match args.opt_text("name")? {
                    Some(name) => name,
                    None => table_param(args)?.ok_or_else(|| {
                        IntraError::Validation("create_table: missing required parameter 'name'".into())
                    })?,
                };
                let keyspace = match args.opt_text("keyspace")? {
                    Some(ks) => ks,
                    None => ctx.keyspace()?.to_string(),
                };
                self.backend.create_table(&keyspace, &name).await?;
                Ok(ResultRecord::Ok)
            }
            OpKind::ListKeyspaces => {
                let names = self.backend.list_keyspaces().await?;
                Ok(ResultRecord::Scalar(Value::List(names.into_iter().map(Value::from).collect())))
            }
            OpKind::ListTables => {
                let keyspace = match args.opt_text("keyspace")? {
                    Some(ks) => ks,
                    None => ctx.keyspace()?.to_string(),
                };
                let names = self.backend.list_tables(&keyspace).await?;
                Ok(ResultRecord::Scalar(Value::List(names.into_iter().map(Value::from).collect())))
            }
            OpKind::Query => {
                let statement = args.text("statement")?;
                let version = args.opt_text("version")?.unwrap_or_else(|| DEFAULT_PROTOCOL.to_string());
                let convert = args.opt_boolean("convert")?.unwrap_or(false);
                let cells = self
                    .backend
                    .query(ctx.keyspace.as_deref(), &statement, &version, ctx.consistency)
                    .await?;
                let component = |bytes: Vec<u8>| {
                    if convert {
                        Value::Text(String::from_utf8_lossy(&bytes).into_owned())
                    } else {
                        Value::Bytes(bytes)
                    }
                };
                let rows = cells
                    .into_iter()
                    .map(|cell| Row {
                        name: Some(component(cell.name)),
                        value: Some(component(cell.value)),
                        timestamp: Some(cell.timestamp),
                        ttl: cell.ttl,
                    })
                    .collect();
                Ok(ResultRecord::Rows(rows))
            }
            OpKind::ExecutePrepared => {
                let template = self.prepared.lock()?.get(handle(args, "id")?)?;
                let binds = binds(args.get("binds"))?;
                let mut sub = session.fork(template.len());
                let outcome = self.run(&template, &mut sub, Some(&binds)).await;
                match outcome.failure {
                    Some((_, e)) => Err(e),
                    None => Ok(outcome.last()),
                }
            }
            OpKind::Process => {
                let name = args.text("name")?;
                let input = args.integer("input")?;
                let rows = captured_rows(session, input)?;
                let processor = self.extensions.processor(&name)?;
                let processed = tokio::task::spawn_blocking(move || processor.process(rows))
                    .await
                    .map_err(|e| IntraError::Extension(format!("processor '{name}' panicked: {e}")))?
                    .map_err(|e| e.within_extension(&format!("processor '{name}'")))?;
                Ok(ResultRecord::Rows(processed))
            }
            OpKind::MultiProcess => {
                let name = args.text("name")?;
                let params = args.opt_map("params")?;
                let mut inputs = BTreeMap::new();
                match args.get("inputs") {
                    Some(_) => {
                        for index in args.list("inputs")? {
                            let index = index.as_i64().ok_or_else(|| {
                                IntraError::Validation(format!("multi_process: input '{index}' is not an index"))
                            })?;
                            inputs.insert(index.to_string(), captured_rows(session, index)?);
                        }
                    }
                    None => {
                        for (index, rows) in session.results.row_lists() {
                            inputs.insert(index.to_string(), rows.clone());
                        }
                    }
                }
                let combiner = self.extensions.multi_processor(&name)?;
                let combined = tokio::task::spawn_blocking(move || combiner.combine(&inputs, &params))
                    .await
                    .map_err(|e| IntraError::Extension(format!("multi-processor '{name}' panicked: {e}")))?
                    .map_err(|e| e.within_extension(&format!("multi-processor '{name}'")))?;
                Ok(ResultRecord::Rows(combined))
            }
            OpKind::ServiceProcess => {
                let name = args.text("name")?;
                let params = args.opt_map("params")?;
                let process = self.extensions.service_process(&name)?;
                let steps = tokio::task::spawn_blocking(move || process.build(&params))
                    .await
                    .map_err(|e| IntraError::Extension(format!("service process '{name}' panicked: {e}")))?
                    .map_err(|e| e.within_extension(&format!("service process '{name}'")))?;
                let mut sub = session.fork(steps.len());
                let outcome = self.run(&steps, &mut sub, None).await;
                match outcome.failure {
                    Some((step, e)) => Err(IntraError::Extension(format!(
                        "service process '{name}' failed at step {step}: {e}"
                    ))),
                    None => Ok(outcome.last()),
                }
            }
            other => Err(IntraError::Validation(format!("{other} does not run under a timeout"))),
        }
    }

    /// Decodes cells into rows, then applies filter mode and component selection.
    async fn finish(&self, session: &Session, ks: &str, table: &str, cells: Vec<Cell>) -> Result<ResultRecord> {
        let name_type = session.assumed(ks, table, Role::Name);
        let value_type = session.assumed(ks, table, Role::Value);
        let mut rows = cells
            .into_iter()
            .map(|cell| {
                Ok(Row {
                    name: Some(datatype::decode(&cell.name, name_type)?),
                    value: Some(datatype::decode(&cell.value, value_type)?),
                    timestamp: Some(cell.timestamp),
                    ttl: cell.ttl,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(name) = &session.filter {
            let filter = self.extensions.filter(name)?;
            rows = tokio::task::spawn_blocking(move || {
                rows.into_iter().filter(|r| filter.accept(r)).collect::<Vec<Row>>()
            })
                .await
                .map_err(|e| IntraError::Extension(format!("filter '{name}' panicked: {e}")))?;
        }
        if let Some(components) = &session.components {
            rows = rows.into_iter().map(|r| r.select(components)).collect();
        }
        Ok(ResultRecord::Rows(rows))
    }
}

// ------------- Parameter helpers -------------
fn table_param(args: &Arguments) -> Result<Option<String>> {
    match args.opt_text("table")? {
        Some(table) => Ok(Some(table)),
        None => args.opt_text("columnfamily"),
    }
}

fn handle(args: &Arguments, key: &str) -> Result<Handle> {
    let id = args.integer(key)?;
    Handle::try_from(id).map_err(|_| IntraError::State(format!("unknown handle {id}")))
}

fn timestamp(explicit: Option<i64>, session: &Session) -> Result<i64> {
    match explicit {
        Some(ts) => Ok(ts),
        None if session.auto_timestamp => Ok(now_micros()),
        None => Err(IntraError::Validation(
            "a timestamp is required unless auto-timestamp is enabled".into(),
        )),
    }
}

fn ttl(seconds: Option<i64>) -> Result<Option<u32>> {
    seconds
        .map(|s| u32::try_from(s).map_err(|_| IntraError::Validation(format!("invalid ttl {s}"))))
        .transpose()
}

fn captured_rows(session: &Session, index: i64) -> Result<Vec<Row>> {
    match session.results.get(index)? {
        ResultRecord::Rows(rows) => Ok(rows.clone()),
        _ => Err(IntraError::Reference(format!("operation {index} did not return rows"))),
    }
}

fn binds(supplied: Option<&Value>) -> Result<Binds> {
    match supplied {
        None => Ok(Binds::new()),
        Some(Value::List(values)) => Ok(values
            .iter()
            .enumerate()
            .map(|(position, v)| (position as u32, v.clone()))
            .collect()),
        Some(Value::Map(values)) => values
            .iter()
            .map(|(position, v)| {
                position
                    .trim()
                    .parse::<u32>()
                    .map(|p| (p, v.clone()))
                    .map_err(|_| IntraError::Validation(format!("bind position '{position}' is not a number")))
            })
            .collect(),
        Some(other) => Err(IntraError::Validation(format!(
            "binds must be a list or a map, got {}",
            other.type_name()
        ))),
    }
}

fn batch_mutation(row: &Value, ctx: &Context, session: &Session) -> Result<Mutation> {
    let fields = row
        .as_map()
        .ok_or_else(|| IntraError::Validation(format!("batch_set: each row must be a map, got {}", row.type_name())))?;
    let field = |key: &str| fields.get(key).filter(|v| **v != Value::Null);
    let required = |key: &str| {
        field(key).ok_or_else(|| IntraError::Validation(format!("batch_set: row is missing '{key}'")))
    };
    let text = |key: &str| -> Result<Option<String>> {
        match field(key) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(other) => Err(IntraError::Validation(format!(
                "batch_set: '{key}' must be text, got {}",
                other.type_name()
            ))),
        }
    };
    let integer = |key: &str| -> Result<Option<i64>> {
        match field(key) {
            None => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                IntraError::Validation(format!("batch_set: '{key}' must be an integer, got {}", v.type_name()))
            }),
        }
    };
    let keyspace = match text("keyspace")? {
        Some(ks) => ks,
        None => ctx.keyspace()?.to_string(),
    };
    let table = match text("table")?.or(text("columnfamily")?) {
        Some(t) => t,
        None => ctx.table()?.to_string(),
    };
    Ok(Mutation {
        rowkey: datatype::encode_natural(required("rowkey")?)?,
        name: datatype::encode(required("name")?, session.assumed(&keyspace, &table, Role::Name))?,
        value: datatype::encode(required("value")?, session.assumed(&keyspace, &table, Role::Value))?,
        timestamp: timestamp(integer("timestamp")?, session)?,
        ttl: ttl(integer("ttl")?.or(ctx.ttl.map(i64::from)))?,
        keyspace,
        table,
    })
}
