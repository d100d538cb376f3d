
// used to keep parameters and results in a stable, index-ordered form
use std::collections::BTreeMap;

// used to print out readable forms of a construct
use std::fmt;
// used when parsing kind, level and component names
use std::str::FromStr;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

// our own stuff that we need
use crate::datatype::Value;
use crate::error::{IntraError, Result};

/// Timestamps are microseconds since the Unix epoch, as the store expects them.
pub type Timestamp = i64;

/// Opaque handles for saved states and prepared statements.
pub type Handle = u64;

// ------------- OpKind -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    Set,
    Get,
    Slice,
    SliceByNames,
    BatchSet,
    Counter,
    CreateKeyspace,
    CreateTable,
    ListKeyspaces,
    ListTables,
    SetKeyspace,
    SetTable,
    SetConsistency,
    SetAutoTimestamp,
    Assume,
    CreateProcessor,
    Process,
    CreateMultiProcessor,
    MultiProcess,
    CreateFilter,
    FilterMode,
    CreateServiceProcess,
    ServiceProcess,
    Query,
    Prepare,
    ExecutePrepared,
    SaveState,
    RestoreState,
    Clear,
    ComponentSelect,
    /// A kind this engine does not know. It parses, so that the chain can
    /// fail at the right index, and then fails when executed.
    Unknown(String),
}

impl OpKind {
    pub fn name(&self) -> &str {
        match self {
            OpKind::Set => "set",
            OpKind::Get => "get",
            OpKind::Slice => "slice",
            OpKind::SliceByNames => "slice_by_names",
            OpKind::BatchSet => "batch_set",
            OpKind::Counter => "counter",
            OpKind::CreateKeyspace => "create_keyspace",
            OpKind::CreateTable => "create_table",
            OpKind::ListKeyspaces => "list_keyspaces",
            OpKind::ListTables => "list_tables",
            OpKind::SetKeyspace => "set_keyspace",
            OpKind::SetTable => "set_table",
            OpKind::SetConsistency => "set_consistency",
            OpKind::SetAutoTimestamp => "set_auto_timestamp",
            OpKind::Assume => "assume",
            OpKind::CreateProcessor => "create_processor",
            OpKind::Process => "process",
            OpKind::CreateMultiProcessor => "create_multi_processor",
            OpKind::MultiProcess => "multi_process",
            OpKind::CreateFilter => "create_filter",
            OpKind::FilterMode => "filter_mode",
            OpKind::CreateServiceProcess => "create_service_process",
            OpKind::ServiceProcess => "service_process",
            OpKind::Query => "query",
            OpKind::Prepare => "prepare",
            OpKind::ExecutePrepared => "execute_prepared",
            OpKind::SaveState => "save_state",
            OpKind::RestoreState => "restore_state",
            OpKind::Clear => "clear",
            OpKind::ComponentSelect => "component_select",
            OpKind::Unknown(name) => name,
        }
    }
    // Accepts the snake_case names as well as hyphenated and older spellings.
    pub fn from_name(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "set" | "write" => OpKind::Set,
            "get" => OpKind::Get,
            "slice" => OpKind::Slice,
            "slice_by_names" | "slicebynames" => OpKind::SliceByNames,
            "batch_set" | "batchset" => OpKind::BatchSet,
            "counter" | "counter_increment" => OpKind::Counter,
            "create_keyspace" | "createkeyspace" => OpKind::CreateKeyspace,
            "create_table" | "create_column_family" | "createcolumnfamily" => OpKind::CreateTable,
            "list_keyspaces" | "listkeyspaces" => OpKind::ListKeyspaces,
            "list_tables" | "list_column_families" | "listcolumnfamilies" => OpKind::ListTables,
            "set_keyspace" | "setkeyspace" => OpKind::SetKeyspace,
            "set_table" | "set_column_family" | "setcolumnfamily" => OpKind::SetTable,
            "set_consistency" | "consistency" => OpKind::SetConsistency,
            "set_auto_timestamp" | "autotimestamp" => OpKind::SetAutoTimestamp,
            "assume" | "assume_type" => OpKind::Assume,
            "create_processor" | "createprocessor" => OpKind::CreateProcessor,
            "process" => OpKind::Process,
            "create_multi_processor" | "createmultiprocess" => OpKind::CreateMultiProcessor,
            "multi_process" | "multiprocess" => OpKind::MultiProcess,
            "create_filter" | "createfilter" => OpKind::CreateFilter,
            "filter_mode" | "set_filter_mode" | "filtermode" => OpKind::FilterMode,
            "create_service_process" | "createserviceprocess" => OpKind::CreateServiceProcess,
            "service_process" | "run_service_process" | "serviceprocess" => OpKind::ServiceProcess,
            "query" | "raw_query" | "cqlquery" => OpKind::Query,
            "prepare" | "preparedstatement" => OpKind::Prepare,
            "execute_prepared" | "executeprepared" => OpKind::ExecutePrepared,
            "save_state" | "savestate" => OpKind::SaveState,
            "restore_state" | "restorestate" => OpKind::RestoreState,
            "clear" | "clear_result" => OpKind::Clear,
            "component_select" | "componentselect" => OpKind::ComponentSelect,
            _ => OpKind::Unknown(name.to_string()),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for OpKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for OpKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(OpKind::from_name(&name))
    }
}

// ------------- ConsistencyLevel -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsistencyLevel {
    Any,
    #[default]
    One,
    Two,
    Three,
    Quorum,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    All,
}

impl ConsistencyLevel {
    pub fn name(&self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
            ConsistencyLevel::All => "ALL",
        }
    }
    /// Replicas that must acknowledge for a keyspace with replication factor `rf`.
    pub fn required(&self, rf: u32) -> u32 {
        match self {
            ConsistencyLevel::Any => 0,
            ConsistencyLevel::One | ConsistencyLevel::LocalOne => 1,
            ConsistencyLevel::Two => 2,
            ConsistencyLevel::Three => 3,
            ConsistencyLevel::Quorum | ConsistencyLevel::LocalQuorum | ConsistencyLevel::EachQuorum => {
                rf / 2 + 1
            }
            ConsistencyLevel::All => rf,
        }
    }
}

impl FromStr for ConsistencyLevel {
    type Err = IntraError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANY" => Ok(ConsistencyLevel::Any),
            "ONE" => Ok(ConsistencyLevel::One),
            "TWO" => Ok(ConsistencyLevel::Two),
            "THREE" => Ok(ConsistencyLevel::Three),
            "QUORUM" => Ok(ConsistencyLevel::Quorum),
            "LOCAL_QUORUM" => Ok(ConsistencyLevel::LocalQuorum),
            "EACH_QUORUM" => Ok(ConsistencyLevel::EachQuorum),
            "LOCAL_ONE" => Ok(ConsistencyLevel::LocalOne),
            "ALL" => Ok(ConsistencyLevel::All),
            other => Err(IntraError::Validation(format!("unknown consistency level '{other}'"))),
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ConsistencyLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ConsistencyLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

// ------------- Param -------------
/// Points at the captured result of an earlier operation in the same chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "$ref")]
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// A placeholder in a prepared template, filled in by `execute_prepared`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindMarker {
    #[serde(rename = "$bind")]
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Reference(Reference),
    Bind(BindMarker),
    Literal(Value),
}

impl Param {
    pub fn reference(index: i64, field: Option<&str>) -> Self {
        Param::Reference(Reference {
            index,
            field: field.map(str::to_string),
        })
    }
    pub fn bind(position: u32) -> Self {
        Param::Bind(BindMarker { position })
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Literal(value)
    }
}
impl From<Reference> for Param {
    fn from(reference: Reference) -> Self {
        Param::Reference(reference)
    }
}
impl From<BindMarker> for Param {
    fn from(marker: BindMarker) -> Self {
        Param::Bind(marker)
    }
}

macro_rules! literal_param {
    ($($t:ty),*) => {
        $(impl From<$t> for Param {
            fn from(v: $t) -> Self {
                Param::Literal(Value::from(v))
            }
        })*
    };
}
literal_param!(&str, String, i64, i32, u32, usize, bool, f64, Vec<u8>, Vec<Value>);

// ------------- Operation -------------
/// Per-operation settings that win over the session defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub keyspace: Option<String>,
    pub table: Option<String>,
    pub consistency: Option<ConsistencyLevel>,
    /// milliseconds
    pub timeout: Option<u64>,
    /// seconds
    pub ttl: Option<u32>,
}

/// One step of a chain. The kind is fixed at construction and only readable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "OperationWire", into = "OperationWire")]
pub struct Operation {
    kind: OpKind,
    params: BTreeMap<String, Param>,
    overrides: Overrides,
}

// The flat JSON shape of an operation.
#[derive(Serialize, Deserialize)]
struct OperationWire {
    #[serde(rename = "type")]
    kind: OpKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keyspace: Option<String>,
    #[serde(default, alias = "columnfamily", skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    consistency: Option<ConsistencyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl: Option<u32>,
}

impl From<OperationWire> for Operation {
    fn from(wire: OperationWire) -> Self {
        Self {
            kind: wire.kind,
            params: wire.params,
            overrides: Overrides {
                keyspace: wire.keyspace,
                table: wire.table,
                consistency: wire.consistency,
                timeout: wire.timeout,
                ttl: wire.ttl,
            },
        }
    }
}

impl From<Operation> for OperationWire {
    fn from(op: Operation) -> Self {
        Self {
            kind: op.kind,
            params: op.params,
            keyspace: op.overrides.keyspace,
            table: op.overrides.table,
            consistency: op.overrides.consistency,
            timeout: op.overrides.timeout,
            ttl: op.overrides.ttl,
        }
    }
}

impl Operation {
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
            overrides: Overrides::default(),
        }
    }
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }
    pub fn params(&self) -> &BTreeMap<String, Param> {
        &self.params
    }
    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }
    pub fn param(mut self, key: &str, value: impl Into<Param>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
    pub fn with_keyspace(mut self, keyspace: &str) -> Self {
        self.overrides.keyspace = Some(keyspace.to_string());
        self
    }
    pub fn with_table(mut self, table: &str) -> Self {
        self.overrides.table = Some(table.to_string());
        self
    }
    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.overrides.consistency = Some(level);
        self
    }
    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.overrides.timeout = Some(millis);
        self
    }
    pub fn with_ttl(mut self, seconds: u32) -> Self {
        self.overrides.ttl = Some(seconds);
        self
    }

    // shorthands for the common kinds
    pub fn set_keyspace(keyspace: &str) -> Self {
        Self::new(OpKind::SetKeyspace).param("keyspace", keyspace)
    }
    pub fn set_table(table: &str) -> Self {
        Self::new(OpKind::SetTable).param("table", table)
    }
    pub fn set_consistency(level: ConsistencyLevel) -> Self {
        Self::new(OpKind::SetConsistency).param("level", level.name())
    }
    pub fn set_auto_timestamp(enabled: bool) -> Self {
        Self::new(OpKind::SetAutoTimestamp).param("enabled", enabled)
    }
    pub fn assume(role: &str, data_type: &str) -> Self {
        Self::new(OpKind::Assume)
            .param("role", role)
            .param("type", data_type)
    }
    pub fn create_keyspace(name: &str, replication: u32) -> Self {
        Self::new(OpKind::CreateKeyspace)
            .param("name", name)
            .param("replication", replication)
    }
    pub fn create_table(name: &str) -> Self {
        Self::new(OpKind::CreateTable).param("name", name)
    }
    pub fn set(rowkey: impl Into<Param>, name: impl Into<Param>, value: impl Into<Param>) -> Self {
        Self::new(OpKind::Set)
            .param("rowkey", rowkey)
            .param("name", name)
            .param("value", value)
    }
    pub fn get(rowkey: impl Into<Param>, name: impl Into<Param>) -> Self {
        Self::new(OpKind::Get)
            .param("rowkey", rowkey)
            .param("name", name)
    }
    pub fn slice(rowkey: impl Into<Param>, start: impl Into<Param>, end: impl Into<Param>, limit: u32) -> Self {
        Self::new(OpKind::Slice)
            .param("rowkey", rowkey)
            .param("start", start)
            .param("end", end)
            .param("limit", limit)
    }
    pub fn counter(rowkey: impl Into<Param>, name: impl Into<Param>, delta: i64) -> Self {
        Self::new(OpKind::Counter)
            .param("rowkey", rowkey)
            .param("name", name)
            .param("delta", delta)
    }
    pub fn create_filter(name: &str, loader: &str, source: &str) -> Self {
        Self::new(OpKind::CreateFilter)
            .param("name", name)
            .param("loader", loader)
            .param("source", source)
    }
    pub fn create_processor(name: &str, loader: &str, source: &str) -> Self {
        Self::new(OpKind::CreateProcessor)
            .param("name", name)
            .param("loader", loader)
            .param("source", source)
    }
    pub fn create_multi_processor(name: &str, loader: &str, source: &str) -> Self {
        Self::new(OpKind::CreateMultiProcessor)
            .param("name", name)
            .param("loader", loader)
            .param("source", source)
    }
    pub fn create_service_process(name: &str, loader: &str, source: &str) -> Self {
        Self::new(OpKind::CreateServiceProcess)
            .param("name", name)
            .param("loader", loader)
            .param("source", source)
    }
    pub fn filter_mode(name: &str, enabled: bool) -> Self {
        Self::new(OpKind::FilterMode)
            .param("name", name)
            .param("enabled", enabled)
    }
    pub fn process(name: &str, input: i64) -> Self {
        Self::new(OpKind::Process)
            .param("name", name)
            .param("input", input)
    }
    pub fn save_state() -> Self {
        Self::new(OpKind::SaveState)
    }
    pub fn restore_state(id: Handle) -> Self {
        Self::new(OpKind::RestoreState).param("id", id as i64)
    }
    pub fn clear(index: usize) -> Self {
        Self::new(OpKind::Clear).param("index", index)
    }
    pub fn component_select(components: &[Component]) -> Self {
        let list: Vec<Value> = components.iter().map(|c| Value::from(c.name())).collect();
        Self::new(OpKind::ComponentSelect).param("components", list)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        let keys: Vec<&str> = self.params.keys().map(String::as_str).collect();
        write!(f, "{})", keys.join(", "))
    }
}

// ------------- Request -------------
/// Hints that shape the session a chain starts from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHints {
    #[serde(default, deserialize_with = "lenient_consistency", skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<Handle>,
}

// an unknown level in the hint falls back to the engine default instead of failing the request
fn lenient_consistency<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<ConsistencyLevel>, D::Error> {
    let hint = Option::<String>::deserialize(deserializer)?;
    Ok(hint.and_then(|name| match name.parse() {
        Ok(level) => Some(level),
        Err(e) => {
            warn!(hint = %name, error = %e, "ignoring consistency hint");
            None
        }
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(flatten)]
    pub hints: SessionHints,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }
    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.hints.consistency = Some(level);
        self
    }
    pub fn restoring(mut self, handle: Handle) -> Self {
        self.hints.restore = Some(handle);
        self
    }
}

// ------------- Row -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Name,
    Value,
    Timestamp,
    Ttl,
}

impl Component {
    pub const ALL: [Component; 4] = [Component::Name, Component::Value, Component::Timestamp, Component::Ttl];

    pub fn name(&self) -> &'static str {
        match self {
            Component::Name => "name",
            Component::Value => "value",
            Component::Timestamp => "timestamp",
            Component::Ttl => "ttl",
        }
    }
}

impl FromStr for Component {
    type Err = IntraError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" | "column" => Ok(Component::Name),
            "value" => Ok(Component::Value),
            "timestamp" => Ok(Component::Timestamp),
            "ttl" => Ok(Component::Ttl),
            other => Err(IntraError::Validation(format!("unknown row component '{other}'"))),
        }
    }
}

/// One column of a result set. Components left out by a component selection are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

impl Row {
    pub fn new(name: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value.into()),
            timestamp: None,
            ttl: None,
        }
    }
    pub fn component(&self, component: Component) -> Option<Value> {
        match component {
            Component::Name => self.name.clone(),
            Component::Value => self.value.clone(),
            Component::Timestamp => self.timestamp.map(Value::Int),
            Component::Ttl => self.ttl.map(Value::from),
        }
    }
    pub fn set_component(&mut self, component: Component, value: Value) -> Result<()> {
        match component {
            Component::Name => self.name = Some(value),
            Component::Value => self.value = Some(value),
            Component::Timestamp => {
                self.timestamp = Some(value.as_i64().ok_or_else(|| {
                    IntraError::Validation(format!("timestamp must be an integer, got {}", value.type_name()))
                })?)
            }
            Component::Ttl => {
                let ttl = value.as_i64().and_then(|t| u32::try_from(t).ok()).ok_or_else(|| {
                    IntraError::Validation(format!("ttl must be a non-negative integer, got {value}"))
                })?;
                self.ttl = Some(ttl);
            }
        }
        Ok(())
    }
    /// Keeps only the selected components.
    pub fn select(mut self, keep: &[Component]) -> Self {
        for component in Component::ALL {
            if !keep.contains(&component) {
                match component {
                    Component::Name => self.name = None,
                    Component::Value => self.value = None,
                    Component::Timestamp => self.timestamp = None,
                    Component::Ttl => self.ttl = None,
                }
            }
        }
        self
    }
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        for component in Component::ALL {
            if let Some(v) = self.component(component) {
                map.insert(component.name().to_string(), v);
            }
        }
        Value::Map(map)
    }
}

// ------------- Results -------------
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRecord {
    Rows(Vec<Row>),
    Ok,
    Scalar(Value),
}

impl ResultRecord {
    pub fn rows(&self) -> Option<&Vec<Row>> {
        match self {
            ResultRecord::Rows(rows) => Some(rows),
            _ => None,
        }
    }
    pub fn scalar(&self) -> Option<&Value> {
        match self {
            ResultRecord::Scalar(v) => Some(v),
            _ => None,
        }
    }
    pub fn is_ok_status(&self) -> bool {
        matches!(self, ResultRecord::Ok)
    }
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ResultRecord::Rows(rows) => rows.serialize(serializer),
            ResultRecord::Ok => serializer.serialize_str("OK"),
            ResultRecord::Scalar(v) => v.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionRecord {
    pub message: String,
    pub index: usize,
}

/// Results keyed by operation index, plus the single exception that halted the chain, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub results: BTreeMap<usize, ResultRecord>,
    pub exception: Option<ExceptionRecord>,
}

impl Response {
    pub fn result(&self, index: usize) -> Option<&ResultRecord> {
        self.results.get(&index)
    }
    pub fn rows(&self, index: usize) -> Option<&Vec<Row>> {
        self.results.get(&index).and_then(ResultRecord::rows)
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries = if self.exception.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(entries))?;
        map.serialize_entry("results", &IndexOrdered(&self.results))?;
        if let Some(exception) = &self.exception {
            map.serialize_entry("exception", exception)?;
        }
        map.end()
    }
}

// keys are written as strings in numeric order, not lexical order
struct IndexOrdered<'a>(&'a BTreeMap<usize, ResultRecord>);

impl Serialize for IndexOrdered<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (index, record) in self.0 {
            map.serialize_entry(&index.to_string(), record)?;
        }
        map.end()
    }
}
