
use async_trait::async_trait;

// used to recognise the statements the built-in stores can answer
use lazy_static::lazy_static;
use regex::Regex;

// our own stuff that we need
use crate::construct::{ConsistencyLevel, Timestamp};
use crate::error::{IntraError, Result};

/// A stored column as the backend returns it, names and values still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: Timestamp,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub keyspace: String,
    pub table: String,
    pub rowkey: Vec<u8>,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: Timestamp,
    pub ttl: Option<u32>,
}

/// Inclusive column name range; an empty bound is open.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub limit: usize,
}

impl SliceRange {
    pub fn contains(&self, name: &[u8]) -> bool {
        (self.start.is_empty() || name >= self.start.as_slice())
            && (self.end.is_empty() || name <= self.end.as_slice())
    }
}

/// The storage boundary the chain interpreter talks to. Implementations must
/// be safe to share between concurrently executing chains.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn read(
        &self,
        keyspace: &str,
        table: &str,
        rowkey: &[u8],
        names: &[Vec<u8>],
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>>;
    async fn read_slice(
        &self,
        keyspace: &str,
        table: &str,
        rowkey: &[u8],
        range: &SliceRange,
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>>;
    async fn write(&self, mutation: Mutation, level: ConsistencyLevel) -> Result<()>;
    async fn batch_write(&self, mutations: Vec<Mutation>, level: ConsistencyLevel) -> Result<()>;
    async fn increment_counter(
        &self,
        keyspace: &str,
        table: &str,
        rowkey: &[u8],
        name: &[u8],
        delta: i64,
        level: ConsistencyLevel,
    ) -> Result<()>;
    async fn create_keyspace(&self, name: &str, replication: u32) -> Result<()>;
    async fn create_table(&self, keyspace: &str, name: &str) -> Result<()>;
    async fn list_keyspaces(&self) -> Result<Vec<String>>;
    async fn list_tables(&self, keyspace: &str) -> Result<Vec<String>>;
    async fn query(
        &self,
        keyspace: Option<&str>,
        statement: &str,
        version: &str,
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>>;
}

// ------------- Shared helpers -------------
/// Fails the way a cluster with `nodes` live replicas would when fewer than
/// the required replicas can answer.
pub fn check_consistency(level: ConsistencyLevel, replication: u32, nodes: u32, reading: bool) -> Result<()> {
    if reading && level == ConsistencyLevel::Any {
        return Err(IntraError::Backend("consistency level ANY is not supported for reads".into()));
    }
    let live = replication.min(nodes);
    let required = level.required(replication);
    if required > live {
        return Err(IntraError::Backend(format!(
            "unavailable: {level} requires {required} replicas but only {live} are alive"
        )));
    }
    Ok(())
}

pub fn now_micros() -> Timestamp {
    chrono::Utc::now().timestamp_micros()
}

/// Whether a cell written at `timestamp` with `ttl` seconds has expired at `now`.
pub fn expired(timestamp: Timestamp, ttl: Option<u32>, now: Timestamp) -> bool {
    match ttl {
        Some(seconds) => timestamp.saturating_add(i64::from(seconds) * 1_000_000) <= now,
        None => false,
    }
}

/// A parsed `select * from [keyspace.]table [limit n]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub keyspace: Option<String>,
    pub table: String,
    pub limit: Option<usize>,
}

lazy_static! {
    static ref SELECT: Regex = Regex::new(
        r"(?i)^\s*select\s+\*\s+from\s+(?:([a-z_][a-z0-9_]*)\.)?([a-z_][a-z0-9_]*)(?:\s+limit\s+(\d+))?\s*;?\s*$"
    )
    .unwrap();
}

pub fn parse_statement(statement: &str, version: &str) -> Result<Select> {
    if !(version.starts_with('2') || version.starts_with('3')) {
        return Err(IntraError::Backend(format!("unsupported protocol version '{version}'")));
    }
    let captures = SELECT
        .captures(statement)
        .ok_or_else(|| IntraError::Backend(format!("unsupported statement: {statement}")))?;
    let limit = match captures.get(3) {
        Some(m) => Some(
            m.as_str()
                .parse()
                .map_err(|_| IntraError::Backend(format!("invalid limit in statement: {statement}")))?,
        ),
        None => None,
    };
    Ok(Select {
        keyspace: captures.get(1).map(|m| m.as_str().to_string()),
        table: captures.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        limit,
    })
}
