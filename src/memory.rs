
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

// our own stuff that we need
use crate::backend::{check_consistency, expired, now_micros, parse_statement, Backend, Cell, Mutation, SliceRange};
use crate::construct::{ConsistencyLevel, Timestamp};
use crate::error::{IntraError, Result};
use crate::session::HandleHasher;

#[derive(Debug, Clone)]
struct StoredCell {
    value: Vec<u8>,
    timestamp: Timestamp,
    ttl: Option<u32>,
}

impl StoredCell {
    fn live(&self, now: Timestamp) -> bool {
        !expired(self.timestamp, self.ttl, now)
    }
}

type Columns = BTreeMap<Vec<u8>, StoredCell>;
type Rows = BTreeMap<Vec<u8>, Columns>;

#[derive(Debug)]
struct Keyspace {
    replication: u32,
    tables: HashMap<String, Rows, HandleHasher>,
}

type Keyspaces = HashMap<String, Keyspace, HandleHasher>;

fn keyspace<'a>(keyspaces: &'a Keyspaces, name: &str) -> Result<&'a Keyspace> {
    keyspaces
        .get(name)
        .ok_or_else(|| IntraError::Backend(format!("Keyspace '{name}' does not exist")))
}

fn table<'a>(keyspaces: &'a Keyspaces, ks: &str, name: &str) -> Result<(&'a Rows, u32)> {
    let found = keyspace(keyspaces, ks)?;
    found
        .tables
        .get(name)
        .map(|rows| (rows, found.replication))
        .ok_or_else(|| IntraError::Backend(format!("Table '{ks}.{name}' does not exist")))
}

fn table_mut<'a>(keyspaces: &'a mut Keyspaces, ks: &str, name: &str) -> Result<&'a mut Rows> {
    keyspaces
        .get_mut(ks)
        .ok_or_else(|| IntraError::Backend(format!("Keyspace '{ks}' does not exist")))?
        .tables
        .get_mut(name)
        .ok_or_else(|| IntraError::Backend(format!("Table '{ks}.{name}' does not exist")))
}

fn to_cell(name: &[u8], stored: &StoredCell) -> Cell {
    Cell {
        name: name.to_vec(),
        value: stored.value.clone(),
        timestamp: stored.timestamp,
        ttl: stored.ttl,
    }
}

// last write wins, an equal timestamp overwrites
fn apply(rows: &mut Rows, mutation: &Mutation) {
    let columns = rows.entry(mutation.rowkey.clone()).or_default();
    let newer = columns
        .get(&mutation.name)
        .is_none_or(|existing| mutation.timestamp >= existing.timestamp);
    if newer {
        columns.insert(
            mutation.name.clone(),
            StoredCell {
                value: mutation.value.clone(),
                timestamp: mutation.timestamp,
                ttl: mutation.ttl,
            },
        );
    }
}

/// An in-process wide-column store. It keeps everything in memory, honours
/// ttl and last-write-wins, and simulates `nodes` live replicas for
/// consistency checks.
#[derive(Debug)]
pub struct MemoryBackend {
    nodes: u32,
    keyspaces: RwLock<Keyspaces>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_nodes(1)
    }
    pub fn with_nodes(nodes: u32) -> Self {
        Self {
            nodes,
            keyspaces: RwLock::new(Keyspaces::default()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn read(
        &self,
        keyspace: &str,
        table_name: &str,
        rowkey: &[u8],
        names: &[Vec<u8>],
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>> {
        let keyspaces = self.keyspaces.read()?;
        let (rows, replication) = table(&keyspaces, keyspace, table_name)?;
        check_consistency(level, replication, self.nodes, true)?;
        let now = now_micros();
        let Some(columns) = rows.get(rowkey) else {
            return Ok(Vec::new());
        };
        Ok(names
            .iter()
            .filter_map(|name| {
                columns
                    .get(name)
                    .filter(|stored| stored.live(now))
                    .map(|stored| to_cell(name, stored))
            })
            .collect())
    }

    async fn read_slice(
        &self,
        keyspace: &str,
        table_name: &str,
        rowkey: &[u8],
        range: &SliceRange,
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>> {
        let keyspaces = self.keyspaces.read()?;
        let (rows, replication) = table(&keyspaces, keyspace, table_name)?;
        check_consistency(level, replication, self.nodes, true)?;
        let now = now_micros();
        let Some(columns) = rows.get(rowkey) else {
            return Ok(Vec::new());
        };
        Ok(columns
            .iter()
            .filter(|(name, stored)| range.contains(name) && stored.live(now))
            .take(range.limit)
            .map(|(name, stored)| to_cell(name, stored))
            .collect())
    }

    async fn write(&self, mutation: Mutation, level: ConsistencyLevel) -> Result<()> {
        self.batch_write(vec![mutation], level).await
    }

    async fn batch_write(&self, mutations: Vec<Mutation>, level: ConsistencyLevel) -> Result<()> {
        let mut keyspaces = self.keyspaces.write()?;
        // every target is checked before anything is applied
        for mutation in &mutations {
            let (_, replication) = table(&keyspaces, &mutation.keyspace, &mutation.table)?;
            check_consistency(level, replication, self.nodes, false)?;
        }
        for mutation in &mutations {
            apply(table_mut(&mut keyspaces, &mutation.keyspace, &mutation.table)?, mutation);
        }
        debug!(mutations = mutations.len(), "batch applied");
        Ok(())
    }

    async fn increment_counter(
        &self,
        keyspace: &str,
        table_name: &str,
        rowkey: &[u8],
        name: &[u8],
        delta: i64,
        level: ConsistencyLevel,
    ) -> Result<()> {
        let mut keyspaces = self.keyspaces.write()?;
        let (_, replication) = table(&keyspaces, keyspace, table_name)?;
        check_consistency(level, replication, self.nodes, false)?;
        let now = now_micros();
        let columns = table_mut(&mut keyspaces, keyspace, table_name)?
            .entry(rowkey.to_vec())
            .or_default();
        let current = match columns.get(name).filter(|stored| stored.live(now)) {
            None => 0,
            Some(stored) => {
                let raw: [u8; 8] = stored.value.as_slice().try_into().map_err(|_| {
                    IntraError::Backend(format!(
                        "column '{}' does not hold a counter",
                        String::from_utf8_lossy(name)
                    ))
                })?;
                i64::from_be_bytes(raw)
            }
        };
        let total = current
            .checked_add(delta)
            .ok_or_else(|| IntraError::Backend("counter overflow".into()))?;
        columns.insert(
            name.to_vec(),
            StoredCell {
                value: total.to_be_bytes().to_vec(),
                timestamp: now,
                ttl: None,
            },
        );
        Ok(())
    }

    async fn create_keyspace(&self, name: &str, replication: u32) -> Result<()> {
        if replication == 0 {
            return Err(IntraError::Backend("replication factor must be at least 1".into()));
        }
        let mut keyspaces = self.keyspaces.write()?;
        if keyspaces.contains_key(name) {
            return Err(IntraError::Backend(format!("Keyspace '{name}' already exists")));
        }
        keyspaces.insert(
            name.to_string(),
            Keyspace {
                replication,
                tables: HashMap::default(),
            },
        );
        Ok(())
    }

    async fn create_table(&self, keyspace: &str, name: &str) -> Result<()> {
        let mut keyspaces = self.keyspaces.write()?;
        let found = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| IntraError::Backend(format!("Keyspace '{keyspace}' does not exist")))?;
        if found.tables.contains_key(name) {
            return Err(IntraError::Backend(format!("Table '{keyspace}.{name}' already exists")));
        }
        found.tables.insert(name.to_string(), Rows::new());
        Ok(())
    }

    async fn list_keyspaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.keyspaces.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_tables(&self, keyspace_name: &str) -> Result<Vec<String>> {
        let keyspaces = self.keyspaces.read()?;
        let mut names: Vec<String> = keyspace(&keyspaces, keyspace_name)?.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn query(
        &self,
        keyspace: Option<&str>,
        statement: &str,
        version: &str,
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>> {
        let select = parse_statement(statement, version)?;
        let ks = select
            .keyspace
            .as_deref()
            .or(keyspace)
            .ok_or_else(|| IntraError::Backend(format!("no keyspace given for statement: {statement}")))?;
        let keyspaces = self.keyspaces.read()?;
        let (rows, replication) = table(&keyspaces, ks, &select.table)?;
        check_consistency(level, replication, self.nodes, true)?;
        let now = now_micros();
        let mut cells = Vec::new();
        let live_rows = rows
            .iter()
            .map(|(rowkey, columns)| (rowkey, columns.iter().filter(|(_, c)| c.live(now)).collect::<Vec<_>>()))
            .filter(|(_, live)| !live.is_empty())
            .take(select.limit.unwrap_or(usize::MAX));
        for (rowkey, live) in live_rows {
            let newest = live.iter().map(|(_, c)| c.timestamp).max().unwrap_or_default();
            cells.push(Cell {
                name: b"key".to_vec(),
                value: rowkey.clone(),
                timestamp: newest,
                ttl: None,
            });
            cells.extend(live.into_iter().map(|(name, stored)| to_cell(name, stored)));
        }
        Ok(cells)
    }
}
