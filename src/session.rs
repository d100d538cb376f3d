
use std::sync::Arc;

// keepers and assumption tables use HashMap with a fast hasher for short keys
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::{BTreeMap, HashMap};

use std::str::FromStr;

// our own stuff that we need
use crate::construct::{Component, ConsistencyLevel, Handle, ResultRecord, Row};
use crate::datatype::DataType;
use crate::error::{IntraError, Result};

pub type HandleHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: Handle = 0;

// ------------- Role -------------
/// The part of a column an assumed type applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Name,
    Value,
}

impl FromStr for Role {
    type Err = IntraError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" | "column" => Ok(Role::Name),
            "value" => Ok(Role::Value),
            other => Err(IntraError::Validation(format!(
                "assumption role must be name, column or value, not '{other}'"
            ))),
        }
    }
}

pub type AssumptionKey = (String, String, Role);
pub type Assumptions = HashMap<AssumptionKey, DataType, HandleHasher>;

// ------------- ResultStore -------------
#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Captured(ResultRecord),
    Cleared,
}

/// Captured results of a chain, one slot per operation index. Lookups and
/// evictions are constant time and every failure says which rule was broken.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    slots: Vec<Slot>,
}

impl ResultStore {
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: vec![Slot::Pending; len],
        }
    }
    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
    fn slot(&self, index: i64) -> Result<(usize, &Slot)> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i).map(|slot| (i, slot)))
            .ok_or_else(|| {
                IntraError::Reference(format!(
                    "operation index {index} is out of range for a chain of {} operations",
                    self.slots.len()
                ))
            })
    }
    pub fn get(&self, index: i64) -> Result<&ResultRecord> {
        match self.slot(index)? {
            (_, Slot::Captured(record)) => Ok(record),
            (i, Slot::Pending) => Err(IntraError::Reference(format!(
                "operation {i} has not been executed yet"
            ))),
            (i, Slot::Cleared) => Err(IntraError::Reference(format!(
                "the result of operation {i} has been cleared"
            ))),
        }
    }
    pub fn capture(&mut self, index: usize, record: ResultRecord) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Slot::Pending);
        }
        self.slots[index] = Slot::Captured(record);
    }
    pub fn clear(&mut self, index: i64) -> Result<()> {
        match self.slot(index)? {
            (i, Slot::Pending) => Err(IntraError::Reference(format!(
                "operation {i} has not been executed yet and cannot be cleared"
            ))),
            (i, _) => {
                self.slots[i] = Slot::Cleared;
                Ok(())
            }
        }
    }
    /// Drains every executed slot into the response layout. A cleared
    /// slot reads as an empty row list.
    pub fn take_records(&mut self) -> BTreeMap<usize, ResultRecord> {
        std::mem::take(&mut self.slots)
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Captured(record) => Some((i, record)),
                Slot::Cleared => Some((i, ResultRecord::Rows(Vec::new()))),
                Slot::Pending => None,
            })
            .collect()
    }
    /// Every captured row list, keyed by its operation index.
    pub fn row_lists(&self) -> impl Iterator<Item = (usize, &Vec<Row>)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Captured(ResultRecord::Rows(rows)) => Some((i, rows)),
            _ => None,
        })
    }
}

// ------------- Session -------------
/// The part of a session that save-state keeps. Never mutated once saved.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub keyspace: Option<String>,
    pub table: Option<String>,
    pub consistency: ConsistencyLevel,
    pub auto_timestamp: bool,
    pub assumptions: Assumptions,
}

/// Mutable context of a single chain.
#[derive(Debug, Clone)]
pub struct Session {
    pub keyspace: Option<String>,
    pub table: Option<String>,
    pub consistency: ConsistencyLevel,
    pub auto_timestamp: bool,
    pub assumptions: Assumptions,
    pub results: ResultStore,
    /// name of the filter applied to get and slice results, when filter mode is on
    pub filter: Option<String>,
    pub components: Option<Vec<Component>>,
}

impl Session {
    pub fn new(consistency: ConsistencyLevel, operations: usize) -> Self {
        Self {
            keyspace: None,
            table: None,
            consistency,
            auto_timestamp: false,
            assumptions: Assumptions::default(),
            results: ResultStore::with_len(operations),
            filter: None,
            components: None,
        }
    }
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            keyspace: self.keyspace.clone(),
            table: self.table.clone(),
            consistency: self.consistency,
            auto_timestamp: self.auto_timestamp,
            assumptions: self.assumptions.clone(),
        }
    }
    // copy-on-restore, the snapshot itself stays shared and untouched
    pub fn restore(&mut self, snapshot: &SessionSnapshot) {
        self.keyspace = snapshot.keyspace.clone();
        self.table = snapshot.table.clone();
        self.consistency = snapshot.consistency;
        self.auto_timestamp = snapshot.auto_timestamp;
        self.assumptions = snapshot.assumptions.clone();
    }
    /// A copy of this session for a sub-chain, with a results store of its own.
    pub fn fork(&self, operations: usize) -> Self {
        let mut forked = self.clone();
        forked.results = ResultStore::with_len(operations);
        forked
    }
    pub fn assume(&mut self, keyspace: &str, table: &str, role: Role, data_type: DataType) {
        self.assumptions
            .insert((keyspace.to_string(), table.to_string(), role), data_type);
    }
    pub fn assumed(&self, keyspace: &str, table: &str, role: Role) -> Option<DataType> {
        self.assumptions
            .get(&(keyspace.to_string(), table.to_string(), role))
            .copied()
    }
}

// ------------- Keepers -------------
#[derive(Debug)]
pub struct HandleGenerator {
    lower_bound: Handle,
}

impl HandleGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
        }
    }
    pub fn generate(&mut self) -> Handle {
        self.lower_bound += 1;
        self.lower_bound
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out opaque handles for immutable, shareable values.
#[derive(Debug)]
pub struct HandleKeeper<T> {
    what: &'static str,
    generator: HandleGenerator,
    kept: HashMap<Handle, Arc<T>, HandleHasher>,
}

impl<T> HandleKeeper<T> {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            generator: HandleGenerator::new(),
            kept: HashMap::default(),
        }
    }
    pub fn keep(&mut self, value: T) -> Handle {
        let handle = self.generator.generate();
        self.kept.insert(handle, Arc::new(value));
        handle
    }
    pub fn get(&self, handle: Handle) -> Result<Arc<T>> {
        self.kept
            .get(&handle)
            .map(Arc::clone)
            .ok_or_else(|| IntraError::State(format!("unknown {} handle {handle}", self.what)))
    }
    /// Drops a kept value. Chains already holding it keep their copy.
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        self.kept
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| IntraError::State(format!("unknown {} handle {handle}", self.what)))
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

pub type StateKeeper = HandleKeeper<SessionSnapshot>;
pub type PreparedKeeper = HandleKeeper<Vec<crate::construct::Operation>>;

impl StateKeeper {
    pub fn for_states() -> Self {
        Self::new("saved state")
    }
}

impl PreparedKeeper {
    pub fn for_statements() -> Self {
        Self::new("prepared statement")
    }
}
