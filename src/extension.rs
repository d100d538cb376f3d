//! Extension capabilities and the registry that keeps them.
//!
//! Callers register filters, processors, multi-processors and service
//! processes by name, handing over source text together with a loader tag.
//! The registry does not know how source text becomes code; it asks the
//! [`Loader`] registered under the tag and only checks that what comes back
//! has the requested [`Shape`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::info;

// our own stuff that we need
use crate::construct::{Operation, Row};
use crate::datatype::Value;
use crate::error::{IntraError, Result};
use crate::expression::ExpressionLoader;
use crate::session::HandleHasher;

// ------------- Capabilities -------------
pub trait Filter: Send + Sync {
    fn accept(&self, row: &Row) -> bool;
}

pub trait Processor: Send + Sync {
    fn process(&self, rows: Vec<Row>) -> Result<Vec<Row>>;
}

/// Inputs are keyed by the string form of the operation index that produced them.
pub trait MultiProcessor: Send + Sync {
    fn combine(&self, inputs: &BTreeMap<String, Vec<Row>>, params: &BTreeMap<String, Value>) -> Result<Vec<Row>>;
}

/// Builds the sub-chain a service process runs.
pub trait ServiceProcess: Send + Sync {
    fn build(&self, params: &BTreeMap<String, Value>) -> Result<Vec<Operation>>;
}

impl<F> Filter for F
where
    F: Fn(&Row) -> bool + Send + Sync,
{
    fn accept(&self, row: &Row) -> bool {
        self(row)
    }
}

impl<F> Processor for F
where
    F: Fn(Vec<Row>) -> Result<Vec<Row>> + Send + Sync,
{
    fn process(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        self(rows)
    }
}

impl<F> MultiProcessor for F
where
    F: Fn(&BTreeMap<String, Vec<Row>>, &BTreeMap<String, Value>) -> Result<Vec<Row>> + Send + Sync,
{
    fn combine(&self, inputs: &BTreeMap<String, Vec<Row>>, params: &BTreeMap<String, Value>) -> Result<Vec<Row>> {
        self(inputs, params)
    }
}

impl<F> ServiceProcess for F
where
    F: Fn(&BTreeMap<String, Value>) -> Result<Vec<Operation>> + Send + Sync,
{
    fn build(&self, params: &BTreeMap<String, Value>) -> Result<Vec<Operation>> {
        self(params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Filter,
    Processor,
    MultiProcessor,
    ServiceProcess,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Shape::Filter => "filter",
            Shape::Processor => "processor",
            Shape::MultiProcessor => "multi-processor",
            Shape::ServiceProcess => "service process",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone)]
pub enum Capability {
    Filter(Arc<dyn Filter>),
    Processor(Arc<dyn Processor>),
    MultiProcessor(Arc<dyn MultiProcessor>),
    ServiceProcess(Arc<dyn ServiceProcess>),
}

impl Capability {
    pub fn shape(&self) -> Shape {
        match self {
            Capability::Filter(_) => Shape::Filter,
            Capability::Processor(_) => Shape::Processor,
            Capability::MultiProcessor(_) => Shape::MultiProcessor,
            Capability::ServiceProcess(_) => Shape::ServiceProcess,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Capability({})", self.shape())
    }
}

// ------------- Loaders -------------
/// Turns source text into a capability of the requested shape.
pub trait Loader: Send + Sync {
    fn compile(&self, source: &str, shape: Shape) -> Result<Capability>;
}

/// A catalog of host-provided closures; the source text is the symbol name.
#[derive(Default)]
pub struct NativeLoader {
    symbols: HashMap<String, Capability, HandleHasher>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn filter(mut self, symbol: &str, filter: impl Filter + 'static) -> Self {
        self.symbols.insert(symbol.to_string(), Capability::Filter(Arc::new(filter)));
        self
    }
    pub fn processor(mut self, symbol: &str, processor: impl Processor + 'static) -> Self {
        self.symbols.insert(symbol.to_string(), Capability::Processor(Arc::new(processor)));
        self
    }
    pub fn multi_processor(mut self, symbol: &str, combiner: impl MultiProcessor + 'static) -> Self {
        self.symbols.insert(symbol.to_string(), Capability::MultiProcessor(Arc::new(combiner)));
        self
    }
    pub fn service_process(mut self, symbol: &str, process: impl ServiceProcess + 'static) -> Self {
        self.symbols.insert(symbol.to_string(), Capability::ServiceProcess(Arc::new(process)));
        self
    }
}

impl Loader for NativeLoader {
    fn compile(&self, source: &str, shape: Shape) -> Result<Capability> {
        let symbol = source.trim();
        let capability = self
            .symbols
            .get(symbol)
            .ok_or_else(|| IntraError::Extension(format!("no native symbol named '{symbol}'")))?;
        if capability.shape() != shape {
            return Err(IntraError::Extension(format!(
                "native symbol '{symbol}' is a {}, not a {shape}",
                capability.shape()
            )));
        }
        Ok(capability.clone())
    }
}

// ------------- ExtensionKeeper -------------
pub const NATIVE: &str = "native";
pub const EXPRESSION: &str = "expr";

/// Registry of named capabilities, one namespace per shape. Lookups take a
/// read lock, registrations compile first and then swap the entry in.
pub struct ExtensionKeeper {
    loaders: RwLock<HashMap<String, Arc<dyn Loader>, HandleHasher>>,
    kept: RwLock<HashMap<(Shape, String), Capability, HandleHasher>>,
}

impl ExtensionKeeper {
    pub fn new() -> Self {
        let mut loaders: HashMap<String, Arc<dyn Loader>, HandleHasher> = HashMap::default();
        loaders.insert(EXPRESSION.to_string(), Arc::new(ExpressionLoader));
        loaders.insert(NATIVE.to_string(), Arc::new(NativeLoader::new()));
        Self {
            loaders: RwLock::new(loaders),
            kept: RwLock::new(HashMap::default()),
        }
    }
    pub fn add_loader(&self, tag: &str, loader: impl Loader + 'static) -> Result<()> {
        self.loaders.write()?.insert(tag.to_string(), Arc::new(loader));
        Ok(())
    }
    /// Compiles and keeps a capability. Returns true if an earlier one was replaced.
    pub fn register(&self, shape: Shape, name: &str, tag: &str, source: &str) -> Result<bool> {
        let loader = self
            .loaders
            .read()?
            .get(tag)
            .map(Arc::clone)
            .ok_or_else(|| IntraError::Extension(format!("no loader registered for tag '{tag}'")))?;
        let capability = loader.compile(source, shape).map_err(|e| e.within_extension(name))?;
        if capability.shape() != shape {
            return Err(IntraError::Extension(format!(
                "loader '{tag}' produced a {} for {shape} '{name}'",
                capability.shape()
            )));
        }
        let replaced = self
            .kept
            .write()?
            .insert((shape, name.to_string()), capability)
            .is_some();
        info!(%shape, name, loader = tag, replaced, "capability registered");
        Ok(replaced)
    }
    fn lookup(&self, shape: Shape, name: &str) -> Result<Capability> {
        self.kept
            .read()?
            .get(&(shape, name.to_string()))
            .cloned()
            .ok_or_else(|| IntraError::Extension(format!("no {shape} registered under the name '{name}'")))
    }
    pub fn filter(&self, name: &str) -> Result<Arc<dyn Filter>> {
        match self.lookup(Shape::Filter, name)? {
            Capability::Filter(f) => Ok(f),
            other => Err(IntraError::Extension(format!("'{name}' is a {}", other.shape()))),
        }
    }
    pub fn processor(&self, name: &str) -> Result<Arc<dyn Processor>> {
        match self.lookup(Shape::Processor, name)? {
            Capability::Processor(p) => Ok(p),
            other => Err(IntraError::Extension(format!("'{name}' is a {}", other.shape()))),
        }
    }
    pub fn multi_processor(&self, name: &str) -> Result<Arc<dyn MultiProcessor>> {
        match self.lookup(Shape::MultiProcessor, name)? {
            Capability::MultiProcessor(m) => Ok(m),
            other => Err(IntraError::Extension(format!("'{name}' is a {}", other.shape()))),
        }
    }
    pub fn service_process(&self, name: &str) -> Result<Arc<dyn ServiceProcess>> {
        match self.lookup(Shape::ServiceProcess, name)? {
            Capability::ServiceProcess(s) => Ok(s),
            other => Err(IntraError::Extension(format!("'{name}' is a {}", other.shape()))),
        }
    }
    pub fn len(&self) -> usize {
        self.kept.read().map(|kept| kept.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExtensionKeeper {
    fn default() -> Self {
        Self::new()
    }
}
