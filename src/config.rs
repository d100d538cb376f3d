
// config lets you read a separate config file, overridden by the environment
use ::config::{Config, Environment, File};
use serde::Deserialize;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

// our own stuff that we need
use crate::backend::Backend;
use crate::chain::Engine;
use crate::construct::ConsistencyLevel;
use crate::error::Result;
use crate::memory::MemoryBackend;
use crate::persist::{PersistenceMode, SqliteBackend};

pub const DEFAULT_CONFIG_FILE: &str = "intravert.toml";
pub const CONFIG_PATH_VARIABLE: &str = "INTRAVERT_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub engine: EngineSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub default_timeout_ms: u64,
    pub default_consistency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub mode: StorageMode,
    #[serde(default)]
    pub path: Option<String>,
    pub nodes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

impl Settings {
    /// Defaults, then `intravert.toml` (or the file named by `INTRAVERT_CONFIG`),
    /// then `INTRAVERT__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_VARIABLE) {
            Ok(path) => Self::load_from(&path, true),
            Err(_) => Self::load_from(DEFAULT_CONFIG_FILE, false),
        }
    }

    pub fn load_from(path: &str, required: bool) -> Result<Self> {
        let settings = Config::builder()
            .set_default("server.bind", "127.0.0.1:8080")?
            .set_default("engine.default_timeout_ms", 10_000_i64)?
            .set_default("engine.default_consistency", "ONE")?
            .set_default("storage.mode", "memory")?
            .set_default("storage.nodes", 1_i64)?
            .set_default("log.filter", "intravert=info")?
            .add_source(File::with_name(path).required(required))
            .add_source(
                Environment::with_prefix("INTRAVERT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.default_timeout_ms)
    }

    pub fn default_consistency(&self) -> Result<ConsistencyLevel> {
        self.engine.default_consistency.parse()
    }

    pub fn backend(&self) -> Result<Arc<dyn Backend>> {
        let backend: Arc<dyn Backend> = match self.storage.mode {
            StorageMode::Memory => Arc::new(MemoryBackend::with_nodes(self.storage.nodes)),
            StorageMode::Sqlite => {
                let mode = match &self.storage.path {
                    Some(path) => PersistenceMode::File(path.clone()),
                    None => PersistenceMode::InMemory,
                };
                Arc::new(SqliteBackend::new(mode, self.storage.nodes)?)
            }
        };
        info!(mode = ?self.storage.mode, nodes = self.storage.nodes, "storage ready");
        Ok(backend)
    }

    pub fn engine(&self) -> Result<Engine> {
        Ok(Engine::new(self.backend()?)
            .with_default_timeout(self.default_timeout())
            .with_default_consistency(self.default_consistency()?))
    }
}
