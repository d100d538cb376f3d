
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntraError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Reference error: {0}")]
    Reference(String),
    #[error("Timeout: operation did not complete within {millis} ms")]
    Timeout { millis: u64 },
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Extension error: {0}")]
    Extension(String),
    #[error("State error: {0}")]
    State(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, IntraError>;

impl IntraError {
    /// Wraps a failure raised inside an extension so it reads as one,
    /// leaving errors that already are extension errors untouched.
    pub fn within_extension(self, what: &str) -> Self {
        match self {
            Self::Extension(_) | Self::Timeout { .. } => self,
            other => Self::Extension(format!("{what}: {other}")),
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for IntraError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
impl From<::config::ConfigError> for IntraError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<std::sync::PoisonError<T>> for IntraError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
