
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemarqueError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Script error: {0}")]
    Script(String),
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("Index error: {0}")]
    Index(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, RemarqueError>;

// Helper conversions
impl From<mlua::Error> for RemarqueError {
    fn from(e: mlua::Error) -> Self { Self::Script(e.to_string()) }
}
impl From<config::ConfigError> for RemarqueError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
