//! Settings for the binary, layered from `remarque.toml` and
//! `REMARQUE_*` environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory scanned for `*.json` script definitions at startup.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,
    /// Default tracing filter; `RUST_LOG` still wins when set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_scripts_dir() -> String {
    "scripts".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Settings> {
        let settings = Config::builder()
            .add_source(File::with_name("remarque").required(false))
            .add_source(Environment::with_prefix("REMARQUE"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
