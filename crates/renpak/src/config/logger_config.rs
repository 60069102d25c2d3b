use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Logger configuration. `RUST_LOG` still overrides it.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LoggerConfig {
    pub level_filter: LevelFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level_filter: LevelFilter::Info,
        }
    }
}

impl LoggerConfig {
    pub fn init(&self) {
        env_logger::Builder::new()
            .filter_level(self.level_filter)
            .parse_default_env()
            .init();
    }
}
