//! Logger setup
//!
//! log4rs is configured from the file named in [`LoggingConfig`]; when that
//! file is absent or invalid, env_logger takes over with `RUST_LOG` (default
//! `warn`).

use std::path::Path;
use log::{info, warn};

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) {
    let config_file = Path::new(&config.config_file);
    if config_file.exists() {
        match log4rs::init_file(config_file, Default::default()) {
            Ok(()) => {
                info!("Logging configured from {}", config_file.display());
                return;
            }
            Err(e) => {
                init_env_logger();
                warn!("Invalid log configuration {}: {}. Using env_logger.", config_file.display(), e);
                return;
            }
        }
    }
    init_env_logger();
}

fn init_env_logger() {
    // A logger may already be installed (tests, embedding binaries)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .try_init();
}
