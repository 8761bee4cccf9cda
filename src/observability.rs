//! Process-wide tracing initialisation.
//!
//! Called exactly once at binary startup (`main.rs` / `bin/server.rs`);
//! library code never reinitialises the subscriber.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

pub fn init(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.level.clone()));

    let builder = fmt().with_env_filter(filter);

    match cfg.format.as_str() {
        "json" => {
            let _ = builder.json().try_init();
        }
        _ => {
            let _ = builder.try_init();
        }
    }
}
