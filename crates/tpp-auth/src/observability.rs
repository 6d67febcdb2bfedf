// Tracing initialization with a configurable and reloadable log level.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the subscriber at `info` with plain-text output.
///
/// `RUST_LOG` takes precedence when set. Does nothing if a global
/// subscriber already exists.
pub fn init_tracing() {
    init_tracing_with_level("info", false);
}

/// Installs the subscriber described by the `[logging]` section.
pub fn init_from_config(config: &LoggingConfig) {
    init_tracing_with_level(&config.level, config.json);
}

/// Installs the subscriber with `level` as the filter directive and JSON
/// output when `json` is set.
///
/// A valid `RUST_LOG` takes precedence over `level`. The filter can be
/// changed later with [`apply_logging_level`].
pub fn init_tracing_with_level(level: &str, json: bool) {
    // RUST_LOG wins over the configured level.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init();
}

/// Apply a new logging level at runtime if the reload handle is installed.
/// Returns `false` if tracing was not initialized here.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|f| {
                *f = EnvFilter::new(level);
            })
            .is_ok(),
        None => false,
    }
}
