//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Error, Result};

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(level: &str) -> String {
    format!("{level},winit=warn,calloop=warn")
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `level` applies to every target
/// except the noisy windowing crates.
///
/// # Example
/// ```
/// triangle_core::init_logging("info").ok();
/// tracing::info!("Logging ready");
/// ```
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(level))
            .map_err(|e| Error::Config(format!("invalid log level '{level}': {e}")))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to install logger: {e}")))
}
