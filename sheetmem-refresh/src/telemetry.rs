//! Log subscriber setup for hosts that embed the orchestrator.

use sheetmem_core::{ConfigError, SheetMemResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "sheetmem_refresh=info,sheetmem_parse=warn,info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `filter`; with neither, [`DEFAULT_FILTER`] applies.
///
/// # Errors
/// `ConfigError::InvalidValue` when `filter` is not a valid directive list,
/// `ConfigError::Load` when a global subscriber is already installed.
pub fn init_tracing(filter: Option<&str>, format: LogFormat) -> SheetMemResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => {
            let directives = filter.unwrap_or(DEFAULT_FILTER);
            EnvFilter::try_new(directives).map_err(|e| ConfigError::InvalidValue {
                field: "log_filter".to_string(),
                value: directives.to_string(),
                reason: e.to_string(),
            })?
        }
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    };
    installed.map_err(|e| ConfigError::Load {
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::debug!(format = ?format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_tracing(Some("warn"), LogFormat::Json);
        assert!(init_tracing(Some("warn"), LogFormat::Pretty).is_err());
    }
}
