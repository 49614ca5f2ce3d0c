//! Tracing setup for processes embedding the coordinator.

use dealtrack_types::{DealtrackError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter` when set. With `json`,
/// events are written as one JSON object per line.
///
/// # Errors
/// Returns `Configuration` if the filter doesn't parse and `Internal` if a
/// global subscriber is already installed.
pub fn init_tracing(default_filter: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| DealtrackError::Configuration(format!("log filter: {e}")))?,
    };

    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if json {
        fmt.json().try_init()
    } else {
        fmt.try_init()
    };
    installed.map_err(|e| DealtrackError::Internal(format!("tracing init: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected() {
        let _ = init_tracing("dealtrack=debug", false);
        let err = init_tracing("dealtrack=debug", true).unwrap_err();
        assert!(matches!(err, DealtrackError::Internal(_)));
    }
}
