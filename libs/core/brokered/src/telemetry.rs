//! Tracing subscriber setup for processes embedding this crate.
//!
//! The crate itself only emits `tracing` events:
//!
//! | Level   | Event                                                   |
//! |---------|---------------------------------------------------------|
//! | `debug` | lock re-acquired / renewal stopped, decode and handler start/end |
//! | `error` | processing failure (with `message_id`)                  |
//! | `info`  | drain starting / done                                   |

use crate::config::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is not set.
fn default_filter(environment: Environment) -> EnvFilter {
    if environment.is_production() {
        EnvFilter::new("info,brokered=info")
    } else {
        EnvFilter::new("debug")
    }
}

/// Initialize tracing with environment-aware formatting and span capture.
///
/// - **Production**: flattened JSON events without module targets
/// - **Development**: pretty, human-readable output
///
/// Both include `tracing_error::ErrorLayer` so span traces can be attached
/// to errors. `RUST_LOG` overrides the default filter.
///
/// Safe to call more than once; later calls are no-ops (common in tests).
pub fn init_tracing(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(environment));

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(()) => info!(?environment, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized, skipping re-initialization"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_multiple_calls() {
        init_tracing(Environment::Development);
        init_tracing(Environment::Development);
        init_tracing(Environment::Production);
    }

    #[test]
    fn test_init_tracing_with_rust_log_env() {
        temp_env::with_var("RUST_LOG", Some("brokered=trace"), || {
            init_tracing(Environment::Production);
        });
    }
}
