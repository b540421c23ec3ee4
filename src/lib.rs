pub mod config;
pub mod errors;
pub mod llm;
pub mod locator;
pub mod perception;
pub mod rag;

pub use errors::{LocatorError, LocatorResult};
pub use locator::{ElementLocator, LocationResult, StopSignal, UiElement};

/// Install the fmt subscriber. `RUST_LOG` wins over the default `info` filter.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
