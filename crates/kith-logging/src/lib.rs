//! Kith Logging - tracing subscriber setup
//!
//! Binaries call [`init`] once at startup. `RUST_LOG` overrides the
//! default filter when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing_subscriber::util::TryInitError;

/// Filter used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_FILTER: &str = "kith_explore=info,kith_session=info,kith_graph=warn";

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into())
}

/// Install the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber is already set. Use [`try_init`] where
/// that can happen, such as tests.
pub fn init(default_filter: &str) {
    tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Like [`init`], but reports an already-installed subscriber as an error.
pub fn try_init(default_filter: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_an_error() {
        // The first call may lose to another test in the same binary.
        let _ = try_init(DEFAULT_FILTER);
        assert!(try_init(DEFAULT_FILTER).is_err());
        tracing::info!("still logging");
    }

    #[test]
    fn default_filter_names_workspace_targets() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
        for directive in DEFAULT_FILTER.split(',') {
            let target = directive.split('=').next().unwrap_or_default();
            assert!(
                ["kith_explore", "kith_session", "kith_graph"].contains(&target),
                "unknown target {target}"
            );
        }
    }
}
