//! Logging setup for binaries and tests embedding this crate.
//!
//! The library itself only emits `tracing` events; nothing is printed until a
//! subscriber is installed. `RUST_LOG` takes precedence over the filter passed
//! in code:
//!
//! ```bash
//! RUST_LOG=finsight_rag=debug cargo test
//! ```

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: Once = Once::new();

/// Filter used by [`init`]: quiet except for this crate's warnings.
pub const DEFAULT_FILTER: &str = "warn,finsight_rag=info";

/// Install a compact `fmt` subscriber with the given filter directives.
///
/// Safe to call multiple times; only the first call takes effect. Does
/// nothing if another global subscriber is already installed.
pub fn init_with_filter(directives: &str) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(directives)
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_level(true)
            .with_filter(filter);

        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Install the subscriber with [`DEFAULT_FILTER`].
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}
