use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the process-wide subscriber.
///
/// `RUST_LOG` wins over `level` when it is set. Calling this twice is
/// harmless; the second call leaves the first subscriber in place.
pub fn init(level: &str) {
    let fmt_layer = fmt::layer().with_target(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
