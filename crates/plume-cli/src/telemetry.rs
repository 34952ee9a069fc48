use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: `RUST_LOG` filter (default `info`), compact
/// text on stderr, or JSON when `PLUME_LOG_FORMAT=json`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    match std::env::var("PLUME_LOG_FORMAT").as_deref() {
        Ok("json") => {
            let _ = registry.with(fmt_layer.json().flatten_event(true)).try_init();
        }
        _ => {
            let _ = registry.with(fmt_layer.compact()).try_init();
        }
    }
}
