use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset. Progress logs need
/// `RUST_LOG=llm_mcp_cli=info`.
pub const DEFAULT_FILTER: &str = "warn";

/// Initialize logging.
///
/// Logs go to stderr so stdout carries only the answer. Levels come from
/// `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
pub fn init() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .compact();

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}
