use crate::cli::TracingFormat;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Build the event filter: `RUST_LOG` when set, otherwise `warn` for
/// dependencies and `log_level` for this crate.
pub fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,slotwatch={log_level}")))
}

/// Configure and initialize logging for the process.
pub fn setup_logging(log_level: &str, tracing_format: TracingFormat) {
    let filter = build_filter(log_level);

    match tracing_format {
        TracingFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).compact())
                .init();
        }
        TracingFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .flatten_event(true)
                        .with_current_span(true)
                        .with_span_list(false),
                )
                .init();
        }
    }
}
