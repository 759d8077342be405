//! Logging initialization for the CLI.
//!
//! The core library only emits `tracing` events; the subscriber lives here.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber.
///
/// # Arguments
/// * `verbosity` - 0 = WARN, 1 = DEBUG, 2+ = TRACE for the modmap crates
/// * `json` - If true, log JSON lines to stderr
///
/// Logs always go to stderr so stdout stays a single result document.
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // RUST_LOG wins for everything except the modmap targets
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for target in ["modmap_core", "modmap_cli"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
