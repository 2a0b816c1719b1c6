//! Logging initialization and configuration.
//!
//! Only the binary installs a subscriber; the library just emits `tracing` events.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingSettings};

fn filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&settings.level).unwrap_or_else(|e| {
            eprintln!("invalid log level {:?}: {}", settings.level, e);
            EnvFilter::new("warn")
        })
    })
}

/// Try to initialize the logging system.
///
/// `RUST_LOG` takes precedence over `settings.level`. Output goes to stderr so it never
/// mixes with relayed child output on stdout.
///
/// Returns `Err` if a subscriber has already been set.
pub fn try_init(settings: &LoggingSettings) -> Result<(), tracing_subscriber::util::TryInitError> {
    let registry = tracing_subscriber::registry().with(filter(settings));

    match settings.format {
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
}

/// Initialize the logging system.
///
/// # Panics
///
/// Panics if another tracing subscriber has already been set.
pub fn init(settings: &LoggingSettings) {
    if let Err(e) = try_init(settings) {
        panic!("failed to initialize logging: {}", e);
    }
}
