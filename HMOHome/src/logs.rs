//! Process-wide tracing setup.

use hmoconfig::get_config;
use tracing::Level;
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber: the configured level filter followed by
/// an optional console layer.
pub fn init_logging() {
    let config = get_config();

    let subscriber = Registry::default().with(configured_level(&config.get_log_min_level()));
    if config.get_log_enable_console() {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }
}

/// Level filter for the `host.logger.min_level` value, `INFO` when unknown.
fn configured_level(value: &str) -> LevelFilter {
    string_to_level(value)
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO)
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}
