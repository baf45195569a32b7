use std::path::Path;

use tracing_appender::{non_blocking::WorkerGuard, rolling::{Rotation, RollingFileAppender}};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Builds the `EnvFilter` for a layer from an explicit directive string,
/// falling back to `info` if it fails to parse.
fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes a `tracing_subscriber::Registry` with a console layer and, if
/// `log_dir` is set, an hourly-rotated JSON file layer alongside it.
///
/// Returns the file layer's `WorkerGuard`, if any; the caller must hold it
/// for the process lifetime, since dropping it stops the non-blocking
/// writer's background flush thread.
pub fn initialize_logging(directives: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let console_layer = tracing_subscriber::fmt::layer().with_filter(env_filter(directives));

    let (file_layer, guard) = match log_dir {
        Some(log_dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_prefix("webhookcert")
                .filename_suffix("tracing-rs.json")
                .max_log_files(6)
                .build(log_dir)
                .expect("failed to initialize rolling file appender");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(env_filter(directives));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
