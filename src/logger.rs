//! Logging setup
//!
//! `RUST_LOG` wins over the configured level when it is set.

use std::path::Path;
use tracing_subscriber::EnvFilter;

pub fn init_logger(log_level: &str) {
    init_logger_with_file(log_level, None);
}

/// Initialize the global subscriber, writing to a daily rolling file when
/// `log_dir` exists. Calling it twice keeps the first subscriber.
pub fn init_logger_with_file(log_level: &str, log_dir: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    if let Some(dir) = log_dir {
        if Path::new(dir).exists() {
            let file_appender = tracing_appender::rolling::daily(dir, "cotizador");
            let _ = subscriber.with_writer(file_appender).with_ansi(false).try_init();
            return;
        }
    }

    let _ = subscriber.try_init();
}
