use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use rdlink_core::config::{AppConfig, LoggingConfig};

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured filter. With `daemon` set and file
/// logging enabled, events are also written to a daily log file; keep the
/// returned guard alive until exit so it gets flushed.
pub fn init(config: &LoggingConfig, daemon: bool) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if daemon && config.file {
        let appender = tracing_appender::rolling::daily(AppConfig::log_dir(), "rdlink.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        None
    }
}
