use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{
    filter::Directive,
    fmt::format::{Format, Writer},
    EnvFilter,
};

/// Target of every event this crate emits.
const LOG_TARGET: &str = "pg_bulk_upsert";

struct LoadTimer;

impl tracing_subscriber::fmt::time::FormatTime for LoadTimer {
    fn format_time(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Builds the filter used by [`setup_logger`].
///
/// Other crates stay at `warn` unless `RUST_LOG` says otherwise; this crate
/// logs at `log_level`.
fn load_filter(log_level: LevelFilter) -> EnvFilter {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    match format!("{}={}", LOG_TARGET, log_level).parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter.add_directive(log_level.into()),
    }
}

/// Installs the global subscriber. Rendered statements are logged at `debug`,
/// upsert summaries at `info`.
pub fn setup_logger(log_level: LevelFilter) {
    let format = Format::default().with_timer(LoadTimer).with_level(true).with_target(true);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(load_filter(log_level))
        .event_format(format)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!(target: LOG_TARGET, "Logger has already been set up, continuing...");
    }
}

pub fn setup_info_logger() {
    setup_logger(LevelFilter::INFO);
}
