//! Diagnostics for embedding applications
//!
//! The client only emits `tracing` events. A host that already runs a
//! subscriber composes [`layer`] into it; [`install`] sets up a global one for
//! hosts that don't, and only when `install_global` is set.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::{LogFormat, LoggingConfig};

/// Targets the configured level applies to
const CLIENT_TARGETS: [&str; 2] = ["huddle_client", "huddle_proto"];

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// A formatting layer for client events, filtered to the configured level
///
/// Events from other targets pass at `warn` and above. `RUST_LOG` replaces
/// these directives entirely.
pub fn layer<S>(config: &LoggingConfig) -> anyhow::Result<BoxedLayer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives(parse_log_level(&config.level)?))?,
    };

    let spans = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let file = open_log_file(config)?;
    let ansi = file.is_none();
    let writer = match file {
        Some(file) => BoxMakeWriter::new(Arc::new(file)),
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(spans)
            .with_current_span(true)
            .with_target(true)
            .with_line_number(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(spans)
            .with_ansi(ansi)
            .with_target(true)
            .with_file(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };
    Ok(layer)
}

/// Install [`layer`] as the global subscriber
///
/// Returns `Ok(false)` without touching global state unless `install_global`
/// is set. Fails when another global subscriber is already installed.
pub fn install(config: &LoggingConfig) -> anyhow::Result<bool> {
    if !config.install_global {
        parse_log_level(&config.level)?;
        return Ok(false);
    }

    tracing_subscriber::registry().with(layer(config)?).try_init()?;
    Ok(true)
}

fn directives(level: Level) -> String {
    let level = level.to_string().to_lowercase();
    let mut directives = vec![Level::WARN.to_string().to_lowercase()];
    directives.extend(CLIENT_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

fn open_log_file(config: &LoggingConfig) -> anyhow::Result<Option<std::fs::File>> {
    let Some(path) = &config.file_path else {
        return Ok(None);
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(Some(file))
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    let level = match level.to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };
    Level::from_str(&level).map_err(|_| anyhow::anyhow!("Invalid log level: {level}"))
}
