//! Logging for benchmark runs
//!
//! Diagnostics go to stderr, or to a rolling file when one is configured,
//! so stdout carries nothing but the per-rank result lines. Every rank runs
//! on a thread named `rank-N` and the console output names the thread, which
//! keeps interleaved rank logs apart. `RUST_LOG` may add per-module
//! directives on top of the level picked from settings and `-v`/`-q`.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer alive; dropping it flushes buffered records
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the subscriber for a `run`
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);
    let filter = build_env_filter(level)?;

    let (file_layer, file_guard) = match settings.file {
        Some(ref log_file) => {
            let (layer, guard) = build_file_layer(
                Path::new(log_file),
                settings.max_file_size_mb,
                settings.max_files,
                settings.json_format,
            )?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(settings.json_format))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(
        level = %level,
        file = ?settings.file,
        json = settings.json_format,
        "Logging initialized"
    );

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// `-q` wins over `-v`; each `-v` steps one level past the configured one
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    let configured = Level::from_str(&settings.level).unwrap_or(Level::INFO);
    match verbose {
        0 => configured,
        1 => configured.max(Level::DEBUG),
        _ => Level::TRACE,
    }
}

/// `RUST_LOG` (or the effective level) plus a pinned directive for our target
fn build_env_filter(level: Level) -> Result<EnvFilter> {
    let base = level.as_str().to_lowercase();
    let own = format!("collbench={}", base)
        .parse::<Directive>()
        .map_err(|e| Error::Internal(format!("Invalid log directive: {}", e)))?;

    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&base))
        .add_directive(own))
}

fn console_layer<S>(json_format: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if json_format {
        Box::new(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_span_events(FmtSpan::CLOSE),
        )
    } else {
        Box::new(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_target(false)
                .compact(),
        )
    }
}

/// Rolling appender has no size trigger; small limits roll hourly instead
fn rotation_for(max_size_mb: u64) -> Rotation {
    match max_size_mb {
        1..=9 => Rotation::HOURLY,
        _ => Rotation::DAILY,
    }
}

fn build_file_layer<S>(
    path: &Path,
    max_size_mb: u64,
    max_files: u32,
    json_format: bool,
) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).map_err(|e| Error::IoWrite {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("collbench");

    let appender = RollingFileAppender::builder()
        .rotation(rotation_for(max_size_mb))
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| Error::Internal(format!("Failed to create log file appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);
    let layer: BoxedLayer<S> = if json_format {
        Box::new(layer.json().with_span_events(FmtSpan::CLOSE))
    } else {
        Box::new(layer)
    };

    Ok((layer, guard))
}

/// Stderr-only logging for commands that never load a configuration
pub fn init_simple(level: Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(level: &str) -> LoggingSettings {
        LoggingSettings {
            level: level.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_quiet_beats_verbose() {
        assert_eq!(effective_level(&at("trace"), 2, true), Level::ERROR);
    }

    #[test]
    fn test_verbose_steps_past_configured_level() {
        assert_eq!(effective_level(&at("info"), 0, false), Level::INFO);
        assert_eq!(effective_level(&at("warn"), 1, false), Level::DEBUG);
        assert_eq!(effective_level(&at("trace"), 1, false), Level::TRACE);
        assert_eq!(effective_level(&at("error"), 2, false), Level::TRACE);
    }

    #[test]
    fn test_configured_level_is_case_insensitive() {
        assert_eq!(effective_level(&at("DEBUG"), 0, false), Level::DEBUG);
        assert_eq!(effective_level(&at("Error"), 0, false), Level::ERROR);
        assert_eq!(effective_level(&at("loud"), 0, false), Level::INFO);
    }

    #[test]
    fn test_env_filter_builds_for_every_level() {
        for level in [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR] {
            assert!(build_env_filter(level).is_ok(), "{}", level);
        }
    }

    #[test]
    fn test_rotation_for_size_limit() {
        assert_eq!(rotation_for(0), Rotation::DAILY);
        assert_eq!(rotation_for(5), Rotation::HOURLY);
        assert_eq!(rotation_for(100), Rotation::DAILY);
    }

    #[test]
    fn test_file_layer_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs").join("bench.log");

        let result = build_file_layer::<tracing_subscriber::Registry>(&log_path, 100, 3, false);

        assert!(result.is_ok());
        assert!(temp_dir.path().join("logs").is_dir());
    }
}
