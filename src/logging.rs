//! Logger setup.
//!
//! Maps `LogType`, `LogFile` and `DebugLevel` onto a `tracing-subscriber`
//! fmt layer. Info events always pass, mirroring the agent where startup
//! and shutdown messages are logged at every debug level.

use crate::config::{DebugLevel, LogType, Options};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::{LookupSpan, Registry};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::Layer;

/// Logger initialization errors
#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("LogType is \"file\" but LogFile is not set")]
    MissingLogFile,

    #[error("cannot open log file '{}': {source}", path.display())]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Install(#[from] TryInitError),
}

/// Whether an event at `level` is written under `debug_level`.
pub fn enabled(debug_level: DebugLevel, level: &Level) -> bool {
    *level == Level::INFO || *level <= debug_level.max_level()
}

/// Install the process-wide subscriber.
pub fn init(options: &Options) -> Result<(), LogInitError> {
    tracing_subscriber::registry()
        .with(layer::<Registry>(options)?)
        .try_init()?;
    Ok(())
}

/// Build the fmt layer for the configured sink and debug level.
pub fn layer<S>(options: &Options) -> Result<impl Layer<S>, LogInitError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let writer = match options.log_type {
        LogType::Console => BoxMakeWriter::new(std::io::stdout),
        LogType::File => {
            let path = options
                .log_file
                .as_ref()
                .ok_or(LogInitError::MissingLogFile)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LogInitError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };

    let debug_level = options.debug_level;
    Ok(tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_ansi(options.log_type == LogType::Console)
        .with_filter(filter_fn(move |metadata: &Metadata<'_>| {
            enabled(debug_level, metadata.level())
        })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_info_always_enabled() {
        for level in [
            DebugLevel::Info,
            DebugLevel::Crit,
            DebugLevel::Err,
            DebugLevel::Warning,
            DebugLevel::Debug,
            DebugLevel::Trace,
        ] {
            assert!(enabled(level, &Level::INFO), "{level:?}");
        }
    }

    #[test]
    fn test_levels_are_cumulative() {
        assert!(!enabled(DebugLevel::Info, &Level::ERROR));
        assert!(!enabled(DebugLevel::Info, &Level::WARN));

        assert!(enabled(DebugLevel::Crit, &Level::ERROR));
        assert!(!enabled(DebugLevel::Crit, &Level::WARN));

        assert!(enabled(DebugLevel::Warning, &Level::ERROR));
        assert!(enabled(DebugLevel::Warning, &Level::WARN));
        assert!(!enabled(DebugLevel::Warning, &Level::DEBUG));

        assert!(enabled(DebugLevel::Debug, &Level::DEBUG));
        assert!(!enabled(DebugLevel::Debug, &Level::TRACE));

        assert!(enabled(DebugLevel::Trace, &Level::TRACE));
    }

    #[test]
    fn test_file_sink_appends_filtered_events() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "previous run").unwrap();

        let options = Options {
            log_type: LogType::File,
            log_file: Some(file.path().to_path_buf()),
            debug_level: DebugLevel::Crit,
            ..Options::default()
        };

        let subscriber = tracing_subscriber::registry().with(layer::<Registry>(&options).unwrap());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("greeting line");
            tracing::error!(critical = true, "critical line");
            tracing::warn!("warning line");
            tracing::debug!("debug line");
        });

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(contents.starts_with("previous run\n"), "{contents}");
        assert!(contents.contains("greeting line"), "{contents}");
        assert!(contents.contains("critical line"), "{contents}");
        assert!(!contents.contains("warning line"), "{contents}");
        assert!(!contents.contains("debug line"), "{contents}");
        assert!(!contents.contains('\x1b'), "file output has no colors");
    }

    #[test]
    fn test_file_sink_requires_path() {
        let options = Options {
            log_type: LogType::File,
            log_file: None,
            ..Options::default()
        };
        assert!(matches!(
            layer::<Registry>(&options),
            Err(LogInitError::MissingLogFile)
        ));
    }

    #[test]
    fn test_file_sink_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options {
            log_type: LogType::File,
            log_file: Some(dir.path().join("missing").join("mock_server.log")),
            ..Options::default()
        };
        assert!(matches!(
            layer::<Registry>(&options),
            Err(LogInitError::OpenFile { .. })
        ));
    }
}
