//! Configuration module for the mock server.
//!
//! Command-line flags select the configuration file; the file itself uses
//! the agent's `Key=Value` format:
//!
//! ```text
//! # comment
//! LogType=console
//! DebugLevel=3
//! Port=10051
//! Timeout=5
//! ActiveChecksFile=/tmp/active_checks.json
//! ```

use clap::{ArgAction, Parser};
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::Deserialize;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "mock_server.conf";

/// Command-line arguments for the mock server
#[derive(Parser, Debug)]
#[command(name = "mock_server")]
#[command(version)]
#[command(about = "Mock agent answering active checks requests", long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Run in foreground (only changes console output)
    #[arg(
        short,
        long,
        default_value_t = true,
        default_missing_value = "true",
        num_args = 0..=1,
        action = ArgAction::Set
    )]
    pub foreground: bool,
}

/// Log sink selected by `LogType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Console,
    File,
}

/// Agent debug level, `DebugLevel=0..5`.
///
/// Info messages are always written. Higher levels enable critical, error,
/// warning, debug and trace messages in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Info = 0,
    Crit = 1,
    Err = 2,
    Warning = 3,
    Debug = 4,
    Trace = 5,
}

impl DebugLevel {
    /// Most verbose level enabled besides info.
    pub fn max_level(self) -> LevelFilter {
        match self {
            DebugLevel::Info => LevelFilter::OFF,
            DebugLevel::Crit | DebugLevel::Err => LevelFilter::ERROR,
            DebugLevel::Warning => LevelFilter::WARN,
            DebugLevel::Debug => LevelFilter::DEBUG,
            DebugLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl TryFrom<i64> for DebugLevel {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DebugLevel::Info),
            1 => Ok(DebugLevel::Crit),
            2 => Ok(DebugLevel::Err),
            3 => Ok(DebugLevel::Warning),
            4 => Ok(DebugLevel::Debug),
            5 => Ok(DebugLevel::Trace),
            other => Err(other),
        }
    }
}

/// Final resolved configuration. Built once at startup, read-only after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub log_type: LogType,
    pub log_file: Option<PathBuf>,
    pub debug_level: DebugLevel,
    pub port: u16,
    /// Per read/write timeout in seconds
    pub timeout: u64,
    pub active_checks_file: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_type: LogType::Console,
            log_file: None,
            debug_level: DebugLevel::Warning,
            port: 10051,
            timeout: 5,
            active_checks_file: None,
        }
    }
}

impl Options {
    /// Load options from a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse options from configuration file contents.
    ///
    /// Keys missing from the file keep their defaults. Unknown and repeated
    /// keys are errors.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut options = Options::default();
        let mut seen = HashSet::new();

        for (index, raw) in contents.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or(ConfigError::MissingSeparator { line: line_no })?;
            let key = key.trim();
            let value = value.trim();

            if !seen.insert(key.to_string()) {
                return Err(ConfigError::DuplicateKey {
                    line: line_no,
                    key: key.to_string(),
                });
            }

            match key {
                "LogType" => options.log_type = parse_enum(key, value)?,
                "LogFile" => options.log_file = parse_path(value),
                "DebugLevel" => options.debug_level = parse_ranged(key, value, 0..=5)?,
                "Port" => options.port = parse_ranged(key, value, 1..=65535)?,
                "Timeout" => options.timeout = parse_ranged(key, value, 1..=30)?,
                "ActiveChecksFile" => options.active_checks_file = parse_path(value),
                _ => {
                    return Err(ConfigError::UnknownKey {
                        line: line_no,
                        key: key.to_string(),
                    })
                }
            }
        }

        Ok(options)
    }

    /// Timeout applied to each read and write on a connection.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn parse_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn parse_enum<'de, T>(key: &str, value: &'de str) -> Result<T, ConfigError>
where
    T: Deserialize<'de>,
{
    let deserializer: StrDeserializer<'de, ValueError> = value.into_deserializer();
    T::deserialize(deserializer).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_ranged<T>(key: &str, value: &str, range: RangeInclusive<i64>) -> Result<T, ConfigError>
where
    T: TryFrom<i64>,
{
    let number: i64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })?;

    let out_of_range = || ConfigError::OutOfRange {
        key: key.to_string(),
        value: number,
        min: *range.start(),
        max: *range.end(),
    };

    if !range.contains(&number) {
        return Err(out_of_range());
    }
    T::try_from(number).map_err(|_| out_of_range())
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("line {line}: expected Key=Value")]
    MissingSeparator { line: usize },

    #[error("line {line}: unknown parameter {key}")]
    UnknownKey { line: usize, key: String },

    #[error("line {line}: parameter {key} is defined more than once")]
    DuplicateKey { line: usize, key: String },

    #[error("invalid value '{value}' for parameter {key}")]
    InvalidValue { key: String, value: String },

    #[error("value {value} for parameter {key} is out of range {min}..{max}")]
    OutOfRange {
        key: String,
        value: i64,
        min: i64,
        max: i64,
    },
}
