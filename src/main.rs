//! mock_server: a stand-in for a monitoring agent's active checks responder
//!
//! Listens on a TCP port and answers each `{"request":"active checks"}`
//! frame with the verbatim contents of a pre-loaded file, so server-side
//! integration tests can run without a real agent. Any other request is
//! logged and the connection is dropped.

mod config;
mod logging;
mod protocol;
mod server;
#[cfg(test)]
mod test_support;

use bytes::Bytes;
use clap::Parser;
use config::{CliArgs, ConfigError, LogType, Options};
use logging::LogInitError;
use server::Server;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Exit status for failures before logging is available
const EXIT_STARTUP_FAILURE: u8 = 1;

/// Errors raised before logging is up, reported on stderr
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Cannot initialize logger: {0}")]
    Logger(#[from] LogInitError),
}

/// Errors that stop the server after logging is up
#[derive(Debug, thiserror::Error)]
enum ServeError {
    #[error("Cannot read active checks file: ActiveChecksFile is not set")]
    ActiveChecksUnset,

    #[error("Cannot read active checks file '{}': {source}", path.display())]
    ActiveChecks {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Listen failed: {0}")]
    Listen(#[source] std::io::Error),

    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

impl StartupError {
    fn exit_status(&self) -> u8 {
        EXIT_STARTUP_FAILURE
    }
}

impl ServeError {
    /// The server simply returns after these, so the process exits cleanly.
    fn exit_status(&self) -> u8 {
        0
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let options = match start(&cli) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(e.exit_status());
        }
    };

    let greeting = greeting();
    info!("{greeting}");
    for line in console_lines(cli.foreground, options.log_type, &greeting) {
        println!("{line}");
    }

    info!(path = %cli.config.display(), "Using configuration file");

    match serve(&options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report_serve_error(&e)),
    }
}

/// Load configuration once and install the logger.
fn start(cli: &CliArgs) -> Result<Options, StartupError> {
    let options = Options::load(&cli.config)?;
    logging::init(&options)?;
    Ok(options)
}

fn greeting() -> String {
    format!(
        "Starting Zabbix Agent [{}]. ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// Lines printed to stdout at startup besides the log.
///
/// The greeting is repeated on the console only when the log goes
/// elsewhere.
fn console_lines(foreground: bool, log_type: LogType, greeting: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if foreground {
        if log_type != LogType::Console {
            lines.push(greeting.to_string());
        }
        lines.push("Press Ctrl+C to exit.".to_string());
    }
    lines
}

/// Log a fatal serving error as critical and pick the exit status.
fn report_serve_error(e: &ServeError) -> u8 {
    error!(critical = true, "{e}");
    e.exit_status()
}

/// Load the canned response, bind, and serve until accepting fails.
async fn serve(options: &Options) -> Result<(), ServeError> {
    let active_checks = load_active_checks(options).await?;
    info!(bytes = active_checks.len(), "Loaded active checks response");

    let server = Server::bind(options, active_checks).map_err(ServeError::Listen)?;
    server.run().await.map_err(ServeError::Accept)
}

async fn load_active_checks(options: &Options) -> Result<Bytes, ServeError> {
    let path = options
        .active_checks_file
        .as_ref()
        .ok_or(ServeError::ActiveChecksUnset)?;

    let contents = tokio::fs::read(path)
        .await
        .map_err(|source| ServeError::ActiveChecks {
            path: path.clone(),
            source,
        })?;
    Ok(Bytes::from(contents))
}
