//! Command-line definition and error reporting.

use clap::{Parser, Subcommand};
use miette::{Diagnostic, Report};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

use crate::logging::LogFormat;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// Registry, archive or credential exchange failure exit code
pub const EXIT_OPERATION: i32 = 3;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// CLI or configuration error (exit code 2)
    #[error("Configuration error: {message}")]
    #[diagnostic(code(ocideploy::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The requested operation failed (exit code 3)
    #[error("Operation failed: {message}")]
    #[diagnostic(code(ocideploy::cli::operation))]
    Operation {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new operation error
    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new operation error with help text
    #[must_use]
    pub fn operation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Map library errors onto CLI categories.
///
/// Bad input (platform strings, references, credential and layer shapes,
/// configuration) exits with code 2; everything else with code 3.
impl From<ocideploy_oci::Error> for CliError {
    fn from(err: ocideploy_oci::Error) -> Self {
        use ocideploy_oci::Error;

        match err {
            Error::InvalidPlatformString(_) => {
                Self::config_with_help(err.to_string(), "Use the form os/arch[/variant], e.g. linux/arm64")
            }
            Error::UnsupportedCredentialFormat(_) => Self::config_with_help(
                err.to_string(),
                "Check the file passed with --credentials or the [credentials] table",
            ),
            Error::InvalidReference(..) | Error::InvalidLayerSet(_) => Self::config(err.to_string()),
            Error::Configuration(message) => Self::config(message),
            Error::TokenExchange { .. } => Self::operation_with_help(
                error_chain(&err),
                "Check the AWS credentials, region and ECR permissions",
            ),
            Error::NoMatchingPlatform { .. } => Self::operation_with_help(
                err.to_string(),
                "Pass --platform to select another platform, or drop --strict-platform",
            ),
            _ => Self::operation(error_chain(&err)),
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Operation { .. } => EXIT_OPERATION,
    }
}

/// Render an error on stderr with miette.
pub fn render_error(err: &CliError) {
    let report = Report::new(err.clone());
    #[allow(clippy::print_stderr)]
    {
        eprintln!("{report:?}");
    }
    let _ = io::stderr().flush();
}

/// Pull and push deployment artifacts as OCI images.
#[derive(Parser, Debug)]
#[command(name = "ocideploy", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "OCIDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Registry credentials file (JSON)
    #[arg(long, global = true, env = "OCIDEPLOY_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Talk to the registry over plain HTTP
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build a reproducible .tar.gz layer from files and directories
    Archive {
        /// Files or directories to include
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Archive to write
        #[arg(short, long, default_value = "layer.tar.gz")]
        output: PathBuf,

        /// Directory every entry is placed under inside the archive
        #[arg(long)]
        archive_root: Option<String>,

        /// Directory entry names are made relative to (default: current directory)
        #[arg(short = 'C', long)]
        working_directory: Option<PathBuf>,
    },

    /// Pull an image, selecting the manifest for this platform
    Pull {
        /// Image name, e.g. ghcr.io/acme/flows
        name: String,

        /// Image tag
        tag: String,

        /// Destination directory (default: current directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Fail when the image index has no manifest for the platform
        #[arg(long)]
        strict_platform: bool,

        /// Platform to select instead of this host's, e.g. linux/arm64
        #[arg(long)]
        platform: Option<String>,
    },

    /// Push layers as a single-platform or multi-platform image
    Push {
        /// Image name, e.g. ghcr.io/acme/flows
        name: String,

        /// Image tag
        tag: String,

        /// Layer archive (repeatable)
        #[arg(long = "layer", required_unless_present = "platform_layers")]
        layers: Vec<PathBuf>,

        /// Per-platform layers: inline JSON or a path to a JSON file
        #[arg(long, conflicts_with = "layers")]
        platform_layers: Option<String>,
    },
}

/// Parse command-line arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
