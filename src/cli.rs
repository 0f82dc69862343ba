use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Output format for the `check` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output with status markers
    #[default]
    Human,
    /// JSON output for tooling
    Json,
}

/// META-SHARE resource description validation service
#[derive(Parser, Debug, Clone)]
#[command(name = "validatems")]
#[command(about = "Validate META-SHARE resource descriptions uploaded as files or URLs")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding uploads while they are validated
    #[arg(long = "scratch-dir", global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// XML Schema to validate against instead of the bundled one
    #[arg(long = "schema", global = true)]
    pub schema: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout", global = true)]
    pub timeout: Option<u64>,

    /// Log at debug level to the terminal
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    /// Directory for the daily server log files
    #[arg(long = "log-dir", global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the upload web service
    Serve {
        /// Address to listen on
        #[arg(short = 'b', long = "bind")]
        bind: Option<String>,

        /// Path prefix the service is mounted under behind a reverse proxy
        #[arg(long = "application-root")]
        application_root: Option<String>,
    },

    /// Validate one local file or URL and print the result
    Check {
        /// Path to an XML file, or an http(s) URL
        target: String,

        /// Output format
        #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn is_serve(&self) -> bool {
        matches!(self.command, Command::Serve { .. })
    }
}
