//! # validatems Library
//!
//! Intake and XML Schema validation of META-SHARE resource descriptions,
//! submitted either as uploaded files or as URLs to fetch.

pub mod cli;
pub mod config;
pub mod error;
pub mod http_client;
pub mod intake;
pub mod libxml2;
pub mod logging;
pub mod naming;
pub mod output;
pub mod page;
pub mod scratch;
pub mod server;
pub mod validator;

pub use cli::{Cli, Command, OutputFormat};
pub use config::{Config, ConfigManager};
pub use error::{IntakeError, LibXml2Error, NetworkError, Rejection, Severity};
pub use http_client::{AsyncHttpClient, HttpClientConfig, RemoteSource};
pub use intake::{IntakePipeline, ResolvedUpload, UploadRequest, UploadSource};
pub use libxml2::{Diagnostic, LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use naming::{FilenameAllocator, Reservation};
pub use output::{CheckReport, CheckStatus, Output};
pub use scratch::{ScratchArea, ScratchLease, ScratchSweeper, SweepStats};
pub use validator::{SchemaValidator, ValidationOutcome, clean_diagnostic};
