use thiserror::Error;

/// Generic text shown when the remote side of a URL submission fails.
pub const NETWORK_FAILURE_MESSAGE: &str = "Something went wrong. Are you sure your URL is valid?";

/// Generic text shown for anything the pipeline did not anticipate.
pub const UNEXPECTED_FAILURE_MESSAGE: &str = "Something went wrong :(";

/// Main intake error type that encompasses all possible failure modes of a submission
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LibXML2 internal error: {0}")]
    LibXml2(#[from] LibXml2Error),

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// How loudly a failed submission is reported to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl IntakeError {
    pub fn severity(&self) -> Severity {
        match self {
            IntakeError::Rejected(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Non-technical message for the presentation layer.
    ///
    /// Rejections are phrased for the user already; everything else is
    /// replaced by a generic text and only the log keeps the details.
    pub fn user_message(&self) -> String {
        match self {
            IntakeError::Rejected(rejection) => rejection.to_string(),
            IntakeError::Network(_) => NETWORK_FAILURE_MESSAGE.to_string(),
            _ => UNEXPECTED_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Check if the submission was turned away before any file was written
    pub fn is_rejection(&self) -> bool {
        matches!(self, IntakeError::Rejected(_))
    }

    /// Check if the submission failed on the remote side
    pub fn is_network(&self) -> bool {
        matches!(self, IntakeError::Network(_))
    }
}

/// Submissions refused because of what the user sent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("No URL supplied!")]
    EmptyUrl,

    #[error("No file selected!")]
    NoFileSelected,

    #[error("{filename}: invalid file extension! Only XML is allowed.")]
    InvalidExtension { filename: String },

    #[error("This URL does not seem to contain XML!")]
    NotXml { url: String, content_type: String },
}

/// Network-specific error types
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid URL: {url} - {details}")]
    InvalidUrl { url: String, details: String },

    #[error("Connection timeout: {url} after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("HTTP status error: {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Transport error: {url} - {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// LibXML2-specific error types
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Path cannot be passed to libxml2: {path}")]
    UnsupportedPath { path: String },

    #[error("Schema validation internal error: code {code}")]
    InternalError { code: i32 },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, IntakeError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
