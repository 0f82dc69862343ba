//! Schema Validation
//!
//! Checks uploaded documents against one fixed XML Schema.
//!
//! - The schema is parsed lazily, exactly once, even when the first
//!   validations arrive concurrently (`tokio::sync::OnceCell`).
//! - Parsing and validation are CPU-bound libxml2 calls and run on the
//!   blocking pool so the async runtime keeps serving other requests.
//! - Diagnostics are passed through [`clean_diagnostic`] before they reach the
//!   user, which is the single place that knows about libxml2's
//!   `{namespace}name` notation.

use std::borrow::Cow;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{IntakeError, LibXml2Error, Result};
use crate::libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};

/// META-SHARE resource schema shipped with the binary
pub const BUNDLED_SCHEMA: &[u8] = include_bytes!("../schemas/META-SHARE-Resource.xsd");

/// Name used for the bundled schema in logs
pub const BUNDLED_SCHEMA_NAME: &str = "META-SHARE-Resource.xsd";

/// Cached regex for the schema's targetNamespace attribute
static TARGET_NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_target_namespace_regex() -> &'static Regex {
    TARGET_NAMESPACE_REGEX.get_or_init(|| {
        Regex::new(r#"targetNamespace\s*=\s*["']([^"']+)["']"#)
            .expect("Failed to compile targetNamespace regex")
    })
}

/// Extract the `targetNamespace` declared by an XSD document, if any
pub fn target_namespace(schema_data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(schema_data);
    get_target_namespace_regex()
        .captures(&text)
        .map(|caps| caps[1].to_string())
}

/// Remove the schema namespace from a libxml2 diagnostic
///
/// libxml2 qualifies element names as `{namespace}name`. The braced token is
/// removed first, then any bare occurrence left in the text.
pub fn clean_diagnostic(raw: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => raw.replace(&format!("{{{ns}}}"), "").replace(ns, ""),
        _ => raw.to_string(),
    }
}

/// Result of validating one document, handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    success: bool,
    subject_filename: String,
    message: String,
}

impl ValidationOutcome {
    /// Create a successful outcome
    pub fn validated(subject_filename: impl Into<String>) -> Self {
        let subject_filename = subject_filename.into();
        Self {
            success: true,
            message: format!("File '{}' validated!", subject_filename),
            subject_filename,
        }
    }

    /// Create a failed outcome carrying an already cleaned diagnostic
    pub fn failed(subject_filename: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            subject_filename: subject_filename.into(),
            message: diagnostic.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn subject_filename(&self) -> &str {
        &self.subject_filename
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Validates documents against a single XML Schema parsed once per validator
pub struct SchemaValidator {
    libxml2: Arc<LibXml2Wrapper>,
    schema_data: Cow<'static, [u8]>,
    source_name: String,
    namespace: Option<String>,
    schema: OnceCell<XmlSchemaPtr>,
}

impl SchemaValidator {
    /// Validator for the schema embedded in the binary
    pub fn bundled() -> Self {
        Self::from_bytes(BUNDLED_SCHEMA, BUNDLED_SCHEMA_NAME)
    }

    /// Validator for an in-memory schema; nothing is parsed until first use
    pub fn from_bytes(
        schema_data: impl Into<Cow<'static, [u8]>>,
        source_name: impl Into<String>,
    ) -> Self {
        let schema_data = schema_data.into();
        let namespace = target_namespace(&schema_data);

        Self {
            libxml2: Arc::new(LibXml2Wrapper::new()),
            schema_data,
            source_name: source_name.into(),
            namespace,
            schema: OnceCell::new(),
        }
    }

    /// Validator for a schema file on disk
    pub async fn from_file(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(data, path.display().to_string()))
    }

    /// Override the namespace stripped from diagnostics
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Whether the schema has been parsed yet
    pub fn is_loaded(&self) -> bool {
        self.schema.initialized()
    }

    /// Get the parsed schema, parsing it on first call
    ///
    /// Concurrent first callers wait for a single parse; a failed parse is not
    /// cached, so the next call tries again.
    pub async fn schema(&self) -> Result<XmlSchemaPtr> {
        self.schema
            .get_or_try_init(|| async {
                info!(schema = %self.source_name, "Parsing XML schema");
                let wrapper = Arc::clone(&self.libxml2);
                let data = self.schema_data.clone();

                tokio::task::spawn_blocking(move || wrapper.parse_schema_from_memory(&data))
                    .await
                    .map_err(|e| IntakeError::Concurrency {
                        details: format!("Join error: {}", e),
                    })?
                    .map_err(IntakeError::from)
            })
            .await
            .cloned()
    }

    /// Parse the schema now instead of on the first validation
    pub async fn preload(&self) -> Result<()> {
        self.schema().await.map(|_| ())
    }

    /// Clean a raw diagnostic for this validator's schema
    pub fn clean(&self, raw: &str) -> String {
        clean_diagnostic(raw, self.namespace())
    }

    /// Validate the document at `document_path`
    ///
    /// Schema violations and malformed XML both produce an unsuccessful
    /// `ValidationOutcome`; `Err` is reserved for failures of the system itself.
    /// The document is never modified.
    pub async fn validate(&self, document_path: &Path) -> Result<ValidationOutcome> {
        let subject = document_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| document_path.display().to_string());

        // Fail loudly if the scratch file disappeared under us
        tokio::fs::metadata(document_path).await?;

        let schema = self.schema().await?;
        let wrapper = Arc::clone(&self.libxml2);
        let path = document_path.to_path_buf();

        let result = tokio::task::spawn_blocking(move || wrapper.validate_file(&schema, &path))
            .await
            .map_err(|e| IntakeError::Concurrency {
                details: format!("Join error: {}", e),
            })??;

        debug!(file = %subject, ?result, "libxml2 finished");

        match result {
            ValidationResult::Valid => {
                info!(file = %subject, "File validated");
                Ok(ValidationOutcome::validated(subject))
            }
            ValidationResult::Invalid { .. } | ValidationResult::Malformed { .. } => {
                let raw = result
                    .diagnostic_text()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| "Document does not conform to the schema".to_string());
                let diagnostic = self.clean(&raw);
                warn!(file = %subject, malformed = result.is_malformed(), "Validation error: {}", diagnostic);
                Ok(ValidationOutcome::failed(subject, diagnostic))
            }
            ValidationResult::InternalError { code } => {
                Err(LibXml2Error::InternalError { code }.into())
            }
        }
    }
}
