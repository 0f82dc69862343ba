//! Upload intake
//!
//! [`IntakePipeline`] turns one submission (uploaded bytes or a remote URL) into
//! a [`ValidationOutcome`]:
//!
//! 1. source policy: extension check for uploads, content-type probe for URLs
//! 2. filename allocation in the scratch directory
//! 3. materialization of the bytes into the reserved file
//! 4. schema validation
//!
//! Every rejection happens before a file is created. Files that were created
//! belong to the submission's [`ScratchLease`] and are gone once `submit`
//! returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::error::{IntakeError, Rejection, Result};
use crate::http_client::{RemoteSource, is_acceptable_xml};
use crate::naming::{
    Reservation, has_xml_extension, preferred_name_for_upload, preferred_name_for_url,
    secure_filename,
};
use crate::scratch::{ScratchArea, ScratchLease};
use crate::validator::{SchemaValidator, ValidationOutcome};

/// Where the submitted document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Bytes sent by the client, with the filename it suggested
    LocalFile {
        bytes: Vec<u8>,
        original_name: Option<String>,
    },
    /// A URL the document should be fetched from
    RemoteUrl(String),
}

/// One submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub source: UploadSource,
}

impl UploadRequest {
    pub fn local_file(bytes: impl Into<Vec<u8>>, original_name: Option<&str>) -> Self {
        Self {
            source: UploadSource::LocalFile {
                bytes: bytes.into(),
                original_name: original_name.map(str::to_string),
            },
        }
    }

    pub fn remote_url(url: impl Into<String>) -> Self {
        Self {
            source: UploadSource::RemoteUrl(url.into()),
        }
    }
}

/// A document stored in the scratch directory, ready for validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUpload {
    pub filename: String,
    pub absolute_path: PathBuf,
}

/// Orchestrates source policy, naming, materialization and validation
#[derive(Clone)]
pub struct IntakePipeline {
    scratch: ScratchArea,
    remote: Arc<dyn RemoteSource>,
    validator: Arc<SchemaValidator>,
}

impl IntakePipeline {
    pub fn new(
        scratch: ScratchArea,
        remote: Arc<dyn RemoteSource>,
        validator: Arc<SchemaValidator>,
    ) -> Self {
        Self {
            scratch,
            remote,
            validator,
        }
    }

    pub fn scratch(&self) -> &ScratchArea {
        &self.scratch
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Run one submission to completion
    ///
    /// A document that fails validation is an `Ok` outcome with
    /// `success == false`. `Err` means the submission was rejected or the
    /// system failed; the error is logged here and its
    /// [`IntakeError::user_message`] is safe to show.
    pub async fn submit(&self, request: UploadRequest) -> Result<ValidationOutcome> {
        let mut lease = self.scratch.lease();
        let span = info_span!("submission", lease = %lease.id());

        let result = async {
            let resolved = self.resolve(request, &mut lease).await?;
            self.validator.validate(&resolved.absolute_path).await
        }
        .instrument(span.clone())
        .await;

        if let Err(e) = &result {
            let _entered = span.enter();
            match e {
                IntakeError::Rejected(rejection) => warn!("Submission rejected: {:?}", rejection),
                IntakeError::Network(network) => error!("Remote fetch failed: {}", network),
                other => error!("Unexpected error: {}", other),
            }
        }

        lease.release().await;
        result
    }

    /// Submit bytes uploaded by the client
    pub async fn submit_local_file(
        &self,
        bytes: impl Into<Vec<u8>>,
        suggested_name: Option<&str>,
    ) -> Result<ValidationOutcome> {
        self.submit(UploadRequest::local_file(bytes, suggested_name))
            .await
    }

    /// Submit a URL to fetch the document from
    pub async fn submit_remote_url(&self, url: &str) -> Result<ValidationOutcome> {
        self.submit(UploadRequest::remote_url(url)).await
    }

    /// Apply the source policy and store the document under a fresh name
    ///
    /// The stored file is registered with `lease`; it lives as long as the
    /// lease does.
    pub async fn resolve(
        &self,
        request: UploadRequest,
        lease: &mut ScratchLease,
    ) -> Result<ResolvedUpload> {
        match request.source {
            UploadSource::LocalFile {
                bytes,
                original_name,
            } => {
                self.resolve_local(&bytes, original_name.as_deref(), lease)
                    .await
            }
            UploadSource::RemoteUrl(url) => self.resolve_remote(&url, lease).await,
        }
    }

    async fn resolve_local(
        &self,
        bytes: &[u8],
        original_name: Option<&str>,
        lease: &mut ScratchLease,
    ) -> Result<ResolvedUpload> {
        let name = original_name.map(str::trim).unwrap_or_default();
        if name.is_empty() && bytes.is_empty() {
            return Err(Rejection::NoFileSelected.into());
        }

        let sanitized = secure_filename(name);
        if !sanitized.is_empty() && !has_xml_extension(&sanitized) {
            return Err(Rejection::InvalidExtension {
                filename: sanitized,
            }
            .into());
        }

        let mut reservation = self
            .scratch
            .allocator()
            .allocate(&preferred_name_for_upload(Some(&sanitized)))
            .await?;
        lease.track(reservation.path());
        debug!(filename = reservation.filename(), "Storing uploaded file");

        let file = reservation.file_mut();
        file.write_all(bytes).await?;
        file.flush().await?;

        Ok(resolved(reservation))
    }

    async fn resolve_remote(&self, url: &str, lease: &mut ScratchLease) -> Result<ResolvedUpload> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Rejection::EmptyUrl.into());
        }

        let media_type = self.remote.probe_content_type(url).await?;
        if !is_acceptable_xml(&media_type) {
            return Err(Rejection::NotXml {
                url: url.to_string(),
                content_type: media_type,
            }
            .into());
        }

        let mut reservation = self
            .scratch
            .allocator()
            .allocate(&preferred_name_for_url(url))
            .await?;
        lease.track(reservation.path());
        debug!(filename = reservation.filename(), %url, "Fetching remote document");

        if let Err(e) = self.remote.fetch_into(url, reservation.file_mut()).await {
            let path = reservation.path().to_path_buf();
            drop(reservation);
            lease.discard(&path).await;
            return Err(e);
        }

        Ok(resolved(reservation))
    }
}

fn resolved(reservation: Reservation) -> ResolvedUpload {
    let (filename, absolute_path) = reservation.into_parts();
    ResolvedUpload {
        filename,
        absolute_path,
    }
}

/// Whether a `check` target should be treated as a URL
pub fn looks_like_url(target: &str) -> bool {
    let lower = target.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Build the request for a `check` target: a URL, or a path read from disk
pub async fn request_for_target(target: &str) -> Result<UploadRequest> {
    if looks_like_url(target) {
        return Ok(UploadRequest::remote_url(target));
    }

    let path = Path::new(target);
    let bytes = tokio::fs::read(path).await?;
    let name = path.file_name().map(|name| name.to_string_lossy().into_owned());
    Ok(UploadRequest::local_file(bytes, name.as_deref()))
}
