//! Filename derivation and collision-free allocation inside the scratch directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;
use tokio::fs::{File, OpenOptions};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Extension every stored upload carries
pub const XML_EXTENSION: &str = ".xml";

/// Cached regex for characters not allowed in stored filenames
static UNSAFE_CHARS_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_unsafe_chars_regex() -> &'static Regex {
    UNSAFE_CHARS_REGEX
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("Failed to compile filename regex"))
}

/// Reduce a client-supplied filename to a safe basename
///
/// Accented letters are decomposed (NFKD) and reduced to their ASCII base;
/// other non-ASCII characters are dropped. Path separators become spaces,
/// whitespace runs become `_`, every character outside `[A-Za-z0-9_.-]` is
/// dropped and leading or trailing `.`/`_` are trimmed. The result never
/// names a parent directory; it may be empty.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name.nfkd().filter(char::is_ascii).collect();
    let flattened = ascii.replace(['/', '\\'], " ");
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    get_unsafe_chars_regex()
        .replace_all(&joined, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Whether `name` ends in a `.xml` extension (case-insensitive)
///
/// The extension is the text after the final `.`; names without a dot or
/// with nothing after the final dot have none.
pub fn has_xml_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, extension)| extension.eq_ignore_ascii_case("xml"))
}

/// Name derived from the current local time, e.g. `2016-05-12_134501.xml`
pub fn timestamp_name() -> String {
    format!(
        "{}{}",
        chrono::Local::now().format("%Y-%m-%d_%H%M%S"),
        XML_EXTENSION
    )
}

/// Strip whatever extension `name` has and append `.xml`
pub fn force_xml_extension(name: &str) -> String {
    format!("{}{}", stem(name), XML_EXTENSION)
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Preferred stored name for a direct upload, given its client-supplied name
///
/// Falls back to [`timestamp_name`] when no safe name remains.
pub fn preferred_name_for_upload(original_name: Option<&str>) -> String {
    let sanitized = original_name.map(secure_filename).unwrap_or_default();
    if sanitized.is_empty() {
        timestamp_name()
    } else {
        force_xml_extension(&sanitized)
    }
}

/// Preferred stored name for a URL upload: the last path segment of the URL
///
/// Falls back to [`timestamp_name`] when the URL has no usable last segment.
pub fn preferred_name_for_url(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string),
        Err(_) => url.rsplit('/').next().map(str::to_string),
    };

    let sanitized = segment.as_deref().map(secure_filename).unwrap_or_default();
    if sanitized.is_empty() {
        timestamp_name()
    } else {
        force_xml_extension(&sanitized)
    }
}

/// Candidate name for the given attempt: `name.xml`, `name1.xml`, `name2.xml`, ...
pub fn candidate_name(preferred: &str, attempt: u64) -> String {
    if attempt == 0 {
        force_xml_extension(preferred)
    } else {
        format!("{}{}{}", stem(preferred), attempt, XML_EXTENSION)
    }
}

/// A file created exclusively by [`FilenameAllocator::allocate`]
///
/// The file exists (empty) as soon as the reservation is returned, so no other
/// allocation can pick the same name.
#[derive(Debug)]
pub struct Reservation {
    filename: String,
    path: PathBuf,
    file: File,
}

impl Reservation {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Close the handle and keep only the name and path
    pub fn into_parts(self) -> (String, PathBuf) {
        (self.filename, self.path)
    }
}

/// Assigns unique filenames inside one directory
///
/// Uniqueness comes from exclusive creation (`create_new`): the suffix is only
/// incremented when the filesystem reports that the candidate already exists,
/// so two concurrent allocations can never receive the same name. The search
/// has no upper bound.
#[derive(Debug, Clone)]
pub struct FilenameAllocator {
    directory: PathBuf,
}

impl FilenameAllocator {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reserve the lowest free name derived from `preferred`
    pub async fn allocate(&self, preferred: &str) -> io::Result<Reservation> {
        let mut attempt = 0u64;
        loop {
            let filename = candidate_name(preferred, attempt);
            let path = self.directory.join(&filename);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    debug!(%filename, attempt, "Allocated scratch filename");
                    return Ok(Reservation {
                        filename,
                        path,
                        file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}
