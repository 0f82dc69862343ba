//! LibXML2 FFI Wrapper Module
//!
//! Safe wrapper around the libxml2 calls needed to check one document against
//! one XML Schema: parse the schema from memory, parse the document from disk,
//! and validate the parsed tree.
//!
//! There is no mature pure Rust XSD validator, so libxml2 is called directly.
//! The `libxml` crate was not used because it documents itself as untested in
//! multithreaded programs, and the service validates concurrent submissions
//! against one shared schema.
//!
//! ## Thread Safety
//!
//! According to the libxml2 documentation (http://xmlsoft.org/threads.html):
//! - Parsing a schema is NOT thread-safe. Every parse in the process takes
//!   one global lock, and each validator parses its schema only once.
//! - A parsed schema is read-only and may be shared between threads.
//! - Validation is thread-safe as long as every call creates its own
//!   validation context, which `validate_file` does.
//! - The structured error handler installed while parsing a document is
//!   thread-local state in threaded builds of libxml2; it is installed and
//!   removed around each parse on the calling thread.

use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use libc::{c_char, c_int, c_void};

use crate::error::{LibXml2Error, LibXml2Result};

/// Global initialization flag for libxml2
///
/// libxml2's initialization function is NOT thread-safe, so it is guarded by
/// `std::sync::Once`.
static LIBXML2_INIT: Once = Once::new();

/// Serializes schema parsing across every wrapper in the process
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// Forbid network access while loading documents (`XML_PARSE_NONET`)
const XML_PARSE_NONET: c_int = 1 << 11;

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();

    // Schema parsing functions
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;

    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );

    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Document parsing functions
    pub fn xmlReadFile(filename: *const c_char, encoding: *const c_char, options: c_int)
    -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;

    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        sherr: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

/// One message reported by the libxml2 parser or validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: i32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}, line {}", self.message, self.line)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Callback for libxml2 to report parser and validation errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let diagnostics = unsafe { &mut *(user_data as *mut Vec<Diagnostic>) };

    let msg_ptr = unsafe { (*error).message };
    if msg_ptr.is_null() {
        return;
    }
    let message = unsafe { CStr::from_ptr(msg_ptr) }
        .to_string_lossy()
        .trim()
        .to_string();
    diagnostics.push(Diagnostic {
        line: unsafe { (*error).line },
        message,
    });
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Thread-safe wrapper for libxml2 schema pointer with proper resource management
///
/// This wrapper ensures that:
/// - Schema pointers are properly freed when the last clone is dropped
/// - The schema can be safely shared across threads (libxml2 schemas are read-only after parsing)
/// - Null pointers are never wrapped
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 documentation states that xmlSchema structures are thread-safe for reading
// See: http://xmlsoft.org/threads.html
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// Create a new XmlSchemaPtr from a raw pointer
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The pointer points to a properly initialized xmlSchema allocated by libxml2
    /// - No other code will free this pointer
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "null schema pointer".to_string(),
            });
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    /// Get the raw pointer for FFI calls; valid only while this value lives
    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    /// Check if the schema pointer is valid (non-null)
    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// Parsed document, freed on drop
struct XmlDocGuard(*mut XmlDoc);

impl Drop for XmlDocGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { xmlFreeDoc(self.0) };
        }
    }
}

/// Result of checking one document against a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Document is well-formed and conforms to the schema
    Valid,
    /// Document is well-formed but violates the schema (return code > 0)
    Invalid {
        error_count: i32,
        errors: Vec<Diagnostic>,
    },
    /// Document could not be parsed as XML at all
    Malformed { errors: Vec<Diagnostic> },
    /// Internal error occurred in the validator (return code < 0)
    InternalError { code: i32 },
}

impl ValidationResult {
    /// Create ValidationResult from the xmlSchemaValidateDoc return code and captured errors
    pub fn from_code(code: c_int, errors: Vec<Diagnostic>) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid {
                error_count: n,
                errors,
            },
            n => ValidationResult::InternalError { code: n },
        }
    }

    /// Check if validation was successful
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Check if validation failed due to schema violations
    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid { .. })
    }

    /// Check if the document is not well-formed XML
    pub fn is_malformed(&self) -> bool {
        matches!(self, ValidationResult::Malformed { .. })
    }

    /// Check if an internal error occurred
    pub fn is_error(&self) -> bool {
        matches!(self, ValidationResult::InternalError { .. })
    }

    /// Diagnostics joined one per line, or `None` when there is nothing to report
    pub fn diagnostic_text(&self) -> Option<String> {
        match self {
            ValidationResult::Invalid { errors, .. } | ValidationResult::Malformed { errors } => {
                Some(join_diagnostics(errors))
            }
            _ => None,
        }
    }
}

/// LibXML2 wrapper providing safe access to schema parsing and validation
///
/// - Schema parsing is serialized by a process-wide lock
/// - Validation may run on any number of threads at once
/// - Every libxml2 allocation is released on all paths (Arc + Drop guards)
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a new LibXML2 wrapper instance
    ///
    /// Initialization of libxml2 happens exactly once per process, however many
    /// wrappers are created.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse an XML schema from memory buffer
    ///
    /// **IMPORTANT**: Schema parsing is NOT thread-safe in libxml2.
    ///
    /// # Errors
    ///
    /// Returns `LibXml2Error::SchemaParseFailed` with the parser's messages if the
    /// buffer is not a usable schema, and `LibXml2Error::MemoryAllocation` if no
    /// parser context could be created.
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        let size = c_int::try_from(schema_data.len()).map_err(|_| {
            LibXml2Error::SchemaParseFailed {
                details: "schema is too large".to_string(),
            }
        })?;

        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        // Guards no data, so a poisoned lock is still usable
        let _parse_guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        unsafe {
            let parser_ctxt =
                xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<Diagnostic> as *mut c_void,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);

            // Always free the parser context
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                let details = if diagnostics.is_empty() {
                    "libxml2 returned no schema".to_string()
                } else {
                    join_diagnostics(&diagnostics)
                };
                return Err(LibXml2Error::SchemaParseFailed { details });
            }

            XmlSchemaPtr::from_raw(schema_ptr)
        }
    }

    /// Parse the XML file at `file_path` and validate it against `schema`
    ///
    /// A document that is not well-formed yields `ValidationResult::Malformed`
    /// with the parser's messages; it is not an `Err`. The file is only read.
    ///
    /// # Errors
    ///
    /// Returns `LibXml2Error::UnsupportedPath` for paths that cannot become C strings,
    /// `LibXml2Error::ValidationContextCreationFailed` if libxml2 cannot allocate a
    /// validation context, and `LibXml2Error::InternalError` for negative return codes.
    pub fn validate_file(
        &self,
        schema: &XmlSchemaPtr,
        file_path: &Path,
    ) -> LibXml2Result<ValidationResult> {
        let path_str = file_path
            .to_str()
            .ok_or_else(|| LibXml2Error::UnsupportedPath {
                path: file_path.display().to_string(),
            })?;
        let c_path = CString::new(path_str).map_err(|_| LibXml2Error::UnsupportedPath {
            path: path_str.to_string(),
        })?;

        let mut parse_errors: Vec<Diagnostic> = Vec::new();
        let doc = unsafe {
            xmlSetStructuredErrorFunc(
                &mut parse_errors as *mut Vec<Diagnostic> as *mut c_void,
                Some(structured_error_callback),
            );
            let doc = xmlReadFile(c_path.as_ptr(), std::ptr::null(), XML_PARSE_NONET);
            xmlSetStructuredErrorFunc(std::ptr::null_mut(), None);
            XmlDocGuard(doc)
        };

        if doc.0.is_null() {
            if parse_errors.is_empty() {
                parse_errors.push(Diagnostic {
                    line: 0,
                    message: "Document is not well-formed XML".to_string(),
                });
            }
            return Ok(ValidationResult::Malformed {
                errors: parse_errors,
            });
        }

        let mut errors: Vec<Diagnostic> = Vec::new();
        let result_code = unsafe {
            // Each call gets its own context; contexts are not shareable
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                &mut errors as *mut Vec<Diagnostic> as *mut c_void,
            );

            let code = xmlSchemaValidateDoc(valid_ctxt, doc.0);
            xmlSchemaFreeValidCtxt(valid_ctxt);
            code
        };

        match ValidationResult::from_code(result_code, errors) {
            ValidationResult::InternalError { code } => Err(LibXml2Error::InternalError { code }),
            result => Ok(result),
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

    const VALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root>Hello World</root>"#;

    const INVALID_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root><invalid>content</invalid></root>"#;

    const MALFORMED_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root><unclosed></root>"#;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_schema_parsing_success() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        assert!(schema.is_valid());
    }

    #[test]
    fn test_schema_parsing_invalid_schema() {
        let wrapper = LibXml2Wrapper::new();
        let result = wrapper.parse_schema_from_memory(b"<invalid>not a schema</invalid>");

        match result {
            Err(LibXml2Error::SchemaParseFailed { details }) => assert!(!details.is_empty()),
            other => panic!("Expected SchemaParseFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_parsing_empty_data() {
        let wrapper = LibXml2Wrapper::new();
        assert!(wrapper.parse_schema_from_memory(&[]).is_err());
    }

    #[test]
    fn test_validate_valid_file() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        let file = write_temp(VALID_XML);

        let result = wrapper.validate_file(&schema, file.path()).unwrap();
        assert_eq!(result, ValidationResult::Valid);
        assert!(result.diagnostic_text().is_none());
    }

    #[test]
    fn test_validate_invalid_file_reports_diagnostics() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        let file = write_temp(INVALID_XML);

        let result = wrapper.validate_file(&schema, file.path()).unwrap();
        assert!(result.is_invalid());

        let text = result.diagnostic_text().unwrap();
        assert!(text.contains("root"), "unexpected diagnostic: {text}");
        assert!(text.contains("line 2"), "unexpected diagnostic: {text}");
    }

    #[test]
    fn test_validate_malformed_file() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        let file = write_temp(MALFORMED_XML);

        let result = wrapper.validate_file(&schema, file.path()).unwrap();
        assert!(result.is_malformed());
        assert!(!result.diagnostic_text().unwrap().is_empty());
    }

    #[test]
    fn test_validate_missing_file_is_malformed() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        let dir = tempfile::TempDir::new().unwrap();

        let result = wrapper
            .validate_file(&schema, &dir.path().join("gone.xml"))
            .unwrap();
        assert!(result.is_malformed());
    }

    #[test]
    fn test_validation_result_from_code() {
        assert_eq!(
            ValidationResult::from_code(0, vec![]),
            ValidationResult::Valid
        );
        assert_eq!(
            ValidationResult::from_code(5, vec![]),
            ValidationResult::Invalid {
                error_count: 5,
                errors: vec![]
            }
        );
        assert_eq!(
            ValidationResult::from_code(-1, vec![]),
            ValidationResult::InternalError { code: -1 }
        );
    }

    #[test]
    fn test_diagnostic_display() {
        let with_line = Diagnostic {
            line: 3,
            message: "Element 'a': This element is not expected.".to_string(),
        };
        assert_eq!(
            with_line.to_string(),
            "Element 'a': This element is not expected., line 3"
        );

        let without_line = Diagnostic {
            line: 0,
            message: "failed to load".to_string(),
        };
        assert_eq!(without_line.to_string(), "failed to load");
    }

    #[test]
    fn test_schema_ptr_cloning() {
        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        let cloned_schema = schema.clone();

        // Both should point to the same underlying schema
        assert_eq!(schema.as_ptr(), cloned_schema.as_ptr());
    }

    #[test]
    fn test_concurrent_validation_shares_schema() {
        use rayon::prelude::*;

        let wrapper = LibXml2Wrapper::new();
        let schema = wrapper
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .unwrap();
        let valid = write_temp(VALID_XML);
        let invalid = write_temp(INVALID_XML);

        let results: Vec<_> = (0..32)
            .into_par_iter()
            .map(|i| {
                let path = if i % 2 == 0 { valid.path() } else { invalid.path() };
                (i, wrapper.validate_file(&schema, path).unwrap())
            })
            .collect();

        for (i, result) in results {
            assert_eq!(result.is_valid(), i % 2 == 0);
        }
    }
}
