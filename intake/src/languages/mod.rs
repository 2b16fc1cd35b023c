//! Per-language upload handlers.
//!
//! Each supported submission language has one [`LanguageHandler`] that checks
//! the raw upload and packages it for the graders. The registry is built once
//! at startup and only read afterwards; adding a language means registering a
//! new handler, nothing else changes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

pub mod archive;
mod code;
mod input;

pub use code::ArchiveHandler;
pub use input::InputHandler;

use crate::catalog::Assignment;

/// The raw upload as received from the web tier.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl RawPayload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// A worker-consumable bundle: a zip archive plus its manifest and digest.
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedArtifact {
    pub archive: Vec<u8>,
    pub files: Vec<String>,
    /// Lowercase hex SHA-256 of `archive`.
    pub digest: String,
}

impl PackagedArtifact {
    pub fn new(archive: Vec<u8>, files: Vec<String>) -> Self {
        let digest = hex::encode(Sha256::digest(&archive));
        Self {
            archive,
            files,
            digest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the upload is empty")]
    Empty,

    #[error("the upload is {size} bytes, the limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("the upload is not a valid zip archive: {0}")]
    NotAnArchive(String),

    #[error("the archive has {count} entries, the limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },

    #[error("the archive expands to {size} bytes, the limit is {limit}")]
    ExpandsTooLarge { size: u64, limit: u64 },

    #[error("unsafe path in archive: {0}")]
    UnsafePath(String),

    #[error("no source files found, expected one of: {}", .0.join(", "))]
    MissingSources(Vec<String>),

    #[error("file not allowed in a submission: {0}")]
    ForbiddenFile(String),

    #[error("the answer file must be UTF-8 text")]
    NotUtf8,

    #[error("could not package the upload: {0}")]
    Packaging(String),
}

/// Size limits applied to every upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLimits {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_max_uncompressed_bytes")]
    pub max_uncompressed_bytes: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_upload_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_uncompressed_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_max_entries() -> usize {
    512
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            max_uncompressed_bytes: default_max_uncompressed_bytes(),
            max_entries: default_max_entries(),
        }
    }
}

impl From<&common::AppConfig> for UploadLimits {
    fn from(cfg: &common::AppConfig) -> Self {
        Self {
            max_upload_bytes: cfg.max_upload_bytes,
            max_uncompressed_bytes: cfg.max_uncompressed_bytes,
            max_entries: cfg.max_archive_entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    File,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    /// Accepted file extensions, with the leading dot.
    pub accept: Vec<String>,
    pub max_bytes: u64,
    pub required: bool,
}

/// What the web tier needs to render an upload form for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormSchema {
    pub language: String,
    pub title: String,
    pub fields: Vec<FormField>,
}

pub trait LanguageHandler: Send + Sync {
    /// Registry key, lowercase (e.g. `"python"`).
    fn key(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Checks the upload and packages it, or says why it was rejected.
    fn validate(&self, payload: &RawPayload) -> Result<PackagedArtifact, ValidationError>;

    /// Upload form description for the web tier. Not used by intake itself.
    fn describe_form(&self) -> FormSchema;
}

/// Read-only map from language key to handler.
#[derive(Clone, Default)]
pub struct LanguageRegistry {
    handlers: HashMap<String, Arc<dyn LanguageHandler>>,
}

impl LanguageRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// `python`, `java`, `cpp` and `input`, all sharing `limits`.
    pub fn with_defaults(limits: UploadLimits) -> Self {
        Self::builder()
            .register(ArchiveHandler::python(limits))
            .register(ArchiveHandler::java(limits))
            .register(ArchiveHandler::cpp(limits))
            .register(InputHandler::new(limits))
            .build()
    }

    pub fn get(&self, language: &str) -> Option<&dyn LanguageHandler> {
        self.handlers.get(language).map(|h| h.as_ref())
    }

    pub fn contains(&self, language: &str) -> bool {
        self.handlers.contains_key(language)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Upload forms for every language `assignment` enables and this registry
    /// can handle, in the assignment's order.
    pub fn forms_for(&self, assignment: &Assignment) -> Vec<FormSchema> {
        assignment
            .languages()
            .iter()
            .filter_map(|lang| self.get(lang))
            .map(|h| h.describe_form())
            .collect()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Arc<dyn LanguageHandler>>,
}

impl RegistryBuilder {
    /// Adds a handler under its key. A later registration for the same key
    /// replaces the earlier one.
    pub fn register<H: LanguageHandler + 'static>(mut self, handler: H) -> Self {
        let key = handler.key().to_lowercase();
        if self.handlers.insert(key.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(language = %key, "language handler registered twice, keeping the last");
        }
        self
    }

    pub fn build(self) -> LanguageRegistry {
        LanguageRegistry {
            handlers: self.handlers,
        }
    }
}

/// Shared form for the zip-based code handlers.
pub(crate) fn archive_form(language: &str, title: &str, limits: &UploadLimits) -> FormSchema {
    FormSchema {
        language: language.to_string(),
        title: title.to_string(),
        fields: vec![FormField {
            name: "handin".to_string(),
            label: "Source archive".to_string(),
            kind: FieldKind::File,
            accept: vec![".zip".to_string()],
            max_bytes: limits.max_upload_bytes,
            required: true,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl LanguageHandler for Shout {
        fn key(&self) -> &'static str {
            "Shout"
        }
        fn name(&self) -> &'static str {
            "Shout"
        }
        fn validate(&self, payload: &RawPayload) -> Result<PackagedArtifact, ValidationError> {
            Ok(PackagedArtifact::new(payload.bytes.to_ascii_uppercase(), vec![]))
        }
        fn describe_form(&self) -> FormSchema {
            archive_form("shout", "Shout", &UploadLimits::default())
        }
    }

    #[test]
    fn test_defaults_are_registered() {
        let registry = LanguageRegistry::with_defaults(UploadLimits::default());
        assert_eq!(registry.keys(), vec!["cpp", "input", "java", "python"]);
        assert_eq!(registry.get("java").unwrap().name(), "Java");
        assert!(registry.get("ruby").is_none());
    }

    #[test]
    fn test_new_language_is_just_a_registration() {
        let registry = LanguageRegistry::builder().register(Shout).build();
        let handler = registry.get("shout").unwrap();
        let artifact = handler.validate(&RawPayload::new("a.txt", "hi")).unwrap();
        assert_eq!(artifact.archive, b"HI");
        assert_eq!(artifact.digest.len(), 64);
    }

    #[test]
    fn test_forms_follow_assignment_languages() {
        let registry = LanguageRegistry::with_defaults(UploadLimits::default());
        let hw = Assignment::new(
            "u",
            "hw",
            "HW",
            vec![],
            vec!["java".into(), "ruby".into(), "python".into()],
        )
        .unwrap();

        let forms = registry.forms_for(&hw);
        let langs: Vec<_> = forms.iter().map(|f| f.language.as_str()).collect();
        assert_eq!(langs, vec!["java", "python"]);
        assert_eq!(forms[0].fields[0].accept, vec![".zip".to_string()]);
    }

    #[test]
    fn test_validation_messages_are_readable() {
        let err = ValidationError::MissingSources(vec![".py".into(), ".pyw".into()]);
        assert_eq!(err.to_string(), "no source files found, expected one of: .py, .pyw");
    }
}
