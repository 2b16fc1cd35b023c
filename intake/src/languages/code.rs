use super::archive::{inspect, require_sources};
use super::{
    FormSchema, LanguageHandler, PackagedArtifact, RawPayload, UploadLimits, ValidationError,
    archive_form,
};

/// Zip of source files for one language.
///
/// At least one file must end in one of `sources`; any file ending in one of
/// `compiled` rejects the upload. The archive is passed on unchanged.
#[derive(Debug, Clone)]
pub struct ArchiveHandler {
    key: &'static str,
    name: &'static str,
    title: &'static str,
    sources: &'static [&'static str],
    compiled: &'static [&'static str],
    limits: UploadLimits,
}

impl ArchiveHandler {
    pub fn new(
        key: &'static str,
        name: &'static str,
        title: &'static str,
        sources: &'static [&'static str],
        compiled: &'static [&'static str],
        limits: UploadLimits,
    ) -> Self {
        Self {
            key,
            name,
            title,
            sources,
            compiled,
            limits,
        }
    }

    /// `.py` sources. Bytecode is refused.
    pub fn python(limits: UploadLimits) -> Self {
        Self::new(
            "python",
            "Python",
            "Python sources (.zip)",
            &[".py"],
            &[".pyc", ".pyo"],
            limits,
        )
    }

    pub fn java(limits: UploadLimits) -> Self {
        Self::new(
            "java",
            "Java",
            "Java sources (.zip)",
            &[".java"],
            &[".class", ".jar"],
            limits,
        )
    }

    /// C and C++ sources. Headers are allowed but do not count as a source.
    pub fn cpp(limits: UploadLimits) -> Self {
        Self::new(
            "cpp",
            "C++",
            "C/C++ sources (.zip)",
            &[".cpp", ".cc", ".cxx", ".c"],
            &[".o", ".obj", ".exe", ".out", ".so", ".a"],
            limits,
        )
    }
}

impl LanguageHandler for ArchiveHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn validate(&self, payload: &RawPayload) -> Result<PackagedArtifact, ValidationError> {
        let files = inspect(&payload.bytes, &self.limits)?;
        require_sources(&files, self.sources, self.compiled)?;
        Ok(PackagedArtifact::new(payload.bytes.clone(), files))
    }

    fn describe_form(&self) -> FormSchema {
        archive_form(self.key, self.title, &self.limits)
    }
}
