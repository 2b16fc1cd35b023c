//! Content-addressed storage for packaged artifacts.
//!
//! Blobs live at `<root>/<first two hex chars>/<digest>.zip`. The same payload
//! uploaded twice is stored once. Blobs are never deleted by intake, so a blob
//! written for a submission that later failed to persist is harmless.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::languages::PackagedArtifact;

const SCHEME: &str = "sha256:";

/// Opaque handle to a stored artifact, `sha256:<hex digest>`.
///
/// Deserializing goes through [`ArtifactRef::parse`], so a malformed ref read
/// back from an outbox payload is an error rather than a bad path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn from_digest(digest: &str) -> Self {
        Self(format!("{SCHEME}{digest}"))
    }

    /// Accepts only well-formed refs: the scheme followed by 64 lowercase hex
    /// characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let digest = raw.strip_prefix(SCHEME)?;
        let well_formed = digest.len() == 64
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn digest(&self) -> &str {
        &self.0[SCHEME.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("malformed artifact ref `{raw}`"))
    }
}

impl From<ArtifactRef> for String {
    fn from(artifact: ArtifactRef) -> Self {
        artifact.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(cfg: &common::AppConfig) -> Self {
        Self::new(&cfg.artifact_storage_root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, artifact: &ArtifactRef) -> PathBuf {
        let digest = artifact.digest();
        self.root
            .join(&digest[..2])
            .join(format!("{digest}.zip"))
    }

    /// Stores the archive and returns its ref.
    ///
    /// Writes go to a temporary sibling first and are renamed into place, so
    /// a reader never sees a partial blob.
    pub async fn put(&self, artifact: &PackagedArtifact) -> io::Result<ArtifactRef> {
        let artifact_ref = ArtifactRef::from_digest(&artifact.digest);
        let path = self.path_for(&artifact_ref);

        if fs::try_exists(&path).await? {
            tracing::debug!(artifact = %artifact_ref, "artifact already stored");
            return Ok(artifact_ref);
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, &artifact.archive).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        tracing::debug!(
            artifact = %artifact_ref,
            bytes = artifact.archive.len(),
            "artifact stored"
        );
        Ok(artifact_ref)
    }

    /// Path of a stored artifact, or `NotFound`.
    pub async fn resolve(&self, artifact: &ArtifactRef) -> io::Result<PathBuf> {
        let path = self.path_for(artifact);
        if fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("artifact {artifact} is not stored"),
            ))
        }
    }

    pub async fn load(&self, artifact: &ArtifactRef) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(artifact).await?).await
    }
}
