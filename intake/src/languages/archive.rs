//! Zip inspection shared by the code handlers.
//!
//! Nothing is extracted to disk here. The archive is only read far enough to
//! list its entries and check their declared sizes and paths.

use std::io::{Cursor, Write};
use zip::ZipArchive;
use zip::write::FileOptions;

use super::{UploadLimits, ValidationError};

/// Checks `bytes` against `limits` and returns the file entries, sorted.
///
/// Directory entries are skipped. Paths that would escape the extraction
/// root (absolute, `..`) are rejected.
pub fn inspect(bytes: &[u8], limits: &UploadLimits) -> Result<Vec<String>, ValidationError> {
    check_upload_size(bytes, limits)?;

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ValidationError::NotAnArchive(e.to_string()))?;

    if archive.len() > limits.max_entries {
        return Err(ValidationError::TooManyEntries {
            count: archive.len(),
            limit: limits.max_entries,
        });
    }

    let mut files = Vec::with_capacity(archive.len());
    let mut expanded: u64 = 0;

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ValidationError::NotAnArchive(e.to_string()))?;

        if entry.enclosed_name().is_none() {
            return Err(ValidationError::UnsafePath(entry.name().to_string()));
        }
        if entry.is_dir() {
            continue;
        }

        expanded = expanded.saturating_add(entry.size());
        if expanded > limits.max_uncompressed_bytes {
            return Err(ValidationError::ExpandsTooLarge {
                size: expanded,
                limit: limits.max_uncompressed_bytes,
            });
        }
        files.push(entry.name().to_string());
    }

    files.sort();
    Ok(files)
}

pub fn check_upload_size(bytes: &[u8], limits: &UploadLimits) -> Result<(), ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = bytes.len() as u64;
    if size > limits.max_upload_bytes {
        return Err(ValidationError::TooLarge {
            size,
            limit: limits.max_upload_bytes,
        });
    }
    Ok(())
}

fn has_extension(file: &str, ext: &str) -> bool {
    file.to_ascii_lowercase().ends_with(ext)
}

/// Requires at least one file ending in `sources` and none ending in
/// `forbidden`. Extensions are lowercase with the leading dot.
pub fn require_sources(
    files: &[String],
    sources: &[&str],
    forbidden: &[&str],
) -> Result<(), ValidationError> {
    if let Some(bad) = files
        .iter()
        .find(|f| forbidden.iter().any(|ext| has_extension(f, ext)))
    {
        return Err(ValidationError::ForbiddenFile(bad.clone()));
    }

    let found = files
        .iter()
        .any(|f| sources.iter().any(|ext| has_extension(f, ext)));
    if !found {
        return Err(ValidationError::MissingSources(
            sources.iter().map(|s| s.to_string()).collect(),
        ));
    }
    Ok(())
}

/// Writes `entries` into a fresh zip held in memory.
///
/// Timestamps are pinned so the same entries always produce the same bytes,
/// and with them the same artifact digest.
pub fn pack(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, ValidationError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options: FileOptions<'_, ()> =
        FileOptions::default().last_modified_time(zip::DateTime::default());

    for (name, content) in entries {
        zip.start_file(*name, options)
            .map_err(|e| ValidationError::Packaging(e.to_string()))?;
        zip.write_all(content)
            .map_err(|e| ValidationError::Packaging(e.to_string()))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| ValidationError::Packaging(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Zip of text files, for tests.
#[cfg(test)]
pub(crate) fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let entries: Vec<(&str, &[u8])> = files.iter().map(|(n, c)| (*n, c.as_bytes())).collect();
    pack(&entries).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_files_sorted() {
        let bytes = zip_of(&[("src/b.py", "print(2)"), ("a.py", "print(1)")]);
        let files = inspect(&bytes, &UploadLimits::default()).unwrap();
        assert_eq!(files, vec!["a.py".to_string(), "src/b.py".to_string()]);
    }

    #[test]
    fn test_rejects_garbage_and_empty() {
        let limits = UploadLimits::default();
        assert_eq!(inspect(b"", &limits), Err(ValidationError::Empty));
        assert!(matches!(
            inspect(b"definitely not a zip", &limits),
            Err(ValidationError::NotAnArchive(_))
        ));
    }

    #[test]
    fn test_enforces_limits() {
        let bytes = zip_of(&[("a.py", "x"), ("b.py", "y"), ("c.py", "z")]);

        let few_entries = UploadLimits {
            max_entries: 2,
            ..UploadLimits::default()
        };
        assert!(matches!(
            inspect(&bytes, &few_entries),
            Err(ValidationError::TooManyEntries { count: 3, limit: 2 })
        ));

        let tiny_upload = UploadLimits {
            max_upload_bytes: 10,
            ..UploadLimits::default()
        };
        assert!(matches!(
            inspect(&bytes, &tiny_upload),
            Err(ValidationError::TooLarge { .. })
        ));

        let big = "0".repeat(4096);
        let bomb = zip_of(&[("big.py", big.as_str())]);
        let small_expansion = UploadLimits {
            max_uncompressed_bytes: 1024,
            ..UploadLimits::default()
        };
        assert!(matches!(
            inspect(&bomb, &small_expansion),
            Err(ValidationError::ExpandsTooLarge { limit: 1024, .. })
        ));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let bytes = zip_of(&[("../../etc/passwd", "root")]);
        assert!(matches!(
            inspect(&bytes, &UploadLimits::default()),
            Err(ValidationError::UnsafePath(p)) if p == "../../etc/passwd"
        ));
    }

    #[test]
    fn test_require_sources() {
        let files = vec!["Main.JAVA".to_string(), "README".to_string()];
        assert!(require_sources(&files, &[".java"], &[".class"]).is_ok());

        let compiled = vec!["Main.java".to_string(), "Main.class".to_string()];
        assert_eq!(
            require_sources(&compiled, &[".java"], &[".class"]),
            Err(ValidationError::ForbiddenFile("Main.class".into()))
        );

        assert!(matches!(
            require_sources(&["notes.txt".to_string()], &[".java"], &[]),
            Err(ValidationError::MissingSources(_))
        ));
    }
}
