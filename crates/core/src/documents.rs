//! The documents directory: listing and importing uploaded pdfs.

use crate::error::IngestError;
use regex::Regex;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use walkdir::WalkDir;

pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 25 * 1024 * 1024;

const FALLBACK_STEM: &str = "document";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub size_bytes: u64,
}

const UNSAFE_RUN: &str = r"[^A-Za-z0-9._-]+";

/// Pdfs directly inside `dir`, sorted by name. A missing dir lists nothing.
pub fn list_documents(dir: &Path) -> Result<Vec<DocumentSummary>, IngestError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|error| IngestError::Io(error.into()))?;
        let is_pdf = entry
            .path()
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"));
        if !entry.file_type().is_file() || !is_pdf {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        documents.push(DocumentSummary {
            filename: entry.file_name().to_string_lossy().to_string(),
            size_bytes: metadata.len(),
        });
    }

    documents.sort_by(|left, right| left.filename.cmp(&right.filename));
    Ok(documents)
}

/// Safe `.pdf` file name derived from an untrusted upload name.
///
/// Directory components are dropped, runs of characters outside
/// `[A-Za-z0-9._-]` become `-`, and the extension is forced to `.pdf`.
pub fn sanitize_file_name(name: &str) -> Result<String, IngestError> {
    let base = Path::new(name)
        .file_name()
        .and_then(|base| base.to_str())
        .unwrap_or_default();
    let base_path = Path::new(base);

    let stem = base_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    let unsafe_run = Regex::new(UNSAFE_RUN)?;
    let cleaned = unsafe_run.replace_all(stem, "-");
    let cleaned = cleaned.trim_matches(|c: char| c == '-' || c == '_');
    let stem = if cleaned.is_empty() { FALLBACK_STEM } else { cleaned };

    Ok(format!("{stem}.pdf"))
}

/// `name` if free in `dir`, else the first free `stem-N.pdf`.
pub fn dedupe_file_name(dir: &Path, name: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(FALLBACK_STEM);
    let suffix = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| format!(".{extension}"))
        .unwrap_or_default();

    let mut candidate = name.to_string();
    let mut counter = 1;
    while dir.join(&candidate).exists() {
        candidate = format!("{stem}-{counter}{suffix}");
        counter += 1;
    }
    candidate
}

/// Writes `bytes` into `dir` under a sanitized, unused name. Never overwrites.
pub fn import_document(
    dir: &Path,
    name: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<DocumentSummary, IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::InvalidArgument("uploaded file is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(IngestError::DocumentTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    fs::create_dir_all(dir)?;
    let sanitized = sanitize_file_name(name)?;

    loop {
        let filename = dedupe_file_name(dir, &sanitized);
        let target = dir.join(&filename);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            // Lost a race with a concurrent upload of the same name.
            Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
            Err(error) => return Err(error.into()),
        };

        if let Err(error) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&target);
            return Err(error.into());
        }

        tracing::info!(path = %target.display(), bytes = bytes.len(), "document imported");
        return Ok(DocumentSummary {
            filename,
            size_bytes: bytes.len() as u64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sanitized_to_pdf() -> Result<(), IngestError> {
        assert_eq!(sanitize_file_name("Annual Report (2024).PDF")?, "Annual-Report-2024.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd")?, "passwd.pdf");
        assert_eq!(sanitize_file_name("notes.txt")?, "notes.pdf");
        assert_eq!(sanitize_file_name("__***__.pdf")?, "document.pdf");
        assert_eq!(sanitize_file_name("")?, "document.pdf");
        Ok(())
    }

    #[test]
    fn taken_names_get_numbered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        assert_eq!(dedupe_file_name(dir.path(), "manual.pdf"), "manual.pdf");

        fs::write(dir.path().join("manual.pdf"), b"%PDF")?;
        fs::write(dir.path().join("manual-1.pdf"), b"%PDF")?;
        assert_eq!(dedupe_file_name(dir.path(), "manual.pdf"), "manual-2.pdf");
        Ok(())
    }

    #[test]
    fn import_never_overwrites() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let docs = dir.path().join("docs");

        let first = import_document(&docs, "manual.pdf", b"first", 1024)?;
        let second = import_document(&docs, "manual.pdf", b"second", 1024)?;
        assert_eq!(first.filename, "manual.pdf");
        assert_eq!(second.filename, "manual-1.pdf");
        assert_eq!(fs::read(docs.join("manual.pdf"))?, b"first");

        // Listing is sorted by name, and '-' sorts before '.'.
        let listed = list_documents(&docs)?;
        assert_eq!(listed, vec![second, first]);
        Ok(())
    }

    #[test]
    fn empty_and_oversized_uploads_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            import_document(dir.path(), "a.pdf", b"", 10),
            Err(IngestError::InvalidArgument(_))
        ));
        assert!(matches!(
            import_document(dir.path(), "a.pdf", &[0u8; 11], 10),
            Err(IngestError::DocumentTooLarge { size: 11, limit: 10 })
        ));
    }

    #[test]
    fn listing_skips_non_pdfs_and_missing_dirs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        assert!(list_documents(&dir.path().join("absent"))?.is_empty());

        fs::write(dir.path().join("b.pdf"), b"12")?;
        fs::write(dir.path().join("a.txt"), b"1")?;
        let listed = list_documents(dir.path())?;
        assert_eq!(
            listed,
            vec![DocumentSummary {
                filename: "b.pdf".to_string(),
                size_bytes: 2
            }]
        );
        Ok(())
    }
}
