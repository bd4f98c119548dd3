//! The persisted index bundle.
//!
//! Four artifacts live together in one directory and are only ever replaced as
//! a unit: the vector file, a JSON-lines metadata store whose line `i` describes
//! vector `i`, the build config and the manifest of source fingerprints. A new
//! bundle is written into a staging directory next to the target and published
//! with directory renames, so a reader sees the old bundle, the new one, or none.

use crate::chunking::ChunkingConfig;
use crate::error::{IngestError, SearchError};
use crate::models::DocumentChunk;
use crate::vector_index::FlatIndex;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

pub const INDEX_FILE: &str = "index.flat";
pub const METADATA_FILE: &str = "meta.jsonl";
pub const CONFIG_FILE: &str = "config.json";
pub const MANIFEST_FILE: &str = "manifest.json";

pub const BUNDLE_FILES: [&str; 4] = [INDEX_FILE, METADATA_FILE, CONFIG_FILE, MANIFEST_FILE];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    pub embedding_model: String,
    pub chunk_size: usize,
    pub overlap: usize,
}

impl IndexConfig {
    pub fn new(embedding_model: impl Into<String>, chunking: ChunkingConfig) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            chunk_size: chunking.chunk_size,
            overlap: chunking.overlap,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PdfFingerprint {
    /// Resolved absolute path.
    pub path: String,
    pub size: u64,
    pub mtime_ns: u64,
}

impl PdfFingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let resolved = fs::canonicalize(path)?;
        let metadata = fs::metadata(&resolved)?;
        let mtime_ns = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0);

        Ok(Self {
            path: resolved.to_string_lossy().to_string(),
            size: metadata.len(),
            mtime_ns,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// Unix seconds.
    pub created_at: f64,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub overlap: usize,
    pub pdfs: Vec<PdfFingerprint>,
}

impl IndexManifest {
    pub fn new(config: &IndexConfig, pdfs: Vec<PdfFingerprint>) -> Self {
        Self {
            created_at: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            embedding_model: config.embedding_model.clone(),
            chunk_size: config.chunk_size,
            overlap: config.overlap,
            pdfs,
        }
    }

    pub fn config(&self) -> IndexConfig {
        IndexConfig {
            embedding_model: self.embedding_model.clone(),
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }

    pub fn fingerprint(&self, resolved_path: &str) -> Option<&PdfFingerprint> {
        self.pdfs.iter().find(|entry| entry.path == resolved_path)
    }
}

/// Everything one loadable index consists of.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub index: FlatIndex,
    pub metadata: Vec<DocumentChunk>,
    pub config: IndexConfig,
    pub manifest: IndexManifest,
}

impl Bundle {
    pub fn write(&self, out_dir: &Path) -> Result<(), IngestError> {
        if self.metadata.len() != self.index.len() {
            return Err(IngestError::InvalidArgument(format!(
                "{} metadata records for {} vectors",
                self.metadata.len(),
                self.index.len()
            )));
        }

        let parent = parent_dir(out_dir);
        fs::create_dir_all(&parent)?;
        ensure_replaceable(out_dir)?;

        let staging = tempfile::Builder::new()
            .prefix(".pdf-rag-staging-")
            .tempdir_in(&parent)?;
        self.write_artifacts(staging.path())?;
        publish(staging.path(), out_dir, &parent)?;

        tracing::info!(
            dir = %out_dir.display(),
            vectors = self.index.len(),
            pdfs = self.manifest.pdfs.len(),
            "index bundle published"
        );
        Ok(())
    }

    fn write_artifacts(&self, dir: &Path) -> Result<(), IngestError> {
        let file = File::create(dir.join(INDEX_FILE))?;
        let mut writer = BufWriter::new(file);
        self.index.write_to(&mut writer)?;
        finish(writer)?;

        let file = File::create(dir.join(METADATA_FILE))?;
        let mut writer = BufWriter::new(file);
        for chunk in &self.metadata {
            serde_json::to_writer(&mut writer, chunk)?;
            writer.write_all(b"\n")?;
        }
        finish(writer)?;

        write_json(&dir.join(CONFIG_FILE), &self.config)?;
        write_json(&dir.join(MANIFEST_FILE), &self.manifest)?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self, SearchError> {
        let file = File::open(dir.join(INDEX_FILE))
            .map_err(|error| SearchError::bundle(INDEX_FILE, error))?;
        let index = FlatIndex::read_from(BufReader::new(file))
            .map_err(|error| SearchError::bundle(INDEX_FILE, error))?;

        let metadata = read_metadata(&dir.join(METADATA_FILE))?;
        let config: IndexConfig = read_json(&dir.join(CONFIG_FILE), CONFIG_FILE)?;
        let manifest = read_manifest(dir)?;

        if metadata.len() != index.len() {
            return Err(SearchError::bundle(
                METADATA_FILE,
                format!(
                    "{} records but the index holds {} vectors",
                    metadata.len(),
                    index.len()
                ),
            ));
        }

        Ok(Self {
            index,
            metadata,
            config,
            manifest,
        })
    }
}

pub fn read_manifest(dir: &Path) -> Result<IndexManifest, SearchError> {
    read_json(&dir.join(MANIFEST_FILE), MANIFEST_FILE)
}

pub fn missing_artifacts(dir: &Path) -> Vec<&'static str> {
    BUNDLE_FILES
        .iter()
        .copied()
        .filter(|name| !dir.join(name).is_file())
        .collect()
}

fn read_metadata(path: &Path) -> Result<Vec<DocumentChunk>, SearchError> {
    let file = File::open(path).map_err(|error| SearchError::bundle(METADATA_FILE, error))?;

    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|error| SearchError::bundle(METADATA_FILE, error))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|error| {
            SearchError::bundle(METADATA_FILE, format!("line {}: {error}", line_no + 1))
        })?;
        records.push(record);
    }

    Ok(records)
}

fn read_json<T: DeserializeOwned>(path: &Path, artifact: &str) -> Result<T, SearchError> {
    let file = File::open(path).map_err(|error| SearchError::bundle(artifact, error))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|error| SearchError::bundle(artifact, error))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IngestError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    finish(writer)
}

fn finish(writer: BufWriter<File>) -> Result<(), IngestError> {
    let file = writer.into_inner().map_err(|error| error.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn parent_dir(out_dir: &Path) -> PathBuf {
    match out_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// The whole directory is swapped on publish, so it may only hold bundle files.
fn ensure_replaceable(out_dir: &Path) -> Result<(), IngestError> {
    if !out_dir.exists() {
        return Ok(());
    }
    if !out_dir.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "index path {} is not a directory",
            out_dir.display()
        )));
    }

    for entry in fs::read_dir(out_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let known = name
            .to_str()
            .is_some_and(|name| BUNDLE_FILES.contains(&name));
        if !known {
            return Err(IngestError::InvalidArgument(format!(
                "index directory {} holds foreign entry {:?}; refusing to replace it",
                out_dir.display(),
                name
            )));
        }
    }

    Ok(())
}

fn publish(staging: &Path, out_dir: &Path, parent: &Path) -> Result<(), IngestError> {
    if !out_dir.exists() {
        fs::rename(staging, out_dir)?;
        return Ok(());
    }

    // Dropping the holder deletes the retired bundle.
    let retired = tempfile::Builder::new()
        .prefix(".pdf-rag-retired-")
        .tempdir_in(parent)?;
    let retired_bundle = retired.path().join("bundle");
    fs::rename(out_dir, &retired_bundle)?;

    if let Err(error) = fs::rename(staging, out_dir) {
        if let Err(restore_error) = fs::rename(&retired_bundle, out_dir) {
            tracing::error!(
                dir = %out_dir.display(),
                %restore_error,
                "failed to restore previous index bundle"
            );
        }
        return Err(error.into());
    }

    Ok(())
}
