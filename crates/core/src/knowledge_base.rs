//! Staleness tracking and the retrieve / re-rank / generate pipeline.
//!
//! A [`KnowledgeBase`] owns a documents directory and an index directory. It is
//! either unloaded or loaded; [`KnowledgeBase::ensure_index`] moves it to loaded,
//! rebuilding the bundle first when the documents or the configuration changed
//! since the last build.

use crate::builder::{IndexBuilder, DEFAULT_EMBED_BATCH_SIZE};
use crate::bundle::{missing_artifacts, read_manifest, IndexManifest, PdfFingerprint};
use crate::chunking::ChunkingConfig;
use crate::embeddings::Embedder;
use crate::error::{IngestError, SearchError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::generation::Generator;
use crate::models::{Answer, AskOptions, Hit};
use crate::prompt::build_prompt;
use crate::rerank::{rerank_hits, Reranker};
use crate::searcher::LoadedIndex;
use crate::traits::Retriever;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct KnowledgeBaseConfig {
    pub documents_dir: PathBuf,
    pub index_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub embed_batch_size: usize,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("data/pdfs"),
            index_dir: PathBuf::from("data/index"),
            chunking: ChunkingConfig::default(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

/// Outcome of [`KnowledgeBase::ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// The bundle was stale or absent and has been rebuilt and loaded.
    Rebuilt,
    /// The bundle on disk was current and has been loaded.
    Loaded,
    /// Nothing to do.
    AlreadyLoaded,
}

pub struct KnowledgeBase {
    config: KnowledgeBaseConfig,
    builder: IndexBuilder,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn PdfExtractor + Send + Sync>,
    reranker: Option<Box<dyn Reranker>>,
    generator: Option<Box<dyn Generator>>,
    loaded: RwLock<Option<Arc<LoadedIndex>>>,
    // Serializes rebuild-then-reload.
    maintenance: Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(config: KnowledgeBaseConfig, embedder: Arc<dyn Embedder>) -> Result<Self, IngestError> {
        if same_directory(&config.documents_dir, &config.index_dir) {
            return Err(IngestError::InvalidArgument(format!(
                "index dir {} must differ from the documents dir",
                config.index_dir.display()
            )));
        }

        let builder = IndexBuilder::new(Arc::clone(&embedder), config.chunking)?
            .with_batch_size(config.embed_batch_size);

        Ok(Self {
            config,
            builder,
            embedder,
            extractor: Arc::new(LopdfExtractor),
            reranker: None,
            generator: None,
            loaded: RwLock::new(None),
            maintenance: Mutex::new(()),
        })
    }

    pub fn with_reranker(mut self, reranker: Box<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_generator(mut self, generator: Box<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor + Send + Sync>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &KnowledgeBaseConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.read().is_some()
    }

    /// Number of chunks in the loaded index.
    pub fn chunk_count(&self) -> Option<usize> {
        self.loaded.read().as_ref().map(|index| index.len())
    }

    pub fn manifest(&self) -> Option<IndexManifest> {
        self.loaded.read().as_ref().map(|index| index.manifest().clone())
    }

    /// Pdfs directly inside the documents dir, sorted by path. A missing dir
    /// yields an empty list.
    pub fn discover_pdfs(&self) -> Result<Vec<PathBuf>, IngestError> {
        let root = &self.config.documents_dir;
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut pdfs = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|error| IngestError::Io(error.into()))?;
            if entry.file_type().is_file() && is_pdf(entry.path()) {
                pdfs.push(entry.into_path());
            }
        }
        pdfs.sort();
        Ok(pdfs)
    }

    /// True when the bundle in the index dir cannot serve `pdfs` as configured.
    pub fn needs_rebuild(&self, pdfs: &[PathBuf]) -> bool {
        match self.staleness(pdfs) {
            Some(reason) => {
                tracing::info!(index_dir = %self.config.index_dir.display(), %reason, "index is stale");
                true
            }
            None => false,
        }
    }

    fn staleness(&self, pdfs: &[PathBuf]) -> Option<String> {
        let missing = missing_artifacts(&self.config.index_dir);
        if !missing.is_empty() {
            return Some(format!("missing artifacts: {}", missing.join(", ")));
        }

        let manifest = match read_manifest(&self.config.index_dir) {
            Ok(manifest) => manifest,
            Err(error) => return Some(format!("unreadable manifest: {error}")),
        };

        let expected = self.builder.config();
        if manifest.config() != expected {
            return Some(format!(
                "config changed: built with {} / {} / {}, configured {} / {} / {}",
                manifest.embedding_model,
                manifest.chunk_size,
                manifest.overlap,
                expected.embedding_model,
                expected.chunk_size,
                expected.overlap
            ));
        }

        if manifest.pdfs.len() != pdfs.len() {
            return Some(format!(
                "pdf count changed from {} to {}",
                manifest.pdfs.len(),
                pdfs.len()
            ));
        }

        for path in pdfs {
            let current = match PdfFingerprint::of(path) {
                Ok(fingerprint) => fingerprint,
                Err(error) => return Some(format!("cannot stat {}: {error}", path.display())),
            };
            match manifest.fingerprint(&current.path) {
                None => return Some(format!("new pdf {}", current.path)),
                Some(stored) if stored != &current => {
                    return Some(format!("pdf changed {}", current.path));
                }
                Some(_) => {}
            }
        }

        None
    }

    /// Loads the index, rebuilding it first when stale.
    ///
    /// A rebuild always reloads, even if an older bundle was already loaded.
    pub fn ensure_index(&self) -> Result<IndexStatus, SearchError> {
        let _maintenance = self.maintenance.lock();

        let pdfs = self.discover_pdfs()?;
        if pdfs.is_empty() {
            return Err(SearchError::NoDocuments(
                self.config.documents_dir.display().to_string(),
            ));
        }

        if self.needs_rebuild(&pdfs) {
            self.build(&pdfs)?;
            self.load()?;
            return Ok(IndexStatus::Rebuilt);
        }

        if self.is_loaded() {
            return Ok(IndexStatus::AlreadyLoaded);
        }

        self.load()?;
        Ok(IndexStatus::Loaded)
    }

    /// Rebuilds from the current documents whether or not the bundle is stale.
    pub fn rebuild(&self) -> Result<IndexManifest, SearchError> {
        let _maintenance = self.maintenance.lock();

        let pdfs = self.discover_pdfs()?;
        if pdfs.is_empty() {
            return Err(SearchError::NoDocuments(
                self.config.documents_dir.display().to_string(),
            ));
        }

        let manifest = self.build(&pdfs)?;
        self.load()?;
        Ok(manifest)
    }

    /// Loads the bundle in the index dir as is, without looking at documents.
    pub fn open_index(&self) -> Result<IndexStatus, SearchError> {
        let _maintenance = self.maintenance.lock();
        if self.is_loaded() {
            return Ok(IndexStatus::AlreadyLoaded);
        }
        self.load()?;
        Ok(IndexStatus::Loaded)
    }

    /// Drops the loaded index. Searches fail until the next load.
    pub fn close(&self) {
        self.loaded.write().take();
    }

    fn build(&self, pdfs: &[PathBuf]) -> Result<IndexManifest, IngestError> {
        self.builder
            .build_with(self.extractor.as_ref(), pdfs, &self.config.index_dir)
    }

    fn load(&self) -> Result<(), SearchError> {
        let index = LoadedIndex::load(&self.config.index_dir, Arc::clone(&self.embedder))?;
        *self.loaded.write() = Some(Arc::new(index));
        Ok(())
    }

    fn current(&self) -> Result<Arc<LoadedIndex>, SearchError> {
        self.loaded.read().clone().ok_or(SearchError::NotLoaded)
    }

    pub fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>, SearchError> {
        self.current()?.search(query, k)
    }

    pub fn rerank(&self, query: &str, hits: Vec<Hit>, top_m: usize) -> Result<Vec<Hit>, SearchError> {
        let reranker = self.reranker.as_deref().ok_or_else(|| {
            SearchError::CapabilityUnavailable("no re-ranker configured".to_string())
        })?;
        rerank_hits(reranker, query, hits, top_m)
    }

    /// Retrieves, optionally re-ranks, and generates. The returned hits are
    /// exactly the passages placed in the prompt.
    pub fn answer(&self, question: &str, options: &AskOptions) -> Result<Answer, SearchError> {
        let mut hits = self.search(question, options.k)?;
        if options.use_rerank && !hits.is_empty() {
            let top_m = options.final_m.min(hits.len());
            hits = self.rerank(question, hits, top_m)?;
        }

        let generator = self.generator.as_deref().ok_or_else(|| {
            SearchError::CapabilityUnavailable("no generation backend configured".to_string())
        })?;

        let prompt = build_prompt(question, &hits, options.answer_lang.as_deref());
        tracing::debug!(hits = hits.len(), prompt_chars = prompt.len(), "generating answer");
        let text = generator.generate(&prompt)?;

        Ok(Answer {
            text: text.trim().to_string(),
            hits,
        })
    }
}

impl Retriever for KnowledgeBase {
    fn ask(&self, question: &str, options: &AskOptions) -> Result<Answer, SearchError> {
        self.answer(question, options)
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>, SearchError> {
        KnowledgeBase::search(self, query, k)
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"))
}

fn same_directory(left: &Path, right: &Path) -> bool {
    if left == right {
        return true;
    }
    match (left.canonicalize(), right.canonicalize()) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
