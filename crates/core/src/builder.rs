use crate::bundle::{Bundle, IndexConfig, IndexManifest, PdfFingerprint};
use crate::chunking::ChunkingConfig;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{extract_chunks, LopdfExtractor, PdfExtractor};
use crate::models::DocumentChunk;
use crate::vector_index::FlatIndex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

/// Turns a set of pdfs into a published index bundle.
#[derive(Clone)]
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, chunking: ChunkingConfig) -> Result<Self, IngestError> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            chunking,
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn config(&self) -> IndexConfig {
        IndexConfig::new(self.embedder.model_id(), self.chunking)
    }

    /// Manifest describing the current state of `pdfs`, timestamped now.
    pub fn manifest_for(&self, pdfs: &[PathBuf]) -> Result<IndexManifest, IngestError> {
        let fingerprints = pdfs
            .iter()
            .map(|path| PdfFingerprint::of(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IndexManifest::new(&self.config(), fingerprints))
    }

    pub fn build(&self, pdf_paths: &[PathBuf], out_dir: &Path) -> Result<IndexManifest, IngestError> {
        self.build_with(&LopdfExtractor, pdf_paths, out_dir)
    }

    pub fn build_with<E>(
        &self,
        extractor: &E,
        pdf_paths: &[PathBuf],
        out_dir: &Path,
    ) -> Result<IndexManifest, IngestError>
    where
        E: PdfExtractor + ?Sized,
    {
        let pdf_paths: Vec<PathBuf> = pdf_paths
            .iter()
            .filter(|path| path.is_file())
            .cloned()
            .collect();

        if pdf_paths.is_empty() {
            return Err(IngestError::InvalidArgument(
                "no pdf files provided for indexing".to_string(),
            ));
        }

        let mut chunks = Vec::new();
        for path in &pdf_paths {
            match extract_chunks(extractor, path, self.chunking) {
                Ok(file_chunks) => {
                    tracing::debug!(path = %path.display(), chunks = file_chunks.len(), "pdf extracted");
                    chunks.extend(file_chunks);
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), reason = %error, "skipped pdf");
                }
            }
        }

        if chunks.is_empty() {
            return Err(IngestError::EmptyCorpus(pdf_paths.len()));
        }

        tracing::info!(
            pdfs = pdf_paths.len(),
            chunks = chunks.len(),
            model = self.embedder.model_id(),
            "building index"
        );

        let index = self.embed_chunks(&chunks)?;
        let manifest = self.manifest_for(&pdf_paths)?;
        let bundle = Bundle {
            index,
            metadata: chunks,
            config: self.config(),
            manifest: manifest.clone(),
        };
        bundle.write(out_dir)?;

        Ok(manifest)
    }

    fn embed_chunks(&self, chunks: &[DocumentChunk]) -> Result<FlatIndex, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let mut index: Option<FlatIndex> = None;

        for batch in texts.chunks(self.batch_size) {
            let vectors = self
                .embedder
                .embed_batch(batch)
                .map_err(|error| IngestError::Embedding(error.to_string()))?;

            if vectors.len() != batch.len() {
                return Err(IngestError::Embedding(format!(
                    "{} vectors returned for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for vector in vectors {
                let target = index.get_or_insert_with(|| FlatIndex::new(vector.len()));
                target
                    .add(&vector)
                    .map_err(|error| IngestError::Embedding(error.to_string()))?;
            }
        }

        let index = index.ok_or_else(|| IngestError::Embedding("no vectors produced".to_string()))?;
        if let Some(expected) = self.embedder.dimensions() {
            if expected != index.dimension() {
                return Err(IngestError::Embedding(format!(
                    "model {} declares dimension {expected} but produced {}",
                    self.embedder.model_id(),
                    index.dimension()
                )));
            }
        }

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{missing_artifacts, Bundle};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::PageText;
    use std::fs;

    /// Treats every file's bytes as the text of page one.
    struct PlainTextPages;

    impl PdfExtractor for PlainTextPages {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let text = fs::read_to_string(path)?;
            if text.starts_with("broken") {
                return Err(IngestError::PdfParse("unreadable".to_string()));
            }
            Ok(vec![PageText { number: 1, text }])
        }
    }

    fn builder() -> IndexBuilder {
        IndexBuilder::new(
            Arc::new(CharacterNgramEmbedder::default()),
            ChunkingConfig::default(),
        )
        .expect("default chunking is valid")
        .with_batch_size(1)
    }

    #[test]
    fn builds_bundle_in_input_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("b.pdf");
        let second = dir.path().join("a.pdf");
        fs::write(&first, "Grass is green.")?;
        fs::write(&second, "The sky is blue.")?;
        let out = dir.path().join("index");

        let manifest = builder().build_with(&PlainTextPages, &[first, second], &out)?;
        assert_eq!(manifest.pdfs.len(), 2);
        assert!(missing_artifacts(&out).is_empty());

        let bundle = Bundle::read(&out)?;
        let sources: Vec<_> = bundle.metadata.iter().map(|chunk| chunk.source.as_str()).collect();
        assert_eq!(sources, vec!["b.pdf", "a.pdf"]);
        assert_eq!(bundle.index.len(), 2);
        assert_eq!(bundle.manifest, manifest);
        Ok(())
    }

    #[test]
    fn empty_input_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = builder().build_with(
            &PlainTextPages,
            &[dir.path().join("missing.pdf")],
            &dir.path().join("index"),
        );
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[test]
    fn corpus_without_text_is_an_empty_corpus_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let broken = dir.path().join("scan.pdf");
        let blank = dir.path().join("blank.pdf");
        fs::write(&broken, "broken bytes")?;
        fs::write(&blank, "   ")?;
        let out = dir.path().join("index");

        let result = builder().build_with(&PlainTextPages, &[broken, blank], &out);
        assert!(matches!(result, Err(IngestError::EmptyCorpus(2))));
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn one_unreadable_pdf_does_not_fail_the_build() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let broken = dir.path().join("scan.pdf");
        let good = dir.path().join("good.pdf");
        fs::write(&broken, "broken bytes")?;
        fs::write(&good, "Readable text lives here.")?;
        let out = dir.path().join("index");

        let manifest = builder().build_with(&PlainTextPages, &[broken, good], &out)?;
        assert_eq!(manifest.pdfs.len(), 2);
        assert_eq!(Bundle::read(&out)?.metadata.len(), 1);
        Ok(())
    }
}
