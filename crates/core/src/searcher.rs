use crate::bundle::{Bundle, IndexConfig, IndexManifest};
use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::models::{DocumentChunk, Hit};
use std::path::Path;
use std::sync::Arc;

/// A bundle read from disk together with the embedder that encodes queries for it.
/// Immutable after load.
pub struct LoadedIndex {
    bundle: Bundle,
    embedder: Arc<dyn Embedder>,
}

impl LoadedIndex {
    /// Fails if any artifact is missing or unreadable, or if `embedder` is not
    /// the model the bundle was built with.
    pub fn load(dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, SearchError> {
        let bundle = Bundle::read(dir)?;

        if bundle.config.embedding_model != embedder.model_id() {
            return Err(SearchError::ModelMismatch {
                indexed: bundle.config.embedding_model.clone(),
                active: embedder.model_id().to_string(),
            });
        }

        if let Some(dimension) = embedder.dimensions() {
            if !bundle.index.is_empty() && dimension != bundle.index.dimension() {
                return Err(SearchError::DimensionMismatch {
                    expected: bundle.index.dimension(),
                    found: dimension,
                });
            }
        }

        tracing::info!(
            dir = %dir.display(),
            vectors = bundle.index.len(),
            model = %bundle.config.embedding_model,
            "index loaded"
        );
        Ok(Self { bundle, embedder })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.bundle.config
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.bundle.manifest
    }

    pub fn metadata(&self) -> &[DocumentChunk] {
        &self.bundle.metadata
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn len(&self) -> usize {
        self.bundle.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.index.is_empty()
    }

    /// At most `k` hits, best first.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>, SearchError> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query)?;
        let ranked = self.bundle.index.search(&query_vector, k)?;

        Ok(ranked
            .into_iter()
            .filter_map(|(position, score)| {
                self.bundle
                    .metadata
                    .get(position)
                    .map(|chunk| Hit::from_chunk(chunk, score))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{IndexConfig, IndexManifest};
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::vector_index::FlatIndex;

    fn write_bundle(dir: &Path, embedder: &CharacterNgramEmbedder, texts: &[&str]) {
        let mut index = FlatIndex::new(embedder.dimensions().unwrap_or_default());
        let mut metadata = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let vector = embedder.embed(text).expect("embedding succeeds");
            index.add(&vector).expect("dimension matches");
            metadata.push(DocumentChunk {
                text: text.to_string(),
                source: format!("doc{i}.pdf"),
                page: 1,
                lang: "en".to_string(),
            });
        }

        let config = IndexConfig::new(embedder.model_id(), ChunkingConfig::default());
        let manifest = IndexManifest::new(&config, Vec::new());
        Bundle {
            index,
            metadata,
            config,
            manifest,
        }
        .write(dir)
        .expect("bundle writes");
    }

    #[test]
    fn search_returns_at_most_k_hits_best_first() -> Result<(), SearchError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("index");
        let embedder = CharacterNgramEmbedder::default();
        write_bundle(
            &out,
            &embedder,
            &["pump pressure limits", "valve maintenance", "pump pressure relief valve"],
        );

        let index = LoadedIndex::load(&out, Arc::new(embedder))?;
        let hits = index.search("pump pressure", 2)?;
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|hit| hit.text.contains("pump")));

        assert_eq!(index.search("pump", 10)?.len(), 3);
        assert!(index.search("pump", 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn loading_with_another_model_is_a_hard_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("index");
        write_bundle(&out, &CharacterNgramEmbedder::new(64), &["text"]);

        let result = LoadedIndex::load(&out, Arc::new(CharacterNgramEmbedder::new(32)));
        assert!(matches!(result, Err(SearchError::ModelMismatch { .. })));
    }

    #[test]
    fn loading_a_missing_bundle_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = LoadedIndex::load(dir.path(), Arc::new(CharacterNgramEmbedder::default()));
        assert!(matches!(result, Err(SearchError::Bundle { .. })));
    }
}
