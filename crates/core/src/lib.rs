pub mod builder;
pub mod bundle;
pub mod chunking;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod hosted;
mod http;
pub mod knowledge_base;
pub mod language;
pub mod models;
pub mod prompt;
pub mod rerank;
pub mod searcher;
pub mod traits;
pub mod vector_index;

pub use builder::{IndexBuilder, DEFAULT_EMBED_BATCH_SIZE};
pub use bundle::{Bundle, IndexConfig, IndexManifest, PdfFingerprint};
pub use chunking::{chunk_text, normalize_whitespace, ChunkingConfig, MIN_CHUNK_SIZE};
pub use documents::{
    dedupe_file_name, import_document, list_documents, sanitize_file_name, DocumentSummary,
    DEFAULT_MAX_DOCUMENT_BYTES,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingBackend, OllamaConfig, OllamaEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ErrorKind, IngestError, SearchError};
pub use extractor::{extract_pdf_chunks, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{
    GenerationBackend, Generator, OllamaGenerator, OpenAiConfig, OpenAiGenerator,
    DEFAULT_OLLAMA_GENERATION_MODEL,
};
pub use hosted::{HostedRetriever, HostedRetrieverConfig};
pub use knowledge_base::{IndexStatus, KnowledgeBase, KnowledgeBaseConfig};
pub use language::{detect_language, FALLBACK_LANGUAGE};
pub use models::{Answer, AskOptions, DocumentChunk, Hit, SourcePreview, UNKNOWN_LANGUAGE};
pub use prompt::build_prompt;
pub use rerank::{rerank_hits, HttpReranker, Reranker, RerankerConfig};
pub use searcher::LoadedIndex;
pub use traits::Retriever;
pub use vector_index::FlatIndex;
