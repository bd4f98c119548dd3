use thiserror::Error;

/// Coarse failure classes the enclosing service maps to user-facing responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller arguments. Never retried.
    Input,
    /// No extractable text across the whole corpus.
    Corpus,
    /// Missing or incompatible index artifacts.
    Consistency,
    /// An optional backend (re-ranker, generator) is not configured or reachable.
    CapabilityUnavailable,
    /// A configured backend failed or answered with garbage.
    Backend,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no textual content extracted from {0} pdf(s); check OCR or permissions")]
    EmptyCorpus(usize),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("document is {size} bytes, the limit is {limit}")]
    DocumentTooLarge { size: usize, limit: usize },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidArgument(_)
            | IngestError::InvalidChunkConfig(_)
            | IngestError::MissingFileName(_)
            | IngestError::DocumentTooLarge { .. } => ErrorKind::Input,
            IngestError::EmptyCorpus(_) | IngestError::PdfParse(_) => ErrorKind::Corpus,
            IngestError::Io(_) | IngestError::Serialization(_) => ErrorKind::Consistency,
            IngestError::Embedding(_) => ErrorKind::Backend,
            IngestError::Regex(_) => ErrorKind::Input,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("index not loaded; call ensure_index() first")]
    NotLoaded,

    #[error("no pdfs found under {0}; populate it before serving")]
    NoDocuments(String),

    #[error("index artifact {artifact} is missing or unreadable: {details}")]
    Bundle { artifact: String, details: String },

    #[error("index was built with embedding model {indexed} but {active} is configured")]
    ModelMismatch { indexed: String, active: String },

    #[error("vector dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    Request(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::NoDocuments(_) | SearchError::Request(_) | SearchError::Url(_) => {
                ErrorKind::Input
            }
            SearchError::NotLoaded
            | SearchError::Bundle { .. }
            | SearchError::ModelMismatch { .. }
            | SearchError::DimensionMismatch { .. } => ErrorKind::Consistency,
            SearchError::CapabilityUnavailable(_) => ErrorKind::CapabilityUnavailable,
            SearchError::BackendResponse { .. }
            | SearchError::Generation(_)
            | SearchError::Http(_)
            | SearchError::Serialization(_) => ErrorKind::Backend,
            SearchError::Ingest(inner) => inner.kind(),
        }
    }

    pub(crate) fn bundle(artifact: &str, details: impl ToString) -> Self {
        SearchError::Bundle {
            artifact: artifact.to_string(),
            details: details.to_string(),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_failures_are_told_apart_from_missing_capabilities() {
        let mismatch = SearchError::ModelMismatch {
            indexed: "a".to_string(),
            active: "b".to_string(),
        };
        assert_eq!(mismatch.kind(), ErrorKind::Consistency);
        assert_eq!(
            SearchError::CapabilityUnavailable("reranker".to_string()).kind(),
            ErrorKind::CapabilityUnavailable
        );
        assert_eq!(
            SearchError::from(IngestError::EmptyCorpus(2)).kind(),
            ErrorKind::Corpus
        );
    }
}
