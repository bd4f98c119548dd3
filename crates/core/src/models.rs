use serde::{Deserialize, Serialize};

/// Language tag for chunks whose language could not be detected reliably.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Characters of hit text kept in a [`SourcePreview`].
pub const PREVIEW_CHARS: usize = 220;

/// One citable span of a page. Serialized as one line of the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub text: String,
    /// File name of the originating pdf, not the full path.
    pub source: String,
    /// 1-based page number.
    pub page: u32,
    #[serde(default = "unknown_language")]
    pub lang: String,
}

fn unknown_language() -> String {
    UNKNOWN_LANGUAGE.to_string()
}

/// A scored retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    pub score: f32,
    pub text: String,
    pub source: String,
    pub page: u32,
    pub lang: String,
    /// Backend specific identifier, e.g. the hosted file id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl Hit {
    pub fn from_chunk(chunk: &DocumentChunk, score: f32) -> Self {
        Self {
            score,
            text: chunk.text.clone(),
            source: chunk.source.clone(),
            page: chunk.page,
            lang: chunk.lang.clone(),
            file_id: None,
        }
    }

    pub fn preview(&self) -> SourcePreview {
        let preview = self
            .text
            .chars()
            .take(PREVIEW_CHARS)
            .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
            .collect();

        SourcePreview {
            source: self.source.clone(),
            page: self.page,
            score: self.score,
            lang: self.lang.clone(),
            preview,
        }
    }
}

/// Serializable view of a hit returned by the service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourcePreview {
    pub source: String,
    pub page: u32,
    pub score: f32,
    pub lang: String,
    pub preview: String,
}

/// Parameters of a grounded answer request.
#[derive(Debug, Clone, PartialEq)]
pub struct AskOptions {
    pub k: usize,
    pub use_rerank: bool,
    pub final_m: usize,
    pub answer_lang: Option<String>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            k: 6,
            use_rerank: false,
            final_m: 6,
            answer_lang: None,
        }
    }
}

/// Generated answer plus the exact hits that were placed in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub hits: Vec<Hit>,
}
