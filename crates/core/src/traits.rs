use crate::error::SearchError;
use crate::models::{Answer, AskOptions, Hit};

/// A question-answering backend the service can route requests to.
///
/// The local knowledge base and the hosted retriever both implement it, so the
/// request handlers never care which one is active.
pub trait Retriever: Send + Sync {
    /// Retrieves, optionally re-ranks, and generates a grounded answer.
    fn ask(&self, question: &str, options: &AskOptions) -> Result<Answer, SearchError>;

    /// Retrieval only, at most `k` hits best first.
    fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>, SearchError>;
}
