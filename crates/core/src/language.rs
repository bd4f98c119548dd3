use crate::models::UNKNOWN_LANGUAGE;

/// Answer language used when the question's language cannot be detected.
pub const FALLBACK_LANGUAGE: &str = "en";

/// ISO 639-1 code of `text`, or `None` when detection is unreliable.
pub fn detect_language(text: &str) -> Option<String> {
    let info = whatlang::detect(text)?;
    if !info.is_reliable() {
        return None;
    }

    let code = info.lang().code();
    let short = isolang::Language::from_639_3(code).and_then(|language| language.to_639_1());
    Some(short.unwrap_or(code).to_string())
}

/// Language tag stored on a chunk.
pub fn chunk_language(text: &str) -> String {
    detect_language(text).unwrap_or_else(|| {
        tracing::debug!(chars = text.len(), "language detection failed");
        UNKNOWN_LANGUAGE.to_string()
    })
}
