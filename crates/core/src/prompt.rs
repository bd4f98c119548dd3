use crate::language::{detect_language, FALLBACK_LANGUAGE};
use crate::models::Hit;

/// Explicit language if given, else the question's language, else the fallback.
pub fn answer_language(question: &str, answer_lang: Option<&str>) -> String {
    answer_lang
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_string)
        .or_else(|| detect_language(question))
        .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string())
}

/// `[source p.page]` blocks in hit order, separated by blank lines.
pub fn render_context(hits: &[Hit]) -> String {
    hits.iter()
        .map(|hit| format!("[{} p.{}]\n{}", hit.source, hit.page, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(question: &str, hits: &[Hit], answer_lang: Option<&str>) -> String {
    let target_lang = answer_language(question, answer_lang);
    let context = render_context(hits);

    format!(
        "Use only the provided context to answer. \
         If the answer is not present, state that it does not appear in the documents.\n\
         Cite sources in the format (file p.X). \
         Be concise and respond in the indicated language.\n\
         Answer language: {target_lang}.\n\
         \n\
         Question: {question}\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Answer:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(source: &str, page: u32, text: &str) -> Hit {
        Hit {
            score: 0.0,
            text: text.to_string(),
            source: source.to_string(),
            page,
            lang: "en".to_string(),
            file_id: None,
        }
    }

    #[test]
    fn context_blocks_follow_hit_order() {
        let hits = vec![hit("b.pdf", 4, "Second best"), hit("a.pdf", 1, "Best")];
        assert_eq!(render_context(&hits), "[b.pdf p.4]\nSecond best\n\n[a.pdf p.1]\nBest");
    }

    #[test]
    fn explicit_language_wins() {
        let prompt = build_prompt("What color is the sky?", &[], Some("it"));
        assert!(prompt.contains("Answer language: it."));
    }

    #[test]
    fn undetectable_question_falls_back() {
        assert_eq!(answer_language("42?", None), FALLBACK_LANGUAGE);
        assert_eq!(answer_language("42?", Some("  ")), FALLBACK_LANGUAGE);
    }

    #[test]
    fn prompt_carries_instructions_question_and_context() {
        let prompt = build_prompt(
            "Which pressure is safe for the pump?",
            &[hit("manual.pdf", 7, "Keep pressure under 3 bar.")],
            Some("en"),
        );

        assert!(prompt.starts_with("Use only the provided context to answer."));
        assert!(prompt.contains("(file p.X)"));
        assert!(prompt.contains("Question: Which pressure is safe for the pump?"));
        assert!(prompt.contains("[manual.pdf p.7]\nKeep pressure under 3 bar."));
        assert!(prompt.ends_with("Answer:"));
    }
}
