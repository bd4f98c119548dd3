use crate::error::IngestError;

/// Smallest accepted window. Below this the sentence search window degenerates.
pub const MIN_CHUNK_SIZE: usize = 16;

/// Cut separators in priority order.
const SEPARATORS: [&str; 5] = [". ", "; ", ": ", "\n", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters repeated at the start of the next window.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 900,
            overlap: 150,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Start of the separator search, relative to the window start.
    fn search_floor(&self) -> usize {
        self.chunk_size * 4 / 5
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_size {} is below the minimum of {MIN_CHUNK_SIZE}",
                self.chunk_size
            )));
        }

        // A cut never lands before the search floor, so this keeps every window moving forward.
        if self.overlap > self.search_floor() {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must not exceed 80% of chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }

        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits `text` into overlapping windows that prefer sentence boundaries.
///
/// Whitespace is collapsed first. Each window holds at most `chunk_size`
/// characters, and the cut moves back to just after the last separator found in
/// the final fifth of the window. This applies to the last window too. The next
/// window starts `overlap` characters before the cut.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    let chars: Vec<char> = normalized.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + config.chunk_size).min(total);
        let cut = find_cut(&chars, start + config.search_floor(), end).unwrap_or(end);

        let piece: String = chars[start..cut].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if cut >= total {
            break;
        }
        start = cut.saturating_sub(config.overlap).max(start + 1);
    }

    chunks
}

/// Position right after the last separator lying fully inside `floor..end`,
/// trying separators in priority order.
fn find_cut(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|separator| {
        let pattern: Vec<char> = separator.chars().collect();
        let last_start = end.checked_sub(pattern.len())?;
        (floor..=last_start)
            .rev()
            .find(|&position| chars[position..position + pattern.len()] == pattern[..])
            .map(|position| position + pattern.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(chunk_size, overlap).expect("valid chunking config")
    }

    fn numbered_sentences(count: usize) -> String {
        (0..count)
            .map(|i| format!("Sentence {i} covers  item {}; see table {}.\n", i * 7, i + 3))
            .collect()
    }

    /// Byte spans of each chunk inside the normalized text, in order.
    fn locate(normalized: &str, chunks: &[String]) -> Vec<(usize, usize)> {
        let mut cursor = 0;
        chunks
            .iter()
            .map(|chunk| {
                let found = normalized[cursor..]
                    .find(chunk.as_str())
                    .map(|offset| offset + cursor)
                    .expect("every chunk is a substring of the normalized text");
                cursor = found + 1;
                (found, found + chunk.len())
            })
            .collect()
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", ChunkingConfig::default()).is_empty());
        assert!(chunk_text(" \n\t ", ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("The sky is blue.", config(900, 150));
        assert_eq!(chunks, vec!["The sky is blue.".to_string()]);
    }

    #[test]
    fn cut_prefers_sentence_end_over_plain_space() {
        // window of 20 chars, separators searched from position 16.
        let text = "aaaa bbbb cccc dd. eeee ffff gggg";
        let chunks = chunk_text(text, config(20, 0));
        assert_eq!(chunks[0], "aaaa bbbb cccc dd.");
        assert_eq!(chunks[1], "eeee ffff gggg");
    }

    #[test]
    fn long_tail_window_still_cuts_at_a_separator() {
        let text = format!("{}. {}", "a".repeat(797), "b".repeat(61));
        let chunks = chunk_text(&text, config(900, 150));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}.", "a".repeat(797)));
        assert_eq!(chunks[1], format!("{}. {}", "a".repeat(148), "b".repeat(61)));
    }

    #[test]
    fn falls_back_to_hard_cut_without_separator() {
        let text = "x".repeat(50);
        let chunks = chunk_text(&text, config(20, 4));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 20);
        assert_eq!(chunks[2], "x".repeat(18));
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = numbered_sentences(40);
        let cfg = config(120, 30);
        assert_eq!(chunk_text(&text, cfg), chunk_text(&text, cfg));
    }

    #[test]
    fn consecutive_chunks_overlap_by_at_most_overlap_chars() {
        let text = numbered_sentences(30);
        let cfg = config(100, 25);
        let normalized = normalize_whitespace(&text);
        let chunks = chunk_text(&text, cfg);
        assert!(chunks.len() > 2);

        let spans = locate(&normalized, &chunks);
        for pair in spans.windows(2) {
            let (_, previous_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(previous_end.saturating_sub(next_start) <= cfg.overlap);
        }
        assert_eq!(spans.last().map(|span| span.1), Some(normalized.len()));
    }

    #[test]
    fn chunks_cover_the_normalized_text() {
        let text = numbered_sentences(25);
        let normalized = normalize_whitespace(&text);
        let chunks = chunk_text(&text, config(64, 12));
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));

        let mut covered = vec![false; normalized.len()];
        for (start, end) in locate(&normalized, &chunks) {
            covered[start..end].iter_mut().for_each(|slot| *slot = true);
        }
        assert!(normalized
            .char_indices()
            .all(|(index, ch)| ch == ' ' || covered[index]));
    }

    #[test]
    fn rejects_tiny_windows_and_oversized_overlap() {
        assert!(ChunkingConfig::new(4, 0).is_err());
        assert!(ChunkingConfig::new(100, 81).is_err());
        assert!(ChunkingConfig::new(100, 80).is_ok());
    }
}
