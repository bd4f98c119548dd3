use crate::chunking::{chunk_text, ChunkingConfig};
use crate::error::IngestError;
use crate::language::chunk_language;
use crate::models::DocumentChunk;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    /// Text of every page that yielded any. Unreadable pages are left out.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                    number: page_no,
                    text,
                }),
                Ok(_) => {
                    tracing::debug!(path = %path.display(), page = page_no, "blank page skipped");
                }
                Err(error) => {
                    tracing::debug!(
                        path = %path.display(),
                        page = page_no,
                        %error,
                        "page text extraction failed, skipping"
                    );
                }
            }
        }

        Ok(pages)
    }
}

/// File name used as the citation identity of a pdf.
pub fn source_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// Chunks each page on its own so no chunk spans a page boundary.
pub fn chunk_pages(source: &str, pages: &[PageText], config: ChunkingConfig) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();

    for page in pages {
        for text in chunk_text(&page.text, config) {
            let lang = chunk_language(&text);
            chunks.push(DocumentChunk {
                text,
                source: source.to_string(),
                page: page.number,
                lang,
            });
        }
    }

    chunks
}

pub fn extract_chunks<E>(
    extractor: &E,
    path: &Path,
    config: ChunkingConfig,
) -> Result<Vec<DocumentChunk>, IngestError>
where
    E: PdfExtractor + ?Sized,
{
    let source = source_name(path)?;
    let mut pages = extractor.extract_pages(path)?;
    pages.sort_by_key(|page| page.number);
    Ok(chunk_pages(&source, &pages, config))
}

pub fn extract_pdf_chunks(
    path: &Path,
    config: ChunkingConfig,
) -> Result<Vec<DocumentChunk>, IngestError> {
    extract_chunks(&LopdfExtractor, path, config)
}
