mod common;

use common::write_pdf;
use parking_lot::Mutex;
use pdf_rag_core::{
    extract_pdf_chunks, AskOptions, Bundle, CharacterNgramEmbedder, ChunkingConfig, Generator,
    IndexBuilder, IndexStatus, KnowledgeBase, KnowledgeBaseConfig, LoadedIndex, PdfFingerprint,
    Reranker, Retriever, SearchError,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Remembers every prompt and answers with a fixed text.
#[derive(Clone, Default)]
struct RecordingGenerator {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Generator for RecordingGenerator {
    fn generate(&self, prompt: &str) -> Result<String, SearchError> {
        self.prompts.lock().push(prompt.to_string());
        Ok("  The sky is blue (a.pdf p.1).\n".to_string())
    }
}

/// Scores passages by their position, reversing the candidate order.
struct PositionScorer;

impl Reranker for PositionScorer {
    fn score(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, SearchError> {
        Ok((0..pairs.len()).map(|i| i as f32).collect())
    }
}

fn corpus(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let docs = root.join("docs");
    fs::create_dir_all(&docs)?;
    write_pdf(&docs.join("a.pdf"), &["The sky is blue."])?;
    write_pdf(&docs.join("b.pdf"), &["Grass is green."])?;
    Ok(())
}

fn config(root: &Path) -> KnowledgeBaseConfig {
    KnowledgeBaseConfig {
        documents_dir: root.join("docs"),
        index_dir: root.join("index"),
        chunking: ChunkingConfig::default(),
        embed_batch_size: 8,
    }
}

fn knowledge_base(root: &Path) -> Result<KnowledgeBase, Box<dyn std::error::Error>> {
    Ok(KnowledgeBase::new(
        config(root),
        Arc::new(CharacterNgramEmbedder::default()),
    )?)
}

#[test]
fn sky_question_finds_the_sky_pdf() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let kb = knowledge_base(root.path())?;

    assert_eq!(kb.ensure_index()?, IndexStatus::Rebuilt);
    let hits = kb.search("what color is the sky", 1)?;

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "a.pdf");
    assert_eq!(hits[0].page, 1);
    assert!(hits[0].text.contains("The sky is blue."));
    Ok(())
}

#[test]
fn pages_keep_their_numbers() -> TestResult {
    let root = tempfile::tempdir()?;
    let path = root.path().join("manual.pdf");
    write_pdf(&path, &["Intro page.", "Pump pressure limits.", "Valve schedule."])?;

    let chunks = extract_pdf_chunks(&path, ChunkingConfig::default())?;
    let pages: Vec<_> = chunks.iter().map(|chunk| chunk.page).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert!(chunks.iter().all(|chunk| chunk.source == "manual.pdf"));
    assert!(chunks[1].text.contains("Pump pressure limits."));
    Ok(())
}

#[test]
fn untouched_corpus_is_built_once() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let kb = knowledge_base(root.path())?;

    assert_eq!(kb.ensure_index()?, IndexStatus::Rebuilt);
    assert_eq!(kb.ensure_index()?, IndexStatus::AlreadyLoaded);

    // A fresh process over the same directories loads without rebuilding.
    let restarted = knowledge_base(root.path())?;
    assert!(!restarted.needs_rebuild(&restarted.discover_pdfs()?));
    assert_eq!(restarted.ensure_index()?, IndexStatus::Loaded);
    Ok(())
}

#[test]
fn edited_pdf_triggers_a_rebuild_with_its_new_fingerprint() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let kb = knowledge_base(root.path())?;
    kb.ensure_index()?;

    let edited = root.path().join("docs").join("a.pdf");
    write_pdf(&edited, &["The sky is a deep and cloudless blue today."])?;
    let pdfs = kb.discover_pdfs()?;
    assert!(kb.needs_rebuild(&pdfs));

    assert_eq!(kb.ensure_index()?, IndexStatus::Rebuilt);
    let current = PdfFingerprint::of(&edited)?;
    let manifest = kb.manifest().ok_or("index should be loaded")?;
    assert_eq!(manifest.fingerprint(&current.path), Some(&current));
    assert_eq!(current.size, fs::metadata(&edited)?.len());

    let hits = kb.search("cloudless", 1)?;
    assert!(hits[0].text.contains("cloudless"));
    Ok(())
}

#[test]
fn removed_pdf_is_stale() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let kb = knowledge_base(root.path())?;
    kb.ensure_index()?;

    fs::remove_file(root.path().join("docs").join("b.pdf"))?;
    assert!(kb.needs_rebuild(&kb.discover_pdfs()?));
    assert_eq!(kb.ensure_index()?, IndexStatus::Rebuilt);
    assert_eq!(kb.manifest().map(|manifest| manifest.pdfs.len()), Some(1));
    Ok(())
}

#[test]
fn loaded_bundle_matches_what_was_built() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let docs = root.path().join("docs");
    let pdfs = vec![docs.join("a.pdf"), docs.join("b.pdf")];
    let out = root.path().join("index");

    let embedder = Arc::new(CharacterNgramEmbedder::default());
    let builder = IndexBuilder::new(embedder.clone(), ChunkingConfig::default())?;
    let manifest = builder.build(&pdfs, &out)?;

    let loaded = LoadedIndex::load(&out, embedder)?;
    assert_eq!(loaded.manifest(), &manifest);
    assert_eq!(loaded.config(), &builder.config());

    let mut expected = extract_pdf_chunks(&pdfs[0], ChunkingConfig::default())?;
    expected.extend(extract_pdf_chunks(&pdfs[1], ChunkingConfig::default())?);
    assert_eq!(loaded.metadata(), expected.as_slice());

    let bundle = Bundle::read(&out)?;
    assert_eq!(bundle.manifest, manifest);
    assert_eq!(bundle.index.len(), expected.len());
    Ok(())
}

#[test]
fn bundle_from_another_model_is_refused() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    knowledge_base(root.path())?.ensure_index()?;

    let other = KnowledgeBase::new(config(root.path()), Arc::new(CharacterNgramEmbedder::new(64)))?;
    assert!(matches!(
        other.open_index(),
        Err(SearchError::ModelMismatch { .. })
    ));

    // Staleness catches the drift and rebuilds for the new model.
    assert_eq!(other.ensure_index()?, IndexStatus::Rebuilt);
    Ok(())
}

#[test]
fn search_results_are_bounded_and_ordered() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let kb = knowledge_base(root.path())?;
    kb.ensure_index()?;

    for k in 1..=4 {
        let hits = kb.search("green grass and blue sky", k)?;
        assert!(hits.len() <= k);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }
    assert_eq!(kb.search("sky", 10)?.len(), 2);
    Ok(())
}

#[test]
fn answer_cites_exactly_the_prompted_hits() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let generator = RecordingGenerator::default();
    let kb = knowledge_base(root.path())?.with_generator(Box::new(generator.clone()));
    kb.ensure_index()?;

    let options = AskOptions {
        k: 2,
        answer_lang: Some("en".to_string()),
        ..AskOptions::default()
    };
    let answer = kb.ask("What color is the sky?", &options)?;

    assert_eq!(answer.text, "The sky is blue (a.pdf p.1).");
    assert_eq!(answer.hits.len(), 2);

    let prompts = generator.prompts.lock();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    for hit in &answer.hits {
        assert!(prompt.contains(&format!("[{} p.{}]\n{}", hit.source, hit.page, hit.text)));
    }
    assert!(prompt.contains("Answer language: en."));
    Ok(())
}

#[test]
fn reranked_answer_keeps_final_m_hits() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let generator = RecordingGenerator::default();
    let kb = knowledge_base(root.path())?
        .with_generator(Box::new(generator.clone()))
        .with_reranker(Box::new(PositionScorer));
    kb.ensure_index()?;

    let retrieved = kb.search("what color is the sky", 2)?;
    let options = AskOptions {
        k: 2,
        use_rerank: true,
        final_m: 1,
        answer_lang: None,
    };
    let answer = kb.answer("what color is the sky", &options)?;

    assert_eq!(answer.hits.len(), 1);
    assert_eq!(answer.hits[0].source, retrieved[1].source);
    let prompts = generator.prompts.lock();
    assert!(!prompts[0].contains(&format!("[{} p.", retrieved[0].source)));
    Ok(())
}

#[test]
fn answer_without_generator_is_unavailable() -> TestResult {
    let root = tempfile::tempdir()?;
    corpus(root.path())?;
    let kb = knowledge_base(root.path())?;
    kb.ensure_index()?;

    let result = kb.answer("what color is the sky", &AskOptions::default());
    assert!(matches!(result, Err(SearchError::CapabilityUnavailable(_))));
    Ok(())
}
