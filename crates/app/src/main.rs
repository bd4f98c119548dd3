mod server;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use pdf_rag_core::{
    import_document, AskOptions, ChunkingConfig, EmbeddingBackend, GenerationBackend, Hit,
    HostedRetriever, HostedRetrieverConfig, HttpReranker, KnowledgeBase, KnowledgeBaseConfig,
    OllamaConfig, OpenAiConfig, RerankerConfig, Retriever, SearchError,
    DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_OLLAMA_GENERATION_MODEL,
};
use server::{AppState, Backend};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version, about = "Cited question answering over a folder of PDFs")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbeddingKind {
    /// Hashed character trigrams, offline.
    CharNgram,
    /// Local Ollama embedding model.
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GenerationKind {
    Local,
    Hosted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RetrievalKind {
    Local,
    Hosted,
}

#[derive(Args, Debug, Clone)]
struct Settings {
    /// Folder holding the PDFs to index.
    #[arg(long, env = "RAG_DOCUMENTS_DIR", default_value = "data/pdfs", global = true)]
    documents_dir: PathBuf,

    /// Folder the index bundle is written to.
    #[arg(long, env = "RAG_INDEX_DIR", default_value = "data/index", global = true)]
    index_dir: PathBuf,

    #[arg(long, env = "RAG_RETRIEVAL_BACKEND", value_enum, default_value_t = RetrievalKind::Local, global = true)]
    retrieval: RetrievalKind,

    #[arg(long, env = "RAG_EMBEDDING_BACKEND", value_enum, default_value_t = EmbeddingKind::CharNgram, global = true)]
    embedding: EmbeddingKind,

    /// Vector size of the character n-gram embedder.
    #[arg(long, env = "RAG_EMBEDDING_DIMENSIONS", default_value = "128", global = true)]
    embedding_dimensions: usize,

    /// Ollama embedding model.
    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = "nomic-embed-text", global = true)]
    embedding_model: String,

    #[arg(long, env = "RAG_CHUNK_SIZE", default_value = "900", global = true)]
    chunk_size: usize,

    #[arg(long, env = "RAG_CHUNK_OVERLAP", default_value = "150", global = true)]
    chunk_overlap: usize,

    #[arg(long, env = "RAG_EMBED_BATCH_SIZE", default_value = "64", global = true)]
    embed_batch_size: usize,

    #[arg(long, env = "RAG_GENERATION_BACKEND", value_enum, default_value_t = GenerationKind::Local, global = true)]
    generation: GenerationKind,

    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434", global = true)]
    ollama_host: String,

    #[arg(long, env = "OLLAMA_MODEL", default_value = DEFAULT_OLLAMA_GENERATION_MODEL, global = true)]
    ollama_model: String,

    /// Timeout for embedding, re-ranking and generation calls.
    #[arg(long, env = "RAG_REQUEST_TIMEOUT_SECS", default_value = "120", global = true)]
    request_timeout_secs: u64,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini", global = true)]
    openai_model: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1", global = true)]
    openai_base_url: String,

    /// Model answering over the hosted vector store.
    #[arg(long, env = "OPENAI_RAG_MODEL", default_value = "gpt-4.1-mini", global = true)]
    openai_rag_model: String,

    #[arg(long, env = "OPENAI_VECTOR_STORE_ID", global = true)]
    vector_store_id: Option<String>,

    /// Store looked up, or created, when no store id is given.
    #[arg(long, env = "OPENAI_VECTOR_STORE_NAME", default_value = "pdf-rag-documents", global = true)]
    vector_store_name: String,

    /// Cross-encoder endpoint serving `POST /rerank`.
    #[arg(long, env = "RAG_RERANKER_URL", global = true)]
    reranker_url: Option<String>,

    #[arg(long, env = "RAG_DEFAULT_TOP_K", default_value = "6", global = true)]
    default_top_k: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Build the index if the documents or settings changed.
    Index {
        /// Rebuild even when the index is current.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the passages closest to a query.
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Answer a question with citations.
    Ask {
        question: String,
        #[arg(short, long)]
        k: Option<usize>,
        /// Re-rank retrieved passages before generation.
        #[arg(long, default_value_t = false)]
        rerank: bool,
        /// Passages kept after re-ranking.
        #[arg(long)]
        final_m: Option<usize>,
        /// Answer language code, detected from the question when absent.
        #[arg(long)]
        lang: Option<String>,
    },
    /// Copy PDFs into the documents folder and refresh the index.
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "RAG_SERVICE_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "RAG_SERVICE_PORT", default_value = "8000")]
        port: u16,
        /// Comma separated CORS origins, `*` or empty for any.
        #[arg(long, env = "RAG_ALLOWED_ORIGINS", value_delimiter = ',')]
        allowed_origins: Vec<String>,
        #[arg(long, env = "RAG_MAX_DOCUMENT_BYTES", default_value_t = DEFAULT_MAX_DOCUMENT_BYTES)]
        max_document_bytes: usize,
        /// Upload missing documents to the hosted vector store on startup.
        #[arg(long, env = "OPENAI_SYNC_DOCUMENTS", default_value_t = true, action = ArgAction::Set)]
        sync_documents: bool,
    },
}

impl Settings {
    fn openai(&self, model: &str) -> OpenAiConfig {
        OpenAiConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            model: model.to_string(),
            base_url: self.openai_base_url.clone(),
            timeout_secs: self.request_timeout_secs,
        }
    }

    fn embedding_backend(&self) -> EmbeddingBackend {
        match self.embedding {
            EmbeddingKind::CharNgram => EmbeddingBackend::CharNgram {
                dimensions: self.embedding_dimensions,
            },
            EmbeddingKind::Ollama => EmbeddingBackend::Ollama(OllamaConfig {
                endpoint: self.ollama_host.clone(),
                model: self.embedding_model.clone(),
                timeout_secs: self.request_timeout_secs,
            }),
        }
    }

    fn generation_backend(&self) -> GenerationBackend {
        match self.generation {
            GenerationKind::Local => GenerationBackend::Local(OllamaConfig {
                endpoint: self.ollama_host.clone(),
                model: self.ollama_model.clone(),
                timeout_secs: self.request_timeout_secs,
            }),
            GenerationKind::Hosted => GenerationBackend::Hosted(self.openai(&self.openai_model)),
        }
    }

    fn knowledge_base(&self) -> anyhow::Result<KnowledgeBase> {
        let config = KnowledgeBaseConfig {
            documents_dir: self.documents_dir.clone(),
            index_dir: self.index_dir.clone(),
            chunking: ChunkingConfig::new(self.chunk_size, self.chunk_overlap)?,
            embed_batch_size: self.embed_batch_size,
        };
        let embedder = self.embedding_backend().into_embedder()?;
        let mut kb = KnowledgeBase::new(config, embedder)?;

        // Missing optional capabilities surface when a request needs them.
        match self.generation_backend().into_generator() {
            Ok(generator) => kb = kb.with_generator(generator),
            Err(error) => warn!(%error, "generation disabled"),
        }
        if let Some(endpoint) = &self.reranker_url {
            let reranker = HttpReranker::new(&RerankerConfig {
                endpoint: endpoint.clone(),
                timeout_secs: self.request_timeout_secs,
            })?;
            kb = kb.with_reranker(Box::new(reranker));
        }

        Ok(kb)
    }

    fn hosted(&self) -> anyhow::Result<HostedRetriever> {
        let config = HostedRetrieverConfig {
            openai: self.openai(&self.openai_rag_model),
            vector_store_id: self.vector_store_id.clone().unwrap_or_default(),
            vector_store_name: self.vector_store_name.clone(),
            model: self.openai_rag_model.clone(),
            default_top_k: self.default_top_k,
            ..HostedRetrieverConfig::default()
        };
        let hosted = HostedRetriever::connect(config)?;
        info!(store = hosted.vector_store_id(), "hosted vector store ready");
        Ok(hosted)
    }

    fn backend(&self) -> anyhow::Result<Backend> {
        Ok(match self.retrieval {
            RetrievalKind::Local => Backend::Local(Arc::new(self.knowledge_base()?)),
            RetrievalKind::Hosted => Backend::Hosted(Arc::new(self.hosted()?)),
        })
    }
}

fn print_hits(hits: &[Hit]) {
    for (rank, hit) in hits.iter().enumerate() {
        let source = hit.preview();
        println!(
            "{}. {} p.{} score={:.3} lang={}",
            rank + 1,
            source.source,
            source.page,
            source.score,
            source.lang
        );
        println!("   {}", source.preview);
    }
}

/// Loads the local index, rebuilding when stale. No-op for hosted retrieval.
fn prepare(backend: &Backend) -> anyhow::Result<()> {
    if let Backend::Local(kb) = backend {
        let status = kb.ensure_index()?;
        info!(?status, chunks = kb.chunk_count(), "index ready");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let settings = cli.settings;
    match cli.command {
        Command::Index { force } => {
            if settings.retrieval == RetrievalKind::Hosted {
                bail!("the hosted backend keeps its own index; nothing to build locally");
            }
            let kb = settings.knowledge_base()?;
            if force {
                let manifest = kb.rebuild()?;
                println!(
                    "{} pdfs indexed into {}",
                    manifest.pdfs.len(),
                    settings.index_dir.display()
                );
            } else {
                let status = kb.ensure_index()?;
                println!(
                    "index {:?}: {} chunks in {}",
                    status,
                    kb.chunk_count().unwrap_or_default(),
                    settings.index_dir.display()
                );
            }
        }
        Command::Search { query, k } => {
            let backend = settings.backend()?;
            prepare(&backend)?;
            let hits = backend
                .retriever()
                .search(&query, k.unwrap_or(settings.default_top_k))?;
            print_hits(&hits);
        }
        Command::Ask {
            question,
            k,
            rerank,
            final_m,
            lang,
        } => {
            let backend = settings.backend()?;
            prepare(&backend)?;
            let k = k.unwrap_or(settings.default_top_k);
            let options = AskOptions {
                k,
                use_rerank: rerank,
                final_m: final_m.unwrap_or(k),
                answer_lang: lang,
            };
            let answer = backend.retriever().ask(&question, &options)?;
            println!("{}\n", answer.text);
            print_hits(&answer.hits);
        }
        Command::Add { files } => {
            let mut added = Vec::new();
            for file in &files {
                let bytes = std::fs::read(file)
                    .with_context(|| format!("cannot read {}", file.display()))?;
                let name = file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or("document.pdf");
                let document =
                    import_document(&settings.documents_dir, name, &bytes, usize::MAX)?;
                println!("added {} ({} bytes)", document.filename, document.size_bytes);
                added.push(document.filename);
            }
            match settings.backend()? {
                Backend::Local(kb) => {
                    let status = kb.ensure_index()?;
                    println!("index {:?}", status);
                }
                Backend::Hosted(hosted) => {
                    for filename in &added {
                        let path = settings.documents_dir.join(filename);
                        if hosted.ingest_document(&path)? {
                            println!("uploaded {filename} to {}", hosted.vector_store_id());
                        } else {
                            println!("{filename} already in {}", hosted.vector_store_id());
                        }
                    }
                }
            }
        }
        Command::Serve {
            host,
            port,
            allowed_origins,
            max_document_bytes,
            sync_documents,
        } => {
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("invalid listen address {host}:{port}"))?;
            let cors = server::cors_layer(&allowed_origins)?;

            // Blocking http clients must be built and dropped outside the runtime.
            let backend = settings.backend()?;
            if let Err(error) = prepare(&backend) {
                let empty = matches!(
                    error.downcast_ref::<SearchError>(),
                    Some(SearchError::NoDocuments(_))
                );
                if !empty {
                    return Err(error);
                }
                warn!(%error, "serving until documents are uploaded");
            }
            if let (Backend::Hosted(hosted), true) = (&backend, sync_documents) {
                let uploaded = hosted.sync_documents(&settings.documents_dir)?;
                info!(uploaded, "documents synced to the hosted vector store");
            }

            let state = AppState {
                backend: backend.clone(),
                documents_dir: settings.documents_dir.clone(),
                default_top_k: settings.default_top_k,
                max_document_bytes,
            };

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let served = runtime.block_on(server::serve(state, addr, cors));
            drop(runtime);
            drop(backend);
            served?;
        }
    }

    Ok(())
}
