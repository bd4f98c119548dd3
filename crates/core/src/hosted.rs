//! Hosted retrieval through the OpenAI Responses API and a managed vector store.
//!
//! Responses are decoded into a strict schema. Output items, content parts and
//! annotations are closed enums, so a shape this module does not know about is
//! a decode error instead of a silently empty answer.
//!
//! Documents reach the store through the files API: upload, attach to the
//! vector store, then wait for processing to settle.

use crate::documents::{list_documents, DocumentSummary};
use crate::error::{IngestError, SearchError};
use crate::generation::OpenAiConfig;
use crate::http::{endpoint_url, transport_error};
use crate::models::{Answer, AskOptions, Hit, UNKNOWN_LANGUAGE};
use crate::traits::Retriever;
use parking_lot::Mutex;
use reqwest::blocking::{multipart, Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::thread;
use std::time::Duration;
use url::Url;

/// Responses API revision the schema below was written against.
pub const RESPONSES_SCHEMA_VERSION: &str = "2025-03";

const BASE_SYSTEM_PROMPT: &str = "You are a document-grounded knowledge assistant. \
Use the provided documents to craft concise, helpful answers. \
Always cite sources inline using square brackets with the document name and page number when available.";

#[derive(Debug, Clone)]
pub struct HostedRetrieverConfig {
    pub openai: OpenAiConfig,
    /// Store to search. When empty, [`HostedRetriever::connect`] looks the
    /// store up by `vector_store_name` and creates it if missing.
    pub vector_store_id: String,
    pub vector_store_name: String,
    pub model: String,
    pub default_top_k: usize,
    pub max_output_tokens: u32,
}

impl Default for HostedRetrieverConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            vector_store_id: String::new(),
            vector_store_name: "pdf-rag-documents".to_string(),
            model: "gpt-4.1-mini".to_string(),
            default_top_k: 6,
            max_output_tokens: 800,
        }
    }
}

pub fn system_prompt(answer_lang: Option<&str>) -> String {
    match answer_lang.map(str::trim).filter(|lang| !lang.is_empty()) {
        Some(lang) => format!("{BASE_SYSTEM_PROMPT} Respond in {lang}."),
        None => BASE_SYSTEM_PROMPT.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
    tools: Vec<FileSearchTool<'a>>,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: Vec<InputText>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "input_text")]
struct InputText {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "file_search")]
struct FileSearchTool<'a> {
    vector_store_ids: Vec<&'a str>,
    max_num_results: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesResponse {
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        content: Vec<MessageContent>,
    },
    FileSearchCall {
        #[serde(default)]
        id: Option<String>,
    },
    Reasoning {
        #[serde(default)]
        id: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    Refusal {
        refusal: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    FileCitation(FileCitation),
    UrlCitation {
        url: String,
    },
    FilePath {
        file_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileCitation {
    pub file_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub index: Option<usize>,
}

impl ResponsesResponse {
    pub fn parse(body: &str) -> Result<Self, SearchError> {
        serde_json::from_str(body).map_err(|error| SearchError::BackendResponse {
            backend: "openai".to_string(),
            details: format!("unexpected responses payload (schema {RESPONSES_SCHEMA_VERSION}): {error}"),
        })
    }

    fn output_texts(&self) -> impl Iterator<Item = (&str, &[Annotation])> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { content } => Some(content),
                _ => None,
            })
            .flatten()
            .filter_map(|content| match content {
                MessageContent::OutputText { text, annotations } => {
                    Some((text.as_str(), annotations.as_slice()))
                }
                MessageContent::Refusal { .. } => None,
            })
    }

    /// Concatenated output text. A refusal with no text is an error.
    pub fn answer_text(&self) -> Result<String, SearchError> {
        let text: String = self.output_texts().map(|(text, _)| text).collect();
        if text.trim().is_empty() {
            let refusal = self.output.iter().find_map(|item| match item {
                OutputItem::Message { content } => content.iter().find_map(|part| match part {
                    MessageContent::Refusal { refusal } => Some(refusal.clone()),
                    _ => None,
                }),
                _ => None,
            });
            if let Some(refusal) = refusal {
                return Err(SearchError::Generation(format!("model refused: {refusal}")));
            }
        }
        Ok(text.trim().to_string())
    }

    /// File citations as hits, first occurrence wins per `(file_id, page, quote)`.
    /// Citations without a filename go through `resolve_filename`.
    pub fn hits<F>(&self, mut resolve_filename: F) -> Vec<Hit>
    where
        F: FnMut(&str) -> String,
    {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();

        for (_, annotations) in self.output_texts() {
            for annotation in annotations {
                let Annotation::FileCitation(citation) = annotation else {
                    continue;
                };
                let key = (
                    citation.file_id.clone(),
                    citation.page,
                    citation.quote.clone(),
                );
                if !seen.insert(key) {
                    continue;
                }

                let source = match &citation.filename {
                    Some(filename) if !filename.is_empty() => filename.clone(),
                    _ => resolve_filename(&citation.file_id),
                };

                hits.push(Hit {
                    score: citation.score.unwrap_or(0.0),
                    text: citation.quote.clone().unwrap_or_default(),
                    source,
                    page: citation.page.unwrap_or(0),
                    lang: UNKNOWN_LANGUAGE.to_string(),
                    file_id: Some(citation.file_id.clone()),
                });
            }
        }

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits
    }
}

/// One page of a cursor-paginated list endpoint.
#[derive(Debug, Deserialize)]
struct ListPage<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct VectorStoreObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VectorStoreFile {
    id: String,
    status: FileStatus,
    #[serde(default)]
    last_error: Option<FileError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FileStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Deserialize)]
struct FileError {
    message: String,
}

#[derive(Serialize)]
struct CreateVectorStore<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct AttachFile<'a> {
    file_id: &'a str,
}

const LIST_PAGE_SIZE: &str = "100";
const PROCESSING_POLL_INTERVAL: Duration = Duration::from_secs(1);
const PROCESSING_POLL_ATTEMPTS: usize = 120;

/// Documents worth uploading: non-empty and not already in the store by name.
fn pending_uploads(
    documents: Vec<DocumentSummary>,
    existing: &HashSet<String>,
) -> Vec<DocumentSummary> {
    documents
        .into_iter()
        .filter(|document| document.size_bytes > 0 && !existing.contains(&document.filename))
        .collect()
}

/// [`Retriever`] backed by a hosted vector store.
pub struct HostedRetriever {
    client: Client,
    responses_url: Url,
    base_url: String,
    api_key: String,
    config: HostedRetrieverConfig,
    file_names: Mutex<HashMap<String, String>>,
}

impl HostedRetriever {
    /// Retriever over the configured store id, without touching the network.
    pub fn new(config: HostedRetrieverConfig) -> Result<Self, SearchError> {
        if config.vector_store_id.trim().is_empty() {
            return Err(SearchError::CapabilityUnavailable(
                "hosted retrieval needs a vector store id".to_string(),
            ));
        }
        Self::build(config)
    }

    /// Like [`HostedRetriever::new`], but resolves a missing store id by name,
    /// creating the store when none carries that name.
    pub fn connect(config: HostedRetrieverConfig) -> Result<Self, SearchError> {
        if !config.vector_store_id.trim().is_empty() {
            return Self::new(config);
        }
        if config.vector_store_name.trim().is_empty() {
            return Err(SearchError::CapabilityUnavailable(
                "hosted retrieval needs a vector store id or name".to_string(),
            ));
        }

        let mut retriever = Self::build(config)?;
        retriever.config.vector_store_id = retriever.ensure_vector_store()?;
        Ok(retriever)
    }

    fn build(config: HostedRetrieverConfig) -> Result<Self, SearchError> {
        Ok(Self {
            client: config.openai.client()?,
            responses_url: endpoint_url(&config.openai.base_url, "responses")?,
            base_url: config.openai.base_url.clone(),
            api_key: config.openai.api_key.clone(),
            file_names: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &HostedRetrieverConfig {
        &self.config
    }

    pub fn vector_store_id(&self) -> &str {
        &self.config.vector_store_id
    }

    /// Uploads `path` into the vector store unless a file with the same name
    /// is already there. Returns whether an upload happened.
    pub fn ingest_document(&self, path: &Path) -> Result<bool, SearchError> {
        if !path.is_file() {
            return Err(IngestError::InvalidArgument(format!(
                "document {} does not exist",
                path.display()
            ))
            .into());
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

        if self.existing_file_names()?.contains(name) {
            tracing::info!(
                file = name,
                store = %self.config.vector_store_id,
                "document already in vector store, skipping upload"
            );
            return Ok(false);
        }

        self.upload(path)?;
        Ok(true)
    }

    /// Uploads every PDF under `dir` the store does not hold yet. Failures are
    /// logged per file. Returns the number of documents uploaded.
    pub fn sync_documents(&self, dir: &Path) -> Result<usize, SearchError> {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "documents directory missing, skipping vector store sync");
            return Ok(0);
        }

        let existing = self.existing_file_names()?;
        let pending = pending_uploads(list_documents(dir)?, &existing);
        if pending.is_empty() {
            tracing::info!(store = %self.config.vector_store_id, "vector store already holds every document");
            return Ok(0);
        }

        tracing::info!(
            count = pending.len(),
            store = %self.config.vector_store_id,
            "uploading documents to vector store"
        );
        let mut uploaded = 0;
        for document in pending {
            match self.upload(&dir.join(&document.filename)) {
                Ok(()) => uploaded += 1,
                Err(error) => {
                    tracing::warn!(file = %document.filename, %error, "document upload failed")
                }
            }
        }
        Ok(uploaded)
    }

    fn upload(&self, path: &Path) -> Result<(), SearchError> {
        let form = multipart::Form::new()
            .text("purpose", "assistants")
            .file("file", path)
            .map_err(IngestError::from)?;
        let response = self
            .client
            .post(endpoint_url(&self.base_url, "files")?)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|error| transport_error("openai", error))?;
        let file: FileObject = checked(response, "file upload")?.json()?;
        self.file_names
            .lock()
            .insert(file.id.clone(), file.filename.clone());

        let store_path = format!("vector_stores/{}/files", self.config.vector_store_id);
        let attached: VectorStoreFile =
            self.post_json(&store_path, &AttachFile { file_id: &file.id }, "vector store attach")?;
        self.wait_for_processing(attached)?;

        tracing::info!(file = %file.filename, file_id = %file.id, "uploaded to vector store");
        Ok(())
    }

    fn wait_for_processing(&self, mut file: VectorStoreFile) -> Result<(), SearchError> {
        let path = format!("vector_stores/{}/files/{}", self.config.vector_store_id, file.id);
        for _ in 0..PROCESSING_POLL_ATTEMPTS {
            match file.status {
                FileStatus::Completed => return Ok(()),
                FileStatus::Failed | FileStatus::Cancelled => {
                    let reason = file
                        .last_error
                        .map(|error| error.message)
                        .unwrap_or_else(|| format!("{:?}", file.status));
                    return Err(SearchError::BackendResponse {
                        backend: "openai".to_string(),
                        details: format!("vector store rejected {}: {reason}", file.id),
                    });
                }
                FileStatus::InProgress => {
                    thread::sleep(PROCESSING_POLL_INTERVAL);
                    file = self.get_json(endpoint_url(&self.base_url, &path)?, "vector store file")?;
                }
            }
        }

        tracing::warn!(file_id = %file.id, "vector store still processing, not waiting any longer");
        Ok(())
    }

    /// File names attached to the store. Files whose name cannot be looked up
    /// appear under their id.
    fn existing_file_names(&self) -> Result<HashSet<String>, SearchError> {
        let path = format!("vector_stores/{}/files", self.config.vector_store_id);
        let files: Vec<VectorStoreFile> = self.list(&path)?;
        Ok(files.iter().map(|file| self.file_name(&file.id)).collect())
    }

    fn ensure_vector_store(&self) -> Result<String, SearchError> {
        let name = self.config.vector_store_name.as_str();
        let stores: Vec<VectorStoreObject> = self.list("vector_stores")?;
        if let Some(store) = stores
            .into_iter()
            .find(|store| store.name.as_deref() == Some(name))
        {
            tracing::info!(name, id = %store.id, "using existing vector store");
            return Ok(store.id);
        }

        let store: VectorStoreObject =
            self.post_json("vector_stores", &CreateVectorStore { name }, "vector store create")?;
        tracing::info!(name, id = %store.id, "created vector store");
        Ok(store.id)
    }

    /// Every item of a cursor-paginated list endpoint.
    fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, SearchError> {
        let mut items = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut url = endpoint_url(&self.base_url, path)?;
            url.query_pairs_mut().append_pair("limit", LIST_PAGE_SIZE);
            if let Some(cursor) = &after {
                url.query_pairs_mut().append_pair("after", cursor);
            }

            let page: ListPage<T> = self.get_json(url, path)?;
            items.extend(page.data);
            match page.last_id {
                Some(last_id) if page.has_more => after = Some(last_id),
                _ => return Ok(items),
            }
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, SearchError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|error| transport_error("openai", error))?;
        Ok(checked(response, what)?.json()?)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T, SearchError> {
        let response = self
            .client
            .post(endpoint_url(&self.base_url, path)?)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|error| transport_error("openai", error))?;
        Ok(checked(response, what)?.json()?)
    }

    fn top_k(&self, k: usize) -> usize {
        if k == 0 {
            self.config.default_top_k
        } else {
            k
        }
    }

    fn request<'a>(
        &'a self,
        question: &str,
        top_k: usize,
        answer_lang: Option<&str>,
    ) -> ResponsesRequest<'a> {
        ResponsesRequest {
            model: &self.config.model,
            input: vec![
                InputMessage {
                    role: "system",
                    content: vec![InputText {
                        text: system_prompt(answer_lang),
                    }],
                },
                InputMessage {
                    role: "user",
                    content: vec![InputText {
                        text: question.to_string(),
                    }],
                },
            ],
            tools: vec![FileSearchTool {
                vector_store_ids: vec![&self.config.vector_store_id],
                max_num_results: top_k,
            }],
            max_output_tokens: self.config.max_output_tokens,
        }
    }

    fn respond(
        &self,
        question: &str,
        top_k: usize,
        answer_lang: Option<&str>,
    ) -> Result<ResponsesResponse, SearchError> {
        let response = self
            .client
            .post(self.responses_url.clone())
            .bearer_auth(&self.api_key)
            .json(&self.request(question, top_k, answer_lang))
            .send()
            .map_err(|error| transport_error("openai", error))?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(SearchError::BackendResponse {
                backend: "openai".to_string(),
                details: format!("responses request returned {status}"),
            });
        }

        ResponsesResponse::parse(&body)
    }

    /// File name for `file_id`, cached. Falls back to the id itself.
    fn file_name(&self, file_id: &str) -> String {
        if let Some(name) = self.file_names.lock().get(file_id) {
            return name.clone();
        }

        match self.fetch_file_name(file_id) {
            Ok(name) => {
                self.file_names
                    .lock()
                    .insert(file_id.to_string(), name.clone());
                name
            }
            Err(error) => {
                tracing::warn!(file_id, %error, "file name lookup failed");
                file_id.to_string()
            }
        }
    }

    fn fetch_file_name(&self, file_id: &str) -> Result<String, SearchError> {
        let url = endpoint_url(&self.base_url, &format!("files/{file_id}"))?;
        let file: FileObject = self.get_json(url, "file lookup")?;
        Ok(file.filename)
    }
}

fn checked(response: Response, what: &str) -> Result<Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(SearchError::BackendResponse {
        backend: "openai".to_string(),
        details: format!("{what} returned {status}"),
    })
}

impl Retriever for HostedRetriever {
    fn ask(&self, question: &str, options: &AskOptions) -> Result<Answer, SearchError> {
        let top_k = self.top_k(options.k);
        let response = self.respond(question, top_k, options.answer_lang.as_deref())?;

        let text = response.answer_text()?;
        let mut hits = response.hits(|file_id| self.file_name(file_id));
        hits.truncate(top_k);
        tracing::debug!(hits = hits.len(), "hosted answer received");

        Ok(Answer { text, hits })
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<Hit>, SearchError> {
        let top_k = self.top_k(k);
        let mut hits = self.respond(query, top_k, None)?.hits(|file_id| self.file_name(file_id));
        hits.truncate(top_k);
        Ok(hits)
    }
}
