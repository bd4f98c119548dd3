use crate::error::SearchError;
use crate::http::{endpoint_url, transport_error};
use crate::models::Hit;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Second-stage relevance scorer over `(query, passage)` pairs.
pub trait Reranker: Send + Sync {
    /// One score per pair, higher is more relevant.
    fn score(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, SearchError>;
}

/// Rescores `hits`, sorts them by the new score (stable on ties) and keeps `top_m`.
/// The returned hits carry the re-ranker's score.
pub fn rerank_hits<R>(
    reranker: &R,
    query: &str,
    hits: Vec<Hit>,
    top_m: usize,
) -> Result<Vec<Hit>, SearchError>
where
    R: Reranker + ?Sized,
{
    if hits.is_empty() {
        return Ok(hits);
    }

    let pairs: Vec<(&str, &str)> = hits.iter().map(|hit| (query, hit.text.as_str())).collect();
    let scores = reranker.score(&pairs)?;
    if scores.len() != hits.len() {
        return Err(SearchError::BackendResponse {
            backend: "reranker".to_string(),
            details: format!("{} scores for {} passages", scores.len(), hits.len()),
        });
    }

    let mut rescored: Vec<Hit> = hits
        .into_iter()
        .zip(scores)
        .map(|(hit, score)| Hit { score, ..hit })
        .collect();
    rescored.sort_by(|left, right| right.score.total_cmp(&left.score));
    rescored.truncate(top_m);
    Ok(rescored)
}

#[derive(Debug, Clone)]
pub struct RerankerConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8082".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
    raw_scores: bool,
}

#[derive(Deserialize)]
struct RankedText {
    index: usize,
    score: f32,
}

/// Cross-encoder served behind a `POST /rerank {query, texts}` endpoint.
pub struct HttpReranker {
    client: Client,
    url: Url,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self, SearchError> {
        let url = endpoint_url(&config.endpoint, "rerank")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, url })
    }

    fn score_group(&self, query: &str, passages: Vec<&str>) -> Result<Vec<f32>, SearchError> {
        let expected = passages.len();
        let response = self
            .client
            .post(self.url.clone())
            .json(&RerankRequest {
                query,
                texts: passages,
                raw_scores: false,
            })
            .send()
            .map_err(|error| transport_error("reranker", error))?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "reranker".to_string(),
                details: response.status().to_string(),
            });
        }

        let ranked: Vec<RankedText> = response.json()?;
        let mut scores = vec![None; expected];
        for item in ranked {
            let slot = scores.get_mut(item.index).ok_or_else(|| SearchError::BackendResponse {
                backend: "reranker".to_string(),
                details: format!("index {} out of range", item.index),
            })?;
            *slot = Some(item.score);
        }

        scores
            .into_iter()
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| SearchError::BackendResponse {
                backend: "reranker".to_string(),
                details: "missing scores for some passages".to_string(),
            })
    }
}

impl Reranker for HttpReranker {
    fn score(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, SearchError> {
        let mut scores = Vec::with_capacity(pairs.len());
        let mut start = 0;

        // One request per run of pairs sharing a query.
        while start < pairs.len() {
            let query = pairs[start].0;
            let end = pairs[start..]
                .iter()
                .position(|pair| pair.0 != query)
                .map_or(pairs.len(), |offset| start + offset);
            let passages = pairs[start..end].iter().map(|pair| pair.1).collect();
            scores.extend(self.score_group(query, passages)?);
            start = end;
        }

        Ok(scores)
    }
}
