use crate::error::SearchError;
use url::Url;

/// Joins `path` under `endpoint`, keeping any path prefix the endpoint carries.
pub(crate) fn endpoint_url(endpoint: &str, path: &str) -> Result<Url, SearchError> {
    let base = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))?;
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Connection failures mean the backend is not there at all.
pub(crate) fn transport_error(backend: &str, error: reqwest::Error) -> SearchError {
    if error.is_connect() {
        SearchError::CapabilityUnavailable(format!("{backend} unreachable: {error}"))
    } else {
        SearchError::BackendResponse {
            backend: backend.to_string(),
            details: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::endpoint_url;

    #[test]
    fn endpoints_keep_their_path_prefix() -> Result<(), crate::error::SearchError> {
        let url = endpoint_url("https://proxy.local/openai/v1/", "chat/completions")?;
        assert_eq!(url.as_str(), "https://proxy.local/openai/v1/chat/completions");

        let url = endpoint_url("http://localhost:11434", "/api/embed")?;
        assert_eq!(url.as_str(), "http://localhost:11434/api/embed");
        Ok(())
    }
}
