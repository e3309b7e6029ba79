use reqwest::Client;

use super::{CursorState, PollRequest, PollResponse, PollTransport};
use crate::error::PollError;
use crate::record::parse_batch;

/// Response header carrying the continuation token
pub const CONTINUATION_HEADER: &str = "uniq";

/// Long-poll transport for the web log endpoint (`<base>/lp/`)
pub struct HttpTransport {
    client: Client,
    base: String,
}

impl HttpTransport {
    /// `endpoint` is the base the log writer is mounted on, e.g.
    /// `http://localhost:8080/logs/`
    pub fn new(endpoint: &str) -> Result<Self, PollError> {
        let client = Client::builder().build()?;
        let mut base = endpoint.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self { client, base })
    }

    /// One non-blocking read of the buffered records (`<base>/data/`).
    /// May legitimately return an empty batch.
    pub async fn snapshot(
        &self,
        cursor: &CursorState,
        timeout: std::time::Duration,
    ) -> Result<PollResponse, PollError> {
        let request = PollRequest {
            last_id: cursor.last_id,
            continuation_token: cursor.continuation_token.clone(),
            timeout,
        };
        self.fetch("data/", &request).await
    }

    async fn fetch(&self, path: &str, request: &PollRequest) -> Result<PollResponse, PollError> {
        let mut query = vec![("r", request.last_id.to_string())];
        if let Some(token) = &request.continuation_token {
            query.push(("uniq", token.clone()));
        }

        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .query(&query)
            .timeout(request.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let continuation_token = response
            .headers()
            .get(CONTINUATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        let records = parse_batch(&body)?;

        Ok(PollResponse {
            records,
            continuation_token,
        })
    }
}

#[async_trait::async_trait]
impl PollTransport for HttpTransport {
    async fn poll(&self, request: &PollRequest) -> Result<PollResponse, PollError> {
        let response = self.fetch("lp/", request).await?;
        if response.records.is_empty() {
            return Err(PollError::EmptyBatch);
        }
        Ok(response)
    }

    fn name(&self) -> String {
        self.base.clone()
    }
}
