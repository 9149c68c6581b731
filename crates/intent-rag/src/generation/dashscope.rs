//! DashScope application completion client
//!
//! Batched calls return `output.text` from a single JSON response. Streamed
//! calls read server-sent events whose `data:` payloads carry the cumulative
//! answer so far; each payload is yielded as one snapshot.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Cumulative answer snapshots, in arrival order
pub type SnapshotStream = BoxStream<'static, Result<String>>;

/// A remote answering service addressed by application id
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Full answer for `prompt`
    async fn complete(&self, app_id: &str, prompt: &str) -> Result<String>;

    /// Stream of cumulative answer snapshots for `prompt`
    ///
    /// Resolves once the upstream accepted the request; dropping the stream
    /// releases the connection.
    async fn snapshots(&self, app_id: &str, prompt: &str) -> Result<SnapshotStream>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    input: CompletionInput<'a>,
    parameters: CompletionParameters,
    debug: serde_json::Value,
}

#[derive(Serialize)]
struct CompletionInput<'a> {
    prompt: &'a str,
    session_id: &'a str,
}

#[derive(Serialize)]
struct CompletionParameters {
    incremental_output: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    output: Option<CompletionOutput>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct CompletionOutput {
    #[serde(default)]
    text: Option<String>,
}

/// HTTP client for `POST {base_url}/api/v1/apps/{app_id}/completion`
pub struct DashScopeClient {
    client: Client,
    base_url: String,
    api_key: String,
    session_id: String,
}

impl DashScopeClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("No generation API key (set DASHSCOPE_API_KEY)".to_string())
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            session_id: config.session_id.clone(),
        })
    }

    fn url(&self, app_id: &str) -> String {
        format!("{}/api/v1/apps/{}/completion", self.base_url, app_id)
    }

    fn request<'a>(&'a self, prompt: &'a str) -> CompletionRequest<'a> {
        CompletionRequest {
            input: CompletionInput {
                prompt,
                session_id: &self.session_id,
            },
            parameters: CompletionParameters {
                incremental_output: false,
            },
            debug: serde_json::json!({}),
        }
    }

    async fn send(&self, app_id: &str, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.url(app_id))
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt));
        if stream {
            builder = builder.header("X-DashScope-SSE", "enable");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::upstream(format!("Generation request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(format!(
                "Generation failed: HTTP {} - {}",
                status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for DashScopeClient {
    async fn complete(&self, app_id: &str, prompt: &str) -> Result<String> {
        tracing::info!("Generating answer with app: {}", app_id);

        let response: CompletionResponse = self
            .send(app_id, prompt, false)
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream(format!("Failed to parse generation response: {}", e)))?;

        response_text(response)
    }

    async fn snapshots(&self, app_id: &str, prompt: &str) -> Result<SnapshotStream> {
        tracing::info!("Streaming answer with app: {}", app_id);

        let body = self
            .send(app_id, prompt, true)
            .await?
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        Ok(sse_snapshots(body))
    }
}

fn response_text(response: CompletionResponse) -> Result<String> {
    if let Some(text) = response.output.and_then(|o| o.text) {
        return Ok(text);
    }
    Err(Error::upstream(format!(
        "{}: {}",
        response.code.unwrap_or_else(|| "NoOutput".into()),
        response.message.unwrap_or_else(|| "response carried no output text".into())
    )))
}

/// Interpret one SSE line
///
/// `None` for lines that carry no snapshot (ids, event names, comments).
pub fn parse_sse_line(line: &str) -> Option<Result<String>> {
    let data = line.trim_end_matches('\r').strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<CompletionResponse>(data) {
        Ok(response) => Some(response_text(response)),
        Err(e) => Some(Err(Error::upstream(format!("Malformed stream event: {}", e)))),
    }
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    done: bool,
}

impl SseState {
    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned())
    }
}

/// Turn a raw SSE byte stream into snapshots
///
/// Ends after the body ends or after the first error.
pub fn sse_snapshots(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> SnapshotStream {
    let state = SseState {
        body,
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(Some(state), |state| async move {
        let mut st = state?;
        loop {
            while let Some(line) = st.next_line() {
                match parse_sse_line(&line) {
                    Some(Ok(text)) => return Some((Ok(text), Some(st))),
                    Some(Err(e)) => return Some((Err(e), None)),
                    None => continue,
                }
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => st.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    return Some((
                        Err(Error::upstream(format!("Stream interrupted: {}", e))),
                        None,
                    ))
                }
                None => {
                    st.done = true;
                    st.buffer.push(b'\n');
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        let parts: Vec<reqwest::Result<Vec<u8>>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(parts).boxed()
    }

    #[test]
    fn test_parse_data_line() {
        let line = r#"data:{"output":{"text":"hello","finish_reason":"null"},"request_id":"1"}"#;
        assert_eq!(parse_sse_line(line).unwrap().unwrap(), "hello");
        assert!(parse_sse_line("event:result").is_none());
        assert!(parse_sse_line(":HTTP_STATUS/200").is_none());
    }

    #[test]
    fn test_parse_error_payload() {
        let line = r#"data:{"code":"InvalidApiKey","message":"bad key"}"#;
        let err = parse_sse_line(line).unwrap().unwrap_err();
        assert!(err.to_string().contains("InvalidApiKey"));
    }

    #[tokio::test]
    async fn test_snapshots_across_chunk_boundaries() {
        let raw = body(&[
            "id:1\nevent:result\ndata:{\"output\":{\"te",
            "xt\":\"a\"}}\n\nid:2\ndata:{\"output\":{\"text\":\"ab\"}}\n",
            "data:{\"output\":{\"text\":\"abc\"}}",
        ]);

        let snapshots: Vec<String> = sse_snapshots(raw)
            .map(|s| s.unwrap())
            .collect()
            .await;
        assert_eq!(snapshots, vec!["a", "ab", "abc"]);
    }

    #[tokio::test]
    async fn test_stream_stops_after_error_event() {
        let raw = body(&[
            "data:{\"output\":{\"text\":\"a\"}}\n",
            "data:{\"code\":\"Throttling\",\"message\":\"slow down\"}\n",
            "data:{\"output\":{\"text\":\"ab\"}}\n",
        ]);

        let items: Vec<Result<String>> = sse_snapshots(raw).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = GenerationConfig {
            api_key: None,
            ..Default::default()
        };
        assert!(matches!(DashScopeClient::new(&config), Err(Error::Config(_))));
    }
}
