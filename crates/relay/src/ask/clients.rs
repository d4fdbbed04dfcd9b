//! Outbound chat-completion and embedding clients, behind traits so the
//! orchestrator and the embedding worker never couple to a vendor SDK.

use models::AiProvider;
use relay_sql::ask::AiConfig;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub answer: String,
    /// Raw provider response, persisted with the request for debugging.
    pub details: serde_json::Value,
}

/// Errors from the external APIs, split so the retry wrapper and the error
/// taxonomy can classify them.
#[derive(Debug, thiserror::Error)]
pub enum ApiCallError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiCallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiCallError::RateLimited | ApiCallError::Timeout)
    }
}

#[async_trait::async_trait]
pub trait ChatClient: Send + Sync + 'static {
    async fn chat(
        &self,
        config: &AiConfig,
        model: Option<&str>,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, ApiCallError>;
}

#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync + 'static {
    async fn embed(
        &self,
        config: &AiConfig,
        model: &str,
        input: &str,
    ) -> Result<Vec<f32>, ApiCallError>;
}

/// Retry an operation with exponential backoff and jitter, bounded by both
/// attempt count and total elapsed time. Only errors the predicate marks
/// retryable are retried; everything else surfaces immediately.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    max_attempts: u32,
    max_elapsed: std::time::Duration,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let started = std::time::Instant::now();
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                let backoff =
                    std::time::Duration::from_millis(250) * 2u32.saturating_pow(attempt - 1);
                let jitter = backoff.mul_f64(rand::random::<f64>() * 0.25);
                if started.elapsed() + backoff + jitter > max_elapsed {
                    return Err(err);
                }
                tokio::time::sleep(backoff + jitter).await;
            }
        }
    }
}

fn base_url(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::Openai => "https://api.openai.com/v1",
        AiProvider::Anthropic => "https://api.anthropic.com/v1",
    }
}

fn default_chat_model(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::Openai => "gpt-4o-mini",
        AiProvider::Anthropic => "claude-3-5-haiku-latest",
    }
}

/// reqwest-backed client speaking the providers' HTTP APIs.
pub struct HttpAiClient {
    http: reqwest::Client,
}

impl HttpAiClient {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(anyhow::Error::from)?;
        Ok(Self { http })
    }

    fn classify(err: reqwest::Error) -> ApiCallError {
        if err.is_timeout() {
            ApiCallError::Timeout
        } else {
            ApiCallError::Other(err.into())
        }
    }

    async fn into_json(response: reqwest::Response) -> Result<serde_json::Value, ApiCallError> {
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiCallError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiCallError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(Self::classify)
    }
}

#[async_trait::async_trait]
impl ChatClient for HttpAiClient {
    async fn chat(
        &self,
        config: &AiConfig,
        model: Option<&str>,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, ApiCallError> {
        let model = model
            .or(config.default_model.as_deref())
            .unwrap_or_else(|| default_chat_model(config.provider));

        let response = match config.provider {
            AiProvider::Openai => {
                let body = serde_json::json!({ "model": model, "messages": messages });
                let raw = self
                    .http
                    .post(format!("{}/chat/completions", base_url(config.provider)))
                    .bearer_auth(&config.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(Self::classify)?;
                let raw = Self::into_json(raw).await?;

                let answer = raw["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                ChatResponse {
                    answer,
                    details: raw,
                }
            }
            AiProvider::Anthropic => {
                let system: String = messages
                    .iter()
                    .filter(|m| m.role == "system")
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let turns: Vec<&ChatMessage> =
                    messages.iter().filter(|m| m.role != "system").collect();

                let body = serde_json::json!({
                    "model": model,
                    "max_tokens": 2048,
                    "system": system,
                    "messages": turns,
                });
                let raw = self
                    .http
                    .post(format!("{}/messages", base_url(config.provider)))
                    .header("x-api-key", &config.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&body)
                    .send()
                    .await
                    .map_err(Self::classify)?;
                let raw = Self::into_json(raw).await?;

                let answer = raw["content"][0]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                ChatResponse {
                    answer,
                    details: raw,
                }
            }
        };

        Ok(response)
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for HttpAiClient {
    async fn embed(
        &self,
        config: &AiConfig,
        model: &str,
        input: &str,
    ) -> Result<Vec<f32>, ApiCallError> {
        // Embeddings are served by the OpenAI-compatible endpoint regardless
        // of which provider answers chat completions.
        let body = serde_json::json!({ "model": model, "input": input });
        let raw = self
            .http
            .post(format!("{}/embeddings", base_url(AiProvider::Openai)))
            .bearer_auth(&config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify)?;
        let raw = Self::into_json(raw).await?;

        let vector = raw["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("malformed embedding response"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or_default() as f32)
            .collect();
        Ok(vector)
    }
}

/// Cosine distance ranking over precomputed page embeddings.
pub fn rank_by_cosine_distance(
    query: &[f32],
    candidates: Vec<relay_sql::ask::PageEmbedding>,
    limit: usize,
) -> Vec<relay_sql::ask::PageEmbedding> {
    let mut scored: Vec<(f32, relay_sql::ask::PageEmbedding)> = candidates
        .into_iter()
        .map(|c| (cosine_distance(query, &c.embedding), c))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::MAX;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::MAX;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_retry_stops_on_non_retryable() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), ApiCallError> = retry_with_backoff(
            5,
            std::time::Duration::from_secs(10),
            |err: &ApiCallError| err.is_retryable(),
            || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async {
                    Err(ApiCallError::Status {
                        status: 400,
                        message: "bad request".to_string(),
                    })
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_retries_rate_limits_until_cap() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), ApiCallError> = retry_with_backoff(
            3,
            std::time::Duration::from_secs(300),
            |err: &ApiCallError| err.is_retryable(),
            || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(ApiCallError::RateLimited) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cosine_ranking_prefers_aligned_vectors() {
        let mk = |id: i64, v: Vec<f32>| relay_sql::ask::PageEmbedding {
            page_id: id,
            page_external_id: models::Id::new((id as u64).to_be_bytes()),
            content_hash: String::new(),
            embedding: v,
        };
        let ranked = rank_by_cosine_distance(
            &[1.0, 0.0],
            vec![
                mk(1, vec![0.0, 1.0]),
                mk(2, vec![1.0, 0.1]),
                mk(3, vec![-1.0, 0.0]),
            ],
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].page_id, 2);
        assert_eq!(ranked[1].page_id, 1);
    }
}
