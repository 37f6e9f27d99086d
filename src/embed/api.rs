use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::resilience::{CircuitBreaker, execute_with_retry_async};
use super::settings::{ApiKind, ApiProviderConfig};
use super::{EmbeddingError, EmbeddingProvider};

const MAX_ERROR_BODY: usize = 512;

/// Remote embedding provider over HTTP with retry and a circuit breaker.
pub struct ApiEmbeddingProvider {
    name: String,
    config: ApiProviderConfig,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl std::fmt::Debug for ApiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiEmbeddingProvider")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("circuit", &self.breaker.current_state())
            .finish()
    }
}

impl ApiEmbeddingProvider {
    pub fn new(config: ApiProviderConfig) -> Result<Self, EmbeddingError> {
        config.validate()?;
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(std::time::Duration::from_secs(10)))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| EmbeddingError::InvalidConfig(format!("http client: {e}")))?;
        let name = match config.model.as_deref() {
            Some(model) => format!("{}:{model}", kind_label(config.kind)),
            None => kind_label(config.kind).to_string(),
        };
        Ok(Self {
            breaker: CircuitBreaker::new(name.clone(), config.circuit_breaker),
            endpoint: config.endpoint(),
            name,
            config,
            api_key,
            client,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if !self.breaker.allow_request() {
            return Err(EmbeddingError::CircuitOpen(self.name.clone()));
        }
        let payload = build_payload(self.config.kind, texts, self.config.model.as_deref());
        let outcome = execute_with_retry_async(
            &self.config.retry,
            EmbeddingError::is_retryable,
            |attempt| {
                let payload = &payload;
                async move {
                    if attempt > 0 {
                        debug!(provider = %self.name, attempt, "embedding_retry");
                    }
                    self.send(payload).await
                }
            },
        )
        .await;

        let vectors = outcome
            .into_result()
            .and_then(parse_embeddings_from_value)
            .and_then(|vectors| {
                if vectors.len() == texts.len() {
                    Ok(vectors)
                } else {
                    Err(EmbeddingError::CountMismatch {
                        expected: texts.len(),
                        actual: vectors.len(),
                    })
                }
            });
        match &vectors {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        vectors
    }

    async fn send(&self, payload: &Value) -> Result<Value, EmbeddingError> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(key) = self.api_key.as_deref() {
            request = match self.config.kind {
                ApiKind::Azure => request.header("api-key", key),
                _ => request.bearer_auth(key),
            };
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(format!("invalid JSON: {e}")))
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::EmptyVector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

fn kind_label(kind: ApiKind) -> &'static str {
    match kind {
        ApiKind::OpenAi => "openai",
        ApiKind::Azure => "azure",
        ApiKind::HuggingFace => "huggingface",
        ApiKind::Custom => "custom",
    }
}

fn build_payload(kind: ApiKind, texts: &[String], model: Option<&str>) -> Value {
    match kind {
        ApiKind::OpenAi => json!({ "input": texts, "model": model }),
        ApiKind::Azure => json!({ "input": texts }),
        ApiKind::HuggingFace => json!({ "inputs": texts }),
        ApiKind::Custom => json!({ "texts": texts }),
    }
}

fn parse_embeddings_from_value(value: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match value {
        Value::Object(mut map) => {
            if let Some(embeddings) = map.remove("embeddings") {
                return parse_embedding_collection(embeddings);
            }

            if let Some(Value::Array(items)) = map.remove("data") {
                let mut indexed = Vec::with_capacity(items.len());
                for (pos, item) in items.into_iter().enumerate() {
                    let Value::Object(mut obj) = item else {
                        return Err(EmbeddingError::MalformedResponse(
                            "unexpected entry inside `data` array".into(),
                        ));
                    };
                    let embedding = obj.remove("embedding").ok_or_else(|| {
                        EmbeddingError::MalformedResponse(
                            "missing `embedding` field in data item".into(),
                        )
                    })?;
                    let index = obj
                        .get("index")
                        .and_then(Value::as_u64)
                        .map_or(pos, |i| i as usize);
                    indexed.push((index, parse_embedding_vector(embedding)?));
                }
                indexed.sort_by_key(|(index, _)| *index);
                return Ok(indexed.into_iter().map(|(_, v)| v).collect());
            }

            Err(EmbeddingError::MalformedResponse(
                "unsupported API response shape".into(),
            ))
        }
        other => parse_embedding_collection(other),
    }
}

fn parse_embedding_collection(value: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                Ok(Vec::new())
            } else if items.iter().all(|item| matches!(item, Value::Array(_))) {
                items.into_iter().map(parse_embedding_vector).collect()
            } else {
                parse_embedding_vector(Value::Array(items)).map(|vec| vec![vec])
            }
        }
        other => parse_embedding_vector(other).map(|vec| vec![vec]),
    }
}

fn parse_embedding_vector(value: Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = match value {
        Value::Array(values) => values,
        other => {
            return Err(EmbeddingError::MalformedResponse(format!(
                "embedding vector must be an array, got {other}"
            )));
        }
    };
    let vector = values
        .into_iter()
        .map(|entry| {
            entry
                .as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| {
                    EmbeddingError::MalformedResponse(format!(
                        "embedding entries must be numbers, got {entry}"
                    ))
                })
        })
        .collect::<Result<Vec<f32>, _>>()?;
    if vector.is_empty() {
        return Err(EmbeddingError::EmptyVector);
    }
    Ok(vector)
}
