//! Ollama provider implementation.
//!
//! This module provides an Ollama HTTP API client that implements both the
//! embedding and the generation capability.

use super::types::*;
use crate::config::Config;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

/// Ollama HTTP API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    options: GenerateOptions,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Creates a generation provider from the `llm` section of the config.
    pub fn for_generation(config: &Config) -> Self {
        Self {
            base_url: trim_base_url(&config.llm.base_url),
            model: config.llm.model.clone(),
            options: GenerateOptions {
                temperature: config.llm.temperature,
                top_p: config.llm.top_p,
                repeat_penalty: config.llm.repeat_penalty,
                num_predict: config.llm.max_tokens,
            },
            http_client: reqwest::Client::new(),
        }
    }

    /// Creates an embedding provider from the `embedding` section of the config.
    pub fn for_embedding(config: &Config) -> Self {
        let mut provider = Self::for_generation(config);
        provider.base_url = trim_base_url(config.embedding_base_url());
        provider.model = config.embedding.model.clone();
        provider
    }

    async fn post_embed(&self, input: EmbedInput) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);

        let embed_request = EmbedRequest {
            model: self.model.clone(),
            input,
        };

        let response = self.http_client
            .post(&url)
            .json(&embed_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(ProviderError::Api(error_text));
        }

        let embed_response = response.json::<EmbedResponse>().await?;
        if embed_response.embeddings.is_empty() {
            warn!(model = %self.model, "Ollama returned empty embeddings");
        }
        Ok(embed_response.embeddings)
    }
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.post_embed(EmbedInput::Single(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Other("No embeddings returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.post_embed(EmbedInput::Batch(texts.to_vec())).await?;
        if embeddings.len() != texts.len() {
            return Err(ProviderError::Other(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: true,
            options: self.options.clone(),
        };

        let response = self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(ProviderError::Api(error_text));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut answer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.drain(..=newline_pos).collect::<Vec<_>>();
                if line.len() <= 1 {
                    continue;
                }
                if accumulate_line(&line[..line.len() - 1], &mut answer)? {
                    return Ok(answer);
                }
            }
        }

        // Last line may arrive without a trailing newline
        if !buffer.is_empty() {
            accumulate_line(&buffer, &mut answer)?;
        }

        Ok(answer)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Appends one NDJSON line of a streamed completion. Returns `true` once the
/// model reports it is done.
fn accumulate_line(line: &[u8], answer: &mut String) -> Result<bool> {
    let line_str = String::from_utf8_lossy(line);
    let trimmed = line_str.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }

    match serde_json::from_str::<GenerateResponse>(trimmed) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return Err(ProviderError::Api(error));
            }
            answer.push_str(&chunk.response);
            Ok(chunk.done)
        }
        Err(e) => {
            debug!(error = %e, "Skipping unparsable stream line");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.llm.base_url = format!("{}/", server.uri());
        config
    }

    #[tokio::test]
    async fn test_embed_single() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({"model": "all-minilm", "input": "cruelty"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "all-minilm",
                "embeddings": [[0.1, 0.2, 0.3]]
            })))
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::for_embedding(&config_for(&mock_server));
        let vector = provider.embed("cruelty").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_batch_count_mismatch_is_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "all-minilm",
                "embeddings": [[1.0, 0.0]]
            })))
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::for_embedding(&config_for(&mock_server));
        let result = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await;
        assert!(matches!(result, Err(ProviderError::Other(_))));
    }

    #[tokio::test]
    async fn test_embed_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::for_embedding(&config_for(&mock_server));
        let result = provider.embed("text").await;
        match result {
            Err(ProviderError::Api(message)) => assert_eq!(message, "model not found"),
            other => panic!("Expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_accumulates_stream() {
        let mock_server = MockServer::start().await;

        let body = [
            r#"{"model":"gemma3:1b","response":"Cruelty ","done":false}"#,
            r#"{"model":"gemma3:1b","response":"and desertion.","done":false}"#,
            r#"{"model":"gemma3:1b","response":"","done":true}"#,
        ]
        .join("\n");

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"model": "gemma3:1b", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::for_generation(&config_for(&mock_server));
        let answer = provider.generate("prompt").await.unwrap();
        assert_eq!(answer, "Cruelty and desertion.");
    }

    #[tokio::test]
    async fn test_generate_stream_error_line() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"error":"model is loading"}"#),
            )
            .mount(&mock_server)
            .await;

        let provider = OllamaProvider::for_generation(&config_for(&mock_server));
        let result = provider.generate("prompt").await;
        assert!(matches!(result, Err(ProviderError::Api(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let mut config = Config::default();
        config.llm.base_url = "http://127.0.0.1:9".to_string();

        let provider = OllamaProvider::for_generation(&config);
        let result = provider.generate("prompt").await;
        assert!(matches!(result, Err(ProviderError::Request(_))));
    }
}
