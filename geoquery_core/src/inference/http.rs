use super::{
    ChatCompletion, CompletionRequest, InferenceBackend, InferenceEngine, LoadProgress,
    ProgressListener,
};
use crate::cache::{resource_matches, ArtifactStorage, ALL_CACHES, CONFIG_CACHE, MODEL_CACHE};
use crate::models::ModelConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a CompletionRequest,
}

/// Backend for an OpenAI-compatible server on the local machine
/// (llama.cpp server, Ollama, LM Studio, ...).
///
/// Artifacts of every model it loads are recorded in the artifact store so that
/// cache status and eviction work the same way as for in-process runtimes.
pub struct LocalServerBackend {
    client: Client,
    base_url: String,
    store: Arc<dyn ArtifactStorage>,
}

impl LocalServerBackend {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn ArtifactStorage>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ids the server currently serves.
    pub async fn served_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let list: ModelList = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("could not reach {}", url))?
            .error_for_status()?
            .json()
            .await
            .context("unexpected /models response")?;

        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    fn weights_resource(&self, model_id: &str) -> String {
        format!("{}/models/{}", self.base_url, model_id)
    }

    fn config_resource(&self, model_id: &str) -> String {
        format!("{}/models/{}/mlc-chat-config.json", self.base_url, model_id)
    }
}

fn report(progress: &Option<ProgressListener>, fraction: f64, text: &str) {
    if let Some(listener) = progress {
        listener(LoadProgress {
            progress: fraction,
            text: text.to_string(),
        });
    }
}

#[async_trait]
impl InferenceBackend for LocalServerBackend {
    async fn create_engine(
        &self,
        model: &ModelConfig,
        progress: Option<ProgressListener>,
    ) -> Result<Arc<dyn InferenceEngine>> {
        report(&progress, 0.0, "Fetching model list");

        let served = self.served_models().await?;
        let served_id = served
            .into_iter()
            .find(|id| resource_matches(id, &model.model_id))
            .ok_or_else(|| {
                anyhow!(
                    "model {} is not served by {}",
                    model.model_id,
                    self.base_url
                )
            })?;

        report(&progress, 0.5, "Recording model artifacts");
        let size_bytes = u64::from(model.size_mb) * 1024 * 1024;
        self.store
            .put(MODEL_CACHE, &self.weights_resource(&model.model_id), size_bytes)
            .await?;
        self.store
            .put(CONFIG_CACHE, &self.config_resource(&model.model_id), 0)
            .await?;

        report(&progress, 1.0, "Finish loading");
        info!("Engine ready for {} (served as {})", model.model_id, served_id);

        Ok(Arc::new(HttpEngine {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            model_id: model.model_id.clone(),
            served_id,
        }))
    }

    async fn delete_model_cache(&self, model_id: &str) -> Result<()> {
        for cache_name in ALL_CACHES {
            let removed = self.store.delete_matching(cache_name, model_id).await?;
            debug!("Removed {} entries for {} from {}", removed, model_id, cache_name);
        }
        Ok(())
    }

    async fn has_model_in_cache(&self, model_id: &str) -> Result<bool> {
        let names = self.store.resource_names(MODEL_CACHE).await?;
        Ok(names.iter().any(|name| resource_matches(name, model_id)))
    }
}

struct HttpEngine {
    client: Client,
    base_url: String,
    model_id: String,
    served_id: String,
}

#[async_trait]
impl InferenceEngine for HttpEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: CompletionRequest) -> Result<ChatCompletion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = WireRequest {
            model: &self.served_id,
            request: &request,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("inference server returned {}: {}", status, text);
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .context("unexpected /chat/completions response")?;
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FsArtifactStore;
    use crate::inference::ChatMessage;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves each canned body once per connection, in order.
    async fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for body in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_string();
                    if let Some(header_end) = text.find("\r\n\r\n") {
                        let content_length = text[..header_end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if request.len() >= header_end + 4 + content_length {
                            break;
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        format!("http://{}/v1", addr)
    }

    fn model(id: &str) -> ModelConfig {
        ModelConfig {
            model_id: id.to_string(),
            context_window_size: 2048,
            size_mb: 1,
            description: id.to_string(),
            recommended_ram_gb: None,
        }
    }

    #[tokio::test]
    async fn test_create_engine_records_artifacts_and_completes() {
        let base = serve(vec![
            r#"{"object":"list","data":[{"id":"qwen2.5-1.5b-instruct-q4f16_1-mlc"}]}"#,
            r#"{"choices":[{"message":{"role":"assistant","content":"SELECT name FROM countries"}}]}"#,
        ])
        .await;

        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn ArtifactStorage> =
            Arc::new(FsArtifactStore::new(temp_dir.path()).unwrap());
        let backend = LocalServerBackend::new(base, store.clone()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: ProgressListener = Arc::new(move |p: LoadProgress| {
            sink.lock().unwrap().push(p.progress);
        });

        let engine = backend
            .create_engine(&model("Qwen2.5-1.5B-Instruct-q4f16_1-MLC"), Some(listener))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.5, 1.0]);
        assert!(backend
            .has_model_in_cache("Qwen2.5-1.5B-Instruct-q4f16_1-MLC")
            .await
            .unwrap());

        let completion = engine
            .complete(CompletionRequest {
                messages: vec![ChatMessage::user("countries")],
                temperature: 0.3,
                max_tokens: 300,
                response_format: None,
            })
            .await
            .unwrap();
        assert_eq!(completion.content(), Some("SELECT name FROM countries"));

        backend
            .delete_model_cache("Qwen2.5-1.5B-Instruct-q4f16_1-MLC")
            .await
            .unwrap();
        assert!(!backend
            .has_model_in_cache("Qwen2.5-1.5B-Instruct-q4f16_1-MLC")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unserved_model_is_rejected() {
        let base = serve(vec![r#"{"data":[{"id":"some-other-model"}]}"#]).await;
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn ArtifactStorage> =
            Arc::new(FsArtifactStore::new(temp_dir.path()).unwrap());
        let backend = LocalServerBackend::new(format!("{}/", base), store.clone()).unwrap();
        assert!(!backend.base_url().ends_with('/'));

        let err = match backend.create_engine(&model("Llama-3.2-1B"), None).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("not served"));
        assert!(store.resource_names(MODEL_CACHE).await.unwrap().is_empty());
    }
}
