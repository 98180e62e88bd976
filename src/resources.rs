/*
 * Recording Summarizer CLI - Rust Edition
 * Copyright (c) 2025 Recording Summarizer Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::engines::{
    resolve_model_file, AsrEngine, ChatModel, Diarizer, DiarizerBridge, LlamaChatClient, WhisperCli,
};

/// Cache state of one lazily loaded model handle.
enum Slot<T: ?Sized> {
    Untried,
    Ready(Arc<T>),
    Unavailable,
}

impl<T: ?Sized> Slot<T> {
    fn cached(&self) -> Option<Option<Arc<T>>> {
        match self {
            Slot::Untried => None,
            Slot::Ready(handle) => Some(Some(handle.clone())),
            Slot::Unavailable => Some(None),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LlmRole {
    Classifier,
    Summarizer,
}

impl LlmRole {
    fn label(&self) -> &'static str {
        match self {
            LlmRole::Classifier => "classifier",
            LlmRole::Summarizer => "summarizer",
        }
    }
}

/// Lazily materializes and caches the heavy model handles used by the
/// pipeline stages. One instance is owned per job worker; handles are
/// never shared across jobs.
///
/// A failed load is cached as "unavailable" rather than propagated, so
/// stages see a null capability and apply their own fallbacks.
pub struct ResourceManager {
    config: Arc<Config>,
    asr: RwLock<Slot<dyn AsrEngine>>,
    diarizer: RwLock<Slot<dyn Diarizer>>,
    classifier_llm: RwLock<Slot<dyn ChatModel>>,
    summarizer_llm: RwLock<Slot<dyn ChatModel>>,
}

impl ResourceManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            asr: RwLock::new(Slot::Untried),
            diarizer: RwLock::new(Slot::Untried),
            classifier_llm: RwLock::new(Slot::Untried),
            summarizer_llm: RwLock::new(Slot::Untried),
        }
    }

    pub async fn asr(&self) -> Option<Arc<dyn AsrEngine>> {
        if let Some(cached) = self.asr.read().await.cached() {
            return cached;
        }
        let mut slot = self.asr.write().await;
        if let Some(cached) = slot.cached() {
            return cached;
        }
        match WhisperCli::detect(&self.config.asr).await {
            Ok(engine) => {
                let handle: Arc<dyn AsrEngine> = Arc::new(engine);
                *slot = Slot::Ready(handle.clone());
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("ASR engine unavailable: {}", e);
                *slot = Slot::Unavailable;
                None
            }
        }
    }

    pub async fn diarizer(&self) -> Option<Arc<dyn Diarizer>> {
        if let Some(cached) = self.diarizer.read().await.cached() {
            return cached;
        }
        let mut slot = self.diarizer.write().await;
        if let Some(cached) = slot.cached() {
            return cached;
        }
        match DiarizerBridge::detect(&self.config.diarizer).await {
            Ok(bridge) => {
                let handle: Arc<dyn Diarizer> = Arc::new(bridge);
                *slot = Slot::Ready(handle.clone());
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("Diarizer unavailable: {}", e);
                *slot = Slot::Unavailable;
                None
            }
        }
    }

    pub async fn classifier_llm(&self) -> Option<Arc<dyn ChatModel>> {
        self.chat_model(LlmRole::Classifier).await
    }

    pub async fn summarizer_llm(&self) -> Option<Arc<dyn ChatModel>> {
        self.chat_model(LlmRole::Summarizer).await
    }

    async fn chat_model(&self, role: LlmRole) -> Option<Arc<dyn ChatModel>> {
        let slot_lock = match role {
            LlmRole::Classifier => &self.classifier_llm,
            LlmRole::Summarizer => &self.summarizer_llm,
        };
        if let Some(cached) = slot_lock.read().await.cached() {
            return cached;
        }
        let mut slot = slot_lock.write().await;
        if let Some(cached) = slot.cached() {
            return cached;
        }
        match self.load_chat_model(role).await {
            Some(client) => {
                let handle: Arc<dyn ChatModel> = Arc::new(client);
                *slot = Slot::Ready(handle.clone());
                Some(handle)
            }
            None => {
                *slot = Slot::Unavailable;
                None
            }
        }
    }

    async fn load_chat_model(&self, role: LlmRole) -> Option<LlamaChatClient> {
        let llm = &self.config.llm;

        if let Some(url) = &llm.server_url {
            match LlamaChatClient::connect(url.clone(), llm.request_timeout_secs) {
                Ok(client) => {
                    if client.health_check().await {
                        tracing::info!("Using external LLM server at {} for {}", url, role.label());
                        return Some(client);
                    }
                    tracing::warn!("External LLM server at {} is not healthy", url);
                    return None;
                }
                Err(e) => {
                    tracing::warn!("Failed to build LLM client for {}: {}", url, e);
                    return None;
                }
            }
        }

        let (repo, pattern) = match role {
            LlmRole::Classifier => (&llm.classifier_repo, &llm.classifier_pattern),
            LlmRole::Summarizer => (&llm.summarizer_repo, &llm.summarizer_pattern),
        };
        let Some(repo_id) = repo else {
            tracing::warn!("No {} model configured", role.label());
            return None;
        };

        let Some(model_path) = resolve_model_file(&llm.model_cache, repo_id, pattern.as_deref())
        else {
            tracing::warn!(
                "No GGUF model file found for '{}' under {}",
                repo_id,
                llm.model_cache.display()
            );
            return None;
        };

        // Full offload unless overridden; the loader retries on CPU below.
        let gpu_layers = llm.gpu_layers.unwrap_or(-1);
        match LlamaChatClient::launch(
            &llm.server_command,
            &model_path,
            gpu_layers,
            llm.request_timeout_secs,
        )
        .await
        {
            Ok(client) => Some(client),
            Err(gpu_err) if gpu_layers != 0 => {
                tracing::warn!(
                    "GPU launch of {} model failed ({}); retrying on CPU",
                    role.label(),
                    gpu_err
                );
                match LlamaChatClient::launch(
                    &llm.server_command,
                    &model_path,
                    0,
                    llm.request_timeout_secs,
                )
                .await
                {
                    Ok(client) => Some(client),
                    Err(cpu_err) => {
                        tracing::warn!(
                            "CPU launch of {} model failed: {}",
                            role.label(),
                            cpu_err
                        );
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Launch of {} model failed: {}", role.label(), e);
                None
            }
        }
    }

    /// Drop the cached ASR handle to reduce memory pressure before an LLM
    /// load. The next `asr()` call re-materializes it.
    pub async fn release_asr(&self) {
        let mut slot = self.asr.write().await;
        if let Slot::Ready(engine) = &*slot {
            engine.release();
            tracing::info!("Released ASR engine to free memory");
        }
        *slot = Slot::Untried;
    }
}

#[cfg(test)]
impl ResourceManager {
    pub async fn inject_asr(&self, engine: Arc<dyn AsrEngine>) {
        *self.asr.write().await = Slot::Ready(engine);
    }

    pub async fn inject_diarizer(&self, diarizer: Arc<dyn Diarizer>) {
        *self.diarizer.write().await = Slot::Ready(diarizer);
    }

    pub async fn inject_classifier_llm(&self, model: Arc<dyn ChatModel>) {
        *self.classifier_llm.write().await = Slot::Ready(model);
    }

    pub async fn inject_summarizer_llm(&self, model: Arc<dyn ChatModel>) {
        *self.summarizer_llm.write().await = Slot::Ready(model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_config;

    #[tokio::test]
    async fn unavailable_asr_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.asr.command = "definitely-not-whisper".to_string();
        let resources = ResourceManager::new(Arc::new(config));

        assert!(resources.asr().await.is_none());
        // Second access hits the cache rather than re-probing.
        assert!(resources.asr().await.is_none());
    }

    #[tokio::test]
    async fn release_asr_resets_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let resources = ResourceManager::new(Arc::new(test_config(dir.path())));
        assert!(resources.asr().await.is_none());
        resources.release_asr().await;
        assert!(resources.asr().await.is_none());
    }

    #[tokio::test]
    async fn diarizer_without_command_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let resources = ResourceManager::new(Arc::new(test_config(dir.path())));
        assert!(resources.diarizer().await.is_none());
    }

    #[tokio::test]
    async fn chat_model_uses_external_server_when_configured() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.llm.server_url = Some(server.url());
        let resources = ResourceManager::new(Arc::new(config));

        assert!(resources.classifier_llm().await.is_some());
        assert!(resources.summarizer_llm().await.is_some());
    }

    #[tokio::test]
    async fn chat_model_without_repo_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let resources = ResourceManager::new(Arc::new(test_config(dir.path())));
        assert!(resources.classifier_llm().await.is_none());
    }
}
