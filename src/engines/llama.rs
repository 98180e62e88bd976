/*
 * Recording Summarizer CLI - llama.cpp Server Adapter
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

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;

use super::{ChatMessage, ChatModel};

const HEALTH_ATTEMPTS: u32 = 60;
const HEALTH_INTERVAL_MS: u64 = 1000;

/// Chat-completion client for an OpenAI-compatible llama.cpp server.
///
/// The client either connects to an already-running server or owns a
/// spawned child process, which is killed when the client is dropped.
pub struct LlamaChatClient {
    client: reqwest::Client,
    base_url: String,
    child: Option<tokio::process::Child>,
}

impl LlamaChatClient {
    /// Connect to an external server without owning a process.
    pub fn connect(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            child: None,
        })
    }

    /// Spawn a llama.cpp server for `model_path` with the requested GPU
    /// offload and wait until it reports healthy.
    pub async fn launch(
        server_command: &str,
        model_path: &Path,
        gpu_layers: i32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let port = pick_free_port()?;
        let ngl = if gpu_layers < 0 {
            // Negative means full offload; llama.cpp takes a large layer
            // count for the same effect.
            999
        } else {
            gpu_layers
        };

        tracing::info!(
            "Starting llama.cpp server for {} on port {} (ngl={})",
            model_path.display(),
            port,
            ngl
        );

        let mut child = Command::new(server_command)
            .args([
                "-m",
                &model_path.to_string_lossy(),
                "--host",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "-ngl",
                &ngl.to_string(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start '{}'", server_command))?;

        let base_url = format!("http://127.0.0.1:{}", port);
        let mut client = Self::connect(base_url, timeout_secs)?;

        for _ in 0..HEALTH_ATTEMPTS {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(anyhow::anyhow!(
                    "llama.cpp server exited during startup with {}",
                    status
                ));
            }
            if client.health_check().await {
                client.child = Some(child);
                tracing::info!("llama.cpp server is healthy on {}", client.base_url);
                return Ok(client);
            }
            sleep(Duration::from_millis(HEALTH_INTERVAL_MS)).await;
        }

        let _ = child.start_kill();
        Err(anyhow::anyhow!(
            "llama.cpp server did not become healthy in time"
        ))
    }

    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatModel for LlamaChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let request_body = json!({
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": false
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "chat completion error: {}",
                response.status()
            ));
        }

        let response_json: Value = response.json().await?;

        let content = response_json
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

impl Drop for LlamaChatClient {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

fn pick_free_port() -> Result<u16> {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").context("Failed to bind an ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_extracts_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":"MEETING"}}]}"#)
            .create_async()
            .await;

        let client = LlamaChatClient::connect(server.url(), 5).unwrap();
        let content = client
            .complete(&[ChatMessage::user("classify this")], 0.0, 8)
            .await
            .unwrap();

        assert_eq!(content, "MEETING");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn complete_errors_on_server_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .create_async()
            .await;

        let client = LlamaChatClient::connect(server.url(), 5).unwrap();
        let result = client.complete(&[ChatMessage::user("hi")], 0.0, 8).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_check_reflects_server_state() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let client = LlamaChatClient::connect(server.url(), 5).unwrap();
        assert!(client.health_check().await);

        let dead = LlamaChatClient::connect("http://127.0.0.1:1", 5).unwrap();
        assert!(!dead.health_check().await);
    }
}
