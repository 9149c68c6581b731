//! Per-agent generation client

use std::sync::Arc;
use tokio::sync::mpsc;

use super::dashscope::CompletionBackend;
use super::prompt::PromptBuilder;
use super::stream::{spawn_diff_stream, StreamEvent};
use crate::config::AgentProfile;
use crate::error::{Error, Result};

/// Generation bound to one agent profile and application id
pub struct GenerationClient {
    backend: Arc<dyn CompletionBackend>,
    profile: AgentProfile,
    app_id: String,
    stream_buffer: usize,
}

impl GenerationClient {
    /// Fails when the profile has no application id
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        profile: AgentProfile,
        stream_buffer: usize,
    ) -> Result<Self> {
        let app_id = profile
            .app_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "No application id configured for collection '{}'",
                    profile.collection
                ))
            })?;

        Ok(Self {
            backend,
            profile,
            app_id,
            stream_buffer,
        })
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Full answer grounded in `chunks`
    pub async fn answer(&self, question: &str, chunks: &[String]) -> Result<String> {
        let prompt = PromptBuilder::build_answer_prompt(&self.profile, question, chunks);
        self.backend.complete(&self.app_id, &prompt).await
    }

    /// Incremental answer
    ///
    /// Errors before the first byte (rejected request, unreachable service)
    /// are returned directly; later failures arrive as [`StreamEvent::Error`].
    pub async fn answer_stream(
        &self,
        question: &str,
        chunks: &[String],
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let prompt = PromptBuilder::build_stream_prompt(&self.profile, question, chunks);
        let snapshots = self.backend.snapshots(&self.app_id, &prompt).await?;
        Ok(spawn_diff_stream(snapshots, self.stream_buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::dashscope::SnapshotStream;
    use async_trait::async_trait;
    use futures_util::{stream, StreamExt};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CompletionBackend for RecordingBackend {
        async fn complete(&self, app_id: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().push((app_id.to_string(), prompt.to_string()));
            Ok("answer".into())
        }

        async fn snapshots(&self, app_id: &str, prompt: &str) -> Result<SnapshotStream> {
            self.prompts.lock().push((app_id.to_string(), prompt.to_string()));
            let items: Vec<Result<String>> = vec![Ok("he".into()), Ok("hello".into())];
            Ok(stream::iter(items).boxed())
        }
    }

    fn profile(app_id: Option<&str>) -> AgentProfile {
        AgentProfile {
            collection: "campus".into(),
            app_id: app_id.map(String::from),
            system_prompt: "batch".into(),
            stream_system_prompt: "stream".into(),
        }
    }

    #[test]
    fn test_requires_app_id() {
        let backend = Arc::new(RecordingBackend::default());
        assert!(GenerationClient::new(backend.clone(), profile(None), 4).is_err());
        assert!(GenerationClient::new(backend, profile(Some("  ")), 4).is_err());
    }

    #[tokio::test]
    async fn test_answer_uses_batch_prompt() {
        let backend = Arc::new(RecordingBackend::default());
        let client = GenerationClient::new(backend.clone(), profile(Some("app-1")), 4).unwrap();

        assert_eq!(client.answer("q", &["ctx".into()]).await.unwrap(), "answer");
        let (app, prompt) = backend.prompts.lock()[0].clone();
        assert_eq!(app, "app-1");
        assert!(prompt.starts_with("batch"));
    }

    #[tokio::test]
    async fn test_answer_stream_yields_deltas() {
        let backend = Arc::new(RecordingBackend::default());
        let client = GenerationClient::new(backend.clone(), profile(Some("app-1")), 4).unwrap();

        let mut rx = client.answer_stream("q", &[]).await.unwrap();
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("he".into()),
                StreamEvent::Delta("llo".into()),
                StreamEvent::Finished
            ]
        );
        assert!(backend.prompts.lock()[0].1.starts_with("stream"));
    }
}
