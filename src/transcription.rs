use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::error::VidharaError;
use crate::poll::PollPolicy;
use crate::tasks::TaskBoard;
use crate::transcribe::TranscriptionClient;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<String, VidharaError>;
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, audio_url: &str) -> Result<String, VidharaError> {
        TranscriptionClient::transcribe(self, audio_url).await
    }
}

/// `None` when no speech-to-text token is configured.
pub fn create_transcriber(config: &Config) -> Option<Arc<dyn Transcriber>> {
    let token = config.replicate_api_token.clone()?;
    let mut client = TranscriptionClient::new(token).with_poll_policy(PollPolicy::new(
        Duration::from_secs(config.transcription_poll_interval_secs),
        config.transcription_max_attempts,
    ));
    if let Some(base) = &config.replicate_base_url {
        client = client.with_base_url(base.clone());
    }
    if let Some(version) = &config.replicate_model_version {
        client = client.with_version(version.clone());
    }
    Some(Arc::new(client))
}

#[derive(Debug)]
pub struct TranscriptionOutcome {
    /// `None` when the task record could not be created.
    pub task_id: Option<String>,
    pub result: Result<String, VidharaError>,
}

/// Transcribes `audio_url` under a fresh task on `board`. The board holds
/// the terminal state by the time this returns.
pub async fn transcribe_audio(
    board: &TaskBoard,
    transcriber: &dyn Transcriber,
    audio_url: &str,
) -> TranscriptionOutcome {
    let (task_id, result) = board
        .run(|task_id| async move {
            info!(task_id = %task_id, "Starting transcription");
            transcriber.transcribe(audio_url).await
        })
        .await;
    TranscriptionOutcome { task_id, result }
}


#[cfg(test)]
mod tests {
    use super::testing::FixedTranscriber;
    use super::*;
    use crate::status_store::MemoryStatusStore;
    use crate::tasks::TRANSCRIPTION_TASK_NAMESPACE;
    use crate::types::TaskRecord;

    fn board() -> TaskBoard {
        TaskBoard::new(
            Arc::new(MemoryStatusStore::new()),
            TRANSCRIPTION_TASK_NAMESPACE,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_success_completes_task() {
        let board = board();
        let outcome =
            transcribe_audio(&board, &FixedTranscriber(Ok("hello".into())), "https://a.mp3").await;
        assert_eq!(outcome.result.unwrap(), "hello");
        assert_eq!(
            board.get(outcome.task_id.as_deref().unwrap()).await.unwrap(),
            Some(TaskRecord::Completed("hello".into()))
        );
    }

    #[tokio::test]
    async fn test_provider_failure_marks_failed_without_result() {
        let board = board();
        let outcome = transcribe_audio(
            &board,
            &FixedTranscriber(Err("Transcription failed".into())),
            "https://a.mp3",
        )
        .await;
        assert!(outcome.result.is_err());
        let record = board.get(outcome.task_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(record, TaskRecord::Failed);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({"status": "failed", "result": null})
        );
    }

    #[test]
    fn test_create_transcriber_requires_token() {
        assert!(create_transcriber(&crate::config::test_config()).is_none());
        let config = Config {
            replicate_api_token: Some("r8".into()),
            ..crate::config::test_config()
        };
        assert!(create_transcriber(&config).is_some());
    }
}
