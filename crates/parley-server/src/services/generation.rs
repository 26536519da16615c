//! Deferred reply generation.
//!
//! A send submits a [`GenerationJob`] to the [`GenerationQueue`]; the worker
//! spawns one task per job. Each job is a single attempt: resolve the model,
//! stream the vendor reply into the placeholder, record the outcome.

use std::sync::Weak;
use std::time::Instant;

use parley_core::{ApiKey, ChatError, LogType, Message, MessageRole};
use parley_llm::{ProviderRequest, UnifiedLlmClient, DEFAULT_MAX_TOKENS};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db;
use crate::dto::{GenerationStatus, MessageEvent};
use crate::services::accumulator::{Accumulator, Outcome};
use crate::services::{audit, StorageExt};
use crate::ServerState;

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Everything a worker needs to produce one assistant reply.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub chat_id: String,
    /// The assistant placeholder to fill.
    pub message_id: String,
    pub user_id: String,
    /// Vendor model identifier.
    pub model_id: String,
    /// Held in memory for this job only.
    pub credential: ApiKey,
}

/// Submission side of the generation queue.
#[derive(Debug, Clone)]
pub struct GenerationQueue {
    tx: mpsc::UnboundedSender<GenerationJob>,
}

impl GenerationQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GenerationJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn submit(&self, job: GenerationJob) -> Result<(), ChatError> {
        self.tx.send(job).map_err(|_| ChatError::QueueClosed)
    }
}

/// Runs queued jobs until the state is dropped or the queue closes.
pub fn spawn_worker(state: Weak<ServerState>, mut jobs: mpsc::UnboundedReceiver<GenerationJob>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Generation worker started");
        while let Some(job) = jobs.recv().await {
            let Some(state) = state.upgrade() else {
                break;
            };
            tokio::spawn(async move {
                run_job(&state, job).await;
            });
        }
        info!("Generation worker stopped");
    })
}

/// Resolves the client and builds the vendor request for `job`.
///
/// History ends just before the target placeholder, so turns sent after it
/// never leak into its prompt.
fn prepare(state: &ServerState, job: &GenerationJob) -> Result<(UnifiedLlmClient, ProviderRequest), ChatError> {
    let (history, descriptor) = {
        let conn = state.db_lock()?;
        db::get_chat(&conn, &job.chat_id)
            .storage()?
            .ok_or_else(|| ChatError::ChatNotFound(job.chat_id.clone()))?;
        let history: Vec<Message> = db::list_messages(&conn, &job.chat_id)
            .storage()?
            .into_iter()
            .take_while(|m| m.id != job.message_id)
            .filter(|m| !m.content.is_empty())
            .map(|m| match m.role {
                MessageRole::User => Message::user(m.content),
                MessageRole::Assistant => Message::assistant(m.content),
            })
            .collect();
        let descriptor = db::find_active_model(&conn, &job.model_id).storage()?;
        (history, descriptor)
    };

    if history.is_empty() {
        return Err(ChatError::EmptyConversation);
    }
    if descriptor.is_none() {
        warn!("No active model descriptor for {}, using defaults", job.model_id);
    }

    let client = UnifiedLlmClient::new(&job.model_id, &state.config.endpoints);
    let request = ProviderRequest::new(&job.model_id, history)
        .with_max_tokens(descriptor.as_ref().and_then(|d| d.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS))
        .with_temperature(descriptor.as_ref().and_then(|d| d.temperature).unwrap_or(DEFAULT_TEMPERATURE));
    Ok((client, request))
}

/// Runs one job to completion; never retries.
pub async fn run_job(state: &ServerState, job: GenerationJob) -> Outcome {
    let start = Instant::now();
    let accumulator = Accumulator::new(state, &job.chat_id, &job.message_id);

    let outcome = match prepare(state, &job) {
        Err(e) => accumulator.fail(String::new(), e),
        Ok((client, request)) => {
            info!(
                "Generating reply {} (provider: {}, model: {}, turns: {})",
                job.message_id,
                client.provider(),
                client.model(),
                request.messages.len()
            );
            match client.stream(&job.credential, request).await {
                Ok(fragments) => accumulator.consume(fragments).await,
                Err(e) => accumulator.fail(String::new(), e),
            }
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = match &outcome {
        Outcome::Completed { text } => {
            info!("Reply {} completed: {} bytes in {} ms", job.message_id, text.len(), elapsed_ms);
            GenerationStatus::Completed
        }
        Outcome::Failed { partial, error: err } => {
            error!("Reply {} failed after {} bytes: {}", job.message_id, partial.len(), err);
            record_failure(state, &job, err, elapsed_ms);
            GenerationStatus::Failed
        }
    };

    state.publish(MessageEvent::Finished {
        chat_id: job.chat_id.clone(),
        message_id: job.message_id.clone(),
        status,
    });
    outcome
}

/// Writes the failure to the error log under the job's user.
///
/// The entry carries only the fixed notice and the vendor status; the vendor
/// message itself stays in the server's tracing output.
fn record_failure(state: &ServerState, job: &GenerationJob, err: &ChatError, elapsed_ms: u64) {
    let provider = parley_llm::router::resolve(&job.model_id);
    let vendor_status = match err {
        ChatError::Api { status, .. } => Some(*status),
        _ => None,
    };
    let details = json!({
        "action": "generation_failed",
        "chat_id": job.chat_id,
        "message_id": job.message_id,
        "model_id": job.model_id,
        "provider": provider.tag(),
        "error": err.user_notice(),
        "vendor_status": vendor_status,
        "elapsed_ms": elapsed_ms,
    });
    let written = state
        .db_lock()
        .and_then(|conn| audit::record(&conn, LogType::Error, Some(&job.user_id), details));
    if let Err(e) = written {
        error!("Failed to write error log for reply {}: {}", job.message_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LogFilter;
    use crate::test_support::{follow_up, message_content, test_state_with_endpoints, user_turn};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(chat_id: &str, message_id: &str, model_id: &str, key: &str) -> GenerationJob {
        GenerationJob {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            user_id: "alice".into(),
            model_id: model_id.into(),
            credential: ApiKey::new(key),
        }
    }

    fn error_logs(state: &ServerState) -> Vec<parley_core::LogEntry> {
        let conn = state.db_lock().unwrap();
        let filter = LogFilter { log_type: Some(LogType::Error), limit: 10, ..Default::default() };
        db::list_logs(&conn, &filter).unwrap()
    }

    #[tokio::test]
    async fn streams_openai_reply_into_placeholder() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi \"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"there\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4",
                "max_tokens": 1024,
                "messages": [{ "role": "user", "content": "Hello" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let (state, _jobs) = test_state_with_endpoints(&server.uri());
        let (chat_id, message_id) = user_turn(&state, "gpt-4", "Hello");

        let outcome = run_job(&state, job(&chat_id, &message_id, "gpt-4", "sk-test")).await;
        assert!(outcome.is_completed());
        assert_eq!(message_content(&state, &message_id), "Hi there");
        assert!(error_logs(&state).is_empty());
    }

    #[tokio::test]
    async fn vendor_401_writes_fixed_notice_and_error_log() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "type": "error",
                "error": { "type": "authentication_error", "message": "invalid x-api-key" }
            })))
            .mount(&server)
            .await;

        let (state, _jobs) = test_state_with_endpoints(&server.uri());
        let (chat_id, message_id) = user_turn(&state, "claude-3-sonnet", "Hello");

        let outcome = run_job(&state, job(&chat_id, &message_id, "claude-3-sonnet", "bad-key")).await;
        assert!(matches!(outcome, Outcome::Failed { error: ChatError::Api { status: 401, .. }, .. }));

        let content = message_content(&state, &message_id);
        assert!(content.ends_with("Error: Failed to connect to the AI service. Please check your API key and try again."));
        assert!(!content.contains("invalid x-api-key"));

        let logs = error_logs(&state);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].user_id.as_deref(), Some("alice"));
        assert_eq!(logs[0].details["provider"], "anthropic");
        assert_eq!(logs[0].details["vendor_status"], 401);
        assert!(!logs[0].details.to_string().contains("bad-key"));
        assert!(!logs[0].details.to_string().contains("invalid x-api-key"));
    }

    #[tokio::test]
    async fn blank_credential_never_reaches_the_vendor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (state, _jobs) = test_state_with_endpoints(&server.uri());
        let (chat_id, message_id) = user_turn(&state, "gemini-pro", "Hello");

        let outcome = run_job(&state, job(&chat_id, &message_id, "gemini-pro", " ")).await;
        assert!(matches!(outcome, Outcome::Failed { error: ChatError::MissingCredential(_), .. }));
        assert_eq!(
            message_content(&state, &message_id),
            "Error: API key not configured. Please provide an API key for this model."
        );
    }

    #[tokio::test]
    async fn descriptor_settings_shape_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({ "model": "o3-mini", "max_completion_tokens": 4096 })))
            .respond_with(ResponseTemplate::new(200).set_body_raw("data: [DONE]\n\n", "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let (state, _jobs) = test_state_with_endpoints(&server.uri());
        {
            let conn = state.db_lock().unwrap();
            let mut model = db::find_active_model(&conn, "o3-mini").unwrap().unwrap();
            model.max_tokens = Some(4096);
            db::save_model(&conn, &model).unwrap();
        }
        let (chat_id, message_id) = user_turn(&state, "o3-mini", "Plan my week");

        let outcome = run_job(&state, job(&chat_id, &message_id, "o3-mini", "sk-test")).await;
        assert!(matches!(outcome, Outcome::Completed { ref text } if text.is_empty()));
    }

    #[tokio::test]
    async fn later_turns_stay_out_of_an_earlier_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/phi-2"))
            .and(body_partial_json(json!({ "inputs": "first" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "generated_text": "one" }])))
            .expect(1)
            .mount(&server)
            .await;

        let (state, _jobs) = test_state_with_endpoints(&server.uri());
        let (chat_id, first_reply) = user_turn(&state, "phi-2", "first");
        follow_up(&state, &chat_id, "second");

        let outcome = run_job(&state, job(&chat_id, &first_reply, "phi-2", "hf")).await;
        assert!(outcome.is_completed());
        assert_eq!(message_content(&state, &first_reply), "one");
    }

    #[tokio::test]
    async fn finished_event_follows_the_last_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/phi-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "generated_text": "42" }])))
            .mount(&server)
            .await;

        let (state, _jobs) = test_state_with_endpoints(&server.uri());
        let (chat_id, message_id) = user_turn(&state, "phi-2", "Answer?");
        let mut feed = state.events.subscribe();

        run_job(&state, job(&chat_id, &message_id, "phi-2", "hf")).await;

        assert!(matches!(feed.try_recv(), Ok(MessageEvent::Appended { ref fragment, .. }) if fragment == "42"));
        assert!(matches!(
            feed.try_recv(),
            Ok(MessageEvent::Finished { status: GenerationStatus::Completed, .. })
        ));
    }
}
