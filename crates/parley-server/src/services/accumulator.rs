//! Streaming accumulator: applies fragments to a persisted assistant message.
//!
//! Each fragment is one append statement under the connection lock, followed
//! by a [`MessageEvent::Appended`] on the change feed, so readers only ever
//! see whole fragments in receipt order.

use futures::StreamExt;
use parley_core::ChatError;
use parley_llm::FragmentStream;
use tracing::{debug, error};

use crate::db;
use crate::dto::MessageEvent;
use crate::services::StorageExt;
use crate::ServerState;

/// Separator between partial content and an appended error notice.
const NOTICE_SEPARATOR: &str = "\n\n";

/// How a generation ended.
#[derive(Debug)]
pub enum Outcome {
    Completed { text: String },
    /// `partial` is what was appended before `error` stopped the stream.
    Failed { partial: String, error: ChatError },
}

impl Outcome {
    #[cfg(test)]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

/// Writes fragments into one target message.
pub struct Accumulator<'a> {
    state: &'a ServerState,
    chat_id: &'a str,
    message_id: &'a str,
}

impl<'a> Accumulator<'a> {
    pub fn new(state: &'a ServerState, chat_id: &'a str, message_id: &'a str) -> Self {
        Self { state, chat_id, message_id }
    }

    /// Appends one fragment and publishes the change.
    ///
    /// Returns the new content length in bytes.
    pub fn append(&self, fragment: &str) -> Result<usize, ChatError> {
        let content_len = {
            let conn = self.state.db_lock()?;
            db::append_message_content(&conn, self.message_id, fragment)
                .storage()?
                .ok_or_else(|| ChatError::NotFound(format!("message {}", self.message_id)))?
        };
        debug!("Appended {} bytes to message {}", fragment.len(), self.message_id);
        self.state.publish(MessageEvent::Appended {
            chat_id: self.chat_id.to_string(),
            message_id: self.message_id.to_string(),
            fragment: fragment.to_string(),
            content_len,
        });
        Ok(content_len)
    }

    /// Drains `fragments` into the message; the first error ends the run.
    pub async fn consume(&self, mut fragments: FragmentStream) -> Outcome {
        let mut text = String::new();
        while let Some(item) = fragments.next().await {
            let appended = item.and_then(|fragment| self.append(&fragment).map(|_| fragment));
            match appended {
                Ok(fragment) => text.push_str(&fragment),
                Err(e) => return self.fail(text, e),
            }
        }
        Outcome::Completed { text }
    }

    /// Appends the user-facing notice for `error`, keeping `partial` in place.
    pub fn fail(&self, partial: String, error: ChatError) -> Outcome {
        let notice = match partial.is_empty() {
            true => error.user_notice().to_string(),
            false => format!("{NOTICE_SEPARATOR}{}", error.user_notice()),
        };
        if let Err(e) = self.append(&notice) {
            error!("Failed to write error notice to message {}: {}", self.message_id, e);
        }
        Outcome::Failed { partial, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{message_content as content, placeholder, test_state};
    use futures::stream;
    use parley_core::Provider;

    fn fragments(items: Vec<Result<&str, ChatError>>) -> FragmentStream {
        let items: Vec<Result<String, ChatError>> = items.into_iter().map(|i| i.map(String::from)).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn fragments_concatenate_in_order() {
        let (state, _jobs) = test_state();
        let (chat_id, message_id) = placeholder(&state);
        let mut feed = state.events.subscribe();

        let accumulator = Accumulator::new(&state, &chat_id, &message_id);
        let outcome = accumulator.consume(fragments(vec![Ok("Hel"), Ok("lo"), Ok(", world")])).await;

        assert!(matches!(outcome, Outcome::Completed { ref text } if text == "Hello, world"));
        assert_eq!(content(&state, &message_id), "Hello, world");

        let mut seen = Vec::new();
        while let Ok(MessageEvent::Appended { fragment, content_len, .. }) = feed.try_recv() {
            seen.push((fragment, content_len));
        }
        assert_eq!(
            seen,
            vec![("Hel".to_string(), 3), ("lo".to_string(), 5), (", world".to_string(), 12)]
        );
    }

    #[tokio::test]
    async fn replay_appends_again() {
        let (state, _jobs) = test_state();
        let (chat_id, message_id) = placeholder(&state);
        let accumulator = Accumulator::new(&state, &chat_id, &message_id);

        accumulator.consume(fragments(vec![Ok("a"), Ok("b")])).await;
        accumulator.consume(fragments(vec![Ok("a"), Ok("b")])).await;
        assert_eq!(content(&state, &message_id), "abab");
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_and_appends_notice() {
        let (state, _jobs) = test_state();
        let (chat_id, message_id) = placeholder(&state);
        let accumulator = Accumulator::new(&state, &chat_id, &message_id);

        let outcome = accumulator
            .consume(fragments(vec![
                Ok("The answer is"),
                Err(ChatError::Transport("connection reset".into())),
                Ok(" never seen"),
            ]))
            .await;

        match outcome {
            Outcome::Failed { partial, error } => {
                assert_eq!(partial, "The answer is");
                assert!(matches!(error, ChatError::Transport(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            content(&state, &message_id),
            "The answer is\n\nError: Failed to connect to the AI service. Please check your API key and try again."
        );
    }

    #[tokio::test]
    async fn failure_before_first_fragment_writes_notice_only() {
        let (state, _jobs) = test_state();
        let (chat_id, message_id) = placeholder(&state);
        let accumulator = Accumulator::new(&state, &chat_id, &message_id);

        let outcome = accumulator.fail(String::new(), ChatError::MissingCredential(Provider::Google));
        assert!(!outcome.is_completed());
        assert_eq!(
            content(&state, &message_id),
            "Error: API key not configured. Please provide an API key for this model."
        );
    }

    #[tokio::test]
    async fn missing_target_message_fails_the_run() {
        let (state, _jobs) = test_state();
        let accumulator = Accumulator::new(&state, "c", "does-not-exist");
        let outcome = accumulator.consume(fragments(vec![Ok("x")])).await;
        assert!(matches!(outcome, Outcome::Failed { error: ChatError::NotFound(_), .. }));
    }
}
