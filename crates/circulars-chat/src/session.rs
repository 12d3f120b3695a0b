//! Chat session controller for the active circular.
//!
//! Owns the in-memory copy of the bound conversation. Each submission is
//! its own future, tagged with a [`CallToken`]; its answer is applied when
//! that future completes, so concurrent questions land in completion order.
//! Nothing is shown for a question until its answer arrives.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use circulars_core::{Conversation, Message};
use circulars_store::ConversationStore;

use crate::error::ChatError;

/// Identifies one in-flight submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallToken(u64);

impl fmt::Display for CallToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

#[derive(Default)]
struct SessionState {
    conversation: Option<Conversation>,
    draft: String,
    next_token: u64,
    in_flight: BTreeMap<CallToken, String>,
}

/// Question/answer exchange over one circular's conversation.
///
/// Shared between the view and any number of in-flight submissions. The
/// internal lock is never held across a remote call.
pub struct ChatSession {
    store: Arc<dyn ConversationStore>,
    circular_id: String,
    state: Mutex<SessionState>,
    active: AtomicBool,
}

impl ChatSession {
    /// Bind a loaded conversation.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        circular_id: impl Into<String>,
        conversation: Conversation,
    ) -> Self {
        Self::with_conversation(store, circular_id.into(), Some(conversation))
    }

    /// A session whose bootstrap did not produce a conversation. Every
    /// submission is refused with [`ChatError::NotReady`].
    pub fn unavailable(store: Arc<dyn ConversationStore>, circular_id: impl Into<String>) -> Self {
        Self::with_conversation(store, circular_id.into(), None)
    }

    fn with_conversation(
        store: Arc<dyn ConversationStore>,
        circular_id: String,
        conversation: Option<Conversation>,
    ) -> Self {
        Self {
            store,
            circular_id,
            state: Mutex::new(SessionState {
                conversation,
                ..SessionState::default()
            }),
            active: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn circular_id(&self) -> &str {
        &self.circular_id
    }

    pub fn is_ready(&self) -> bool {
        self.is_active() && self.lock().conversation.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop applying results. Completions that arrive afterwards are dropped.
    pub fn close(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let pending = self.lock().in_flight.len();
            tracing::debug!(
                circular_id = %self.circular_id,
                pending,
                "Chat session closed"
            );
        }
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.lock()
            .conversation
            .as_ref()
            .map(|c| c.conversation_id.clone())
    }

    pub fn conversation(&self) -> Option<Conversation> {
        self.lock().conversation.clone()
    }

    /// Resolved messages in history order.
    pub fn messages(&self) -> Vec<Message> {
        self.lock()
            .conversation
            .as_ref()
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }

    /// Questions sent but not yet answered, oldest first.
    pub fn pending(&self) -> Vec<String> {
        self.lock().in_flight.values().cloned().collect()
    }

    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.lock().draft = text.into();
    }

    /// Submit the current draft.
    pub async fn submit_draft(&self) -> Result<Message, ChatError> {
        let draft = self.draft();
        self.submit(&draft).await
    }

    /// Ask `question` and append the resolved message to history.
    ///
    /// Empty or whitespace-only questions, and sessions without a ready
    /// conversation, are refused before any remote call and change nothing.
    /// Otherwise the draft is cleared immediately if it holds this question;
    /// a draft with other text is kept. On failure the history is left
    /// untouched and the question is not re-queued.
    pub async fn submit(&self, question: &str) -> Result<Message, ChatError> {
        if question.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (token, conversation_id) = {
            let mut state = self.lock();
            if !self.is_active() {
                return Err(ChatError::Deactivated);
            }
            let conversation_id = match state.conversation {
                Some(ref conversation) => conversation.conversation_id.clone(),
                None => return Err(ChatError::NotReady),
            };
            if state.draft == question {
                state.draft.clear();
            }
            state.next_token += 1;
            let token = CallToken(state.next_token);
            state.in_flight.insert(token, question.to_string());
            (token, conversation_id)
        };

        tracing::debug!(
            circular_id = %self.circular_id,
            conversation_id = %conversation_id,
            token = %token,
            "Question submitted"
        );
        let result = self.store.post_question(&conversation_id, question).await;

        let mut state = self.lock();
        state.in_flight.remove(&token);

        if !self.is_active() {
            tracing::warn!(
                circular_id = %self.circular_id,
                token = %token,
                "Dropping answer for deactivated session"
            );
            return Err(ChatError::Deactivated);
        }

        let answer = match result {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(
                    circular_id = %self.circular_id,
                    token = %token,
                    error = %e,
                    "Question failed"
                );
                return Err(e.into());
            }
        };

        let Some(conversation) = state.conversation.as_mut() else {
            return Err(ChatError::NotReady);
        };

        // Stamped at append time so history stays ordered even when answers
        // complete out of submission order.
        let mut now = Utc::now();
        if let Some(last) = conversation.history.last() {
            if last.timestamp > now {
                now = last.timestamp;
            }
        }
        let message = Message::resolved(question, answer, now);
        conversation.history.push(message.clone());
        conversation.last_updated = now;

        tracing::debug!(
            conversation_id = %conversation.conversation_id,
            token = %token,
            history_len = conversation.history.len(),
            "Answer appended"
        );
        Ok(message)
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ChatSession")
            .field("circular_id", &self.circular_id)
            .field(
                "conversation_id",
                &state.conversation.as_ref().map(|c| &c.conversation_id),
            )
            .field("in_flight", &state.in_flight.len())
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use circulars_core::{Answer, ErrorKind};
    use circulars_store::{InMemoryStore, Operation};

    fn setup() -> (Arc<InMemoryStore>, ChatSession) {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let conversation = Conversation {
            conversation_id: "conv-9f1".to_string(),
            created_at: now,
            last_updated: now,
            history: vec![],
        };
        store.insert_conversation(conversation.clone());
        let session = ChatSession::new(store.clone(), "DPSS.2023.01", conversation);
        (store, session)
    }

    // ---- Validation ----

    #[tokio::test]
    async fn test_empty_and_whitespace_are_refused_without_calls() {
        let (store, session) = setup();
        session.set_draft("   ");
        assert!(matches!(
            session.submit("").await.unwrap_err(),
            ChatError::EmptyMessage
        ));
        assert!(matches!(
            session.submit(" \n\t ").await.unwrap_err(),
            ChatError::EmptyMessage
        ));
        assert_eq!(store.calls().post_question, 0);
        assert_eq!(session.draft(), "   ");
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_session_refuses() {
        let store = Arc::new(InMemoryStore::new());
        let session = ChatSession::unavailable(store.clone(), "A");
        assert!(!session.is_ready());
        let err = session.submit("hello").await.unwrap_err();
        assert!(matches!(err, ChatError::NotReady));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.calls().post_question, 0);
    }

    // ---- Happy path ----

    #[tokio::test]
    async fn test_submit_appends_resolved_message() {
        let (store, session) = setup();
        store.set_answer(
            "What is the KYC threshold?",
            Answer {
                answer: "₹50,000".to_string(),
                sources: vec!["Annex B".to_string()],
            },
        );
        let before = session.conversation().unwrap().last_updated;

        let message = session.submit("What is the KYC threshold?").await.unwrap();

        let history = session.messages();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], message);
        assert_eq!(message.question, "What is the KYC threshold?");
        assert_eq!(message.answer, "₹50,000");
        assert_eq!(message.sources, vec!["Annex B"]);
        let conversation = session.conversation().unwrap();
        assert_eq!(conversation.last_updated, message.timestamp);
        assert!(conversation.last_updated >= before);
    }

    #[tokio::test]
    async fn test_submit_draft_clears_input_before_answer() {
        let (store, session) = setup();
        let release = store.gate_answer("Who issued this?");
        session.set_draft("Who issued this?");

        let (result, _) = tokio::join!(session.submit_draft(), async {
            tokio::task::yield_now().await;
            assert_eq!(session.draft(), "");
            assert_eq!(session.pending(), vec!["Who issued this?"]);
            assert!(session.messages().is_empty());
            release.send(()).unwrap();
        });

        assert!(result.is_ok());
        assert!(session.pending().is_empty());
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_submit_keeps_unrelated_draft() {
        let (store, session) = setup();
        session.set_draft("half-typed follow-up");

        session.submit("Who issued this?").await.unwrap();
        assert_eq!(session.draft(), "half-typed follow-up");
        assert_eq!(session.messages().len(), 1);

        session.set_draft("Who issued this?");
        session.submit("Who issued this?").await.unwrap();
        assert_eq!(session.draft(), "");
        assert_eq!(store.calls().post_question, 2);
    }

    // ---- Failure ----

    #[tokio::test]
    async fn test_failure_leaves_history_and_does_not_requeue() {
        let (store, session) = setup();
        session.submit("first").await.unwrap();
        store.fail(Operation::PostQuestion, ErrorKind::Timeout);

        session.set_draft("second");
        let err = session.submit_draft().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.draft(), "");
        assert!(session.pending().is_empty());
        assert_eq!(store.calls().post_question, 2);
    }

    // ---- Ordering ----

    #[tokio::test]
    async fn test_out_of_order_completion_appends_in_completion_order() {
        let (store, session) = setup();
        let release_a = store.gate_answer("A");
        let release_b = store.gate_answer("B");

        let (a, b, _) = tokio::join!(session.submit("A"), session.submit("B"), async {
            release_b.send(()).unwrap();
            while session.messages().is_empty() {
                tokio::task::yield_now().await;
            }
            release_a.send(()).unwrap();
        });

        assert!(a.is_ok());
        assert!(b.is_ok());
        let questions: Vec<String> = session.messages().into_iter().map(|m| m.question).collect();
        assert_eq!(questions, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_n_concurrent_submissions_give_n_answered_messages() {
        let (_, session) = setup();
        let questions: Vec<String> = (0..8).map(|i| format!("question {}", i)).collect();
        let calls = questions.iter().map(|q| session.submit(q));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        let history = session.messages();
        assert_eq!(history.len(), 8);
        assert!(history.iter().all(|m| !m.answer.is_empty()));
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    // ---- Cancellation ----

    #[tokio::test]
    async fn test_completion_after_close_is_dropped() {
        let (store, session) = setup();
        let release = store.gate_answer("late");

        let (result, _) = tokio::join!(session.submit("late"), async {
            tokio::task::yield_now().await;
            session.close();
            release.send(()).unwrap();
        });

        assert!(matches!(result.unwrap_err(), ChatError::Deactivated));
        assert!(session.messages().is_empty());
        assert!(!session.is_ready());
        assert!(matches!(
            session.submit("again").await.unwrap_err(),
            ChatError::Deactivated
        ));
    }
}
