//! Conversation bootstrap: make sure an activated circular has a linked,
//! loaded conversation.
//!
//! Lifecycle of one activation:
//! - Idle -> LoadingCircular
//! - LoadingCircular -> ConversationPresent | ConversationAbsent | Failed
//! - ConversationPresent -> LoadingConversation
//! - ConversationAbsent -> Creating
//! - Creating -> Linking | Failed
//! - Linking -> LoadingConversation (also when the link write fails)
//! - LoadingConversation -> Ready | Failed
//!
//! The backend has no create-if-absent operation. Two activations racing on
//! the same unlinked circular can both create a conversation, and the later
//! link write wins. A failed link leaves the new conversation orphaned and the
//! next activation creates another one.

use std::fmt;
use std::sync::Arc;

use circulars_core::{CircularRecord, Conversation};
use circulars_store::ConversationStore;

use crate::error::ChatError;

/// Step of a single bootstrap run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapState {
    Idle,
    LoadingCircular,
    ConversationPresent,
    ConversationAbsent,
    Creating,
    Linking,
    LoadingConversation,
    Ready,
    Failed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Idle => "Idle",
            BootstrapState::LoadingCircular => "LoadingCircular",
            BootstrapState::ConversationPresent => "ConversationPresent",
            BootstrapState::ConversationAbsent => "ConversationAbsent",
            BootstrapState::Creating => "Creating",
            BootstrapState::Linking => "Linking",
            BootstrapState::LoadingConversation => "LoadingConversation",
            BootstrapState::Ready => "Ready",
            BootstrapState::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

impl BootstrapState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &BootstrapState) -> bool {
        use BootstrapState::*;
        matches!(
            (self, target),
            (Idle, LoadingCircular)
                | (LoadingCircular, ConversationPresent)
                | (LoadingCircular, ConversationAbsent)
                | (LoadingCircular, Failed)
                | (ConversationPresent, LoadingConversation)
                | (ConversationAbsent, Creating)
                | (Creating, Linking)
                | (Creating, Failed)
                | (Linking, LoadingConversation)
                | (LoadingConversation, Ready)
                | (LoadingConversation, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapState::Ready | BootstrapState::Failed)
    }
}

/// Validated walk through [`BootstrapState`]s, remembering every step.
#[derive(Debug)]
struct Progress {
    state: BootstrapState,
    trail: Vec<BootstrapState>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: BootstrapState::Idle,
            trail: vec![BootstrapState::Idle],
        }
    }

    fn advance(&mut self, target: BootstrapState) -> Result<(), ChatError> {
        if !self.state.can_transition_to(&target) {
            return Err(ChatError::InvalidTransition(self.state, target));
        }
        tracing::debug!("Bootstrap state: {} -> {}", self.state, target);
        self.state = target;
        self.trail.push(target);
        Ok(())
    }
}

/// Outcome of a bootstrap run whose circular loaded.
///
/// The document is always available here; `chat` carries whether the chat
/// capability came up.
#[derive(Debug)]
pub struct Bootstrap {
    pub record: CircularRecord,
    pub chat: Result<Conversation, ChatError>,
    /// Identifier of the conversation this run created, if any.
    pub created: Option<String>,
    /// Set when a created conversation could not be linked back.
    pub link_error: Option<ChatError>,
    /// Every state visited, starting at `Idle`.
    pub trail: Vec<BootstrapState>,
}

impl Bootstrap {
    pub fn final_state(&self) -> BootstrapState {
        self.trail.last().copied().unwrap_or(BootstrapState::Idle)
    }
}

/// Runs the lazy create-and-link sequence for one circular activation.
#[derive(Clone)]
pub struct Bootstrapper {
    store: Arc<dyn ConversationStore>,
}

impl Bootstrapper {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Load `circular_id` and resolve its conversation, creating and linking
    /// one when the circular has none.
    ///
    /// Returns `Err` only when the circular itself could not be loaded.
    /// Failures further along degrade the chat capability and are reported
    /// in [`Bootstrap::chat`].
    pub async fn run(&self, circular_id: &str) -> Result<Bootstrap, ChatError> {
        let mut progress = Progress::new();

        progress.advance(BootstrapState::LoadingCircular)?;
        let mut record = match self.store.get_circular(circular_id).await {
            Ok(record) => record,
            Err(e) => {
                progress.advance(BootstrapState::Failed)?;
                tracing::warn!(circular_id = %circular_id, error = %e, "Circular load failed");
                return Err(e.into());
            }
        };

        let mut created = None;
        let mut link_error = None;

        let conversation_id = match record.circular.conversation_id.clone() {
            Some(existing) => {
                progress.advance(BootstrapState::ConversationPresent)?;
                existing
            }
            None => {
                progress.advance(BootstrapState::ConversationAbsent)?;
                progress.advance(BootstrapState::Creating)?;
                let new_id = match self.store.create_conversation().await {
                    Ok(id) => id,
                    Err(e) => {
                        progress.advance(BootstrapState::Failed)?;
                        tracing::warn!(
                            circular_id = %circular_id,
                            error = %e,
                            "Conversation creation failed, chat unavailable"
                        );
                        return Ok(Bootstrap {
                            record,
                            chat: Err(e.into()),
                            created: None,
                            link_error: None,
                            trail: progress.trail,
                        });
                    }
                };
                tracing::info!(
                    circular_id = %circular_id,
                    conversation_id = %new_id,
                    "Conversation created"
                );

                progress.advance(BootstrapState::Linking)?;
                match self.store.link_conversation(circular_id, &new_id).await {
                    Ok(()) => {
                        tracing::info!(
                            circular_id = %circular_id,
                            conversation_id = %new_id,
                            "Conversation linked"
                        );
                        record.circular.conversation_id = Some(new_id.clone());
                    }
                    Err(e) => {
                        tracing::warn!(
                            circular_id = %circular_id,
                            conversation_id = %new_id,
                            error = %e,
                            "Conversation link failed; next activation will create again"
                        );
                        link_error = Some(e.into());
                    }
                }
                created = Some(new_id.clone());
                new_id
            }
        };

        progress.advance(BootstrapState::LoadingConversation)?;
        let chat = match self.store.get_conversation(&conversation_id).await {
            Ok(conversation) => {
                progress.advance(BootstrapState::Ready)?;
                Ok(conversation)
            }
            Err(e) => {
                progress.advance(BootstrapState::Failed)?;
                tracing::warn!(
                    circular_id = %circular_id,
                    conversation_id = %conversation_id,
                    error = %e,
                    "Conversation load failed, chat unavailable"
                );
                Err(e.into())
            }
        };

        Ok(Bootstrap {
            record,
            chat,
            created,
            link_error,
            trail: progress.trail,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use circulars_core::{Circular, ErrorKind};
    use circulars_store::{InMemoryStore, Operation};

    use super::BootstrapState::*;

    fn circular(id: &str, conversation_id: Option<&str>) -> Circular {
        Circular {
            circular_id: id.to_string(),
            title: format!("Circular {}", id),
            tags: vec!["kyc".to_string()],
            date: "2023-04-12".to_string(),
            url: format!("https://example.org/{}.pdf", id),
            bookmark: false,
            references: vec![],
            conversation_id: conversation_id.map(str::to_string),
        }
    }

    fn conversation(id: &str) -> Conversation {
        let now = Utc::now();
        Conversation {
            conversation_id: id.to_string(),
            created_at: now,
            last_updated: now,
            history: vec![],
        }
    }

    fn setup(circulars: Vec<Circular>) -> (Arc<InMemoryStore>, Bootstrapper) {
        let store = Arc::new(InMemoryStore::with_circulars(circulars));
        let bootstrapper = Bootstrapper::new(store.clone());
        (store, bootstrapper)
    }

    // ---- Transitions ----

    #[test]
    fn test_valid_transitions() {
        assert!(Idle.can_transition_to(&LoadingCircular));
        assert!(LoadingCircular.can_transition_to(&ConversationPresent));
        assert!(LoadingCircular.can_transition_to(&ConversationAbsent));
        assert!(ConversationPresent.can_transition_to(&LoadingConversation));
        assert!(ConversationAbsent.can_transition_to(&Creating));
        assert!(Creating.can_transition_to(&Linking));
        assert!(Linking.can_transition_to(&LoadingConversation));
        assert!(LoadingConversation.can_transition_to(&Ready));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!Idle.can_transition_to(&Ready));
        assert!(!ConversationPresent.can_transition_to(&Creating));
        assert!(!ConversationAbsent.can_transition_to(&LoadingConversation));
        assert!(!Linking.can_transition_to(&Failed));
        assert!(!Ready.can_transition_to(&Idle));
        assert!(!Failed.can_transition_to(&LoadingCircular));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let all = [
            Idle,
            LoadingCircular,
            ConversationPresent,
            ConversationAbsent,
            Creating,
            Linking,
            LoadingConversation,
            Ready,
            Failed,
        ];
        for terminal in [Ready, Failed] {
            assert!(terminal.is_terminal());
            for to in &all {
                assert!(!terminal.can_transition_to(to));
            }
        }
        assert!(!Linking.is_terminal());
    }

    #[test]
    fn test_progress_rejects_skips() {
        let mut progress = Progress::new();
        let err = progress.advance(Ready).unwrap_err();
        assert!(matches!(err, ChatError::InvalidTransition(Idle, Ready)));
        assert_eq!(progress.state, Idle);
    }

    // ---- Absent conversation ----

    #[tokio::test]
    async fn test_absent_conversation_is_created_linked_and_loaded() {
        let (store, bootstrapper) = setup(vec![circular("DPSS.2023.01", None)]);
        store.queue_conversation_ids(["conv-9f1"]);

        let boot = bootstrapper.run("DPSS.2023.01").await.unwrap();

        let conversation = boot.chat.as_ref().unwrap();
        assert_eq!(conversation.conversation_id, "conv-9f1");
        assert!(conversation.history.is_empty());
        assert_eq!(boot.created.as_deref(), Some("conv-9f1"));
        assert!(boot.link_error.is_none());
        assert_eq!(
            boot.record.circular.conversation_id.as_deref(),
            Some("conv-9f1")
        );
        assert_eq!(
            boot.trail,
            vec![
                Idle,
                LoadingCircular,
                ConversationAbsent,
                Creating,
                Linking,
                LoadingConversation,
                Ready
            ]
        );

        assert_eq!(store.calls().create_conversation, 1);
        assert_eq!(
            store.circular("DPSS.2023.01").unwrap().conversation_id.as_deref(),
            Some("conv-9f1")
        );
    }

    // ---- Present conversation ----

    #[tokio::test]
    async fn test_present_conversation_never_creates() {
        let (store, bootstrapper) = setup(vec![circular("A", Some("conv-a"))]);
        store.insert_conversation(conversation("conv-a"));

        let boot = bootstrapper.run("A").await.unwrap();
        assert_eq!(boot.chat.unwrap().conversation_id, "conv-a");
        assert!(boot.created.is_none());
        assert_eq!(
            boot.trail,
            vec![Idle, LoadingCircular, ConversationPresent, LoadingConversation, Ready]
        );
        assert_eq!(store.calls().create_conversation, 0);
        assert_eq!(store.calls().update_circular, 0);
    }

    #[tokio::test]
    async fn test_rerun_on_linked_circular_is_pure_read() {
        let (store, bootstrapper) = setup(vec![circular("A", None)]);

        bootstrapper.run("A").await.unwrap();
        let after_first = store.calls();
        assert_eq!(after_first.mutating(), 2);

        let second = bootstrapper.run("A").await.unwrap();
        assert!(second.chat.is_ok());
        assert!(second.created.is_none());
        assert_eq!(store.calls().mutating(), after_first.mutating());
        assert_eq!(store.created_conversations().len(), 1);
    }

    // ---- Failures ----

    #[tokio::test]
    async fn test_missing_circular_fails_without_chat_calls() {
        let (store, bootstrapper) = setup(vec![]);
        let err = bootstrapper.run("RBI.0000").await.unwrap_err();
        assert!(err.is_not_found());
        let calls = store.calls();
        assert_eq!(calls.create_conversation, 0);
        assert_eq!(calls.get_conversation, 0);
    }

    #[tokio::test]
    async fn test_create_failure_degrades_chat_only() {
        let (store, bootstrapper) = setup(vec![circular("A", None)]);
        store.fail(Operation::CreateConversation, ErrorKind::Transport);

        let boot = bootstrapper.run("A").await.unwrap();
        assert_eq!(boot.record.circular.circular_id, "A");
        assert_eq!(boot.final_state(), Failed);
        assert_eq!(boot.chat.as_ref().unwrap_err().kind(), ErrorKind::Transport);
        assert_eq!(store.calls().update_circular, 0);
        assert_eq!(store.calls().get_conversation, 0);
    }

    #[tokio::test]
    async fn test_link_failure_keeps_chat_and_recreates_next_time() {
        let (store, bootstrapper) = setup(vec![circular("A", None)]);
        store.fail(Operation::UpdateCircular, ErrorKind::Transport);

        let first = bootstrapper.run("A").await.unwrap();
        assert!(first.chat.is_ok());
        assert!(first.link_error.is_some());
        assert!(first.record.circular.conversation_id.is_none());
        assert_eq!(first.final_state(), Ready);
        assert!(store.circular("A").unwrap().conversation_id.is_none());

        store.recover(Operation::UpdateCircular);
        let second = bootstrapper.run("A").await.unwrap();
        assert!(second.link_error.is_none());
        assert_eq!(store.calls().create_conversation, 2);
        assert_eq!(store.created_conversations().len(), 2);
        assert_eq!(
            store.circular("A").unwrap().conversation_id,
            second.created
        );
    }

    #[tokio::test]
    async fn test_conversation_load_failure_degrades_chat_only() {
        let (store, bootstrapper) = setup(vec![circular("A", Some("conv-gone"))]);

        let boot = bootstrapper.run("A").await.unwrap();
        assert!(boot.chat.unwrap_err().is_not_found());
        assert_eq!(
            boot.trail,
            vec![Idle, LoadingCircular, ConversationPresent, LoadingConversation, Failed]
        );
        assert_eq!(store.calls().create_conversation, 0);
    }

    #[tokio::test]
    async fn test_transport_failure_on_circular_load() {
        let (store, bootstrapper) = setup(vec![circular("A", None)]);
        store.fail(Operation::GetCircular, ErrorKind::Timeout);
        let err = bootstrapper.run("A").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
