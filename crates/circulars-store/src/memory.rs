//! In-process [`ConversationStore`] with call accounting and fault injection.
//!
//! Behaves like the backend for the operations the front end uses, records
//! how often each operation was called, can be told to fail any operation,
//! and can hold individual calls back until the test releases them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use circulars_core::{
    Answer, Circular, CircularPatch, CircularQuery, CircularRecord, CircularsError, Conversation,
    ErrorKind, Message, Result,
};

use crate::store::ConversationStore;

/// A store operation, for counting calls and injecting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetCircular,
    ListCirculars,
    UpdateCircular,
    CreateConversation,
    GetConversation,
    PostQuestion,
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_circular: usize,
    pub list_circulars: usize,
    pub update_circular: usize,
    pub create_conversation: usize,
    pub get_conversation: usize,
    pub post_question: usize,
}

impl CallCounts {
    /// Calls that change backend state (question answering excluded).
    pub fn mutating(&self) -> usize {
        self.update_circular + self.create_conversation
    }
}

#[derive(Default)]
struct Inner {
    circulars: BTreeMap<String, Circular>,
    conversations: HashMap<String, Conversation>,
    conversation_ids: Vec<String>,
    queued_ids: VecDeque<String>,
    next_conversation: u64,
    answers: HashMap<String, Answer>,
    gates: HashMap<(Operation, String), oneshot::Receiver<()>>,
    failures: HashMap<Operation, ErrorKind>,
    calls: CallCounts,
}

/// Scriptable in-memory backend.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with the given circulars.
    pub fn with_circulars(circulars: impl IntoIterator<Item = Circular>) -> Self {
        let store = Self::new();
        for circular in circulars {
            store.insert_circular(circular);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_circular(&self, circular: Circular) {
        self.lock()
            .circulars
            .insert(circular.circular_id.clone(), circular);
    }

    pub fn insert_conversation(&self, conversation: Conversation) {
        self.lock()
            .conversations
            .insert(conversation.conversation_id.clone(), conversation);
    }

    /// Current backend copy of a circular.
    pub fn circular(&self, circular_id: &str) -> Option<Circular> {
        self.lock().circulars.get(circular_id).cloned()
    }

    /// Current backend copy of a conversation.
    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.lock().conversations.get(conversation_id).cloned()
    }

    /// Identifiers handed out by `create_conversation`, in creation order.
    pub fn created_conversations(&self) -> Vec<String> {
        self.lock().conversation_ids.clone()
    }

    /// Use these identifiers, in order, for the next conversations created.
    pub fn queue_conversation_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .queued_ids
            .extend(ids.into_iter().map(Into::into));
    }

    /// Reply to `question` with `answer` instead of the generated default.
    pub fn set_answer(&self, question: &str, answer: Answer) {
        self.lock().answers.insert(question.to_string(), answer);
    }

    /// Hold the next call to `op` for `key` until the returned sender fires
    /// (or is dropped). Gated calls are counted on entry but only touch
    /// backend state once released.
    ///
    /// Keys: the circular id for `GetCircular` and `UpdateCircular`, the
    /// conversation id for `GetConversation`, the question text for
    /// `PostQuestion`. Other operations are never gated.
    pub fn gate(&self, op: Operation, key: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().gates.insert((op, key.to_string()), rx);
        tx
    }

    /// Hold the answer to `question` until the returned sender fires (or is dropped).
    pub fn gate_answer(&self, question: &str) -> oneshot::Sender<()> {
        self.gate(Operation::PostQuestion, question)
    }

    /// Make every call to `op` fail with an error of `kind` until [`recover`](Self::recover).
    pub fn fail(&self, op: Operation, kind: ErrorKind) {
        self.lock().failures.insert(op, kind);
    }

    pub fn recover(&self, op: Operation) {
        self.lock().failures.remove(&op);
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Count the call and return the injected failure, if any.
    fn enter(&self, op: Operation) -> Result<()> {
        let mut inner = self.lock();
        let calls = &mut inner.calls;
        match op {
            Operation::GetCircular => calls.get_circular += 1,
            Operation::ListCirculars => calls.list_circulars += 1,
            Operation::UpdateCircular => calls.update_circular += 1,
            Operation::CreateConversation => calls.create_conversation += 1,
            Operation::GetConversation => calls.get_conversation += 1,
            Operation::PostQuestion => calls.post_question += 1,
        }
        match inner.failures.get(&op) {
            Some(kind) => Err(injected(op, *kind)),
            None => Ok(()),
        }
    }

    /// Wait on the gate for `(op, key)`, if one is set, then re-check the
    /// injected failure for `op`.
    async fn pass_gate(&self, op: Operation, key: &str) -> Result<()> {
        let gate = self.lock().gates.remove(&(op, key.to_string()));
        let Some(gate) = gate else {
            return Ok(());
        };
        let _ = gate.await;
        match self.lock().failures.get(&op) {
            Some(kind) => Err(injected(op, *kind)),
            None => Ok(()),
        }
    }
}

fn injected(op: Operation, kind: ErrorKind) -> CircularsError {
    let detail = format!("{:?}: injected failure", op);
    match kind {
        ErrorKind::NotFound => CircularsError::NotFound(detail),
        ErrorKind::Timeout => CircularsError::Timeout(detail),
        ErrorKind::Validation => CircularsError::Validation(detail),
        ErrorKind::Transport | ErrorKind::Local => CircularsError::Transport(detail),
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_circular(&self, circular_id: &str) -> Result<CircularRecord> {
        self.enter(Operation::GetCircular)?;
        self.pass_gate(Operation::GetCircular, circular_id).await?;
        let inner = self.lock();
        let circular = inner
            .circulars
            .get(circular_id)
            .cloned()
            .ok_or_else(|| CircularsError::NotFound(format!("circular {}", circular_id)))?;
        let references = circular
            .references
            .iter()
            .filter_map(|id| inner.circulars.get(id).cloned())
            .collect();
        Ok(CircularRecord {
            circular,
            references,
        })
    }

    async fn list_circulars(&self, query: CircularQuery) -> Result<Vec<Circular>> {
        query.validate()?;
        self.enter(Operation::ListCirculars)?;
        let inner = self.lock();
        let matches = inner.circulars.values().filter(|c| match query {
            CircularQuery::All => true,
            CircularQuery::Bookmarked => c.bookmark,
            CircularQuery::Published { year, month } => {
                c.date.starts_with(&format!("{:04}-{:02}", year, month))
            }
        });
        Ok(matches.cloned().collect())
    }

    async fn update_circular(&self, patch: &CircularPatch) -> Result<()> {
        self.enter(Operation::UpdateCircular)?;
        self.pass_gate(Operation::UpdateCircular, &patch.circular_id)
            .await?;
        let mut inner = self.lock();
        let circular = inner
            .circulars
            .get_mut(&patch.circular_id)
            .ok_or_else(|| CircularsError::NotFound(format!("circular {}", patch.circular_id)))?;
        if let Some(bookmark) = patch.bookmark {
            circular.bookmark = bookmark;
        }
        if let Some(ref conversation_id) = patch.conversation_id {
            circular.conversation_id = Some(conversation_id.clone());
        }
        Ok(())
    }

    async fn create_conversation(&self) -> Result<String> {
        self.enter(Operation::CreateConversation)?;
        let mut inner = self.lock();
        let id = match inner.queued_ids.pop_front() {
            Some(id) => id,
            None => {
                inner.next_conversation += 1;
                format!("conv-{}", inner.next_conversation)
            }
        };
        let now = Utc::now();
        inner.conversations.insert(
            id.clone(),
            Conversation {
                conversation_id: id.clone(),
                created_at: now,
                last_updated: now,
                history: Vec::new(),
            },
        );
        inner.conversation_ids.push(id.clone());
        Ok(id)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.enter(Operation::GetConversation)?;
        self.pass_gate(Operation::GetConversation, conversation_id)
            .await?;
        self.lock()
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| CircularsError::NotFound(format!("conversation {}", conversation_id)))
    }

    async fn post_question(&self, conversation_id: &str, question: &str) -> Result<Answer> {
        self.enter(Operation::PostQuestion)?;
        self.pass_gate(Operation::PostQuestion, question).await?;

        let mut inner = self.lock();
        let answer = inner
            .answers
            .get(question)
            .cloned()
            .unwrap_or_else(|| Answer {
                answer: format!("Answer to: {}", question),
                sources: Vec::new(),
            });
        if let Some(conversation) = inner.conversations.get_mut(conversation_id) {
            let now = Utc::now();
            conversation
                .history
                .push(Message::resolved(question, answer.clone(), now));
            conversation.last_updated = now;
        }
        Ok(answer)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("InMemoryStore")
            .field("circulars", &inner.circulars.len())
            .field("conversations", &inner.conversations.len())
            .field("calls", &inner.calls)
            .finish()
    }
}
