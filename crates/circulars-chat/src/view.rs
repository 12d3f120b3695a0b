//! Per-view facade handed to a rendering layer.
//!
//! A [`CircularView`] shows at most one circular at a time. Activating a
//! circular bumps the view's generation and closes the previous chat
//! session, so results that arrive for an earlier activation are dropped
//! instead of landing on the circular now shown.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use circulars_core::{Circular, ErrorKind, Message};
use circulars_store::ConversationStore;

use crate::bookmark::BookmarkReconciler;
use crate::bootstrap::Bootstrapper;
use crate::error::ChatError;
use crate::session::ChatSession;

/// Load state of the document itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Idle,
    Loading,
    Loaded,
    NotFound,
    Failed(ErrorKind),
}

/// Whether the chat capability is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Idle,
    Loading,
    Ready,
    Failed,
}

struct Loaded {
    circular: Circular,
    references: Vec<Circular>,
    bookmark: Arc<BookmarkReconciler>,
    session: Arc<ChatSession>,
}

struct ViewState {
    generation: u64,
    circular_id: Option<String>,
    document: DocumentState,
    readiness: Readiness,
    loaded: Option<Loaded>,
    /// Bookmark acknowledged for `circular_id` while it was still loading.
    late_bookmark: Option<bool>,
}

impl ViewState {
    fn close_session(&mut self) {
        if let Some(ref loaded) = self.loaded {
            loaded.session.close();
        }
    }
}

pub struct CircularView {
    store: Arc<dyn ConversationStore>,
    bootstrapper: Bootstrapper,
    state: Mutex<ViewState>,
}

impl CircularView {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            bootstrapper: Bootstrapper::new(Arc::clone(&store)),
            store,
            state: Mutex::new(ViewState {
                generation: 0,
                circular_id: None,
                document: DocumentState::Idle,
                readiness: Readiness::Idle,
                loaded: None,
                late_bookmark: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Show `circular_id`: load it and bring up its chat.
    ///
    /// Returns `Err` when the circular could not be loaded, or
    /// [`ChatError::Deactivated`] when another activation superseded this
    /// one before it finished. A chat bootstrap failure is not an error
    /// here; it shows up as [`Readiness::Failed`].
    pub async fn activate(&self, circular_id: &str) -> Result<(), ChatError> {
        let generation = {
            let mut state = self.lock();
            state.close_session();
            state.generation += 1;
            state.circular_id = Some(circular_id.to_string());
            state.document = DocumentState::Loading;
            state.readiness = Readiness::Loading;
            state.loaded = None;
            state.late_bookmark = None;
            state.generation
        };
        tracing::debug!(circular_id = %circular_id, generation, "Activating circular");

        let outcome = self.bootstrapper.run(circular_id).await;

        let mut state = self.lock();
        if state.generation != generation {
            tracing::warn!(
                circular_id = %circular_id,
                generation,
                current = state.generation,
                "Dropping stale activation"
            );
            return Err(ChatError::Deactivated);
        }

        let bootstrap = match outcome {
            Ok(bootstrap) => bootstrap,
            Err(e) => {
                state.document = if e.is_not_found() {
                    DocumentState::NotFound
                } else {
                    DocumentState::Failed(e.kind())
                };
                state.readiness = Readiness::Failed;
                return Err(e);
            }
        };

        let circular = bootstrap.record.circular;
        let bookmark = Arc::new(BookmarkReconciler::new(Arc::clone(&self.store), &circular));
        if let Some(acknowledged) = state.late_bookmark.take() {
            bookmark.reflect(acknowledged);
        }
        let (session, readiness) = match bootstrap.chat {
            Ok(conversation) => (
                ChatSession::new(Arc::clone(&self.store), circular_id, conversation),
                Readiness::Ready,
            ),
            Err(_) => (
                ChatSession::unavailable(Arc::clone(&self.store), circular_id),
                Readiness::Failed,
            ),
        };

        state.document = DocumentState::Loaded;
        state.readiness = readiness;
        state.loaded = Some(Loaded {
            circular,
            references: bootstrap.record.references,
            bookmark,
            session: Arc::new(session),
        });
        Ok(())
    }

    /// Navigate to a referenced circular. Same as activating it.
    pub async fn follow_reference(&self, circular_id: &str) -> Result<(), ChatError> {
        self.activate(circular_id).await
    }

    /// Stop showing anything. In-flight results are dropped.
    pub fn deactivate(&self) {
        let mut state = self.lock();
        state.close_session();
        state.generation += 1;
        state.circular_id = None;
        state.document = DocumentState::Idle;
        state.readiness = Readiness::Idle;
        state.loaded = None;
        state.late_bookmark = None;
    }

    pub fn circular_id(&self) -> Option<String> {
        self.lock().circular_id.clone()
    }

    pub fn document_state(&self) -> DocumentState {
        self.lock().document
    }

    pub fn readiness(&self) -> Readiness {
        self.lock().readiness
    }

    /// The loaded circular, with its bookmark flag as last acknowledged.
    pub fn circular(&self) -> Option<Circular> {
        self.lock().loaded.as_ref().map(|loaded| {
            let mut circular = loaded.circular.clone();
            circular.bookmark = loaded.bookmark.current();
            circular
        })
    }

    pub fn bookmark(&self) -> Option<bool> {
        self.lock().loaded.as_ref().map(|l| l.bookmark.current())
    }

    pub fn references(&self) -> Vec<Circular> {
        self.lock()
            .loaded
            .as_ref()
            .map(|l| l.references.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.session().map(|s| s.messages()).unwrap_or_default()
    }

    /// Questions awaiting an answer.
    pub fn pending(&self) -> Vec<String> {
        self.session().map(|s| s.pending()).unwrap_or_default()
    }

    fn session(&self) -> Option<Arc<ChatSession>> {
        self.lock().loaded.as_ref().map(|l| Arc::clone(&l.session))
    }

    /// Ask a question in the current circular's conversation.
    pub async fn submit(&self, question: &str) -> Result<Message, ChatError> {
        let Some(session) = self.session() else {
            return Err(ChatError::NotReady);
        };
        session.submit(question).await
    }

    /// Toggle the current circular's bookmark. Returns the acknowledged value.
    ///
    /// If the same circular was re-activated while the write was in flight,
    /// the acknowledged value is carried over to the new activation.
    pub async fn toggle_bookmark(&self) -> Result<bool, ChatError> {
        let (generation, bookmark) = {
            let state = self.lock();
            let loaded = state.loaded.as_ref().ok_or(ChatError::NoCircular)?;
            (state.generation, Arc::clone(&loaded.bookmark))
        };
        let acknowledged = bookmark.toggle().await?;

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.generation != generation
            && state.circular_id.as_deref() == Some(bookmark.circular_id())
        {
            match state.loaded {
                Some(ref loaded) => loaded.bookmark.reflect(acknowledged),
                None => state.late_bookmark = Some(acknowledged),
            }
            tracing::debug!(
                circular_id = %bookmark.circular_id(),
                bookmark = acknowledged,
                "Bookmark carried over to re-activated view"
            );
        }
        Ok(acknowledged)
    }
}

impl std::fmt::Debug for CircularView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CircularView")
            .field("generation", &state.generation)
            .field("circular_id", &state.circular_id)
            .field("document", &state.document)
            .field("readiness", &state.readiness)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
