//! Bookmark reconciliation.
//!
//! The displayed bookmark flag only ever changes to a value the backend has
//! acknowledged: the write goes out first, the local copy follows on success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use circulars_core::{Circular, CircularQuery};
use circulars_store::ConversationStore;

use crate::error::ChatError;

/// Acknowledged bookmark flag of one loaded circular.
pub struct BookmarkReconciler {
    store: Arc<dyn ConversationStore>,
    circular_id: String,
    bookmark: AtomicBool,
    /// Held across a write so overlapping toggles flip from acknowledged state.
    write: Mutex<()>,
}

impl BookmarkReconciler {
    pub fn new(store: Arc<dyn ConversationStore>, circular: &Circular) -> Self {
        Self {
            store,
            circular_id: circular.circular_id.clone(),
            bookmark: AtomicBool::new(circular.bookmark),
            write: Mutex::new(()),
        }
    }

    pub fn circular_id(&self) -> &str {
        &self.circular_id
    }

    /// Last acknowledged value.
    pub fn current(&self) -> bool {
        self.bookmark.load(Ordering::Acquire)
    }

    /// Adopt a value acknowledged through another reconciler for the same circular.
    pub(crate) fn reflect(&self, bookmark: bool) {
        self.bookmark.store(bookmark, Ordering::Release);
    }

    /// Flip the flag remotely, then locally. Returns the new value.
    ///
    /// On failure the displayed value is left as it was.
    pub async fn toggle(&self) -> Result<bool, ChatError> {
        let _guard = self.write.lock().await;
        let target = !self.current();

        if let Err(e) = self.store.set_bookmark(&self.circular_id, target).await {
            tracing::warn!(
                circular_id = %self.circular_id,
                bookmark = target,
                error = %e,
                "Bookmark update rejected"
            );
            return Err(e.into());
        }

        self.bookmark.store(target, Ordering::Release);
        tracing::debug!(circular_id = %self.circular_id, bookmark = target, "Bookmark updated");
        Ok(target)
    }
}

impl std::fmt::Debug for BookmarkReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookmarkReconciler")
            .field("circular_id", &self.circular_id)
            .field("bookmark", &self.current())
            .finish()
    }
}

/// The bookmarked circulars, as shown on a bookmarks page.
pub struct BookmarkList {
    store: Arc<dyn ConversationStore>,
    entries: Vec<Circular>,
}

impl BookmarkList {
    /// Fetch every bookmarked circular.
    pub async fn load(store: Arc<dyn ConversationStore>) -> Result<Self, ChatError> {
        let entries = store.list_circulars(CircularQuery::Bookmarked).await?;
        tracing::debug!(count = entries.len(), "Bookmarks loaded");
        Ok(Self { store, entries })
    }

    pub fn entries(&self) -> &[Circular] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear the bookmark on `circular_id` and drop it from the list once
    /// the backend acknowledges. Unknown identifiers are a no-op.
    pub async fn remove(&mut self, circular_id: &str) -> Result<(), ChatError> {
        if !self.entries.iter().any(|c| c.circular_id == circular_id) {
            return Ok(());
        }

        if let Err(e) = self.store.set_bookmark(circular_id, false).await {
            tracing::warn!(circular_id = %circular_id, error = %e, "Bookmark removal rejected");
            return Err(e.into());
        }

        self.entries.retain(|c| c.circular_id != circular_id);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
