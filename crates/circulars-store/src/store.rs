//! The remote operations the front end depends on.

use async_trait::async_trait;

use circulars_core::{
    Answer, Circular, CircularPatch, CircularQuery, CircularRecord, Conversation, Result,
};

/// Request/response access to circulars and their conversations.
///
/// Implementations perform exactly one remote call per method and never
/// retry. `get_circular` and `get_conversation` report a missing record as
/// `CircularsError::NotFound`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a circular and the circulars it references.
    async fn get_circular(&self, circular_id: &str) -> Result<CircularRecord>;

    /// List a slice of the catalog.
    async fn list_circulars(&self, query: CircularQuery) -> Result<Vec<Circular>>;

    /// Apply a partial update. Only the fields present in `patch` change.
    async fn update_circular(&self, patch: &CircularPatch) -> Result<()>;

    /// Create an empty conversation and return its identifier.
    async fn create_conversation(&self) -> Result<String>;

    /// Load a conversation with its full history.
    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation>;

    /// Ask a question within a conversation.
    async fn post_question(&self, conversation_id: &str, question: &str) -> Result<Answer>;

    /// Write the conversation identifier back onto the circular.
    async fn link_conversation(&self, circular_id: &str, conversation_id: &str) -> Result<()> {
        self.update_circular(&CircularPatch::link(circular_id, conversation_id))
            .await
    }

    /// Set the circular's bookmark flag.
    async fn set_bookmark(&self, circular_id: &str, bookmark: bool) -> Result<()> {
        self.update_circular(&CircularPatch::bookmark(circular_id, bookmark))
            .await
    }
}
