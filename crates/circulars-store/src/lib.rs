//! I/O boundary to the circulars backend.
//!
//! [`ConversationStore`] is the set of remote operations the front end
//! needs. [`HttpConversationStore`] speaks the backend's JSON API and
//! [`InMemoryStore`] is a scriptable stand-in used by tests and demos.
//! Neither retries: failures are returned to the caller as-is.

pub mod http;
pub mod memory;
pub mod store;

pub use http::HttpConversationStore;
pub use memory::{CallCounts, InMemoryStore, Operation};
pub use store::ConversationStore;
