//! Circular-conversation binding and the chat exchange built on it.
//!
//! Activating a circular runs the [`Bootstrapper`], which guarantees the
//! circular has exactly one linked conversation (creating and linking one
//! lazily). The resolved conversation is handed to a [`ChatSession`] that
//! owns all message exchange until the view is deactivated. The
//! [`CircularView`] ties both together with bookmark reconciliation for a
//! rendering layer.

pub mod bookmark;
pub mod bootstrap;
pub mod catalog;
pub mod error;
pub mod session;
pub mod view;

pub use bookmark::{BookmarkList, BookmarkReconciler};
pub use bootstrap::{Bootstrap, BootstrapState, Bootstrapper};
pub use catalog::{all_tags, CircularFilter};
pub use error::ChatError;
pub use session::{CallToken, ChatSession};
pub use view::{CircularView, DocumentState, Readiness};
