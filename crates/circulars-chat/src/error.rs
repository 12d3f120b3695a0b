//! Error types for the chat layer.

use circulars_core::{CircularsError, ErrorKind};

use crate::bootstrap::BootstrapState;

/// Errors from bootstrapping, chatting and bookmarking.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("no conversation is ready for this circular")]
    NotReady,
    #[error("view was deactivated before the call completed")]
    Deactivated,
    #[error("no circular is loaded")]
    NoCircular,
    #[error("invalid bootstrap transition: {0} -> {1}")]
    InvalidTransition(BootstrapState, BootstrapState),
    #[error(transparent)]
    Store(#[from] CircularsError),
}

impl ChatError {
    /// Category of this error for the rendering layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::EmptyMessage | ChatError::NotReady | ChatError::NoCircular => {
                ErrorKind::Validation
            }
            ChatError::Deactivated | ChatError::InvalidTransition(..) => ErrorKind::Local,
            ChatError::Store(err) => err.kind(),
        }
    }

    /// True when the error is a missing circular or conversation.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::NotReady.to_string(),
            "no conversation is ready for this circular"
        );
        assert_eq!(
            ChatError::Deactivated.to_string(),
            "view was deactivated before the call completed"
        );
        assert_eq!(ChatError::NoCircular.to_string(), "no circular is loaded");
        assert_eq!(
            ChatError::InvalidTransition(BootstrapState::Idle, BootstrapState::Ready).to_string(),
            "invalid bootstrap transition: Idle -> Ready"
        );
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: ChatError = CircularsError::Timeout("post_question".to_string()).into();
        assert_eq!(err.to_string(), "Timed out: post_question");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_kind_for_local_errors() {
        assert_eq!(ChatError::EmptyMessage.kind(), ErrorKind::Validation);
        assert_eq!(ChatError::NotReady.kind(), ErrorKind::Validation);
        assert_eq!(ChatError::Deactivated.kind(), ErrorKind::Local);
    }

    #[test]
    fn test_is_not_found() {
        let err: ChatError = CircularsError::NotFound("circular X".to_string()).into();
        assert!(err.is_not_found());
        assert!(!ChatError::NotReady.is_not_found());
    }
}
