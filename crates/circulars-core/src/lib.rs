//! Shared model for the circulars front end.
//!
//! Holds the circular/conversation records exchanged with the backend,
//! the error taxonomy every layer reports through, and TOML configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendConfig, CircularsConfig, GeneralConfig};
pub use error::{CircularsError, ErrorKind, Result};
pub use types::*;
