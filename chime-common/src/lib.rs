//! # Chime Common Library
//!
//! Shared code for the Chime playback sync client:
//! - Wire message types (`ServerMessage`, `ClientCommand`)
//! - Common error type
//! - Timestamp utilities
//! - Display formatting helpers

pub mod error;
pub mod format;
pub mod messages;
pub mod time;

pub use error::{Error, Result};
pub use messages::{ClientCommand, RepeatMode, ServerMessage, ServerState, ShuffleMode};
