//! Error types for the sanction system

use thiserror::Error;

/// Errors that can occur during sanction operations
#[derive(Debug, Error)]
pub enum SanctionError {
    /// Invalid state transition attempted
    #[error("Invalid state transition")]
    InvalidStateTransition,

    /// Sanction record not found
    #[error("Sanction not found: {0}")]
    NotFound(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// Guild has no mute role configured for chat mutes
    #[error("No mute role configured for guild {0}")]
    NoMuteRole(u64),

    /// Failed to persist sanction records
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Generic error
    #[error("Sanction error: {0}")]
    Other(String),
}

impl From<serenity::Error> for SanctionError {
    fn from(error: serenity::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<String> for SanctionError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for sanction operations
pub type SanctionResult<T> = Result<T, SanctionError>;
