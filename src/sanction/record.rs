//! Sanction records and lifecycle
//!
//! A sanction is a time-bounded restriction on one member in one scope,
//! tracked as a durable record. Records move through
//! `Created -> Active -> {ManuallyEnded | Expired}` and are never deleted;
//! ended rows stay behind as audit history.

use crate::SANCTION_TARGET;
use crate::sanction::error::{SanctionError, SanctionResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// The restriction artifact a sanction controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SanctionScope {
    /// Server voice mute flag
    VoiceMute,
    /// Configured mute role withholding chat permissions
    ChatMute,
    /// Platform communication timeout
    Timeout,
}

impl std::fmt::Display for SanctionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VoiceMute => write!(f, "voice mute"),
            Self::ChatMute => write!(f, "chat mute"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Lifecycle state, derived from the ended fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionState {
    Active,
    Ended,
}

/// End reason recorded when a sanction leaves the active state
pub mod end_reason {
    pub const EXPIRED: &str = "expired";
    pub const RELEASED: &str = "released";
    pub const SUPERSEDED: &str = "superseded";
}

/// A durable timed-sanction record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sanction {
    /// Unique ID of this sanction
    pub id: String,
    pub guild_id: u64,
    /// The member under restriction
    pub subject_id: u64,
    pub scope: SanctionScope,
    /// Moderator (or the bot itself for automated enforcement)
    pub moderator_id: u64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// None means indefinite
    pub duration_seconds: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_reason: Option<String>,
    pub ended_by: Option<u64>,
}

impl Sanction {
    /// Create a new active sanction record
    pub fn new(
        guild_id: u64,
        subject_id: u64,
        scope: SanctionScope,
        moderator_id: u64,
        reason: impl Into<String>,
        duration_seconds: Option<u32>,
    ) -> Self {
        let now = Utc::now();
        let expires_at =
            duration_seconds.map(|secs| now + Duration::seconds(i64::from(secs)));

        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            subject_id,
            scope,
            moderator_id,
            reason: reason.into(),
            created_at: now,
            duration_seconds,
            expires_at,
            ended_at: None,
            ended_reason: None,
            ended_by: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SanctionState {
        if self.ended_at.is_some() {
            SanctionState::Ended
        } else {
            SanctionState::Active
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether this sanction should be swept at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|at| at <= now)
    }

    /// End this sanction. Both manual release and sweep expiry land here;
    /// ending an already ended record is an invalid transition.
    ///
    /// # Errors
    /// Returns an error if the record is not active.
    pub fn end(
        &mut self,
        reason: impl Into<String>,
        ended_by: Option<u64>,
        now: DateTime<Utc>,
    ) -> SanctionResult<()> {
        if self.ended_at.is_some() {
            return Err(SanctionError::InvalidStateTransition);
        }

        self.ended_at = Some(now);
        self.ended_reason = Some(reason.into());
        self.ended_by = ended_by;

        info!(
            target: SANCTION_TARGET,
            sanction_id = %self.id,
            subject_id = %self.subject_id,
            guild_id = %self.guild_id,
            scope = %self.scope,
            reason = ?self.ended_reason,
            "Sanction ended"
        );

        Ok(())
    }
}
