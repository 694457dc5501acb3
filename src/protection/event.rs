//! Canonical moderation events
//!
//! Gateway payloads are normalized into this closed tagged union at the
//! ingestion boundary. Malformed or partial payloads (missing before
//! snapshots, DM voice states) are rejected there instead of being
//! defaulted-around deep in the evaluators. Events are immutable once built.

use chrono::{DateTime, Utc};
use serenity::model::Permissions;

/// Snapshot of a role at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub role_id: u64,
    pub name: String,
    pub position: u16,
    pub permissions: Permissions,
}

/// A normalized administrative event with before/after state where the
/// gateway provides it
#[derive(Debug, Clone)]
pub enum ModerationEvent {
    RoleChanged {
        guild_id: u64,
        before: RoleSnapshot,
        after: RoleSnapshot,
    },
    RoleDeleted {
        guild_id: u64,
        role_id: u64,
    },
    ChannelDeleted {
        guild_id: u64,
        channel_id: u64,
    },
    MemberJoined {
        guild_id: u64,
        user_id: u64,
        is_bot: bool,
        account_created_at: DateTime<Utc>,
    },
    MemberBanned {
        guild_id: u64,
        user_id: u64,
    },
    MemberTimeoutChanged {
        guild_id: u64,
        user_id: u64,
        timeout_until: Option<DateTime<Utc>>,
    },
    MemberRolesChanged {
        guild_id: u64,
        user_id: u64,
        added: Vec<u64>,
        removed: Vec<u64>,
    },
    VoiceParticipantLeft {
        guild_id: u64,
        user_id: u64,
    },
    VoiceMuteToggled {
        guild_id: u64,
        user_id: u64,
        muted: bool,
        deafened: bool,
    },
}

impl ModerationEvent {
    /// Guild the event happened in
    #[must_use]
    pub fn guild_id(&self) -> u64 {
        match self {
            Self::RoleChanged { guild_id, .. }
            | Self::RoleDeleted { guild_id, .. }
            | Self::ChannelDeleted { guild_id, .. }
            | Self::MemberJoined { guild_id, .. }
            | Self::MemberBanned { guild_id, .. }
            | Self::MemberTimeoutChanged { guild_id, .. }
            | Self::MemberRolesChanged { guild_id, .. }
            | Self::VoiceParticipantLeft { guild_id, .. }
            | Self::VoiceMuteToggled { guild_id, .. } => *guild_id,
        }
    }

    /// The entity the event changed, used for suppression marking. Deletions
    /// have no surviving entity to suppress.
    #[must_use]
    pub fn subject_id(&self) -> Option<u64> {
        match self {
            Self::RoleChanged { after, .. } => Some(after.role_id),
            Self::RoleDeleted { .. } | Self::ChannelDeleted { .. } => None,
            Self::MemberJoined { user_id, .. }
            | Self::MemberBanned { user_id, .. }
            | Self::MemberTimeoutChanged { user_id, .. }
            | Self::MemberRolesChanged { user_id, .. }
            | Self::VoiceParticipantLeft { user_id, .. }
            | Self::VoiceMuteToggled { user_id, .. } => Some(*user_id),
        }
    }

    /// Short kind name for logging
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::RoleChanged { .. } => "role_changed",
            Self::RoleDeleted { .. } => "role_deleted",
            Self::ChannelDeleted { .. } => "channel_deleted",
            Self::MemberJoined { .. } => "member_joined",
            Self::MemberBanned { .. } => "member_banned",
            Self::MemberTimeoutChanged { .. } => "member_timeout_changed",
            Self::MemberRolesChanged { .. } => "member_roles_changed",
            Self::VoiceParticipantLeft { .. } => "voice_participant_left",
            Self::VoiceMuteToggled { .. } => "voice_mute_toggled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id_per_kind() {
        let event = ModerationEvent::RoleChanged {
            guild_id: 1,
            before: RoleSnapshot {
                role_id: 42,
                name: "mods".to_string(),
                position: 5,
                permissions: Permissions::empty(),
            },
            after: RoleSnapshot {
                role_id: 42,
                name: "mods".to_string(),
                position: 5,
                permissions: Permissions::ADMINISTRATOR,
            },
        };
        assert_eq!(event.subject_id(), Some(42));
        assert_eq!(event.guild_id(), 1);

        let event = ModerationEvent::ChannelDeleted {
            guild_id: 1,
            channel_id: 7,
        };
        assert_eq!(event.subject_id(), None);

        let event = ModerationEvent::MemberBanned {
            guild_id: 1,
            user_id: 9,
        };
        assert_eq!(event.subject_id(), Some(9));
        assert_eq!(event.kind_name(), "member_banned");
    }
}
