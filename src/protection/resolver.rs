//! Executor resolution via the Discord audit log
//!
//! Looks up who caused an administrative change. The audit log is eventually
//! consistent: a missing entry is a normal outcome, and callers still roll
//! back the change but skip punishment. The bot's own entries are always
//! filtered out so a rollback can never be attributed to the engine itself.

use crate::PROTECTION_TARGET;
use chrono::{DateTime, Duration, Utc};
use serenity::http::Http;
use serenity::model::guild::audit_log::{Action, ChannelAction, MemberAction, RoleAction};
use serenity::model::id::{GuildId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Audit-log entries older than this are ignored; the change we are
/// correlating just happened.
const LOOKBACK_SECONDS: i64 = 15;

/// How many recent entries to scan per lookup
const FETCH_LIMIT: u8 = 10;

/// Audit-trail event kinds the resolver understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditActionKind {
    RoleUpdate,
    RoleDelete,
    ChannelDelete,
    MemberBanAdd,
    MemberUpdate,
    MemberRoleUpdate,
    MemberDisconnect,
    BotAdd,
}

impl AuditActionKind {
    fn as_action(self) -> Action {
        match self {
            Self::RoleUpdate => Action::Role(RoleAction::Update),
            Self::RoleDelete => Action::Role(RoleAction::Delete),
            Self::ChannelDelete => Action::Channel(ChannelAction::Delete),
            Self::MemberBanAdd => Action::Member(MemberAction::BanAdd),
            Self::MemberUpdate => Action::Member(MemberAction::Update),
            Self::MemberRoleUpdate => Action::Member(MemberAction::RoleUpdate),
            Self::MemberDisconnect => Action::Member(MemberAction::MemberDisconnect),
            Self::BotAdd => Action::Member(MemberAction::BotAdd),
        }
    }

    /// Whether audit entries of this kind carry the changed entity's id.
    /// Disconnect entries only record a member count, never a target.
    fn has_target_id(self) -> bool {
        !matches!(self, Self::MemberDisconnect)
    }
}

/// Resolves the actor behind a change from the guild audit log
#[derive(Default)]
pub struct ExecutorResolver {
    /// The bot's own user id, set once the gateway session is ready
    self_id: AtomicU64,
}

impl ExecutorResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_self_id(&self, id: UserId) {
        self.self_id.store(id.get(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn self_id(&self) -> u64 {
        self.self_id.load(Ordering::Relaxed)
    }

    /// Find the most recent audit entry of `kind` targeting `target_id`.
    ///
    /// Returns `None` when no fresh matching entry exists, when the only
    /// match is the bot itself, or when the audit-log query fails. Query
    /// failures are logged and swallowed; absence must not abort rollback.
    pub async fn resolve(
        &self,
        http: &Http,
        guild_id: u64,
        kind: AuditActionKind,
        target_id: u64,
    ) -> Option<u64> {
        self.resolve_at(http, guild_id, kind, target_id, Utc::now())
            .await
    }

    pub async fn resolve_at(
        &self,
        http: &Http,
        guild_id: u64,
        kind: AuditActionKind,
        target_id: u64,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let logs = match GuildId::new(guild_id)
            .audit_logs(http, Some(kind.as_action()), None, None, Some(FETCH_LIMIT))
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!(
                    target: PROTECTION_TARGET,
                    guild_id = %guild_id,
                    kind = ?kind,
                    error = %e,
                    "Audit log query failed, executor unresolved"
                );
                return None;
            }
        };

        let cutoff = now - Duration::seconds(LOOKBACK_SECONDS);
        let self_id = self.self_id();

        for entry in &logs.entries {
            let created_at =
                DateTime::<Utc>::from_timestamp(entry.id.created_at().unix_timestamp(), 0)?;
            if created_at < cutoff {
                // Entries come newest first; everything past here is stale
                break;
            }
            if kind.has_target_id() && entry.target_id.map(|t| t.get()) != Some(target_id) {
                continue;
            }
            if entry.user_id.get() == self_id {
                // Never attribute the engine's own corrective writes
                continue;
            }
            debug!(
                target: PROTECTION_TARGET,
                guild_id = %guild_id,
                kind = ?kind,
                target_id = %target_id,
                actor_id = %entry.user_id,
                "Resolved executor from audit log"
            );
            return Some(entry.user_id.get());
        }

        debug!(
            target: PROTECTION_TARGET,
            guild_id = %guild_id,
            kind = ?kind,
            target_id = %target_id,
            "No fresh audit entry, executor unresolved"
        );
        None
    }
}
