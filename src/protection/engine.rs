//! Enforcement engine
//!
//! Executes the corrective work a violation asks for: rolling the offending
//! change back and punishing the responsible actor. Every write is preceded
//! by a suppression mark so the platform's echo of our own correction is not
//! re-evaluated as a fresh violation. Failures are logged and surfaced but
//! never retried; they are almost always permission errors a retry cannot
//! fix.

use crate::PROTECTION_TARGET;
use crate::protection::evaluator::{ActorContext, Violation};
use crate::protection::event::ModerationEvent;
use crate::protection::policy::{ProtectionPolicy, PunishmentKind};
use crate::protection::suppression::{ROLLBACK_GRACE_SECONDS, SuppressionRegistry};
use serenity::builder::{EditMember, EditRole};
use serenity::http::Http;
use serenity::model::id::{GuildId, RoleId, UserId};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the engine actually managed to do for one violation
#[derive(Debug, Default)]
pub struct EnforcementOutcome {
    pub rolled_back: bool,
    pub punished: bool,
    /// Human-readable failure lines for the notification sink
    pub failures: Vec<String>,
}

pub struct EnforcementEngine {
    suppression: Arc<SuppressionRegistry>,
}

impl EnforcementEngine {
    #[must_use]
    pub fn new(suppression: Arc<SuppressionRegistry>) -> Self {
        Self { suppression }
    }

    /// Apply rollback and punishment for a violation.
    ///
    /// Rollback proceeds even when no actor was resolved; the punishment step
    /// is then skipped and logged. Failures of either half never abort the
    /// other.
    pub async fn apply(
        &self,
        http: &Http,
        event: &ModerationEvent,
        violation: &Violation,
        actor: Option<&ActorContext>,
        policy: &ProtectionPolicy,
    ) -> EnforcementOutcome {
        let mut outcome = EnforcementOutcome::default();

        if violation.rollback_permissions || violation.rollback_membership {
            self.rollback(http, event, policy, &mut outcome).await;
        }

        if !violation.category.punishes_actor() {
            return outcome;
        }

        match actor {
            Some(actor) if policy.is_exempt(actor.id, &actor.role_ids) => {
                info!(
                    target: PROTECTION_TARGET,
                    guild_id = %event.guild_id(),
                    actor_id = %actor.id,
                    category = %violation.category,
                    "Actor is whitelisted, skipping punishment"
                );
            }
            Some(actor) => {
                self.punish(http, event.guild_id(), actor.id, policy, &mut outcome)
                    .await;
            }
            None => {
                warn!(
                    target: PROTECTION_TARGET,
                    guild_id = %event.guild_id(),
                    category = %violation.category,
                    "Executor unresolved, rollback only"
                );
                outcome
                    .failures
                    .push("Executor unresolved, punishment skipped".to_string());
            }
        }

        outcome
    }

    /// Reassert the prior state of the changed entity
    async fn rollback(
        &self,
        http: &Http,
        event: &ModerationEvent,
        policy: &ProtectionPolicy,
        outcome: &mut EnforcementOutcome,
    ) {
        if let Some(entity) = event.subject_id() {
            self.suppression.mark(entity, ROLLBACK_GRACE_SECONDS);
        }

        let guild = GuildId::new(event.guild_id());
        let result = match event {
            ModerationEvent::RoleChanged { before, .. } => {
                guild
                    .edit_role(
                        http,
                        RoleId::new(before.role_id),
                        EditRole::new().permissions(before.permissions),
                    )
                    .await
                    .map(|_| ())
            }
            ModerationEvent::MemberBanned { user_id, .. } => {
                guild.unban(http, UserId::new(*user_id)).await
            }
            ModerationEvent::MemberTimeoutChanged { user_id, .. } => guild
                .edit_member(
                    http,
                    UserId::new(*user_id),
                    EditMember::new().enable_communication(),
                )
                .await
                .map(|_| ()),
            ModerationEvent::VoiceMuteToggled {
                user_id,
                muted,
                deafened,
                ..
            } => {
                // Only the restrictive direction is restorable; a mass unmute
                // leaves nothing to reassert.
                let mut edit = EditMember::new();
                if *muted {
                    edit = edit.mute(false);
                }
                if *deafened {
                    edit = edit.deafen(false);
                }
                if *muted || *deafened {
                    guild
                        .edit_member(http, UserId::new(*user_id), edit)
                        .await
                        .map(|_| ())
                } else {
                    Ok(())
                }
            }
            ModerationEvent::MemberJoined { user_id, .. } => {
                guild
                    .kick_with_reason(http, UserId::new(*user_id), "Admission policy violation")
                    .await
            }
            ModerationEvent::MemberRolesChanged { user_id, added, .. } => {
                self.strip_blocked_roles(http, guild, UserId::new(*user_id), added, policy)
                    .await
            }
            // Deletions and disconnects carry nothing restorable
            ModerationEvent::RoleDeleted { .. }
            | ModerationEvent::ChannelDeleted { .. }
            | ModerationEvent::VoiceParticipantLeft { .. } => Ok(()),
        };

        match result {
            Ok(()) => {
                outcome.rolled_back = true;
                info!(
                    target: PROTECTION_TARGET,
                    guild_id = %event.guild_id(),
                    event = %event.kind_name(),
                    "Rolled back offending change"
                );
            }
            Err(e) => {
                error!(
                    target: PROTECTION_TARGET,
                    guild_id = %event.guild_id(),
                    event = %event.kind_name(),
                    error = %e,
                    "Rollback failed"
                );
                outcome.failures.push(format!("Rollback failed: {e}"));
            }
        }
    }

    async fn strip_blocked_roles(
        &self,
        http: &Http,
        guild: GuildId,
        user_id: UserId,
        added: &[u64],
        policy: &ProtectionPolicy,
    ) -> serenity::Result<()> {
        let member = guild.member(http, user_id).await?;
        let keep: Vec<RoleId> = member
            .roles
            .iter()
            .copied()
            .filter(|r| !(added.contains(&r.get()) && policy.blocked_roles.contains(&r.get())))
            .collect();
        guild
            .edit_member(http, user_id, EditMember::new().roles(keep))
            .await
            .map(|_| ())
    }

    /// Apply the configured punishment to the responsible actor
    async fn punish(
        &self,
        http: &Http,
        guild_id: u64,
        actor_id: u64,
        policy: &ProtectionPolicy,
        outcome: &mut EnforcementOutcome,
    ) {
        self.suppression.mark(actor_id, ROLLBACK_GRACE_SECONDS);

        let guild = GuildId::new(guild_id);
        let user = UserId::new(actor_id);
        let result = match policy.punishment {
            PunishmentKind::StripPrivileges => guild
                .edit_member(http, user, EditMember::new().roles(Vec::<RoleId>::new()))
                .await
                .map(|_| ()),
            PunishmentKind::RemoveMembership => {
                guild
                    .kick_with_reason(http, user, "Protection policy violation")
                    .await
            }
        };

        match result {
            Ok(()) => {
                outcome.punished = true;
                info!(
                    target: PROTECTION_TARGET,
                    guild_id = %guild_id,
                    actor_id = %actor_id,
                    punishment = ?policy.punishment,
                    "Punished responsible actor"
                );
            }
            Err(e) => {
                error!(
                    target: PROTECTION_TARGET,
                    guild_id = %guild_id,
                    actor_id = %actor_id,
                    error = %e,
                    "Punishment failed"
                );
                outcome.failures.push(format!("Punishment failed: {e}"));
            }
        }
    }
}
