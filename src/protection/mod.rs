//! Abuse detection and enforcement
//!
//! The protection pipeline: normalized events arrive from the gateway
//! handlers, the executor is resolved from the audit log, the per-category
//! evaluators decide synchronously, and the engine rolls back and punishes.
//! Failures inside one event are isolated to that event.

pub mod engine;
pub mod evaluator;
pub mod event;
pub mod notify;
pub mod policy;
pub mod rate_window;
pub mod resolver;
pub mod suppression;

pub use evaluator::{ActorContext, Violation};
pub use event::{ModerationEvent, RoleSnapshot};
pub use policy::{ProtectionCategory, ProtectionPolicy, PunishmentKind, RateThreshold};
pub use rate_window::RateWindow;
pub use resolver::{AuditActionKind, ExecutorResolver};
pub use suppression::SuppressionRegistry;

use crate::PROTECTION_TARGET;
use crate::data::Data;
use chrono::Utc;
use engine::EnforcementEngine;
use notify::NotificationRecord;
use serenity::http::Http;
use serenity::model::id::{GuildId, RoleId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Wires rate windows, suppression, resolution, evaluation and enforcement
/// into one per-event pipeline. Constructed once at startup; the mutable
/// pieces are explicit fields, not globals, so tests can isolate them.
pub struct ProtectionService {
    data: Data,
    rate: RateWindow,
    suppression: Arc<SuppressionRegistry>,
    resolver: ExecutorResolver,
    engine: EnforcementEngine,
}

/// Whether a whitelisted actor suppresses detection for a category.
/// Bot admission and blocked-role grants are enforced unconditionally: a
/// trusted inviter never legitimizes an unapproved bot, and deny-listed
/// roles are usually granted by trusted automation, which is exactly the
/// path the guard exists to revert. Neither category punishes the actor.
fn whitelist_suppresses(category: ProtectionCategory) -> bool {
    !matches!(
        category,
        ProtectionCategory::BotAdmission | ProtectionCategory::BlockedRole
    )
}

/// Which categories an event is checked against, and the audit-log kind used
/// to resolve its executor (None when no third party is responsible).
fn routes(event: &ModerationEvent) -> Vec<(ProtectionCategory, Option<(AuditActionKind, u64)>)> {
    match event {
        ModerationEvent::RoleChanged { after, .. } => vec![
            (
                ProtectionCategory::RoleHierarchy,
                Some((AuditActionKind::RoleUpdate, after.role_id)),
            ),
            (
                ProtectionCategory::CriticalCapability,
                Some((AuditActionKind::RoleUpdate, after.role_id)),
            ),
        ],
        ModerationEvent::RoleDeleted { role_id, .. } => vec![(
            ProtectionCategory::MassRoleDelete,
            Some((AuditActionKind::RoleDelete, *role_id)),
        )],
        ModerationEvent::ChannelDeleted { channel_id, .. } => vec![(
            ProtectionCategory::MassChannelDelete,
            Some((AuditActionKind::ChannelDelete, *channel_id)),
        )],
        ModerationEvent::MemberJoined { user_id, .. } => vec![
            (
                ProtectionCategory::BotAdmission,
                Some((AuditActionKind::BotAdd, *user_id)),
            ),
            (ProtectionCategory::NewAccount, None),
        ],
        ModerationEvent::MemberBanned { user_id, .. } => vec![(
            ProtectionCategory::MassBan,
            Some((AuditActionKind::MemberBanAdd, *user_id)),
        )],
        ModerationEvent::MemberTimeoutChanged { user_id, .. } => vec![(
            ProtectionCategory::MassTimeout,
            Some((AuditActionKind::MemberUpdate, *user_id)),
        )],
        ModerationEvent::MemberRolesChanged { user_id, .. } => vec![(
            ProtectionCategory::BlockedRole,
            Some((AuditActionKind::MemberRoleUpdate, *user_id)),
        )],
        ModerationEvent::VoiceParticipantLeft { user_id, .. } => vec![(
            ProtectionCategory::MassVoiceDisconnect,
            Some((AuditActionKind::MemberDisconnect, *user_id)),
        )],
        ModerationEvent::VoiceMuteToggled { user_id, .. } => vec![(
            ProtectionCategory::MassVoiceToggle,
            Some((AuditActionKind::MemberUpdate, *user_id)),
        )],
    }
}

impl ProtectionService {
    #[must_use]
    pub fn new(data: Data) -> Self {
        let suppression = Arc::new(SuppressionRegistry::new());
        Self {
            data,
            rate: RateWindow::new(),
            suppression: Arc::clone(&suppression),
            resolver: ExecutorResolver::new(),
            engine: EnforcementEngine::new(suppression),
        }
    }

    /// Record the bot's own identity for audit-log self-filtering
    pub fn set_self_id(&self, id: UserId) {
        self.resolver.set_self_id(id);
    }

    /// Run the full pipeline for one normalized event
    pub async fn process(&self, http: &Http, event: ModerationEvent) {
        let guild_id = event.guild_id();

        if let Some(entity) = event.subject_id() {
            if self.suppression.is_marked(entity) {
                debug!(
                    target: PROTECTION_TARGET,
                    guild_id = %guild_id,
                    entity_id = %entity,
                    event = %event.kind_name(),
                    "Entity suppressed, skipping evaluation"
                );
                return;
            }
        }

        for (category, audit) in routes(&event) {
            // Policy is re-read per evaluation; no caching beyond this call
            let Some(policy) = self.data.protection_policy(guild_id, category) else {
                continue;
            };
            if !policy.enabled {
                continue;
            }

            let actor = match audit {
                Some((kind, target_id)) => {
                    self.resolve_actor(http, guild_id, kind, target_id).await
                }
                None => None,
            };

            if whitelist_suppresses(category) {
                if let Some(actor) = &actor {
                    if policy.is_exempt(actor.id, &actor.role_ids) {
                        debug!(
                            target: PROTECTION_TARGET,
                            guild_id = %guild_id,
                            actor_id = %actor.id,
                            category = %category,
                            "Actor whitelisted, skipping category"
                        );
                        continue;
                    }
                }
            }

            let Some(violation) = self
                .evaluate(http, &event, category, &policy, actor.as_ref())
                .await
            else {
                continue;
            };

            info!(
                target: PROTECTION_TARGET,
                guild_id = %guild_id,
                category = %category,
                event = %event.kind_name(),
                actor_id = ?actor.as_ref().map(|a| a.id),
                "Violation detected"
            );

            let outcome = self
                .engine
                .apply(http, &event, &violation, actor.as_ref(), &policy)
                .await;

            if let Some(channel_id) = self.data.log_channel(guild_id, &policy) {
                let mut lines = violation.messages.clone();
                lines.extend(outcome.failures.iter().cloned());
                if outcome.rolled_back {
                    lines.push("Change was rolled back".to_string());
                }
                if outcome.punished {
                    lines.push("Responsible actor was punished".to_string());
                }
                let record = NotificationRecord::new(format!("Protection: {category}"))
                    .actor(actor.as_ref().map(|a| a.id))
                    .target(event.subject_id())
                    .details(lines);
                notify::deliver(http, channel_id, &record).await;
            }
        }
    }

    /// Dispatch to the pure evaluator for one category. Async only to fetch
    /// the inputs (boundary position); the decision itself is synchronous.
    async fn evaluate(
        &self,
        http: &Http,
        event: &ModerationEvent,
        category: ProtectionCategory,
        policy: &ProtectionPolicy,
        actor: Option<&ActorContext>,
    ) -> Option<Violation> {
        let now = Utc::now();

        if category.is_mass_action() {
            // No attributable actor means nothing to rate
            let actor = actor?;
            if let ModerationEvent::MemberTimeoutChanged {
                timeout_until: None,
                ..
            } = event
            {
                // Timeout removals are not counted as timeout actions
                return None;
            }
            return evaluator::mass_action(policy, category, actor.id, &self.rate, now);
        }

        match (category, event) {
            (
                ProtectionCategory::RoleHierarchy,
                ModerationEvent::RoleChanged { before, after, .. },
            ) => {
                let boundary = self
                    .boundary_position(http, event.guild_id(), policy)
                    .await;
                evaluator::role_hierarchy(before, after, boundary)
            }
            (
                ProtectionCategory::CriticalCapability,
                ModerationEvent::RoleChanged { before, after, .. },
            ) => evaluator::critical_capability(policy, before, after),
            (
                ProtectionCategory::BotAdmission,
                ModerationEvent::MemberJoined {
                    user_id, is_bot, ..
                },
            ) => evaluator::bot_admission(policy, *user_id, *is_bot),
            (
                ProtectionCategory::NewAccount,
                ModerationEvent::MemberJoined {
                    user_id,
                    account_created_at,
                    ..
                },
            ) => evaluator::new_account(policy, *user_id, *account_created_at, now),
            (
                ProtectionCategory::BlockedRole,
                ModerationEvent::MemberRolesChanged { added, .. },
            ) => evaluator::blocked_role(policy, added),
            _ => None,
        }
    }

    /// Resolve the audit-log executor and fetch their roles for whitelist
    /// checks. Any lookup failure degrades to an unresolved executor.
    async fn resolve_actor(
        &self,
        http: &Http,
        guild_id: u64,
        kind: AuditActionKind,
        target_id: u64,
    ) -> Option<ActorContext> {
        let actor_id = self.resolver.resolve(http, guild_id, kind, target_id).await?;

        let role_ids = match GuildId::new(guild_id)
            .member(http, UserId::new(actor_id))
            .await
        {
            Ok(member) => member.roles.iter().map(|r| r.get()).collect(),
            Err(e) => {
                warn!(
                    target: PROTECTION_TARGET,
                    guild_id = %guild_id,
                    actor_id = %actor_id,
                    error = %e,
                    "Could not fetch actor roles, treating as none"
                );
                Vec::new()
            }
        };

        Some(ActorContext {
            id: actor_id,
            role_ids,
        })
    }

    /// Position of the configured hierarchy boundary role, if it still exists
    async fn boundary_position(
        &self,
        http: &Http,
        guild_id: u64,
        policy: &ProtectionPolicy,
    ) -> Option<u16> {
        let boundary_id = policy.hierarchy_boundary_role_id?;
        match GuildId::new(guild_id).roles(http).await {
            Ok(roles) => roles.get(&RoleId::new(boundary_id)).map(|r| r.position),
            Err(e) => {
                warn!(
                    target: PROTECTION_TARGET,
                    guild_id = %guild_id,
                    error = %e,
                    "Could not fetch guild roles for boundary lookup"
                );
                None
            }
        }
    }
}
