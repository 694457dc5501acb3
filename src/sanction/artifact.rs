//! Restriction artifacts
//!
//! The platform-side artifact each sanction scope maintains: the server voice
//! mute flag, the configured mute role, or a communication timeout. Handlers
//! apply and remove artifacts idempotently so startup reconciliation can
//! re-assert them without tracking what already stuck.

use crate::SANCTION_TARGET;
use crate::sanction::error::{SanctionError, SanctionResult};
use crate::sanction::record::{Sanction, SanctionScope};
use chrono::{DateTime, Duration, Utc};
use serenity::builder::EditMember;
use serenity::http::Http;
use serenity::model::id::{GuildId, RoleId, UserId};
use std::collections::HashMap;
use tracing::{info, warn};

/// Discord caps communication timeouts at 28 days; indefinite timeout
/// sanctions are applied at the cap and re-asserted by reconciliation.
const MAX_TIMEOUT_DAYS: i64 = 28;

/// Guild-level settings an artifact may need beyond the record itself
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactContext {
    /// Role used for chat mutes, if the guild configured one
    pub mute_role_id: Option<u64>,
}

/// Trait for maintaining one scope's restriction artifact
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ArtifactHandler: Send + Sync {
    /// Apply the restriction. Must be idempotent.
    async fn apply(
        &self,
        http: &Http,
        sanction: &Sanction,
        ctx: ArtifactContext,
    ) -> SanctionResult<()>;

    /// Remove the restriction. Must tolerate the artifact already being gone
    /// (subject left the guild, manual cleanup).
    async fn remove(
        &self,
        http: &Http,
        sanction: &Sanction,
        ctx: ArtifactContext,
    ) -> SanctionResult<()>;
}

/// Registry of artifact handlers by scope
pub struct ArtifactRegistry {
    handlers: HashMap<SanctionScope, Box<dyn ArtifactHandler>>,
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(SanctionScope::VoiceMute, Box::new(VoiceMuteArtifact));
        registry.register(SanctionScope::ChatMute, Box::new(ChatMuteArtifact));
        registry.register(SanctionScope::Timeout, Box::new(TimeoutArtifact));
        registry
    }

    pub fn register(&mut self, scope: SanctionScope, handler: Box<dyn ArtifactHandler>) {
        self.handlers.insert(scope, handler);
    }

    /// Apply the artifact for a sanction
    ///
    /// # Errors
    /// Returns an error when no handler is registered or the platform call
    /// fails.
    pub async fn apply(
        &self,
        http: &Http,
        sanction: &Sanction,
        ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        match self.handlers.get(&sanction.scope) {
            Some(handler) => handler.apply(http, sanction, ctx).await,
            None => Err(SanctionError::Other(format!(
                "No artifact handler for scope {}",
                sanction.scope
            ))),
        }
    }

    /// Remove the artifact for a sanction
    ///
    /// # Errors
    /// Returns an error when no handler is registered or the platform call
    /// fails.
    pub async fn remove(
        &self,
        http: &Http,
        sanction: &Sanction,
        ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        match self.handlers.get(&sanction.scope) {
            Some(handler) => handler.remove(http, sanction, ctx).await,
            None => Err(SanctionError::Other(format!(
                "No artifact handler for scope {}",
                sanction.scope
            ))),
        }
    }
}

struct VoiceMuteArtifact;

#[async_trait::async_trait]
impl ArtifactHandler for VoiceMuteArtifact {
    async fn apply(
        &self,
        http: &Http,
        sanction: &Sanction,
        _ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        GuildId::new(sanction.guild_id)
            .edit_member(
                http,
                UserId::new(sanction.subject_id),
                EditMember::new().mute(true),
            )
            .await?;
        info!(
            target: SANCTION_TARGET,
            sanction_id = %sanction.id,
            subject_id = %sanction.subject_id,
            "Voice mute applied"
        );
        Ok(())
    }

    async fn remove(
        &self,
        http: &Http,
        sanction: &Sanction,
        _ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        match GuildId::new(sanction.guild_id)
            .edit_member(
                http,
                UserId::new(sanction.subject_id),
                EditMember::new().mute(false),
            )
            .await
        {
            Ok(_) => {
                info!(
                    target: SANCTION_TARGET,
                    sanction_id = %sanction.id,
                    subject_id = %sanction.subject_id,
                    "Voice mute removed"
                );
                Ok(())
            }
            Err(e) => {
                // The subject may have left the guild; the mute flag is gone
                // with them.
                warn!(
                    target: SANCTION_TARGET,
                    sanction_id = %sanction.id,
                    subject_id = %sanction.subject_id,
                    error = %e,
                    "Voice unmute skipped, member unavailable"
                );
                Ok(())
            }
        }
    }
}

struct ChatMuteArtifact;

#[async_trait::async_trait]
impl ArtifactHandler for ChatMuteArtifact {
    async fn apply(
        &self,
        http: &Http,
        sanction: &Sanction,
        ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        let Some(role_id) = ctx.mute_role_id else {
            return Err(SanctionError::NoMuteRole(sanction.guild_id));
        };

        let member = GuildId::new(sanction.guild_id)
            .member(http, UserId::new(sanction.subject_id))
            .await?;
        if member.roles.contains(&RoleId::new(role_id)) {
            // Already present, reconciliation no-op
            return Ok(());
        }
        member.add_role(http, RoleId::new(role_id)).await?;
        info!(
            target: SANCTION_TARGET,
            sanction_id = %sanction.id,
            subject_id = %sanction.subject_id,
            "Mute role applied"
        );
        Ok(())
    }

    async fn remove(
        &self,
        http: &Http,
        sanction: &Sanction,
        ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        let Some(role_id) = ctx.mute_role_id else {
            return Err(SanctionError::NoMuteRole(sanction.guild_id));
        };

        match GuildId::new(sanction.guild_id)
            .member(http, UserId::new(sanction.subject_id))
            .await
        {
            Ok(member) => {
                member.remove_role(http, RoleId::new(role_id)).await?;
                info!(
                    target: SANCTION_TARGET,
                    sanction_id = %sanction.id,
                    subject_id = %sanction.subject_id,
                    "Mute role removed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: SANCTION_TARGET,
                    sanction_id = %sanction.id,
                    subject_id = %sanction.subject_id,
                    error = %e,
                    "Mute role removal skipped, member unavailable"
                );
                Ok(())
            }
        }
    }
}

struct TimeoutArtifact;

/// Discord rejects timeouts ending more than 28 days out, so both indefinite
/// sanctions and far-future expiries are applied at the cap; reconciliation
/// re-asserts them as the cap slides forward.
fn timeout_until(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let cap = now + Duration::days(MAX_TIMEOUT_DAYS);
    expires_at.map_or(cap, |at| at.min(cap))
}

#[async_trait::async_trait]
impl ArtifactHandler for TimeoutArtifact {
    async fn apply(
        &self,
        http: &Http,
        sanction: &Sanction,
        _ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        let until = timeout_until(sanction.expires_at, Utc::now());

        GuildId::new(sanction.guild_id)
            .edit_member(
                http,
                UserId::new(sanction.subject_id),
                EditMember::new().disable_communication_until_datetime(until.into()),
            )
            .await?;
        info!(
            target: SANCTION_TARGET,
            sanction_id = %sanction.id,
            subject_id = %sanction.subject_id,
            until = %until,
            "Timeout applied"
        );
        Ok(())
    }

    async fn remove(
        &self,
        http: &Http,
        sanction: &Sanction,
        _ctx: ArtifactContext,
    ) -> SanctionResult<()> {
        match GuildId::new(sanction.guild_id)
            .edit_member(
                http,
                UserId::new(sanction.subject_id),
                EditMember::new().enable_communication(),
            )
            .await
        {
            Ok(_) => {
                info!(
                    target: SANCTION_TARGET,
                    sanction_id = %sanction.id,
                    subject_id = %sanction.subject_id,
                    "Timeout cleared"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: SANCTION_TARGET,
                    sanction_id = %sanction.id,
                    subject_id = %sanction.subject_id,
                    error = %e,
                    "Timeout clear skipped, member unavailable"
                );
                Ok(())
            }
        }
    }
}
