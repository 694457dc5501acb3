//! Gateway event handlers
//!
//! Raw gateway payloads are normalized into [`ModerationEvent`]s here and fed
//! to the protection pipeline. Payloads without the state needed for a
//! meaningful evaluation (no cached before-image, no guild) are dropped at
//! this boundary.

use crate::EVENT_TARGET;
use crate::data::Data;
use crate::protection::{ModerationEvent, ProtectionService, RoleSnapshot};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildChannel, GuildId, GuildMemberUpdateEvent,
    Member, Message, Ready, Role, RoleId, Timestamp, User, VoiceState,
};
use tracing::{debug, info, warn};

pub struct Handler {
    protection: ProtectionService,
}

impl Handler {
    #[must_use]
    pub fn new(data: Data) -> Self {
        Self {
            protection: ProtectionService::new(data),
        }
    }
}

fn snapshot(role: &Role) -> RoleSnapshot {
    RoleSnapshot {
        role_id: role.id.get(),
        name: role.name.clone(),
        position: role.position,
        permissions: role.permissions,
    }
}

fn to_utc(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.unix_timestamp(), 0)
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        self.protection.set_self_id(ready.user.id);
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn guild_role_update(&self, ctx: Context, old: Option<Role>, new: Role) {
        // Without the cached before-image there is no diff to evaluate
        let Some(old) = old else {
            debug!(
                target: EVENT_TARGET,
                role_id = %new.id,
                "Role update without cached previous state, skipping"
            );
            return;
        };

        let event = ModerationEvent::RoleChanged {
            guild_id: new.guild_id.get(),
            before: snapshot(&old),
            after: snapshot(&new),
        };
        self.protection.process(&ctx.http, event).await;
    }

    async fn guild_role_delete(
        &self,
        ctx: Context,
        guild_id: GuildId,
        removed_role_id: RoleId,
        _removed_role: Option<Role>,
    ) {
        let event = ModerationEvent::RoleDeleted {
            guild_id: guild_id.get(),
            role_id: removed_role_id.get(),
        };
        self.protection.process(&ctx.http, event).await;
    }

    async fn channel_delete(
        &self,
        ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        let event = ModerationEvent::ChannelDeleted {
            guild_id: channel.guild_id.get(),
            channel_id: channel.id.get(),
        };
        self.protection.process(&ctx.http, event).await;
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let event = ModerationEvent::MemberJoined {
            guild_id: new_member.guild_id.get(),
            user_id: new_member.user.id.get(),
            is_bot: new_member.user.bot,
            account_created_at: to_utc(new_member.user.created_at())
                .unwrap_or(DateTime::UNIX_EPOCH),
        };
        self.protection.process(&ctx.http, event).await;
    }

    async fn guild_ban_addition(&self, ctx: Context, guild_id: GuildId, banned_user: User) {
        let event = ModerationEvent::MemberBanned {
            guild_id: guild_id.get(),
            user_id: banned_user.id.get(),
        };
        self.protection.process(&ctx.http, event).await;
    }

    async fn guild_member_update(
        &self,
        ctx: Context,
        old: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let guild_id = event.guild_id.get();
        let user_id = event.user.id.get();

        let Some(old) = old else {
            // Uncached member: a freshly set timeout is still actionable, the
            // role diff is not
            if let Some(until) = event.communication_disabled_until {
                let update = ModerationEvent::MemberTimeoutChanged {
                    guild_id,
                    user_id,
                    timeout_until: to_utc(until),
                };
                self.protection.process(&ctx.http, update).await;
            }
            return;
        };

        if old.communication_disabled_until != event.communication_disabled_until {
            let update = ModerationEvent::MemberTimeoutChanged {
                guild_id,
                user_id,
                timeout_until: event.communication_disabled_until.and_then(to_utc),
            };
            self.protection.process(&ctx.http, update).await;
        }

        let added: Vec<u64> = event
            .roles
            .iter()
            .filter(|r| !old.roles.contains(r))
            .map(|r| r.get())
            .collect();
        let removed: Vec<u64> = old
            .roles
            .iter()
            .filter(|r| !event.roles.contains(r))
            .map(|r| r.get())
            .collect();
        if !added.is_empty() || !removed.is_empty() {
            let update = ModerationEvent::MemberRolesChanged {
                guild_id,
                user_id,
                added,
                removed,
            };
            self.protection.process(&ctx.http, update).await;
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|o| o.guild_id))
        else {
            return;
        };
        let Some(old) = old else {
            // A join carries no before-state worth comparing
            return;
        };

        if old.channel_id.is_some() && new.channel_id.is_none() {
            let event = ModerationEvent::VoiceParticipantLeft {
                guild_id: guild_id.get(),
                user_id: new.user_id.get(),
            };
            self.protection.process(&ctx.http, event).await;
        }

        // Server-side flags only; self mutes are the member's own business
        if old.mute != new.mute || old.deaf != new.deaf {
            let event = ModerationEvent::VoiceMuteToggled {
                guild_id: guild_id.get(),
                user_id: new.user_id.get(),
                muted: new.mute,
                deafened: new.deaf,
            };
            self.protection.process(&ctx.http, event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poise::serenity_prelude::Permissions;

    #[test]
    fn test_handler_implements_event_handler() {
        // Compile-time check that Handler implements EventHandler
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_timestamp_conversion() {
        let ts = Timestamp::from_unix_timestamp(1_700_000_000).unwrap();
        let converted = to_utc(ts).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_role_snapshot_fields() {
        // Snapshots carry exactly what the evaluators compare
        let snap = RoleSnapshot {
            role_id: 1,
            name: "mods".to_string(),
            position: 3,
            permissions: Permissions::BAN_MEMBERS,
        };
        assert!(snap.permissions.contains(Permissions::BAN_MEMBERS));
        assert_eq!(snap.position, 3);
    }
}
