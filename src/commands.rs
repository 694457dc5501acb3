use crate::sanction::SanctionScope;
use crate::{Context, Error};
use poise::command;

/// Restriction scope choices for the mute/release commands
#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ScopeChoice {
    #[name = "voice"]
    Voice,
    #[name = "chat"]
    Chat,
    #[name = "timeout"]
    Timeout,
}

impl From<ScopeChoice> for SanctionScope {
    fn from(choice: ScopeChoice) -> Self {
        match choice {
            ScopeChoice::Voice => Self::VoiceMute,
            ScopeChoice::Chat => Self::ChatMute,
            ScopeChoice::Timeout => Self::Timeout,
        }
    }
}

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Apply a timed restriction to a member
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to restrict"] user: poise::serenity_prelude::User,
    #[description = "Restriction scope"] scope: ScopeChoice,
    #[description = "Duration in minutes; omit for indefinite"] duration_minutes: Option<u32>,
    #[description = "Reason for the restriction"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a guild")?;
    let scope: SanctionScope = scope.into();
    let duration_seconds = duration_minutes.map(|m| m.saturating_mul(60));

    let sanction = ctx
        .data()
        .sanctions
        .create(
            ctx.http(),
            guild_id.get(),
            user.id.get(),
            scope,
            ctx.author().id.get(),
            reason.unwrap_or_else(|| "No reason given".to_string()),
            duration_seconds,
        )
        .await?;

    let until = sanction
        .expires_at
        .map_or_else(|| "released manually".to_string(), |t| t.to_rfc3339());
    ctx.say(format!(
        "Applied {scope} to <@{}> (until {until})",
        user.id.get()
    ))
    .await?;
    Ok(())
}

/// Lift the active restriction on a member
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn release(
    ctx: Context<'_>,
    #[description = "Member to release"] user: poise::serenity_prelude::User,
    #[description = "Restriction scope"] scope: ScopeChoice,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a guild")?;
    let scope: SanctionScope = scope.into();

    let released = ctx
        .data()
        .sanctions
        .release_active(
            ctx.http(),
            guild_id.get(),
            user.id.get(),
            scope,
            ctx.author().id.get(),
        )
        .await?;

    if released {
        ctx.say(format!("Released {scope} on <@{}>", user.id.get()))
            .await?;
    } else {
        ctx.say(format!(
            "No active {scope} found for <@{}>",
            user.id.get()
        ))
        .await?;
    }
    Ok(())
}

/// List active sanctions in this guild
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn sanctions(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a guild")?;

    let active = ctx.data().sanctions.store.active_for_guild(guild_id.get());
    if active.is_empty() {
        ctx.say("No active sanctions").await?;
        return Ok(());
    }

    let mut lines = Vec::with_capacity(active.len());
    for sanction in active {
        let until = sanction
            .expires_at
            .map_or_else(|| "indefinite".to_string(), |t| t.to_rfc3339());
        lines.push(format!(
            "<@{}>: {} until {} ({})",
            sanction.subject_id, sanction.scope, until, sanction.reason
        ));
    }
    ctx.say(lines.join("\n")).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test that the ping command is properly defined
    #[test]
    fn test_ping_command_definition() {
        let cmd = ping();
        assert_eq!(cmd.name, "ping");
        assert!(cmd.guild_only);
    }

    #[test]
    fn test_sanction_commands_are_guild_only() {
        for cmd in [mute(), release(), sanctions()] {
            assert!(cmd.guild_only, "{} must be guild only", cmd.name);
            assert!(cmd.create_as_slash_command().is_some());
        }
    }

    #[test]
    fn test_scope_choice_mapping() {
        assert_eq!(SanctionScope::from(ScopeChoice::Voice), SanctionScope::VoiceMute);
        assert_eq!(SanctionScope::from(ScopeChoice::Chat), SanctionScope::ChatMute);
        assert_eq!(SanctionScope::from(ScopeChoice::Timeout), SanctionScope::Timeout);
    }
}
