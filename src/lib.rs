pub mod commands;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod protection;
pub mod sanction;

// Customize these constants for your bot
pub const BOT_NAME: &str = "guild_warden";
pub const COMMAND_TARGET: &str = "guild_warden::command";
pub const ERROR_TARGET: &str = "guild_warden::error";
pub const EVENT_TARGET: &str = "guild_warden::handlers";
pub const PROTECTION_TARGET: &str = "guild_warden::protection";
pub const SANCTION_TARGET: &str = "guild_warden::sanction";
pub const CONSOLE_TARGET: &str = "guild_warden";

pub use data::{Data, DataInner, GuildConfig};
pub use protection::{ModerationEvent, ProtectionService, Violation};
pub use sanction::{Sanction, SanctionScope, SanctionService, SanctionState};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
