//! Protection policy configuration
//!
//! One `ProtectionPolicy` per category per guild, loaded from the guild
//! configuration on every evaluation. A missing or disabled policy means the
//! category cannot produce a violation.

use serde::{Deserialize, Serialize};
use serenity::model::Permissions;
use std::collections::HashSet;
use std::fmt;

/// Categories of protected activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectionCategory {
    /// Edits to roles at or above the configured boundary role
    RoleHierarchy,
    /// Grants of denied permissions to any role
    CriticalCapability,
    /// Burst of member bans
    MassBan,
    /// Burst of member timeouts
    MassTimeout,
    /// Burst of channel deletions
    MassChannelDelete,
    /// Burst of role deletions
    MassRoleDelete,
    /// Burst of voice disconnects
    MassVoiceDisconnect,
    /// Burst of server mute/deafen toggles
    MassVoiceToggle,
    /// Unapproved bot accounts joining
    BotAdmission,
    /// Accounts younger than the configured minimum age joining
    NewAccount,
    /// Grants of deny-listed roles
    BlockedRole,
}

impl ProtectionCategory {
    /// Whether this category rates actors over a sliding window
    #[must_use]
    pub fn is_mass_action(self) -> bool {
        matches!(
            self,
            Self::MassBan
                | Self::MassTimeout
                | Self::MassChannelDelete
                | Self::MassRoleDelete
                | Self::MassVoiceDisconnect
                | Self::MassVoiceToggle
        )
    }

    /// Whether a violation in this category punishes the responsible actor.
    /// New-account ejections have no actor to blame, and blocked-role grants
    /// usually come from automated assignment.
    #[must_use]
    pub fn punishes_actor(self) -> bool {
        !matches!(self, Self::NewAccount | Self::BlockedRole)
    }
}

impl fmt::Display for ProtectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RoleHierarchy => "role hierarchy",
            Self::CriticalCapability => "critical capability",
            Self::MassBan => "mass ban",
            Self::MassTimeout => "mass timeout",
            Self::MassChannelDelete => "mass channel delete",
            Self::MassRoleDelete => "mass role delete",
            Self::MassVoiceDisconnect => "mass voice disconnect",
            Self::MassVoiceToggle => "mass voice toggle",
            Self::BotAdmission => "bot admission",
            Self::NewAccount => "new account",
            Self::BlockedRole => "blocked role",
        };
        f.write_str(name)
    }
}

/// What to do to the actor responsible for a violation
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PunishmentKind {
    /// Remove every role from the actor
    #[default]
    StripPrivileges,
    /// Kick the actor from the guild
    RemoveMembership,
}

/// Rate threshold for mass-action categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateThreshold {
    /// Number of hits that fires the violation
    pub count: usize,
    /// Width of the sliding window in seconds
    pub window_seconds: u32,
}

/// Per-category protection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub punishment: PunishmentKind,
    /// Channel receiving violation notifications, overrides the guild default
    #[serde(default)]
    pub log_channel_id: Option<u64>,
    #[serde(default)]
    pub whitelist_users: HashSet<u64>,
    #[serde(default)]
    pub whitelist_roles: HashSet<u64>,
    /// Mass-action categories only
    #[serde(default)]
    pub rate: Option<RateThreshold>,
    /// CriticalCapability only
    #[serde(default)]
    pub denied_capabilities: Option<Permissions>,
    /// RoleHierarchy only
    #[serde(default)]
    pub hierarchy_boundary_role_id: Option<u64>,
    /// NewAccount only
    #[serde(default)]
    pub min_account_age_days: Option<u32>,
    /// BlockedRole only
    #[serde(default)]
    pub blocked_roles: HashSet<u64>,
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            punishment: PunishmentKind::StripPrivileges,
            log_channel_id: None,
            whitelist_users: HashSet::new(),
            whitelist_roles: HashSet::new(),
            rate: None,
            denied_capabilities: None,
            hierarchy_boundary_role_id: None,
            min_account_age_days: None,
            blocked_roles: HashSet::new(),
        }
    }
}

impl ProtectionPolicy {
    /// Whether a user is exempt from this category, by id or by any held role
    #[must_use]
    pub fn is_exempt(&self, user_id: u64, role_ids: &[u64]) -> bool {
        self.whitelist_users.contains(&user_id)
            || role_ids.iter().any(|r| self.whitelist_roles.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exemption_by_user_and_role() {
        let mut policy = ProtectionPolicy {
            enabled: true,
            ..Default::default()
        };
        policy.whitelist_users.insert(100);
        policy.whitelist_roles.insert(200);

        assert!(policy.is_exempt(100, &[]));
        assert!(policy.is_exempt(999, &[200]));
        assert!(policy.is_exempt(999, &[1, 200, 3]));
        assert!(!policy.is_exempt(999, &[1, 2, 3]));
        assert!(!policy.is_exempt(999, &[]));
    }

    #[test]
    fn test_mass_action_categories() {
        assert!(ProtectionCategory::MassBan.is_mass_action());
        assert!(ProtectionCategory::MassVoiceToggle.is_mass_action());
        assert!(!ProtectionCategory::RoleHierarchy.is_mass_action());
        assert!(!ProtectionCategory::BotAdmission.is_mass_action());
    }

    #[test]
    fn test_policy_serialization() {
        let policy = ProtectionPolicy {
            enabled: true,
            punishment: PunishmentKind::RemoveMembership,
            rate: Some(RateThreshold {
                count: 3,
                window_seconds: 30,
            }),
            ..Default::default()
        };

        let yaml = serde_yaml::to_string(&policy).expect("Failed to serialize");
        assert!(yaml.contains("enabled: true"));
        assert!(yaml.contains("RemoveMembership"));

        let back: ProtectionPolicy = serde_yaml::from_str(&yaml).expect("Failed to deserialize");
        assert!(back.enabled);
        assert_eq!(back.punishment, PunishmentKind::RemoveMembership);
        assert_eq!(back.rate.unwrap().count, 3);
    }

    #[test]
    fn test_policy_defaults_from_sparse_yaml() {
        let yaml = "enabled: true\n";
        let policy: ProtectionPolicy = serde_yaml::from_str(yaml).expect("Failed to deserialize");
        assert!(policy.enabled);
        assert_eq!(policy.punishment, PunishmentKind::StripPrivileges);
        assert!(policy.rate.is_none());
        assert!(policy.whitelist_users.is_empty());
    }
}
