use std::{
    default::Default,
    ops::Deref,
    sync::Arc,
};

use crate::protection::{ProtectionCategory, ProtectionPolicy};
use crate::sanction::{ArtifactContext, ArtifactContextSource, SanctionService, SanctionStore};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::prelude::TypeMapKey;
use std::collections::HashMap;
use tracing::error;

const CONFIG_FILE: &str = "data/guild_configs.yaml";
const SANCTIONS_FILE: &str = "data/sanctions.yaml";

/// Guild configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    // The ID of the guild
    pub guild_id: u64,
    // Default channel for violation and sanction notifications
    #[serde(default)]
    pub log_channel_id: Option<u64>,
    // Role applied for chat-mute sanctions
    #[serde(default)]
    pub mute_role_id: Option<u64>,
    // Protection policies by category; unlisted categories are disabled
    #[serde(default)]
    pub policies: HashMap<ProtectionCategory, ProtectionPolicy>,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            log_channel_id: None,
            mute_role_id: None,
            policies: HashMap::new(),
        }
    }
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_configs", &self.guild_configs)
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Create an empty in-memory instance (tests)
    #[must_use]
    pub fn new() -> Self {
        let guild_configs: Arc<DashMap<u64, GuildConfig>> = Arc::new(DashMap::new());
        let sanctions = SanctionService::new(
            SanctionStore::new(),
            Arc::new(ConfigSource(Arc::clone(&guild_configs))),
        );
        Self(Arc::new(DataInner {
            guild_configs,
            sanctions,
        }))
    }

    /// Load guild configs and sanction records from YAML files
    pub async fn load() -> Self {
        let guild_configs: Arc<DashMap<u64, GuildConfig>> = Arc::new(DashMap::new());

        if let Ok(content) = tokio::fs::read_to_string(CONFIG_FILE).await {
            match serde_yaml::from_str::<Vec<GuildConfig>>(&content) {
                Ok(configs) => {
                    for config in configs {
                        guild_configs.insert(config.guild_id, config);
                    }
                }
                Err(e) => {
                    error!("Failed to parse guild configs, starting empty: {e}");
                }
            }
        }

        let sanctions = SanctionService::new(
            SanctionStore::load(SANCTIONS_FILE).await,
            Arc::new(ConfigSource(Arc::clone(&guild_configs))),
        );

        Self(Arc::new(DataInner {
            guild_configs,
            sanctions,
        }))
    }

    /// Save guild configurations to the YAML file
    ///
    /// # Errors
    /// Returns an error when the data directory cannot be created or the
    /// configs cannot be serialized or written.
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(dir) = std::path::Path::new(CONFIG_FILE).parent() {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let configs: Vec<GuildConfig> = self
            .guild_configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let yaml = serde_yaml::to_string(&configs)?;
        tokio::fs::write(CONFIG_FILE, yaml).await?;
        Ok(())
    }

    /// Get the guild configuration for a specific guild
    #[must_use]
    pub fn get_guild_config(&self, guild_id: u64) -> Option<GuildConfig> {
        self.guild_configs
            .get(&guild_id)
            .map(|entry| entry.value().clone())
    }

    /// The protection policy for a category, read fresh per evaluation.
    /// None when the guild or category is unconfigured.
    #[must_use]
    pub fn protection_policy(
        &self,
        guild_id: u64,
        category: ProtectionCategory,
    ) -> Option<ProtectionPolicy> {
        self.guild_configs
            .get(&guild_id)
            .and_then(|entry| entry.value().policies.get(&category).cloned())
    }

    /// Notification channel for a policy: the category override, falling back
    /// to the guild default
    #[must_use]
    pub fn log_channel(&self, guild_id: u64, policy: &ProtectionPolicy) -> Option<u64> {
        policy.log_channel_id.or_else(|| {
            self.guild_configs
                .get(&guild_id)
                .and_then(|entry| entry.value().log_channel_id)
        })
    }
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    // Map of guild_id -> guild configuration
    pub guild_configs: Arc<DashMap<u64, GuildConfig>>,
    // Sanction records, artifacts and sweeper
    pub sanctions: SanctionService,
}

/// Adapter giving the sanction service read access to guild settings without
/// owning the whole data layer
struct ConfigSource(Arc<DashMap<u64, GuildConfig>>);

impl ArtifactContextSource for ConfigSource {
    fn artifact_context(&self, guild_id: u64) -> ArtifactContext {
        ArtifactContext {
            mute_role_id: self
                .0
                .get(&guild_id)
                .and_then(|entry| entry.value().mute_role_id),
        }
    }
}

/// Tests for the data module
#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::{PunishmentKind, RateThreshold};

    #[test]
    fn test_data_new() {
        let data = Data::new();
        assert_eq!(data.guild_configs.len(), 0);
        assert!(data.protection_policy(1, ProtectionCategory::MassBan).is_none());
    }

    #[test]
    fn test_policy_lookup_and_log_channel_fallback() {
        let data = Data::new();
        let mut config = GuildConfig {
            guild_id: 1,
            log_channel_id: Some(500),
            ..Default::default()
        };
        config.policies.insert(
            ProtectionCategory::MassBan,
            ProtectionPolicy {
                enabled: true,
                ..Default::default()
            },
        );
        config.policies.insert(
            ProtectionCategory::MassTimeout,
            ProtectionPolicy {
                enabled: true,
                log_channel_id: Some(600),
                ..Default::default()
            },
        );
        data.guild_configs.insert(1, config);

        let policy = data
            .protection_policy(1, ProtectionCategory::MassBan)
            .unwrap();
        assert_eq!(data.log_channel(1, &policy), Some(500));

        let policy = data
            .protection_policy(1, ProtectionCategory::MassTimeout)
            .unwrap();
        assert_eq!(data.log_channel(1, &policy), Some(600));

        assert!(data.protection_policy(1, ProtectionCategory::NewAccount).is_none());
        assert!(data.protection_policy(2, ProtectionCategory::MassBan).is_none());
    }

    #[test]
    fn test_artifact_context_from_config() {
        let data = Data::new();
        data.guild_configs.insert(
            1,
            GuildConfig {
                guild_id: 1,
                mute_role_id: Some(777),
                ..Default::default()
            },
        );

        let source = ConfigSource(Arc::clone(&data.guild_configs));
        assert_eq!(source.artifact_context(1).mute_role_id, Some(777));
        assert_eq!(source.artifact_context(2).mute_role_id, None);
    }

    #[test]
    fn test_guild_config_serialization() {
        let mut config = GuildConfig {
            guild_id: 12345,
            log_channel_id: Some(67890),
            mute_role_id: Some(54321),
            ..Default::default()
        };
        config.policies.insert(
            ProtectionCategory::MassChannelDelete,
            ProtectionPolicy {
                enabled: true,
                punishment: PunishmentKind::StripPrivileges,
                rate: Some(RateThreshold {
                    count: 3,
                    window_seconds: 30,
                }),
                ..Default::default()
            },
        );

        // Test serialization
        let serialized = serde_yaml::to_string(&config).expect("Failed to serialize");
        assert!(serialized.contains("guild_id: 12345"));
        assert!(serialized.contains("MassChannelDelete"));

        // Test deserialization
        let deserialized: GuildConfig =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized.guild_id, 12345);
        assert_eq!(deserialized.mute_role_id, Some(54321));
        let policy = &deserialized.policies[&ProtectionCategory::MassChannelDelete];
        assert!(policy.enabled);
        assert_eq!(policy.rate.unwrap().window_seconds, 30);
    }
}
