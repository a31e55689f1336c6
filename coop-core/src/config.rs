//! Configuration for the coop engine.
//!
//! Loadable from TOML; every field has a default so a partial file (or no
//! file at all) yields a working configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoopConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Document persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Profile cache settings.
    #[serde(default)]
    pub profiles: ProfileConfig,
    /// Word moderation and message auditing.
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// Punishment behavior.
    #[serde(default)]
    pub punishment: PunishmentConfig,
    /// Pet mini-game tuning.
    #[serde(default)]
    pub pets: PetConfig,
}

impl CoopConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `CoopError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::CoopError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the engine is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Document persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the document files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Fixed rate for flushing the profile registry, in seconds.
    #[serde(default = "default_1800")]
    pub profile_write_secs: u32,
    /// Fixed rate for flushing the currency ledger, in seconds.
    #[serde(default = "default_900")]
    pub currency_write_secs: u32,
    /// Fixed rate for flushing inventories, in seconds.
    #[serde(default = "default_600")]
    pub inventory_write_secs: u32,
    /// Fixed rate for flushing the muted-role registry, in seconds.
    #[serde(default = "default_10")]
    pub muted_roles_write_secs: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            profile_write_secs: 1800,
            currency_write_secs: 900,
            inventory_write_secs: 600,
            muted_roles_write_secs: 10,
        }
    }
}

/// Profile cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Hard cap on resident user profiles.
    #[serde(default = "default_500")]
    pub capacity: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self { capacity: 500 }
    }
}

/// Word moderation and message auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Per-guild message history cap.
    #[serde(default = "default_1000")]
    pub message_cache_capacity: usize,
    /// Number of most-recent messages retained when the cap is hit.
    #[serde(default = "default_500")]
    pub message_cache_trim: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            message_cache_capacity: 1000,
            message_cache_trim: 500,
        }
    }
}

/// Punishment behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunishmentConfig {
    /// Days of messages pruned when banning.
    #[serde(default = "default_7")]
    pub ban_prune_days: u32,
    /// Wall-clock timeout for interactive confirmations, in seconds.
    #[serde(default = "default_30")]
    pub confirmation_timeout_secs: u64,
}

impl Default for PunishmentConfig {
    fn default() -> Self {
        Self {
            ban_prune_days: 7,
            confirmation_timeout_secs: 30,
        }
    }
}

/// Pet mini-game tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetConfig {
    /// Probability that a message spawns a pet event.
    #[serde(default = "default_spawn_probability")]
    pub spawn_probability: f64,
    /// Cap on simultaneously active pet-event guilds.
    #[serde(default = "default_256")]
    pub event_capacity: usize,
    /// Cap on resident inventories.
    #[serde(default = "default_256")]
    pub inventory_capacity: usize,
    /// Seconds until an unclaimed pet despawns.
    #[serde(default = "default_300")]
    pub despawn_secs: u64,
    /// Egg penalty for a caught steal attempt.
    #[serde(default = "default_50")]
    pub steal_penalty_eggs: u64,
}

impl Default for PetConfig {
    fn default() -> Self {
        Self {
            spawn_probability: 0.1,
            event_capacity: 256,
            inventory_capacity: 256,
            despawn_secs: 300,
            steal_penalty_eggs: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_data_dir() -> String { "data".to_string() }
fn default_spawn_probability() -> f64 { 0.1 }
fn default_7() -> u32 { 7 }
fn default_10() -> u32 { 10 }
fn default_30() -> u64 { 30 }
fn default_50() -> u64 { 50 }
fn default_256() -> usize { 256 }
fn default_300() -> u64 { 300 }
fn default_500() -> usize { 500 }
fn default_600() -> u32 { 600 }
fn default_900() -> u32 { 900 }
fn default_1000() -> usize { 1000 }
fn default_1800() -> u32 { 1800 }

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
