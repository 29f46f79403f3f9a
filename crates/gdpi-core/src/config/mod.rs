//! Configuration management
//!
//! Strongly-typed configuration with TOML support. Every section is
//! `#[serde(default)]` so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::DEFAULT_DNS_PRESET;
use crate::plan::{RiskLevel, StrategyId};
use crate::preset::{normalize_sizes, DEFAULT_FRAGMENT_SIZES};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General application settings
    pub general: GeneralConfig,

    /// Manual apply settings
    pub apply: ApplyConfig,

    /// Auto-apply throttling and policy
    pub auto_apply: AutoApplyConfig,

    /// Post-apply verification
    pub verification: VerificationConfig,

    /// Domain grouping
    pub grouping: GroupingConfig,

    /// DNS-over-HTTPS handling
    pub dns: DnsConfig,

    /// Noise host filter
    pub noise: NoiseConfig,

    /// Persisted session state
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.apply.timeout_secs == 0 {
            return Err(Error::config_value("apply.timeout_secs", "Must be greater than 0"));
        }
        if normalize_sizes(&self.apply.profile_fragment_sizes).is_empty() {
            return Err(Error::config_value(
                "apply.profile_fragment_sizes",
                "At least one positive fragment size is required",
            ));
        }

        let auto = &self.auto_apply;
        if auto.min_confidence > 100 {
            return Err(Error::config_value("auto_apply.min_confidence", "Must be between 0 and 100"));
        }
        if auto.min_interval_secs == 0 {
            return Err(Error::config_value("auto_apply.min_interval_secs", "Must be greater than 0"));
        }
        if let Some(unknown) = auto.allowed_strategies.iter().find(|id| !id.is_known()) {
            return Err(Error::config_value(
                "auto_apply.allowed_strategies",
                format!("Unknown strategy: {unknown}"),
            ));
        }

        if self.verification.port == 0 {
            return Err(Error::config_value("verification.port", "Must be between 1 and 65535"));
        }
        if self.verification.resolve_timeout_ms == 0 {
            return Err(Error::config_value("verification.resolve_timeout_ms", "Must be greater than 0"));
        }

        let grouping = &self.grouping;
        for (key, value) in [
            ("grouping.min_subhosts", grouping.min_subhosts),
            ("grouping.pinned_min_subhosts", grouping.pinned_min_subhosts),
            ("grouping.max_learned_groups", grouping.max_learned_groups),
        ] {
            if value == 0 {
                return Err(Error::config_value(key, "Must be at least 1"));
            }
        }
        if grouping.pair_threshold == 0 {
            return Err(Error::config_value("grouping.pair_threshold", "Must be at least 1"));
        }

        if self.dns.default_preset.trim().is_empty() {
            return Err(Error::config_value("dns.default_preset", "Must not be empty"));
        }

        Ok(())
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Profile name
    pub name: String,
    /// Configuration version
    pub version: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            version: "2.0".to_string(),
        }
    }
}

/// Manual apply settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Deadline for one apply, in seconds
    pub timeout_secs: u64,
    /// Sizes of the profile fragment preset
    pub profile_fragment_sizes: Vec<i64>,
    /// Outcomes kept in the session history
    pub history_size: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            profile_fragment_sizes: DEFAULT_FRAGMENT_SIZES.iter().map(|&s| i64::from(s)).collect(),
            history_size: 100,
        }
    }
}

impl ApplyConfig {
    /// Apply deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Auto-apply settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApplyConfig {
    /// Master switch, off until the user opts in
    pub enabled: bool,
    /// Minimum seconds between two attempts for one target
    pub min_interval_secs: u64,
    /// Seconds to hold off after a success with the same plan
    pub success_cooldown_secs: u64,
    /// Seconds to hold off after an attempt with the same plan
    pub cooldown_secs: u64,
    /// Lowest plan confidence that may be applied unattended
    pub min_confidence: u8,
    /// Strategies that may be applied unattended
    pub allowed_strategies: Vec<StrategyId>,
    /// Highest risk that may be applied unattended
    pub max_risk: RiskLevel,
    /// Run an outcome probe after a successful auto-apply
    pub outcome_probe: bool,
}

impl Default for AutoApplyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_secs: 5,
            success_cooldown_secs: 180,
            cooldown_secs: 45,
            min_confidence: 70,
            allowed_strategies: vec![
                StrategyId::TlsFragment,
                StrategyId::TlsDisorder,
                StrategyId::HttpHostTricks,
                StrategyId::DropRst,
            ],
            max_risk: RiskLevel::Medium,
            outcome_probe: true,
        }
    }
}

impl AutoApplyConfig {
    /// Minimum interval
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    /// Post-success cooldown
    pub fn success_cooldown(&self) -> Duration {
        Duration::from_secs(self.success_cooldown_secs)
    }

    /// General cooldown
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Post-apply verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Schedule re-tests after a successful apply
    pub enabled: bool,
    /// Delay before re-testing so new rules take effect
    pub delay_ms: u64,
    /// Bound on name resolution
    pub resolve_timeout_ms: u64,
    /// Port to re-test
    pub port: u16,
    /// How long observed addresses stay usable
    pub cache_ttl_secs: u64,
    /// Most addresses re-tested per apply
    pub max_targets: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 350,
            resolve_timeout_ms: 4000,
            port: 443,
            cache_ttl_secs: 300,
            max_targets: 8,
        }
    }
}

impl VerificationConfig {
    /// Propagation delay
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Resolution bound
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Observed address lifetime
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Domain grouping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Rolling observation window in seconds
    pub window_secs: u64,
    /// Distinct subhosts needed to promote a suffix
    pub min_subhosts: usize,
    /// Shard-like subhosts needed to promote a suffix
    pub min_shard_subhosts: usize,
    /// Distinct subhosts needed for a pinned suffix
    pub pinned_min_subhosts: usize,
    /// Shard-like subhosts needed for a pinned suffix
    pub pinned_min_shard_subhosts: usize,
    /// Suffixes known to shard heavily
    pub pinned_suffixes: Vec<String>,
    /// Co-occurrence window in seconds
    pub co_occurrence_window_secs: u64,
    /// Co-occurrences before a pair becomes a group
    pub pair_threshold: u32,
    /// Learned groups kept
    pub max_learned_groups: usize,
    /// Minimum seconds between catalog writes
    pub persist_interval_secs: u64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            window_secs: 600,
            min_subhosts: 4,
            min_shard_subhosts: 2,
            pinned_min_subhosts: 2,
            pinned_min_shard_subhosts: 1,
            pinned_suffixes: vec![
                "googlevideo.com".to_string(),
                "ytimg.com".to_string(),
                "ggpht.com".to_string(),
            ],
            co_occurrence_window_secs: 8,
            pair_threshold: 8,
            max_learned_groups: 24,
            persist_interval_secs: 20,
        }
    }
}

impl GroupingConfig {
    /// Observation window
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Co-occurrence window
    pub fn co_occurrence_window(&self) -> Duration {
        Duration::from_secs(self.co_occurrence_window_secs)
    }

    /// Catalog persist interval
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }
}

/// DNS-over-HTTPS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// User consent to change system DNS
    pub allow_doh_changes: bool,
    /// DoH provider used when enabling
    pub default_preset: String,
    /// Turn DoH off when a plan does not ask for it
    pub disable_doh_when_not_planned: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            allow_doh_changes: true,
            default_preset: DEFAULT_DNS_PRESET.to_string(),
            disable_doh_when_not_planned: false,
        }
    }
}

/// Noise host filter settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// JSON pattern file replacing the built-in list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_file: Option<String>,
    /// Extra noise patterns
    pub extra_patterns: Vec<String>,
    /// Patterns that are never noise
    pub exclude_patterns: Vec<String>,
}

/// Persisted state settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Save presets, assist flags and the group catalog
    pub enabled: bool,
    /// Directory for state files (None = platform default chosen by the caller)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_dir: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log file path (None = stdout only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Enable JSON format logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json_format: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Default Config Tests =====

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.auto_apply.enabled);
        assert_eq!(config.apply.timeout(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_auto_apply_config() {
        let config = AutoApplyConfig::default();
        assert_eq!(config.min_interval(), Duration::from_secs(5));
        assert_eq!(config.success_cooldown(), Duration::from_secs(180));
        assert_eq!(config.cooldown(), Duration::from_secs(45));
        assert_eq!(config.min_confidence, 70);
        assert!(!config.allowed_strategies.contains(&StrategyId::UseDoh));
    }

    #[test]
    fn test_default_verification_config() {
        let config = VerificationConfig::default();
        assert_eq!(config.delay(), Duration::from_millis(350));
        assert_eq!(config.resolve_timeout(), Duration::from_secs(4));
        assert_eq!(config.port, 443);
    }

    // ===== Validation Tests =====

    #[test]
    fn test_invalid_timeout() {
        let mut config = Config::default();
        config.apply.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_profile_sizes() {
        let mut config = Config::default();
        config.apply.profile_fragment_sizes = vec![0, -3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_allowed_strategy() {
        let mut config = Config::default();
        config.auto_apply.allowed_strategies.push(StrategyId::from("Teleport"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Teleport"));
    }

    #[test]
    fn test_invalid_grouping_threshold() {
        let mut config = Config::default();
        config.grouping.min_subhosts = 0;
        assert!(config.validate().is_err());
    }

    // ===== TOML Tests =====

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [auto_apply]
            enabled = true
            min_confidence = 80
            allowed_strategies = ["TlsFragment", "DropRst"]
            max_risk = "low"

            [verification]
            delay_ms = 500
            "#,
        )
        .unwrap();

        assert!(config.auto_apply.enabled);
        assert_eq!(config.auto_apply.min_confidence, 80);
        assert_eq!(config.auto_apply.max_risk, RiskLevel::Low);
        assert_eq!(config.auto_apply.cooldown_secs, 45);
        assert_eq!(config.verification.delay_ms, 500);
        assert_eq!(config.verification.port, 443);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut original = Config::default();
        original.auto_apply.enabled = true;
        original.noise.extra_patterns.push("*.tracker.example".to_string());

        let toml_str = original.to_toml().unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();
        assert!(parsed.auto_apply.enabled);
        assert_eq!(parsed.noise.extra_patterns, original.noise.extra_patterns);
        assert_eq!(parsed.auto_apply.allowed_strategies, original.auto_apply.allowed_strategies);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Config::from_toml("[auto_apply\nenabled = ").is_err());
    }
}
