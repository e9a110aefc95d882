use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuddyConfig {
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub summary: SummaryConfig,
    pub rewards: RewardConfig,
    pub realtime: RealtimeConfig,
    pub attention: AttentionConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
}

impl BuddyConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: BuddyConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.rewards.hearts_per_coupon > 0,
            "rewards.hearts_per_coupon must be positive, got {}",
            self.rewards.hearts_per_coupon
        );
        Ok(())
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("BUDDY_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("BUDDY_HEARTS_PER_COUPON") {
            match v.parse::<i64>() {
                Ok(n) if n > 0 => self.rewards.hearts_per_coupon = n,
                _ => tracing::warn!("ignoring BUDDY_HEARTS_PER_COUPON={}", v),
            }
        }
        if let Ok(v) = std::env::var("BUDDY_UTC_OFFSET_MINUTES") {
            if let Ok(n) = v.parse() {
                self.summary.utc_offset_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("BUDDY_GATEWAY_HOST") {
            self.gateway.host = v;
        }
        if let Ok(v) = std::env::var("BUDDY_GATEWAY_PORT") {
            if let Ok(n) = v.parse() {
                self.gateway.port = n;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "anthropic", "openai" (any OpenAI-compatible gateway) or "mock".
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: None,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

/// Time budgets and fallbacks for the ingestion round trips.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classifier_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub fallback_reply: String,
    pub companion_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier_timeout_ms: 8_000,
            reply_timeout_ms: 20_000,
            fallback_reply: "Woof! I'm here for you! 🐕".to_string(),
            companion_name: "Buddy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Days inspected by a lazy refresh, ending today.
    pub lookback_days: u32,
    /// Pause between consecutive engine calls during a refresh.
    pub pause_ms: u64,
    pub utc_offset_minutes: i32,
    pub temperature: f32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            pause_ms: 1_500,
            utc_offset_minutes: 0,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub hearts_per_coupon: i64,
    pub code_prefix: String,
    pub code_length: usize,
    pub expiry_months: u32,
    pub coupon_type: String,
    pub title: String,
    pub description: String,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            hearts_per_coupon: 20,
            code_prefix: "LOVE-".to_string(),
            code_length: 8,
            expiry_months: 3,
            coupon_type: "coffee".to_string(),
            title: "☕ Free Coffee Coupon".to_string(),
            description: "Enjoy a complimentary beverage at participating cafes. Thank you for your dedication!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
    pub resync_interval_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            resync_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    pub inactivity_hours: i64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            inactivity_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "buddycare.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = BuddyConfig::default();
        assert_eq!(cfg.llm.provider, "anthropic");
        assert_eq!(cfg.rewards.hearts_per_coupon, 20);
        assert_eq!(cfg.rewards.code_prefix, "LOVE-");
        assert_eq!(cfg.summary.lookback_days, 7);
        assert_eq!(cfg.attention.inactivity_hours, 24);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[llm]
provider = "openai"
model = "gemini-flash"
"#;
        let cfg: BuddyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.model, "gemini-flash");
        // Defaults for unspecified fields
        assert_eq!(cfg.llm.max_tokens, 1024);
        assert_eq!(cfg.pipeline.classifier_timeout_ms, 8_000);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[llm]
provider = "openai"
model = "gpt-4o-mini"
base_url = "https://gateway.example/v1"
max_tokens = 512
temperature = 0.5

[pipeline]
classifier_timeout_ms = 2000
reply_timeout_ms = 5000
fallback_reply = "I'm right here."

[summary]
lookback_days = 3
pause_ms = 10
utc_offset_minutes = 540

[rewards]
hearts_per_coupon = 10
code_prefix = "HUG-"
expiry_months = 6

[realtime]
resync_interval_secs = 15

[storage]
db_path = "data/buddy.db"

[gateway]
host = "0.0.0.0"
port = 9000
"#;
        let cfg: BuddyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.base_url.as_deref(), Some("https://gateway.example/v1"));
        assert_eq!(cfg.pipeline.fallback_reply, "I'm right here.");
        assert_eq!(cfg.summary.utc_offset_minutes, 540);
        assert_eq!(cfg.rewards.hearts_per_coupon, 10);
        assert_eq!(cfg.rewards.code_length, 8);
        assert_eq!(cfg.realtime.resync_interval_secs, 15);
        assert_eq!(cfg.storage.db_path, "data/buddy.db");
        assert_eq!(cfg.gateway.port, 9000);
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        // Part 1: env overrides
        std::env::set_var("LLM_PROVIDER", "mock");
        std::env::set_var("BUDDY_HEARTS_PER_COUPON", "5");

        let mut cfg = BuddyConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.rewards.hearts_per_coupon, 5);

        // Clean up env vars before testing defaults
        std::env::remove_var("LLM_PROVIDER");
        std::env::remove_var("BUDDY_HEARTS_PER_COUPON");

        // Part 2: nonexistent path returns defaults (no env interference)
        let cfg = BuddyConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.llm.provider, "anthropic");
        assert_eq!(cfg.rewards.hearts_per_coupon, 20);
    }

    #[test]
    fn test_zero_hearts_per_coupon_rejected() {
        let mut cfg: BuddyConfig = toml::from_str("[rewards]\nhearts_per_coupon = 0\n").unwrap();
        assert!(cfg.validate().is_err());
        cfg.rewards.hearts_per_coupon = 1;
        assert!(cfg.validate().is_ok());
        assert!(BuddyConfig::default().validate().is_ok());
    }
}
