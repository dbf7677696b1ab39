//! Layered configuration: TOML file + env overrides for the handful of
//! operationally-hot settings. `#[serde(default)]` throughout so a
//! partial file still parses, with `load`/`load_or_default` and a
//! focused `apply_env_overrides` for the knobs worth overriding without
//! a redeploy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub llm: LlmConfig,
    pub decision: DecisionConfig,
    pub notification: NotificationConfig,
    pub memory: MemoryConfig,
    pub gateway: GatewayConfig,
    pub points: PointsConfig,
    pub database_url: String,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            decision: DecisionConfig::default(),
            notification: NotificationConfig::default(),
            memory: MemoryConfig::default(),
            gateway: GatewayConfig::default(),
            points: PointsConfig::default(),
            database_url: "sqlite://coach.db".to_string(),
        }
    }
}

impl CoachConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: CoachConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %err,
                    "falling back to default config"
                );
                let mut config = Self::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(base_url) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }
        if let Ok(timeout) = std::env::var("LLM_FALLBACK_TIMEOUT_MS") {
            if let Ok(parsed) = timeout.parse() {
                self.llm.fallback_timeout_ms = parsed;
            }
        }
        if let Ok(db_url) = std::env::var("COACH_DATABASE_URL") {
            self.database_url = db_url;
        }
        if let Ok(addr) = std::env::var("COACH_GATEWAY_BIND") {
            if let Some((host, port)) = addr.rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    self.gateway.host = host.to_string();
                    self.gateway.port = port;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub fallback_timeout_ms: u64,
    /// Bounded connection pool size (§5 "LLM client is a bounded
    /// connection pool"): at most this many `complete()` calls run
    /// concurrently across every caller (decision engine, message
    /// generator, event detector, summarizer); excess callers queue
    /// behind a semaphore up to `fallback_timeout_ms` before falling back.
    pub max_concurrent_requests: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "mock-coach".to_string(),
            base_url: None,
            max_tokens: 512,
            temperature: 0.3,
            fallback_timeout_ms: 5000,
            max_concurrent_requests: 4,
        }
    }
}

/// §6 "Configuration (enumerated)" decision-engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub mode_weights: ModeWeights,
    pub daily_caps_by_level: DailyCaps,
    pub min_interval_same_type_seconds: i64,
    pub quiet_hours_default: QuietHoursConfig,
    pub send_threshold: f64,
    pub defer_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            mode_weights: ModeWeights::default(),
            daily_caps_by_level: DailyCaps::default(),
            min_interval_same_type_seconds: 7200,
            quiet_hours_default: QuietHoursConfig::default(),
            send_threshold: 0.55,
            defer_threshold: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeWeights {
    pub conservative: f64,
    pub balanced: f64,
    pub intelligent: f64,
}

impl Default for ModeWeights {
    fn default() -> Self {
        Self { conservative: 0.8, balanced: 0.5, intelligent: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyCaps {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for DailyCaps {
    fn default() -> Self {
        Self { high: 6, medium: 4, low: 2 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHoursConfig {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self { start_hour: 22, end_hour: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub context_event_ttl_hours: HashMap<String, i64>,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_fraction: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let mut ttl = HashMap::new();
        ttl.insert("illness".to_string(), 48);
        ttl.insert("social_engagement".to_string(), 12);
        ttl.insert("high_stress".to_string(), 24);
        Self {
            context_event_ttl_hours: ttl,
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_backoff_factor: 2.0,
            retry_max_delay_ms: 3_200,
            retry_jitter_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub checkin_cap: usize,
    pub dialogue_cap: usize,
    pub summary_trigger_dialogue_count: usize,
    pub retention_days_checkin: i64,
    pub retention_days_dialogue_summary: i64,
    pub context_budget_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            checkin_cap: 30,
            dialogue_cap: 200,
            summary_trigger_dialogue_count: 20,
            retention_days_checkin: 365,
            retention_days_dialogue_summary: 90,
            context_budget_chars: 4_000,
        }
    }
}

/// Points-ledger award amounts and thresholds for the record-created and
/// daily-sweep hooks (§1's "writes an append-only points ledger on every
/// logged health event", §4.11's daily-unique reasons).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    pub record_base_points: i64,
    pub daily_login_points: i64,
    pub water_goal_points: i64,
    pub daily_water_goal_ml: u32,
    pub streak_bonus_days: u32,
    pub streak_bonus_points: i64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            record_base_points: 10,
            daily_login_points: 5,
            water_goal_points: 15,
            daily_water_goal_ml: 2_000,
            streak_bonus_days: 7,
            streak_bonus_points: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_enumerated_values() {
        let config = CoachConfig::default();
        assert_eq!(config.decision.mode_weights.conservative, 0.8);
        assert_eq!(config.decision.mode_weights.balanced, 0.5);
        assert_eq!(config.decision.mode_weights.intelligent, 0.2);
        assert_eq!(config.decision.daily_caps_by_level.high, 6);
        assert_eq!(config.decision.daily_caps_by_level.medium, 4);
        assert_eq!(config.decision.daily_caps_by_level.low, 2);
        assert_eq!(config.decision.min_interval_same_type_seconds, 7200);
        assert_eq!(config.decision.quiet_hours_default.start_hour, 22);
        assert_eq!(config.decision.quiet_hours_default.end_hour, 8);
        assert_eq!(config.memory.summary_trigger_dialogue_count, 20);
        assert_eq!(config.memory.retention_days_checkin, 365);
        assert_eq!(config.memory.retention_days_dialogue_summary, 90);
        assert_eq!(config.memory.context_budget_chars, 4_000);
        assert_eq!(config.llm.fallback_timeout_ms, 5000);
        assert_eq!(config.points.record_base_points, 10);
        assert_eq!(config.points.streak_bonus_days, 7);
        assert_eq!(config.points.streak_bonus_points, 50);
    }

    #[test]
    fn parse_minimal_toml_fills_in_defaults() {
        let toml_str = r#"
            database_url = "sqlite://test.db"
        "#;
        let config: CoachConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_url, "sqlite://test.db");
        assert_eq!(config.decision.daily_caps_by_level.high, 6);
    }

    #[test]
    fn parse_full_toml_overrides_every_section() {
        let toml_str = r#"
            database_url = "sqlite://prod.db"

            [llm]
            provider = "anthropic"
            model = "claude-x"
            max_tokens = 1024
            temperature = 0.7
            fallback_timeout_ms = 3000

            [decision]
            send_threshold = 0.6
            defer_threshold = 0.4

            [decision.daily_caps_by_level]
            high = 8
            medium = 5
            low = 3

            [memory]
            checkin_cap = 25
            dialogue_cap = 150
        "#;
        let config: CoachConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.max_tokens, 1024);
        assert_eq!(config.decision.send_threshold, 0.6);
        assert_eq!(config.decision.daily_caps_by_level.high, 8);
        assert_eq!(config.memory.checkin_cap, 25);
        assert_eq!(config.memory.dialogue_cap, 150);
    }
}
