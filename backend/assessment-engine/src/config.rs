use serde::Deserialize;
use std::collections::HashMap;
use std::env;

use crate::models::AbilityTier;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub mongo_uri: Option<String>,
    pub mongo_database: String,
    pub question_provider_url: Option<String>,
    pub question_provider_timeout_ms: u64,
    pub idempotency_ttl_seconds: u64,
    /// Completed or abandoned attempts kept in memory; older ones are evicted.
    pub archive_capacity: usize,
    pub metrics_auth: String,
    pub engine: EngineSettings,
}

/// Every tunable number the validators and the adaptive selector use.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub timing: TimingThresholds,
    pub patterns: PatternThresholds,
    pub anticheat: AntiCheatThresholds,
    pub adaptive: AdaptiveSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimingThresholds {
    pub min_responses: usize,
    pub fast_sample: usize,
    pub fast_hits: usize,
    pub default_fast_ms: u64,
    /// Fast-response cutoff per section type, overriding `default_fast_ms`.
    pub section_fast_ms: HashMap<String, u64>,
    pub uniform_window: usize,
    pub uniform_std_dev_ms: f64,
    pub too_fast_score: u32,
    pub uniform_score_per_window: u32,
    pub uniform_score_cap: u32,
}

impl Default for TimingThresholds {
    fn default() -> Self {
        let section_fast_ms = [
            ("aptitude", 2000),
            ("knowledge", 2000),
            ("riasec", 800),
            ("bigfive", 800),
            ("values", 800),
            ("employability", 1000),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            min_responses: 5,
            fast_sample: 5,
            fast_hits: 3,
            default_fast_ms: 1500,
            section_fast_ms,
            uniform_window: 6,
            uniform_std_dev_ms: 150.0,
            too_fast_score: 30,
            uniform_score_per_window: 10,
            uniform_score_cap: 50,
        }
    }
}

impl TimingThresholds {
    pub fn fast_threshold_ms(&self, section_type: &str) -> u64 {
        self.section_fast_ms
            .get(section_type)
            .copied()
            .unwrap_or(self.default_fast_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScaleRange {
    pub min: f64,
    pub max: f64,
}

impl ScaleRange {
    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PatternThresholds {
    pub min_answers: usize,
    pub default_scale: ScaleRange,
    /// Answer scale per section, overriding `default_scale`.
    pub section_scales: HashMap<String, ScaleRange>,
    pub midpoint_ratio: f64,
    pub straight_lining_score: u32,
    pub alternating_score: u32,
    pub midpoint_score: u32,
    pub invalid_score: u32,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        let five_point = ScaleRange { min: 1.0, max: 5.0 };
        let section_scales = [("riasec", five_point), ("bigfive", five_point), ("values", five_point)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        Self {
            min_answers: 5,
            default_scale: five_point,
            section_scales,
            midpoint_ratio: 0.8,
            straight_lining_score: 40,
            alternating_score: 30,
            midpoint_score: 20,
            invalid_score: 60,
        }
    }
}

impl PatternThresholds {
    pub fn scale_for(&self, section_id: &str) -> ScaleRange {
        self.section_scales
            .get(section_id)
            .copied()
            .unwrap_or(self.default_scale)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AntiCheatThresholds {
    pub mouse_window_ms: u64,
    pub min_mouse_per_window: u32,
    pub max_tab_switches: u32,
    pub max_time_away_ratio: f64,
    pub max_copy_paste_events: u32,
    pub no_mouse_score: u32,
    pub tab_switch_score: u32,
    pub time_away_score: u32,
    pub copy_paste_score: u32,
    pub invalid_score: u32,
}

impl Default for AntiCheatThresholds {
    fn default() -> Self {
        Self {
            mouse_window_ms: 60_000,
            min_mouse_per_window: 10,
            max_tab_switches: 5,
            max_time_away_ratio: 0.3,
            max_copy_paste_events: 2,
            no_mouse_score: 30,
            tab_switch_score: 25,
            time_away_score: 25,
            copy_paste_score: 20,
            invalid_score: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub min_difficulty: u8,
    pub max_difficulty: u8,
    pub starting_difficulty: u8,
    pub streak_threshold: u32,
    pub default_subtag_quota: u32,
    /// Screener answers per adaptive section; 0 starts straight in the core phase.
    pub screener_questions: u32,
    /// Trailing answers per section that hold the difficulty reached.
    pub stability_questions: u32,
    pub tier_low_below: f64,
    pub tier_high_from: f64,
    pub low_tier_start: u8,
    pub medium_tier_start: u8,
    pub high_tier_start: u8,
    /// Fixed seed for fallback draws; unset means OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            min_difficulty: 1,
            max_difficulty: 5,
            starting_difficulty: 3,
            streak_threshold: 2,
            default_subtag_quota: 2,
            screener_questions: 0,
            stability_questions: 0,
            tier_low_below: 0.4,
            tier_high_from: 0.75,
            low_tier_start: 2,
            medium_tier_start: 3,
            high_tier_start: 4,
            rng_seed: None,
        }
    }
}

impl AdaptiveSettings {
    pub fn start_for(&self, tier: AbilityTier) -> u8 {
        match tier {
            AbilityTier::Low => self.low_tier_start,
            AbilityTier::Medium => self.medium_tier_start,
            AbilityTier::High => self.high_tier_start,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the crate-local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + APP__* overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8082".to_string());

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "assessment".to_string());

        let question_provider_url = settings
            .get_string("question_provider.url")
            .or_else(|_| env::var("QUESTION_PROVIDER_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        let question_provider_timeout_ms = settings
            .get_int("question_provider.timeout_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .or_else(|| {
                env::var("QUESTION_PROVIDER_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(4000);

        let idempotency_ttl_seconds = settings
            .get_int("idempotency.ttl_seconds")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);

        let archive_capacity = settings
            .get_int("attempts.archive_capacity")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .or_else(|| env::var("ARCHIVE_CAPACITY").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(1000);

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    eprintln!("WARNING: METRICS_AUTH not set in production, using default");
                }
                "admin:changeme".to_string()
            });

        let engine = match settings.get::<EngineSettings>("engine") {
            Ok(engine) => engine,
            Err(config::ConfigError::NotFound(_)) => EngineSettings::default(),
            Err(e) => return Err(e),
        };

        if engine.adaptive.min_difficulty > engine.adaptive.max_difficulty {
            return Err(config::ConfigError::Message(format!(
                "engine.adaptive.min_difficulty ({}) exceeds max_difficulty ({})",
                engine.adaptive.min_difficulty, engine.adaptive.max_difficulty
            )));
        }

        Ok(Config {
            bind_addr,
            mongo_uri,
            mongo_database,
            question_provider_url,
            question_provider_timeout_ms,
            idempotency_ttl_seconds,
            archive_capacity,
            metrics_auth,
            engine,
        })
    }

    /// In-memory configuration with default thresholds, used by tests and embedders.
    pub fn in_memory() -> Self {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            mongo_uri: None,
            mongo_database: "assessment".to_string(),
            question_provider_url: None,
            question_provider_timeout_ms: 4000,
            idempotency_ttl_seconds: 30,
            archive_capacity: 1000,
            metrics_auth: "admin:changeme".to_string(),
            engine: EngineSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn fast_threshold_falls_back_to_default() {
        let timing = TimingThresholds::default();
        assert_eq!(timing.fast_threshold_ms("aptitude"), 2000);
        assert_eq!(timing.fast_threshold_ms("unknown_section"), 1500);
    }

    #[test]
    fn midpoint_of_five_point_scale_is_three() {
        let patterns = PatternThresholds::default();
        assert_eq!(patterns.scale_for("values").midpoint(), 3.0);
    }

    #[test]
    #[serial]
    fn load_reads_env_overrides() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP__QUESTION_PROVIDER__TIMEOUT_MS", "750");
        env::set_var("APP__ENGINE__ANTICHEAT__MAX_TAB_SWITCHES", "8");

        let config = Config::load().expect("config should load");
        assert_eq!(config.question_provider_timeout_ms, 750);
        assert_eq!(config.engine.anticheat.max_tab_switches, 8);
        // untouched siblings keep their defaults
        assert_eq!(config.engine.anticheat.min_mouse_per_window, 10);

        env::remove_var("APP__QUESTION_PROVIDER__TIMEOUT_MS");
        env::remove_var("APP__ENGINE__ANTICHEAT__MAX_TAB_SWITCHES");
        env::remove_var("SKIP_ROOT_ENV");
    }

    #[test]
    #[serial]
    fn load_without_overrides_uses_defaults() {
        env::set_var("SKIP_ROOT_ENV", "1");
        let config = Config::load().expect("config should load");
        assert_eq!(config.engine.adaptive, AdaptiveSettings::default());
        assert_eq!(config.idempotency_ttl_seconds, 30);
        assert_eq!(config.archive_capacity, 1000);
        env::remove_var("SKIP_ROOT_ENV");
    }
}
