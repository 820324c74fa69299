use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
    pub ledger: LedgerConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
    pub daily_reward_function: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub flush_threshold: usize,
    pub flush_timeout_secs: u64,
    /// 定期フラッシュの間隔（None なら閾値とライフサイクルのみ）
    #[serde(default)]
    pub flush_interval_secs: Option<u64>,
    /// 未送信イベントの上限（None なら無制限に保持）
    #[serde(default)]
    pub max_pending: Option<usize>,
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub load_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub max_radius_meters: f64,
    pub base_preparation_minutes: u32,
    pub normal_speed_meters_per_minute: f64,
    pub fast_speed_multiplier: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: default_database_url(),
                max_connections: 5,
            },
            backend: BackendConfig {
                base_url: "http://127.0.0.1:54321".to_string(),
                api_key: String::new(),
                request_timeout_secs: 10,
                daily_reward_function: "claim_daily_login_reward".to_string(),
            },
            cache: CacheConfig {
                default_ttl_ms: 5 * 60 * 1_000,
                cleanup_interval_secs: 10 * 60,
            },
            analytics: AnalyticsConfig::default(),
            ledger: LedgerConfig {
                load_timeout_secs: 10,
            },
            delivery: DeliveryConfig::default(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 10,
            flush_timeout_secs: 10,
            flush_interval_secs: None,
            max_pending: None,
            storage_key: "analytics_queue".to_string(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_radius_meters: 15_000.0,
            base_preparation_minutes: 10,
            normal_speed_meters_per_minute: 250.0, // 15 km/h
            fast_speed_multiplier: 1.5,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl AnalyticsConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl LedgerConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_database_url() -> String {
    match dirs::data_dir() {
        Some(dir) => format!(
            "sqlite://{}?mode=rwc",
            dir.join("panda-sync").join("panda.db").display()
        ),
        None => "sqlite:data/panda.db?mode=rwc".to_string(),
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照関数から設定を組み立てる
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("PANDA_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v.trim().to_string();
            }
        }
        if let Some(v) = lookup("PANDA_BACKEND_URL") {
            if !v.trim().is_empty() {
                cfg.backend.base_url = v.trim().trim_end_matches('/').to_string();
            }
        }
        if let Some(v) = lookup("PANDA_BACKEND_API_KEY") {
            cfg.backend.api_key = v.trim().to_string();
        }
        if let Some(value) = lookup("PANDA_BACKEND_TIMEOUT_SECS").and_then(|v| parse_u64(&v)) {
            cfg.backend.request_timeout_secs = value.max(1);
        }

        if let Some(value) = lookup("PANDA_CACHE_TTL_MS").and_then(|v| parse_u64(&v)) {
            cfg.cache.default_ttl_ms = value;
        }
        if let Some(value) = lookup("PANDA_CACHE_CLEANUP_SECS").and_then(|v| parse_u64(&v)) {
            cfg.cache.cleanup_interval_secs = value.max(1);
        }

        if let Some(value) = lookup("PANDA_ANALYTICS_FLUSH_THRESHOLD").and_then(|v| parse_u64(&v))
        {
            cfg.analytics.flush_threshold = (value as usize).max(1);
        }
        if let Some(value) = lookup("PANDA_ANALYTICS_FLUSH_INTERVAL_SECS").and_then(|v| parse_u64(&v))
        {
            cfg.analytics.flush_interval_secs = if value == 0 { None } else { Some(value) };
        }
        if let Some(value) = lookup("PANDA_ANALYTICS_MAX_PENDING").and_then(|v| parse_u64(&v)) {
            cfg.analytics.max_pending = if value == 0 {
                None
            } else {
                Some(value as usize)
            };
        }

        if let Some(value) = lookup("PANDA_LEDGER_LOAD_TIMEOUT_SECS").and_then(|v| parse_u64(&v)) {
            cfg.ledger.load_timeout_secs = value.max(1);
        }

        if let Some(value) = lookup("PANDA_DELIVERY_MAX_RADIUS_METERS").and_then(|v| parse_f64(&v))
        {
            cfg.delivery.max_radius_meters = value.max(0.0);
        }
        if let Some(v) = lookup("PANDA_DELIVERY_FAST_MULTIPLIER") {
            if let Some(value) = parse_f64(&v) {
                cfg.delivery.fast_speed_multiplier = value;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.cache.default_ttl_ms == 0 {
            return Err("Cache default_ttl_ms must be greater than 0".to_string());
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err("Cache cleanup_interval_secs must be greater than 0".to_string());
        }
        if self.analytics.flush_threshold == 0 {
            return Err("Analytics flush_threshold must be greater than 0".to_string());
        }
        if let Some(max_pending) = self.analytics.max_pending {
            if max_pending < self.analytics.flush_threshold {
                return Err(
                    "Analytics max_pending must not be smaller than flush_threshold".to_string(),
                );
            }
        }
        if self.analytics.storage_key.trim().is_empty() {
            return Err("Analytics storage_key must not be empty".to_string());
        }
        if !(self.delivery.max_radius_meters.is_finite() && self.delivery.max_radius_meters > 0.0) {
            return Err("Delivery max_radius_meters must be a positive number".to_string());
        }
        if !(self.delivery.normal_speed_meters_per_minute > 0.0) {
            return Err("Delivery normal_speed_meters_per_minute must be positive".to_string());
        }
        if !(self.delivery.fast_speed_multiplier >= 1.0) {
            return Err("Delivery fast_speed_multiplier must be at least 1.0".to_string());
        }
        Ok(())
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_f64(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
