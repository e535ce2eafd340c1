use chrono::Duration;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub engine: EngineConfig,
    pub sweeper: SweeperConfig,
    pub notifier: NotifierConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// `json` or `pretty`.
    pub log_format: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_secs: u64,
}

// Redis нужен только для кеша доступности, без него сервис работает напрямую с БД
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub availability_ttl_secs: u64,
}

/// Policy knobs of the reservation engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub cart_lock_ttl_minutes: i64,
    /// Upper bound for a single `extend` call.
    pub max_lock_extension_minutes: i64,
    pub default_plan_ttl_hours: i64,
    /// Allowed distance between a submitted and the scheduled installment amount.
    pub installment_tolerance: Decimal,
    pub max_items_per_lock: usize,
}

impl EngineConfig {
    pub fn cart_lock_ttl(&self) -> Duration {
        Duration::minutes(self.cart_lock_ttl_minutes)
    }

    pub fn max_lock_extension(&self) -> Duration {
        Duration::minutes(self.max_lock_extension_minutes)
    }

    pub fn default_plan_ttl(&self) -> Duration {
        Duration::hours(self.default_plan_ttl_hours)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cart_lock_ttl_minutes: 15,
            max_lock_extension_minutes: 15,
            default_plan_ttl_hours: 72,
            installment_tolerance: Decimal::new(1, 2),
            max_items_per_lock: 20,
        }
    }
}

// Настройки фоновой очистки просроченных блокировок и планов
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 200,
        }
    }
}

// Куда отправлять уведомления. Без URL уведомления только пишутся в лог
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub webhook_secret: String,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn or_default(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = or_default(name, default);
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: or_default("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000")?,
                environment: or_default("ENVIRONMENT", "development"),
                rust_log: or_default("RUST_LOG", "ticket_engine=debug,tower_http=debug"),
                log_format: or_default("LOG_FORMAT", "pretty"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
                acquire_timeout_secs: parsed("DB_ACQUIRE_TIMEOUT_SECS", "5")?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
                availability_ttl_secs: parsed("AVAILABILITY_CACHE_TTL_SECS", "5")?,
            },
            engine: EngineConfig::from_env()?,
            sweeper: SweeperConfig {
                interval_secs: parsed("SWEEP_INTERVAL_SECS", "60")?,
                max_retries: parsed("SWEEP_MAX_RETRIES", "3")?,
                initial_backoff_ms: parsed("SWEEP_INITIAL_BACKOFF_MS", "200")?,
            },
            notifier: NotifierConfig {
                webhook_url: optional("NOTIFY_WEBHOOK_URL"),
                webhook_secret: or_default("NOTIFY_WEBHOOK_SECRET", ""),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
        })
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = EngineConfig {
            cart_lock_ttl_minutes: parsed("CART_LOCK_TTL_MINUTES", "15")?,
            max_lock_extension_minutes: parsed("MAX_LOCK_EXTENSION_MINUTES", "15")?,
            default_plan_ttl_hours: parsed("DEFAULT_PLAN_TTL_HOURS", "72")?,
            installment_tolerance: parsed("INSTALLMENT_TOLERANCE", "0.01")?,
            max_items_per_lock: parsed("MAX_ITEMS_PER_LOCK", "20")?,
        };
        if config.cart_lock_ttl_minutes <= 0 {
            return Err(ConfigError::Invalid {
                name: "CART_LOCK_TTL_MINUTES",
                value: config.cart_lock_ttl_minutes.to_string(),
            });
        }
        if config.installment_tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid {
                name: "INSTALLMENT_TOLERANCE",
                value: config.installment_tolerance.to_string(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.cart_lock_ttl(), Duration::minutes(15));
        assert_eq!(c.default_plan_ttl(), Duration::hours(72));
        assert_eq!(c.installment_tolerance, Decimal::new(1, 2));
    }

    #[test]
    fn unparsable_value_is_reported_with_its_name() {
        // Names are unique to this test so parallel tests do not interfere.
        env::set_var("TICKET_ENGINE_TEST_PORT", "eighty");
        let err = parsed::<u16>("TICKET_ENGINE_TEST_PORT", "8000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TICKET_ENGINE_TEST_PORT", .. }));

        let fallback: u16 = parsed("TICKET_ENGINE_TEST_UNSET", "8000").unwrap();
        assert_eq!(fallback, 8000);
    }
}
