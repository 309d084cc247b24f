use serde::Deserialize;
use std::env;
use std::str::FromStr;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub seating: SeatingConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Seat layout fallback for buses without an explicit layout, and how long a
/// seat stays held for a customer between booking and payment.
#[derive(Debug, Clone, Deserialize)]
pub struct SeatingConfig {
    pub hold_ttl_seconds: u64,
    pub default_rows: u32,
    pub default_columns: u32,
}

// Настройки платежного шлюза (мобильные деньги)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// No gateway URL means payments are simulated locally.
    pub gateway_url: Option<String>,
    pub merchant_id: String,
    pub merchant_secret: String,
    pub webhook_url: String,
    pub simulated_delay_ms: u64,
    pub pending_timeout_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn or_default(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = or_default(name, default);
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: or_default("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000")?,
                environment: or_default("ENVIRONMENT", "development"),
                rust_log: or_default("RUST_LOG", "bus_booking=debug,tower_http=debug"),
                log_format: parsed("LOG_FORMAT", "text")?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
            },
            seating: SeatingConfig {
                hold_ttl_seconds: parsed("SEAT_HOLD_TTL_SECONDS", "300")?,
                default_rows: parsed("DEFAULT_SEAT_ROWS", "10")?,
                default_columns: parsed("DEFAULT_SEAT_COLUMNS", "5")?,
            },
            payment: PaymentConfig {
                gateway_url: env::var("PAYMENT_GATEWAY_URL").ok().filter(|url| !url.is_empty()),
                merchant_id: or_default("MERCHANT_ID", "bus-booking"),
                merchant_secret: or_default("MERCHANT_SECRET", ""),
                webhook_url: or_default("PAYMENT_WEBHOOK_URL", "http://localhost:8000/api/webhook/payment"),
                simulated_delay_ms: parsed("PAYMENT_SIMULATED_DELAY_MS", "2000")?,
                pending_timeout_minutes: parsed("PAYMENT_PENDING_TIMEOUT_MINUTES", "15")?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
            cleanup: CleanupConfig {
                interval_seconds: parsed("CLEANUP_INTERVAL_SECONDS", "300")?,
            },
        })
    }
}
