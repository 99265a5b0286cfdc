//! Configuration loader

use config::{Config, Environment, File};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::types::{AppConfig, DatabaseConfig};
use crate::common::errors::{LedgerError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP_, nested with `__`)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| LedgerError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| LedgerError::Configuration(e.to_string()))
}

/// Load configuration from the flat environment variables of the legacy deployment
pub fn load_from_env() -> Result<AppConfig> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a configuration from a variable lookup, starting from defaults
pub(crate) fn from_lookup<F>(lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = AppConfig::default();
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get("SERVER_HOST") {
        config.server.host = host;
    }
    if let Some(port) = get("SERVER_PORT") {
        config.server.port = parse_value("SERVER_PORT", &port)?;
    }
    if let Some(env) = get("ENVIRONMENT") {
        config.settings.environment = env;
    }

    config.database = DatabaseConfig {
        url: get("DATABASE_URL").unwrap_or_else(|| {
            postgres_url(
                &get("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
                &get("DB_PORT").unwrap_or_else(|| "5432".to_string()),
                &get("DB_USER").unwrap_or_else(|| "postgres".to_string()),
                &get("DB_PASSWORD").unwrap_or_default(),
                &get("DB_NAME").unwrap_or_else(|| "assignment".to_string()),
                &get("DB_SSLMODE").unwrap_or_else(|| "disable".to_string()),
            )
        }),
        ..config.database
    };
    if let Some(max) = get("DB_MAX_OPEN_CONNS") {
        config.database.max_connections = parse_value("DB_MAX_OPEN_CONNS", &max)?;
    }

    if let Some(interval) = get("STOCK_PRICE_UPDATE_INTERVAL") {
        config.pricing.refresh_interval_seconds = parse_interval(&interval)?.as_secs();
    }
    if let Some(enabled) = get("ENABLE_PRICE_SCHEDULAR") {
        config.pricing.enable_scheduler = parse_value("ENABLE_PRICE_SCHEDULAR", &enabled)?;
    }

    let rates = [
        ("BROKERAGE_FEE_PERCENTAGE", &mut config.fees.brokerage_percent),
        ("STT_FEE_PERCENT", &mut config.fees.stt_percent),
        ("GST_ON_BROKERAGE_PERCENT", &mut config.fees.gst_on_brokerage_percent),
        ("SEBI_CHARGES_PERCENT", &mut config.fees.sebi_charges_percent),
        ("STAMP_DUTY_PERCENT", &mut config.fees.stamp_duty_percent),
    ];
    for (key, slot) in rates {
        if let Some(value) = get(key) {
            *slot = parse_value::<Decimal>(key, &value)?;
        }
    }

    Ok(config)
}

fn postgres_url(host: &str, port: &str, user: &str, password: &str, name: &str, sslmode: &str) -> String {
    if password.is_empty() {
        format!("postgres://{}@{}:{}/{}?sslmode={}", user, host, port, name, sslmode)
    } else {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, password, host, port, name, sslmode
        )
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| LedgerError::Configuration(format!("invalid {}={:?}: {}", key, value, e)))
}

/// Parse an interval such as `1h`, `30m`, `45s` or a bare number of seconds
pub fn parse_interval(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| LedgerError::Configuration(format!("invalid interval: {:?}", value)))?;

    let multiplier: u64 = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => {
            return Err(LedgerError::Configuration(format!(
                "unknown interval unit {:?} in {:?}",
                unit, value
            )))
        }
    };
    let seconds = amount
        .checked_mul(multiplier)
        .ok_or_else(|| LedgerError::Configuration(format!("interval out of range: {:?}", value)))?;

    if seconds == 0 {
        return Err(LedgerError::Configuration("interval must be positive".to_string()));
    }
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_interval("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_interval("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_interval("90").unwrap(), Duration::from_secs(90));
        assert!(parse_interval("0s").is_err());
        assert!(parse_interval("1w").is_err());
        assert!(parse_interval("h").is_err());
    }

    #[test]
    fn test_parse_interval_rejects_overflow() {
        let huge = format!("{}d", u64::MAX / 1000);
        let err = parse_interval(&huge).unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(_)));
    }

    #[test]
    fn test_legacy_env_overrides_defaults() {
        let config = from_lookup(lookup(&[
            ("SERVER_PORT", "9090"),
            ("DB_HOST", "db"),
            ("DB_USER", "stocky"),
            ("DB_PASSWORD", "secret"),
            ("STOCK_PRICE_UPDATE_INTERVAL", "30m"),
            ("ENABLE_PRICE_SCHEDULAR", "false"),
            ("BROKERAGE_FEE_PERCENTAGE", "0.5"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.database.url,
            "postgres://stocky:secret@db:5432/assignment?sslmode=disable"
        );
        assert_eq!(config.pricing.refresh_interval_seconds, 1800);
        assert!(!config.pricing.enable_scheduler);
        assert_eq!(config.fees.brokerage_percent, dec!(0.5));
        assert_eq!(config.fees.stt_percent, dec!(0.1));
    }

    #[test]
    fn test_invalid_rate_is_configuration_error() {
        let err = from_lookup(lookup(&[("STT_FEE_PERCENT", "abc")])).unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(_)));
    }

    #[test]
    fn test_database_url_wins_over_parts() {
        let config = from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x@y/z"),
            ("DB_HOST", "ignored"),
        ]))
        .unwrap();
        assert_eq!(config.database.url, "postgres://x@y/z");
    }
}
