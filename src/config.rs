//! Runtime configuration, read from the environment (after `.env`).

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::dashboard::StockThresholds;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}={value} is not valid: {reason}")]
    Invalid { name: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL; without one the service runs on the in-process store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub ledger: LedgerConfig,
}

/// Retry, deadline and classification policy for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Bound on one operation including all of its retries.
    pub deadline: Duration,
    pub thresholds: StockThresholds,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { max_retries: 3, retry_backoff: Duration::from_millis(25), deadline: Duration::from_secs(5), thresholds: StockThresholds::default() }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = LedgerConfig::default();

        let deadline_ms: u64 = parse(&lookup, "LEDGER_DEADLINE_MS", defaults.deadline.as_millis() as u64)?;
        if deadline_ms == 0 {
            return Err(invalid("LEDGER_DEADLINE_MS", "0", "must be positive"));
        }
        let low_ratio: Decimal = parse(&lookup, "STOCK_LOW_RATIO", defaults.thresholds.low_ratio)?;
        let critical_ratio: Decimal = parse(&lookup, "STOCK_CRITICAL_RATIO", defaults.thresholds.critical_ratio)?;
        if low_ratio.is_sign_negative() {
            return Err(invalid("STOCK_LOW_RATIO", &low_ratio.to_string(), "must not be negative"));
        }
        if critical_ratio.is_sign_negative() || critical_ratio > low_ratio {
            return Err(invalid("STOCK_CRITICAL_RATIO", &critical_ratio.to_string(), "must be between 0 and STOCK_LOW_RATIO"));
        }

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            port: parse(&lookup, "PORT", 8083)?,
            nats_url: non_empty("NATS_URL"),
            ledger: LedgerConfig {
                max_retries: parse(&lookup, "LEDGER_MAX_RETRIES", defaults.max_retries)?,
                retry_backoff: Duration::from_millis(parse(&lookup, "LEDGER_RETRY_BACKOFF_MS", defaults.retry_backoff.as_millis() as u64)?),
                deadline: Duration::from_millis(deadline_ms),
                thresholds: StockThresholds { low_ratio, critical_ratio },
            },
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(name, &raw, &e.to_string())),
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { name, value: value.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 8083);
        assert!(c.database_url.is_none());
        assert_eq!(c.ledger, LedgerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let c = config(&[("PORT", "9000"), ("DATABASE_URL", "postgres://localhost/retail"), ("LEDGER_MAX_RETRIES", "5"), ("STOCK_LOW_RATIO", "2"), ("STOCK_CRITICAL_RATIO", "1")]).unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.database_url.as_deref(), Some("postgres://localhost/retail"));
        assert_eq!(c.ledger.max_retries, 5);
        assert_eq!(c.ledger.thresholds.low_ratio, Decimal::from(2));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(config(&[("PORT", "eighty")]), Err(ConfigError::Invalid { name: "PORT", .. })));
        assert!(config(&[("LEDGER_DEADLINE_MS", "0")]).is_err());
        assert!(config(&[("STOCK_CRITICAL_RATIO", "1.5")]).is_err());
    }

    #[test]
    fn test_blank_database_url_means_none() {
        assert!(config(&[("DATABASE_URL", "  ")]).unwrap().database_url.is_none());
    }
}
