use std::str::FromStr;
use std::time::Duration;

use adpilot_core::safety::SafetyPolicy;
use adpilot_engine::change_queue::ReapPolicy;

/// A required variable is missing or a value does not parse.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Identity recorded as `claimed_by` and in the change history.
    pub worker_id: String,
    pub poll_interval: Duration,
    pub reap: ReapPolicy,
    pub reaper_interval: Duration,
    pub attribution_interval: Duration,
    pub attribution_batch_size: i64,
    pub safety: SafetyPolicy,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default              |
    /// |-----------------------------|----------------------|
    /// | `DATABASE_URL`              | required             |
    /// | `DB_MAX_CONNECTIONS`        | `20`                 |
    /// | `WORKER_ID`                 | `worker-<uuid v7>`   |
    /// | `POLL_INTERVAL_MS`          | `1000`               |
    /// | `CLAIM_TIMEOUT_SECS`        | `300`                |
    /// | `EXECUTION_TIMEOUT_SECS`    | `900`                |
    /// | `MAX_RECLAIMS`              | `3`                  |
    /// | `REAPER_INTERVAL_SECS`      | `60`                 |
    /// | `ATTRIBUTION_INTERVAL_SECS` | `30`                 |
    /// | `ATTRIBUTION_BATCH_SIZE`    | `100`                |
    /// | `MAX_BUDGET_CHANGE_PCT`     | `50`                 |
    /// | `MAX_BID_CHANGE_PCT`        | `30`                 |
    /// | `MIN_CONFIDENCE`            | `0.5`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let worker_id = lookup("WORKER_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::now_v7()));

        let defaults = SafetyPolicy::default();
        let safety = SafetyPolicy {
            max_budget_change_pct: parse_or(
                &lookup,
                "MAX_BUDGET_CHANGE_PCT",
                defaults.max_budget_change_pct,
            )?,
            max_bid_change_pct: parse_or(&lookup, "MAX_BID_CHANGE_PCT", defaults.max_bid_change_pct)?,
            min_confidence: parse_or(&lookup, "MIN_CONFIDENCE", defaults.min_confidence)?,
        };

        let reap = ReapPolicy {
            claim_timeout: Duration::from_secs(parse_positive(&lookup, "CLAIM_TIMEOUT_SECS", 300)?),
            execution_timeout: Duration::from_secs(parse_positive(
                &lookup,
                "EXECUTION_TIMEOUT_SECS",
                900,
            )?),
            max_reclaims: parse_or(&lookup, "MAX_RECLAIMS", 3i32)?,
        };
        if reap.max_reclaims < 0 {
            return Err(invalid("MAX_RECLAIMS", "non-negative integer", reap.max_reclaims));
        }

        let attribution_batch_size = parse_or(&lookup, "ATTRIBUTION_BATCH_SIZE", 100i64)?;
        if attribution_batch_size <= 0 {
            return Err(invalid(
                "ATTRIBUTION_BATCH_SIZE",
                "positive integer",
                attribution_batch_size,
            ));
        }

        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 20u32)?;
        if db_max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "positive integer", db_max_connections));
        }

        Ok(Self {
            database_url,
            db_max_connections,
            worker_id,
            poll_interval: Duration::from_millis(parse_positive(&lookup, "POLL_INTERVAL_MS", 1000)?),
            reap,
            reaper_interval: Duration::from_secs(parse_positive(
                &lookup,
                "REAPER_INTERVAL_SECS",
                60,
            )?),
            attribution_interval: Duration::from_secs(parse_positive(
                &lookup,
                "ATTRIBUTION_INTERVAL_SECS",
                30,
            )?),
            attribution_batch_size,
            safety,
        })
    }
}

fn invalid(name: &'static str, expected: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        expected,
        value: value.to_string(),
    }
}

/// Intervals and timeouts; `tokio::time::interval` rejects a zero period.
fn parse_positive<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, name, default)?;
    if value == 0 {
        return Err(invalid(name, "positive integer", value));
    }
    Ok(value)
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected: std::any::type_name::<T>(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/adpilot")]).unwrap();
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.reap.claim_timeout, Duration::from_secs(300));
        assert_eq!(config.reap.execution_timeout, Duration::from_secs(900));
        assert_eq!(config.reap.max_reclaims, 3);
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.attribution_batch_size, 100);
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.safety, SafetyPolicy::default());
    }

    #[test]
    fn database_url_required() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn overrides_parse() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/adpilot"),
            ("WORKER_ID", "worker-a"),
            ("MAX_BID_CHANGE_PCT", "12.5"),
            ("MAX_RECLAIMS", "5"),
        ])
        .unwrap();
        assert_eq!(config.worker_id, "worker-a");
        assert_eq!(config.safety.max_bid_change_pct, 12.5);
        assert_eq!(config.reap.max_reclaims, 5);
    }

    #[test]
    fn zero_intervals_rejected() {
        for name in [
            "POLL_INTERVAL_MS",
            "REAPER_INTERVAL_SECS",
            "ATTRIBUTION_INTERVAL_SECS",
            "CLAIM_TIMEOUT_SECS",
        ] {
            let err = load(&[("DATABASE_URL", "postgres://db"), (name, "0")]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { name: n, .. } if *n == name),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn batch_size_and_reclaims_bounded() {
        let err = load(&[("DATABASE_URL", "postgres://db"), ("ATTRIBUTION_BATCH_SIZE", "0")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ATTRIBUTION_BATCH_SIZE must be a valid positive integer, got \"0\""
        );

        let err = load(&[("DATABASE_URL", "postgres://db"), ("MAX_RECLAIMS", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_RECLAIMS", .. }));

        // Zero reclaims is allowed: the first stale claim fails the change.
        let config = load(&[("DATABASE_URL", "postgres://db"), ("MAX_RECLAIMS", "0")]).unwrap();
        assert_eq!(config.reap.max_reclaims, 0);
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = load(&[("DATABASE_URL", "postgres://db"), ("POLL_INTERVAL_MS", "soon")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "POLL_INTERVAL_MS must be a valid u64, got \"soon\""
        );
    }
}
