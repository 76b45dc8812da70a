//! Runtime configuration from environment variables.
//!
//! `main` loads a `.env` file first (dotenvy), so every setting can live
//! there or in the process environment.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::SolverConfig;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// JSON array of model definitions; built-in models when unset
    pub models_path: Option<PathBuf>,
    /// JSON framework catalog; built-in catalog when unset
    pub framework_path: Option<PathBuf>,
    pub solver: SolverConfig,
    pub session_ttl: Duration,
    pub session_capacity: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            models_path: None,
            framework_path: None,
            solver: SolverConfig::default(),
            session_ttl: Duration::from_secs(30 * 60),
            session_capacity: 10_000,
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn invalid(var: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let tolerance: f64 = parse_var(&lookup, "CALC_SOLVER_TOLERANCE", defaults.solver.tolerance)?;
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(invalid("CALC_SOLVER_TOLERANCE", tolerance, "must be a positive number"));
        }
        let max_iterations: usize = parse_var(
            &lookup,
            "CALC_SOLVER_MAX_ITERATIONS",
            defaults.solver.max_iterations,
        )?;
        if max_iterations == 0 {
            return Err(invalid("CALC_SOLVER_MAX_ITERATIONS", 0, "must be at least 1"));
        }
        let scan_segments: usize = parse_var(
            &lookup,
            "CALC_SOLVER_SCAN_SEGMENTS",
            defaults.solver.scan_segments,
        )?;
        if scan_segments == 0 {
            return Err(invalid("CALC_SOLVER_SCAN_SEGMENTS", 0, "must be at least 1"));
        }

        let ttl_secs: u64 = parse_var(
            &lookup,
            "CALC_SESSION_TTL_SECS",
            defaults.session_ttl.as_secs(),
        )?;
        if ttl_secs == 0 {
            return Err(invalid("CALC_SESSION_TTL_SECS", 0, "must be at least 1"));
        }

        Ok(Self {
            host: parse_var(&lookup, "CALC_HOST", defaults.host)?,
            port: parse_var(&lookup, "CALC_PORT", defaults.port)?,
            models_path: lookup("CALC_MODELS_PATH").map(PathBuf::from),
            framework_path: lookup("CALC_FRAMEWORK_PATH").map(PathBuf::from),
            solver: SolverConfig {
                tolerance,
                max_iterations,
                scan_segments,
            },
            session_ttl: Duration::from_secs(ttl_secs),
            session_capacity: parse_var(
                &lookup,
                "CALC_SESSION_CAPACITY",
                defaults.session_capacity,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.solver.max_iterations, 100);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("CALC_HOST", "0.0.0.0"),
            ("CALC_PORT", "9000"),
            ("CALC_MODELS_PATH", "/etc/calc/models.json"),
            ("CALC_SOLVER_TOLERANCE", "1e-6"),
            ("CALC_SOLVER_MAX_ITERATIONS", " 250 "),
            ("CALC_SESSION_TTL_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.port, 9000);
        assert_eq!(config.models_path, Some(PathBuf::from("/etc/calc/models.json")));
        assert_eq!(config.solver.tolerance, 1e-6);
        assert_eq!(config.solver.max_iterations, 250);
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert!(config.framework_path.is_none());
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = Config::from_lookup(lookup(&[("CALC_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().starts_with("CALC_PORT="));

        let err = Config::from_lookup(lookup(&[("CALC_SOLVER_MAX_ITERATIONS", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "CALC_SOLVER_MAX_ITERATIONS",
                ..
            }
        ));

        assert!(Config::from_lookup(lookup(&[("CALC_SOLVER_TOLERANCE", "-1")])).is_err());
    }
}
