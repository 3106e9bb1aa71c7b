//! Engine configuration.
//!
//! Every setting has a default and may be overridden through a
//! `QUOTAWATCH_*` environment variable. Malformed values are logged and
//! replaced by the default; configuration never aborts startup.

use std::time::Duration;

use tracing::warn;

use quotawatch_state::ArchClass;

use crate::classifier::Classifier;
use crate::error::ConfigError;

pub const ENV_CACHE_TTL: &str = "QUOTAWATCH_CACHE_TTL";
pub const ENV_DEPT_REFRESH: &str = "QUOTAWATCH_DEPT_REFRESH_INTERVAL";
pub const ENV_NODE_REFRESH: &str = "QUOTAWATCH_NODE_REFRESH_INTERVAL";
pub const ENV_DEBOUNCE_WINDOW: &str = "QUOTAWATCH_DEBOUNCE_WINDOW";
pub const ENV_ARCH_RULES: &str = "QUOTAWATCH_ARCH_RULES";
pub const ENV_UNCLASSIFIED: &str = "QUOTAWATCH_UNCLASSIFIED";
pub const ENV_DEPARTMENT_LABEL: &str = "QUOTAWATCH_DEPARTMENT_LABEL";

/// Tunables for the aggregation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long a published snapshot is served before a read rebuilds it.
    pub cache_ttl: Duration,
    /// Periodic rebuild cadence of the department view.
    pub department_refresh: Duration,
    /// Periodic rebuild cadence of the node view.
    pub node_refresh: Duration,
    /// Fixed window a debounce worker waits after the first signal.
    pub quiet_period: Duration,
    pub classifier: Classifier,
    /// Pod label holding the owning department.
    pub department_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            department_refresh: Duration::from_secs(15),
            node_refresh: Duration::from_secs(10),
            quiet_period: Duration::from_millis(500),
            classifier: Classifier::default(),
            department_label: "department".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let duration = |key: &str, default: Duration| match lookup(key) {
            None => default,
            Some(raw) => match parse_duration(&raw) {
                Ok(value) if !value.is_zero() => value,
                Ok(_) => {
                    warn!(key, value = %raw, "zero duration not allowed; using default");
                    default
                }
                Err(e) => {
                    warn!(key, error = %e, "using default");
                    default
                }
            },
        };

        let cache_ttl = duration(ENV_CACHE_TTL, defaults.cache_ttl);
        let department_refresh = duration(ENV_DEPT_REFRESH, defaults.department_refresh);
        let node_refresh = duration(ENV_NODE_REFRESH, defaults.node_refresh);
        let quiet_period = duration(ENV_DEBOUNCE_WINDOW, defaults.quiet_period);

        let rules = match lookup(ENV_ARCH_RULES) {
            None => Classifier::default_rules(),
            Some(raw) => Classifier::parse_rules(&raw).unwrap_or_else(|e| {
                warn!(key = ENV_ARCH_RULES, error = %e, "using default rules");
                Classifier::default_rules()
            }),
        };
        let fallback = match lookup(ENV_UNCLASSIFIED) {
            None => defaults.classifier.fallback(),
            Some(raw) => parse_fallback(&raw).unwrap_or_else(|e| {
                warn!(key = ENV_UNCLASSIFIED, error = %e, "using default policy");
                defaults.classifier.fallback()
            }),
        };

        let department_label = lookup(ENV_DEPARTMENT_LABEL)
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .unwrap_or(defaults.department_label);

        Self {
            cache_ttl,
            department_refresh,
            node_refresh,
            quiet_period,
            classifier: Classifier::new(rules, fallback),
            department_label,
        }
    }
}

/// `drop` discards unclassified names; any class name assigns them to it.
fn parse_fallback(text: &str) -> Result<Option<ArchClass>, ConfigError> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("drop") {
        return Ok(None);
    }
    ArchClass::from_name(text)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidPolicy(text.to_string()))
}

/// Parse a duration such as `500ms`, `30s`, `1m30s` or `1.5h`.
///
/// Accepted units are `ns`, `us`, `µs`, `ms`, `s`, `m` and `h`. A bare `0`
/// is accepted; any other number needs a unit.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(text.to_string());
    let input = text.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err(invalid());
    }

    let mut total_nanos = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        total_nanos += value * nanos_per_unit;
        rest = tail;
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::classifier::ArchRule;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        for bad in ["", "30", "s", "10x", "1..5s", "-3s", "ten seconds"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(EngineConfig::from_lookup(|_| None), EngineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_CACHE_TTL, "1m"),
            (ENV_DEPT_REFRESH, "5s"),
            (ENV_NODE_REFRESH, "3s"),
            (ENV_DEBOUNCE_WINDOW, "200ms"),
            (ENV_ARCH_RULES, "arm=xcArm"),
            (ENV_UNCLASSIFIED, "drop"),
            (ENV_DEPARTMENT_LABEL, "team"),
        ]));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.department_refresh, Duration::from_secs(5));
        assert_eq!(config.node_refresh, Duration::from_secs(3));
        assert_eq!(config.quiet_period, Duration::from_millis(200));
        assert_eq!(config.classifier.rules(), &[ArchRule::new("arm", ArchClass::XcArm)]);
        assert_eq!(config.classifier.fallback(), None);
        assert_eq!(config.classifier.classify("arm-01"), Some(ArchClass::XcArm));
        assert_eq!(config.classifier.classify("b-01"), None);
        assert_eq!(config.department_label, "team");
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_CACHE_TTL, "soon"),
            (ENV_NODE_REFRESH, "0"),
            (ENV_ARCH_RULES, "kk"),
            (ENV_UNCLASSIFIED, "gpu"),
            (ENV_DEPARTMENT_LABEL, "  "),
        ]));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn unclassified_policy_can_name_a_class() {
        let config = EngineConfig::from_lookup(lookup_from(&[(ENV_UNCLASSIFIED, "xcX86")]));
        assert_eq!(config.classifier.classify("gpu-01"), Some(ArchClass::XcX86));
    }
}
