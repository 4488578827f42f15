//! Per-run bounds and toggles.
//!
//! Each option resolves independently: explicit override, then the
//! environment, then the hardcoded default.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ResearchError;

const DEFAULT_MAX_SEARCH_QUERIES: usize = 3;
const DEFAULT_MAX_SEARCH_RESULTS: usize = 3;
const DEFAULT_MAX_REFLECTION_STEPS: u32 = 0;
/// Upper bound accepted for `max_reflection_steps`.
const REFLECTION_STEPS_LIMIT: u32 = 100;

/// Immutable configuration for one research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub max_search_queries: usize,
    pub max_search_results: usize,
    pub max_reflection_steps: u32,
    pub include_search_results: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_search_queries: DEFAULT_MAX_SEARCH_QUERIES,
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            max_reflection_steps: DEFAULT_MAX_REFLECTION_STEPS,
            include_search_results: false,
        }
    }
}

type Apply = fn(&mut RunConfig, &str, &str) -> Result<(), ResearchError>;

/// One recognised option: its override name, environment key, and coercion.
struct OptionSpec {
    name: &'static str,
    env_key: &'static str,
    apply: Apply,
}

const OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "max_search_queries",
        env_key: "MAX_SEARCH_QUERIES",
        apply: apply_max_search_queries,
    },
    OptionSpec {
        name: "max_search_results",
        env_key: "MAX_SEARCH_RESULTS",
        apply: apply_max_search_results,
    },
    OptionSpec {
        name: "max_reflection_steps",
        env_key: "MAX_REFLECTION_STEPS",
        apply: apply_max_reflection_steps,
    },
    OptionSpec {
        name: "include_search_results",
        env_key: "INCLUDE_SEARCH_RESULTS",
        apply: apply_include_search_results,
    },
];

fn apply_max_search_queries(config: &mut RunConfig, name: &str, raw: &str) -> Result<(), ResearchError> {
    config.max_search_queries = parse_count(name, raw, 1)?;
    Ok(())
}

fn apply_max_search_results(config: &mut RunConfig, name: &str, raw: &str) -> Result<(), ResearchError> {
    config.max_search_results = parse_count(name, raw, 1)?;
    Ok(())
}

fn apply_max_reflection_steps(config: &mut RunConfig, name: &str, raw: &str) -> Result<(), ResearchError> {
    let steps = parse_count(name, raw, 0)?;
    config.max_reflection_steps = u32::try_from(steps)
        .ok()
        .filter(|steps| *steps <= REFLECTION_STEPS_LIMIT)
        .ok_or_else(|| {
            ResearchError::config(format!(
                "{name} must be at most {REFLECTION_STEPS_LIMIT}, got {raw}"
            ))
        })?;
    Ok(())
}

fn apply_include_search_results(config: &mut RunConfig, name: &str, raw: &str) -> Result<(), ResearchError> {
    config.include_search_results = parse_flag(name, raw)?;
    Ok(())
}

fn parse_count(name: &str, raw: &str, min: usize) -> Result<usize, ResearchError> {
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| ResearchError::config(format!("{name} must be a non-negative integer, got {raw:?}")))?;
    if value < min {
        return Err(ResearchError::config(format!(
            "{name} must be at least {min}, got {value}"
        )));
    }
    Ok(value)
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, ResearchError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ResearchError::config(format!(
            "{name} must be `true` or `false`, got {raw:?}"
        )))
    }
}

/// Explicit overrides keyed by option name, values in text form.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    values: BTreeMap<String, String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(name.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.values.insert(name.into(), value.to_string());
    }
}

impl RunConfig {
    /// Resolve against the process environment.
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self, ResearchError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an injected environment lookup.
    pub fn resolve_with<F>(overrides: &ConfigOverrides, env: F) -> Result<Self, ResearchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in overrides.values.keys() {
            if !OPTIONS.iter().any(|option| option.name == name) {
                return Err(ResearchError::config(format!("unknown run option `{name}`")));
            }
        }

        let mut config = RunConfig::default();
        for option in OPTIONS {
            let raw = overrides
                .values
                .get(option.name)
                .cloned()
                .or_else(|| env(option.env_key));
            if let Some(raw) = raw {
                (option.apply)(&mut config, option.name, &raw)?;
            }
        }

        tracing::debug!(
            max_search_queries = config.max_search_queries,
            max_search_results = config.max_search_results,
            max_reflection_steps = config.max_reflection_steps,
            include_search_results = config.include_search_results,
            "resolved run configuration"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn hardcoded_defaults_apply_without_sources() {
        let config = RunConfig::resolve_with(&ConfigOverrides::new(), env_of(&[])).unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.max_search_queries, 3);
        assert_eq!(config.max_search_results, 3);
        assert_eq!(config.max_reflection_steps, 0);
        assert!(!config.include_search_results);
    }

    #[test]
    fn explicit_override_beats_environment_per_field() {
        let overrides = ConfigOverrides::new().set("max_search_queries", 5);
        let env = env_of(&[
            ("MAX_SEARCH_QUERIES", "2"),
            ("MAX_REFLECTION_STEPS", "4"),
            ("INCLUDE_SEARCH_RESULTS", "TRUE"),
        ]);
        let config = RunConfig::resolve_with(&overrides, env).unwrap();

        assert_eq!(config.max_search_queries, 5);
        assert_eq!(config.max_reflection_steps, 4);
        assert_eq!(config.max_search_results, 3);
        assert!(config.include_search_results);
    }

    #[test]
    fn rejects_non_numeric_counts() {
        let overrides = ConfigOverrides::new().set("max_search_results", "three");
        let err = RunConfig::resolve_with(&overrides, env_of(&[])).unwrap_err();
        assert!(matches!(err, ResearchError::Config(_)));
    }

    #[test]
    fn rejects_zero_queries_but_allows_zero_reflection() {
        let err = RunConfig::resolve_with(
            &ConfigOverrides::new().set("max_search_queries", 0),
            env_of(&[]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least 1"));

        let config = RunConfig::resolve_with(
            &ConfigOverrides::new().set("max_reflection_steps", 0),
            env_of(&[]),
        )
        .unwrap();
        assert_eq!(config.max_reflection_steps, 0);
    }

    #[test]
    fn rejects_reflection_steps_beyond_the_limit() {
        let huge = u32::MAX.to_string();
        let err = RunConfig::resolve_with(
            &ConfigOverrides::new(),
            env_of(&[("MAX_REFLECTION_STEPS", huge.as_str())]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("at most 100"));

        let config = RunConfig::resolve_with(
            &ConfigOverrides::new().set("max_reflection_steps", REFLECTION_STEPS_LIMIT),
            env_of(&[]),
        )
        .unwrap();
        assert_eq!(config.max_reflection_steps, REFLECTION_STEPS_LIMIT);
    }

    #[test]
    fn rejects_non_canonical_booleans_from_environment() {
        let err = RunConfig::resolve_with(
            &ConfigOverrides::new(),
            env_of(&[("INCLUDE_SEARCH_RESULTS", "yes")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("include_search_results"));
    }

    #[test]
    fn rejects_unknown_option_names() {
        let overrides = ConfigOverrides::new().set("max_queries", 2);
        assert!(RunConfig::resolve_with(&overrides, env_of(&[])).is_err());
    }
}
