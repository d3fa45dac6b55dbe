//! Configuration parameters consumed by the engine, conditions, resolvers,
//! and the dynamic display-name formatter.
//!
//! Parameters are a flat string-keyed lookup. They can be given in code
//! ([MapConfiguration::with]) or read from an `arbor.toml` file, where nested
//! tables are flattened into dotted keys:
//! ```toml
//! # (Optional) Version of arbor this file was written for.
//! ver = "0.3.0"
//!
//! [arbor.execution.parallel]
//! enabled = true
//!
//! [arbor.execution.parallel.config]
//! parallelism = 4
//!
//! [arbor.testinstance.lifecycle]
//! default = "per_class"
//! ```
use crate::errors::{self, ArborError};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::Path,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

/// Well-known configuration keys.
pub mod keys {
    pub const DEFAULT_LIFECYCLE: &str = "arbor.testinstance.lifecycle.default";
    pub const PARALLEL_ENABLED: &str = "arbor.execution.parallel.enabled";
    pub const DEFAULT_EXECUTION_MODE: &str = "arbor.execution.parallel.mode.default";
    pub const DEFAULT_CLASSES_EXECUTION_MODE: &str =
        "arbor.execution.parallel.mode.classes.default";
    pub const PARALLELISM: &str = "arbor.execution.parallel.config.parallelism";
    pub const DEFAULT_TIMEOUT: &str = "arbor.execution.timeout.default";
    pub const DEACTIVATE_CONDITIONS: &str = "arbor.conditions.deactivate";
    pub const DEFAULT_HOOK_ORDER: &str = "arbor.hooks.order.default";
    pub const DEFAULT_DISPLAY_NAME: &str = "arbor.params.displayname.default";
    pub const ARGUMENT_MAX_LENGTH: &str = "arbor.params.displayname.argument.maxlength";
}

/// A flat, string-keyed lookup of configuration values.
/// Unknown keys are absent, never an error.
pub trait ConfigurationParameters: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Keys known to this configuration, where enumerable.
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// `true`/`false`, case-insensitive. Other values are logged and ignored.
    fn get_bool(&self, key: &str) -> Option<bool> {
        let raw = self.get(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => {
                tracing::warn!(key, value = %raw, "ignoring non-boolean configuration value");
                None
            }
        }
    }

    fn get_usize(&self, key: &str) -> Option<usize> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring non-numeric configuration value");
                None
            }
        }
    }

    fn get_duration(&self, key: &str) -> Option<Duration> {
        let raw = self.get(key)?;
        match parse_duration(&raw) {
            Some(d) => Some(d),
            None => {
                tracing::warn!(key, value = %raw, "ignoring malformed duration");
                None
            }
        }
    }
}

/// Look up `key` and parse it with [FromStr], logging and ignoring values
/// that do not parse.
pub fn get_parsed<T>(config: &dyn ConfigurationParameters, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = config.get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::warn!(key, value = %raw, "ignoring configuration value: {}", err);
            None
        }
    }
}

/// Parse durations of the form `250ms`, `5s`, `2m`, or a bare number of
/// seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        _ => None,
    }
}

/// Configuration backed by an ordered map.
#[derive(Debug, Clone, Default)]
pub struct MapConfiguration {
    values: BTreeMap<String, String>,
}

/// Layout of an `arbor.toml` file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    /// Version of arbor the file was written for.
    ver: Option<String>,
    #[serde(flatten)]
    parameters: toml::value::Table,
}

impl MapConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parse TOML text. `origin` names the source in error messages.
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ArborError> {
        let conf: ConfigFile = toml::from_str(contents).map_err(|err| ArborError::Parse {
            path: origin.to_path_buf(),
            source: err,
        })?;

        // Check if this version of arbor matches the version specified in the
        // configuration.
        if let Some(required) = conf.ver {
            if required != env!("CARGO_PKG_VERSION") {
                return Err(ArborError::VersionMismatch {
                    required,
                    actual: env!("CARGO_PKG_VERSION").to_string(),
                });
            }
        }

        let mut values = BTreeMap::new();
        for (key, value) in conf.parameters {
            flatten(&key, value, &mut values);
        }
        Ok(MapConfiguration { values })
    }

    /// Create a configuration by reading an `arbor.toml` file from `conf_dir`.
    pub fn from_path(conf_dir: &Path) -> Result<Self, ArborError> {
        let conf_path = conf_dir.join("arbor.toml");
        let contents = std::fs::read_to_string(&conf_path).map_err(|err| ArborError::Io {
            path: conf_path.clone(),
            source: err,
        })?;
        Self::from_toml_str(&contents, &conf_path)
    }
}

fn flatten(prefix: &str, value: toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                flatten(&format!("{}.{}", prefix, key), nested, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s);
        }
        toml::Value::Array(items) => {
            let joined = items
                .into_iter()
                .map(|item| match item {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

impl ConfigurationParameters for MapConfiguration {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfiguration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MapConfiguration {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A view that prepends a namespace to every key before delegating.
pub struct PrefixedConfiguration {
    prefix: String,
    delegate: Arc<dyn ConfigurationParameters>,
}

impl PrefixedConfiguration {
    pub fn new(prefix: impl Into<String>, delegate: Arc<dyn ConfigurationParameters>) -> Self {
        PrefixedConfiguration {
            prefix: prefix.into(),
            delegate,
        }
    }
}

impl ConfigurationParameters for PrefixedConfiguration {
    fn get(&self, key: &str) -> Option<String> {
        self.delegate.get(&format!("{}{}", self.prefix, key))
    }

    fn keys(&self) -> Vec<String> {
        self.delegate
            .keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect()
    }
}

/// Several configurations consulted in order; the first hit wins.
#[derive(Default)]
pub struct LayeredConfiguration {
    layers: Vec<Arc<dyn ConfigurationParameters>>,
}

impl LayeredConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer with lower precedence than all existing layers.
    pub fn then(mut self, layer: Arc<dyn ConfigurationParameters>) -> Self {
        self.layers.push(layer);
        self
    }
}

impl ConfigurationParameters for LayeredConfiguration {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.layers.iter().flat_map(|l| l.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// How many test instances are created for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// A fresh instance for every test.
    #[default]
    PerMethod,
    /// One instance shared by every test of the class.
    PerClass,
}

impl FromStr for Lifecycle {
    type Err = errors::TestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per_method" => Ok(Lifecycle::PerMethod),
            "per_class" => Ok(Lifecycle::PerClass),
            _ => Err(errors::TestError::configuration(
                "Must be one of per_method, per_class.",
            )),
        }
    }
}

/// Whether a node may run concurrently with its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    SameThread,
    Concurrent,
}

impl FromStr for ExecutionMode {
    type Err = errors::TestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "same_thread" => Ok(ExecutionMode::SameThread),
            "concurrent" => Ok(ExecutionMode::Concurrent),
            _ => Err(errors::TestError::configuration(
                "Must be one of same_thread, concurrent.",
            )),
        }
    }
}

/// Order of several hooks of the same kind declared by one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookOrder {
    /// The order in which hooks were declared.
    #[default]
    Declaration,
    /// Sorted by hook name; ties keep declaration order.
    Alphanumeric,
}

impl FromStr for HookOrder {
    type Err = errors::TestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "declaration" => Ok(HookOrder::Declaration),
            "alphanumeric" => Ok(HookOrder::Alphanumeric),
            _ => Err(errors::TestError::configuration(
                "Must be one of declaration, alphanumeric.",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_tables_flatten_to_dotted_keys() {
        let conf = MapConfiguration::from_toml_str(
            r#"
[arbor.execution.parallel]
enabled = true

[arbor.execution.parallel.config]
parallelism = 4

[arbor.conditions]
deactivate = ["*Slow*", "Flaky"]
"#,
            Path::new("arbor.toml"),
        )
        .unwrap();
        assert_eq!(conf.get_bool(keys::PARALLEL_ENABLED), Some(true));
        assert_eq!(conf.get_usize(keys::PARALLELISM), Some(4));
        assert_eq!(
            conf.get(keys::DEACTIVATE_CONDITIONS).as_deref(),
            Some("*Slow*,Flaky")
        );
        assert_eq!(conf.get("arbor.unknown"), None);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let err = MapConfiguration::from_toml_str("ver = \"0.0.1\"", Path::new("arbor.toml"))
            .unwrap_err();
        assert!(matches!(err, ArborError::VersionMismatch { .. }));
    }

    #[test]
    fn malformed_values_are_absent() {
        let conf = MapConfiguration::new()
            .with(keys::PARALLEL_ENABLED, "yes please")
            .with(keys::PARALLELISM, "lots")
            .with(keys::DEFAULT_LIFECYCLE, "forever");
        assert_eq!(conf.get_bool(keys::PARALLEL_ENABLED), None);
        assert_eq!(conf.get_usize(keys::PARALLELISM), None);
        assert_eq!(get_parsed::<Lifecycle>(&conf, keys::DEFAULT_LIFECYCLE), None);
    }

    #[test]
    fn prefixed_view_prepends_namespace() {
        let base: Arc<dyn ConfigurationParameters> =
            Arc::new(MapConfiguration::new().with("arbor.params.displayname.default", "{index}"));
        let params = PrefixedConfiguration::new("arbor.params.", base);
        assert_eq!(params.get("displayname.default").as_deref(), Some("{index}"));
        assert_eq!(params.keys(), vec!["displayname.default".to_string()]);
    }

    #[test]
    fn layers_resolve_first_hit() {
        let explicit: Arc<dyn ConfigurationParameters> =
            Arc::new(MapConfiguration::new().with("a", "explicit"));
        let file: Arc<dyn ConfigurationParameters> =
            Arc::new(MapConfiguration::new().with("a", "file").with("b", "file"));
        let conf = LayeredConfiguration::new().then(explicit).then(file);
        assert_eq!(conf.get("a").as_deref(), Some("explicit"));
        assert_eq!(conf.get("b").as_deref(), Some("file"));
        assert_eq!(conf.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
    }
}
