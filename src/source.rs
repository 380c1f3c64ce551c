//! Configuration sources and document parsing.
//!
//! The engine accepts configuration bytes plus a declared format; where the
//! bytes come from is behind [`ConfSource`]. A local-file source ships
//! here; key-value backed sources (etcd, redis) are adapters outside the
//! core.

use std::fmt;
use std::path::PathBuf;

use crate::error::WeirError;
use crate::rule::Conf;

/// Where configuration bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    File,
    Etcd,
    Redis,
}

/// Declared serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Json,
    Yaml,
    Toml,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Json => f.write_str("json"),
            DataType::Yaml => f.write_str("yaml"),
            DataType::Toml => f.write_str("toml"),
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = WeirError;

    /// Resolve a declared format name; anything else is
    /// [`WeirError::FileType`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(DataType::Json),
            "yaml" | "yml" => Ok(DataType::Yaml),
            "toml" => Ok(DataType::Toml),
            _ => Err(WeirError::FileType),
        }
    }
}

/// A place configuration can be read from.
pub trait ConfSource: Send + Sync {
    fn read(&self) -> Result<Vec<u8>, WeirError>;
    fn source_type(&self) -> SourceType;
    fn data_type(&self) -> DataType;
}

/// Rule metadata read from the local filesystem.
pub struct FileSource {
    path: PathBuf,
    data_type: DataType,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, data_type: DataType) -> Self {
        Self { path: path.into(), data_type }
    }
}

impl ConfSource for FileSource {
    fn read(&self) -> Result<Vec<u8>, WeirError> {
        std::fs::read(&self.path).map_err(|err| {
            WeirError::invalid(format!("reading {}: {}", self.path.display(), err))
        })
    }

    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// Deserialize and validate a configuration document.
///
/// Any deserialization or validation failure aborts the load; nothing is
/// partially applied.
pub fn parse_conf(bytes: &[u8], data_type: DataType) -> Result<Conf, WeirError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| WeirError::invalid(format!("document is not UTF-8: {}", err)))?;
    let conf: Conf = match data_type {
        DataType::Json => decoded(serde_json::from_str(text))?,
        DataType::Yaml => decoded(serde_yaml::from_str(text))?,
        DataType::Toml => decoded(toml::from_str(text))?,
    };
    conf.check()?;
    Ok(conf)
}

/// Read a source end to end: bytes, deserialize, validate.
pub fn load_conf(source: &dyn ConfSource) -> Result<Conf, WeirError> {
    parse_conf(&source.read()?, source.data_type())
}

fn decoded<T, E: fmt::Display>(result: Result<T, E>) -> Result<T, WeirError> {
    result.map_err(|err| WeirError::invalid(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{ScopeType, StrategyType};

    const JSON_DOC: &str = r#"{
        "base_threshold": 1000,
        "min_threshold": 300,
        "strategy": "qps",
        "period": "1s",
        "priority": "high",
        "rules": [
            {
                "scope": {"type": "service", "value": "order_service"},
                "base_threshold": 1000,
                "min_threshold": 300,
                "strategy": "qps",
                "priority": "medium",
                "period": "1s",
                "trigger": "cpu_usage > 0.8 OR (mem_usage > 0.8 AND err_rate > 0.2)",
                "children": [
                    {
                        "scope": {"type": "user", "value": "*"},
                        "base_threshold": 5,
                        "strategy": "total",
                        "priority": "low",
                        "period": "1m",
                        "algorithm": "SlidingWindow"
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_json_document() {
        let conf = parse_conf(JSON_DOC.as_bytes(), DataType::Json).unwrap();
        assert_eq!(conf.base_threshold, 1000);
        assert_eq!(conf.rules.len(), 1);
        let rule = &conf.rules[0];
        assert_eq!(rule.scope.scope_type, ScopeType::Service);
        assert_eq!(rule.children[0].strategy, StrategyType::Total);
        assert_eq!(rule.children[0].period, "1m");
    }

    #[test]
    fn parses_yaml_document() {
        let doc = r#"
base_threshold: 1000
min_threshold: 300
strategy: qps
period: 1s
priority: high
rules:
  - scope:
      type: api
      value: /api/v1/order
    base_threshold: 500
    min_threshold: 100
    strategy: concurrency
    priority: low
    period: 1s
"#;
        let conf = parse_conf(doc.as_bytes(), DataType::Yaml).unwrap();
        assert_eq!(conf.rules[0].scope.value, "/api/v1/order");
        assert_eq!(conf.rules[0].base_threshold, 500);
    }

    #[test]
    fn parses_toml_document() {
        let doc = r#"
base_threshold = 1000
strategy = "qps"
period = "1s"
priority = "high"

[[rules]]
base_threshold = 300
strategy = "qps"
priority = "low"
period = "1s"
scope = { type = "api", value = "/api/v1/user" }

[[rules.children]]
base_threshold = 5
strategy = "total"
priority = "low"
period = "1m"
scope = { type = "ip", value = "*" }
"#;
        let conf = parse_conf(doc.as_bytes(), DataType::Toml).unwrap();
        assert_eq!(conf.rules[0].children[0].scope.scope_type, ScopeType::Ip);
    }

    #[test]
    fn invalid_document_aborts_load() {
        // Well-formed JSON, but the trigger does not compile.
        let doc = r#"{
            "base_threshold": 10, "strategy": "qps", "period": "1s",
            "priority": "low",
            "rules": [{
                "scope": {"type": "service", "value": "svc"},
                "base_threshold": 10, "strategy": "qps", "priority": "low",
                "period": "1s", "trigger": "cpu_usage >"
            }]
        }"#;
        assert!(parse_conf(doc.as_bytes(), DataType::Json).is_err());
    }

    #[test]
    fn malformed_syntax_is_invalid_config() {
        let err = parse_conf(b"{not json", DataType::Json).unwrap_err();
        assert!(matches!(err, WeirError::InvalidConfig { .. }));
    }

    #[test]
    fn file_source_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, JSON_DOC).unwrap();

        let source = FileSource::new(&path, DataType::Json);
        assert_eq!(source.source_type(), SourceType::File);
        let conf = load_conf(&source).unwrap();
        assert_eq!(conf.rules.len(), 1);
    }

    #[test]
    fn missing_file_fails() {
        let source = FileSource::new("/nonexistent/rules.json", DataType::Json);
        assert!(load_conf(&source).is_err());
    }

    #[test]
    fn unknown_format_name_is_file_type_error() {
        assert_eq!("json".parse::<DataType>(), Ok(DataType::Json));
        assert_eq!("yml".parse::<DataType>(), Ok(DataType::Yaml));
        assert_eq!("ini".parse::<DataType>(), Err(WeirError::FileType));
    }
}
