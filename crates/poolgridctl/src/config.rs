//! poolgrid.toml configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use poolgrid_nodegroup::{AnnotationKeys, DEFAULT_API_GROUP};
use poolgrid_nodegroupset::ComparatorConfig;

/// Read when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_PATH: &str = "poolgrid.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolgridConfig {
    pub store: StoreConfig,
    pub annotations: AnnotationsConfig,
    pub similarity: ComparatorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/poolgrid/poolgrid.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationsConfig {
    /// API group prefix of every annotation key.
    pub group: String,
}

impl Default for AnnotationsConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_API_GROUP.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,poolgrid=debug".to_string(),
            json: false,
        }
    }
}

impl PoolgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PoolgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if given, else `poolgrid.toml` if present, else defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn annotation_keys(&self) -> AnnotationKeys {
        AnnotationKeys::for_group(&self.annotations.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: PoolgridConfig = toml::from_str("").unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/poolgrid/poolgrid.redb"));
        assert_eq!(config.annotations.group, "machine.openshift.io");
        assert_eq!(config.similarity, ComparatorConfig::default());
        assert!(!config.log.json);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[store]
path = "/tmp/pools.redb"

[annotations]
group = "cluster.x-k8s.io"

[similarity]
capacity_tolerance = "1Mi"
max_allocatable_difference_ratio = 0.1

[log]
filter = "debug"
json = true
"#;
        let config: PoolgridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/pools.redb"));
        assert_eq!(
            config.annotation_keys().min_size,
            "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size"
        );
        assert_eq!(config.similarity.capacity_tolerance.value(), 1024 * 1024);
        assert_eq!(config.similarity.max_allocatable_difference_ratio, 0.1);
        assert_eq!(config.similarity.max_free_difference_ratio, 0.05);
        assert_eq!(config.log.filter, "debug");
        assert!(config.log.json);
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poolgrid.toml");
        std::fs::write(&path, "[annotations]\ngroup = \"example.io\"\n").unwrap();

        let config = PoolgridConfig::load(Some(&path)).unwrap();
        assert_eq!(config.annotations.group, "example.io");
        assert!(PoolgridConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn rejects_bad_quantity() {
        let result: Result<PoolgridConfig, _> =
            toml::from_str("[similarity]\ncapacity_tolerance = \"lots\"\n");
        assert!(result.is_err());
    }
}
