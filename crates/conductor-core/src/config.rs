use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::flow::FlowDefinition;

/// Settings describing the remote logging target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLoggingConfig {
    #[serde(alias = "url")]
    pub target: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub verify: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_true() -> bool {
    true
}

/// Kind of repository backing a resource or code location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    #[default]
    Filesystem,
    Http,
    Git,
}

/// Description of a repository that stores resources or code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryLocation {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type")]
    pub kind: LocationKind,
    #[serde(alias = "path", alias = "url", alias = "target")]
    pub location: String,
    #[serde(default, alias = "ref", alias = "branch")]
    pub reference: Option<String>,
    #[serde(default, alias = "sub_path", alias = "folder")]
    pub subpath: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Runtime configuration shared across the entire flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default, alias = "environment")]
    pub env: BTreeMap<String, String>,
    #[serde(default, alias = "sharedState")]
    pub shared_state: Map<String, Value>,
    #[serde(default, alias = "remoteLogging")]
    pub remote_logging: Option<RemoteLoggingConfig>,
    #[serde(default, alias = "python_dependencies")]
    pub dependencies: Vec<String>,
    #[serde(default, alias = "containerRegistries")]
    pub container_registries: Vec<String>,
    #[serde(default = "default_pool_size", alias = "processPoolSize")]
    pub process_pool_size: usize,
    #[serde(default = "default_concurrency", alias = "maxConcurrency")]
    pub max_concurrency: usize,
    #[serde(default, alias = "defaultTimeout")]
    pub default_timeout: Option<f64>,
    #[serde(
        default,
        alias = "resourceLocations",
        deserialize_with = "deserialize_locations"
    )]
    pub resource_locations: BTreeMap<String, RepositoryLocation>,
    #[serde(
        default,
        alias = "codeLocations",
        deserialize_with = "deserialize_locations"
    )]
    pub code_locations: BTreeMap<String, RepositoryLocation>,
    #[serde(default, alias = "resourceCacheDir")]
    pub resource_cache_dir: Option<PathBuf>,
}

fn default_pool_size() -> usize {
    1
}

fn default_concurrency() -> usize {
    4
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            shared_state: Map::new(),
            remote_logging: None,
            dependencies: Vec::new(),
            container_registries: Vec::new(),
            process_pool_size: default_pool_size(),
            max_concurrency: default_concurrency(),
            default_timeout: None,
            resource_locations: BTreeMap::new(),
            code_locations: BTreeMap::new(),
            resource_cache_dir: None,
        }
    }
}

impl GlobalConfig {
    /// Return the fully qualified container image using the configured
    /// registries. Images that already name a registry (scheme, host with a
    /// dot or port) pass through untouched.
    pub fn resolve_image(&self, image: &str) -> String {
        if image.contains("://") {
            return image.to_string();
        }
        if let Some(first) = image.split('/').next() {
            if image.contains('/') && (first.contains('.') || first.contains(':')) {
                return image.to_string();
            }
        }
        match self.container_registries.first() {
            Some(registry) => format!("{}/{}", registry.trim_end_matches('/'), image),
            None => image.to_string(),
        }
    }
}

// Locations may be written as a mapping keyed by name or as a list of
// entries that carry their own `name`.
fn deserialize_locations<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, RepositoryLocation>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawLocations {
        Table(BTreeMap<String, RepositoryLocation>),
        List(Vec<RepositoryLocation>),
    }

    let raw = RawLocations::deserialize(deserializer)?;
    let mut locations = BTreeMap::new();
    match raw {
        RawLocations::Table(table) => {
            for (name, mut location) in table {
                location.name = name.clone();
                locations.insert(name, location);
            }
        }
        RawLocations::List(list) => {
            for location in list {
                if location.name.is_empty() {
                    return Err(serde::de::Error::custom(
                        "location entries in list form require a 'name'",
                    ));
                }
                if locations.contains_key(&location.name) {
                    return Err(serde::de::Error::custom(format!(
                        "duplicate location '{}'",
                        location.name
                    )));
                }
                locations.insert(location.name.clone(), location);
            }
        }
    }
    Ok(locations)
}

// ---------------------------------------------------------------------------
// Loading helpers
// ---------------------------------------------------------------------------

/// Parse a configuration document, dispatching on the file extension:
/// `.yaml`/`.yml` and `.toml` when those dialects are requested, JSON
/// otherwise. All dialects produce the same logical structure.
pub fn parse_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let parsed = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&text).map_err(|err| err.to_string()),
        "toml" => toml::from_str(&text).map_err(|err| err.to_string()),
        _ => serde_json::from_str(&text).map_err(|err| err.to_string()),
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    })
}

/// Load and validate a flow definition from `path`.
pub fn load_flow(path: impl AsRef<Path>) -> Result<FlowDefinition, ConfigError> {
    let flow: FlowDefinition = parse_document(path.as_ref())?;
    flow.validate()?;
    Ok(flow)
}

/// Load the global configuration from `path`.
pub fn load_global(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
    parse_document(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn defaults_applied() {
        let config: GlobalConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.process_pool_size, 1);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.remote_logging.is_none());
        assert!(config.env.is_empty());
    }

    #[test]
    fn camel_case_aliases_accepted() {
        let config: GlobalConfig = serde_json::from_value(json!({
            "maxConcurrency": 8,
            "processPoolSize": 2,
            "sharedState": {"ready": true},
            "remoteLogging": {"url": "https://logs.example.com/ingest"}
        }))
        .unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.process_pool_size, 2);
        assert_eq!(config.shared_state.get("ready"), Some(&json!(true)));
        let remote = config.remote_logging.unwrap();
        assert_eq!(remote.target, "https://logs.example.com/ingest");
        assert_eq!(remote.method, "POST");
        assert!(remote.enabled);
        assert!(remote.verify);
    }

    #[test]
    fn locations_accepted_as_table_or_list() {
        let config: GlobalConfig = serde_json::from_value(json!({
            "resource_locations": {
                "assets": {"type": "http", "url": "https://cdn.example.com/assets"}
            },
            "code_locations": [
                {"name": "lib", "type": "git", "location": "https://example.com/lib.git", "branch": "main"}
            ]
        }))
        .unwrap();
        let assets = &config.resource_locations["assets"];
        assert_eq!(assets.kind, LocationKind::Http);
        assert_eq!(assets.name, "assets");
        let lib = &config.code_locations["lib"];
        assert_eq!(lib.kind, LocationKind::Git);
        assert_eq!(lib.reference.as_deref(), Some("main"));
    }

    #[test]
    fn resolve_image_prefixes_unqualified_names() {
        let config: GlobalConfig = serde_json::from_value(json!({
            "container_registries": ["registry.example.com/"]
        }))
        .unwrap();
        assert_eq!(
            config.resolve_image("worker:latest"),
            "registry.example.com/worker:latest"
        );
        assert_eq!(
            config.resolve_image("ghcr.io/acme/worker:1"),
            "ghcr.io/acme/worker:1"
        );
        assert_eq!(
            config.resolve_image("oci://somewhere/worker"),
            "oci://somewhere/worker"
        );

        let bare = GlobalConfig::default();
        assert_eq!(bare.resolve_image("worker"), "worker");
    }

    fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn dialects_produce_the_same_structure() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = write_temp(
            &dir,
            "flow.json",
            r#"{
                "name": "demo",
                "start": ["a"],
                "nodes": [
                    {"id": "a", "target": "noop", "transitions": {"success": ["b"]}},
                    {"id": "b", "target": "noop"}
                ]
            }"#,
        );
        let yaml_path = write_temp(
            &dir,
            "flow.yaml",
            "name: demo\nstart: [a]\nnodes:\n  - id: a\n    target: noop\n    transitions:\n      success: [b]\n  - id: b\n    target: noop\n",
        );
        let toml_path = write_temp(
            &dir,
            "flow.toml",
            "name = \"demo\"\nstart = [\"a\"]\n\n[[nodes]]\nid = \"a\"\ntarget = \"noop\"\n\n[nodes.transitions]\nsuccess = [\"b\"]\n\n[[nodes]]\nid = \"b\"\ntarget = \"noop\"\n",
        );

        let from_json = load_flow(&json_path).unwrap();
        let from_yaml = load_flow(&yaml_path).unwrap();
        let from_toml = load_flow(&toml_path).unwrap();

        for flow in [&from_yaml, &from_toml] {
            assert_eq!(flow.name, from_json.name);
            assert_eq!(flow.start, from_json.start);
            assert_eq!(
                flow.nodes.keys().collect::<Vec<_>>(),
                from_json.nodes.keys().collect::<Vec<_>>()
            );
            assert_eq!(flow.next_nodes("a", "success"), vec!["b"]);
        }
    }

    #[test]
    fn load_flow_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "bad.json",
            r#"{"start": ["ghost"], "nodes": [{"id": "a", "target": "noop"}]}"#,
        );
        assert!(matches!(
            load_flow(&path),
            Err(ConfigError::UnknownStartNode(_))
        ));
    }
}
