//! Persisted JSON configuration.
//!
//! The on-disk document is the single durable artifact of the daemon: pipe
//! names, the configured backend agents, the fingerprint→agent key
//! mappings (with cached public-key blobs), and host-hint patterns.
//! Unrecognized keys are carried through a flattened map so a newer
//! document survives a round trip with an older daemon.
//!
//! Writes are atomic: serialize to a sibling temp file, then rename over
//! the target, so a crash mid-write never leaves a torn document.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::BackendSpec;

/// Agent names whose pipe-unlock behavior is known without configuration.
///
/// Bitwarden prompts for unlock on a *list* request and steals the shared
/// pipe whenever it starts; 1Password lists without unlocking.  A config
/// that names its agents canonically needs no `unlockOnList` key.
const UNLOCK_ON_LIST_DEFAULT_NAMES: &[&str] = &["bitwarden"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Name of the pipe the proxy itself serves on.
    #[serde(default = "default_proxy_pipe_name")]
    pub proxy_pipe_name: String,

    /// Name of the shared pipe the backend agents compete to own.
    #[serde(default = "default_backend_pipe_name")]
    pub backend_pipe_name: String,

    /// Configured backend agents, keyed by stable name.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentEntry>,

    /// Agent used when a fingerprint has no mapping and no current owner
    /// is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,

    /// Durable fingerprint→agent records, in discovery order.
    #[serde(default)]
    pub key_mappings: Vec<KeyMappingEntry>,

    /// Ordered host patterns used to move a preferred key to the front of
    /// an identity listing.  First match wins.
    #[serde(default)]
    pub host_key_mappings: Vec<HostHintEntry>,

    /// TTL for the connection-failure cache.
    #[serde(default = "default_failure_cache_ttl")]
    pub failure_cache_ttl_seconds: u64,

    /// Auto-select timeout for the interactive key-selection dialog.
    #[serde(default = "default_key_selection_timeout")]
    pub key_selection_timeout_seconds: u64,

    /// Keys this version does not recognize, preserved round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    /// Image name for process enumeration and termination.
    pub process_name: String,
    /// Absolute path, or a bare command resolved via `PATH`.
    pub exe_path: String,
    /// Lower sorts first.
    #[serde(default)]
    pub priority: i32,
    /// Override for the unlock-on-list behavior class.  When absent the
    /// agent's name decides (see [`UNLOCK_ON_LIST_DEFAULT_NAMES`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_on_list: Option<bool>,
}

/// One persisted fingerprint→agent record.
///
/// `key_blob` caches the public key (base64) so a merged identity list can
/// be served at startup without touching any backend pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMappingEntry {
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_blob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostHintEntry {
    /// `host`, `host:*`, or `host:owner/*`.
    pub pattern: String,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_pipe_name: default_proxy_pipe_name(),
            backend_pipe_name: default_backend_pipe_name(),
            agents: BTreeMap::new(),
            default_agent: None,
            key_mappings: Vec::new(),
            host_key_mappings: Vec::new(),
            failure_cache_ttl_seconds: default_failure_cache_ttl(),
            key_selection_timeout_seconds: default_key_selection_timeout(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    /// A starter configuration naming the two canonical agents.  Used when
    /// no file exists yet; not written to disk until the first mutation.
    pub fn canonical() -> Self {
        let mut agents = BTreeMap::new();
        agents.insert(
            "1password".to_string(),
            AgentEntry {
                process_name: "1Password.exe".to_string(),
                exe_path: "1Password.exe".to_string(),
                priority: 0,
                unlock_on_list: None,
            },
        );
        agents.insert(
            "bitwarden".to_string(),
            AgentEntry {
                process_name: "Bitwarden.exe".to_string(),
                exe_path: "Bitwarden.exe".to_string(),
                priority: 1,
                unlock_on_list: None,
            },
        );
        Self {
            agents,
            default_agent: Some("1password".to_string()),
            ..Self::default()
        }
    }

    /// Resolve the configured agents into [`BackendSpec`]s, sorted by
    /// priority (name as tiebreak so iteration order is stable).
    pub fn backends(&self) -> Vec<BackendSpec> {
        let mut specs: Vec<BackendSpec> = self
            .agents
            .iter()
            .map(|(name, entry)| BackendSpec {
                name: name.clone(),
                process_name: entry.process_name.clone(),
                exe_path: entry.exe_path.clone(),
                priority: entry.priority,
                unlock_on_list: entry.unlock_on_list.unwrap_or_else(|| {
                    UNLOCK_ON_LIST_DEFAULT_NAMES.contains(&name.as_str())
                }),
            })
            .collect();
        specs.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        specs
    }

    /// The backend used when a sign request has no mapping and no known
    /// current owner: `defaultAgent` if configured and present, otherwise
    /// the highest-priority agent.
    pub fn default_backend(&self) -> Option<String> {
        if let Some(name) = &self.default_agent {
            if self.agents.contains_key(name) {
                return Some(name.clone());
            }
            tracing::warn!(agent = %name, "defaultAgent is not a configured agent, ignoring");
        }
        self.backends().first().map(|spec| spec.name.clone())
    }
}

/// Owns the config document and its on-disk location.
///
/// All mutation goes through the router, which calls [`ConfigStore::save`]
/// after each change; persistence is best-effort (logged on failure, the
/// in-memory document stays authoritative).
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    /// Load the document at `path`.
    ///
    /// A missing file yields the canonical starter config; an unreadable
    /// or unparsable file is logged and replaced with defaults rather than
    /// aborting the daemon.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "config file is not valid JSON ({e}), starting from defaults"
                    );
                    Config::canonical()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file yet, using canonical defaults");
                Config::canonical()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "config file unreadable ({e}), starting from defaults"
                );
                Config::canonical()
            }
        };
        Self { path, config }
    }

    /// Wrap an in-memory document (tests, tools).
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Persist the document atomically: write a sibling temp file, flush,
    /// then rename over the target.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(Error::Persistence)?;
            }
        }

        let json =
            serde_json::to_string_pretty(&self.config).map_err(|e| Error::Persistence(e.into()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp_path).map_err(Error::Persistence)?;
        file.write_all(json.as_bytes()).map_err(Error::Persistence)?;
        file.write_all(b"\n").map_err(Error::Persistence)?;
        file.sync_all().map_err(Error::Persistence)?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path).map_err(Error::Persistence)?;
        Ok(())
    }
}

fn default_proxy_pipe_name() -> String {
    "ssh-agent-proxy".to_string()
}

fn default_backend_pipe_name() -> String {
    "openssh-ssh-agent".to_string()
}

fn default_failure_cache_ttl() -> u64 {
    60
}

fn default_key_selection_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_agent_config() -> Config {
        let mut config = Config::default();
        config.agents.insert(
            "1password".to_string(),
            AgentEntry {
                process_name: "1Password.exe".to_string(),
                exe_path: r"C:\Program Files\1Password\1Password.exe".to_string(),
                priority: 0,
                unlock_on_list: None,
            },
        );
        config.agents.insert(
            "bitwarden".to_string(),
            AgentEntry {
                process_name: "Bitwarden.exe".to_string(),
                exe_path: "Bitwarden.exe".to_string(),
                priority: 1,
                unlock_on_list: None,
            },
        );
        config
    }

    #[test]
    fn empty_document_gives_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.proxy_pipe_name, "ssh-agent-proxy");
        assert_eq!(config.backend_pipe_name, "openssh-ssh-agent");
        assert!(config.agents.is_empty());
        assert_eq!(config.failure_cache_ttl_seconds, 60);
        assert_eq!(config.key_selection_timeout_seconds, 30);
    }

    #[test]
    fn parses_full_document() {
        let raw = r#"{
            "proxyPipeName": "my-proxy",
            "backendPipeName": "openssh-ssh-agent",
            "agents": {
                "1password": { "processName": "1Password.exe", "exePath": "1Password.exe", "priority": 0 },
                "bitwarden": { "processName": "Bitwarden.exe", "exePath": "Bitwarden.exe", "priority": 1 }
            },
            "defaultAgent": "1password",
            "keyMappings": [
                { "fingerprint": "AABBCCDD00112233", "keyBlob": "AAAA", "comment": "work", "agent": "1password" }
            ],
            "hostKeyMappings": [
                { "pattern": "github.com:acme/*", "fingerprint": "AABBCCDD00112233", "description": "acme org" }
            ],
            "failureCacheTtlSeconds": 30
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.proxy_pipe_name, "my-proxy");
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.default_agent.as_deref(), Some("1password"));
        assert_eq!(config.key_mappings.len(), 1);
        assert_eq!(config.key_mappings[0].agent, "1password");
        assert_eq!(config.host_key_mappings[0].pattern, "github.com:acme/*");
        assert_eq!(config.failure_cache_ttl_seconds, 30);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let raw = r#"{ "proxyPipeName": "p", "trayIconTheme": "dark" }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        let out = serde_json::to_string(&config).unwrap();
        assert!(out.contains("trayIconTheme"));
        assert!(out.contains("dark"));
    }

    #[test]
    fn backends_sorted_by_priority() {
        let config = two_agent_config();
        let backends = config.backends();
        assert_eq!(backends[0].name, "1password");
        assert_eq!(backends[1].name, "bitwarden");
    }

    #[test]
    fn unlock_on_list_defaults_by_name() {
        let config = two_agent_config();
        let backends = config.backends();
        assert!(!backends[0].unlock_on_list, "1password lists without unlock");
        assert!(backends[1].unlock_on_list, "bitwarden prompts on list");
    }

    #[test]
    fn unlock_on_list_override_wins() {
        let mut config = two_agent_config();
        config.agents.get_mut("bitwarden").unwrap().unlock_on_list = Some(false);
        let backends = config.backends();
        assert!(!backends[1].unlock_on_list);
    }

    #[test]
    fn default_backend_falls_back_to_priority_order() {
        let mut config = two_agent_config();
        assert_eq!(config.default_backend().as_deref(), Some("1password"));

        config.default_agent = Some("bitwarden".to_string());
        assert_eq!(config.default_backend().as_deref(), Some("bitwarden"));

        config.default_agent = Some("missing".to_string());
        assert_eq!(config.default_backend().as_deref(), Some("1password"));
    }

    #[test]
    fn save_writes_atomically_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut store = ConfigStore::new(&path, two_agent_config());
        store.config_mut().key_mappings.push(KeyMappingEntry {
            fingerprint: "AABBCCDD00112233".to_string(),
            key_blob: Some("AAAA".to_string()),
            comment: Some("work".to_string()),
            agent: "1password".to_string(),
        });
        store.save().unwrap();

        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.config().key_mappings.len(), 1);
        assert_eq!(reloaded.config().key_mappings[0].fingerprint, "AABBCCDD00112233");
    }

    #[test]
    fn load_missing_file_gives_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("nope.json"));
        assert!(store.config().agents.contains_key("1password"));
        assert!(store.config().agents.contains_key("bitwarden"));
    }

    #[test]
    fn load_corrupt_file_gives_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = ConfigStore::load(&path);
        assert!(store.config().agents.contains_key("1password"));
    }

    #[test]
    fn mapping_without_blob_serializes_compactly() {
        let entry = KeyMappingEntry {
            fingerprint: "AABB".to_string(),
            key_blob: None,
            comment: None,
            agent: "bitwarden".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("keyBlob"));
        assert!(!json.contains("comment"));
    }
}
