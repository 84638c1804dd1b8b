// config.rs — Orchestrator configuration.
//
// `for_project()` lays everything out under `.cabincrew/` in the project
// root. `load()` starts from those defaults and overlays
// `.cabincrew/config.toml` when it exists. Relative paths in the file are
// resolved against the project root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cc_policy::AggregationMethod;

use crate::error::OrchestratorError;

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".cabincrew";

/// Key reference used for signed events when none is configured.
pub const DEFAULT_KEY_REF: &str = "cabincrew-audit";

/// Terminal workflows kept fully loaded before older ones are evicted.
pub const DEFAULT_RETAIN_TERMINAL: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Root directory of the governed project.
    #[serde(skip)]
    pub project_root: PathBuf,

    /// Method used to reduce pre-flight evaluations to one decision.
    #[serde(default)]
    pub aggregation_method: AggregationMethod,

    /// COMPLETED/FAILED workflows held in memory. Beyond this, the oldest
    /// keep only their summary and are reloaded from the WAL on access.
    #[serde(default = "default_retain_terminal")]
    pub retain_terminal: usize,

    #[serde(default)]
    pub wal: WalSettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub approvals: ApprovalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalSettings {
    /// Directory holding one `<workflow_id>.wal` file per workflow.
    #[serde(default = "default_wal_dir")]
    pub dir: PathBuf,

    /// fsync after every append. Turning this off trades durability for speed.
    #[serde(default = "default_sync")]
    pub sync: bool,
}

impl Default for WalSettings {
    fn default() -> Self {
        Self {
            dir: default_wal_dir(),
            sync: default_sync(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSettings {
    /// JSONL file receiving the audit chain.
    #[serde(default = "default_audit_log")]
    pub log: PathBuf,

    /// Key reference stamped on signed events.
    #[serde(default)]
    pub signing_key_ref: Option<String>,

    /// PKCS#8 Ed25519 key. Events are unsigned when absent.
    #[serde(default)]
    pub signing_key_path: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log: default_audit_log(),
            signing_key_ref: None,
            signing_key_path: None,
        }
    }
}

impl AuditSettings {
    pub fn key_ref(&self) -> &str {
        self.signing_key_ref.as_deref().unwrap_or(DEFAULT_KEY_REF)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApprovalSettings {
    /// Approver → roles they hold.
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,
}

fn default_retain_terminal() -> usize {
    DEFAULT_RETAIN_TERMINAL
}

fn default_wal_dir() -> PathBuf {
    PathBuf::from(STATE_DIR).join("wal")
}

fn default_sync() -> bool {
    true
}

fn default_audit_log() -> PathBuf {
    PathBuf::from(STATE_DIR).join("audit.jsonl")
}

impl OrchestratorConfig {
    /// Defaults for a project rooted at `project_root`.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let state = root.join(STATE_DIR);
        Self {
            project_root: root,
            aggregation_method: AggregationMethod::default(),
            retain_terminal: DEFAULT_RETAIN_TERMINAL,
            wal: WalSettings {
                dir: state.join("wal"),
                sync: true,
            },
            audit: AuditSettings {
                log: state.join("audit.jsonl"),
                signing_key_ref: None,
                signing_key_path: None,
            },
            approvals: ApprovalSettings::default(),
        }
    }

    /// Path of the optional config file for a project.
    pub fn config_path(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(STATE_DIR).join("config.toml")
    }

    /// Load `.cabincrew/config.toml`, or the defaults if it does not exist.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let root = project_root.as_ref();
        let path = Self::config_path(root);
        if !path.exists() {
            return Ok(Self::for_project(root));
        }

        let content = std::fs::read_to_string(&path).map_err(|source| {
            OrchestratorError::ConfigRead {
                path: path.clone(),
                source,
            }
        })?;
        let mut config = Self::parse(&content).map_err(|source| OrchestratorError::ConfigParse {
            path: path.clone(),
            source,
        })?;
        config.resolve(root);

        tracing::debug!(
            path = %path.display(),
            aggregation_method = %config.aggregation_method,
            "loaded orchestrator config"
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn resolve(&mut self, root: &Path) {
        self.project_root = root.to_path_buf();
        self.wal.dir = absolutize(root, &self.wal.dir);
        self.audit.log = absolutize(root, &self.audit.log);
        if let Some(key) = &self.audit.signing_key_path {
            self.audit.signing_key_path = Some(absolutize(root, key));
        }
    }
}

fn absolutize(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn for_project_uses_state_dir() {
        let config = OrchestratorConfig::for_project("/srv/app");
        assert_eq!(config.wal.dir, PathBuf::from("/srv/app/.cabincrew/wal"));
        assert_eq!(config.audit.log, PathBuf::from("/srv/app/.cabincrew/audit.jsonl"));
        assert!(config.wal.sync);
        assert_eq!(config.aggregation_method, AggregationMethod::MostRestrictive);
        assert_eq!(config.retain_terminal, DEFAULT_RETAIN_TERMINAL);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config, OrchestratorConfig::for_project(dir.path()));
    }

    #[test]
    fn file_overrides_and_resolves_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            OrchestratorConfig::config_path(dir.path()),
            r#"
aggregation_method = "majority"
retain_terminal = 64

[wal]
dir = "state/wal"
sync = false

[audit]
signing_key_ref = "ops-2026"
signing_key_path = "keys/audit.pk8"

[approvals.roles]
alice = ["sre", "security"]
"#,
        )
        .unwrap();

        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.aggregation_method, AggregationMethod::Majority);
        assert_eq!(config.retain_terminal, 64);
        assert_eq!(config.wal.dir, dir.path().join("state/wal"));
        assert!(!config.wal.sync);
        assert_eq!(config.audit.log, dir.path().join(".cabincrew/audit.jsonl"));
        assert_eq!(
            config.audit.signing_key_path,
            Some(dir.path().join("keys/audit.pk8"))
        );
        assert_eq!(config.approvals.roles["alice"], vec!["sre", "security"]);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            OrchestratorConfig::config_path(dir.path()),
            "aggregation_method = \"loudest\"\n",
        )
        .unwrap();
        assert!(matches!(
            OrchestratorConfig::load(dir.path()),
            Err(OrchestratorError::ConfigParse { .. })
        ));
    }
}
