use anyhow::{Context, Result};
use bulkops::{BulkOptions, DEFAULT_MAX_SPAN};
use remotekit::{Credential, DispatchOptions, ExecEnv, RemoteTarget};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("fleetops"))
}

/// Config file to use: the explicit one if given, else the default location.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join("config.toml")),
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

// ============================================================================
// Fleet Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Largest ID range a bulk run accepts
    pub max_span: u64,
    /// Workers for `bulk --parallel`
    pub jobs: usize,
    pub retry_delay_secs: u64,
    /// Local directory for retrieved remote logs
    pub log_dir: String,
    /// Remote directory for work dirs, logs and exit markers
    pub remote_base: String,
    /// LOG_LEVEL handed to remote scripts
    pub log_level: String,
    /// Files or directories shipped with every script
    pub support_files: Vec<String>,
    pub connect_timeout_secs: u64,
    pub nodes: Vec<NodeConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_span: DEFAULT_MAX_SPAN,
            jobs: 4,
            retry_delay_secs: 2,
            log_dir: "~/.local/state/fleetops/logs".to_string(),
            remote_base: "/tmp".to_string(),
            log_level: "INFO".to_string(),
            support_files: Vec::new(),
            connect_timeout_secs: 5,
            nodes: Vec::new(),
        }
    }
}

impl FleetConfig {
    /// Load the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_span == 0 {
            anyhow::bail!("max_span must be at least 1");
        }
        if self.jobs == 0 {
            anyhow::bail!("jobs must be at least 1");
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                anyhow::bail!("node with address '{}' has no name", node.address);
            }
            if !seen.insert(node.name.as_str()) {
                anyhow::bail!("node '{}' is defined more than once", node.name);
            }
        }
        Ok(())
    }

    /// Render as TOML. Only variable names are stored for passwords, so
    /// nothing secret can appear here.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn log_dir(&self) -> PathBuf {
        expand(&self.log_dir)
    }

    pub fn support_paths(&self) -> Vec<PathBuf> {
        self.support_files.iter().map(|p| expand(p)).collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn bulk_options(&self) -> BulkOptions {
        BulkOptions {
            max_span: self.max_span,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        let mut options = DispatchOptions::new(self.log_dir());
        options.remote_base.clone_from(&self.remote_base);
        options.env = ExecEnv {
            log_level: self.log_level.clone(),
        };
        options
    }

    pub fn find_node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Resolve node names to targets, in the order given. Repeats are dropped.
    pub fn resolve_targets(&self, names: &[String]) -> Result<Vec<RemoteTarget>> {
        let mut seen = HashSet::new();
        names
            .iter()
            .filter(|name| seen.insert(*name))
            .map(|name| {
                let node = self.find_node(name).with_context(|| {
                    let known: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
                    if known.is_empty() {
                        format!("Unknown node '{name}' (no nodes configured)")
                    } else {
                        format!("Unknown node '{name}' (known: {})", known.join(", "))
                    }
                })?;
                node.to_target()
            })
            .collect()
    }

    /// Every configured node, in config order.
    pub fn all_targets(&self) -> Result<Vec<RemoteTarget>> {
        self.nodes.iter().map(NodeConfig::to_target).collect()
    }

    /// Target for a cluster node seen in the inventory. Nodes without a
    /// `[[nodes]]` entry are dialled by name with the defaults.
    pub fn node_target(&self, name: &str) -> Result<RemoteTarget> {
        match self.find_node(name) {
            Some(node) => node.to_target(),
            None => {
                log::debug!("Node {name} not configured, connecting by name");
                Ok(RemoteTarget::new(name, name))
            }
        }
    }
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".to_string()
}

impl NodeConfig {
    /// Password from `password_env` if set, otherwise key authentication.
    pub fn credential(&self) -> Result<Credential> {
        if let Some(var) = &self.password_env {
            let password = std::env::var(var).with_context(|| {
                format!(
                    "Password variable ${var} for node '{}' is not set",
                    self.name
                )
            })?;
            return Ok(Credential::Password(password));
        }

        Ok(Credential::Key {
            identity_file: self.identity_file.as_deref().map(expand),
        })
    }

    pub fn to_target(&self) -> Result<RemoteTarget> {
        Ok(RemoteTarget::new(&self.name, &self.address)
            .with_port(self.port)
            .with_username(&self.username)
            .with_credential(self.credential()?))
    }

    /// How the node authenticates, for display.
    pub fn auth_label(&self) -> String {
        match (&self.password_env, &self.identity_file) {
            (Some(var), _) => format!("password (${var})"),
            (None, Some(file)) => format!("key ({file})"),
            (None, None) => "key (default)".to_string(),
        }
    }
}
