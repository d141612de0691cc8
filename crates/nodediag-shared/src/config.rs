//! # Agent Configuration
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! `NODEDIAG_`-prefixed environment variables. The binary's CLI flags win
//! over all three.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, AgentResult};

/// Directory under the data root holding operation scripts, populated by
/// the external Operation controller and read-only to the agent.
pub const SCRIPTS_SUBDIR: &str = "scripts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity of the node this agent serves; tasks pinned elsewhere are
    /// skipped.
    pub node_name: String,
    /// Bind address of the agent HTTP server, also the default processor
    /// address for HTTP operations that omit one.
    pub bind_address: String,
    /// Bind port, also the default processor port.
    pub port: u16,
    /// Root of the agent's on-disk trees (`scripts/`, feature artifacts).
    pub data_root: PathBuf,
    /// Container runtime endpoint handed to the runtime driver.
    pub runtime_endpoint: String,
    /// Processor feature gates switched off; gated processors answer 422.
    pub disabled_features: BTreeSet<String>,
    /// Log output shape: "pretty" or "json".
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            bind_address: "0.0.0.0".to_string(),
            port: 8090,
            data_root: PathBuf::from("/var/lib/nodediag"),
            runtime_endpoint: "unix:///var/run/docker.sock".to_string(),
            disabled_features: BTreeSet::new(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl AgentConfig {
    /// Load defaults + optional file + environment overrides.
    pub fn load(file: Option<&Path>) -> AgentResult<Self> {
        let defaults = config::Config::try_from(&AgentConfig::default())
            .map_err(|e| AgentError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("NODEDIAG").separator("__"),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| AgentError::Config(e.to_string()))
    }

    /// `<data_root>/scripts`, the tree the script runner resolves against.
    pub fn scripts_dir(&self) -> PathBuf {
        self.data_root.join(SCRIPTS_SUBDIR)
    }

    pub fn feature_gate(&self) -> FeatureGate {
        FeatureGate {
            disabled: self.disabled_features.clone(),
        }
    }
}

/// Which processor features are switched off.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureGate {
    disabled: BTreeSet<String>,
}

impl FeatureGate {
    pub fn with_disabled<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: features.into_iter().map(Into::into).collect(),
        }
    }

    /// Features default to enabled; only an explicit disable gates them.
    pub fn enabled(&self, feature: &str) -> bool {
        !self.disabled.contains(feature)
    }
}
