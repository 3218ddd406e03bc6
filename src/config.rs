//! TOML configuration.
//!
//! Everything lives under a `[qpman]` table so that the file can be shared
//! with other components:
//!
//! ```toml
//! [qpman.qp]
//! psn = 3185
//! max_send_wr = 128
//!
//! [qpman.daemon]
//! host = "0.0.0.0"
//! port = 8888
//!
//! [[qpman.fabric.devices]]
//! name = "soft_0"
//! ports = [{ state = "active", lid = 1 }]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fabric::FabricConfig;
use crate::rdma::qp::QpConfig;

/// Where a registry daemon listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8888,
        }
    }
}

/// Crate configuration. Every table and field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for new queue pairs.
    pub qp: QpConfig,

    /// Registry daemon endpoint.
    pub daemon: DaemonConfig,

    /// Topology of the process-wide software fabric.
    pub fabric: FabricConfig,
}

impl Config {
    /// Load the `[qpman]` table of a TOML file.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let toml_str = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&toml_str)
    }

    /// Parse the `[qpman]` table of a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let mut toml: toml::Table =
            toml::from_str(toml_str).map_err(|e| Error::Config(e.to_string()))?;
        let Some(table) = toml.remove("qpman") else {
            return Err(Error::Config("qpman configuration not found".to_owned()));
        };
        table
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(format!("bad qpman configuration: {}", e)))
    }
}
