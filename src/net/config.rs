use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Error, Result};
use crate::storage::StorageSortKey;

const DEFAULT_MAX_ASSOCIATIONS: usize = 16;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_max_associations() -> usize {
    DEFAULT_MAX_ASSOCIATIONS
}

fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

fn is_ascii_printable(ae_title: &String, _ctx: &()) -> garde::Result {
    if ae_title.trim().is_empty() {
        return Err(garde::Error::new("AE title must not be blank"));
    }
    if !ae_title.chars().all(|c| c.is_ascii() && !c.is_ascii_control() && c != '\\') {
        return Err(garde::Error::new(
            "AE title must consist of printable ASCII characters other than backslash",
        ));
    }
    Ok(())
}

fn is_non_empty_path(path: &PathBuf, _ctx: &()) -> garde::Result {
    if path.as_os_str().is_empty() {
        return Err(garde::Error::new("storage directory must not be empty"));
    }
    Ok(())
}

/// Network identity of a DICOM application entity.
///
/// The field names used by older configuration files, `ip` and `aetitle`, are accepted as
/// well.
#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct DicomNode {
    #[serde(alias = "ip", default = "default_host")]
    #[garde(length(min = 1))]
    pub host: String,

    #[garde(skip)]
    pub port: u16,

    #[serde(alias = "aetitle")]
    #[garde(length(min = 1, max = 16), custom(is_ascii_printable))]
    pub ae_title: String,
}

impl DicomNode {
    pub fn new(host: impl Into<String>, port: u16, ae_title: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            ae_title: ae_title.into(),
        }
    }

    /// The `host:port` address to bind or connect to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct StorageConfig {
    #[garde(custom(is_non_empty_path))]
    pub directory: PathBuf,

    #[serde(default)]
    #[garde(skip)]
    pub sort_by: StorageSortKey,
}

/// Configuration of the store SCP.
///
/// ```json
/// {
///     "node": {"ip": "0.0.0.0", "port": 11112, "aetitle": "DCMSTORE"},
///     "storage": {"directory": "/var/lib/dcmstore", "sort_by": "study"}
/// }
/// ```
#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    #[garde(dive)]
    pub node: DicomNode,

    #[garde(dive)]
    pub storage: StorageConfig,

    #[serde(default = "default_max_associations")]
    #[garde(range(min = 1))]
    pub max_associations: usize,

    #[serde(default = "default_read_timeout_secs")]
    #[garde(range(min = 1))]
    pub read_timeout_secs: u64,
}

impl ServerConfig {
    pub fn new(node: DicomNode, directory: impl Into<PathBuf>, sort_by: StorageSortKey) -> Self {
        Self {
            node,
            storage: StorageConfig {
                directory: directory.into(),
                sort_by,
            },
            max_associations: DEFAULT_MAX_ASSOCIATIONS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Parses and validates a server configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ServerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}
