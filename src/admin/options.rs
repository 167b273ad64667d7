use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::admin::{AdminError, Result};
use crate::storage::counts::{CountsStoreOptions, DEFAULT_MAX_CACHE_SIZE};

/// Store settings loaded from a TOML file.
///
/// ```toml
/// name = "counts"
/// max_cache_size = 500000
/// read_only = false
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CountsConfig {
    /// Name used in log events.
    pub name: String,
    /// Pending keys tolerated before changes are flushed between checkpoints.
    pub max_cache_size: usize,
    /// Open without writing.
    pub read_only: bool,
}

impl Default for CountsConfig {
    fn default() -> Self {
        Self {
            name: "counts".to_string(),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            read_only: false,
        }
    }
}

impl CountsConfig {
    /// Reads a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| AdminError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Reads `explicit` if given, the defaults otherwise.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn parse(path: &Path, text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| AdminError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Store options carrying these settings.
    pub fn store_options(&self) -> CountsStoreOptions {
        CountsStoreOptions::new(self.name.clone())
            .max_cache_size(self.max_cache_size)
            .read_only(self.read_only)
    }
}
