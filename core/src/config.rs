use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Per-dataset settings. Only `pass` is required; any other keys are kept
/// as-is.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub pass: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for DatasetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetEntry")
            .field("pass", &"***")
            .field("extra", &self.extra)
            .finish()
    }
}

/// Config file contents: a JSON object keyed by dataset name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetConfig {
    datasets: BTreeMap<String, DatasetEntry>,
}

impl DatasetConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::Other(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        debug!(path = %path.display(), datasets = config.datasets.len(), "Loaded dataset config");
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn dataset(&self, name: &str) -> Result<&DatasetEntry> {
        self.datasets.get(name).ok_or_else(|| Error::DatasetNotFound {
            dataset: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }
}
