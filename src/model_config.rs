//! Config artifact: the model's `config.json`.

use crate::hub::{HubClient, Snapshot};
use crate::repo::Repo;
use crate::utils::{self, OpsError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const CONFIG_NAME: &str = "config.json";

/// Keys read through typed accessors, and the JSON type each must hold
/// when present and not null.
const U64_KEYS: &[&str] = &[
    "vocab_size",
    "hidden_size",
    "num_hidden_layers",
    "num_attention_heads",
    "max_position_embeddings",
];

/// Architecture hyperparameters of a model.
///
/// Holds the JSON object the hub served, untouched, so `save` writes back
/// every key and value as read. The common keys have typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelConfig {
    values: Map<String, Value>,
}

impl ModelConfig {
    /// Resolves the revision of `repo` and fetches its `config.json`.
    pub fn from_pretrained<H: HubClient + ?Sized>(hub: &H, repo: &Repo) -> Result<Self, OpsError> {
        let snapshot = hub.snapshot(repo)?;
        Self::from_snapshot(hub, &snapshot)
    }

    pub fn from_snapshot<H: HubClient + ?Sized>(
        hub: &H,
        snapshot: &Snapshot,
    ) -> Result<Self, OpsError> {
        if !snapshot.contains(CONFIG_NAME) {
            return Err(OpsError::MissingArtifact {
                repo_id: snapshot.repo().repo_id().to_string(),
                kind: "config",
            });
        }
        let path = snapshot.fetch(hub, CONFIG_NAME)?;
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, OpsError> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Parses a config, anything but a JSON object is rejected, as are
    /// typed keys holding the wrong kind of value.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, OpsError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| OpsError::InvalidConfig(format!("{CONFIG_NAME} is not valid JSON: {e}")))?;
        let Value::Object(values) = value else {
            return Err(OpsError::InvalidConfig(format!(
                "{CONFIG_NAME} must hold a JSON object"
            )));
        };
        let config = Self { values };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), OpsError> {
        let wrong = |key: &str, expected: &str| {
            OpsError::InvalidConfig(format!("{key} must be {expected}"))
        };
        for key in U64_KEYS {
            match self.values.get(*key) {
                None | Some(Value::Null) => {}
                Some(v) if v.is_u64() => {}
                Some(_) => return Err(wrong(*key, "a non-negative integer")),
            }
        }
        match self.values.get("model_type") {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => return Err(wrong("model_type", "a string")),
        }
        match self.values.get("architectures") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
            Some(_) => return Err(wrong("architectures", "a list of strings")),
        }
        Ok(())
    }

    /// Raw value of any key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn model_type(&self) -> Option<&str> {
        self.values.get("model_type").and_then(Value::as_str)
    }

    pub fn architectures(&self) -> Option<Vec<&str>> {
        self.values
            .get("architectures")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
    }

    pub fn vocab_size(&self) -> Option<u64> {
        self.get_u64("vocab_size")
    }

    pub fn hidden_size(&self) -> Option<u64> {
        self.get_u64("hidden_size")
    }

    pub fn num_hidden_layers(&self) -> Option<u64> {
        self.get_u64("num_hidden_layers")
    }

    pub fn num_attention_heads(&self) -> Option<u64> {
        self.get_u64("num_attention_heads")
    }

    pub fn max_position_embeddings(&self) -> Option<u64> {
        self.get_u64("max_position_embeddings")
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    /// Writes `<dir>/config.json`, creating `dir` if needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, OpsError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let dest = dir.join(CONFIG_NAME);
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        utils::persist_bytes(&json, &dest)?;
        log::info!("saved config to {}", dest.display());
        Ok(dest)
    }
}
