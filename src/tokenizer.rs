//! Tokenizer artifact: the tokenizer files of a repo, fetched from one commit.

use crate::hub::{HubClient, Snapshot};
use crate::repo::Repo;
use crate::utils::{self, OpsError};
use std::path::{Path, PathBuf};

/// Files that make up a tokenizer, in the order they are fetched.
pub const TOKENIZER_FILES: &[&str] = &[
    "tokenizer_config.json",
    "special_tokens_map.json",
    "added_tokens.json",
    "tokenizer.json",
    "tokenizer.model",
    "vocab.json",
    "merges.txt",
    "vocab.txt",
    "spiece.model",
    "sentencepiece.bpe.model",
];

/// Files that carry an actual vocabulary, a tokenizer needs one of them.
pub const VOCAB_FILES: &[&str] = &[
    "tokenizer.json",
    "tokenizer.model",
    "vocab.json",
    "vocab.txt",
    "spiece.model",
    "sentencepiece.bpe.model",
];

/// Sentencepiece model, what preprocessing scripts take as `--vocab-file`.
pub const SENTENCEPIECE_MODEL: &str = "tokenizer.model";

#[derive(Debug, Clone)]
pub struct Tokenizer {
    repo_id: String,
    commit: String,
    /// (file name, path in the local cache)
    files: Vec<(String, PathBuf)>,
}

impl Tokenizer {
    /// Resolves the revision of `repo` and fetches its tokenizer files.
    pub fn from_pretrained<H: HubClient + ?Sized>(hub: &H, repo: &Repo) -> Result<Self, OpsError> {
        let snapshot = hub.snapshot(repo)?;
        Self::from_snapshot(hub, &snapshot)
    }

    /// Fetches the tokenizer files present at the snapshot's commit.
    pub fn from_snapshot<H: HubClient + ?Sized>(
        hub: &H,
        snapshot: &Snapshot,
    ) -> Result<Self, OpsError> {
        let repo_id = snapshot.repo().repo_id().to_string();
        if !VOCAB_FILES.iter().any(|f| snapshot.contains(f)) {
            return Err(OpsError::MissingArtifact {
                repo_id,
                kind: "tokenizer",
            });
        }

        let mut files = Vec::new();
        for filename in TOKENIZER_FILES.iter().filter(|f| snapshot.contains(f)) {
            let path = snapshot.fetch(hub, filename)?;
            log::debug!("tokenizer file {filename} at {}", path.display());
            files.push((filename.to_string(), path));
        }
        Ok(Self {
            repo_id,
            commit: snapshot.commit().to_string(),
            files,
        })
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(name, _)| name.as_str())
    }

    /// Copies every tokenizer file into `dir`, creating it if needed, and
    /// returns the written paths.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, OpsError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.files.len());
        for (name, cached) in &self.files {
            let dest = dir.join(name);
            utils::persist_copy(cached, &dest)?;
            written.push(dest);
        }
        log::info!(
            "saved tokenizer of {} ({} files) to {}",
            self.repo_id,
            written.len(),
            dir.display()
        );
        Ok(written)
    }
}
