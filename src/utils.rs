//! Shared helpers: the error type, the HTTP client and file utilities.
use reqwest::blocking;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::{fs::File, io::Read};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
/// All errors an install can run into
pub enum OpsError {
    /// We failed to acquire lock for file `f`. Meaning
    /// Someone else is writing/downloading said file
    #[error("Lock acquisition failed: {0}")]
    LockAcquisition(PathBuf),

    #[error("Build error {0}")]
    BuildError(String),

    /// The hub does not know this repo, or hides it from the caller
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Revision {revision} not found in {repo_id}")]
    RevisionNotFound { repo_id: String, revision: String },

    #[error("File {filename} not found in {repo_id}")]
    EntryNotFound { repo_id: String, filename: String },

    /// Gated or private repo and the token is missing or lacks access
    #[error("Access to {0} denied, a valid HF token is required")]
    AccessDenied(String),

    /// The repo exists but holds nothing usable as the requested artifact
    #[error("No {kind} files found in {repo_id}")]
    MissingArtifact { repo_id: String, kind: &'static str },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Offline mode and nothing cached for {0}")]
    OfflineCacheMiss(String),

    #[error("Hub error {0}")]
    HubError(String),

    /// I/O Error
    #[error("I/O error {0}")]
    IoError(#[from] std::io::Error),

    /// request error
    #[error("Request error {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),
}

/// A static HTTP client for making blocking requests.
///
/// Identifies the crate in the user agent and allows up to 10 redirects,
/// enough for the hub's LFS hops to its CDN.
pub(crate) static BLOCKING_CLIENT: LazyLock<blocking::Client> = LazyLock::new(|| {
    blocking::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("Failed to build reqwest client")
});

pub(crate) fn sha256(file_path: impl AsRef<Path>) -> Result<String, std::io::Error> {
    let mut file = File::open(file_path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 1024 * 8];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writes `bytes` to `dest` through a temp file in the same directory.
///
/// The rename is atomic, so readers never observe a half written file and
/// an existing `dest` is replaced.
pub(crate) fn persist_bytes(bytes: &[u8], dest: &Path) -> Result<(), OpsError> {
    let parent = dest
        .parent()
        .ok_or_else(|| OpsError::HubError(format!("Invalid file path {}", dest.display())))?;
    std::fs::create_dir_all(parent)?;
    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(bytes)?;
    temp_file.flush()?;
    temp_file
        .persist(dest)
        .map_err(|e| OpsError::IoError(e.error))?;
    Ok(())
}

/// Copies `src` to `dest` with the same temp-then-rename discipline as
/// [`persist_bytes`].
pub(crate) fn persist_copy(src: &Path, dest: &Path) -> Result<(), OpsError> {
    let parent = dest
        .parent()
        .ok_or_else(|| OpsError::HubError(format!("Invalid file path {}", dest.display())))?;
    std::fs::create_dir_all(parent)?;
    let temp_file = NamedTempFile::new_in(parent)?;
    {
        let mut reader = io::BufReader::new(File::open(src)?);
        let mut writer = io::BufWriter::new(temp_file.as_file());
        io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
    }
    temp_file
        .persist(dest)
        .map_err(|e| OpsError::IoError(e.error))?;
    Ok(())
}
