use crate::utils::OpsError;
use std::io::Write;
use std::path::PathBuf;

const HF_HOME: &str = "HF_HOME";

/// `~/.cache/huggingface/hub`, or `$HF_HOME/hub` when set.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HF_HOME) {
        let mut path: PathBuf = home.into();
        path.push("hub");
        return path;
    }
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".cache");
    path.push("huggingface");
    path.push("hub");
    path
}

/// The representation of a model repo on the hub.
#[derive(Clone, Debug)]
pub struct Repo {
    repo_id: String,
    revision: String,
    cache_dir: PathBuf,
}

impl Repo {
    pub const REVISION_MAIN: &'static str = "main";
    const MAX_REPO_ID_LEN: usize = 96;

    /// Model repo on the `main` branch, cached under [`default_cache_dir`].
    pub fn new_model(repo_id: &str) -> Result<Self, OpsError> {
        Self::with_revision(repo_id, Self::REVISION_MAIN)
    }

    pub fn with_revision(repo_id: &str, revision: &str) -> Result<Self, OpsError> {
        validate_repo_id(repo_id)?;
        if revision.is_empty() {
            return Err(OpsError::BuildError("Revision must not be empty".into()));
        }
        Ok(Self {
            repo_id: repo_id.to_string(),
            revision: revision.to_string(),
            cache_dir: default_cache_dir(),
        })
    }

    pub fn set_cache_dir(&mut self, cache_dir: impl Into<PathBuf>) {
        self.cache_dir = cache_dir.into();
    }

    /// cache root shared by every repo
    pub fn cache_home(&self) -> &PathBuf {
        &self.cache_dir
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Whether the revision already names a full commit hash.
    pub fn is_commit(&self) -> bool {
        is_commit_hash(&self.revision)
    }

    /// Directory holding this repo in the cache:
    /// `<cache>/models--meta-llama--Llama-2-7b-hf`
    pub fn cache_dir(&self) -> PathBuf {
        let mut path = self.cache_dir.clone();
        path.push(format!("models--{}", self.repo_id).replace('/', "--"));
        path
    }

    /// Metadata endpoint path, relative to the hub endpoint
    pub fn api_path_with_revision(&self) -> String {
        format!(
            "api/models/{}/revision/{}",
            self.repo_id,
            self.safe_revision_path()
        )
    }

    /// Download path for a file at `commit`, relative to the hub endpoint
    pub fn url_path_with_resolve(&self, commit: &str) -> String {
        format!("{}/resolve/{}", self.repo_id, commit)
    }

    /// Revision needs to be url escaped before being used in a URL
    pub fn safe_revision_path(&self) -> String {
        self.revision.replace('/', "%2F")
    }

    /// get ref path
    /// .cache/huggingface/hub/models--meta-llama--Llama-2-7b-hf/refs/main
    pub fn ref_path(&self) -> PathBuf {
        let mut ref_path = self.cache_dir();
        ref_path.push("refs");
        ref_path.push(self.revision());
        ref_path
    }

    /// Creates a reference in the cache directory that points branches to the correct
    /// commits within the snapshots.
    pub fn create_ref(&self, commit_hash: &str) -> Result<(), std::io::Error> {
        if self.is_commit() {
            return Ok(());
        }
        let ref_path = self.ref_path();
        // Needs to be done like this because revision might contain `/` creating subfolders here.
        if let Some(parent) = ref_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&ref_path)?;
        file.write_all(commit_hash.trim().as_bytes())?;
        Ok(())
    }

    /// Commit the revision pointed at when it was last resolved online.
    pub fn read_ref(&self) -> Option<String> {
        if self.is_commit() {
            return Some(self.revision.clone());
        }
        let commit = std::fs::read_to_string(self.ref_path()).ok()?;
        let commit = commit.trim();
        (!commit.is_empty()).then(|| commit.to_string())
    }

    pub fn snapshot_path(&self, commit_hash: &str) -> PathBuf {
        let mut pointer_path = self.cache_dir();
        pointer_path.push("snapshots");
        pointer_path.push(commit_hash);
        pointer_path
    }
}

pub(crate) fn is_commit_hash(revision: &str) -> bool {
    revision.len() == 40 && revision.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Hub repo ids are `name` or `namespace/name`.
fn validate_repo_id(repo_id: &str) -> Result<(), OpsError> {
    let invalid = |why: &str| OpsError::BuildError(format!("Invalid repo id {repo_id:?}: {why}"));

    if repo_id.is_empty() {
        return Err(invalid("empty"));
    }
    if repo_id.len() > Repo::MAX_REPO_ID_LEN {
        return Err(invalid("too long"));
    }
    if repo_id.contains("--") || repo_id.contains("..") {
        return Err(invalid("'--' and '..' are forbidden"));
    }
    let parts: Vec<&str> = repo_id.split('/').collect();
    if parts.len() > 2 {
        return Err(invalid("expected 'name' or 'namespace/name'"));
    }
    for part in parts {
        if part.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if !part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid("only alphanumerics, '-', '_' and '.' are allowed"));
        }
        if part.starts_with(['-', '.']) || part.ends_with(['-', '.']) {
            return Err(invalid("segments can't start or end with '-' or '.'"));
        }
    }
    Ok(())
}
