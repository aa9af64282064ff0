pub mod hf_api;
#[cfg(test)]
pub(crate) mod test_server;

use crate::fslock;
use crate::repo::{self, Repo};
use crate::utils::{self, BLOCKING_CLIENT, OpsError};
use hf_api::{RepoInfo, Sibling};
use indicatif::{
    MultiProgress as MultiProgressBar, ProgressBar, ProgressFinish, ProgressState, ProgressStyle,
};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

const HF_ENDPOINT: &str = "HF_ENDPOINT";
const HF_TOKEN: &str = "HF_TOKEN";
const HF_HOME: &str = "HF_HOME";
const HF_HUB_OFFLINE: &str = "HF_HUB_OFFLINE";

/// What the installer needs from a model hub.
///
/// [`HfHub`] talks to the Hugging Face Hub, tests plug in an in-memory hub.
pub trait HubClient {
    /// `repo_id` at `revision`, as this hub addresses it.
    fn repo(&self, repo_id: &str, revision: &str) -> Result<Repo, OpsError> {
        Repo::with_revision(repo_id, revision)
    }

    /// Metadata of `repo` at its revision, with the file listing.
    fn repo_info(&self, repo: &Repo) -> Result<RepoInfo, OpsError>;

    /// Makes `sibling` available locally at `commit` and returns its path.
    fn download(&self, repo: &Repo, commit: &str, sibling: &Sibling) -> Result<PathBuf, OpsError>;

    /// Resolves the revision of `repo` to a commit, once.
    fn snapshot(&self, repo: &Repo) -> Result<Snapshot, OpsError> {
        let info = self.repo_info(repo)?;
        let commit = info
            .sha
            .filter(|sha| !sha.is_empty())
            .ok_or_else(|| OpsError::HubError(format!("no commit returned for {}", repo.repo_id())))?;
        log::info!(
            "resolved {}@{} to commit {commit}",
            repo.repo_id(),
            repo.revision()
        );
        Ok(Snapshot {
            repo: repo.clone(),
            commit,
            siblings: info.siblings,
        })
    }
}

/// A repo pinned to one commit, every file fetched through it comes from
/// that commit.
#[derive(Debug, Clone)]
pub struct Snapshot {
    repo: Repo,
    commit: String,
    siblings: Vec<Sibling>,
}

impl Snapshot {
    pub fn new(repo: Repo, commit: impl Into<String>, siblings: Vec<Sibling>) -> Self {
        Self {
            repo,
            commit: commit.into(),
            siblings,
        }
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn siblings(&self) -> &[Sibling] {
        &self.siblings
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.get_sibling(filename).is_some()
    }

    pub fn get_sibling(&self, filename: &str) -> Option<&Sibling> {
        self.siblings.iter().find(|s| s.rfilename == filename)
    }

    /// Downloads `filename` from this commit.
    pub fn fetch<H: HubClient + ?Sized>(&self, hub: &H, filename: &str) -> Result<PathBuf, OpsError> {
        let sibling = self
            .get_sibling(filename)
            .ok_or_else(|| OpsError::EntryNotFound {
                repo_id: self.repo.repo_id().to_string(),
                filename: filename.to_string(),
            })?;
        hub.download(&self.repo, &self.commit, sibling)
    }
}

/// Hugging Face Hub client.
pub struct HfHub {
    endpoint: String,
    token: Option<String>,
    cache_dir: PathBuf,
    offline: bool,
    progress: Option<MultiProgressWrapper>,
}

impl HfHub {
    pub fn builder() -> HfHubBuilder {
        HfHubBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// list hub files of the repo at its revision
    pub fn list_hub_files(&self, repo: &Repo) -> Result<Vec<String>, OpsError> {
        let info = self.repo_info(repo)?;
        Ok(info.siblings.into_iter().map(|f| f.rfilename).collect())
    }

    /// Files cached for `commit`, relative to the snapshot root.
    pub fn list_local_files(&self, repo: &Repo, commit: &str) -> Result<Vec<String>, OpsError> {
        Ok(local_siblings(&repo.snapshot_path(commit))?
            .into_iter()
            .map(|s| s.rfilename)
            .collect())
    }

    fn offline_repo_info(&self, repo: &Repo) -> Result<RepoInfo, OpsError> {
        let miss = || OpsError::OfflineCacheMiss(format!("{}@{}", repo.repo_id(), repo.revision()));
        let commit = repo.read_ref().ok_or_else(miss)?;
        let snapshot_path = repo.snapshot_path(&commit);
        if !snapshot_path.is_dir() {
            return Err(miss());
        }
        log::debug!("offline, using cached snapshot {}", snapshot_path.display());
        Ok(RepoInfo {
            id: repo.repo_id().to_string(),
            sha: Some(commit),
            private: false,
            last_modified: None,
            siblings: local_siblings(&snapshot_path)?,
        })
    }
}

impl HubClient for HfHub {
    fn repo(&self, repo_id: &str, revision: &str) -> Result<Repo, OpsError> {
        let mut repo = Repo::with_revision(repo_id, revision)?;
        repo.set_cache_dir(&self.cache_dir);
        Ok(repo)
    }

    fn repo_info(&self, repo: &Repo) -> Result<RepoInfo, OpsError> {
        if self.offline {
            return self.offline_repo_info(repo);
        }
        let info = hf_api::get_repo_info(&self.endpoint, self.token.as_deref(), repo)?;
        if let Some(ref sha) = info.sha {
            repo.create_ref(sha)?;
        }
        Ok(info)
    }

    fn download(&self, repo: &Repo, commit: &str, sibling: &Sibling) -> Result<PathBuf, OpsError> {
        let snapshot_path = repo.snapshot_path(commit);
        let filepath = {
            let mut filepath = snapshot_path.clone();
            for part in sibling.rfilename.split('/') {
                filepath.push(part);
            }
            filepath
        };

        if self.offline {
            return if filepath.is_file() {
                Ok(filepath)
            } else {
                Err(OpsError::OfflineCacheMiss(format!(
                    "{}/{}",
                    repo.repo_id(),
                    sibling.rfilename
                )))
            };
        }

        std::fs::create_dir_all(&snapshot_path)?;
        let _lock = fslock::FsLock::lock(snapshot_path)?;

        if std::fs::exists(&filepath)? && is_fresh(&filepath, sibling)? {
            log::debug!("{} already cached", sibling.rfilename);
            return Ok(filepath);
        }

        let file_url = format!(
            "{}/{}/{}",
            self.endpoint,
            repo.url_path_with_resolve(commit),
            sibling.rfilename
        );
        log::info!("downloading {file_url}");
        let response = hf_api::authorize(BLOCKING_CLIENT.get(&file_url), self.token.as_deref())
            .send()?;
        let response = hf_api::check_response(response, repo, Some(&sibling.rfilename))?;

        let mut progress = self.progress.clone();
        download_file(response, &filepath, sibling, &mut progress)?;

        if let Some(expected) = sibling.sha256() {
            let actual = utils::sha256(&filepath)?;
            if actual != expected {
                std::fs::remove_file(&filepath)?;
                return Err(OpsError::ChecksumMismatch {
                    path: filepath,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(filepath)
    }
}

/// A cached file is reused when it matches what the hub lists for it.
fn is_fresh(filepath: &Path, sibling: &Sibling) -> Result<bool, OpsError> {
    if let Some(file_sha256) = sibling.sha256() {
        return Ok(utils::sha256(filepath)? == file_sha256);
    }
    match sibling.expected_size() {
        Some(size) => Ok(std::fs::metadata(filepath)?.len() == size),
        None => Ok(false),
    }
}

/// Lists a snapshot directory as siblings, sizes taken from disk.
fn local_siblings(snapshot_path: &Path) -> Result<Vec<Sibling>, OpsError> {
    let mut siblings = Vec::new();
    for entry in walkdir::WalkDir::new(snapshot_path)
        .min_depth(1)
        .max_depth(10)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            let rel_path = entry
                .path()
                .strip_prefix(snapshot_path)
                .map_err(|e| OpsError::HubError(e.to_string()))?;
            let mut sibling = Sibling::new(rel_path.to_string_lossy().replace('\\', "/"));
            sibling.size = Some(entry.metadata().map_err(io::Error::from)?.len());
            siblings.push(sibling);
        }
    }
    siblings.sort_by(|a, b| a.rfilename.cmp(&b.rfilename));
    Ok(siblings)
}

/// Streams a hub response into `filepath` with progress tracking.
///
/// Use BufReader and BufWriter to efficiently read and write the file in chunks,
/// through a temp file renamed into place once complete.
fn download_file(
    response: reqwest::blocking::Response,
    filepath: &Path,
    sibling: &Sibling,
    progress: &mut Option<impl Progress>,
) -> Result<(), OpsError> {
    let parent = filepath
        .parent()
        .ok_or_else(|| OpsError::HubError("Invalid file path".into()))?;
    std::fs::create_dir_all(parent)?;
    let temp_file = NamedTempFile::new_in(parent)?;

    let total_size = response
        .content_length()
        .or(sibling.expected_size())
        .unwrap_or(0);

    let mut unit = ProgressUnit::new(sibling.rfilename.clone(), total_size);
    if let Some(prg) = progress.as_mut() {
        prg.on_start(&unit)?;
    }

    let mut downloaded: u64 = 0;
    {
        let mut buf_write = io::BufWriter::new(temp_file.as_file());
        let mut buf_read = io::BufReader::new(response);
        let mut buf = vec![0u8; 8192];

        loop {
            let len = buf_read.read(&mut buf)?;
            if len == 0 {
                break;
            }
            buf_write.write_all(&buf[..len])?;
            downloaded += len as u64;

            if let Some(prg) = progress.as_mut() {
                unit.update(downloaded);
                prg.on_progress(&unit)?;
            }
        }
        buf_write.flush()?;
    }

    temp_file
        .persist(filepath)
        .map_err(|e| OpsError::IoError(e.error))?;

    if let Some(prg) = progress.as_mut() {
        unit.update(downloaded);
        prg.on_finish(&unit)?;
    }
    Ok(())
}

/// Builder for [`HfHub`]
#[derive(Debug, Default)]
pub struct HfHubBuilder {
    endpoint: Option<String>,
    token: Option<String>,
    cache_dir: Option<PathBuf>,
    offline: bool,
    progress: bool,
}

impl HfHubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `HF_ENDPOINT`, `HF_TOKEN` (falling back to `$HF_HOME/token`)
    /// and `HF_HUB_OFFLINE`. The cache root follows `HF_HOME` by default.
    pub fn from_env() -> Self {
        let mut builder = Self::new();
        if let Ok(endpoint) = std::env::var(HF_ENDPOINT) {
            builder = builder.endpoint(endpoint);
        }
        let token = std::env::var(HF_TOKEN).ok().or_else(stored_token);
        builder = builder.token(token);
        if let Ok(offline) = std::env::var(HF_HUB_OFFLINE) {
            builder = builder.offline(is_truthy(&offline));
        }
        builder
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Bearer token for gated or private repos
    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Serve everything from the cache, never touch the network
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Draw a progress bar per downloaded file
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn build(self) -> Result<HfHub, OpsError> {
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(OpsError::BuildError(format!(
                "Endpoint must be an http(s) URL, got {endpoint:?}"
            )));
        }
        Ok(HfHub {
            endpoint,
            token: self.token,
            cache_dir: self.cache_dir.unwrap_or_else(repo::default_cache_dir),
            offline: self.offline,
            progress: self.progress.then(MultiProgressWrapper::new),
        })
    }
}

/// Token saved by `huggingface-cli login`.
fn stored_token() -> Option<String> {
    let home = match std::env::var(HF_HOME) {
        Ok(home) => PathBuf::from(home),
        Err(_) => dirs::home_dir()?.join(".cache").join("huggingface"),
    };
    let token = std::fs::read_to_string(home.join("token")).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Default, Clone)]
pub struct ProgressUnit {
    filename: String,
    total_size: u64,
    current: u64,
}

impl ProgressUnit {
    pub fn new(filename: String, total_size: u64) -> Self {
        Self {
            filename,
            total_size,
            ..Default::default()
        }
    }

    pub fn update(&mut self, current: u64) {
        self.current = current;
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn current(&self) -> u64 {
        self.current
    }
}

/// Download progress callbacks
pub trait Progress: Clone + Send + Sync {
    fn on_start(&mut self, unit: &ProgressUnit) -> Result<(), OpsError>;

    fn on_progress(&mut self, unit: &ProgressUnit) -> Result<(), OpsError>;

    fn on_finish(&mut self, unit: &ProgressUnit) -> Result<(), OpsError>;
}

/// One bar per file, stacked.
#[derive(Default, Clone)]
pub struct MultiProgressWrapper {
    current_bar: Option<ProgressBar>,
    inner: MultiProgressBar,
}

impl MultiProgressWrapper {
    pub fn new() -> Self {
        Self {
            current_bar: None,
            inner: MultiProgressBar::new(),
        }
    }
}

impl Progress for MultiProgressWrapper {
    fn on_start(&mut self, unit: &ProgressUnit) -> Result<(), OpsError> {
        let style = ProgressStyle::with_template("{prefix:.bold.cyan} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map_err(|e| OpsError::HubError(e.to_string()))?
            .with_key("eta", |state: &ProgressState, w: &mut dyn fmt::Write| {
                let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
            })
            .progress_chars("#>-");
        let pb = ProgressBar::new(unit.total_size()).with_finish(ProgressFinish::AndLeave);
        pb.set_style(style);
        pb.set_prefix(unit.filename().to_string());
        self.current_bar = Some(self.inner.add(pb));
        Ok(())
    }

    fn on_progress(&mut self, unit: &ProgressUnit) -> Result<(), OpsError> {
        if let Some(ref pb) = self.current_bar {
            pb.set_position(unit.current());
        }
        Ok(())
    }

    fn on_finish(&mut self, unit: &ProgressUnit) -> Result<(), OpsError> {
        if let Some(pb) = self.current_bar.take() {
            pb.set_position(unit.current());
            pb.finish();
        }
        Ok(())
    }
}
