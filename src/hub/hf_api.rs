//! Hugging Face hub api wrapper
//!
//! ```text
//! curl https://huggingface.co/api/models/meta-llama/Llama-2-7b-hf/revision/main?blobs=true
//! ```

use crate::repo::Repo;
use crate::utils::{BLOCKING_CLIENT, OpsError};
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};

/// Git LFS pointer of a large file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobLfsInfo {
    pub sha256: String,
    pub size: u64,
    #[serde(rename = "pointerSize", default)]
    pub pointer_size: Option<u64>,
}

/// One file of a repo at a given commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sibling {
    pub rfilename: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "blobId", default)]
    pub blob_id: Option<String>,
    #[serde(default)]
    pub lfs: Option<BlobLfsInfo>,
}

impl Sibling {
    pub fn new(rfilename: impl Into<String>) -> Self {
        Self {
            rfilename: rfilename.into(),
            size: None,
            blob_id: None,
            lfs: None,
        }
    }

    /// sha256 the downloaded bytes must hash to, known only for LFS files
    pub fn sha256(&self) -> Option<&str> {
        self.lfs.as_ref().map(|lfs| lfs.sha256.as_str())
    }

    /// Size of the real file, not of the LFS pointer.
    pub fn expected_size(&self) -> Option<u64> {
        self.lfs.as_ref().map(|lfs| lfs.size).or(self.size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: String,
    /// Commit the requested revision resolved to
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub siblings: Vec<Sibling>,
}

/// Adds the bearer token when there is one.
pub(crate) fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

pub fn get_repo_info(
    endpoint: &str,
    token: Option<&str>,
    repo: &Repo,
) -> Result<RepoInfo, OpsError> {
    let url = format!("{}/{}?blobs=true", endpoint, repo.api_path_with_revision());
    log::debug!("GET {url}");
    let response = authorize(BLOCKING_CLIENT.get(&url), token).send()?;
    let response = check_response(response, repo, None)?;
    Ok(response.json()?)
}

/// Turns a non-2xx hub answer into the matching error.
pub(crate) fn check_response(
    response: Response,
    repo: &Repo,
    filename: Option<&str>,
) -> Result<Response, OpsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_code = response
        .headers()
        .get("x-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let message = response.text().unwrap_or_default();
    Err(classify_error(
        status,
        error_code.as_deref(),
        &message,
        repo,
        filename,
    ))
}

/// The `X-Error-Code` header wins over the status, the hub answers 401 for
/// repos that don't exist when the caller is anonymous.
pub(crate) fn classify_error(
    status: StatusCode,
    error_code: Option<&str>,
    message: &str,
    repo: &Repo,
    filename: Option<&str>,
) -> OpsError {
    let repo_id = repo.repo_id().to_string();
    let entry_not_found = |repo_id: String| match filename {
        Some(filename) => OpsError::EntryNotFound {
            repo_id,
            filename: filename.to_string(),
        },
        None => OpsError::RepoNotFound(repo_id),
    };
    match error_code {
        Some("RepoNotFound") => OpsError::RepoNotFound(repo_id),
        Some("RevisionNotFound") => OpsError::RevisionNotFound {
            repo_id,
            revision: repo.revision().to_string(),
        },
        Some("EntryNotFound") => entry_not_found(repo_id),
        Some("GatedRepo") => OpsError::AccessDenied(repo_id),
        _ => match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OpsError::AccessDenied(repo_id),
            StatusCode::NOT_FOUND => entry_not_found(repo_id),
            _ => OpsError::HubError(format!("{status} for {repo_id}: {}", message.trim())),
        },
    }
}
