//! Fetches a model's tokenizer and config and writes them to local directories.

use crate::hub::HubClient;
use crate::model_config::ModelConfig;
use crate::repo::Repo;
use crate::tokenizer::{SENTENCEPIECE_MODEL, Tokenizer};
use crate::utils::OpsError;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "meta-llama/Llama-2-7b-hf";
pub const DEFAULT_TOKENIZER_DIR: &str = "./llama2_tokenizer";
pub const DEFAULT_CONFIG_DIR: &str = "./llama2_config";

/// What to install and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    pub model_identifier: String,
    pub tokenizer_output_dir: PathBuf,
    pub config_output_dir: PathBuf,
    /// Branch, tag or commit, resolved to a commit once per install
    pub revision: String,
}

impl InstallConfig {
    pub fn new(model_identifier: impl Into<String>) -> Self {
        Self {
            model_identifier: model_identifier.into(),
            ..Self::default()
        }
    }

    pub fn tokenizer_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tokenizer_output_dir = dir.into();
        self
    }

    pub fn config_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_output_dir = dir.into();
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            model_identifier: DEFAULT_MODEL.to_string(),
            tokenizer_output_dir: PathBuf::from(DEFAULT_TOKENIZER_DIR),
            config_output_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            revision: Repo::REVISION_MAIN.to_string(),
        }
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub model_identifier: String,
    pub commit: String,
    pub tokenizer_files: Vec<PathBuf>,
    pub config_file: PathBuf,
}

impl InstallReport {
    /// The saved sentencepiece model, if the tokenizer ships one.
    pub fn vocab_file(&self) -> Option<&Path> {
        self.tokenizer_files
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n == SENTENCEPIECE_MODEL))
            .map(PathBuf::as_path)
    }
}

pub struct Installer<H> {
    hub: H,
    config: InstallConfig,
}

impl<H: HubClient> Installer<H> {
    pub fn new(hub: H, config: InstallConfig) -> Self {
        Self { hub, config }
    }

    pub fn hub(&self) -> &H {
        &self.hub
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    /// The repo being installed, cached wherever the hub caches it.
    pub fn repo(&self) -> Result<Repo, OpsError> {
        self.hub.repo(&self.config.model_identifier, &self.config.revision)
    }

    /// Fetches the tokenizer on its own, resolving the revision itself.
    pub fn fetch_tokenizer(&self) -> Result<Tokenizer, OpsError> {
        Tokenizer::from_pretrained(&self.hub, &self.repo()?)
    }

    /// Fetches the config on its own, resolving the revision itself.
    pub fn fetch_config(&self) -> Result<ModelConfig, OpsError> {
        ModelConfig::from_pretrained(&self.hub, &self.repo()?)
    }

    /// Fetches both artifacts from one commit, then saves them.
    ///
    /// Nothing is written to the output directories unless both fetches
    /// succeeded.
    pub fn install(&self) -> Result<InstallReport, OpsError> {
        let repo = self.repo()?;
        log::info!(
            "installing tokenizer and config of {}@{}",
            repo.repo_id(),
            repo.revision()
        );
        let snapshot = self.hub.snapshot(&repo)?;

        let tokenizer = Tokenizer::from_snapshot(&self.hub, &snapshot)?;
        let config = ModelConfig::from_snapshot(&self.hub, &snapshot)?;

        let tokenizer_files = tokenizer.save(&self.config.tokenizer_output_dir)?;
        let config_file = config.save(&self.config.config_output_dir)?;

        Ok(InstallReport {
            model_identifier: self.config.model_identifier.clone(),
            commit: snapshot.commit().to_string(),
            tokenizer_files,
            config_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::hf_api::{RepoInfo, Sibling};
    use crate::hub::test_server::{Reply, TestServer};
    use crate::hub::HfHub;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    const LLAMA_COMMIT: &str = "01c7f73d771dfac7d292323805ebc428287df4f9";

    /// In-memory hub holding one model; anything else is "not found".
    struct FakeHub {
        repo_id: String,
        commits: RefCell<Vec<String>>,
        files: BTreeMap<String, Vec<u8>>,
        cache: tempfile::TempDir,
    }

    impl FakeHub {
        fn llama() -> Self {
            let files = [
                ("config.json", br#"{"model_type":"llama","vocab_size":32000}"#.to_vec()),
                ("tokenizer.model", b"\x0a\x0bsentencepiece".to_vec()),
                ("tokenizer_config.json", br#"{"add_bos_token":true}"#.to_vec()),
                ("special_tokens_map.json", br#"{"bos_token":"<s>"}"#.to_vec()),
                ("tokenizer.json", br#"{"version":"1.0"}"#.to_vec()),
                ("model-00001-of-00002.safetensors", b"weights".to_vec()),
            ];
            Self {
                repo_id: DEFAULT_MODEL.to_string(),
                commits: RefCell::new(vec![LLAMA_COMMIT.to_string()]),
                files: files
                    .into_iter()
                    .map(|(name, bytes)| (name.to_string(), bytes))
                    .collect(),
                cache: tempfile::tempdir().unwrap(),
            }
        }

        fn without(mut self, filename: &str) -> Self {
            self.files.remove(filename);
            self
        }
    }

    impl HubClient for FakeHub {
        fn repo_info(&self, repo: &Repo) -> Result<RepoInfo, OpsError> {
            if repo.repo_id() != self.repo_id {
                return Err(OpsError::RepoNotFound(repo.repo_id().to_string()));
            }
            // every lookup sees the next commit, as if the branch kept moving
            let mut commits = self.commits.borrow_mut();
            let sha = if commits.len() > 1 {
                commits.remove(0)
            } else {
                commits[0].clone()
            };
            Ok(RepoInfo {
                id: self.repo_id.clone(),
                sha: Some(sha),
                private: false,
                last_modified: None,
                siblings: self.files.keys().map(Sibling::new).collect(),
            })
        }

        fn download(&self, _repo: &Repo, commit: &str, sibling: &Sibling) -> Result<PathBuf, OpsError> {
            let bytes = &self.files[&sibling.rfilename];
            let path = self.cache.path().join(commit).join(&sibling.rfilename);
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(&path, bytes)?;
            Ok(path)
        }
    }

    fn config_in(out: &Path) -> InstallConfig {
        InstallConfig::default()
            .tokenizer_output_dir(out.join("llama2_tokenizer"))
            .config_output_dir(out.join("llama2_config"))
    }

    #[test]
    fn test_default_config() {
        let config = InstallConfig::default();
        assert_eq!(config.model_identifier, "meta-llama/Llama-2-7b-hf");
        assert_eq!(config.tokenizer_output_dir, PathBuf::from("./llama2_tokenizer"));
        assert_eq!(config.config_output_dir, PathBuf::from("./llama2_config"));
        assert_eq!(config.revision, "main");
        assert_eq!(InstallConfig::new(DEFAULT_MODEL), config);
    }

    #[test]
    fn test_install_llama2() {
        let out = tempfile::tempdir().unwrap();
        let config = config_in(out.path());
        let installer = Installer::new(FakeHub::llama(), config.clone());
        let report = installer.install().unwrap();

        assert_eq!(report.model_identifier, DEFAULT_MODEL);
        assert_eq!(report.commit, LLAMA_COMMIT);
        let mut names: Vec<String> = std::fs::read_dir(&config.tokenizer_output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "special_tokens_map.json",
                "tokenizer.json",
                "tokenizer.model",
                "tokenizer_config.json",
            ]
        );
        assert_eq!(
            report.vocab_file(),
            Some(config.tokenizer_output_dir.join("tokenizer.model").as_path())
        );
        assert_eq!(report.config_file, config.config_output_dir.join("config.json"));
        let saved = ModelConfig::from_file(&report.config_file).unwrap();
        assert_eq!(saved.model_type(), Some("llama"));
        assert_eq!(saved.vocab_size(), Some(32000));
    }

    #[test]
    fn test_install_twice_is_safe() {
        let out = tempfile::tempdir().unwrap();
        let config = config_in(out.path());
        let installer = Installer::new(FakeHub::llama(), config.clone());
        let first = installer.install().unwrap();
        let second = installer.install().unwrap();

        assert_eq!(first.tokenizer_files, second.tokenizer_files);
        assert_eq!(std::fs::read_dir(&config.tokenizer_output_dir).unwrap().count(), 4);
        assert_eq!(std::fs::read_dir(&config.config_output_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_unknown_model_writes_nothing() {
        let out = tempfile::tempdir().unwrap();
        let config = InstallConfig::new("meta-llama/Llama-2-7b-typo")
            .tokenizer_output_dir(out.path().join("llama2_tokenizer"))
            .config_output_dir(out.path().join("llama2_config"));
        let installer = Installer::new(FakeHub::llama(), config.clone());

        assert!(matches!(installer.install(), Err(OpsError::RepoNotFound(_))));
        assert!(!config.tokenizer_output_dir.exists());
        assert!(!config.config_output_dir.exists());
    }

    #[test]
    fn test_missing_config_writes_nothing() {
        let out = tempfile::tempdir().unwrap();
        let config = config_in(out.path());
        let installer = Installer::new(FakeHub::llama().without("config.json"), config.clone());

        assert!(matches!(
            installer.install(),
            Err(OpsError::MissingArtifact { kind: "config", .. })
        ));
        assert!(!config.tokenizer_output_dir.exists());
        assert!(!config.config_output_dir.exists());
    }

    #[test]
    fn test_install_pins_one_commit() {
        let out = tempfile::tempdir().unwrap();
        let hub = FakeHub::llama();
        *hub.commits.borrow_mut() = vec![LLAMA_COMMIT.to_string(), "f".repeat(40)];
        let installer = Installer::new(hub, config_in(out.path()));

        let report = installer.install().unwrap();
        assert_eq!(report.commit, LLAMA_COMMIT);
        // one resolution only: the fetch cache holds a single commit
        let cached: Vec<_> = std::fs::read_dir(installer.hub().cache.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(cached, vec![std::ffi::OsString::from(LLAMA_COMMIT)]);
    }

    #[test]
    fn test_separate_fetches() {
        let installer = Installer::new(FakeHub::llama(), InstallConfig::default());
        let tokenizer = installer.fetch_tokenizer().unwrap();
        assert!(tokenizer.file_names().any(|n| n == "tokenizer.model"));
        let config = installer.fetch_config().unwrap();
        assert_eq!(config.model_type(), Some("llama"));
    }

    #[test]
    fn test_invalid_identifier() {
        let installer = Installer::new(FakeHub::llama(), InstallConfig::new("not a repo"));
        assert!(matches!(installer.install(), Err(OpsError::BuildError(_))));
    }

    fn http_hub(server: &TestServer, cache: &Path) -> HfHub {
        HfHub::builder()
            .endpoint(server.endpoint())
            .cache_dir(cache)
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_model_over_http_writes_nothing() {
        let server = TestServer::start(vec![(
            "/api/models/test-org/missing/revision/main",
            Reply::status(401).header("X-Error-Code", "RepoNotFound"),
        )]);
        let cache = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let config = InstallConfig::new("test-org/missing")
            .tokenizer_output_dir(out.path().join("tokenizer"))
            .config_output_dir(out.path().join("config"));
        let installer = Installer::new(http_hub(&server, cache.path()), config.clone());

        assert!(matches!(
            installer.install(),
            Err(OpsError::RepoNotFound(id)) if id == "test-org/missing"
        ));
        assert!(!config.tokenizer_output_dir.exists());
        assert!(!config.config_output_dir.exists());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_install_over_http() {
        let config_json = r#"{"model_type":"llama","rope_scaling":null}"#;
        let tokenizer_json = r#"{"version":"1.0"}"#;
        let info = format!(
            r#"{{"id": "test-org/tiny-llama", "sha": "{LLAMA_COMMIT}", "siblings": [
                {{"rfilename": "config.json", "size": {}}},
                {{"rfilename": "tokenizer.json", "size": {}}},
                {{"rfilename": "model.safetensors", "size": 7}}]}}"#,
            config_json.len(),
            tokenizer_json.len()
        );
        let resolve = |file: &str| format!("/test-org/tiny-llama/resolve/{LLAMA_COMMIT}/{file}");
        let server = TestServer::start(vec![
            ("/api/models/test-org/tiny-llama/revision/main", Reply::ok(info)),
            (resolve("config.json").as_str(), Reply::ok(config_json)),
            (resolve("tokenizer.json").as_str(), Reply::ok(tokenizer_json)),
        ]);
        let cache = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let config = InstallConfig::new("test-org/tiny-llama")
            .tokenizer_output_dir(out.path().join("tokenizer"))
            .config_output_dir(out.path().join("config"));
        let installer = Installer::new(http_hub(&server, cache.path()), config.clone());

        let report = installer.install().unwrap();
        assert_eq!(report.commit, LLAMA_COMMIT);
        assert_eq!(report.vocab_file(), None);
        assert_eq!(
            std::fs::read_to_string(config.tokenizer_output_dir.join("tokenizer.json")).unwrap(),
            tokenizer_json
        );
        let saved: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&report.config_file).unwrap()).unwrap();
        assert_eq!(saved, serde_json::from_str::<serde_json::Value>(config_json).unwrap());
        // weights are never requested
        assert_eq!(server.hits(&resolve("model.safetensors")), 0);
    }
}
