// #![deny(missing_docs)]
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod fslock;
pub mod hub;
pub mod installer;
pub mod model_config;
pub mod repo;
pub mod tokenizer;
mod utils;

pub use hub::hf_api::{BlobLfsInfo, RepoInfo, Sibling};
pub use hub::{HfHub, HfHubBuilder, HubClient, MultiProgressWrapper, Progress, ProgressUnit, Snapshot};
pub use installer::{InstallConfig, InstallReport, Installer};
pub use model_config::ModelConfig;
pub use repo::Repo;
pub use tokenizer::Tokenizer;
pub use utils::OpsError;
