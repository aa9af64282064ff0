use clap::Parser;
use model_install::installer::{DEFAULT_CONFIG_DIR, DEFAULT_MODEL, DEFAULT_TOKENIZER_DIR};
use model_install::{HfHubBuilder, HubClient, InstallConfig, Installer, OpsError};
use std::path::PathBuf;

/// Fetch a model's tokenizer and config from the Hugging Face Hub
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// model id on the hub
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// where the tokenizer files are written, created if missing
    #[arg(short, long, default_value = DEFAULT_TOKENIZER_DIR)]
    tokenizer_dir: PathBuf,

    /// where config.json is written, created if missing
    #[arg(short, long, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// branch, tag or commit
    #[arg(short, long, default_value = "main")]
    revision: String,

    /// hub URL, overrides $HF_ENDPOINT
    #[arg(long)]
    endpoint: Option<String>,

    /// access token for gated models such as Llama 2, overrides $HF_TOKEN
    #[arg(long)]
    token: Option<String>,

    /// hub cache, defaults to $HF_HOME/hub or ~/.cache/huggingface/hub
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// only use files already in the cache, like HF_HUB_OFFLINE=1
    #[arg(long)]
    offline: bool,

    /// print the files of the model and exit
    #[arg(long)]
    list_files: bool,

    /// don't draw download progress bars
    #[arg(long)]
    no_progress: bool,
}

fn main() -> Result<(), OpsError> {
    env_logger::init();
    let args = Args::parse();

    let mut builder = HfHubBuilder::from_env().progress(!args.no_progress);
    if args.offline {
        builder = builder.offline(true);
    }
    if args.token.is_some() {
        builder = builder.token(args.token);
    }
    if let Some(endpoint) = args.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(cache_dir) = args.cache_dir {
        builder = builder.cache_dir(cache_dir);
    }
    let hub = builder.build()?;

    if args.list_files {
        let repo = hub.repo(&args.model, &args.revision)?;
        for file in hub.list_hub_files(&repo)? {
            println!("{file}");
        }
        return Ok(());
    }

    let config = InstallConfig::new(args.model)
        .tokenizer_output_dir(args.tokenizer_dir)
        .config_output_dir(args.config_dir)
        .revision(args.revision);
    let report = Installer::new(hub, config).install()?;

    println!(
        "{} @ {}: {} tokenizer files, config at {}",
        report.model_identifier,
        report.commit,
        report.tokenizer_files.len(),
        report.config_file.display()
    );
    if let Some(vocab_file) = report.vocab_file() {
        println!("--vocab-file {}", vocab_file.display());
    }
    Ok(())
}
