use std::path::PathBuf;

use clap::Parser;
use log::error;
use mailpump::config::BackConfig;

/// `submission-service` takes exactly one argument: the path to its
/// TOML config file (spec §6, "text-format structured record, path
/// supplied by CLI").
#[derive(Parser)]
struct Args {
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let args = Args::parse();
    let config = match BackConfig::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = mailpump::run_back(config).await {
        error!("submission-service exited: {e}");
        std::process::exit(1);
    }
}
