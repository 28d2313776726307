use log::error;
use mailpump::config::FrontConfig;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let config = match FrontConfig::parse_args() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = mailpump::run_front(config).await {
        error!("smtp-front exited: {e}");
        std::process::exit(1);
    }
}
