mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use vidvault::config::Config;
use vidvault::extractor::MetadataInvoker;
use vidvault::observability::init_tracing;
use vidvault::platform::validate_url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Server(args) => vidvault::api::run(config, args.address).await?,
        Commands::Info(args) => {
            let url = validate_url(&args.url)?;
            let info = MetadataInvoker::from_config(&config.extractor)
                .fetch(url.as_str())
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}
