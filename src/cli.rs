use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vidvault")]
#[command(about = "VidVault media download service", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to `config/vidvault.toml` or `VIDVAULT_CONFIG`)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
    /// Print the normalized metadata of a single URL as JSON
    Info(InfoArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides `server.bind_addr`)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Source URL
    pub url: String,
}
