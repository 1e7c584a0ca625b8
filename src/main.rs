mod auth;
mod commands;
mod fs_util;
mod http_client;
mod model;

use clap::Parser;
use commands::CommandContext;
use model::arg::{Args, AuthAction, Command};
use model::config::Config;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config_path = args
        .config
        .unwrap_or_else(|| Config::default_config_path().to_string());
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        tracing::error!("Failed to load config: {:#}", e);
        std::process::exit(1);
    });
    tracing::debug!("Using config {:?}", config.config_path());

    let ctx = CommandContext::new(config, args.token, args.env_file);

    let result = match args.command {
        Command::Auth { action: None } => Err(anyhow::anyhow!(
            "subcommand required: in, out, check, or setup"
        )),
        Command::Auth {
            action: Some(AuthAction::In),
        } => commands::sign_in(&ctx).await,
        Command::Auth {
            action: Some(AuthAction::Out),
        } => commands::sign_out(&ctx),
        Command::Auth {
            action: Some(AuthAction::Check),
        } => commands::check(&ctx).await,
        Command::Auth {
            action: Some(AuthAction::Setup),
        } => commands::setup(&ctx),
    };

    if let Err(e) = result {
        if !commands::is_reported(&e) {
            tracing::error!("{:#}", e);
        }
        std::process::exit(1);
    }
}
