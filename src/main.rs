//! contextform - chat-driven CAD modification client
//!
#![doc = "contextform - chat-driven CAD modification client"]
#![doc = "Main entry point for the contextform command-line client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use contextform::cli::{Cli, Commands};
use contextform::commands;
use contextform::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Login {
            email,
            name,
            access_key,
            secret_key,
        } => {
            tracing::info!("Starting login");
            let args = commands::auth::LoginArgs {
                email,
                name,
                access_key,
                secret_key,
            };
            commands::auth::login(config, args).await?;
            Ok(())
        }
        Commands::Logout => {
            commands::auth::logout(config).await?;
            Ok(())
        }
        Commands::Documents => {
            tracing::info!("Listing documents");
            commands::documents::list_documents(config).await?;
            Ok(())
        }
        Commands::Chat { document } => {
            if let Some(id) = &document {
                tracing::debug!("Opening document: {}", id);
            }
            commands::chat::run_chat(config, document).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so they never interleave with the transcript on stdout.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "contextform=debug"
    } else {
        "contextform=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
