use std::sync::Arc;

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use doco::{
    adapters::{
        FileSystemAdapter, MemoryContentStore, MemorySessionStore, session::SessionManager,
    },
    app,
    config::{AppConfig, AppConfigValidator, load_config},
    metrics,
    ports::content_store::ContentStore,
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (toml, json or yaml); `doco.toml` is used if present
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Run the API gateway and the reverse proxy (default)
    Serve,
    /// Print the effective configuration as JSON
    ShowConfig,
    /// Validate the configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::ShowConfig => show_config_command(&config),
        Commands::Validate => validate_config_command(&config),
        Commands::Serve => serve_command(config).await,
    }
}

fn show_config_command(config: &AppConfig) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("{rendered}");
    Ok(())
}

fn validate_config_command(config: &AppConfig) -> Result<()> {
    match AppConfigValidator::validate(config) {
        Ok(()) => {
            println!("Configuration is valid");
            println!("   proxy:   {}", config.load_balancer_addr);
            println!("   gateway: {}", config.server_addr);
            println!("   static:  {}", config.root_path);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn serve_command(config: AppConfig) -> Result<()> {
    AppConfigValidator::validate(&config).context("Invalid configuration")?;
    tracing_setup::init_tracing(&config.logging)?;
    metrics::register_metrics();

    let store = MemoryContentStore::new();
    if let Some(blob_dir) = &config.blob_dir {
        store
            .load_dir(&FileSystemAdapter::new(), blob_dir)
            .await
            .with_context(|| format!("Failed to load blobs from {blob_dir}"))?;
    }
    let store: Arc<dyn ContentStore> = Arc::new(store);
    let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()), &config.session)?;

    tracing::info!(
        proxy = %config.load_balancer_addr,
        gateway = %config.server_addr,
        root = %config.root_path,
        "starting doco"
    );

    if let Err(e) = app::run(&config, store, sessions).await {
        tracing::error!(error = %format!("{e:#}"), "doco stopped with an error");
        return Err(e);
    }

    tracing::info!("doco stopped");
    Ok(())
}
