use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "matcha")]
#[command(about = "Mattermost AI chat bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the bot: connect the websocket event stream and serve commands
    /// until the connection is stopped.
    Run {
        /// Config file path (default: MATCHA_CONFIG_PATH or ~/.matcha/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("matcha {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_bot(config).await {
                log::error!("bot failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_bot(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    log::info!("loaded config from {}", path.display());

    let (bot, client) = lib::bot::Bot::from_config(&config)?;

    // password login only when no access token was provided
    if lib::config::resolve_access_token(&config).is_none() {
        let login_id = lib::config::resolve_login_id(&config)
            .or_else(|| lib::config::resolve_username(&config))
            .unwrap_or_default();
        let password = lib::config::resolve_password(&config).unwrap_or_default();
        client.login(&login_id, &password).await?;
    }

    Arc::new(bot).run(client).await
}
