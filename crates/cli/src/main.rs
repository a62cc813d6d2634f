use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "poly-sniper")]
#[command(about = "BTC 5-minute up/down sniper for Polymarket", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanning and trading engine
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Start with the master switch on
        #[arg(long)]
        enabled: bool,
    },
    /// Redeem positions for a resolved market
    Redeem {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Market condition ID (0x…)
        #[arg(long)]
        condition_id: String,
        /// Use the neg-risk adapter
        #[arg(long)]
        neg_risk: bool,
    },
    /// Print the live CLOB collateral balance
    Balance {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Credentials may live in a .env next to the binary.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, enabled } => commands::run::execute(&config, enabled).await,
        Commands::Redeem {
            config,
            condition_id,
            neg_risk,
        } => commands::redeem::execute(&config, &condition_id, neg_risk).await,
        Commands::Balance { config } => commands::balance::execute(&config).await,
    }
}
