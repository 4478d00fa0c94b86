use clap::Parser;
use poly_converge::cli::{print_config, Cli, Commands};
use poly_converge::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // A config that cannot be loaded is fatal; never fall back to defaults
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: could not load config from {}: {}", cli.config, e);
            std::process::exit(2);
        }
    };

    // Initialize telemetry
    let _telemetry = poly_converge::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(mode = %args.mode(&config), "Starting bot");
            args.execute(&config).await?;
        }
        Commands::Reconcile(args) => {
            tracing::info!("Starting reconciliation");
            args.execute(&config).await?;
        }
        Commands::Status(args) => args.execute(&config).await?,
        Commands::CancelAll(args) => {
            tracing::warn!(live = args.live, "Cancelling open orders");
            args.execute(&config).await?;
        }
        Commands::Config => print_config(&config),
    }

    Ok(())
}
