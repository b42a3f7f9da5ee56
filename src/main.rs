mod cli;

use clap::Parser;
use malsift::config;
use malsift::errors::MalsiftError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(!cli.no_color)
            .with_writer(std::io::stderr)
            .init();
    }
    if cli.no_color {
        console::set_colors_enabled(false);
    }

    let config_path = cli.config.as_deref();
    let db = cli.db.as_deref();
    let result = match cli.command {
        cli::Commands::Scan(args) => cli::scan::handle_scan(args, config_path, db).await,
        cli::Commands::Serve(args) => cli::serve::handle_serve(args, config_path, db).await,
        cli::Commands::Schedule { action } => cli::schedule::handle_schedule(action, config_path, db).await,
        cli::Commands::Devices { action } => cli::devices::handle_devices(action, config_path, db).await,
        cli::Commands::Rank { action } => cli::rank::handle_rank(action, config_path, db).await,
        cli::Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            let exit_code = match &e {
                MalsiftError::Config(_)
                | MalsiftError::UnknownEngine(_)
                | MalsiftError::UnsupportedScanKind(_)
                | MalsiftError::InvalidRateLimit(_) => 2,
                MalsiftError::Container(_) | MalsiftError::Docker(_) => 3,
                MalsiftError::InvalidTarget(_) => 5,
                MalsiftError::NotFound(_) => 6,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), MalsiftError> {
    let _config = config::parse_config(&args.file).await?;
    println!("Configuration is valid: {}", args.file.display());
    Ok(())
}
