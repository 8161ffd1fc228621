use anyhow::Result;
use clap::Parser;
use homewatch::{Homewatch, HomewatchConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "homewatch")]
#[command(about = "Raspberry Pi home monitoring with camera streaming, motion capture, and environment logging")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "homewatch.toml",
        help = "Path to TOML configuration file"
    )]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args);

    info!("Starting homewatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match HomewatchConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {e}");
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let app = Homewatch::bootstrap(&config).await?;

    let addr = format!("{}:{}", config.server.ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Homewatch dashboard API listening on {addr}");

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await;
    info!("Homewatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

fn init_logging(args: &Args) {
    let default_filter = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn,homewatch=info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_default_config() -> Result<()> {
    let config = HomewatchConfig::default();
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
