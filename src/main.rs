use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use danmu_relay_cli::config::{load_configuration, RelayConfiguration};
use danmu_relay_cli::controller::{RelayController, RelayStatus};
use danmu_relay_cli::server::{self, RemoteConsumer};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Danmu relay - deduplicated live-chat forwarding
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Output format
    #[arg(short, long, default_value = "human")]
    output: OutputFormat,

    /// Metrics server port (set to 0 to disable)
    #[arg(long, default_value_t = 0)]
    metrics_port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay newline-delimited producer payloads to the configured consumers
    Relay(RelayArgs),
    /// Run the remote consumer that receives relayed danmu
    Serve(ServeArgs),
}

#[derive(Args)]
struct RelayArgs {
    /// Payload source, `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Comment API request URL the payloads were captured from
    #[arg(long)]
    request_url: Option<String>,

    /// Time to let in-flight batches drain before stopping, in milliseconds
    #[arg(long, default_value_t = 500)]
    linger_ms: u64,
}

#[derive(Args)]
struct ServeArgs {
    /// Listen address, overrides the configuration
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;
    let _metrics_server = danmu_relay_cli::metrics::spawn_metrics_server(cli.metrics_port);

    info!(
        "Starting danmu-relay v{} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_DATE")
    );

    let config = load_configuration(cli.config.as_deref()).context("Failed to load configuration")?;

    let result = match cli.command {
        Commands::Relay(args) => cmd_relay(args, &config, cli.output).await,
        Commands::Serve(args) => cmd_serve(args, &config).await,
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn cmd_relay(args: RelayArgs, config: &RelayConfiguration, output: OutputFormat) -> Result<()> {
    let controller = RelayController::launch(config)?;
    let printer = controller
        .display()
        .attach(controller.ui(), |line| println!("{line}"));

    let ack = controller.start();
    if !ack.ok {
        bail!(
            "capture could not start: {}",
            ack.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let reader: Box<dyn AsyncRead + Unpin + Send> = if args.input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(&args.input)
                .await
                .with_context(|| format!("Failed to open input {}", args.input))?,
        )
    };

    let mut lines = BufReader::new(reader).lines();
    let mut line_no = 0usize;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = signal::ctrl_c() => {
                info!("Interrupted, stopping capture");
                None
            }
        };
        let Some(line) = line else { break };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match controller.ingest_response(args.request_url.as_deref(), &line) {
            Ok(accepted) => debug!(line = line_no, accepted, "payload handed to producer context"),
            Err(err) => warn!(line = line_no, %err, "skipping malformed payload"),
        }
    }

    tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;
    controller.stop();
    print_status(&controller.status(), output)?;

    controller.shutdown().await;
    printer.abort();
    Ok(())
}

async fn cmd_serve(args: ServeArgs, config: &RelayConfiguration) -> Result<()> {
    let mut section = config.server.clone();
    if let Some(bind) = args.bind {
        section.bind = bind;
    }
    let addr = section.bind_addr()?;
    let consumer = RemoteConsumer::new(section.history);

    tokio::select! {
        result = server::serve(addr, consumer) => {
            result.with_context(|| format!("Remote consumer on {addr} failed"))?;
        }
        _ = signal::ctrl_c() => {
            info!("Shutting down remote consumer");
        }
    }
    Ok(())
}

fn print_status(status: &RelayStatus, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(status)?),
        OutputFormat::Human => {
            println!("comments relayed: {}", status.comment_count);
            println!("live room: {}", status.live_id.as_deref().unwrap_or("-"));
            println!("remote consumer: {}", status.connection);
        }
    }
    Ok(())
}
