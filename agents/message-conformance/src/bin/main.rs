//! Message Conformance Agent entry point
//!
//! # Usage
//!
//! ```bash
//! # Serve scheduled invocations over HTTP
//! message-conformance serve --port 8080
//!
//! # Run one validation pass and print the report
//! message-conformance run
//!
//! # Check a local message file against a local schema
//! message-conformance check --schema orders.json --messages 2024-01-01.xz
//! ```

use clap::{Parser, Subcommand};
use message_conformance::cli::{self, CheckArgs, OutputFormat};
use message_conformance::config::Settings;
use message_conformance::contracts::IssueEvent;
use message_conformance::handler::{create_router, AppState};
use message_conformance::runner::ConformanceRun;
use message_conformance::telemetry::RunMetrics;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "message-conformance")]
#[command(about = "Message Conformance Agent - validates archived topic messages against their schemas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", env = "PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Run one validation pass
    Run {
        /// Validate archives under this prefix instead of yesterday's
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Check a local message file against a schema
    Check {
        /// Schema file (JSON/YAML)
        #[arg(short, long)]
        schema: PathBuf,

        /// Message file, plain JSON text or an xz archive
        #[arg(short, long)]
        messages: PathBuf,

        /// Directory holding referenced schemas
        #[arg(long)]
        schema_dir: Option<PathBuf>,

        /// Topic name shown in findings
        #[arg(long, default_value = "local")]
        topic: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => {
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            let metrics = Arc::new(RunMetrics::new()?);
            let state = Arc::new(AppState::from_env(metrics));
            let router = create_router(state);

            tracing::info!("Starting Message Conformance Agent on {}", addr);
            tracing::info!(
                "Agent ID: {}, Version: {}",
                IssueEvent::AGENT_ID,
                IssueEvent::AGENT_VERSION
            );

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router).await?;
        }

        Commands::Run { prefix } => {
            let metrics = Arc::new(RunMetrics::new()?);
            let mut run = ConformanceRun::connect(Settings::from_env()?, metrics)?;
            if let Some(prefix) = prefix {
                run = run.with_history_prefix(prefix);
            }
            let report = run.execute().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Check {
            schema,
            messages,
            schema_dir,
            topic,
            output,
        } => {
            let args = CheckArgs {
                schema,
                messages,
                schema_dir,
                topic,
            };
            let code = match cli::check(&args).await {
                Ok(result) => {
                    result.render(output)?;
                    cli::exit_code(&result)
                }
                Err(e) => {
                    eprintln!("{e}");
                    e.exit_code()
                }
            };
            std::process::exit(code.into());
        }
    }

    Ok(())
}
