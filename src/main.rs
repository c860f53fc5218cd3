use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use repairpay::application::PaymentOrchestrator;
use repairpay::config::Config;
use repairpay::domain::ports::LedgerStoreBox;
use repairpay::infrastructure::in_memory::InMemoryLedger;
use repairpay::infrastructure::notifier::TracingNotifier;
use repairpay::interfaces::csv::payment_writer::PaymentWriter;
use repairpay::interfaces::http::{AppState, router};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "repairpay", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the payment HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Write every payment in the ledger to stdout as CSV
    Export {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "repairpay=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    match cli.command {
        Command::Serve {
            host,
            port,
            db_path,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if db_path.is_some() {
                config.db_path = db_path;
            }
            serve(config).await
        }
        Command::Export { db_path } => {
            if db_path.is_some() {
                config.db_path = db_path;
            }
            export(config).await
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let ledger = open_ledger(config.db_path.as_deref())?;
    let gateways = config.gateway_registry().into_diagnostic()?;
    if gateways.is_empty() {
        tracing::warn!("No payment provider configured; initialize and verify will be rejected");
    } else {
        tracing::info!(providers = ?gateways.providers(), "Payment providers enabled");
    }

    let orchestrator = PaymentOrchestrator::new(ledger, gateways, Box::new(TracingNotifier));
    let app = router(AppState::new(orchestrator));

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

async fn export(config: Config) -> Result<()> {
    let ledger = open_ledger(config.db_path.as_deref())?;
    let orchestrator = PaymentOrchestrator::new(
        ledger,
        config.gateway_registry().into_diagnostic()?,
        Box::new(TracingNotifier),
    );
    let summaries = orchestrator.payment_summaries().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&summaries).into_diagnostic()?;
    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_ledger(db_path: Option<&Path>) -> Result<LedgerStoreBox> {
    use repairpay::infrastructure::rocksdb::RocksDbLedger;

    match db_path {
        Some(path) => Ok(Box::new(RocksDbLedger::open(path).into_diagnostic()?)),
        None => Ok(Box::new(InMemoryLedger::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_ledger(db_path: Option<&Path>) -> Result<LedgerStoreBox> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Box::new(InMemoryLedger::new()))
}
