//! # anchorline CLI Entry Point
//!
//! Serves a store+ledger node, talks to one as a client, or moves items
//! over the networked channel.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use anchorline::{AnchorlineConfig, DataItem, Label, Pipeline, TcpPublisher};
use anchorline_core::CoreError;
use anchorline_rpc::{serve, NodeService};
use anchorline_store::{Ledger, SqliteContentStore, SqliteLedger};

/// Anchorline: store labelled data by content address and anchor it on a
/// ledger.
#[derive(Parser, Debug)]
#[command(name = "anchorline", version, about)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve a SQLite-backed content store and ledger over RPC.
    Serve,
    /// Subscribe to the channel endpoint and ingest until interrupted.
    Listen,
    /// Bind the channel endpoint and publish files under a label.
    Publish {
        #[arg(long, value_parser = parse_label)]
        label: Label,
        /// Subscribers to wait for before publishing.
        #[arg(long, default_value_t = 1)]
        subscribers: usize,
        /// Give up waiting for subscribers after this many seconds.
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Store a file and anchor it under a label.
    Ingest {
        #[arg(long, value_parser = parse_label)]
        label: Label,
        /// Acquisition time in microseconds; now if omitted.
        #[arg(long)]
        timestamp: Option<u64>,
        file: PathBuf,
    },
    /// Fetch the latest content anchored under a label.
    Get {
        #[arg(value_parser = parse_label)]
        label: Label,
        /// Write the payload here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a product's published events as JSON.
    Events {
        #[arg(value_parser = parse_label)]
        label: Label,
    },
    /// Deploy a registry contract.
    Deploy { contract_id: String },
    /// Print a summary of the registry.
    Initialize,
    /// Register a product.
    AddProduct {
        #[arg(value_parser = parse_label)]
        label: Label,
    },
    /// Register a party.
    AddParty {
        party_id: String,
        contact_info: String,
        /// Seal the contact info with a key derived from this owner name.
        #[arg(long)]
        seal_for: Option<String>,
    },
    /// Associate a party with a product.
    Associate {
        party_id: String,
        #[arg(value_parser = parse_label)]
        product: Label,
    },
}

fn parse_label(s: &str) -> Result<Label, CoreError> {
    Label::new(s)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AnchorlineConfig> {
    match path {
        Some(path) => Ok(AnchorlineConfig::from_toml_file(path)?),
        None => Ok(AnchorlineConfig::default()),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_server(config: &AnchorlineConfig) -> anyhow::Result<()> {
    let database = &config.server.database;
    let store = SqliteContentStore::open(database)
        .with_context(|| format!("opening content store at {}", database.display()))?;
    let ledger = SqliteLedger::open(database)
        .with_context(|| format!("opening ledger at {}", database.display()))?
        .with_policy(config.ledger_policy());

    let service = NodeService::new()
        .with_blobs(Arc::new(store))
        .with_ledger(Arc::new(ledger));
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;

    serve(listener, Arc::new(service), async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await?;
    Ok(())
}

async fn run_listener(pipeline: &Pipeline) -> anyhow::Result<()> {
    let mut source = pipeline.subscribe_remote();
    let ingestion = pipeline.ingestion();
    let handle = ingestion.handle();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        handle.stop();
    });

    let report = ingestion.run(&mut source).await;
    info!(
        ingested = report.ingested,
        skipped = report.skipped,
        failed = report.failed,
        "listener stopped"
    );
    Ok(())
}

async fn run_publisher(
    config: &AnchorlineConfig,
    label: Label,
    subscribers: usize,
    wait: Duration,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    let publisher = TcpPublisher::bind(&config.channel.endpoint)
        .await
        .with_context(|| format!("binding {}", config.channel.endpoint))?;
    if !publisher.wait_for_subscribers(subscribers, wait).await {
        anyhow::bail!("fewer than {} subscribers after {:?}", subscribers, wait);
    }

    for file in files {
        let payload = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        let item = DataItem::now(label.clone(), payload);
        let reached = publisher.publish(&item).await?;
        info!(%label, file = %file.display(), reached, "published");
    }
    publisher.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(cli.config.as_ref())?);

    let pipeline = Pipeline::from_config(config.clone());
    match cli.command {
        Commands::Serve => run_server(&config).await?,
        Commands::Listen => run_listener(&pipeline).await?,
        Commands::Publish {
            label,
            subscribers,
            wait_secs,
            files,
        } => {
            run_publisher(&config, label, subscribers, Duration::from_secs(wait_secs), &files).await?
        }
        Commands::Ingest {
            label,
            timestamp,
            file,
        } => {
            let payload = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let item = match timestamp {
                Some(ts) => DataItem::new(label, payload, ts),
                None => DataItem::now(label, payload),
            };
            let record = pipeline.ingest(item).await?;
            print_json(&record)?;
        }
        Commands::Get { label, out } => {
            let latest = pipeline.get_latest(&label).await?;
            info!(%label, address = %latest.address, timestamp = latest.timestamp, "latest");
            match out {
                Some(path) => std::fs::write(&path, &latest.payload)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().lock().write_all(&latest.payload)?,
            }
        }
        Commands::Events { label } => {
            let events = pipeline.ledger().product_events(&label).await?;
            print_json(&events)?;
        }
        Commands::Deploy { contract_id } => pipeline.deploy_contract(&contract_id).await?,
        Commands::Initialize => print_json(&pipeline.initialize().await?)?,
        Commands::AddProduct { label } => pipeline.add_product(&label).await?,
        Commands::AddParty {
            party_id,
            contact_info,
            seal_for,
        } => match seal_for {
            Some(owner) => {
                let sealed = pipeline
                    .add_party_sealed(&party_id, &contact_info, &owner)
                    .await?;
                println!("{}", sealed);
            }
            None => pipeline.add_party(&party_id, &contact_info).await?,
        },
        Commands::Associate { party_id, product } => {
            pipeline.associate_party(&party_id, &product).await?
        }
    }

    Ok(())
}
