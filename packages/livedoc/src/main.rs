use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

mod cli;
mod client;
mod config;
mod server;
mod ws;

#[cfg(test)]
mod e2e_tests;

use doc_index::{DocumentProcessor, ExtractiveAnswerer, HashEmbedder, IndexConfig, VectorIndex};

use crate::config::{FileConfig, LiveDocConfig, parse_endpoint};
use crate::server::{AppState, UploadLimits};

#[derive(Parser)]
#[command(name = "livedoc")]
#[command(about = "Document Q&A over WebSocket, with interchangeable failover servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.livedoc)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a server in the foreground
    Serve(ServeArgs),

    /// Upload and index a document
    Upload(UploadArgs),

    /// Search indexed documents (interactive when no query is given)
    Search(SearchArgs),

    /// Ask a question answered from indexed documents
    Ask(AskArgs),

    /// Show index and server counters
    Stats,
}

#[derive(Parser)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Listen on every configured candidate port in this one process
    #[arg(long)]
    all: bool,
}

#[derive(Parser)]
struct UploadArgs {
    /// File to upload
    file: PathBuf,
}

#[derive(Parser)]
struct SearchArgs {
    /// Query; omit for interactive search-as-you-type
    query: Option<String>,
}

#[derive(Parser)]
struct AskArgs {
    /// The question
    question: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let default_directive = if args.debug {
        "livedoc=debug,doc_index=debug,tower_http=debug,info"
    } else {
        "livedoc=info,doc_index=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let dirs = LiveDocConfig::new(args.data_dir.clone())?;
    let file_config: FileConfig = config::load_config(&dirs.data_dir)
        .extract()
        .context("invalid configuration")?;

    match args.command {
        Commands::Serve(serve) => run_server(serve, dirs, file_config).await,
        Commands::Upload(upload) => cli::upload_command(&file_config.client, &upload.file).await,
        Commands::Search(search) => cli::search_command(&file_config.client, search.query).await,
        Commands::Ask(ask) => cli::ask_command(&file_config.client, &ask.question).await,
        Commands::Stats => cli::stats_command(&file_config.client).await,
    }
}

async fn run_server(args: ServeArgs, dirs: LiveDocConfig, file_config: FileConfig) -> Result<()> {
    info!("Starting LiveDoc document server");

    let index_cfg = &file_config.index;
    let index = VectorIndex::load_or_create(
        dirs.index_dir.clone(),
        Box::new(HashEmbedder::new(index_cfg.embedding_dimension)),
        IndexConfig {
            max_results: index_cfg.max_results,
            similarity_threshold: index_cfg.similarity_threshold,
        },
    )?;
    let index = Arc::new(RwLock::new(index));

    let processor = Arc::new(DocumentProcessor::new(
        dirs.upload_dir.clone(),
        index_cfg.chunk_size,
        index_cfg.chunk_overlap,
    )?);
    let answerer = Arc::new(ExtractiveAnswerer::new());
    let active_clients = Arc::new(AtomicUsize::new(0));
    let limits = UploadLimits {
        max_file_size_bytes: file_config.server.max_file_size_bytes(),
        allowed_extensions: file_config.server.allowed_extensions.clone(),
    };

    // One listener per port; `--all` runs every configured candidate in
    // this process, sharing a single index.
    let ports: Vec<u16> = if args.all {
        file_config
            .client
            .servers
            .iter()
            .map(|s| parse_endpoint(s).map(|(_, port)| port))
            .collect::<Result<_>>()?
    } else {
        vec![args.port]
    };

    let shutdown = CancellationToken::new();
    let mut servers = Vec::new();
    for port in ports {
        let state = AppState {
            index: index.clone(),
            processor: processor.clone(),
            answerer: answerer.clone(),
            server_port: port,
            active_clients: active_clients.clone(),
            limits: limits.clone(),
        };

        let addr = format!("{}:{}", file_config.server.host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("Listening on {addr}");

        let app = server::router(state);
        let cancel = shutdown.clone();
        servers.push(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received shutdown signal, cleaning up...");
    shutdown.cancel();

    for handle in servers {
        handle.await?.context("Server error")?;
    }
    Ok(())
}
