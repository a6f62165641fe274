//! Client commands
//!
//! Each command starts a connection manager, waits for the link to
//! settle, issues its intent, and folds the resulting
//! [`SessionUpdate`]s into terminal output. Failover and reconnection
//! are entirely the manager's business; commands only observe
//! [`ClientEvent`]s.

use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::{
    ClientEvent, ClientHandle, ConnectionManager, Debouncer, LinkState, ServerRegistry,
    SessionUpdate,
};
use crate::config::ClientFileConfig;
use crate::ws::ClientMessage;

/// A running connection manager plus the channels to talk to it.
pub struct ClientRuntime {
    pub handle: ClientHandle,
    pub events: mpsc::Receiver<ClientEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl ClientRuntime {
    pub fn start(cfg: &ClientFileConfig) -> Result<Self> {
        let registry = ServerRegistry::new(cfg.endpoints()?);
        let (events_tx, events) = mpsc::channel(256);
        let (manager, handle) = ConnectionManager::new(registry, cfg.retry_policy(), events_tx);
        let task = tokio::spawn(manager.run());
        Ok(Self {
            handle,
            events,
            task,
        })
    }

    /// Block until the link settles Connected, or fail when every
    /// attempt was exhausted.
    pub async fn wait_until_connected(&mut self) -> Result<()> {
        while let Some(event) = self.events.recv().await {
            match event {
                ClientEvent::State(LinkState::Connected) => return Ok(()),
                ClientEvent::State(LinkState::Failed) => {
                    bail!("could not reach any configured server")
                }
                ClientEvent::State(state) => debug!(?state, "link state"),
                ClientEvent::Update(_) => {}
            }
        }
        bail!("connection manager stopped unexpectedly")
    }

    pub async fn shutdown(self) {
        self.handle.shutdown();
        let _ = self.task.await;
    }
}

/// Upload a file and follow the pipeline to its terminal envelope.
pub async fn upload_command(cfg: &ClientFileConfig, file: &Path) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid file name: {}", file.display()))?
        .to_string();
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let mut runtime = ClientRuntime::start(cfg)?;
    runtime.wait_until_connected().await?;

    runtime.handle.send(ClientMessage::FileUpload {
        filename: filename.clone(),
        file_data: BASE64.encode(&bytes),
    })?;

    let result = loop {
        let Some(event) = runtime.events.recv().await else {
            break Err(anyhow::anyhow!("connection manager stopped"));
        };
        match event {
            ClientEvent::Update(SessionUpdate::UploadAccepted { filename, size }) => {
                println!(
                    "uploaded {filename} ({} bytes)",
                    size.map(|s| s.to_string()).unwrap_or_else(|| "?".into())
                );
            }
            ClientEvent::Update(SessionUpdate::Progress {
                stage,
                progress,
                status,
            }) => {
                println!("  [{stage:?}] {progress:>3}%  {status}");
            }
            ClientEvent::Update(SessionUpdate::ProcessingDone { chunks }) => {
                if let Some(n) = chunks {
                    println!("  extracted {n} chunks");
                }
            }
            ClientEvent::Update(SessionUpdate::Indexed { chunks_added }) => {
                println!("indexed {filename}: {chunks_added} chunks added");
                break Ok(());
            }
            ClientEvent::Update(SessionUpdate::Failed { message, .. }) => {
                break Err(anyhow::anyhow!("upload failed: {message}"));
            }
            ClientEvent::Update(SessionUpdate::Interrupted { .. }) => {
                break Err(anyhow::anyhow!(
                    "connection lost during upload; the file was not indexed"
                ));
            }
            ClientEvent::State(LinkState::Failed) => {
                break Err(anyhow::anyhow!("lost every configured server"));
            }
            _ => {}
        }
    };

    runtime.shutdown().await;
    result
}

/// Ask a question and stream the answer to stdout as it arrives.
pub async fn ask_command(cfg: &ClientFileConfig, question: &str) -> Result<()> {
    let mut runtime = ClientRuntime::start(cfg)?;
    runtime.wait_until_connected().await?;

    runtime.handle.send(ClientMessage::AskQuestion {
        question: question.to_string(),
    })?;

    let result = loop {
        let Some(event) = runtime.events.recv().await else {
            break Err(anyhow::anyhow!("connection manager stopped"));
        };
        match event {
            ClientEvent::Update(SessionUpdate::AnswerStarted { .. }) => {}
            ClientEvent::Update(SessionUpdate::AnswerDelta { chunk, .. }) => {
                print!("{chunk}");
                std::io::stdout().flush()?;
            }
            ClientEvent::Update(SessionUpdate::AnswerComplete { context_used, .. }) => {
                println!();
                if !context_used {
                    println!("(no indexed documents matched the question)");
                }
                break Ok(());
            }
            ClientEvent::Update(SessionUpdate::Failed { message, .. }) => {
                println!();
                break Err(anyhow::anyhow!("question failed: {message}"));
            }
            ClientEvent::Update(SessionUpdate::Interrupted { .. }) => {
                println!();
                break Err(anyhow::anyhow!("connection lost mid-answer"));
            }
            ClientEvent::State(LinkState::Failed) => {
                break Err(anyhow::anyhow!("lost every configured server"));
            }
            _ => {}
        }
    };

    runtime.shutdown().await;
    result
}

/// One-shot search, or an interactive search-as-you-type loop when no
/// query was given.
pub async fn search_command(cfg: &ClientFileConfig, query: Option<String>) -> Result<()> {
    let mut runtime = ClientRuntime::start(cfg)?;
    runtime.wait_until_connected().await?;

    let result = match query {
        Some(q) => {
            runtime
                .handle
                .send(ClientMessage::SearchQuery { query: q })?;
            wait_for_results(&mut runtime).await
        }
        None => interactive_search(cfg, &mut runtime).await,
    };

    runtime.shutdown().await;
    result
}

async fn wait_for_results(runtime: &mut ClientRuntime) -> Result<()> {
    loop {
        let Some(event) = runtime.events.recv().await else {
            bail!("connection manager stopped");
        };
        match event {
            ClientEvent::Update(SessionUpdate::SearchResults {
                query,
                results,
                total_found,
            }) => {
                print_results(&query, &results, total_found);
                return Ok(());
            }
            ClientEvent::Update(SessionUpdate::Failed { message, .. }) => {
                bail!("search failed: {message}");
            }
            ClientEvent::Update(SessionUpdate::Interrupted { .. }) => {
                bail!("connection lost during search");
            }
            ClientEvent::State(LinkState::Failed) => {
                bail!("lost every configured server");
            }
            _ => {}
        }
    }
}

/// Read queries from stdin, debounced; each reply fully replaces the
/// display. EOF (ctrl-d) ends the loop.
async fn interactive_search(cfg: &ClientFileConfig, runtime: &mut ClientRuntime) -> Result<()> {
    println!("type to search, ctrl-d to quit");

    let mut debouncer = Debouncer::new(cfg.search_debounce());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(l) => {
                    let query = l.trim().to_string();
                    if !query.is_empty() {
                        debouncer.submit(query, Instant::now());
                    }
                }
                None => return Ok(()),
            },

            _ = tick.tick() => {
                if let Some(query) = debouncer.poll(Instant::now()) {
                    // Ignore transient disconnects; the user just types on.
                    if let Err(e) = runtime.handle.send(ClientMessage::SearchQuery { query }) {
                        debug!(error = %e, "search intent dropped");
                    }
                }
            }

            event = runtime.events.recv() => match event {
                Some(ClientEvent::Update(SessionUpdate::SearchResults {
                    query,
                    results,
                    total_found,
                })) => print_results(&query, &results, total_found),
                Some(ClientEvent::Update(SessionUpdate::Failed { message, .. })) => {
                    eprintln!("search failed: {message}");
                }
                Some(ClientEvent::State(LinkState::Failed)) => {
                    bail!("lost every configured server");
                }
                Some(_) => {}
                None => bail!("connection manager stopped"),
            }
        }
    }
}

fn print_results(query: &str, results: &[crate::ws::SearchResult], total_found: usize) {
    println!("\"{query}\" — {total_found} result(s)");
    for (i, r) in results.iter().enumerate() {
        let preview: String = r.text.chars().take(120).collect();
        println!(
            "  {}. [{:.2}] {}#{}: {}",
            i + 1,
            r.score,
            r.metadata.filename,
            r.metadata.chunk_id,
            preview
        );
    }
}

/// Print the index counters. The manager requests stats automatically on
/// every connect, so this just waits for the reply.
pub async fn stats_command(cfg: &ClientFileConfig) -> Result<()> {
    let mut runtime = ClientRuntime::start(cfg)?;
    runtime.wait_until_connected().await?;

    let result = loop {
        let Some(event) = runtime.events.recv().await else {
            break Err(anyhow::anyhow!("connection manager stopped"));
        };
        match event {
            ClientEvent::Update(SessionUpdate::ServerInfo { server_port }) => {
                println!("connected to server on port {server_port}");
            }
            ClientEvent::Update(SessionUpdate::Stats {
                total_documents,
                server_port,
                active_clients,
            }) => {
                println!("server port:     {server_port}");
                println!("indexed chunks:  {total_documents}");
                println!("active clients:  {active_clients}");
                break Ok(());
            }
            ClientEvent::Update(SessionUpdate::Failed { message, .. }) => {
                break Err(anyhow::anyhow!("stats request failed: {message}"));
            }
            ClientEvent::State(LinkState::Failed) => {
                break Err(anyhow::anyhow!("lost every configured server"));
            }
            _ => {}
        }
    };

    runtime.shutdown().await;
    result
}
