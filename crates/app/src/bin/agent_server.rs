//! `agent-server`: answer `ask` requests from the mailbox until Ctrl-C.

use agent_host::{AttachmentResolver, ChatSessionStore, RequestHandler, Worker};
use anyhow::{Context, Result};
use clap::Parser;
use gemini_ask::init_tracing;
use providers::{GeminiClient, GeminiFileStore};
use services::{CommandScreenCapturer, Mailbox};
use shared::settings::AppSettings;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "agent-server", version, about = "Serve `ask` requests with Gemini")]
struct Args {
    /// Directory holding the mailbox and chat store.
    #[arg(long, env = "GEMINI_ASK_HOME", value_name = "DIR")]
    home: Option<PathBuf>,

    /// Settings file (defaults to the per-user config directory).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => AppSettings::load_from(path)?,
        None => AppSettings::load()?,
    };
    let home = args.home.as_deref();

    let timeout = settings.worker.request_timeout();
    let backend = GeminiClient::from_settings(&settings.model, timeout)
        .context("Cannot configure the Gemini client")?;
    let files = GeminiFileStore::from_settings(&settings.model, timeout)
        .context("Cannot configure the Gemini file store")?;
    let capturer = CommandScreenCapturer::new(settings.worker.screenshot_command.clone());

    let attachments = AttachmentResolver::new(
        Arc::new(files),
        Arc::new(capturer),
        std::env::temp_dir().join("gemini-ask"),
        settings.worker.capture_grace(),
    );
    let sessions = ChatSessionStore::open(settings.session_store_path(home))?;
    tracing::info!(
        "Loaded {} chat(s) from {}",
        sessions.summaries().len(),
        sessions.path().display()
    );

    let handler = RequestHandler::new(Arc::new(backend), attachments, sessions);
    let mailbox = Mailbox::open(settings.mailbox_dir(home))?;
    tracing::info!(
        "Agent server running (flash = {}, pro = {}); press Ctrl+C to stop",
        settings.model.fast_model,
        settings.model.capable_model
    );

    let mut worker = Worker::new(mailbox, handler, settings.mailbox.poll_interval());
    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
