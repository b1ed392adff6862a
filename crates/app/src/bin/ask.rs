//! `ask`: post one question to the agent server and print its answer.

use agent_host::{ChatSessionStore, ClientDispatcher};
use anyhow::{Context, Result};
use clap::Parser;
use gemini_ask::{file_picker, init_tracing};
use services::Mailbox;
use shared::errors::MailboxError;
use shared::protocol::{ModelTier, Request};
use shared::settings::AppSettings;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ask", version, about = "Ask the Gemini agent server a question")]
#[command(arg_required_else_help = true)]
struct Args {
    /// Continue (or start) a named conversation.
    #[arg(long, value_name = "NAME")]
    chat: Option<String>,

    /// Model tier: `flash` for quick text answers, `pro` for screenshots and files.
    #[arg(long, default_value = "flash")]
    model: ModelTier,

    /// Pick a PDF to attach with a file dialog.
    #[arg(long, conflicts_with = "file")]
    pdf: bool,

    /// Attach a file by path.
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// List stored chats and exit.
    #[arg(long)]
    list_chats: bool,

    /// Directory holding the mailbox and chat store.
    #[arg(long, env = "GEMINI_ASK_HOME", value_name = "DIR")]
    home: Option<PathBuf>,

    /// Seconds to wait for an answer (defaults to the configured value).
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// The question. Flags may come before or after it; use `--` before
    /// words that start with `-`.
    #[arg(required_unless_present = "list_chats")]
    prompt: Vec<String>,
}

fn main() -> ExitCode {
    init_tracing("warn");
    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[!] Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let settings = AppSettings::load()?;
    let home = args.home.as_deref();

    if args.list_chats {
        return list_chats(&settings, home);
    }

    let attachment = if args.pdf {
        println!("Please select a PDF file to analyze...");
        match file_picker::pick_pdf() {
            Some(path) => {
                println!("Selected file: {}", path.display());
                Some(path)
            }
            None => {
                eprintln!("No file selected. Aborting.");
                return Ok(ExitCode::FAILURE);
            }
        }
    } else {
        args.file.clone()
    };

    let mut request = Request::new(args.prompt.join(" "), args.model);
    if let Some(path) = attachment {
        // The worker may run from another directory.
        let path = std::path::absolute(&path)
            .with_context(|| format!("Cannot resolve {}", path.display()))?;
        request = request.with_attachment(path);
    }
    if let Some(chat) = &args.chat {
        request = request.with_chat(chat.clone());
    }

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.mailbox.client_timeout());
    let mailbox = Mailbox::open(settings.mailbox_dir(home))?;
    let client = ClientDispatcher::new(mailbox, settings.mailbox.poll_interval(), timeout);

    let mut status = format!("Sent to agent (Model: {})", request.model);
    if let Some(chat) = &request.chat_name {
        status.push_str(&format!(" (Chat: {})", chat));
    }
    println!("{}... Waiting for response...", status);

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(client.dispatch(&request)) {
        Ok(response) if response.is_error() => {
            eprintln!("\n[!] The Agent Server reported an error:");
            eprintln!("{}", response.response);
            Ok(ExitCode::FAILURE)
        }
        Ok(response) => {
            println!("\n--- Gemini's Answer ---");
            println!("{}", response.response);
            println!("------------------------");
            Ok(ExitCode::SUCCESS)
        }
        Err(MailboxError::Timeout { .. }) => {
            eprintln!("\n[!] Error: Timed out waiting for a response from the server.");
            eprintln!("Is 'agent-server' running in another terminal?");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("\n[!] Error reading response: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn list_chats(settings: &AppSettings, home: Option<&std::path::Path>) -> Result<ExitCode> {
    let store = ChatSessionStore::open_read_only(settings.session_store_path(home))?;
    let summaries = store.summaries();
    if summaries.is_empty() {
        println!("No saved chats in {}", store.path().display());
        return Ok(ExitCode::SUCCESS);
    }
    for chat in summaries {
        let marker = if chat.has_attachment { " [attachment]" } else { "" };
        println!("{}  ({} exchanges){}", chat.name, chat.exchanges, marker);
    }
    Ok(ExitCode::SUCCESS)
}
