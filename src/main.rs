use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use aiconsole::chat::{
    ChatSessionHandle, DisplayTarget, HttpAiBackend, PromptType, QrPurpose, SessionUpdate,
    SseTransport, StoredCredentials, StreamMethod,
};
use aiconsole::{
    util, AppStateStore, BufferEditor, ChatState, Config, ConsoleSession, ConsoleWorkspace,
    Database, DraftStore, EditorSurface, ExecutionContext, SessionId, SharedServices,
};

/// Streaming AI assistant for a SQL console
#[derive(Parser, Debug)]
#[command(name = "aiconsole", version, about)]
struct Args {
    /// Data directory (default: ~/.aiconsole)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// AI service base URL (overrides the config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Send prompts as a JSON body instead of query parameters
    #[arg(long)]
    post: bool,

    /// Console id; drafts are stored under it
    #[arg(long, default_value = "default")]
    console: String,

    /// Data source the console is attached to
    #[arg(long)]
    data_source: Option<i64>,

    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    schema: Option<String>,
}

const HELP: &str = "\
Plain lines are natural-language prompts; generated SQL replaces the editor.
  /explain [sql]     explain the selection (or the given SQL)
  /optimize [sql]    suggest optimizations
  /convert [sql]     convert to another dialect
  /chat <text>       free-form question
  /known a,b,c       set the known tables (all become selected)
  /tables a,b,c      select a subset of the known tables
  /invite            show the invite QR code for more uses
  /dismiss           close the QR code and stop login polling
  /cancel            stop the current request
  /show              print the editor and session state
  /save              mark the editor as saved (drops the draft)
  /quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    util::init_data_dir(args.data_dir.clone());

    // Initialize logging to file (~/.aiconsole/logs/aiconsole.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let mut config = Config::load();
    if let Some(ref base_url) = args.base_url {
        config = config.with_base_url(base_url.as_str());
    }
    if args.post {
        config = config.with_stream_method(StreamMethod::Post);
    }

    let db = Database::open_default()?;
    let server = &config.server;
    let services = SharedServices {
        transport: Arc::new(SseTransport::new(
            server.base_url.as_str(),
            server.stream_method,
            server.credential_header.as_str(),
            server.request_timeout,
        )?),
        backend: Arc::new(HttpAiBackend::new(
            server.base_url.as_str(),
            server.request_timeout,
        )?),
        credentials: Arc::new(StoredCredentials::load(AppStateStore::new(db.connection()))),
    };
    let drafts = Arc::new(DraftStore::new(db.connection()));
    let mut workspace =
        ConsoleWorkspace::new(services, drafts, config.chat, config.autosave_interval);

    let mut context = ExecutionContext {
        data_source_id: args.data_source,
        ..ExecutionContext::default()
    };
    if let Some(ref database) = args.database {
        context = context.with_database(database.as_str());
    }
    if let Some(ref schema) = args.schema {
        context = context.with_schema(schema.as_str());
    }

    let session_id = SessionId::from_string(args.console.as_str());
    let console = ConsoleSession::with_id(session_id.clone(), context)
        .with_table_soft_limit(config.table_soft_limit);
    let editor = Arc::new(BufferEditor::new());
    let (handle, updates) = workspace.mount(console, editor.clone());
    workspace.activate(&session_id);

    println!("aiconsole {} (/help for commands)", config.server.base_url);
    let restored = editor.get_all_content();
    if !restored.is_empty() {
        println!("Restored draft:\n{restored}");
    }

    run_repl(&mut workspace, &handle, editor.as_ref(), updates).await?;

    workspace.shutdown();
    Ok(())
}

async fn run_repl(
    workspace: &mut ConsoleWorkspace,
    handle: &ChatSessionHandle,
    editor: &BufferEditor,
    mut updates: mpsc::UnboundedReceiver<SessionUpdate>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut streaming_target = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(workspace, handle, editor, line.trim()).await? {
                    break;
                }
            }
            Some(update) = updates.recv() => {
                print_update(&update, editor, &mut streaming_target);
            }
        }
    }
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(
    workspace: &mut ConsoleWorkspace,
    handle: &ChatSessionHandle,
    editor: &BufferEditor,
    line: &str,
) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    let Some(command) = line.strip_prefix('/') else {
        handle.submit(PromptType::NlToSql, line)?;
        return Ok(true);
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "q" => return Ok(false),
        "help" | "h" => println!("{HELP}"),
        "explain" | "optimize" | "convert" => {
            let prompt_type = PromptType::parse(name).unwrap_or(PromptType::Explain);
            if rest.is_empty() {
                handle.submit_selection(prompt_type)?;
            } else {
                handle.submit(prompt_type, rest)?;
            }
        }
        "chat" => handle.submit(PromptType::Chat, rest)?,
        "known" => handle.set_known_tables(split_tables(rest))?,
        "tables" => handle.select_tables(split_tables(rest))?,
        "invite" => handle.show_invite()?,
        "dismiss" => handle.dismiss_qr()?,
        "cancel" => handle.cancel()?,
        "show" => {
            let snapshot = handle.snapshot().await?;
            println!("-- editor --\n{}", editor.get_all_content());
            println!(
                "-- state: {} | tables: {}/{} selected",
                snapshot.state,
                snapshot.selected_tables.len(),
                snapshot.known_tables.len()
            );
            if let Some(poll) = snapshot.poll {
                println!(
                    "-- login poll: {:?}, {} checks left",
                    poll.status, poll.attempts_remaining
                );
            }
        }
        "save" => {
            workspace.mark_saved(handle.session_id())?;
            println!("Draft cleared");
        }
        other => println!("Unknown command /{other} (/help for commands)"),
    }
    Ok(true)
}

fn split_tables(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_update(
    update: &SessionUpdate,
    editor: &BufferEditor,
    streaming_target: &mut Option<DisplayTarget>,
) {
    match update {
        SessionUpdate::Loading {
            target,
            active: true,
        } => {
            *streaming_target = Some(*target);
            println!("... thinking");
        }
        SessionUpdate::Loading { active: false, .. } => {}
        SessionUpdate::StateChanged {
            to: ChatState::Completed,
            ..
        } => {
            if *streaming_target == Some(DisplayTarget::Editor) {
                println!("{}", editor.get_all_content().trim_end());
            }
        }
        SessionUpdate::StateChanged { .. } => {}
        SessionUpdate::PanelOpened => {}
        SessionUpdate::PanelContent(text) => println!("{}", text.trim_end()),
        SessionUpdate::QrShown(qr) => {
            let heading = match qr.purpose {
                QrPurpose::Login => "Log in to continue",
                QrPurpose::Invite => "Invite friends for more AI uses",
            };
            println!("{heading}: {}", qr.image_url);
            if !qr.tip.is_empty() {
                println!("  {}", qr.tip);
            }
        }
        SessionUpdate::QrDismissed => println!("(QR code closed)"),
        SessionUpdate::Notice(notice) => println!("! {notice}"),
    }
}
