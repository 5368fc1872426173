use std::io::Write;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{info, warn};
use vidharini::config::Config;
use vidharini::logging::{self, LogSink};
use vidharini::poller::TaskPoller;
use vidharini::{db, runtime, web};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

#[derive(Debug, Parser)]
#[command(
    name = "vidharini",
    version = VERSION,
    about = "Vidharini legal assistant server and client"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Start the web API, queue worker and status sweeper
    Serve,
    /// Write a default vidharini.config.yaml
    Init {
        #[arg(long, default_value = "vidharini.config.yaml")]
        path: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Manage users
    User(UserCommand),
    /// Manage API keys
    Key(KeyCommand),
    /// Send a message to a running server and print the reply
    Ask(AskArgs),
    /// Wait for a chat task to finish and print its result
    Poll {
        task_id: String,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Show version
    Version,
}

#[derive(Debug, Args)]
struct ServerArgs {
    /// Server base URL
    #[arg(long, env = "VIDHARINI_URL", default_value = DEFAULT_SERVER_URL)]
    url: String,
    /// API key issued by `vidharini key create`
    #[arg(long, env = "VIDHARINI_API_KEY")]
    key: String,
}

#[derive(Debug, Args)]
struct UserCommand {
    #[command(subcommand)]
    action: UserAction,
}

#[derive(Debug, Subcommand)]
enum UserAction {
    /// Register a user
    Add { id: String, name: String },
    /// Remove a user; their keys then answer 404 "User not found"
    Remove { id: String },
}

#[derive(Debug, Args)]
struct KeyCommand {
    #[command(subcommand)]
    action: KeyAction,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    /// Issue a key for a user (printed once)
    Create {
        user_id: String,
        #[arg(long, default_value = "cli")]
        label: String,
    },
    /// Revoke a key by id
    Revoke { key_id: i64 },
}

#[derive(Debug, Args)]
struct AskArgs {
    message: String,
    /// Continue an existing chat
    #[arg(long)]
    chat_id: Option<String>,
    /// Do not create or update a chat
    #[arg(long)]
    temporary: bool,
    #[command(flatten)]
    server: ServerArgs,
}

fn open_database(config: &Config) -> anyhow::Result<db::Database> {
    let dir = config.runtime_data_dir();
    db::Database::new(&dir).with_context(|| format!("Failed to open database in {dir}"))
}

fn handle_init(path: &str, force: bool) -> anyhow::Result<()> {
    if std::path::Path::new(path).exists() && !force {
        anyhow::bail!("{path} already exists (use --force to overwrite)");
    }
    let mut config = Config::default();
    config.post_deserialize()?;
    // Keys stay in the environment rather than on disk.
    config.api_key.clear();
    config.mistral_api_key = None;
    config.replicate_api_token = None;
    config.save_yaml(path)?;
    println!("Wrote {path}");
    Ok(())
}

fn handle_user(config: &Config, action: UserAction) -> anyhow::Result<()> {
    let database = open_database(config)?;
    match action {
        UserAction::Add { id, name } => {
            database.create_user(&id, &name)?;
            println!("Added user {id}");
        }
        UserAction::Remove { id } => {
            if database.delete_user(&id)? {
                println!("Removed user {id}");
            } else {
                println!("No user {id}");
            }
        }
    }
    Ok(())
}

async fn handle_key(config: &Config, action: KeyAction) -> anyhow::Result<()> {
    let database = std::sync::Arc::new(open_database(config)?);
    match action {
        KeyAction::Create { user_id, label } => {
            if database.get_user(&user_id)?.is_none() {
                anyhow::bail!("Unknown user: {user_id}");
            }
            let issued = web::issue_api_key(database, &user_id, &label).await?;
            println!("Key id: {}", issued.key_id);
            println!("Key:    {}", issued.key);
            println!("Store it now; it cannot be shown again.");
        }
        KeyAction::Revoke { key_id } => {
            if database.revoke_api_key(key_id)? {
                println!("Revoked key {key_id}");
            } else {
                println!("No active key {key_id}");
            }
        }
    }
    Ok(())
}

/// Streams the reply to stdout. If the stream breaks after the task was
/// accepted, falls back to polling for the finished text.
async fn handle_ask(config: &Config, args: AskArgs) -> anyhow::Result<()> {
    let base = args.server.url.trim_end_matches('/').to_string();
    let mut body = json!({
        "messages": [{"role": "user", "content": args.message}],
        "isTemporary": args.temporary,
    });
    if let Some(chat_id) = &args.chat_id {
        body["chatId"] = json!(chat_id);
    }

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/chat"))
        .bearer_auth(&args.server.key)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {base}"))?;
    let status = resp.status();
    let task_id = resp
        .headers()
        .get("x-task-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("Server returned {status}: {text}");
    }

    let mut stream = resp.bytes_stream();
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                stdout.write_all(&bytes)?;
                stdout.flush()?;
            }
            Err(e) => {
                let Some(task_id) = task_id else {
                    return Err(e.into());
                };
                warn!(error = %e, "Stream interrupted; polling task {task_id}");
                let poller = TaskPoller::from_config(base, args.server.key, config);
                let text = poller.wait(&task_id).await?;
                println!("\n---\n{text}");
                return Ok(());
            }
        }
    }
    println!();
    Ok(())
}

async fn handle_poll(config: &Config, task_id: &str, server: ServerArgs) -> anyhow::Result<()> {
    let poller = TaskPoller::from_config(server.url, server.key, config);
    let text = poller.wait(task_id).await?;
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = match cli.command {
        Some(command) => command,
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            return Ok(());
        }
    };

    match command {
        MainCommand::Version => {
            println!("vidharini {VERSION}");
            Ok(())
        }
        MainCommand::Init { path, force } => handle_init(&path, force),
        MainCommand::User(user) => handle_user(&Config::load()?, user.action),
        MainCommand::Key(key) => handle_key(&Config::load()?, key.action).await,
        MainCommand::Ask(args) => handle_ask(&Config::load()?, args).await,
        MainCommand::Poll { task_id, server } => {
            handle_poll(&Config::load()?, &task_id, server).await
        }
        MainCommand::Serve => {
            let config = Config::load()?;
            logging::init_logging(LogSink::from_env(&config.runtime_data_dir()))?;
            info!("Starting Vidharini {VERSION}");
            runtime::run(config).await
        }
    }
}
