#![deny(dead_code)]
use anyhow::Result;
use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

mod ui;
mod utils;

use crate::ui::{ChatUI, UiAction};
use chatz::config::DEFAULT_SERVER;
use chatz::conversation::HistoryOutcome;
use chatz::live::ReconnectPolicy;
use chatz::{AppEvent, ChannelState, ChatClient, ChatError, ClientConfig, FileStorage, Update};

// Attempts made by --reconnect before giving up
const RECONNECT_ATTEMPTS: u32 = 5;
// Seconds a notice stays in place of the help line
const NOTICE_TIMEOUT_SECS: i64 = 5;

/// Command line arguments for Chatz
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Chatz: a terminal client for the Chatz messaging service.",
    long_about = "Chatz is a terminal chat client: log in, pick a contact and chat in real time.\n\n\
    Credentials can be supplied with CHATZ_EMAIL, CHATZ_PASSWORD and CHATZ_USERNAME.\n\
    Use -h or --help to see all options."
)]
struct Args {
    /// Backend origin; REST calls go to <server>/api
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Explicit live channel base, e.g. ws://localhost:8001
    #[arg(long, value_name = "URL")]
    live_url: Option<String>,

    /// Directory for the persisted session
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Log file, defaults to chatz.log in the data directory
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,

    /// Timeout for REST calls and the live channel handshake
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Reconnect the live channel with exponential backoff after it drops
    #[arg(long)]
    reconnect: bool,

    /// Send a keepalive ping on the live channel every N seconds
    #[arg(long, value_name = "SECS")]
    heartbeat_secs: Option<u64>,

    /// Create an account instead of logging in
    #[arg(long)]
    register: bool,

    /// Check a restored session against the server before using it
    #[arg(long)]
    verify_session: bool,
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let server = match &args.server {
        Some(server) => server.clone(),
        None => env::var("CHATZ_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string()),
    };
    let mut config = ClientConfig::new(&server)?;
    if let Some(live_url) = &args.live_url {
        config = config.with_live_base(live_url)?;
    }
    config.data_dir = args.data_dir.clone();
    config.request_timeout = Duration::from_secs(args.timeout_secs);
    if args.reconnect {
        config.reconnect = ReconnectPolicy::exponential(RECONNECT_ATTEMPTS);
    }
    config.heartbeat = args.heartbeat_secs.filter(|s| *s > 0).map(Duration::from_secs);
    Ok(config)
}

/// Credentials from the environment, used for the first attempt only
struct EnvCredentials {
    email: String,
    password: String,
    username: Option<String>,
}

fn env_credentials() -> Option<EnvCredentials> {
    match (env::var("CHATZ_EMAIL"), env::var("CHATZ_PASSWORD")) {
        (Ok(email), Ok(password)) => Some(EnvCredentials {
            email,
            password,
            username: env::var("CHATZ_USERNAME").ok(),
        }),
        _ => None,
    }
}

/// Prompt until a session is established. Returns false when the user
/// leaves the email empty.
async fn authenticate(client: &mut ChatClient, register: bool, mut from_env: Option<EnvCredentials>) -> Result<bool> {
    loop {
        let (email, password, username) = match from_env.take() {
            Some(creds) => (creds.email, creds.password, creds.username),
            None => {
                let email = utils::prompt("Email (empty to quit)")?;
                if email.is_empty() {
                    return Ok(false);
                }
                let username = if register { Some(utils::prompt("Username")?) } else { None };
                let password = utils::prompt("Password")?;
                (email, password, username)
            }
        };

        let result = match (register, username) {
            (true, Some(username)) => client.register(&username, &email, &password).await,
            (true, None) => {
                eprintln!("A username is required to register");
                continue;
            }
            (false, _) => client.login(&email, &password).await,
        };

        match result {
            Ok(identity) => {
                info!("Authenticated as {} ({})", identity.username, identity.id);
                return Ok(true);
            }
            Err(e) if e.is_auth_failure() => {
                warn!("Authentication rejected for {}: {}", email, e);
                eprintln!("{}", e);
            }
            Err(e) => {
                error!("Authentication failed for {}: {}", email, e);
                eprintln!("Could not reach the server: {}", e);
            }
        }
    }
}

enum Exit {
    Quit,
    Logout,
}

async fn run_chat(client: &mut ChatClient, events_rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Result<Exit> {
    let mut terminal = ui::setup_terminal()?;
    let mut chat_ui = ChatUI::new();
    let result = chat_loop(&mut terminal, &mut chat_ui, client, events_rx).await;
    ui::restore_terminal(terminal)?;
    result
}

async fn chat_loop(
    terminal: &mut ui::Terminal<ui::CrosstermBackend<std::io::Stdout>>,
    chat_ui: &mut ChatUI,
    client: &mut ChatClient,
    events_rx: &mut mpsc::UnboundedReceiver<AppEvent>,
) -> Result<Exit> {
    loop {
        terminal.draw(|f| chat_ui.draw(f, &*client))?;
        chat_ui.clean_notice(NOTICE_TIMEOUT_SECS);

        match chat_ui.handle_input(client)? {
            Some(UiAction::Quit) => return Ok(Exit::Quit),
            Some(UiAction::Logout) => return Ok(Exit::Logout),
            Some(UiAction::RefreshContacts) => {
                client.refresh_contacts();
                chat_ui.notify("Refreshing contacts...");
            }
            Some(UiAction::SelectContact(id)) => {
                debug!("Selecting contact {}", id);
                client.select_contact(&id);
            }
            Some(UiAction::Send(content)) => {
                client.send(&content);
            }
            None => {}
        }

        while let Ok(event) = events_rx.try_recv() {
            match client.handle_event(event) {
                Update::ContactsRefreshed(_) => chat_ui.sync_selection(client),
                Update::History(HistoryOutcome::Failed) => chat_ui.notify_error("Could not load the conversation"),
                Update::SendFailed(reason) => chat_ui.notify_error(format!("Message not sent: {}", reason)),
                Update::ChannelState(ChannelState::Connected) => chat_ui.notify("Connected"),
                Update::ChannelFailed(reason) => chat_ui.notify_error(format!("Disconnected: {}", reason)),
                _ => {}
            }
        }

        // Yield so spawned network tasks make progress on this thread
        tokio::task::yield_now().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;
    let data_dir = config.resolve_data_dir()?;

    let log_file_path = match &args.log_file {
        Some(path) => path.clone(),
        None => {
            if let Err(e) = std::fs::create_dir_all(&data_dir) {
                eprintln!("Warning: Failed to create data directory {}: {}", data_dir.display(), e);
                PathBuf::from("chatz.log")
            } else {
                data_dir.join("chatz.log")
            }
        }
    };
    utils::setup_logging(log_file_path.to_str(), args.log_level)?;

    info!("Chatz client starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Logging to file: {}", log_file_path.display());
    info!("Server: {}, session data in {}", config.server, data_dir.display());

    let storage = FileStorage::new(data_dir);
    let (mut client, mut events_rx) = ChatClient::new(config, Box::new(storage))?;

    if client.restore()? {
        info!("Restored persisted session");
        if args.verify_session {
            match client.verify_session().await {
                Ok(identity) => info!("Session verified for {}", identity.username),
                Err(ChatError::Unauthorized) => eprintln!("Your session has expired, please log in again"),
                Err(e) => warn!("Could not verify session, continuing: {}", e),
            }
        }
    }

    let mut from_env = env_credentials();
    loop {
        if client.session().is_none() {
            println!("Connecting to {}...\n", client.config().server);
            if !authenticate(&mut client, args.register, from_env.take()).await? {
                break;
            }
        }

        match run_chat(&mut client, &mut events_rx).await? {
            Exit::Quit => break,
            Exit::Logout => {
                info!("Logging out");
                if let Err(e) = client.logout() {
                    error!("Failed to clear persisted session: {}", e);
                }
                // Drop whatever the old session left queued
                while events_rx.try_recv().is_ok() {}
            }
        }
    }

    info!("Chatz client shutting down");
    Ok(())
}
