//! Sealpost CLI - run a relay or chat through one.
//!
//! This is the main binary entry point. See the `sealpost` library for the
//! core functionality.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use sealpost::client::connection::{RelayReader, RelayWriter};
use sealpost::{
    ClientConnection, ClientNotice, ClientSession, FileCredentials, Hub, Server, ServerConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "sealpost")]
#[command(version)]
#[command(about = "End-to-end encrypted direct-messaging relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Listen address, e.g. 0.0.0.0:5000
        #[arg(long)]
        bind: Option<String>,
        /// Credential store file
        #[arg(long)]
        credentials: Option<PathBuf>,
    },
    /// Connect to a relay and chat
    Chat {
        /// Relay URL (ws://, wss://, http:// or https://)
        #[arg(long, default_value = "ws://127.0.0.1:5000")]
        url: String,
        /// Identity to register as
        #[arg(long)]
        identity: String,
        /// Credential proof for the identity
        #[arg(long, default_value = "")]
        proof: String,
    },
    /// Print the effective server configuration
    Config {
        /// Also write it to the config directory
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(log_path) = std::env::var("SEALPOST_LOG_FILE") {
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file at {log_path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();

    // Log panics before the default handler prints them
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, credentials } => {
            let mut config = ServerConfig::load()?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(credentials) = credentials {
                config.credentials_path = credentials;
            }
            serve(config).await?;
        }
        Commands::Chat {
            url,
            identity,
            proof,
        } => chat(&url, identity, &proof).await?,
        Commands::Config { save } => {
            let config = ServerConfig::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = config.save()?;
                println!("Saved to {}", path.display());
            }
        }
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    let credentials = FileCredentials::open(&config.credentials_path)?;
    let (hub, hub_task) = Hub::new(Box::new(credentials)).spawn();
    let server =
        Server::bind_with_limit(&config.bind_addr, hub.clone(), config.max_message_bytes).await?;

    println!("Sealpost relay listening on {}", server.url());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Shutting down...");
    server.shutdown();
    hub.shutdown();
    // Dropping the hub waits for pending credential writes.
    drop(hub_task.await.context("Hub task failed")?);
    Ok(())
}

async fn chat(url: &str, identity: String, proof: &str) -> Result<()> {
    // RSA key generation is CPU-bound
    let mut session = tokio::task::spawn_blocking(move || ClientSession::new(identity))
        .await
        .context("Key generation task failed")??;

    let mut conn = ClientConnection::connect(url).await?;
    for notice in conn.register(&mut session, proof).await? {
        show(&notice);
    }
    println!(
        "Registered as {}. Commands: /to NAME, /pwd NEW, /who, /quit",
        session.identity()
    );

    let (mut writer, mut reader) = conn.into_split();
    let result = chat_loop(&mut session, &mut writer, &mut reader).await;
    let _ = writer.close().await;
    result
}

async fn chat_loop(
    session: &mut ClientSession,
    writer: &mut RelayWriter,
    reader: &mut RelayReader,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut recipient: Option<String> = None;

    loop {
        tokio::select! {
            event = reader.recv() => {
                let Some(event) = event else {
                    println!("Relay closed the connection");
                    return Ok(());
                };
                let reaction = session.handle_event(event?);
                writer.send_all(&reaction.replies).await?;
                if let Some(notice) = reaction.notice {
                    show(&notice);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let (command, arg) = line
                    .split_once(char::is_whitespace)
                    .map_or((line, ""), |(command, arg)| (command, arg.trim()));
                match command {
                    "/quit" => return Ok(()),
                    "/who" => {
                        let roster: Vec<&str> =
                            session.roster().iter().map(String::as_str).collect();
                        if roster.is_empty() {
                            println!("Nobody else is online");
                        } else {
                            println!("Online: {}", roster.join(", "));
                        }
                    }
                    "/to" if arg.is_empty() => println!("Usage: /to NAME"),
                    "/to" => {
                        println!("Now writing to {arg}");
                        recipient = Some(arg.to_string());
                    }
                    "/pwd" => match session.change_credential(arg) {
                        Some(request) => writer.send(&request).await?,
                        None => println!("Password must not be empty"),
                    },
                    _ => match recipient.as_deref() {
                        Some(to) => match session.compose(to, line) {
                            Ok(request) => writer.send(&request).await?,
                            Err(e) => println!("Cannot send to {to}: {e}"),
                        },
                        None => println!("Pick a recipient first with /to NAME"),
                    },
                }
            }
        }
    }
}

fn show(notice: &ClientNotice) {
    let now = chrono::Local::now().format("%H:%M:%S");
    match notice {
        ClientNotice::Registered { ok } => {
            if !ok {
                println!("[{now}] Registration refused");
            }
        }
        ClientNotice::CredentialChanged { ok } => {
            if !ok {
                println!("[{now}] Password change failed");
            }
        }
        ClientNotice::Roster(users) if users.is_empty() => println!("[{now}] Nobody else is online"),
        ClientNotice::Roster(users) => println!("[{now}] Online: {}", users.join(", ")),
        ClientNotice::PeerOnline(name) => println!("[{now}] {name} is online"),
        ClientNotice::PeerOffline(name) => println!("[{now}] {name} went offline"),
        ClientNotice::PeerKey(name) => log::debug!("Received key for {name}"),
        ClientNotice::Message { from, text } => println!("[{now}] {from}: {text}"),
        ClientNotice::Undecryptable { from, error } => {
            println!("[{now}] Unreadable message from {from}: {error}");
        }
        ClientNotice::System(text) => println!("[{now}] * {text}"),
    }
}
