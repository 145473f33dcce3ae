//! mailslotd — run either side of a mailslot channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use mailslot_core::config::MailslotConfig;
use mailslot_core::ChannelId;
use mailslot_services::{Client, DirBackend, ObjectStore, Server};

mod prompt;

fn print_usage() {
    println!("Usage: mailslotd <role> [options]");
    println!();
    println!("Roles:");
    println!("  server              Publish a channel and execute incoming requests");
    println!("  client [--id <id>]  Attach to a server channel and send commands");
    println!();
    println!("The shared store directory and timings come from the config file");
    println!("({}) and MAILSLOT_* environment variables.", MailslotConfig::file_path().display());
}

fn open_store(config: &MailslotConfig) -> Result<ObjectStore> {
    let backend = DirBackend::open(&config.store.root)
        .with_context(|| format!("failed to open store at {}", config.store.root.display()))?;
    tracing::info!(root = %config.store.root.display(), "store opened");
    Ok(ObjectStore::new(Arc::new(backend)))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received");
        token.cancel();
    });
}

async fn run_server(config: MailslotConfig) -> Result<()> {
    let store = open_store(&config)?;
    let mut server = Server::new(store, config.server.clone());
    println!("Channel id: {}", server.channel());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    server.run(cancel).await.context("server loop failed")?;
    Ok(())
}

async fn run_client(config: MailslotConfig, id: Option<ChannelId>) -> Result<()> {
    let store = open_store(&config)?;
    let mut client = Client::new(store, config.client.clone());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let channel = client
        .discover(id.as_ref(), &cancel)
        .await
        .context("no server channel found")?;
    println!("Attached to channel {channel}");

    prompt::run(&client, &cancel).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = MailslotConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MailslotConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MailslotConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args) {
        Ok(Role::Server) => run_server(config).await,
        Ok(Role::Client(id)) => run_client(config, id).await,
        Ok(Role::Help) => {
            print_usage();
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Role {
    Server,
    Client(Option<ChannelId>),
    Help,
}

fn parse_args(args: &[String]) -> Result<Role> {
    // Parse --id option
    let mut id = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--id" {
            i += 1;
            let raw = args.get(i).context("--id requires a value")?;
            id = Some(ChannelId::parse(raw).context("--id must not contain '.' or '/'")?);
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match (remaining.as_slice(), id) {
        (["client"], id) => Ok(Role::Client(id)),
        (_, Some(_)) => anyhow::bail!("--id is only accepted by the client role"),
        (["server"], None) => Ok(Role::Server),
        (["help"] | ["--help"] | ["-h"] | [], None) => Ok(Role::Help),
        (other, None) => anyhow::bail!("Unknown role: {}", other.join(" ")),
    }
}
