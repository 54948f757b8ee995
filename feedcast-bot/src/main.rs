mod cli;
mod commands;
mod logging;
mod telegram;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use feedcast_core::{
    fan_out, spawn_poller, AppConfig, ChatMetadata, ChatRegistry, Event, FanOutError,
    HttpFetcher, JsonChatRegistry, JsonStateStore, Pipeline, Publication, Strings, Transport,
};
use reqwest::{redirect, ClientBuilder};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::cli::{ChatsAction, Cli, Command, ResetTarget};
use crate::commands::{spawn_listener, Replies};
use crate::telegram::TelegramTransport;

const LOCAL_CONFIG: &str = "config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.clone());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    logging::init(&config.log_level, config.log_file.as_deref())
        .context("failed to initialise logging")?;

    let state_dir = config.state_dir();
    match cli.command() {
        Command::Run => run(config, &state_dir).await,
        Command::Reset { target, yes } => reset(*target, *yes, &state_dir).await,
        Command::Chats { action } => chats(action, &state_dir).await,
    }
}

/// Explicit path, else the user config file, else `./config.json`.
fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let default = AppConfig::default_path();
    if default.exists() {
        default
    } else {
        PathBuf::from(LOCAL_CONFIG)
    }
}

async fn run(config: AppConfig, state_dir: &Path) -> anyhow::Result<()> {
    if config.token.trim().is_empty() {
        bail!("no bot token configured");
    }

    let strings = Strings::load_or_builtin(config.strings_file.as_deref());
    let labels = strings.labels(&config.language);
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch, config.proxy.as_deref())?);
    let state = Arc::new(JsonStateStore::open_in(state_dir).await);
    let registry = JsonChatRegistry::open_in(state_dir).await;

    let mut client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .timeout(Duration::from_secs(config.fetch.request_timeout_seconds));
    if let Some(proxy) = config.proxy.as_deref() {
        client = client.proxy(reqwest::Proxy::all(proxy)?);
    }
    let transport = Arc::new(TelegramTransport::new(
        client.build()?,
        &config.api_url,
        &config.token,
    ));

    let pipeline = Arc::new(Pipeline::new(
        config.feed_configs.clone(),
        config.limits,
        labels,
        fetcher,
        state,
    ));
    let poll_config = config.poll_config();
    let (event_tx, mut event_rx) = mpsc::channel(8);
    let poller = spawn_poller(pipeline, poll_config, event_tx);
    info!(
        source = %config.feed_configs.source,
        interval_seconds = poll_config.interval.as_secs(),
        "polling started"
    );
    let listener = config.self_registration.then(|| {
        info!("accepting /start and /stop");
        spawn_listener(
            transport.clone(),
            registry.clone(),
            Replies::new(&strings, &config.language),
        )
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received, finishing current run");
                break Ok(());
            }
            event = event_rx.recv() => match event {
                Some(Event::NewItem(publication)) => {
                    if let Err(err) = deliver(&publication, transport.as_ref(), &registry).await {
                        break Err(err);
                    }
                }
                None => break Ok(()),
            },
        }
    };

    if let Some(listener) = listener {
        listener.stop().await?;
    }
    if let Err(err) = outcome {
        event_rx.close();
        poller.stop().await?;
        return Err(err);
    }
    let (stopped, drained) = tokio::join!(
        poller.stop(),
        drain(&mut event_rx, transport.as_ref(), &registry)
    );
    stopped?;
    drained?;
    info!("stopped");
    Ok(())
}

/// Fans one publication out. Only a rejected bot token is fatal.
async fn deliver(
    publication: &Publication,
    transport: &dyn Transport,
    registry: &dyn ChatRegistry,
) -> anyhow::Result<()> {
    info!(link = %publication.item.link, "delivering");
    match fan_out(&publication.units, transport, registry).await {
        Ok(_) => Ok(()),
        Err(FanOutError::Registry(err)) => {
            error!(error = %err, "chat registry unavailable during delivery");
            Ok(())
        }
        Err(err @ FanOutError::Token(_)) => Err(err).context("delivery aborted"),
    }
}

/// Delivers whatever the poller still emits until its sender is dropped.
async fn drain(
    event_rx: &mut mpsc::Receiver<Event>,
    transport: &dyn Transport,
    registry: &dyn ChatRegistry,
) -> anyhow::Result<()> {
    while let Some(Event::NewItem(publication)) = event_rx.recv().await {
        if let Err(err) = deliver(&publication, transport, registry).await {
            event_rx.close();
            return Err(err);
        }
    }
    Ok(())
}

async fn reset(target: ResetTarget, yes: bool, state_dir: &Path) -> anyhow::Result<()> {
    if !yes && !confirm(&format!("Reset {target:?} in {}?", state_dir.display()))? {
        println!("aborted");
        return Ok(());
    }
    if target.data() {
        JsonStateStore::open_in(state_dir).await.clear().await?;
        info!("state cleared");
    }
    if target.chats() {
        JsonChatRegistry::open_in(state_dir).await.clear().await?;
        info!("chat registry cleared");
    }
    Ok(())
}

async fn chats(action: &ChatsAction, state_dir: &Path) -> anyhow::Result<()> {
    let registry = JsonChatRegistry::open_in(state_dir).await;
    match action {
        ChatsAction::List => {
            for (id, meta) in registry.chats().await? {
                println!(
                    "{id}\t{}\t{}",
                    meta.title.as_deref().unwrap_or("-"),
                    meta.added_at.to_rfc3339()
                );
            }
        }
        ChatsAction::Add { id, title } => {
            if registry.add(*id, ChatMetadata::new(title.clone())).await? {
                println!("added {id}");
            } else {
                println!("{id} is already registered");
            }
        }
        ChatsAction::Remove { id } => {
            if registry.remove(*id).await? {
                println!("removed {id}");
            } else {
                println!("{id} was not registered");
            }
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> std::io::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
