// swarmnet: command-line client for the snode swarm
//
// Bootstraps the snode pool, builds onion paths, resolves swarms, and sends
// or polls messages for the configured mailbox key.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::sync::Arc;
use swarmnet_core::util::worker_runtime;
use swarmnet_core::{
    Broadcaster, ChannelBroadcaster, Event, OutgoingMessage, ReceivedEnvelope, Snode, SwarmClient,
};
use tracing_appender::non_blocking::WorkerGuard;

/// Default message lifetime: one day
const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Parser)]
#[command(name = "swarmnet")]
#[command(about = "Swarmnet: snode swarm client", long_about = None)]
#[command(version)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<std::path::PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Talk to nodes directly instead of through onion paths
    #[arg(long, global = true)]
    direct: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the mailbox key used for polling
    Init { public_key: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show or refresh the snode pool
    Pool {
        #[arg(short, long)]
        refresh: bool,
    },
    /// Show the onion paths, building them if needed
    Paths {
        #[arg(short, long)]
        rebuild: bool,
    },
    /// Resolve the swarm holding a mailbox
    Swarm { public_key: Option<String> },
    /// Store a message in the recipient's swarm
    Send {
        recipient: String,
        message: String,
        #[arg(short, long, default_value_t = DEFAULT_TTL_MS)]
        ttl_ms: u64,
    },
    /// Fetch new messages for the configured mailbox
    Poll {
        /// Keep polling until interrupted
        #[arg(short, long)]
        follow: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    Seed {
        #[command(subcommand)]
        action: SeedAction,
    },
}

#[derive(Subcommand)]
enum SeedAction {
    Add { url: String },
    Remove { url: String },
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli)?;

    let runtime = worker_runtime("swarmnet").context("Failed to start runtime")?;
    runtime.block_on(run(cli))
}

fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let Some(path) = &cli.log_file else {
        if cli.json_logs {
            builder.json().init();
        } else {
            builder.init();
        }
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path.file_name().context("Log file path has no file name")?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let builder = builder.with_writer(writer).with_ansi(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(Some(guard))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { public_key } => cmd_init(public_key),
        Commands::Config { action } => cmd_config(action),
        Commands::Pool { refresh } => cmd_pool(cli.direct, refresh).await,
        Commands::Paths { rebuild } => cmd_paths(cli.direct, rebuild).await,
        Commands::Swarm { public_key } => cmd_swarm(cli.direct, public_key).await,
        Commands::Send {
            recipient,
            message,
            ttl_ms,
        } => cmd_send(cli.direct, recipient, message, ttl_ms).await,
        Commands::Poll { follow } => cmd_poll(cli.direct, follow).await,
    }
}

/// Open a client for `user_key` and print lifecycle events as they happen
fn open_client(config: &config::Config, user_key: &str, direct: bool) -> Result<SwarmClient> {
    let mut network = config.network.clone();
    if direct {
        network.use_onion_requests = false;
    }

    let events = ChannelBroadcaster::new(64);
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let broadcaster: Arc<dyn Broadcaster> = Arc::new(events);
    let client = SwarmClient::with_storage(
        user_key,
        network,
        broadcaster,
        &config.resolved_storage_path()?,
    )
    .context("Failed to open swarm client")?;
    Ok(client)
}

fn configured_key(config: &config::Config) -> Result<String> {
    config
        .user_public_key
        .clone()
        .context("No mailbox key configured; run `swarmnet init <public-key>` first")
}

fn print_event(event: &Event) {
    let text = match event {
        Event::CalculatingPoW { .. } => "Calculating proof of work...",
        Event::ContactingNetwork { .. } => "Contacting network...",
        Event::SendingMessage { .. } => "Sending message...",
        Event::BuildingPaths => "Building onion paths...",
        Event::PathsBuilt => "Onion paths ready",
        Event::ClockOutOfSync => "Node reports the local clock is out of sync",
    };
    println!("  {} {}", "·".dimmed(), text.dimmed());
}

fn print_node(node: &Snode) {
    println!("  {} {}", "•".bright_green(), node.to_string().bright_cyan());
}

fn cmd_init(public_key: String) -> Result<()> {
    let mut config = config::Config::load()?;
    config.set("user_public_key", &public_key)?;
    println!("{} Mailbox key set", "✓".green());
    println!("  Key:     {}", public_key.bright_yellow());
    println!("  Storage: {}", config.resolved_storage_path()?.bright_cyan());
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            let value = config
                .get(&key)
                .with_context(|| format!("Unknown config key: {}", key))?;
            println!("{} = {}", key.bright_cyan(), value);
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
            println!();
            print_seeds(&config);
        }

        ConfigAction::Seed { action } => match action {
            SeedAction::Add { url } => {
                config.add_seed_node(url.clone())?;
                println!("{} Added seed node: {}", "✓".green(), url);
            }
            SeedAction::Remove { url } => {
                config.remove_seed_node(&url)?;
                println!("{} Removed seed node", "✓".green());
            }
            SeedAction::List => print_seeds(&config),
        },
    }

    Ok(())
}

fn print_seeds(config: &config::Config) {
    println!("{}", "Seed nodes:".bold());
    for (i, url) in config.network.seed_nodes.iter().enumerate() {
        println!("  {}. {}", i + 1, url);
    }
}

async fn cmd_pool(direct: bool, refresh: bool) -> Result<()> {
    let config = config::Config::load()?;
    let key = config.user_public_key.clone().unwrap_or_default();
    let client = open_client(&config, &key, direct)?;

    if refresh {
        client.directory().refresh_snode_pool().await?;
    } else if client.directory().snode_pool().is_empty() {
        client.directory().get_random_node().await?;
    }

    let pool = client.directory().snode_pool();
    let reliable = client.directory().reliable_snode_pool();
    println!("{} ({} nodes, {} reliable)", "Snode pool".bold(), pool.len(), reliable.len());
    Ok(())
}

async fn cmd_paths(direct: bool, rebuild: bool) -> Result<()> {
    let config = config::Config::load()?;
    let key = config.user_public_key.clone().unwrap_or_default();
    let client = open_client(&config, &key, direct)?;

    let paths = if rebuild {
        client.paths().build_paths().await?
    } else {
        client.paths().get_path(None).await?;
        client.paths().paths()
    };

    println!("{} ({} total)", "Onion paths".bold(), paths.len());
    for (i, path) in paths.iter().enumerate() {
        println!();
        println!("  Path {}", i + 1);
        for node in path {
            print_node(node);
        }
    }
    Ok(())
}

async fn cmd_swarm(direct: bool, public_key: Option<String>) -> Result<()> {
    let config = config::Config::load()?;
    let key = match public_key {
        Some(key) => key,
        None => configured_key(&config)?,
    };
    let client = open_client(&config, &key, direct)?;

    let swarm = client
        .directory()
        .get_swarm(&key, client.api().as_ref())
        .await?;
    println!("{} for {} ({} nodes)", "Swarm".bold(), key.bright_yellow(), swarm.len());
    for node in &swarm {
        print_node(node);
    }
    Ok(())
}

async fn cmd_send(direct: bool, recipient: String, message: String, ttl_ms: u64) -> Result<()> {
    let config = config::Config::load()?;
    let key = config.user_public_key.clone().unwrap_or_default();
    let client = open_client(&config, &key, direct)?;

    let outgoing = OutgoingMessage::new(recipient.clone(), message.into_bytes(), ttl_ms);
    let report = client.api().send_message(outgoing).await?;

    println!(
        "{} Stored on {} of {} node(s) for {}",
        "✓".green(),
        report.accepted(),
        report.results.len(),
        recipient.bright_yellow()
    );
    for (node, result) in &report.results {
        match result {
            Ok(()) => println!("  {} {}", "✓".green(), node),
            Err(e) => println!("  {} {} {}", "✗".red(), node, e.to_string().dimmed()),
        }
    }
    Ok(())
}

fn print_envelopes(envelopes: &[ReceivedEnvelope]) {
    for envelope in envelopes {
        println!("{} {}", "←".bright_blue(), envelope.hash.dimmed());
        println!("   {}", String::from_utf8_lossy(&envelope.content));
    }
}

async fn cmd_poll(direct: bool, follow: bool) -> Result<()> {
    let config = config::Config::load()?;
    let key = configured_key(&config)?;
    let client = open_client(&config, &key, direct)?;

    if !follow {
        let messages = client.api().get_messages().await?;
        if messages.is_empty() {
            println!("{}", "No new messages.".dimmed());
        } else {
            println!("{} ({} new)", "Messages".bold(), messages.len());
            print_envelopes(&messages);
        }
        return Ok(());
    }

    println!("{} {} (Ctrl-C to stop)", "Polling".bold(), key.bright_yellow());
    let (poller, mut rx) = client.start_polling(16);
    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(batch) => print_envelopes(&batch),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    poller.join().await;
    println!("{}", "Stopped.".dimmed());
    Ok(())
}
