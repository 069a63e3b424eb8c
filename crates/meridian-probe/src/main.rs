//! Meridian probe: samples host signals and prints the policy decision.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use meridian_core::MeridianConfig;
use meridian_policy::{PolicyCoordinator, PolicyDecision};
use meridian_signals::{HostSignalSource, SignalPump, SignalSource};
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq)]
enum Command {
    /// Sample once and print the decision.
    Once(Option<PathBuf>),
    /// Keep sampling and print every new decision.
    Watch(Option<PathBuf>),
    /// Print the resolved configuration.
    Config(Option<PathBuf>),
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let arg = |i: usize| args.get(i).map(PathBuf::from);
    match args.get(1).map(String::as_str) {
        None | Some("once") => Ok(Command::Once(arg(2))),
        Some("watch") => Ok(Command::Watch(arg(2))),
        Some("config") => Ok(Command::Config(arg(2))),
        Some("--help" | "-h" | "help") => Ok(Command::Help),
        Some(other) => Err(format!(
            "Unknown command: {}. Use 'meridian-probe help' for usage.",
            other
        )),
    }
}

fn print_help() {
    println!("Meridian probe: host signals to policy decision");
    println!();
    println!("Usage: meridian-probe [command]");
    println!();
    println!("Commands:");
    println!("  once [sysfs-root]        Sample once and print the decision (default)");
    println!("  watch [sysfs-root]       Print a decision whenever the signals change");
    println!("  config [file]            Print the resolved configuration");
    println!("  help                     Show this help message");
    println!();
    println!("Environment: MERIDIAN_DEBOUNCE_MS, MERIDIAN_POLL_INTERVAL_MS,");
    println!("             MERIDIAN_SYSFS_ROOT, MERIDIAN_EVENT_CAPACITY, RUST_LOG");
}

/// Environment configuration, with the sysfs root optionally overridden.
fn resolve_config(root: Option<PathBuf>) -> MeridianConfig {
    let mut config = MeridianConfig::from_env();
    if let Some(root) = root {
        config.sysfs_root = root;
    }
    config
}

fn load_config(file: Option<&Path>) -> anyhow::Result<MeridianConfig> {
    match file {
        Some(path) => MeridianConfig::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e)),
        None => Ok(MeridianConfig::from_env()),
    }
}

/// Take one sample and fold it into a fresh coordinator.
fn sample_once(config: &MeridianConfig) -> PolicyDecision {
    let source = HostSignalSource::from_config(config);
    let coordinator = PolicyCoordinator::with_snapshot(Default::default(), config.event_capacity);
    coordinator.update_signal(source.sample())
}

async fn watch(config: MeridianConfig) -> anyhow::Result<()> {
    let coordinator = Arc::new(PolicyCoordinator::with_snapshot(
        Default::default(),
        config.event_capacity,
    ));
    let changes = coordinator.changes();
    tokio::pin!(changes);
    let pump = SignalPump::for_host(&config, Arc::clone(&coordinator));

    loop {
        tokio::select! {
            decision = changes.next() => match decision {
                Some(decision) => println!("{}", serde_json::to_string(&decision)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        }
    }

    pump.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(1);
        }
    };

    match command {
        Command::Help => print_help(),
        Command::Config(file) => {
            let config = load_config(file.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Once(root) => {
            let config = resolve_config(root);
            info!("Sampling host signals under {}", config.sysfs_root.display());
            let decision = sample_once(&config);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Watch(root) => {
            let config = resolve_config(root);
            info!(
                "Watching host signals under {} every {}ms",
                config.sysfs_root.display(),
                config.poll_interval_ms
            );
            watch(config).await?;
        }
    }

    Ok(())
}
