//! CLI entry point for the seedbox tool.

use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use seedbox_core::backend::DEFAULT_PIECE_LENGTH;
use seedbox_core::{
    Descriptor, ErrorKind, HealthSupervisor, InfoHash, MemoryBackend, Orchestrator,
    RemoteDescriptorFetcher,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use cli::Args;

/// Simulated peers attached to every session.
const SIMULATED_PEERS: (u32, u32) = (4, 20);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_config(args.config.as_deref())?;
    if loaded.loaded_from_file {
        debug!(path = ?loaded.path, "loaded config file");
    }
    let mut config = loaded.config;
    args.apply_overrides(&mut config);
    app_config::validate(&config)?;

    info!(
        max_memory = config.max_memory_bytes,
        max_concurrent = config.max_concurrent_sessions,
        "Seedbox starting"
    );

    let inputs = read_inputs(&args)?;
    if inputs.is_empty() {
        info!("No input provided. Pass magnet URIs, .torrent paths or URLs as arguments.");
        info!("Example: seedbox 'magnet:?xt=urn:btih:<hash>&dn=name'");
        return Ok(());
    }

    let backend = MemoryBackend::new();
    let orchestrator = Orchestrator::new(Arc::new(backend.clone()), config.clone());
    let supervisor = HealthSupervisor::spawn(orchestrator.clone(), config.health_check_interval());

    let fetcher = if inputs.iter().any(|input| is_url(input)) {
        Some(RemoteDescriptorFetcher::new().context("Failed to build HTTP client")?)
    } else {
        None
    };
    let mut ids = Vec::new();
    for (index, input) in inputs.iter().enumerate() {
        let descriptor = match resolve_descriptor(input, fetcher.as_ref()).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(input = %input, error = %format!("{e:#}"), "Skipped invalid descriptor");
                continue;
            }
        };
        let name = descriptor
            .display_name()
            .map_or_else(|| format!("session-{}", index + 1), str::to_string);

        let id = match orchestrator.add(descriptor).await {
            Ok(id) => id,
            Err(e) => {
                warn!(input = %input, error = %e, "Failed to add session");
                continue;
            }
        };
        if let Some(transfer) = backend.transfer(&id) {
            transfer.set_peers(SIMULATED_PEERS.0, SIMULATED_PEERS.1);
            transfer.resolve_metadata(
                name.clone(),
                vec![(name, args.size)],
                DEFAULT_PIECE_LENGTH,
            );
        }
        ids.push(id);
    }

    if ids.is_empty() {
        info!("No valid descriptors found in input");
    } else {
        simulate(&args, &backend, &orchestrator, &ids, config.auto_start).await;
    }

    if let Some(supervisor) = supervisor {
        supervisor.shutdown().await;
    }

    let report = serde_json::json!({
        "health": orchestrator.health().await,
        "sessions": orchestrator.reports().await,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(())
}

fn read_inputs(args: &Args) -> Result<Vec<String>> {
    let raw = if !args.descriptors.is_empty() {
        args.descriptors.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        buffer
    } else {
        String::new()
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

async fn resolve_descriptor(
    input: &str,
    fetcher: Option<&RemoteDescriptorFetcher>,
) -> Result<Descriptor> {
    if input.starts_with("magnet:") {
        return Ok(Descriptor::magnet(input)?);
    }
    if is_url(input) {
        let Some(fetcher) = fetcher else {
            bail!("No HTTP client available for '{input}'");
        };
        return Ok(fetcher.fetch(input).await?);
    }

    let path = Path::new(input);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read descriptor file '{}'", path.display()))?;
    Ok(Descriptor::metainfo(bytes)?)
}

/// Advances every running transfer once per tick and refreshes statistics.
///
/// Completed sessions are stopped so their slot and reservation go to
/// sessions still waiting for admission.
async fn simulate(
    args: &Args,
    backend: &MemoryBackend,
    orchestrator: &Orchestrator,
    ids: &[InfoHash],
    auto_start: bool,
) {
    let tick = Duration::from_millis(args.tick_ms);
    for tick_index in 0..args.ticks {
        tokio::time::sleep(tick).await;
        for id in ids {
            if let Some(transfer) = backend.transfer(id) {
                transfer.advance(args.rate);
            }
        }

        let sessions = orchestrator.refresh().await;
        for (id, record) in &sessions {
            if record.started && record.is_complete() {
                info!(id = %id, name = %record.name, "Session complete");
                if let Err(e) = orchestrator.stop(id).await {
                    warn!(id = %id, error = %e, "Failed to stop completed session");
                }
            }
        }

        if auto_start {
            for (id, record) in &sessions {
                if record.started || record.is_complete() || !record.metadata_loaded {
                    continue;
                }
                match orchestrator.start(id).await {
                    Ok(()) => {}
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::AdmissionDenied | ErrorKind::InvalidState
                        ) =>
                    {
                        debug!(id = %id, reason = %e, "Session not started this tick");
                    }
                    Err(e) => warn!(id = %id, error = %e, "Failed to start session"),
                }
            }
        }

        if sessions
            .values()
            .all(|record| record.metadata_loaded && record.is_complete())
        {
            info!(ticks = tick_index + 1, "All sessions complete");
            break;
        }
    }
}
