//! chainscan CLI — run the bridge block scanner and inspect its state.
//!
//! Usage:
//! ```bash
//! # Scan every configured chain until Ctrl-C; transfers are printed as JSON lines
//! chainscan run --config chainscan.yaml
//!
//! # Checkpoint, pending count and live head of one chain
//! chainscan status --config chainscan.yaml --chain ethereum
//!
//! # Re-scan explicit blocks without touching the checkpoint
//! chainscan scan --config chainscan.yaml --chain ethereum --block 19000000 --block 19000001
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;

use chainscan_core::config::EngineConfig;
use chainscan_core::{
    ChainRegistry, ChannelSink, ScanEngine, Scheduler, StaticWatchList, TransferBatch,
};
use chainscan_evm::EvmAdapterFactory;
use chainscan_storage::SqliteStorage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Capacity of the in-process transfer channel.
const SINK_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "scan" => cmd_scan(&args[2..]).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainscan {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainscan {}", env!("CARGO_PKG_VERSION"));
    println!("Per-chain block scanner and checkpoint engine for cross-chain bridges\n");
    println!("USAGE:");
    println!("    chainscan <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run      Scan all configured chains until Ctrl-C");
    println!("    status   Show checkpoint, pending count and head of a chain");
    println!("    scan     Re-scan explicit blocks (backfill / debugging)");
    println!("    info     Show defaults and supported backends");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("FLAGS:");
    println!("    --config <FILE>   YAML configuration  [required for run/status/scan]");
    println!("    --chain <ID>      Chain identifier    [status, scan]");
    println!("    --block <N>       Block number, repeatable [scan]");
}

fn cmd_info() {
    println!("ChainScan v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default batch limit: 100 blocks/tick");
    println!("  Default confirmation depth: 3 blocks");
    println!("  Default fetch: 2 attempts, 300000ms timeout each");
    println!("  Default intervals: height 5000ms, scan 2000ms");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Chains: EVM (Ethereum, Arbitrum, Base, Polygon, Optimism, ...)");
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn cmd_run(args: &[String]) -> Result<(), String> {
    let config = load_config(args)?;
    logging::init_tracing(&config.log);

    let (engine, rx) = build_engine(&config).await?;
    let consumer = tokio::spawn(print_batches(rx));

    let cancel = CancellationToken::new();
    let handles = Scheduler::new(engine.clone(), config.scheduler.clone()).start(cancel.clone());

    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    info!("Shutting down");
    cancel.cancel();
    for handle in handles {
        handle.await.map_err(|e| e.to_string())?;
    }

    // Dropping the engine closes the sink, which ends the consumer.
    drop(engine);
    consumer.await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn cmd_status(args: &[String]) -> Result<(), String> {
    let config = load_config(args)?;
    let chain = parse_flag(args, "--chain").ok_or("--chain is required")?;
    let (engine, _rx) = build_engine(&config).await?;

    let checkpoint = engine.checkpoint(&chain).await.map_err(|e| e.to_string())?;
    let pending = engine.pending_count(&chain).await.map_err(|e| e.to_string())?;
    let head = async {
        let handle = engine.registry().get(&chain)?;
        handle.adapter()?.head_height().await
    }
    .await;

    println!("Chain: {chain}");
    match checkpoint {
        Some(cp) => println!("  Checkpoint:   {cp}"),
        None => println!("  Checkpoint:   (not started)"),
    }
    println!("  Pending:      {pending}");
    match head {
        Ok(head) => println!("  Head:         {head}"),
        Err(e) => println!("  Head:         unavailable ({e})"),
    }
    Ok(())
}

async fn cmd_scan(args: &[String]) -> Result<(), String> {
    let config = load_config(args)?;
    logging::init_tracing(&config.log);
    let chain = parse_flag(args, "--chain").ok_or("--chain is required")?;
    let blocks = parse_flags(args, "--block")
        .iter()
        .map(|b| b.parse::<u64>().map_err(|_| format!("invalid block number: {b}")))
        .collect::<Result<Vec<_>, _>>()?;
    if blocks.is_empty() {
        return Err("at least one --block is required".into());
    }

    let (engine, mut rx) = build_engine(&config).await?;
    let drain = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            info!(chain = %batch.chain, block = batch.block_number, transfers = batch.transfers.len(), "Delivered");
        }
    });

    let transfers = engine
        .manual_scan(&chain, &blocks)
        .await
        .map_err(|e| e.to_string())?;
    drop(engine);
    drain.await.map_err(|e| e.to_string())?;

    println!(
        "{}",
        serde_json::to_string_pretty(&transfers).map_err(|e| e.to_string())?
    );
    Ok(())
}

// ─── Wiring ───────────────────────────────────────────────────────────────────

fn load_config(args: &[String]) -> Result<EngineConfig, String> {
    let path = parse_flag(args, "--config").ok_or("--config is required")?;
    EngineConfig::load(&path).map_err(|e| e.to_string())
}

async fn build_engine(
    config: &EngineConfig,
) -> Result<(Arc<ScanEngine>, mpsc::Receiver<TransferBatch>), String> {
    let store = SqliteStorage::open(&config.storage.path)
        .await
        .map_err(|e| e.to_string())?;
    let registry = ChainRegistry::from_configs(&config.chains, Arc::new(EvmAdapterFactory::new()))
        .map_err(|e| e.to_string())?;
    let (sink, rx) = ChannelSink::new(SINK_CAPACITY);
    let engine = ScanEngine::new(
        Arc::new(registry),
        Arc::new(store),
        Arc::new(StaticWatchList::new(&config.watch_addresses)),
        Arc::new(sink),
    );
    Ok((Arc::new(engine), rx))
}

/// Print every delivered batch as one JSON line on stdout.
async fn print_batches(mut rx: mpsc::Receiver<TransferBatch>) {
    while let Some(batch) = rx.recv().await {
        match serde_json::to_string(&batch) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode batch"),
        }
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].clone())
        .collect()
}
