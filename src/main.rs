//! Settlement service binary.
//!
//! Loads the YAML configuration, initializes logging, builds one
//! settlement handler per configured contract and runs the scheduled
//! loops until interrupted.
//!
//! The ledger gateway here is the in-process implementation; a
//! deployment against the real ledger backend swaps the `LedgerApi`
//! instance wired into the service and changes nothing else.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use settlement_engine::chain::EthRpcClient;
use settlement_engine::config::AppConfig;
use settlement_engine::ledger::InMemoryLedger;
use settlement_engine::logging;
use settlement_engine::settlement::SettlementService;

fn config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "config/settlement.yaml".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config_path();
    let config = AppConfig::from_file(&path)
        .with_context(|| format!("failed to load configuration from {path}"))?;
    let _guard = logging::init_logging(&config);

    info!(
        "settlement service starting with {} configured contract(s)",
        config.service.len()
    );

    let ledger = Arc::new(InMemoryLedger::new());
    let mut service = SettlementService::new(ledger);
    for (name, handler_config) in config.service {
        info!(
            "registering handler {name}: exchange_id={} chain_id={}",
            handler_config.exchange_id, handler_config.chain_id
        );
        let chain = Arc::new(EthRpcClient::new(handler_config.provider_url.clone()));
        service
            .add_handler(handler_config, chain)
            .await
            .with_context(|| format!("failed to build handler {name}"))?;
    }

    let tasks = service.run();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping settlement loops");
    service.stop();
    for task in tasks {
        let _ = task.await;
    }
    info!("settlement service stopped");

    Ok(())
}
