//! Custody wallet service
//!
//! Usage: `custody_wallet [--env <name>]` loads `config/<name>.yaml`
//! (default `dev`) and runs until Ctrl-C or a critical worker failure.

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};

use custody_wallet::chain::RpcChainClient;
use custody_wallet::config::AppConfig;
use custody_wallet::logging::init_logging;
use custody_wallet::signer::HttpSigner;
use custody_wallet::{PgLedgerStore, WalletService};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config =
        AppConfig::load(&env).with_context(|| format!("failed to load config/{}.yaml", env))?;
    let _log_guard = init_logging(&config);

    info!("Starting custody wallet in {} mode", env);

    let store = PgLedgerStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    store.health_check().await?;
    if config.database.init_schema {
        store.init_schema().await?;
    }

    let chain = RpcChainClient::new(&config.chain)?;
    let signer = HttpSigner::new(&config.signer, &config.chain.native_token)?;

    let mut service =
        WalletService::new(Arc::new(store), Arc::new(chain), Arc::new(signer), &config);
    service.start()?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            info!("Shutdown signal received");
        }
        _ = service.wait() => {
            error!(
                cause = %service.critical_error().unwrap_or_default(),
                "Critical worker failure, shutting down"
            );
        }
    }

    service.stop().await?;
    info!("Custody wallet stopped");
    Ok(())
}
