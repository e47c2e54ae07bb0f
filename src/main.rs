//! Engine entrypoint: wires the pool, chain client, gateway, and background
//! monitors, then runs until interrupted.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use adbroker::config::{
    load_master_key, validate_platform_wallet_on_startup, AdminPolicy, TimeoutConfig,
};
use adbroker::db::create_pool;
use adbroker::logging::init_logging;
use adbroker::services::dispute::DisputeAuthority;
use adbroker::services::lifecycle::DealLifecycle;
use adbroker::services::payment_monitor::PaymentMonitor;
use adbroker::services::post_monitor::VerificationMonitor;
use adbroker::services::scheduler::Scheduler;
use adbroker::telegram::BotGateway;
use adbroker::ton::HttpTonClient;
use adbroker::wallet_manager::EscrowWalletManager;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    // Fail fast on misconfiguration before anything touches the chain.
    validate_platform_wallet_on_startup();
    let master_key = load_master_key();
    let config = TimeoutConfig::from_env();
    let admin_policy = AdminPolicy::from_env();

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "adbroker.db".to_string());
    let pool = create_pool(&database_url).context("Failed to initialize database")?;
    info!("Database ready at {database_url}");

    let ton_endpoint = env::var("TON_RPC_ENDPOINT")
        .context("TON_RPC_ENDPOINT must be set")?;
    let ton_api_key = env::var("TON_RPC_API_KEY").ok();
    let chain = Arc::new(HttpTonClient::new(
        ton_endpoint,
        ton_api_key,
        config.rpc_timeout(),
    )?);

    let gateway_url = env::var("BOT_GATEWAY_URL")
        .context("BOT_GATEWAY_URL must be set")?;
    let gateway = Arc::new(BotGateway::new(gateway_url, config.rpc_timeout())?);

    let wallets = Arc::new(EscrowWalletManager::new(
        pool.clone(),
        chain.clone(),
        master_key,
        config.clone(),
    ));
    let lifecycle = Arc::new(DealLifecycle::new(
        pool.clone(),
        wallets.clone(),
        gateway.clone(),
        config.clone(),
    ));
    let payments = Arc::new(PaymentMonitor::new(
        pool.clone(),
        chain.clone(),
        lifecycle.clone(),
        config.clone(),
    ));
    let verifier = Arc::new(VerificationMonitor::new(
        pool.clone(),
        gateway.clone(),
        lifecycle.clone(),
        config.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        lifecycle.clone(),
        payments.clone(),
        verifier.clone(),
        config.clone(),
    ));
    // Constructed for its startup policy check; exposed to the admin surface.
    let _disputes = Arc::new(DisputeAuthority::new(
        pool,
        lifecycle,
        wallets,
        admin_policy,
    ));

    tokio::spawn(payments.start_sweep());
    tokio::spawn(scheduler.run());
    info!("Engine running; press Ctrl-C to shut down");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    Ok(())
}
