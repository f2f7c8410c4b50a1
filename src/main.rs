use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dex_trader::{
    chain::{ChainClient, SessionStore},
    config::EngineConfig,
    dex::{BestTradeOptions, EthersClient},
    store::JsonFileStore,
    trading::{FeedConfig, SessionOutcome, TargetKind, run_dispatcher, start_price_feed},
    utils::{self, CancelToken},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = EngineConfig::from_env()?;
    let store = Arc::new(JsonFileStore::new(&config.session_file));
    let Some(mut session) = store.load_session()? else {
        bail!("no session found at {}", config.session_file.display());
    };

    let router = config.router_address.unwrap_or(session.dex.router);
    session.dex.router = router;
    let client = EthersClient::connect(&config.rpc_url, &config.private_key, router)
        .await
        .context("connecting to RPC")?;
    if client.wallet() != session.wallet {
        bail!(
            "PRIVATE_KEY controls {:?} but the session trades for {:?}",
            client.wallet(),
            session.wallet
        );
    }
    let chain: Arc<dyn ChainClient> = Arc::new(client);

    let connectors = chain
        .fetch_token_info(&config.connectors)
        .await
        .context("reading connector tokens")?
        .into_values()
        .map(|info| info.into_token())
        .collect::<Vec<_>>();

    tracing::info!(
        network = %session.network.name,
        dex = %session.dex.name,
        pair = %format!("{}/{}", session.token0, session.token1),
        buys = session.buy_targets.len(),
        sells = session.sell_targets.len(),
        connectors = connectors.len(),
        "[INIT] dex-trader starting"
    );

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("[INIT] interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    let feed_config = FeedConfig {
        token0: session.token0.clone(),
        token1: session.token1.clone(),
        dex: session.dex.clone(),
        connectors,
        interval: config.poll_interval,
        options: BestTradeOptions {
            max_results: config.max_results,
            max_hops: config.max_hops,
            fee_retained_bps: session.dex.fee_retained_bps,
        },
        buy_amount: session.next_feed_amount(TargetKind::Buy).unwrap_or_default(),
        sell_amount: session.next_feed_amount(TargetKind::Sell).unwrap_or_default(),
    };
    let (feed, heartbeats) = start_price_feed(Arc::clone(&chain), feed_config, cancel.clone());

    let outcome = run_dispatcher(
        session,
        feed,
        heartbeats,
        chain,
        store,
        config.dispatch,
        cancel,
    )
    .await?;
    match outcome {
        SessionOutcome::Completed(reason) => {
            tracing::info!(?reason, "[INIT] session completed")
        }
        SessionOutcome::Cancelled => tracing::info!("[INIT] session paused, state saved"),
    }
    Ok(())
}
