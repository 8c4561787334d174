use std::sync::Arc;
use std::time::Duration;

use ans104::Wallet;
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relay_bridge::config::BridgeConfig;
use relay_bridge::credentials::CredentialTemplate;
use relay_bridge::database;
use relay_bridge::dedup::{DedupStore, SqlxDedupStore};
use relay_bridge::dispatcher::Dispatcher;
use relay_bridge::dispatcher::handlers::{HttpQuoteSource, PriceQuoteHandler, RetryPolicy};
use relay_bridge::ledger::{GatewayClient, GraphQlIndex, LedgerIndex, MessengerClient};
use relay_bridge::liveness::LivenessCompanion;
use relay_bridge::logging::init_logging;
use relay_bridge::poller::{
    BridgeState, CircuitBreaker, LedgerPoller, PollerConfig, RequestPipeline,
};
use relay_bridge::publisher::ResponsePublisher;
use relay_bridge::utils::http_client::build_client;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);
const QUOTE_TIMEOUT: Duration = Duration::from_secs(15);
const SUBSCRIBE_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = BridgeConfig::from_env()?;

    let (logging, _log_guard) = init_logging(config.log_dir.as_deref())?;
    info!(filter = %logging.get_filter(), "Logging initialized");

    let client = build_client(CONNECT_TIMEOUT)?;

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;
    let store: Arc<dyn DedupStore> = Arc::new(SqlxDedupStore::new(pool));

    let pending = store.list_pending().await?;
    if !pending.is_empty() {
        warn!(
            count = pending.len(),
            "Found requests left pending by a previous run; they will not be retried"
        );
    }

    let wallet = Wallet::from_file(&config.wallet_path)
        .with_context(|| format!("failed to load wallet from {}", config.wallet_path.display()))?;
    info!(address = %wallet.address(), "Wallet loaded");
    let messenger = Arc::new(MessengerClient::new(
        client.clone(),
        config.mu_url.clone(),
        Arc::new(wallet),
    ));

    let primary: Arc<dyn LedgerIndex> = Arc::new(GraphQlIndex::new(
        client.clone(),
        config.index_primary_url.clone(),
        config.index_timeout,
    ));
    let fallback: Arc<dyn LedgerIndex> = Arc::new(GraphQlIndex::new(
        client.clone(),
        config.index_fallback_url.clone(),
        config.index_timeout,
    ));
    let gateway = Arc::new(GatewayClient::new(
        client.clone(),
        config.gateway_url.clone(),
        GATEWAY_TIMEOUT,
    ));

    let credentials = Arc::new(CredentialTemplate::new(config.secrets.clone()));
    info!(
        bindings = credentials.bindings().len(),
        "Credential placeholders configured"
    );

    let mut dispatcher = Dispatcher::new(client.clone()).with_credentials(credentials.clone());
    if let Some(price) = &config.price {
        let source = Arc::new(HttpQuoteSource::new(
            client.clone(),
            price.quote_url.clone(),
            QUOTE_TIMEOUT,
        ));
        let policy = RetryPolicy {
            max_attempts: price.retry_limit,
            delay: price.retry_delay,
        };
        dispatcher = dispatcher.with_handler(Arc::new(PriceQuoteHandler::new(
            price.url_prefix.clone(),
            price.bearer_token.clone(),
            source,
            policy,
        )));
        info!(prefix = %price.url_prefix, "Price lookup handler enabled");
    }

    let publisher = Arc::new(ResponsePublisher::new(
        messenger.clone(),
        credentials.clone(),
        config.relay_process_id.clone(),
        config.limits,
    ));
    let pipeline = Arc::new(RequestPipeline::new(
        store,
        credentials,
        Arc::new(dispatcher),
        publisher,
        gateway,
    ));

    let state = Arc::new(BridgeState::new(CircuitBreaker::new(
        config.max_index_failures,
        config.index_failure_cooldown,
    )));
    let poller = LedgerPoller::new(
        primary,
        Some(fallback),
        pipeline,
        state.clone(),
        PollerConfig {
            relay_process_id: config.relay_process_id.clone(),
            query_limit: config.index_query_limit,
            interval: config.check_interval,
        },
    );

    let cancel = CancellationToken::new();

    #[cfg(unix)]
    spawn_filter_reload(logging.clone(), cancel.clone());

    let companion = config.scheduler_process_id.clone().map(|process_id| {
        let companion = LivenessCompanion::new(
            messenger.clone(),
            process_id,
            SUBSCRIBE_RETRY_INTERVAL,
            state.clone(),
        );
        let token = cancel.clone();
        tokio::spawn(async move { companion.run(token).await })
    });

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    info!(
        process_id = %config.relay_process_id,
        "relay-bridge initialized successfully"
    );
    poller.run(cancel.clone()).await;

    if let Some(handle) = companion
        && let Err(e) = handle.await
    {
        error!("Liveness companion task failed: {}", e);
    }

    info!(
        ticks = state.ticks(),
        dispatched = state.dispatched(),
        "relay-bridge stopped"
    );
    Ok(())
}

/// On SIGHUP, re-read `.env` and apply its `RUST_LOG` to the running filter.
#[cfg(unix)]
fn spawn_filter_reload(logging: relay_bridge::logging::LoggingHandle, cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!("Failed to listen for SIGHUP: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
            }

            dotenvy::dotenv_override().ok();
            if let Err(e) = logging.reload_from_env() {
                warn!("Log filter reload failed: {}", e);
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
