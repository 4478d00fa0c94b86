//! Component wiring shared by the commands

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::account::{AccountSynchronizer, DataApiClient, PolygonRpc};
use crate::config::{Config, Credentials, ExecutionMode};
use crate::execution::{
    ClobVenue, ExecutionVenue, L2Auth, OrderSigner, PaperVenue, ReadOnlySigner, RemoteSigner, SafetyCheckedExecutor,
};
use crate::ledger::LedgerStore;
use crate::market::{DataSourceManager, GammaClient, GammaConfig};
use crate::orchestrator::Orchestrator;
use crate::reconcile::Reconciler;
use crate::strategy::OpportunityEvaluator;

/// Every long-lived component, built once from the configuration
pub struct AppContext {
    pub mode: ExecutionMode,
    pub ledger: LedgerStore,
    pub venue: Arc<dyn ExecutionVenue>,
    pub sync: Arc<AccountSynchronizer>,
    pub executor: Arc<SafetyCheckedExecutor>,
}

impl AppContext {
    /// Build the components for `mode`
    ///
    /// Live mode requires credentials and a signer. Dry-run reads the real
    /// account when credentials are present and falls back to a paper
    /// account otherwise. A paper account starts empty every process, so it
    /// is paired with an in-memory ledger instead of the configured one.
    pub async fn build(config: &Config, mode: ExecutionMode) -> anyhow::Result<Self> {
        let credentials = match mode {
            ExecutionMode::Live => Some(Credentials::from_env().context("live mode requires API credentials")?),
            ExecutionMode::DryRun => Credentials::from_env().ok(),
            ExecutionMode::Paper => None,
        };
        Self::build_with(config, mode, credentials).await
    }

    async fn build_with(config: &Config, mode: ExecutionMode, credentials: Option<Credentials>) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.market_data.timeout_secs);
        let ledger = match credentials {
            Some(_) => LedgerStore::open(&config.ledger.url)
                .await
                .with_context(|| format!("failed to open ledger at {}", config.ledger.url))?,
            None => {
                info!(configured = %config.ledger.url, "Paper account, using an in-memory ledger");
                LedgerStore::in_memory().await.context("failed to open in-memory ledger")?
            }
        };

        let (venue, sync): (Arc<dyn ExecutionVenue>, AccountSynchronizer) = match credentials {
            Some(credentials) => {
                let signer: Arc<dyn OrderSigner> = match (&config.venue.signer_url, mode) {
                    (Some(url), ExecutionMode::Live) => Arc::new(RemoteSigner::new(url.clone(), timeout)?),
                    (None, ExecutionMode::Live) => anyhow::bail!("live mode requires venue.signer_url"),
                    _ => Arc::new(ReadOnlySigner),
                };
                let venue: Arc<dyn ExecutionVenue> = Arc::new(ClobVenue::new(
                    config.venue.clob_url.clone(),
                    L2Auth::new(&credentials),
                    signer,
                    timeout,
                )?);
                let positions = Arc::new(DataApiClient::new(
                    config.venue.data_api_url.clone(),
                    credentials.address.clone(),
                    timeout,
                )?);

                let mut sync = AccountSynchronizer::new(venue.clone(), config.sync.clone()).with_positions(positions);
                if let Some(rpc_url) = &config.venue.polygon_rpc_url {
                    let rpc = PolygonRpc::new(
                        rpc_url.clone(),
                        config.venue.usdc_contract.clone(),
                        credentials.address.clone(),
                        timeout,
                    )?;
                    sync = sync.with_collateral(Arc::new(rpc));
                }
                info!(address = %credentials.address, %mode, "Using CLOB venue");
                (venue, sync)
            }
            None => {
                if mode == ExecutionMode::DryRun {
                    warn!("No API credentials found, dry run uses a paper account");
                }
                let paper = Arc::new(PaperVenue::new(config.venue.paper_balance));
                let sync = AccountSynchronizer::new(paper.clone(), config.sync.clone()).with_positions(paper.clone());
                info!(balance = %config.venue.paper_balance, %mode, "Using paper venue");
                let venue: Arc<dyn ExecutionVenue> = paper;
                (venue, sync)
            }
        };

        let sync = Arc::new(sync);
        let executor = Arc::new(SafetyCheckedExecutor::new(
            ledger.clone(),
            sync.clone(),
            venue.clone(),
            &config.risk,
            crate::config::ExecutionConfig {
                mode,
                ..config.execution.clone()
            },
        ));

        Ok(Self {
            mode,
            ledger,
            venue,
            sync,
            executor,
        })
    }

    pub fn reconciler(&self, config: &Config) -> Reconciler {
        Reconciler::new(self.ledger.clone(), self.sync.clone(), config.reconcile.clone())
    }

    /// Market data sources in priority order
    pub fn market_data(config: &Config) -> anyhow::Result<DataSourceManager> {
        let md = &config.market_data;
        let gamma = |base_url: &str| {
            GammaClient::with_config(GammaConfig {
                base_url: base_url.to_string(),
                clob_url: md.clob_url.clone(),
                timeout: Duration::from_secs(md.timeout_secs),
                page_size: md.fetch_limit.min(500),
            })
        };

        let mut manager = DataSourceManager::new(Arc::new(gamma(&md.gamma_url)?));
        if let Some(fallback) = &md.fallback_gamma_url {
            manager = manager.with_fallback(Arc::new(gamma(fallback)?));
        }
        Ok(manager)
    }

    pub fn orchestrator(&self, config: &Config) -> anyhow::Result<Orchestrator> {
        Ok(Orchestrator::new(
            Arc::new(Self::market_data(config)?),
            self.ledger.clone(),
            self.sync.clone(),
            self.executor.clone(),
            self.reconciler(config),
            OpportunityEvaluator::new(config.strategy.clone()),
            config.risk.clone(),
            config.scheduler.clone(),
            config.market_data.fetch_limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{OrderDirection, OrderIntent};
    use crate::strategy::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_session_leaves_configured_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let mut config = Config::from_toml(include_str!("../../config.toml.example")).unwrap();
        config.ledger.url = url.clone();

        let ctx = AppContext::build_with(&config, ExecutionMode::Paper, None).await.unwrap();
        let intent = OrderIntent::buy("m1", "m1-yes", Side::Yes, dec!(10)).with_limit_price(dec!(0.7));
        let result = ctx.executor.place_order(&intent, OrderDirection::Buy).await.unwrap();
        assert!(result.success);
        assert_eq!(ctx.ledger.open_trades().await.unwrap().len(), 1);

        let persistent = LedgerStore::open(&url).await.unwrap();
        assert!(persistent.recent_orders(10).await.unwrap().is_empty());
        assert!(persistent.open_trades().await.unwrap().is_empty());
    }
}
