//! Wallet service
//!
//! Builds the scanner, the two lifecycle policies and the withdrawal
//! dispatcher over shared collaborators, and runs each as a periodic loop
//! under one [`WorkerSupervisor`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::config::{AppConfig, WorkersConfig};
use crate::error::WalletError;
use crate::lifecycle::{ColdSweeper, Collector};
use crate::retry::RetryPolicy;
use crate::scanner::DepositScanner;
use crate::signer::Signer;
use crate::store::LedgerStore;
use crate::supervisor::{NamedLoop, WorkerSupervisor, run_periodic};
use crate::withdraw::WithdrawalDispatcher;

pub struct WalletService {
    scanner: Arc<DepositScanner>,
    collector: Arc<Collector>,
    sweeper: Arc<ColdSweeper>,
    dispatcher: Arc<WithdrawalDispatcher>,
    workers: WorkersConfig,
    supervisor: Option<WorkerSupervisor>,
    stopped: bool,
}

fn periodic<F, Fut>(name: &'static str, period_ms: u64, cycle: F) -> NamedLoop
where
    F: Fn(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), WalletError>> + Send + 'static,
{
    NamedLoop::new(name, move |cancel| async move {
        let token = cancel.clone();
        run_periodic(name, Duration::from_millis(period_ms), cancel, move || {
            cycle(token.clone())
        })
        .await
    })
}

impl WalletService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer>,
        config: &AppConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);

        Self {
            scanner: Arc::new(DepositScanner::new(
                store.clone(),
                chain.clone(),
                config.chain.clone(),
                retry.clone(),
            )),
            collector: Arc::new(Collector::new(
                store.clone(),
                chain.clone(),
                signer.clone(),
                config.funding.clone(),
                retry.clone(),
            )),
            sweeper: Arc::new(ColdSweeper::new(
                store.clone(),
                chain.clone(),
                signer.clone(),
                config.funding.clone(),
                retry.clone(),
            )),
            dispatcher: Arc::new(WithdrawalDispatcher::new(store, chain, signer, retry)),
            workers: config.workers.clone(),
            supervisor: None,
            stopped: false,
        }
    }

    /// Launch the four loops. A service runs at most once.
    pub fn start(&mut self) -> Result<(), WalletError> {
        if self.stopped {
            return Err(WalletError::Config("wallet service already stopped".into()));
        }
        if self.supervisor.is_some() {
            return Err(WalletError::Config("wallet service already started".into()));
        }

        let scanner = self.scanner.clone();
        let collector = self.collector.clone();
        let sweeper = self.sweeper.clone();
        let dispatcher = self.dispatcher.clone();

        let loops = vec![
            periodic("scanner", self.workers.scan_interval_ms, move |cancel| {
                let scanner = scanner.clone();
                async move { scanner.run_cycle(&cancel).await.map(|_| ()) }
            }),
            periodic("collector", self.workers.collection_interval_ms, move |cancel| {
                let collector = collector.clone();
                async move { collector.run_cycle(&cancel).await.map(|_| ()) }
            }),
            periodic("cold_sweeper", self.workers.cold_sweep_interval_ms, move |cancel| {
                let sweeper = sweeper.clone();
                async move { sweeper.run_cycle(&cancel).await.map(|_| ()) }
            }),
            periodic("withdrawer", self.workers.withdraw_interval_ms, move |cancel| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.run_cycle(&cancel).await.map(|_| ()) }
            }),
        ];

        self.supervisor = Some(WorkerSupervisor::start(loops));
        Ok(())
    }

    /// Resolves once the loops have been told to stop, normally because one
    /// of them failed
    pub async fn wait(&self) {
        match &self.supervisor {
            Some(supervisor) => supervisor.wait().await,
            None => std::future::pending().await,
        }
    }

    pub fn critical_error(&self) -> Option<String> {
        self.supervisor.as_ref().and_then(|s| s.critical_error())
    }

    /// Stop every loop and wait for them to exit
    pub async fn stop(&mut self) -> Result<(), WalletError> {
        self.stopped = true;
        match self.supervisor.take() {
            Some(supervisor) => supervisor.stop().await,
            None => Ok(()),
        }
    }
}
