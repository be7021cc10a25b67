//! Priority-tiered, rate-budgeted refresh scheduler.
//!
//! Named recurring jobs on independent intervals: budget reset, registry
//! discovery + on-chain enrichment, full ranking, priority refresh, and
//! non-priority rotation. All mutable scheduling state lives in one owned
//! SchedulerState; passes receive it by reference and update it atomically
//! (single-writer discipline - passes run cooperatively, never truly in
//! parallel within the process).
//!
//! A pass failure is logged and waits for the next trigger; nothing here
//! is allowed to take the process down.

use eyre::Result;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::market::pricing::{ReferenceContext, TokenMeta};
use crate::market::MarketPipeline;
use crate::multicall::Multicall;
use crate::oracle::ReferencePriceOracle;
use crate::price_api::PriceApiClient;
use crate::registry::RegistryScanner;
use crate::store::Database;

// ============================================
// REFRESH BUDGET
// ============================================

/// Per-minute external-call budget. The counter only grows inside a
/// window; the reset job zeroes it exactly once per window.
pub struct RefreshBudget {
    used: AtomicU32,
    quota: u32,
}

impl RefreshBudget {
    pub fn new(quota: u32) -> Self {
        Self {
            used: AtomicU32::new(0),
            quota,
        }
    }

    /// Reserve `calls` units of budget. Returns false (reserving nothing)
    /// when the window cannot absorb them.
    pub fn try_acquire(&self, calls: u32) -> bool {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            if current + calls > self.quota {
                return false;
            }
            match self.used.compare_exchange(
                current,
                current + calls,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> u32 {
        self.quota.saturating_sub(self.used())
    }

    pub fn reset(&self) {
        self.used.store(0, Ordering::Release);
    }
}

// ============================================
// SCHEDULER STATE
// ============================================

/// The only cross-pass mutable state: budget counter, priority list and
/// the enrichment in-flight flag.
pub struct SchedulerState {
    pub budget: RefreshBudget,
    priority: RwLock<Vec<String>>,
    pipeline_busy: AtomicBool,
}

impl SchedulerState {
    pub fn new(quota: u32) -> Self {
        Self {
            budget: RefreshBudget::new(quota),
            priority: RwLock::new(Vec::new()),
            pipeline_busy: AtomicBool::new(false),
        }
    }

    pub fn priority_list(&self) -> Vec<String> {
        self.priority.read().unwrap().clone()
    }

    /// Replaced only by the full ranking pass, never by partial refreshes.
    fn set_priority(&self, list: Vec<String>) {
        *self.priority.write().unwrap() = list;
    }

    /// Non-blocking claim of the enrichment pipeline. A trigger that loses
    /// the race is skipped, not queued.
    fn try_begin_pipeline(&self) -> bool {
        self.pipeline_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn end_pipeline(&self) {
        self.pipeline_busy.store(false, Ordering::Release);
    }
}

/// Quote calls the rotation pass may spend after honoring the margin.
fn rotation_capacity(remaining: u32, safety_margin: u32) -> u32 {
    remaining.saturating_sub(safety_margin)
}

// ============================================
// SCHEDULER
// ============================================

pub struct Scheduler {
    config: Config,
    state: SchedulerState,
    db: Arc<Database>,
    oracle: ReferencePriceOracle,
    api: PriceApiClient,
    pipeline: MarketPipeline,
    registry: RegistryScanner,
    multicall: Multicall,
}

impl Scheduler {
    pub fn new(config: Config, db: Arc<Database>) -> Result<Arc<Self>> {
        let factory = config.factory()?;
        let reference_token = config.reference()?;
        let reference_pool = config.reference_pool()?;
        let registries = config.registries()?;

        let multicall = |c: &Config| {
            Multicall::new(
                c.rpc_url.clone(),
                c.multicall_max_calls,
                c.multicall_chunk_delay_ms,
            )
        };

        let oracle = ReferencePriceOracle::new(
            multicall(&config),
            reference_pool,
            reference_token,
            config.reference_decimals,
            config.reference_quote_decimals,
            config.reference_price_ttl_secs,
            config.reference_fallback_price,
        );

        let pipeline = MarketPipeline::new(
            multicall(&config),
            crate::market::discovery::PoolDiscovery::new(
                factory,
                reference_token,
                config.dex_label.clone(),
            ),
            config.pool_batch_size,
            config.max_concurrent_batches,
            config.batch_cooldown_ms,
        );

        let registry = RegistryScanner::new(
            config.rpc_url.clone(),
            registries,
            config.discovery_window_blocks,
        );

        let api = PriceApiClient::new(config.price_api_url.clone(), config.price_api_key.clone())?;

        Ok(Arc::new(Self {
            state: SchedulerState::new(config.price_api_quota_per_min),
            multicall: multicall(&config),
            config,
            db,
            oracle,
            api,
            pipeline,
            registry,
        }))
    }

    /// Spawn every recurring job and run until the process is stopped.
    pub async fn run(self: Arc<Self>) {
        info!("scheduler starting recurring jobs");

        let mut handles = Vec::new();

        // Budget reset: exactly once per accounting window
        {
            let sched = self.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(60));
                ticker.tick().await; // skip the immediate first tick
                loop {
                    ticker.tick().await;
                    trace!(
                        "budget window reset ({} calls spent)",
                        sched.state.budget.used()
                    );
                    sched.state.budget.reset();
                }
            }));
        }

        handles.push(self.clone().spawn_job(
            "discovery",
            self.config.discovery_interval_secs,
            |sched| async move { sched.discovery_pass().await },
        ));
        handles.push(self.clone().spawn_job(
            "ranking",
            self.config.ranking_interval_secs,
            |sched| async move { sched.ranking_pass().await },
        ));
        handles.push(self.clone().spawn_job(
            "priority-refresh",
            self.config.priority_refresh_secs,
            |sched| async move { sched.priority_pass().await },
        ));
        handles.push(self.clone().spawn_job(
            "rotation-refresh",
            self.config.rotation_refresh_secs,
            |sched| async move { sched.rotation_pass().await },
        ));

        futures::future::join_all(handles).await;
    }

    fn spawn_job<F, Fut>(
        self: Arc<Self>,
        name: &'static str,
        interval_secs: u64,
        pass: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<Scheduler>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = pass(self.clone()).await {
                    warn!("{} pass failed: {:#}", name, e);
                }
            }
        })
    }

    // ============================================
    // PASSES
    // ============================================

    /// Registry scan + full on-chain enrichment. Guarded by the in-flight
    /// flag: an overlapping trigger is skipped, not queued.
    pub async fn discovery_pass(&self) -> Result<()> {
        if !self.state.try_begin_pipeline() {
            debug!("enrichment already in flight, skipping trigger");
            return Ok(());
        }
        let result = self.run_discovery().await;
        self.state.end_pipeline();
        result
    }

    async fn run_discovery(&self) -> Result<()> {
        match self.registry.scan(&self.multicall).await {
            Ok(rows) if !rows.is_empty() => {
                self.db.upsert_tokens(&rows).await?;
            }
            Ok(_) => {}
            Err(e) => {
                // Enrichment of already-known tokens still proceeds
                warn!("registry scan failed: {:#}", e);
            }
        }

        let tokens = self.db.all_tokens().await?;
        if tokens.is_empty() {
            debug!("no tracked tokens yet, nothing to enrich");
            return Ok(());
        }

        let metas: Vec<TokenMeta> = tokens.iter().filter_map(|t| t.to_meta()).collect();
        let reference = ReferenceContext {
            address: self.config.reference()?,
            decimals: self.config.reference_decimals,
            usd_price: self.oracle.get_price().await,
        };

        let records = self.pipeline.refresh(&metas, reference).await?;
        self.db.upsert_market_records(&records).await?;
        Ok(())
    }

    /// Re-derive the priority list from persisted market caps. Falls back
    /// to an unranked seed when no records exist yet.
    pub async fn ranking_pass(&self) -> Result<()> {
        let mut top = self.db.top_by_market_cap(self.config.priority_size).await?;

        if top.is_empty() {
            top = self
                .db
                .all_tokens()
                .await?
                .into_iter()
                .map(|t| t.address)
                .take(self.config.priority_size)
                .collect();
            if !top.is_empty() {
                info!("no ranked records yet, seeding {} unranked token(s)", top.len());
            }
        }

        debug!("priority list rebuilt: {} token(s)", top.len());
        self.state.set_priority(top);
        Ok(())
    }

    /// Refresh exactly the priority list from the external API, if the
    /// budget admits all of its calls.
    pub async fn priority_pass(&self) -> Result<()> {
        let priority = self.state.priority_list();
        if priority.is_empty() {
            return Ok(());
        }

        let calls_needed = priority.len().div_ceil(self.config.tokens_per_call) as u32;
        if !self.state.budget.try_acquire(calls_needed) {
            debug!(
                "budget exhausted ({} used), skipping priority refresh",
                self.state.budget.used()
            );
            return Ok(());
        }

        for chunk in priority.chunks(self.config.tokens_per_call) {
            match self.api.fetch_quotes(chunk).await {
                Ok(quotes) => {
                    self.db.apply_quotes(&quotes, true).await?;
                }
                Err(e) => warn!("priority quote batch failed: {:#}", e),
            }
        }

        debug!("priority refresh: {} token(s)", priority.len());
        Ok(())
    }

    /// Spend leftover budget on the stalest non-priority tokens so the
    /// whole tracked set is eventually covered.
    pub async fn rotation_pass(&self) -> Result<()> {
        let capacity = rotation_capacity(
            self.state.budget.remaining(),
            self.config.budget_safety_margin,
        );
        if capacity == 0 {
            debug!("no budget headroom, skipping rotation");
            return Ok(());
        }

        let priority = self.state.priority_list();
        let candidates = self
            .db
            .stalest_addresses(capacity as usize * self.config.tokens_per_call, &priority)
            .await?;
        if candidates.is_empty() {
            return Ok(());
        }

        let mut refreshed = 0usize;
        for chunk in candidates.chunks(self.config.tokens_per_call) {
            if !self.state.budget.try_acquire(1) {
                debug!("budget exhausted mid-rotation after {} token(s)", refreshed);
                break;
            }
            match self.api.fetch_quotes(chunk).await {
                Ok(quotes) => {
                    self.db.apply_quotes(&quotes, false).await?;
                    refreshed += chunk.len();
                }
                Err(e) => warn!("rotation quote batch failed: {:#}", e),
            }
        }

        debug!("rotation refresh: {} token(s)", refreshed);
        Ok(())
    }
}
