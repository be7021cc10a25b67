//! On-chain market enrichment pipeline.
//!
//! Discovery -> state fetch -> price/liquidity derivation for batches of
//! tracked tokens. Batches are issued in waves of bounded parallelism with
//! a cool-down between waves to respect provider rate limits.

pub mod discovery;
pub mod pricing;
pub mod state;

use alloy_primitives::Address;
use eyre::Result;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::multicall::Multicall;
use discovery::PoolDiscovery;
use pricing::{compute_market_record, MarketRecord, PoolSnapshot, ReferenceContext, TokenMeta};
use state::PoolStateFetcher;

pub struct MarketPipeline {
    multicall: Multicall,
    discovery: PoolDiscovery,
    state: PoolStateFetcher,
    batch_size: usize,
    max_concurrent_batches: usize,
    batch_cooldown: Duration,
}

impl MarketPipeline {
    pub fn new(
        multicall: Multicall,
        discovery: PoolDiscovery,
        batch_size: usize,
        max_concurrent_batches: usize,
        batch_cooldown_ms: u64,
    ) -> Self {
        let state = PoolStateFetcher::new(discovery.dex_label().to_string());
        Self {
            multicall,
            discovery,
            state,
            batch_size: batch_size.max(1),
            max_concurrent_batches: max_concurrent_batches.max(1),
            batch_cooldown: Duration::from_millis(batch_cooldown_ms),
        }
    }

    /// Enrich every token in the list, returning one record per token
    /// (tokens with zero pools included, zeroed).
    pub async fn refresh(
        &self,
        tokens: &[TokenMeta],
        reference: ReferenceContext,
    ) -> Result<Vec<MarketRecord>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let batches: Vec<&[TokenMeta]> = tokens.chunks(self.batch_size).collect();
        let wave_count = batches.len().div_ceil(self.max_concurrent_batches);

        let mut records = Vec::with_capacity(tokens.len());

        for (wave, group) in batches.chunks(self.max_concurrent_batches).enumerate() {
            let outcomes = join_all(
                group
                    .iter()
                    .map(|batch| self.refresh_batch(batch, reference)),
            )
            .await;

            for (batch, outcome) in group.iter().zip(outcomes) {
                match outcome {
                    Ok(mut batch_records) => records.append(&mut batch_records),
                    Err(e) => {
                        // One failed batch loses only its own tokens
                        warn!(
                            "enrichment batch of {} tokens failed: {:#}",
                            batch.len(),
                            e
                        );
                    }
                }
            }

            if wave + 1 < wave_count && !self.batch_cooldown.is_zero() {
                tokio::time::sleep(self.batch_cooldown).await;
            }
        }

        info!(
            "Enriched {}/{} tokens in {:?} ({} batches)",
            records.len(),
            tokens.len(),
            start.elapsed(),
            batches.len()
        );

        Ok(records)
    }

    async fn refresh_batch(
        &self,
        batch: &[TokenMeta],
        reference: ReferenceContext,
    ) -> Result<Vec<MarketRecord>> {
        let addresses: Vec<Address> = batch.iter().map(|t| t.address).collect();
        let discovered = self.discovery.discover(&self.multicall, &addresses).await?;

        // Union of every discovered pool, fetched once
        let mut pool_union: Vec<Address> = discovered.metas.keys().copied().collect();
        pool_union.sort();
        let snapshots = self.state.fetch(&self.multicall, &pool_union).await?;

        debug!(
            "batch: {} tokens, {} pools discovered, {} states read",
            batch.len(),
            pool_union.len(),
            snapshots.len()
        );

        let records = batch
            .iter()
            .map(|token| {
                let pools: Vec<PoolSnapshot> = discovered
                    .by_token
                    .get(&token.address)
                    .map(|addrs| {
                        addrs
                            .iter()
                            .filter_map(|a| snapshots.get(a).cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                compute_market_record(token, &pools, &reference)
            })
            .collect();

        Ok(records)
    }
}
