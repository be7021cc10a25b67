//! Reference-asset USD price oracle.
//!
//! Derives the reference asset's USD price from one designated pool's tick
//! and caches it on a fixed TTL. Callers always receive a price: a failed
//! read falls back to the last cached value, or to the configured fallback
//! constant on a cold cache.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};
use eyre::{eyre, Result};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::market::pricing::price_from_tick;
use crate::multicall::{BatchCall, Multicall};

sol! {
    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function token0() external view returns (address);
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    usd: f64,
    fetched_at: Instant,
}

impl CachedPrice {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

pub struct ReferencePriceOracle {
    multicall: Multicall,
    pool: Address,
    reference_token: Address,
    reference_decimals: u8,
    quote_decimals: u8,
    ttl: Duration,
    fallback_price: f64,
    cache: RwLock<Option<CachedPrice>>,
}

impl ReferencePriceOracle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        multicall: Multicall,
        pool: Address,
        reference_token: Address,
        reference_decimals: u8,
        quote_decimals: u8,
        ttl_secs: u64,
        fallback_price: f64,
    ) -> Self {
        Self {
            multicall,
            pool,
            reference_token,
            reference_decimals,
            quote_decimals,
            ttl: Duration::from_secs(ttl_secs),
            fallback_price,
            cache: RwLock::new(None),
        }
    }

    /// Current USD price of the reference asset. Never fails: the worst
    /// case is the configured fallback constant.
    pub async fn get_price(&self) -> f64 {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = *cache {
                if !cached.is_stale(self.ttl) {
                    trace!("reference price from cache: {:.2}", cached.usd);
                    return cached.usd;
                }
            }
        }

        match self.fetch_price().await {
            Ok(usd) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CachedPrice {
                    usd,
                    fetched_at: Instant::now(),
                });
                debug!("reference price refreshed: {:.2}", usd);
                usd
            }
            Err(e) => {
                warn!("reference pool read failed: {:#}", e);
                let cache = self.cache.read().await;
                match *cache {
                    // Stale beats nothing
                    Some(cached) => cached.usd,
                    None => {
                        warn!(
                            "no cached reference price, using fallback {:.2}",
                            self.fallback_price
                        );
                        self.fallback_price
                    }
                }
            }
        }
    }

    /// Read slot0 + token0 of the authoritative pool in one round trip
    /// and orient the tick price to USD-per-reference-asset.
    async fn fetch_price(&self) -> Result<f64> {
        let calls = vec![
            BatchCall::new(self.pool, IUniswapV3Pool::slot0Call {}.abi_encode()),
            BatchCall::new(self.pool, IUniswapV3Pool::token0Call {}.abi_encode()),
        ];

        let results = self.multicall.execute(calls).await?;
        if results.len() != 2 {
            return Err(eyre!("unexpected result count {}", results.len()));
        }

        let slot0 = results[0]
            .decode::<IUniswapV3Pool::slot0Call>()
            .ok_or_else(|| eyre!("slot0 read failed for reference pool {:?}", self.pool))?;
        let token0 = results[1]
            .decode::<IUniswapV3Pool::token0Call>()
            .ok_or_else(|| eyre!("token0 read failed for reference pool {:?}", self.pool))?;

        if slot0.sqrtPriceX96.to::<U256>().is_zero() {
            return Err(eyre!("reference pool has no price state"));
        }

        let tick = slot0.tick.as_i32();
        let usd = resolve_reference_price(
            tick,
            token0 == self.reference_token,
            self.reference_decimals,
            self.quote_decimals,
        )?;

        Ok(usd)
    }
}

/// Tick price oriented so the result is quote (USD) units per reference
/// asset, regardless of which side of the pool the reference sits on.
fn resolve_reference_price(
    tick: i32,
    reference_is_token0: bool,
    reference_decimals: u8,
    quote_decimals: u8,
) -> Result<f64> {
    let usd = if reference_is_token0 {
        price_from_tick(tick, reference_decimals, quote_decimals)
    } else {
        let inverse = price_from_tick(tick, quote_decimals, reference_decimals);
        if inverse == 0.0 || !inverse.is_finite() {
            return Err(eyre!("degenerate tick {} for reference pool", tick));
        }
        1.0 / inverse
    };

    if !usd.is_finite() || usd <= 0.0 {
        return Err(eyre!("non-finite reference price from tick {}", tick));
    }
    Ok(usd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{REFERENCE_POOL, WETH};

    fn oracle_with_unreachable_rpc() -> ReferencePriceOracle {
        // Port 9 (discard) refuses immediately; the read can only fail
        let multicall = Multicall::new("http://127.0.0.1:9".to_string(), 2000, 0);
        ReferencePriceOracle::new(multicall, REFERENCE_POOL, WETH, 18, 6, 900, 1911.0)
    }

    #[tokio::test]
    async fn test_cold_cache_failure_returns_fallback() {
        let oracle = oracle_with_unreachable_rpc();
        let price = oracle.get_price().await;
        assert_eq!(price, 1911.0);
    }

    #[test]
    fn test_reference_price_orientation() {
        // USDC/WETH pool: USDC (6) is token0, WETH (18) is token1.
        // tick 200768 gives ~1911 USDC per WETH once inverted.
        let inverted = resolve_reference_price(200_768, false, 18, 6).unwrap();
        assert!((inverted - 1911.0).abs() / 1911.0 < 0.01, "got {}", inverted);

        // WETH-first pool with the mirrored tick agrees
        let direct = resolve_reference_price(-200_768, true, 18, 6).unwrap();
        assert!((direct - inverted).abs() / direct < 1e-9);
    }

    #[test]
    fn test_degenerate_tick_is_an_error_not_a_zero() {
        // Forcing the inverse path towards infinity must error so the
        // caller's fallback chain takes over
        assert!(resolve_reference_price(i32::MAX / 4, false, 18, 6).is_err());
    }
}
