//! Bulk pool state reads.
//!
//! One aggregated batch pulls token0, token1, fee, liquidity and slot0 for
//! every discovered pool (fixed 5-call stride per pool). A pool whose reads
//! partially fail is skipped; its siblings are unaffected.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};
use eyre::Result;
use std::collections::HashMap;
use tracing::{debug, trace};

use super::pricing::PoolSnapshot;
use crate::multicall::{BatchCall, CallResult, Multicall};

sol! {
    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function liquidity() external view returns (uint128);
        function token0() external view returns (address);
        function token1() external view returns (address);
        function fee() external view returns (uint24);
    }
}

/// Calls issued per pool, in stride order
const CALLS_PER_POOL: usize = 5;

pub struct PoolStateFetcher {
    dex_label: String,
}

impl PoolStateFetcher {
    pub fn new(dex_label: String) -> Self {
        Self { dex_label }
    }

    /// Read current state for every pool in the list.
    pub async fn fetch(
        &self,
        multicall: &Multicall,
        pools: &[Address],
    ) -> Result<HashMap<Address, PoolSnapshot>> {
        if pools.is_empty() {
            return Ok(HashMap::new());
        }

        let calls = Self::build_calls(pools);
        debug!(
            "Pool state fetch: {} pools, {} calls",
            pools.len(),
            calls.len()
        );

        let results = multicall.execute(calls).await?;
        Ok(self.decode(pools, &results))
    }

    fn build_calls(pools: &[Address]) -> Vec<BatchCall> {
        let mut calls = Vec::with_capacity(pools.len() * CALLS_PER_POOL);
        for pool in pools {
            calls.push(BatchCall::new(
                *pool,
                IUniswapV3Pool::token0Call {}.abi_encode(),
            ));
            calls.push(BatchCall::new(
                *pool,
                IUniswapV3Pool::token1Call {}.abi_encode(),
            ));
            calls.push(BatchCall::new(*pool, IUniswapV3Pool::feeCall {}.abi_encode()));
            calls.push(BatchCall::new(
                *pool,
                IUniswapV3Pool::liquidityCall {}.abi_encode(),
            ));
            calls.push(BatchCall::new(
                *pool,
                IUniswapV3Pool::slot0Call {}.abi_encode(),
            ));
        }
        calls
    }

    pub(crate) fn decode(
        &self,
        pools: &[Address],
        results: &[CallResult],
    ) -> HashMap<Address, PoolSnapshot> {
        let mut snapshots = HashMap::with_capacity(pools.len());

        for (i, pool) in pools.iter().enumerate() {
            let offset = i * CALLS_PER_POOL;
            if offset + CALLS_PER_POOL > results.len() {
                break;
            }

            let token0 = results[offset].decode::<IUniswapV3Pool::token0Call>();
            let token1 = results[offset + 1].decode::<IUniswapV3Pool::token1Call>();
            let fee = results[offset + 2]
                .decode::<IUniswapV3Pool::feeCall>()
                .map(|f| f.to::<u32>());
            let liquidity = results[offset + 3].decode::<IUniswapV3Pool::liquidityCall>();
            let slot0 = results[offset + 4].decode::<IUniswapV3Pool::slot0Call>();

            let (Some(token0), Some(token1), Some(fee), Some(liquidity), Some(slot0)) =
                (token0, token1, fee, liquidity, slot0)
            else {
                trace!("incomplete state for pool {:?}, skipping", pool);
                continue;
            };

            snapshots.insert(
                *pool,
                PoolSnapshot {
                    address: *pool,
                    token0,
                    token1,
                    fee,
                    liquidity: U256::from(liquidity),
                    sqrt_price_x96: slot0.sqrtPriceX96.to::<U256>(),
                    tick: slot0.tick.as_i32(),
                    dex: self.dex_label.clone(),
                },
            );
        }

        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, aliases::{I24, U24}, Bytes, Uint};

    fn encoded_state(
        token0: Address,
        token1: Address,
        fee: u32,
        liquidity: u128,
        tick: i32,
    ) -> Vec<CallResult> {
        let slot0 = IUniswapV3Pool::slot0Return {
            sqrtPriceX96: Uint::<160, 3>::from(1u8) << 96,
            tick: I24::try_from(tick).unwrap(),
            observationIndex: 0,
            observationCardinality: 1,
            observationCardinalityNext: 1,
            feeProtocol: 0,
            unlocked: true,
        };
        vec![
            CallResult {
                success: true,
                data: IUniswapV3Pool::token0Call::abi_encode_returns(&token0).into(),
            },
            CallResult {
                success: true,
                data: IUniswapV3Pool::token1Call::abi_encode_returns(&token1).into(),
            },
            CallResult {
                success: true,
                data: IUniswapV3Pool::feeCall::abi_encode_returns(&U24::from(fee)).into(),
            },
            CallResult {
                success: true,
                data: IUniswapV3Pool::liquidityCall::abi_encode_returns(&liquidity).into(),
            },
            CallResult {
                success: true,
                data: IUniswapV3Pool::slot0Call::abi_encode_returns(&slot0).into(),
            },
        ]
    }

    #[test]
    fn test_decode_full_stride() {
        let pool = address!("00000000000000000000000000000000000000cc");
        let t0 = address!("00000000000000000000000000000000000000aa");
        let t1 = crate::tokens::WETH;

        let fetcher = PoolStateFetcher::new("uniswap_v3".to_string());
        let results = encoded_state(t0, t1, 3000, 777u128, -12345);
        let snapshots = fetcher.decode(&[pool], &results);

        let snap = &snapshots[&pool];
        assert_eq!(snap.token0, t0);
        assert_eq!(snap.token1, t1);
        assert_eq!(snap.fee, 3000);
        assert_eq!(snap.liquidity, U256::from(777u64));
        assert_eq!(snap.tick, -12345);
        assert_eq!(snap.dex, "uniswap_v3");
    }

    #[test]
    fn test_partial_failure_skips_only_that_pool() {
        let good = address!("00000000000000000000000000000000000000cc");
        let bad = address!("00000000000000000000000000000000000000dd");
        let t0 = address!("00000000000000000000000000000000000000aa");
        let t1 = crate::tokens::WETH;

        let fetcher = PoolStateFetcher::new("uniswap_v3".to_string());

        // Bad pool: liquidity read failed mid-stride
        let mut bad_results = encoded_state(t0, t1, 500, 1u128, 0);
        bad_results[3] = CallResult {
            success: false,
            data: Bytes::new(),
        };

        let mut results = bad_results;
        results.extend(encoded_state(t0, t1, 500, 42u128, 10));

        let snapshots = fetcher.decode(&[bad, good], &results);
        assert!(!snapshots.contains_key(&bad));
        assert_eq!(snapshots[&good].liquidity, U256::from(42u64));
    }
}
