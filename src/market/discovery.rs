//! Pool discovery against the factory registry.
//!
//! For each token in a batch, probes every supported fee tier with the
//! token on both sides of the pair - the factory keys pools by a
//! canonical address-sorted ordering the caller cannot know in advance.
//! All lookups for the batch ride one multicall (chunked by the executor).

use alloy_primitives::{Address, Uint};
use alloy_sol_types::{sol, SolCall};
use eyre::Result;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::multicall::{BatchCall, CallResult, Multicall};
use crate::tokens::FEE_TIERS;

sol! {
    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee)
            external view returns (address pool);
    }
}

/// Skeleton pool record produced by discovery; state is filled in later
#[derive(Debug, Clone)]
pub struct PoolMeta {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
}

/// Result of one discovery batch
#[derive(Debug, Default)]
pub struct DiscoveredPools {
    /// token -> deduplicated pool addresses
    pub by_token: HashMap<Address, Vec<Address>>,
    /// pool -> pair skeleton
    pub metas: HashMap<Address, PoolMeta>,
}

/// One factory lookup within the batch call plan
#[derive(Debug, Clone, Copy)]
pub(crate) struct LookupSlot {
    pub token: Address,
    pub fee: u32,
    pub token_is_first: bool,
}

pub struct PoolDiscovery {
    factory: Address,
    reference_token: Address,
    dex_label: String,
}

impl PoolDiscovery {
    pub fn new(factory: Address, reference_token: Address, dex_label: String) -> Self {
        Self {
            factory,
            reference_token,
            dex_label,
        }
    }

    pub fn dex_label(&self) -> &str {
        &self.dex_label
    }

    /// Find all (token, reference) pools for a batch of tokens.
    pub async fn discover(
        &self,
        multicall: &Multicall,
        tokens: &[Address],
    ) -> Result<DiscoveredPools> {
        let (calls, slots) = self.build_call_plan(tokens);
        if calls.is_empty() {
            return Ok(DiscoveredPools::default());
        }

        debug!(
            "Pool discovery: {} tokens, {} factory lookups",
            tokens.len(),
            calls.len()
        );

        let results = multicall.execute(calls).await?;
        Ok(self.collect(&slots, &results))
    }

    /// One getPool call per (token, fee tier, ordering); the parallel
    /// slot vector maps result indices back to their lookups.
    pub(crate) fn build_call_plan(&self, tokens: &[Address]) -> (Vec<BatchCall>, Vec<LookupSlot>) {
        let mut calls = Vec::with_capacity(tokens.len() * FEE_TIERS.len() * 2);
        let mut slots = Vec::with_capacity(calls.capacity());

        for token in tokens {
            if *token == self.reference_token {
                continue;
            }
            for fee in FEE_TIERS {
                for token_is_first in [true, false] {
                    let (token_a, token_b) = if token_is_first {
                        (*token, self.reference_token)
                    } else {
                        (self.reference_token, *token)
                    };
                    calls.push(BatchCall::new(
                        self.factory,
                        IUniswapV3Factory::getPoolCall {
                            tokenA: token_a,
                            tokenB: token_b,
                            fee: Uint::<24, 1>::from(fee),
                        }
                        .abi_encode(),
                    ));
                    slots.push(LookupSlot {
                        token: *token,
                        fee,
                        token_is_first,
                    });
                }
            }
        }

        (calls, slots)
    }

    /// Fold lookup results into per-token pool lists.
    /// A zero address means "no pool for this combination" and is dropped.
    pub(crate) fn collect(&self, slots: &[LookupSlot], results: &[CallResult]) -> DiscoveredPools {
        let mut discovered = DiscoveredPools::default();

        for (slot, result) in slots.iter().zip(results.iter()) {
            let Some(pool) = result.decode::<IUniswapV3Factory::getPoolCall>() else {
                continue;
            };
            if pool == Address::ZERO {
                trace!(
                    "no pool for token {:?} fee {} (first={})",
                    slot.token,
                    slot.fee,
                    slot.token_is_first
                );
                continue;
            }

            let pools = discovered.by_token.entry(slot.token).or_default();
            if !pools.contains(&pool) {
                pools.push(pool);
            }

            // Canonical ordering: lower address is token0
            let (token0, token1) = if slot.token < self.reference_token {
                (slot.token, self.reference_token)
            } else {
                (self.reference_token, slot.token)
            };
            discovered.metas.entry(pool).or_insert(PoolMeta {
                token0,
                token1,
                fee: slot.fee,
            });
        }

        discovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{UNISWAP_V3_FACTORY, WETH};
    use alloy_primitives::address;
    use alloy_primitives::Bytes;
    use alloy_sol_types::SolCall;

    fn engine() -> PoolDiscovery {
        PoolDiscovery::new(UNISWAP_V3_FACTORY, WETH, "uniswap_v3".to_string())
    }

    fn pool_result(pool: Address) -> CallResult {
        CallResult {
            success: true,
            data: IUniswapV3Factory::getPoolCall::abi_encode_returns(&pool).into(),
        }
    }

    #[test]
    fn test_call_plan_covers_tiers_and_orderings() {
        let tokens = [
            address!("00000000000000000000000000000000000000aa"),
            address!("00000000000000000000000000000000000000bb"),
        ];
        let (calls, slots) = engine().build_call_plan(&tokens);

        // 2 tokens x 4 fee tiers x 2 orderings
        assert_eq!(calls.len(), 16);
        assert_eq!(slots.len(), 16);
        assert!(calls.iter().all(|c| c.target == UNISWAP_V3_FACTORY));

        let first_count = slots.iter().filter(|s| s.token_is_first).count();
        assert_eq!(first_count, 8);
    }

    #[test]
    fn test_reference_token_is_not_probed_against_itself() {
        let (calls, _) = engine().build_call_plan(&[WETH]);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_zero_address_results_are_dropped() {
        let token = address!("00000000000000000000000000000000000000aa");
        let (_, slots) = engine().build_call_plan(&[token]);

        let results: Vec<CallResult> = slots.iter().map(|_| pool_result(Address::ZERO)).collect();
        let discovered = engine().collect(&slots, &results);

        assert!(discovered.by_token.is_empty());
        assert!(discovered.metas.is_empty());
    }

    #[test]
    fn test_duplicate_pools_deduplicated_per_token() {
        let token = address!("00000000000000000000000000000000000000aa");
        let pool = address!("00000000000000000000000000000000000000cc");
        let (_, slots) = engine().build_call_plan(&[token]);

        // Both orderings of the 0.05% tier resolve to the same pool;
        // everything else comes back empty.
        let results: Vec<CallResult> = slots
            .iter()
            .map(|s| {
                if s.fee == 500 {
                    pool_result(pool)
                } else {
                    pool_result(Address::ZERO)
                }
            })
            .collect();

        let discovered = engine().collect(&slots, &results);
        assert_eq!(discovered.by_token[&token], vec![pool]);

        let meta = &discovered.metas[&pool];
        assert_eq!(meta.fee, 500);
        // token sorts below WETH, so it is token0
        assert_eq!(meta.token0, token);
        assert_eq!(meta.token1, WETH);
    }

    #[test]
    fn test_failed_lookup_does_not_block_siblings() {
        let token = address!("00000000000000000000000000000000000000aa");
        let pool = address!("00000000000000000000000000000000000000cc");
        let (_, slots) = engine().build_call_plan(&[token]);

        let mut results: Vec<CallResult> = slots.iter().map(|_| pool_result(Address::ZERO)).collect();
        results[0] = CallResult {
            success: false,
            data: Bytes::new(),
        };
        results[3] = pool_result(pool);

        let discovered = engine().collect(&slots, &results);
        assert_eq!(discovered.by_token[&token], vec![pool]);
    }
}
