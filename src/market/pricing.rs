//! Tick-to-price conversion and USD price/liquidity derivation.
//!
//! Liquidity and total supply stay in U256 until the final USD-valued
//! output; floating point only enters after decimal normalization.

use alloy_primitives::{Address, U256};
use chrono::Utc;

use crate::tokens::address_key;

/// Per-tick price ratio of the concentrated-liquidity curve
const TICK_BASE: f64 = 1.0001;

/// Beyond this magnitude direct exponentiation is replaced by the
/// logarithmic form to stay finite
const DIRECT_POW_TICK_LIMIT: i32 = 1000;

/// Q96 fixed-point scale of sqrtPriceX96
const Q96: f64 = 79228162514264337593543950336.0; // 2^96

// ============================================
// TYPES
// ============================================

/// Snapshot of one pool's on-chain state, recomputed each pass
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub liquidity: U256,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub dex: String,
}

/// Token fields the calculator needs
#[derive(Debug, Clone)]
pub struct TokenMeta {
    pub address: Address,
    pub decimals: u8,
    pub total_supply: U256,
}

/// Reference-asset context for USD conversion
#[derive(Debug, Clone, Copy)]
pub struct ReferenceContext {
    pub address: Address,
    pub decimals: u8,
    pub usd_price: f64,
}

/// Persisted per-token market row, mutated only by the refresh pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct MarketRecord {
    pub address: String,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub pool_count: u32,
    pub main_pool: String,
    pub main_dex: String,
    pub priority: bool,
    pub updated_at: i64,
}

// ============================================
// TICK MATH
// ============================================

/// Price of token0 denominated in token1, normalized for decimals.
///
/// Direct exponentiation for small ticks, logarithmic expansion for
/// large ones (1.0001^200000 overflows the direct powi path).
pub fn price_from_tick(tick: i32, decimals0: u8, decimals1: u8) -> f64 {
    let ratio = if tick.abs() <= DIRECT_POW_TICK_LIMIT {
        TICK_BASE.powi(tick)
    } else {
        (tick as f64 * TICK_BASE.ln()).exp()
    };

    ratio * 10f64.powi(decimals0 as i32 - decimals1 as i32)
}

/// Widening conversion for values that may exceed u128 (sqrtPriceX96 is
/// uint160, liquidity can grow past 2^128 in aggregate)
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .into_limbs()
        .iter()
        .enumerate()
        .map(|(i, limb)| *limb as f64 * 2f64.powi(64 * i as i32))
        .sum()
}

/// Normalize a raw supply/amount by its decimal precision.
///
/// Integer division first so supplies beyond f64's integer range keep
/// their magnitude; the remainder only contributes the fraction.
pub fn normalize_units(raw: U256, decimals: u8) -> f64 {
    let scale = U256::from(10u64).pow(U256::from(decimals as u64));
    if scale.is_zero() {
        return 0.0;
    }
    let whole = raw / scale;
    let frac = raw % scale;
    u256_to_f64(whole) + u256_to_f64(frac) / u256_to_f64(scale)
}

// ============================================
// RECORD DERIVATION
// ============================================

/// Pick the authoritative pool: highest liquidity, compared as U256.
pub fn select_main_pool<'a>(pools: &'a [PoolSnapshot]) -> Option<&'a PoolSnapshot> {
    pools.iter().max_by_key(|p| p.liquidity)
}

/// Derive the persisted market record for one token from its pools.
///
/// Zero discovered pools is a valid outcome: the record is persisted with
/// zeroed figures and pool_count=0 so "no market" stays distinguishable
/// from "not yet processed".
pub fn compute_market_record(
    token: &TokenMeta,
    pools: &[PoolSnapshot],
    reference: &ReferenceContext,
) -> MarketRecord {
    let now = Utc::now().timestamp();
    let key = address_key(&token.address);

    let Some(main) = select_main_pool(pools) else {
        return MarketRecord {
            address: key,
            price_usd: 0.0,
            liquidity_usd: 0.0,
            volume_24h: 0.0,
            market_cap: 0.0,
            pool_count: 0,
            main_pool: String::new(),
            main_dex: String::new(),
            priority: false,
            updated_at: now,
        };
    };

    let token_is_token0 = main.token0 == token.address;
    let price_in_ref = pool_price_in_reference(main, token.decimals, reference.decimals, token_is_token0);
    let price_usd = price_in_ref * reference.usd_price;

    let liquidity_usd = pool_liquidity_usd(
        main,
        token.decimals,
        reference.decimals,
        token_is_token0,
        price_usd,
        reference.usd_price,
    );

    let market_cap = normalize_units(token.total_supply, token.decimals) * price_usd;

    MarketRecord {
        address: key,
        price_usd,
        liquidity_usd,
        volume_24h: 0.0,
        market_cap,
        pool_count: pools.len() as u32,
        main_pool: address_key(&main.address),
        main_dex: main.dex.clone(),
        priority: false,
        updated_at: now,
    }
}

/// Price of the token denominated in the reference asset.
/// A missing price state (zeroed sqrt price) yields 0, never an error.
fn pool_price_in_reference(
    pool: &PoolSnapshot,
    token_decimals: u8,
    reference_decimals: u8,
    token_is_token0: bool,
) -> f64 {
    if pool.sqrt_price_x96.is_zero() {
        return 0.0;
    }

    if token_is_token0 {
        price_from_tick(pool.tick, token_decimals, reference_decimals)
    } else {
        let ref_in_token = price_from_tick(pool.tick, reference_decimals, token_decimals);
        if ref_in_token == 0.0 || !ref_in_token.is_finite() {
            0.0
        } else {
            1.0 / ref_in_token
        }
    }
}

/// Approximate USD value held by the pool.
///
/// Standard concentrated-liquidity approximation around the current tick:
/// amount1 ~ L * sqrtP, amount0 ~ L / sqrtP, each decimal-normalized and
/// valued at its side's USD price.
fn pool_liquidity_usd(
    pool: &PoolSnapshot,
    token_decimals: u8,
    reference_decimals: u8,
    token_is_token0: bool,
    token_usd: f64,
    reference_usd: f64,
) -> f64 {
    let liquidity = u256_to_f64(pool.liquidity);
    let sqrt_ratio = u256_to_f64(pool.sqrt_price_x96) / Q96;
    if liquidity == 0.0 || sqrt_ratio == 0.0 {
        return 0.0;
    }

    let amount0_raw = liquidity / sqrt_ratio;
    let amount1_raw = liquidity * sqrt_ratio;

    let (decimals0, decimals1, usd0, usd1) = if token_is_token0 {
        (token_decimals, reference_decimals, token_usd, reference_usd)
    } else {
        (reference_decimals, token_decimals, reference_usd, token_usd)
    };

    let value0 = amount0_raw / 10f64.powi(decimals0 as i32) * usd0;
    let value1 = amount1_raw / 10f64.powi(decimals1 as i32) * usd1;

    let total = value0 + value1;
    if total.is_finite() {
        total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::str::FromStr;

    fn reference() -> ReferenceContext {
        ReferenceContext {
            address: crate::tokens::WETH,
            decimals: 18,
            usd_price: 1900.0,
        }
    }

    fn snapshot(liquidity: &str, tick: i32) -> PoolSnapshot {
        PoolSnapshot {
            address: address!("3333333333333333333333333333333333333333"),
            token0: crate::tokens::WETH,
            token1: crate::tokens::USDC,
            fee: 500,
            liquidity: U256::from_str(liquidity).unwrap(),
            sqrt_price_x96: U256::from(1u8) << 96,
            tick,
            dex: "uniswap_v3".to_string(),
        }
    }

    #[test]
    fn test_direct_and_log_forms_agree() {
        for tick in [-1000, -777, -1, 0, 1, 500, 1000] {
            let direct = TICK_BASE.powi(tick) * 10f64.powi(12);
            let log_form = (tick as f64 * TICK_BASE.ln()).exp() * 10f64.powi(12);
            let rel = ((direct - log_form) / direct).abs();
            assert!(rel < 1e-9, "tick {} diverged: rel={}", tick, rel);
        }
    }

    #[test]
    fn test_large_ticks_stay_finite() {
        let up = price_from_tick(200_000, 18, 18);
        let down = price_from_tick(-200_000, 18, 18);
        assert!(up.is_finite() && up > 0.0);
        assert!(down.is_finite() && down > 0.0);
    }

    #[test]
    fn test_calibration_point() {
        // WETH/USDC style pair: tick -200768 on 18/6 decimals ~ $1911
        let price = price_from_tick(-200_768, 18, 6);
        let rel = (price - 1911.0).abs() / 1911.0;
        assert!(rel < 0.01, "calibration off: got {}", price);
    }

    #[test]
    fn test_main_pool_selected_by_integer_liquidity() {
        let small = snapshot("100", 0);
        let mut big = snapshot("500000", 0);
        big.address = address!("4444444444444444444444444444444444444444");

        let pools = vec![small, big.clone()];
        let main = select_main_pool(&pools).unwrap();
        assert_eq!(main.address, big.address);

        // Order independence
        let pools_rev: Vec<_> = pools.into_iter().rev().collect();
        assert_eq!(select_main_pool(&pools_rev).unwrap().address, big.address);
    }

    #[test]
    fn test_zero_pools_yield_zeroed_record() {
        let token = TokenMeta {
            address: address!("5555555555555555555555555555555555555555"),
            decimals: 18,
            total_supply: U256::from(10u64).pow(U256::from(27u64)),
        };

        let record = compute_market_record(&token, &[], &reference());
        assert_eq!(record.pool_count, 0);
        assert_eq!(record.price_usd, 0.0);
        assert_eq!(record.liquidity_usd, 0.0);
        assert_eq!(record.market_cap, 0.0);
        assert!(record.main_pool.is_empty());
    }

    #[test]
    fn test_record_for_token1_side_inverts_price() {
        // Pool is WETH/USDC, enrich USDC: reference is token0 here
        let token = TokenMeta {
            address: crate::tokens::USDC,
            decimals: 6,
            total_supply: U256::from(25_000_000_000_000u64), // 25M USDC raw
        };
        let reference = ReferenceContext {
            address: crate::tokens::WETH,
            decimals: 18,
            usd_price: 1906.0,
        };

        let pool = snapshot("778900000000000000", -200_768);
        let record = compute_market_record(&token, &[pool], &reference);

        // 1 WETH = ~1906 USDC at this tick, so USDC ~ $1
        assert!((record.price_usd - 1.0).abs() < 0.01, "got {}", record.price_usd);
        assert_eq!(record.pool_count, 1);
        // 25M supply at ~$1
        assert!((record.market_cap - 25_000_000.0).abs() / 25_000_000.0 < 0.02);
    }

    #[test]
    fn test_normalize_units_beyond_f64_integer_range() {
        // 10^30 raw with 18 decimals = 10^12 tokens
        let raw = U256::from(10u64).pow(U256::from(30u64));
        let normalized = normalize_units(raw, 18);
        assert!((normalized - 1e12).abs() / 1e12 < 1e-9);
    }

    #[test]
    fn test_missing_price_state_yields_zero() {
        let token = TokenMeta {
            address: crate::tokens::WETH,
            decimals: 18,
            total_supply: U256::ZERO,
        };
        let mut pool = snapshot("1000", 0);
        pool.sqrt_price_x96 = U256::ZERO;

        let record = compute_market_record(&token, &[pool], &reference());
        assert_eq!(record.price_usd, 0.0);
        assert_eq!(record.liquidity_usd, 0.0);
        assert_eq!(record.pool_count, 1);
    }
}
