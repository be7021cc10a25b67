//! Well-known token addresses and decimal precision lookups.
//!
//! Newly discovered tokens carry their own decimals from the registry event
//! (or the ERC-20 backfill); this table only covers the handful of anchor
//! assets the pipeline references directly.

use alloy_primitives::{address, Address};

/// Wrapped native asset - the pricing intermediary for every tracked token
pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

/// USDC (6 decimals) - quote side of the authoritative reference pool
pub const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// Uniswap V3 factory (Ethereum Mainnet)
pub const UNISWAP_V3_FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");

/// USDC/WETH 0.05% - the authoritative reference-asset pool
pub const REFERENCE_POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

/// Fee tiers probed during pool discovery (parts per million)
pub const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10_000];

/// Decimals assumed when a token's metadata read fails
pub const DEFAULT_DECIMALS: u8 = 18;

/// Decimal precision for the anchor assets; everything else defaults to 18
pub fn known_decimals(address: &Address) -> u8 {
    let a = format!("{:?}", address).to_lowercase();

    // 6 decimals (stablecoins)
    if a.contains("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")  // USDC
        || a.contains("dac17f958d2ee523a2206206994597c13d831ec7")  // USDT
    {
        return 6;
    }

    // 8 decimals
    if a.contains("2260fac5e5542a773aa44fbcfedf7c193bc2c599") {
        // WBTC
        return 8;
    }

    DEFAULT_DECIMALS
}

/// Lower-cased hex string form used as the persistence key
pub fn address_key(address: &Address) -> String {
    format!("{:?}", address).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_decimals() {
        assert_eq!(known_decimals(&USDC), 6);
        assert_eq!(known_decimals(&WETH), 18);

        let random = address!("1111111111111111111111111111111111111111");
        assert_eq!(known_decimals(&random), DEFAULT_DECIMALS);
    }

    #[test]
    fn test_address_key_is_lowercase() {
        let key = address_key(&WETH);
        assert_eq!(key, key.to_lowercase());
        assert!(key.starts_with("0x"));
        assert_eq!(key.len(), 42);
    }
}
