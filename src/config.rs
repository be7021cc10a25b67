//! Runtime configuration for Poolwatch.
//!
//! Loaded from environment variables (with .env support) or a TOML file,
//! validated once at startup.

use alloy_primitives::Address;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::tokens;

/// Main configuration struct for Poolwatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Network Settings ==========
    /// Primary RPC URL (Alchemy/Infura recommended)
    pub rpc_url: String,

    /// Chain ID (1 = Ethereum Mainnet)
    pub chain_id: u64,

    // ========== Persistence ==========
    /// SQLite database path
    pub db_path: String,

    // ========== Batching ==========
    /// Maximum calls folded into one aggregate3 request
    pub multicall_max_calls: usize,

    /// Pause between aggregated chunks (milliseconds)
    pub multicall_chunk_delay_ms: u64,

    /// Tokens per discovery/enrichment batch
    pub pool_batch_size: usize,

    /// Concurrent enrichment batches per wave
    pub max_concurrent_batches: usize,

    /// Cool-down between enrichment waves (milliseconds)
    pub batch_cooldown_ms: u64,

    // ========== Pool Discovery ==========
    /// Pool registry (factory) consulted by getPool lookups
    pub factory_address: String,

    /// Label persisted as the authoritative pool's DEX
    pub dex_label: String,

    /// Reference asset every token is priced against
    pub reference_token: String,

    /// Reference asset decimal precision
    pub reference_decimals: u8,

    // ========== Reference Price Oracle ==========
    /// The one authoritative pool the oracle reads
    pub reference_pool: String,

    /// Decimals of the reference pool's quote (USD) side
    pub reference_quote_decimals: u8,

    /// Oracle cache time-to-live (seconds)
    pub reference_price_ttl_secs: u64,

    /// Emergency price used when the first-ever pool read fails
    pub reference_fallback_price: f64,

    // ========== Token Registry Discovery ==========
    /// Registry contracts whose creation events are scanned
    pub registry_addresses: Vec<String>,

    /// Trailing block window scanned per discovery pass
    pub discovery_window_blocks: u64,

    // ========== External Price API ==========
    /// Batch quote endpoint
    pub price_api_url: String,

    /// Optional API key
    pub price_api_key: Option<String>,

    /// Per-minute call quota enforced upstream
    pub price_api_quota_per_min: u32,

    /// Token addresses per quote call
    pub tokens_per_call: usize,

    /// Budget headroom the rotation pass must leave untouched
    pub budget_safety_margin: u32,

    // ========== Scheduling ==========
    /// Priority list size (top-N by market cap)
    pub priority_size: usize,

    /// Discovery + on-chain enrichment interval (seconds)
    pub discovery_interval_secs: u64,

    /// Full ranking interval (seconds)
    pub ranking_interval_secs: u64,

    /// Priority refresh interval (seconds)
    pub priority_refresh_secs: u64,

    /// Non-priority rotation interval (seconds)
    pub rotation_refresh_secs: u64,
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Ok(Self {
            rpc_url: env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            chain_id: parse_env("CHAIN_ID", defaults.chain_id),
            db_path: env::var("DB_PATH").unwrap_or(defaults.db_path),

            multicall_max_calls: parse_env("MULTICALL_MAX_CALLS", defaults.multicall_max_calls),
            multicall_chunk_delay_ms: parse_env(
                "MULTICALL_CHUNK_DELAY_MS",
                defaults.multicall_chunk_delay_ms,
            ),
            pool_batch_size: parse_env("POOL_BATCH_SIZE", defaults.pool_batch_size),
            max_concurrent_batches: parse_env(
                "MAX_CONCURRENT_BATCHES",
                defaults.max_concurrent_batches,
            ),
            batch_cooldown_ms: parse_env("BATCH_COOLDOWN_MS", defaults.batch_cooldown_ms),

            factory_address: env::var("FACTORY_ADDRESS").unwrap_or(defaults.factory_address),
            dex_label: env::var("DEX_LABEL").unwrap_or(defaults.dex_label),
            reference_token: env::var("REFERENCE_TOKEN").unwrap_or(defaults.reference_token),
            reference_decimals: parse_env("REFERENCE_DECIMALS", defaults.reference_decimals),

            reference_pool: env::var("REFERENCE_POOL").unwrap_or(defaults.reference_pool),
            reference_quote_decimals: parse_env(
                "REFERENCE_QUOTE_DECIMALS",
                defaults.reference_quote_decimals,
            ),
            reference_price_ttl_secs: parse_env(
                "REFERENCE_PRICE_TTL_SECS",
                defaults.reference_price_ttl_secs,
            ),
            reference_fallback_price: parse_env(
                "REFERENCE_FALLBACK_PRICE",
                defaults.reference_fallback_price,
            ),

            registry_addresses: env::var("REGISTRY_ADDRESSES")
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.registry_addresses),
            discovery_window_blocks: parse_env(
                "DISCOVERY_WINDOW_BLOCKS",
                defaults.discovery_window_blocks,
            ),

            price_api_url: env::var("PRICE_API_URL").unwrap_or(defaults.price_api_url),
            price_api_key: env::var("PRICE_API_KEY").ok(),
            price_api_quota_per_min: parse_env(
                "PRICE_API_QUOTA_PER_MIN",
                defaults.price_api_quota_per_min,
            ),
            tokens_per_call: parse_env("TOKENS_PER_CALL", defaults.tokens_per_call),
            budget_safety_margin: parse_env("BUDGET_SAFETY_MARGIN", defaults.budget_safety_margin),

            priority_size: parse_env("PRIORITY_SIZE", defaults.priority_size),
            discovery_interval_secs: parse_env(
                "DISCOVERY_INTERVAL_SECS",
                defaults.discovery_interval_secs,
            ),
            ranking_interval_secs: parse_env(
                "RANKING_INTERVAL_SECS",
                defaults.ranking_interval_secs,
            ),
            priority_refresh_secs: parse_env(
                "PRIORITY_REFRESH_SECS",
                defaults.priority_refresh_secs,
            ),
            rotation_refresh_secs: parse_env(
                "ROTATION_REFRESH_SECS",
                defaults.rotation_refresh_secs,
            ),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration before startup
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre::eyre!(
                "Invalid RPC_URL - please set a valid Alchemy/Infura URL"
            ));
        }

        self.factory()?;
        self.reference()?;
        self.reference_pool()?;
        self.registries()?;

        if self.pool_batch_size == 0 {
            return Err(eyre::eyre!("POOL_BATCH_SIZE must be at least 1"));
        }
        if self.tokens_per_call == 0 {
            return Err(eyre::eyre!("TOKENS_PER_CALL must be at least 1"));
        }
        if self.priority_size == 0 {
            return Err(eyre::eyre!("PRIORITY_SIZE must be at least 1"));
        }
        if self.price_api_quota_per_min <= self.budget_safety_margin {
            return Err(eyre::eyre!(
                "PRICE_API_QUOTA_PER_MIN ({}) must exceed BUDGET_SAFETY_MARGIN ({})",
                self.price_api_quota_per_min,
                self.budget_safety_margin
            ));
        }
        if self.reference_fallback_price <= 0.0 {
            return Err(eyre::eyre!("REFERENCE_FALLBACK_PRICE must be positive"));
        }

        Ok(())
    }

    pub fn factory(&self) -> Result<Address> {
        parse_address(&self.factory_address, "FACTORY_ADDRESS")
    }

    pub fn reference(&self) -> Result<Address> {
        parse_address(&self.reference_token, "REFERENCE_TOKEN")
    }

    pub fn reference_pool(&self) -> Result<Address> {
        parse_address(&self.reference_pool, "REFERENCE_POOL")
    }

    pub fn registries(&self) -> Result<Vec<Address>> {
        self.registry_addresses
            .iter()
            .map(|s| parse_address(s, "REGISTRY_ADDRESSES"))
            .collect()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║                POOLWATCH - CONFIGURATION                   ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Chain ID:          {:^40} ║", self.chain_id);
        println!("║ Database:          {:^40} ║", self.db_path);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ BATCHING                                                   ║");
        println!("║ • Calls/Chunk:     {:^40} ║", self.multicall_max_calls);
        println!("║ • Tokens/Batch:    {:^40} ║", self.pool_batch_size);
        println!("║ • Fan-out:         {:^40} ║", self.max_concurrent_batches);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ REFRESH BUDGET                                             ║");
        println!("║ • Quota/min:       {:^40} ║", self.price_api_quota_per_min);
        println!("║ • Safety Margin:   {:^40} ║", self.budget_safety_margin);
        println!("║ • Priority Size:   {:^40} ║", self.priority_size);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ INTERVALS (s)                                              ║");
        println!("║ • Discovery:       {:^40} ║", self.discovery_interval_secs);
        println!("║ • Ranking:         {:^40} ║", self.ranking_interval_secs);
        println!("║ • Priority:        {:^40} ║", self.priority_refresh_secs);
        println!("║ • Rotation:        {:^40} ║", self.rotation_refresh_secs);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ ORACLE                                                     ║");
        println!("║ • TTL (s):         {:^40} ║", self.reference_price_ttl_secs);
        println!("║ • Fallback:        {:^40.2} ║", self.reference_fallback_price);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ REGISTRIES                                                 ║");
        println!("║ • Scanned:         {:^40} ║", self.registry_addresses.len());
        println!("║ • Window (blocks): {:^40} ║", self.discovery_window_blocks);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth.llamarpc.com".to_string(),
            chain_id: 1,
            db_path: "./poolwatch.db".to_string(),
            multicall_max_calls: 2000,
            multicall_chunk_delay_ms: 250,
            pool_batch_size: 30,
            max_concurrent_batches: 3,
            batch_cooldown_ms: 500,
            factory_address: format!("{:?}", tokens::UNISWAP_V3_FACTORY),
            dex_label: "uniswap_v3".to_string(),
            reference_token: format!("{:?}", tokens::WETH),
            reference_decimals: 18,
            reference_pool: format!("{:?}", tokens::REFERENCE_POOL),
            reference_quote_decimals: 6,
            reference_price_ttl_secs: 900,
            reference_fallback_price: 1911.0,
            registry_addresses: vec![],
            discovery_window_blocks: 5000,
            price_api_url: "https://api.dexscreener.com/latest/dex/tokens".to_string(),
            price_api_key: None,
            price_api_quota_per_min: 30,
            tokens_per_call: 30,
            budget_safety_margin: 2,
            priority_size: 10,
            discovery_interval_secs: 300,
            ranking_interval_secs: 3600,
            priority_refresh_secs: 60,
            rotation_refresh_secs: 120,
        }
    }
}

fn parse_env<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_address(value: &str, field: &str) -> Result<Address> {
    Address::from_str(value).map_err(|_| eyre::eyre!("{} is not a valid address: {}", field, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.priority_size, 10);
        assert_eq!(config.pool_batch_size, 30);
        assert_eq!(config.reference_fallback_price, 1911.0);
    }

    #[test]
    fn test_validation_rejects_inverted_budget() {
        let mut config = Config::default();
        config.budget_safety_margin = config.price_api_quota_per_min;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_addresses() {
        let mut config = Config::default();
        config.factory_address = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.registry_addresses = vec!["0x1234".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_address_accessors() {
        let config = Config::default();
        assert_eq!(config.factory().unwrap(), tokens::UNISWAP_V3_FACTORY);
        assert_eq!(config.reference().unwrap(), tokens::WETH);
        assert_eq!(config.reference_pool().unwrap(), tokens::REFERENCE_POOL);
        assert!(config.registries().unwrap().is_empty());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.rpc_url, config.rpc_url);
        assert_eq!(parsed.priority_size, config.priority_size);
        assert_eq!(parsed.registry_addresses, config.registry_addresses);
    }
}
