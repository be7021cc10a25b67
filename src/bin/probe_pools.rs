//! Pool Probe - one-shot discovery and pricing for a token list
//!
//! Run with: cargo run --bin probe-pools -- <token-address> [<token-address>...]
//!
//! Standalone diagnostic: probes every fee tier of the factory for each
//! token against WETH, reads the discovered pools' state, and prints the
//! tick-derived price of each pool. Useful for sanity-checking an RPC
//! endpoint and the factory configuration without touching the database.

use alloy_primitives::{address, Address, Uint};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{sol, SolCall};
use clap::Parser;
use eyre::{eyre, Result};
use std::time::Instant;

sol! {
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);
    }

    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee)
            external view returns (address pool);
    }

    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function liquidity() external view returns (uint128);
        function token0() external view returns (address);
    }
}

const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");
const FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10_000];

#[derive(Parser)]
#[command(name = "probe-pools", about = "Probe factory pools for a token list")]
struct Args {
    /// Token addresses to probe against WETH
    #[arg(required = true)]
    tokens: Vec<String>,

    /// RPC endpoint (defaults to $RPC_URL, then a public node)
    #[arg(long)]
    rpc_url: Option<String>,
}

async fn aggregate(rpc_url: &str, calls: Vec<IMulticall3::Call3>) -> Result<Vec<IMulticall3::Result>> {
    let provider = ProviderBuilder::new().connect_http(rpc_url.parse()?);
    let calldata = IMulticall3::aggregate3Call { calls }.abi_encode();
    let tx = TransactionRequest::default()
        .to(MULTICALL3)
        .input(calldata.into());
    let raw = provider
        .call(tx)
        .await
        .map_err(|e| eyre!("Multicall3 failed: {}", e))?;
    IMulticall3::aggregate3Call::abi_decode_returns(&raw)
        .map_err(|e| eyre!("Failed to decode multicall result: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let rpc_url = args
        .rpc_url
        .or_else(|| std::env::var("RPC_URL").ok())
        .unwrap_or_else(|| "https://eth.llamarpc.com".to_string());

    let tokens: Vec<Address> = args
        .tokens
        .iter()
        .map(|s| s.parse().map_err(|_| eyre!("invalid address: {}", s)))
        .collect::<Result<_>>()?;

    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                  POOLWATCH - POOL PROBE                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("📡 RPC: {}", rpc_url);
    println!("🔎 Probing {} token(s) x {} fee tiers x 2 orderings", tokens.len(), FEE_TIERS.len());
    println!();

    let start = Instant::now();

    // Batch 1: factory lookups for every (token, tier, ordering)
    let mut calls = Vec::new();
    let mut call_map = Vec::new();
    for token in &tokens {
        for fee in FEE_TIERS {
            for (a, b) in [(*token, WETH), (WETH, *token)] {
                calls.push(IMulticall3::Call3 {
                    target: FACTORY,
                    allowFailure: true,
                    callData: IUniswapV3Factory::getPoolCall {
                        tokenA: a,
                        tokenB: b,
                        fee: Uint::<24, 1>::from(fee),
                    }
                    .abi_encode()
                    .into(),
                });
                call_map.push((*token, fee));
            }
        }
    }

    let results = aggregate(&rpc_url, calls).await?;

    let mut pools: Vec<(Address, Address, u32)> = Vec::new(); // (pool, token, fee)
    for ((token, fee), result) in call_map.iter().zip(results.iter()) {
        if !result.success {
            continue;
        }
        if let Ok(pool) = IUniswapV3Factory::getPoolCall::abi_decode_returns(&result.returnData) {
            if pool != Address::ZERO && !pools.iter().any(|(p, _, _)| *p == pool) {
                pools.push((pool, *token, *fee));
            }
        }
    }

    if pools.is_empty() {
        println!("No pools found for any token/tier combination.");
        return Ok(());
    }

    // Batch 2: slot0 + liquidity + token0 per discovered pool
    let mut state_calls = Vec::new();
    for (pool, _, _) in &pools {
        state_calls.push(IMulticall3::Call3 {
            target: *pool,
            allowFailure: true,
            callData: IUniswapV3Pool::slot0Call {}.abi_encode().into(),
        });
        state_calls.push(IMulticall3::Call3 {
            target: *pool,
            allowFailure: true,
            callData: IUniswapV3Pool::liquidityCall {}.abi_encode().into(),
        });
        state_calls.push(IMulticall3::Call3 {
            target: *pool,
            allowFailure: true,
            callData: IUniswapV3Pool::token0Call {}.abi_encode().into(),
        });
    }

    let state_results = aggregate(&rpc_url, state_calls).await?;

    println!("{:<44} {:>7} {:>14} {:>12}", "POOL", "FEE", "LIQUIDITY", "TICK PRICE");
    println!("{}", "─".repeat(80));

    for (i, (pool, token, fee)) in pools.iter().enumerate() {
        let offset = i * 3;
        let slot0 = state_results[offset]
            .success
            .then(|| IUniswapV3Pool::slot0Call::abi_decode_returns(&state_results[offset].returnData).ok())
            .flatten();
        let liquidity = state_results[offset + 1]
            .success
            .then(|| {
                IUniswapV3Pool::liquidityCall::abi_decode_returns(&state_results[offset + 1].returnData)
                    .ok()
            })
            .flatten();
        let token0 = state_results[offset + 2]
            .success
            .then(|| {
                IUniswapV3Pool::token0Call::abi_decode_returns(&state_results[offset + 2].returnData)
                    .ok()
            })
            .flatten();

        let (Some(slot0), Some(liquidity), Some(token0)) = (slot0, liquidity, token0) else {
            println!("{:<44} {:>7} {:>14}", format!("{:?}", pool), fee, "unreadable");
            continue;
        };

        // Price of the probed token in WETH, assuming 18/18 decimals;
        // this is a diagnostic, not the pipeline's decimal-aware math
        let tick = slot0.tick.as_i32();
        let ratio = (tick as f64 * 1.0001f64.ln()).exp();
        let price = if token0 == *token { ratio } else { 1.0 / ratio };

        println!(
            "{:<44} {:>7} {:>14} {:>12.6e}",
            format!("{:?}", pool),
            fee,
            liquidity,
            price
        );
    }

    println!();
    println!("✓ {} pool(s) probed in {:?}", pools.len(), start.elapsed());

    Ok(())
}
