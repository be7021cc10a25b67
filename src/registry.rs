//! New-token discovery from registry creation events.
//!
//! Scans a bounded trailing block window across every configured registry
//! address each pass. Tokens created during a downtime gap longer than the
//! window are missed; the window is never widened at runtime.

use alloy_primitives::Address;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::Filter;
use alloy_sol_types::{sol, SolCall, SolEvent};
use eyre::Result;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::multicall::{BatchCall, Multicall};
use crate::store::TokenRow;
use crate::tokens::{address_key, known_decimals};

sol! {
    /// Creation event emitted by the token registry
    event TokenCreated(
        address token,
        uint256 nonce,
        address deployer,
        string name,
        string symbol,
        uint256 totalSupply,
        uint256 launchTime,
        uint256 launchFee
    );

    interface IERC20Metadata {
        function decimals() external view returns (uint8);
    }
}

pub struct RegistryScanner {
    rpc_url: String,
    registries: Vec<Address>,
    window_blocks: u64,
}

impl RegistryScanner {
    pub fn new(rpc_url: String, registries: Vec<Address>, window_blocks: u64) -> Self {
        Self {
            rpc_url,
            registries,
            window_blocks,
        }
    }

    /// Scan the trailing window for creation events and return the decoded
    /// token rows, decimals backfilled from chain where readable.
    pub async fn scan(&self, multicall: &Multicall) -> Result<Vec<TokenRow>> {
        if self.registries.is_empty() {
            debug!("no registries configured, skipping discovery scan");
            return Ok(Vec::new());
        }

        let provider = ProviderBuilder::new().connect_http(self.rpc_url.parse()?);
        let head = provider.get_block_number().await?;
        let from = head.saturating_sub(self.window_blocks);

        let filter = Filter::new()
            .address(self.registries.clone())
            .event_signature(TokenCreated::SIGNATURE_HASH)
            .from_block(from)
            .to_block(head);

        let logs = provider.get_logs(&filter).await?;
        debug!(
            "registry scan: blocks {}..{}, {} creation logs",
            from,
            head,
            logs.len()
        );

        let mut rows: Vec<TokenRow> = Vec::with_capacity(logs.len());
        for log in &logs {
            let event = match TokenCreated::decode_log_data(log.data()) {
                Ok(event) => event,
                Err(e) => {
                    // Malformed payload: drop the item, keep the batch
                    warn!("undecodable creation event from {:?}: {}", log.address(), e);
                    continue;
                }
            };

            rows.push(TokenRow {
                address: address_key(&event.token),
                name: event.name.clone(),
                symbol: event.symbol.clone(),
                decimals: known_decimals(&event.token),
                total_supply: event.totalSupply.to_string(),
                factory: address_key(&log.address()),
                deployer: address_key(&event.deployer),
                created_at: u128::try_from(event.launchTime)
                    .ok()
                    .and_then(|v| i64::try_from(v).ok())
                    .unwrap_or(0),
            });
        }

        // Last creation wins when the same token shows up twice in-window
        let mut by_address: HashMap<String, TokenRow> = HashMap::with_capacity(rows.len());
        for row in rows {
            by_address.insert(row.address.clone(), row);
        }
        let mut unique: Vec<TokenRow> = by_address.into_values().collect();

        self.backfill_decimals(multicall, &mut unique).await;

        if !unique.is_empty() {
            info!("discovered {} new token(s) in trailing window", unique.len());
        }
        Ok(unique)
    }

    /// Read decimals() for each token; a failed read keeps the default.
    async fn backfill_decimals(&self, multicall: &Multicall, rows: &mut [TokenRow]) {
        if rows.is_empty() {
            return;
        }

        let calls: Vec<BatchCall> = rows
            .iter()
            .filter_map(|row| {
                let address: Address = row.address.parse().ok()?;
                Some(BatchCall::new(
                    address,
                    IERC20Metadata::decimalsCall {}.abi_encode(),
                ))
            })
            .collect();

        let results = match multicall.execute(calls).await {
            Ok(results) => results,
            Err(e) => {
                warn!("decimals backfill batch failed, keeping defaults: {:#}", e);
                return;
            }
        };

        for (row, result) in rows.iter_mut().zip(results.iter()) {
            if let Some(decimals) = result.decode::<IERC20Metadata::decimalsCall>() {
                row.decimals = decimals;
            }
        }
    }
}
