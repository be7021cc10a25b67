//! Multicall3 batch encoder/decoder.
//!
//! Collapses many independent read-only contract calls into one or more
//! aggregate3 round trips. The module is stateless: callers keep their own
//! index-to-entity mapping (a parallel `call_map` vector) and decode each
//! returned payload with the matching `SolCall::abi_decode_returns`.
//!
//! A failed individual call never aborts its batch - only a transport-level
//! failure (the whole aggregated call rejected) escalates to the caller.

use alloy_primitives::{address, Address, Bytes};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{sol, SolCall};
use eyre::{eyre, Result};
use std::time::Duration;
use tracing::{debug, trace};

sol! {
    /// Multicall3 - deployed at same address on all EVM chains
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
}

/// Multicall3 address (same on all EVM chains)
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// One read-only call within a batch
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub target: Address,
    pub calldata: Bytes,
    pub allow_failure: bool,
}

impl BatchCall {
    pub fn new(target: Address, calldata: Vec<u8>) -> Self {
        Self {
            target,
            calldata: calldata.into(),
            allow_failure: true,
        }
    }
}

/// Outcome of one call within a batch, in input order
#[derive(Debug, Clone)]
pub struct CallResult {
    pub success: bool,
    pub data: Bytes,
}

impl CallResult {
    /// Decode the return payload with the matching call type.
    /// `None` signals an individual-call failure or an undecodable payload.
    pub fn decode<C: SolCall>(&self) -> Option<C::Return> {
        if !self.success {
            return None;
        }
        C::abi_decode_returns(&self.data).ok()
    }
}

/// Batched read executor with chunking and inter-chunk throttling
pub struct Multicall {
    rpc_url: String,
    max_calls_per_chunk: usize,
    chunk_delay: Duration,
}

impl Multicall {
    pub fn new(rpc_url: String, max_calls_per_chunk: usize, chunk_delay_ms: u64) -> Self {
        Self {
            rpc_url,
            max_calls_per_chunk: max_calls_per_chunk.max(1),
            chunk_delay: Duration::from_millis(chunk_delay_ms),
        }
    }

    /// Execute a batch, preserving input order across chunk boundaries.
    pub async fn execute(&self, calls: Vec<BatchCall>) -> Result<Vec<CallResult>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let total = calls.len();
        let chunks: Vec<&[BatchCall]> = calls.chunks(self.max_calls_per_chunk).collect();
        let chunk_count = chunks.len();

        let mut results = Vec::with_capacity(total);

        for (i, chunk) in chunks.into_iter().enumerate() {
            let decoded = self.execute_chunk(chunk).await?;
            if decoded.len() != chunk.len() {
                return Err(eyre!(
                    "aggregate3 returned {} results for {} calls",
                    decoded.len(),
                    chunk.len()
                ));
            }
            results.extend(decoded);

            // Fixed pause between chunks to avoid provider throttling
            if i + 1 < chunk_count && !self.chunk_delay.is_zero() {
                trace!("chunk {}/{} done, cooling down", i + 1, chunk_count);
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        debug!(
            "Multicall3: {} calls in {} aggregated request(s)",
            total, chunk_count
        );

        Ok(results)
    }

    async fn execute_chunk(&self, chunk: &[BatchCall]) -> Result<Vec<CallResult>> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.parse()?);

        let calls: Vec<IMulticall3::Call3> = chunk
            .iter()
            .map(|c| IMulticall3::Call3 {
                target: c.target,
                allowFailure: c.allow_failure,
                callData: c.calldata.clone(),
            })
            .collect();

        let calldata = IMulticall3::aggregate3Call { calls }.abi_encode();

        let tx = TransactionRequest::default()
            .to(MULTICALL3)
            .input(calldata.into());

        let raw = provider
            .call(tx)
            .await
            .map_err(|e| eyre!("Multicall3 failed: {}", e))?;

        let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&raw)
            .map_err(|e| eyre!("Failed to decode multicall result: {}", e))?;

        Ok(decoded
            .into_iter()
            .map(|r| CallResult {
                success: r.success,
                data: r.returnData,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    sol! {
        function liquidity() external view returns (uint128);
        function totalSupply() external view returns (uint256);
    }

    #[test]
    fn test_batch_preserves_order_on_encode() {
        let a = address!("1111111111111111111111111111111111111111");
        let b = address!("2222222222222222222222222222222222222222");

        let calls = vec![
            BatchCall::new(a, liquidityCall {}.abi_encode()),
            BatchCall::new(b, totalSupplyCall {}.abi_encode()),
        ];

        assert_eq!(calls[0].target, a);
        assert_eq!(calls[1].target, b);
        assert!(calls.iter().all(|c| c.allow_failure));
    }

    #[test]
    fn test_decode_success_and_failure_markers() {
        let supply = U256::from(1_000_000u64);
        let ok = CallResult {
            success: true,
            data: totalSupplyCall::abi_encode_returns(&supply).into(),
        };
        let failed = CallResult {
            success: false,
            data: Bytes::new(),
        };
        let garbage = CallResult {
            success: true,
            data: vec![0xde, 0xad].into(),
        };

        assert_eq!(ok.decode::<totalSupplyCall>(), Some(supply));
        // An individual failure decodes to None, it does not panic
        assert_eq!(failed.decode::<totalSupplyCall>(), None);
        assert_eq!(garbage.decode::<totalSupplyCall>(), None);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let mc = Multicall::new("http://localhost:8545".to_string(), 2000, 0);
        let results = mc.execute(Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }
}
