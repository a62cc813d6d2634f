//! On-win redemption of conditional tokens.
//!
//! The core only needs a capability: hand a conditionId to something that
//! turns winning outcome tokens back into USDC. [`CtfRedeemer`] does it
//! natively (`redeemPositions` calldata, EIP-155 signing, raw broadcast)
//! and [`NoopRedeemer`] backs dry-run. A single-consumer worker serializes
//! redemptions off the reconciler's task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::eip712::{self, keccak256};
use super::polygon_tx::{sign_legacy_tx, LegacyTx, RpcClient, TxError};

/// Conditional Tokens Framework contract on Polygon.
const CTF_CONTRACT: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";

/// Neg-risk adapter handles redemption for neg-risk markets.
const NEG_RISK_ADAPTER: &str = "0xd91E80cF2E7be2e162c6513ceD06f1dD0dA35296";

/// USDC collateral on Polygon.
const USDC_CONTRACT: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// Gas allowance for a redemption call.
const REDEEM_GAS_LIMIT: u64 = 300_000;

/// Hard timeout on one redemption attempt.
const REDEEM_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a redemption attempt.
#[derive(Debug, Clone)]
pub struct RedeemOutcome {
    /// `SUCCESS`, `DRY_RUN`, `TIMEOUT`, or `ERROR`.
    pub status: String,
    /// Broadcast transaction hash, when one was sent.
    pub tx_hash: String,
    /// Human-readable detail.
    pub message: String,
}

impl RedeemOutcome {
    /// Whether the redemption transaction went out.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "SUCCESS"
    }
}

/// Redemption capability.
#[async_trait]
pub trait Redeemer: Send + Sync {
    /// Redeems all positions for a resolved condition.
    async fn redeem(&self, condition_id: &str, neg_risk: bool) -> RedeemOutcome;
}

// =============================================================================
// No-op implementation (dry-run)
// =============================================================================

/// Dry-run redeemer: logs and reports `DRY_RUN`.
#[derive(Debug, Default)]
pub struct NoopRedeemer;

#[async_trait]
impl Redeemer for NoopRedeemer {
    async fn redeem(&self, condition_id: &str, _neg_risk: bool) -> RedeemOutcome {
        info!(condition_id = %short_id(condition_id), "[DRY-RUN] redeem skipped");
        RedeemOutcome {
            status: "DRY_RUN".to_string(),
            tx_hash: String::new(),
            message: "dry run mode - redeem skipped".to_string(),
        }
    }
}

// =============================================================================
// On-chain implementation
// =============================================================================

/// Redeems directly against the CTF contract from the signer EOA.
pub struct CtfRedeemer {
    rpc: RpcClient,
    private_key: SecretString,
    sender: String,
    chain_id: u64,
}

impl CtfRedeemer {
    /// Creates a redeemer for Polygon mainnet.
    ///
    /// # Errors
    /// Returns an error when the private key is malformed.
    pub fn new(rpc_url: &str, private_key: &str) -> Result<Self, TxError> {
        let sender = eip712::derive_address(private_key)
            .map_err(|e| TxError::InvalidKey(e.to_string()))?;
        Ok(Self {
            rpc: RpcClient::new(rpc_url, Duration::from_secs(5)),
            private_key: SecretString::from(private_key.to_string()),
            sender,
            chain_id: eip712::POLYGON_CHAIN_ID,
        })
    }

    /// ABI calldata for `redeemPositions(address,bytes32,bytes32,uint256[])`
    /// with the binary index sets `[1, 2]`.
    fn redeem_calldata(condition_id: &str) -> Result<Vec<u8>, TxError> {
        let selector = &keccak256(b"redeemPositions(address,bytes32,bytes32,uint256[])")[..4];

        let condition_hex = condition_id.strip_prefix("0x").unwrap_or(condition_id);
        let condition_bytes = hex::decode(condition_hex)
            .map_err(|e| TxError::Rpc(format!("bad conditionId: {e}")))?;
        if condition_bytes.len() != 32 {
            return Err(TxError::Rpc(format!(
                "conditionId must be 32 bytes, got {}",
                condition_bytes.len()
            )));
        }

        let usdc = eip712::parse_address(USDC_CONTRACT)
            .map_err(|e| TxError::Rpc(e.to_string()))?;

        let mut data = Vec::with_capacity(4 + 8 * 32);
        data.extend_from_slice(selector);
        // collateralToken
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&usdc);
        data.extend_from_slice(&word);
        // parentCollectionId = bytes32(0)
        data.extend_from_slice(&[0u8; 32]);
        // conditionId
        data.extend_from_slice(&condition_bytes);
        // offset to the uint256[] (4 head words * 32)
        data.extend_from_slice(&u64_word(128));
        // array length 2, then index sets 1 and 2
        data.extend_from_slice(&u64_word(2));
        data.extend_from_slice(&u64_word(1));
        data.extend_from_slice(&u64_word(2));
        Ok(data)
    }

    async fn redeem_inner(&self, condition_id: &str, neg_risk: bool) -> Result<String, TxError> {
        let target = if neg_risk { NEG_RISK_ADAPTER } else { CTF_CONTRACT };
        let to = eip712::parse_address(target).map_err(|e| TxError::Rpc(e.to_string()))?;

        let nonce = self.rpc.transaction_count(&self.sender).await?;
        // 20% headroom over the quoted gas price.
        let gas_price = self.rpc.gas_price().await?.saturating_mul(12) / 10;

        let tx = LegacyTx {
            nonce,
            gas_price,
            gas_limit: REDEEM_GAS_LIMIT,
            to,
            value: [0u8; 32],
            data: Self::redeem_calldata(condition_id)?,
        };

        let signed = sign_legacy_tx(&tx, self.chain_id, self.private_key.expose_secret())?;
        self.rpc.send_raw_transaction(&signed).await
    }
}

#[async_trait]
impl Redeemer for CtfRedeemer {
    async fn redeem(&self, condition_id: &str, neg_risk: bool) -> RedeemOutcome {
        if condition_id.is_empty() || condition_id == "unknown" {
            return RedeemOutcome {
                status: "ERROR".to_string(),
                tx_hash: String::new(),
                message: "no conditionId available".to_string(),
            };
        }

        info!(condition_id = %short_id(condition_id), neg_risk, "Redeeming positions");

        match tokio::time::timeout(REDEEM_TIMEOUT, self.redeem_inner(condition_id, neg_risk)).await
        {
            Ok(Ok(tx_hash)) => {
                info!(tx_hash = %tx_hash, "Redeem transaction broadcast");
                RedeemOutcome {
                    status: "SUCCESS".to_string(),
                    tx_hash,
                    message: String::new(),
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Redeem failed");
                RedeemOutcome {
                    status: "ERROR".to_string(),
                    tx_hash: String::new(),
                    message: e.to_string(),
                }
            }
            Err(_) => {
                warn!("Redeem timed out (30s)");
                RedeemOutcome {
                    status: "TIMEOUT".to_string(),
                    tx_hash: String::new(),
                    message: "redeem timed out".to_string(),
                }
            }
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// One queued redemption.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub condition_id: String,
    pub neg_risk: bool,
}

/// Single-consumer redemption worker.
///
/// The reconciler enqueues and moves on; failures only show up in logs and
/// in the balance, which reflects whatever actually arrives on-chain.
pub struct RedeemWorker {
    tx: mpsc::Sender<RedeemRequest>,
}

impl RedeemWorker {
    /// Spawns the worker task; returns the enqueue handle.
    #[must_use]
    pub fn spawn(redeemer: Arc<dyn Redeemer>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RedeemRequest>(32);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let outcome = redeemer.redeem(&request.condition_id, request.neg_risk).await;
                if !outcome.is_success() && outcome.status != "DRY_RUN" {
                    warn!(
                        condition_id = %short_id(&request.condition_id),
                        status = %outcome.status,
                        message = %outcome.message,
                        "Redemption did not complete"
                    );
                }
            }
        });
        Self { tx }
    }

    /// Queues a redemption; drops it (with a log) when the queue is full.
    pub fn enqueue(&self, condition_id: &str, neg_risk: bool) {
        let request = RedeemRequest {
            condition_id: condition_id.to_string(),
            neg_risk,
        };
        if let Err(e) = self.tx.try_send(request) {
            warn!(error = %e, "Redeem queue full, dropping request");
        }
    }
}

fn u64_word(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

fn short_id(id: &str) -> &str {
    if id.len() > 10 {
        &id[..10]
    } else {
        id
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn noop_redeemer_reports_dry_run() {
        let outcome = NoopRedeemer.redeem("0xabc", false).await;
        assert_eq!(outcome.status, "DRY_RUN");
        assert!(!outcome.is_success());
    }

    #[test]
    fn calldata_layout() {
        let condition = format!("0x{}", "11".repeat(32));
        let data = CtfRedeemer::redeem_calldata(&condition).unwrap();
        // 4-byte selector + 7 words.
        assert_eq!(data.len(), 4 + 7 * 32);
        // Collateral word carries the USDC address right-aligned.
        let usdc = eip712::parse_address(USDC_CONTRACT).unwrap();
        assert_eq!(&data[4 + 12..4 + 32], usdc.as_slice());
        // Last two words are the index sets 1 and 2.
        assert_eq!(data[data.len() - 33], 1);
        assert_eq!(data[data.len() - 1], 2);
    }

    #[test]
    fn calldata_rejects_short_condition_id() {
        assert!(CtfRedeemer::redeem_calldata("0x1234").is_err());
    }

    #[tokio::test]
    async fn ctf_redeemer_rejects_missing_condition() {
        let redeemer = CtfRedeemer::new("http://127.0.0.1:1", TEST_KEY).unwrap();
        let outcome = redeemer.redeem("", false).await;
        assert_eq!(outcome.status, "ERROR");
        let outcome = redeemer.redeem("unknown", true).await;
        assert_eq!(outcome.status, "ERROR");
    }

    #[test]
    fn redeemer_derives_sender_address() {
        let redeemer = CtfRedeemer::new("http://127.0.0.1:1", TEST_KEY).unwrap();
        assert_eq!(redeemer.sender, "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    }
}
