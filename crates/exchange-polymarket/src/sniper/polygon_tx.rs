//! Minimal Polygon (EVM) transaction construction and broadcasting.
//!
//! Supports legacy (pre-EIP-1559) transactions with EIP-155 replay
//! protection, enough to call `redeemPositions` on the conditional tokens
//! contract. Uses the k256/sha3 stack already carried for order signing.

use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Errors from transaction construction and broadcasting.
#[derive(Debug, Error)]
pub enum TxError {
    /// Transaction signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid private key.
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
}

// =============================================================================
// RLP encoding (minimal, internal)
// =============================================================================

fn rlp_encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        vec![data[0]]
    } else if data.len() <= 55 {
        let mut out = Vec::with_capacity(1 + data.len());
        out.push(0x80 + data.len() as u8);
        out.extend_from_slice(data);
        out
    } else {
        let len_bytes = minimal_be_bytes(data.len() as u64);
        let mut out = Vec::with_capacity(1 + len_bytes.len() + data.len());
        out.push(0xb7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(data);
        out
    }
}

fn rlp_encode_u64(val: u64) -> Vec<u8> {
    if val == 0 {
        rlp_encode_bytes(&[])
    } else {
        rlp_encode_bytes(&minimal_be_bytes(val))
    }
}

fn rlp_encode_uint_bytes(val: &[u8]) -> Vec<u8> {
    let stripped = strip_leading_zeros(val);
    if stripped.is_empty() {
        rlp_encode_bytes(&[])
    } else {
        rlp_encode_bytes(stripped)
    }
}

fn rlp_encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flat_map(|i| i.iter().copied()).collect();
    if payload.len() <= 55 {
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(0xc0 + payload.len() as u8);
        out.extend_from_slice(&payload);
        out
    } else {
        let len_bytes = minimal_be_bytes(payload.len() as u64);
        let mut out = Vec::with_capacity(1 + len_bytes.len() + payload.len());
        out.push(0xf7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(&payload);
        out
    }
}

fn minimal_be_bytes(val: u64) -> Vec<u8> {
    let bytes = val.to_be_bytes();
    let stripped = strip_leading_zeros(&bytes);
    if stripped.is_empty() {
        vec![0]
    } else {
        stripped.to_vec()
    }
}

fn strip_leading_zeros(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|&b| b != 0).unwrap_or(data.len());
    &data[start..]
}

// =============================================================================
// Transaction signing (EIP-155)
// =============================================================================

/// A legacy (type 0) Ethereum transaction.
pub struct LegacyTx {
    /// Transaction nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient address (20 bytes).
    pub to: [u8; 20],
    /// Value in wei (U256 big-endian; zero for contract calls here).
    pub value: [u8; 32],
    /// Calldata.
    pub data: Vec<u8>,
}

/// Signs a legacy transaction with EIP-155 replay protection.
///
/// Returns the RLP-encoded signed transaction ready for broadcasting.
pub fn sign_legacy_tx(
    tx: &LegacyTx,
    chain_id: u64,
    private_key_hex: &str,
) -> Result<Vec<u8>, TxError> {
    let unsigned_rlp = rlp_encode_list(&[
        rlp_encode_u64(tx.nonce),
        rlp_encode_u64(tx.gas_price),
        rlp_encode_u64(tx.gas_limit),
        rlp_encode_bytes(&tx.to),
        rlp_encode_uint_bytes(&tx.value),
        rlp_encode_bytes(&tx.data),
        rlp_encode_u64(chain_id),
        rlp_encode_bytes(&[]),
        rlp_encode_bytes(&[]),
    ]);

    let hash = Keccak256::digest(&unsigned_rlp);

    let key_bytes = hex::decode(private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex))
        .map_err(|e| TxError::InvalidKey(e.to_string()))?;
    let signing_key =
        SigningKey::from_slice(&key_bytes).map_err(|e| TxError::InvalidKey(e.to_string()))?;

    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&hash)
        .map_err(|e| TxError::Signing(e.to_string()))?;

    // EIP-155: v = chain_id * 2 + 35 + recovery_id
    let v = chain_id * 2 + 35 + u64::from(recovery_id.to_byte());

    let signed_rlp = rlp_encode_list(&[
        rlp_encode_u64(tx.nonce),
        rlp_encode_u64(tx.gas_price),
        rlp_encode_u64(tx.gas_limit),
        rlp_encode_bytes(&tx.to),
        rlp_encode_uint_bytes(&tx.value),
        rlp_encode_bytes(&tx.data),
        rlp_encode_u64(v),
        rlp_encode_uint_bytes(&signature.r().to_bytes()),
        rlp_encode_uint_bytes(&signature.s().to_bytes()),
    ]);

    Ok(signed_rlp)
}

// =============================================================================
// JSON-RPC
// =============================================================================

/// Thin JSON-RPC caller for the handful of methods redemption needs.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Creates a client against an RPC endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .connect_timeout(timeout)
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, TxError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: serde_json::Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(TxError::Rpc(error.to_string()));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| TxError::Rpc("missing result".to_string()))
    }

    fn parse_hex_u64(value: &serde_json::Value) -> Result<u64, TxError> {
        let s = value
            .as_str()
            .ok_or_else(|| TxError::Rpc("non-string quantity".to_string()))?;
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| TxError::Rpc(format!("bad quantity {s}: {e}")))
    }

    /// `eth_getTransactionCount` (pending).
    pub async fn transaction_count(&self, address: &str) -> Result<u64, TxError> {
        let result = self
            .call("eth_getTransactionCount", serde_json::json!([address, "pending"]))
            .await?;
        Self::parse_hex_u64(&result)
    }

    /// `eth_gasPrice`.
    pub async fn gas_price(&self) -> Result<u64, TxError> {
        let result = self.call("eth_gasPrice", serde_json::json!([])).await?;
        Self::parse_hex_u64(&result)
    }

    /// `eth_sendRawTransaction`; returns the tx hash.
    pub async fn send_raw_transaction(&self, signed_rlp: &[u8]) -> Result<String, TxError> {
        let raw = format!("0x{}", hex::encode(signed_rlp));
        let result = self
            .call("eth_sendRawTransaction", serde_json::json!([raw]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TxError::Rpc("non-string tx hash".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    // -------------------------------------------------------------------------
    // RLP
    // -------------------------------------------------------------------------

    #[test]
    fn rlp_single_small_byte_is_itself() {
        assert_eq!(rlp_encode_bytes(&[0x42]), vec![0x42]);
    }

    #[test]
    fn rlp_short_string_gets_length_prefix() {
        assert_eq!(rlp_encode_bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn rlp_empty_is_0x80() {
        assert_eq!(rlp_encode_bytes(&[]), vec![0x80]);
        assert_eq!(rlp_encode_u64(0), vec![0x80]);
    }

    #[test]
    fn rlp_u64_strips_leading_zeros() {
        assert_eq!(rlp_encode_u64(0x0400), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn rlp_empty_list() {
        assert_eq!(rlp_encode_list(&[]), vec![0xc0]);
    }

    #[test]
    fn rlp_long_payload_uses_extended_header() {
        let data = vec![1u8; 60];
        let encoded = rlp_encode_bytes(&data);
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(encoded[1], 60);
        assert_eq!(encoded.len(), 62);
    }

    // -------------------------------------------------------------------------
    // Signing
    // -------------------------------------------------------------------------

    fn sample_tx() -> LegacyTx {
        LegacyTx {
            nonce: 7,
            gas_price: 50_000_000_000,
            gas_limit: 300_000,
            to: [0x11; 20],
            value: [0u8; 32],
            data: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    #[test]
    fn signed_tx_is_deterministic() {
        let a = sign_legacy_tx(&sample_tx(), 137, TEST_KEY).unwrap();
        let b = sign_legacy_tx(&sample_tx(), 137, TEST_KEY).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
        // RLP list header.
        assert!(a[0] >= 0xc0);
    }

    #[test]
    fn chain_id_changes_signature() {
        let polygon = sign_legacy_tx(&sample_tx(), 137, TEST_KEY).unwrap();
        let mainnet = sign_legacy_tx(&sample_tx(), 1, TEST_KEY).unwrap();
        assert_ne!(polygon, mainnet);
    }

    #[test]
    fn invalid_key_is_rejected() {
        assert!(sign_legacy_tx(&sample_tx(), 137, "nothex").is_err());
    }

    // -------------------------------------------------------------------------
    // RPC plumbing
    // -------------------------------------------------------------------------

    #[test]
    fn hex_quantities_parse() {
        assert_eq!(
            RpcClient::parse_hex_u64(&serde_json::json!("0x1b")).unwrap(),
            27
        );
        assert!(RpcClient::parse_hex_u64(&serde_json::json!(27)).is_err());
    }
}
