//! EIP-712 typed data signing for Polymarket CTF Exchange orders.
//!
//! Implements the EIP-712 standard using k256 (secp256k1) ECDSA, with the
//! static 32-byte words of the order struct pre-built so the per-order hash
//! only touches the dynamic fields (salt, token, amounts, side).
//!
//! # References
//!
//! - [EIP-712](https://eips.ethereum.org/EIPS/eip-712)
//! - [Polymarket CTF Exchange](https://github.com/Polymarket/ctf-exchange)

use sha3::{Digest, Keccak256};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// EIP-712 domain name for the Polymarket CTF Exchange.
const DOMAIN_NAME: &str = "Polymarket CTF Exchange";

/// EIP-712 domain version.
const DOMAIN_VERSION: &str = "1";

/// Polygon mainnet chain ID.
pub const POLYGON_CHAIN_ID: u64 = 137;

/// CTF Exchange contract on Polygon.
pub const EXCHANGE_CONTRACT: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Fee rate charged on these markets, basis points.
pub const FEE_RATE_BPS: u64 = 1000;

/// Side: BUY = 0.
pub const SIDE_BUY: u8 = 0;

/// Side: SELL = 1.
pub const SIDE_SELL: u8 = 1;

// =============================================================================
// Errors
// =============================================================================

/// Errors from EIP-712 operations.
#[derive(Debug, Error)]
pub enum Eip712Error {
    /// Invalid address format.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid private key.
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// Signing failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

// =============================================================================
// Hashing primitives
// =============================================================================

/// Computes keccak256.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

fn keccak256_str(s: &str) -> [u8; 32] {
    keccak256(s.as_bytes())
}

fn domain_type_hash() -> [u8; 32] {
    keccak256_str(
        "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    )
}

/// Order type hash matching the CTF Exchange Solidity contract.
fn order_type_hash() -> [u8; 32] {
    keccak256_str(
        "Order(uint256 salt,address maker,address signer,address taker,\
         uint256 tokenId,uint256 makerAmount,uint256 takerAmount,\
         uint256 expiration,uint256 nonce,uint256 feeRateBps,\
         uint8 side,uint8 signatureType)",
    )
}

/// Computes the EIP-712 domain separator.
///
/// `hash(domainTypeHash || hash(name) || hash(version) || chainId || verifyingContract)`
pub fn compute_domain_separator(
    chain_id: u64,
    exchange_address: &str,
) -> Result<[u8; 32], Eip712Error> {
    let contract = parse_address(exchange_address)?;

    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&domain_type_hash());
    encoded.extend_from_slice(&keccak256_str(DOMAIN_NAME));
    encoded.extend_from_slice(&keccak256_str(DOMAIN_VERSION));
    encoded.extend_from_slice(&abi_word_u64(chain_id));
    encoded.extend_from_slice(&abi_word_address(&contract));

    Ok(keccak256(&encoded))
}

/// Static 32-byte words shared by every order this process signs.
///
/// Taker, expiration, and nonce are always zero; feeRateBps and the two
/// side constants never change; maker/signer/sigType are fixed per wallet.
#[derive(Debug, Clone)]
pub struct StaticOrderWords {
    pub maker: [u8; 32],
    pub signer: [u8; 32],
    pub taker: [u8; 32],
    pub expiration: [u8; 32],
    pub nonce: [u8; 32],
    pub fee_rate: [u8; 32],
    pub side_buy: [u8; 32],
    pub side_sell: [u8; 32],
    pub sig_type: [u8; 32],
}

impl StaticOrderWords {
    /// Pre-pads the per-wallet and constant words.
    ///
    /// # Errors
    /// Returns an error when either address fails to parse.
    pub fn build(maker: &str, signer: &str, sig_type: u8) -> Result<Self, Eip712Error> {
        Ok(Self {
            maker: abi_word_address(&parse_address(maker)?),
            signer: abi_word_address(&parse_address(signer)?),
            taker: [0u8; 32],
            expiration: [0u8; 32],
            nonce: [0u8; 32],
            fee_rate: abi_word_u64(FEE_RATE_BPS),
            side_buy: abi_word_u64(u64::from(SIDE_BUY)),
            side_sell: abi_word_u64(u64::from(SIDE_SELL)),
            sig_type: abi_word_u64(u64::from(sig_type)),
        })
    }
}

/// Computes the order struct hash from pre-built static words plus the
/// per-order dynamic fields.
#[must_use]
pub fn compute_order_struct_hash(
    words: &StaticOrderWords,
    salt: u64,
    token_id_word: &[u8; 32],
    maker_amount: u64,
    taker_amount: u64,
    side: u8,
) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(13 * 32);
    encoded.extend_from_slice(&order_type_hash());
    encoded.extend_from_slice(&abi_word_u64(salt));
    encoded.extend_from_slice(&words.maker);
    encoded.extend_from_slice(&words.signer);
    encoded.extend_from_slice(&words.taker);
    encoded.extend_from_slice(token_id_word);
    encoded.extend_from_slice(&abi_word_u64(maker_amount));
    encoded.extend_from_slice(&abi_word_u64(taker_amount));
    encoded.extend_from_slice(&words.expiration);
    encoded.extend_from_slice(&words.nonce);
    encoded.extend_from_slice(&words.fee_rate);
    encoded.extend_from_slice(if side == SIDE_BUY {
        &words.side_buy
    } else {
        &words.side_sell
    });
    encoded.extend_from_slice(&words.sig_type);

    keccak256(&encoded)
}

/// Computes the final EIP-712 signing digest.
///
/// `keccak256("\x19\x01" || domainSeparator || structHash)`
#[must_use]
pub fn compute_signing_hash(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut data = Vec::with_capacity(2 + 32 + 32);
    data.push(0x19);
    data.push(0x01);
    data.extend_from_slice(domain_separator);
    data.extend_from_slice(struct_hash);
    keccak256(&data)
}

// =============================================================================
// ECDSA signing and key derivation
// =============================================================================

/// Signs a raw 32-byte hash with ECDSA using k256.
///
/// Returns the 65-byte signature `r || s || v` hex-encoded with 0x prefix,
/// where v is 27 or 28.
pub fn sign_hash(hash: &[u8; 32], private_key_hex: &str) -> Result<String, Eip712Error> {
    use k256::ecdsa::SigningKey;

    let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
    let key_bytes =
        hex::decode(key_hex).map_err(|e| Eip712Error::InvalidKey(format!("Invalid hex: {e}")))?;

    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| Eip712Error::InvalidKey(format!("Invalid key: {e}")))?;

    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(hash)
        .map_err(|e| Eip712Error::SigningFailed(format!("ECDSA sign failed: {e}")))?;

    let mut sig_bytes = Vec::with_capacity(65);
    sig_bytes.extend_from_slice(&signature.r().to_bytes());
    sig_bytes.extend_from_slice(&signature.s().to_bytes());
    sig_bytes.push(recovery_id.to_byte() + 27); // Ethereum convention

    Ok(format!("0x{}", hex::encode(sig_bytes)))
}

/// Derives the EIP-55 checksummed address for a private key.
///
/// # Errors
/// Returns an error when the key is not valid secp256k1 material.
pub fn derive_address(private_key_hex: &str) -> Result<String, Eip712Error> {
    use k256::ecdsa::SigningKey;
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
    let key_bytes =
        hex::decode(key_hex).map_err(|e| Eip712Error::InvalidKey(format!("Invalid hex: {e}")))?;
    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| Eip712Error::InvalidKey(format!("Invalid key: {e}")))?;

    let public = signing_key.verifying_key().to_encoded_point(false);
    // Address = last 20 bytes of keccak256(uncompressed pubkey minus 0x04 tag)
    let hash = keccak256(&public.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..32]);

    Ok(to_checksum_address(&addr))
}

/// EIP-55 mixed-case checksum encoding.
#[must_use]
pub fn to_checksum_address(addr: &[u8; 20]) -> String {
    let lower = hex::encode(addr);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Recovers the signer address from a 65-byte `r || s || v` signature.
///
/// # Errors
/// Returns an error for malformed signatures.
pub fn recover_address(hash: &[u8; 32], signature_hex: &str) -> Result<String, Eip712Error> {
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let sig_hex = signature_hex.strip_prefix("0x").unwrap_or(signature_hex);
    let bytes = hex::decode(sig_hex)
        .map_err(|e| Eip712Error::SigningFailed(format!("Invalid signature hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(Eip712Error::SigningFailed(format!(
            "Signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }

    let signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| Eip712Error::SigningFailed(format!("Invalid r/s: {e}")))?;
    let recovery_id = RecoveryId::from_byte(bytes[64].wrapping_sub(27))
        .ok_or_else(|| Eip712Error::SigningFailed("Invalid v byte".to_string()))?;

    let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id)
        .map_err(|e| Eip712Error::SigningFailed(format!("Recovery failed: {e}")))?;

    let public = key.to_encoded_point(false);
    let digest = keccak256(&public.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..32]);
    Ok(to_checksum_address(&addr))
}

// =============================================================================
// ABI encoding helpers
// =============================================================================

/// Parses a hex address string (with or without 0x prefix) to 20 bytes.
pub fn parse_address(addr: &str) -> Result<[u8; 20], Eip712Error> {
    let hex_str = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(hex_str)
        .map_err(|e| Eip712Error::InvalidAddress(format!("Invalid hex: {e}")))?;
    if bytes.len() != 20 {
        return Err(Eip712Error::InvalidAddress(format!(
            "Address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// ABI-encodes an address as a 32-byte left-padded word.
fn abi_word_address(addr: &[u8; 20]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..32].copy_from_slice(addr);
    out
}

/// ABI-encodes a u64 as a 32-byte big-endian word.
fn abi_word_u64(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..32].copy_from_slice(&value.to_be_bytes());
    out
}

/// Converts a decimal token ID string to a 32-byte big-endian uint256 word.
///
/// Token IDs exceed u128, so the conversion is manual base-10 → base-256.
#[must_use]
pub fn token_id_word(token_id: &str) -> [u8; 32] {
    let mut result = [0u8; 32];

    let mut digits: Vec<u8> = token_id
        .bytes()
        .filter_map(|b| b.is_ascii_digit().then(|| b - b'0'))
        .collect();

    if digits.is_empty() {
        return result;
    }

    let mut byte_vec = Vec::new();
    while !(digits.is_empty() || digits.len() == 1 && digits[0] == 0) {
        let mut remainder = 0u16;
        let mut next = Vec::new();
        for &digit in &digits {
            let current = remainder * 10 + u16::from(digit);
            let quotient = current / 256;
            remainder = current % 256;
            if !next.is_empty() || quotient > 0 {
                next.push(quotient as u8);
            }
        }
        byte_vec.push(remainder as u8);
        digits = next;
    }

    let start = 32 - byte_vec.len().min(32);
    for (i, &b) in byte_vec.iter().rev().enumerate() {
        if start + i < 32 {
            result[start + i] = b;
        }
    }

    result
}

// =============================================================================
// Tests
// =============================================================================
