//! Webhook signing primitives shared by the adapters.

use crate::error::{PaymentError, Result};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|_| PaymentError::internal("Invalid webhook secret"))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn hmac_sha512_hex(secret: &[u8], message: &[u8]) -> Result<String> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(secret)
        .map_err(|_| PaymentError::internal("Invalid webhook secret"))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison. Length is not secret, so a length mismatch returns early.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}

/// Compares a provided hex digest against the expected one, ignoring ASCII case.
pub fn hex_digest_matches(expected: &str, provided: &str) -> bool {
    constant_time_eq(
        expected.to_ascii_lowercase().as_bytes(),
        provided.trim().to_ascii_lowercase().as_bytes(),
    )
}
