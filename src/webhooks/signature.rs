//! `Stripe-Signature` verification.
//!
//! The header has the form `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. Each `v1`
//! is a hex HMAC-SHA256 of `"<t>.<raw body>"` keyed with the endpoint secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    Malformed,
    #[error("Signature timestamp outside the tolerance window")]
    Expired,
    #[error("Signature does not match payload")]
    Mismatch,
}

/// Hex signature of `payload` at `timestamp`.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    hex::encode(mac_for(secret, timestamp, payload).finalize().into_bytes())
}

/// Checks `header` against `payload`, accepting any of its `v1` entries.
pub fn verify(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| {
                mac_for(secret, timestamp, payload)
                    .verify_slice(&bytes)
                    .is_ok()
            })
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// verify_slice compares in constant time
fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn accepts_a_fresh_signature() {
        let sig = sign(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={}", sig);
        assert_eq!(verify(&header, BODY, SECRET, 300, 1_700_000_100), Ok(()));
    }

    #[test]
    fn any_v1_entry_may_match() {
        let sig = sign(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000, v1={}, v1={}", "00".repeat(32), sig);
        assert_eq!(verify(&header, BODY, SECRET, 300, 1_700_000_000), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let sig = sign(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={}", sig);
        assert_eq!(
            verify(&header, b"{}", SECRET, 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify(&header, BODY, "whsec_other", 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamps() {
        let sig = sign(SECRET, 1_700_000_000, BODY);
        let header = format!("t=1700000000,v1={}", sig);
        assert_eq!(
            verify(&header, BODY, SECRET, 300, 1_700_000_301),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(
            verify("v1=abcd", BODY, SECRET, 300, 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify("t=12", BODY, SECRET, 300, 12),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify("t=12,v1=zz", BODY, SECRET, 300, 12),
            Err(SignatureError::Mismatch)
        );
    }
}
