//! Webhook signature verification.
//!
//! The provider signs `"{t}.{payload}"` with HMAC-SHA256 under the endpoint
//! secret and sends `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`.
//! Verification must pass before an event reaches the reconciler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verify a webhook payload against its signature header.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureError::MalformedHeader)?;
        match key {
            "t" => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::MalformedHeader)?);
            }
            // Undecodable v1 entries cannot match; skip them like unknown schemes.
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    // `t` is attacker-controlled; abs_diff cannot overflow.
    let age_secs = now.timestamp().abs_diff(timestamp);
    if age_secs > tolerance.as_secs() {
        tracing::warn!(age_secs, "Webhook signature timestamp outside tolerance");
        return Err(SignatureError::TimestampOutOfTolerance { age_secs });
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice compares in constant time
    if signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok())
    {
        Ok(())
    } else {
        tracing::warn!("Webhook signature mismatch");
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
    const TOLERANCE: Duration = Duration::from_secs(300);

    fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let now = Utc::now();
        let header = sign_payload(PAYLOAD, SECRET, now.timestamp());
        assert_eq!(verify_signature(PAYLOAD, &header, SECRET, TOLERANCE, now), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let now = Utc::now();
        let good = sign_payload(PAYLOAD, SECRET, now.timestamp());
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={good_sig}", now.timestamp(), "ab".repeat(32));
        assert_eq!(verify_signature(PAYLOAD, &header, SECRET, TOLERANCE, now), Ok(()));
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = Utc::now();
        let header = sign_payload(PAYLOAD, "wrong_secret", now.timestamp());
        assert_eq!(
            verify_signature(PAYLOAD, &header, SECRET, TOLERANCE, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_tampered_payload() {
        let now = Utc::now();
        let header = sign_payload(PAYLOAD, SECRET, now.timestamp());
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, TOLERANCE, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let now = Utc::now();
        let header = sign_payload(PAYLOAD, SECRET, now.timestamp() - 600);
        assert_eq!(
            verify_signature(PAYLOAD, &header, SECRET, TOLERANCE, now),
            Err(SignatureError::TimestampOutOfTolerance { age_secs: 600 })
        );
    }

    #[test]
    fn rejects_future_timestamp() {
        let now = Utc::now();
        let header = sign_payload(PAYLOAD, SECRET, now.timestamp() + 900);
        assert_eq!(
            verify_signature(PAYLOAD, &header, SECRET, TOLERANCE, now),
            Err(SignatureError::TimestampOutOfTolerance { age_secs: 900 })
        );
    }

    #[test]
    fn extreme_timestamps_are_out_of_tolerance() {
        let now = Utc::now();
        for t in [i64::MIN, i64::MIN + 1, i64::MAX] {
            let header = format!("t={t},v1=ab");
            assert!(matches!(
                verify_signature(b"{}", &header, SECRET, TOLERANCE, now),
                Err(SignatureError::TimestampOutOfTolerance { .. })
            ));
        }
    }

    #[test]
    fn rejects_incomplete_headers() {
        let now = Utc::now();
        assert_eq!(
            verify_signature(PAYLOAD, "v1=abcd", SECRET, TOLERANCE, now),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_signature(PAYLOAD, "t=123", SECRET, TOLERANCE, now),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            verify_signature(PAYLOAD, "garbage", SECRET, TOLERANCE, now),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(PAYLOAD, "t=soon,v1=ab", SECRET, TOLERANCE, now),
            Err(SignatureError::MalformedHeader)
        );
    }
}
