//! Webhook signature verification.
//!
//! The `Tolgee-Signature` header is a JSON object
//! `{"timestamp": <ms>, "signature": "<hex>"}` where the signature is
//! `HMAC-SHA256(secret, "{timestamp}.{raw body}")`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Request header carrying the signature
pub const SIGNATURE_HEADER: &str = "Tolgee-Signature";

/// Oldest accepted signature age
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("webhook secret is not configured")]
    MissingSecret,

    #[error("signature header is missing")]
    MissingHeader,

    #[error("signature header is malformed: {0}")]
    MalformedHeader(String),

    #[error("signature is not valid hex")]
    InvalidHex,

    #[error("signature mismatch")]
    Mismatch,

    #[error("signature timestamp {timestamp_ms} is too old")]
    Expired { timestamp_ms: i64 },
}

impl SignatureError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingSecret => "missing_secret",
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader(_) => "malformed_header",
            Self::InvalidHex => "invalid_hex",
            Self::Mismatch => "mismatch",
            Self::Expired { .. } => "expired",
        }
    }
}

/// Decoded signature header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHeader {
    /// Unix milliseconds
    pub timestamp: i64,
    /// Lower-case hex HMAC
    pub signature: String,
}

impl SignatureHeader {
    pub fn parse(raw: &str) -> Result<Self, SignatureError> {
        let header: SignatureHeader = serde_json::from_str(raw)
            .map_err(|e| SignatureError::MalformedHeader(e.to_string()))?;

        if header.timestamp <= 0 {
            return Err(SignatureError::MalformedHeader(
                "timestamp must be positive".to_string(),
            ));
        }
        if header.signature.trim().is_empty() {
            return Err(SignatureError::MalformedHeader(
                "signature is empty".to_string(),
            ));
        }
        Ok(header)
    }

    /// Header value for `body`, signed at `timestamp_ms`
    pub fn sign(secret: &str, timestamp_ms: i64, body: &[u8]) -> Result<Self, SignatureError> {
        let mac = mac_for(secret, timestamp_ms, body)?;
        Ok(Self {
            timestamp: timestamp_ms,
            signature: hex::encode(mac.finalize().into_bytes()),
        })
    }

    pub fn to_header_value(&self) -> String {
        // Two plain fields; serialisation cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn mac_for(secret: &str, timestamp_ms: i64, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MissingSecret)?;
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Check a signature header against `body`, reporting why it was rejected
pub fn check(
    secret: Option<&str>,
    header: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<SignatureHeader, SignatureError> {
    let secret = secret
        .filter(|secret| !secret.is_empty())
        .ok_or(SignatureError::MissingSecret)?;
    let raw = header
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or(SignatureError::MissingHeader)?;

    let header = SignatureHeader::parse(raw)?;
    let provided = hex::decode(header.signature.trim()).map_err(|_| SignatureError::InvalidHex)?;

    // Constant-time comparison
    mac_for(secret, header.timestamp, body)?
        .verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)?;

    let window_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
    if header.timestamp < now.timestamp_millis().saturating_sub(window_ms) {
        return Err(SignatureError::Expired {
            timestamp_ms: header.timestamp,
        });
    }

    Ok(header)
}

/// `true` only for a well-formed, matching and recent signature
pub fn verify(
    secret: Option<&str>,
    header: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    check(secret, header, body, now, tolerance).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "s3cr3t";
    const BODY: &[u8] = br#"{"a":1}"#;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn header_at(ts: i64) -> String {
        SignatureHeader::sign(SECRET, ts, BODY).unwrap().to_header_value()
    }

    fn run(header: &str, body: &[u8]) -> Result<SignatureHeader, SignatureError> {
        check(Some(SECRET), Some(header), body, now(), DEFAULT_TOLERANCE)
    }

    #[test]
    fn test_signature_matches_reference_hmac() {
        let ts = now().timestamp_millis();
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{}.{}", ts, r#"{"a":1}"#).as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(SignatureHeader::sign(SECRET, ts, BODY).unwrap().signature, expected);
        assert!(run(&header_at(ts), BODY).is_ok());
    }

    #[test]
    fn test_tampering_is_rejected() {
        let ts = now().timestamp_millis();

        assert_eq!(run(&header_at(ts), br#"{"a":2}"#), Err(SignatureError::Mismatch));

        let shifted = SignatureHeader {
            timestamp: ts - 1,
            signature: SignatureHeader::sign(SECRET, ts, BODY).unwrap().signature,
        };
        assert_eq!(run(&shifted.to_header_value(), BODY), Err(SignatureError::Mismatch));

        let mut flipped = SignatureHeader::sign(SECRET, ts, BODY).unwrap();
        let first = if flipped.signature.starts_with('0') { "1" } else { "0" };
        flipped.signature.replace_range(0..1, first);
        assert_eq!(run(&flipped.to_header_value(), BODY), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_old_signature_is_rejected() {
        let ts = now().timestamp_millis() - 5 * 60 * 1000 - 1;
        assert_eq!(
            run(&header_at(ts), BODY),
            Err(SignatureError::Expired { timestamp_ms: ts })
        );

        let edge = now().timestamp_millis() - 5 * 60 * 1000;
        assert!(run(&header_at(edge), BODY).is_ok());
    }

    #[test]
    fn test_structural_failures() {
        let valid = header_at(now().timestamp_millis());

        assert_eq!(
            check(None, Some(&valid), BODY, now(), DEFAULT_TOLERANCE),
            Err(SignatureError::MissingSecret)
        );
        assert_eq!(
            check(Some(""), Some(&valid), BODY, now(), DEFAULT_TOLERANCE),
            Err(SignatureError::MissingSecret)
        );
        assert_eq!(
            check(Some(SECRET), None, BODY, now(), DEFAULT_TOLERANCE),
            Err(SignatureError::MissingHeader)
        );
        assert!(matches!(run("not json", BODY), Err(SignatureError::MalformedHeader(_))));
        assert!(matches!(
            run(r#"{"timestamp":0,"signature":"ab"}"#, BODY),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert!(matches!(
            run(r#"{"timestamp":1,"signature":""}"#, BODY),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert_eq!(
            run(r#"{"timestamp":1700000000000,"signature":"zz"}"#, BODY),
            Err(SignatureError::InvalidHex)
        );
        assert!(!verify(Some(SECRET), Some("{}"), BODY, now(), DEFAULT_TOLERANCE));
    }
}
