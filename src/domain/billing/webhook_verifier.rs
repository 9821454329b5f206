//! Gateway webhook signature verification.
//!
//! The gateway signs `"<timestamp>.<raw body>"` with HMAC-SHA256 keyed by the
//! shared webhook secret and sends `t=<timestamp>,v1=<hex>` alongside the
//! body. Comparison is constant-time and every failure is reported as the
//! same `SignatureInvalid`.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::webhook_errors::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum age of a signature (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Maximum allowed clock skew for future signatures (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed components from the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when the signature was generated.
    pub timestamp: i64,
    /// v1 signatures; secret rotation may produce more than one.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses `t=<timestamp>,v1=<signature>[,v1=<signature>...]`.
    ///
    /// Unknown keys are ignored.
    pub fn parse(header: &str) -> Result<Self, &'static str> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or("invalid header format")?;

            match key {
                "t" => timestamp = Some(value.parse().map_err(|_| "invalid timestamp")?),
                "v1" => v1_signatures.push(hex::decode(value).map_err(|_| "invalid v1 hex")?),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or("missing timestamp")?;
        if v1_signatures.is_empty() {
            return Err("missing v1 signature");
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifier for gateway webhook signatures.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Overrides the maximum signature age.
    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies the signature header against the raw payload.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<(), WebhookError> {
        self.verify_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    /// Verifies as of `now` (Unix seconds).
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<(), WebhookError> {
        self.check(payload, signature_header, now).map_err(|reason| {
            tracing::debug!(reason, "webhook signature rejected");
            WebhookError::SignatureInvalid
        })
    }

    fn check(&self, payload: &[u8], signature_header: &str, now: i64) -> Result<(), &'static str> {
        let header = SignatureHeader::parse(signature_header)?;

        let age = now.checked_sub(header.timestamp).ok_or("invalid timestamp")?;
        if age > self.tolerance_secs {
            return Err("signature expired");
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err("signature from the future");
        }

        let expected = compute_signature(self.secret.expose_secret().as_bytes(), header.timestamp, payload)
            .map_err(|_| "invalid secret")?;

        // Every candidate is compared so timing does not reveal which one matched.
        let matched = header
            .v1_signatures
            .iter()
            .fold(false, |acc, candidate| acc | constant_time_compare(&expected, candidate));

        if matched {
            Ok(())
        } else {
            Err("signature mismatch")
        }
    }
}

/// Computes the raw HMAC-SHA256 over `"<timestamp>.<payload>"`.
pub fn compute_signature(
    secret: &[u8],
    timestamp: i64,
    payload: &[u8],
) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Builds a signature header the way the gateway does.
pub fn signature_header(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, hmac::digest::InvalidLength> {
    let signature = compute_signature(secret.as_bytes(), timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "whsec_test_secret_12345";
    const NOW: i64 = 1_700_000_000;
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"payment","created":1700000000,"data":{}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::new(TEST_SECRET.to_string()))
    }

    // ══════════════════════════════════════════════════════════════
    // SignatureHeader Parsing Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parse_header_with_single_v1() {
        let header = SignatureHeader::parse(&format!("t=1234567890,v1={}", "a".repeat(64))).unwrap();

        assert_eq!(header.timestamp, 1234567890);
        assert_eq!(header.v1_signatures.len(), 1);
        assert_eq!(header.v1_signatures[0].len(), 32);
    }

    #[test]
    fn parse_header_collects_rotated_signatures() {
        let header = SignatureHeader::parse(&format!(
            "t=1,v1={},v1={}",
            "a".repeat(64),
            "b".repeat(64)
        ))
        .unwrap();

        assert_eq!(header.v1_signatures.len(), 2);
    }

    #[test]
    fn parse_header_ignores_unknown_fields() {
        let header =
            SignatureHeader::parse(&format!("t=1,v1={},v0=legacy,scheme=hmac", "a".repeat(64))).unwrap();
        assert_eq!(header.v1_signatures.len(), 1);
    }

    #[test]
    fn parse_header_missing_parts_fails() {
        assert_eq!(
            SignatureHeader::parse(&format!("v1={}", "a".repeat(64))),
            Err("missing timestamp")
        );
        assert_eq!(SignatureHeader::parse("t=1"), Err("missing v1 signature"));
        assert_eq!(SignatureHeader::parse("t1234"), Err("invalid header format"));
        assert_eq!(SignatureHeader::parse("t=1,v1=zz"), Err("invalid v1 hex"));
    }

    // ══════════════════════════════════════════════════════════════
    // Signature Verification Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn verify_valid_signature() {
        let header = signature_header(TEST_SECRET, NOW, PAYLOAD).unwrap();
        assert!(verifier().verify_at(PAYLOAD, &header, NOW).is_ok());
    }

    #[test]
    fn verify_accepts_current_time() {
        let now = chrono::Utc::now().timestamp();
        let header = signature_header(TEST_SECRET, now, PAYLOAD).unwrap();
        assert!(verifier().verify(PAYLOAD, &header).is_ok());
    }

    #[test]
    fn verify_wrong_secret_fails() {
        let header = signature_header("whsec_other", NOW, PAYLOAD).unwrap();
        assert!(matches!(
            verifier().verify_at(PAYLOAD, &header, NOW),
            Err(WebhookError::SignatureInvalid)
        ));
    }

    #[test]
    fn verify_tampered_payload_fails() {
        let header = signature_header(TEST_SECRET, NOW, PAYLOAD).unwrap();
        let tampered = br#"{"id":"evt_2","type":"payment","created":1700000000,"data":{}}"#;
        assert!(matches!(
            verifier().verify_at(tampered, &header, NOW),
            Err(WebhookError::SignatureInvalid)
        ));
    }

    #[test]
    fn verify_accepts_any_matching_rotated_signature() {
        let good = signature_header(TEST_SECRET, NOW, PAYLOAD).unwrap();
        let good_hex = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "a".repeat(64), good_hex);

        assert!(verifier().verify_at(PAYLOAD, &header, NOW).is_ok());
    }

    #[test]
    fn malformed_header_is_reported_as_invalid_signature() {
        assert!(matches!(
            verifier().verify_at(PAYLOAD, "garbage", NOW),
            Err(WebhookError::SignatureInvalid)
        ));
    }

    // ══════════════════════════════════════════════════════════════
    // Timestamp Validation Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn signature_at_tolerance_boundary_succeeds() {
        let header = signature_header(TEST_SECRET, NOW - 300, PAYLOAD).unwrap();
        assert!(verifier().verify_at(PAYLOAD, &header, NOW).is_ok());
    }

    #[test]
    fn signature_past_tolerance_fails() {
        let header = signature_header(TEST_SECRET, NOW - 301, PAYLOAD).unwrap();
        assert!(verifier().verify_at(PAYLOAD, &header, NOW).is_err());
    }

    #[test]
    fn custom_tolerance_is_honoured() {
        let header = signature_header(TEST_SECRET, NOW - 301, PAYLOAD).unwrap();
        let lenient = verifier().with_tolerance_secs(600);
        assert!(lenient.verify_at(PAYLOAD, &header, NOW).is_ok());
    }

    #[test]
    fn signature_from_future_within_skew_succeeds() {
        let header = signature_header(TEST_SECRET, NOW + 30, PAYLOAD).unwrap();
        assert!(verifier().verify_at(PAYLOAD, &header, NOW).is_ok());
    }

    #[test]
    fn signature_from_future_beyond_skew_fails() {
        let header = signature_header(TEST_SECRET, NOW + 120, PAYLOAD).unwrap();
        assert!(verifier().verify_at(PAYLOAD, &header, NOW).is_err());
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        for t in [i64::MIN, i64::MIN + 1, i64::MAX] {
            let header = format!("t={},v1=00", t);
            let result = verifier().verify_at(PAYLOAD, &header, NOW);
            assert!(matches!(result, Err(WebhookError::SignatureInvalid)), "t={t}");
        }
        let header = "t=-9223372036854775808,v1=00";
        assert!(verifier().verify_at(PAYLOAD, header, i64::MAX).is_err());
        assert!(verifier().verify(b"{}", header).is_err());
    }
}
