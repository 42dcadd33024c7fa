//! Multi-variant HMAC-SHA256 trigger signatures.
//!
//! The scheduler signs each trigger request with a shared secret over a
//! signing base derived from the request. Several historical conventions are
//! in the field simultaneously, so verification tries a fixed, explicitly
//! ordered list of base variants and accepts on the first constant-time
//! match. The list is a versioned contract: deprecating an old convention is
//! a one-line removal here.
//!
//! # Base formats
//!
//! - Path-scoped (current): `ts.METHOD.path.sha256(body)`, for each accepted
//!   logical path (canonical, trailing-slash form, route aliases).
//! - Legacy: `ts.sha256(body)` without the method/path component.
//!
//! Each format is tried with the timestamp as transmitted and with it
//! converted to the other unit (seconds versus milliseconds), because older
//! callers sign the seconds value while sending milliseconds in the header.
//!
//! The candidate set is enumerated from these fixed lists, never generated
//! from attacker input, so the extra hashing per request stays bounded.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// One accepted signing-base convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningVariant {
    /// `ts.METHOD.path.sha256(body)`, timestamp as transmitted.
    PathScopedRawTs,
    /// `ts.METHOD.path.sha256(body)`, timestamp converted to the other unit.
    PathScopedAltTs,
    /// `ts.sha256(body)`, timestamp as transmitted.
    LegacyRawTs,
    /// `ts.sha256(body)`, timestamp converted to the other unit.
    LegacyAltTs,
}

/// The ordered verification contract. Current conventions first, legacy
/// last; first match wins.
pub const SIGNING_VARIANTS: [SigningVariant; 4] = [
    SigningVariant::PathScopedRawTs,
    SigningVariant::PathScopedAltTs,
    SigningVariant::LegacyRawTs,
    SigningVariant::LegacyAltTs,
];

/// Hex SHA-256 of the raw request body, exactly as transmitted.
pub fn body_sha256_hex(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// The timestamp re-expressed in the other unit.
///
/// A value at or above 10^12 is taken to be milliseconds and divided down;
/// anything smaller is seconds and multiplied up. Returns `None` for
/// non-numeric input or multiplication overflow.
pub fn alternate_timestamp(raw: &str) -> Option<String> {
    let value: i64 = raw.parse().ok()?;
    if value >= 1_000_000_000_000 {
        Some((value / 1000).to_string())
    } else {
        value.checked_mul(1000).map(|ms| ms.to_string())
    }
}

impl SigningVariant {
    /// The signing bases this variant accepts for the given request.
    pub fn bases(
        &self,
        method: &str,
        accepted_paths: &[&str],
        ts_raw: &str,
        body_hash: &str,
    ) -> Vec<String> {
        let ts = match self {
            SigningVariant::PathScopedRawTs | SigningVariant::LegacyRawTs => {
                Some(ts_raw.to_string())
            }
            SigningVariant::PathScopedAltTs | SigningVariant::LegacyAltTs => {
                alternate_timestamp(ts_raw)
            }
        };
        let Some(ts) = ts else {
            return Vec::new();
        };

        match self {
            SigningVariant::PathScopedRawTs | SigningVariant::PathScopedAltTs => accepted_paths
                .iter()
                .map(|path| format!("{ts}.{method}.{path}.{body_hash}"))
                .collect(),
            SigningVariant::LegacyRawTs | SigningVariant::LegacyAltTs => {
                vec![format!("{ts}.{body_hash}")]
            }
        }
    }
}

/// Parses a signature header into raw bytes.
///
/// Accepts plain hex and the `sha256=`-prefixed form. Returns `None` for
/// invalid hex.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=").unwrap_or(header);
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of a signing base.
///
/// Used by tests and by callers generating trigger requests.
pub fn compute_signature(base: &str, secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(base.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Builds the current-convention signing base for a request.
///
/// Callers adopting the path-scoped convention sign exactly this string.
pub fn signing_base(ts: &str, method: &str, path: &str, body: &[u8]) -> String {
    format!("{ts}.{method}.{path}.{}", body_sha256_hex(body))
}

/// Builds the legacy signing base for a request.
pub fn legacy_signing_base(ts: &str, body: &[u8]) -> String {
    format!("{ts}.{}", body_sha256_hex(body))
}

/// Verifies a trigger signature against every accepted convention.
///
/// Tries the variants of [`SIGNING_VARIANTS`] in order and returns `true` on
/// the first constant-time match. Comparison happens through the HMAC
/// library's `verify_slice`, never a byte-wise `==`.
pub fn verify_trigger_signature(
    secret: &[u8],
    method: &str,
    accepted_paths: &[&str],
    ts_raw: &str,
    signature_header: &str,
    body: &[u8],
) -> bool {
    let supplied = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let body_hash = body_sha256_hex(body);

    for variant in SIGNING_VARIANTS {
        for base in variant.bases(method, accepted_paths, ts_raw, &body_hash) {
            let mut mac = match HmacSha256::new_from_slice(secret) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(base.as_bytes());
            if mac.verify_slice(&supplied).is_ok() {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECRET: &[u8] = b"trigger-secret";
    const PATHS: [&str; 4] = [
        "/api/cron/dispatch",
        "/api/cron/dispatch/",
        "/api/cron",
        "/api/cron/",
    ];

    fn sign_hex(base: &str) -> String {
        hex::encode(compute_signature(base, SECRET))
    }

    // ─── Per-variant coverage ───

    #[test]
    fn path_scoped_raw_seconds_accepted() {
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base("1700000000", "POST", "/api/cron/dispatch", body));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    #[test]
    fn path_scoped_raw_millis_accepted() {
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base(
            "1700000000000",
            "POST",
            "/api/cron/dispatch",
            body,
        ));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000000",
            &sig,
            body
        ));
    }

    #[test]
    fn path_scoped_alt_ts_accepted() {
        // Header carries milliseconds, but the caller signed the seconds value.
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base("1700000000", "POST", "/api/cron/dispatch", body));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000000",
            &sig,
            body
        ));
    }

    #[test]
    fn trailing_slash_path_accepted() {
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base(
            "1700000000",
            "POST",
            "/api/cron/dispatch/",
            body,
        ));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    #[test]
    fn route_alias_accepted() {
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base("1700000000", "POST", "/api/cron", body));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    #[test]
    fn legacy_raw_ts_accepted() {
        let body = br#"{}"#;
        let sig = sign_hex(&legacy_signing_base("1700000000", body));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    #[test]
    fn legacy_alt_ts_accepted() {
        // Header carries seconds, legacy caller signed the milliseconds value.
        let body = br#"{}"#;
        let sig = sign_hex(&legacy_signing_base("1700000000000", body));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    // ─── Rejections ───

    #[test]
    fn wrong_secret_rejected() {
        let body = br#"{}"#;
        let sig = hex::encode(compute_signature(
            &signing_base("1700000000", "POST", "/api/cron/dispatch", body),
            b"other-secret",
        ));
        assert!(!verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    #[test]
    fn tampered_body_rejected() {
        let sig = sign_hex(&signing_base("1700000000", "POST", "/api/cron/dispatch", b"{}"));
        assert!(!verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            br#"{"surprise":true}"#
        ));
    }

    #[test]
    fn unlisted_path_rejected() {
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base("1700000000", "POST", "/api/other", body));
        assert!(!verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    #[test]
    fn wrong_method_rejected() {
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base("1700000000", "GET", "/api/cron/dispatch", body));
        assert!(!verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &sig,
            body
        ));
    }

    #[test]
    fn malformed_signature_header_rejected() {
        let body = br#"{}"#;
        assert!(!verify_trigger_signature(SECRET, "POST", &PATHS, "1700000000", "", body));
        assert!(!verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            "not-hex!",
            body
        ));
        assert!(!verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            "sha256=zzzz",
            body
        ));
    }

    #[test]
    fn prefixed_signature_header_accepted() {
        let body = br#"{}"#;
        let sig = sign_hex(&signing_base("1700000000", "POST", "/api/cron/dispatch", body));
        assert!(verify_trigger_signature(
            SECRET,
            "POST",
            &PATHS,
            "1700000000",
            &format!("sha256={sig}"),
            body
        ));
    }

    // ─── Timestamp unit conversion ───

    #[test]
    fn alternate_timestamp_converts_both_ways() {
        assert_eq!(alternate_timestamp("1700000000").as_deref(), Some("1700000000000"));
        assert_eq!(alternate_timestamp("1700000000000").as_deref(), Some("1700000000"));
    }

    #[test]
    fn alternate_timestamp_rejects_garbage() {
        assert_eq!(alternate_timestamp("soon"), None);
        assert_eq!(alternate_timestamp(""), None);
    }

    #[test]
    fn alternate_timestamp_handles_overflow() {
        assert_eq!(alternate_timestamp(&i64::MAX.to_string()).as_deref(), Some("9223372036854775"));
    }

    #[test]
    fn variant_order_is_the_published_contract() {
        assert_eq!(
            SIGNING_VARIANTS,
            [
                SigningVariant::PathScopedRawTs,
                SigningVariant::PathScopedAltTs,
                SigningVariant::LegacyRawTs,
                SigningVariant::LegacyAltTs,
            ]
        );
    }

    // ─── Property tests ───

    proptest! {
        /// Signing with the current convention always verifies.
        #[test]
        fn prop_path_scoped_roundtrip(
            body in prop::collection::vec(any::<u8>(), 0..256),
            ts in 1_000_000_000i64..4_000_000_000,
        ) {
            let ts = ts.to_string();
            let sig = sign_hex(&signing_base(&ts, "POST", "/api/cron/dispatch", &body));
            prop_assert!(verify_trigger_signature(SECRET, "POST", &PATHS, &ts, &sig, &body));
        }

        /// Signing with the legacy convention always verifies.
        #[test]
        fn prop_legacy_roundtrip(
            body in prop::collection::vec(any::<u8>(), 0..256),
            ts in 1_000_000_000i64..4_000_000_000,
        ) {
            let ts = ts.to_string();
            let sig = sign_hex(&legacy_signing_base(&ts, &body));
            prop_assert!(verify_trigger_signature(SECRET, "POST", &PATHS, &ts, &sig, &body));
        }

        /// A different secret never verifies.
        #[test]
        fn prop_wrong_secret_fails(
            body in prop::collection::vec(any::<u8>(), 0..256),
            other in prop::collection::vec(any::<u8>(), 1..64),
        ) {
            prop_assume!(other != SECRET.to_vec());
            let sig = hex::encode(compute_signature(
                &signing_base("1700000000", "POST", "/api/cron/dispatch", &body),
                &other,
            ));
            prop_assert!(!verify_trigger_signature(SECRET, "POST", &PATHS, "1700000000", &sig, &body));
        }

        /// Malformed headers never panic.
        #[test]
        fn prop_malformed_header_no_panic(header in ".*", body in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = parse_signature_header(&header);
            let _ = verify_trigger_signature(SECRET, "POST", &PATHS, "1700000000", &header, &body);
        }

        /// Seconds↔milliseconds conversion is an involution in range.
        #[test]
        fn prop_alternate_ts_involution(ts in 1_000_000_000i64..4_000_000_000) {
            let secs = ts.to_string();
            let millis = alternate_timestamp(&secs).unwrap();
            prop_assert_eq!(alternate_timestamp(&millis), Some(secs));
        }
    }
}
