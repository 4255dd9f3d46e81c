//! Webhook signature verification (HMAC-SHA256).
//!
//! GitHub signs each delivery with the hook's shared secret and sends the
//! result in `X-Hub-Signature-256` as `sha256=<hex>`. The secret is the only
//! thing standing between the internet and the worker's shell, so deliveries
//! are verified before their body is even parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parses a signature header (`sha256=<hex>`) into raw bytes.
///
/// Returns `None` for a missing prefix, another algorithm or bad hex.
///
/// ```
/// use ci_worker::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=0aff"), Some(vec![0x0a, 0xff]));
/// assert!(parse_signature_header("sha1=0aff").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

/// HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never comes back empty.
    HmacSha256::new_from_slice(secret)
        .map(|mut mac| {
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        })
        .unwrap_or_default()
}

/// Formats a signature as a header value, `sha256=<hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Checks `signature_header` against `payload` signed with `secret`.
///
/// The comparison is constant-time.
///
/// ```
/// use ci_worker::webhooks::{compute_signature, format_signature_header, verify_signature};
///
/// let header = format_signature_header(&compute_signature(b"{}", b"s3cret"));
/// assert!(verify_signature(b"{}", &header, b"s3cret"));
/// assert!(!verify_signature(b"{}", &header, b"other"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_parsing() {
        assert_eq!(parse_signature_header("sha256=ABCD"), Some(vec![0xab, 0xcd]));
        assert_eq!(parse_signature_header("sha256="), Some(vec![]));
        assert_eq!(parse_signature_header("sha256=abc"), None);
        assert_eq!(parse_signature_header("abcd"), None);
        assert_eq!(parse_signature_header(""), None);
    }

    /// Test vector from GitHub's webhook validation guide.
    #[test]
    fn github_documentation_vector() {
        let header =
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify_signature(
            b"Hello, World!",
            header,
            b"It's a Secret to Everybody"
        ));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for header in ["", "sha256=", "sha256=zz", "sha1=abcd", "garbage"] {
            assert!(!verify_signature(b"{}", header, b"secret"), "{header}");
        }
    }

    #[test]
    fn empty_secret_still_signs() {
        let sig = compute_signature(b"payload", b"");
        assert_eq!(sig.len(), 32);
        assert!(verify_signature(
            b"payload",
            &format_signature_header(&sig),
            b""
        ));
    }

    proptest! {
        #[test]
        fn signed_payloads_verify(payload: Vec<u8>, secret: Vec<u8>) {
            let header = format_signature_header(&compute_signature(&payload, &secret));
            prop_assert!(verify_signature(&payload, &header, &secret));
        }

        #[test]
        fn other_secret_fails(payload: Vec<u8>, secret: Vec<u8>, other: Vec<u8>) {
            prop_assume!(secret != other);
            let header = format_signature_header(&compute_signature(&payload, &secret));
            prop_assert!(!verify_signature(&payload, &header, &other));
        }

        #[test]
        fn tampered_payload_fails(payload: Vec<u8>, tampered: Vec<u8>, secret: Vec<u8>) {
            prop_assume!(payload != tampered);
            let header = format_signature_header(&compute_signature(&payload, &secret));
            prop_assert!(!verify_signature(&tampered, &header, &secret));
        }

        #[test]
        fn arbitrary_headers_never_panic(header: String, payload: Vec<u8>) {
            let _ = verify_signature(&payload, &header, b"secret");
        }
    }
}
