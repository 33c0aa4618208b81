//! HMAC-SHA256 webhook authentication.
//!
//! The host signs each payload with the shared secret and sends the result as
//! `sha256=<hex>` in the `X-Hub-Signature-256` header. Verification happens
//! before the payload is parsed; a bad signature never reaches a plugin.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Decodes a `sha256=<hex>` header. `None` for any other shape.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

fn mac_for(secret: &[u8]) -> HmacSha256 {
    // HMAC is defined for keys of every length, so this cannot fail.
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(e) => unreachable!("hmac rejected a key: {e}"),
    }
}

pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = mac_for(secret);
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Signs `payload` and renders the header value the host would send.
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    format_signature_header(&compute_signature(payload, secret))
}

/// True iff `signature_header` is the HMAC of `payload` under `secret`.
/// The comparison is constant-time.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let mut mac = mac_for(secret);
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_parsing() {
        assert_eq!(parse_signature_header("sha256=1234abcd"), Some(vec![0x12, 0x34, 0xab, 0xcd]));
        assert_eq!(parse_signature_header("sha256=ABCD"), Some(vec![0xab, 0xcd]));
        assert_eq!(parse_signature_header("1234abcd"), None);
        assert_eq!(parse_signature_header("sha1=1234abcd"), None);
        assert_eq!(parse_signature_header("sha256=xyz"), None);
        assert_eq!(parse_signature_header("sha256=abc"), None);
    }

    #[test]
    fn mismatched_signature_is_rejected() {
        let body = b"{\"zen\":\"hi\"}";
        let good = sign(body, b"secret");
        assert!(verify_signature(body, &good, b"secret"));
        assert!(!verify_signature(body, "sha256=deadbeef", b"secret"));
        assert!(!verify_signature(body, &good, b"other"));
        assert!(!verify_signature(b"tampered", &good, b"secret"));
        assert!(!verify_signature(body, "", b"secret"));
    }

    #[test]
    fn signatures_are_sha256_sized() {
        assert_eq!(compute_signature(b"", b"").len(), 32);
        assert_eq!(format_signature_header(&[0x12, 0x34]), "sha256=1234");
    }

    proptest! {
        #[test]
        fn signed_payloads_verify(payload: Vec<u8>, secret: Vec<u8>) {
            prop_assert!(verify_signature(&payload, &sign(&payload, &secret), &secret));
        }

        #[test]
        fn modified_payloads_fail(original: Vec<u8>, modified: Vec<u8>, secret: Vec<u8>) {
            prop_assume!(original != modified);
            prop_assert!(!verify_signature(&modified, &sign(&original, &secret), &secret));
        }

        #[test]
        fn arbitrary_headers_never_panic(header: String, payload: Vec<u8>) {
            let _ = verify_signature(&payload, &header, b"secret");
        }
    }
}
