//! Webhook signature verification.
//!
//! The provider signs the raw request body with HMAC-SHA1 and sends the
//! hex digest in a header. Verification runs over the exact bytes
//! received, before any JSON parsing, and compares in constant time.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use mailroom_core::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// Verifies a hex HMAC-SHA1 signature over the raw body.
///
/// # Errors
///
/// `Unauthorized` for a malformed or mismatching signature; `Unexpected`
/// only if the secret itself is unusable.
pub fn verify_signature(secret: &[u8], body: &[u8], provided_hex: &str) -> Result<()> {
    let provided = hex::decode(provided_hex.trim())
        .map_err(|_| Error::unauthorized("malformed webhook signature"))?;

    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|err| Error::unexpected(format!("unusable webhook secret: {err}")))?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if !constant_time_eq(&expected, &provided) {
        return Err(Error::unauthorized("webhook signature mismatch"));
    }
    Ok(())
}

/// Computes the hex signature the provider would send for `body`.
///
/// Used by tests and by outbound verification tooling.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|err| Error::unexpected(format!("unusable webhook secret: {err}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Length check first, then a full XOR pass so timing does not leak the
/// matching prefix length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"webhook-secret";

    #[test]
    fn round_trip_verifies() {
        let body = br#"{"action":"sub_group_created"}"#;
        let signature = sign(SECRET, body).unwrap();
        verify_signature(SECRET, body, &signature).unwrap();
    }

    #[test]
    fn any_flipped_signature_byte_is_rejected() {
        let body = b"payload bytes";
        let signature = sign(SECRET, body).unwrap();

        for i in 0..signature.len() {
            let mut tampered = signature.clone().into_bytes();
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            if tampered == signature {
                continue;
            }
            assert!(verify_signature(SECRET, body, &tampered).is_err(), "byte {i}");
        }
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign(SECRET, b"original").unwrap();
        assert!(verify_signature(SECRET, b"tampered", &signature).is_err());
    }

    #[test]
    fn wrong_length_and_non_hex_are_rejected() {
        let body = b"payload";
        let signature = sign(SECRET, body).unwrap();
        assert!(verify_signature(SECRET, body, &signature[..10]).is_err());
        assert!(verify_signature(SECRET, body, "zz-not-hex").is_err());
        assert!(verify_signature(SECRET, body, "").is_err());
    }
}
