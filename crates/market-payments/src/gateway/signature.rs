//! IPN Signature
//!
//! NOWPayments signs the IPN body as HMAC-SHA512 over the JSON with keys
//! sorted at every depth, serialized without whitespace, keyed with the IPN
//! secret and hex-encoded into the `x-nowpayments-sig` header.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

/// Sorted-key compact serialization of a JSON object body.
///
/// `None` if the body is not a JSON object.
pub fn canonical_json(payload: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::to_string(&sort_keys(value)).ok()
}

// Rebuilt explicitly so ordering holds even if serde_json's
// `preserve_order` gets switched on somewhere in the graph.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Hex signature for `payload`, or `None` if it is not a JSON object
pub fn sign(secret: &str, payload: &[u8]) -> Option<String> {
    let canonical = canonical_json(payload)?;
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(canonical.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `signature` against `payload`
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(canonical) = canonical_json(payload) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "ipn-secret";

    #[test]
    fn test_canonical_sorts_nested_keys() {
        let body = br#"{"b": 1, "a": {"z": true, "y": [ {"d": 1, "c": 2} ]}}"#;
        assert_eq!(
            canonical_json(body).unwrap(),
            r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_sign_then_verify() {
        let body = br#"{"payment_id": 42, "payment_status": "finished"}"#;
        let sig = sign(SECRET, body).unwrap();

        assert!(verify(SECRET, body, &sig));
        assert!(verify(SECRET, body, &sig.to_uppercase()));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = br#"{"payment_id":42,"payment_status":"finished"}"#;
        let b = br#"{"payment_status":"finished","payment_id":42}"#;
        assert_eq!(sign(SECRET, a), sign(SECRET, b));
    }

    #[test]
    fn test_rejects_tampering_and_garbage() {
        let body = br#"{"payment_id": 42, "payment_status": "finished"}"#;
        let sig = sign(SECRET, body).unwrap();

        let tampered = br#"{"payment_id": 42, "payment_status": "failed"}"#;
        assert!(!verify(SECRET, tampered, &sig));
        assert!(!verify("other-secret", body, &sig));
        assert!(!verify(SECRET, body, "not-hex"));
        assert!(!verify(SECRET, body, ""));
        assert!(!verify(SECRET, b"not json", &sig));
        assert!(!verify(SECRET, b"[1,2,3]", &sig));
        assert!(!verify("", body, &sig));
    }
}
