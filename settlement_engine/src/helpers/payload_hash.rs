use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 of `bytes`, encoded as unpadded base64url.
pub fn sha256_base64url<B: AsRef<[u8]>>(bytes: B) -> String {
    let digest = Sha256::digest(bytes.as_ref());
    base64::encode_config(digest, base64::URL_SAFE_NO_PAD)
}

/// Content hash of a JSON payload.
///
/// `serde_json` serializes object keys in sorted order, so two payloads with the same content always hash the same,
/// regardless of how their keys were ordered on the wire.
pub fn hash_payload(payload: &Value) -> String {
    sha256_base64url(payload.to_string())
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_digest() {
        // sha256("abc")
        assert_eq!(sha256_base64url("abc"), "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0");
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": [1, 2]}"#).unwrap();
        let b = json!({"a": [1, 2], "b": 1});
        assert_eq!(hash_payload(&a), hash_payload(&b));
        assert_ne!(hash_payload(&a), hash_payload(&json!({"a": [2, 1], "b": 1})));
    }
}
