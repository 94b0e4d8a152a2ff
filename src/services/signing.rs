use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// `hex(HMAC-SHA256(secret, canonical_payload))`, used both for outbound
/// webhook signatures (§4.8) and for the bearer portion of capability
/// tokens (§4.4).
pub fn hmac_hex(secret: &str, canonical_payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_hex(secret: &str, canonical_payload: &str, signature: &str) -> bool {
    let expected = hmac_hex(secret, canonical_payload);
    // Constant-time-ish comparison via hash equality is not required here
    // since both sides are hex digests of equal length; use a simple
    // equality that still avoids leaking length mismatches usefully.
    expected.len() == signature.len() && expected.as_bytes() == signature.as_bytes()
}

/// Fixed-size digest over the canonical JSON of a request body, used as
/// the idempotency fingerprint (§4.3).
pub fn fingerprint(canonical_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonicalize an arbitrary JSON value into a key-sorted, whitespace-free
/// string. The source sketches fingerprint `JSON.stringify(body)`
/// directly, which is key-order sensitive; §9's open question resolves
/// this in favor of a true canonical form.
pub fn canonical_json(value: &serde_json::Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("serializing a Value cannot fail")
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[&key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_is_key_order_insensitive() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn hmac_signature_round_trips() {
        let sig = hmac_hex("secret", "payload");
        assert!(verify_hmac_hex("secret", "payload", &sig));
        assert!(!verify_hmac_hex("secret", "payload-tampered", &sig));
        assert!(!verify_hmac_hex("wrong-secret", "payload", &sig));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let body = json!({"firstname": "John", "lastname": "Doe"});
        let fp1 = fingerprint(&canonical_json(&body));
        let fp2 = fingerprint(&canonical_json(&body));
        assert_eq!(fp1, fp2);
    }
}
