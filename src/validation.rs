use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::FieldError;

static MONEY_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(amount|fee|settlement|price|total|balance)").unwrap());

/// Generic validation over the opaque submission payload (§4.6 step 5).
/// The hundreds of domain fields are out of scope; what the gateway can
/// enforce without knowing the schema is: the payload is a JSON object,
/// its serialized size is bounded, and any field that looks like a money
/// amount carries at most four fractional digits.
pub fn validate_payload(payload: &Value, max_size_bytes: usize) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if !payload.is_object() {
        errors.push(FieldError::new("$", "payload must be a JSON object"));
        return Err(errors);
    }

    let serialized = serde_json::to_string(payload).unwrap_or_default();
    if serialized.len() > max_size_bytes {
        errors.push(FieldError::new(
            "$",
            format!("payload exceeds {max_size_bytes} byte limit"),
        ));
    }

    walk_money_fields("$", payload, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn walk_money_fields(path: &str, value: &Value, errors: &mut Vec<FieldError>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let field_path = format!("{path}.{key}");
                if MONEY_FIELD.is_match(key) {
                    if let Some(n) = v.as_f64() {
                        if fractional_digits(n) > 4 {
                            errors.push(FieldError::new(
                                &field_path,
                                "monetary fields support at most four fractional digits",
                            ));
                        }
                    }
                }
                walk_money_fields(&field_path, v, errors);
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                walk_money_fields(&format!("{path}[{idx}]"), item, errors);
            }
        }
        _ => {}
    }
}

fn fractional_digits(n: f64) -> usize {
    let text = format!("{n}");
    match text.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len(),
        None => 0,
    }
}

pub fn validate_idempotency_key(key: &str) -> Result<(), FieldError> {
    uuid::Uuid::parse_str(key)
        .map(|_| ())
        .map_err(|_| FieldError::new("X-Idempotency-Key", "must be a UUID"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_object_payload() {
        assert!(validate_payload(&json!([1, 2, 3]), 1_000).is_err());
    }

    #[test]
    fn rejects_money_fields_with_too_many_decimals() {
        let payload = json!({"settlement_amount": 100.12345});
        let errors = validate_payload(&payload, 10_000).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "$.settlement_amount");
    }

    #[test]
    fn allows_money_fields_within_bound() {
        let payload = json!({"settlement_amount": 100.1234, "firstname": "John"});
        assert!(validate_payload(&payload, 10_000).is_ok());
    }
}
