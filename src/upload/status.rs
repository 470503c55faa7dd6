//! Status extraction from CheckStatus payloads.
//!
//! The status value is looked up in this order and the first hit wins:
//! 1. `status`
//! 2. `data.status`
//! 3. `data[0].status`
//!
//! Integers and integer strings convert; anything else is indeterminate.

use super::types::{StatusCode, StatusSnapshot};
use serde_json::Value;

fn locate(payload: &Value) -> Option<&Value> {
    if let Some(status) = payload.get("status") {
        return Some(status);
    }
    match payload.get("data")? {
        Value::Object(map) => map.get("status"),
        Value::Array(items) => items.first()?.get("status"),
        _ => None,
    }
}

fn to_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn extract_status(payload: &Value) -> StatusSnapshot {
    let raw_status = locate(payload).filter(|v| !v.is_null()).cloned();
    let status = raw_status
        .as_ref()
        .and_then(to_code)
        .and_then(StatusCode::from_code);

    StatusSnapshot {
        status,
        raw_status,
        payload: payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_documented_shapes_yield_same_status() {
        let shapes = [
            json!({"status": 3}),
            json!({"data": {"status": 3}}),
            json!({"data": [{"status": 3}, {"status": 1}]}),
        ];
        for payload in shapes {
            assert_eq!(extract_status(&payload).status, Some(StatusCode::Ready), "{}", payload);
        }
    }

    #[test]
    fn top_level_status_takes_precedence() {
        let snap = extract_status(&json!({"status": 1, "data": {"status": 4}}));
        assert_eq!(snap.status, Some(StatusCode::Analyzing));
    }

    #[test]
    fn numeric_strings_convert() {
        assert_eq!(extract_status(&json!({"status": "4"})).status, Some(StatusCode::Submitted));
        assert_eq!(extract_status(&json!({"status": 2.0})).status, Some(StatusCode::ParseFailed));
    }

    #[test]
    fn unusable_values_are_indeterminate() {
        let cases = [
            json!({}),
            json!({"status": null}),
            json!({"status": "done"}),
            json!({"status": 42}),
            json!({"data": []}),
            json!({"data": "3"}),
            json!(null),
        ];
        for payload in cases {
            assert_eq!(extract_status(&payload).status, None, "{}", payload);
        }

        let snap = extract_status(&json!({"status": "done"}));
        assert_eq!(snap.raw_status, Some(json!("done")));
    }
}
