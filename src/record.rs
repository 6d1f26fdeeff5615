use serde_json::{Map, Value};

/// One input row. Field names are resolved through a `FieldMapping`.
pub type Record = Map<String, Value>;

/// Hashable grouping key for a JSON value.
///
/// Numbers compare by value (`1` and `1.0` are the same key, as are `0` and
/// `-0`); values of different JSON types never collide. An absent attribute
/// is its own key, distinct from an explicit `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Missing,
    Null,
    Bool(bool),
    Number(u64),
    Text(String),
    Other(String),
}

impl RecordKey {
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            None => RecordKey::Missing,
            Some(Value::Null) => RecordKey::Null,
            Some(Value::Bool(flag)) => RecordKey::Bool(*flag),
            Some(Value::Number(number)) => match number.as_f64() {
                Some(n) if n == 0.0 => RecordKey::Number(0.0f64.to_bits()),
                Some(n) => RecordKey::Number(n.to_bits()),
                None => RecordKey::Other(number.to_string()),
            },
            Some(Value::String(text)) => RecordKey::Text(text.clone()),
            Some(other) => RecordKey::Other(other.to_string()),
        }
    }
}

/// Lenient numeric coercion. Anything that is not a usable number is 0.
pub fn to_number(value: Option<&Value>) -> f64 {
    let coerced = match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::Bool(true)) => 1.0,
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(0.0)
            }
        }
        _ => 0.0,
    };
    if coerced.is_finite() {
        coerced
    } else {
        0.0
    }
}

/// Whether a value counts as set: not null, not `false`, not `0`, not `""`.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    }
}

/// Display form of a scalar: strings unquoted, other values as JSON text.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Like [`display`], but `None` for null or missing values.
pub fn text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(value) => Some(display(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_coerce_leniently() {
        assert_eq!(to_number(Some(&json!(3))), 3.0);
        assert_eq!(to_number(Some(&json!(" 2.5 "))), 2.5);
        assert_eq!(to_number(Some(&json!(""))), 0.0);
        assert_eq!(to_number(Some(&json!("many"))), 0.0);
        assert_eq!(to_number(Some(&json!(true))), 1.0);
        assert_eq!(to_number(Some(&json!(null))), 0.0);
        assert_eq!(to_number(Some(&json!([1]))), 0.0);
        assert_eq!(to_number(None), 0.0);
    }

    #[test]
    fn keys_compare_numbers_by_value() {
        assert_eq!(RecordKey::of(Some(&json!(1))), RecordKey::of(Some(&json!(1.0))));
        assert_ne!(RecordKey::of(Some(&json!(1))), RecordKey::of(Some(&json!("1"))));
    }

    #[test]
    fn missing_and_null_keys_stay_apart() {
        assert_eq!(RecordKey::of(None), RecordKey::Missing);
        assert_eq!(RecordKey::of(Some(&json!(null))), RecordKey::Null);
        assert_ne!(RecordKey::of(None), RecordKey::of(Some(&json!(null))));
    }

    #[test]
    fn truthiness_matches_set_values() {
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(is_truthy(Some(&json!(" "))));
        assert!(is_truthy(Some(&json!(7))));
    }
}
