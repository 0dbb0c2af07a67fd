use crate::reflect::ReflectValue;

const SENSITIVE_SUBSTRINGS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "auth",
    "authorization",
    "credit_card",
    "creditcard",
    "cvv",
    "ssn",
    "private_key",
    "privatekey",
];

const REDACTED: &str = "[REDACTED]";

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_SUBSTRINGS.iter().any(|pattern| lower.contains(pattern))
}

/// Recursively rewrites a mapping, replacing any value whose key matches a
/// sensitive substring (case-insensitive) with the literal `"[REDACTED]"`.
/// Descendants of a redacted key are never walked.
pub fn redact(value: &ReflectValue) -> ReflectValue {
    match value {
        ReflectValue::Map(entries) => ReflectValue::Map(
            entries
                .iter()
                .map(|(key, val)| {
                    if is_sensitive_key(key) {
                        (key.clone(), ReflectValue::Str(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact(val))
                    }
                })
                .collect(),
        ),
        ReflectValue::Seq(items) => ReflectValue::Seq(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, ReflectValue)>) -> ReflectValue {
        ReflectValue::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn redacts_password_field() {
        let input = map(vec![("password", ReflectValue::Str("hunter2".to_string()))]);
        let ReflectValue::Map(out) = redact(&input) else { panic!() };
        let ReflectValue::Str(v) = &out[0].1 else { panic!() };
        assert_eq!(v, "[REDACTED]");
    }

    #[test]
    fn case_insensitive_match() {
        let input = map(vec![("API_KEY", ReflectValue::Str("k".to_string()))]);
        let ReflectValue::Map(out) = redact(&input) else { panic!() };
        let ReflectValue::Str(v) = &out[0].1 else { panic!() };
        assert_eq!(v, "[REDACTED]");
    }

    #[test]
    fn preserves_non_sensitive_keys() {
        let input = map(vec![("id", ReflectValue::Str("u".to_string()))]);
        let ReflectValue::Map(out) = redact(&input) else { panic!() };
        let ReflectValue::Str(v) = &out[0].1 else { panic!() };
        assert_eq!(v, "u");
    }

    #[test]
    fn descends_into_nested_maps() {
        let input = map(vec![("card", map(vec![("cvv", ReflectValue::Str("123".to_string()))]))]);
        let ReflectValue::Map(out) = redact(&input) else { panic!() };
        let ReflectValue::Map(inner) = &out[0].1 else { panic!() };
        let ReflectValue::Str(v) = &inner[0].1 else { panic!() };
        assert_eq!(v, "[REDACTED]");
    }
}
