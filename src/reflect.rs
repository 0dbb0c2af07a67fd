use serde::Serialize;
use std::collections::BTreeMap;

const MAX_SCALAR_LEN: usize = 200;
const MAX_EXCEPTION_FIELD_LEN: usize = 500;
const MAX_CHILDREN: usize = 10;

/// The host-language stand-in for "a live value." Rust has no universal
/// runtime reflection, so callers build one of these from whatever they
/// have in hand before handing it to [`reflect`].
#[derive(Debug, Clone)]
pub enum ReflectValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<ReflectValue>),
    Map(Vec<(String, ReflectValue)>),
    Object { type_name: String },
    Other(&'static str),
}

/// Opt-in for custom exception/error types to expose field-level capture.
/// Anything that only implements [`std::error::Error`] gets the blanket
/// impl below, which contributes no fields.
pub trait CapturedFields {
    fn captured_fields(&self) -> Vec<(&'static str, ReflectValue)> {
        Vec::new()
    }
}

impl<T: std::error::Error + ?Sized> CapturedFields for T {}

/// A node in the size- and depth-bounded variable tree produced by
/// [`reflect`].
#[derive(Debug, Clone, Serialize)]
pub struct VariableNode {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Option<String>,
    pub is_null: bool,
    pub is_truncated: bool,
    pub children: Option<BTreeMap<String, VariableNode>>,
}

impl VariableNode {
    fn leaf(name: impl Into<String>, type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: Some(value.into()),
            is_null: false,
            is_truncated: false,
            children: None,
        }
    }
}

fn truncate_string(s: &str, cap: usize, ellipsis: bool) -> (String, bool) {
    if s.len() <= cap {
        return (s.to_string(), false);
    }
    let mut cut: String = s.chars().take(cap).collect();
    if cut.len() > cap {
        cut.truncate(cap);
    }
    if ellipsis {
        cut.push_str("...");
    }
    (cut, true)
}

/// Converts a live value into a size-bounded, depth-bounded variable tree.
///
/// `depth` is the current recursion depth; `max_depth` the configured cap.
/// `is_exception_field` widens the scalar-string cap to 500 bytes and
/// suppresses the `...` suffix, matching the exception-own-field policy.
pub fn reflect(name: &str, value: &ReflectValue, depth: u32, max_depth: u32, is_exception_field: bool) -> VariableNode {
    if depth > max_depth {
        let mut node = VariableNode::leaf(name, "unknown", "<max depth exceeded>");
        node.is_truncated = true;
        return node;
    }

    match value {
        ReflectValue::Null => {
            let mut node = VariableNode::leaf(name, "null", "null");
            node.is_null = true;
            node
        }
        ReflectValue::Bool(b) => VariableNode::leaf(name, "bool", if *b { "true" } else { "false" }),
        ReflectValue::Int(i) => VariableNode::leaf(name, "int", i.to_string()),
        ReflectValue::Float(f) => VariableNode::leaf(name, "float", f.to_string()),
        ReflectValue::Str(s) => {
            let cap = if is_exception_field { MAX_EXCEPTION_FIELD_LEN } else { MAX_SCALAR_LEN };
            let (value, truncated) = truncate_string(s, cap, !is_exception_field);
            let mut node = VariableNode::leaf(name, "string", value);
            node.is_truncated = truncated;
            node
        }
        ReflectValue::Seq(items) => {
            let entries: Vec<(String, ReflectValue)> = items.iter().enumerate().map(|(i, item)| (format!("arg{i}"), item.clone())).collect();
            reflect_capped_map(name, &entries, depth, max_depth, MAX_CHILDREN)
        }
        ReflectValue::Map(entries) => reflect_capped_map(name, entries, depth, max_depth, MAX_CHILDREN),
        ReflectValue::Object { type_name } => VariableNode::leaf(name, type_name.clone(), type_name.clone()),
        ReflectValue::Other(type_name) => VariableNode::leaf(name, *type_name, format!("[{type_name}]")),
    }
}

/// Builds an `array`-typed node over keyed entries with a caller-chosen
/// child cap instead of the generic [`MAX_CHILDREN`]. Used for request
/// context views (`$GET`/`$POST`/`$SESSION`) whose caps differ from the
/// default map/sequence cap.
pub fn reflect_capped_map(name: &str, entries: &[(String, ReflectValue)], depth: u32, max_depth: u32, cap: usize) -> VariableNode {
    let mut node = VariableNode::leaf(name, "array", format!("Array({})", entries.len()));
    if depth < max_depth && entries.len() <= cap {
        let mut children = BTreeMap::new();
        for (key, item) in entries {
            children.insert(key.clone(), reflect(key, item, depth + 1, max_depth, false));
        }
        node.children = Some(children);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_exceeding_max_is_truncated() {
        let node = reflect("x", &ReflectValue::Int(1), 4, 3, false);
        assert!(node.is_truncated);
        assert_eq!(node.value.as_deref(), Some("<max depth exceeded>"));
    }

    #[test]
    fn long_string_truncates_with_ellipsis() {
        let s = "a".repeat(600);
        let node = reflect("s", &ReflectValue::Str(s), 0, 10, false);
        assert!(node.is_truncated);
        assert_eq!(node.value.as_ref().unwrap().len(), 203);
        assert!(node.value.as_ref().unwrap().ends_with("..."));
    }

    #[test]
    fn exception_field_uses_wider_cap_without_ellipsis() {
        let s = "a".repeat(600);
        let node = reflect("message", &ReflectValue::Str(s), 0, 10, true);
        assert!(node.is_truncated);
        assert_eq!(node.value.as_ref().unwrap().len(), 500);
        assert!(!node.value.as_ref().unwrap().ends_with("..."));
    }

    #[test]
    fn short_string_is_untouched() {
        let node = reflect("s", &ReflectValue::Str("hi".to_string()), 0, 10, false);
        assert!(!node.is_truncated);
        assert_eq!(node.value.as_deref(), Some("hi"));
    }

    #[test]
    fn null_sets_is_null() {
        let node = reflect("n", &ReflectValue::Null, 0, 10, false);
        assert!(node.is_null);
    }

    #[test]
    fn sequence_over_ten_elements_has_no_children() {
        let items: Vec<_> = (0..11).map(ReflectValue::Int).collect();
        let node = reflect("arr", &ReflectValue::Seq(items), 0, 10, false);
        assert!(node.children.is_none());
        assert_eq!(node.value.as_deref(), Some("Array(11)"));
    }

    #[test]
    fn map_children_are_keyed_by_name() {
        let entries = vec![("a".to_string(), ReflectValue::Int(1))];
        let node = reflect("m", &ReflectValue::Map(entries), 0, 10, false);
        let children = node.children.unwrap();
        assert!(children.contains_key("a"));
    }
}
