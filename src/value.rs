use std::collections::BTreeMap;
use std::sync::Arc;

/// Dynamic value tree held by a form: scalars at the leaves, records at
/// every form level, lists for list-typed leaves.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    pub fn record() -> Self {
        Value::Record(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Record(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Presence check backing `required`. Numbers are present whenever they
    /// are finite, zero included; `Null` and NaN/infinities are absent.
    pub fn is_present(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Number(value) => value.is_finite(),
            Value::String(value) => !value.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Record(_) => true,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Record(entries)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Value {
    fn from(entries: [(&str, Value); N]) -> Self {
        Value::Record(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_owned(), value))
                .collect(),
        )
    }
}

/// Error tree structurally parallel to a form's value tree. Valid leaves
/// carry no message; valid own keys are absent from their `Node` entirely.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorTree {
    Leaf(Option<Arc<str>>),
    List(Vec<ErrorTree>),
    Node(BTreeMap<String, ErrorTree>),
}

impl ErrorTree {
    pub fn clean() -> Self {
        ErrorTree::Leaf(None)
    }

    pub fn message(message: impl Into<Arc<str>>) -> Self {
        ErrorTree::Leaf(Some(message.into()))
    }

    /// Recursive validity fold: a node is valid iff it is empty or all of
    /// its children are valid; a list iff all elements are; a leaf iff it
    /// carries no message.
    pub fn is_valid(&self) -> bool {
        match self {
            ErrorTree::Leaf(message) => message.is_none(),
            ErrorTree::List(items) => items.iter().all(ErrorTree::is_valid),
            ErrorTree::Node(entries) => entries.values().all(ErrorTree::is_valid),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ErrorTree> {
        match self {
            ErrorTree::Node(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<&ErrorTree> {
        match self {
            ErrorTree::List(items) => items.get(index),
            _ => None,
        }
    }

    /// Leaf message, if this is a failing leaf.
    pub fn leaf_message(&self) -> Option<&str> {
        match self {
            ErrorTree::Leaf(message) => message.as_deref(),
            _ => None,
        }
    }
}

impl Default for ErrorTree {
    fn default() -> Self {
        ErrorTree::clean()
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn presence_accepts_zero_and_rejects_null() {
        assert!(Value::Number(0.0).is_present());
        assert!(!Value::Number(f64::NAN).is_present());
        assert!(!Value::Null.is_present());
        assert!(!Value::String(String::new()).is_present());
        assert!(Value::String("x".into()).is_present());
    }

    #[test]
    fn validity_fold_recurses_through_nodes_and_lists() {
        let clean = ErrorTree::Node(BTreeMap::new());
        assert!(clean.is_valid());

        let mut inner = BTreeMap::new();
        inner.insert("name".to_owned(), ErrorTree::message("bad"));
        let mut outer = BTreeMap::new();
        outer.insert("empty".to_owned(), ErrorTree::Node(BTreeMap::new()));
        outer.insert("nested".to_owned(), ErrorTree::Node(inner));
        assert!(!ErrorTree::Node(outer).is_valid());

        let list = ErrorTree::List(vec![ErrorTree::clean(), ErrorTree::message("bad")]);
        assert!(!list.is_valid());
    }
}
