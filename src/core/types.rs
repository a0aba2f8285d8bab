use serde::{
    Deserialize,
    Serialize,
};

use crate::core::{
    hash::HashMap,
    id::Id,
    uri::Uri,
};

pub type Integer = u64;

pub type Dictionary = HashMap<String, Value>;

pub type List = Vec<Value>;

/// A dynamically-typed value carried in the free-form portions of WAMP messages (options,
/// details, arguments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(Integer),
    String(String),
    Bool(bool),
    Dictionary(Dictionary),
    List(List),
}

impl Value {
    /// The value as an integer, if it is one.
    pub fn integer(&self) -> Option<Integer> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as a string, if it is one.
    pub fn string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// The value as a boolean, if it is one.
    pub fn bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The value as a dictionary, if it is one.
    pub fn dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(value) => Some(value),
            _ => None,
        }
    }

    /// The value as a list, if it is one.
    pub fn list(&self) -> Option<&List> {
        match self {
            Self::List(value) => Some(value),
            _ => None,
        }
    }

    /// The value as a WAMP ID, if it is an integer in the ID range.
    pub fn id(&self) -> Option<Id> {
        self.integer().and_then(|value| Id::try_from(value).ok())
    }

    /// The value as a URI, if it is a string holding a valid one.
    pub fn uri(&self) -> Option<Uri> {
        self.string().and_then(|value| Uri::try_from(value).ok())
    }
}

impl From<Integer> for Value {
    fn from(value: Integer) -> Self {
        Self::Integer(value)
    }
}

impl From<Id> for Value {
    fn from(value: Id) -> Self {
        Self::Integer(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Uri> for Value {
    fn from(value: Uri) -> Self {
        Self::String(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Dictionary> for Value {
    fn from(value: Dictionary) -> Self {
        Self::Dictionary(value)
    }
}

impl From<List> for Value {
    fn from(value: List) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod types_test {
    use crate::core::{
        id::Id,
        types::{
            Dictionary,
            Value,
        },
    };

    #[test]
    fn accessors_report_presence() {
        let value = Value::Integer(123);
        assert_eq!(value.integer(), Some(123));
        assert_eq!(value.id(), Some(Id::try_from(123).unwrap()));
        assert_eq!(value.string(), None);
        assert_eq!(value.bool(), None);

        let value = Value::String("com.example.topic".to_owned());
        assert_eq!(value.string(), Some("com.example.topic"));
        assert_matches::assert_matches!(value.uri(), Some(uri) => {
            assert_eq!(uri.as_ref(), "com.example.topic");
        });
        assert_eq!(value.integer(), None);

        let value = Value::Dictionary(Dictionary::default());
        assert_matches::assert_matches!(value.dictionary(), Some(_));
        assert_eq!(value.list(), None);
    }

    #[test]
    fn id_accessor_rejects_out_of_range() {
        assert_eq!(Value::Integer(0).id(), None);
        assert_eq!(Value::Integer(1 << 60).id(), None);
    }
}
