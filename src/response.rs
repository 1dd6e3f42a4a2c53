//! Standard response envelope helpers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{occurences, objects}`: the shape of every successful result, single item or collection.
/// `occurences` is the matched count, independent of how many objects are serialized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub occurences: u64,
    pub objects: Vec<Map<String, Value>>,
}

impl Envelope {
    pub fn one(object: Map<String, Value>) -> Self {
        Envelope {
            occurences: 1,
            objects: vec![object],
        }
    }

    /// `count` defaults to the number of objects.
    pub fn many(objects: Vec<Map<String, Value>>, count: Option<u64>) -> Self {
        let occurences = count.unwrap_or(objects.len() as u64);
        Envelope { occurences, objects }
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::new();
        map.insert("occurences".into(), Value::from(self.occurences));
        map.insert(
            "objects".into(),
            Value::Array(self.objects.into_iter().map(Value::Object).collect()),
        );
        Value::Object(map)
    }
}

pub fn error_body(message: String, errors: Option<Value>) -> Value {
    let mut map = Map::new();
    map.insert("message".into(), Value::String(message));
    if let Some(errors) = errors {
        map.insert("errors".into(), errors);
    }
    Value::Object(map)
}
