// Stored documents and their reserved metadata fields

use crate::path::FieldPath;
use crate::value::{Map, Value};

pub const ID: &str = "_id";
pub const VERSION: &str = "_version";
pub const CREATED: &str = "_created";
pub const UPDATED: &str = "_updated";

/// Metadata keys managed by the store. User updates never write these.
pub const RESERVED: [&str; 4] = [ID, VERSION, CREATED, UPDATED];

pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}

/// A document as owned by its collection: user fields plus reserved metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    fields: Map,
}

impl Document {
    pub fn new(fields: Map) -> Self {
        Document { fields }
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID).and_then(Value::as_str)
    }

    /// Current version; documents without one count as version 1.
    pub fn version(&self) -> i64 {
        self.fields
            .get(VERSION)
            .and_then(Value::as_f64)
            .map(|v| v as i64)
            .unwrap_or(1)
    }

    pub fn fields(&self) -> &Map {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map {
        &mut self.fields
    }

    pub fn into_fields(self) -> Map {
        self.fields
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.get(&self.fields)
    }

    /// Assign identity and initial metadata to a freshly validated document.
    pub fn stamp_new(&mut self, id: String, now: i64, default_fields: bool) {
        self.fields.insert(ID.into(), Value::String(id));
        self.fields.insert(VERSION.into(), Value::from(serde_json::json!(1)));
        if default_fields {
            self.fields.insert(CREATED.into(), Value::from(serde_json::json!(now)));
            self.fields.insert(UPDATED.into(), Value::from(serde_json::json!(now)));
        }
    }

    /// Bump the version after a change and refresh timestamps.
    pub fn touch(&mut self, now: i64, default_fields: bool) {
        let next = self.version() + 1;
        self.fields
            .insert(VERSION.into(), Value::from(serde_json::json!(next)));
        if default_fields {
            if !self.fields.contains_key(CREATED) {
                self.fields
                    .insert(CREATED.into(), Value::from(serde_json::json!(now)));
            }
            self.fields
                .insert(UPDATED.into(), Value::from(serde_json::json!(now)));
        }
    }

    pub fn to_stored(&self) -> serde_json::Value {
        Value::Object(self.fields.clone()).to_stored()
    }

    /// Decode a persisted document. Entries without a string `_id` are rejected.
    pub fn from_stored(json: serde_json::Value) -> Option<Self> {
        match Value::from_stored(json) {
            Value::Object(fields) => {
                let doc = Document { fields };
                doc.id()?;
                Some(doc)
            }
            _ => None,
        }
    }
}
