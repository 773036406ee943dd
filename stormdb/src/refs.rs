// Read-time expansion of reference markers into document snapshots

use crate::document::Document;
use crate::value::{Reference, Value};

/// Source of referenced documents. Implementations must not hold any lock
/// across the call so resolution can recurse into other collections.
pub trait DocumentLookup {
    fn lookup(&self, collection: &str, id: &str) -> Option<Document>;
}

/// Project a stored document to JSON with every reference expanded.
///
/// Dangling references (missing collection or id) are omitted from the output,
/// as are references that would re-enter a document already being expanded.
pub fn resolve_document(
    collection: &str,
    doc: &Document,
    lookup: &dyn DocumentLookup,
) -> serde_json::Value {
    let mut stack = Vec::new();
    if let Some(id) = doc.id() {
        stack.push(Reference::new(collection, id));
    }
    resolve_value(&Value::Object(doc.fields().clone()), lookup, &mut stack)
        .unwrap_or(serde_json::Value::Null)
}

/// Resolve a free-standing value (no enclosing document).
pub fn resolve(value: &Value, lookup: &dyn DocumentLookup) -> serde_json::Value {
    resolve_value(value, lookup, &mut Vec::new()).unwrap_or(serde_json::Value::Null)
}

fn resolve_value(
    value: &Value,
    lookup: &dyn DocumentLookup,
    stack: &mut Vec<Reference>,
) -> Option<serde_json::Value> {
    match value {
        Value::Reference(reference) => {
            if stack.contains(reference) {
                log::debug!(
                    "Skipping cyclic reference {}/{}",
                    reference.collection,
                    reference.id
                );
                return None;
            }
            let target = lookup.lookup(&reference.collection, &reference.id)?;
            stack.push(reference.clone());
            let resolved = resolve_value(&Value::Object(target.into_fields()), lookup, stack);
            stack.pop();
            resolved
        }
        Value::Object(map) => Some(serde_json::Value::Object(
            map.iter()
                .filter_map(|(k, v)| resolve_value(v, lookup, stack).map(|v| (k.clone(), v)))
                .collect(),
        )),
        Value::Array(items) => Some(serde_json::Value::Array(
            items
                .iter()
                .filter_map(|v| resolve_value(v, lookup, stack))
                .collect(),
        )),
        scalar => Some(scalar.to_stored()),
    }
}
