//! Query evaluation over a single collection.
//!
//! Queries use a MongoDB-like JSON shape. They are parsed into a [`Query`] tree
//! once per call and then evaluated against the collection's documents:
//!
//! ```text
//! { "age": { "$gte": 18 }, "address.city": "Oslo" }   implicit AND of field conditions
//! { "$or": [ { "role": "admin" }, { "role": "owner" } ] }
//! { "_id": "01h..." }                                  direct lookup, no scan
//! ```
//!
//! Malformed pieces never fail the call: an unknown operator or a badly shaped
//! combinator simply matches nothing.

use crate::document::{Document, ID};
use crate::path::FieldPath;
use crate::value::{compare_values, values_equal, Value};
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Documents of one collection keyed by `_id`, in insertion order.
pub type Documents = IndexMap<String, Document>;

#[derive(Debug, Clone)]
pub enum Query {
    /// Absent or non-object query: everything matches.
    All,
    /// `{ "_id": "<id>" }` served by direct lookup.
    Id(String),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Nor(Vec<Query>),
    Fields(Vec<(FieldPath, Condition)>),
}

#[derive(Debug, Clone)]
pub enum Condition {
    Equals(Value),
    NotEquals(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Compare(Ordering, bool, Value),
    /// `None` when the pattern failed to compile.
    Regex(Option<Regex>),
    Never,
}

const OPERATORS: [&str; 9] = [
    "$eq", "$ne", "$in", "$nin", "$lt", "$lte", "$gt", "$gte", "$regex",
];

impl Query {
    pub fn parse(query: &serde_json::Value) -> Query {
        let Some(map) = query.as_object() else {
            return Query::All;
        };

        if map.len() == 1 {
            if let Some(serde_json::Value::String(id)) = map.get(ID) {
                return Query::Id(id.clone());
            }
        }

        if let Some(subs) = map.get("$and").and_then(|v| v.as_array()) {
            return Query::And(subs.iter().map(Query::parse).collect());
        }
        if let Some(subs) = map.get("$or").and_then(|v| v.as_array()) {
            return Query::Or(subs.iter().map(Query::parse).collect());
        }
        if let Some(sub) = map.get("$not").filter(|v| v.is_object()) {
            return Query::Not(Box::new(Query::parse(sub)));
        }
        if let Some(subs) = map.get("$nor").and_then(|v| v.as_array()) {
            return Query::Nor(subs.iter().map(Query::parse).collect());
        }

        Query::Fields(
            map.iter()
                .map(|(key, condition)| {
                    let condition = if key.starts_with('$') {
                        Condition::Never
                    } else {
                        Condition::parse(condition)
                    };
                    (FieldPath::parse(key), condition)
                })
                .collect(),
        )
    }

    /// Evaluate against a collection, returning matches in collection order
    /// (`$or` yields each branch's matches in turn, without duplicates).
    pub fn evaluate<'a>(&self, docs: &'a Documents) -> Vec<&'a Document> {
        match self {
            Query::All => docs.values().collect(),
            Query::Id(id) => docs.get(id).into_iter().collect(),
            Query::Or(subs) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for sub in subs {
                    for doc in sub.evaluate(docs) {
                        if seen.insert(doc.id()) {
                            out.push(doc);
                        }
                    }
                }
                out
            }
            _ => docs.values().filter(|doc| self.matches(doc)).collect(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Query::All => true,
            Query::Id(id) => doc.id() == Some(id.as_str()),
            Query::And(subs) => subs.iter().all(|q| q.matches(doc)),
            Query::Or(subs) => subs.iter().any(|q| q.matches(doc)),
            Query::Not(sub) => !sub.matches(doc),
            Query::Nor(subs) => !subs.iter().any(|q| q.matches(doc)),
            Query::Fields(conditions) => conditions.iter().all(|(path, condition)| {
                condition.test(path.lookup(doc.fields()).as_deref())
            }),
        }
    }
}

impl Condition {
    fn parse(condition: &serde_json::Value) -> Condition {
        let Some(ops) = condition.as_object() else {
            return Condition::Equals(Value::from_json(condition.clone()));
        };
        let Some(op) = OPERATORS.iter().find(|op| ops.contains_key(**op)) else {
            return Condition::Never;
        };
        let operand = &ops[*op];
        let value = || Value::from_json(operand.clone());
        let list = || {
            operand
                .as_array()
                .map(|items| items.iter().cloned().map(Value::from_json).collect::<Vec<_>>())
        };

        match *op {
            "$eq" => Condition::Equals(value()),
            "$ne" => Condition::NotEquals(value()),
            "$in" => list().map(Condition::In).unwrap_or(Condition::Never),
            "$nin" => list().map(Condition::NotIn).unwrap_or(Condition::Never),
            "$lt" => Condition::Compare(Ordering::Less, false, value()),
            "$lte" => Condition::Compare(Ordering::Less, true, value()),
            "$gt" => Condition::Compare(Ordering::Greater, false, value()),
            "$gte" => Condition::Compare(Ordering::Greater, true, value()),
            "$regex" => {
                let options = ops.get("$options").and_then(|o| o.as_str()).unwrap_or("");
                match operand.as_str() {
                    Some(pattern) => Condition::Regex(build_regex(pattern, options)),
                    None => Condition::Never,
                }
            }
            _ => Condition::Never,
        }
    }

    /// Test a resolved field value. A missing field never equals anything.
    fn test(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Equals(expected) => value.is_some_and(|v| query_equal(v, expected)),
            Condition::NotEquals(expected) => !value.is_some_and(|v| query_equal(v, expected)),
            Condition::In(options) => {
                value.is_some_and(|v| options.iter().any(|o| query_equal(v, o)))
            }
            Condition::NotIn(options) => {
                !value.is_some_and(|v| options.iter().any(|o| query_equal(v, o)))
            }
            Condition::Compare(direction, inclusive, bound) => value
                .and_then(|v| compare_values(v, bound))
                .is_some_and(|ord| ord == *direction || (*inclusive && ord == Ordering::Equal)),
            Condition::Regex(Some(re)) => value
                .and_then(regex_subject)
                .is_some_and(|s| re.is_match(&s)),
            Condition::Regex(None) | Condition::Never => false,
        }
    }
}

/// Equality as queries see it: a string operand also matches a reference
/// whose target id it names.
fn query_equal(value: &Value, expected: &Value) -> bool {
    match (value, expected) {
        (Value::Reference(r), Value::String(id)) => r.id == *id,
        _ => values_equal(value, expected),
    }
}

/// Text a `$regex` runs against. Numbers and booleans match by their string
/// form; containers never match.
fn regex_subject(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

/// Compile a pattern, mapping `$options` letters onto regex flags.
fn build_regex(pattern: &str, options: &str) -> Option<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            _ => &mut builder,
        };
    }
    match builder.build() {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("Invalid $regex pattern {pattern:?}: {e}");
            None
        }
    }
}

/// Parse and evaluate in one step.
pub fn apply_query<'a>(docs: &'a Documents, query: &serde_json::Value) -> Vec<&'a Document> {
    Query::parse(query).evaluate(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn collection(items: &[serde_json::Value]) -> Documents {
        items
            .iter()
            .map(|item| {
                let doc = Document::from_stored(item.clone()).unwrap();
                (doc.id().unwrap().to_string(), doc)
            })
            .collect()
    }

    fn ids(docs: &Documents, query: serde_json::Value) -> Vec<String> {
        apply_query(docs, &query)
            .into_iter()
            .map(|d| d.id().unwrap().to_string())
            .collect()
    }

    fn sample() -> Documents {
        collection(&[
            json!({ "_id": "a", "n": 1, "name": "Alpha", "tags": ["x"], "info": { "city": "Oslo" } }),
            json!({ "_id": "b", "n": 2, "name": "beta", "info": { "city": "Rome" } }),
            json!({ "_id": "c", "n": 3, "name": "Gamma" }),
        ])
    }

    #[test]
    fn test_gte() {
        assert_eq!(ids(&sample(), json!({ "n": { "$gte": 2 } })), vec!["b", "c"]);
    }

    #[test]
    fn test_non_object_query_returns_all() {
        assert_eq!(ids(&sample(), json!(null)), vec!["a", "b", "c"]);
        assert_eq!(ids(&sample(), json!({})), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_id_fast_path() {
        assert_eq!(ids(&sample(), json!({ "_id": "b" })), vec!["b"]);
        assert!(ids(&sample(), json!({ "_id": "zzz" })).is_empty());
        assert!(matches!(Query::parse(&json!({ "_id": "b" })), Query::Id(_)));
        // With another key the lookup becomes a scan.
        assert_eq!(ids(&sample(), json!({ "_id": "b", "n": 3 })), Vec::<String>::new());
    }

    #[test]
    fn test_or_union_without_duplicates() {
        let docs = sample();
        assert_eq!(
            ids(&docs, json!({ "$or": [{ "n": 3 }, { "n": 1 }, { "n": { "$lte": 1 } }] })),
            vec!["c", "a"]
        );
    }

    #[test]
    fn test_and_not_nor() {
        let docs = sample();
        assert_eq!(
            ids(&docs, json!({ "$and": [{ "n": { "$gt": 1 } }, { "n": { "$lt": 3 } }] })),
            vec!["b"]
        );
        assert_eq!(ids(&docs, json!({ "$not": { "n": 2 } })), vec!["a", "c"]);
        assert_eq!(ids(&docs, json!({ "$nor": [{ "n": 1 }, { "n": 3 }] })), vec!["b"]);
    }

    #[test]
    fn test_unknown_operator_matches_nothing() {
        assert!(ids(&sample(), json!({ "n": { "$unknownOp": 1 } })).is_empty());
        assert!(ids(&sample(), json!({ "n": {} })).is_empty());
        assert!(ids(&sample(), json!({ "$where": "1" })).is_empty());
    }

    #[test]
    fn test_nested_path_equality() {
        assert_eq!(ids(&sample(), json!({ "info.city": "Rome" })), vec!["b"]);
        assert_eq!(ids(&sample(), json!({ "tags.0": "x" })), vec!["a"]);
    }

    #[test]
    fn test_missing_field_semantics() {
        let docs = sample();
        assert_eq!(ids(&docs, json!({ "info.city": { "$ne": "Rome" } })), vec!["a", "c"]);
        assert_eq!(ids(&docs, json!({ "info.city": { "$nin": ["Oslo"] } })), vec!["b", "c"]);
        assert!(ids(&docs, json!({ "missing": { "$eq": null } })).is_empty());
    }

    #[test]
    fn test_in_and_numeric_equality() {
        assert_eq!(ids(&sample(), json!({ "n": { "$in": [1.0, 3] } })), vec!["a", "c"]);
        assert!(ids(&sample(), json!({ "n": { "$in": 1 } })).is_empty());
    }

    #[test]
    fn test_comparison_requires_same_type() {
        assert!(ids(&sample(), json!({ "n": { "$gt": "0" } })).is_empty());
        assert_eq!(ids(&sample(), json!({ "name": { "$lt": "B" } })), vec!["a"]);
    }

    #[test]
    fn test_regex_with_options() {
        let docs = sample();
        assert_eq!(ids(&docs, json!({ "name": { "$regex": "^a" } })), Vec::<String>::new());
        assert_eq!(
            ids(&docs, json!({ "name": { "$regex": "^[ab]", "$options": "i" } })),
            vec!["a", "b"]
        );
        assert!(ids(&docs, json!({ "name": { "$regex": "(" } })).is_empty());
    }

    #[test]
    fn test_regex_matches_numbers_and_booleans_by_text() {
        let docs = collection(&[
            json!({ "_id": "a", "n": 1, "flag": true }),
            json!({ "_id": "b", "n": 21, "flag": false }),
            json!({ "_id": "c", "n": [1] }),
        ]);
        assert_eq!(ids(&docs, json!({ "n": { "$regex": "^1" } })), vec!["a"]);
        assert_eq!(ids(&docs, json!({ "flag": { "$regex": "^t" } })), vec!["a"]);
    }

    #[test]
    fn test_reference_fields() {
        let docs = collection(&[
            json!({ "_id": "p1", "author": { "_ref": { "collection": "authors", "id": "a1" } } }),
            json!({ "_id": "p2", "author": { "_ref": { "collection": "authors", "id": "a2" } } }),
            json!({ "_id": "p3", "author": "a1" }),
        ]);
        assert_eq!(ids(&docs, json!({ "author._ref.id": "a1" })), vec!["p1"]);
        assert_eq!(ids(&docs, json!({ "author._id": { "$in": ["a2"] } })), vec!["p2"]);
        assert_eq!(ids(&docs, json!({ "author": "a1" })), vec!["p1", "p3"]);
        assert_eq!(ids(&docs, json!({ "author": { "$ne": "a1" } })), vec!["p2"]);
        assert_eq!(
            ids(&docs, json!({ "author._ref.collection": "authors" })),
            vec!["p1", "p2"]
        );
    }

    #[test]
    fn test_operator_precedence() {
        // $eq wins over $ne when both are given.
        assert_eq!(ids(&sample(), json!({ "n": { "$ne": 1, "$eq": 1 } })), vec!["a"]);
    }
}
