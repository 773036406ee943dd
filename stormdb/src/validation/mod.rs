use crate::error::{Result, StormError};
use crate::schema::{Schema, SchemaNode, SchemaType};
use crate::util::parse_date_seconds;
use crate::value::{Map, Reference, Value};

/// Whether missing fields are filled from defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Inserts and replacements: absent leaves take their default.
    Full,
    /// Partial updates: only the fields present in the source are emitted.
    Partial,
}

/// Walk `schema` against `source` and produce the normalized document.
///
/// The output only contains fields declared by the schema. Without a schema the
/// source passes through untouched. In strict mode a type mismatch fails with
/// [`StormError::TypeMismatch`]; otherwise values are coerced and this never fails.
/// Required and unique constraints are checked by the model, not here.
pub fn apply_schema(source: &Map, schema: &Schema, strict: bool, mode: ApplyMode) -> Result<Map> {
    if schema.is_empty() {
        return Ok(source.clone());
    }
    let ctx = Ctx { strict, mode };
    let mut target = Map::new();
    for node in schema.fields() {
        ctx.apply_field(node, source.get(&node.name), &mut target)?;
    }
    Ok(target)
}

#[derive(Clone, Copy)]
struct Ctx {
    strict: bool,
    mode: ApplyMode,
}

impl Ctx {
    fn apply_field(&self, node: &SchemaNode, source: Option<&Value>, target: &mut Map) -> Result<()> {
        let defaulted;
        let value = match source {
            Some(v) => Some(v),
            None => match (&node.default, self.mode) {
                (Some(default), ApplyMode::Full) => {
                    defaulted = Value::from_json(default.materialize());
                    Some(&defaulted)
                }
                _ => None,
            },
        };

        let output = match value {
            Some(v) => self.apply_value(node, v)?,
            None if node.ty == SchemaType::Object && node.reference.is_none() => {
                // Absent parent: children may still carry defaults.
                self.apply_value(node, &Value::Null)?
            }
            None => None,
        };
        if let Some(v) = output {
            target.insert(node.name.clone(), v);
        }
        Ok(())
    }

    fn apply_value(&self, node: &SchemaNode, value: &Value) -> Result<Option<Value>> {
        if let Some(collection) = &node.reference {
            return Ok(reference_id(value).map(|id| Value::Reference(Reference::new(collection, id))));
        }

        match node.ty {
            SchemaType::Array => self.apply_array(node, value),
            SchemaType::Object => self.apply_object(node, value),
            scalar => self.apply_scalar(node, scalar, value).map(Some),
        }
    }

    fn apply_array(&self, node: &SchemaNode, value: &Value) -> Result<Option<Value>> {
        let Some(item) = node.items.as_deref() else {
            return Ok(None);
        };
        match value {
            Value::Array(elements) => {
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    if let Some(v) = self.apply_value(item, element)? {
                        out.push(v);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            _ if self.strict => Err(mismatch(node)),
            _ => Ok(Some(Value::Array(Vec::new()))),
        }
    }

    fn apply_object(&self, node: &SchemaNode, value: &Value) -> Result<Option<Value>> {
        let Some(children) = &node.properties else {
            // Free-form object: stored as given.
            return match value {
                Value::Object(_) => Ok(Some(value.clone())),
                Value::Null => Ok(None),
                _ if self.strict => Err(mismatch(node)),
                _ => Ok(None),
            };
        };

        let empty = Map::new();
        let source = match value {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ if self.strict => return Err(mismatch(node)),
            _ => &empty,
        };

        let mut out = Map::new();
        for child in children {
            self.apply_field(child, source.get(&child.name), &mut out)?;
        }
        Ok((!out.is_empty()).then_some(Value::Object(out)))
    }

    fn apply_scalar(&self, node: &SchemaNode, ty: SchemaType, value: &Value) -> Result<Value> {
        if self.strict {
            return match (ty, value) {
                (SchemaType::String, Value::String(_))
                | (SchemaType::Number, Value::Number(_))
                | (SchemaType::Boolean, Value::Bool(_)) => Ok(value.clone()),
                (SchemaType::Date, Value::Number(n)) => {
                    Ok(Value::from_f64(n.as_f64().unwrap_or(0.0).floor()))
                }
                _ => Err(mismatch(node)),
            };
        }

        Ok(match ty {
            SchemaType::String => Value::String(coerce_string(value)),
            SchemaType::Number => Value::from_f64(coerce_number(value)),
            SchemaType::Boolean => Value::Bool(coerce_bool(value)),
            SchemaType::Date => Value::from_f64(coerce_date(value) as f64),
            SchemaType::Object | SchemaType::Array => value.clone(),
        })
    }
}

fn mismatch(node: &SchemaNode) -> StormError {
    StormError::TypeMismatch {
        path: node.path.to_string(),
        expected: node.ty.as_str(),
    }
}

/// Identity of a reference source: a document (its `_id`) or a bare id string.
fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("_id").and_then(Value::as_str).map(str::to_string),
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Reference(r) => Some(r.id.clone()),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".into(),
        Value::Reference(r) => r.id.clone(),
        Value::Array(_) | Value::Object(_) => value.to_stored().to_string(),
    }
}

fn coerce_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) | Value::Reference(_) => true,
    }
}

fn coerce_date(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f.floor() as i64)
            .unwrap_or(0),
        Value::String(s) => parse_date_seconds(s).unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(json: serde_json::Value) -> Map {
        match Value::from_json(json) {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn apply(source: serde_json::Value, schema: &Schema, strict: bool) -> Result<serde_json::Value> {
        apply_schema(&map(source), schema, strict, ApplyMode::Full)
            .map(|m| Value::Object(m).to_stored())
    }

    fn person_schema() -> Schema {
        Schema::build([
            ("name", Field::string()),
            ("age", Field::number().default(0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let out = apply(json!({ "name": "Ann" }), &person_schema(), true).unwrap();
        assert_eq!(out, json!({ "name": "Ann", "age": 0 }));
    }

    #[test]
    fn test_non_strict_number_falls_back_to_zero() {
        let schema = Schema::build([("age", Field::number())]).unwrap();
        let out = apply(json!({ "age": "notanumber" }), &schema, false).unwrap();
        assert_eq!(out, json!({ "age": 0 }));
        let out = apply(json!({ "age": " 42 " }), &schema, false).unwrap();
        assert_eq!(out, json!({ "age": 42 }));
    }

    #[test]
    fn test_strict_type_mismatch() {
        let err = apply(json!({ "name": 42 }), &person_schema(), true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid type of \"name\" field. Expected type is \"string\""
        );
    }

    #[test]
    fn test_strict_nested_path_in_error() {
        let schema = Schema::build([(
            "address",
            Field::object([("zip", Field::string())]),
        )])
        .unwrap();
        let err = apply(json!({ "address": { "zip": 1234 } }), &schema, true).unwrap_err();
        assert!(err.to_string().contains("\"address.zip\""));
    }

    #[test]
    fn test_unknown_fields_dropped() {
        let out = apply(json!({ "name": "Ann", "extra": true }), &person_schema(), true).unwrap();
        assert_eq!(out, json!({ "name": "Ann", "age": 0 }));
    }

    #[test]
    fn test_partial_mode_skips_defaults() {
        let out = apply_schema(
            &map(json!({ "name": "Bob" })),
            &person_schema(),
            true,
            ApplyMode::Partial,
        )
        .unwrap();
        assert_eq!(Value::Object(out).to_stored(), json!({ "name": "Bob" }));
    }

    #[test]
    fn test_nested_defaults_materialize_without_parent() {
        let schema = Schema::build([(
            "settings",
            Field::object([("theme", Field::string().default("dark"))]),
        )])
        .unwrap();
        let out = apply(json!({}), &schema, true).unwrap();
        assert_eq!(out, json!({ "settings": { "theme": "dark" } }));
    }

    #[test]
    fn test_reference_built_from_id() {
        let schema = Schema::build([
            ("author", Field::reference("users")),
            ("editors", Field::array(Field::reference("users"))),
        ])
        .unwrap();
        let out = apply(
            json!({ "author": { "_id": "u1", "name": "Ann" }, "editors": ["u2", { "nope": 1 }] }),
            &schema,
            true,
        )
        .unwrap();
        assert_eq!(
            out,
            json!({
                "author": { "_ref": { "collection": "users", "id": "u1" } },
                "editors": [{ "_ref": { "collection": "users", "id": "u2" } }]
            })
        );
    }

    #[test]
    fn test_array_elements_validated() {
        let schema = Schema::build([("scores", Field::array(Field::number()))]).unwrap();
        assert!(apply(json!({ "scores": [1, "2"] }), &schema, true).is_err());
        let out = apply(json!({ "scores": [1, "2", "x"] }), &schema, false).unwrap();
        assert_eq!(out, json!({ "scores": [1, 2, 0] }));
        let out = apply(json!({ "scores": "oops" }), &schema, false).unwrap();
        assert_eq!(out, json!({ "scores": [] }));
        let out = apply(json!({}), &schema, true).unwrap();
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_non_strict_coercions() {
        let schema = Schema::build([
            ("label", Field::string()),
            ("flag", Field::boolean()),
            ("when", Field::date()),
            ("raw", Field::string()),
        ])
        .unwrap();
        let out = apply(
            json!({ "label": 3, "flag": "", "when": "1970-01-02", "raw": [1, 2] }),
            &schema,
            false,
        )
        .unwrap();
        assert_eq!(
            out,
            json!({ "label": "3", "flag": false, "when": 86400, "raw": "[1,2]" })
        );
    }

    #[test]
    fn test_strict_date_requires_number() {
        let schema = Schema::build([("when", Field::date())]).unwrap();
        assert!(apply(json!({ "when": "2020-01-01" }), &schema, true).is_err());
        let out = apply(json!({ "when": 12.7 }), &schema, true).unwrap();
        assert_eq!(out, json!({ "when": 12 }));
    }

    #[test]
    fn test_default_producer_runs_per_call() {
        use std::sync::atomic::{AtomicI64, Ordering};
        use std::sync::Arc;

        let counter = Arc::new(AtomicI64::new(0));
        let c = counter.clone();
        let schema = Schema::build([(
            "seq",
            Field::number().default_with(move || json!(c.fetch_add(1, Ordering::SeqCst))),
        )])
        .unwrap();
        // One call happens at compile time to check the default's type.
        let first = apply(json!({}), &schema, true).unwrap();
        let second = apply(json!({}), &schema, true).unwrap();
        assert_eq!(first, json!({ "seq": 1 }));
        assert_eq!(second, json!({ "seq": 2 }));
    }

    #[test]
    fn test_without_schema_passes_through() {
        let out = apply(json!({ "anything": [1] }), &Schema::default(), true).unwrap();
        assert_eq!(out, json!({ "anything": [1] }));
    }
}
