use super::compiler::compile;
use super::types::{DefaultValue, Field, Schema, SchemaType};
use crate::error::{Result, StormError};
use std::path::Path;

const LEAF_KEYS: [&str; 8] = [
    "type",
    "required",
    "default",
    "unique",
    "ref",
    "$ref",
    "items",
    "properties",
];

/// Parse a declarative schema definition from a JSON value.
pub fn parse_schema_json(definition: &serde_json::Value) -> Result<Schema> {
    let map = definition
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            StormError::Schema("Invalid \"object\" type in schema definition.".into())
        })?;

    let fields = map
        .iter()
        .map(|(name, def)| Ok((name.clone(), parse_field(name, def)?)))
        .collect::<Result<Vec<_>>>()?;
    compile(fields)
}

/// Parse a schema YAML string
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    let definition: serde_json::Value = serde_yaml::from_str(content)?;
    parse_schema_json(&definition)
}

/// Parse a schema file (YAML or JSON)
pub fn parse_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

fn parse_field(name: &str, def: &serde_json::Value) -> Result<Field> {
    match def {
        serde_json::Value::String(type_name) => {
            let ty = parse_type(type_name)?;
            if ty == SchemaType::Array {
                return Err(StormError::Schema(format!(
                    "Missing \"items\" for array field \"{name}\" in schema definition."
                )));
            }
            Ok(Field::of_type(ty))
        }
        serde_json::Value::Array(elements) => {
            if elements.len() != 1 {
                return Err(StormError::Schema(
                    "Invalid \"array\" elements in schema definition.".into(),
                ));
            }
            Ok(Field::array(parse_field(name, &elements[0])?))
        }
        serde_json::Value::Object(map) => {
            let is_leaf =
                map.contains_key("type") || map.contains_key("ref") || map.contains_key("$ref");
            if is_leaf {
                parse_leaf(name, map)
            } else if map.is_empty() {
                Err(StormError::Schema(format!(
                    "Missing \"type\" field in schema definition at \"{name}\"."
                )))
            } else {
                let properties = map
                    .iter()
                    .map(|(child, d)| Ok((child.clone(), parse_field(child, d)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Field::object(properties))
            }
        }
        other => Err(StormError::Schema(format!(
            "Invalid definition of \"{name}\" in schema: {other}"
        ))),
    }
}

fn parse_leaf(name: &str, map: &serde_json::Map<String, serde_json::Value>) -> Result<Field> {
    if let Some(unknown) = map.keys().find(|k| !LEAF_KEYS.contains(&k.as_str())) {
        return Err(StormError::Schema(format!(
            "Invalid field in schema definition: \"{unknown}\". Allowed fields: \"{}\".",
            LEAF_KEYS.join("\", \"")
        )));
    }

    let reference = match map.get("ref").or_else(|| map.get("$ref")) {
        Some(serde_json::Value::String(target)) => Some(target.clone()),
        Some(_) => {
            return Err(StormError::Schema(format!(
                "Invalid \"ref\" of \"{name}\" in schema definition. Expected a collection name."
            )))
        }
        None => None,
    };

    let mut field = match (reference, map.get("type")) {
        (Some(target), _) => Field::reference(target),
        (None, Some(serde_json::Value::String(type_name))) => {
            match parse_type(type_name)? {
                SchemaType::Array => {
                    let items = map.get("items").ok_or_else(|| {
                        StormError::Schema(format!(
                            "Missing \"items\" for array field \"{name}\" in schema definition."
                        ))
                    })?;
                    Field::array(parse_field(name, items)?)
                }
                SchemaType::Object => match map.get("properties") {
                    Some(props) => match parse_field(name, props)? {
                        f if f.properties.is_some() => f,
                        _ => {
                            return Err(StormError::Schema(format!(
                                "Invalid \"properties\" of \"{name}\" in schema definition."
                            )))
                        }
                    },
                    None => Field::free_object(),
                },
                ty => Field::of_type(ty),
            }
        }
        (None, _) => {
            return Err(StormError::Schema(format!(
                "Invalid \"type\" of \"{name}\" in schema definition. Expected a type name."
            )))
        }
    };

    field.required = flag(name, map, "required")?;
    field.unique = flag(name, map, "unique")?;
    if let Some(default) = map.get("default") {
        field.default = Some(DefaultValue::Value(default.clone()));
    }
    Ok(field)
}

fn parse_type(type_name: &str) -> Result<SchemaType> {
    type_name.parse().map_err(StormError::Schema)
}

fn flag(name: &str, map: &serde_json::Map<String, serde_json::Value>, key: &str) -> Result<bool> {
    match map.get(key) {
        None => Ok(false),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(_) => Err(StormError::Schema(format!(
            "Invalid \"{key}\" of \"{name}\" in schema definition. Expected a boolean."
        ))),
    }
}
