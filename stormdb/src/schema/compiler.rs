// Normalizes builder/parser output into a compiled Schema tree

use super::types::{Field, Schema, SchemaNode, SchemaType};
use crate::error::{Result, StormError};
use crate::path::FieldPath;

/// Compile a top-level field list into a [`Schema`].
pub fn compile<K, I>(fields: I) -> Result<Schema>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Field)>,
{
    let fields: Vec<(String, Field)> = fields.into_iter().map(|(k, f)| (k.into(), f)).collect();
    if fields.is_empty() {
        return Err(StormError::Schema(
            "Invalid \"object\" type in schema definition.".into(),
        ));
    }

    let mut schema = Schema::default();
    for (name, field) in fields {
        let node = compile_node(&FieldPath::root(), name, field)?;
        collect_constraints(&node, &mut schema);
        schema.fields.push(node);
    }
    Ok(schema)
}

fn compile_node(parent: &FieldPath, name: String, field: Field) -> Result<SchemaNode> {
    let path = parent.child(&name);

    if field.required && field.default.is_some() {
        return Err(StormError::Schema(format!(
            "Invalid combination of \"default\" and \"required\" fields in schema definition at \"{path}\"."
        )));
    }

    if let Some(default) = &field.default {
        check_default_type(&path, &field, &default.materialize())?;
    }

    let items = match (field.ty, field.items) {
        (SchemaType::Array, Some(item)) => {
            Some(Box::new(compile_node(parent, name.clone(), *item)?))
        }
        (SchemaType::Array, None) => {
            return Err(StormError::Schema(format!(
                "Missing \"items\" for array field \"{path}\" in schema definition."
            )))
        }
        (_, _) => None,
    };

    let properties = match field.properties {
        Some(props) if props.is_empty() => {
            return Err(StormError::Schema(format!(
                "Missing \"type\" field in schema definition at \"{path}\"."
            )))
        }
        Some(props) => Some(
            props
                .into_iter()
                .map(|(child, f)| compile_node(&path, child, f))
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };

    Ok(SchemaNode {
        name,
        path,
        ty: field.ty,
        required: field.required,
        unique: field.unique,
        default: field.default,
        reference: field.reference,
        items,
        properties,
    })
}

fn check_default_type(path: &FieldPath, field: &Field, value: &serde_json::Value) -> Result<()> {
    let matches = if field.reference.is_some() {
        value.is_object() || value.is_string()
    } else {
        match field.ty {
            SchemaType::String => value.is_string(),
            SchemaType::Number | SchemaType::Date => value.is_number(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
        }
    };
    if matches {
        Ok(())
    } else {
        Err(StormError::Schema(format!(
            "Invalid type of \"default\" field at \"{path}\" in schema definition. Expected type is \"{}\".",
            field.ty
        )))
    }
}

/// Record required/unique leaves. Array items are per-element and are skipped.
fn collect_constraints(node: &SchemaNode, schema: &mut Schema) {
    if node.required {
        schema.required.push(node.path.clone());
    }
    if node.unique {
        schema.unique.push(node.path.clone());
    }
    if let Some(children) = &node.properties {
        for child in children {
            collect_constraints(child, schema);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_nested_paths() {
        let schema = compile([
            ("name", Field::string().required()),
            (
                "profile",
                Field::object([("email", Field::string().unique())]),
            ),
            ("tags", Field::array(Field::string().unique())),
        ])
        .unwrap();

        assert_eq!(schema.fields().len(), 3);
        let required: Vec<String> = schema.required_paths().iter().map(|p| p.to_string()).collect();
        let unique: Vec<String> = schema.unique_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(required, vec!["name"]);
        assert_eq!(unique, vec!["profile.email"]);
    }

    #[test]
    fn test_empty_schema_rejected() {
        let fields: Vec<(String, Field)> = Vec::new();
        assert!(compile(fields).is_err());
        assert!(compile([("nested", Field::object(Vec::<(String, Field)>::new()))]).is_err());
    }

    #[test]
    fn test_required_and_default_rejected() {
        let err = compile([("age", Field::number().required().default(1))]).unwrap_err();
        assert!(err.to_string().contains("\"default\" and \"required\""));
    }

    #[test]
    fn test_default_type_checked() {
        assert!(compile([("age", Field::number().default("x"))]).is_err());
        assert!(compile([("when", Field::date().default(12))]).is_ok());
        assert!(compile([("when", Field::date().default("2020-01-01"))]).is_err());
        assert!(compile([("when", Field::date().default_with(|| json!(5)))]).is_ok());
        assert!(compile([("flag", Field::boolean().default_with(|| json!("no")))]).is_err());
    }

    #[test]
    fn test_array_without_items_rejected() {
        assert!(compile([("tags", Field::of_type(SchemaType::Array))]).is_err());
    }
}
