pub mod compiler;
pub mod parser;
pub mod types;

pub use compiler::compile;
pub use parser::{parse_schema, parse_schema_json, parse_schema_str};
pub use types::{DefaultProducer, DefaultValue, Field, Schema, SchemaNode, SchemaType};

impl Schema {
    /// Compile a schema from builder fields.
    pub fn build<K, I>(fields: I) -> crate::Result<Schema>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Field)>,
    {
        compile(fields)
    }

    pub fn from_json(definition: &serde_json::Value) -> crate::Result<Schema> {
        parse_schema_json(definition)
    }

    pub fn from_yaml_str(content: &str) -> crate::Result<Schema> {
        parse_schema_str(content)
    }
}
