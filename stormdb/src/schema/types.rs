use crate::path::FieldPath;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Declared type of a schema leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    String,
    Number,
    Boolean,
    /// Epoch seconds.
    Date,
    Object,
    Array,
}

impl SchemaType {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Date => "date",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaType {
    type Err = String;

    /// Type names are case-insensitive (`"String"` == `"string"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(SchemaType::String),
            "number" => Ok(SchemaType::Number),
            "boolean" => Ok(SchemaType::Boolean),
            "date" => Ok(SchemaType::Date),
            "object" => Ok(SchemaType::Object),
            "array" => Ok(SchemaType::Array),
            _ => Err(format!(
                "Invalid type in schema definition: \"{s}\". Allowed types: \"string\", \"number\", \"boolean\", \"date\", \"object\", \"array\""
            )),
        }
    }
}

pub type DefaultProducer = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// A leaf default: a fixed value or a producer evaluated once per validation call.
#[derive(Clone)]
pub enum DefaultValue {
    Value(serde_json::Value),
    Producer(DefaultProducer),
}

impl DefaultValue {
    pub fn materialize(&self) -> serde_json::Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Producer(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Uncompiled field description produced by the builder and the JSON/YAML parser.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) ty: SchemaType,
    pub(crate) required: bool,
    pub(crate) unique: bool,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) reference: Option<String>,
    pub(crate) items: Option<Box<Field>>,
    /// `None` for a free-form object, `Some` for a structured one.
    pub(crate) properties: Option<Vec<(String, Field)>>,
}

impl Field {
    fn leaf(ty: SchemaType) -> Self {
        Field {
            ty,
            required: false,
            unique: false,
            default: None,
            reference: None,
            items: None,
            properties: None,
        }
    }

    pub fn string() -> Self {
        Field::leaf(SchemaType::String)
    }

    pub fn number() -> Self {
        Field::leaf(SchemaType::Number)
    }

    pub fn boolean() -> Self {
        Field::leaf(SchemaType::Boolean)
    }

    pub fn date() -> Self {
        Field::leaf(SchemaType::Date)
    }

    /// Object whose contents are stored as-is.
    pub fn free_object() -> Self {
        Field::leaf(SchemaType::Object)
    }

    pub fn object<K, I>(properties: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Field)>,
    {
        let mut field = Field::leaf(SchemaType::Object);
        field.properties = Some(
            properties
                .into_iter()
                .map(|(k, f)| (k.into(), f))
                .collect(),
        );
        field
    }

    pub fn array(item: Field) -> Self {
        let mut field = Field::leaf(SchemaType::Array);
        field.items = Some(Box::new(item));
        field
    }

    /// Pointer to a document in `collection`, stored as a reference marker.
    pub fn reference(collection: impl Into<String>) -> Self {
        let mut field = Field::leaf(SchemaType::Object);
        field.reference = Some(collection.into());
        field
    }

    pub fn of_type(ty: SchemaType) -> Self {
        Field::leaf(ty)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_with<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Producer(Arc::new(producer)));
        self
    }
}

/// A compiled schema node with its absolute path resolved.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub name: String,
    pub path: FieldPath,
    pub ty: SchemaType,
    pub required: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    pub reference: Option<String>,
    pub items: Option<Box<SchemaNode>>,
    pub properties: Option<Vec<SchemaNode>>,
}

/// A compiled collection schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub(crate) fields: Vec<SchemaNode>,
    pub(crate) required: Vec<FieldPath>,
    pub(crate) unique: Vec<FieldPath>,
}

impl Schema {
    pub fn fields(&self) -> &[SchemaNode] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Paths of `required` leaves reachable without crossing an array.
    pub fn required_paths(&self) -> &[FieldPath] {
        &self.required
    }

    /// Paths of `unique` leaves reachable without crossing an array.
    pub fn unique_paths(&self) -> &[FieldPath] {
        &self.unique
    }
}
