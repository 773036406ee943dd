use thiserror::Error;

#[derive(Error, Debug)]
pub enum StormError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid type of \"{path}\" field. Expected type is \"{expected}\"")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("\"{path}\" field is required")]
    RequiredField { path: String },

    #[error("\"{path}\" field must be unique")]
    UniqueViolation { path: String },

    #[error("Invalid {name}: {message}")]
    InvalidArgument { name: &'static str, message: String },

    #[error("Invalid collection name ({name}): {reason}")]
    InvalidCollectionName { name: String, reason: String },

    #[error("Middleware error: {0}")]
    Middleware(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

impl StormError {
    pub(crate) fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        StormError::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    /// Whether this error was raised by schema validation or a constraint check.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StormError::Validation(_)
                | StormError::TypeMismatch { .. }
                | StormError::RequiredField { .. }
                | StormError::UniqueViolation { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StormError>;
