//! Embedded, schema-aware document store.
//!
//! Collections of JSON documents live in memory, are validated against
//! optional schemas, queried with a MongoDB-like language, intercepted by
//! pre/post middleware and persisted as gzip files with periodic tar backups.

pub mod config;
pub mod document;
pub mod error;
pub mod middleware;
pub mod model;
pub mod path;
pub mod query;
pub mod refs;
pub mod schema;
pub mod storage;
pub mod store;
pub mod util;
pub mod validation;
pub mod value;

pub use config::{Config, ConfigStore};
pub use document::Document;
pub use error::{Result, StormError};
pub use middleware::{Method, MethodSelector, MiddlewareId, MiddlewareRegistry, Phase};
pub use model::Model;
pub use path::FieldPath;
pub use query::Query;
pub use schema::{Field, Schema, SchemaType};
pub use storage::{
    BackupAdapter, BackupSettings, CollectionSnapshot, FileBackupAdapter, FileBackupOptions,
    FileStorageAdapter, FileStorageOptions, StorageAdapter, StoreSnapshot, WriteStats,
};
pub use store::{Store, StoreBuilder};
pub use util::IdStrategy;
pub use value::{Reference, Value};
