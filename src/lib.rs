pub mod access;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod pagination;
pub mod soql;
pub mod types;

pub use access::{AccessController, AllowAll, QueryContext, StaticAccessPolicy};
pub use cache::{CacheStats, QueryCache};
pub use config::{CacheConfig, Limits, QueryConfig};
pub use engine::QueryEngine;
pub use error::{QueryError, QueryResult};
pub use metadata::{FieldMeta, InMemoryMetadata, LookupMeta, MetadataProvider, ObjectMeta, RelationshipMeta};
pub use pagination::{CursorCodec, CursorState, Page, PaginationInfo, SecretProvider, SortKey, StaticSecret};
pub use soql::{compile, parse, parse_with_limits, CompiledQuery, PagedStatement, ParamValue, ResultShape, Row, ValidatedQuery, Validator};
pub use types::{FieldType, Position, ShapeType};
