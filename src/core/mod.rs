//! Core domain models and business logic for database schema management

pub mod config;
pub mod describe;
pub mod emitter;
pub mod generation;
pub mod graph;
pub mod layout;
#[cfg(feature = "remote")]
pub mod remote;
pub mod resolver;
mod schema;
pub mod store;
pub mod types;
pub mod validation;

pub use describe::describe;
pub use emitter::SqlEmitter;
pub use generation::{Export, ExportSource, Exporter, GenerationError};
pub use graph::{GraphError, SchemaGraph};
pub use resolver::{ConnectRequest, Resolution, ResolveError, Resolver, ResolverMode};
pub use schema::*;
pub use store::{FileStore, MemoryStore, SchemaId, SchemaStore, StoreError};
pub use types::{compatible, explain};
