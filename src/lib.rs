//! Schemaforge - schema consistency and relationship inference engine
//!
//! Keeps a table/field/relationship graph consistent under edits, infers the
//! target of a new relationship from column types, and exports the result as
//! PostgreSQL DDL or as a prompt-ready description.

pub mod core;
