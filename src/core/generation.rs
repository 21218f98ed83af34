//! Generation collaborator contract
//!
//! A generation service is an optional, slow and unreliable helper. Two things
//! can be asked of it:
//! - a candidate schema for a user instruction, which is normalized and checked
//!   against the same invariants as hand-made edits before it replaces the graph
//! - a SQL script for a schema, which is accepted only if it arrives within the
//!   configured timeout and parses as PostgreSQL; anything else falls back to
//!   the deterministic [`SqlEmitter`]

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::core::describe::describe;
use crate::core::emitter::SqlEmitter;
use crate::core::graph::{GraphError, SchemaGraph};
use crate::core::layout::{LayoutConfig, place_tables};
use crate::core::schema::{
    Field, FieldId, FieldReference, Policy, Position, ReferentialAction, Relationship,
    RelationshipId, RelationshipType, Schema, Table, TableId,
};
use crate::core::validation::sanitize_identifier;

/// How long a generation call may take before the fallback kicks in
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Colours handed out to generated tables that come without one
pub const TABLE_PALETTE: [&str; 8] = [
    "#3b82f6", "#22c55e", "#f97316", "#8b5cf6", "#ec4899", "#14b8a6", "#eab308", "#ef4444",
];

/// Errors from a generation service or from checking what it returned
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation service unreachable: {0}")]
    Transport(String),

    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("Generated schema is inconsistent: {0}")]
    InvalidCandidate(#[from] GraphError),

    #[error("No generation service configured")]
    NotConfigured,
}

/// Produces candidate schemas from a user instruction
pub trait SchemaGenerator: Send + Sync {
    /// Returns candidate JSON in the [`Schema`] shape; ids, flags, colours and
    /// positions may be missing.
    fn generate_schema(
        &self,
        schema: &Schema,
        instruction: &str,
    ) -> impl Future<Output = Result<Value, GenerationError>> + Send;
}

/// Produces a SQL script for a schema
pub trait SqlGenerator: Send + Sync {
    fn generate_sql(
        &self,
        schema: &Schema,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

// ============================================================================
// Candidate normalization
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateField {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    is_primary_key: bool,
    #[serde(default)]
    is_unique: bool,
    #[serde(default = "default_true")]
    is_nullable: bool,
    #[serde(default)]
    default_value: Option<String>,
    #[serde(default)]
    references: Option<CandidateEndpoint>,
}

/// A table/field pair given by id or by name
#[derive(Debug, Deserialize)]
struct CandidateEndpoint {
    table: String,
    field: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateTable {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    fields: Vec<CandidateField>,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default, rename = "enableRLS")]
    enable_rls: bool,
    #[serde(default)]
    policies: Vec<Policy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateRelationship {
    #[serde(default)]
    id: Option<String>,
    source: String,
    source_field: String,
    target: String,
    target_field: String,
    #[serde(rename = "type", default)]
    relationship_type: RelationshipType,
    #[serde(default)]
    on_delete: Option<ReferentialAction>,
    #[serde(default)]
    on_update: Option<ReferentialAction>,
}

/// What a merge changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub tables: usize,
    pub relationships: usize,
    /// Tables that were given a default position
    pub placed_tables: usize,
}

fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Value, GenerationError> {
    match value.get(key) {
        Some(found) if found.is_array() => Ok(found),
        _ => Err(GenerationError::MalformedResponse(format!(
            "response has no `{}` array",
            key
        ))),
    }
}

fn identifier(raw: &str, what: &str) -> Result<String, GenerationError> {
    sanitize_identifier(raw).ok_or_else(|| {
        GenerationError::MalformedResponse(format!("{} name '{}' is not usable", what, raw))
    })
}

fn non_empty(id: Option<String>) -> Option<String> {
    id.filter(|s| !s.trim().is_empty())
}

/// Finds a table and field by id, then by name
fn locate(tables: &[Table], table_key: &str, field_key: &str) -> Option<(TableId, FieldId)> {
    let matches = |id: &str, name: &str, key: &str| {
        id == key || name == key || sanitize_identifier(key).is_some_and(|s| s == name)
    };
    let table = tables
        .iter()
        .find(|t| t.id.as_str() == table_key)
        .or_else(|| tables.iter().find(|t| matches(t.id.as_str(), &t.name, table_key)))?;
    let field = table
        .fields
        .iter()
        .find(|f| f.id.as_str() == field_key)
        .or_else(|| {
            table
                .fields
                .iter()
                .find(|f| matches(f.id.as_str(), &f.name, field_key))
        })?;
    Some((table.id.clone(), field.id.clone()))
}

fn unresolved(table: &str, field: &str) -> GenerationError {
    GenerationError::InvalidCandidate(GraphError::InvalidReference(format!(
        "field {}.{}",
        table, field
    )))
}

/// Turns raw candidate JSON into a complete [`Schema`]. Does not check graph
/// invariants; [`merge_candidate`] does that.
pub fn normalize_candidate(value: &Value) -> Result<(Schema, usize), GenerationError> {
    let raw_tables: Vec<CandidateTable> = serde_json::from_value(array(value, "tables")?.clone())
        .map_err(|e| GenerationError::MalformedResponse(format!("tables: {}", e)))?;
    let raw_relationships: Vec<CandidateRelationship> =
        serde_json::from_value(array(value, "relationships")?.clone())
            .map_err(|e| GenerationError::MalformedResponse(format!("relationships: {}", e)))?;

    let mut tables = Vec::with_capacity(raw_tables.len());
    let mut unplaced = Vec::new();
    // (table index, field index, endpoint) resolved once every table exists
    let mut pending = Vec::new();

    for (table_index, raw) in raw_tables.into_iter().enumerate() {
        let id = non_empty(raw.id).map_or_else(TableId::generate, TableId::from);
        let mut table = Table::new(identifier(&raw.name, "table")?)
            .with_id(id.clone())
            .with_color(
                raw.color
                    .unwrap_or_else(|| TABLE_PALETTE[table_index % TABLE_PALETTE.len()].to_string()),
            );
        match raw.position {
            Some(position) => table.position = position,
            None => unplaced.push(id),
        }
        table.enable_rls = raw.enable_rls;
        table.policies = raw.policies;

        for (field_index, candidate) in raw.fields.into_iter().enumerate() {
            let mut field = Field::new(identifier(&candidate.name, "field")?, candidate.data_type);
            if let Some(field_id) = non_empty(candidate.id) {
                field = field.with_id(field_id.as_str());
            }
            if candidate.is_primary_key {
                field = field.primary_key();
            }
            if !candidate.is_nullable {
                field = field.not_null();
            }
            if candidate.is_unique {
                field = field.unique();
            }
            if let Some(default) = candidate.default_value {
                field = field.with_default(default);
            }
            if let Some(endpoint) = candidate.references {
                pending.push((table_index, field_index, endpoint));
            }
            table.fields.push(field);
        }
        tables.push(table);
    }

    for (table_index, field_index, endpoint) in pending {
        let (table, field) = locate(&tables, &endpoint.table, &endpoint.field)
            .ok_or_else(|| unresolved(&endpoint.table, &endpoint.field))?;
        let target = &mut tables[table_index].fields[field_index];
        target.references = Some(FieldReference { table, field });
        target.is_foreign_key = true;
    }

    let mut relationships = Vec::with_capacity(raw_relationships.len());
    for raw in raw_relationships {
        let (source, source_field) = locate(&tables, &raw.source, &raw.source_field)
            .ok_or_else(|| unresolved(&raw.source, &raw.source_field))?;
        let (target, target_field) = locate(&tables, &raw.target, &raw.target_field)
            .ok_or_else(|| unresolved(&raw.target, &raw.target_field))?;
        let mut relationship = Relationship::new(source, source_field, target, target_field)
            .with_type(raw.relationship_type);
        if let Some(id) = non_empty(raw.id) {
            relationship.id = RelationshipId::from(id);
        }
        relationship.on_delete = raw.on_delete;
        relationship.on_update = raw.on_update;
        relationships.push(relationship);
    }

    let mut schema = Schema::new(tables, relationships);
    place_tables(&mut schema, &unplaced, &LayoutConfig::default());
    Ok((schema, unplaced.len()))
}

/// Normalizes `candidate` and replaces the graph content with it. On any error
/// the graph is left untouched.
pub fn merge_candidate(
    graph: &mut SchemaGraph,
    candidate: &Value,
) -> Result<MergeReport, GenerationError> {
    let (schema, placed_tables) = normalize_candidate(candidate)?;
    let report = MergeReport {
        tables: schema.tables.len(),
        relationships: schema.relationships.len(),
        placed_tables,
    };
    graph.replace(schema)?;
    tracing::info!(
        "Merged generated schema: {} tables, {} relationships",
        report.tables,
        report.relationships
    );
    Ok(report)
}

/// Asks `generator` for a candidate and merges it, bounded by `timeout`
pub async fn generate_into<G: SchemaGenerator>(
    generator: &G,
    graph: &mut SchemaGraph,
    instruction: &str,
    timeout: Duration,
) -> Result<MergeReport, GenerationError> {
    let current = graph.snapshot();
    let candidate = tokio::time::timeout(timeout, generator.generate_schema(&current, instruction))
        .await
        .map_err(|_| GenerationError::Timeout(timeout))??;
    merge_candidate(graph, &candidate)
}

// ============================================================================
// Export
// ============================================================================

/// Checks that generated SQL is non-empty and parses as PostgreSQL
pub fn validate_sql(sql: &str) -> Result<(), GenerationError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::MalformedResponse("empty SQL".to_string()));
    }
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, trimmed).map_err(|e| {
        GenerationError::MalformedResponse(format!("SQL does not parse: {}", e))
    })?;
    if statements.is_empty() {
        return Err(GenerationError::MalformedResponse(
            "no SQL statements".to_string(),
        ));
    }
    Ok(())
}

/// Which path produced an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    Generated,
    /// Deterministic emitter output, with the reason the generated one was dropped
    Fallback(String),
}

#[derive(Debug, Clone)]
pub struct Export {
    pub sql: String,
    pub source: ExportSource,
}

impl Export {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ExportSource::Fallback(_))
    }
}

/// Export surface: deterministic SQL, the prompt description, and SQL from a
/// generator with fallback
#[derive(Debug, Clone)]
pub struct Exporter {
    emitter: SqlEmitter,
    timeout: Duration,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(SqlEmitter::default(), DEFAULT_GENERATION_TIMEOUT)
    }
}

impl Exporter {
    pub fn new(emitter: SqlEmitter, timeout: Duration) -> Self {
        Self { emitter, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn emitter(&self) -> &SqlEmitter {
        &self.emitter
    }

    pub fn export(&self, schema: &Schema) -> String {
        self.emitter.emit(schema)
    }

    pub fn describe(&self, schema: &Schema) -> String {
        describe(schema)
    }

    /// Uses the generator's SQL when it is valid, the emitter's otherwise
    pub async fn export_with<G: SqlGenerator>(&self, generator: &G, schema: &Schema) -> Export {
        match self.generate(generator, schema).await {
            Ok(sql) => {
                tracing::info!("Using generated SQL ({} bytes)", sql.len());
                Export {
                    sql,
                    source: ExportSource::Generated,
                }
            }
            Err(e) => {
                tracing::warn!("Falling back to deterministic SQL: {}", e);
                Export {
                    sql: self.emitter.emit(schema),
                    source: ExportSource::Fallback(e.to_string()),
                }
            }
        }
    }

    async fn generate<G: SqlGenerator>(
        &self,
        generator: &G,
        schema: &Schema,
    ) -> Result<String, GenerationError> {
        let sql = tokio::time::timeout(self.timeout, generator.generate_sql(schema))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;
        validate_sql(&sql)?;
        Ok(sql)
    }
}
