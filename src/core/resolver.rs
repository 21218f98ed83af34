//! Relationship resolution
//!
//! Turns a "connect these two fields" (or "drop this field onto that table")
//! request into a relationship, creating a foreign-key field on the target table
//! when no usable one exists. Editors create every relationship through here.
//!
//! Resolution order when no target field is given, or the given one has an
//! incompatible type:
//! 1. a target field with the source field's name and a compatible type is reused
//! 2. otherwise a nullable foreign-key field with the source type is appended,
//!    named after the source field (or `<name>_ref` when that name is taken)
//!
//! The whole plan is computed before the graph is touched, so a rejected request
//! never leaves a stray field behind.

use crate::core::graph::{GraphError, SchemaGraph};
use crate::core::schema::{Field, FieldId, Relationship, RelationshipType, Table, TableId};
use crate::core::types;
use crate::core::validation::MAX_IDENTIFIER_LENGTH;

/// Why a connection was not made
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("A field cannot be linked to itself")]
    SelfReference,

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("No usable target field could be created")]
    FieldCreationFailed,

    #[error("These fields are already linked")]
    DuplicateRelationship,

    #[error("{0}")]
    TypeIncompatible(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ResolveError {
    /// Recoverable no-ops that should be shown as information, not as errors
    pub fn is_informational(&self) -> bool {
        matches!(self, ResolveError::DuplicateRelationship)
    }
}

/// How incompatible connections are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverMode {
    /// Bridge incompatible or missing targets by creating a new field
    #[default]
    AutoBridge,
    /// Reject incompatible targets; only create a field when the name is free
    Strict,
}

/// A connection request coming from the editor
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub source_table: TableId,
    pub source_field: FieldId,
    pub target_table: TableId,
    pub target_field: Option<FieldId>,
}

impl ConnectRequest {
    /// Link two specific fields
    pub fn fields(
        source_table: impl Into<TableId>,
        source_field: impl Into<FieldId>,
        target_table: impl Into<TableId>,
        target_field: impl Into<FieldId>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            source_field: source_field.into(),
            target_table: target_table.into(),
            target_field: Some(target_field.into()),
        }
    }

    /// Link a field to a table, letting the resolver choose the target field
    pub fn to_table(
        source_table: impl Into<TableId>,
        source_field: impl Into<FieldId>,
        target_table: impl Into<TableId>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            source_field: source_field.into(),
            target_table: target_table.into(),
            target_field: None,
        }
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub relationship: Relationship,
    /// Field appended to the target table, if one had to be created
    pub created_field: Option<Field>,
}

/// Where the target end of the link comes from
enum TargetPlan {
    Existing(FieldId),
    Create(Field),
}

/// Decides how to materialise relationships
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    mode: ResolverMode,
}

impl Resolver {
    pub fn new(mode: ResolverMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ResolverMode {
        self.mode
    }

    /// Resolves `request` against `graph` and commits the result
    pub fn resolve(
        &self,
        graph: &mut SchemaGraph,
        request: &ConnectRequest,
    ) -> Result<Resolution, ResolveError> {
        if request.source_table == request.target_table
            && request.target_field.as_ref() == Some(&request.source_field)
        {
            return Err(ResolveError::SelfReference);
        }

        let source_table = graph.table(&request.source_table).ok_or_else(|| {
            ResolveError::InvalidReference(format!("source table {}", request.source_table))
        })?;
        let source = source_table
            .field(&request.source_field)
            .ok_or_else(|| {
                ResolveError::InvalidReference(format!(
                    "field {} in table {}",
                    request.source_field, source_table.name
                ))
            })?
            .clone();
        let target_table = graph.table(&request.target_table).ok_or_else(|| {
            ResolveError::InvalidReference(format!("target table {}", request.target_table))
        })?;

        let plan = self.plan_target(&request.source_table, &source, target_table, request)?;

        let target_field_id = match &plan {
            TargetPlan::Existing(id) => id.clone(),
            TargetPlan::Create(field) => field.id.clone(),
        };

        if request.source_table == request.target_table && target_field_id == source.id {
            return Err(ResolveError::SelfReference);
        }

        if let TargetPlan::Existing(id) = &plan
            && graph
                .find_link(
                    (&request.source_table, &source.id),
                    (&request.target_table, id),
                )
                .is_some()
        {
            tracing::debug!(
                "Skipping duplicate link {}.{} -> {}.{}",
                request.source_table,
                source.name,
                request.target_table,
                id
            );
            return Err(ResolveError::DuplicateRelationship);
        }

        let relationship = Relationship::new(
            request.source_table.clone(),
            source.id.clone(),
            request.target_table.clone(),
            target_field_id,
        )
        .with_type(RelationshipType::OneToMany);

        let created_field = match plan {
            TargetPlan::Existing(_) => {
                graph.link(None, relationship.clone())?;
                None
            }
            TargetPlan::Create(field) => {
                graph.link(Some((&request.target_table, field.clone())), relationship.clone())?;
                Some(field)
            }
        };

        tracing::info!(
            "Linked {}.{} to table {}{}",
            request.source_table,
            source.name,
            request.target_table,
            match &created_field {
                Some(field) => format!(" via new field '{}'", field.name),
                None => String::new(),
            }
        );

        Ok(Resolution {
            relationship,
            created_field,
        })
    }

    /// Picks the target field without touching the graph
    fn plan_target(
        &self,
        source_table: &TableId,
        source: &Field,
        target_table: &Table,
        request: &ConnectRequest,
    ) -> Result<TargetPlan, ResolveError> {
        if let Some(target_id) = &request.target_field {
            let target = target_table.field(target_id).ok_or_else(|| {
                ResolveError::InvalidReference(format!(
                    "field {} in table {}",
                    target_id, target_table.name
                ))
            })?;
            if types::compatible(&source.data_type, &target.data_type) {
                return Ok(TargetPlan::Existing(target.id.clone()));
            }
            if self.mode == ResolverMode::Strict {
                return Err(ResolveError::TypeIncompatible(types::explain(
                    &source.data_type,
                    &target.data_type,
                )));
            }
            tracing::debug!(
                "Target field '{}' ({}) is incompatible with '{}' ({}), resolving by name",
                target.name,
                target.data_type,
                source.name,
                source.data_type
            );
        }

        // The source field itself never counts as a name match
        let same_name = target_table
            .fields
            .iter()
            .find(|f| f.name == source.name && !(&target_table.id == source_table && f.id == source.id));

        match same_name {
            Some(existing) if types::compatible(&source.data_type, &existing.data_type) => {
                Ok(TargetPlan::Existing(existing.id.clone()))
            }
            Some(existing) if self.mode == ResolverMode::Strict => Err(
                ResolveError::TypeIncompatible(types::explain(&source.data_type, &existing.data_type)),
            ),
            _ => {
                let name = free_field_name(target_table, &source.name)
                    .ok_or(ResolveError::FieldCreationFailed)?;
                let field = Field::new(name, source.data_type.clone())
                    .references(source_table.clone(), source.id.clone());
                Ok(TargetPlan::Create(field))
            }
        }
    }
}

/// Source name if free in `table`, else `<name>_ref`, `<name>_ref_2`, ...
/// The name part is shortened so every candidate fits the identifier limit.
fn free_field_name(table: &Table, base: &str) -> Option<String> {
    if !table.has_field_named(base) {
        return Some(base.to_string());
    }
    (1..=table.fields.len() + 2)
        .map(|n| {
            let suffix = match n {
                1 => "_ref".to_string(),
                n => format!("_ref_{}", n),
            };
            let keep = MAX_IDENTIFIER_LENGTH.saturating_sub(suffix.len());
            format!("{}{}", shorten(base, keep), suffix)
        })
        .find(|candidate| !table.has_field_named(candidate))
}

/// First `max` bytes of `name`, cut back to a char boundary
fn shorten(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
