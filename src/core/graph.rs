//! In-memory schema graph with invariant-preserving mutations
//!
//! Tables are the nodes of a [`StableGraph`] and relationships its edges,
//! pointing from the source table to the target table. Every mutation either
//! leaves the graph consistent or returns an error with nothing changed.
//! Successful mutations hand a snapshot to the bound [`SchemaStore`], if any.
//! Storage failures are logged and kept for the caller to inspect; they never
//! roll back the in-memory state.
//!
//! Editors create relationships through [`crate::core::Resolver`]. The graph
//! itself checks that both endpoints exist and that no two relationships join
//! the same pair of fields; type compatibility is left to the resolver.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;

use crate::core::schema::{
    Field, FieldId, FieldReference, Policy, PolicyCommand, PolicyId, Position, ReferentialAction,
    Relationship, RelationshipId, RelationshipType, Schema, Table, TableId,
};
use crate::core::store::{SchemaId, SchemaStore, StoreError};
use crate::core::validation::{ValidationError, ValidationLevel, validate_identifier};

/// Graph mutation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("A table named '{0}' already exists")]
    DuplicateTableName(String),

    #[error("Table '{table}' already has a field named '{field}'")]
    DuplicateFieldName { table: String, field: String },

    #[error("Table '{0}' already has a primary key")]
    MultiplePrimaryKeys(String),

    #[error("Field '{0}' must set isForeignKey exactly when it has a reference")]
    InconsistentForeignKey(String),

    #[error("Field {0} cannot be linked to itself")]
    SelfLink(String),

    #[error("Fields {0} and {1} are already linked")]
    DuplicateLink(String, String),

    #[error(transparent)]
    InvalidName(#[from] ValidationError),
}

/// Whether "at most one primary key per table" is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryKeyPolicy {
    /// Reject mutations that would create a second primary key
    #[default]
    Enforced,
    /// Allow several primary-key flags (composite keys drawn field by field)
    Advisory,
}

/// Partial update for a table
#[derive(Debug, Clone, Default)]
pub struct TablePatch {
    pub name: Option<String>,
    pub position: Option<Position>,
    pub color: Option<String>,
    pub enable_rls: Option<bool>,
}

/// Partial update for a field. `isForeignKey` follows `references`.
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
    pub name: Option<String>,
    pub data_type: Option<String>,
    pub is_primary_key: Option<bool>,
    pub is_unique: Option<bool>,
    pub is_nullable: Option<bool>,
    pub default_value: Option<Option<String>>,
    pub references: Option<Option<FieldReference>>,
}

/// Partial update for a relationship. Endpoints are immutable.
#[derive(Debug, Clone, Default)]
pub struct RelationshipPatch {
    pub relationship_type: Option<RelationshipType>,
    pub on_delete: Option<Option<ReferentialAction>>,
    pub on_update: Option<Option<ReferentialAction>>,
}

/// Partial update for an RLS policy
#[derive(Debug, Clone, Default)]
pub struct PolicyPatch {
    pub name: Option<String>,
    pub command: Option<PolicyCommand>,
    pub role: Option<String>,
    pub using: Option<Option<String>>,
    pub check: Option<Option<String>>,
}

/// Store binding used to persist snapshots after each mutation
struct Autosave {
    store: Arc<dyn SchemaStore>,
    id: Option<SchemaId>,
    last_error: Option<StoreError>,
}

impl Autosave {
    fn persist(&mut self, schema: &Schema) -> Result<SchemaId, StoreError> {
        let id = match &self.id {
            Some(id) => {
                self.store.update(id, schema)?;
                id.clone()
            }
            None => {
                let id = self.store.save(schema)?;
                self.id = Some(id.clone());
                id
            }
        };
        self.last_error = None;
        Ok(id)
    }
}

/// Error opening a stored schema into a graph
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stored schema is inconsistent: {0}")]
    Invalid(#[from] GraphError),
}

/// The owned schema graph
#[derive(Default)]
pub struct SchemaGraph {
    graph: StableGraph<Table, Relationship>,
    nodes: HashMap<TableId, NodeIndex>,
    // Insertion order; removed slots are reused by later additions
    table_order: Vec<NodeIndex>,
    relationship_order: Vec<EdgeIndex>,
    selected_table: Option<TableId>,
    primary_keys: PrimaryKeyPolicy,
    autosave: Option<Autosave>,
}

impl std::fmt::Debug for SchemaGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaGraph")
            .field("tables", &self.graph.node_count())
            .field("relationships", &self.graph.edge_count())
            .field("selected_table", &self.selected_table)
            .field("primary_keys", &self.primary_keys)
            .field("autosave", &self.autosave.is_some())
            .finish()
    }
}

impl SchemaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a schema, checking every invariant
    pub fn from_schema(schema: Schema) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        graph.load_checked(schema)?;
        Ok(graph)
    }

    /// Loads `id` from `store` and keeps saving back to it
    pub fn open(store: Arc<dyn SchemaStore>, id: SchemaId) -> Result<Self, OpenError> {
        let schema = store.load(&id)?;
        let mut graph = Self::from_schema(schema)?;
        graph.autosave = Some(Autosave {
            store,
            id: Some(id),
            last_error: None,
        });
        Ok(graph)
    }

    pub fn with_primary_key_policy(mut self, policy: PrimaryKeyPolicy) -> Self {
        self.primary_keys = policy;
        self
    }

    /// Persists every subsequent mutation to `store`. The first write creates a new entry.
    pub fn with_autosave(mut self, store: Arc<dyn SchemaStore>) -> Self {
        self.autosave = Some(Autosave {
            store,
            id: None,
            last_error: None,
        });
        self
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Tables in insertion order
    pub fn tables(&self) -> impl ExactSizeIterator<Item = &Table> + '_ {
        self.table_order.iter().map(|&node| &self.graph[node])
    }

    /// Relationships in insertion order
    pub fn relationships(&self) -> impl ExactSizeIterator<Item = &Relationship> + '_ {
        self.relationship_order.iter().map(|&edge| &self.graph[edge])
    }

    pub fn table_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn table(&self, id: &TableId) -> Option<&Table> {
        self.nodes
            .get(id)
            .and_then(|&node| self.graph.node_weight(node))
    }

    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables().find(|t| t.name == name)
    }

    pub fn field(&self, table: &TableId, field: &FieldId) -> Option<&Field> {
        self.table(table)?.field(field)
    }

    pub fn relationship(&self, id: &RelationshipId) -> Option<&Relationship> {
        self.relationships().find(|r| &r.id == id)
    }

    /// Any relationship joining the two endpoints, in either direction
    pub fn find_link(
        &self,
        a: (&TableId, &FieldId),
        b: (&TableId, &FieldId),
    ) -> Option<&Relationship> {
        let node = *self.nodes.get(a.0)?;
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .chain(self.graph.edges_directed(node, Direction::Incoming))
            .map(|edge| edge.weight())
            .find(|r| r.connects(a, b))
    }

    pub fn selected_table(&self) -> Option<&TableId> {
        self.selected_table.as_ref()
    }

    pub fn primary_key_policy(&self) -> PrimaryKeyPolicy {
        self.primary_keys
    }

    /// Copy of the full `{tables, relationships}` state
    pub fn snapshot(&self) -> Schema {
        Schema::new(
            self.tables().cloned().collect(),
            self.relationships().cloned().collect(),
        )
    }

    /// Id of the stored copy, once the first save succeeded
    pub fn schema_id(&self) -> Option<&SchemaId> {
        self.autosave.as_ref().and_then(|a| a.id.as_ref())
    }

    /// Error from the most recent failed save, cleared by the next successful one
    pub fn last_persist_error(&self) -> Option<&StoreError> {
        self.autosave.as_ref().and_then(|a| a.last_error.as_ref())
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn select_table(&mut self, id: Option<TableId>) -> Result<(), GraphError> {
        if let Some(id) = &id {
            self.node(id)?;
        }
        self.selected_table = id;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    pub fn add_table(&mut self, table: Table) -> Result<TableId, GraphError> {
        self.check_new_table(&table)?;
        let id = table.id.clone();
        tracing::debug!("Adding table '{}' ({})", table.name, id);
        self.insert_table(table);
        self.persist("add_table");
        Ok(id)
    }

    pub fn update_table(&mut self, id: &TableId, patch: TablePatch) -> Result<(), GraphError> {
        let node = self.node(id)?;
        if let Some(name) = &patch.name {
            validate_identifier(name, ValidationLevel::Minimal)?;
            if self.tables().any(|t| &t.id != id && &t.name == name) {
                return Err(GraphError::DuplicateTableName(name.clone()));
            }
        }

        let table = &mut self.graph[node];
        if let Some(name) = patch.name {
            table.name = name;
        }
        if let Some(position) = patch.position {
            table.position = position;
        }
        if let Some(color) = patch.color {
            table.color = color;
        }
        if let Some(enable_rls) = patch.enable_rls {
            table.enable_rls = enable_rls;
        }
        self.persist("update_table");
        Ok(())
    }

    /// Removes a table together with every relationship touching it
    pub fn delete_table(&mut self, id: &TableId) -> Result<Table, GraphError> {
        let node = self.node(id)?;
        let before = self.graph.edge_count();
        // Incident edges go with the node
        let table = self
            .graph
            .remove_node(node)
            .ok_or_else(|| GraphError::InvalidReference(format!("table {}", id)))?;
        let removed = before - self.graph.edge_count();

        self.nodes.remove(id);
        self.table_order.retain(|&n| n != node);
        self.relationship_order
            .retain(|&edge| self.graph.edge_weight(edge).is_some());

        self.clear_references(|r| &r.table == id);
        if self.selected_table.as_ref() == Some(id) {
            self.selected_table = None;
        }

        tracing::info!(
            "Deleted table '{}' and {} dependent relationship(s)",
            table.name,
            removed
        );
        self.persist("delete_table");
        Ok(table)
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    pub fn add_field(&mut self, table_id: &TableId, field: Field) -> Result<FieldId, GraphError> {
        let node = self.node(table_id)?;
        self.check_new_field(&self.graph[node], &field)?;
        let id = field.id.clone();
        self.graph[node].fields.push(field);
        self.persist("add_field");
        Ok(id)
    }

    pub fn update_field(
        &mut self,
        table_id: &TableId,
        field_id: &FieldId,
        patch: FieldPatch,
    ) -> Result<(), GraphError> {
        let node = self.node(table_id)?;
        let table = &self.graph[node];
        let current = table.field(field_id).ok_or_else(|| {
            GraphError::InvalidReference(format!("field {} in table {}", field_id, table_id))
        })?;

        let mut updated = current.clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(data_type) = patch.data_type {
            updated.data_type = data_type;
        }
        if let Some(is_primary_key) = patch.is_primary_key {
            updated.is_primary_key = is_primary_key;
        }
        if let Some(is_unique) = patch.is_unique {
            updated.is_unique = is_unique;
        }
        if let Some(is_nullable) = patch.is_nullable {
            updated.is_nullable = is_nullable;
        }
        if let Some(default_value) = patch.default_value {
            updated.default_value = default_value;
        }
        if let Some(references) = patch.references {
            updated.is_foreign_key = references.is_some();
            updated.references = references;
        }

        self.check_field(table, &updated, Some(field_id), None)?;

        if let Some(slot) = self.graph[node].field_mut(field_id) {
            *slot = updated;
        }
        self.persist("update_field");
        Ok(())
    }

    /// Removes a field together with every relationship touching it
    pub fn delete_field(
        &mut self,
        table_id: &TableId,
        field_id: &FieldId,
    ) -> Result<Field, GraphError> {
        let node = self.node(table_id)?;
        let fields = &mut self.graph[node].fields;
        let position = fields
            .iter()
            .position(|f| &f.id == field_id)
            .ok_or_else(|| {
                GraphError::InvalidReference(format!("field {} in table {}", field_id, table_id))
            })?;
        let field = fields.remove(position);

        let doomed: Vec<EdgeIndex> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .chain(self.graph.edges_directed(node, Direction::Incoming))
            .filter(|edge| edge.weight().touches_field(table_id, field_id))
            .map(|edge| edge.id())
            .collect();
        let mut removed = 0;
        for edge in &doomed {
            // Self loops are listed once per direction
            if self.graph.remove_edge(*edge).is_some() {
                removed += 1;
            }
        }
        self.relationship_order.retain(|edge| !doomed.contains(edge));

        self.clear_references(|r| &r.table == table_id && &r.field == field_id);

        tracing::info!(
            "Deleted field '{}' and {} dependent relationship(s)",
            field.name,
            removed
        );
        self.persist("delete_field");
        Ok(field)
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Inserts a relationship whose endpoints must both exist and not be linked yet
    pub fn add_relationship(
        &mut self,
        relationship: Relationship,
    ) -> Result<RelationshipId, GraphError> {
        self.check_relationship(&relationship)?;
        let id = relationship.id.clone();
        self.insert_relationship(relationship)?;
        self.persist("add_relationship");
        Ok(id)
    }

    pub fn update_relationship(
        &mut self,
        id: &RelationshipId,
        patch: RelationshipPatch,
    ) -> Result<(), GraphError> {
        let edge = self.edge(id)?;
        let relationship = &mut self.graph[edge];
        if let Some(relationship_type) = patch.relationship_type {
            relationship.relationship_type = relationship_type;
        }
        if let Some(on_delete) = patch.on_delete {
            relationship.on_delete = on_delete;
        }
        if let Some(on_update) = patch.on_update {
            relationship.on_update = on_update;
        }
        self.persist("update_relationship");
        Ok(())
    }

    pub fn delete_relationship(&mut self, id: &RelationshipId) -> Result<Relationship, GraphError> {
        let edge = self.edge(id)?;
        let relationship = self
            .graph
            .remove_edge(edge)
            .ok_or_else(|| GraphError::InvalidReference(format!("relationship {}", id)))?;
        self.relationship_order.retain(|&e| e != edge);
        self.persist("delete_relationship");
        Ok(relationship)
    }

    /// Appends an optional new field and a relationship as one mutation.
    /// The field is rolled back if the relationship is rejected.
    pub(crate) fn link(
        &mut self,
        new_field: Option<(&TableId, Field)>,
        relationship: Relationship,
    ) -> Result<(), GraphError> {
        let mut appended = None;
        if let Some((table_id, field)) = new_field {
            let node = self.node(table_id)?;
            self.check_new_field(&self.graph[node], &field)?;
            self.graph[node].fields.push(field);
            appended = Some(node);
        }

        if let Err(e) = self
            .check_relationship(&relationship)
            .and_then(|()| self.insert_relationship(relationship))
        {
            if let Some(node) = appended {
                self.graph[node].fields.pop();
            }
            return Err(e);
        }

        self.persist("link");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    pub fn add_policy(
        &mut self,
        table_id: &TableId,
        policy: Policy,
    ) -> Result<PolicyId, GraphError> {
        let node = self.node(table_id)?;
        let table = &mut self.graph[node];
        if table.policies.iter().any(|p| p.id == policy.id) {
            return Err(GraphError::DuplicateId(policy.id.to_string()));
        }
        let id = policy.id.clone();
        table.policies.push(policy);
        self.persist("add_policy");
        Ok(id)
    }

    pub fn update_policy(
        &mut self,
        table_id: &TableId,
        policy_id: &PolicyId,
        patch: PolicyPatch,
    ) -> Result<(), GraphError> {
        let node = self.node(table_id)?;
        let policy = self.graph[node]
            .policies
            .iter_mut()
            .find(|p| &p.id == policy_id)
            .ok_or_else(|| GraphError::InvalidReference(format!("policy {}", policy_id)))?;
        if let Some(name) = patch.name {
            policy.name = name;
        }
        if let Some(command) = patch.command {
            policy.command = command;
        }
        if let Some(role) = patch.role {
            policy.role = role;
        }
        if let Some(using) = patch.using {
            policy.using = using;
        }
        if let Some(check) = patch.check {
            policy.check = check;
        }
        self.persist("update_policy");
        Ok(())
    }

    pub fn delete_policy(
        &mut self,
        table_id: &TableId,
        policy_id: &PolicyId,
    ) -> Result<Policy, GraphError> {
        let node = self.node(table_id)?;
        let policies = &mut self.graph[node].policies;
        let position = policies
            .iter()
            .position(|p| &p.id == policy_id)
            .ok_or_else(|| GraphError::InvalidReference(format!("policy {}", policy_id)))?;
        let policy = policies.remove(position);
        self.persist("delete_policy");
        Ok(policy)
    }

    // ------------------------------------------------------------------
    // Whole-schema operations
    // ------------------------------------------------------------------

    /// Replaces the whole content after validating it. Selection is cleared if
    /// the selected table does not survive.
    pub fn replace(&mut self, schema: Schema) -> Result<(), GraphError> {
        let mut checked = Self::new().with_primary_key_policy(self.primary_keys);
        checked.load_checked(schema)?;
        self.graph = checked.graph;
        self.nodes = checked.nodes;
        self.table_order = checked.table_order;
        self.relationship_order = checked.relationship_order;
        if self
            .selected_table
            .as_ref()
            .is_some_and(|id| self.table(id).is_none())
        {
            self.selected_table = None;
        }
        self.persist("replace");
        Ok(())
    }

    /// Saves the current snapshot right away, e.g. to retry after a failure
    pub fn save_now(&mut self) -> Result<SchemaId, StoreError> {
        let schema = self.snapshot();
        match self.autosave.as_mut() {
            Some(autosave) => autosave.persist(&schema),
            None => Err(StoreError::NotBound),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn node(&self, id: &TableId) -> Result<NodeIndex, GraphError> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::InvalidReference(format!("table {}", id)))
    }

    fn edge(&self, id: &RelationshipId) -> Result<EdgeIndex, GraphError> {
        self.relationship_order
            .iter()
            .copied()
            .find(|&edge| &self.graph[edge].id == id)
            .ok_or_else(|| GraphError::InvalidReference(format!("relationship {}", id)))
    }

    fn insert_table(&mut self, table: Table) {
        let id = table.id.clone();
        let node = self.graph.add_node(table);
        self.nodes.insert(id, node);
        self.table_order.push(node);
    }

    /// Adds the edge source -> target. Endpoints must have been checked.
    fn insert_relationship(&mut self, relationship: Relationship) -> Result<(), GraphError> {
        let source = self.node(&relationship.source)?;
        let target = self.node(&relationship.target)?;
        let edge = self.graph.add_edge(source, target, relationship);
        self.relationship_order.push(edge);
        Ok(())
    }

    fn persist(&mut self, operation: &str) {
        if self.autosave.is_none() {
            return;
        }
        let schema = self.snapshot();
        if let Some(autosave) = self.autosave.as_mut()
            && let Err(e) = autosave.persist(&schema)
        {
            tracing::warn!("Failed to persist schema after {}: {}", operation, e);
            autosave.last_error = Some(e);
        }
    }

    /// Drops `references` (and the foreign-key flag) on fields matching `pred`
    fn clear_references(&mut self, pred: impl Fn(&FieldReference) -> bool) {
        for &node in &self.table_order {
            for field in &mut self.graph[node].fields {
                if field.references.as_ref().is_some_and(&pred) {
                    field.references = None;
                    field.is_foreign_key = false;
                }
            }
        }
    }

    fn reference_exists(&self, pending: Option<&Table>, reference: &FieldReference) -> bool {
        let in_pending = pending
            .filter(|t| t.id == reference.table)
            .is_some_and(|t| t.field(&reference.field).is_some());
        in_pending || self.field(&reference.table, &reference.field).is_some()
    }

    /// Checks `field` as a member of `table`. `replacing` names the field being
    /// updated so it is not compared with itself.
    fn check_field(
        &self,
        table: &Table,
        field: &Field,
        replacing: Option<&FieldId>,
        pending: Option<&Table>,
    ) -> Result<(), GraphError> {
        validate_identifier(&field.name, ValidationLevel::Minimal)?;

        let others = table
            .fields
            .iter()
            .filter(|f| Some(&f.id) != replacing && !std::ptr::eq(*f, field));

        let mut primary_keys = usize::from(field.is_primary_key);
        for other in others {
            if other.name == field.name {
                return Err(GraphError::DuplicateFieldName {
                    table: table.name.clone(),
                    field: field.name.clone(),
                });
            }
            if replacing.is_none() && other.id == field.id {
                return Err(GraphError::DuplicateId(field.id.to_string()));
            }
            primary_keys += usize::from(other.is_primary_key);
        }

        if self.primary_keys == PrimaryKeyPolicy::Enforced && primary_keys > 1 {
            return Err(GraphError::MultiplePrimaryKeys(table.name.clone()));
        }

        if !field.foreign_key_consistent() {
            return Err(GraphError::InconsistentForeignKey(field.name.clone()));
        }

        if let Some(reference) = &field.references
            && !self.reference_exists(pending, reference)
        {
            return Err(GraphError::InvalidReference(format!(
                "field '{}' references missing {}.{}",
                field.name, reference.table, reference.field
            )));
        }
        Ok(())
    }

    fn check_new_field(&self, table: &Table, field: &Field) -> Result<(), GraphError> {
        self.check_field(table, field, None, None)
    }

    fn check_new_table(&self, table: &Table) -> Result<(), GraphError> {
        validate_identifier(&table.name, ValidationLevel::Minimal)?;
        if self.nodes.contains_key(&table.id) {
            return Err(GraphError::DuplicateId(table.id.to_string()));
        }
        if self.tables().any(|t| t.name == table.name) {
            return Err(GraphError::DuplicateTableName(table.name.clone()));
        }
        for field in &table.fields {
            self.check_field(table, field, None, Some(table))?;
        }
        for (i, policy) in table.policies.iter().enumerate() {
            if table.policies[..i].iter().any(|p| p.id == policy.id) {
                return Err(GraphError::DuplicateId(policy.id.to_string()));
            }
        }
        Ok(())
    }

    fn check_relationship(&self, relationship: &Relationship) -> Result<(), GraphError> {
        if self.relationships().any(|r| r.id == relationship.id) {
            return Err(GraphError::DuplicateId(relationship.id.to_string()));
        }
        let source = (&relationship.source, &relationship.source_field);
        let target = (&relationship.target, &relationship.target_field);
        for (table, field) in [source, target] {
            if self.field(table, field).is_none() {
                return Err(GraphError::InvalidReference(format!(
                    "relationship endpoint {}.{}",
                    table, field
                )));
            }
        }
        if source == target {
            return Err(GraphError::SelfLink(format!("{}.{}", source.0, source.1)));
        }
        if self.find_link(source, target).is_some() {
            return Err(GraphError::DuplicateLink(
                format!("{}.{}", source.0, source.1),
                format!("{}.{}", target.0, target.1),
            ));
        }
        Ok(())
    }

    /// Adds tables first (references may point forward), then relationships
    fn load_checked(&mut self, schema: Schema) -> Result<(), GraphError> {
        let Schema {
            tables,
            relationships,
        } = schema;

        // Field references may target tables declared later, so check them
        // once everything is in place.
        for table in &tables {
            let mut detached = table.clone();
            for field in &mut detached.fields {
                field.references = None;
                field.is_foreign_key = false;
            }
            self.check_new_table(&detached)?;
            self.insert_table(detached);
        }
        for table in tables {
            let node = self.node(&table.id)?;
            self.graph[node] = table;
        }
        for table in self.tables() {
            for field in &table.fields {
                if !field.foreign_key_consistent() {
                    return Err(GraphError::InconsistentForeignKey(field.name.clone()));
                }
                if let Some(reference) = &field.references
                    && !self.reference_exists(None, reference)
                {
                    return Err(GraphError::InvalidReference(format!(
                        "field '{}' references missing {}.{}",
                        field.name, reference.table, reference.field
                    )));
                }
            }
        }

        for relationship in relationships {
            self.check_relationship(&relationship)?;
            self.insert_relationship(relationship)?;
        }
        Ok(())
    }
}
