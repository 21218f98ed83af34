//! Data model for a database schema: tables, fields, RLS policies and relationships.
//!
//! Cross references between entities are always by id. The JSON shape uses
//! camelCase keys so a [`Schema`] round-trips losslessly through storage and
//! through the generation collaborator.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Display, From, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fresh random id
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

entity_id!(
    /// Identifier of a table, unique within a schema
    TableId
);
entity_id!(
    /// Identifier of a field, unique within its table
    FieldId
);
entity_id!(
    /// Identifier of a relationship
    RelationshipId
);
entity_id!(
    /// Identifier of an RLS policy, unique within its table
    PolicyId
);

fn default_true() -> bool {
    true
}

/// Points a foreign-key field at the field it references
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReference {
    pub table: TableId,
    pub field: FieldId,
}

/// A column definition within a table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default = "FieldId::generate")]
    pub id: FieldId,
    pub name: String,
    /// Declared column type as written by the user, e.g. `uuid` or `varchar(255)`
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    /// Raw SQL fragment, emitted verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<FieldReference>,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            id: FieldId::generate(),
            name: name.into(),
            data_type: data_type.into(),
            is_primary_key: false,
            is_foreign_key: false,
            is_unique: false,
            is_nullable: true,
            default_value: None,
            references: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<FieldId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Marks the field as a foreign key pointing at `table.field`
    pub fn references(mut self, table: TableId, field: FieldId) -> Self {
        self.references = Some(FieldReference { table, field });
        self.is_foreign_key = true;
        self
    }

    /// `isForeignKey` and `references` agree
    pub fn foreign_key_consistent(&self) -> bool {
        self.is_foreign_key == self.references.is_some()
    }
}

/// Canvas position of a table
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Command an RLS policy applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyCommand {
    Select,
    Insert,
    Update,
    Delete,
    All,
}

impl PolicyCommand {
    /// `WITH CHECK` is only meaningful for commands that write rows
    pub fn allows_check(&self) -> bool {
        matches!(
            self,
            PolicyCommand::Insert | PolicyCommand::Update | PolicyCommand::All
        )
    }

    /// Postgres rejects `USING` on INSERT policies
    pub fn allows_using(&self) -> bool {
        !matches!(self, PolicyCommand::Insert)
    }
}

impl std::fmt::Display for PolicyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyCommand::Select => write!(f, "SELECT"),
            PolicyCommand::Insert => write!(f, "INSERT"),
            PolicyCommand::Update => write!(f, "UPDATE"),
            PolicyCommand::Delete => write!(f, "DELETE"),
            PolicyCommand::All => write!(f, "ALL"),
        }
    }
}

/// Row-level security policy attached to a table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "PolicyId::generate")]
    pub id: PolicyId,
    pub name: String,
    pub command: PolicyCommand,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

impl Policy {
    pub fn new(name: impl Into<String>, command: PolicyCommand, role: impl Into<String>) -> Self {
        Self {
            id: PolicyId::generate(),
            name: name.into(),
            command,
            role: role.into(),
            using: None,
            check: None,
        }
    }

    pub fn using(mut self, expression: impl Into<String>) -> Self {
        self.using = Some(expression.into());
        self
    }

    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.check = Some(expression.into());
        self
    }
}

/// Default table colour on the canvas
pub const DEFAULT_TABLE_COLOR: &str = "#3b82f6";

/// A database table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub fields: Vec<Field>,
    pub position: Position,
    pub color: String,
    #[serde(default, rename = "enableRLS")]
    pub enable_rls: bool,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TableId::generate(),
            name: name.into(),
            fields: Vec::new(),
            position: Position::default(),
            color: DEFAULT_TABLE_COLOR.to_string(),
            enable_rls: false,
            policies: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<TableId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn add_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_rls(mut self) -> Self {
        self.enable_rls = true;
        self
    }

    pub fn add_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn field(&self, id: &FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| &f.id == id)
    }

    pub fn field_mut(&mut self, id: &FieldId) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| &f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field_named(&self, name: &str) -> bool {
        self.field_by_name(name).is_some()
    }

    pub fn primary_key_count(&self) -> usize {
        self.fields.iter().filter(|f| f.is_primary_key).count()
    }
}

/// Cardinality hint carried by a relationship
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    OneToOne,
    #[default]
    OneToMany,
    ManyToMany,
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipType::OneToOne => write!(f, "one-to-one"),
            RelationshipType::OneToMany => write!(f, "one-to-many"),
            RelationshipType::ManyToMany => write!(f, "many-to-many"),
        }
    }
}

/// Referential action for `ON DELETE` / `ON UPDATE`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl std::fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferentialAction::Cascade => write!(f, "CASCADE"),
            ReferentialAction::SetNull => write!(f, "SET NULL"),
            ReferentialAction::SetDefault => write!(f, "SET DEFAULT"),
            ReferentialAction::Restrict => write!(f, "RESTRICT"),
            ReferentialAction::NoAction => write!(f, "NO ACTION"),
        }
    }
}

/// Directed link between a field of one table and a field of another (or the same) table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(default = "RelationshipId::generate")]
    pub id: RelationshipId,
    pub source: TableId,
    pub target: TableId,
    pub source_field: FieldId,
    pub target_field: FieldId,
    #[serde(rename = "type", default)]
    pub relationship_type: RelationshipType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
}

impl Relationship {
    pub fn new(
        source: TableId,
        source_field: FieldId,
        target: TableId,
        target_field: FieldId,
    ) -> Self {
        Self {
            id: RelationshipId::generate(),
            source,
            target,
            source_field,
            target_field,
            relationship_type: RelationshipType::default(),
            on_delete: None,
            on_update: None,
        }
    }

    pub fn with_type(mut self, relationship_type: RelationshipType) -> Self {
        self.relationship_type = relationship_type;
        self
    }

    /// True if either endpoint is `table`
    pub fn touches_table(&self, table: &TableId) -> bool {
        &self.source == table || &self.target == table
    }

    /// True if either endpoint is `table.field`
    pub fn touches_field(&self, table: &TableId, field: &FieldId) -> bool {
        (&self.source == table && &self.source_field == field)
            || (&self.target == table && &self.target_field == field)
    }

    /// Same unordered pair of endpoints, in either direction
    pub fn connects(
        &self,
        a: (&TableId, &FieldId),
        b: (&TableId, &FieldId),
    ) -> bool {
        let source = (&self.source, &self.source_field);
        let target = (&self.target, &self.target_field);
        (source == a && target == b) || (source == b && target == a)
    }
}

/// The aggregate unit of save, load and export
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub relationships: Vec<Relationship>,
}

impl Schema {
    pub fn new(tables: Vec<Table>, relationships: Vec<Relationship>) -> Self {
        Self {
            tables,
            relationships,
        }
    }

    pub fn table(&self, id: &TableId) -> Option<&Table> {
        self.tables.iter().find(|t| &t.id == id)
    }

    /// Resolves `table.field` to names for display, if both exist
    pub fn endpoint_names(&self, table: &TableId, field: &FieldId) -> Option<(&str, &str)> {
        let table = self.table(table)?;
        let field = table.field(field)?;
        Some((table.name.as_str(), field.name.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builder_flags() {
        let field = Field::new("id", "uuid").primary_key();
        assert!(field.is_primary_key);
        assert!(!field.is_nullable);
        assert!(field.foreign_key_consistent());

        let fk = Field::new("user_id", "uuid").references("t1".into(), "f1".into());
        assert!(fk.is_foreign_key);
        assert!(fk.foreign_key_consistent());
    }

    #[test]
    fn test_field_json_uses_camel_case() {
        let field = Field::new("email", "text").with_id("f1").unique().not_null();
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["isUnique"], true);
        assert_eq!(json["isNullable"], false);
        assert!(json.get("references").is_none());
    }

    #[test]
    fn test_field_defaults_when_flags_missing() {
        let field: Field = serde_json::from_str(r#"{"name":"title","type":"text"}"#).unwrap();
        assert!(!field.is_primary_key);
        assert!(!field.is_foreign_key);
        assert!(!field.is_unique);
        assert!(field.is_nullable);
        assert!(!field.id.as_str().is_empty());
    }

    #[test]
    fn test_relationship_type_serialization() {
        let json = serde_json::to_string(&RelationshipType::OneToMany).unwrap();
        assert_eq!(json, "\"one-to-many\"");
        let parsed: RelationshipType = serde_json::from_str("\"many-to-many\"").unwrap();
        assert_eq!(parsed, RelationshipType::ManyToMany);
    }

    #[test]
    fn test_relationship_connects_either_direction() {
        let rel = Relationship::new("a".into(), "x".into(), "b".into(), "y".into());
        let ax = (&TableId::from("a"), &FieldId::from("x"));
        let by = (&TableId::from("b"), &FieldId::from("y"));
        assert!(rel.connects(ax, by));
        assert!(rel.connects(by, ax));
        assert!(!rel.connects(ax, ax));
    }

    #[test]
    fn test_schema_json_roundtrip_keeps_rls_and_policies() {
        let table = Table::new("profiles")
            .with_id("t1")
            .add_field(Field::new("id", "uuid").with_id("f1").primary_key())
            .with_rls()
            .add_policy(
                Policy::new("own rows", PolicyCommand::Select, "authenticated")
                    .using("auth.uid() = id"),
            );
        let schema = Schema::new(vec![table], vec![]);

        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("\"enableRLS\":true"));
        let restored: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, schema);
    }

    #[test]
    fn test_policy_command_rules() {
        assert!(PolicyCommand::Insert.allows_check());
        assert!(!PolicyCommand::Insert.allows_using());
        assert!(!PolicyCommand::Select.allows_check());
        assert!(PolicyCommand::All.allows_check());
    }
}
