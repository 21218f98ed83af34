//! Deterministic SQL migration emitter (PostgreSQL flavour)
//!
//! Statement order is fixed and other tooling relies on it:
//! 1. header comment
//! 2. `CREATE TABLE IF NOT EXISTS` per table
//! 3. foreign-key constraints per relationship
//! 4. `ENABLE ROW LEVEL SECURITY` per RLS table
//! 5. `CREATE POLICY` per policy (or one default policy)
//! 6. foreign-key indexes
//! 7. `updated_at` trigger function and triggers
//!
//! Identifiers are written as stored; no quoting or keyword escaping is done.

use std::collections::HashSet;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::core::schema::{Field, PolicyCommand, ReferentialAction, Relationship, Schema, Table};
use crate::core::types::ColumnType;

/// Default Postgres schema tables are created in
pub const DEFAULT_SCHEMA_NAME: &str = "public";

/// Name of the shared trigger function maintaining `updated_at`
pub const UPDATED_AT_FUNCTION: &str = "update_updated_at_column";

const EMPTY_SCHEMA_COMMENT: &str = "-- No tables defined in schema";

/// Serialises a [`Schema`] into ordered DDL
#[derive(Debug, Clone)]
pub struct SqlEmitter {
    schema_name: String,
    generated_at: Option<DateTime<Utc>>,
}

impl Default for SqlEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_NAME)
    }
}

impl SqlEmitter {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            generated_at: None,
        }
    }

    /// Stamps the header with a generation time. Left out by default so output
    /// only depends on the schema.
    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn emit(&self, schema: &Schema) -> String {
        if schema.tables.is_empty() {
            return EMPTY_SCHEMA_COMMENT.to_string();
        }

        let mut sql = String::new();
        self.write_header(&mut sql, schema);
        self.write_tables(&mut sql, schema);
        self.write_foreign_keys(&mut sql, schema);
        self.write_rls(&mut sql, schema);
        self.write_indexes(&mut sql, schema);
        self.write_triggers(&mut sql, schema);

        tracing::debug!(
            "Emitted SQL for {} tables, {} relationships ({} bytes)",
            schema.tables.len(),
            schema.relationships.len(),
            sql.len()
        );
        sql
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", self.schema_name, table)
    }

    fn write_header(&self, sql: &mut String, schema: &Schema) {
        let _ = writeln!(sql, "-- Database schema migration");
        if let Some(at) = self.generated_at {
            let _ = writeln!(sql, "-- Generated at: {}", at.to_rfc3339());
        }
        let _ = writeln!(sql, "-- Tables: {}", schema.tables.len());
        for table in &schema.tables {
            let _ = writeln!(sql, "--   {} ({} fields)", table.name, table.fields.len());
        }
        let _ = writeln!(sql, "-- Relationships: {}", schema.relationships.len());
        for relationship in &schema.relationships {
            let _ = writeln!(
                sql,
                "--   {} -> {}",
                endpoint_label(schema, relationship, Endpoint::Source),
                endpoint_label(schema, relationship, Endpoint::Target)
            );
        }
        sql.push('\n');
    }

    fn write_tables(&self, sql: &mut String, schema: &Schema) {
        for table in &schema.tables {
            let mut columns: Vec<String> = table.fields.iter().map(column_definition).collect();
            for synthesized in ["created_at", "updated_at"] {
                if !table.has_field_named(synthesized) {
                    columns.push(format!("{} timestamptz DEFAULT now() NOT NULL", synthesized));
                }
            }

            let _ = writeln!(
                sql,
                "CREATE TABLE IF NOT EXISTS {} (",
                self.qualified(&table.name)
            );
            let _ = writeln!(sql, "  {}", columns.join(",\n  "));
            let _ = writeln!(sql, ");");
            sql.push('\n');
        }
    }

    fn write_foreign_keys(&self, sql: &mut String, schema: &Schema) {
        let mut names = UniqueNames::default();
        let mut wrote = false;
        for relationship in &schema.relationships {
            let Some((source_table, source_field)) =
                schema.endpoint_names(&relationship.source, &relationship.source_field)
            else {
                continue;
            };
            let Some((target_table, target_field)) =
                schema.endpoint_names(&relationship.target, &relationship.target_field)
            else {
                continue;
            };

            let constraint = names.claim(format!("{}_{}_fkey", source_table, source_field));
            let on_delete = relationship.on_delete.unwrap_or(ReferentialAction::Cascade);
            let _ = write!(
                sql,
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {}",
                self.qualified(source_table),
                constraint,
                source_field,
                self.qualified(target_table),
                target_field,
                on_delete
            );
            if let Some(on_update) = relationship.on_update {
                let _ = write!(sql, " ON UPDATE {}", on_update);
            }
            sql.push_str(";\n");
            wrote = true;
        }
        if wrote {
            sql.push('\n');
        }
    }

    fn write_rls(&self, sql: &mut String, schema: &Schema) {
        let rls_tables: Vec<&Table> = schema.tables.iter().filter(|t| t.enable_rls).collect();
        if rls_tables.is_empty() {
            return;
        }

        for table in &rls_tables {
            let _ = writeln!(
                sql,
                "ALTER TABLE {} ENABLE ROW LEVEL SECURITY;",
                self.qualified(&table.name)
            );
        }
        sql.push('\n');

        for table in &rls_tables {
            if table.policies.is_empty() {
                let _ = writeln!(
                    sql,
                    "CREATE POLICY \"Enable access for authenticated users\" ON {} FOR ALL TO authenticated USING (auth.uid() IS NOT NULL) WITH CHECK (auth.uid() IS NOT NULL);",
                    self.qualified(&table.name)
                );
                continue;
            }
            for policy in &table.policies {
                let role = if policy.role.trim().is_empty() {
                    "public"
                } else {
                    policy.role.trim()
                };
                let _ = write!(
                    sql,
                    "CREATE POLICY \"{}\" ON {} FOR {} TO {}",
                    policy.name.replace('"', "\"\""),
                    self.qualified(&table.name),
                    policy.command,
                    role
                );
                if let Some(using) = non_blank(&policy.using)
                    && policy.command.allows_using()
                {
                    let _ = write!(sql, " USING ({})", using);
                }
                if let Some(check) = non_blank(&policy.check)
                    && policy.command.allows_check()
                {
                    let _ = write!(sql, " WITH CHECK ({})", check);
                }
                // Postgres needs at least one clause on INSERT policies
                if policy.command == PolicyCommand::Insert && non_blank(&policy.check).is_none() {
                    sql.push_str(" WITH CHECK (true)");
                }
                sql.push_str(";\n");
            }
        }
        sql.push('\n');
    }

    fn write_indexes(&self, sql: &mut String, schema: &Schema) {
        let mut seen = HashSet::new();
        let mut wrote = false;
        for relationship in &schema.relationships {
            let Some((table, field)) =
                schema.endpoint_names(&relationship.source, &relationship.source_field)
            else {
                continue;
            };
            if !seen.insert((table, field)) {
                continue;
            }
            let _ = writeln!(
                sql,
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({});",
                table,
                field,
                self.qualified(table),
                field
            );
            wrote = true;
        }
        if wrote {
            sql.push('\n');
        }
    }

    fn write_triggers(&self, sql: &mut String, schema: &Schema) {
        let function = self.qualified(UPDATED_AT_FUNCTION);
        let _ = writeln!(sql, "CREATE OR REPLACE FUNCTION {}()", function);
        let _ = writeln!(sql, "RETURNS TRIGGER AS $$");
        let _ = writeln!(sql, "BEGIN");
        let _ = writeln!(sql, "  NEW.updated_at = now();");
        let _ = writeln!(sql, "  RETURN NEW;");
        let _ = writeln!(sql, "END;");
        let _ = writeln!(sql, "$$ LANGUAGE plpgsql;");
        sql.push('\n');

        // Tables without updated_at get one synthesized, so every table qualifies
        for table in &schema.tables {
            let _ = writeln!(
                sql,
                "CREATE TRIGGER update_{}_updated_at BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}();",
                table.name,
                self.qualified(&table.name),
                function
            );
        }
    }
}

/// Column clause: `name type [PRIMARY KEY] [DEFAULT ...] [NOT NULL] [UNIQUE]`
fn column_definition(field: &Field) -> String {
    let mut column = format!("{} {}", field.name, field.data_type);
    if field.is_primary_key {
        column.push_str(" PRIMARY KEY");
        if ColumnType::parse(&field.data_type) == ColumnType::Uuid {
            column.push_str(" DEFAULT gen_random_uuid()");
        }
    } else if let Some(default) = non_blank(&field.default_value) {
        let _ = write!(column, " DEFAULT {}", default);
    }
    if !field.is_nullable {
        column.push_str(" NOT NULL");
    }
    if field.is_unique && !field.is_primary_key {
        column.push_str(" UNIQUE");
    }
    column
}

/// The stored text, untouched, unless it is missing or only whitespace
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[derive(Clone, Copy)]
enum Endpoint {
    Source,
    Target,
}

fn endpoint_label(schema: &Schema, relationship: &Relationship, end: Endpoint) -> String {
    let (table, field) = match end {
        Endpoint::Source => (&relationship.source, &relationship.source_field),
        Endpoint::Target => (&relationship.target, &relationship.target_field),
    };
    match schema.endpoint_names(table, field) {
        Some((table, field)) => format!("{}.{}", table, field),
        None => format!("{}.{} (missing)", table, field),
    }
}

/// Hands out names, suffixing repeats with `_2`, `_3`, ...
#[derive(Default)]
struct UniqueNames {
    used: HashSet<String>,
}

impl UniqueNames {
    fn claim(&mut self, base: String) -> String {
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Policy, Table};

    fn users() -> Table {
        Table::new("users")
            .with_id("users")
            .add_field(Field::new("id", "uuid").with_id("users.id").primary_key())
            .add_field(Field::new("email", "text").with_id("users.email").unique().not_null())
            .add_field(
                Field::new("status", "text")
                    .with_id("users.status")
                    .with_default("'active'"),
            )
    }

    fn posts() -> Table {
        Table::new("posts")
            .with_id("posts")
            .add_field(Field::new("id", "bigint").with_id("posts.id").primary_key())
            .add_field(Field::new("author_id", "uuid").with_id("posts.author_id"))
            .add_field(
                Field::new("updated_at", "timestamptz")
                    .with_id("posts.updated_at")
                    .not_null(),
            )
    }

    fn blog() -> Schema {
        let rel = Relationship::new(
            "posts".into(),
            "posts.author_id".into(),
            "users".into(),
            "users.id".into(),
        );
        Schema::new(vec![users(), posts()], vec![rel])
    }

    #[test]
    fn test_empty_schema_is_single_comment_line() {
        let sql = SqlEmitter::default().emit(&Schema::default());
        assert_eq!(sql, EMPTY_SCHEMA_COMMENT);
        assert_eq!(sql.lines().count(), 1);
        assert!(sql.starts_with("--"));
    }

    #[test]
    fn test_column_clauses() {
        let sql = SqlEmitter::default().emit(&blog());
        assert!(sql.contains("  id uuid PRIMARY KEY DEFAULT gen_random_uuid() NOT NULL,\n"));
        assert!(sql.contains("  email text NOT NULL UNIQUE,\n"));
        assert!(sql.contains("  status text DEFAULT 'active',\n"));
        // Non-uuid primary keys get no generated default
        assert!(sql.contains("  id bigint PRIMARY KEY NOT NULL,\n"));
    }

    #[test]
    fn test_default_value_is_emitted_verbatim() {
        let padded = Table::new("flags")
            .with_id("flags")
            .add_field(Field::new("label", "text").with_id("flags.label").with_default("' on '  "))
            .add_field(Field::new("note", "text").with_id("flags.note").with_default("   "));
        let sql = SqlEmitter::default().emit(&Schema::new(vec![padded], vec![]));
        assert!(sql.contains("  label text DEFAULT ' on '  ,\n"));
        assert!(sql.contains("  note text,\n"));
    }

    #[test]
    fn test_timestamps_are_synthesized_only_when_missing() {
        let sql = SqlEmitter::default().emit(&blog());
        let users_block = &sql[sql.find("CREATE TABLE IF NOT EXISTS public.users").unwrap()..];
        let users_block = &users_block[..users_block.find(");").unwrap()];
        assert!(users_block.contains("created_at timestamptz DEFAULT now() NOT NULL"));
        assert!(users_block.contains("updated_at timestamptz DEFAULT now() NOT NULL"));

        let posts_block = &sql[sql.find("CREATE TABLE IF NOT EXISTS public.posts").unwrap()..];
        let posts_block = &posts_block[..posts_block.find(");").unwrap()];
        assert!(posts_block.contains("updated_at timestamptz NOT NULL"));
        assert_eq!(posts_block.matches("updated_at").count(), 1);
    }

    #[test]
    fn test_statement_order() {
        let schema = Schema::new(
            vec![
                users().with_rls(),
                posts(),
            ],
            blog().relationships,
        );
        let sql = SqlEmitter::default().emit(&schema);

        let positions: Vec<usize> = [
            "-- Database schema migration",
            "CREATE TABLE IF NOT EXISTS public.users",
            "CREATE TABLE IF NOT EXISTS public.posts",
            "ALTER TABLE public.posts ADD CONSTRAINT posts_author_id_fkey",
            "ALTER TABLE public.users ENABLE ROW LEVEL SECURITY;",
            "CREATE POLICY",
            "CREATE INDEX IF NOT EXISTS idx_posts_author_id",
            "CREATE OR REPLACE FUNCTION public.update_updated_at_column()",
            "CREATE TRIGGER update_users_updated_at",
            "CREATE TRIGGER update_posts_updated_at",
        ]
        .iter()
        .map(|needle| sql.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
        .collect();

        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_foreign_key_uses_source_field_and_cascade() {
        let sql = SqlEmitter::default().emit(&blog());
        assert!(sql.contains(
            "ALTER TABLE public.posts ADD CONSTRAINT posts_author_id_fkey FOREIGN KEY (author_id) REFERENCES public.users(id) ON DELETE CASCADE;"
        ));
    }

    #[test]
    fn test_explicit_referential_actions() {
        let mut schema = blog();
        schema.relationships[0].on_delete = Some(ReferentialAction::SetNull);
        schema.relationships[0].on_update = Some(ReferentialAction::Cascade);
        let sql = SqlEmitter::default().emit(&schema);
        assert!(sql.contains("REFERENCES public.users(id) ON DELETE SET NULL ON UPDATE CASCADE;"));
    }

    #[test]
    fn test_duplicate_constraint_names_are_suffixed_and_index_emitted_once() {
        let mut schema = blog();
        let extra = Table::new("admins")
            .with_id("admins")
            .add_field(Field::new("id", "uuid").with_id("admins.id").primary_key());
        schema.tables.push(extra);
        schema.relationships.push(Relationship::new(
            "posts".into(),
            "posts.author_id".into(),
            "admins".into(),
            "admins.id".into(),
        ));

        let sql = SqlEmitter::default().emit(&schema);
        assert!(sql.contains("ADD CONSTRAINT posts_author_id_fkey FOREIGN KEY"));
        assert!(sql.contains("ADD CONSTRAINT posts_author_id_fkey_2 FOREIGN KEY"));
        assert_eq!(sql.matches("CREATE INDEX").count(), 1);
    }

    #[test]
    fn test_rls_default_policy() {
        let schema = Schema::new(vec![users().with_rls()], vec![]);
        let sql = SqlEmitter::default().emit(&schema);
        assert!(sql.contains("ALTER TABLE public.users ENABLE ROW LEVEL SECURITY;"));
        assert!(sql.contains("TO authenticated USING (auth.uid() IS NOT NULL)"));
        assert_eq!(sql.matches("CREATE POLICY").count(), 1);
    }

    #[test]
    fn test_policies_in_order_with_command_rules() {
        let table = users()
            .with_rls()
            .add_policy(
                Policy::new("Users read own", PolicyCommand::Select, "authenticated")
                    .using("auth.uid() = id")
                    .check("ignored"),
            )
            .add_policy(
                Policy::new("Users insert own", PolicyCommand::Insert, "authenticated")
                    .using("ignored")
                    .check("auth.uid() = id"),
            );
        let sql = SqlEmitter::default().emit(&Schema::new(vec![table], vec![]));

        assert!(sql.contains(
            "CREATE POLICY \"Users read own\" ON public.users FOR SELECT TO authenticated USING (auth.uid() = id);"
        ));
        assert!(sql.contains(
            "CREATE POLICY \"Users insert own\" ON public.users FOR INSERT TO authenticated WITH CHECK (auth.uid() = id);"
        ));
        assert!(!sql.contains("ignored"));
        assert!(sql.find("Users read own").unwrap() < sql.find("Users insert own").unwrap());
    }

    #[test]
    fn test_policies_skipped_without_rls() {
        let table = users().add_policy(Policy::new("p", PolicyCommand::All, "anon"));
        let sql = SqlEmitter::default().emit(&Schema::new(vec![table], vec![]));
        assert!(!sql.contains("CREATE POLICY"));
        assert!(!sql.contains("ROW LEVEL SECURITY"));
    }

    #[test]
    fn test_trigger_function_emitted_once() {
        let sql = SqlEmitter::default().emit(&blog());
        assert_eq!(sql.matches("CREATE OR REPLACE FUNCTION").count(), 1);
        assert_eq!(sql.matches("CREATE TRIGGER").count(), 2);
    }

    #[test]
    fn test_header_summary() {
        let sql = SqlEmitter::default().emit(&blog());
        assert!(sql.contains("-- Tables: 2\n"));
        assert!(sql.contains("--   users (3 fields)\n"));
        assert!(sql.contains("-- Relationships: 1\n"));
        assert!(sql.contains("--   posts.author_id -> users.id\n"));
    }

    #[test]
    fn test_deterministic_output() {
        let schema = blog();
        let emitter = SqlEmitter::default();
        assert_eq!(emitter.emit(&schema), emitter.emit(&schema));

        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let frozen = SqlEmitter::default().with_generated_at(at);
        assert_eq!(frozen.emit(&schema), frozen.emit(&schema));
        assert!(frozen.emit(&schema).contains("-- Generated at: 2024-01-01T00:00:00+00:00"));
    }

    #[test]
    fn test_custom_schema_name() {
        let sql = SqlEmitter::new("app").emit(&blog());
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS app.users ("));
        assert!(sql.contains("REFERENCES app.users(id)"));
    }

    #[test]
    fn test_dangling_relationship_is_skipped_not_fatal() {
        let mut schema = blog();
        schema.relationships.push(Relationship::new(
            "posts".into(),
            "gone".into(),
            "users".into(),
            "users.id".into(),
        ));
        let sql = SqlEmitter::default().emit(&schema);
        assert_eq!(sql.matches("ADD CONSTRAINT").count(), 1);
        assert!(sql.contains("(missing)"));
    }
}
