//! Natural-language description of a schema, used as prompt context
//!
//! Output is plain structured text: a summary line, one block per table,
//! relationships, groups of related tables and naming warnings. Like the SQL
//! emitter it is a pure function of `(tables, relationships)`.

use std::fmt::Write;

use crate::core::layout::related_groups;
use crate::core::schema::{Field, Schema, Table};
use crate::core::validation::is_reserved_keyword;

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

/// Describes `schema` for a language model or a human reader
pub fn describe(schema: &Schema) -> String {
    if schema.tables.is_empty() {
        return "The schema is empty: it has no tables.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Database schema with {} and {}.",
        plural(schema.tables.len(), "table"),
        plural(schema.relationships.len(), "relationship")
    );

    for table in &schema.tables {
        out.push('\n');
        describe_table(&mut out, schema, table);
    }

    if !schema.relationships.is_empty() {
        out.push_str("\nRelationships:\n");
        for relationship in &schema.relationships {
            let source = schema.endpoint_names(&relationship.source, &relationship.source_field);
            let target = schema.endpoint_names(&relationship.target, &relationship.target_field);
            let (Some((st, sf)), Some((tt, tf))) = (source, target) else {
                continue;
            };
            let _ = write!(
                out,
                "- {}.{} -> {}.{} ({})",
                st, sf, tt, tf, relationship.relationship_type
            );
            if let Some(action) = relationship.on_delete {
                let _ = write!(out, ", on delete {}", action);
            }
            if let Some(action) = relationship.on_update {
                let _ = write!(out, ", on update {}", action);
            }
            out.push('\n');
        }
    }

    let groups: Vec<Vec<usize>> = related_groups(schema)
        .into_iter()
        .filter(|g| g.len() > 1)
        .collect();
    if !groups.is_empty() {
        out.push_str("\nRelated table groups:\n");
        for group in groups {
            let names: Vec<&str> = group
                .iter()
                .map(|&i| schema.tables[i].name.as_str())
                .collect();
            let _ = writeln!(out, "- {}", names.join(", "));
        }
    }

    let warnings = naming_warnings(schema);
    if !warnings.is_empty() {
        out.push_str("\nNaming warnings:\n");
        for warning in warnings {
            let _ = writeln!(out, "- {}", warning);
        }
    }

    out
}

fn describe_table(out: &mut String, schema: &Schema, table: &Table) {
    let _ = write!(out, "Table \"{}\"", table.name);
    if table.enable_rls {
        out.push_str(" (row level security enabled)");
    }
    out.push_str(":\n");

    if table.fields.is_empty() {
        out.push_str("- no fields\n");
    }
    for field in &table.fields {
        let _ = writeln!(out, "- {}", describe_field(schema, field));
    }

    if table.enable_rls && !table.policies.is_empty() {
        out.push_str("  Policies:\n");
        for policy in &table.policies {
            let _ = write!(
                out,
                "  - \"{}\": {} for role {}",
                policy.name, policy.command, policy.role
            );
            if let Some(using) = &policy.using {
                let _ = write!(out, ", using ({})", using);
            }
            if let Some(check) = policy.check.as_ref().filter(|_| policy.command.allows_check()) {
                let _ = write!(out, ", check ({})", check);
            }
            out.push('\n');
        }
    }
}

fn describe_field(schema: &Schema, field: &Field) -> String {
    let mut traits = vec![field.data_type.clone()];
    if field.is_primary_key {
        traits.push("primary key".to_string());
    }
    if field.is_unique && !field.is_primary_key {
        traits.push("unique".to_string());
    }
    if !field.is_nullable {
        traits.push("not null".to_string());
    }
    if let Some(default) = &field.default_value {
        traits.push(format!("default {}", default));
    }
    if let Some(reference) = &field.references {
        match schema.endpoint_names(&reference.table, &reference.field) {
            Some((table, column)) => traits.push(format!("references {}.{}", table, column)),
            None => traits.push("foreign key".to_string()),
        }
    }
    format!("{}: {}", field.name, traits.join(", "))
}

fn naming_warnings(schema: &Schema) -> Vec<String> {
    let mut warnings = Vec::new();
    for table in &schema.tables {
        if is_reserved_keyword(&table.name) {
            warnings.push(format!(
                "table \"{}\" is a reserved SQL keyword and will need quoting",
                table.name
            ));
        }
        for field in &table.fields {
            if is_reserved_keyword(&field.name) {
                warnings.push(format!(
                    "field \"{}.{}\" is a reserved SQL keyword and will need quoting",
                    table.name, field.name
                ));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Policy, PolicyCommand, Relationship};

    fn shop() -> Schema {
        let customers = Table::new("customers")
            .with_id("customers")
            .add_field(Field::new("id", "uuid").with_id("customers.id").primary_key())
            .add_field(Field::new("email", "text").with_id("customers.email").unique().not_null())
            .with_rls()
            .add_policy(
                Policy::new("own rows", PolicyCommand::Select, "authenticated")
                    .using("auth.uid() = id"),
            );
        let orders = Table::new("order")
            .with_id("orders")
            .add_field(Field::new("id", "bigint").with_id("orders.id").primary_key())
            .add_field(
                Field::new("customer_id", "uuid")
                    .with_id("orders.customer_id")
                    .references("customers".into(), "customers.id".into()),
            );
        let notes = Table::new("notes").with_id("notes");
        let rel = Relationship::new(
            "orders".into(),
            "orders.customer_id".into(),
            "customers".into(),
            "customers.id".into(),
        );
        Schema::new(vec![customers, orders, notes], vec![rel])
    }

    #[test]
    fn test_describe_empty() {
        assert_eq!(describe(&Schema::default()), "The schema is empty: it has no tables.");
    }

    #[test]
    fn test_describe_summary_and_fields() {
        let text = describe(&shop());
        assert!(text.starts_with("Database schema with 3 tables and 1 relationship.\n"));
        assert!(text.contains("Table \"customers\" (row level security enabled):\n"));
        assert!(text.contains("- id: uuid, primary key, not null\n"));
        assert!(text.contains("- email: text, unique, not null\n"));
        assert!(text.contains("- customer_id: uuid, references customers.id\n"));
        assert!(text.contains("  - \"own rows\": SELECT for role authenticated, using (auth.uid() = id)\n"));
        assert!(text.contains("Table \"notes\":\n- no fields\n"));
    }

    #[test]
    fn test_describe_relationships_groups_and_warnings() {
        let text = describe(&shop());
        assert!(text.contains("Relationships:\n- order.customer_id -> customers.id (one-to-many)\n"));
        assert!(text.contains("Related table groups:\n- customers, order\n"));
        assert!(text.contains("table \"order\" is a reserved SQL keyword"));
    }

    #[test]
    fn test_describe_is_deterministic() {
        let schema = shop();
        assert_eq!(describe(&schema), describe(&schema));
    }
}
