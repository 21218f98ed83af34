//! Default placement for tables that arrive without a canvas position
//!
//! Tables are grouped by connectivity (tables linked by relationships end up in
//! the same group) and each group is laid out on its own grid rows, below any
//! table that already has a position.

use std::collections::HashMap;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::Dfs;

use crate::core::schema::{Position, Schema, TableId};

/// Layout configuration
#[derive(Clone, Debug)]
pub struct LayoutConfig {
    /// Starting X position
    pub start_x: f64,
    /// Starting Y position
    pub start_y: f64,
    /// Horizontal distance between table origins
    pub column_spacing: f64,
    /// Vertical distance between rows
    pub row_spacing: f64,
    /// Tables per grid row
    pub columns: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            start_x: 100.0,
            start_y: 100.0,
            column_spacing: 350.0,
            row_spacing: 300.0,
            columns: 4,
        }
    }
}

/// Tables connected through relationships, as indices into `schema.tables`.
///
/// Groups are ordered by their first table, members keep table order.
pub fn related_groups(schema: &Schema) -> Vec<Vec<usize>> {
    let mut graph: UnGraph<usize, ()> = UnGraph::default();
    let nodes: Vec<NodeIndex> = (0..schema.tables.len()).map(|i| graph.add_node(i)).collect();
    let by_id: HashMap<&TableId, NodeIndex> = schema
        .tables
        .iter()
        .zip(&nodes)
        .map(|(table, node)| (&table.id, *node))
        .collect();

    for relationship in &schema.relationships {
        if let (Some(a), Some(b)) = (by_id.get(&relationship.source), by_id.get(&relationship.target)) {
            graph.add_edge(*a, *b, ());
        }
    }

    let mut seen = vec![false; nodes.len()];
    let mut groups = Vec::new();
    for &start in &nodes {
        if seen[graph[start]] {
            continue;
        }
        let mut group = Vec::new();
        let mut dfs = Dfs::new(&graph, start);
        while let Some(node) = dfs.next(&graph) {
            let index = graph[node];
            seen[index] = true;
            group.push(index);
        }
        group.sort_unstable();
        groups.push(group);
    }
    groups
}

/// Assigns positions to the tables listed in `unplaced`
pub fn place_tables(schema: &mut Schema, unplaced: &[TableId], config: &LayoutConfig) {
    if unplaced.is_empty() {
        return;
    }

    let columns = config.columns.max(1);
    let base_y = schema
        .tables
        .iter()
        .filter(|t| !unplaced.contains(&t.id))
        .map(|t| t.position.y)
        .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |a| a.max(y))))
        .map_or(config.start_y, |lowest| lowest + config.row_spacing);

    let mut slot = 0usize;
    for group in related_groups(schema) {
        let mut placed_any = false;
        for index in group {
            let table = &mut schema.tables[index];
            if !unplaced.contains(&table.id) {
                continue;
            }
            table.position = Position::new(
                config.start_x + (slot % columns) as f64 * config.column_spacing,
                base_y + (slot / columns) as f64 * config.row_spacing,
            );
            slot += 1;
            placed_any = true;
        }
        // Next group starts on a fresh row
        if placed_any && slot % columns != 0 {
            slot += columns - slot % columns;
        }
    }
    tracing::debug!("Placed {} table(s) on the canvas", unplaced.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Field, Relationship, Table};

    fn table(id: &str) -> Table {
        Table::new(id)
            .with_id(id)
            .add_field(Field::new("id", "uuid").with_id(format!("{}.id", id).as_str()))
    }

    fn link(a: &str, b: &str) -> Relationship {
        Relationship::new(
            a.into(),
            format!("{}.id", a).as_str().into(),
            b.into(),
            format!("{}.id", b).as_str().into(),
        )
    }

    #[test]
    fn test_related_groups() {
        let schema = Schema::new(
            vec![table("a"), table("b"), table("c"), table("d")],
            vec![link("a", "c"), link("d", "c")],
        );
        assert_eq!(related_groups(&schema), vec![vec![0, 2, 3], vec![1]]);
    }

    #[test]
    fn test_related_groups_empty() {
        assert!(related_groups(&Schema::default()).is_empty());
    }

    #[test]
    fn test_place_tables_groups_on_separate_rows() {
        let mut schema = Schema::new(
            vec![table("a"), table("b"), table("c")],
            vec![link("a", "c")],
        );
        let ids: Vec<TableId> = schema.tables.iter().map(|t| t.id.clone()).collect();
        let config = LayoutConfig::default();
        place_tables(&mut schema, &ids, &config);

        let a = schema.tables[0].position;
        let b = schema.tables[1].position;
        let c = schema.tables[2].position;
        assert_eq!(a, Position::new(100.0, 100.0));
        assert_eq!(c, Position::new(450.0, 100.0));
        assert_eq!(b, Position::new(100.0, 400.0));
    }

    #[test]
    fn test_place_tables_below_existing_ones() {
        let mut schema = Schema::new(
            vec![table("a").with_position(500.0, 700.0), table("b")],
            vec![],
        );
        place_tables(&mut schema, &["b".into()], &LayoutConfig::default());
        assert_eq!(schema.tables[0].position, Position::new(500.0, 700.0));
        assert_eq!(schema.tables[1].position, Position::new(100.0, 1000.0));
    }
}
