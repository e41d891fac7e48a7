//! Drops column declarations nothing reads.

use std::collections::{HashMap, HashSet};

use crate::query::ast::{Alias, Expr, ProjectionNode, SelectNode, Source};
use crate::query::rewrite::RewritePass;
use crate::types::Result;

/// Unused column removal pass.
///
/// The root select keeps the columns its projector reads; every other
/// select keeps the columns referenced from above it. DISTINCT selects keep
/// all of their columns since each one takes part in row identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnusedColumnRemover;

impl RewritePass for UnusedColumnRemover {
    fn name(&self) -> &'static str {
        "unused_columns"
    }

    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode> {
        let mut usage = Usage::default();
        for field in &projection.projector.fields {
            usage.mark_name(projection.select.alias, &field.column);
        }
        Ok(ProjectionNode {
            select: usage.visit_select(&projection.select),
            ..projection.clone()
        })
    }
}

#[derive(Default)]
struct Usage {
    used: HashMap<Alias, HashSet<String>>,
}

impl Usage {
    fn mark_name(&mut self, alias: Alias, name: &str) {
        self.used.entry(alias).or_default().insert(name.to_owned());
    }

    fn mark(&mut self, expr: &Expr) {
        expr.for_each_column(&mut |col| {
            self.used
                .entry(col.alias)
                .or_default()
                .insert(col.name.clone());
        });
    }

    fn is_used(&self, alias: Alias, name: &str) -> bool {
        self.used.get(&alias).is_some_and(|names| names.contains(name))
    }

    fn visit_select(&mut self, select: &SelectNode) -> SelectNode {
        let mut visited = select.clone();
        visited
            .columns
            .retain(|decl| select.distinct || self.is_used(select.alias, &decl.name));
        for decl in &visited.columns {
            self.mark(&decl.expr);
        }
        for expr in &visited.group_by {
            self.mark(expr);
        }
        for ord in &visited.order_by {
            self.mark(&ord.expr);
        }
        if let Some(predicate) = &visited.predicate {
            self.mark(predicate);
        }
        for expr in &visited.cluster_by {
            self.mark(expr);
        }
        visited.from = self.visit_source(&select.from);
        self.used.remove(&select.alias);
        visited
    }

    fn visit_source(&mut self, source: &Source) -> Source {
        match source {
            Source::Table(_) => source.clone(),
            Source::Select(select) => self.visit_select(select).into(),
            Source::Join(join) => {
                let mut join = (**join).clone();
                if let Some(condition) = &join.condition {
                    self.mark(condition);
                }
                // Right first: apply joins reference the left side.
                join.right = self.visit_source(&join.right);
                join.left = self.visit_source(&join.left);
                join.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{ColumnDecl, ProjectedField, Projector, ProjectorKind, TableNode};
    use crate::query::value::WireType;

    fn fixture(distinct: bool) -> (SelectNode, ProjectionNode) {
        let table = TableNode {
            alias: Alias::fresh(),
            name: "titles".into(),
            entity: "titles".into(),
        };
        let mut inner = SelectNode::new(
            Alias::fresh(),
            table.clone(),
            ["MovieId", "Name", "Year"]
                .iter()
                .map(|n| ColumnDecl::new(*n, Expr::column(table.alias, *n, WireType::String)))
                .collect(),
        );
        inner.distinct = distinct;
        let outer = SelectNode::new(
            Alias::fresh(),
            inner.clone(),
            vec![
                ColumnDecl::new("Name", Expr::column(inner.alias, "Name", WireType::String)),
                ColumnDecl::new("Year", Expr::column(inner.alias, "Year", WireType::String)),
            ],
        );
        let projection = ProjectionNode {
            select: outer,
            projector: Projector {
                kind: ProjectorKind::Record,
                fields: vec![ProjectedField {
                    member: "Name".into(),
                    column: "Name".into(),
                }],
            },
            aggregator: None,
        };
        (inner, projection)
    }

    #[test]
    fn unread_columns_are_dropped_at_every_level() {
        let (_, projection) = fixture(false);
        let rewritten = UnusedColumnRemover.apply(&projection).expect("rewrite");
        assert_eq!(rewritten.select.columns.len(), 1);
        let inner = rewritten.select.from.as_select().expect("inner");
        let names: Vec<_> = inner.columns.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Name"]);
    }

    #[test]
    fn distinct_select_keeps_all_columns() {
        let (_, projection) = fixture(true);
        let rewritten = UnusedColumnRemover.apply(&projection).expect("rewrite");
        let inner = rewritten.select.from.as_select().expect("inner");
        assert_eq!(inner.columns.len(), 3);
    }
}
