//! Merges structurally identical column declarations within a select.

use std::collections::HashMap;

use crate::query::ast::{Alias, ColumnDecl, ColumnRef, Expr, ProjectionNode, SelectNode, Source};
use crate::query::rewrite::RewritePass;
use crate::types::Result;

/// Redundant column removal pass. The first declaration of each distinct
/// expression survives; references to the others are redirected to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedundantColumnRemover;

impl RewritePass for RedundantColumnRemover {
    fn name(&self) -> &'static str {
        "redundant_columns"
    }

    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode> {
        let mut renames = Renames::default();
        let select = renames.visit_select(&projection.select);
        let top = projection.select.alias;
        let projector = projection
            .projector
            .remap_columns(|column| renames.map.get(&(top, column.to_owned())).cloned());
        Ok(ProjectionNode {
            select,
            projector,
            aggregator: projection.aggregator,
        })
    }
}

#[derive(Default)]
struct Renames {
    map: HashMap<(Alias, String), String>,
}

impl Renames {
    fn redirect(&self, col: &ColumnRef) -> Option<Expr> {
        self.map
            .get(&(col.alias, col.name.clone()))
            .map(|name| Expr::column(col.alias, name.clone(), col.wire))
    }

    fn visit_select(&mut self, select: &SelectNode) -> SelectNode {
        let from = self.visit_source(&select.from);
        let mut visited = select.map_level(&mut |col| self.redirect(col));
        visited.from = from;

        let mut kept: Vec<ColumnDecl> = Vec::with_capacity(visited.columns.len());
        for decl in std::mem::take(&mut visited.columns) {
            match kept.iter().find(|first| first.expr == decl.expr) {
                Some(first) => {
                    self.map
                        .insert((visited.alias, decl.name), first.name.clone());
                }
                None => kept.push(decl),
            }
        }
        visited.columns = kept;
        visited
    }

    fn visit_source(&mut self, source: &Source) -> Source {
        match source {
            Source::Table(_) => source.clone(),
            Source::Select(select) => self.visit_select(select).into(),
            Source::Join(join) => {
                let mut join = (**join).clone();
                join.left = self.visit_source(&join.left);
                join.right = self.visit_source(&join.right);
                join.condition = join
                    .condition
                    .as_ref()
                    .map(|cond| cond.map_columns(&mut |col| self.redirect(col)));
                join.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{ProjectedField, Projector, ProjectorKind, TableNode};
    use crate::query::value::WireType;

    #[test]
    fn duplicate_columns_collapse_and_references_follow() {
        let table = TableNode {
            alias: Alias::fresh(),
            name: "titles".into(),
            entity: "titles".into(),
        };
        let year = Expr::column(table.alias, "Year", WireType::Int);
        let inner = SelectNode::new(
            Alias::fresh(),
            table,
            vec![
                ColumnDecl::new("Year", year.clone()),
                ColumnDecl::new("Released", year),
            ],
        );
        let outer = SelectNode::new(
            Alias::fresh(),
            inner.clone(),
            vec![ColumnDecl::new(
                "Released",
                Expr::column(inner.alias, "Released", WireType::Int),
            )],
        );
        let projection = ProjectionNode {
            select: outer,
            projector: Projector {
                kind: ProjectorKind::Record,
                fields: vec![ProjectedField {
                    member: "Released".into(),
                    column: "Released".into(),
                }],
            },
            aggregator: None,
        };
        let rewritten = RedundantColumnRemover.apply(&projection).expect("rewrite");
        let kept = rewritten.select.from.as_select().expect("inner");
        assert_eq!(kept.columns.len(), 1);
        assert_eq!(
            rewritten.select.columns[0].expr,
            Expr::column(inner.alias, "Year", WireType::Int)
        );
        assert_eq!(rewritten.projector.fields[0].column, "Released");
    }
}
