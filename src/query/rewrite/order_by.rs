//! Moves ORDER BY clauses to the selects where the dialect honours them.
//!
//! Hive only guarantees ordering on the outermost select and on selects that
//! limit rows. Orderings found deeper are lifted outward, re-expressed over
//! each enclosing select's columns, until a select that can hold them is
//! reached. Grouping and DISTINCT boundaries discard them.

use std::collections::HashSet;

use crate::query::ast::{
    available_name, Alias, ColumnDecl, Expr, OrderExpr, ProjectionNode, SelectNode, Source,
};
use crate::query::rewrite::{gather::declared_aliases, RewritePass};
use crate::types::Result;

/// Order-by normalization pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderByRewriter;

impl RewritePass for OrderByRewriter {
    fn name(&self) -> &'static str {
        "order_by"
    }

    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode> {
        let mut state = Gathered::default();
        let select = state.visit_select(&projection.select, true);
        Ok(ProjectionNode {
            select,
            ..projection.clone()
        })
    }
}

#[derive(Default)]
struct Gathered {
    orderings: Vec<OrderExpr>,
}

impl Gathered {
    fn visit_select(&mut self, select: &SelectNode, outer_most: bool) -> SelectNode {
        let mut select = select.clone();
        select.from = self.visit_source(&select.from);

        let can_have = outer_most || select.take.is_some() || select.skip.is_some();
        let can_receive = can_have
            && select.group_by.is_empty()
            && !select.distinct
            && !select.has_aggregates();
        if !select.order_by.is_empty() {
            self.prepend(select.order_by.clone());
        }
        let orderings = if can_receive {
            self.orderings.clone()
        } else if can_have {
            select.order_by.clone()
        } else {
            Vec::new()
        };

        let can_pass_on = !outer_most && select.group_by.is_empty() && !select.distinct;
        let gathered = std::mem::take(&mut self.orderings);
        if can_pass_on && !gathered.is_empty() {
            let available = declared_aliases(&select.from);
            let (rebound, columns) =
                rebind_orderings(&gathered, select.alias, &available, &select.columns);
            select.columns = columns;
            self.prepend(rebound);
        }
        select.order_by = orderings;
        select
    }

    fn visit_source(&mut self, source: &Source) -> Source {
        match source {
            Source::Table(_) => source.clone(),
            Source::Select(select) => self.visit_select(select, false).into(),
            Source::Join(join) => {
                let mut join = (**join).clone();
                join.left = self.visit_source(&join.left);
                let left = std::mem::take(&mut self.orderings);
                join.right = self.visit_source(&join.right);
                self.prepend(left);
                join.into()
            }
        }
    }

    fn prepend(&mut self, mut front: Vec<OrderExpr>) {
        front.append(&mut self.orderings);
        let mut seen = HashSet::new();
        front.retain(|ord| match ord.expr.as_column() {
            Some(col) => seen.insert((col.alias, col.name.clone())),
            None => true,
        });
        self.orderings = front;
    }
}

/// Re-expresses `orderings` over the columns of the select named `alias`,
/// declaring new columns for expressions it does not project yet.
///
/// Column orderings bound to aliases outside `available` are dropped.
fn rebind_orderings(
    orderings: &[OrderExpr],
    alias: Alias,
    available: &HashSet<Alias>,
    existing: &[ColumnDecl],
) -> (Vec<OrderExpr>, Vec<ColumnDecl>) {
    let mut columns = existing.to_vec();
    let mut rebound = Vec::with_capacity(orderings.len());
    for ord in orderings {
        let expr = &ord.expr;
        if expr.as_column().is_some_and(|col| !available.contains(&col.alias)) {
            continue;
        }
        let decl = match columns.iter().find(|decl| &decl.expr == expr) {
            Some(decl) => decl.clone(),
            None => {
                let base = match expr.as_column() {
                    Some(col) => col.name.clone(),
                    None => format!("c{}", columns.len()),
                };
                let decl = ColumnDecl::new(available_name(&columns, &base), expr.clone());
                columns.push(decl.clone());
                decl
            }
        };
        rebound.push(OrderExpr::new(
            Expr::column(alias, decl.name, decl.wire),
            ord.direction,
        ));
    }
    (rebound, columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{Direction, ProjectedField, Projector, ProjectorKind, TableNode};
    use crate::query::value::WireType;

    fn base() -> (TableNode, SelectNode) {
        let table = TableNode {
            alias: Alias::fresh(),
            name: "titles".into(),
            entity: "titles".into(),
        };
        let select = SelectNode::new(
            Alias::fresh(),
            table.clone(),
            vec![
                ColumnDecl::new("Name", Expr::column(table.alias, "Name", WireType::String)),
                ColumnDecl::new("Year", Expr::column(table.alias, "Year", WireType::Int)),
            ],
        );
        (table, select)
    }

    fn project(select: SelectNode) -> ProjectionNode {
        ProjectionNode {
            select,
            projector: Projector {
                kind: ProjectorKind::Record,
                fields: vec![ProjectedField {
                    member: "Name".into(),
                    column: "Name".into(),
                }],
            },
            aggregator: None,
        }
    }

    #[test]
    fn inner_ordering_moves_to_outermost_select() {
        let (table, mut inner) = base();
        inner.order_by = vec![OrderExpr::new(
            Expr::column(table.alias, "Year", WireType::Int),
            Direction::Desc,
        )];
        let outer = SelectNode::new(
            Alias::fresh(),
            inner.clone(),
            vec![ColumnDecl::new(
                "Name",
                Expr::column(inner.alias, "Name", WireType::String),
            )],
        );
        let rewritten = OrderByRewriter.apply(&project(outer.clone())).expect("rewrite");
        let top = &rewritten.select;
        assert_eq!(
            top.order_by,
            vec![OrderExpr::new(
                Expr::column(inner.alias, "Year", WireType::Int),
                Direction::Desc
            )]
        );
        assert!(top.from.as_select().expect("inner").order_by.is_empty());
    }

    #[test]
    fn ordering_with_take_stays_in_place() {
        let (table, mut inner) = base();
        inner.take = Some(3);
        inner.order_by = vec![OrderExpr::new(
            Expr::column(table.alias, "Year", WireType::Int),
            Direction::Asc,
        )];
        let outer = SelectNode::new(
            Alias::fresh(),
            inner.clone(),
            vec![ColumnDecl::new(
                "Name",
                Expr::column(inner.alias, "Name", WireType::String),
            )],
        );
        let rewritten = OrderByRewriter.apply(&project(outer)).expect("rewrite");
        let kept = rewritten.select.from.as_select().expect("inner");
        assert_eq!(kept.order_by.len(), 1);
        assert_eq!(rewritten.select.order_by.len(), 1);
    }

    #[test]
    fn distinct_boundary_discards_inner_ordering() {
        let (table, mut inner) = base();
        inner.order_by = vec![OrderExpr::new(
            Expr::column(table.alias, "Year", WireType::Int),
            Direction::Asc,
        )];
        let mut middle = SelectNode::new(
            Alias::fresh(),
            inner.clone(),
            vec![ColumnDecl::new(
                "Name",
                Expr::column(inner.alias, "Name", WireType::String),
            )],
        );
        middle.distinct = true;
        let outer = SelectNode::new(
            Alias::fresh(),
            middle.clone(),
            vec![ColumnDecl::new(
                "Name",
                Expr::column(middle.alias, "Name", WireType::String),
            )],
        );
        let rewritten = OrderByRewriter.apply(&project(outer)).expect("rewrite");
        assert!(rewritten.select.order_by.is_empty());
    }
}
