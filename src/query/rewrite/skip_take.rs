//! Emulates row skipping with a `ROW_NUMBER()` window, since the dialect
//! only knows `LIMIT`.
//!
//! A select with `skip k` (and optionally `take n`) becomes
//!
//! ```text
//! SELECT cols FROM (SELECT cols, ROW_NUMBER() OVER (ORDER BY o) AS rownum ...) x
//! WHERE x.rownum > k AND x.rownum <= k + n
//! ```

use std::collections::HashSet;

use crate::query::ast::{
    Alias, BinaryOp, ColumnDecl, Expr, OrderExpr, ProjectionNode, SelectNode, Source,
};
use crate::query::errors::TranslationError;
use crate::query::rewrite::{gather::declared_aliases, RewritePass};
use crate::query::value::{Value, WireType};
use crate::types::Result;

/// Base name of the rank column.
pub const ROW_NUMBER_COLUMN: &str = "rownum";

/// Skip emulation pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipRewriter;

impl RewritePass for SkipRewriter {
    fn name(&self) -> &'static str {
        "skip_take"
    }

    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode> {
        Ok(ProjectionNode {
            select: rewrite_select(&projection.select)?,
            ..projection.clone()
        })
    }
}

fn rewrite_select(select: &SelectNode) -> Result<SelectNode> {
    let mut select = select.clone();
    select.from = rewrite_source(&select.from)?;
    match (select.skip, select.take) {
        (None, _) => Ok(select),
        (Some(0), None) => {
            select.skip = None;
            Ok(select)
        }
        (Some(skip), _) => emulate(select, skip),
    }
}

fn rewrite_source(source: &Source) -> Result<Source> {
    Ok(match source {
        Source::Table(_) => source.clone(),
        Source::Select(select) => rewrite_select(select)?.into(),
        Source::Join(join) => {
            let mut join = (**join).clone();
            join.left = rewrite_source(&join.left)?;
            join.right = rewrite_source(&join.right)?;
            join.into()
        }
    })
}

fn emulate(select: SelectNode, skip: u64) -> Result<SelectNode> {
    let take = select.take;
    let mut ranked = select;
    ranked.skip = None;
    ranked.take = None;

    let mut order_by = std::mem::take(&mut ranked.order_by);
    if ranked.distinct || !ranked.group_by.is_empty() {
        // The rank cannot be added next to DISTINCT or GROUP BY columns:
        // rank the rows of a pass-through select instead.
        let wrapped = ranked.wrap_redundant();
        order_by = rebind_to_columns(&order_by, &wrapped)?;
        ranked = wrapped;
    }

    let rank_name = ranked.available_column_name(ROW_NUMBER_COLUMN);
    ranked.columns.push(ColumnDecl {
        name: rank_name.clone(),
        expr: Expr::RowNumber {
            order_by: order_by.clone(),
        },
        wire: WireType::Int,
    });
    ranked.order_by = order_by;

    let mut outer = ranked.wrap_redundant();
    outer.columns.retain(|decl| decl.name != rank_name);
    let inner_alias = outer
        .from
        .alias()
        .ok_or_else(|| TranslationError::unsupported("skip", "ranked select lost its alias"))?;
    let rank = Expr::column(inner_alias, rank_name, WireType::Int);
    let upper = take.map(|take| {
        Expr::binary(BinaryOp::Le, rank.clone(), bound(skip.saturating_add(take)))
    });
    outer.predicate = match (skip, upper) {
        (0, upper) => upper,
        (_, upper) => {
            let lower = Expr::binary(BinaryOp::Gt, rank, bound(skip));
            Some(match upper {
                Some(upper) => lower.and(upper),
                None => lower,
            })
        }
    };
    Ok(outer)
}

fn bound(value: u64) -> Expr {
    Expr::Literal(Value::Int(i64::try_from(value).unwrap_or(i64::MAX)))
}

/// Re-expresses orderings bound below `wrapped` over its inner select's
/// columns; every term must already be projected there.
fn rebind_to_columns(orderings: &[OrderExpr], wrapped: &SelectNode) -> Result<Vec<OrderExpr>> {
    let Some(inner) = wrapped.from.as_select() else {
        return Ok(Vec::new());
    };
    let visible: HashSet<Alias> = declared_aliases(&inner.from);
    orderings
        .iter()
        .map(|ord| {
            let decl = inner
                .columns
                .iter()
                .find(|decl| decl.expr == ord.expr)
                .filter(|_| {
                    let mut bound_below = true;
                    ord.expr.for_each_column(&mut |col| {
                        bound_below &= visible.contains(&col.alias);
                    });
                    bound_below
                })
                .ok_or_else(|| TranslationError::UnsupportedOperator {
                    op: "skip",
                    reason: "orderings of a distinct or grouped query must be projected columns"
                        .to_owned(),
                })?;
            Ok(OrderExpr::new(inner.column_ref(decl), ord.direction))
        })
        .collect()
}
