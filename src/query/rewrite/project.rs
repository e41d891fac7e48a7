//! Splits an expression into the part computable inside a select and the
//! part that stays outside it.

use std::collections::HashSet;

use crate::query::ast::{available_name, Alias, ColumnDecl, Expr};

/// Result of [`project_columns`].
pub(crate) struct ProjectedColumns {
    /// The expression with every projectable subexpression replaced by a
    /// reference to a column of the target select.
    pub expr: Expr,
    /// Target select columns, existing ones first.
    pub columns: Vec<ColumnDecl>,
}

/// Moves the maximal subexpressions of `expr` that only reference
/// `inner` aliases into columns of the select named `alias`.
///
/// Identical columns already declared by the select are reused.
pub(crate) fn project_columns(
    expr: &Expr,
    alias: Alias,
    existing: &[ColumnDecl],
    inner: &HashSet<Alias>,
) -> ProjectedColumns {
    let mut projector = ColumnProjector {
        alias,
        inner,
        columns: existing.to_vec(),
    };
    let expr = projector.project(expr);
    ProjectedColumns {
        expr,
        columns: projector.columns,
    }
}

struct ColumnProjector<'a> {
    alias: Alias,
    inner: &'a HashSet<Alias>,
    columns: Vec<ColumnDecl>,
}

impl ColumnProjector<'_> {
    fn project(&mut self, expr: &Expr) -> Expr {
        if self.is_candidate(expr) {
            return self.column_for(expr);
        }
        expr.map_children(&mut |child| self.project(child))
    }

    fn is_candidate(&self, expr: &Expr) -> bool {
        let mut columns = 0usize;
        let mut foreign = false;
        let mut windowed = false;
        expr.walk(&mut |e| match e {
            Expr::Column(col) => {
                columns += 1;
                foreign |= !self.inner.contains(&col.alias);
            }
            Expr::Aggregate { .. } | Expr::RowNumber { .. } => windowed = true,
            _ => {}
        });
        columns > 0 && !foreign && !windowed
    }

    fn column_for(&mut self, expr: &Expr) -> Expr {
        if let Some(decl) = self.columns.iter().find(|decl| &decl.expr == expr) {
            return Expr::column(self.alias, decl.name.clone(), decl.wire);
        }
        let base = match expr.as_column() {
            Some(col) => col.name.clone(),
            None => format!("c{}", self.columns.len()),
        };
        let decl = ColumnDecl::new(available_name(&self.columns, &base), expr.clone());
        let reference = Expr::column(self.alias, decl.name.clone(), decl.wire);
        self.columns.push(decl);
        reference
    }
}
