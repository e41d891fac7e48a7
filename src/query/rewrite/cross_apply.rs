//! Lowers correlated apply joins into ordinary joins where the correlation
//! only lives in the right side's WHERE clause.

use crate::query::ast::{
    Alias, BinaryOp, ColumnDecl, Expr, JoinKind, JoinNode, ProjectionNode, SelectNode, Source,
};
use crate::query::errors::TranslationError;
use crate::query::rewrite::{
    gather::{declared_aliases, referenced_aliases},
    project::project_columns,
    RewritePass,
};
use crate::types::Result;

/// Apply-join lowering pass. Joins it cannot lower are left untouched,
/// except DISTINCT right sides whose correlation cannot be moved into a
/// join condition, which are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossApplyRewriter;

impl RewritePass for CrossApplyRewriter {
    fn name(&self) -> &'static str {
        "cross_apply"
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
    Ok(select)
}

fn rewrite_source(source: &Source) -> Result<Source> {
    Ok(match source {
        Source::Table(_) => source.clone(),
        Source::Select(select) => rewrite_select(select)?.into(),
        Source::Join(join) => {
            let join = JoinNode {
                kind: join.kind,
                left: rewrite_source(&join.left)?,
                right: rewrite_source(&join.right)?,
                condition: join.condition.clone(),
            };
            lower_apply(join)?.into()
        }
    })
}

fn lower_apply(join: JoinNode) -> Result<JoinNode> {
    if !join.kind.is_apply() {
        return Ok(join);
    }
    let right = match &join.right {
        Source::Table(_) => {
            return Ok(JoinNode {
                kind: JoinKind::Cross,
                condition: None,
                ..join
            })
        }
        Source::Select(select) => select,
        Source::Join(_) => return Ok(join),
    };
    if right.take.is_some()
        || right.skip.is_some()
        || right.has_aggregates()
        || !right.group_by.is_empty()
        || !right.cluster_by.is_empty()
    {
        return Ok(join);
    }
    let mut stripped = (**right).clone();
    let predicate = stripped.predicate.take();
    let left_aliases = declared_aliases(&join.left);
    if referenced_aliases(&stripped)
        .iter()
        .any(|alias| left_aliases.contains(alias))
    {
        return Ok(join);
    }
    let (kind, condition) = match predicate {
        None => (JoinKind::Cross, None),
        Some(predicate) => {
            let inner = declared_aliases(&stripped.from);
            let projected = project_columns(&predicate, stripped.alias, &stripped.columns, &inner);
            if stripped.distinct {
                let added = &projected.columns[stripped.columns.len()..];
                ensure_pinned(added, stripped.alias, &projected.expr)?;
            }
            stripped.columns = projected.columns;
            let kind = match join.kind {
                JoinKind::OuterApply => JoinKind::LeftOuter,
                _ => JoinKind::Inner,
            };
            (kind, Some(projected.expr))
        }
    };
    Ok(JoinNode {
        kind,
        left: join.left,
        right: stripped.into(),
        condition,
    })
}

/// A DISTINCT right side keeps its row set only when every column added for
/// the join condition is fixed by the left row, through an equality
/// conjunct against an expression free of the right side.
fn ensure_pinned(added: &[ColumnDecl], alias: Alias, condition: &Expr) -> Result<()> {
    let mut conjuncts = Vec::new();
    split_conjuncts(condition, &mut conjuncts);
    for decl in added {
        let pinned = conjuncts.iter().any(|conjunct| pins(conjunct, alias, &decl.name));
        if !pinned {
            return Err(TranslationError::UnsupportedOperator {
                op: "apply",
                reason: format!(
                    "distinct subquery correlated through '{}' cannot become a join",
                    decl.name
                ),
            }
            .into());
        }
    }
    Ok(())
}

fn split_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            split_conjuncts(left, out);
            split_conjuncts(right, out);
        }
        other => out.push(other),
    }
}

fn pins(conjunct: &Expr, alias: Alias, name: &str) -> bool {
    let Expr::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return false;
    };
    let is_target = |e: &Expr| e.as_column().is_some_and(|c| c.alias == alias && c.name == name);
    let free = |e: &Expr| {
        let mut touches = false;
        e.for_each_column(&mut |c| touches |= c.alias == alias);
        !touches
    };
    (is_target(left) && free(right)) || (is_target(right) && free(left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{
        Alias, BinaryOp, ColumnDecl, Expr, ProjectedField, Projector, ProjectorKind, TableNode,
    };
    use crate::query::value::WireType;

    fn table(name: &str) -> TableNode {
        TableNode {
            alias: Alias::fresh(),
            name: name.into(),
            entity: name.into(),
        }
    }

    fn select_over(table: &TableNode, names: &[&str]) -> SelectNode {
        SelectNode::new(
            Alias::fresh(),
            table.clone(),
            names
                .iter()
                .map(|n| ColumnDecl::new(*n, Expr::column(table.alias, *n, WireType::String)))
                .collect(),
        )
    }

    fn root(join: JoinNode) -> ProjectionNode {
        ProjectionNode {
            select: SelectNode::new(Alias::fresh(), join, Vec::new()),
            projector: Projector {
                kind: ProjectorKind::Record,
                fields: Vec::<ProjectedField>::new(),
            },
            aggregator: None,
        }
    }

    fn rewritten_join(projection: &ProjectionNode) -> JoinNode {
        match &CrossApplyRewriter.apply(projection).expect("rewrite").select.from {
            Source::Join(join) => (**join).clone(),
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn correlated_where_becomes_inner_join_condition() {
        let (titles, awards) = (table("titles"), table("awards"));
        let left = select_over(&titles, &["MovieId"]);
        let mut right = select_over(&awards, &["AwardId"]);
        right.predicate = Some(Expr::binary(
            BinaryOp::Eq,
            Expr::column(awards.alias, "MovieId", WireType::String),
            Expr::column(left.alias, "MovieId", WireType::String),
        ));
        let join = rewritten_join(&root(JoinNode {
            kind: JoinKind::CrossApply,
            left: left.clone().into(),
            right: right.into(),
            condition: None,
        }));
        assert_eq!(join.kind, JoinKind::Inner);
        let right = join.right.as_select().expect("right select");
        assert!(right.predicate.is_none());
        assert_eq!(right.columns.len(), 2);
        assert_eq!(right.columns[1].name, "MovieId");
    }

    #[test]
    fn outer_apply_becomes_left_outer_join() {
        let (titles, awards) = (table("titles"), table("awards"));
        let left = select_over(&titles, &["MovieId"]);
        let mut right = select_over(&awards, &["MovieId"]);
        right.predicate = Some(Expr::binary(
            BinaryOp::Eq,
            Expr::column(awards.alias, "MovieId", WireType::String),
            Expr::column(left.alias, "MovieId", WireType::String),
        ));
        let join = rewritten_join(&root(JoinNode {
            kind: JoinKind::OuterApply,
            left: left.into(),
            right: right.into(),
            condition: None,
        }));
        assert_eq!(join.kind, JoinKind::LeftOuter);
        assert_eq!(join.right.as_select().expect("right").columns.len(), 1);
    }

    #[test]
    fn correlation_outside_where_is_left_in_place() {
        let (titles, awards) = (table("titles"), table("awards"));
        let left = select_over(&titles, &["MovieId"]);
        let mut right = select_over(&awards, &["MovieId"]);
        right.columns.push(ColumnDecl::new(
            "Outer",
            Expr::column(left.alias, "MovieId", WireType::String),
        ));
        let join = rewritten_join(&root(JoinNode {
            kind: JoinKind::CrossApply,
            left: left.into(),
            right: right.into(),
            condition: None,
        }));
        assert_eq!(join.kind, JoinKind::CrossApply);
    }

    #[test]
    fn distinct_right_side_lowers_on_key_equality() {
        let (titles, awards) = (table("titles"), table("awards"));
        let left = select_over(&titles, &["MovieId"]);
        let mut right = select_over(&awards, &["Year"]);
        right.distinct = true;
        right.predicate = Some(Expr::binary(
            BinaryOp::Eq,
            Expr::column(left.alias, "MovieId", WireType::String),
            Expr::column(awards.alias, "MovieId", WireType::String),
        ));
        let join = rewritten_join(&root(JoinNode {
            kind: JoinKind::CrossApply,
            left: left.into(),
            right: right.into(),
            condition: None,
        }));
        assert_eq!(join.kind, JoinKind::Inner);
        let right = join.right.as_select().expect("right select");
        assert!(right.distinct);
        assert_eq!(right.columns.len(), 2);
    }

    #[test]
    fn distinct_right_side_with_range_correlation_is_rejected() {
        let (titles, awards) = (table("titles"), table("awards"));
        let left = select_over(&titles, &["Year"]);
        let mut right = select_over(&awards, &["Name"]);
        right.distinct = true;
        right.predicate = Some(Expr::binary(
            BinaryOp::Gt,
            Expr::column(awards.alias, "Year", WireType::Int),
            Expr::column(left.alias, "Year", WireType::Int),
        ));
        let err = CrossApplyRewriter
            .apply(&root(JoinNode {
                kind: JoinKind::CrossApply,
                left: left.into(),
                right: right.into(),
                condition: None,
            }))
            .unwrap_err();
        assert_eq!(err.code(), "UnsupportedOperator");
    }

    #[test]
    fn table_on_the_right_becomes_cross_join() {
        let (titles, awards) = (table("titles"), table("awards"));
        let join = rewritten_join(&root(JoinNode {
            kind: JoinKind::CrossApply,
            left: select_over(&titles, &["MovieId"]).into(),
            right: awards.into(),
            condition: None,
        }));
        assert_eq!(join.kind, JoinKind::Cross);
    }
}
