//! Subquery elimination: removal of pass-through selects and merging of
//! a select into the select that reads it.

use std::collections::{HashMap, HashSet};

use crate::query::ast::{Alias, ColumnRef, Expr, JoinNode, ProjectionNode, SelectNode, Source};
use crate::query::errors::TranslationError;
use crate::query::rewrite::{
    gather::{direct_selects, leftmost_select},
    RewritePass,
};
use crate::types::{HiveError, Result};

/// Replaces the selects named in `targets` with their sources, substituting
/// every reference to their columns with the column expressions.
///
/// Callers are responsible for carrying over any clause of a removed select
/// other than its columns.
pub(crate) fn remove_subqueries(select: &SelectNode, targets: &HashSet<Alias>) -> Result<SelectNode> {
    let mut remover = SubqueryRemover {
        targets,
        substitutions: HashMap::new(),
    };
    remover.visit_select(select)
}

struct SubqueryRemover<'a> {
    targets: &'a HashSet<Alias>,
    substitutions: HashMap<Alias, HashMap<String, Expr>>,
}

impl SubqueryRemover<'_> {
    fn visit_select(&mut self, select: &SelectNode) -> Result<SelectNode> {
        let from = self.visit_source(&select.from)?;
        let substitutions = &self.substitutions;
        let mut visited = select.try_map_level(&mut |col| substitute(substitutions, col))?;
        visited.from = from;
        Ok(visited)
    }

    fn visit_source(&mut self, source: &Source) -> Result<Source> {
        match source {
            Source::Table(_) => Ok(source.clone()),
            Source::Select(select) => {
                let visited = self.visit_select(select)?;
                if !self.targets.contains(&select.alias) {
                    return Ok(visited.into());
                }
                let columns = visited
                    .columns
                    .iter()
                    .map(|decl| (decl.name.clone(), decl.expr.clone()))
                    .collect();
                self.substitutions.insert(select.alias, columns);
                Ok(visited.from)
            }
            Source::Join(join) => {
                let left = self.visit_source(&join.left)?;
                let right = self.visit_source(&join.right)?;
                let substitutions = &self.substitutions;
                let condition = join
                    .condition
                    .as_ref()
                    .map(|cond| cond.try_map_columns(&mut |col| substitute(substitutions, col)))
                    .transpose()?;
                Ok(JoinNode {
                    kind: join.kind,
                    left,
                    right,
                    condition,
                }
                .into())
            }
        }
    }
}

fn substitute(
    substitutions: &HashMap<Alias, HashMap<String, Expr>>,
    col: &ColumnRef,
) -> std::result::Result<Option<Expr>, HiveError> {
    let Some(columns) = substitutions.get(&col.alias) else {
        return Ok(None);
    };
    match columns.get(&col.name) {
        Some(expr) => Ok(Some(expr.clone())),
        None => Err(TranslationError::DanglingColumn {
            alias: col.alias.to_string(),
            name: col.name.clone(),
        }
        .into()),
    }
}

/// Every column is a bare reference to a source column of the same name.
pub(crate) fn is_simple_projection(select: &SelectNode) -> bool {
    select
        .columns
        .iter()
        .all(|decl| decl.expr.as_column().is_some_and(|col| col.name == decl.name))
}

/// Columns read the source select's columns one-to-one, by position.
pub(crate) fn is_name_map_projection(select: &SelectNode) -> bool {
    let Some(from) = select.from.as_select() else {
        return false;
    };
    from.columns.len() == select.columns.len()
        && select.columns.iter().zip(&from.columns).all(|(decl, source)| {
            decl.expr
                .as_column()
                .is_some_and(|col| col.alias == from.alias && col.name == source.name)
        })
}

/// Every column is a column reference or a constant.
pub(crate) fn is_column_projection(select: &SelectNode) -> bool {
    select.columns.iter().all(|decl| {
        matches!(
            decl.expr,
            Expr::Column(_) | Expr::Literal(_) | Expr::Param(_)
        )
    })
}

fn is_redundant(select: &SelectNode) -> bool {
    (is_simple_projection(select) || is_name_map_projection(select))
        && !select.distinct
        && select.take.is_none()
        && select.skip.is_none()
        && select.predicate.is_none()
        && select.order_by.is_empty()
        && select.group_by.is_empty()
        && select.cluster_by.is_empty()
}

/// Removes selects that only pass their input through.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedundantSubqueryRemover;

impl RewritePass for RedundantSubqueryRemover {
    fn name(&self) -> &'static str {
        "redundant_subqueries"
    }

    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode> {
        let top = remove_redundant(&projection.select)?;
        let inner = match &top.from {
            Source::Select(inner) if is_redundant(&top) => (**inner).clone(),
            _ => {
                return Ok(ProjectionNode {
                    select: top,
                    ..projection.clone()
                })
            }
        };
        // The root itself only passes its source through; the source becomes
        // the root and the projector follows the column renames.
        let renames: HashMap<String, String> = top
            .columns
            .iter()
            .filter_map(|decl| {
                decl.expr
                    .as_column()
                    .map(|col| (decl.name.clone(), col.name.clone()))
            })
            .collect();
        Ok(ProjectionNode {
            select: inner,
            projector: projection
                .projector
                .remap_columns(|column| renames.get(column).cloned()),
            aggregator: projection.aggregator,
        })
    }
}

fn remove_redundant(select: &SelectNode) -> Result<SelectNode> {
    let mut visited = select.clone();
    visited.from = remove_redundant_source(&select.from)?;
    let redundant: HashSet<Alias> = direct_selects(&visited.from)
        .into_iter()
        .filter(|inner| is_redundant(inner))
        .map(|inner| inner.alias)
        .collect();
    if redundant.is_empty() {
        return Ok(visited);
    }
    remove_subqueries(&visited, &redundant)
}

fn remove_redundant_source(source: &Source) -> Result<Source> {
    Ok(match source {
        Source::Table(_) => source.clone(),
        Source::Select(select) => remove_redundant(select)?.into(),
        Source::Join(join) => JoinNode {
            kind: join.kind,
            left: remove_redundant_source(&join.left)?,
            right: remove_redundant_source(&join.right)?,
            condition: join.condition.clone(),
        }
        .into(),
    })
}

/// Folds a select into the select reading it when no clause conflicts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubqueryMerger;

impl RewritePass for SubqueryMerger {
    fn name(&self) -> &'static str {
        "merge_subqueries"
    }

    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode> {
        Ok(ProjectionNode {
            select: merge_select(&projection.select, true)?,
            ..projection.clone()
        })
    }
}

fn merge_select(select: &SelectNode, top_level: bool) -> Result<SelectNode> {
    let mut select = select.clone();
    select.from = merge_source(&select.from)?;
    while can_merge_with_from(&select, top_level) {
        let Some(from) = leftmost_select(&select.from).cloned() else {
            break;
        };
        let mut merged = remove_subqueries(&select, &HashSet::from([from.alias]))?;
        merged.predicate = match (from.predicate, merged.predicate) {
            (Some(inner), Some(outer)) => Some(inner.and(outer)),
            (inner, outer) => outer.or(inner),
        };
        if merged.order_by.is_empty() {
            merged.order_by = from.order_by;
        }
        if merged.group_by.is_empty() {
            merged.group_by = from.group_by;
        }
        if merged.cluster_by.is_empty() {
            merged.cluster_by = from.cluster_by;
        }
        merged.skip = merged.skip.or(from.skip);
        merged.take = merged.take.or(from.take);
        merged.distinct |= from.distinct;
        select = merged;
    }
    Ok(select)
}

fn merge_source(source: &Source) -> Result<Source> {
    Ok(match source {
        Source::Table(_) => source.clone(),
        Source::Select(select) => merge_select(select, false)?.into(),
        Source::Join(join) => JoinNode {
            kind: join.kind,
            left: merge_source(&join.left)?,
            right: merge_source(&join.right)?,
            condition: join.condition.clone(),
        }
        .into(),
    })
}

fn can_merge_with_from(select: &SelectNode, top_level: bool) -> bool {
    let Some(from) = leftmost_select(&select.from) else {
        return false;
    };
    if !is_column_projection(from) {
        return false;
    }
    let name_map = is_name_map_projection(select);
    let sel_order = !select.order_by.is_empty();
    let sel_group = !select.group_by.is_empty();
    let sel_aggregates = select.has_aggregates();
    let sel_join = matches!(select.from, Source::Join(_));
    let sel_cluster = !select.cluster_by.is_empty();
    let from_order = !from.order_by.is_empty();
    let from_group = !from.group_by.is_empty();
    let from_aggregates = from.has_aggregates();
    let from_cluster = !from.cluster_by.is_empty();

    if sel_order && from_order {
        return false;
    }
    if sel_group && from_group {
        return false;
    }
    if from_order && (sel_group || sel_aggregates || select.distinct || sel_cluster) {
        return false;
    }
    if from_group {
        return false;
    }
    let sel_filter = select.predicate.is_some();
    if from.take.is_some()
        && (sel_filter
            || select.take.is_some()
            || select.skip.is_some()
            || select.distinct
            || sel_aggregates
            || sel_group
            || sel_join
            || sel_cluster)
    {
        return false;
    }
    if from.skip.is_some()
        && (sel_filter
            || select.skip.is_some()
            || select.distinct
            || sel_aggregates
            || sel_group
            || sel_join)
    {
        return false;
    }
    if from.distinct
        && (select.take.is_some()
            || select.skip.is_some()
            || !name_map
            || sel_group
            || sel_aggregates
            || (sel_order && !top_level)
            || sel_join)
    {
        return false;
    }
    if from_aggregates
        && (sel_filter
            || select.take.is_some()
            || select.skip.is_some()
            || select.distinct
            || sel_aggregates
            || sel_group
            || sel_join)
    {
        return false;
    }
    if from_cluster
        && (sel_cluster
            || sel_order
            || sel_group
            || sel_aggregates
            || select.distinct
            || select.take.is_some()
            || select.skip.is_some()
            || sel_join)
    {
        return false;
    }
    true
}
