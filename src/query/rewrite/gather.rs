//! Read-only walks over relational trees.

use std::collections::HashSet;

use crate::query::ast::{Alias, Expr, ProjectionNode, SelectNode, Source};

/// Aliases a source declares at its own level: the alias of a table or
/// select, or the aliases of both sides of a join. Nested selects are not
/// entered.
pub fn declared_aliases(source: &Source) -> HashSet<Alias> {
    let mut aliases = HashSet::new();
    collect_declared(source, &mut aliases);
    aliases
}

fn collect_declared(source: &Source, out: &mut HashSet<Alias>) {
    match source {
        Source::Table(table) => {
            out.insert(table.alias);
        }
        Source::Select(select) => {
            out.insert(select.alias);
        }
        Source::Join(join) => {
            collect_declared(&join.left, out);
            collect_declared(&join.right, out);
        }
    }
}

/// Aliases referenced by any column reference in `select`, including
/// nested selects and join conditions below it.
pub fn referenced_aliases(select: &SelectNode) -> HashSet<Alias> {
    let mut aliases = HashSet::new();
    collect_referenced_select(select, &mut aliases);
    aliases
}

fn collect_referenced_select(select: &SelectNode, out: &mut HashSet<Alias>) {
    for expr in select.exprs() {
        expr.for_each_column(&mut |col| {
            out.insert(col.alias);
        });
    }
    collect_referenced_source(&select.from, out);
}

fn collect_referenced_source(source: &Source, out: &mut HashSet<Alias>) {
    match source {
        Source::Table(_) => {}
        Source::Select(select) => collect_referenced_select(select, out),
        Source::Join(join) => {
            if let Some(condition) = &join.condition {
                condition.for_each_column(&mut |col| {
                    out.insert(col.alias);
                });
            }
            collect_referenced_source(&join.left, out);
            collect_referenced_source(&join.right, out);
        }
    }
}

/// Leftmost select reachable through the join spine of `source`.
pub fn leftmost_select(source: &Source) -> Option<&SelectNode> {
    match source {
        Source::Table(_) => None,
        Source::Select(select) => Some(select),
        Source::Join(join) => leftmost_select(&join.left),
    }
}

/// Selects sitting directly in `source`, looking through joins but never
/// inside another select.
pub fn direct_selects(source: &Source) -> Vec<&SelectNode> {
    let mut out = Vec::new();
    collect_direct(source, &mut out);
    out
}

fn collect_direct<'a>(source: &'a Source, out: &mut Vec<&'a SelectNode>) {
    match source {
        Source::Table(_) => {}
        Source::Select(select) => out.push(select),
        Source::Join(join) => {
            collect_direct(&join.left, out);
            collect_direct(&join.right, out);
        }
    }
}

/// Bucketing keys of the outermost clustered select reachable from the
/// root through the from-chain.
pub fn cluster_by_keys(projection: &ProjectionNode) -> Vec<Expr> {
    let mut current = Some(&projection.select);
    while let Some(select) = current {
        if !select.cluster_by.is_empty() {
            return select.cluster_by.clone();
        }
        current = leftmost_select(&select.from);
    }
    Vec::new()
}

/// Number of selects in the tree, the root included.
pub fn select_count(select: &SelectNode) -> usize {
    fn in_source(source: &Source) -> usize {
        match source {
            Source::Table(_) => 0,
            Source::Select(select) => select_count(select),
            Source::Join(join) => in_source(&join.left) + in_source(&join.right),
        }
    }
    1 + in_source(&select.from)
}
