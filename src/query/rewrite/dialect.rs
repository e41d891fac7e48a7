//! Dialect-specific reduction: subquery elimination followed by apply-join
//! lowering, with a cleanup round when the lowering changed the tree.

use tracing::debug;

use crate::query::ast::ProjectionNode;
use crate::query::rewrite::{
    cross_apply::CrossApplyRewriter,
    redundant::RedundantColumnRemover,
    subquery::{RedundantSubqueryRemover, SubqueryMerger},
    unused::UnusedColumnRemover,
    RewritePass,
};
use crate::types::Result;

/// Hive dialect reduction pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialectRewriter;

impl RewritePass for DialectRewriter {
    fn name(&self) -> &'static str {
        "dialect"
    }

    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode> {
        let reduced = RedundantSubqueryRemover.apply(projection)?;
        let merged = SubqueryMerger.apply(&reduced)?;
        let lowered = CrossApplyRewriter.apply(&merged)?;
        if lowered == merged {
            return Ok(lowered);
        }
        debug!("query.rewrite.dialect.cleanup");
        let cleaned = UnusedColumnRemover.apply(&lowered)?;
        let cleaned = RedundantSubqueryRemover.apply(&cleaned)?;
        RedundantColumnRemover.apply(&cleaned)
    }
}
