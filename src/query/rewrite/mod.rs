//! Tree-to-tree rewrite passes run between binding and formatting.
//!
//! Each pass takes the current [`ProjectionNode`] by reference and returns a
//! new tree; the pipeline keeps every intermediate result so callers can
//! inspect what a pass did.

pub mod cross_apply;
pub mod dialect;
pub mod gather;
pub mod order_by;
mod project;
pub mod redundant;
pub mod skip_take;
pub mod subquery;
pub mod unused;

use tracing::debug;

use crate::query::ast::ProjectionNode;
use crate::types::Result;

pub use cross_apply::CrossApplyRewriter;
pub use dialect::DialectRewriter;
pub use order_by::OrderByRewriter;
pub use redundant::RedundantColumnRemover;
pub use skip_take::SkipRewriter;
pub use subquery::{RedundantSubqueryRemover, SubqueryMerger};
pub use unused::UnusedColumnRemover;

/// A single rewrite over the bound query tree.
pub trait RewritePass: Send + Sync {
    /// Stable pass name used in logs and explain output.
    fn name(&self) -> &'static str;
    /// Produces the rewritten tree.
    fn apply(&self, projection: &ProjectionNode) -> Result<ProjectionNode>;
}

/// Output of one pipeline stage.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    /// Name of the pass that produced the tree; `bind` for the input.
    pub name: &'static str,
    /// Tree after the pass.
    pub projection: ProjectionNode,
}

/// Passes applied by the translator, in order.
pub fn default_pipeline() -> Vec<Box<dyn RewritePass>> {
    vec![
        Box::new(OrderByRewriter),
        Box::new(DialectRewriter),
        Box::new(SkipRewriter),
        Box::new(OrderByRewriter),
        Box::new(RedundantColumnRemover),
        Box::new(UnusedColumnRemover),
    ]
}

/// Runs `passes` over `bound`, returning the input followed by each pass's
/// output.
pub fn run_pipeline(bound: ProjectionNode, passes: &[Box<dyn RewritePass>]) -> Result<Vec<Stage>> {
    let mut stages = Vec::with_capacity(passes.len() + 1);
    stages.push(Stage {
        name: "bind",
        projection: bound,
    });
    for pass in passes {
        let Some(previous) = stages.last() else {
            break;
        };
        let projection = pass.apply(&previous.projection)?;
        debug!(
            pass = pass.name(),
            changed = projection != previous.projection,
            "query.rewrite.pass"
        );
        stages.push(Stage {
            name: pass.name(),
            projection,
        });
    }
    Ok(stages)
}
