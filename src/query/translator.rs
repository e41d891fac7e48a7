//! Compiles operator trees into Hive commands: bind, rewrite, format.

use tracing::debug;

use crate::query::ast::{NamedValue, ProjectionNode};
use crate::query::binder;
use crate::query::explain::{explain, QueryExplain};
use crate::query::formatter::{self, QueryCommand};
use crate::query::mapping::MappingProvider;
use crate::query::ops::QueryOp;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::rewrite::{default_pipeline, run_pipeline, RewritePass, Stage};
use crate::types::{HiveError, Result};

/// Everything produced while compiling one query.
#[derive(Clone, Debug)]
pub struct Translation {
    /// The bound tree followed by the output of every rewrite pass.
    pub stages: Vec<Stage>,
    /// Formatted command.
    pub command: QueryCommand,
    /// Parameter values, in the order of `command.parameters()`.
    pub values: Vec<NamedValue>,
    /// Shape hash of the final tree.
    pub shape_hash: u64,
}

impl Translation {
    /// Fully rewritten tree the command was formatted from.
    pub fn projection(&self) -> Result<&ProjectionNode> {
        self.stages
            .last()
            .map(|stage| &stage.projection)
            .ok_or(HiveError::Invalid("translation has no stages"))
    }

    /// Explain trees of every stage, paired with the producing pass name.
    pub fn explain_stages(&self) -> Vec<(&'static str, QueryExplain)> {
        self.stages
            .iter()
            .map(|stage| (stage.name, explain(&stage.projection)))
            .collect()
    }
}

/// Query compiler with a configurable rewrite pipeline.
pub struct Translator {
    passes: Vec<Box<dyn RewritePass>>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator {
    /// Creates a translator running the standard Hive pipeline.
    pub fn new() -> Self {
        Self::with_passes(default_pipeline())
    }

    /// Creates a translator running `passes` in order.
    pub fn with_passes(passes: Vec<Box<dyn RewritePass>>) -> Self {
        Self { passes }
    }

    /// Names of the configured passes.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Compiles `op` against `mapping`.
    pub fn translate(&self, op: &QueryOp, mapping: &dyn MappingProvider) -> Result<Translation> {
        let timer = profile_timer();
        let bound = binder::bind(op, mapping);
        record_profile_timer(QueryProfileKind::Bind, timer);
        self.compile(bound?)
    }

    /// Rewrites and formats an already bound tree.
    pub fn compile(&self, bound: ProjectionNode) -> Result<Translation> {
        let timer = profile_timer();
        let stages = run_pipeline(bound, &self.passes);
        record_profile_timer(QueryProfileKind::Rewrite, timer);
        let stages = stages?;
        let last = stages
            .last()
            .map(|stage| &stage.projection)
            .ok_or(HiveError::Invalid("translation has no stages"))?;

        let timer = profile_timer();
        let formatted = formatter::format(last);
        record_profile_timer(QueryProfileKind::Format, timer);
        let formatted = formatted?;
        let shape_hash = explain(last).shape_hash;
        debug!(
            stages = stages.len(),
            shape_hash = format_args!("{shape_hash:016x}"),
            params = formatted.values.len(),
            "query.translate.completed"
        );
        Ok(Translation {
            stages,
            command: formatted.command,
            values: formatted.values,
            shape_hash,
        })
    }
}

/// Compiles `op` with the standard pipeline.
pub fn translate(op: &QueryOp, mapping: &dyn MappingProvider) -> Result<Translation> {
    Translator::new().translate(op, mapping)
}
