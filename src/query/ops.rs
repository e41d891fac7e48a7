//! Operator-call tree consumed by the binder.
//!
//! Front ends (the fluent [`crate::query::QueryBuilder`], JSON documents read
//! by the CLI, or any other caller) describe a query as nested operator
//! calls. Lambda parameters are explicit variable names: each operator that
//! introduces rows names them, and expressions address columns through
//! `var.member` paths.

use serde::{Deserialize, Serialize};

use crate::query::ast::{
    AggregateFunc, Aggregator, BinaryOp, Direction, Function, UnaryOp,
};
use crate::query::value::Value;

/// Expression inside an operator call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QExpr {
    /// `var.path...`; an empty path refers to the whole row.
    Member {
        /// Variable introduced by an enclosing operator.
        var: String,
        /// Member path below the variable.
        #[serde(default)]
        path: Vec<String>,
    },
    /// Inlined literal.
    Literal {
        /// Literal value.
        value: Value,
    },
    /// Named parameter passed to the engine as a variable binding.
    Param {
        /// Variable name.
        name: String,
        /// Bound value.
        value: Value,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<QExpr>,
        /// Right operand.
        right: Box<QExpr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<QExpr>,
    },
    /// `IS [NOT] NULL`.
    IsNull {
        /// Operand.
        operand: Box<QExpr>,
        /// True for `IS NOT NULL`.
        #[serde(default)]
        negated: bool,
    },
    /// Inclusive range test.
    Between {
        /// Operand.
        operand: Box<QExpr>,
        /// Lower bound.
        low: Box<QExpr>,
        /// Upper bound.
        high: Box<QExpr>,
    },
    /// Membership test.
    In {
        /// Operand.
        operand: Box<QExpr>,
        /// Candidates.
        list: Vec<QExpr>,
    },
    /// Builtin scalar function.
    Function {
        /// Function.
        func: Function,
        /// Arguments.
        args: Vec<QExpr>,
    },
    /// Aggregate call, only valid in group-by aggregates and selects.
    Aggregate {
        /// Aggregate function.
        func: AggregateFunc,
        /// Argument; absent for `COUNT(*)`.
        #[serde(default)]
        arg: Option<Box<QExpr>>,
        /// `DISTINCT` inside the call.
        #[serde(default)]
        distinct: bool,
    },
}

/// Named output field of a select or group-by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Output member name.
    pub name: String,
    /// Expression, possibly a whole-row reference.
    pub expr: QExpr,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, expr: QExpr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// Ordering key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    /// Expression sorted on.
    pub expr: QExpr,
    /// Direction.
    #[serde(default)]
    pub direction: Direction,
}

/// Non-correlated join flavours.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    /// Inner equi/theta join.
    Inner,
    /// Left outer join.
    LeftOuter,
    /// Cartesian product.
    Cross,
}

/// Correlated join flavours.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyType {
    /// Keep left rows with at least one right row.
    Cross,
    /// Keep every left row.
    Outer,
}

/// Operator call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueryOp {
    /// Rows of a mapped entity bound to `var`.
    Table {
        /// Entity name.
        entity: String,
        /// Row variable.
        var: String,
    },
    /// Filter.
    Where {
        /// Input.
        source: Box<QueryOp>,
        /// Boolean predicate.
        predicate: QExpr,
    },
    /// Projection into a record bound to `var`.
    Select {
        /// Input.
        source: Box<QueryOp>,
        /// Row variable of the result.
        var: String,
        /// Output fields.
        fields: Vec<Field>,
    },
    /// Join of two independent inputs; both sides' variables stay in scope.
    Join {
        /// Join type.
        kind: JoinType,
        /// Left input.
        left: Box<QueryOp>,
        /// Right input.
        right: Box<QueryOp>,
        /// Join condition; required unless `kind` is cross.
        #[serde(default)]
        on: Option<QExpr>,
    },
    /// Correlated join: `right` may reference the variables of `left`.
    Apply {
        /// Apply type.
        kind: ApplyType,
        /// Left input.
        left: Box<QueryOp>,
        /// Correlated right input.
        right: Box<QueryOp>,
    },
    /// Follow an association of the entity bound to `from`.
    Navigate {
        /// Input.
        source: Box<QueryOp>,
        /// Variable holding the owning entity.
        from: String,
        /// Association member.
        association: String,
        /// Variable bound to the target entity.
        var: String,
        /// Keep source rows without a target (left outer join).
        #[serde(default)]
        optional: bool,
    },
    /// Grouping with per-group aggregates, producing a record bound to `var`.
    GroupBy {
        /// Input.
        source: Box<QueryOp>,
        /// Row variable of the result.
        var: String,
        /// Grouping keys.
        keys: Vec<Field>,
        /// Aggregates computed per group.
        #[serde(default)]
        aggregates: Vec<Field>,
    },
    /// Ordering; a later order-by takes precedence over earlier ones.
    OrderBy {
        /// Input.
        source: Box<QueryOp>,
        /// Keys, most significant first.
        keys: Vec<SortKey>,
    },
    /// Keep at most `count` rows.
    Take {
        /// Input.
        source: Box<QueryOp>,
        /// Row limit.
        count: u64,
    },
    /// Drop the first `count` rows.
    Skip {
        /// Input.
        source: Box<QueryOp>,
        /// Rows skipped.
        count: u64,
    },
    /// Drop duplicate rows.
    Distinct {
        /// Input.
        source: Box<QueryOp>,
    },
    /// Hive bucketing of the output on the given keys.
    ClusterBy {
        /// Input.
        source: Box<QueryOp>,
        /// Bucketing keys.
        keys: Vec<QExpr>,
    },
    /// Scalar aggregate over all input rows; terminal.
    Aggregate {
        /// Input.
        source: Box<QueryOp>,
        /// Aggregate function.
        func: AggregateFunc,
        /// Argument; absent for `COUNT(*)`.
        #[serde(default)]
        arg: Option<QExpr>,
        /// `DISTINCT` inside the call.
        #[serde(default)]
        distinct: bool,
    },
    /// First/single element of the input; terminal.
    Element {
        /// Input.
        source: Box<QueryOp>,
        /// Element semantics.
        kind: Aggregator,
    },
}

impl QueryOp {
    /// Operator name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            QueryOp::Table { .. } => "table",
            QueryOp::Where { .. } => "where",
            QueryOp::Select { .. } => "select",
            QueryOp::Join { .. } => "join",
            QueryOp::Apply { .. } => "apply",
            QueryOp::Navigate { .. } => "navigate",
            QueryOp::GroupBy { .. } => "group_by",
            QueryOp::OrderBy { .. } => "order_by",
            QueryOp::Take { .. } => "take",
            QueryOp::Skip { .. } => "skip",
            QueryOp::Distinct { .. } => "distinct",
            QueryOp::ClusterBy { .. } => "cluster_by",
            QueryOp::Aggregate { .. } => "aggregate",
            QueryOp::Element { .. } => "element",
        }
    }

    /// True for operators that must be outermost.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryOp::Aggregate { .. } | QueryOp::Element { .. })
    }

    /// Decodes an operator tree from JSON.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encodes the operator tree as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
