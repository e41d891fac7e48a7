//! Immutable relational tree produced by the binder and consumed by the
//! rewrite passes and the formatter.
//!
//! Every pass takes a tree by reference and returns a new one, so earlier
//! stages stay available for explain output and tests. Node kinds are closed
//! enums; passes match on them exhaustively.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::query::value::{Value, ValueKind, WireType};

static NEXT_ALIAS: AtomicU64 = AtomicU64::new(1);

/// Identity token naming one relational result set (a table reference or a
/// subquery).
///
/// Aliases come from a process-wide monotonic allocator and compare by id, so
/// two freshly minted aliases are never equal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Alias(u64);

impl Alias {
    /// Mints a new alias.
    pub fn fresh() -> Self {
        Alias(NEXT_ALIAS.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw allocator id.
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Relational input of a select.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    /// Physical mapped table.
    Table(TableNode),
    /// Nested subquery.
    Select(Box<SelectNode>),
    /// Join of two sources.
    Join(Box<JoinNode>),
}

impl Source {
    /// Alias declared directly by this source, if it is a table or select.
    pub fn alias(&self) -> Option<Alias> {
        match self {
            Source::Table(table) => Some(table.alias),
            Source::Select(select) => Some(select.alias),
            Source::Join(_) => None,
        }
    }

    /// Returns the nested select, if this source is one.
    pub fn as_select(&self) -> Option<&SelectNode> {
        match self {
            Source::Select(select) => Some(select),
            _ => None,
        }
    }
}

impl From<SelectNode> for Source {
    fn from(select: SelectNode) -> Self {
        Source::Select(Box::new(select))
    }
}

impl From<TableNode> for Source {
    fn from(table: TableNode) -> Self {
        Source::Table(table)
    }
}

impl From<JoinNode> for Source {
    fn from(join: JoinNode) -> Self {
        Source::Join(Box::new(join))
    }
}

/// Leaf referencing a physical table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableNode {
    /// Alias column references bind to.
    pub alias: Alias,
    /// Physical table name.
    pub name: String,
    /// Entity the table was mapped from.
    pub entity: String,
}

/// One output column of a select.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDecl {
    /// Output name, unique within the select.
    pub name: String,
    /// Expression computing the column.
    pub expr: Expr,
    /// Wire type the column is read back as.
    pub wire: WireType,
}

impl ColumnDecl {
    /// Declares a column, taking the wire type from the expression.
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        let wire = expr.wire_type();
        Self {
            name: name.into(),
            expr,
            wire,
        }
    }
}

/// Sort direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Ordering term.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderExpr {
    /// Expression sorted on.
    pub expr: Expr,
    /// Sort direction.
    pub direction: Direction,
}

impl OrderExpr {
    /// Creates an ordering term.
    pub fn new(expr: Expr, direction: Direction) -> Self {
        Self { expr, direction }
    }
}

/// Relational select.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectNode {
    /// Alias outer expressions use to reference this select's columns.
    pub alias: Alias,
    /// Input relation.
    pub from: Source,
    /// WHERE predicate.
    pub predicate: Option<Expr>,
    /// Ordered output columns.
    pub columns: Vec<ColumnDecl>,
    /// ORDER BY terms; empty when unordered.
    pub order_by: Vec<OrderExpr>,
    /// GROUP BY keys; empty when ungrouped.
    pub group_by: Vec<Expr>,
    /// SELECT DISTINCT.
    pub distinct: bool,
    /// Row limit.
    pub take: Option<u64>,
    /// Rows skipped before the limit applies.
    pub skip: Option<u64>,
    /// CLUSTER BY keys.
    pub cluster_by: Vec<Expr>,
}

impl SelectNode {
    /// Creates a plain projection over `from`.
    pub fn new(alias: Alias, from: impl Into<Source>, columns: Vec<ColumnDecl>) -> Self {
        Self {
            alias,
            from: from.into(),
            predicate: None,
            columns,
            order_by: Vec::new(),
            group_by: Vec::new(),
            distinct: false,
            take: None,
            skip: None,
            cluster_by: Vec::new(),
        }
    }

    /// Returns the declared column with `name`.
    pub fn column(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns.iter().find(|decl| decl.name == name)
    }

    /// Builds a reference to one of this select's columns.
    pub fn column_ref(&self, decl: &ColumnDecl) -> Expr {
        Expr::Column(ColumnRef::new(self.alias, decl.name.clone(), decl.wire))
    }

    /// Picks an output name based on `base` that no column uses yet.
    pub fn available_column_name(&self, base: &str) -> String {
        available_name(&self.columns, base)
    }

    /// True when any column, the predicate, or an ordering term aggregates.
    pub fn has_aggregates(&self) -> bool {
        self.columns.iter().any(|decl| decl.expr.has_aggregate())
            || self.predicate.as_ref().is_some_and(Expr::has_aggregate)
            || self.order_by.iter().any(|ord| ord.expr.has_aggregate())
    }

    /// Iterates every expression held at this level, excluding the source.
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.columns
            .iter()
            .map(|decl| &decl.expr)
            .chain(self.predicate.iter())
            .chain(self.order_by.iter().map(|ord| &ord.expr))
            .chain(self.group_by.iter())
            .chain(self.cluster_by.iter())
    }

    /// Rewrites the column references of every expression at this level.
    pub fn try_map_level<E, F>(&self, f: &mut F) -> Result<SelectNode, E>
    where
        F: FnMut(&ColumnRef) -> Result<Option<Expr>, E>,
    {
        let columns = self
            .columns
            .iter()
            .map(|decl| {
                Ok(ColumnDecl {
                    name: decl.name.clone(),
                    expr: decl.expr.try_map_columns(f)?,
                    wire: decl.wire,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        let predicate = self
            .predicate
            .as_ref()
            .map(|expr| expr.try_map_columns(f))
            .transpose()?;
        let order_by = map_orderings(&self.order_by, f)?;
        let group_by = self
            .group_by
            .iter()
            .map(|expr| expr.try_map_columns(f))
            .collect::<Result<Vec<_>, E>>()?;
        let cluster_by = self
            .cluster_by
            .iter()
            .map(|expr| expr.try_map_columns(f))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(SelectNode {
            alias: self.alias,
            from: self.from.clone(),
            predicate,
            columns,
            order_by,
            group_by,
            distinct: self.distinct,
            take: self.take,
            skip: self.skip,
            cluster_by,
        })
    }

    /// Infallible form of [`SelectNode::try_map_level`].
    pub fn map_level(&self, f: &mut impl FnMut(&ColumnRef) -> Option<Expr>) -> SelectNode {
        let result: Result<SelectNode, std::convert::Infallible> =
            self.try_map_level(&mut |col| Ok(f(col)));
        match result {
            Ok(select) => select,
            Err(never) => match never {},
        }
    }

    /// Wraps this select in a pass-through outer select that keeps the
    /// original alias; the inner copy receives a fresh alias.
    ///
    /// References to the original alias stay valid because the outer select
    /// declares the same column names.
    pub fn wrap_redundant(&self) -> SelectNode {
        let mut inner = self.clone();
        inner.alias = Alias::fresh();
        let columns = inner
            .columns
            .iter()
            .map(|decl| ColumnDecl {
                name: decl.name.clone(),
                expr: inner.column_ref(decl),
                wire: decl.wire,
            })
            .collect();
        SelectNode::new(self.alias, inner, columns)
    }
}

pub(crate) fn available_name(columns: &[ColumnDecl], base: &str) -> String {
    let taken = |name: &str| columns.iter().any(|decl| decl.name == name);
    if !taken(base) {
        return base.to_owned();
    }
    let mut suffix = 1;
    loop {
        let candidate = format!("{base}{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

pub(crate) fn map_orderings<E, F>(orderings: &[OrderExpr], f: &mut F) -> Result<Vec<OrderExpr>, E>
where
    F: FnMut(&ColumnRef) -> Result<Option<Expr>, E>,
{
    orderings
        .iter()
        .map(|ord| Ok(OrderExpr::new(ord.expr.try_map_columns(f)?, ord.direction)))
        .collect()
}

/// Join flavours, including the apply joins the dialect cannot express.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Cartesian product.
    Cross,
    /// Inner join on a condition.
    Inner,
    /// Left outer join on a condition.
    LeftOuter,
    /// Correlated join keeping only left rows with right matches.
    CrossApply,
    /// Correlated join keeping every left row.
    OuterApply,
}

impl JoinKind {
    /// True for the correlated kinds.
    pub fn is_apply(self) -> bool {
        matches!(self, JoinKind::CrossApply | JoinKind::OuterApply)
    }
}

/// Join of two sources.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinNode {
    /// Join flavour.
    pub kind: JoinKind,
    /// Left input.
    pub left: Source,
    /// Right input; may reference the left side for apply joins.
    pub right: Source,
    /// ON condition.
    pub condition: Option<Expr>,
}

/// Reference to a column declared by the select or table carrying `alias`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Alias of the declaring node.
    pub alias: Alias,
    /// Column name on that node.
    pub name: String,
    /// Wire type of the column.
    pub wire: WireType,
}

impl ColumnRef {
    /// Creates a column reference.
    pub fn new(alias: Alias, name: impl Into<String>, wire: WireType) -> Self {
        Self {
            alias,
            name: name.into(),
            wire,
        }
    }
}

/// Binary operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `LIKE`
    Like,
}

impl BinaryOp {
    /// Operator text.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Like => "LIKE",
        }
    }

    /// True for operators producing a boolean.
    pub fn is_predicate(self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

/// Unary operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
}

/// Scalar functions with a Hive builtin counterpart.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    /// `lower(s)`
    Lower,
    /// `upper(s)`
    Upper,
    /// `length(s)`
    Length,
    /// `trim(s)`
    Trim,
    /// `substr(s, pos[, len])`
    Substr,
    /// `concat(a, b, ...)`
    Concat,
    /// `coalesce(a, b, ...)`
    Coalesce,
    /// `year(ts)`
    Year,
    /// `month(ts)`
    Month,
    /// `day(ts)`
    Day,
    /// `round(x[, d])`
    Round,
    /// `abs(x)`
    Abs,
}

impl Function {
    /// Hive builtin name.
    pub fn name(self) -> &'static str {
        match self {
            Function::Lower => "lower",
            Function::Upper => "upper",
            Function::Length => "length",
            Function::Trim => "trim",
            Function::Substr => "substr",
            Function::Concat => "concat",
            Function::Coalesce => "coalesce",
            Function::Year => "year",
            Function::Month => "month",
            Function::Day => "day",
            Function::Round => "round",
            Function::Abs => "abs",
        }
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Substr => (2, 3),
            Function::Round => (1, 2),
            Function::Concat | Function::Coalesce => (1, usize::MAX),
            _ => (1, 1),
        }
    }
}

/// Aggregate functions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    /// `COUNT`
    Count,
    /// `SUM`
    Sum,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `AVG`
    Avg,
}

impl AggregateFunc {
    /// Upper-case function name.
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Avg => "AVG",
        }
    }
}

/// Parameter value formatted as a Hive variable reference.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedValue {
    /// Variable name.
    pub name: String,
    /// Bound value.
    pub value: Value,
    /// Wire type the value is declared as.
    pub wire: WireType,
}

/// Scalar expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Column of an enclosing source.
    Column(ColumnRef),
    /// Inlined literal.
    Literal(Value),
    /// Named parameter.
    Param(NamedValue),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// `IS [NOT] NULL`.
    IsNull {
        /// Operand.
        operand: Box<Expr>,
        /// True for `IS NOT NULL`.
        negated: bool,
    },
    /// `BETWEEN low AND high`.
    Between {
        /// Operand.
        operand: Box<Expr>,
        /// Inclusive lower bound.
        low: Box<Expr>,
        /// Inclusive upper bound.
        high: Box<Expr>,
    },
    /// `IN (...)`.
    In {
        /// Operand.
        operand: Box<Expr>,
        /// Candidates.
        list: Vec<Expr>,
    },
    /// Builtin scalar function.
    Function {
        /// Function.
        func: Function,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Aggregate call; `arg` absent means `*`.
    Aggregate {
        /// Aggregate function.
        func: AggregateFunc,
        /// Argument.
        arg: Option<Box<Expr>>,
        /// `DISTINCT` inside the call.
        distinct: bool,
    },
    /// Unpartitioned `ROW_NUMBER() OVER (ORDER BY ...)`.
    RowNumber {
        /// Window ordering.
        order_by: Vec<OrderExpr>,
    },
}

impl Expr {
    /// Builds a column reference expression.
    pub fn column(alias: Alias, name: impl Into<String>, wire: WireType) -> Self {
        Expr::Column(ColumnRef::new(alias, name, wire))
    }

    /// Builds a binary expression.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, other)
    }

    /// Returns the column reference when the expression is a bare column.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(col) => Some(col),
            _ => None,
        }
    }

    /// Wire type the expression evaluates to.
    pub fn wire_type(&self) -> WireType {
        match self {
            Expr::Column(col) => col.wire,
            Expr::Literal(value) => value.wire_type(),
            Expr::Param(named) => named.wire,
            Expr::Binary { op, left, right } => {
                if op.is_predicate() {
                    WireType::Boolean
                } else {
                    let (l, r) = (left.wire_type(), right.wire_type());
                    if l.kind() == ValueKind::Float || r.kind() == ValueKind::Float {
                        WireType::Double
                    } else if *op == BinaryOp::Div {
                        WireType::Double
                    } else {
                        l
                    }
                }
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => WireType::Boolean,
                UnaryOp::Neg => operand.wire_type(),
            },
            Expr::IsNull { .. } | Expr::Between { .. } | Expr::In { .. } => WireType::Boolean,
            Expr::Function { func, args } => match func {
                Function::Lower
                | Function::Upper
                | Function::Trim
                | Function::Substr
                | Function::Concat => WireType::String,
                Function::Length | Function::Year | Function::Month | Function::Day => {
                    WireType::Int
                }
                Function::Round => WireType::Double,
                Function::Abs | Function::Coalesce => args
                    .first()
                    .map(Expr::wire_type)
                    .unwrap_or(WireType::String),
            },
            Expr::Aggregate { func, arg, .. } => match func {
                AggregateFunc::Count => WireType::BigInt,
                AggregateFunc::Avg => WireType::Double,
                AggregateFunc::Sum => match arg.as_deref().map(Expr::wire_type) {
                    Some(wire) if wire.kind() == ValueKind::Float => WireType::Double,
                    _ => WireType::BigInt,
                },
                AggregateFunc::Min | AggregateFunc::Max => arg
                    .as_deref()
                    .map(Expr::wire_type)
                    .unwrap_or(WireType::BigInt),
            },
            Expr::RowNumber { .. } => WireType::Int,
        }
    }

    /// True when an aggregate call appears anywhere in the expression.
    pub fn has_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| {
            if matches!(expr, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// Visits the expression and all of its sub-expressions, pre-order.
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) => {}
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Unary { operand, .. } | Expr::IsNull { operand, .. } => operand.walk(f),
            Expr::Between { operand, low, high } => {
                operand.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::In { operand, list } => {
                operand.walk(f);
                list.iter().for_each(|item| item.walk(f));
            }
            Expr::Function { args, .. } => args.iter().for_each(|arg| arg.walk(f)),
            Expr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.walk(f);
                }
            }
            Expr::RowNumber { order_by } => order_by.iter().for_each(|ord| ord.expr.walk(f)),
        }
    }

    /// Visits every column reference in the expression.
    pub fn for_each_column(&self, f: &mut impl FnMut(&ColumnRef)) {
        self.walk(&mut |expr| {
            if let Expr::Column(col) = expr {
                f(col);
            }
        });
    }

    /// Rebuilds the expression, replacing each column for which `f` returns
    /// a substitute.
    pub fn try_map_columns<E, F>(&self, f: &mut F) -> Result<Expr, E>
    where
        F: FnMut(&ColumnRef) -> Result<Option<Expr>, E>,
    {
        let mapped = match self {
            Expr::Column(col) => match f(col)? {
                Some(replacement) => replacement,
                None => self.clone(),
            },
            Expr::Literal(_) | Expr::Param(_) => self.clone(),
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(left.try_map_columns(f)?),
                right: Box::new(right.try_map_columns(f)?),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(operand.try_map_columns(f)?),
            },
            Expr::IsNull { operand, negated } => Expr::IsNull {
                operand: Box::new(operand.try_map_columns(f)?),
                negated: *negated,
            },
            Expr::Between { operand, low, high } => Expr::Between {
                operand: Box::new(operand.try_map_columns(f)?),
                low: Box::new(low.try_map_columns(f)?),
                high: Box::new(high.try_map_columns(f)?),
            },
            Expr::In { operand, list } => Expr::In {
                operand: Box::new(operand.try_map_columns(f)?),
                list: list
                    .iter()
                    .map(|item| item.try_map_columns(f))
                    .collect::<Result<Vec<_>, E>>()?,
            },
            Expr::Function { func, args } => Expr::Function {
                func: *func,
                args: args
                    .iter()
                    .map(|arg| arg.try_map_columns(f))
                    .collect::<Result<Vec<_>, E>>()?,
            },
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => Expr::Aggregate {
                func: *func,
                arg: match arg {
                    Some(arg) => Some(Box::new(arg.try_map_columns(f)?)),
                    None => None,
                },
                distinct: *distinct,
            },
            Expr::RowNumber { order_by } => Expr::RowNumber {
                order_by: map_orderings(order_by, f)?,
            },
        };
        Ok(mapped)
    }

    /// Rebuilds the expression with `f` applied to each direct child.
    pub fn map_children(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Expr {
        let mut boxed = |expr: &Expr| Box::new(f(expr));
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) => self.clone(),
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: boxed(left),
                right: boxed(right),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: boxed(operand),
            },
            Expr::IsNull { operand, negated } => Expr::IsNull {
                operand: boxed(operand),
                negated: *negated,
            },
            Expr::Between { operand, low, high } => Expr::Between {
                operand: boxed(operand),
                low: boxed(low),
                high: boxed(high),
            },
            Expr::In { operand, list } => Expr::In {
                operand: boxed(operand),
                list: list.iter().map(|item| *boxed(item)).collect(),
            },
            Expr::Function { func, args } => Expr::Function {
                func: *func,
                args: args.iter().map(|arg| *boxed(arg)).collect(),
            },
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => Expr::Aggregate {
                func: *func,
                arg: arg.as_deref().map(&mut boxed),
                distinct: *distinct,
            },
            Expr::RowNumber { order_by } => Expr::RowNumber {
                order_by: order_by
                    .iter()
                    .map(|ord| OrderExpr::new(*boxed(&ord.expr), ord.direction))
                    .collect(),
            },
        }
    }

    /// Infallible form of [`Expr::try_map_columns`].
    pub fn map_columns(&self, f: &mut impl FnMut(&ColumnRef) -> Option<Expr>) -> Expr {
        let result: Result<Expr, std::convert::Infallible> =
            self.try_map_columns(&mut |col| Ok(f(col)));
        match result {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }
}

/// How a materialized row is turned into a caller-facing result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProjectorKind {
    /// Rows of a mapped entity.
    Entity(String),
    /// Anonymous records, including flattened join results.
    Record,
    /// A single scalar per row.
    Scalar,
}

/// Result member bound to one output column of the top select.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProjectedField {
    /// Member name; dotted for nested records.
    pub member: String,
    /// Output column of the top-level select.
    pub column: String,
}

/// Pure description of how one output row maps to a result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Projector {
    /// Result shape.
    pub kind: ProjectorKind,
    /// Members in result order.
    pub fields: Vec<ProjectedField>,
}

impl Projector {
    /// Renames the column bound to each member using `rename`.
    pub fn remap_columns(&self, mut rename: impl FnMut(&str) -> Option<String>) -> Projector {
        Projector {
            kind: self.kind.clone(),
            fields: self
                .fields
                .iter()
                .map(|field| ProjectedField {
                    member: field.member.clone(),
                    column: rename(&field.column).unwrap_or_else(|| field.column.clone()),
                })
                .collect(),
        }
    }
}

/// Reduction applied to the materialized rows of a singleton query.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    /// Exactly one row.
    Single,
    /// Zero or one row.
    SingleOrDefault,
    /// At least one row; the first wins.
    First,
    /// The first row, if any.
    FirstOrDefault,
}

/// Root of a compiled query: the top select plus how to read its rows.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionNode {
    /// Top-level select.
    pub select: SelectNode,
    /// Row projector.
    pub projector: Projector,
    /// Optional singleton reduction.
    pub aggregator: Option<Aggregator>,
}
