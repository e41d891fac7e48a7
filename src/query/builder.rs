//! Fluent builder producing operator-call trees.

use crate::query::{
    ast::{AggregateFunc, Aggregator, BinaryOp, Direction, Function, UnaryOp},
    errors::TranslationError,
    ops::{ApplyType, Field, JoinType, QExpr, QueryOp, SortKey},
    Value,
};
use crate::types::{HiveError, Result};

/// Fluent builder for [`QueryOp`] trees.
///
/// Each call wraps the operator built so far. The first invalid call is
/// remembered and reported by [`QueryBuilder::build`]; later calls are
/// ignored.
#[derive(Debug)]
pub struct QueryBuilder {
    op: QueryOp,
    error: Option<HiveError>,
}

impl QueryBuilder {
    /// Starts a query over the rows of `entity`, bound to `var`.
    pub fn table(entity: impl Into<String>, var: impl Into<String>) -> Self {
        Self {
            op: QueryOp::Table {
                entity: entity.into(),
                var: var.into(),
            },
            error: None,
        }
    }

    /// Wraps an existing operator tree.
    pub fn from_op(op: QueryOp) -> Self {
        Self { op, error: None }
    }

    fn wrap(mut self, op: &'static str, make: impl FnOnce(Box<QueryOp>) -> QueryOp) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.op.is_terminal() {
            self.error = Some(
                TranslationError::UnsupportedOperator {
                    op,
                    reason: format!("cannot follow terminal operator '{}'", self.op.name()),
                }
                .into(),
            );
            return self;
        }
        let source = std::mem::replace(
            &mut self.op,
            QueryOp::Table {
                entity: String::new(),
                var: String::new(),
            },
        );
        self.op = make(Box::new(source));
        self
    }

    fn combine(
        mut self,
        op: &'static str,
        other: QueryBuilder,
        make: impl FnOnce(Box<QueryOp>, Box<QueryOp>) -> QueryOp,
    ) -> Self {
        if self.error.is_none() {
            if let Some(err) = other.error {
                self.error = Some(err);
                return self;
            }
            if other.op.is_terminal() {
                self.error = Some(
                    TranslationError::UnsupportedOperator {
                        op,
                        reason: "right input ends in a terminal operator".to_owned(),
                    }
                    .into(),
                );
                return self;
            }
        }
        let right = other.op;
        self.wrap(op, move |left| make(left, Box::new(right)))
    }

    /// Keeps rows matching `predicate`.
    pub fn filter(self, predicate: QExpr) -> Self {
        self.wrap("where", |source| QueryOp::Where { source, predicate })
    }

    /// Projects each row into a record bound to `var`.
    pub fn select<I, N>(mut self, var: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (N, QExpr)>,
        N: Into<String>,
    {
        let fields: Vec<Field> = fields
            .into_iter()
            .map(|(name, expr)| Field::new(name, expr))
            .collect();
        if fields.is_empty() && self.error.is_none() {
            self.error = Some(TranslationError::EmptyProjection { context: "select" }.into());
            return self;
        }
        let var = var.into();
        self.wrap("select", |source| QueryOp::Select {
            source,
            var,
            fields,
        })
    }

    /// Inner join with `other` on `on`.
    pub fn inner_join(self, other: QueryBuilder, on: QExpr) -> Self {
        self.join(JoinType::Inner, other, Some(on))
    }

    /// Left outer join with `other` on `on`.
    pub fn left_join(self, other: QueryBuilder, on: QExpr) -> Self {
        self.join(JoinType::LeftOuter, other, Some(on))
    }

    /// Cartesian product with `other`.
    pub fn cross_join(self, other: QueryBuilder) -> Self {
        self.join(JoinType::Cross, other, None)
    }

    fn join(self, kind: JoinType, other: QueryBuilder, on: Option<QExpr>) -> Self {
        self.combine("join", other, |left, right| QueryOp::Join {
            kind,
            left,
            right,
            on,
        })
    }

    /// Correlated join keeping rows where `other` yields results.
    pub fn cross_apply(self, other: QueryBuilder) -> Self {
        self.apply(ApplyType::Cross, other)
    }

    /// Correlated join keeping every row.
    pub fn outer_apply(self, other: QueryBuilder) -> Self {
        self.apply(ApplyType::Outer, other)
    }

    fn apply(self, kind: ApplyType, other: QueryBuilder) -> Self {
        self.combine("apply", other, |left, right| QueryOp::Apply { kind, left, right })
    }

    /// Follows association `association` of the entity bound to `from`.
    pub fn navigate(
        self,
        from: impl Into<String>,
        association: impl Into<String>,
        var: impl Into<String>,
    ) -> Self {
        self.navigate_with(from.into(), association.into(), var.into(), false)
    }

    /// Like [`QueryBuilder::navigate`], keeping rows without a target.
    pub fn navigate_optional(
        self,
        from: impl Into<String>,
        association: impl Into<String>,
        var: impl Into<String>,
    ) -> Self {
        self.navigate_with(from.into(), association.into(), var.into(), true)
    }

    fn navigate_with(self, from: String, association: String, var: String, optional: bool) -> Self {
        self.wrap("navigate", |source| QueryOp::Navigate {
            source,
            from,
            association,
            var,
            optional,
        })
    }

    /// Groups rows by `keys` and computes `aggregates` per group.
    pub fn group_by<K, A, N, M>(mut self, var: impl Into<String>, keys: K, aggregates: A) -> Self
    where
        K: IntoIterator<Item = (N, QExpr)>,
        A: IntoIterator<Item = (M, QExpr)>,
        N: Into<String>,
        M: Into<String>,
    {
        let keys: Vec<Field> = keys
            .into_iter()
            .map(|(name, expr)| Field::new(name, expr))
            .collect();
        let aggregates = aggregates
            .into_iter()
            .map(|(name, expr)| Field::new(name, expr))
            .collect();
        if keys.is_empty() && self.error.is_none() {
            self.error = Some(TranslationError::EmptyProjection { context: "group_by" }.into());
            return self;
        }
        let var = var.into();
        self.wrap("group_by", |source| QueryOp::GroupBy {
            source,
            var,
            keys,
            aggregates,
        })
    }

    /// Orders ascending by `expr`, superseding earlier orderings.
    pub fn order_by(self, expr: QExpr) -> Self {
        self.order(expr, Direction::Asc)
    }

    /// Orders descending by `expr`, superseding earlier orderings.
    pub fn order_by_desc(self, expr: QExpr) -> Self {
        self.order(expr, Direction::Desc)
    }

    fn order(self, expr: QExpr, direction: Direction) -> Self {
        self.wrap("order_by", |source| QueryOp::OrderBy {
            source,
            keys: vec![SortKey { expr, direction }],
        })
    }

    /// Adds a secondary key to the immediately preceding order-by.
    pub fn then_by(self, expr: QExpr) -> Self {
        self.then(expr, Direction::Asc)
    }

    /// Adds a descending secondary key to the preceding order-by.
    pub fn then_by_desc(self, expr: QExpr) -> Self {
        self.then(expr, Direction::Desc)
    }

    fn then(mut self, expr: QExpr, direction: Direction) -> Self {
        if self.error.is_some() {
            return self;
        }
        match &mut self.op {
            QueryOp::OrderBy { keys, .. } => keys.push(SortKey { expr, direction }),
            _ => {
                self.error = Some(
                    TranslationError::UnsupportedOperator {
                        op: "then_by",
                        reason: "requires a preceding order_by".to_owned(),
                    }
                    .into(),
                )
            }
        }
        self
    }

    /// Keeps at most `count` rows.
    pub fn take(self, count: u64) -> Self {
        self.wrap("take", |source| QueryOp::Take { source, count })
    }

    /// Skips the first `count` rows.
    pub fn skip(self, count: u64) -> Self {
        self.wrap("skip", |source| QueryOp::Skip { source, count })
    }

    /// Removes duplicate rows.
    pub fn distinct(self) -> Self {
        self.wrap("distinct", |source| QueryOp::Distinct { source })
    }

    /// Buckets output rows by `keys`.
    pub fn cluster_by(self, keys: impl IntoIterator<Item = QExpr>) -> Self {
        let keys = keys.into_iter().collect();
        self.wrap("cluster_by", |source| QueryOp::ClusterBy { source, keys })
    }

    /// Counts rows.
    pub fn count(self) -> Self {
        self.aggregate(AggregateFunc::Count, None)
    }

    /// Sums `expr` over all rows.
    pub fn sum(self, expr: QExpr) -> Self {
        self.aggregate(AggregateFunc::Sum, Some(expr))
    }

    /// Smallest `expr`.
    pub fn min(self, expr: QExpr) -> Self {
        self.aggregate(AggregateFunc::Min, Some(expr))
    }

    /// Largest `expr`.
    pub fn max(self, expr: QExpr) -> Self {
        self.aggregate(AggregateFunc::Max, Some(expr))
    }

    /// Mean of `expr`.
    pub fn average(self, expr: QExpr) -> Self {
        self.aggregate(AggregateFunc::Avg, Some(expr))
    }

    fn aggregate(self, func: AggregateFunc, arg: Option<QExpr>) -> Self {
        self.wrap("aggregate", |source| QueryOp::Aggregate {
            source,
            func,
            arg,
            distinct: false,
        })
    }

    /// First row; fails at materialization when there is none.
    pub fn first(self) -> Self {
        self.element(Aggregator::First)
    }

    /// First row, if any.
    pub fn first_or_default(self) -> Self {
        self.element(Aggregator::FirstOrDefault)
    }

    /// The only row; fails when there are zero or several.
    pub fn single(self) -> Self {
        self.element(Aggregator::Single)
    }

    /// The only row, if any; fails when there are several.
    pub fn single_or_default(self) -> Self {
        self.element(Aggregator::SingleOrDefault)
    }

    fn element(self, kind: Aggregator) -> Self {
        self.wrap("element", |source| QueryOp::Element { source, kind })
    }

    /// Returns the operator tree or the first recorded error.
    pub fn build(self) -> Result<QueryOp> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.op),
        }
    }
}

/// Conversion into an expression operand.
pub trait IntoExpr {
    /// Converts `self` into a [`QExpr`].
    fn into_expr(self) -> QExpr;
}

impl IntoExpr for QExpr {
    fn into_expr(self) -> QExpr {
        self
    }
}

impl IntoExpr for Value {
    fn into_expr(self) -> QExpr {
        QExpr::Literal { value: self }
    }
}

macro_rules! literal_into_expr {
    ($($ty:ty),*) => {
        $(impl IntoExpr for $ty {
            fn into_expr(self) -> QExpr {
                QExpr::Literal { value: Value::from(self) }
            }
        })*
    };
}

literal_into_expr!(&str, String, bool, i32, i64, f64);

/// Member path such as `row.state` or `x.t.Year`; the first segment names
/// the variable.
pub fn col(path: &str) -> QExpr {
    let mut parts = path.split('.').map(str::to_owned);
    let var = parts.next().unwrap_or_default();
    QExpr::Member {
        var,
        path: parts.collect(),
    }
}

/// Whole-row reference to `var`.
pub fn var(name: &str) -> QExpr {
    QExpr::Member {
        var: name.to_owned(),
        path: Vec::new(),
    }
}

/// Literal operand.
pub fn lit(value: impl Into<Value>) -> QExpr {
    QExpr::Literal {
        value: value.into(),
    }
}

/// Named parameter.
pub fn param(name: impl Into<String>, value: impl Into<Value>) -> QExpr {
    QExpr::Param {
        name: name.into(),
        value: value.into(),
    }
}

/// Builtin scalar function call.
pub fn func(func: Function, args: impl IntoIterator<Item = QExpr>) -> QExpr {
    QExpr::Function {
        func,
        args: args.into_iter().collect(),
    }
}

/// `COUNT(*)`.
pub fn count_all() -> QExpr {
    QExpr::Aggregate {
        func: AggregateFunc::Count,
        arg: None,
        distinct: false,
    }
}

/// Aggregate call over `arg`.
pub fn agg(func: AggregateFunc, arg: QExpr) -> QExpr {
    QExpr::Aggregate {
        func,
        arg: Some(Box::new(arg)),
        distinct: false,
    }
}

/// `DISTINCT` aggregate call over `arg`.
pub fn agg_distinct(func: AggregateFunc, arg: QExpr) -> QExpr {
    QExpr::Aggregate {
        func,
        arg: Some(Box::new(arg)),
        distinct: true,
    }
}

impl QExpr {
    fn binary(self, op: BinaryOp, other: impl IntoExpr) -> QExpr {
        QExpr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other.into_expr()),
        }
    }

    /// `self = other`
    pub fn eq(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self <> other`
    pub fn ne(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Ne, other)
    }

    /// `self < other`
    pub fn lt(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self <= other`
    pub fn le(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Le, other)
    }

    /// `self > other`
    pub fn gt(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self >= other`
    pub fn ge(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Ge, other)
    }

    /// `self AND other`
    pub fn and(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::And, other)
    }

    /// `self OR other`
    pub fn or(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Or, other)
    }

    /// `self LIKE pattern`
    pub fn like(self, pattern: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Like, pattern)
    }

    /// `self + other`
    pub fn plus(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Add, other)
    }

    /// `self - other`
    pub fn minus(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Sub, other)
    }

    /// `self * other`
    pub fn times(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Mul, other)
    }

    /// `self / other`
    pub fn divided_by(self, other: impl IntoExpr) -> QExpr {
        self.binary(BinaryOp::Div, other)
    }

    /// `NOT self`
    pub fn not(self) -> QExpr {
        QExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// `self IS NULL`
    pub fn is_null(self) -> QExpr {
        QExpr::IsNull {
            operand: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> QExpr {
        QExpr::IsNull {
            operand: Box::new(self),
            negated: true,
        }
    }

    /// `self BETWEEN low AND high`
    pub fn between(self, low: impl IntoExpr, high: impl IntoExpr) -> QExpr {
        QExpr::Between {
            operand: Box::new(self),
            low: Box::new(low.into_expr()),
            high: Box::new(high.into_expr()),
        }
    }

    /// `self IN (items...)`
    pub fn in_list<I, T>(self, items: I) -> QExpr
    where
        I: IntoIterator<Item = T>,
        T: IntoExpr,
    {
        QExpr::In {
            operand: Box::new(self),
            list: items.into_iter().map(IntoExpr::into_expr).collect(),
        }
    }
}
