//! Binder lowering operator-call trees into relational query trees.
//!
//! Every operator produces a [`SelectNode`] wrapping its input. Alongside the
//! select, the binder tracks a *scope*: for each row variable, the shape of
//! its value expressed through columns of the current select. Operators
//! resolve `var.member` paths against the scope of their input, then project
//! the scope onto the columns of the select they create.

#![allow(missing_docs)]

use tracing::debug;

use crate::query::{
    ast::{
        available_name, Aggregator, Alias, BinaryOp, ColumnDecl, Expr, JoinKind, JoinNode,
        NamedValue, OrderExpr, ProjectedField, ProjectionNode, Projector, ProjectorKind,
        SelectNode, Source, TableNode,
    },
    errors::{MappingError, TranslationError},
    mapping::MappingProvider,
    ops::{ApplyType, Field, JoinType, QExpr, QueryOp, SortKey},
};
use crate::types::Result;

/// Column name given to scalar aggregate results.
pub const AGGREGATE_COLUMN: &str = "agg";

/// Binds `op` against `mapping`, producing the root projection.
pub fn bind(op: &QueryOp, mapping: &dyn MappingProvider) -> Result<ProjectionNode> {
    let projection = Binder { mapping }.bind_root(op)?;
    debug!(
        root = op.name(),
        alias = %projection.select.alias,
        columns = projection.select.columns.len(),
        "query.bind.completed"
    );
    Ok(projection)
}

/// Value of a row variable, expressed over columns of the current select.
#[derive(Clone, Debug)]
enum Shape {
    Value(Expr),
    Entity {
        entity: String,
        members: Vec<(String, Expr)>,
    },
    Record(Vec<(String, Shape)>),
}

#[derive(Clone, Debug, Default)]
struct Scope {
    vars: Vec<(String, Shape)>,
}

impl Scope {
    fn single(var: impl Into<String>, shape: Shape) -> Self {
        Self {
            vars: vec![(var.into(), shape)],
        }
    }

    fn find(&self, var: &str) -> Option<&Shape> {
        self.vars
            .iter()
            .find(|(name, _)| name == var)
            .map(|(_, shape)| shape)
    }

    fn merge(mut self, other: Scope) -> Result<Scope> {
        for (var, shape) in other.vars {
            if self.find(&var).is_some() {
                return Err(TranslationError::DuplicateVariable { var }.into());
            }
            self.vars.push((var, shape));
        }
        Ok(self)
    }
}

/// A select together with the scope describing its rows.
struct Bound {
    select: SelectNode,
    scope: Scope,
}

struct Binder<'a> {
    mapping: &'a dyn MappingProvider,
}

impl Binder<'_> {
    fn bind_root(&self, op: &QueryOp) -> Result<ProjectionNode> {
        match op {
            QueryOp::Aggregate {
                source,
                func,
                arg,
                distinct,
            } => {
                let src = self.bind_source(source, &[])?;
                let arg = match arg {
                    Some(arg) => {
                        let expr = self.resolve_expr(arg, &src.scope, &[], "aggregate")?;
                        reject_aggregates(&expr, "aggregate")?;
                        Some(Box::new(expr))
                    }
                    None => None,
                };
                let expr = Expr::Aggregate {
                    func: *func,
                    arg,
                    distinct: *distinct,
                };
                let select = SelectNode::new(
                    Alias::fresh(),
                    src.select,
                    vec![ColumnDecl::new(AGGREGATE_COLUMN, expr)],
                );
                Ok(ProjectionNode {
                    select,
                    projector: Projector {
                        kind: ProjectorKind::Scalar,
                        fields: vec![ProjectedField {
                            member: "value".to_owned(),
                            column: AGGREGATE_COLUMN.to_owned(),
                        }],
                    },
                    aggregator: Some(Aggregator::Single),
                })
            }
            QueryOp::Element { source, kind } => {
                let mut bound = self.bind_source(source, &[])?;
                let limit = match kind {
                    Aggregator::First | Aggregator::FirstOrDefault => 1,
                    Aggregator::Single | Aggregator::SingleOrDefault => 2,
                };
                bound.select.take = Some(bound.select.take.map_or(limit, |t| t.min(limit)));
                let projector = projector_for(&bound)?;
                Ok(ProjectionNode {
                    select: bound.select,
                    projector,
                    aggregator: Some(*kind),
                })
            }
            _ => {
                let bound = self.bind_source(op, &[])?;
                let projector = projector_for(&bound)?;
                Ok(ProjectionNode {
                    select: bound.select,
                    projector,
                    aggregator: None,
                })
            }
        }
    }

    fn bind_source(&self, op: &QueryOp, outer: &[Scope]) -> Result<Bound> {
        match op {
            QueryOp::Table { entity, var } => self.bind_table(entity, var),
            QueryOp::Where { source, predicate } => {
                let src = self.bind_source(source, outer)?;
                let predicate = self.resolve_expr(predicate, &src.scope, outer, "where")?;
                reject_aggregates(&predicate, "where")?;
                let mut bound = wrap(src.select.into(), &src.scope);
                bound.select.predicate = Some(predicate);
                Ok(bound)
            }
            QueryOp::Select {
                source,
                var,
                fields,
            } => {
                let src = self.bind_source(source, outer)?;
                if fields.is_empty() {
                    return Err(TranslationError::EmptyProjection { context: "select" }.into());
                }
                let record = self.resolve_fields(fields, &src.scope, outer, "select")?;
                let scope = Scope::single(var.clone(), Shape::Record(record));
                Ok(wrap(src.select.into(), &scope))
            }
            QueryOp::Join {
                kind,
                left,
                right,
                on,
            } => {
                let left = self.bind_source(left, outer)?;
                let right = self.bind_source(right, outer)?;
                let scope = left.scope.merge(right.scope)?;
                let (kind, condition) = match (kind, on) {
                    (JoinType::Cross, None) => (JoinKind::Cross, None),
                    (JoinType::Cross, Some(_)) => {
                        return Err(TranslationError::UnsupportedOperator {
                            op: "join",
                            reason: "cross join takes no condition".to_owned(),
                        }
                        .into())
                    }
                    (_, None) => {
                        return Err(TranslationError::UnsupportedOperator {
                            op: "join",
                            reason: "inner and left outer joins require a condition".to_owned(),
                        }
                        .into())
                    }
                    (kind, Some(on)) => {
                        let condition = self.resolve_expr(on, &scope, outer, "join")?;
                        reject_aggregates(&condition, "join")?;
                        let kind = match kind {
                            JoinType::LeftOuter => JoinKind::LeftOuter,
                            _ => JoinKind::Inner,
                        };
                        (kind, Some(condition))
                    }
                };
                let join = JoinNode {
                    kind,
                    left: left.select.into(),
                    right: right.select.into(),
                    condition,
                };
                Ok(wrap(join.into(), &scope))
            }
            QueryOp::Apply { kind, left, right } => {
                let left = self.bind_source(left, outer)?;
                let mut correlated = outer.to_vec();
                correlated.push(left.scope.clone());
                let right = self.bind_source(right, &correlated)?;
                let scope = left.scope.merge(right.scope)?;
                let join = JoinNode {
                    kind: match kind {
                        ApplyType::Cross => JoinKind::CrossApply,
                        ApplyType::Outer => JoinKind::OuterApply,
                    },
                    left: left.select.into(),
                    right: right.select.into(),
                    condition: None,
                };
                Ok(wrap(join.into(), &scope))
            }
            QueryOp::Navigate {
                source,
                from,
                association,
                var,
                optional,
            } => self.bind_navigation(source, from, association, var, *optional, outer),
            QueryOp::GroupBy {
                source,
                var,
                keys,
                aggregates,
            } => self.bind_group_by(source, var, keys, aggregates, outer),
            QueryOp::OrderBy { source, keys } => {
                let src = self.bind_source(source, outer)?;
                let order_by = self.resolve_orderings(keys, &src.scope, outer)?;
                let mut bound = wrap(src.select.into(), &src.scope);
                bound.select.order_by = order_by;
                Ok(bound)
            }
            QueryOp::Take { source, count } => {
                let mut bound = self.bind_source(source, outer)?;
                bound.select.take = Some(bound.select.take.map_or(*count, |t| t.min(*count)));
                Ok(bound)
            }
            QueryOp::Skip { source, count } => {
                let src = self.bind_source(source, outer)?;
                let mut bound = if src.select.take.is_none() {
                    src
                } else {
                    wrap(src.select.into(), &src.scope)
                };
                bound.select.skip = Some(bound.select.skip.unwrap_or(0) + count);
                Ok(bound)
            }
            QueryOp::Distinct { source } => {
                let src = self.bind_source(source, outer)?;
                let select = &src.select;
                let mut bound = if select.take.is_none()
                    && select.skip.is_none()
                    && select.order_by.is_empty()
                {
                    src
                } else {
                    wrap(src.select.into(), &src.scope)
                };
                bound.select.distinct = true;
                Ok(bound)
            }
            QueryOp::ClusterBy { source, keys } => {
                let src = self.bind_source(source, outer)?;
                let keys = keys
                    .iter()
                    .map(|key| {
                        let expr = self.resolve_expr(key, &src.scope, outer, "cluster_by")?;
                        reject_aggregates(&expr, "cluster_by")?;
                        Ok(expr)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut bound = wrap(src.select.into(), &src.scope);
                bound.select.cluster_by = keys;
                Ok(bound)
            }
            QueryOp::Aggregate { .. } | QueryOp::Element { .. } => {
                Err(TranslationError::UnsupportedOperator {
                    op: op.name(),
                    reason: "must be the outermost operator".to_owned(),
                }
                .into())
            }
        }
    }

    fn bind_table(&self, entity_name: &str, var: &str) -> Result<Bound> {
        let entity = self.mapping.entity(entity_name)?;
        let table = TableNode {
            alias: Alias::fresh(),
            name: entity.table.clone(),
            entity: entity.name.clone(),
        };
        let columns = entity
            .columns
            .iter()
            .map(|col| ColumnDecl {
                name: col.column.clone(),
                expr: Expr::column(table.alias, col.column.clone(), col.wire),
                wire: col.wire,
            })
            .collect();
        let select = SelectNode::new(Alias::fresh(), table, columns);
        let members = entity
            .columns
            .iter()
            .map(|col| {
                (
                    col.member.clone(),
                    Expr::column(select.alias, col.column.clone(), col.wire),
                )
            })
            .collect();
        Ok(Bound {
            select,
            scope: Scope::single(
                var,
                Shape::Entity {
                    entity: entity.name.clone(),
                    members,
                },
            ),
        })
    }

    fn bind_navigation(
        &self,
        source: &QueryOp,
        from: &str,
        association: &str,
        var: &str,
        optional: bool,
        outer: &[Scope],
    ) -> Result<Bound> {
        let src = self.bind_source(source, outer)?;
        let Some(Shape::Entity { entity, members }) = src.scope.find(from) else {
            return Err(match src.scope.find(from) {
                None => TranslationError::unknown_var(from, "navigate"),
                Some(_) => TranslationError::TypeMismatch {
                    context: "navigate",
                    expected: "entity variable",
                },
            }
            .into());
        };
        let owner = self.mapping.entity(entity)?;
        let assoc = owner.resolve_association(association)?.clone();
        let target = self.bind_table(&assoc.target, var)?;
        let Some(Shape::Entity {
            members: target_members,
            ..
        }) = target.scope.find(var)
        else {
            return Err(TranslationError::unknown_var(var, "navigate").into());
        };
        let mut condition: Option<Expr> = None;
        for (this, other) in &assoc.keys {
            let left = member_expr(entity, members, this)?;
            let right = member_expr(&assoc.target, target_members, other)?;
            let eq = Expr::binary(BinaryOp::Eq, left, right);
            condition = Some(match condition {
                Some(prev) => prev.and(eq),
                None => eq,
            });
        }
        let scope = src.scope.clone().merge(target.scope.clone())?;
        let join = JoinNode {
            kind: if optional {
                JoinKind::LeftOuter
            } else {
                JoinKind::Inner
            },
            left: src.select.into(),
            right: target.select.into(),
            condition,
        };
        Ok(wrap(join.into(), &scope))
    }

    fn bind_group_by(
        &self,
        source: &QueryOp,
        var: &str,
        keys: &[Field],
        aggregates: &[Field],
        outer: &[Scope],
    ) -> Result<Bound> {
        let src = self.bind_source(source, outer)?;
        if keys.is_empty() {
            return Err(TranslationError::EmptyProjection { context: "group_by" }.into());
        }
        let alias = Alias::fresh();
        let mut columns: Vec<ColumnDecl> = Vec::new();
        let mut group_by = Vec::with_capacity(keys.len());
        let mut record = Vec::with_capacity(keys.len() + aggregates.len());
        for field in keys {
            let expr = self.resolve_expr(&field.expr, &src.scope, outer, "group_by")?;
            reject_aggregates(&expr, "group_by")?;
            group_by.push(expr.clone());
            let decl = declare(&mut columns, &field.name, expr);
            record.push(field_shape(&field.name, alias, &decl, &record)?);
        }
        for field in aggregates {
            let expr = self.resolve_expr(&field.expr, &src.scope, outer, "group_by")?;
            if !expr.has_aggregate() {
                return Err(TranslationError::unsupported(
                    "group_by",
                    format!("aggregate field '{}' computes no aggregate", field.name),
                )
                .into());
            }
            let decl = declare(&mut columns, &field.name, expr);
            record.push(field_shape(&field.name, alias, &decl, &record)?);
        }
        let mut select = SelectNode::new(alias, src.select, columns);
        select.group_by = group_by;
        Ok(Bound {
            select,
            scope: Scope::single(var, Shape::Record(record)),
        })
    }

    fn resolve_orderings(
        &self,
        keys: &[SortKey],
        scope: &Scope,
        outer: &[Scope],
    ) -> Result<Vec<OrderExpr>> {
        keys.iter()
            .map(|key| {
                let expr = self.resolve_expr(&key.expr, scope, outer, "order_by")?;
                reject_aggregates(&expr, "order_by")?;
                Ok(OrderExpr::new(expr, key.direction))
            })
            .collect()
    }

    fn resolve_fields(
        &self,
        fields: &[Field],
        scope: &Scope,
        outer: &[Scope],
        context: &'static str,
    ) -> Result<Vec<(String, Shape)>> {
        let mut record: Vec<(String, Shape)> = Vec::with_capacity(fields.len());
        for field in fields {
            if record.iter().any(|(name, _)| name == &field.name) {
                return Err(TranslationError::DuplicateVariable {
                    var: field.name.clone(),
                }
                .into());
            }
            let shape = self.resolve_shape(&field.expr, scope, outer, context)?;
            record.push((field.name.clone(), shape));
        }
        Ok(record)
    }

    fn lookup<'s>(&self, var: &str, scope: &'s Scope, outer: &'s [Scope]) -> Option<&'s Shape> {
        scope
            .find(var)
            .or_else(|| outer.iter().rev().find_map(|s| s.find(var)))
    }

    fn resolve_shape(
        &self,
        expr: &QExpr,
        scope: &Scope,
        outer: &[Scope],
        context: &'static str,
    ) -> Result<Shape> {
        let QExpr::Member { var, path } = expr else {
            return Ok(Shape::Value(self.resolve_expr(expr, scope, outer, context)?));
        };
        let mut shape = self
            .lookup(var, scope, outer)
            .ok_or_else(|| TranslationError::unknown_var(var, context))?;
        let mut owner = var.as_str();
        for (idx, segment) in path.iter().enumerate() {
            shape = match shape {
                Shape::Entity { entity, members } => {
                    let (_, expr) = members
                        .iter()
                        .find(|(member, _)| member == segment)
                        .ok_or_else(|| MappingError::unknown_member(entity, segment))?;
                    if idx + 1 != path.len() {
                        return Err(TranslationError::TypeMismatch {
                            context,
                            expected: "record or entity before a member access",
                        }
                        .into());
                    }
                    return Ok(Shape::Value(expr.clone()));
                }
                Shape::Record(fields) => fields
                    .iter()
                    .find(|(name, _)| name == segment)
                    .map(|(_, shape)| shape)
                    .ok_or_else(|| {
                        MappingError::unknown_member(format!("record {owner}"), segment)
                    })?,
                Shape::Value(_) => {
                    return Err(TranslationError::TypeMismatch {
                        context,
                        expected: "record or entity before a member access",
                    }
                    .into())
                }
            };
            owner = segment;
        }
        Ok(shape.clone())
    }

    fn resolve_expr(
        &self,
        expr: &QExpr,
        scope: &Scope,
        outer: &[Scope],
        context: &'static str,
    ) -> Result<Expr> {
        let resolve = |e: &QExpr| self.resolve_expr(e, scope, outer, context);
        let bound = match expr {
            QExpr::Member { .. } => match self.resolve_shape(expr, scope, outer, context)? {
                Shape::Value(expr) => expr,
                _ => {
                    return Err(TranslationError::TypeMismatch {
                        context,
                        expected: "scalar member",
                    }
                    .into())
                }
            },
            QExpr::Literal { value } => Expr::Literal(value.clone()),
            QExpr::Param { name, value } => Expr::Param(NamedValue {
                name: name.clone(),
                wire: value.wire_type(),
                value: value.clone(),
            }),
            QExpr::Binary { op, left, right } => Expr::binary(*op, resolve(left)?, resolve(right)?),
            QExpr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(resolve(operand)?),
            },
            QExpr::IsNull { operand, negated } => Expr::IsNull {
                operand: Box::new(resolve(operand)?),
                negated: *negated,
            },
            QExpr::Between { operand, low, high } => Expr::Between {
                operand: Box::new(resolve(operand)?),
                low: Box::new(resolve(low)?),
                high: Box::new(resolve(high)?),
            },
            QExpr::In { operand, list } => {
                if list.is_empty() {
                    return Err(TranslationError::unsupported(
                        context,
                        "IN requires at least one candidate",
                    )
                    .into());
                }
                Expr::In {
                    operand: Box::new(resolve(operand)?),
                    list: list.iter().map(resolve).collect::<Result<Vec<_>>>()?,
                }
            }
            QExpr::Function { func, args } => {
                let (min, max) = func.arity();
                if args.len() < min || args.len() > max {
                    return Err(TranslationError::unsupported(
                        context,
                        format!("{} called with {} arguments", func.name(), args.len()),
                    )
                    .into());
                }
                Expr::Function {
                    func: *func,
                    args: args.iter().map(resolve).collect::<Result<Vec<_>>>()?,
                }
            }
            QExpr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let arg = match arg {
                    Some(arg) => {
                        let arg = resolve(arg)?;
                        reject_aggregates(&arg, "aggregate argument")?;
                        Some(Box::new(arg))
                    }
                    None => None,
                };
                Expr::Aggregate {
                    func: *func,
                    arg,
                    distinct: *distinct,
                }
            }
        };
        Ok(bound)
    }
}

fn reject_aggregates(expr: &Expr, context: &'static str) -> Result<()> {
    if expr.has_aggregate() {
        return Err(TranslationError::unsupported(
            context,
            "aggregates are only allowed in select, group_by, or a terminal aggregate",
        )
        .into());
    }
    Ok(())
}

fn member_expr(entity: &str, members: &[(String, Expr)], member: &str) -> Result<Expr> {
    members
        .iter()
        .find(|(name, _)| name == member)
        .map(|(_, expr)| expr.clone())
        .ok_or_else(|| MappingError::unknown_member(entity, member).into())
}

fn declare(columns: &mut Vec<ColumnDecl>, base: &str, expr: Expr) -> ColumnDecl {
    let decl = ColumnDecl::new(available_name(columns, base), expr);
    columns.push(decl.clone());
    decl
}

fn field_shape(
    name: &str,
    alias: Alias,
    decl: &ColumnDecl,
    record: &[(String, Shape)],
) -> Result<(String, Shape)> {
    if record.iter().any(|(existing, _)| existing == name) {
        return Err(TranslationError::DuplicateVariable {
            var: name.to_owned(),
        }
        .into());
    }
    Ok((
        name.to_owned(),
        Shape::Value(Expr::column(alias, decl.name.clone(), decl.wire)),
    ))
}

/// Creates a select over `from` whose columns carry every value in `scope`,
/// returning it with the scope re-expressed over those columns.
fn wrap(from: Source, scope: &Scope) -> Bound {
    let alias = Alias::fresh();
    let mut columns = Vec::new();
    let vars = scope
        .vars
        .iter()
        .map(|(var, shape)| (var.clone(), project_shape(shape, var, alias, &mut columns)))
        .collect();
    Bound {
        select: SelectNode::new(alias, from, columns),
        scope: Scope { vars },
    }
}

fn project_shape(shape: &Shape, hint: &str, alias: Alias, columns: &mut Vec<ColumnDecl>) -> Shape {
    match shape {
        Shape::Value(expr) => Shape::Value(project_value(expr, hint, alias, columns)),
        Shape::Entity { entity, members } => Shape::Entity {
            entity: entity.clone(),
            members: members
                .iter()
                .map(|(member, expr)| {
                    let base = expr.as_column().map_or(member.as_str(), |col| col.name.as_str());
                    (member.clone(), project_value(expr, base, alias, columns))
                })
                .collect(),
        },
        Shape::Record(fields) => Shape::Record(
            fields
                .iter()
                .map(|(name, shape)| (name.clone(), project_shape(shape, name, alias, columns)))
                .collect(),
        ),
    }
}

fn project_value(expr: &Expr, base: &str, alias: Alias, columns: &mut Vec<ColumnDecl>) -> Expr {
    let decl = declare(columns, base, expr.clone());
    Expr::column(alias, decl.name, decl.wire)
}

fn projector_for(bound: &Bound) -> Result<Projector> {
    let mut fields = Vec::new();
    let kind = match bound.scope.vars.as_slice() {
        [(_, Shape::Entity { entity, members })] => {
            for (member, expr) in members {
                push_field(&mut fields, member.clone(), expr, bound.select.alias)?;
            }
            ProjectorKind::Entity(entity.clone())
        }
        [(_, Shape::Value(expr))] => {
            push_field(&mut fields, "value".to_owned(), expr, bound.select.alias)?;
            ProjectorKind::Scalar
        }
        [(_, shape @ Shape::Record(_))] => {
            flatten(shape, "", &mut fields, bound.select.alias)?;
            ProjectorKind::Record
        }
        vars => {
            for (var, shape) in vars {
                flatten(shape, var, &mut fields, bound.select.alias)?;
            }
            ProjectorKind::Record
        }
    };
    Ok(Projector { kind, fields })
}

fn flatten(
    shape: &Shape,
    prefix: &str,
    fields: &mut Vec<ProjectedField>,
    alias: Alias,
) -> Result<()> {
    let path = |name: &str| {
        if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{prefix}.{name}")
        }
    };
    match shape {
        Shape::Value(expr) => push_field(fields, prefix.to_owned(), expr, alias),
        Shape::Entity { members, .. } => members
            .iter()
            .try_for_each(|(member, expr)| push_field(fields, path(member), expr, alias)),
        Shape::Record(record) => record
            .iter()
            .try_for_each(|(name, shape)| flatten(shape, &path(name), fields, alias)),
    }
}

fn push_field(
    fields: &mut Vec<ProjectedField>,
    member: String,
    expr: &Expr,
    alias: Alias,
) -> Result<()> {
    match expr.as_column() {
        Some(col) if col.alias == alias => {
            fields.push(ProjectedField {
                member,
                column: col.name.clone(),
            });
            Ok(())
        }
        _ => Err(TranslationError::unsupported(
            "projector",
            format!("member '{member}' is not a column of the top-level select"),
        )
        .into()),
    }
}
