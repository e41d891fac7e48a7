//! Hive text generation for fully rewritten query trees.
//!
//! The formatter is a structural printer: it never reorders or simplifies.
//! Constructs the dialect cannot express are rejected with a
//! [`TranslationError`] instead of being emitted.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::query::ast::{
    AggregateFunc, Alias, Direction, Expr, JoinKind, NamedValue, OrderExpr, ProjectionNode,
    SelectNode, Source, UnaryOp,
};
use crate::query::errors::TranslationError;
use crate::query::value::{format_float, format_timestamp, Value, ValueKind, WireType};
use crate::types::Result;

/// Descriptor of one `${hivevar:...}` parameter referenced by a command.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryParameter {
    /// Variable name.
    pub name: String,
    /// Logical value kind.
    pub kind: ValueKind,
    /// Declared wire type.
    pub wire: WireType,
}

/// Formatted command text plus the parameters it references, in first-use
/// order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryCommand {
    text: String,
    parameters: Vec<QueryParameter>,
}

impl QueryCommand {
    /// Creates a command.
    pub fn new(text: impl Into<String>, parameters: Vec<QueryParameter>) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Creates a parameterless statement.
    pub fn statement(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }

    /// Command text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parameter descriptors.
    pub fn parameters(&self) -> &[QueryParameter] {
        &self.parameters
    }
}

/// Formatter output: the command and the parameter values bound to it.
#[derive(Clone, Debug, PartialEq)]
pub struct FormattedQuery {
    /// Command to submit.
    pub command: QueryCommand,
    /// Values for the command parameters, in descriptor order.
    pub values: Vec<NamedValue>,
}

/// Formats the root select of `projection`.
pub fn format(projection: &ProjectionNode) -> Result<FormattedQuery> {
    let mut formatter = HiveFormatter::default();
    formatter.write_select(&projection.select)?;
    let parameters = formatter
        .params
        .iter()
        .map(|param| QueryParameter {
            name: param.name.clone(),
            kind: param.value.kind(),
            wire: param.wire,
        })
        .collect();
    debug!(
        len = formatter.out.len(),
        params = formatter.params.len(),
        "query.format.completed"
    );
    Ok(FormattedQuery {
        command: QueryCommand::new(formatter.out, parameters),
        values: formatter.params,
    })
}

/// True for names Hive accepts unquoted: an ASCII letter followed by
/// letters, digits, or underscores.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks a possibly database-qualified table name.
pub fn check_table_name(name: &str) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|part| is_identifier(part)) {
        return Err(TranslationError::unsupported(
            "table name",
            format!("'{name}' is not a plain identifier"),
        )
        .into());
    }
    Ok(())
}

fn check_identifier(name: &str, context: &'static str) -> Result<()> {
    if !is_identifier(name) {
        return Err(
            TranslationError::unsupported(context, format!("'{name}' is not a plain identifier"))
                .into(),
        );
    }
    Ok(())
}

#[derive(Default)]
struct HiveFormatter {
    out: String,
    aliases: HashMap<Alias, String>,
    params: Vec<NamedValue>,
}

impl HiveFormatter {
    fn alias(&mut self, alias: Alias) -> String {
        let next = self.aliases.len();
        self.aliases
            .entry(alias)
            .or_insert_with(|| format!("t{next}"))
            .clone()
    }

    fn write_select(&mut self, select: &SelectNode) -> Result<()> {
        if select.skip.is_some() {
            return Err(TranslationError::SkipSurvived.into());
        }
        if !select.cluster_by.is_empty() && !select.order_by.is_empty() {
            return Err(TranslationError::ClusterWithOrder.into());
        }
        self.out.push_str("SELECT ");
        if select.distinct {
            self.out.push_str("DISTINCT ");
        }
        if select.columns.is_empty() {
            self.out.push_str("NULL");
        }
        for (idx, decl) in select.columns.iter().enumerate() {
            if idx > 0 {
                self.out.push_str(", ");
            }
            self.write_expr(&decl.expr)?;
            let renamed = decl.expr.as_column().map_or(true, |col| col.name != decl.name);
            if renamed {
                check_identifier(&decl.name, "column name")?;
                self.out.push_str(" AS ");
                self.out.push_str(&decl.name);
            }
        }
        self.out.push_str(" FROM ");
        self.write_source(&select.from)?;
        if let Some(predicate) = &select.predicate {
            self.out.push_str(" WHERE ");
            self.write_expr(predicate)?;
        }
        if !select.group_by.is_empty() {
            self.out.push_str(" GROUP BY ");
            self.write_list(&select.group_by)?;
        }
        if !select.order_by.is_empty() {
            self.out.push_str(" ORDER BY ");
            self.write_orderings(&select.order_by)?;
        }
        if !select.cluster_by.is_empty() {
            self.out.push_str(" CLUSTER BY ");
            self.write_list(&select.cluster_by)?;
        }
        if let Some(take) = select.take {
            let _ = write!(self.out, " LIMIT {take}");
        }
        Ok(())
    }

    fn write_source(&mut self, source: &Source) -> Result<()> {
        match source {
            Source::Table(table) => {
                check_table_name(&table.name)?;
                let alias = self.alias(table.alias);
                let _ = write!(self.out, "{} {alias}", table.name);
            }
            Source::Select(select) => {
                let alias = self.alias(select.alias);
                self.out.push('(');
                self.write_select(select)?;
                let _ = write!(self.out, ") {alias}");
            }
            Source::Join(join) => {
                let keyword = match join.kind {
                    JoinKind::Cross => "CROSS JOIN",
                    JoinKind::Inner => "INNER JOIN",
                    JoinKind::LeftOuter => "LEFT OUTER JOIN",
                    JoinKind::CrossApply | JoinKind::OuterApply => {
                        return Err(TranslationError::ApplyJoinSurvived.into())
                    }
                };
                if matches!(join.right, Source::Join(_)) {
                    return Err(TranslationError::RightNestedJoin.into());
                }
                self.write_source(&join.left)?;
                let _ = write!(self.out, " {keyword} ");
                self.write_source(&join.right)?;
                if let Some(condition) = &join.condition {
                    self.out.push_str(" ON ");
                    self.write_expr(condition)?;
                }
            }
        }
        Ok(())
    }

    fn write_list(&mut self, exprs: &[Expr]) -> Result<()> {
        for (idx, expr) in exprs.iter().enumerate() {
            if idx > 0 {
                self.out.push_str(", ");
            }
            self.write_expr(expr)?;
        }
        Ok(())
    }

    fn write_orderings(&mut self, orderings: &[OrderExpr]) -> Result<()> {
        for (idx, ord) in orderings.iter().enumerate() {
            if idx > 0 {
                self.out.push_str(", ");
            }
            self.write_expr(&ord.expr)?;
            if ord.direction == Direction::Desc {
                self.out.push_str(" DESC");
            }
        }
        Ok(())
    }

    fn write_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Column(col) => {
                let alias = self.alias(col.alias);
                let _ = write!(self.out, "{alias}.{}", col.name);
            }
            Expr::Literal(value) => {
                let text = literal(value)?;
                self.out.push_str(&text);
            }
            Expr::Param(param) => {
                check_identifier(&param.name, "parameter name")?;
                match self.params.iter().find(|p| p.name == param.name) {
                    Some(existing) if existing.value != param.value => {
                        return Err(TranslationError::unsupported(
                            "parameter",
                            format!("'{}' is bound to two different values", param.name),
                        )
                        .into())
                    }
                    Some(_) => {}
                    None => self.params.push(param.clone()),
                }
                let _ = write!(self.out, "${{hivevar:{}}}", param.name);
            }
            Expr::Binary { op, left, right } => {
                self.out.push('(');
                self.write_expr(left)?;
                let _ = write!(self.out, " {} ", op.symbol());
                self.write_expr(right)?;
                self.out.push(')');
            }
            Expr::Unary { op, operand } => {
                self.out.push_str(match op {
                    UnaryOp::Not => "NOT (",
                    UnaryOp::Neg => "-(",
                });
                self.write_expr(operand)?;
                self.out.push(')');
            }
            Expr::IsNull { operand, negated } => {
                self.out.push('(');
                self.write_expr(operand)?;
                self.out
                    .push_str(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            Expr::Between { operand, low, high } => {
                self.out.push('(');
                self.write_expr(operand)?;
                self.out.push_str(" BETWEEN ");
                self.write_expr(low)?;
                self.out.push_str(" AND ");
                self.write_expr(high)?;
                self.out.push(')');
            }
            Expr::In { operand, list } => {
                self.out.push('(');
                self.write_expr(operand)?;
                self.out.push_str(" IN (");
                self.write_list(list)?;
                self.out.push_str("))");
            }
            Expr::Function { func, args } => {
                self.out.push_str(func.name());
                self.out.push('(');
                self.write_list(args)?;
                self.out.push(')');
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let func_name = func.name();
                match (func, arg, distinct) {
                    (AggregateFunc::Count, None, true) => {
                        return Err(TranslationError::UnsupportedAggregate {
                            func: func_name,
                            detail: "DISTINCT over *",
                        }
                        .into())
                    }
                    (AggregateFunc::Min | AggregateFunc::Max, _, true) => {
                        return Err(TranslationError::UnsupportedAggregate {
                            func: func_name,
                            detail: "DISTINCT",
                        }
                        .into())
                    }
                    (AggregateFunc::Count, None, false) => {
                        self.out.push_str("COUNT(*)");
                        return Ok(());
                    }
                    (_, None, _) => {
                        return Err(TranslationError::UnsupportedAggregate {
                            func: func_name,
                            detail: "missing argument",
                        }
                        .into())
                    }
                    (_, Some(arg), distinct) => {
                        self.out.push_str(func_name);
                        self.out.push_str(if *distinct { "(DISTINCT " } else { "(" });
                        self.write_expr(arg)?;
                        self.out.push(')');
                    }
                }
            }
            Expr::RowNumber { order_by } => {
                self.out.push_str("ROW_NUMBER() OVER (");
                if !order_by.is_empty() {
                    self.out.push_str("ORDER BY ");
                    self.write_orderings(order_by)?;
                }
                self.out.push(')');
            }
        }
        Ok(())
    }
}

fn literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(true) => "TRUE".to_owned(),
        Value::Bool(false) => "FALSE".to_owned(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) if v.is_finite() => format_float(*v),
        Value::Float(_) => {
            return Err(TranslationError::UnsupportedLiteral {
                kind: "non-finite float",
            }
            .into())
        }
        Value::String(s) => quote(s),
        Value::DateTime(nanos) => {
            let text = format_timestamp(*nanos)
                .map_err(|_| TranslationError::UnsupportedLiteral { kind: "timestamp" })?;
            format!("CAST({} AS TIMESTAMP)", quote(&text))
        }
        Value::Bytes(_) => return Err(TranslationError::UnsupportedLiteral { kind: "binary" }.into()),
    })
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
