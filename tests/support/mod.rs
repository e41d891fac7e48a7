#![allow(dead_code, missing_docs)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Once;

use hiveq::connection::MemoryResult;
use hiveq::query::ast::{
    AggregateFunc, Alias, BinaryOp, Direction, Expr, JoinKind, OrderExpr, ProjectionNode,
    SelectNode, Source, UnaryOp,
};
use hiveq::query::mapping::{EntityMapping, StaticMapping};
use hiveq::query::value::WireType;
use hiveq::query::Value;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hiveq=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// `Title` and `Studio` entities over `titles` and `studios`.
pub fn film_mapping() -> StaticMapping {
    let titles = EntityMapping::new("Title", "titles")
        .member("Id", "id", WireType::BigInt)
        .member("Name", "name", WireType::String)
        .member("Year", "year", WireType::Int)
        .member("Rating", "rating", WireType::Double)
        .member("StudioId", "studio_id", WireType::BigInt)
        .association("Studio", "Studio", [("StudioId", "Id")]);
    let studios = EntityMapping::new("Studio", "studios")
        .member("Id", "id", WireType::BigInt)
        .member("Name", "name", WireType::String)
        .member("Country", "country", WireType::String);
    StaticMapping::from_entities([titles, studios]).expect("film mapping")
}

type Row = HashMap<String, Value>;
type Env = HashMap<Alias, Row>;

/// Evaluates rewritten query trees over in-memory tables.
///
/// Only what the pipeline emits for the tested shapes is supported; anything
/// else panics.
#[derive(Default)]
pub struct Evaluator {
    tables: HashMap<String, Vec<Row>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(
        mut self,
        name: &str,
        columns: &[&str],
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> Self {
        let rows = rows
            .into_iter()
            .map(|values| {
                assert_eq!(values.len(), columns.len(), "row width for {name}");
                columns
                    .iter()
                    .map(|col| col.to_string())
                    .zip(values)
                    .collect()
            })
            .collect();
        self.tables.insert(name.to_owned(), rows);
        self
    }

    /// Output rows of the top select as positional vectors.
    pub fn run(&self, projection: &ProjectionNode) -> Vec<Vec<Value>> {
        let select = &projection.select;
        self.select(select)
            .into_iter()
            .map(|row| {
                select
                    .columns
                    .iter()
                    .map(|decl| row.get(&decl.name).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }

    /// Rows read through the projector, as `(member, value)` pairs.
    pub fn records(&self, projection: &ProjectionNode) -> Vec<Vec<(String, Value)>> {
        let columns = &projection.select.columns;
        self.run(projection)
            .into_iter()
            .map(|row| {
                projection
                    .projector
                    .fields
                    .iter()
                    .map(|field| {
                        let position = columns
                            .iter()
                            .position(|decl| decl.name == field.column)
                            .unwrap_or_else(|| panic!("no column '{}'", field.column));
                        (field.member.clone(), row[position].clone())
                    })
                    .collect()
            })
            .collect()
    }

    /// Result the engine would return, rendered as text fields.
    pub fn result(&self, projection: &ProjectionNode) -> MemoryResult {
        let columns: Vec<String> = projection
            .select
            .columns
            .iter()
            .map(|decl| decl.name.clone())
            .collect();
        let rows = self
            .run(projection)
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|value| match value {
                        Value::Null => Value::Null,
                        other => Value::String(other.to_plain_text().expect("text form")),
                    })
                    .collect()
            })
            .collect();
        MemoryResult::new(columns, rows)
    }

    fn source(&self, source: &Source) -> Vec<Env> {
        match source {
            Source::Table(table) => self
                .tables
                .get(&table.name)
                .unwrap_or_else(|| panic!("no table '{}'", table.name))
                .iter()
                .map(|row| Env::from([(table.alias, row.clone())]))
                .collect(),
            Source::Select(select) => self
                .select(select)
                .into_iter()
                .map(|row| Env::from([(select.alias, row)]))
                .collect(),
            Source::Join(join) => {
                let left = self.source(&join.left);
                let right = self.source(&join.right);
                let mut out = Vec::new();
                for l in &left {
                    let mut matched = false;
                    for r in &right {
                        let mut env = l.clone();
                        env.extend(r.clone());
                        let keep = match &join.condition {
                            Some(cond) => truthy(&eval(cond, &env)),
                            None => true,
                        };
                        if keep {
                            matched = true;
                            out.push(env);
                        }
                    }
                    match join.kind {
                        JoinKind::LeftOuter | JoinKind::OuterApply if !matched => {
                            out.push(l.clone())
                        }
                        _ => {}
                    }
                }
                out
            }
        }
    }

    fn select(&self, select: &SelectNode) -> Vec<Row> {
        let mut rows = self.source(&select.from);
        if let Some(pred) = &select.predicate {
            rows.retain(|env| truthy(&eval(pred, env)));
        }

        let grouped = !select.group_by.is_empty() || select.has_aggregates();
        let mut groups: Vec<Vec<Env>> = if !select.group_by.is_empty() {
            let mut groups: Vec<(Vec<Value>, Vec<Env>)> = Vec::new();
            for env in rows {
                let key: Vec<Value> = select.group_by.iter().map(|e| eval(e, &env)).collect();
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(env),
                    None => groups.push((key, vec![env])),
                }
            }
            groups.into_iter().map(|(_, members)| members).collect()
        } else if grouped {
            vec![rows]
        } else {
            rows.into_iter().map(|env| vec![env]).collect()
        };

        let ranks = row_numbers(select, &groups);
        let mut indexed: Vec<(usize, Vec<Env>)> = groups.drain(..).enumerate().collect();
        if !select.order_by.is_empty() {
            indexed.sort_by(|(_, a), (_, b)| compare_orderings(&select.order_by, a, b));
        }

        let mut out: Vec<Row> = Vec::new();
        for (index, group) in indexed {
            let row: Row = select
                .columns
                .iter()
                .map(|decl| {
                    let value = match &decl.expr {
                        Expr::RowNumber { .. } => Value::Int(ranks[index]),
                        expr => eval_group(expr, &group),
                    };
                    (decl.name.clone(), value)
                })
                .collect();
            if select.distinct && out.contains(&row) {
                continue;
            }
            out.push(row);
        }
        let skip = select.skip.unwrap_or(0) as usize;
        let out: Vec<Row> = out.into_iter().skip(skip).collect();
        match select.take {
            Some(take) => out.into_iter().take(take as usize).collect(),
            None => out,
        }
    }
}

fn row_numbers(select: &SelectNode, groups: &[Vec<Env>]) -> Vec<i64> {
    let window = select.columns.iter().find_map(|decl| match &decl.expr {
        Expr::RowNumber { order_by } => Some(order_by),
        _ => None,
    });
    let mut ranks = vec![0; groups.len()];
    if let Some(order_by) = window {
        let mut order: Vec<usize> = (0..groups.len()).collect();
        order.sort_by(|&a, &b| compare_orderings(order_by, &groups[a], &groups[b]));
        for (position, index) in order.into_iter().enumerate() {
            ranks[index] = position as i64 + 1;
        }
    }
    ranks
}

fn compare_orderings(orderings: &[OrderExpr], a: &[Env], b: &[Env]) -> Ordering {
    for ord in orderings {
        let ordering = compare(&eval_group(&ord.expr, a), &eval_group(&ord.expr, b));
        let ordering = match ord.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn eval_group(expr: &Expr, group: &[Env]) -> Value {
    match expr {
        Expr::Aggregate { func, arg, distinct } => {
            let mut values: Vec<Value> = match arg {
                Some(arg) => group
                    .iter()
                    .map(|env| eval(arg, env))
                    .filter(|v| *v != Value::Null)
                    .collect(),
                None => group.iter().map(|_| Value::Int(1)).collect(),
            };
            if *distinct {
                let mut unique: Vec<Value> = Vec::new();
                for v in values {
                    if !unique.contains(&v) {
                        unique.push(v);
                    }
                }
                values = unique;
            }
            match func {
                AggregateFunc::Count => Value::Int(values.len() as i64),
                AggregateFunc::Sum => values
                    .into_iter()
                    .reduce(|a, b| arith(BinaryOp::Add, &a, &b))
                    .unwrap_or(Value::Null),
                AggregateFunc::Min => values
                    .into_iter()
                    .min_by(compare)
                    .unwrap_or(Value::Null),
                AggregateFunc::Max => values
                    .into_iter()
                    .max_by(compare)
                    .unwrap_or(Value::Null),
                AggregateFunc::Avg => {
                    let count = values.len();
                    let total: f64 = values.iter().map(as_f64).sum();
                    if count == 0 {
                        Value::Null
                    } else {
                        Value::Float(total / count as f64)
                    }
                }
            }
        }
        Expr::Binary { op, left, right } if expr.has_aggregate() => {
            binary(*op, &eval_group(left, group), &eval_group(right, group))
        }
        other => match group.first() {
            Some(env) => eval(other, env),
            None => Value::Null,
        },
    }
}

fn eval(expr: &Expr, env: &Env) -> Value {
    match expr {
        Expr::Column(col) => env
            .get(&col.alias)
            .and_then(|row| row.get(&col.name))
            .cloned()
            .unwrap_or(Value::Null),
        Expr::Literal(value) => value.clone(),
        Expr::Param(named) => named.value.clone(),
        Expr::Binary { op, left, right } => binary(*op, &eval(left, env), &eval(right, env)),
        Expr::Unary { op, operand } => match (op, eval(operand, env)) {
            (_, Value::Null) => Value::Null,
            (UnaryOp::Not, value) => Value::Bool(!truthy(&value)),
            (UnaryOp::Neg, Value::Int(v)) => Value::Int(-v),
            (UnaryOp::Neg, Value::Float(v)) => Value::Float(-v),
            (UnaryOp::Neg, other) => panic!("cannot negate {other:?}"),
        },
        Expr::IsNull { operand, negated } => {
            Value::Bool((eval(operand, env) == Value::Null) != *negated)
        }
        Expr::Between { operand, low, high } => {
            let v = eval(operand, env);
            Value::Bool(
                compare(&v, &eval(low, env)) != Ordering::Less
                    && compare(&v, &eval(high, env)) != Ordering::Greater,
            )
        }
        Expr::In { operand, list } => {
            let v = eval(operand, env);
            Value::Bool(list.iter().any(|item| compare(&v, &eval(item, env)) == Ordering::Equal))
        }
        other => panic!("evaluator does not support {other:?}"),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match op {
        BinaryOp::And => Value::Bool(truthy(l) && truthy(r)),
        BinaryOp::Or => Value::Bool(truthy(l) || truthy(r)),
        _ if *l == Value::Null || *r == Value::Null => Value::Null,
        BinaryOp::Eq => Value::Bool(compare(l, r) == Ordering::Equal),
        BinaryOp::Ne => Value::Bool(compare(l, r) != Ordering::Equal),
        BinaryOp::Lt => Value::Bool(compare(l, r) == Ordering::Less),
        BinaryOp::Le => Value::Bool(compare(l, r) != Ordering::Greater),
        BinaryOp::Gt => Value::Bool(compare(l, r) == Ordering::Greater),
        BinaryOp::Ge => Value::Bool(compare(l, r) != Ordering::Less),
        BinaryOp::Like => panic!("evaluator does not support LIKE"),
        arithmetic => arith(arithmetic, l, r),
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) if op != BinaryOp::Div => Value::Int(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Mod => a % b,
            other => panic!("not arithmetic: {other:?}"),
        }),
        _ => {
            let (a, b) = (as_f64(l), as_f64(r));
            Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                other => panic!("not arithmetic: {other:?}"),
            })
        }
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        other => panic!("not numeric: {other:?}"),
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Sample `titles` and `studios` rows; years and names are unique.
pub fn film_data() -> Evaluator {
    let title = |id: i64, name: &str, year: i64, rating: f64, studio: Option<i64>| {
        vec![
            Value::Int(id),
            Value::from(name),
            Value::Int(year),
            Value::Float(rating),
            studio.map_or(Value::Null, Value::Int),
        ]
    };
    let studio = |id: i64, name: &str, country: &str| {
        vec![Value::Int(id), Value::from(name), Value::from(country)]
    };
    Evaluator::new()
        .table(
            "titles",
            &["id", "name", "year", "rating", "studio_id"],
            [
                title(1, "Brazil", 1985, 7.9, Some(1)),
                title(2, "Alien", 1979, 8.5, Some(2)),
                title(3, "Heat", 1995, 8.3, Some(3)),
                title(4, "Fargo", 1996, 8.1, Some(1)),
                title(5, "Memento", 2000, 8.4, Some(2)),
                title(6, "Arrival", 2016, 7.9, None),
            ],
        )
        .table(
            "studios",
            &["id", "name", "country"],
            [
                studio(1, "Embassy", "US"),
                studio(2, "Fox", "US"),
                studio(3, "Warner", "US"),
            ],
        )
}

/// Titles ordered by year, as the sample data holds them.
pub const NAMES_BY_YEAR: [&str; 6] = ["Alien", "Brazil", "Heat", "Fargo", "Memento", "Arrival"];

/// Records sorted by their debug form, for order-insensitive comparison.
pub fn sorted(mut records: Vec<Vec<(String, Value)>>) -> Vec<String> {
    let mut keys: Vec<String> = records.drain(..).map(|r| format!("{r:?}")).collect();
    keys.sort();
    keys
}

/// Total order with NULL first, as Hive sorts ascending.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (x, y) => as_f64(x).total_cmp(&as_f64(y)),
    }
}
