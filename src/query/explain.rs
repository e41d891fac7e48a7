//! Human-readable trees for inspecting pipeline stages.
//!
//! Aliases are renamed `a0, a1, ...` in first-encounter order, so two
//! compilations of the same query explain (and hash) identically.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::hash::Hasher;

use serde_json::{Map, Value as JsonValue};
use xxhash_rust::xxh64::Xxh64;

use crate::query::ast::{
    Alias, Direction, Expr, JoinKind, OrderExpr, ProjectionNode, ProjectorKind, SelectNode,
    Source, UnaryOp,
};
use crate::query::value::Value;

/// Explain tree plus its shape hash.
#[derive(Clone, Debug)]
pub struct QueryExplain {
    /// Root node, always a `Project`.
    pub root: ExplainNode,
    /// Hash over operators and non-literal properties.
    pub shape_hash: u64,
}

/// Explain node representing one tree node with its properties.
#[derive(Clone, Debug)]
pub struct ExplainNode {
    /// Node kind.
    pub op: String,
    /// Properties describing the node.
    pub props: Vec<ExplainProp>,
    /// Child nodes.
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates an explain node without properties or inputs.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Looks up a property value by key.
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|prop| prop.key == key)
            .map(|prop| prop.value.as_str())
    }
}

/// Single property of an [`ExplainNode`].
#[derive(Clone, Debug)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Rendered value.
    pub value: String,
    /// Whether the value embeds literal data that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

/// Builds the explain tree of a projection.
pub fn explain(projection: &ProjectionNode) -> QueryExplain {
    let mut builder = ExplainBuilder::default();
    let root = builder.projection(projection);
    let mut hasher = Xxh64::new(0);
    hash_node(&root, &mut hasher);
    QueryExplain {
        root,
        shape_hash: hasher.finish(),
    }
}

impl QueryExplain {
    /// Renders the tree as indented text, replacing literal-bearing
    /// properties with `?` when `redact` is set.
    pub fn render(&self, redact: bool) -> String {
        let mut out = String::new();
        render_node(&self.root, 0, redact, &mut out);
        out
    }

    /// JSON form used by the CLI.
    pub fn to_json(&self) -> JsonValue {
        let mut root = Map::new();
        root.insert("shape_hash".into(), JsonValue::String(format!("{:016x}", self.shape_hash)));
        root.insert("tree".into(), node_to_json(&self.root));
        JsonValue::Object(root)
    }
}

impl fmt::Display for QueryExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

fn render_node(node: &ExplainNode, depth: usize, redact: bool, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.op);
    for prop in &node.props {
        let value = if redact && prop.redactable {
            "?"
        } else {
            prop.value.as_str()
        };
        let _ = write!(out, " {}={}", prop.key, value);
    }
    out.push('\n');
    for child in &node.inputs {
        render_node(child, depth + 1, redact, out);
    }
}

fn node_to_json(node: &ExplainNode) -> JsonValue {
    let mut map = Map::new();
    map.insert("op".into(), JsonValue::String(node.op.clone()));
    if !node.props.is_empty() {
        let mut props = Map::new();
        for prop in &node.props {
            props.insert(prop.key.clone(), JsonValue::String(prop.value.clone()));
        }
        map.insert("props".into(), JsonValue::Object(props));
    }
    let inputs = node.inputs.iter().map(node_to_json).collect::<Vec<_>>();
    map.insert("inputs".into(), JsonValue::Array(inputs));
    JsonValue::Object(map)
}

fn hash_node(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    for prop in &node.props {
        hasher.write(prop.key.as_bytes());
        if !prop.redactable {
            hasher.write(prop.value.as_bytes());
        }
    }
    hasher.write_u64(node.inputs.len() as u64);
    for child in &node.inputs {
        hash_node(child, hasher);
    }
}

#[derive(Default)]
struct ExplainBuilder {
    names: HashMap<Alias, String>,
}

impl ExplainBuilder {
    fn name(&mut self, alias: Alias) -> String {
        let next = self.names.len();
        self.names
            .entry(alias)
            .or_insert_with(|| format!("a{next}"))
            .clone()
    }

    fn projection(&mut self, projection: &ProjectionNode) -> ExplainNode {
        let mut node = ExplainNode::new("Project");
        let kind = match &projection.projector.kind {
            ProjectorKind::Entity(entity) => format!("entity({entity})"),
            ProjectorKind::Record => "record".to_owned(),
            ProjectorKind::Scalar => "scalar".to_owned(),
        };
        node.props.push(ExplainProp::plain("kind", kind));
        let fields = projection
            .projector
            .fields
            .iter()
            .map(|field| {
                if field.member == field.column {
                    field.member.clone()
                } else {
                    format!("{}<-{}", field.member, field.column)
                }
            })
            .collect::<Vec<_>>();
        node.props
            .push(ExplainProp::plain("fields", format!("[{}]", fields.join(", "))));
        if let Some(aggregator) = projection.aggregator {
            node.props
                .push(ExplainProp::plain("aggregator", format!("{aggregator:?}")));
        }
        node.inputs.push(self.select(&projection.select));
        node
    }

    fn select(&mut self, select: &SelectNode) -> ExplainNode {
        let mut node = ExplainNode::new("Select");
        let alias = self.name(select.alias);
        node.props.push(ExplainProp::plain("alias", alias));
        if select.distinct {
            node.props.push(ExplainProp::plain("distinct", "true"));
        }
        let columns = select
            .columns
            .iter()
            .map(|decl| format!("{}={}", decl.name, self.expr(&decl.expr)))
            .collect::<Vec<_>>();
        node.props
            .push(self.prop_for("columns", select.columns.iter().map(|d| &d.expr), columns));
        if let Some(predicate) = &select.predicate {
            let text = self.expr(predicate);
            node.props
                .push(self.prop_for("where", std::iter::once(predicate), vec![text]));
        }
        if !select.group_by.is_empty() {
            let keys = select.group_by.iter().map(|e| self.expr(e)).collect();
            node.props
                .push(self.prop_for("group_by", select.group_by.iter(), keys));
        }
        if !select.order_by.is_empty() {
            let text = self.orderings(&select.order_by);
            node.props.push(ExplainProp::plain("order_by", text));
        }
        if !select.cluster_by.is_empty() {
            let keys = select.cluster_by.iter().map(|e| self.expr(e)).collect();
            node.props
                .push(self.prop_for("cluster_by", select.cluster_by.iter(), keys));
        }
        if let Some(skip) = select.skip {
            node.props.push(ExplainProp::literal("skip", skip.to_string()));
        }
        if let Some(take) = select.take {
            node.props.push(ExplainProp::literal("take", take.to_string()));
        }
        node.inputs.push(self.source(&select.from));
        node
    }

    fn source(&mut self, source: &Source) -> ExplainNode {
        match source {
            Source::Table(table) => {
                let mut node = ExplainNode::new("Table");
                let alias = self.name(table.alias);
                node.props.push(ExplainProp::plain("name", table.name.clone()));
                node.props.push(ExplainProp::plain("alias", alias));
                node
            }
            Source::Select(select) => self.select(select),
            Source::Join(join) => {
                let mut node = ExplainNode::new("Join");
                let kind = match join.kind {
                    JoinKind::Cross => "cross",
                    JoinKind::Inner => "inner",
                    JoinKind::LeftOuter => "left_outer",
                    JoinKind::CrossApply => "cross_apply",
                    JoinKind::OuterApply => "outer_apply",
                };
                node.props.push(ExplainProp::plain("kind", kind));
                let left = self.source(&join.left);
                let right = self.source(&join.right);
                if let Some(condition) = &join.condition {
                    let text = self.expr(condition);
                    node.props
                        .push(self.prop_for("on", std::iter::once(condition), vec![text]));
                }
                node.inputs = vec![left, right];
                node
            }
        }
    }

    fn prop_for<'a>(
        &self,
        key: &str,
        exprs: impl IntoIterator<Item = &'a Expr>,
        rendered: Vec<String>,
    ) -> ExplainProp {
        let value = if rendered.len() == 1 && key != "columns" && key != "group_by" {
            rendered.concat()
        } else {
            format!("[{}]", rendered.join(", "))
        };
        let mut literal = false;
        for expr in exprs {
            expr.walk(&mut |e| literal |= matches!(e, Expr::Literal(_) | Expr::Param(_)));
        }
        if literal {
            ExplainProp::literal(key, value)
        } else {
            ExplainProp::plain(key, value)
        }
    }

    fn orderings(&mut self, orderings: &[OrderExpr]) -> String {
        let parts = orderings
            .iter()
            .map(|ord| {
                let expr = self.expr(&ord.expr);
                match ord.direction {
                    Direction::Asc => expr,
                    Direction::Desc => format!("{expr} desc"),
                }
            })
            .collect::<Vec<_>>();
        format!("[{}]", parts.join(", "))
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Column(col) => format!("{}.{}", self.name(col.alias), col.name),
            Expr::Literal(value) => literal_text(value),
            Expr::Param(param) => format!("${}", param.name),
            Expr::Binary { op, left, right } => {
                format!("({} {} {})", self.expr(left), op.symbol(), self.expr(right))
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => format!("not {}", self.expr(operand)),
                UnaryOp::Neg => format!("-{}", self.expr(operand)),
            },
            Expr::IsNull { operand, negated } => {
                let suffix = if *negated { "is not null" } else { "is null" };
                format!("({} {suffix})", self.expr(operand))
            }
            Expr::Between { operand, low, high } => format!(
                "({} between {} and {})",
                self.expr(operand),
                self.expr(low),
                self.expr(high)
            ),
            Expr::In { operand, list } => {
                let operand = self.expr(operand);
                let items = list.iter().map(|e| self.expr(e)).collect::<Vec<_>>();
                format!("({operand} in [{}])", items.join(", "))
            }
            Expr::Function { func, args } => {
                let args = args.iter().map(|e| self.expr(e)).collect::<Vec<_>>();
                format!("{}({})", func.name().to_ascii_lowercase(), args.join(", "))
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let arg = match arg {
                    Some(arg) => self.expr(arg),
                    None => "*".to_owned(),
                };
                let distinct = if *distinct { "distinct " } else { "" };
                format!("{}({distinct}{arg})", func.name().to_ascii_lowercase())
            }
            Expr::RowNumber { order_by } => format!("row_number{}", self.orderings(order_by)),
        }
    }
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        Value::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        other => other
            .to_plain_text()
            .unwrap_or_else(|_| format!("{other:?}")),
    }
}
