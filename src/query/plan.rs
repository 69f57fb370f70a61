//! Logical Plan - the parsed query before lowering into operators
//!
//! A plan is an owned tree of [`Node`]s. `Clone` is a deep copy, so two
//! optimizer passes can each work on their own copy without aliasing.
//!
//! Two traversal styles are provided:
//! - [`traverse_bottom_up`] inspects nodes children-first with access to the
//!   parent and can stop early
//! - [`Node::transform_up`] rebuilds the tree children-first, letting the
//!   callback replace any node with a new owned subtree
//!
//! ```text
//!        sum by (job)
//!             │
//!        ┌────┴────┐
//!        │  binary │  a / b
//!        └─┬─────┬─┘
//!          a     b      ← visited first
//! ```

use crate::query::remote::RemoteEngine;
use crate::types::{Matcher, METRIC_NAME};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Node
// ============================================================================

/// Logical plan node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Select raw series by label matchers
    VectorSelector(VectorSelector),
    /// Constant scalar
    NumberLiteral(f64),
    /// Per-step aggregation across series
    Aggregation(Aggregation),
    /// Binary arithmetic or comparison
    Binary(Binary),
    /// Function call
    Call(FunctionCall),
    /// Subtree delegated to a single remote backend
    RemoteExecution(RemoteExecution),
}

/// Series selection by label matchers
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    /// Matchers every selected series must satisfy
    pub matchers: Vec<Matcher>,
}

impl VectorSelector {
    /// Selector for a metric name
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            matchers: vec![Matcher::equal(METRIC_NAME, metric)],
        }
    }

    /// Selector from explicit matchers
    pub fn with_matchers(matchers: Vec<Matcher>) -> Self {
        Self { matchers }
    }

    /// Add a matcher
    pub fn matcher(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Metric name when selected by equality
    pub fn metric_name(&self) -> Option<&str> {
        self.matchers
            .iter()
            .find(|m| m.name == METRIC_NAME && m.match_type == crate::types::MatchType::Equal)
            .map(|m| m.value.as_str())
    }
}

/// Aggregation operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    /// Sum of values
    Sum,
    /// Arithmetic mean
    Avg,
    /// Number of series
    Count,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Constant 1 per group
    Group,
    /// Population standard deviation
    Stddev,
    /// Population variance
    Stdvar,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Group => "group",
            AggregateOp::Stddev => "stddev",
            AggregateOp::Stdvar => "stdvar",
        };
        write!(f, "{}", name)
    }
}

/// Aggregation over the series of a sub-expression
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Aggregation operator
    pub op: AggregateOp,
    /// Aggregated expression
    pub expr: Box<Node>,
    /// Grouping labels
    pub grouping: Vec<String>,
    /// `without` instead of `by`
    pub without: bool,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl BinaryOp {
    /// Whether this is a comparison operator
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte
        )
    }

    /// Apply an arithmetic operator, or a comparison yielding 1/0
    pub fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Eq => truth(lhs == rhs),
            BinaryOp::Ne => truth(lhs != rhs),
            BinaryOp::Gt => truth(lhs > rhs),
            BinaryOp::Lt => truth(lhs < rhs),
            BinaryOp::Gte => truth(lhs >= rhs),
            BinaryOp::Lte => truth(lhs <= rhs),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sym = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Gte => ">=",
            BinaryOp::Lte => "<=",
        };
        write!(f, "{}", sym)
    }
}

/// Binary expression
#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    /// Operator
    pub op: BinaryOp,
    /// Left-hand side
    pub lhs: Box<Node>,
    /// Right-hand side
    pub rhs: Box<Node>,
    /// Comparisons return 0/1 instead of filtering
    pub return_bool: bool,
}

/// Function call
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// Arguments in call order
    pub args: Vec<Node>,
}

/// Marker for a subtree answered entirely by one remote backend
///
/// Created by the passthrough optimizer and never mutated afterwards.
#[derive(Clone)]
pub struct RemoteExecution {
    /// Target backend
    pub engine: Arc<dyn RemoteEngine>,
    /// Delegated sub-plan
    pub query: Box<Node>,
    /// Inclusive query start in milliseconds
    pub query_range_start: i64,
    /// Inclusive query end in milliseconds
    pub query_range_end: i64,
}

impl fmt::Debug for RemoteExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteExecution")
            .field("engine", &self.engine.name())
            .field("query", &self.query)
            .field("query_range_start", &self.query_range_start)
            .field("query_range_end", &self.query_range_end)
            .finish()
    }
}

impl PartialEq for RemoteExecution {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.engine), Arc::as_ptr(&other.engine))
            && self.query == other.query
            && self.query_range_start == other.query_range_start
            && self.query_range_end == other.query_range_end
    }
}

// ============================================================================
// Construction helpers
// ============================================================================

impl Node {
    /// `metric` selector
    pub fn selector(metric: impl Into<String>) -> Node {
        Node::VectorSelector(VectorSelector::new(metric))
    }

    /// `op by (grouping) (expr)`
    pub fn aggregate(op: AggregateOp, expr: Node, grouping: &[&str]) -> Node {
        Node::Aggregation(Aggregation {
            op,
            expr: Box::new(expr),
            grouping: grouping.iter().map(|s| s.to_string()).collect(),
            without: false,
        })
    }

    /// `op without (grouping) (expr)`
    pub fn aggregate_without(op: AggregateOp, expr: Node, grouping: &[&str]) -> Node {
        Node::Aggregation(Aggregation {
            op,
            expr: Box::new(expr),
            grouping: grouping.iter().map(|s| s.to_string()).collect(),
            without: true,
        })
    }

    /// `lhs op rhs`
    pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        Node::Binary(Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            return_bool: false,
        })
    }

    /// `lhs op bool rhs`
    pub fn binary_bool(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        Node::Binary(Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            return_bool: true,
        })
    }

    /// `name(args...)`
    pub fn call(name: impl Into<String>, args: Vec<Node>) -> Node {
        Node::Call(FunctionCall {
            name: name.into(),
            args,
        })
    }

    /// Whether this node is a vector selector
    pub fn is_vector_selector(&self) -> bool {
        matches!(self, Node::VectorSelector(_))
    }

    /// Direct children in evaluation order
    ///
    /// Remote execution nodes are opaque: their wrapped sub-plan belongs to
    /// the backend and is not visited.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::VectorSelector(_) | Node::NumberLiteral(_) | Node::RemoteExecution(_) => Vec::new(),
            Node::Aggregation(agg) => vec![agg.expr.as_ref()],
            Node::Binary(b) => vec![b.lhs.as_ref(), b.rhs.as_ref()],
            Node::Call(call) => call.args.iter().collect(),
        }
    }

    /// Rebuild the tree bottom-up
    ///
    /// Children are transformed before their parent; the callback receives
    /// each node by value and returns its replacement.
    pub fn transform_up<F>(self, f: &mut F) -> Node
    where
        F: FnMut(Node) -> Node,
    {
        let node = match self {
            Node::Aggregation(mut agg) => {
                agg.expr = Box::new(agg.expr.transform_up(f));
                Node::Aggregation(agg)
            },
            Node::Binary(mut b) => {
                b.lhs = Box::new(b.lhs.transform_up(f));
                b.rhs = Box::new(b.rhs.transform_up(f));
                Node::Binary(b)
            },
            Node::Call(mut call) => {
                call.args = call.args.into_iter().map(|a| a.transform_up(f)).collect();
                Node::Call(call)
            },
            leaf => leaf,
        };
        f(node)
    }
}

/// Visit a plan children-first
///
/// The callback gets the parent (if any) and the current node and returns
/// `true` to stop the traversal. A stop signalled by a child prevents the
/// parent from being visited.
pub fn traverse_bottom_up<F>(parent: Option<&Node>, current: &Node, f: &mut F) -> bool
where
    F: FnMut(Option<&Node>, &Node) -> bool,
{
    for child in current.children() {
        if traverse_bottom_up(Some(current), child, f) {
            return true;
        }
    }
    f(parent, current)
}

// ============================================================================
// Rendering
// ============================================================================

fn fmt_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        write!(f, "NaN")
    } else if v.is_infinite() {
        write!(f, "{}Inf", if v > 0.0 { "+" } else { "-" })
    } else {
        write!(f, "{}", v)
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.metric_name();
        let rest: Vec<String> = self
            .matchers
            .iter()
            .filter(|m| !(name.is_some() && m.name == METRIC_NAME && Some(m.value.as_str()) == name))
            .map(|m| m.to_string())
            .collect();
        if let Some(name) = name {
            write!(f, "{}", name)?;
            if rest.is_empty() {
                return Ok(());
            }
        }
        write!(f, "{{{}}}", rest.join(", "))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::VectorSelector(vs) => write!(f, "{}", vs),
            Node::NumberLiteral(v) => fmt_float(f, *v),
            Node::Aggregation(agg) => {
                write!(f, "{}", agg.op)?;
                if agg.without {
                    write!(f, " without ({})", agg.grouping.join(", "))?;
                } else if !agg.grouping.is_empty() {
                    write!(f, " by ({})", agg.grouping.join(", "))?;
                }
                write!(f, " ({})", agg.expr)
            },
            Node::Binary(b) => {
                let side = |n: &Node| match n {
                    Node::Binary(_) => format!("({})", n),
                    _ => n.to_string(),
                };
                write!(f, "{} {}", side(&b.lhs), b.op)?;
                if b.return_bool {
                    write!(f, " bool")?;
                }
                write!(f, " {}", side(&b.rhs))
            },
            Node::Call(call) => {
                let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", call.name, args.join(", "))
            },
            Node::RemoteExecution(r) => write!(f, "remote({})", r.query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchType;

    fn sample_plan() -> Node {
        Node::aggregate(
            AggregateOp::Sum,
            Node::binary(BinaryOp::Div, Node::selector("a"), Node::selector("b")),
            &["job"],
        )
    }

    #[test]
    fn test_render_promql() {
        assert_eq!(sample_plan().to_string(), "sum by (job) (a / b)");

        let vs = VectorSelector::new("http_requests_total")
            .matcher(Matcher::new(MatchType::Regexp, "job", "web|api").unwrap());
        assert_eq!(
            Node::VectorSelector(vs).to_string(),
            r#"http_requests_total{job=~"web|api"}"#
        );

        let q = Node::call(
            "histogram_quantile",
            vec![Node::NumberLiteral(0.9), Node::selector("latency_bucket")],
        );
        assert_eq!(q.to_string(), "histogram_quantile(0.9, latency_bucket)");
    }

    #[test]
    fn test_clone_is_independent() {
        let original = sample_plan();
        let copy = original.clone().transform_up(&mut |node| match node {
            Node::VectorSelector(_) => Node::NumberLiteral(1.0),
            other => other,
        });
        assert_ne!(original, copy);
        assert_eq!(original, sample_plan());
    }

    #[test]
    fn test_traverse_children_first() {
        let plan = sample_plan();
        let mut order = Vec::new();
        traverse_bottom_up(None, &plan, &mut |parent, current| {
            order.push((parent.map(|p| p.to_string()), current.to_string()));
            false
        });
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], (Some("a / b".to_string()), "a".to_string()));
        assert_eq!(order[1].1, "b");
        assert_eq!(order[3], (None, "sum by (job) (a / b)".to_string()));
    }

    #[test]
    fn test_traverse_stop_skips_parent() {
        let plan = sample_plan();
        let mut visited = 0;
        let stopped = traverse_bottom_up(None, &plan, &mut |_, current| {
            visited += 1;
            current.is_vector_selector()
        });
        assert!(stopped);
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_comparison_apply() {
        assert_eq!(BinaryOp::Gt.apply(2.0, 1.0), 1.0);
        assert_eq!(BinaryOp::Lte.apply(2.0, 1.0), 0.0);
        assert!(BinaryOp::Eq.is_comparison());
        assert!(!BinaryOp::Mul.is_comparison());
    }
}
