//! Integration tests for the passthrough optimizer
//!
//! These tests validate delegation decisions end to end:
//! - No backends, one backend, several backends
//! - Time coverage intersection
//! - Label-set matching across selectors
//! - Candidate accumulation across selectors (no de-duplication)

use std::sync::Arc;

use stepwise::query::error::Result;
use stepwise::query::plan::{AggregateOp, BinaryOp, Node, VectorSelector};
use stepwise::query::{
    label_sets_match, ExecutionContext, Optimizer, PassthroughOptimizer, QueryOptions,
    RemoteEngine, Series, StaticEndpoints,
};
use stepwise::types::{Labels, MatchType, Matcher};

// ============================================================================
// Helper Functions
// ============================================================================

struct Backend {
    name: String,
    min_t: i64,
    max_t: i64,
    label_sets: Vec<Labels>,
}

impl RemoteEngine for Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_t(&self) -> i64 {
        self.min_t
    }

    fn max_t(&self) -> i64 {
        self.max_t
    }

    fn label_sets(&self) -> &[Labels] {
        &self.label_sets
    }

    fn execute(&self, _: &ExecutionContext, _: &Node, _: &QueryOptions) -> Result<Vec<Series>> {
        Ok(Vec::new())
    }
}

fn backend(name: &str, min_t: i64, max_t: i64, sets: &[&[(&str, &str)]]) -> Arc<dyn RemoteEngine> {
    Arc::new(Backend {
        name: name.to_string(),
        min_t,
        max_t,
        label_sets: sets.iter().map(|pairs| Labels::from_pairs(pairs)).collect(),
    })
}

fn optimizer(engines: Vec<Arc<dyn RemoteEngine>>) -> PassthroughOptimizer {
    PassthroughOptimizer::new(Arc::new(StaticEndpoints::new(engines)))
}

fn opts() -> QueryOptions {
    QueryOptions::range(1_000, 2_000, 100).unwrap()
}

fn job_selector(metric: &str, job: &str) -> Node {
    Node::VectorSelector(VectorSelector::new(metric).matcher(Matcher::equal("job", job)))
}

fn sample_plans() -> Vec<Node> {
    vec![
        Node::selector("up"),
        Node::NumberLiteral(1.0),
        Node::aggregate(AggregateOp::Sum, job_selector("http_requests_total", "web"), &["code"]),
        Node::binary(BinaryOp::Div, job_selector("a", "web"), job_selector("b", "db")),
        Node::call(
            "histogram_quantile",
            vec![Node::NumberLiteral(0.9), Node::selector("latency_bucket")],
        ),
    ]
}

fn delegated_to(plan: &Node) -> Option<&str> {
    match plan {
        Node::RemoteExecution(r) => Some(r.engine.name()),
        _ => None,
    }
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_no_backends_keeps_every_plan() {
    let opt = optimizer(Vec::new());
    for plan in sample_plans() {
        let (out, annotations) = opt.optimize(plan.clone(), &opts());
        assert_eq!(out, plan);
        assert!(annotations.is_empty());
    }
}

#[test]
fn test_single_backend_outside_window_keeps_plan() {
    for (min_t, max_t) in [(0, 999), (2_001, 5_000)] {
        let opt = optimizer(vec![backend("b", min_t, max_t, &[])]);
        for plan in sample_plans() {
            let (out, _) = opt.optimize(plan.clone(), &opts());
            assert_eq!(out, plan, "window [{}, {}]", min_t, max_t);
        }
    }
}

#[test]
fn test_single_backend_overlapping_wraps_clone() {
    for (min_t, max_t) in [(0, 1_000), (2_000, 3_000), (1_500, 1_600), (i64::MIN, i64::MAX)] {
        let opt = optimizer(vec![backend("only", min_t, max_t, &[&[("job", "elsewhere")]])]);
        for plan in sample_plans() {
            let (out, _) = opt.optimize(plan.clone(), &opts());
            let Node::RemoteExecution(remote) = out else {
                panic!("expected delegation for window [{}, {}]", min_t, max_t);
            };
            assert_eq!(remote.engine.name(), "only");
            assert_eq!(*remote.query, plan);
            assert_eq!(remote.query_range_start, 1_000);
            assert_eq!(remote.query_range_end, 2_000);
        }
    }
}

#[test]
fn test_label_sets_match_examples() {
    let web = [Matcher::equal("job", "web")];
    assert!(label_sets_match(&web, &[]));
    assert!(!label_sets_match(&web, &[Labels::from_pairs(&[("job", "db")])]));
    assert!(label_sets_match(
        &web,
        &[Labels::from_pairs(&[("job", "db")]), Labels::from_pairs(&[("job", "web")])]
    ));
}

#[test]
fn test_label_sets_match_absent_label_does_not_block() {
    let matchers = [
        Matcher::equal("job", "web"),
        Matcher::new(MatchType::Regexp, "region", "eu-.*").unwrap(),
    ];
    assert!(label_sets_match(&matchers, &[Labels::from_pairs(&[("job", "web")])]));
    assert!(!label_sets_match(
        &matchers,
        &[Labels::from_pairs(&[("job", "web"), ("region", "us-1")])]
    ));
}

#[test]
fn test_multiple_backends_single_owner_delegates() {
    let opt = optimizer(vec![
        backend("east", 0, 10_000, &[&[("region", "east")]]),
        backend("west", 0, 10_000, &[&[("region", "west")]]),
    ]);
    let plan = Node::aggregate(
        AggregateOp::Sum,
        Node::VectorSelector(VectorSelector::new("up").matcher(Matcher::equal("region", "west"))),
        &["job"],
    );
    let (out, _) = opt.optimize(plan, &opts());
    assert_eq!(delegated_to(&out), Some("west"));
}

#[test]
fn test_multiple_backends_ambiguous_stays_local() {
    let opt = optimizer(vec![
        backend("east", 0, 10_000, &[&[("region", "east")]]),
        backend("west", 0, 10_000, &[&[("region", "west")]]),
    ]);
    // no region matcher: both backends admit the selector
    let plan = Node::selector("up");
    let (out, _) = opt.optimize(plan.clone(), &opts());
    assert_eq!(out, plan);
}

#[test]
fn test_multiple_backends_single_owner_outside_window() {
    let opt = optimizer(vec![
        backend("east", 0, 10_000, &[&[("region", "east")]]),
        backend("west", 5_000, 10_000, &[&[("region", "west")]]),
    ]);
    let plan = Node::VectorSelector(VectorSelector::new("up").matcher(Matcher::equal("region", "west")));
    let (out, _) = opt.optimize(plan.clone(), &opts());
    assert_eq!(out, plan);
}

#[test]
fn test_same_backend_matched_by_two_selectors_is_counted_twice() {
    // Candidates accumulate per selector without de-duplication, so a
    // binary expression over two selectors owned by the same backend is
    // not delegated.
    let opt = optimizer(vec![
        backend("east", 0, 10_000, &[&[("region", "east")]]),
        backend("west", 0, 10_000, &[&[("region", "west")]]),
    ]);
    let west = |metric: &str| {
        Node::VectorSelector(VectorSelector::new(metric).matcher(Matcher::equal("region", "west")))
    };
    let plan = Node::binary(BinaryOp::Div, west("errors"), west("requests"));
    let (out, _) = opt.optimize(plan.clone(), &opts());
    assert_eq!(out, plan);
}

#[test]
fn test_no_selectors_with_multiple_backends_stays_local() {
    let opt = optimizer(vec![backend("a", 0, 10_000, &[]), backend("b", 0, 10_000, &[])]);
    let plan = Node::call("time", vec![]);
    let (out, _) = opt.optimize(plan.clone(), &opts());
    assert_eq!(out, plan);
}
