//! Logical plan optimizers
//!
//! Optimizers are best-effort rewrites: they always return an executable
//! plan, never an error. Anything worth telling the caller goes into the
//! returned [`Annotations`].
//!
//! # Passthrough
//!
//! [`PassthroughOptimizer`] delegates a whole query to a single remote
//! backend when that backend alone can answer it:
//!
//! - one backend: delegate if its time coverage intersects the query window
//! - no backends: keep the plan
//! - several backends: collect, per vector selector, every backend whose
//!   label sets admit the selector's matchers; delegate only if exactly one
//!   candidate was collected and its time coverage intersects the window
//!
//! Candidates are appended per selector without de-duplication, so a
//! backend that matches two selectors is collected twice and the plan stays
//! local.

use crate::metrics;
use crate::query::annotations::Annotations;
use crate::query::options::QueryOptions;
use crate::query::plan::{traverse_bottom_up, Node, RemoteExecution};
use crate::query::remote::{RemoteEndpoints, RemoteEngine};
use crate::types::{Labels, Matcher};
use std::sync::Arc;

/// A logical plan rewrite
pub trait Optimizer: Send + Sync {
    /// Rewrite `plan`, returning the new plan and any advisory warnings
    fn optimize(&self, plan: Node, opts: &QueryOptions) -> (Node, Annotations);
}

/// Whether any label set admits all matchers
///
/// OR across label sets, AND across matchers within a set. A matcher only
/// rejects a set that carries its label name; an absent name never blocks.
/// With no label sets at all the backend is unconstrained.
pub fn label_sets_match(matchers: &[Matcher], label_sets: &[Labels]) -> bool {
    if label_sets.is_empty() {
        return true;
    }

    label_sets.iter().any(|lset| {
        matchers.iter().all(|m| match lset.get(&m.name) {
            Some(value) => m.matches(value),
            None => true,
        })
    })
}

/// Whether a backend's `[min_t, max_t]` intersects the query window
pub fn matching_engine_time(engine: &dyn RemoteEngine, opts: &QueryOptions) -> bool {
    opts.time_range().overlaps(engine.min_t(), engine.max_t())
}

/// Delegates queries answerable by exactly one remote backend
pub struct PassthroughOptimizer {
    endpoints: Arc<dyn RemoteEndpoints>,
}

impl PassthroughOptimizer {
    /// Create an optimizer consulting `endpoints`
    pub fn new(endpoints: Arc<dyn RemoteEndpoints>) -> Self {
        Self { endpoints }
    }

    fn delegate(engine: Arc<dyn RemoteEngine>, plan: Node, opts: &QueryOptions) -> Node {
        tracing::debug!(
            backend = engine.name(),
            start = opts.start,
            end = opts.end,
            "delegating query to remote backend"
        );
        metrics::record_passthrough("delegated");
        Node::RemoteExecution(RemoteExecution {
            engine,
            query: Box::new(plan),
            query_range_start: opts.start,
            query_range_end: opts.end,
        })
    }

    fn keep(plan: Node, reason: &'static str) -> (Node, Annotations) {
        tracing::debug!(reason, "keeping query local");
        metrics::record_passthrough(reason);
        (plan, Annotations::new())
    }
}

impl Optimizer for PassthroughOptimizer {
    fn optimize(&self, plan: Node, opts: &QueryOptions) -> (Node, Annotations) {
        let engines = self.endpoints.engines();

        match engines.len() {
            0 => return Self::keep(plan, "no_backends"),
            1 => {
                let engine = Arc::clone(&engines[0]);
                if !matching_engine_time(engine.as_ref(), opts) {
                    return Self::keep(plan, "time_mismatch");
                }
                return (Self::delegate(engine, plan, opts), Annotations::new());
            },
            _ => {},
        }

        let mut candidates: Vec<Arc<dyn RemoteEngine>> = Vec::with_capacity(engines.len());
        traverse_bottom_up(None, &plan, &mut |_, current| {
            if let Node::VectorSelector(vs) = current {
                for engine in &engines {
                    if label_sets_match(&vs.matchers, engine.label_sets()) {
                        candidates.push(Arc::clone(engine));
                    }
                }
            }
            false
        });

        if candidates.len() == 1 && matching_engine_time(candidates[0].as_ref(), opts) {
            let engine = candidates.swap_remove(0);
            return (Self::delegate(engine, plan, opts), Annotations::new());
        }

        let reason = if candidates.len() == 1 {
            "time_mismatch"
        } else {
            "ambiguous"
        };
        Self::keep(plan, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::Result;
    use crate::query::executor::ExecutionContext;
    use crate::query::result::Series;
    use crate::query::remote::StaticEndpoints;
    use crate::types::MatchType;

    struct FakeEngine {
        min_t: i64,
        max_t: i64,
        label_sets: Vec<Labels>,
    }

    impl RemoteEngine for FakeEngine {
        fn name(&self) -> &str {
            "fake"
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

    fn job(value: &str) -> Labels {
        Labels::from_pairs(&[("job", value)])
    }

    #[test]
    fn test_label_sets_match_or_semantics() {
        let matchers = vec![Matcher::equal("job", "web")];
        assert!(label_sets_match(&matchers, &[]));
        assert!(!label_sets_match(&matchers, &[job("db")]));
        assert!(label_sets_match(&matchers, &[job("db"), job("web")]));
    }

    #[test]
    fn test_label_sets_match_absent_label() {
        let matchers = vec![
            Matcher::equal("job", "web"),
            Matcher::new(MatchType::Regexp, "region", "eu-.*").unwrap(),
        ];
        let lset = Labels::from_pairs(&[("region", "eu-west")]);
        assert!(label_sets_match(&matchers, &[lset]));
        let lset = Labels::from_pairs(&[("region", "us-east")]);
        assert!(!label_sets_match(&matchers, &[lset]));
        assert!(label_sets_match(&[], &[job("db")]));
    }

    #[test]
    fn test_matching_engine_time_boundaries() {
        let engine = FakeEngine {
            min_t: 100,
            max_t: 200,
            label_sets: Vec::new(),
        };
        let opts = |s, e| QueryOptions::range(s, e, 1).unwrap();
        assert!(matching_engine_time(&engine, &opts(200, 300)));
        assert!(matching_engine_time(&engine, &opts(0, 100)));
        assert!(!matching_engine_time(&engine, &opts(201, 300)));
        assert!(!matching_engine_time(&engine, &opts(0, 99)));
    }

    #[test]
    fn test_single_engine_delegates_whole_plan() {
        let engine: Arc<dyn RemoteEngine> = Arc::new(FakeEngine {
            min_t: 0,
            max_t: 1000,
            label_sets: Vec::new(),
        });
        let opt = PassthroughOptimizer::new(Arc::new(StaticEndpoints::new(vec![engine])));
        let plan = Node::selector("up");
        let opts = QueryOptions::range(10, 20, 5).unwrap();

        let (out, annotations) = opt.optimize(plan.clone(), &opts);
        assert!(annotations.is_empty());
        match out {
            Node::RemoteExecution(r) => {
                assert_eq!(*r.query, plan);
                assert_eq!(r.query_range_start, 10);
                assert_eq!(r.query_range_end, 20);
            },
            other => panic!("expected remote execution, got {}", other),
        }
    }
}
