//! Independent re-check of a reported edge set.

use crate::session::{Session, Verdict};
use crate::CancelToken;
use pathfinder_dag::{EdgeId, EdgeSet};
use tracing::debug;
use z3::ast::Bool;

/// Edges of `set` in the order the path first takes them, or `None` if the
/// path never takes one of them.
pub fn ordered_along(set: &EdgeSet, path: &[EdgeId]) -> Option<Vec<EdgeId>> {
    let mut order: Vec<EdgeId> = Vec::with_capacity(set.len());
    for e in path {
        if set.contains(e) && !order.contains(e) {
            order.push(*e);
        }
    }
    (order.len() == set.len()).then_some(order)
}

/// An encoded predicate and the edges it needs.
pub struct Evidence<'a> {
    pub formula: &'a Bool,
    pub labels: &'a EdgeSet,
}

/// True when `set` is non-empty, lies along `path` (if given), and the
/// predicates it enables are unsatisfiable on a fresh solver.
pub fn validate(
    set: &EdgeSet,
    evidence: &[Evidence<'_>],
    side: &[Bool],
    path: Option<&[EdgeId]>,
    timeout_ms: Option<u64>,
    cancel: &CancelToken,
) -> bool {
    if set.is_empty() {
        return false;
    }
    if let Some(path) = path {
        if ordered_along(set, path).is_none() {
            debug!(?set, "edge set does not lie along the candidate path");
            return false;
        }
    }
    if cancel.is_cancelled() {
        return false;
    }
    let enabled: Vec<Bool> = evidence
        .iter()
        .filter(|ev| ev.labels.is_subset(set))
        .map(|ev| ev.formula.clone())
        .collect();
    let mut session = Session::new(&enabled, side, timeout_ms);
    let all: Vec<usize> = (0..enabled.len()).collect();
    session.check(&all) == Verdict::Unsat
}
