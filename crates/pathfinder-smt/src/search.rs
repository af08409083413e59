//! Enumeration of minimal infeasible edge sets.

use crate::encoder::Encoder;
use crate::filter::keep_minimal;
use crate::minimize::shrink_core;
use crate::session::Session;
use crate::validate::{validate, Evidence};
use crate::{CancelToken, SearchConfig};
use pathfinder_dag::{EdgeId, EdgeSet, LabelledPredicate, SharedDag};
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, warn};

/// Subset still to explore. Members of `necessary` are never dropped below
/// this node, so siblings explore disjoint parts of the lattice.
struct Node {
    subset: Vec<usize>,
    necessary: BTreeSet<usize>,
}

/// Minimal infeasible edge sets among `predicates`, or `None` if their
/// conjunction may be satisfiable.
pub fn seek_infeasible_paths(
    dag: &SharedDag,
    predicates: &[LabelledPredicate],
    config: &SearchConfig,
    cancel: &CancelToken,
) -> Option<Vec<EdgeSet>> {
    seek_infeasible_paths_along(dag, predicates, None, config, cancel)
}

/// Same as [`seek_infeasible_paths`], validating each set against the edge
/// order of the candidate `path` when one is given.
pub fn seek_infeasible_paths_along(
    dag: &SharedDag,
    predicates: &[LabelledPredicate],
    path: Option<&[EdgeId]>,
    config: &SearchConfig,
    cancel: &CancelToken,
) -> Option<Vec<EdgeSet>> {
    // encode under the lock, solve without it
    let (formulas, owners, side) = {
        let dag = dag.lock();
        let mut enc = Encoder::new();
        let mut formulas = Vec::new();
        let mut owners = Vec::new();
        for (i, lp) in predicates.iter().enumerate() {
            match enc.predicate(&dag, lp.pred) {
                Some(f) => {
                    formulas.push(f);
                    owners.push(i);
                }
                None => debug!(predicate = %dag.show_predicate(lp.pred), "incomplete predicate skipped"),
            }
        }
        (formulas, owners, enc.side_constraints())
    };
    if formulas.is_empty() || cancel.is_cancelled() {
        return None;
    }

    let mut session = Session::new(&formulas, &side, config.timeout_ms);
    let cores = explore(&mut session, config, cancel)?;

    let labels_of = |core: &[usize]| -> EdgeSet {
        core.iter()
            .flat_map(|&i| predicates[owners[i]].labels.iter().copied())
            .collect()
    };
    let candidates: Vec<EdgeSet> = cores
        .iter()
        .map(|core| labels_of(core))
        .filter(|set| !set.is_empty())
        .collect();
    let minimal = keep_minimal(candidates);

    let evidence: Vec<Evidence<'_>> = formulas
        .iter()
        .zip(&owners)
        .map(|(formula, &i)| Evidence {
            formula,
            labels: &predicates[i].labels,
        })
        .collect();
    let mut reported = Vec::new();
    for set in minimal {
        if validate(&set, &evidence, &side, path, config.timeout_ms, cancel) {
            reported.push(set);
            continue;
        }
        if cancel.is_cancelled() {
            return None;
        }
        match path {
            Some(p) if config.fallback_to_full_path && !p.is_empty() => {
                warn!(?set, "minimized edge set failed validation, reporting the full path");
                reported.push(p.iter().copied().collect());
            }
            _ => warn!(?set, "minimized edge set failed validation, dropped"),
        }
    }
    let reported = keep_minimal(reported);
    debug!(
        predicates = predicates.len(),
        encoded = formulas.len(),
        cores = cores.len(),
        reported = reported.len(),
        checks = session.checks(),
        "infeasible-path search finished"
    );
    (!reported.is_empty()).then_some(reported)
}

/// Unsatisfiable subsets of the session's formulas, each minimal when
/// `config.minimize` is set. `None` when everything is satisfiable or the
/// search was cancelled.
fn explore(session: &mut Session, config: &SearchConfig, cancel: &CancelToken) -> Option<Vec<Vec<usize>>> {
    let all: Vec<usize> = (0..session.len()).collect();
    let mut queue = VecDeque::from([Node {
        subset: all,
        necessary: BTreeSet::new(),
    }]);
    let mut visited: BTreeSet<Vec<usize>> = BTreeSet::new();
    let mut cores: Vec<Vec<usize>> = Vec::new();
    let mut explored = 0usize;

    while let Some(node) = queue.pop_front() {
        if explored >= config.max_explored_nodes {
            debug!(explored, found = cores.len(), "exploration bound reached");
            break;
        }
        if cancel.is_cancelled() {
            return None;
        }
        explored += 1;
        let Some(core) = session.core(&node.subset) else {
            continue;
        };
        let core = if config.minimize {
            shrink_core(session, core, cancel)?
        } else {
            core
        };

        // drop each removable member in turn; earlier ones become necessary
        let mut necessary = node.necessary.clone();
        for &dropped in core.iter().filter(|i| !node.necessary.contains(i)) {
            let subset: Vec<usize> = node.subset.iter().copied().filter(|&i| i != dropped).collect();
            if visited.insert(subset.clone()) {
                queue.push_back(Node {
                    subset,
                    necessary: necessary.clone(),
                });
            }
            necessary.insert(dropped);
        }
        if !cores.contains(&core) {
            cores.push(core);
        }
    }
    (!cores.is_empty()).then_some(cores)
}
