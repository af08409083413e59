//! One solver instance answering subset queries over a fixed formula list.

use ahash::AHashMap;
use tracing::{debug, warn};
use z3::ast::Bool;
use z3::{Params, SatResult, Solver};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verdict {
    Sat,
    Unsat,
}

/// Formula `i` is guarded by the tracking literal `p{i}`, so any subset can
/// be checked by assumption without rebuilding the solver.
pub struct Session {
    solver: Solver,
    tracks: Vec<Bool>,
    names: AHashMap<String, usize>,
    checks: usize,
}

pub(crate) fn apply_solver_timeout(solver: &Solver, timeout_ms: Option<u64>) {
    if let Some(ms) = timeout_ms {
        let mut params = Params::new();
        params.set_u32("timeout", u32::try_from(ms).unwrap_or(u32::MAX));
        solver.set_params(&params);
    }
}

impl Session {
    /// `side` constraints hold in every query.
    pub fn new(formulas: &[Bool], side: &[Bool], timeout_ms: Option<u64>) -> Session {
        let solver = Solver::new();
        apply_solver_timeout(&solver, timeout_ms);
        for s in side {
            solver.assert(s);
        }
        let mut tracks = Vec::with_capacity(formulas.len());
        let mut names = AHashMap::new();
        for (i, f) in formulas.iter().enumerate() {
            let name = format!("p{i}");
            let track = Bool::new_const(name.clone());
            solver.assert(&track.implies(f));
            tracks.push(track);
            names.insert(name, i);
        }
        Session {
            solver,
            tracks,
            names,
            checks: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Number of solver calls so far.
    pub fn checks(&self) -> usize {
        self.checks
    }

    /// Satisfiability of the conjunction of `subset`. Unknown counts as SAT.
    pub fn check(&mut self, subset: &[usize]) -> Verdict {
        let assumptions: Vec<Bool> = subset.iter().map(|&i| self.tracks[i].clone()).collect();
        self.checks += 1;
        match self.solver.check_assumptions(&assumptions) {
            SatResult::Unsat => Verdict::Unsat,
            SatResult::Sat => Verdict::Sat,
            SatResult::Unknown => {
                warn!(
                    predicates = subset.len(),
                    reason = ?self.solver.get_reason_unknown(),
                    "solver answered unknown, assuming satisfiable"
                );
                Verdict::Sat
            }
        }
    }

    /// Indices of an unsatisfiable subset of `subset`, or `None` when
    /// `subset` is satisfiable. The core is not necessarily minimal.
    pub fn core(&mut self, subset: &[usize]) -> Option<Vec<usize>> {
        if self.check(subset) == Verdict::Sat {
            return None;
        }
        let mut core: Vec<usize> = self
            .solver
            .get_unsat_core()
            .iter()
            .filter_map(|b| self.names.get(&b.to_string()).copied())
            .collect();
        core.sort_unstable();
        core.dedup();
        if core.is_empty() && !subset.is_empty() {
            // the side constraints alone are contradictory
            debug!("empty unsat core");
        }
        Some(core)
    }
}
