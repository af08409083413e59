//! Deletion-based core minimization.

use crate::session::{Session, Verdict};
use crate::CancelToken;

/// Drop members of `core` one at a time, keeping each drop that leaves the
/// rest unsatisfiable. The result is a minimal unsatisfiable subset: removing
/// any single member makes it satisfiable. `None` when cancelled.
pub fn shrink_core(session: &mut Session, core: Vec<usize>, cancel: &CancelToken) -> Option<Vec<usize>> {
    let mut kept = core;
    let mut i = 0;
    while i < kept.len() {
        if cancel.is_cancelled() {
            return None;
        }
        let mut trial = kept.clone();
        trial.remove(i);
        match session.check(&trial) {
            Verdict::Unsat => kept = trial,
            Verdict::Sat => i += 1,
        }
    }
    Some(kept)
}
