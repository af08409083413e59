//! Closed forms of loop-carried bindings.
//!
//! The input is the effect of one loop iteration: leaves denote values at the
//! start of the iteration. The output describes the effect of `n >= 0`
//! iterations, with `n` the loop's `Iter` leaf.

use crate::state::State;
use pathfinder_dag::{Constant, Dag, Expr, ExprId, LoopId, TopAllocator, VarId};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Slot {
    Local(VarId),
    Cell(Constant),
}

#[derive(Clone, Copy, Debug)]
enum Resolution {
    Unresolved,
    /// Kept unchanged.
    Kept,
    /// `leaf + delta * n`; `stationary` when `delta` is zero.
    Closed { value: ExprId, stationary: bool },
}

impl State {
    /// Summarize any number of iterations of the loop whose body effect is
    /// `self`. Bindings of the form `x + delta`, with `delta` invariant,
    /// become `x + delta * n`; other loop-carried bindings become fresh
    /// Tops. The output mentions no Top of `self`: a Top of the body is a
    /// value of one iteration, not of the loop header. Predicates are
    /// dropped since they only hold once the body ran.
    pub fn widen(&self, dag: &mut Dag, tops: &mut TopAllocator, loop_id: LoopId) -> State {
        if self.bottom {
            return State::bottom();
        }
        let n = dag.iter(loop_id);

        let mut bindings: BTreeMap<Slot, ExprId> = BTreeMap::new();
        for (v, e) in self.locals.iter().filter(|(v, _)| v.is_register()) {
            bindings.insert(Slot::Local(v), e);
        }
        for (a, e) in self.memory.iter() {
            bindings.insert(Slot::Cell(a), e);
        }
        let mut resolved: BTreeMap<Slot, Resolution> = bindings
            .iter()
            .map(|(&slot, &e)| {
                let r = if dag.involves_iter(e, loop_id) && !dag.involves_top(e) {
                    Resolution::Kept
                } else {
                    Resolution::Unresolved
                };
                (slot, r)
            })
            .collect();

        // one variable's closed form can make another's delta invariant
        loop {
            let mut progress = false;
            for (&slot, &e) in &bindings {
                if !matches!(resolved[&slot], Resolution::Unresolved) {
                    continue;
                }
                if let Some(r) = close(dag, self, &resolved, slot, e, n, loop_id) {
                    resolved.insert(slot, r);
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }

        let mut out = State::new();
        let mut lost = 0usize;
        for (slot, r) in resolved {
            let value = match r {
                Resolution::Kept => bindings[&slot],
                Resolution::Closed {
                    stationary: true, ..
                } => continue,
                Resolution::Closed { value, .. } => value,
                Resolution::Unresolved => {
                    lost += 1;
                    tops.fresh_expr(dag)
                }
            };
            match slot {
                Slot::Local(v) => out.locals.set(v, value),
                Slot::Cell(a) => out.memory.set(a, value),
            }
        }
        out.memory.set_wiped(self.memory.is_wiped());
        debug!(
            %loop_id,
            bindings = bindings.len(),
            lost,
            dropped_predicates = self.bare_predicates().len(),
            "widened loop state"
        );
        out
    }
}

fn slot_leaf(dag: &mut Dag, slot: Slot) -> ExprId {
    match slot {
        Slot::Local(v) => dag.var(v),
        Slot::Cell(a) => dag.mem(a),
    }
}

/// Closed form of `slot = e`, if `e` is its own start value plus an
/// invariant delta.
fn close(
    dag: &mut Dag,
    state: &State,
    resolved: &BTreeMap<Slot, Resolution>,
    slot: Slot,
    e: ExprId,
    n: ExprId,
    loop_id: LoopId,
) -> Option<Resolution> {
    let leaf = slot_leaf(dag, slot);
    let form = dag.parse_affine(e)?;
    if form.coefficient(leaf) != 1 {
        return None;
    }
    let rest = form.without(leaf);
    let invariant = rest
        .terms
        .iter()
        .all(|&(atom, _)| is_invariant(dag, state, resolved, atom, loop_id));
    if !invariant {
        return None;
    }
    let delta = dag.affine_to_expr(&rest);
    if dag.as_const(delta).is_some_and(|c| c.is(0)) {
        return Some(Resolution::Closed {
            value: leaf,
            stationary: true,
        });
    }
    let step = dag.mul(delta, n);
    let value = dag.add(leaf, step);
    Some(Resolution::Closed {
        value,
        stationary: false,
    })
}

/// True if no leaf of `e` changes across iterations.
fn is_invariant(
    dag: &Dag,
    state: &State,
    resolved: &BTreeMap<Slot, Resolution>,
    e: ExprId,
    loop_id: LoopId,
) -> bool {
    let stationary = |slot: Slot| {
        matches!(
            resolved.get(&slot),
            None | Some(Resolution::Closed {
                stationary: true,
                ..
            })
        )
    };
    !dag.any_node(e, |node| match node {
        Expr::Var(v) => !stationary(Slot::Local(v)),
        Expr::Mem(a) => {
            (state.memory.is_wiped() && state.memory.get(a).is_none()) || !stationary(Slot::Cell(a))
        }
        Expr::Top(_) => true,
        Expr::Iter(l) => l != loop_id,
        _ => false,
    })
}
