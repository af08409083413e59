//! Join of the states reaching a block.

use crate::cfg::BlockId;
use crate::state::State;
use pathfinder_dag::{Constant, Dag, ExprId, PredId, TopAllocator, VarId};
use std::collections::BTreeSet;
use tracing::debug;

impl State {
    /// Keep what every reachable input agrees on. Disagreeing bindings get
    /// one fresh Top each; surviving predicates lose their labels and wait
    /// for the next edge.
    pub fn merge(dag: &mut Dag, tops: &mut TopAllocator, states: &[State], at_block: BlockId) -> State {
        let live: Vec<&State> = states.iter().filter(|s| !s.bottom).collect();
        match live.as_slice() {
            [] => return State::bottom(),
            [only] => return (*only).clone(),
            _ => {}
        }

        let mut out = State::new();
        let mut disagreements = 0usize;

        let vars: BTreeSet<VarId> = live
            .iter()
            .flat_map(|s| s.locals.iter().map(|(v, _)| v))
            .filter(|v| v.is_register())
            .collect();
        for v in vars {
            let first = live[0].value_of(dag, v);
            let agreed = live[1..].iter().all(|s| s.value_of(dag, v) == first);
            if !agreed {
                disagreements += 1;
                let t = tops.fresh_expr(dag);
                out.locals.set(v, t);
            } else if first != dag.var(v) {
                out.locals.set(v, first);
            }
        }

        let wiped = live.iter().any(|s| s.memory.is_wiped());
        let addrs: BTreeSet<Constant> = live
            .iter()
            .flat_map(|s| s.memory.iter().map(|(a, _)| a))
            .collect();
        for addr in addrs {
            match agreed_cell(dag, &live, addr) {
                Some(e) if e == dag.mem(addr) => {}
                Some(e) => out.memory.set(addr, e),
                None => {
                    disagreements += 1;
                    let t = tops.fresh_expr(dag);
                    out.memory.set(addr, t);
                }
            }
        }
        out.memory.set_wiped(wiped);

        let mut common = live[0].bare_predicates();
        for s in &live[1..] {
            let other = s.bare_predicates();
            common.retain(|p| other.contains(p));
        }
        out.buffers.common = common.into_iter().collect::<Vec<PredId>>();

        debug!(
            block = %at_block,
            inputs = live.len(),
            disagreements,
            predicates = out.buffers.common.len(),
            "merged states"
        );
        out
    }
}

/// Common value of a cell, if every input holds the same one. An unbound
/// cell of a wiped input has no known value.
fn agreed_cell(dag: &mut Dag, live: &[&State], addr: Constant) -> Option<ExprId> {
    let mut agreed = None;
    for s in live {
        let v = match s.memory.get(addr) {
            Some(e) => e,
            None if s.memory.is_wiped() => return None,
            None => dag.mem(addr),
        };
        match agreed {
            None => agreed = Some(v),
            Some(a) if a != v => return None,
            Some(_) => {}
        }
    }
    agreed
}
