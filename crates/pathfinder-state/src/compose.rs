//! Sequential composition of states and call summaries.

use crate::cfg::BlockId;
use crate::memory::MemoryTable;
use crate::state::State;
use pathfinder_dag::{
    Constant, Dag, Expr, ExprId, LabelledPredicate, PredId, Rewriter, Sign, TopAllocator,
    TopCollector, TopRemap, VarId,
};
use tracing::debug;

/// Effect of a whole CFG, with the allocator owning its Tops.
#[derive(Clone, Debug)]
pub struct Summary {
    pub state: State,
    pub tops: TopAllocator,
}

impl Summary {
    /// Summary of a CFG from the states reaching its exit. Predicates lose
    /// their callee labels, the callee frame is forgotten and, when
    /// `collect_tops` is set, unreferenced Tops are released.
    pub fn from_exits(
        dag: &mut Dag,
        mut tops: TopAllocator,
        exits: &[State],
        exit: BlockId,
        collect_tops: bool,
    ) -> Summary {
        let mut state = State::merge(dag, &mut tops, exits, exit);
        state.unlabel();
        state.forget_frame(dag);
        let mut summary = Summary { state, tops };
        if collect_tops {
            summary.collect_tops(dag);
        }
        summary
    }

    /// Summary of a call whose effect is unknown: every register but the
    /// stack pointer gets a fresh Top, memory is wiped.
    pub fn unknown(dag: &mut Dag, registers: u32, sp: VarId) -> Summary {
        let mut tops = TopAllocator::new();
        let mut state = State::new();
        for r in 0..registers as i32 {
            let v = VarId(r);
            if v != sp {
                let t = tops.fresh_expr(dag);
                state.set_local(v, t);
            }
        }
        state.wipe_memory();
        Summary { state, tops }
    }

    /// Renumber the live Tops densely and forget the others.
    pub fn collect_tops(&mut self, dag: &mut Dag) {
        let mut live = TopCollector::new();
        self.state.collect_tops(dag, &mut live);
        let remap = self.tops.shrink(&live);
        self.state.rename_tops(dag, &remap);
    }
}

impl State {
    /// `self` followed by `g`: every leaf of `g` is replaced by its value in
    /// `self`.
    pub fn apply(&self, dag: &mut Dag, tops: &mut TopAllocator, g: &State, sp: VarId) -> State {
        self.compose(dag, tops, g, sp, &TopRemap::Offset(0))
    }

    /// Inline a call summary. The summary's Tops are imported into `tops`
    /// first, so two calls never share unknowns.
    pub fn apply_summary(
        &self,
        dag: &mut Dag,
        tops: &mut TopAllocator,
        summary: &Summary,
        sp: VarId,
    ) -> State {
        let remap = tops.import(&summary.tops);
        self.compose(dag, tops, &summary.state, sp, &remap)
    }

    fn compose(
        &self,
        dag: &mut Dag,
        tops: &mut TopAllocator,
        g: &State,
        sp: VarId,
        remap: &TopRemap,
    ) -> State {
        if self.bottom || g.bottom {
            return State::bottom();
        }
        let sp_image = match self.locals.get(sp) {
            Some(e) => e,
            None => dag.cst(Constant::SP),
        };
        // stack base of `g` as seen from `self`
        let base = dag
            .as_const(sp_image)
            .filter(|c| c.sign() == Some(Sign::Plus));

        let mut rw = Rewriter::new(|dag: &mut Dag, e: ExprId| match dag.get(e) {
            Expr::Var(v) => Some(self.value_of(dag, v)),
            Expr::Const(c) => c.sign().map(|sign| {
                let scaled = dag.mul_const(sp_image, sign.factor());
                dag.add_const(scaled, c.value())
            }),
            Expr::Mem(addr) => Some(match translate(addr, base) {
                Some(a) => self.read_cell(dag, tops, a),
                None => tops.fresh_expr(dag),
            }),
            Expr::Top(t) => Some(dag.top(remap.map(t))),
            _ => None,
        });

        let locals: Vec<(VarId, ExprId)> = g
            .locals
            .iter()
            .filter(|(v, _)| v.is_register())
            .map(|(v, e)| (v, rw.apply(dag, e)))
            .collect();
        let cells: Vec<(Option<Constant>, ExprId)> = g
            .memory
            .iter()
            .map(|(addr, e)| (translate(addr, base), rw.apply(dag, e)))
            .collect();
        let preds: Vec<LabelledPredicate> = g
            .preds
            .iter()
            .map(|lp| LabelledPredicate::with_labels(rw.apply_predicate(dag, lp.pred), lp.labels.clone()))
            .collect();
        let mut pending = |list: &[PredId]| -> Vec<PredId> {
            list.iter().map(|&p| rw.apply_predicate(dag, p)).collect()
        };
        let common = pending(&g.buffers.common);
        let taken = pending(&g.buffers.taken);
        let not_taken = pending(&g.buffers.not_taken);

        let mut out = self.clone();
        for (v, e) in locals {
            out.locals.set(v, e);
        }
        if g.memory.is_wiped() {
            out.memory = MemoryTable::new();
            out.memory.set_wiped(true);
        }
        if cells.iter().any(|(a, _)| a.is_none()) {
            debug!(sp = %dag.show(sp_image), "stack offset unknown, memory wiped by composition");
            out.memory.wipe();
        }
        for (addr, e) in cells {
            if let Some(a) = addr {
                out.memory.set(a, e);
            }
        }
        for lp in preds {
            if lp.labels.is_empty() {
                out.buffers.common.push(lp.pred);
            } else {
                out.preds.push(lp);
            }
        }
        out.buffers.common.extend(common);
        out.buffers.taken.extend(taken);
        out.buffers.not_taken.extend(not_taken);
        out.buffers.conditional |= g.buffers.conditional;
        out.path.extend_from_slice(&g.path);
        out.drop_tautologies(dag);
        out
    }

    /// Move every labelled predicate back to the pending list and forget the
    /// path.
    pub(crate) fn unlabel(&mut self) {
        let preds = std::mem::take(&mut self.preds);
        self.buffers.common.extend(preds.into_iter().map(|lp| lp.pred));
        self.buffers.common.sort_unstable();
        self.buffers.common.dedup();
        self.path.clear();
    }
}

/// Address in the caller frame of a cell of the callee frame.
fn translate(addr: Constant, base: Option<Constant>) -> Option<Constant> {
    match addr.sign() {
        None => Some(addr),
        Some(Sign::Plus) => base
            .map(|b| b + Constant::absolute(addr.value()))
            .filter(|a| a.is_valid_address()),
        Some(Sign::Minus) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathfinder_dag::{EdgeId, PredOp};

    const SP: VarId = VarId(13);

    fn caller_at(dag: &mut Dag, offset: i32) -> State {
        let mut s = State::new();
        let sp = dag.cst(Constant::stack(offset));
        s.set_local(SP, sp);
        s
    }

    #[test]
    fn test_apply_substitutes_registers() {
        let mut dag = Dag::new();
        let mut tops = TopAllocator::new();
        let mut f = State::new();
        let five = dag.cst(5);
        f.set_local(VarId(0), five);

        let mut g = State::new();
        let r0 = dag.var(VarId(0));
        let r0_plus_1 = dag.add_const(r0, 1);
        g.set_local(VarId(1), r0_plus_1);
        let p = dag.pred(PredOp::Lt, r0, five);
        g.add_predicate(LabelledPredicate::with_labels(p, [EdgeId(4)].into()));

        let h = f.apply(&mut dag, &mut tops, &g, SP);
        let six = dag.cst(6);
        assert_eq!(h.locals().get(VarId(0)), Some(five));
        assert_eq!(h.locals().get(VarId(1)), Some(six));
        // 5 < 5 is kept: it is the contradiction the search is after
        assert_eq!(h.labelled_predicates().len(), 1);
        assert_eq!(h.labelled_predicates()[0].labels, [EdgeId(4)].into());
    }

    #[test]
    fn test_apply_translates_stack_cells() {
        let mut dag = Dag::new();
        let mut tops = TopAllocator::new();
        let f = caller_at(&mut dag, -16);
        let mut g = State::new();
        let r2 = dag.var(VarId(2));
        g.set_cell(Constant::stack(4), r2);
        let global = dag.mem(Constant::stack(8));
        g.set_local(VarId(3), global);

        let h = f.apply(&mut dag, &mut tops, &g, SP);
        assert_eq!(h.memory().get(Constant::stack(-12)), Some(r2));
        let translated = dag.mem(Constant::stack(-8));
        assert_eq!(h.locals().get(VarId(3)), Some(translated));
        assert!(!h.memory().is_wiped());
    }

    #[test]
    fn test_apply_with_unknown_stack_wipes() {
        let mut dag = Dag::new();
        let mut tops = TopAllocator::new();
        let mut f = State::new();
        let t = tops.fresh_expr(&mut dag);
        f.set_local(SP, t);
        let kept = dag.cst(1);
        f.set_cell(Constant::absolute(0x100), kept);

        let mut g = State::new();
        let r0 = dag.var(VarId(0));
        g.set_cell(Constant::stack(-4), r0);
        let h = f.apply(&mut dag, &mut tops, &g, SP);
        assert!(h.memory().is_wiped());
        assert!(h.memory().is_empty());
    }

    #[test]
    fn test_summary_import_renames_tops() {
        let mut dag = Dag::new();
        let mut callee_tops = TopAllocator::new();
        let mut body = State::new();
        let t = callee_tops.fresh_expr(&mut dag);
        body.set_local(VarId(0), t);
        let summary = Summary {
            state: body,
            tops: callee_tops,
        };

        let mut tops = TopAllocator::new();
        let caller = caller_at(&mut dag, 0);
        let first = caller.apply_summary(&mut dag, &mut tops, &summary, SP);
        let second = first.apply_summary(&mut dag, &mut tops, &summary, SP);
        assert_ne!(first.locals().get(VarId(0)), second.locals().get(VarId(0)));
        assert_eq!(tops.len(), 2);
    }

    #[test]
    fn test_unknown_summary() {
        let mut dag = Dag::new();
        let summary = Summary::unknown(&mut dag, 16, SP);
        assert_eq!(summary.tops.len(), 15);
        assert!(summary.state.memory().is_wiped());
        assert!(!summary.state.locals().is_bound(SP));

        let mut tops = TopAllocator::new();
        let mut caller = caller_at(&mut dag, -8);
        let one = dag.cst(1);
        caller.set_cell(Constant::stack(-8), one);
        let after = caller.apply_summary(&mut dag, &mut tops, &summary, SP);
        assert!(after.memory().is_wiped());
        let mut scratch = TopAllocator::new();
        let cell = after.read_cell(&mut dag, &mut scratch, Constant::stack(-8));
        assert_ne!(cell, one);
    }

    #[test]
    fn test_summary_from_exits_forgets_frame() {
        let mut dag = Dag::new();
        let mut tops = TopAllocator::new();
        let mut exit = State::new();
        let r0 = dag.var(VarId(0));
        exit.set_cell(Constant::stack(-4), r0);
        exit.set_cell(Constant::stack(4), r0);
        let _unused = tops.fresh_expr(&mut dag);
        let kept = tops.fresh_expr(&mut dag);
        exit.set_local(VarId(1), kept);

        let summary = Summary::from_exits(&mut dag, tops, &[exit], BlockId(9), true);
        assert_eq!(summary.state.memory().get(Constant::stack(-4)), None);
        assert_eq!(summary.state.memory().get(Constant::stack(4)), Some(r0));
        assert_eq!(summary.tops.len(), 1);
        let renamed = summary.state.locals().get(VarId(1)).expect("bound");
        assert_eq!(dag.get(renamed), Expr::Top(pathfinder_dag::TopId(0)));
    }
}
