//! The abstract state and the operations shared by execution, composition,
//! merge and widening.

use crate::cfg::{Edge, EdgeKind};
use crate::locals::LocalTable;
use crate::memory::MemoryTable;
use pathfinder_dag::{
    show_edges, Constant, Dag, EdgeId, EdgeSet, ExprId, LabelledPredicate, PredId, Rewriter,
    TopAllocator, TopCollector, TopRemap, VarId,
};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Predicates generated by the block being executed and not yet labelled by
/// an outgoing edge.
#[derive(Clone, Debug, Default)]
pub(crate) struct Buffers {
    pub common: Vec<PredId>,
    pub taken: Vec<PredId>,
    pub not_taken: Vec<PredId>,
    /// The block contained a conditional test.
    pub conditional: bool,
}

impl Buffers {
    pub fn iter(&self) -> impl Iterator<Item = PredId> + '_ {
        self.common
            .iter()
            .chain(&self.taken)
            .chain(&self.not_taken)
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.common.is_empty() && self.taken.is_empty() && self.not_taken.is_empty()
    }

    fn update(&mut self, mut f: impl FnMut(PredId) -> PredId) {
        for p in self
            .common
            .iter_mut()
            .chain(self.taken.iter_mut())
            .chain(self.not_taken.iter_mut())
        {
            *p = f(*p);
        }
    }

    fn retain(&mut self, mut f: impl FnMut(PredId) -> bool) {
        self.common.retain(|p| f(*p));
        self.taken.retain(|p| f(*p));
        self.not_taken.retain(|p| f(*p));
    }
}

#[derive(Clone, Debug, Default)]
pub struct State {
    pub(crate) locals: LocalTable,
    pub(crate) memory: MemoryTable,
    pub(crate) preds: Vec<LabelledPredicate>,
    pub(crate) buffers: Buffers,
    pub(crate) path: Vec<EdgeId>,
    pub(crate) bottom: bool,
}

impl State {
    /// Identity state: every register and cell holds its entry value.
    pub fn new() -> Self {
        Self::default()
    }

    /// The unreachable state.
    pub fn bottom() -> Self {
        State {
            bottom: true,
            ..Self::default()
        }
    }

    pub fn is_bottom(&self) -> bool {
        self.bottom
    }

    pub fn locals(&self) -> &LocalTable {
        &self.locals
    }

    pub fn memory(&self) -> &MemoryTable {
        &self.memory
    }

    pub fn labelled_predicates(&self) -> &[LabelledPredicate] {
        &self.preds
    }

    /// Edges travelled since the state was created or last merged.
    pub fn path(&self) -> &[EdgeId] {
        &self.path
    }

    /// Predicates generated but not yet labelled by an outgoing edge.
    pub fn pending_predicates(&self) -> impl Iterator<Item = PredId> + '_ {
        self.buffers.iter()
    }

    /// Current value of a register or temporary.
    pub fn value_of(&self, dag: &mut Dag, v: VarId) -> ExprId {
        self.locals.get(v).unwrap_or_else(|| dag.var(v))
    }

    /// Current value of a memory cell.
    pub fn read_cell(&self, dag: &mut Dag, tops: &mut TopAllocator, addr: Constant) -> ExprId {
        match self.memory.get(addr) {
            Some(e) => e,
            None if self.memory.is_wiped() => tops.fresh_expr(dag),
            None => dag.mem(addr),
        }
    }

    pub fn set_local(&mut self, v: VarId, e: ExprId) {
        self.locals.set(v, e);
    }

    pub fn set_cell(&mut self, addr: Constant, e: ExprId) {
        self.memory.set(addr, e);
    }

    pub fn unbind_local(&mut self, v: VarId) {
        self.locals.unbind(v);
    }

    pub fn unbind_cell(&mut self, addr: Constant) {
        self.memory.remove(addr);
    }

    pub fn wipe_memory(&mut self) {
        self.memory.wipe();
    }

    pub fn add_predicate(&mut self, lp: LabelledPredicate) {
        self.preds.push(lp);
    }

    /// Queue a predicate to be labelled by the next outgoing edge.
    pub fn add_pending(&mut self, p: PredId) {
        self.buffers.common.push(p);
    }

    /// Label the pending predicates relevant to `edge` with it, move them to
    /// the labelled list and record the edge in the path.
    pub fn append_edge(&mut self, edge: &Edge) {
        if self.bottom {
            return;
        }
        let buffers = std::mem::take(&mut self.buffers);
        let branch = if buffers.conditional && edge.kind == EdgeKind::Taken {
            buffers.taken
        } else {
            buffers.not_taken
        };
        let labels: EdgeSet = [edge.id].into();
        let mut seen = BTreeSet::new();
        for p in buffers.common.into_iter().chain(branch) {
            if seen.insert(p) {
                self.preds.push(LabelledPredicate::with_labels(p, labels.clone()));
            }
        }
        self.path.push(edge.id);
    }

    /// Bare predicates, labelled or pending.
    pub fn bare_predicates(&self) -> BTreeSet<PredId> {
        self.preds
            .iter()
            .map(|lp| lp.pred)
            .chain(self.buffers.iter())
            .collect()
    }

    /// Fixpoint test: same bindings and same bare predicates. Labels and
    /// paths are ignored.
    pub fn equiv(&self, other: &State) -> bool {
        if self.bottom || other.bottom {
            return self.bottom == other.bottom;
        }
        self.locals == other.locals
            && self.memory == other.memory
            && self.bare_predicates() == other.bare_predicates()
    }

    /// Replace bindings of `threshold` nodes or more by fresh Tops.
    pub fn clamp(&mut self, dag: &mut Dag, tops: &mut TopAllocator, threshold: usize) {
        let mut clamped = 0usize;
        self.locals.update(|_, e| {
            if dag.count(e) >= threshold {
                clamped += 1;
                tops.fresh_expr(dag)
            } else {
                e
            }
        });
        self.memory.update(|_, e| {
            if dag.count(e) >= threshold {
                clamped += 1;
                tops.fresh_expr(dag)
            } else {
                e
            }
        });
        if clamped > 0 {
            tracing::debug!(clamped, threshold, "clamped oversized bindings");
        }
    }

    /// Rewrite every expression of the state through `rw`.
    pub(crate) fn rewrite_all<F>(&mut self, dag: &mut Dag, rw: &mut Rewriter<F>)
    where
        F: FnMut(&mut Dag, ExprId) -> Option<ExprId>,
    {
        self.locals.update(|_, e| rw.apply(dag, e));
        self.memory.update(|_, e| rw.apply(dag, e));
        for lp in &mut self.preds {
            lp.pred = rw.apply_predicate(dag, lp.pred);
        }
        self.buffers.update(|p| rw.apply_predicate(dag, p));
        self.drop_tautologies(dag);
    }

    pub(crate) fn drop_tautologies(&mut self, dag: &Dag) {
        self.preds.retain(|lp| !dag.is_tautology(lp.pred));
        self.buffers.retain(|p| !dag.is_tautology(p));
    }

    /// Keep only the predicates, labelled or pending, satisfying `f`.
    pub fn retain_predicates(&mut self, mut f: impl FnMut(PredId) -> bool) {
        self.preds.retain(|lp| f(lp.pred));
        self.buffers.retain(f);
    }

    /// Mark the Tops referenced anywhere in the state.
    pub fn collect_tops(&self, dag: &Dag, collector: &mut TopCollector) {
        for (_, e) in self.locals.iter() {
            collector.mark(dag, e);
        }
        for (_, e) in self.memory.iter() {
            collector.mark(dag, e);
        }
        for p in self.bare_predicates() {
            collector.mark_predicate(dag, p);
        }
    }

    pub fn rename_tops(&mut self, dag: &mut Dag, remap: &TopRemap) {
        if remap.is_identity() {
            return;
        }
        let mut rw = remap.rewriter();
        self.rewrite_all(dag, &mut rw);
    }

    /// Drop the cells of the frame below the entry stack pointer, and the
    /// predicates reading them.
    pub fn forget_frame(&mut self, dag: &Dag) {
        self.memory
            .retain(|addr, _| !(addr.sign().is_some() && addr.is_valid_address() && addr.value() < 0));
        self.retain_predicates(|p| {
            !dag.predicate_any(p, |d, e| d.involves_stack_below(e, Constant::SP).is_some())
        });
    }

    /// Multi-line dump for logs and test failures.
    pub fn show(&self, dag: &Dag) -> String {
        if self.bottom {
            return "bottom".to_string();
        }
        let mut out = String::new();
        for (v, e) in self.locals.iter() {
            let _ = writeln!(out, "{v} = {}", dag.show(e));
        }
        for (addr, e) in self.memory.iter() {
            let _ = writeln!(out, "[{addr}] = {}", dag.show(e));
        }
        if self.memory.is_wiped() {
            let _ = writeln!(out, "[*] = T");
        }
        for lp in &self.preds {
            let _ = writeln!(out, "{} {}", dag.show_predicate(lp.pred), show_edges(&lp.labels));
        }
        for p in self.buffers.iter() {
            let _ = writeln!(out, "{} (pending)", dag.show_predicate(p));
        }
        out
    }
}
