//! Allocation and garbage collection of Top identities.
//!
//! Each analysis unit (one CFG) owns a [`TopAllocator`]. Summaries move
//! between units through [`TopAllocator::import`], which reserves the
//! callee's whole range in the caller, and are compacted with
//! [`TopAllocator::shrink`] once final.

use crate::algebra::Rewriter;
use crate::dag::Dag;
use crate::expr::{Expr, ExprId, TopId};
use crate::predicate::PredId;
use ahash::AHashMap;
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default)]
pub struct TopAllocator {
    next: i32,
}

impl TopAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A never-before-seen identity. Once the identity space is exhausted
    /// every further Top is ephemeral.
    pub fn fresh(&mut self) -> TopId {
        match self.next.checked_add(1) {
            Some(next) => {
                let id = TopId(self.next);
                self.next = next;
                id
            }
            None => TopId::EPHEMERAL,
        }
    }

    /// Intern a fresh identified Top.
    pub fn fresh_expr(&mut self, dag: &mut Dag) -> ExprId {
        let id = self.fresh();
        dag.top(id)
    }

    pub fn len(&self) -> usize {
        self.next as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }

    /// Reserve the identities of `callee` inside this allocator.
    pub fn import(&mut self, callee: &TopAllocator) -> TopRemap {
        let offset = self.next;
        self.next = self.next.saturating_add(callee.next);
        TopRemap::Offset(offset)
    }

    /// Renumber the live identities densely from zero and forget the rest.
    pub fn shrink(&mut self, live: &TopCollector) -> TopRemap {
        let map: AHashMap<TopId, TopId> = live
            .live
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, TopId(i as i32)))
            .collect();
        tracing::debug!(before = self.next, after = map.len(), "shrinking top allocator");
        self.next = map.len() as i32;
        TopRemap::Dense(map)
    }
}

/// Renaming of identified Tops. The ephemeral Top is never renamed. An
/// identity the renaming has no image for, or whose image would leave the
/// identity space, becomes ephemeral: it may not alias a renamed one.
#[derive(Clone, Debug)]
pub enum TopRemap {
    Offset(i32),
    Dense(AHashMap<TopId, TopId>),
}

impl TopRemap {
    pub fn map(&self, t: TopId) -> TopId {
        if t.is_ephemeral() {
            return t;
        }
        match self {
            TopRemap::Offset(k) => t.0.checked_add(*k).map_or(TopId::EPHEMERAL, TopId),
            TopRemap::Dense(m) => m.get(&t).copied().unwrap_or(TopId::EPHEMERAL),
        }
    }

    pub fn is_identity(&self) -> bool {
        match self {
            TopRemap::Offset(k) => *k == 0,
            TopRemap::Dense(m) => m.iter().all(|(a, b)| a == b),
        }
    }

    /// Rewriter applying this renaming to expressions and predicates.
    pub fn rewriter(&self) -> Rewriter<impl FnMut(&mut Dag, ExprId) -> Option<ExprId> + '_> {
        Rewriter::new(move |dag: &mut Dag, e: ExprId| match dag.get(e) {
            Expr::Top(t) => Some(dag.top(self.map(t))),
            _ => None,
        })
    }
}

/// Mark pass collecting the Tops still referenced by a state.
#[derive(Clone, Debug, Default)]
pub struct TopCollector {
    live: BTreeSet<TopId>,
}

impl TopCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, dag: &Dag, e: ExprId) {
        dag.for_each_leaf(e, |leaf| {
            if let Expr::Top(t) = leaf {
                if !t.is_ephemeral() {
                    self.live.insert(t);
                }
            }
        });
    }

    pub fn mark_predicate(&mut self, dag: &Dag, p: PredId) {
        let pred = dag.predicate(p);
        self.mark(dag, pred.left);
        self.mark(dag, pred.right);
    }

    pub fn contains(&self, t: TopId) -> bool {
        self.live.contains(&t)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::VarId;

    #[test]
    fn test_fresh_ids_are_distinct() {
        let mut tops = TopAllocator::new();
        let a = tops.fresh();
        let b = tops.fresh();
        assert_ne!(a, b);
        assert_eq!(tops.len(), 2);
        assert!(!a.is_ephemeral());
    }

    #[test]
    fn test_import_offsets() {
        let mut caller = TopAllocator::new();
        caller.fresh();
        caller.fresh();
        let mut callee = TopAllocator::new();
        let t = callee.fresh();
        let remap = caller.import(&callee);
        assert_eq!(remap.map(t), TopId(2));
        assert_eq!(caller.len(), 3);
        assert_eq!(remap.map(TopId::EPHEMERAL), TopId::EPHEMERAL);
    }

    #[test]
    fn test_shrink_compacts_live_ids() {
        let mut dag = Dag::new();
        let mut tops = TopAllocator::new();
        let _dead = tops.fresh_expr(&mut dag);
        let live = tops.fresh_expr(&mut dag);
        let x = dag.var(VarId(0));
        let e = dag.add(x, live);

        let mut collector = TopCollector::new();
        collector.mark(&dag, e);
        assert_eq!(collector.len(), 1);

        let remap = tops.shrink(&collector);
        assert_eq!(tops.len(), 1);
        let renamed = remap.rewriter().apply(&mut dag, e);
        let t0 = dag.top(TopId(0));
        let expected = dag.add(x, t0);
        assert_eq!(renamed, expected);
    }

    #[test]
    fn test_renaming_never_aliases() {
        let mut tops = TopAllocator { next: i32::MAX - 1 };
        assert_eq!(tops.fresh(), TopId(i32::MAX - 1));
        assert!(tops.fresh().is_ephemeral());

        let mut caller = TopAllocator { next: i32::MAX - 1 };
        let callee = TopAllocator { next: 4 };
        let remap = caller.import(&callee);
        assert_eq!(remap.map(TopId(0)), TopId(i32::MAX - 1));
        assert!(remap.map(TopId(3)).is_ephemeral());

        let mut dag = Dag::new();
        let mut tops = TopAllocator::new();
        let a = tops.fresh_expr(&mut dag);
        let b = tops.fresh_expr(&mut dag);
        let mut collector = TopCollector::new();
        collector.mark(&dag, b);
        let remap = tops.shrink(&collector);
        // `a` was not marked: it must not take over `b`'s new identity
        let Expr::Top(ta) = dag.get(a) else { panic!("not a top") };
        assert!(remap.map(ta).is_ephemeral());
        let Expr::Top(tb) = dag.get(b) else { panic!("not a top") };
        assert_eq!(remap.map(tb), TopId(0));
    }
}
