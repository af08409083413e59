//! Edge labels attached to predicates.

use crate::predicate::PredId;
use std::collections::BTreeSet;
use std::fmt;

/// Identity of a CFG edge, unique within one analysis unit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct EdgeId(pub u32);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Ordered set of edges, used for labels and for reported paths.
pub type EdgeSet = BTreeSet<EdgeId>;

/// A predicate together with the edges that must be taken for it to hold.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct LabelledPredicate {
    pub pred: PredId,
    pub labels: EdgeSet,
}

impl LabelledPredicate {
    /// Freshly generated predicate: no edge required yet.
    pub fn new(pred: PredId) -> Self {
        LabelledPredicate {
            pred,
            labels: EdgeSet::new(),
        }
    }

    pub fn with_labels(pred: PredId, labels: EdgeSet) -> Self {
        LabelledPredicate { pred, labels }
    }

    pub fn add_label(&mut self, edge: EdgeId) {
        self.labels.insert(edge);
    }

    /// True when every label of this predicate is in `edges`.
    pub fn holds_within(&self, edges: &EdgeSet) -> bool {
        self.labels.is_subset(edges)
    }
}

/// Display an edge set as `{e1, e2}`.
pub fn show_edges(edges: &EdgeSet) -> String {
    let inner: Vec<String> = edges.iter().map(|e| e.to_string()).collect();
    format!("{{{}}}", inner.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Dag;
    use crate::expr::VarId;
    use crate::predicate::PredOp;

    #[test]
    fn test_labels_accumulate() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let one = dag.cst(1);
        let p = dag.pred(PredOp::Lt, x, one);
        let mut lp = LabelledPredicate::new(p);
        assert!(lp.labels.is_empty());
        lp.add_label(EdgeId(3));
        lp.add_label(EdgeId(1));
        lp.add_label(EdgeId(3));
        assert_eq!(show_edges(&lp.labels), "{e1, e3}");
    }

    #[test]
    fn test_holds_within() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let p = dag.pred(PredOp::Eq, x, x);
        let lp = LabelledPredicate::with_labels(p, [EdgeId(1), EdgeId(2)].into());
        assert!(lp.holds_within(&[EdgeId(1), EdgeId(2), EdgeId(5)].into()));
        assert!(!lp.holds_within(&[EdgeId(1)].into()));
        assert!(LabelledPredicate::new(p).holds_within(&EdgeSet::new()));
    }
}
