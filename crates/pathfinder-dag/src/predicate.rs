//! Hash-consed predicates over expressions.

use crate::dag::Dag;
use crate::expr::ExprId;
use std::cmp::Ordering;
use std::fmt;

/// Handle to an interned predicate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredId(pub(crate) u32);

impl PredId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum PredOp {
    Lt,
    Le,
    Eq,
    Ne,
}

impl PredOp {
    pub fn is_symmetric(self) -> bool {
        matches!(self, PredOp::Eq | PredOp::Ne)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            PredOp::Lt => "<",
            PredOp::Le => "<=",
            PredOp::Eq => "=",
            PredOp::Ne => "!=",
        }
    }

    fn holds(self, l: i32, r: i32) -> bool {
        match self {
            PredOp::Lt => l < r,
            PredOp::Le => l <= r,
            PredOp::Eq => l == r,
            PredOp::Ne => l != r,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Predicate {
    pub op: PredOp,
    pub left: ExprId,
    pub right: ExprId,
}

/// Machine condition code attached to an `IF` micro-op.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned variants.
    ULt,
    ULe,
    UGt,
    UGe,
    /// Always true: no predicate.
    Any,
}

impl Condition {
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Condition::ULt | Condition::ULe | Condition::UGt | Condition::UGe
        )
    }

    pub fn inverse(self) -> Condition {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::Lt => Condition::Ge,
            Condition::Le => Condition::Gt,
            Condition::Gt => Condition::Le,
            Condition::Ge => Condition::Lt,
            Condition::ULt => Condition::UGe,
            Condition::ULe => Condition::UGt,
            Condition::UGt => Condition::ULe,
            Condition::UGe => Condition::ULt,
            Condition::Any => Condition::Any,
        }
    }
}

impl Dag {
    /// Intern `left op right`. Symmetric operators order their operands.
    pub fn pred(&mut self, op: PredOp, left: ExprId, right: ExprId) -> PredId {
        let (left, right) = if op.is_symmetric() && self.order(left, right) == Ordering::Greater {
            (right, left)
        } else {
            (left, right)
        };
        self.intern_predicate(Predicate { op, left, right })
    }

    /// Predicate stating that `cond` holds (or, when `taken` is false, fails)
    /// between `left` and `right`. Unsigned conditions are not expressible
    /// over the solver's integers and yield `None`, as does `Any`.
    pub fn from_condition(
        &mut self,
        cond: Condition,
        left: ExprId,
        right: ExprId,
        taken: bool,
    ) -> Option<PredId> {
        let cond = if taken { cond } else { cond.inverse() };
        let p = match cond {
            Condition::Eq => self.pred(PredOp::Eq, left, right),
            Condition::Ne => self.pred(PredOp::Ne, left, right),
            Condition::Lt => self.pred(PredOp::Lt, left, right),
            Condition::Le => self.pred(PredOp::Le, left, right),
            Condition::Gt => self.pred(PredOp::Lt, right, left),
            Condition::Ge => self.pred(PredOp::Le, right, left),
            _ => return None,
        };
        Some(p)
    }

    /// Logical negation: `!(a < b)` is `b <= a`, `!(a = b)` is `a != b`.
    pub fn negate(&mut self, p: PredId) -> PredId {
        let Predicate { op, left, right } = self.predicate(p);
        match op {
            PredOp::Lt => self.pred(PredOp::Le, right, left),
            PredOp::Le => self.pred(PredOp::Lt, right, left),
            PredOp::Eq => self.pred(PredOp::Ne, left, right),
            PredOp::Ne => self.pred(PredOp::Eq, left, right),
        }
    }

    /// Same predicate with both sides rewritten through `f`.
    pub fn map_predicate(&mut self, p: PredId, mut f: impl FnMut(&mut Dag, ExprId) -> ExprId) -> PredId {
        let Predicate { op, left, right } = self.predicate(p);
        let l = f(self, left);
        let r = f(self, right);
        self.pred(op, l, r)
    }

    /// True for `a = a`, `a <= a`, and relations between absolute constants
    /// that hold.
    pub fn is_tautology(&self, p: PredId) -> bool {
        let Predicate { op, left, right } = self.predicate(p);
        if left == right {
            return matches!(op, PredOp::Eq | PredOp::Le);
        }
        self.absolute_operands(left, right)
            .is_some_and(|(l, r)| op.holds(l, r))
    }

    /// True for `a < a`, `a != a`, and relations between absolute constants
    /// that fail.
    pub fn is_contradiction(&self, p: PredId) -> bool {
        let Predicate { op, left, right } = self.predicate(p);
        if left == right {
            return matches!(op, PredOp::Lt | PredOp::Ne);
        }
        self.absolute_operands(left, right)
            .is_some_and(|(l, r)| !op.holds(l, r))
    }

    fn absolute_operands(&self, left: ExprId, right: ExprId) -> Option<(i32, i32)> {
        let l = self.as_const(left)?.as_absolute()?;
        let r = self.as_const(right)?.as_absolute()?;
        Some((l, r))
    }

    /// Printable view of a predicate.
    pub fn show_predicate(&self, p: PredId) -> ShowPredicate<'_> {
        ShowPredicate { dag: self, p }
    }
}

pub struct ShowPredicate<'a> {
    dag: &'a Dag,
    p: PredId,
}

impl fmt::Display for ShowPredicate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Predicate { op, left, right } = self.dag.predicate(self.p);
        write!(
            f,
            "{} {} {}",
            self.dag.show(left),
            op.symbol(),
            self.dag.show(right)
        )
    }
}
