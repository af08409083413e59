//! The hash-consing arena.
//!
//! Every expression and predicate lives in one [`Dag`]. Nodes are appended to
//! an arena and indexed by content, so interning the same node twice returns
//! the same handle and equality of handles is structural equality.
//!
//! The raw constructors here only canonicalize operand order. Folding lives
//! in the smart constructors (`add`, `sub`, `mul`, ...) of [`crate::arith`].

use crate::constant::Constant;
use crate::expr::{BinaryOp, Expr, ExprId, LoopId, TopId, UnaryOp, VarId};
use crate::predicate::{PredId, Predicate};
use ahash::AHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Arena of interned expressions and predicates.
#[derive(Default)]
pub struct Dag {
    nodes: Vec<Expr>,
    index: AHashMap<Expr, ExprId>,
    preds: Vec<Predicate>,
    pred_index: AHashMap<Predicate, PredId>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned expressions.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of interned predicates.
    pub fn predicate_count(&self) -> usize {
        self.preds.len()
    }

    #[inline]
    pub fn get(&self, e: ExprId) -> Expr {
        self.nodes[e.index()]
    }

    #[inline]
    pub fn predicate(&self, p: PredId) -> Predicate {
        self.preds[p.index()]
    }

    /// Return the unique handle for `node`, creating it on first request.
    pub fn intern(&mut self, node: Expr) -> ExprId {
        let node = match node {
            Expr::Binary(op, a, b) if op.is_commutative() && self.order(a, b) == Ordering::Greater => {
                Expr::Binary(op, b, a)
            }
            Expr::Const(c) if !c.is_valid() => Expr::Const(Constant::INVALID),
            other => other,
        };
        if let Some(&id) = self.index.get(&node) {
            return id;
        }
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(node);
        self.index.insert(node, id);
        id
    }

    pub(crate) fn intern_predicate(&mut self, pred: Predicate) -> PredId {
        if let Some(&id) = self.pred_index.get(&pred) {
            return id;
        }
        let id = PredId(self.preds.len() as u32);
        self.preds.push(pred);
        self.pred_index.insert(pred, id);
        id
    }

    /// Total order over expressions: node rank first, then arena position.
    pub fn order(&self, a: ExprId, b: ExprId) -> Ordering {
        self.get(a)
            .rank()
            .cmp(&self.get(b).rank())
            .then_with(|| a.cmp(&b))
    }

    // === Leaves ===

    pub fn cst(&mut self, c: impl Into<Constant>) -> ExprId {
        self.intern(Expr::Const(c.into()))
    }

    pub fn var(&mut self, v: VarId) -> ExprId {
        self.intern(Expr::Var(v))
    }

    pub fn mem(&mut self, addr: Constant) -> ExprId {
        self.intern(Expr::Mem(addr))
    }

    pub fn top(&mut self, id: TopId) -> ExprId {
        self.intern(Expr::Top(id))
    }

    /// The ephemeral unknown: every occurrence may stand for a different value.
    pub fn ephemeral_top(&mut self) -> ExprId {
        self.intern(Expr::Top(TopId::EPHEMERAL))
    }

    pub fn iter(&mut self, l: LoopId) -> ExprId {
        self.intern(Expr::Iter(l))
    }

    // === Unfolded interior nodes ===

    pub fn raw_unary(&mut self, op: UnaryOp, a: ExprId) -> ExprId {
        self.intern(Expr::Unary(op, a))
    }

    pub fn raw_binary(&mut self, op: BinaryOp, a: ExprId, b: ExprId) -> ExprId {
        self.intern(Expr::Binary(op, a, b))
    }

    // === Inspection helpers ===

    #[inline]
    pub fn as_const(&self, e: ExprId) -> Option<Constant> {
        self.get(e).as_const()
    }

    #[inline]
    pub fn is_ephemeral_top(&self, e: ExprId) -> bool {
        matches!(self.get(e), Expr::Top(t) if t.is_ephemeral())
    }

    /// Printable view of an expression.
    pub fn show(&self, e: ExprId) -> Show<'_> {
        Show { dag: self, e }
    }

    fn fmt_expr(&self, e: ExprId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get(e) {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Mem(addr) => write!(f, "[{addr}]"),
            Expr::Top(t) => write!(f, "{t}"),
            Expr::Iter(l) => write!(f, "{l}"),
            Expr::Unary(UnaryOp::Neg, a) => {
                write!(f, "-")?;
                self.fmt_expr(a, f)
            }
            Expr::Binary(op, a, b) => {
                write!(f, "(")?;
                self.fmt_expr(a, f)?;
                write!(f, " {} ", op.symbol())?;
                self.fmt_expr(b, f)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Debug for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dag")
            .field("expressions", &self.nodes.len())
            .field("predicates", &self.preds.len())
            .finish()
    }
}

/// Display adapter returned by [`Dag::show`].
pub struct Show<'a> {
    dag: &'a Dag,
    e: ExprId,
}

impl fmt::Display for Show<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dag.fmt_expr(self.e, f)
    }
}

/// The DAG shared between workers, behind one coarse lock.
#[derive(Clone, Default)]
pub struct SharedDag(Arc<Mutex<Dag>>);

impl SharedDag {
    pub fn new(dag: Dag) -> Self {
        SharedDag(Arc::new(Mutex::new(dag)))
    }

    /// Lock the DAG. The arena is append-only, so a panic in another holder
    /// cannot leave it inconsistent and poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Dag> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the DAG locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Dag) -> R) -> R {
        f(&mut self.lock())
    }
}

impl fmt::Debug for SharedDag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedDag({:?})", *self.lock())
    }
}
