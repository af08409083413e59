//! Translation of DAG expressions and predicates to Z3 integer terms.

use ahash::AHashMap;
use pathfinder_dag::{BinaryOp, Constant, ConstantKind, Dag, Expr, ExprId, LoopId, PredId, PredOp, Predicate, Sign, UnaryOp};
use std::collections::BTreeSet;
use z3::ast::{Bool, Int};

/// Memoizing encoder. Terms live in the calling thread's Z3 context, so an
/// encoder must be used on the thread that solves.
pub struct Encoder {
    cache: AHashMap<ExprId, Option<Int>>,
    sp: Int,
    iters: BTreeSet<LoopId>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            cache: AHashMap::new(),
            sp: Int::new_const("sp"),
            iters: BTreeSet::new(),
        }
    }

    /// Encode a predicate. `None` when either side is incomplete: an
    /// ephemeral Top, an undecoded comparison or an invalid constant.
    pub fn predicate(&mut self, dag: &Dag, p: PredId) -> Option<Bool> {
        let Predicate { op, left, right } = dag.predicate(p);
        let l = self.expr(dag, left)?;
        let r = self.expr(dag, right)?;
        Some(match op {
            PredOp::Lt => l.lt(&r),
            PredOp::Le => l.le(&r),
            PredOp::Eq => l.eq(&r),
            PredOp::Ne => l.eq(&r).not(),
        })
    }

    /// Iteration counters are never negative.
    pub fn side_constraints(&self) -> Vec<Bool> {
        let zero = Int::from_i64(0);
        self.iters
            .iter()
            .map(|l| Int::new_const(format!("n{}", l.0)).ge(&zero))
            .collect()
    }

    pub fn expr(&mut self, dag: &Dag, e: ExprId) -> Option<Int> {
        if let Some(cached) = self.cache.get(&e) {
            return cached.clone();
        }
        let encoded = self.encode_node(dag, e);
        self.cache.insert(e, encoded.clone());
        encoded
    }

    fn encode_node(&mut self, dag: &Dag, e: ExprId) -> Option<Int> {
        match dag.get(e) {
            Expr::Const(c) => self.constant(c),
            Expr::Var(v) if v.is_temporary() => Some(Int::new_const(format!("t{}", -v.0))),
            Expr::Var(v) => Some(Int::new_const(format!("r{}", v.0))),
            Expr::Mem(addr) => Some(Int::new_const(format!("[{addr}]"))),
            Expr::Top(t) if t.is_ephemeral() => None,
            Expr::Top(t) => Some(Int::new_const(format!("T{}", t.0))),
            Expr::Iter(l) => {
                self.iters.insert(l);
                Some(Int::new_const(format!("n{}", l.0)))
            }
            Expr::Unary(UnaryOp::Neg, a) => Some(self.expr(dag, a)?.unary_minus()),
            Expr::Binary(BinaryOp::Cmp, ..) => None,
            Expr::Binary(op, a, b) => {
                let x = self.expr(dag, a)?;
                let y = self.expr(dag, b)?;
                Some(match op {
                    BinaryOp::Add => Int::add(&[x, y]),
                    BinaryOp::Sub => Int::sub(&[x, y]),
                    BinaryOp::Mul => Int::mul(&[x, y]),
                    BinaryOp::MulHigh => Int::mul(&[x, y]).div(&Int::from_i64(1i64 << 32)),
                    BinaryOp::Div => trunc_div(&x, &y),
                    BinaryOp::Mod => {
                        let q = trunc_div(&x, &y);
                        Int::sub(&[x, Int::mul(&[y, q])])
                    }
                    BinaryOp::Cmp => return None,
                })
            }
        }
    }

    fn constant(&self, c: Constant) -> Option<Int> {
        let k = Int::from_i64(c.value() as i64);
        match c.kind() {
            ConstantKind::Invalid => None,
            ConstantKind::Absolute => Some(k),
            ConstantKind::StackRelative(Sign::Plus) => Some(Int::add(&[self.sp.clone(), k])),
            ConstantKind::StackRelative(Sign::Minus) => Some(Int::sub(&[k, self.sp.clone()])),
        }
    }
}

/// Division rounding toward zero, as the machine does. Z3's `div` rounds
/// so that the remainder is non-negative.
fn trunc_div(x: &Int, y: &Int) -> Int {
    let zero = Int::from_i64(0);
    let non_negative = x.ge(&zero);
    let down = x.div(y);
    let up = x.unary_minus().div(y).unary_minus();
    non_negative.ite(&down, &up)
}
