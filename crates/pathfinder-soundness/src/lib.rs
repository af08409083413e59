//! Generators and reference evaluators shared by the property tests.
//!
//! A [`Term`] is an arithmetic expression kept outside the DAG, so it can be
//! evaluated directly and compared with whatever the smart constructors
//! turned it into. [`Comparison`]s over two registers feed the search
//! properties, which check solver answers against a brute-force model search.

use pathfinder_dag::{BinaryOp, Dag, Expr, ExprId, PredId, PredOp, TopAllocator, UnaryOp, VarId};
use pathfinder_state::State;
use proptest::prelude::*;

#[derive(Clone, Debug)]
pub enum Term {
    Var(i32),
    Const(i32),
    Neg(Box<Term>),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
    Scale(Box<Term>, i32),
    Div(Box<Term>, i32),
    Rem(Box<Term>, i32),
    /// Non-negative remainder by a power of two.
    EuclidMod(Box<Term>, i32),
    /// Quotient rounded toward minus infinity, by a power of two.
    FloorDiv(Box<Term>, i32),
}

impl Term {
    /// Intern through the simplifying constructors.
    pub fn build(&self, dag: &mut Dag) -> ExprId {
        match self {
            Term::Var(v) => dag.var(VarId(*v)),
            Term::Const(k) => dag.cst(*k),
            Term::Neg(a) => {
                let a = a.build(dag);
                dag.neg(a)
            }
            Term::Add(a, b) => {
                let (a, b) = (a.build(dag), b.build(dag));
                dag.add(a, b)
            }
            Term::Sub(a, b) => {
                let (a, b) = (a.build(dag), b.build(dag));
                dag.sub(a, b)
            }
            Term::Mul(a, b) => {
                let (a, b) = (a.build(dag), b.build(dag));
                dag.mul(a, b)
            }
            Term::Scale(a, k) => {
                let a = a.build(dag);
                dag.mul_const(a, *k)
            }
            Term::Div(a, k) => {
                let a = a.build(dag);
                let k = dag.cst(*k);
                dag.div(a, k)
            }
            Term::Rem(a, k) => {
                let a = a.build(dag);
                let k = dag.cst(*k);
                dag.modulo(a, k)
            }
            Term::EuclidMod(a, p) => {
                let a = a.build(dag);
                dag.euclid_mod(a, *p)
            }
            Term::FloorDiv(a, p) => {
                let a = a.build(dag);
                dag.floor_div(a, *p)
            }
        }
    }

    /// Value under `env`, or `None` if an intermediate result leaves the
    /// 32-bit range.
    pub fn eval(&self, env: &[i64]) -> Option<i64> {
        let v = match self {
            Term::Var(v) => *env.get(*v as usize)?,
            Term::Const(k) => *k as i64,
            Term::Neg(a) => a.eval(env)?.checked_neg()?,
            Term::Add(a, b) => a.eval(env)?.checked_add(b.eval(env)?)?,
            Term::Sub(a, b) => a.eval(env)?.checked_sub(b.eval(env)?)?,
            Term::Mul(a, b) => a.eval(env)?.checked_mul(b.eval(env)?)?,
            Term::Scale(a, k) => a.eval(env)?.checked_mul(*k as i64)?,
            Term::Div(a, k) => a.eval(env)?.checked_div(*k as i64)?,
            Term::Rem(a, k) => a.eval(env)?.checked_rem(*k as i64)?,
            Term::EuclidMod(a, p) => a.eval(env)?.checked_rem_euclid(*p as i64)?,
            Term::FloorDiv(a, p) => a.eval(env)?.checked_div_euclid(*p as i64)?,
        };
        i32::try_from(v).ok().map(i64::from)
    }
}

/// Value of a DAG expression under `env`, over unbounded integers with
/// truncating division. `None` for leaves with no value in `env` and for
/// division by zero.
pub fn eval_expr(dag: &Dag, e: ExprId, env: &[i64]) -> Option<i64> {
    match dag.get(e) {
        Expr::Const(c) => c.as_absolute().map(i64::from),
        Expr::Var(v) => usize::try_from(v.0).ok().and_then(|i| env.get(i).copied()),
        Expr::Mem(_) | Expr::Top(_) | Expr::Iter(_) => None,
        Expr::Unary(UnaryOp::Neg, a) => eval_expr(dag, a, env)?.checked_neg(),
        Expr::Binary(op, a, b) => {
            let (a, b) = (eval_expr(dag, a, env)?, eval_expr(dag, b, env)?);
            match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod => a.checked_rem(b),
                BinaryOp::MulHigh | BinaryOp::Cmp => None,
            }
        }
    }
}

fn boxed2(a: Term, b: Term) -> (Box<Term>, Box<Term>) {
    (Box::new(a), Box::new(b))
}

fn divisor() -> impl Strategy<Value = i32> {
    prop_oneof![-4i32..=-1, 1i32..=4]
}

/// Factors and divisors at the edges of the 32-bit range.
pub fn extreme_constant() -> impl Strategy<Value = i32> {
    prop::sample::select(vec![i32::MIN, i32::MIN + 1, -2, -1, 1, 2, i32::MAX])
}

fn power_of_two() -> impl Strategy<Value = i32> {
    prop::sample::select(vec![2, 4, 8])
}

fn leaf(vars: i32) -> BoxedStrategy<Term> {
    prop_oneof![
        2 => (0..vars).prop_map(Term::Var),
        1 => (-6i32..=6).prop_map(Term::Const),
    ]
    .boxed()
}

/// Terms over `vars` registers using every operator the simplifier knows.
pub fn term(vars: i32, depth: u32) -> BoxedStrategy<Term> {
    leaf(vars)
        .prop_recursive(depth, 32, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(|a| Term::Neg(Box::new(a))),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| {
                    let (a, b) = boxed2(a, b);
                    Term::Add(a, b)
                }),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| {
                    let (a, b) = boxed2(a, b);
                    Term::Sub(a, b)
                }),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| {
                    let (a, b) = boxed2(a, b);
                    Term::Mul(a, b)
                }),
                (inner.clone(), -4i32..=4).prop_map(|(a, k)| Term::Scale(Box::new(a), k)),
                (inner.clone(), divisor()).prop_map(|(a, k)| Term::Div(Box::new(a), k)),
                (inner.clone(), divisor()).prop_map(|(a, k)| Term::Rem(Box::new(a), k)),
                (inner.clone(), power_of_two()).prop_map(|(a, p)| Term::EuclidMod(Box::new(a), p)),
                (inner, power_of_two()).prop_map(|(a, p)| Term::FloorDiv(Box::new(a), p)),
            ]
        })
        .boxed()
}

/// Affine terms: sums, differences, negations and constant factors.
pub fn linear_term(vars: i32, depth: u32) -> BoxedStrategy<Term> {
    leaf(vars)
        .prop_recursive(depth, 24, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(|a| Term::Neg(Box::new(a))),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| {
                    let (a, b) = boxed2(a, b);
                    Term::Add(a, b)
                }),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| {
                    let (a, b) = boxed2(a, b);
                    Term::Sub(a, b)
                }),
                (inner, -4i32..=4).prop_map(|(a, k)| Term::Scale(Box::new(a), k)),
            ]
        })
        .boxed()
}

pub fn env(vars: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-16i64..=16, vars)
}

// ─── Comparisons over two registers ───

/// Operand of a [`Comparison`]: register 0, register 1, or a small constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(i32),
    Const(i32),
}

impl Operand {
    fn build(self, dag: &mut Dag) -> ExprId {
        match self {
            Operand::Reg(r) => dag.var(VarId(r)),
            Operand::Const(k) => dag.cst(k),
        }
    }

    fn value(self, model: (i64, i64)) -> i64 {
        match self {
            Operand::Reg(0) => model.0,
            Operand::Reg(_) => model.1,
            Operand::Const(k) => k as i64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Comparison {
    pub op: PredOp,
    pub left: Operand,
    pub right: Operand,
}

impl Comparison {
    pub fn build(&self, dag: &mut Dag) -> PredId {
        let l = self.left.build(dag);
        let r = self.right.build(dag);
        dag.pred(self.op, l, r)
    }

    pub fn holds(&self, model: (i64, i64)) -> bool {
        let (l, r) = (self.left.value(model), self.right.value(model));
        match self.op {
            PredOp::Lt => l < r,
            PredOp::Le => l <= r,
            PredOp::Eq => l == r,
            PredOp::Ne => l != r,
        }
    }
}

/// Whether some integer assignment satisfies every comparison. The truth of
/// a comparison only depends on how the two registers are ordered against
/// each other and against the constants in `-3..=3`, so a small window of
/// values covers every case.
pub fn satisfiable(comparisons: &[Comparison]) -> bool {
    (-12i64..=12).any(|x| (-12i64..=12).any(|y| comparisons.iter().all(|c| c.holds((x, y)))))
}

fn operand() -> impl Strategy<Value = Operand> {
    prop_oneof![
        3 => (0i32..2).prop_map(Operand::Reg),
        1 => (-3i32..=3).prop_map(Operand::Const),
    ]
}

fn pred_op() -> impl Strategy<Value = PredOp> {
    prop::sample::select(vec![PredOp::Lt, PredOp::Le, PredOp::Eq, PredOp::Ne])
}

pub fn comparison() -> impl Strategy<Value = Comparison> {
    (pred_op(), operand(), operand()).prop_map(|(op, left, right)| Comparison { op, left, right })
}

// ─── Loop bodies ───

/// Effect of one loop iteration on a register.
#[derive(Clone, Copy, Debug)]
pub enum Update {
    /// `r += k`
    Step(i32),
    /// `r = other + k`
    Copy(i32, i32),
    /// `r = k`
    Set(i32),
    /// `r *= k`
    Scale(i32),
    /// `r = *p` through an unknown pointer: a fresh unknown per iteration.
    Load,
    /// Left alone.
    Keep,
}

/// Body state applying `updates[i]` to register `i`.
pub fn body_state(dag: &mut Dag, tops: &mut TopAllocator, updates: &[Update]) -> State {
    let mut s = State::new();
    for (i, u) in updates.iter().enumerate() {
        let v = VarId(i as i32);
        let e = match *u {
            Update::Step(k) => {
                let r = dag.var(v);
                dag.add_const(r, k)
            }
            Update::Copy(other, k) => {
                let r = dag.var(VarId(other));
                dag.add_const(r, k)
            }
            Update::Set(k) => dag.cst(k),
            Update::Scale(k) => {
                let r = dag.var(v);
                dag.mul_const(r, k)
            }
            Update::Load => tops.fresh_expr(dag),
            Update::Keep => continue,
        };
        s.set_local(v, e);
    }
    s
}

pub fn update(registers: i32) -> impl Strategy<Value = Update> {
    prop_oneof![
        3 => (-3i32..=3).prop_map(Update::Step),
        1 => (0..registers, -2i32..=2).prop_map(|(r, k)| Update::Copy(r, k)),
        1 => (-3i32..=3).prop_map(Update::Set),
        1 => (2i32..=3).prop_map(Update::Scale),
        1 => Just(Update::Load),
        1 => Just(Update::Keep),
    ]
}
