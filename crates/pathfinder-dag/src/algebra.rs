//! Structural queries and rewrites over expressions and predicates.

use crate::constant::{Constant, ConstantKind};
use crate::dag::Dag;
use crate::expr::{BinaryOp, Expr, ExprId, LoopId, UnaryOp, VarId};
use crate::predicate::{PredId, PredOp, Predicate};
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

/// `sum(coefficient * atom) + sp * SP + delta`. Atoms are leaves or
/// non-affine subterms, kept sorted by handle with no zero coefficient.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AffineForm {
    pub terms: SmallVec<[(ExprId, i32); 4]>,
    pub sp: i32,
    pub delta: i32,
}

impl AffineForm {
    pub fn coefficient(&self, atom: ExprId) -> i32 {
        self.terms
            .iter()
            .find(|(a, _)| *a == atom)
            .map_or(0, |(_, c)| *c)
    }

    /// Same form with `atom` removed.
    pub fn without(&self, atom: ExprId) -> AffineForm {
        AffineForm {
            terms: self.terms.iter().copied().filter(|(a, _)| *a != atom).collect(),
            sp: self.sp,
            delta: self.delta,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    fn add_term(&mut self, atom: ExprId, coefficient: i32) {
        match self.terms.binary_search_by_key(&atom, |(a, _)| *a) {
            Ok(i) => {
                let c = self.terms[i].1.wrapping_add(coefficient);
                if c == 0 {
                    self.terms.remove(i);
                } else {
                    self.terms[i].1 = c;
                }
            }
            Err(i) if coefficient != 0 => self.terms.insert(i, (atom, coefficient)),
            Err(_) => {}
        }
    }
}

/// Memoized bottom-up rewrite. `f` is asked first at every node; `Some`
/// replaces the whole subtree, `None` recurses into the children and rebuilds
/// the node through the smart constructors.
pub struct Rewriter<F> {
    f: F,
    memo: AHashMap<ExprId, ExprId>,
}

impl<F> Rewriter<F>
where
    F: FnMut(&mut Dag, ExprId) -> Option<ExprId>,
{
    pub fn new(f: F) -> Self {
        Rewriter {
            f,
            memo: AHashMap::new(),
        }
    }

    pub fn apply(&mut self, dag: &mut Dag, e: ExprId) -> ExprId {
        if let Some(&r) = self.memo.get(&e) {
            return r;
        }
        let r = match (self.f)(dag, e) {
            Some(r) => r,
            None => match dag.get(e) {
                Expr::Unary(op, a) => {
                    let a2 = self.apply(dag, a);
                    if a2 == a {
                        e
                    } else {
                        dag.unary(op, a2)
                    }
                }
                Expr::Binary(op, a, b) => {
                    let a2 = self.apply(dag, a);
                    let b2 = self.apply(dag, b);
                    if a2 == a && b2 == b {
                        e
                    } else {
                        dag.binary(op, a2, b2)
                    }
                }
                _ => e,
            },
        };
        self.memo.insert(e, r);
        r
    }

    pub fn apply_predicate(&mut self, dag: &mut Dag, p: PredId) -> PredId {
        let Predicate { op, left, right } = dag.predicate(p);
        let l = self.apply(dag, left);
        let r = self.apply(dag, right);
        if l == left && r == right {
            p
        } else {
            dag.pred(op, l, r)
        }
    }
}

impl Dag {
    // === Leaf queries ===

    /// True if some node reachable from `e` (itself included) satisfies `f`.
    pub fn any_node(&self, e: ExprId, mut f: impl FnMut(Expr) -> bool) -> bool {
        let mut seen = AHashSet::new();
        let mut stack: SmallVec<[ExprId; 16]> = SmallVec::new();
        stack.push(e);
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let node = self.get(id);
            if f(node) {
                return true;
            }
            match node {
                Expr::Unary(_, a) => stack.push(a),
                Expr::Binary(_, a, b) => {
                    stack.push(a);
                    stack.push(b);
                }
                _ => {}
            }
        }
        false
    }

    /// Call `f` once on every distinct leaf reachable from `e`.
    pub fn for_each_leaf(&self, e: ExprId, mut f: impl FnMut(Expr)) {
        self.any_node(e, |node| {
            if node.is_leaf() {
                f(node);
            }
            false
        });
    }

    pub fn involves_variable(&self, e: ExprId, v: VarId) -> bool {
        self.any_node(e, |n| n == Expr::Var(v))
    }

    pub fn involves_any_variable(&self, e: ExprId) -> bool {
        self.any_node(e, |n| matches!(n, Expr::Var(_)))
    }

    pub fn involves_memory(&self, e: ExprId, addr: Constant) -> bool {
        self.any_node(e, |n| n == Expr::Mem(addr))
    }

    pub fn involves_any_memory(&self, e: ExprId) -> bool {
        self.any_node(e, |n| matches!(n, Expr::Mem(_)))
    }

    pub fn involves_top(&self, e: ExprId) -> bool {
        self.any_node(e, |n| matches!(n, Expr::Top(_)))
    }

    pub fn involves_temporary(&self, e: ExprId) -> bool {
        self.any_node(e, |n| matches!(n, Expr::Var(v) if v.is_temporary()))
    }

    pub fn involves_iter(&self, e: ExprId, l: LoopId) -> bool {
        self.any_node(e, |n| n == Expr::Iter(l))
    }

    /// First stack cell below `limit` (an `SP+k` constant) read by `e`.
    pub fn involves_stack_below(&self, e: ExprId, limit: Constant) -> Option<Constant> {
        let mut found = None;
        self.any_node(e, |n| match n {
            Expr::Mem(addr) if below_stack(addr, limit) => {
                found = Some(addr);
                true
            }
            _ => false,
        });
        found
    }

    /// No ephemeral Top, no undecoded comparison, no invalid constant.
    pub fn is_complete(&self, e: ExprId) -> bool {
        !self.any_node(e, |n| match n {
            Expr::Top(t) => t.is_ephemeral(),
            Expr::Binary(BinaryOp::Cmp, ..) => true,
            Expr::Const(c) => !c.is_valid(),
            _ => false,
        })
    }

    /// Linear integer arithmetic: products and divisions need a constant side.
    pub fn is_linear(&self, e: ExprId) -> bool {
        !self.any_node(e, |n| match n {
            Expr::Binary(BinaryOp::Mul, a, b) => {
                self.as_const(a).is_none() && self.as_const(b).is_none()
            }
            Expr::Binary(BinaryOp::Div | BinaryOp::Mod, _, b) => self.as_const(b).is_none(),
            Expr::Binary(BinaryOp::MulHigh, ..) => true,
            _ => false,
        })
    }

    /// Sum and difference of `x` and constants only.
    pub fn is_affine_in(&self, e: ExprId, x: ExprId) -> bool {
        if e == x {
            return true;
        }
        match self.get(e) {
            Expr::Const(c) => c.is_valid(),
            Expr::Binary(BinaryOp::Add | BinaryOp::Sub, a, b) => {
                self.is_affine_in(a, x) && self.is_affine_in(b, x)
            }
            _ => false,
        }
    }

    /// Node count of the expression tree, shared subterms counted once per
    /// occurrence. Saturates.
    pub fn count(&self, e: ExprId) -> usize {
        fn go(dag: &Dag, e: ExprId, memo: &mut AHashMap<ExprId, usize>) -> usize {
            if let Some(&n) = memo.get(&e) {
                return n;
            }
            let n = match dag.get(e) {
                Expr::Unary(_, a) => go(dag, a, memo).saturating_add(1),
                Expr::Binary(_, a, b) => go(dag, a, memo)
                    .saturating_add(go(dag, b, memo))
                    .saturating_add(1),
                _ => 1,
            };
            memo.insert(e, n);
            n
        }
        go(self, e, &mut AHashMap::new())
    }

    /// Number of distinct temporaries read by `e`.
    pub fn count_temp_vars(&self, e: ExprId) -> usize {
        let mut temps: SmallVec<[VarId; 4]> = SmallVec::new();
        self.for_each_leaf(e, |n| {
            if let Expr::Var(v) = n {
                if v.is_temporary() && !temps.contains(&v) {
                    temps.push(v);
                }
            }
        });
        temps.len()
    }

    // === Evaluation ===

    /// The value of `e` when every leaf is a constant.
    pub fn eval_constant(&self, e: ExprId) -> Option<Constant> {
        let c = match self.get(e) {
            Expr::Const(c) => c,
            Expr::Var(_) | Expr::Mem(_) | Expr::Top(_) | Expr::Iter(_) => return None,
            Expr::Unary(UnaryOp::Neg, a) => -self.eval_constant(a)?,
            Expr::Binary(op, a, b) => {
                let x = self.eval_constant(a)?;
                let y = self.eval_constant(b)?;
                match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Mod => x % y,
                    BinaryOp::MulHigh => {
                        let (x, y) = (x.as_absolute()?, y.as_absolute()?);
                        Constant::absolute(((x as i64 * y as i64) >> 32) as i32)
                    }
                    BinaryOp::Cmp => return None,
                }
            }
        };
        c.is_valid().then_some(c)
    }

    /// Decompose `e` into an affine form. `None` when `e` is not complete.
    pub fn parse_affine(&self, e: ExprId) -> Option<AffineForm> {
        if !self.is_complete(e) {
            return None;
        }
        let mut form = AffineForm::default();
        self.accumulate_affine(e, 1, &mut form);
        Some(form)
    }

    fn accumulate_affine(&self, e: ExprId, scale: i32, form: &mut AffineForm) {
        match self.get(e) {
            Expr::Const(c) => {
                form.delta = form.delta.wrapping_add(c.value().wrapping_mul(scale));
                if let ConstantKind::StackRelative(sign) = c.kind() {
                    form.sp = form.sp.wrapping_add(sign.factor().wrapping_mul(scale));
                }
            }
            Expr::Binary(BinaryOp::Add, a, b) => {
                self.accumulate_affine(a, scale, form);
                self.accumulate_affine(b, scale, form);
            }
            Expr::Binary(BinaryOp::Sub, a, b) => {
                self.accumulate_affine(a, scale, form);
                self.accumulate_affine(b, scale.wrapping_neg(), form);
            }
            Expr::Unary(UnaryOp::Neg, a) => self.accumulate_affine(a, scale.wrapping_neg(), form),
            Expr::Binary(BinaryOp::Mul, a, b) => match self.as_const(b).and_then(Constant::as_absolute) {
                Some(k) => self.accumulate_affine(a, scale.wrapping_mul(k), form),
                None => form.add_term(e, scale),
            },
            _ => form.add_term(e, scale),
        }
    }

    /// Rebuild an expression from its affine form.
    pub fn affine_to_expr(&mut self, form: &AffineForm) -> ExprId {
        let mut acc = self.cst(0);
        for &(atom, c) in &form.terms {
            let term = self.mul_const(atom, c);
            acc = self.add(acc, term);
        }
        if form.sp != 0 {
            let sp = self.cst(Constant::SP);
            let sp_part = self.mul_const(sp, form.sp);
            acc = self.add(acc, sp_part);
        }
        self.add_const(acc, form.delta)
    }

    // === Rewrites ===

    /// Substitute `new` for every occurrence of `old` in `e`.
    pub fn replace(&mut self, e: ExprId, old: ExprId, new: ExprId) -> ExprId {
        Rewriter::new(|_: &mut Dag, x: ExprId| (x == old).then_some(new)).apply(self, e)
    }

    /// One-shot [`Rewriter`].
    pub fn rewrite(
        &mut self,
        e: ExprId,
        f: impl FnMut(&mut Dag, ExprId) -> Option<ExprId>,
    ) -> ExprId {
        Rewriter::new(f).apply(self, e)
    }

    // === Predicate queries ===

    pub fn predicate_any(&self, p: PredId, mut f: impl FnMut(&Dag, ExprId) -> bool) -> bool {
        let Predicate { left, right, .. } = self.predicate(p);
        f(self, left) || f(self, right)
    }

    pub fn predicate_is_complete(&self, p: PredId) -> bool {
        !self.predicate_any(p, |dag, e| !dag.is_complete(e))
    }

    pub fn predicate_involves_temporary(&self, p: PredId) -> bool {
        self.predicate_any(p, |dag, e| dag.involves_temporary(e))
    }

    pub fn predicate_is_linear(&self, p: PredId) -> bool {
        !self.predicate_any(p, |dag, e| !dag.is_linear(e))
    }

    /// `t = g` or `g = t` where `t` is a temporary and `g` reads no temporary.
    pub fn get_isolated_temp_var(&self, p: PredId) -> Option<(VarId, ExprId)> {
        let Predicate { op, left, right } = self.predicate(p);
        if op != PredOp::Eq {
            return None;
        }
        let isolated = |var: ExprId, ground: ExprId| match self.get(var) {
            Expr::Var(t) if t.is_temporary() && !self.involves_temporary(ground) => Some((t, ground)),
            _ => None,
        };
        isolated(left, right).or_else(|| isolated(right, left))
    }
}

fn below_stack(addr: Constant, limit: Constant) -> bool {
    addr.is_relative()
        && addr.sign() == limit.sign()
        && limit.is_relative()
        && addr.value() < limit.value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::TopId;

    #[test]
    fn test_eval_constant() {
        let mut dag = Dag::new();
        let sp = dag.cst(Constant::stack(8));
        let four = dag.cst(4);
        let e = dag.raw_binary(BinaryOp::Sub, sp, four);
        assert_eq!(dag.eval_constant(e), Some(Constant::stack(4)));
        let x = dag.var(VarId(0));
        let e = dag.raw_binary(BinaryOp::Add, x, four);
        assert_eq!(dag.eval_constant(e), None);
        let zero = dag.cst(0);
        let e = dag.raw_binary(BinaryOp::Div, four, zero);
        assert_eq!(dag.eval_constant(e), None);
    }

    #[test]
    fn test_completeness() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let t = dag.top(TopId(3));
        let sum = dag.add(x, t);
        assert!(dag.is_complete(sum));
        let c = dag.cmp(x, t);
        assert!(!dag.is_complete(c));
        let e = dag.ephemeral_top();
        assert!(!dag.is_complete(e));
    }

    #[test]
    fn test_linearity() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let y = dag.var(VarId(1));
        let x3 = dag.mul_const(x, 3);
        assert!(dag.is_linear(x3));
        let xy = dag.mul(x, y);
        assert!(!dag.is_linear(xy));
        let d = dag.div(x, y);
        assert!(!dag.is_linear(d));
    }

    #[test]
    fn test_replace_refolds() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let e = dag.add_const(x, 4);
        let six = dag.cst(6);
        let r = dag.replace(e, x, six);
        assert_eq!(dag.as_const(r), Some(Constant::absolute(10)));
    }

    #[test]
    fn test_affine_form() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let y = dag.var(VarId(1));
        let x3 = dag.mul_const(x, 3);
        let e = dag.sub(x3, y);
        let e = dag.add_const(e, Constant::stack(4));
        let form = dag.parse_affine(e).expect("complete");
        assert_eq!(form.coefficient(x), 3);
        assert_eq!(form.coefficient(y), -1);
        assert_eq!(form.sp, 1);
        assert_eq!(form.delta, 4);
        let rebuilt = dag.affine_to_expr(&form);
        let back = dag.parse_affine(rebuilt).expect("complete");
        assert_eq!(back, form);
    }

    #[test]
    fn test_affine_in() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let y = dag.var(VarId(1));
        let e = dag.add_const(x, 4);
        assert!(dag.is_affine_in(e, x));
        let e = dag.add(x, y);
        assert!(!dag.is_affine_in(e, x));
    }

    #[test]
    fn test_isolated_temporary() {
        let mut dag = Dag::new();
        let t = dag.var(VarId(-1));
        let x = dag.var(VarId(2));
        let g = dag.add_const(x, 1);
        let p = dag.pred(PredOp::Eq, g, t);
        assert_eq!(dag.get_isolated_temp_var(p), Some((VarId(-1), g)));
        let p = dag.pred(PredOp::Lt, t, g);
        assert_eq!(dag.get_isolated_temp_var(p), None);
    }

    #[test]
    fn test_stack_below() {
        let mut dag = Dag::new();
        let low = dag.mem(Constant::stack(-8));
        let high = dag.mem(Constant::stack(4));
        let e = dag.add(low, high);
        assert_eq!(dag.involves_stack_below(e, Constant::SP), Some(Constant::stack(-8)));
        assert_eq!(dag.involves_stack_below(high, Constant::SP), None);
    }

    #[test]
    fn test_count() {
        let mut dag = Dag::new();
        let x = dag.var(VarId(0));
        let y = dag.var(VarId(1));
        let xy = dag.mul(x, y);
        let e = dag.add(xy, xy);
        assert_eq!(dag.count(e), 7);
    }
}
