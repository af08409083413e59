//! Properties of the smart constructors.
//!
//!   1. Simplification preserves the value of every expression.
//!   2. Interning is idempotent: building the same term twice allocates
//!      nothing new and yields the same handle.
//!   3. Addition of affine terms and multiplication are commutative up to
//!      handle identity.
//!   4. Symmetric predicates ignore operand order; negation is an involution.
//!   5. Factors and divisors at the edges of the 32-bit range never trip an
//!      overflow inside the simplifier.

use pathfinder_dag::{Condition, Dag, Expr, PredOp};
use pathfinder_soundness::{env, eval_expr, extreme_constant, linear_term, term, Term};
use proptest::prelude::*;

fn var(v: i32) -> Box<Term> {
    Box::new(Term::Var(v))
}

/// Sums of registers, so that no constant folds with wrap-around.
fn register_sum() -> impl Strategy<Value = Term> {
    prop::sample::select(vec![
        Term::Var(0),
        Term::Neg(var(0)),
        Term::Add(var(0), var(1)),
        Term::Neg(Box::new(Term::Add(var(0), var(1)))),
    ])
}

fn signed_condition() -> impl Strategy<Value = Condition> {
    prop::sample::select(vec![
        Condition::Eq,
        Condition::Ne,
        Condition::Lt,
        Condition::Le,
        Condition::Gt,
        Condition::Ge,
    ])
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 512,
        .. ProptestConfig::default()
    })]

    #[test]
    fn simplification_preserves_values(t in term(3, 3), env in env(3)) {
        let expected = t.eval(&env);
        prop_assume!(expected.is_some());
        let mut dag = Dag::new();
        let e = t.build(&mut dag);
        // the ephemeral Top stands for any value
        prop_assume!(!dag.is_ephemeral_top(e));
        prop_assert_eq!(
            eval_expr(&dag, e, &env),
            expected,
            "{:?} simplified to {}",
            t,
            dag.show(e)
        );
    }

    #[test]
    fn interning_is_idempotent(t in term(3, 3)) {
        let mut dag = Dag::new();
        let first = t.build(&mut dag);
        let size = dag.len();
        let second = t.build(&mut dag);
        prop_assert_eq!(first, second);
        prop_assert_eq!(dag.len(), size);
    }

    #[test]
    fn affine_addition_commutes(a in linear_term(3, 3), b in linear_term(3, 3)) {
        let mut dag = Dag::new();
        let x = a.build(&mut dag);
        let y = b.build(&mut dag);
        let xy = dag.add(x, y);
        let yx = dag.add(y, x);
        prop_assert_eq!(xy, yx, "{} vs {}", dag.show(xy), dag.show(yx));
    }

    #[test]
    fn multiplication_commutes(a in term(2, 2), b in term(2, 2)) {
        let mut dag = Dag::new();
        let x = a.build(&mut dag);
        let y = b.build(&mut dag);
        let xy = dag.mul(x, y);
        let yx = dag.mul(y, x);
        prop_assert_eq!(xy, yx);
    }

    #[test]
    fn constant_terms_fold(a in -100i32..=100, b in -100i32..=100, k in 1i32..=9) {
        let t = Term::Div(
            Box::new(Term::Add(Box::new(Term::Const(a)), Box::new(Term::Scale(Box::new(Term::Const(b)), 3)))),
            k,
        );
        let mut dag = Dag::new();
        let e = t.build(&mut dag);
        let folded = dag.as_const(e).and_then(|c| c.as_absolute()).map(i64::from);
        prop_assert_eq!(folded, t.eval(&[]));
    }

    #[test]
    fn symmetric_predicates_ignore_operand_order(a in term(2, 2), b in term(2, 2)) {
        let mut dag = Dag::new();
        let x = a.build(&mut dag);
        let y = b.build(&mut dag);
        for op in [PredOp::Eq, PredOp::Ne] {
            let xy = dag.pred(op, x, y);
            let yx = dag.pred(op, y, x);
            prop_assert_eq!(xy, yx);
        }
        if x != y {
            let lt = dag.pred(PredOp::Lt, x, y);
            let gt = dag.pred(PredOp::Lt, y, x);
            prop_assert_ne!(lt, gt);
        }
    }

    #[test]
    fn negation_is_an_involution(a in linear_term(2, 2), b in linear_term(2, 2), op in prop::sample::select(vec![PredOp::Lt, PredOp::Le, PredOp::Eq, PredOp::Ne])) {
        let mut dag = Dag::new();
        let x = a.build(&mut dag);
        let y = b.build(&mut dag);
        let p = dag.pred(op, x, y);
        let not_p = dag.negate(p);
        prop_assert_ne!(p, not_p);
        let back = dag.negate(not_p);
        prop_assert_eq!(back, p);
    }

    #[test]
    fn branch_outcomes_are_complementary(cond in signed_condition(), a in linear_term(2, 1), b in linear_term(2, 1)) {
        let mut dag = Dag::new();
        let x = a.build(&mut dag);
        let y = b.build(&mut dag);
        let taken = dag.from_condition(cond, x, y, true).expect("signed condition");
        let not_taken = dag.from_condition(cond, x, y, false).expect("signed condition");
        let negated = dag.negate(taken);
        prop_assert_eq!(negated, not_taken);
    }

    #[test]
    fn euclidean_remainder_is_never_negative(t in linear_term(2, 2), p in prop::sample::select(vec![2, 4, 8]), env in env(2)) {
        let mut dag = Dag::new();
        let x = t.build(&mut dag);
        let r = dag.euclid_mod(x, p);
        prop_assume!(!matches!(dag.get(r), Expr::Top(_)));
        let v = eval_expr(&dag, r, &env);
        prop_assume!(v.is_some());
        let v = v.unwrap_or_default();
        prop_assert!((0..p as i64).contains(&v), "{} = {}", dag.show(r), v);
    }

}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_global_rejects: 8192,
        .. ProptestConfig::default()
    })]

    #[test]
    fn extreme_factors_and_divisors_are_exact(
        t in register_sum(),
        k in extreme_constant(),
        c in extreme_constant(),
        scale_first in any::<bool>(),
        env in prop::collection::vec(-2i64..=2, 2),
    ) {
        let t = if scale_first {
            Term::Div(Box::new(Term::Scale(Box::new(t), k)), c)
        } else {
            Term::Scale(Box::new(Term::Div(Box::new(t), k)), c)
        };
        let mut dag = Dag::new();
        let e = t.build(&mut dag);
        let expected = t.eval(&env);
        prop_assume!(expected.is_some() && !dag.is_ephemeral_top(e));
        prop_assert_eq!(eval_expr(&dag, e, &env), expected, "{:?} simplified to {}", t, dag.show(e));
    }
}
