//! Smart constructors: fold and normalize before interning.
//!
//! Rules only fire when they preserve the value of the expression under
//! 32-bit truncating division. Anything involving the ephemeral Top collapses
//! to the ephemeral Top.

use crate::constant::Constant;
use crate::dag::Dag;
use crate::expr::{BinaryOp, Expr, ExprId, UnaryOp};

impl Dag {
    /// Valid constant value of a node, if it is a constant leaf.
    #[inline]
    fn known(&self, e: ExprId) -> Option<Constant> {
        self.as_const(e).filter(|c| c.is_valid())
    }

    fn either_ephemeral(&self, a: ExprId, b: ExprId) -> bool {
        self.is_ephemeral_top(a) || self.is_ephemeral_top(b)
    }

    /// Intern `c` if it is valid, otherwise fall back to `otherwise`.
    fn folded(&mut self, c: Constant, otherwise: impl FnOnce(&mut Dag) -> ExprId) -> ExprId {
        if c.is_valid() {
            self.cst(c)
        } else {
            otherwise(self)
        }
    }

    /// Dispatch on a binary operator.
    pub fn binary(&mut self, op: BinaryOp, a: ExprId, b: ExprId) -> ExprId {
        match op {
            BinaryOp::Add => self.add(a, b),
            BinaryOp::Sub => self.sub(a, b),
            BinaryOp::Mul => self.mul(a, b),
            BinaryOp::MulHigh => self.mul_high(a, b),
            BinaryOp::Div => self.div(a, b),
            BinaryOp::Mod => self.modulo(a, b),
            BinaryOp::Cmp => self.cmp(a, b),
        }
    }

    pub fn unary(&mut self, op: UnaryOp, a: ExprId) -> ExprId {
        match op {
            UnaryOp::Neg => self.neg(a),
        }
    }

    // === Addition ===

    pub fn add(&mut self, a: ExprId, b: ExprId) -> ExprId {
        if self.either_ephemeral(a, b) {
            return self.ephemeral_top();
        }
        match (self.known(a), self.known(b)) {
            (Some(x), Some(y)) => self.folded(x + y, |dag| dag.raw_binary(BinaryOp::Add, a, b)),
            (Some(x), None) => self.add_const(b, x),
            (None, Some(y)) => self.add_const(a, y),
            (None, None) => {
                if let Expr::Binary(BinaryOp::Mul, l, r) = self.get(a) {
                    return self.add_mul(b, l, r);
                }
                if let Expr::Binary(BinaryOp::Mul, l, r) = self.get(b) {
                    return self.add_mul(a, l, r);
                }
                self.raw_binary(BinaryOp::Add, a, b)
            }
        }
    }

    /// `y + k`
    pub fn add_const(&mut self, y: ExprId, k: impl Into<Constant>) -> ExprId {
        let k = k.into();
        if k.is(0) {
            return y;
        }
        if !k.is_valid() || self.is_ephemeral_top(y) {
            return self.ephemeral_top();
        }
        if let Some(c) = self.known(y) {
            let sum = c + k;
            return self.folded(sum, |dag| {
                let kk = dag.cst(k);
                dag.raw_binary(BinaryOp::Add, y, kk)
            });
        }
        match self.get(y) {
            Expr::Binary(BinaryOp::Add, l, r) => {
                // canonical sums keep their constant on the right
                if let Some(c) = self.known(r) {
                    return self.offset(l, c + k);
                }
                if let Some(c) = self.known(l) {
                    return self.offset(r, c + k);
                }
            }
            Expr::Binary(BinaryOp::Sub, l, r) => {
                if let Some(c) = self.known(l) {
                    let s = c + k;
                    if s.is_valid() {
                        return self.const_minus(s, r);
                    }
                }
                if let Some(c) = self.known(r) {
                    return self.offset(l, k - c);
                }
            }
            _ => {}
        }
        let kk = self.cst(k);
        self.raw_binary(BinaryOp::Add, y, kk)
    }

    /// `x + d` for an already-simplified `x`, without further rewriting.
    fn offset(&mut self, x: ExprId, d: Constant) -> ExprId {
        if d.is(0) {
            return x;
        }
        if !d.is_valid() {
            return self.ephemeral_top();
        }
        let dd = self.cst(d);
        self.raw_binary(BinaryOp::Add, x, dd)
    }

    /// `x + a*b`
    fn add_mul(&mut self, x: ExprId, a: ExprId, b: ExprId) -> ExprId {
        if x == a {
            // x + x*b = x*(b+1)
            let b1 = self.add_const(b, 1);
            return self.mul(x, b1);
        }
        if x == b {
            let a1 = self.add_const(a, 1);
            return self.mul(a1, x);
        }
        let ab = self.raw_binary(BinaryOp::Mul, a, b);
        self.raw_binary(BinaryOp::Add, x, ab)
    }

    // === Subtraction ===

    pub fn sub(&mut self, a: ExprId, b: ExprId) -> ExprId {
        if self.either_ephemeral(a, b) {
            return self.ephemeral_top();
        }
        if a == b {
            return self.cst(0);
        }
        match (self.known(a), self.known(b)) {
            (Some(x), Some(y)) => self.folded(x - y, |dag| dag.raw_binary(BinaryOp::Sub, a, b)),
            (Some(x), None) => self.const_minus(x, b),
            (None, Some(y)) => {
                let minus_y = -y;
                if minus_y.is_valid() {
                    self.add_const(a, minus_y)
                } else {
                    self.raw_binary(BinaryOp::Sub, a, b)
                }
            }
            (None, None) => {
                match self.get(a) {
                    // (y + k) - y = k
                    Expr::Binary(BinaryOp::Add, l, r) if l == b => return r,
                    Expr::Binary(BinaryOp::Add, l, r) if r == b => return l,
                    Expr::Binary(BinaryOp::Mul, l, r) => return self.sub_mul(l, r, b),
                    _ => {}
                }
                match self.get(b) {
                    // a - (a + k) = -k
                    Expr::Binary(BinaryOp::Add, l, r) if l == a => return self.neg(r),
                    Expr::Binary(BinaryOp::Add, l, r) if r == a => return self.neg(l),
                    _ => {}
                }
                self.raw_binary(BinaryOp::Sub, a, b)
            }
        }
    }

    /// `k - y`
    fn const_minus(&mut self, k: Constant, y: ExprId) -> ExprId {
        if k.is(0) {
            return self.neg(y);
        }
        match self.get(y) {
            Expr::Binary(BinaryOp::Add, l, r) => {
                if let Some(c) = self.known(r) {
                    return self.raw_const_minus(k - c, l);
                }
                if let Some(c) = self.known(l) {
                    return self.raw_const_minus(k - c, r);
                }
            }
            Expr::Binary(BinaryOp::Sub, l, r) => {
                // k - (c - z) = (k - c) + z
                if let Some(c) = self.known(l) {
                    return self.offset(r, k - c);
                }
                // k - (z - c) = (k + c) - z
                if let Some(c) = self.known(r) {
                    return self.raw_const_minus(k + c, l);
                }
            }
            _ => {}
        }
        self.raw_const_minus(k, y)
    }

    fn raw_const_minus(&mut self, k: Constant, y: ExprId) -> ExprId {
        if k.is(0) {
            return self.neg(y);
        }
        if !k.is_valid() {
            return self.ephemeral_top();
        }
        let kk = self.cst(k);
        self.raw_binary(BinaryOp::Sub, kk, y)
    }

    /// `a*b - x`
    fn sub_mul(&mut self, a: ExprId, b: ExprId, x: ExprId) -> ExprId {
        if x == a {
            // x*b - x = x*(b-1)
            let b1 = self.add_const(b, -1);
            return self.mul(x, b1);
        }
        if x == b {
            let a1 = self.add_const(a, -1);
            return self.mul(a1, x);
        }
        let ab = self.raw_binary(BinaryOp::Mul, a, b);
        self.raw_binary(BinaryOp::Sub, ab, x)
    }

    // === Negation ===

    pub fn neg(&mut self, a: ExprId) -> ExprId {
        if self.is_ephemeral_top(a) {
            return a;
        }
        if let Some(c) = self.known(a) {
            return self.cst(-c);
        }
        match self.get(a) {
            Expr::Unary(UnaryOp::Neg, x) => x,
            Expr::Binary(BinaryOp::Sub, l, r) => self.raw_binary(BinaryOp::Sub, r, l),
            _ => self.raw_unary(UnaryOp::Neg, a),
        }
    }

    // === Multiplication ===

    pub fn mul(&mut self, a: ExprId, b: ExprId) -> ExprId {
        if self.either_ephemeral(a, b) {
            return self.ephemeral_top();
        }
        if let Some(k) = self.known(a) {
            return self.mul_const(b, k);
        }
        if let Some(k) = self.known(b) {
            return self.mul_const(a, k);
        }
        self.raw_binary(BinaryOp::Mul, a, b)
    }

    /// `a * c`, distributing over sums and merging constant factors.
    pub fn mul_const(&mut self, a: ExprId, c: impl Into<Constant>) -> ExprId {
        let c = c.into();
        if !c.is_valid() || self.is_ephemeral_top(a) {
            return self.ephemeral_top();
        }
        if c.is(1) {
            return a;
        }
        if c.is(0) {
            return self.cst(0);
        }
        if let Some(k) = self.known(a) {
            return self.folded(k * c, |dag| {
                let cc = dag.cst(c);
                dag.raw_binary(BinaryOp::Mul, a, cc)
            });
        }
        match self.get(a) {
            Expr::Binary(BinaryOp::Mul, l, r) => {
                if let Some(k) = self.known(r) {
                    return self.scaled(l, k, c, a);
                }
                if let Some(k) = self.known(l) {
                    return self.scaled(r, k, c, a);
                }
            }
            Expr::Binary(BinaryOp::Div, l, r) => {
                if let Some(k) = self.known(r) {
                    return self.div_mul(l, k, c);
                }
            }
            Expr::Binary(BinaryOp::Add, l, r) => {
                let lc = self.mul_const(l, c);
                let rc = self.mul_const(r, c);
                return self.add(lc, rc);
            }
            Expr::Binary(BinaryOp::Sub, l, r) => {
                let lc = self.mul_const(l, c);
                let rc = self.mul_const(r, c);
                return self.sub(lc, rc);
            }
            // -i32::MIN wraps, so that factor stays on the negation
            Expr::Unary(UnaryOp::Neg, x) if c.as_absolute() != Some(i32::MIN) => {
                let minus_c = -c;
                if minus_c.is_valid() {
                    return self.mul_const(x, minus_c);
                }
            }
            _ => {}
        }
        let cc = self.cst(c);
        self.raw_binary(BinaryOp::Mul, a, cc)
    }

    /// `(x*k)*c` as `x*(k*c)` when the product is representable.
    fn scaled(&mut self, x: ExprId, k: Constant, c: Constant, whole: ExprId) -> ExprId {
        let product = k * c;
        if product.is_valid() && no_overflow_mul(k, c) {
            self.mul_const(x, product)
        } else {
            let cc = self.cst(c);
            self.raw_binary(BinaryOp::Mul, whole, cc)
        }
    }

    /// `(x/k)*c`. Exact only when `k` divides `x`, which is checked through
    /// the constant factors visible in `x`.
    fn div_mul(&mut self, x: ExprId, k: Constant, c: Constant) -> ExprId {
        let (Some(kv), Some(cv)) = (k.as_absolute(), c.as_absolute()) else {
            return self.unfolded_div_mul(x, k, c);
        };
        if kv == 0 || self.known_multiple(x) % kv as i64 != 0 {
            return self.unfolded_div_mul(x, k, c);
        }
        if kv == cv {
            return x;
        }
        if let Some(m) = exact_quotient(cv, kv) {
            return self.mul_const(x, m);
        }
        let q = self.div_const(x, k);
        if !matches!(self.get(q), Expr::Binary(BinaryOp::Div, ..)) {
            return self.mul_const(q, c);
        }
        if let Some(m) = exact_quotient(kv, cv) {
            let kk = self.cst(m);
            return self.raw_binary(BinaryOp::Div, x, kk);
        }
        self.unfolded_div_mul(x, k, c)
    }

    fn unfolded_div_mul(&mut self, x: ExprId, k: Constant, c: Constant) -> ExprId {
        let kk = self.cst(k);
        let d = self.raw_binary(BinaryOp::Div, x, kk);
        let cc = self.cst(c);
        self.raw_binary(BinaryOp::Mul, d, cc)
    }

    /// A constant known to divide the value of `e` (1 when nothing is known).
    pub fn known_multiple(&self, e: ExprId) -> i64 {
        match self.get(e) {
            Expr::Const(c) => match c.as_absolute() {
                Some(0) => 0,
                Some(v) => (v as i64).abs(),
                None => 1,
            },
            Expr::Unary(UnaryOp::Neg, x) => self.known_multiple(x),
            Expr::Binary(BinaryOp::Mul, l, r) => {
                let m = self.known_multiple(l).saturating_mul(self.known_multiple(r));
                if m > i32::MAX as i64 {
                    1
                } else {
                    m
                }
            }
            Expr::Binary(BinaryOp::Add | BinaryOp::Sub, l, r) => {
                gcd(self.known_multiple(l), self.known_multiple(r))
            }
            _ => 1,
        }
    }

    /// High word of the signed 64-bit product.
    pub fn mul_high(&mut self, a: ExprId, b: ExprId) -> ExprId {
        if self.either_ephemeral(a, b) {
            return self.ephemeral_top();
        }
        if let (Some(x), Some(y)) = (
            self.known(a).and_then(Constant::as_absolute),
            self.known(b).and_then(Constant::as_absolute),
        ) {
            let high = ((x as i64 * y as i64) >> 32) as i32;
            return self.cst(high);
        }
        if self.known(a).is_some_and(|c| c.is(0)) || self.known(b).is_some_and(|c| c.is(0)) {
            return self.cst(0);
        }
        self.raw_binary(BinaryOp::MulHigh, a, b)
    }

    // === Division ===

    pub fn div(&mut self, a: ExprId, b: ExprId) -> ExprId {
        if self.either_ephemeral(a, b) {
            return self.ephemeral_top();
        }
        match self.known(b) {
            Some(c) if !c.is(0) => {
                if let Some(k) = self.known(a) {
                    return self.folded(k / c, |dag| dag.raw_binary(BinaryOp::Div, a, b));
                }
                self.div_const(a, c)
            }
            _ => self.raw_binary(BinaryOp::Div, a, b),
        }
    }

    /// `a / c` for a non-zero constant `c`.
    pub fn div_const(&mut self, a: ExprId, c: impl Into<Constant>) -> ExprId {
        let c = c.into();
        if !c.is_valid() || c.is(0) {
            let cc = self.cst(c);
            return self.raw_binary(BinaryOp::Div, a, cc);
        }
        if c.is(1) {
            return a;
        }
        if c.is(-1) {
            return self.neg(a);
        }
        if let Some(k) = self.known(a) {
            return self.folded(k / c, |dag| {
                let cc = dag.cst(c);
                dag.raw_binary(BinaryOp::Div, a, cc)
            });
        }
        match self.get(a) {
            Expr::Binary(BinaryOp::Div, l, r) => {
                // (x/k)/c = x/(k*c)
                if let Some(k) = self.known(r) {
                    if no_overflow_mul(k, c) {
                        let kc = self.cst(k * c);
                        return self.raw_binary(BinaryOp::Div, l, kc);
                    }
                }
                // (k/x)/c = (k/c)/x
                let quotient = self
                    .known(l)
                    .and_then(|k| k.as_absolute().zip(c.as_absolute()))
                    .and_then(|(k, c)| k.checked_div(c));
                if let Some(kc) = quotient {
                    let kk = self.cst(kc);
                    return self.div(kk, r);
                }
            }
            Expr::Binary(BinaryOp::Mul, l, r) => {
                if let Some(k) = self.known(r) {
                    return self.mul_div(l, k, c);
                }
                if let Some(k) = self.known(l) {
                    return self.mul_div(r, k, c);
                }
            }
            _ => {}
        }
        let cc = self.cst(c);
        self.raw_binary(BinaryOp::Div, a, cc)
    }

    /// `(x*k)/c`
    fn mul_div(&mut self, x: ExprId, k: Constant, c: Constant) -> ExprId {
        let whole = |dag: &mut Dag| {
            let kk = dag.cst(k);
            let xk = dag.raw_binary(BinaryOp::Mul, x, kk);
            let cc = dag.cst(c);
            dag.raw_binary(BinaryOp::Div, xk, cc)
        };
        let (Some(kv), Some(cv)) = (k.as_absolute(), c.as_absolute()) else {
            return whole(self);
        };
        if kv == cv {
            return x;
        }
        if let Some(m) = exact_quotient(kv, cv) {
            return self.mul_const(x, m);
        }
        if let Some(m) = exact_quotient(cv, kv) {
            let q = self.cst(m);
            return self.raw_binary(BinaryOp::Div, x, q);
        }
        whole(self)
    }

    // === Modulo and comparison ===

    pub fn modulo(&mut self, a: ExprId, b: ExprId) -> ExprId {
        if self.either_ephemeral(a, b) {
            return self.ephemeral_top();
        }
        if let Some(c) = self.known(b) {
            if c.is(1) || c.is(-1) {
                return self.cst(0);
            }
            if let Some(cv) = c.as_absolute().filter(|&v| v != 0) {
                if self.known_multiple(a) % (cv as i64) == 0 {
                    return self.cst(0);
                }
            }
            if let Some(k) = self.known(a) {
                return self.folded(k % c, |dag| dag.raw_binary(BinaryOp::Mod, a, b));
            }
        }
        self.raw_binary(BinaryOp::Mod, a, b)
    }

    /// Non-negative remainder of `x` by a positive constant `p`, the value of
    /// `x & (p - 1)` when `p` is a power of two.
    pub fn euclid_mod(&mut self, x: ExprId, p: i32) -> ExprId {
        let pp = self.cst(p);
        let r = self.modulo(x, pp);
        let shifted = self.add_const(r, p);
        self.modulo(shifted, pp)
    }

    /// `x` divided by a positive constant `p`, rounded toward minus infinity,
    /// as an arithmetic right shift does.
    pub fn floor_div(&mut self, x: ExprId, p: i32) -> ExprId {
        if p == 1 {
            return x;
        }
        let low = self.euclid_mod(x, p);
        let exact = self.sub(x, low);
        self.div_const(exact, p)
    }

    /// Undecoded comparison of `a` and `b`.
    pub fn cmp(&mut self, a: ExprId, b: ExprId) -> ExprId {
        if self.either_ephemeral(a, b) {
            return self.ephemeral_top();
        }
        self.raw_binary(BinaryOp::Cmp, a, b)
    }
}

fn no_overflow_mul(a: Constant, b: Constant) -> bool {
    match (a.as_absolute(), b.as_absolute()) {
        (Some(x), Some(y)) => x.checked_mul(y).is_some(),
        _ => true,
    }
}

/// `a / b` when `b` divides `a` and the quotient fits in 32 bits.
fn exact_quotient(a: i32, b: i32) -> Option<i32> {
    if b == 0 || a.checked_rem(b)? != 0 {
        return None;
    }
    a.checked_div(b)
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}
