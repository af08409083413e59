//! Expression node types and handles.

use crate::constant::Constant;
use std::fmt;

/// Handle to an interned expression. Two handles are equal iff the
/// expressions are structurally equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Register (`>= 0`) or instruction-scoped temporary (`< 0`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub i32);

impl VarId {
    #[inline]
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_register(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_temporary() {
            write!(f, "t{}", -self.0)
        } else {
            write!(f, "?{}", self.0)
        }
    }
}

/// Identity of an unknown value. `TopId::EPHEMERAL` is never equal to
/// anything, itself included, when it reaches the solver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TopId(pub i32);

impl TopId {
    pub const EPHEMERAL: TopId = TopId(-1);

    #[inline]
    pub fn is_ephemeral(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for TopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ephemeral() {
            write!(f, "T")
        } else {
            write!(f, "T{}", self.0)
        }
    }
}

/// Identity of a loop, as annotated by the CFG collaborator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum UnaryOp {
    Neg,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// High 32 bits of the 64-bit product.
    MulHigh,
    Div,
    Mod,
    /// Undecoded comparison produced by a `CMP` micro-op.
    Cmp,
}

impl BinaryOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul | BinaryOp::MulHigh)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::MulHigh => "*H",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "mod",
            BinaryOp::Cmp => "~",
        }
    }
}

/// One node of the expression DAG. Children are handles into the same DAG.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Expr {
    Const(Constant),
    Var(VarId),
    Mem(Constant),
    Top(TopId),
    Iter(LoopId),
    Unary(UnaryOp, ExprId),
    Binary(BinaryOp, ExprId, ExprId),
}

impl Expr {
    /// Rank used as the primary key of the canonical operand order.
    /// Constants sort last so that canonical sums read `x + k`.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Expr::Unary(..) | Expr::Binary(..) => 0,
            Expr::Var(_) => 1,
            Expr::Mem(_) => 2,
            Expr::Iter(_) => 3,
            Expr::Top(_) => 4,
            Expr::Const(_) => 5,
        }
    }

    pub fn as_const(&self) -> Option<Constant> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, Expr::Unary(..) | Expr::Binary(..))
    }
}
