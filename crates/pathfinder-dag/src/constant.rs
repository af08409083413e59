//! Absolute and stack-relative integer constants.
//!
//! A [`Constant`] is either a plain 32-bit integer, an offset from the
//! stack pointer value at CFG entry (`SP+k`), its negation (`-SP+k`), or
//! invalid. The algebra keeps the stack part symbolic: `SP+4 - (SP+8)` is the
//! absolute `-4`, while `SP+4 + SP+8` has no representation and is invalid.

use std::fmt;
use std::ops;

/// Sign of the stack-pointer part of a relative constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn flip(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }

    /// `+1` or `-1`.
    pub fn factor(self) -> i32 {
        match self {
            Sign::Plus => 1,
            Sign::Minus => -1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstantKind {
    Invalid,
    Absolute,
    StackRelative(Sign),
}

/// An immutable, possibly stack-relative, 32-bit constant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant {
    kind: ConstantKind,
    value: i32,
}

impl Constant {
    pub const INVALID: Constant = Constant {
        kind: ConstantKind::Invalid,
        value: 0,
    };

    pub const ZERO: Constant = Constant::absolute(0);
    pub const ONE: Constant = Constant::absolute(1);

    /// `SP+0`, the stack pointer value at CFG entry.
    pub const SP: Constant = Constant::stack(0);

    pub const fn absolute(value: i32) -> Self {
        Constant {
            kind: ConstantKind::Absolute,
            value,
        }
    }

    /// `SP+value`.
    pub const fn stack(value: i32) -> Self {
        Constant {
            kind: ConstantKind::StackRelative(Sign::Plus),
            value,
        }
    }

    /// `-SP+value`.
    pub const fn negated_stack(value: i32) -> Self {
        Constant {
            kind: ConstantKind::StackRelative(Sign::Minus),
            value,
        }
    }

    pub fn relative(sign: Sign, value: i32) -> Self {
        Constant {
            kind: ConstantKind::StackRelative(sign),
            value,
        }
    }

    #[inline]
    pub fn kind(self) -> ConstantKind {
        self.kind
    }

    #[inline]
    pub fn value(self) -> i32 {
        self.value
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.kind != ConstantKind::Invalid
    }

    #[inline]
    pub fn is_absolute(self) -> bool {
        self.kind == ConstantKind::Absolute
    }

    #[inline]
    pub fn is_relative(self) -> bool {
        matches!(self.kind, ConstantKind::StackRelative(_))
    }

    /// Sign of the stack part, if any.
    pub fn sign(self) -> Option<Sign> {
        match self.kind {
            ConstantKind::StackRelative(s) => Some(s),
            _ => None,
        }
    }

    /// True if this constant is the absolute integer `v`.
    #[inline]
    pub fn is(self, v: i32) -> bool {
        self.is_absolute() && self.value == v
    }

    /// Absolute constants and `SP+k` are addresses; `-SP+k` is not.
    pub fn is_valid_address(self) -> bool {
        matches!(
            self.kind,
            ConstantKind::Absolute | ConstantKind::StackRelative(Sign::Plus)
        )
    }

    /// Absolute value as `i32`, if this is an absolute constant.
    pub fn as_absolute(self) -> Option<i32> {
        self.is_absolute().then_some(self.value)
    }

    /// Greatest common divisor with another absolute constant.
    pub fn gcd(self, other: Constant) -> Option<i32> {
        let (mut a, mut b) = (self.as_absolute()?.unsigned_abs(), other.as_absolute()?.unsigned_abs());
        while b != 0 {
            (a, b) = (b, a % b);
        }
        i32::try_from(a).ok()
    }

    fn absolute_binop(self, rhs: Constant, f: impl FnOnce(i32, i32) -> Option<i32>) -> Constant {
        match (self.as_absolute(), rhs.as_absolute()) {
            (Some(a), Some(b)) => f(a, b).map_or(Constant::INVALID, Constant::absolute),
            _ => Constant::INVALID,
        }
    }
}

impl From<i32> for Constant {
    fn from(value: i32) -> Self {
        Constant::absolute(value)
    }
}

impl ops::Add for Constant {
    type Output = Constant;

    fn add(self, rhs: Constant) -> Constant {
        let value = self.value.wrapping_add(rhs.value);
        match (self.kind, rhs.kind) {
            (ConstantKind::Invalid, _) | (_, ConstantKind::Invalid) => Constant::INVALID,
            (ConstantKind::Absolute, kind) | (kind, ConstantKind::Absolute) => {
                Constant { kind, value }
            }
            (ConstantKind::StackRelative(a), ConstantKind::StackRelative(b)) => {
                if a == b {
                    // +-2*SP
                    Constant::INVALID
                } else {
                    Constant::absolute(value)
                }
            }
        }
    }
}

impl ops::Neg for Constant {
    type Output = Constant;

    fn neg(self) -> Constant {
        let kind = match self.kind {
            ConstantKind::StackRelative(s) => ConstantKind::StackRelative(s.flip()),
            k => k,
        };
        Constant {
            kind,
            value: self.value.wrapping_neg(),
        }
    }
}

impl ops::Sub for Constant {
    type Output = Constant;

    fn sub(self, rhs: Constant) -> Constant {
        self + (-rhs)
    }
}

impl ops::Mul for Constant {
    type Output = Constant;

    fn mul(self, rhs: Constant) -> Constant {
        if !self.is_valid() || !rhs.is_valid() {
            return Constant::INVALID;
        }
        if self.is(0) || rhs.is(0) {
            return Constant::ZERO;
        }
        if rhs.is(1) {
            return self;
        }
        if self.is(1) {
            return rhs;
        }
        if rhs.is(-1) {
            return -self;
        }
        if self.is(-1) {
            return -rhs;
        }
        self.absolute_binop(rhs, |a, b| Some(a.wrapping_mul(b)))
    }
}

impl ops::Div for Constant {
    type Output = Constant;

    fn div(self, rhs: Constant) -> Constant {
        if !self.is_valid() || !rhs.is_valid() || rhs.is(0) {
            return Constant::INVALID;
        }
        if self.is(0) {
            return Constant::ZERO;
        }
        if rhs.is(1) {
            return self;
        }
        if rhs.is(-1) {
            return -self;
        }
        self.absolute_binop(rhs, |a, b| a.checked_div(b))
    }
}

impl ops::Rem for Constant {
    type Output = Constant;

    fn rem(self, rhs: Constant) -> Constant {
        if !self.is_valid() || !rhs.is_absolute() || rhs.is(0) {
            return Constant::INVALID;
        }
        if self.is(0) || rhs.is(1) || rhs.is(-1) {
            return Constant::ZERO;
        }
        self.absolute_binop(rhs, |a, b| Some(a.wrapping_rem(b)))
    }
}

impl ops::Not for Constant {
    type Output = Constant;

    fn not(self) -> Constant {
        match self.as_absolute() {
            Some(v) => Constant::absolute(!v),
            None => Constant::INVALID,
        }
    }
}

impl ops::BitAnd for Constant {
    type Output = Constant;

    fn bitand(self, rhs: Constant) -> Constant {
        if self.is(0) || rhs.is(0) {
            return Constant::ZERO;
        }
        self.absolute_binop(rhs, |a, b| Some(a & b))
    }
}

impl ops::BitOr for Constant {
    type Output = Constant;

    fn bitor(self, rhs: Constant) -> Constant {
        if rhs.is(0) {
            return self;
        }
        if self.is(0) {
            return rhs;
        }
        self.absolute_binop(rhs, |a, b| Some(a | b))
    }
}

impl ops::BitXor for Constant {
    type Output = Constant;

    fn bitxor(self, rhs: Constant) -> Constant {
        if rhs.is(0) {
            return self;
        }
        if self.is(0) {
            return rhs;
        }
        self.absolute_binop(rhs, |a, b| Some(a ^ b))
    }
}

impl ops::Shl for Constant {
    type Output = Constant;

    fn shl(self, rhs: Constant) -> Constant {
        if rhs.is(0) {
            return self;
        }
        self.absolute_binop(rhs, |a, b| u32::try_from(b).ok().and_then(|b| a.checked_shl(b)))
    }
}

impl ops::Shr for Constant {
    type Output = Constant;

    fn shr(self, rhs: Constant) -> Constant {
        if rhs.is(0) {
            return self;
        }
        self.absolute_binop(rhs, |a, b| u32::try_from(b).ok().and_then(|b| a.checked_shr(b)))
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sp = match self.kind {
            ConstantKind::Invalid => return write!(f, "invalid"),
            ConstantKind::Absolute => return write!(f, "{}", self.value),
            ConstantKind::StackRelative(Sign::Plus) => "SP",
            ConstantKind::StackRelative(Sign::Minus) => "-SP",
        };
        match self.value {
            0 => write!(f, "{sp}"),
            v if v > 0 => write!(f, "{sp}+{v}"),
            v => write!(f, "{sp}{v}"),
        }
    }
}

impl fmt::Debug for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constant({self})")
    }
}
