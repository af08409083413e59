//! Hash-consed symbolic values for infeasible-path analysis.
//!
//! All expressions and predicates of one analysis live in a [`Dag`] arena and
//! are handled through copyable ids. Construction goes through smart
//! constructors that fold constants and normalize operand order, so two
//! expressions that simplify to the same form share one id.

pub mod algebra;
pub mod arith;
pub mod constant;
pub mod dag;
pub mod expr;
pub mod labels;
pub mod predicate;
pub mod top;

pub use algebra::{AffineForm, Rewriter};
pub use constant::{Constant, ConstantKind, Sign};
pub use dag::{Dag, SharedDag};
pub use expr::{BinaryOp, Expr, ExprId, LoopId, TopId, UnaryOp, VarId};
pub use labels::{show_edges, EdgeId, EdgeSet, LabelledPredicate};
pub use predicate::{Condition, PredId, PredOp, Predicate};
pub use top::{TopAllocator, TopCollector, TopRemap};
