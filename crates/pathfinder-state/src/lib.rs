//! Abstract state of the infeasible-path analysis.
//!
//! A [`State`] maps registers and memory cells to symbolic expressions over
//! their values at state entry, and carries the labelled predicates collected
//! along the path that produced it. Blocks are executed symbolically with
//! [`State::process_block`]; states combine through [`State::apply`],
//! [`State::merge`] and [`State::widen`].

pub mod cfg;
pub mod compose;
pub mod exec;
pub mod locals;
pub mod memory;
pub mod merge;
pub mod state;
pub mod widen;

pub use cfg::{
    ArithOp, Block, BlockId, CondCode, Edge, EdgeKind, Instruction, MemWidth, MemoryOracle,
    MicroOp, NoInitialMemory, StaticMemory,
};
pub use compose::Summary;
pub use locals::LocalTable;
pub use memory::MemoryTable;
pub use state::State;

use pathfinder_dag::VarId;
use thiserror::Error;

/// Configuration-fatal conditions. Everything else degrades to unknown
/// values and is never reported as an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("stack pointer lost in {block} of '{cfg}': bound to {found}")]
    StackPointerLost {
        cfg: String,
        block: BlockId,
        found: String,
    },

    #[error("unsupported instruction {op} in {block} of '{cfg}'")]
    UnsupportedInstruction {
        cfg: String,
        block: BlockId,
        op: String,
    },
}

impl StateError {
    /// Attach the name of the CFG being analyzed.
    pub fn in_cfg(self, name: &str) -> Self {
        match self {
            StateError::StackPointerLost { block, found, .. } => StateError::StackPointerLost {
                cfg: name.to_string(),
                block,
                found,
            },
            StateError::UnsupportedInstruction { block, op, .. } => {
                StateError::UnsupportedInstruction {
                    cfg: name.to_string(),
                    block,
                    op,
                }
            }
        }
    }

    pub fn block(&self) -> BlockId {
        match self {
            StateError::StackPointerLost { block, .. }
            | StateError::UnsupportedInstruction { block, .. } => *block,
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;

/// Block execution settings.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Stack pointer register.
    pub sp: VarId,
    /// Bindings with at least this many nodes are replaced by a fresh Top at
    /// the end of each block.
    pub clamp_threshold: usize,
    /// Fail with [`StateError::StackPointerLost`] when the stack pointer gets
    /// bound to a constant that is not stack-relative.
    pub check_stack_pointer: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            sp: VarId(13),
            clamp_threshold: 12,
            check_stack_pointer: true,
        }
    }
}
