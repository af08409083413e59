//! Types consumed from the CFG builder: blocks of semantic micro-operations,
//! tagged edges and the initial-memory oracle.

use pathfinder_dag::{Condition, EdgeId, VarId};
use std::collections::BTreeMap;
use std::fmt;

/// Machine condition code tested by [`MicroOp::If`].
pub type CondCode = Condition;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BB{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MemWidth {
    Byte,
    Half,
    Word,
}

impl MemWidth {
    pub fn bytes(self) -> u32 {
        match self {
            MemWidth::Byte => 1,
            MemWidth::Half => 2,
            MemWidth::Word => 4,
        }
    }
}

/// Two-operand arithmetic and logic micro-operations, `d <- a op b`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    /// High word of the product.
    MulH,
    Div,
    Mod,
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Asr,
    And,
    Or,
    Xor,
}

/// One semantic micro-operation. Negative variable ids are temporaries,
/// scoped to the machine instruction that contains them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MicroOp {
    Nop,
    Branch,
    Set { dst: VarId, src: VarId },
    SetI { dst: VarId, value: i32 },
    Scratch { dst: VarId },
    Load { dst: VarId, addr: VarId, width: MemWidth },
    Store { src: VarId, addr: VarId, width: MemWidth },
    Cmp { dst: VarId, a: VarId, b: VarId },
    Arith { op: ArithOp, dst: VarId, a: VarId, b: VarId },
    Neg { dst: VarId, a: VarId },
    Not { dst: VarId, a: VarId },
    /// Opens the segment executed when `cond` holds on the comparison in `sr`.
    If { cond: CondCode, sr: VarId },
    /// Closes the segment opened by the last `If`.
    Cont,
    /// Target-specific operation with no modelled semantics.
    Special { code: u32 },
}

impl MicroOp {
    /// Register or temporary written by this operation.
    pub fn written_var(&self) -> Option<VarId> {
        match *self {
            MicroOp::Set { dst, .. }
            | MicroOp::SetI { dst, .. }
            | MicroOp::Scratch { dst }
            | MicroOp::Load { dst, .. }
            | MicroOp::Cmp { dst, .. }
            | MicroOp::Arith { dst, .. }
            | MicroOp::Neg { dst, .. }
            | MicroOp::Not { dst, .. } => Some(dst),
            _ => None,
        }
    }
}

/// A machine instruction: its micro-operations share one temporary scope.
#[derive(Clone, Debug, Default)]
pub struct Instruction {
    pub address: u32,
    pub ops: Vec<MicroOp>,
}

impl Instruction {
    pub fn new(address: u32, ops: Vec<MicroOp>) -> Self {
        Instruction { address, ops }
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn new(id: BlockId, instructions: Vec<Instruction>) -> Self {
        Block { id, instructions }
    }

    /// True if the block ends in a conditional test.
    pub fn is_conditional(&self) -> bool {
        self.instructions
            .iter()
            .flat_map(|i| &i.ops)
            .any(|op| matches!(op, MicroOp::If { .. }))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EdgeKind {
    Taken,
    NotTaken,
    Virtual,
    VirtualReturn,
    Call,
    Return,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Edge {
    pub id: EdgeId,
    pub source: BlockId,
    pub target: BlockId,
    pub kind: EdgeKind,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.id, self.source, self.target)
    }
}

/// Read-only view of the program image at load time.
pub trait MemoryOracle: Send + Sync {
    /// True if `addr` lies in initialized, never-written memory.
    fn is_initialized(&self, addr: u32) -> bool;

    /// Value stored at `addr`. Bytes and halves are zero-extended.
    fn read(&self, addr: u32, width: MemWidth) -> Option<i32>;
}

/// No initialized memory: every load is symbolic.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInitialMemory;

impl MemoryOracle for NoInitialMemory {
    fn is_initialized(&self, _addr: u32) -> bool {
        false
    }

    fn read(&self, _addr: u32, _width: MemWidth) -> Option<i32> {
        None
    }
}

/// Byte-addressed little-endian read-only image.
#[derive(Clone, Debug, Default)]
pub struct StaticMemory {
    bytes: BTreeMap<u32, u8>,
}

impl StaticMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a little-endian word at `addr`.
    pub fn with_word(mut self, addr: u32, value: i32) -> Self {
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.bytes.insert(addr.wrapping_add(i as u32), b);
        }
        self
    }

    pub fn with_bytes(mut self, addr: u32, data: &[u8]) -> Self {
        for (i, &b) in data.iter().enumerate() {
            self.bytes.insert(addr.wrapping_add(i as u32), b);
        }
        self
    }
}

impl MemoryOracle for StaticMemory {
    fn is_initialized(&self, addr: u32) -> bool {
        self.bytes.contains_key(&addr)
    }

    fn read(&self, addr: u32, width: MemWidth) -> Option<i32> {
        let mut value: u32 = 0;
        for i in 0..width.bytes() {
            let b = *self.bytes.get(&addr.wrapping_add(i))?;
            value |= (b as u32) << (8 * i);
        }
        Some(value as i32)
    }
}
