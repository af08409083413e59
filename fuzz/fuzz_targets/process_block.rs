#![no_main]
use libfuzzer_sys::fuzz_target;
use pathfinder_dag::{Condition, Dag, TopAllocator, VarId};
use pathfinder_state::{
    ArithOp, Block, BlockId, ExecConfig, Instruction, MemWidth, MicroOp, NoInitialMemory, State,
};

const ARITH: [ArithOp; 12] = [
    ArithOp::Add,
    ArithOp::Sub,
    ArithOp::Mul,
    ArithOp::MulH,
    ArithOp::Div,
    ArithOp::Mod,
    ArithOp::Shl,
    ArithOp::Shr,
    ArithOp::Asr,
    ArithOp::And,
    ArithOp::Or,
    ArithOp::Xor,
];

const CONDITIONS: [Condition; 6] = [
    Condition::Eq,
    Condition::Ne,
    Condition::Lt,
    Condition::Ge,
    Condition::ULt,
    Condition::Any,
];

fn var(b: u8) -> VarId {
    // registers 0..16, temporaries -1..-4
    if b & 0x80 != 0 {
        VarId(-1 - i32::from(b & 3))
    } else {
        VarId(i32::from(b % 16))
    }
}

fn width(b: u8) -> MemWidth {
    match b % 3 {
        0 => MemWidth::Byte,
        1 => MemWidth::Half,
        _ => MemWidth::Word,
    }
}

fn micro_op(chunk: &[u8]) -> MicroOp {
    let (op, x, y, z) = (chunk[0], chunk[1], chunk[2], chunk[3]);
    match op % 11 {
        0 => MicroOp::Set { dst: var(x), src: var(y) },
        1 => MicroOp::SetI {
            dst: var(x),
            value: i32::from(y as i8) * 4,
        },
        2 => MicroOp::Scratch { dst: var(x) },
        3 => MicroOp::Load {
            dst: var(x),
            addr: var(y),
            width: width(z),
        },
        4 => MicroOp::Store {
            src: var(x),
            addr: var(y),
            width: width(z),
        },
        5 => MicroOp::Cmp {
            dst: var(x),
            a: var(y),
            b: var(z),
        },
        6 => MicroOp::Arith {
            op: ARITH[op as usize / 11 % ARITH.len()],
            dst: var(x),
            a: var(y),
            b: var(z),
        },
        7 => MicroOp::Neg { dst: var(x), a: var(y) },
        8 => MicroOp::Not { dst: var(x), a: var(y) },
        9 => MicroOp::If {
            cond: CONDITIONS[y as usize % CONDITIONS.len()],
            sr: var(x),
        },
        _ => MicroOp::Cont,
    }
}

// Four bytes per micro-op; a zero opcode byte with bit 7 set ends the
// current instruction.
fuzz_target!(|data: &[u8]| {
    let mut instructions = Vec::new();
    let mut ops = Vec::new();
    for chunk in data.chunks_exact(4) {
        if chunk[0] == 0x80 {
            instructions.push(Instruction::new(instructions.len() as u32 * 4, std::mem::take(&mut ops)));
            continue;
        }
        ops.push(micro_op(chunk));
    }
    instructions.push(Instruction::new(instructions.len() as u32 * 4, ops));
    let block = Block::new(BlockId(0), instructions);

    let mut dag = Dag::new();
    let mut tops = TopAllocator::new();
    let config = ExecConfig {
        check_stack_pointer: false,
        ..ExecConfig::default()
    };
    let mut state = State::new();
    if state
        .process_block(&mut dag, &mut tops, &block, &NoInitialMemory, &config)
        .is_ok()
    {
        let _ = state.show(&dag);
    }
});
