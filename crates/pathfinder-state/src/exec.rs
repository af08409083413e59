//! Symbolic execution of one basic block.

use crate::cfg::{ArithOp, Block, BlockId, CondCode, MemWidth, MemoryOracle, MicroOp};
use crate::state::State;
use crate::{ExecConfig, StateError, StateResult};
use pathfinder_dag::{BinaryOp, Constant, Dag, Expr, ExprId, PredId, Rewriter, Sign, TopAllocator, VarId};
use tracing::{debug, error, warn};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Segment {
    Common,
    /// Between an `If` and its `Cont`: executed on the taken successor only.
    Taken,
    /// After the `Cont`.
    NotTaken,
}

/// Buffer lengths at the start of an instruction.
#[derive(Clone, Copy)]
struct Marks {
    common: usize,
    taken: usize,
    not_taken: usize,
}

struct BlockExec<'a> {
    state: &'a mut State,
    dag: &'a mut Dag,
    tops: &'a mut TopAllocator,
    oracle: &'a dyn MemoryOracle,
    config: &'a ExecConfig,
    block: BlockId,
    segment: Segment,
    /// Condition of the open `If` and the comparison it tests, if decoded.
    condition: Option<(CondCode, Option<(ExprId, ExprId)>)>,
}

impl State {
    /// Execute `block` on this state. Predicates generated by the block stay
    /// pending until [`State::append_edge`] labels them.
    pub fn process_block(
        &mut self,
        dag: &mut Dag,
        tops: &mut TopAllocator,
        block: &Block,
        oracle: &dyn MemoryOracle,
        config: &ExecConfig,
    ) -> StateResult<()> {
        if self.bottom {
            return Ok(());
        }
        debug!(block = %block.id, instructions = block.instructions.len(), "processing block");
        let mut exec = BlockExec {
            state: &mut *self,
            dag: &mut *dag,
            tops: &mut *tops,
            oracle,
            config,
            block: block.id,
            segment: Segment::Common,
            condition: None,
        };
        for inst in &block.instructions {
            let marks = exec.marks();
            for op in &inst.ops {
                exec.step(op)?;
            }
            exec.end_instruction(marks)?;
        }
        self.clamp(dag, tops, config.clamp_threshold);
        Ok(())
    }
}

impl BlockExec<'_> {
    fn marks(&self) -> Marks {
        let b = &self.state.buffers;
        Marks {
            common: b.common.len(),
            taken: b.taken.len(),
            not_taken: b.not_taken.len(),
        }
    }

    fn read(&mut self, v: VarId) -> ExprId {
        self.state.value_of(self.dag, v)
    }

    fn write(&mut self, v: VarId, e: ExprId) {
        self.state.locals.set(v, e);
    }

    fn fresh(&mut self) -> ExprId {
        self.tops.fresh_expr(self.dag)
    }

    fn step(&mut self, op: &MicroOp) -> StateResult<()> {
        if let MicroOp::Special { code } = *op {
            error!(block = %self.block, code, "unsupported micro-operation");
            return Err(StateError::UnsupportedInstruction {
                cfg: String::new(),
                block: self.block,
                op: format!("SPECIAL({code})"),
            });
        }
        if self.segment == Segment::Taken
            && !matches!(op, MicroOp::If { .. } | MicroOp::Cont | MicroOp::Branch | MicroOp::Nop)
        {
            // the write happens on one successor only
            if let Some(d) = op.written_var() {
                let t = self.fresh();
                self.write(d, t);
            }
            if let MicroOp::Store { addr, width, .. } = *op {
                let t = self.fresh();
                self.store(addr, t, width);
            }
            return Ok(());
        }
        match *op {
            MicroOp::Nop | MicroOp::Branch => {}
            MicroOp::Set { dst, src } => {
                let v = self.read(src);
                self.write(dst, v);
            }
            MicroOp::SetI { dst, value } => {
                let v = self.dag.cst(value);
                self.write(dst, v);
            }
            MicroOp::Scratch { dst } => {
                let t = self.fresh();
                self.write(dst, t);
            }
            MicroOp::Load { dst, addr, width } => {
                let v = self.load(addr, width);
                self.write(dst, v);
            }
            MicroOp::Store { src, addr, width } => {
                let v = self.read(src);
                self.store(addr, v, width);
            }
            MicroOp::Cmp { dst, a, b } => {
                let (x, y) = (self.read(a), self.read(b));
                let v = self.dag.cmp(x, y);
                self.write(dst, v);
            }
            MicroOp::Arith { op, dst, a, b } => {
                let v = self.arith(op, a, b);
                self.write(dst, v);
            }
            MicroOp::Neg { dst, a } => {
                let x = self.read(a);
                let v = self.dag.neg(x);
                self.write(dst, v);
            }
            MicroOp::Not { dst, a } => {
                let x = self.read(a);
                let v = match self.dag.as_const(x).map(|c| !c).filter(|c| c.is_valid()) {
                    Some(c) => self.dag.cst(c),
                    None => self.fresh(),
                };
                self.write(dst, v);
            }
            MicroOp::If { cond, sr } => {
                let v = self.read(sr);
                let cmp = match self.dag.get(v) {
                    Expr::Binary(BinaryOp::Cmp, l, r) => Some((l, r)),
                    _ => None,
                };
                self.segment = Segment::Taken;
                self.state.buffers.conditional = true;
                self.condition = Some((cond, cmp));
                self.emit_condition(true);
            }
            MicroOp::Cont => {
                if self.segment == Segment::Taken {
                    self.segment = Segment::NotTaken;
                    self.emit_condition(false);
                }
            }
            MicroOp::Special { .. } => {}
        }
        Ok(())
    }

    /// Push the predicate of the open condition to the taken or not-taken
    /// buffer.
    fn emit_condition(&mut self, taken: bool) {
        let Some((cond, Some((l, r)))) = self.condition else {
            return;
        };
        let Some(p) = self.dag.from_condition(cond, l, r, taken) else {
            debug!(block = %self.block, ?cond, "condition not expressible as a predicate");
            return;
        };
        if self.dag.is_tautology(p) {
            return;
        }
        let buffers = &mut self.state.buffers;
        if taken {
            buffers.taken.push(p);
        } else {
            buffers.not_taken.push(p);
        }
    }

    /// Constant address held by `addr`, if it is a valid one.
    fn address(&mut self, addr: VarId) -> Option<Constant> {
        let a = self.read(addr);
        self.dag.as_const(a).filter(|c| c.is_valid_address())
    }

    fn load(&mut self, addr: VarId, width: MemWidth) -> ExprId {
        let Some(c) = self.address(addr) else {
            debug!(block = %self.block, %addr, "load through unresolved address");
            return self.fresh();
        };
        let bound = self.state.memory.get(c);
        if let (Some(e), MemWidth::Word) = (bound, width) {
            return e;
        }
        if bound.is_some() || self.state.memory.is_wiped() {
            return self.fresh();
        }
        if let Some(v) = c
            .as_absolute()
            .map(|a| a as u32)
            .filter(|&a| self.oracle.is_initialized(a))
            .and_then(|a| self.oracle.read(a, width))
        {
            return self.dag.cst(v);
        }
        match width {
            MemWidth::Word => self.dag.mem(c),
            MemWidth::Byte | MemWidth::Half => self.fresh(),
        }
    }

    fn store(&mut self, addr: VarId, value: ExprId, width: MemWidth) {
        let Some(c) = self.address(addr) else {
            warn!(block = %self.block, %addr, "store through unresolved address wipes memory");
            self.state.memory.wipe();
            return;
        };
        // other cells sharing a byte with the written range
        for off in -3..width.bytes() as i32 {
            if off == 0 {
                continue;
            }
            let n = c + Constant::absolute(off);
            if n.is_valid() && (self.state.memory.get(n).is_some() || n.value() % 4 == 0) {
                let t = self.fresh();
                self.state.memory.set(n, t);
            }
        }
        let v = match width {
            MemWidth::Word => value,
            MemWidth::Byte | MemWidth::Half => self.fresh(),
        };
        self.state.memory.set(c, v);
    }

    fn arith(&mut self, op: ArithOp, a: VarId, b: VarId) -> ExprId {
        let x = self.read(a);
        let y = self.read(b);
        match op {
            ArithOp::Add => self.dag.add(x, y),
            ArithOp::Sub => self.dag.sub(x, y),
            ArithOp::Mul => self.dag.mul(x, y),
            ArithOp::MulH => self.dag.mul_high(x, y),
            ArithOp::Div => self.dag.div(x, y),
            ArithOp::Mod => self.dag.modulo(x, y),
            ArithOp::Shl => match self.shift_amount(y) {
                Some(k) if k < 31 => self.dag.mul_const(x, 1i32 << k),
                _ => self.fresh(),
            },
            ArithOp::Shr | ArithOp::Asr => match self.shift_amount(y) {
                Some(k) => {
                    let folded = self.dag.as_const(x).and_then(Constant::as_absolute).map(|c| {
                        if op == ArithOp::Shr {
                            ((c as u32) >> k) as i32
                        } else {
                            c >> k
                        }
                    });
                    match folded {
                        Some(v) => self.dag.cst(v),
                        // a logical shift of a negative value is no quotient
                        None if k < 31 && (op == ArithOp::Asr || k == 0) => {
                            self.dag.floor_div(x, 1i32 << k)
                        }
                        None => self.fresh(),
                    }
                }
                None => self.fresh(),
            },
            ArithOp::And => {
                if let Some(c) = self.fold_bitwise(x, y, |p, q| p & q) {
                    return c;
                }
                if let Some(p) = self.low_mask(y) {
                    return self.dag.euclid_mod(x, p);
                }
                if let Some(p) = self.low_mask(x) {
                    return self.dag.euclid_mod(y, p);
                }
                self.fresh()
            }
            ArithOp::Or => self.fold_bitwise(x, y, |p, q| p | q).unwrap_or_else(|| self.fresh()),
            ArithOp::Xor => self.fold_bitwise(x, y, |p, q| p ^ q).unwrap_or_else(|| self.fresh()),
        }
    }

    fn fold_bitwise(
        &mut self,
        x: ExprId,
        y: ExprId,
        f: impl FnOnce(Constant, Constant) -> Constant,
    ) -> Option<ExprId> {
        let c = f(self.dag.as_const(x)?, self.dag.as_const(y)?);
        c.is_valid().then(|| self.dag.cst(c))
    }

    /// Shift distance in `0..32`.
    fn shift_amount(&self, e: ExprId) -> Option<u32> {
        let k = self.dag.as_const(e)?.as_absolute()?;
        u32::try_from(k).ok().filter(|&k| k < 32)
    }

    /// `2^k` when `e` is the mask `2^k - 1`, `k >= 1`.
    fn low_mask(&self, e: ExprId) -> Option<i32> {
        let m = self.dag.as_const(e)?.as_absolute()?;
        (m > 0 && m < i32::MAX && m & (m + 1) == 0).then_some(m + 1)
    }

    /// Temporary elimination, then the stack pointer check.
    fn end_instruction(&mut self, marks: Marks) -> StateResult<()> {
        self.eliminate_temporaries(marks);
        self.state.locals.clear_temporaries();
        self.check_stack_pointer()
    }

    fn eliminate_temporaries(&mut self, marks: Marks) {
        let buffers = &self.state.buffers;
        let fresh: Vec<PredId> = buffers.common[marks.common..]
            .iter()
            .chain(&buffers.taken[marks.taken..])
            .chain(&buffers.not_taken[marks.not_taken..])
            .copied()
            .collect();
        let isolated: Vec<(VarId, ExprId)> = fresh
            .iter()
            .filter_map(|&p| self.dag.get_isolated_temp_var(p))
            .collect();
        let substitutions: Vec<(ExprId, ExprId)> = isolated
            .into_iter()
            .map(|(t, ground)| (self.dag.var(t), ground))
            .collect();

        let dag = &mut *self.dag;
        let mut rw = Rewriter::new(|_: &mut Dag, e: ExprId| {
            substitutions
                .iter()
                .find(|(t, _)| *t == e)
                .map(|&(_, ground)| ground)
        });
        let mut resolve = |list: &mut Vec<PredId>, from: usize| {
            let tail: Vec<PredId> = list.drain(from..).collect();
            for p in tail {
                let p = if substitutions.is_empty() {
                    p
                } else {
                    rw.apply_predicate(dag, p)
                };
                if dag.predicate_involves_temporary(p) || dag.is_tautology(p) {
                    continue;
                }
                list.push(p);
            }
        };
        let buffers = &mut self.state.buffers;
        resolve(&mut buffers.common, marks.common);
        resolve(&mut buffers.taken, marks.taken);
        resolve(&mut buffers.not_taken, marks.not_taken);

        // bindings must not outlive the temporaries they read
        let tops = &mut *self.tops;
        let mut leaked = 0usize;
        let mut scrub = |e: ExprId| {
            if dag.involves_temporary(e) {
                leaked += 1;
                tops.fresh_expr(dag)
            } else {
                e
            }
        };
        self.state.locals.update(|v, e| if v.is_temporary() { e } else { scrub(e) });
        self.state.memory.update(|_, e| scrub(e));
        if leaked > 0 {
            debug!(block = %self.block, leaked, "bindings reading temporaries replaced by unknowns");
        }
    }

    fn check_stack_pointer(&mut self) -> StateResult<()> {
        if !self.config.check_stack_pointer {
            return Ok(());
        }
        let Some(e) = self.state.locals.get(self.config.sp) else {
            return Ok(());
        };
        match self.dag.as_const(e) {
            Some(c) if c.sign() != Some(Sign::Plus) => {
                error!(block = %self.block, sp = %self.config.sp, value = %c, "stack pointer lost");
                Err(StateError::StackPointerLost {
                    cfg: String::new(),
                    block: self.block,
                    found: c.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}
