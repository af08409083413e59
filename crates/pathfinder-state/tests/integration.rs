//! Integration tests for pathfinder-state.
//!
//! Each test drives small hand-built CFG fragments through block execution,
//! edge labelling, merge, widening and composition, the way the analysis
//! driver does.

use pathfinder_dag::{Condition, Constant, Dag, EdgeId, Expr, LoopId, PredOp, TopAllocator, VarId};
use pathfinder_state::{
    ArithOp, Block, BlockId, Edge, EdgeKind, ExecConfig, Instruction, MemWidth, MicroOp,
    NoInitialMemory, State, Summary,
};

const SP: VarId = VarId(13);
/// Status register written by comparisons.
const SR: VarId = VarId(16);

fn r(n: i32) -> VarId {
    VarId(n)
}

fn t(n: i32) -> VarId {
    VarId(-n)
}

fn block(id: u32, ops: Vec<Vec<MicroOp>>) -> Block {
    let instructions = ops
        .into_iter()
        .enumerate()
        .map(|(i, ops)| Instruction::new(0x1000 + 4 * i as u32, ops))
        .collect();
    Block::new(BlockId(id), instructions)
}

fn edge(id: u32, source: u32, target: u32, kind: EdgeKind) -> Edge {
    Edge {
        id: EdgeId(id),
        source: BlockId(source),
        target: BlockId(target),
        kind,
    }
}

/// `cmp a, #k ; b<cond> ...`
fn compare_branch(a: VarId, k: i32, cond: Condition) -> Vec<Vec<MicroOp>> {
    vec![
        vec![
            MicroOp::SetI { dst: t(1), value: k },
            MicroOp::Cmp { dst: SR, a, b: t(1) },
        ],
        vec![MicroOp::If { cond, sr: SR }, MicroOp::Branch, MicroOp::Cont],
    ]
}

fn mov_imm(dst: VarId, value: i32) -> Vec<MicroOp> {
    vec![MicroOp::SetI { dst, value }]
}

fn add_imm(dst: VarId, src: VarId, k: i32) -> Vec<MicroOp> {
    vec![
        MicroOp::SetI { dst: t(1), value: k },
        MicroOp::Arith {
            op: ArithOp::Add,
            dst,
            a: src,
            b: t(1),
        },
    ]
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    dag: Dag,
    tops: TopAllocator,
    config: ExecConfig,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        Fixture {
            dag: Dag::new(),
            tops: TopAllocator::new(),
            config: ExecConfig::default(),
        }
    }

    fn entry(&mut self) -> State {
        let mut s = State::new();
        let sp = self.dag.cst(Constant::SP);
        s.set_local(SP, sp);
        s
    }

    fn run(&mut self, state: &mut State, b: &Block) {
        state
            .process_block(&mut self.dag, &mut self.tops, b, &NoInitialMemory, &self.config)
            .unwrap_or_else(|e| panic!("block {} failed: {e}", b.id));
    }
}

// ============================================================================
// Conditional edges
// ============================================================================

#[test]
fn branch_labels_each_successor() {
    let mut fx = Fixture::new();
    let b0 = block(0, compare_branch(r(0), 10, Condition::Lt));
    let mut s = fx.entry();
    fx.run(&mut s, &b0);

    let mut taken = s.clone();
    taken.append_edge(&edge(1, 0, 1, EdgeKind::Taken));
    let mut fallthrough = s;
    fallthrough.append_edge(&edge(2, 0, 2, EdgeKind::NotTaken));

    let x = fx.dag.var(r(0));
    let ten = fx.dag.cst(10);
    let lt = fx.dag.pred(PredOp::Lt, x, ten);
    let ge = fx.dag.pred(PredOp::Le, ten, x);

    let lps = taken.labelled_predicates();
    assert_eq!(lps.len(), 1);
    assert_eq!(lps[0].pred, lt);
    assert_eq!(lps[0].labels, [EdgeId(1)].into());

    let lps = fallthrough.labelled_predicates();
    assert_eq!(lps.len(), 1);
    assert_eq!(lps[0].pred, ge);
    assert_eq!(lps[0].labels, [EdgeId(2)].into());
}

#[test]
fn contradicting_branches_along_one_path() {
    // if (r0 < 10) { if (r0 >= 20) { ... } }
    let mut fx = Fixture::new();
    let b0 = block(0, compare_branch(r(0), 10, Condition::Lt));
    let b1 = block(1, compare_branch(r(0), 20, Condition::Ge));
    let mut s = fx.entry();
    fx.run(&mut s, &b0);
    s.append_edge(&edge(1, 0, 1, EdgeKind::Taken));
    fx.run(&mut s, &b1);
    s.append_edge(&edge(3, 1, 2, EdgeKind::Taken));

    assert_eq!(s.path(), &[EdgeId(1), EdgeId(3)]);
    let labels: Vec<_> = s
        .labelled_predicates()
        .iter()
        .map(|lp| lp.labels.clone())
        .collect();
    assert_eq!(labels, vec![[EdgeId(1)].into(), [EdgeId(3)].into()]);
}

// ============================================================================
// Joins
// ============================================================================

#[test]
fn diamond_merge_forgets_disagreeing_values() {
    // if (r0 < 10) r1 = 5 else r1 = 7 ; join
    let mut fx = Fixture::new();
    let b0 = block(0, compare_branch(r(0), 10, Condition::Lt));
    let mut s = fx.entry();
    fx.run(&mut s, &b0);

    let mut then_ = s.clone();
    then_.append_edge(&edge(1, 0, 1, EdgeKind::Taken));
    fx.run(&mut then_, &block(1, vec![mov_imm(r(1), 5), mov_imm(r(2), 1)]));
    then_.append_edge(&edge(3, 1, 3, EdgeKind::Virtual));

    let mut else_ = s;
    else_.append_edge(&edge(2, 0, 2, EdgeKind::NotTaken));
    fx.run(&mut else_, &block(2, vec![mov_imm(r(1), 7), mov_imm(r(2), 1)]));
    else_.append_edge(&edge(4, 2, 3, EdgeKind::Virtual));

    let joined = State::merge(&mut fx.dag, &mut fx.tops, &[then_, else_], BlockId(3));
    let r1 = joined.locals().get(r(1)).expect("bound");
    assert!(matches!(fx.dag.get(r1), Expr::Top(_)));
    let one = fx.dag.cst(1);
    assert_eq!(joined.locals().get(r(2)), Some(one));
    assert!(joined.labelled_predicates().is_empty());
    assert!(joined.pending_predicates().next().is_none());
}

// ============================================================================
// Loops
// ============================================================================

#[test]
fn counting_loop_closed_form() {
    // r0 = 0 ; loop { r0 = r0 + 1 }
    let mut fx = Fixture::new();
    let mut pre = fx.entry();
    fx.run(&mut pre, &block(0, vec![mov_imm(r(0), 0)]));
    pre.append_edge(&edge(1, 0, 1, EdgeKind::Virtual));

    let mut body = State::new();
    fx.run(&mut body, &block(1, vec![add_imm(r(0), r(0), 1)]));
    let widened = body.widen(&mut fx.dag, &mut fx.tops, LoopId(0));
    let after = pre.apply(&mut fx.dag, &mut fx.tops, &widened, SP);

    let n = fx.dag.iter(LoopId(0));
    assert_eq!(after.locals().get(r(0)), Some(n));
}

#[test]
fn stack_walk_in_loop() {
    // r4 = SP - 64 ; loop { [r4] = 0 ; r4 = r4 + 4 }
    let mut fx = Fixture::new();
    let mut pre = fx.entry();
    fx.run(&mut pre, &block(0, vec![add_imm(r(4), SP, -64)]));

    let mut body = State::new();
    let b1 = block(
        1,
        vec![
            vec![
                MicroOp::SetI { dst: t(1), value: 0 },
                MicroOp::Store {
                    src: t(1),
                    addr: r(4),
                    width: MemWidth::Word,
                },
            ],
            add_imm(r(4), r(4), 4),
        ],
    );
    fx.run(&mut body, &b1);
    // the pointer is symbolic in a loop-relative state
    assert!(body.memory().is_wiped());

    let widened = body.widen(&mut fx.dag, &mut fx.tops, LoopId(0));
    let after = pre.apply(&mut fx.dag, &mut fx.tops, &widened, SP);
    let p = after.locals().get(r(4)).expect("bound");
    assert!(fx.dag.involves_iter(p, LoopId(0)));
    assert!(after.memory().is_wiped());
}

// ============================================================================
// Calls
// ============================================================================

#[test]
fn callee_summary_inlined_twice() {
    // callee: r0 = r0 + 1 ; [SP+4] = r0
    let mut fx = Fixture::new();
    let mut callee = fx.entry();
    let body = block(
        10,
        vec![
            add_imm(r(0), r(0), 1),
            vec![
                MicroOp::SetI { dst: t(1), value: 4 },
                MicroOp::Arith {
                    op: ArithOp::Add,
                    dst: t(2),
                    a: SP,
                    b: t(1),
                },
                MicroOp::Store {
                    src: r(0),
                    addr: t(2),
                    width: MemWidth::Word,
                },
            ],
        ],
    );
    fx.run(&mut callee, &body);
    let summary = Summary::from_exits(
        &mut fx.dag,
        TopAllocator::new(),
        &[callee],
        BlockId(11),
        true,
    );

    let mut caller = fx.entry();
    fx.run(&mut caller, &block(0, vec![mov_imm(r(0), 3), add_imm(SP, SP, -8)]));
    let once = caller.apply_summary(&mut fx.dag, &mut fx.tops, &summary, SP);
    let twice = once.apply_summary(&mut fx.dag, &mut fx.tops, &summary, SP);

    let five = fx.dag.cst(5);
    assert_eq!(twice.locals().get(r(0)), Some(five));
    assert_eq!(twice.memory().get(Constant::stack(-4)), Some(five));
    assert!(!twice.memory().is_wiped());
}
