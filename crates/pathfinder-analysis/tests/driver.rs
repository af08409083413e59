//! Whole-program runs of the analysis driver over hand-built CFGs.

use pathfinder_analysis::{
    AnalysisConfig, AnalysisError, Analyzer, BlockKind, Cfg, CfgId, CommitPoints, LoopInfo,
    Program,
};
use pathfinder_dag::{Condition, EdgeId, EdgeSet, Expr, LoopId, VarId};
use pathfinder_smt::SearchConfig;
use pathfinder_state::{
    ArithOp, Block, BlockId, Edge, EdgeKind, Instruction, MemWidth, MicroOp, StateError,
};

// ============================================================================
// Helpers
// ============================================================================

const SP: VarId = VarId(13);
const SR: VarId = VarId(16);

fn r(n: i32) -> VarId {
    VarId(n)
}

fn t(n: i32) -> VarId {
    VarId(-n)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn edges(ids: &[u32]) -> EdgeSet {
    ids.iter().map(|&e| EdgeId(e)).collect()
}

fn add_block(cfg: &mut Cfg, id: u32, kind: BlockKind, ops: Vec<Vec<MicroOp>>) {
    let instructions = ops
        .into_iter()
        .enumerate()
        .map(|(i, ops)| Instruction::new(0x8000 + 0x100 * id + 4 * i as u32, ops))
        .collect();
    cfg.add_block(kind, Block::new(BlockId(id), instructions));
}

fn add_edge(cfg: &mut Cfg, id: u32, source: u32, target: u32, kind: EdgeKind) {
    cfg.add_edge(Edge {
        id: EdgeId(id),
        source: BlockId(source),
        target: BlockId(target),
        kind,
    });
}

/// `cmp a, #k ; b<cond>`
fn compare_imm(a: VarId, k: i32, cond: Condition) -> Vec<Vec<MicroOp>> {
    vec![
        vec![
            MicroOp::SetI { dst: t(1), value: k },
            MicroOp::Cmp { dst: SR, a, b: t(1) },
        ],
        vec![MicroOp::If { cond, sr: SR }, MicroOp::Branch, MicroOp::Cont],
    ]
}

/// `cmp a, b ; b<cond>`
fn compare_regs(a: VarId, b: VarId, cond: Condition) -> Vec<Vec<MicroOp>> {
    vec![
        vec![MicroOp::Cmp { dst: SR, a, b }],
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

fn stack_access(reg: VarId, offset: i32, store: bool) -> Vec<MicroOp> {
    let access = if store {
        MicroOp::Store {
            src: reg,
            addr: t(3),
            width: MemWidth::Word,
        }
    } else {
        MicroOp::Load {
            dst: reg,
            addr: t(3),
            width: MemWidth::Word,
        }
    };
    vec![
        MicroOp::SetI { dst: t(2), value: offset },
        MicroOp::Arith {
            op: ArithOp::Add,
            dst: t(3),
            a: SP,
            b: t(2),
        },
        access,
    ]
}

fn analyzer(commit_points: CommitPoints) -> Analyzer {
    init_tracing();
    let config = AnalysisConfig {
        commit_points,
        search: SearchConfig {
            workers: 2,
            ..SearchConfig::default()
        },
        ..AnalysisConfig::default()
    };
    Analyzer::new(config).expect("analyzer")
}

fn single(cfg: Cfg) -> Program {
    let mut p = Program::new(cfg.id);
    p.add(cfg);
    p
}

/// Two tests of r0 in a row, `r0 < 10` then `r0 > 20`; both taken is
/// impossible.
fn double_test(id: u32) -> Cfg {
    let mut c = Cfg::new(CfgId(id), "double_test");
    add_block(&mut c, 0, BlockKind::Entry, compare_imm(r(0), 10, Condition::Lt));
    add_block(&mut c, 1, BlockKind::Basic, compare_imm(r(0), 20, Condition::Gt));
    add_block(&mut c, 2, BlockKind::Basic, vec![mov_imm(r(1), 1)]);
    add_block(&mut c, 3, BlockKind::Exit, vec![]);
    add_block(&mut c, 4, BlockKind::Exit, vec![]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::Taken);
    add_edge(&mut c, 2, 0, 2, EdgeKind::NotTaken);
    add_edge(&mut c, 3, 1, 3, EdgeKind::Taken);
    add_edge(&mut c, 4, 1, 4, EdgeKind::NotTaken);
    add_edge(&mut c, 5, 2, 4, EdgeKind::NotTaken);
    c
}

// ============================================================================
// Straight-line branches
// ============================================================================

#[test]
fn contradicting_tests_are_reported() {
    let a = analyzer(CommitPoints::ConditionalEdges);
    let report = a.run(&single(double_test(0))).expect("run");
    let paths = report.paths(CfgId(0));
    assert_eq!(paths.len(), 1, "{paths:?}");
    assert_eq!(paths[0].edges, edges(&[1, 3]));
    assert_eq!(paths[0].at, EdgeId(3));
}

#[test]
fn exit_commit_points_find_the_same_path() {
    let a = analyzer(CommitPoints::Exits);
    let report = a.run(&single(double_test(0))).expect("run");
    let found: Vec<EdgeSet> = report.paths(CfgId(0)).into_iter().map(|p| p.edges).collect();
    assert_eq!(found, vec![edges(&[1, 3])]);
}

#[test]
fn feasible_program_reports_nothing() {
    let mut c = Cfg::new(CfgId(0), "feasible");
    add_block(&mut c, 0, BlockKind::Entry, compare_imm(r(0), 10, Condition::Lt));
    add_block(&mut c, 1, BlockKind::Exit, vec![]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::Taken);
    add_edge(&mut c, 2, 0, 1, EdgeKind::NotTaken);
    let report = analyzer(CommitPoints::AllEdges).run(&single(c)).expect("run");
    assert!(report.is_empty());
}

// ============================================================================
// Loops
// ============================================================================

/// `r0 = 0; while r0 < 10 { r0 += 1 }; if r0 < 5 { .. }`
fn counting_loop() -> Cfg {
    let mut c = Cfg::new(CfgId(0), "counting_loop");
    add_block(&mut c, 0, BlockKind::Entry, vec![mov_imm(r(0), 0)]);
    add_block(&mut c, 1, BlockKind::Basic, compare_imm(r(0), 10, Condition::Ge));
    add_block(&mut c, 2, BlockKind::Basic, vec![add_imm(r(0), r(0), 1)]);
    add_block(&mut c, 3, BlockKind::Basic, compare_imm(r(0), 5, Condition::Lt));
    add_block(&mut c, 4, BlockKind::Exit, vec![]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::NotTaken);
    add_edge(&mut c, 2, 1, 3, EdgeKind::Taken);
    add_edge(&mut c, 3, 1, 2, EdgeKind::NotTaken);
    add_edge(&mut c, 4, 2, 1, EdgeKind::NotTaken);
    add_edge(&mut c, 5, 3, 4, EdgeKind::Taken);
    add_edge(&mut c, 6, 3, 4, EdgeKind::NotTaken);
    c.add_loop(LoopInfo::new(LoopId(0), BlockId(1), [BlockId(2)], [EdgeId(4)]));
    c
}

#[test]
fn loop_exit_bound_contradicts_later_test() {
    let a = analyzer(CommitPoints::ConditionalEdges);
    let report = a.run(&single(counting_loop())).expect("run");
    let found: Vec<EdgeSet> = report.paths(CfgId(0)).into_iter().map(|p| p.edges).collect();
    assert_eq!(found, vec![edges(&[2, 5])]);
}

#[test]
fn counter_is_closed_over_the_iteration_count() {
    let a = analyzer(CommitPoints::ConditionalEdges);
    let report = a.run(&single(counting_loop())).expect("run");
    let summary = report.summary(CfgId(0)).expect("summary");
    let r0 = summary.state.locals().get(r(0)).expect("r0 bound");
    let dag = a.dag().lock();
    assert_eq!(dag.get(r0), Expr::Iter(LoopId(0)), "r0 = {}", dag.show(r0));
}

/// A counter kept in a stack slot: the frame is pinned while the body is
/// analyzed, so the slot resolves to a single cell.
#[test]
fn stack_slot_counter() {
    let mut c = Cfg::new(CfgId(0), "stack_slot_counter");
    add_block(
        &mut c,
        0,
        BlockKind::Entry,
        vec![
            vec![
                MicroOp::SetI { dst: t(1), value: 8 },
                MicroOp::Arith {
                    op: ArithOp::Sub,
                    dst: SP,
                    a: SP,
                    b: t(1),
                },
            ],
            mov_imm(r(2), 0),
            stack_access(r(2), 4, true),
        ],
    );
    let mut header = vec![stack_access(r(3), 4, false)];
    header.extend(compare_imm(r(3), 3, Condition::Ge));
    add_block(&mut c, 1, BlockKind::Basic, header);
    add_block(
        &mut c,
        2,
        BlockKind::Basic,
        vec![add_imm(r(3), r(3), 1), stack_access(r(3), 4, true)],
    );
    let mut after = vec![stack_access(r(4), 4, false)];
    after.extend(compare_imm(r(4), 3, Condition::Lt));
    add_block(&mut c, 3, BlockKind::Basic, after);
    add_block(&mut c, 4, BlockKind::Exit, vec![]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::NotTaken);
    add_edge(&mut c, 2, 1, 3, EdgeKind::Taken);
    add_edge(&mut c, 3, 1, 2, EdgeKind::NotTaken);
    add_edge(&mut c, 4, 2, 1, EdgeKind::NotTaken);
    add_edge(&mut c, 5, 3, 4, EdgeKind::Taken);
    add_edge(&mut c, 6, 3, 4, EdgeKind::NotTaken);
    c.add_loop(LoopInfo::new(LoopId(0), BlockId(1), [BlockId(2)], [EdgeId(4)]));

    let report = analyzer(CommitPoints::ConditionalEdges).run(&single(c)).expect("run");
    let found: Vec<EdgeSet> = report.paths(CfgId(0)).into_iter().map(|p| p.edges).collect();
    assert_eq!(found, vec![edges(&[2, 5])]);
}

/// `r0 = 0; while r0 < 10 { r0 = *r5; if r0 >= 20 { r1 = 1 } }`
///
/// The load reads an unknown address, so every iteration sees its own value.
fn loading_loop() -> Cfg {
    let mut c = Cfg::new(CfgId(0), "loading_loop");
    add_block(&mut c, 0, BlockKind::Entry, vec![mov_imm(r(0), 0)]);
    add_block(&mut c, 1, BlockKind::Basic, compare_imm(r(0), 10, Condition::Lt));
    let mut body = vec![vec![MicroOp::Load {
        dst: r(0),
        addr: r(5),
        width: MemWidth::Word,
    }]];
    body.extend(compare_imm(r(0), 20, Condition::Ge));
    add_block(&mut c, 2, BlockKind::Basic, body);
    add_block(&mut c, 3, BlockKind::Basic, vec![mov_imm(r(1), 1)]);
    add_block(&mut c, 4, BlockKind::Basic, vec![]);
    add_block(&mut c, 5, BlockKind::Exit, vec![]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::NotTaken);
    add_edge(&mut c, 2, 1, 2, EdgeKind::Taken);
    add_edge(&mut c, 3, 1, 5, EdgeKind::NotTaken);
    add_edge(&mut c, 4, 2, 3, EdgeKind::Taken);
    add_edge(&mut c, 5, 2, 4, EdgeKind::NotTaken);
    add_edge(&mut c, 6, 3, 4, EdgeKind::NotTaken);
    add_edge(&mut c, 7, 4, 1, EdgeKind::NotTaken);
    c.add_loop(LoopInfo::new(
        LoopId(0),
        BlockId(1),
        [BlockId(2), BlockId(3), BlockId(4)],
        [EdgeId(7)],
    ));
    c
}

#[test]
fn value_loaded_in_the_body_is_not_the_header_value() {
    // r0 = 0 then *r5 = 25 takes edges 2 and 4
    let a = analyzer(CommitPoints::ConditionalEdges);
    let report = a.run(&single(loading_loop())).expect("run");
    assert!(report.is_empty(), "{:?}", report.paths(CfgId(0)));
    let summary = report.summary(CfgId(0)).expect("summary");
    let r0 = summary.state.locals().get(r(0)).expect("r0 bound");
    let dag = a.dag().lock();
    assert!(matches!(dag.get(r0), Expr::Top(_)), "r0 = {}", dag.show(r0));
}

// ============================================================================
// Calls
// ============================================================================

#[test]
fn callee_summary_is_inlined() {
    // inc: r0 = r1 + 1
    let mut inc = Cfg::new(CfgId(1), "inc");
    add_block(&mut inc, 0, BlockKind::Entry, vec![add_imm(r(0), r(1), 1)]);
    add_block(&mut inc, 1, BlockKind::Exit, vec![]);
    add_edge(&mut inc, 1, 0, 1, EdgeKind::NotTaken);

    // main: inc(); if r0 <= r1 { .. }
    let mut main = Cfg::new(CfgId(0), "main");
    add_block(&mut main, 0, BlockKind::Entry, vec![]);
    add_block(&mut main, 1, BlockKind::Call { callee: CfgId(1) }, vec![]);
    add_block(&mut main, 2, BlockKind::Basic, compare_regs(r(0), r(1), Condition::Le));
    add_block(&mut main, 3, BlockKind::Exit, vec![]);
    add_edge(&mut main, 1, 0, 1, EdgeKind::NotTaken);
    add_edge(&mut main, 2, 1, 2, EdgeKind::NotTaken);
    add_edge(&mut main, 3, 2, 3, EdgeKind::Taken);
    add_edge(&mut main, 4, 2, 3, EdgeKind::NotTaken);

    let mut program = Program::new(CfgId(0));
    program.add(main).add(inc);
    let report = analyzer(CommitPoints::ConditionalEdges).run(&program).expect("run");
    let found: Vec<EdgeSet> = report.paths(CfgId(0)).into_iter().map(|p| p.edges).collect();
    assert_eq!(found, vec![edges(&[3])]);
    assert!(report.paths(CfgId(1)).is_empty());
    assert!(report.summary(CfgId(1)).is_some());
}

#[test]
fn recursion_degrades_to_unknown_effect() {
    let mut c = Cfg::new(CfgId(0), "rec");
    add_block(&mut c, 0, BlockKind::Entry, vec![mov_imm(r(0), 3)]);
    add_block(&mut c, 1, BlockKind::Call { callee: CfgId(0) }, vec![]);
    add_block(&mut c, 2, BlockKind::Basic, compare_imm(r(0), 3, Condition::Ne));
    add_block(&mut c, 3, BlockKind::Exit, vec![]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::NotTaken);
    add_edge(&mut c, 2, 1, 2, EdgeKind::NotTaken);
    add_edge(&mut c, 3, 2, 3, EdgeKind::Taken);
    add_edge(&mut c, 4, 2, 3, EdgeKind::NotTaken);

    let report = analyzer(CommitPoints::ConditionalEdges).run(&single(c)).expect("run");
    // r0 is clobbered by the unknown call, so `r0 != 3` stays possible
    assert!(report.is_empty());
    let summary = report.summary(CfgId(0)).expect("summary");
    assert!(summary.state.memory().is_wiped());
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn unsupported_instruction_names_cfg_and_block() {
    let mut c = Cfg::new(CfgId(0), "vendor");
    add_block(&mut c, 0, BlockKind::Entry, vec![]);
    add_block(&mut c, 1, BlockKind::Exit, vec![vec![MicroOp::Special { code: 7 }]]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::NotTaken);
    let err = analyzer(CommitPoints::ConditionalEdges)
        .run(&single(c))
        .expect_err("special is fatal");
    match err {
        AnalysisError::State(StateError::UnsupportedInstruction { cfg, block, .. }) => {
            assert_eq!(cfg, "vendor");
            assert_eq!(block, BlockId(1));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_callee_is_rejected() {
    let mut c = Cfg::new(CfgId(0), "main");
    add_block(&mut c, 0, BlockKind::Entry, vec![]);
    add_block(&mut c, 1, BlockKind::Call { callee: CfgId(9) }, vec![]);
    add_edge(&mut c, 1, 0, 1, EdgeKind::NotTaken);
    let err = analyzer(CommitPoints::ConditionalEdges)
        .run(&single(c))
        .expect_err("dangling call");
    assert!(matches!(err, AnalysisError::UnknownCfg(CfgId(9))));
}
