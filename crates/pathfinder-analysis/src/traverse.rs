//! Region-by-region traversal of one CFG.
//!
//! The whole CFG is a region headed by its entry block; every loop is a
//! region headed by its header. Blocks of a region are visited once, in
//! reverse post-order, joining the states of their incoming edges. A nested
//! loop is analyzed as a unit when its header is reached, and its exit
//! states flow back into the enclosing region.

use crate::program::{BlockKind, CallLayers, Cfg, CfgId, LoopInfo};
use crate::report::Report;
use crate::{AnalysisConfig, AnalysisError, AnalysisResult, CommitPoints};
use pathfinder_dag::{Constant, Dag, EdgeId, ExprId, LoopId, Sign, SharedDag, TopAllocator, VarId};
use pathfinder_state::{BlockId, Edge, EdgeKind, MemoryOracle, State, Summary};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};

/// Snapshot of the state that just crossed a commit edge.
#[derive(Clone, Debug)]
pub(crate) struct Commit {
    pub at: EdgeId,
    pub state: State,
}

pub(crate) struct CfgOutcome {
    pub summary: Summary,
    pub commits: Vec<Commit>,
}

/// What a region hands back to the region containing it.
#[derive(Default)]
struct Outcome {
    /// States leaving the region, with the edge they left by.
    exits: Vec<(Edge, State)>,
    /// States jumping back to the region header.
    back: Vec<State>,
    /// States at the end of exit blocks.
    returns: Vec<State>,
    commits: Vec<Commit>,
}

#[derive(Clone, Copy)]
struct Region<'c> {
    header: BlockId,
    /// `None` for the whole CFG.
    looping: Option<&'c LoopInfo>,
}

impl Region<'_> {
    fn contains(&self, b: BlockId) -> bool {
        self.looping.map_or(true, |l| l.contains(b))
    }

    fn is_back_edge(&self, e: EdgeId) -> bool {
        self.looping.is_some_and(|l| l.back_edges.contains(&e))
    }

    fn loop_id(&self) -> Option<LoopId> {
        self.looping.map(|l| l.id)
    }
}

type Incoming = BTreeMap<BlockId, Vec<State>>;

pub(crate) struct CfgRun<'a> {
    cfg: &'a Cfg,
    dag: &'a SharedDag,
    tops: TopAllocator,
    report: &'a Report,
    calls: &'a CallLayers,
    oracle: &'a dyn MemoryOracle,
    config: &'a AnalysisConfig,
    order: Vec<BlockId>,
}

impl<'a> CfgRun<'a> {
    pub fn new(
        cfg: &'a Cfg,
        dag: &'a SharedDag,
        report: &'a Report,
        calls: &'a CallLayers,
        oracle: &'a dyn MemoryOracle,
        config: &'a AnalysisConfig,
    ) -> Self {
        CfgRun {
            cfg,
            dag,
            tops: TopAllocator::new(),
            report,
            calls,
            oracle,
            config,
            order: cfg.reverse_post_order(),
        }
    }

    pub fn run(mut self) -> AnalysisResult<CfgOutcome> {
        let entry = self.cfg.check()?;
        let sp = self.config.exec.sp;
        let mut start = State::new();
        {
            let mut dag = self.dag.lock();
            let base = dag.cst(Constant::SP);
            start.set_local(sp, base);
        }

        let whole = Region {
            header: entry,
            looping: None,
        };
        let outcome = self.region(whole, start)?;
        if !outcome.back.is_empty() || !outcome.exits.is_empty() {
            warn!(cfg = %self.cfg.name, "states escaped the cfg region, ignored");
        }

        let exit = self.cfg.exit().unwrap_or(entry);
        let summary = {
            let mut dag = self.dag.lock();
            Summary::from_exits(&mut dag, self.tops, &outcome.returns, exit, self.config.collect_tops)
        };
        Ok(CfgOutcome {
            summary,
            commits: outcome.commits,
        })
    }

    fn region(&mut self, region: Region<'a>, start: State) -> AnalysisResult<Outcome> {
        let cfg = self.cfg;
        let mut incoming = Incoming::from([(region.header, vec![start])]);
        let mut done: BTreeSet<BlockId> = BTreeSet::new();
        let mut out = Outcome::default();

        for b in self.order.clone() {
            if !region.contains(b) || done.contains(&b) {
                continue;
            }
            let Some(states) = incoming.remove(&b) else {
                continue;
            };
            done.insert(b);
            let state = self.join(states, b);
            if state.is_bottom() {
                continue;
            }

            if let Some(inner) = cfg.loop_at(b).filter(|l| Some(l.id) != region.loop_id()) {
                done.extend(inner.members.iter().copied());
                let lifted = self.close_loop(inner, state)?;
                out.returns.extend(lifted.returns);
                out.commits.extend(lifted.commits);
                for (edge, s) in lifted.exits {
                    route(region, edge, s, &mut incoming, &done, &mut out);
                }
                continue;
            }

            let (kind, state) = self.execute(b, state)?;
            if kind == BlockKind::Exit {
                if self.config.commit_points == CommitPoints::Exits {
                    if let Some(&at) = state.path().last() {
                        out.commits.push(Commit {
                            at,
                            state: state.clone(),
                        });
                    }
                }
                out.returns.push(state);
                continue;
            }

            let edges: Vec<Edge> = cfg.successors(b).copied().collect();
            let last = edges.len().saturating_sub(1);
            let mut state = state;
            for (i, edge) in edges.into_iter().enumerate() {
                let mut s = if i == last {
                    std::mem::take(&mut state)
                } else {
                    state.clone()
                };
                s.append_edge(&edge);
                if self.commits_at(&edge) {
                    out.commits.push(Commit {
                        at: edge.id,
                        state: s.clone(),
                    });
                }
                route(region, edge, s, &mut incoming, &done, &mut out);
            }
        }
        Ok(out)
    }

    fn join(&mut self, mut states: Vec<State>, at: BlockId) -> State {
        if states.len() == 1 {
            if let Some(only) = states.pop() {
                return only;
            }
        }
        let mut dag = self.dag.lock();
        State::merge(&mut dag, &mut self.tops, &states, at)
    }

    fn execute(&mut self, b: BlockId, mut state: State) -> AnalysisResult<(BlockKind, State)> {
        let (kind, block) = self.cfg.block(b).ok_or_else(|| AnalysisError::UnknownBlock {
            cfg: self.cfg.name.clone(),
            block: b,
        })?;
        let callee = match kind {
            BlockKind::Call { callee } => Some(self.summary_of(callee)),
            _ => None,
        };
        let mut dag = self.dag.lock();
        if let Err(e) = state.process_block(&mut dag, &mut self.tops, block, self.oracle, &self.config.exec) {
            let e = e.in_cfg(&self.cfg.name);
            error!(error = %e, "analysis aborted");
            return Err(e.into());
        }
        if let Some(summary) = callee {
            state = state.apply_summary(&mut dag, &mut self.tops, &summary, self.config.exec.sp);
        }
        Ok((kind, state))
    }

    /// The callee's summary, or an unknown one for recursive calls.
    fn summary_of(&self, callee: CfgId) -> std::sync::Arc<Summary> {
        let recursive = self.calls.recursive.contains(&(self.cfg.id, callee));
        if let Some(s) = self.report.summary(callee).filter(|_| !recursive) {
            return s;
        }
        warn!(cfg = %self.cfg.name, %callee, recursive, "call without summary, assuming unknown effect");
        let mut dag = self.dag.lock();
        std::sync::Arc::new(Summary::unknown(&mut dag, self.config.registers, self.config.exec.sp))
    }

    fn commits_at(&self, edge: &Edge) -> bool {
        match self.config.commit_points {
            CommitPoints::ConditionalEdges => matches!(edge.kind, EdgeKind::Taken | EdgeKind::NotTaken),
            CommitPoints::AllEdges => true,
            CommitPoints::Exits => false,
        }
    }

    /// Analyze `info` entered with `pre`, and return its exits, returns and
    /// commits expressed relative to the enclosing region.
    fn close_loop(&mut self, info: &'a LoopInfo, pre: State) -> AnalysisResult<Outcome> {
        let sp = self.config.exec.sp;
        let mut pins = {
            let mut dag = self.dag.lock();
            Pins::of(&pre, &mut dag, sp)
        };
        let looping = Region {
            header: info.header,
            looping: Some(info),
        };

        let mut passes = 0usize;
        let (body, mut outcome) = loop {
            passes += 1;
            let mut outcome = self.region(looping, pins.entry_state())?;
            let back = self.join(std::mem::take(&mut outcome.back), info.header);
            let released = pins.release(&back);
            if released == 0 {
                break (back, outcome);
            }
            debug!(cfg = %self.cfg.name, loop_id = info.id.0, released, "pins released, body analyzed again");
        };

        let mut dag = self.dag.lock();
        let at_header = if body.is_bottom() {
            pre
        } else {
            let mut body = body;
            pins.unbind(&mut body);
            let widened = body.widen(&mut dag, &mut self.tops, info.id);
            pre.apply(&mut dag, &mut self.tops, &widened, sp)
        };
        debug!(
            cfg = %self.cfg.name,
            loop_id = info.id.0,
            passes,
            exits = outcome.exits.len(),
            "loop closed"
        );

        let mut lift = |s: &State| at_header.apply(&mut dag, &mut self.tops, s, sp);
        let exits = std::mem::take(&mut outcome.exits)
            .into_iter()
            .map(|(edge, s)| (edge, lift(&s)))
            .collect();
        let returns = outcome.returns.iter().map(&mut lift).collect();
        let commits = outcome
            .commits
            .iter()
            .map(|c| Commit {
                at: c.at,
                state: lift(&c.state),
            })
            .collect();
        Ok(Outcome {
            exits,
            back: Vec::new(),
            returns,
            commits,
        })
    }
}

fn route(region: Region<'_>, edge: Edge, state: State, incoming: &mut Incoming, done: &BTreeSet<BlockId>, out: &mut Outcome) {
    if region.is_back_edge(edge.id) {
        out.back.push(state);
    } else if !region.contains(edge.target) {
        out.exits.push((edge, state));
    } else if done.contains(&edge.target) {
        warn!(edge = %edge, "edge into an analyzed block ignored");
    } else {
        incoming.entry(edge.target).or_default().push(state);
    }
}

/// Constant bindings of the pre-loop state, held fixed while the body is
/// analyzed. The body runs in its own frame: the stack pointer at the start
/// of an iteration is `SP+0`, so stack-relative pins are rebased.
struct Pins {
    locals: Vec<(VarId, ExprId)>,
    cells: Vec<(Constant, ExprId)>,
}

impl Pins {
    fn of(pre: &State, dag: &mut Dag, sp: VarId) -> Pins {
        let offset = pre
            .locals()
            .get(sp)
            .and_then(|e| dag.as_const(e))
            .filter(|c| c.sign() == Some(Sign::Plus))
            .map(|c| c.value());
        let locals: Vec<(VarId, Constant)> = pre
            .locals()
            .iter()
            .filter(|(v, _)| v.is_register())
            .filter_map(|(v, e)| Some((v, rebase(dag.as_const(e)?, offset)?)))
            .collect();
        let cells: Vec<(Constant, Constant)> = pre
            .memory()
            .iter()
            .filter_map(|(a, e)| Some((rebase(a, offset)?, rebase(dag.as_const(e)?, offset)?)))
            .collect();
        Pins {
            locals: locals.into_iter().map(|(v, c)| (v, dag.cst(c))).collect(),
            cells: cells.into_iter().map(|(a, c)| (a, dag.cst(c))).collect(),
        }
    }

    fn entry_state(&self) -> State {
        let mut s = State::new();
        for &(v, e) in &self.locals {
            s.set_local(v, e);
        }
        for &(a, e) in &self.cells {
            s.set_cell(a, e);
        }
        s
    }

    /// Drop the pins the body does not preserve. Returns how many went.
    fn release(&mut self, back: &State) -> usize {
        if back.is_bottom() {
            return 0;
        }
        let before = self.locals.len() + self.cells.len();
        self.locals.retain(|&(v, e)| back.locals().get(v) == Some(e));
        self.cells.retain(|&(a, e)| back.memory().get(a) == Some(e));
        before - self.locals.len() - self.cells.len()
    }

    /// Remove the pinned bindings: they equal the value at iteration start.
    fn unbind(&self, body: &mut State) {
        for &(v, _) in &self.locals {
            body.unbind_local(v);
        }
        for &(a, _) in &self.cells {
            body.unbind_cell(a);
        }
    }
}

/// `c` in the frame of a loop body entered with the stack pointer at
/// `SP+offset`.
fn rebase(c: Constant, offset: Option<i32>) -> Option<Constant> {
    match c.sign() {
        None => c.is_valid().then_some(c),
        Some(Sign::Plus) => offset.map(|o| Constant::stack(c.value().wrapping_sub(o))),
        Some(Sign::Minus) => offset.map(|o| Constant::negated_stack(c.value().wrapping_add(o))),
    }
}
