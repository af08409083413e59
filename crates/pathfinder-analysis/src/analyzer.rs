//! Program-level driver: call layers, per-CFG traversal and query solving.

use crate::program::{CallLayers, CfgId, Program};
use crate::report::Report;
use crate::traverse::{CfgRun, Commit};
use crate::{AnalysisConfig, AnalysisError, AnalysisResult};
use ahash::AHashSet;
use pathfinder_dag::{Dag, EdgeId, LabelledPredicate, SharedDag};
use pathfinder_smt::{CancelToken, Query, SolverPool};
use pathfinder_state::{MemoryOracle, NoInitialMemory};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct Analyzer {
    config: AnalysisConfig,
    dag: SharedDag,
    oracle: Arc<dyn MemoryOracle>,
    solver: SolverPool,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> AnalysisResult<Self> {
        let solver = SolverPool::new(config.search.clone())?;
        Ok(Analyzer {
            config,
            dag: SharedDag::new(Dag::new()),
            oracle: Arc::new(NoInitialMemory),
            solver,
        })
    }

    /// Use `oracle` for loads from initialized memory.
    pub fn with_oracle(mut self, oracle: Arc<dyn MemoryOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The expression DAG shared by every CFG of the run.
    pub fn dag(&self) -> &SharedDag {
        &self.dag
    }

    /// Cancelling stops the solver queries in flight; the run still
    /// completes, reporting what was proven before.
    pub fn cancel_token(&self) -> CancelToken {
        self.solver.cancel_token()
    }

    /// Analyze every CFG of `program`. The first configuration-fatal error
    /// aborts the run.
    pub fn run(&self, program: &Program) -> AnalysisResult<Report> {
        program.check()?;
        let start = Instant::now();
        let calls = program.call_layers();
        let report = Report::new();
        info!(
            cfgs = program.len(),
            layers = calls.layers.len(),
            recursive_calls = calls.recursive.len(),
            "starting analysis"
        );

        for (depth, layer) in calls.layers.iter().enumerate() {
            debug!(layer = depth, cfgs = layer.len(), "analyzing call layer");
            let results: Vec<AnalysisResult<()>> = self.solver.install(|| {
                layer
                    .par_iter()
                    .map(|&id| self.analyze_cfg(program, id, &calls, &report))
                    .collect()
            });
            results.into_iter().collect::<AnalysisResult<Vec<()>>>()?;
        }

        info!(
            infeasible = report.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analysis finished"
        );
        Ok(report)
    }

    fn analyze_cfg(&self, program: &Program, id: CfgId, calls: &CallLayers, report: &Report) -> AnalysisResult<()> {
        let cfg = program.cfg(id).ok_or(AnalysisError::UnknownCfg(id))?;
        info!(cfg = %cfg.name, blocks = cfg.len(), "analyzing cfg");

        let run = CfgRun::new(cfg, &self.dag, report, calls, self.oracle.as_ref(), &self.config);
        let outcome = run.run()?;
        let (queries, at) = queries_of(&outcome.commits);
        let results = self.solver.solve(&self.dag, &queries);

        let mut found = 0usize;
        for (sets, &at) in results.into_iter().zip(&at) {
            for set in sets.into_iter().flatten() {
                found += 1;
                report.record(id, at, set);
            }
        }
        report.set_summary(id, outcome.summary);
        info!(cfg = %cfg.name, queries = queries.len(), infeasible = found, "cfg done");
        Ok(())
    }
}

/// One query per distinct predicate snapshot, with the first edge it was
/// committed at. Snapshots without any labelled predicate cannot blame an
/// edge and are skipped.
fn queries_of(commits: &[Commit]) -> (Vec<Query>, Vec<EdgeId>) {
    let mut seen: AHashSet<Query> = AHashSet::new();
    let mut queries = Vec::new();
    let mut at = Vec::new();
    for c in commits.iter().filter(|c| !c.state.is_bottom()) {
        let mut predicates: Vec<LabelledPredicate> = c.state.labelled_predicates().to_vec();
        if predicates.iter().all(|lp| lp.labels.is_empty()) {
            continue;
        }
        predicates.extend(c.state.pending_predicates().map(LabelledPredicate::new));
        let query = Query {
            predicates,
            path: c.state.path().to_vec(),
        };
        if seen.insert(query.clone()) {
            queries.push(query);
            at.push(c.at);
        }
    }
    (queries, at)
}
