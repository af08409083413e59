//! Parallel batch solving.

use crate::search::seek_infeasible_paths_along;
use crate::{CancelToken, SearchConfig, SmtError, SmtResult};
use pathfinder_dag::{EdgeId, EdgeSet, LabelledPredicate, SharedDag};
use rayon::prelude::*;
use tracing::{debug, info};

/// One search request: the predicates gathered at a commit point and the
/// candidate path they were gathered along.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Query {
    pub predicates: Vec<LabelledPredicate>,
    pub path: Vec<EdgeId>,
}

/// Worker pool running independent searches. Every worker builds its own
/// solver context, so nothing Z3-owned crosses threads.
pub struct SolverPool {
    pool: rayon::ThreadPool,
    config: SearchConfig,
    cancel: CancelToken,
}

impl SolverPool {
    pub fn new(config: SearchConfig) -> SmtResult<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("pathfinder-smt-{i}"));
        if config.workers > 0 {
            builder = builder.num_threads(config.workers);
        }
        let pool = builder.build().map_err(|e| SmtError::PoolBuild(e.to_string()))?;
        debug!(workers = pool.current_num_threads(), "solver pool ready");
        Ok(SolverPool {
            pool,
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Cancelling this token stops every query in flight.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run `op` inside the pool, so its parallel iterators use the pool's
    /// workers.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Results in query order. A cancelled query yields `None`.
    pub fn solve(&self, dag: &SharedDag, queries: &[Query]) -> Vec<Option<Vec<EdgeSet>>> {
        let results: Vec<Option<Vec<EdgeSet>>> = self.pool.install(|| {
            queries
                .par_iter()
                .map(|q| {
                    let token = self.cancel.child();
                    let path = (!q.path.is_empty()).then_some(q.path.as_slice());
                    seek_infeasible_paths_along(dag, &q.predicates, path, &self.config, &token)
                })
                .collect()
        });
        let found: usize = results.iter().flatten().map(Vec::len).sum();
        info!(queries = queries.len(), infeasible = found, "solver batch finished");
        results
    }
}
