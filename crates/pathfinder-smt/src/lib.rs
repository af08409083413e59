//! Infeasible-path search backed by Z3.
//!
//! Labelled predicates collected along a candidate path are encoded as
//! integer constraints. When their conjunction is unsatisfiable, the search
//! extracts minimal unsatisfiable subsets and reports the union of their
//! labels: the edges that cannot all be taken in one run.
//!
//! Solver failures never turn into errors. A timeout or an `unknown` answer
//! counts as satisfiable, so the search only ever under-reports.

pub mod encoder;
pub mod filter;
pub mod minimize;
pub mod pool;
pub mod search;
pub mod session;
pub mod validate;

pub use pool::{Query, SolverPool};
pub use search::{seek_infeasible_paths, seek_infeasible_paths_along};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmtError {
    #[error("failed to build solver pool: {0}")]
    PoolBuild(String),
}

pub type SmtResult<T> = Result<T, SmtError>;

/// Search settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Wall-clock limit per solver query. `None` disables it.
    pub timeout_ms: Option<u64>,
    /// Shrink every solver core by deletion before reporting it.
    pub minimize: bool,
    /// Upper bound on the subsets explored for one query.
    pub max_explored_nodes: usize,
    /// Report the whole candidate path when a minimized set fails validation.
    pub fallback_to_full_path: bool,
    /// Pool size; 0 uses every core.
    pub workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            timeout_ms: Some(2000),
            minimize: true,
            max_explored_nodes: 4096,
            fallback_to_full_path: false,
            workers: 0,
        }
    }
}

/// Cooperative cancellation flag, checked before every solver call. A child
/// token is cancelled with its parent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled by `cancel` on either itself or `self`.
    pub fn child(&self) -> CancelToken {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_token_follows_parent() {
        let root = CancelToken::new();
        let a = root.child();
        let b = root.child();
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!root.is_cancelled());
        root.cancel();
        assert!(b.is_cancelled());
    }
}
