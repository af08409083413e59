//! Worklist driver for the infeasible-path analysis.
//!
//! An [`Analyzer`] walks every CFG of a [`Program`], callees first. Blocks
//! are executed symbolically, joins are merged, loops are closed by
//! widening and calls inline the callee's summary. At each commit edge the
//! labelled predicates of the current state become a query; the queries of
//! a CFG are solved in parallel once its traversal is done, and the minimal
//! infeasible edge sets are collected in a [`Report`].

pub mod analyzer;
pub mod program;
pub mod report;
mod traverse;

pub use analyzer::Analyzer;
pub use program::{BlockKind, CallLayers, Cfg, CfgId, LoopInfo, Program};
pub use report::{InfeasiblePath, Report};

use pathfinder_smt::{SearchConfig, SmtError};
use pathfinder_state::{BlockId, ExecConfig, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    State(#[from] StateError),

    #[error("solver error: {0}")]
    Smt(#[from] SmtError),

    #[error("unknown cfg {0}")]
    UnknownCfg(CfgId),

    #[error("unknown block {block} in '{cfg}'")]
    UnknownBlock { cfg: String, block: BlockId },

    #[error("cfg '{0}' has no entry block")]
    MissingEntry(String),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Where queries are taken.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CommitPoints {
    /// After every taken or not-taken branch edge.
    #[default]
    ConditionalEdges,
    /// After every edge.
    AllEdges,
    /// At the end of every exit block.
    Exits,
}

/// Driver settings.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub exec: ExecConfig,
    pub search: SearchConfig,
    pub commit_points: CommitPoints,
    /// Release unreferenced Tops of every summary before it is inlined.
    pub collect_tops: bool,
    /// Registers clobbered by a call whose effect is unknown.
    pub registers: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            exec: ExecConfig::default(),
            search: SearchConfig::default(),
            commit_points: CommitPoints::default(),
            collect_tops: true,
            registers: 16,
        }
    }
}
