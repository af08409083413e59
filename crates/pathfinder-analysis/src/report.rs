//! Collected results of one analysis run.

use crate::program::CfgId;
use dashmap::DashMap;
use pathfinder_dag::{show_edges, EdgeId, EdgeSet};
use pathfinder_state::Summary;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Edges that no run of `cfg` takes together, found by the query committed
/// at edge `at`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct InfeasiblePath {
    pub cfg: CfgId,
    pub at: EdgeId,
    pub edges: EdgeSet,
}

impl fmt::Display for InfeasiblePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (at {})", self.cfg, show_edges(&self.edges), self.at)
    }
}

/// Concurrent sink filled by the CFGs of one call layer in parallel.
#[derive(Debug, Default)]
pub struct Report {
    found: DashMap<CfgId, BTreeMap<EdgeSet, EdgeId>>,
    summaries: DashMap<CfgId, Arc<Summary>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one edge set. A set already known for `cfg` keeps the
    /// smallest commit edge.
    pub fn record(&self, cfg: CfgId, at: EdgeId, edges: EdgeSet) {
        let mut entry = self.found.entry(cfg).or_default();
        entry
            .entry(edges)
            .and_modify(|e| *e = (*e).min(at))
            .or_insert(at);
    }

    pub(crate) fn set_summary(&self, cfg: CfgId, summary: Summary) {
        self.summaries.insert(cfg, Arc::new(summary));
    }

    /// Summary of an analyzed CFG, as inlined at its call sites.
    pub fn summary(&self, cfg: CfgId) -> Option<Arc<Summary>> {
        self.summaries.get(&cfg).map(|s| Arc::clone(s.value()))
    }

    /// Infeasible paths of one CFG, ordered by edge set.
    pub fn paths(&self, cfg: CfgId) -> Vec<InfeasiblePath> {
        self.found
            .get(&cfg)
            .map(|sets| {
                sets.iter()
                    .map(|(edges, &at)| InfeasiblePath {
                        cfg,
                        at,
                        edges: edges.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every infeasible path, ordered by CFG then edge set.
    pub fn all(&self) -> Vec<InfeasiblePath> {
        let mut out: Vec<InfeasiblePath> = self
            .found
            .iter()
            .flat_map(|entry| {
                let cfg = *entry.key();
                entry
                    .value()
                    .iter()
                    .map(|(edges, &at)| InfeasiblePath {
                        cfg,
                        at,
                        edges: edges.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.found.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(edges: &[u32]) -> EdgeSet {
        edges.iter().map(|&e| EdgeId(e)).collect()
    }

    #[test]
    fn test_duplicate_sets_keep_first_commit_edge() {
        let report = Report::new();
        report.record(CfgId(0), EdgeId(9), set(&[1, 2]));
        report.record(CfgId(0), EdgeId(4), set(&[2, 1]));
        report.record(CfgId(0), EdgeId(7), set(&[3]));
        report.record(CfgId(1), EdgeId(2), set(&[1, 2]));
        assert_eq!(report.len(), 3);
        let paths = report.paths(CfgId(0));
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].edges, set(&[1, 2]));
        assert_eq!(paths[0].at, EdgeId(4));
        assert_eq!(report.all().first().map(|p| p.cfg), Some(CfgId(0)));
        assert!(report.paths(CfgId(5)).is_empty());
    }

    #[test]
    fn test_display() {
        let p = InfeasiblePath {
            cfg: CfgId(2),
            at: EdgeId(5),
            edges: set(&[1, 5]),
        };
        assert_eq!(p.to_string(), "cfg2: {e1, e5} (at e5)");
    }
}
