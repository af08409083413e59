//! Programs as the driver sees them: named CFGs of blocks, tagged edges and
//! caller-provided loop annotations.

use crate::{AnalysisError, AnalysisResult};
use pathfinder_dag::{EdgeId, LoopId};
use pathfinder_state::{Block, BlockId, Edge};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct CfgId(pub u32);

impl fmt::Display for CfgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cfg{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockKind {
    Entry,
    Exit,
    Basic,
    /// Executes its instructions, then the whole callee.
    Call { callee: CfgId },
}

/// A natural loop: its header, the blocks it contains (header included) and
/// the edges jumping back to the header.
#[derive(Clone, Debug)]
pub struct LoopInfo {
    pub id: LoopId,
    pub header: BlockId,
    pub members: BTreeSet<BlockId>,
    pub back_edges: BTreeSet<EdgeId>,
}

impl LoopInfo {
    pub fn new(
        id: LoopId,
        header: BlockId,
        members: impl IntoIterator<Item = BlockId>,
        back_edges: impl IntoIterator<Item = EdgeId>,
    ) -> Self {
        let mut members: BTreeSet<BlockId> = members.into_iter().collect();
        members.insert(header);
        LoopInfo {
            id,
            header,
            members,
            back_edges: back_edges.into_iter().collect(),
        }
    }

    pub fn contains(&self, b: BlockId) -> bool {
        self.members.contains(&b)
    }
}

#[derive(Clone, Debug)]
pub struct Cfg {
    pub id: CfgId,
    pub name: String,
    blocks: BTreeMap<BlockId, (BlockKind, Block)>,
    edges: Vec<Edge>,
    loops: Vec<LoopInfo>,
}

impl Cfg {
    pub fn new(id: CfgId, name: impl Into<String>) -> Self {
        Cfg {
            id,
            name: name.into(),
            blocks: BTreeMap::new(),
            edges: Vec::new(),
            loops: Vec::new(),
        }
    }

    pub fn add_block(&mut self, kind: BlockKind, block: Block) -> &mut Self {
        self.blocks.insert(block.id, (kind, block));
        self
    }

    pub fn add_edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    pub fn add_loop(&mut self, info: LoopInfo) -> &mut Self {
        self.loops.push(info);
        self
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<(BlockKind, &Block)> {
        self.blocks.get(&id).map(|(k, b)| (*k, b))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.first_of(BlockKind::Entry)
    }

    pub fn exit(&self) -> Option<BlockId> {
        self.first_of(BlockKind::Exit)
    }

    fn first_of(&self, kind: BlockKind) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|(_, (k, _))| *k == kind)
            .map(|(id, _)| *id)
    }

    /// Outgoing edges of `b`, in insertion order.
    pub fn successors(&self, b: BlockId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |e| e.source == b)
    }

    pub fn loop_at(&self, header: BlockId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.header == header)
    }

    pub fn is_back_edge(&self, e: EdgeId) -> bool {
        self.loops.iter().any(|l| l.back_edges.contains(&e))
    }

    pub fn callees(&self) -> BTreeSet<CfgId> {
        self.blocks
            .values()
            .filter_map(|(k, _)| match k {
                BlockKind::Call { callee } => Some(*callee),
                _ => None,
            })
            .collect()
    }

    /// Blocks reachable from the entry in reverse post-order, back edges
    /// ignored. Every block comes after all its forward predecessors.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry() else {
            return Vec::new();
        };
        let forward = |b: BlockId| -> Vec<BlockId> {
            self.successors(b)
                .filter(|e| !self.is_back_edge(e.id))
                .map(|e| e.target)
                .collect()
        };
        let mut visited = BTreeSet::from([entry]);
        let mut post = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(entry, forward(entry), 0usize)];
        while let Some(top) = stack.last_mut() {
            if let Some(&next) = top.1.get(top.2) {
                top.2 += 1;
                if visited.insert(next) {
                    let succ = forward(next);
                    stack.push((next, succ, 0));
                }
            } else {
                post.push(top.0);
                stack.pop();
            }
        }
        post.reverse();
        post
    }

    /// Structural checks on the inputs the driver relies on.
    pub(crate) fn check(&self) -> AnalysisResult<BlockId> {
        let entry = self
            .entry()
            .ok_or_else(|| AnalysisError::MissingEntry(self.name.clone()))?;
        let unknown = |block: BlockId| AnalysisError::UnknownBlock {
            cfg: self.name.clone(),
            block,
        };
        for e in &self.edges {
            for b in [e.source, e.target] {
                if !self.blocks.contains_key(&b) {
                    return Err(unknown(b));
                }
            }
        }
        for l in &self.loops {
            if let Some(&b) = l.members.iter().find(|b| !self.blocks.contains_key(b)) {
                return Err(unknown(b));
            }
        }
        Ok(entry)
    }
}

/// Call graph order: `layers[0]` calls nothing (or only recursively), every
/// later layer calls only into earlier ones.
#[derive(Clone, Debug, Default)]
pub struct CallLayers {
    pub layers: Vec<Vec<CfgId>>,
    /// `(caller, callee)` pairs on a call-graph cycle.
    pub recursive: BTreeSet<(CfgId, CfgId)>,
}

#[derive(Clone, Debug)]
pub struct Program {
    cfgs: BTreeMap<CfgId, Cfg>,
    entry: CfgId,
}

impl Program {
    pub fn new(entry: CfgId) -> Self {
        Program {
            cfgs: BTreeMap::new(),
            entry,
        }
    }

    pub fn add(&mut self, cfg: Cfg) -> &mut Self {
        self.cfgs.insert(cfg.id, cfg);
        self
    }

    pub fn entry(&self) -> CfgId {
        self.entry
    }

    pub fn cfg(&self, id: CfgId) -> Option<&Cfg> {
        self.cfgs.get(&id)
    }

    pub fn cfgs(&self) -> impl Iterator<Item = &Cfg> + '_ {
        self.cfgs.values()
    }

    pub fn len(&self) -> usize {
        self.cfgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cfgs.is_empty()
    }

    pub(crate) fn check(&self) -> AnalysisResult<()> {
        if !self.cfgs.contains_key(&self.entry) {
            return Err(AnalysisError::UnknownCfg(self.entry));
        }
        for cfg in self.cfgs.values() {
            cfg.check()?;
            if let Some(&missing) = cfg.callees().iter().find(|c| !self.cfgs.contains_key(c)) {
                return Err(AnalysisError::UnknownCfg(missing));
            }
        }
        Ok(())
    }

    fn reachable_from(&self, start: CfgId) -> BTreeSet<CfgId> {
        let mut seen = BTreeSet::new();
        let mut todo = vec![start];
        while let Some(c) = todo.pop() {
            if let Some(cfg) = self.cfgs.get(&c) {
                for callee in cfg.callees() {
                    if seen.insert(callee) {
                        todo.push(callee);
                    }
                }
            }
        }
        seen
    }

    /// Callee-first layering of every CFG.
    pub fn call_layers(&self) -> CallLayers {
        let mut recursive = BTreeSet::new();
        let mut calls = Vec::new();
        for cfg in self.cfgs.values() {
            for callee in cfg.callees() {
                if self.reachable_from(callee).contains(&cfg.id) || callee == cfg.id {
                    recursive.insert((cfg.id, callee));
                } else {
                    calls.push((cfg.id, callee));
                }
            }
        }

        // longest path over the acyclic calls
        let mut depth: BTreeMap<CfgId, usize> = self.cfgs.keys().map(|&c| (c, 0)).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &(caller, callee) in &calls {
                let want = depth.get(&callee).copied().unwrap_or(0) + 1;
                if let Some(d) = depth.get_mut(&caller) {
                    if *d < want {
                        *d = want;
                        changed = true;
                    }
                }
            }
        }

        let mut layers: Vec<Vec<CfgId>> = Vec::new();
        for (cfg, d) in depth {
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(cfg);
        }
        CallLayers { layers, recursive }
    }
}
