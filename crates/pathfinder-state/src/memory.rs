//! Memory cells indexed by constant address.

use pathfinder_dag::{Constant, ExprId};
use std::collections::BTreeMap;

/// Bound cells plus a flag recording that an unresolved store happened, after
/// which an unbound cell no longer holds its entry value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryTable {
    cells: BTreeMap<Constant, ExprId>,
    wiped: bool,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: Constant) -> Option<ExprId> {
        self.cells.get(&addr).copied()
    }

    pub fn set(&mut self, addr: Constant, e: ExprId) {
        self.cells.insert(addr, e);
    }

    pub fn remove(&mut self, addr: Constant) -> Option<ExprId> {
        self.cells.remove(&addr)
    }

    /// Forget every cell.
    pub fn wipe(&mut self) {
        self.cells.clear();
        self.wiped = true;
    }

    pub fn is_wiped(&self) -> bool {
        self.wiped
    }

    pub(crate) fn set_wiped(&mut self, wiped: bool) {
        self.wiped = wiped;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Constant, ExprId)> + '_ {
        self.cells.iter().map(|(&a, &e)| (a, e))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn update(&mut self, mut f: impl FnMut(Constant, ExprId) -> ExprId) {
        for (addr, e) in self.cells.iter_mut() {
            *e = f(*addr, *e);
        }
    }

    pub fn retain(&mut self, mut f: impl FnMut(Constant, ExprId) -> bool) {
        self.cells.retain(|a, e| f(*a, *e));
    }
}
