//! Register and temporary bindings. An unbound entry means "unchanged since
//! entry of the state".

use pathfinder_dag::{ExprId, VarId};
use std::collections::BTreeMap;

/// Indices below this live in a vector; the rest in a map.
const DENSE: usize = 64;

/// One side of the table: registers, or temporaries by index.
#[derive(Clone, Debug, Default)]
struct Bank {
    dense: Vec<Option<ExprId>>,
    sparse: BTreeMap<usize, ExprId>,
}

impl Bank {
    fn get(&self, i: usize) -> Option<ExprId> {
        if i < DENSE {
            self.dense.get(i).copied().flatten()
        } else {
            self.sparse.get(&i).copied()
        }
    }

    fn set(&mut self, i: usize, e: ExprId) {
        if i >= DENSE {
            self.sparse.insert(i, e);
            return;
        }
        if self.dense.len() <= i {
            self.dense.resize(i + 1, None);
        }
        self.dense[i] = Some(e);
    }

    fn unbind(&mut self, i: usize) {
        if i >= DENSE {
            self.sparse.remove(&i);
        } else if let Some(slot) = self.dense.get_mut(i) {
            *slot = None;
        }
    }

    fn clear(&mut self) {
        self.dense.clear();
        self.sparse.clear();
    }

    fn iter(&self) -> impl Iterator<Item = (usize, ExprId)> + '_ {
        self.dense
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|e| (i, e)))
            .chain(self.sparse.iter().map(|(&i, &e)| (i, e)))
    }

    fn update(&mut self, mut f: impl FnMut(usize, ExprId) -> ExprId) {
        for (i, slot) in self.dense.iter_mut().enumerate() {
            if let Some(e) = slot {
                *e = f(i, *e);
            }
        }
        for (&i, e) in self.sparse.iter_mut() {
            *e = f(i, *e);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LocalTable {
    registers: Bank,
    temporaries: Bank,
}

impl LocalTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn bank(&self, v: VarId) -> (&Bank, usize) {
        if v.is_temporary() {
            (&self.temporaries, temp_index(v))
        } else {
            (&self.registers, v.0 as usize)
        }
    }

    fn bank_mut(&mut self, v: VarId) -> (&mut Bank, usize) {
        if v.is_temporary() {
            (&mut self.temporaries, temp_index(v))
        } else {
            (&mut self.registers, v.0 as usize)
        }
    }

    pub fn get(&self, v: VarId) -> Option<ExprId> {
        let (bank, i) = self.bank(v);
        bank.get(i)
    }

    pub fn is_bound(&self, v: VarId) -> bool {
        self.get(v).is_some()
    }

    pub fn set(&mut self, v: VarId, e: ExprId) {
        let (bank, i) = self.bank_mut(v);
        bank.set(i, e);
    }

    /// Back to identity.
    pub fn unbind(&mut self, v: VarId) {
        let (bank, i) = self.bank_mut(v);
        bank.unbind(i);
    }

    pub fn clear_temporaries(&mut self) {
        self.temporaries.clear();
    }

    /// Bound registers and temporaries, registers first.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, ExprId)> + '_ {
        let regs = self.registers.iter().map(|(i, e)| (VarId(i as i32), e));
        let temps = self.temporaries.iter().map(|(i, e)| (temp_var(i), e));
        regs.chain(temps)
    }

    pub fn bound_count(&self) -> usize {
        self.iter().count()
    }

    /// Rewrite every binding in place.
    pub fn update(&mut self, mut f: impl FnMut(VarId, ExprId) -> ExprId) {
        self.registers.update(|i, e| f(VarId(i as i32), e));
        self.temporaries.update(|i, e| f(temp_var(i), e));
    }
}

/// Equal iff the same variables are bound to the same expressions; trailing
/// unbound slots do not matter.
impl PartialEq for LocalTable {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for LocalTable {}

fn temp_index(v: VarId) -> usize {
    (-(v.0 + 1)) as usize
}

fn temp_var(i: usize) -> VarId {
    VarId(-(i as i32) - 1)
}
