//! Removal of duplicate and non-minimal edge sets.

use pathfinder_dag::{EdgeId, EdgeSet};
use std::collections::BTreeMap;

/// Dense numbering of the edges referenced by a batch of edge sets.
#[derive(Debug, Default)]
pub struct EdgeDictionary {
    index: BTreeMap<EdgeId, usize>,
}

/// An edge set as a bit vector over an [`EdgeDictionary`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EdgeBits(Vec<u64>);

impl EdgeDictionary {
    pub fn new<'a>(sets: impl IntoIterator<Item = &'a EdgeSet>) -> Self {
        let mut index = BTreeMap::new();
        for edge in sets.into_iter().flatten() {
            let next = index.len();
            index.entry(*edge).or_insert(next);
        }
        EdgeDictionary { index }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Edges missing from the dictionary are ignored.
    pub fn encode(&self, set: &EdgeSet) -> EdgeBits {
        let mut words = vec![0u64; self.index.len().div_ceil(64)];
        for i in set.iter().filter_map(|e| self.index.get(e)) {
            words[i / 64] |= 1 << (i % 64);
        }
        EdgeBits(words)
    }
}

impl EdgeBits {
    pub fn is_subset_of(&self, other: &EdgeBits) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a & !b == 0)
    }

    pub fn count(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }
}

/// Keep one copy of each set that has no strict subset in `sets`. Order of
/// first occurrence is preserved.
pub fn keep_minimal(sets: Vec<EdgeSet>) -> Vec<EdgeSet> {
    let dict = EdgeDictionary::new(&sets);
    let bits: Vec<EdgeBits> = sets.iter().map(|s| dict.encode(s)).collect();
    let mut kept = Vec::new();
    for (i, set) in sets.iter().enumerate() {
        let dominated = bits.iter().enumerate().any(|(j, other)| {
            j != i && other.is_subset_of(&bits[i]) && (other != &bits[i] || j < i)
        });
        if !dominated {
            kept.push(set.clone());
        }
    }
    kept
}
