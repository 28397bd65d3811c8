use crate::ids::LV;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point in causal history: the set of LVs with no causal successor inside the set.
///
/// Invariant: sorted ascending, duplicate-free. Whether the elements are mutually concurrent is
/// the causal graph's concern (see `CausalGraph::dominators`); this type only guarantees the
/// sorted-set shape so equality is a plain slice comparison.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Frontier(Vec<LV>);

impl Frontier {
    /// The empty frontier (the document before any operation).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new_1(lv: LV) -> Self {
        Self(vec![lv])
    }

    /// Build from arbitrary LVs; sorts and drops exact duplicates.
    pub fn from_unsorted(mut lvs: Vec<LV>) -> Self {
        lvs.sort_unstable();
        lvs.dedup();
        Self(lvs)
    }

    pub(crate) fn from_sorted(lvs: Vec<LV>) -> Self {
        debug_assert!(lvs.windows(2).all(|w| w[0] < w[1]));
        Self(lvs)
    }

    pub fn as_slice(&self) -> &[LV] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, lv: LV) -> bool {
        self.0.binary_search(&lv).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = LV> + '_ {
        self.0.iter().copied()
    }

    /// Highest LV in the frontier, if any.
    pub fn last(&self) -> Option<LV> {
        self.0.last().copied()
    }

    /// Replace the frontier with the single LV `lv`, given that all current entries are its
    /// ancestors. This is the common case when appending a local operation.
    pub(crate) fn replace_with_1(&mut self, lv: LV) {
        self.0.clear();
        self.0.push(lv);
    }

    /// Advance by an op whose parents are `parents`: the parents leave the frontier, `lv` joins it.
    pub(crate) fn advance_by(&mut self, parents: &Frontier, lv: LV) {
        if self.0.as_slice() == parents.as_slice() {
            self.replace_with_1(lv);
            return;
        }
        self.0.retain(|v| !parents.contains(*v));
        match self.0.binary_search(&lv) {
            Ok(_) => {}
            Err(idx) => self.0.insert(idx, lv),
        }
    }
}

impl From<Vec<LV>> for Frontier {
    fn from(lvs: Vec<LV>) -> Self {
        Self::from_unsorted(lvs)
    }
}

impl<'a> IntoIterator for &'a Frontier {
    type Item = &'a LV;
    type IntoIter = std::slice::Iter<'a, LV>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
