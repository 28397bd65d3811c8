//! Fugue tree: the positional CRDT ordering every item ever inserted.
//!
//! Each item hangs off a parent item (or the virtual root) as a left or right child. The document
//! is the in-order traversal: left children, the item, right children, with siblings on one side
//! sorted by raw version. Where a new item hangs is decided from its origins alone:
//!
//! * `b` (origin_right) missing, or not a descendant of `a` (origin_left): right child of `a`
//!   (or of the root when `a` is missing);
//! * otherwise: left child of `b`.
//!
//! The tree only ever grows at the leaves, so ancestry between existing items never changes and
//! the placement above is the same on every replica regardless of arrival order. Concurrent runs
//! typed at the same spot become sibling subtrees and never interleave.
//!
//! The full sequence (including tombstones and retreated items) is mirrored in a
//! [`PositionIndex`] so visible offsets resolve without walking the tree.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::{RawVersion, LV};
use crate::index::{ItemIdx, PositionIndex, DEFAULT_CHUNK_CAPACITY};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// One character slot.
#[derive(Clone, Debug)]
pub struct Item {
    /// LV of the insert operation that created this item; also its identity.
    pub lv: LV,
    pub id: RawVersion,
    pub content: char,
    pub origin_left: Option<LV>,
    pub origin_right: Option<LV>,
    /// Whether the creating insert is part of the branch's current version.
    pub inserted: bool,
    pub deleted: bool,
    parent: Option<ItemIdx>,
    side: Side,
    depth: u32,
    left_children: Vec<ItemIdx>,
    right_children: Vec<ItemIdx>,
}

impl Item {
    pub fn is_visible(&self) -> bool {
        self.inserted && !self.deleted
    }
}

/// Everything needed to integrate a new item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemSpec {
    pub lv: LV,
    pub id: RawVersion,
    pub content: char,
    pub origin_left: Option<LV>,
    pub origin_right: Option<LV>,
}

#[derive(Clone, Debug)]
pub struct FugueTree {
    items: Vec<Item>,
    by_lv: HashMap<LV, ItemIdx>,
    /// Right children of the virtual root, sorted by raw version.
    root_children: Vec<ItemIdx>,
    index: PositionIndex,
}

impl Default for FugueTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FugueTree {
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    pub fn with_chunk_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            by_lv: HashMap::new(),
            root_children: Vec::new(),
            index: PositionIndex::new(capacity),
        }
    }

    /// Number of visible items.
    pub fn len(&self) -> usize {
        self.index.len_visible()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items in the arena, tombstones and retreated items included.
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn contains(&self, lv: LV) -> bool {
        self.by_lv.contains_key(&lv)
    }

    pub fn get(&self, lv: LV) -> Option<&Item> {
        self.by_lv.get(&lv).map(|&idx| &self.items[idx])
    }

    fn idx_of(&self, lv: LV) -> Result<ItemIdx> {
        self.by_lv
            .get(&lv)
            .copied()
            .ok_or_else(|| Error::MissingItem(format!("no item for version {lv}")))
    }

    /// Integrate an item (or mark an already known one as inserted again).
    pub fn insert(&mut self, item: ItemSpec) -> Result<()> {
        self.integrate(item)?;
        self.index.flush();
        Ok(())
    }

    /// Mark an item as not part of the current version (walker retreat).
    pub fn remove(&mut self, lv: LV) -> Result<()> {
        self.set_inserted(lv, false)?;
        self.index.flush();
        Ok(())
    }

    /// Tombstone an item. Deleting a deleted item is a no-op.
    pub fn delete(&mut self, lv: LV) -> Result<()> {
        self.set_deleted(lv, true)?;
        self.index.flush();
        Ok(())
    }

    /// Revive a tombstone. Undeleting a visible item is a no-op.
    pub fn undelete(&mut self, lv: LV) -> Result<()> {
        self.set_deleted(lv, false)?;
        self.index.flush();
        Ok(())
    }

    /// Bring the position index up to date after a run of deferred mutations.
    pub(crate) fn flush(&mut self) {
        self.index.flush();
    }

    pub(crate) fn integrate(&mut self, new: ItemSpec) -> Result<()> {
        if self.by_lv.contains_key(&new.lv) {
            return self.set_inserted(new.lv, true);
        }
        let left = new.origin_left.map(|lv| self.idx_of(lv)).transpose()?;
        let right = new.origin_right.map(|lv| self.idx_of(lv)).transpose()?;

        let (parent, side) = match (left, right) {
            (a, None) => (a, Side::Right),
            (Some(a), Some(b)) if !self.is_descendant(b, a) => (Some(a), Side::Right),
            (_, Some(b)) => (Some(b), Side::Left),
        };

        let idx = self.items.len();
        let siblings = match (parent, side) {
            (None, _) => &self.root_children,
            (Some(p), Side::Left) => &self.items[p].left_children,
            (Some(p), Side::Right) => &self.items[p].right_children,
        };
        let slot = siblings.partition_point(|&s| self.items[s].id < new.id);
        let next_sibling = siblings.get(slot).copied();

        // Where the new leaf lands in the full sequence.
        match (next_sibling, parent, side) {
            (Some(s), _, _) => {
                let anchor = self.leftmost_descendant(s);
                self.index.insert_before(anchor, idx);
            }
            (None, Some(p), Side::Left) => self.index.insert_before(p, idx),
            (None, Some(p), Side::Right) => {
                let anchor = self.rightmost_descendant(p);
                self.index.insert_after(anchor, idx);
            }
            (None, None, _) => match self.root_children.last().copied() {
                Some(last) => {
                    let anchor = self.rightmost_descendant(last);
                    self.index.insert_after(anchor, idx);
                }
                None => self.index.insert_first(idx),
            },
        }

        let depth = parent.map(|p| self.items[p].depth + 1).unwrap_or(1);
        match (parent, side) {
            (None, _) => self.root_children.insert(slot, idx),
            (Some(p), Side::Left) => self.items[p].left_children.insert(slot, idx),
            (Some(p), Side::Right) => self.items[p].right_children.insert(slot, idx),
        }
        self.by_lv.insert(new.lv, idx);
        self.items.push(Item {
            lv: new.lv,
            id: new.id,
            content: new.content,
            origin_left: new.origin_left,
            origin_right: new.origin_right,
            inserted: true,
            deleted: false,
            parent,
            side,
            depth,
            left_children: Vec::new(),
            right_children: Vec::new(),
        });
        self.index.set_visible(idx, true);
        Ok(())
    }

    pub(crate) fn set_inserted(&mut self, lv: LV, inserted: bool) -> Result<()> {
        let idx = self.idx_of(lv)?;
        self.items[idx].inserted = inserted;
        self.index.set_visible(idx, self.items[idx].is_visible());
        Ok(())
    }

    pub(crate) fn set_deleted(&mut self, lv: LV, deleted: bool) -> Result<()> {
        let idx = self.idx_of(lv)?;
        self.items[idx].deleted = deleted;
        self.index.set_visible(idx, self.items[idx].is_visible());
        Ok(())
    }

    /// Whether `node` sits in the subtree rooted at `ancestor`.
    fn is_descendant(&self, node: ItemIdx, ancestor: ItemIdx) -> bool {
        let target_depth = self.items[ancestor].depth;
        let mut current = node;
        while self.items[current].depth > target_depth {
            match self.items[current].parent {
                Some(p) => current = p,
                None => return false,
            }
        }
        current == ancestor
    }

    fn leftmost_descendant(&self, mut node: ItemIdx) -> ItemIdx {
        while let Some(&first) = self.items[node].left_children.first() {
            node = first;
        }
        node
    }

    fn rightmost_descendant(&self, mut node: ItemIdx) -> ItemIdx {
        while let Some(&last) = self.items[node].right_children.last() {
            node = last;
        }
        node
    }

    /// Visible items in document order. Cheap to restart: clone the iterator or call again.
    pub fn visible_items(&self) -> impl Iterator<Item = &Item> + Clone + '_ {
        self.index
            .iter()
            .filter(move |&idx| self.index.is_visible(idx))
            .map(move |idx| &self.items[idx])
    }

    /// Every item (visible, tombstoned or retreated) in document order.
    pub fn all_items(&self) -> impl Iterator<Item = &Item> + Clone + '_ {
        self.index.iter().map(move |idx| &self.items[idx])
    }

    pub fn content(&self) -> String {
        self.visible_items().map(|item| item.content).collect()
    }

    pub fn position_to_lv(&self, pos: usize) -> Result<LV> {
        self.index
            .item_at(pos)
            .map(|idx| self.items[idx].lv)
            .ok_or(Error::OutOfBounds {
                pos,
                len: self.len(),
            })
    }

    /// Visible offset of the item created by `lv`, or `None` while it is hidden.
    pub fn lv_to_position(&self, lv: LV) -> Result<Option<usize>> {
        let idx = self.idx_of(lv)?;
        Ok(self.index.position_of(idx))
    }

    /// Origins for a new item typed at visible offset `pos`: the item left of the cursor and the
    /// item right after it in full order (tombstones included).
    pub fn insert_origins(&self, pos: usize) -> Result<(Option<LV>, Option<LV>)> {
        if pos > self.len() {
            return Err(Error::OutOfBounds {
                pos,
                len: self.len(),
            });
        }
        let left = match pos {
            0 => None,
            _ => Some(self.index.item_at(pos - 1).ok_or(Error::OutOfBounds {
                pos,
                len: self.len(),
            })?),
        };
        let right = match left {
            None => self.index.first_item(),
            Some(l) => self.index.next_item(l),
        };
        Ok((
            left.map(|idx| self.items[idx].lv),
            right.map(|idx| self.items[idx].lv),
        ))
    }

    /// Check structural invariants: sibling order, parent links, depths, and that the position
    /// index matches an in-order traversal. Intended for tests and debugging.
    pub fn validate_invariants(&self) -> Result<()> {
        let check_siblings = |parent: Option<ItemIdx>, side: Side, children: &[ItemIdx]| {
            for pair in children.windows(2) {
                if self.items[pair[0]].id >= self.items[pair[1]].id {
                    return Err(Error::InconsistentState("siblings out of order".into()));
                }
            }
            for &c in children {
                let child = &self.items[c];
                let expected_depth = parent.map(|p| self.items[p].depth + 1).unwrap_or(1);
                if child.parent != parent || child.side != side || child.depth != expected_depth {
                    return Err(Error::InconsistentState("child link mismatch".into()));
                }
            }
            Ok(())
        };
        if self.index.len_items() != self.items.len() {
            return Err(Error::InconsistentState("position index lost items".into()));
        }
        check_siblings(None, Side::Right, &self.root_children)?;
        for (idx, item) in self.items.iter().enumerate() {
            check_siblings(Some(idx), Side::Left, &item.left_children)?;
            check_siblings(Some(idx), Side::Right, &item.right_children)?;
            if self.index.is_visible(idx) != item.is_visible() {
                return Err(Error::InconsistentState("visibility cache mismatch".into()));
            }
        }
        if !self.index.iter().eq(self.in_order()) {
            return Err(Error::InconsistentState(
                "position index disagrees with tree order".into(),
            ));
        }
        Ok(())
    }

    fn in_order(&self) -> Vec<ItemIdx> {
        enum Visit {
            Enter(ItemIdx),
            Emit(ItemIdx),
        }
        let mut out = Vec::with_capacity(self.items.len());
        let mut stack: Vec<Visit> = self
            .root_children
            .iter()
            .rev()
            .map(|&c| Visit::Enter(c))
            .collect();
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Emit(idx) => out.push(idx),
                Visit::Enter(idx) => {
                    let item = &self.items[idx];
                    stack.extend(item.right_children.iter().rev().map(|&c| Visit::Enter(c)));
                    stack.push(Visit::Emit(idx));
                    stack.extend(item.left_children.iter().rev().map(|&c| Visit::Enter(c)));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AgentId;

    fn item_spec(
        lv: LV,
        agent: &str,
        seq: u64,
        c: char,
        left: Option<LV>,
        right: Option<LV>,
    ) -> ItemSpec {
        ItemSpec {
            lv,
            id: RawVersion::new(&AgentId::from(agent), seq),
            content: c,
            origin_left: left,
            origin_right: right,
        }
    }

    #[test]
    fn sequential_typing_builds_text() {
        let mut tree = FugueTree::with_chunk_capacity(2);
        let mut prev = None;
        for (i, c) in "hello".chars().enumerate() {
            tree.insert(item_spec(i, "a", i as u64, c, prev, None)).unwrap();
            prev = Some(i);
        }
        assert_eq!(tree.content(), "hello");
        assert_eq!(tree.position_to_lv(4).unwrap(), 4);
        assert_eq!(tree.lv_to_position(2).unwrap(), Some(2));
        tree.validate_invariants().unwrap();
    }

    #[test]
    fn insert_between_neighbours() {
        let mut tree = FugueTree::new();
        tree.insert(item_spec(0, "a", 0, 'a', None, None)).unwrap();
        tree.insert(item_spec(1, "a", 1, 'c', Some(0), None)).unwrap();
        // Typed between 'a' and 'c': 'c' is a descendant of 'a', so 'b' is a left child of 'c'.
        tree.insert(item_spec(2, "a", 2, 'b', Some(0), Some(1))).unwrap();
        // Typed at the very start.
        tree.insert(item_spec(3, "a", 3, '>', None, Some(0))).unwrap();
        assert_eq!(tree.content(), ">abc");
        tree.validate_invariants().unwrap();
    }

    #[test]
    fn concurrent_runs_do_not_interleave() {
        // Two agents type after the same 'x', each a run of three.
        let ops = vec![
            item_spec(0, "a", 0, 'x', None, None),
            item_spec(1, "a", 1, '1', Some(0), None),
            item_spec(2, "a", 2, '2', Some(1), None),
            item_spec(3, "a", 3, '3', Some(2), None),
            item_spec(4, "b", 0, 'p', Some(0), None),
            item_spec(5, "b", 1, 'q', Some(4), None),
            item_spec(6, "b", 2, 'r', Some(5), None),
        ];
        let mut forward = FugueTree::new();
        for s in ops.iter().cloned() {
            forward.insert(s).unwrap();
        }
        // Same ops in a different causally valid order.
        let mut interleaved = FugueTree::new();
        for i in [0, 4, 1, 5, 2, 6, 3] {
            interleaved.insert(ops[i].clone()).unwrap();
        }
        assert_eq!(forward.content(), "x123pqr");
        assert_eq!(interleaved.content(), forward.content());
        interleaved.validate_invariants().unwrap();
    }

    #[test]
    fn delete_and_undelete_are_idempotent() {
        let mut tree = FugueTree::new();
        tree.insert(item_spec(0, "a", 0, 'a', None, None)).unwrap();
        tree.insert(item_spec(1, "a", 1, 'b', Some(0), None)).unwrap();
        tree.delete(0).unwrap();
        tree.delete(0).unwrap();
        assert_eq!(tree.content(), "b");
        assert_eq!(tree.lv_to_position(0).unwrap(), None);
        assert_eq!(tree.lv_to_position(1).unwrap(), Some(0));
        tree.undelete(0).unwrap();
        tree.undelete(0).unwrap();
        assert_eq!(tree.content(), "ab");
        assert!(matches!(tree.delete(9), Err(Error::MissingItem(_))));
        assert!(matches!(tree.undelete(9), Err(Error::MissingItem(_))));
    }

    #[test]
    fn insert_origins_skip_past_tombstones() {
        let mut tree = FugueTree::new();
        tree.insert(item_spec(0, "a", 0, 'a', None, None)).unwrap();
        tree.insert(item_spec(1, "a", 1, 'b', Some(0), None)).unwrap();
        tree.insert(item_spec(2, "a", 2, 'c', Some(1), None)).unwrap();
        tree.delete(1).unwrap();
        assert_eq!(tree.insert_origins(0).unwrap(), (None, Some(0)));
        assert_eq!(tree.insert_origins(1).unwrap(), (Some(0), Some(1)));
        assert_eq!(tree.insert_origins(2).unwrap(), (Some(2), None));
        assert!(matches!(
            tree.insert_origins(3),
            Err(Error::OutOfBounds { pos: 3, len: 2 })
        ));
    }

    #[test]
    fn unknown_origin_is_missing_item() {
        let mut tree = FugueTree::new();
        let err = tree.insert(item_spec(0, "a", 0, 'a', Some(7), None)).unwrap_err();
        assert!(matches!(err, Error::MissingItem(_)));
        assert_eq!(tree.total_items(), 0);
    }
}
