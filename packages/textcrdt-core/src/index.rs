//! Order-statistic index over the full item sequence (tombstones and retreated items included).
//!
//! Items live in chunks of bounded size; each chunk caches how many of its items are visible.
//! Chunk ranks and visible prefix sums are recomputed lazily from the first chunk an edit
//! touched, so a run of edits near the end of the document only refreshes the tail. Lookups in
//! either direction are a binary search over chunk prefixes plus a scan of one chunk.

pub(crate) type ItemIdx = usize;

pub const DEFAULT_CHUNK_CAPACITY: usize = 64;

#[derive(Clone, Debug, Default)]
struct Chunk {
    items: Vec<ItemIdx>,
    visible: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct PositionIndex {
    capacity: usize,
    /// Chunk arena; ids are stable.
    chunks: Vec<Chunk>,
    /// Chunk ids in document order.
    order: Vec<usize>,
    /// chunk id -> position in `order`. Valid for positions below `dirty`.
    rank: Vec<usize>,
    /// Visible items before `order[i]`. Valid for `i < dirty`.
    prefix: Vec<usize>,
    dirty: usize,
    /// item -> chunk id.
    item_chunk: Vec<usize>,
    visible: Vec<bool>,
    total_visible: usize,
}

impl PositionIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            chunks: Vec::new(),
            order: Vec::new(),
            rank: Vec::new(),
            prefix: Vec::new(),
            dirty: 0,
            item_chunk: Vec::new(),
            visible: Vec::new(),
            total_visible: 0,
        }
    }

    pub fn len_items(&self) -> usize {
        self.item_chunk.len()
    }

    pub fn len_visible(&self) -> usize {
        self.total_visible
    }

    pub fn is_clean(&self) -> bool {
        self.dirty >= self.order.len()
    }

    pub fn is_visible(&self, item: ItemIdx) -> bool {
        self.visible.get(item).copied().unwrap_or(false)
    }

    fn register(&mut self, item: ItemIdx, chunk: usize) {
        debug_assert_eq!(item, self.item_chunk.len(), "items are registered densely");
        self.item_chunk.push(chunk);
        self.visible.push(false);
    }

    fn new_chunk(&mut self, order_pos: usize, items: Vec<ItemIdx>) -> usize {
        let id = self.chunks.len();
        self.chunks.push(Chunk { items, visible: 0 });
        self.rank.push(order_pos);
        self.order.insert(order_pos, id);
        self.prefix.insert(order_pos, 0);
        self.dirty = self.dirty.min(order_pos);
        id
    }

    /// Position of `chunk` in `order`, when the cached rank is still trustworthy.
    fn valid_rank(&self, chunk: usize) -> Option<usize> {
        let r = self.rank[chunk];
        (r < self.dirty && self.order.get(r) == Some(&chunk)).then_some(r)
    }

    fn order_pos(&self, chunk: usize) -> usize {
        self.valid_rank(chunk)
            .or_else(|| self.order.iter().position(|&c| c == chunk))
            .unwrap_or(self.order.len())
    }

    /// Record that `chunk` changed its visible count or contents.
    fn touched(&mut self, chunk: usize) {
        if let Some(r) = self.valid_rank(chunk) {
            self.dirty = self.dirty.min(r + 1);
        }
    }

    /// Insert a new (invisible) item as the very first element.
    pub fn insert_first(&mut self, item: ItemIdx) {
        if self.order.is_empty() {
            let chunk = self.new_chunk(0, Vec::new());
            self.register(item, chunk);
            self.chunks[chunk].items.push(item);
            return;
        }
        let chunk = self.order[0];
        self.register(item, chunk);
        self.chunks[chunk].items.insert(0, item);
        self.dirty = self.dirty.min(1);
        self.maybe_split(chunk);
    }

    /// Insert a new (invisible) item immediately after `anchor`.
    pub fn insert_after(&mut self, anchor: ItemIdx, item: ItemIdx) {
        self.insert_near(anchor, item, 1);
    }

    /// Insert a new (invisible) item immediately before `anchor`.
    pub fn insert_before(&mut self, anchor: ItemIdx, item: ItemIdx) {
        self.insert_near(anchor, item, 0);
    }

    fn insert_near(&mut self, anchor: ItemIdx, item: ItemIdx, offset: usize) {
        let chunk = self.item_chunk[anchor];
        let at = self.chunks[chunk]
            .items
            .iter()
            .position(|&i| i == anchor)
            .unwrap_or(self.chunks[chunk].items.len());
        self.register(item, chunk);
        self.chunks[chunk].items.insert(at + offset, item);
        self.touched(chunk);
        self.maybe_split(chunk);
    }

    fn maybe_split(&mut self, chunk: usize) {
        if self.chunks[chunk].items.len() <= self.capacity {
            return;
        }
        let pos = self.order_pos(chunk);
        let half = self.chunks[chunk].items.len() / 2;
        let tail = self.chunks[chunk].items.split_off(half);
        let tail_visible = tail.iter().filter(|&&i| self.visible[i]).count();
        self.chunks[chunk].visible -= tail_visible;

        let new_id = self.new_chunk(pos + 1, tail);
        self.chunks[new_id].visible = tail_visible;
        for i in 0..self.chunks[new_id].items.len() {
            let moved = self.chunks[new_id].items[i];
            self.item_chunk[moved] = new_id;
        }
    }

    pub fn set_visible(&mut self, item: ItemIdx, visible: bool) {
        if self.visible[item] == visible {
            return;
        }
        self.visible[item] = visible;
        let chunk = self.item_chunk[item];
        if visible {
            self.chunks[chunk].visible += 1;
            self.total_visible += 1;
        } else {
            self.chunks[chunk].visible -= 1;
            self.total_visible -= 1;
        }
        self.touched(chunk);
    }

    /// Bring ranks and prefix sums up to date from the first dirty chunk onwards.
    pub fn flush(&mut self) {
        for i in self.dirty..self.order.len() {
            let id = self.order[i];
            self.rank[id] = i;
            self.prefix[i] = match i {
                0 => 0,
                _ => self.prefix[i - 1] + self.chunks[self.order[i - 1]].visible,
            };
        }
        self.dirty = self.order.len();
    }

    /// Visible offset of `item`, or `None` if it is not visible. Requires a flushed index.
    pub fn position_of(&self, item: ItemIdx) -> Option<usize> {
        debug_assert!(self.is_clean());
        if !self.is_visible(item) {
            return None;
        }
        let chunk = self.item_chunk[item];
        let base = self.prefix[self.rank[chunk]];
        let within = self.chunks[chunk]
            .items
            .iter()
            .take_while(|&&i| i != item)
            .filter(|&&i| self.visible[i])
            .count();
        Some(base + within)
    }

    /// Visible item at offset `pos`. Requires a flushed index.
    pub fn item_at(&self, pos: usize) -> Option<ItemIdx> {
        debug_assert!(self.is_clean());
        if pos >= self.total_visible {
            return None;
        }
        let i = self.prefix.partition_point(|&p| p <= pos).checked_sub(1)?;
        let chunk = &self.chunks[self.order[i]];
        let mut remaining = pos - self.prefix[i];
        for &item in &chunk.items {
            if self.visible[item] {
                if remaining == 0 {
                    return Some(item);
                }
                remaining -= 1;
            }
        }
        None
    }

    /// Item following `item` in full document order. Requires a flushed index.
    pub fn next_item(&self, item: ItemIdx) -> Option<ItemIdx> {
        debug_assert!(self.is_clean());
        let chunk = self.item_chunk[item];
        let items = &self.chunks[chunk].items;
        let at = items.iter().position(|&i| i == item)?;
        if let Some(&next) = items.get(at + 1) {
            return Some(next);
        }
        self.order[self.rank[chunk] + 1..]
            .iter()
            .find_map(|&c| self.chunks[c].items.first().copied())
    }

    pub fn first_item(&self) -> Option<ItemIdx> {
        self.order
            .iter()
            .find_map(|&c| self.chunks[c].items.first().copied())
    }

    /// All items in document order.
    pub fn iter(&self) -> impl Iterator<Item = ItemIdx> + Clone + '_ {
        self.order
            .iter()
            .flat_map(move |&c| self.chunks[c].items.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(capacity: usize, n: usize) -> PositionIndex {
        let mut index = PositionIndex::new(capacity);
        index.insert_first(0);
        for item in 1..n {
            index.insert_after(item - 1, item);
        }
        for item in 0..n {
            index.set_visible(item, true);
        }
        index.flush();
        index
    }

    #[test]
    fn splits_chunks_and_keeps_order() {
        let index = build(4, 20);
        assert_eq!(index.iter().collect::<Vec<_>>(), (0..20).collect::<Vec<_>>());
        for pos in 0..20 {
            assert_eq!(index.item_at(pos), Some(pos));
            assert_eq!(index.position_of(pos), Some(pos));
        }
        assert_eq!(index.item_at(20), None);
    }

    #[test]
    fn hidden_items_are_skipped() {
        let mut index = build(4, 10);
        index.set_visible(0, false);
        index.set_visible(5, false);
        index.flush();
        assert_eq!(index.len_visible(), 8);
        assert_eq!(index.position_of(5), None);
        assert_eq!(index.position_of(6), Some(4));
        assert_eq!(index.item_at(0), Some(1));
        assert_eq!(index.item_at(4), Some(6));
        assert_eq!(index.next_item(4), Some(5));
    }

    #[test]
    fn inserts_before_and_at_front() {
        let mut index = build(3, 6);
        index.insert_before(3, 6);
        index.insert_first(7);
        index.set_visible(6, true);
        index.flush();
        assert_eq!(
            index.iter().collect::<Vec<_>>(),
            vec![7, 0, 1, 2, 6, 3, 4, 5]
        );
        assert_eq!(index.position_of(6), Some(3));
        assert_eq!(index.first_item(), Some(7));
        assert_eq!(index.item_at(3), Some(6));
    }
}
