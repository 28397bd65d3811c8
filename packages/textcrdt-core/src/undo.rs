//! Stack-based undo/redo over anything that can hide and reveal items by identity.
//!
//! Groups record LVs (insert ops, or delete ops, or the items themselves); they are resolved to
//! target items only when a group is undone or redone, so the stacks stay valid while remote
//! edits move text around.

use tracing::debug;

use crate::error::{ErrorKind, Result};
use crate::ids::LV;

/// Primitives the undo manager needs from a document.
pub trait Undoable {
    /// Item an operation acts on (the item itself for inserts).
    fn target_lv(&self, op: LV) -> Result<LV>;
    /// Visible offset of an item, `None` while it is hidden.
    fn lv_to_position(&self, item: LV) -> Result<Option<usize>>;
    /// Emit a delete for `item`. Returns the new operation's LV.
    fn delete_by_lv(&mut self, item: LV) -> Result<LV>;
    /// Emit an undelete for `item`. Returns the new operation's LV.
    fn undelete_by_lv(&mut self, item: LV) -> Result<LV>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Change {
    Inserted,
    Deleted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Hide,
    Reveal,
}

#[derive(Clone, Debug)]
struct UndoGroup {
    change: Change,
    lvs: Vec<LV>,
}

/// Result of undoing or redoing one group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UndoOutcome {
    /// LVs of the operations emitted.
    pub applied: Vec<LV>,
    /// Items that no longer exist in the document and were left alone.
    pub skipped: Vec<LV>,
    /// Where the first affected item is (revealed) or was (hidden).
    pub cursor: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct UndoManager {
    undo: Vec<UndoGroup>,
    redo: Vec<UndoGroup>,
}

impl UndoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a group of inserts (their op LVs).
    pub fn record_insert(&mut self, items: impl IntoIterator<Item = LV>) {
        self.record(Change::Inserted, items.into_iter().collect());
    }

    /// Record a group of deletes (their op LVs or the deleted items).
    pub fn record_delete(&mut self, items: impl IntoIterator<Item = LV>) {
        self.record(Change::Deleted, items.into_iter().collect());
    }

    fn record(&mut self, change: Change, lvs: Vec<LV>) {
        if lvs.is_empty() {
            return;
        }
        self.undo.push(UndoGroup { change, lvs });
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Revert the most recent group. `Ok(None)` when there is nothing to undo.
    pub fn undo<H: Undoable + ?Sized>(&mut self, host: &mut H) -> Result<Option<UndoOutcome>> {
        let Some(group) = self.undo.pop() else {
            return Ok(None);
        };
        let action = match group.change {
            Change::Inserted => Action::Hide,
            Change::Deleted => Action::Reveal,
        };
        match apply(host, &group.lvs, action) {
            Ok(outcome) => {
                debug!(applied = outcome.applied.len(), skipped = outcome.skipped.len(), "undo");
                self.redo.push(group);
                Ok(Some(outcome))
            }
            Err(err) => {
                self.undo.push(group);
                Err(err)
            }
        }
    }

    /// Re-apply the most recently undone group.
    pub fn redo<H: Undoable + ?Sized>(&mut self, host: &mut H) -> Result<Option<UndoOutcome>> {
        let Some(group) = self.redo.pop() else {
            return Ok(None);
        };
        let action = match group.change {
            Change::Inserted => Action::Reveal,
            Change::Deleted => Action::Hide,
        };
        match apply(host, &group.lvs, action) {
            Ok(outcome) => {
                debug!(applied = outcome.applied.len(), skipped = outcome.skipped.len(), "redo");
                self.undo.push(group);
                Ok(Some(outcome))
            }
            Err(err) => {
                self.redo.push(group);
                Err(err)
            }
        }
    }
}

/// Apply `action` to every target, skipping targets that are gone. Any other error aborts; items
/// handled before it keep their new state.
fn apply<H: Undoable + ?Sized>(host: &mut H, lvs: &[LV], action: Action) -> Result<UndoOutcome> {
    let mut outcome = UndoOutcome::default();
    for &lv in lvs {
        let step = host.target_lv(lv).and_then(|target| {
            let before = match action {
                Action::Hide => host.lv_to_position(target)?,
                Action::Reveal => None,
            };
            let op = match action {
                Action::Hide => host.delete_by_lv(target)?,
                Action::Reveal => host.undelete_by_lv(target)?,
            };
            let at = match action {
                Action::Hide => before,
                Action::Reveal => host.lv_to_position(target)?,
            };
            Ok((op, at))
        });
        match step {
            Ok((op, at)) => {
                outcome.applied.push(op);
                if outcome.cursor.is_none() {
                    outcome.cursor = at;
                }
            }
            Err(err) if err.kind() == ErrorKind::MissingTarget => outcome.skipped.push(lv),
            Err(err) => return Err(err),
        }
    }
    Ok(outcome)
}
