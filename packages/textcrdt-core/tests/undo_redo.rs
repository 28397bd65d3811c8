use textcrdt_core::{Replica, UndoManager};
use textcrdt_test_support::sync_all;

#[test]
fn hello_delete_undo_redo() {
    let mut doc = Replica::with_agent("writer");
    let mut undo = UndoManager::new();
    let inserted = doc.insert(0, "Hello").unwrap();
    assert_eq!(inserted.len(), 5);
    undo.record_insert(inserted);

    let deleted = doc.delete(4, 1).unwrap();
    undo.record_delete(deleted.clone());
    assert_eq!(doc.content(), "Hell");

    let outcome = undo.undo(&mut doc).unwrap().unwrap();
    assert_eq!(doc.content(), "Hello");
    assert_eq!(outcome.cursor, Some(4));
    // The revived item is the original tombstone, not a new insert.
    assert_eq!(doc.branch().position_to_lv(4).unwrap(), doc.target_lv(deleted[0]).unwrap());

    undo.redo(&mut doc).unwrap().unwrap();
    assert_eq!(doc.content(), "Hell");

    undo.undo(&mut doc).unwrap();
    undo.undo(&mut doc).unwrap();
    assert_eq!(doc.content(), "");
    assert!(!undo.can_undo());
    undo.redo(&mut doc).unwrap();
    assert_eq!(doc.content(), "Hello");
}

#[test]
fn undo_propagates_to_peers() {
    let mut all = vec![Replica::with_agent("a"), Replica::with_agent("b")];
    let mut undo = UndoManager::new();
    undo.record_insert(all[0].insert(0, "draft").unwrap());
    sync_all(&mut all).unwrap();
    assert_eq!(all[1].content(), "draft");

    undo.undo(&mut all[0]).unwrap();
    sync_all(&mut all).unwrap();
    assert_eq!(all[1].content(), "");
    assert_eq!(all[0].oplog().len(), all[1].oplog().len());
}

#[test]
fn nothing_to_undo_is_not_an_error() {
    let mut doc = Replica::with_agent("writer");
    let mut undo = UndoManager::new();
    assert!(undo.undo(&mut doc).unwrap().is_none());
    assert!(undo.redo(&mut doc).unwrap().is_none());
}
