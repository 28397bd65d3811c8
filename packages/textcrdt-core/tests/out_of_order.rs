use textcrdt_core::{Error, RemoteOp, Replica};
use textcrdt_test_support::{deliver_in_order, raw};

fn typed_ops() -> Vec<RemoteOp> {
    let mut source = Replica::with_agent("r1");
    source.insert(0, "abc").unwrap();
    source.oplog().export_all().unwrap()
}

#[test]
fn batch_with_forward_parent_is_rejected_whole() {
    let mut doc = Replica::with_agent("local");
    doc.insert(0, "z").unwrap();
    let before = doc.oplog().export_all().unwrap();

    let ops = typed_ops();
    // Second op's parent is the third, which comes later in the batch.
    let batch = vec![ops[0].clone(), ops[2].clone(), ops[1].clone()];
    let err = doc.apply_remote_batch(batch).unwrap_err();
    assert!(matches!(err, Error::MissingParent(_)), "{err}");
    assert_eq!(doc.oplog().export_all().unwrap(), before);
    assert_eq!(doc.content(), "z");
    assert!(!doc.version_vector().contains(&raw("r1", 0)));
}

#[test]
fn duplicate_in_batch_leaves_state_unchanged() {
    let mut doc = Replica::with_agent("local");
    let ops = typed_ops();
    doc.apply_remote_batch(ops[..2].to_vec()).unwrap();
    let frontier = doc.frontier().clone();

    let err = doc
        .apply_remote_batch(vec![ops[2].clone(), ops[1].clone()])
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateOperation(_)));
    assert_eq!(doc.oplog().len(), 2);
    assert_eq!(doc.frontier(), &frontier);
    assert_eq!(doc.content(), "ab");
}

#[test]
fn single_ops_buffer_until_parents_arrive() {
    let ops = typed_ops();
    let mut doc = Replica::with_agent("local");
    let text = deliver_in_order(&mut doc, &ops, &[2, 1, 0]).unwrap();
    assert_eq!(text, "abc");
}

#[test]
fn unknown_reference_is_missing_entry() {
    let mut doc = Replica::with_agent("local");
    let orphan = RemoteOp::insert(
        &"r2".into(),
        0,
        vec![],
        'q',
        Some(raw("ghost", 0)),
        None,
    );
    assert!(matches!(
        doc.apply_remote_batch(vec![orphan]),
        Err(Error::MissingEntry(_))
    ));
    assert!(doc.oplog().is_empty());
}
