use textcrdt_core::{OpLog, Replica, ReplicaConfig};
use textcrdt_test_support::{replicas, sync_all};

#[test]
fn replayed_log_restores_document_and_continues() {
    let mut all = replicas(&["a", "b"]);
    all[0].insert(0, "persist me").unwrap();
    sync_all(&mut all).unwrap();
    all[1].delete(0, 8).unwrap();
    all[0].insert(10, "!").unwrap();
    sync_all(&mut all).unwrap();

    let saved = all[0].oplog().export_all().unwrap();
    let oplog = OpLog::from_remote_ops(saved.clone()).unwrap();
    assert_eq!(oplog.export_all().unwrap(), saved);

    let mut restored = Replica::from_oplog(ReplicaConfig::new("a"), oplog).unwrap();
    assert_eq!(restored.content(), all[0].content());
    assert_eq!(restored.content(), "me!");

    // The restored replica picks up its own sequence numbers where it left off.
    let lv = restored.insert(0, ">").unwrap()[0];
    assert_eq!(restored.oplog().get(lv).unwrap().seq(), 11);
    assert_eq!(restored.content(), ">me!");
}

#[test]
fn restore_with_other_agent_keeps_history() {
    let mut original = Replica::with_agent("a");
    original.insert(0, "abc").unwrap();
    original.delete(1, 1).unwrap();

    let oplog = OpLog::from_remote_ops(original.oplog().export_all().unwrap()).unwrap();
    let config = ReplicaConfig::new("a-restarted").with_index_chunk_capacity(4);
    let mut restored = Replica::from_oplog(config, oplog).unwrap();
    assert_eq!(restored.content(), "ac");
    restored.insert(1, "B").unwrap();
    assert_eq!(restored.content(), "aBc");
    assert_eq!(restored.oplog().len(), 5);
}
