use textcrdt_core::{diff_and_collect, Branch, BranchState, Frontier, Replica};
use textcrdt_test_support::{replicas, sync_all};

fn edited() -> Replica {
    let mut all = replicas(&["a", "b"]);
    all[0].insert(0, "The cat").unwrap();
    sync_all(&mut all).unwrap();
    all[0].delete(4, 3).unwrap();
    all[0].insert(4, "dog").unwrap();
    all[1].insert(7, " sat").unwrap();
    sync_all(&mut all).unwrap();
    all.swap_remove(0)
}

#[test]
fn checkout_old_version_and_back() {
    let doc = edited();
    let oplog = doc.oplog();
    let mut branch = Branch::with_chunk_capacity(3);
    assert_eq!(branch.checkout(oplog, oplog.version()).unwrap().to_string(), "The dog sat");

    let typed = Frontier::new_1(6);
    assert_eq!(branch.checkout(oplog, &typed).unwrap().to_string(), "The cat");
    assert_eq!(branch.checkout(oplog, &Frontier::root()).unwrap().to_string(), "");
    assert_eq!(branch.checkout(oplog, oplog.version()).unwrap().to_string(), doc.content());
    assert_eq!(branch.state(), BranchState::Clean);
    branch.tree().validate_invariants().unwrap();
}

#[test]
fn every_prefix_matches_rebuild() {
    let doc = edited();
    let oplog = doc.oplog();
    let mut walked = Branch::with_chunk_capacity(2);
    // Walk backwards through every single-op version, then forwards again.
    let versions: Vec<Frontier> = (0..oplog.len()).map(Frontier::new_1).collect();
    for frontier in versions.iter().rev().chain(versions.iter()) {
        walked.checkout(oplog, frontier).unwrap();
        let mut rebuilt = Branch::new();
        rebuilt.rebuild(oplog, frontier).unwrap();
        assert_eq!(walked.content(), rebuilt.content(), "at {frontier:?}");
        walked.tree().validate_invariants().unwrap();
    }
}

#[test]
fn concurrent_heads_checkout_independently() {
    let doc = edited();
    let oplog = doc.oplog();
    let heads = oplog.version().clone();
    assert_eq!(heads.len(), 2);

    let mut branch = Branch::new();
    let mut texts = Vec::new();
    for lv in heads.iter() {
        texts.push(branch.checkout(oplog, &Frontier::new_1(lv)).unwrap().to_string());
    }
    texts.sort();
    assert_eq!(texts, vec!["The cat sat".to_string(), "The dog".to_string()]);

    let merged = branch.merge(oplog, &heads).unwrap();
    assert_eq!(merged, heads);
    assert_eq!(branch.content(), "The dog sat");
}

#[test]
fn diff_and_collect_feeds_a_catch_up() {
    let doc = edited();
    let oplog = doc.oplog();
    let old = Frontier::new_1(6);
    let missing = diff_and_collect(oplog, &old, oplog.version()).unwrap();
    assert_eq!(missing.len(), oplog.len() - 7);
    for op in &missing {
        assert!(!oplog.graph().frontier_contains(&old, op.lv).unwrap());
    }
}
