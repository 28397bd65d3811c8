//! Fixtures shared by the textcrdt integration suites.

use textcrdt_core::{
    export_missing, AgentId, Error, RawVersion, RemoteOp, Replica, Result, SyncSession,
};

pub fn raw(agent: &str, seq: u64) -> RawVersion {
    RawVersion::new(&AgentId::from(agent), seq)
}

/// One replica per agent name.
pub fn replicas(agents: &[&str]) -> Vec<Replica> {
    agents.iter().map(|a| Replica::with_agent(a)).collect()
}

/// Exchange everything between every pair until all replicas hold the same log.
pub fn sync_all(replicas: &mut [Replica]) -> Result<()> {
    let session = SyncSession::new();
    for from in 0..replicas.len() {
        for to in 0..replicas.len() {
            if from == to {
                continue;
            }
            let batch = export_missing(&replicas[from], replicas[to].version_vector())?;
            if !batch.is_empty() {
                session.apply(&mut replicas[to], batch)?;
            }
        }
    }
    Ok(())
}

/// Panic unless every replica shows the same text and knows the same operations.
pub fn assert_converged(replicas: &[Replica]) {
    let Some(first) = replicas.first() else {
        return;
    };
    for other in &replicas[1..] {
        assert_eq!(
            first.content(),
            other.content(),
            "{} and {} diverged",
            first.agent(),
            other.agent()
        );
        assert_eq!(first.version_vector(), other.version_vector());
    }
}

/// Deliver `ops` one at a time in the given `order`, holding back any op whose parents have not
/// arrived yet and retrying it after every successful delivery. Returns the final text.
pub fn deliver_in_order(
    replica: &mut Replica,
    ops: &[RemoteOp],
    order: &[usize],
) -> Result<String> {
    let mut pending: Vec<&RemoteOp> = order.iter().map(|&i| &ops[i]).collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut held = Vec::new();
        for op in pending {
            match replica.apply_remote_batch(vec![op.clone()]) {
                Ok(_) => {}
                Err(Error::MissingParent(_)) | Err(Error::MissingEntry(_)) => held.push(op),
                Err(err) => return Err(err),
            }
        }
        if held.len() == before {
            return Err(Error::MissingParent(format!(
                "{} operations can never be delivered",
                held.len()
            )));
        }
        pending = held;
    }
    Ok(replica.content())
}

/// Every permutation of `0..n`, for exhaustive delivery-order checks on small logs.
pub fn permutations(n: usize) -> Vec<Vec<usize>> {
    fn extend(prefix: &mut Vec<usize>, rest: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if rest.is_empty() {
            out.push(prefix.clone());
            return;
        }
        for i in 0..rest.len() {
            let next = rest.remove(i);
            prefix.push(next);
            extend(prefix, rest, out);
            prefix.pop();
            rest.insert(i, next);
        }
    }
    let mut out = Vec::new();
    extend(&mut Vec::new(), &mut (0..n).collect(), &mut out);
    out
}
