//! Small cross-rank reductions built on the sparse exchange.
//!
//! Values travel as `f64` bit patterns in `u64` words. Reductions gather to a
//! root rank, combine in rank order, and optionally broadcast the result.

use crate::algs::communicator::{Communicator, ExchangeTags, tags};
use crate::algs::completion::{WaitPolicy, sparse_exchange};
use crate::mesh_error::MeshHaloError;
use std::collections::{BTreeMap, BTreeSet};

/// Element-wise combination applied by [`reduce_to_root`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    fn apply(self, acc: f64, x: f64) -> f64 {
        match self {
            ReduceOp::Sum => acc + x,
            ReduceOp::Max => acc.max(x),
            ReduceOp::Min => acc.min(x),
        }
    }
}

const KIND_GATHER: u16 = 0x51;
const KIND_BCAST: u16 = 0x52;

fn star(comm: &impl Communicator, root: usize) -> BTreeSet<usize> {
    if comm.rank() == root {
        (0..comm.size()).filter(|&r| r != root).collect()
    } else {
        BTreeSet::from([root])
    }
}

fn to_words(values: &[f64]) -> Vec<u64> {
    values.iter().map(|x| x.to_bits().to_le()).collect()
}

fn from_words(words: &[u64]) -> Vec<f64> {
    words.iter().map(|w| f64::from_bits(u64::from_le(*w))).collect()
}

/// Combine `local` element-wise across all ranks; only `root` gets `Some`.
pub fn reduce_to_root<C: Communicator>(
    comm: &C,
    root: usize,
    local: &[f64],
    op: ReduceOp,
) -> Result<Option<Vec<f64>>, MeshHaloError> {
    let me = comm.rank();
    let outgoing = BTreeMap::from([(root, to_words(local))]);
    let got = sparse_exchange(
        comm,
        ExchangeTags::from_base(tags::REDUCTION),
        KIND_GATHER,
        &star(comm, root),
        outgoing,
        WaitPolicy::BestEffort,
    )?;
    if me != root {
        return Ok(None);
    }
    let mut acc = local.to_vec();
    for (src, words) in got.into_iter().filter(|(src, _)| *src != me) {
        if words.len() != acc.len() {
            return Err(MeshHaloError::comm(
                src,
                format!("reduction of {} values, got {}", acc.len(), words.len()),
            ));
        }
        for (a, x) in acc.iter_mut().zip(from_words(&words)) {
            *a = op.apply(*a, x);
        }
    }
    Ok(Some(acc))
}

/// Send `values` from `root` to every rank. Non-root ranks pass `None`.
pub fn broadcast<C: Communicator>(
    comm: &C,
    root: usize,
    values: Option<&[f64]>,
) -> Result<Vec<f64>, MeshHaloError> {
    let me = comm.rank();
    let tags = ExchangeTags::from_base(tags::REDUCTION.offset(2));
    if me == root {
        let values = values.ok_or_else(|| {
            MeshHaloError::Invariant(format!("rank {me}: broadcast root has no values"))
        })?;
        let outgoing = (0..comm.size())
            .filter(|&r| r != root)
            .map(|r| (r, to_words(values)))
            .collect();
        sparse_exchange::<u64, _>(
            comm,
            tags,
            KIND_BCAST,
            &star(comm, root),
            outgoing,
            WaitPolicy::BestEffort,
        )?;
        return Ok(values.to_vec());
    }
    let mut got = sparse_exchange::<u64, _>(
        comm,
        tags,
        KIND_BCAST,
        &star(comm, root),
        BTreeMap::new(),
        WaitPolicy::BestEffort,
    )?;
    match got.remove(&root) {
        Some(words) => Ok(from_words(&words)),
        // an empty broadcast sends nothing
        None => Ok(Vec::new()),
    }
}

/// Reduce to rank 0, then broadcast, so every rank holds the result.
pub fn allreduce<C: Communicator>(
    comm: &C,
    local: &[f64],
    op: ReduceOp,
) -> Result<Vec<f64>, MeshHaloError> {
    if comm.size() == 1 {
        return Ok(local.to_vec());
    }
    let reduced = reduce_to_root(comm, 0, local, op)?;
    broadcast(comm, 0, reduced.as_deref())
}

/// Global sum of a count.
pub fn allreduce_count<C: Communicator>(comm: &C, n: usize) -> Result<usize, MeshHaloError> {
    let total = allreduce(comm, &[n as f64], ReduceOp::Sum)?;
    Ok(total.first().copied().unwrap_or(0.0).round() as usize)
}
