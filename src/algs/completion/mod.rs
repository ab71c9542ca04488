//! Two-stage sparse exchange: counts, then payload.
//!
//! Every protocol round (ownership resolution, ghost growth, thin-layer
//! correction, tag exchange) is a call to [`sparse_exchange`] or
//! [`all_to_all`] with its own [`ExchangeTags`].

pub mod data_exchange;
pub mod size_exchange;

use crate::algs::communicator::{Communicator, ExchangeTags};
use crate::mesh_error::MeshHaloError;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How long a rank blocks at the end of a round.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitPolicy {
    /// Drain every send and barrier before the round returns.
    #[default]
    WaitAll,
    /// Only the receives this rank needs are awaited.
    BestEffort,
}

/// Exchange records with the ranks in `neighbors`.
///
/// Both sides must list each other as neighbours. Records addressed to this
/// rank itself are delivered locally without touching the communicator.
pub fn sparse_exchange<T, C>(
    comm: &C,
    tags: ExchangeTags,
    kind: u16,
    neighbors: &BTreeSet<usize>,
    mut outgoing: BTreeMap<usize, Vec<T>>,
    wait: WaitPolicy,
) -> Result<BTreeMap<usize, Vec<T>>, MeshHaloError>
where
    T: Pod,
    C: Communicator,
{
    let me = comm.rank();
    let local = outgoing.remove(&me);
    if let Some(stray) = outgoing.keys().find(|r| !neighbors.contains(r)) {
        return Err(MeshHaloError::Invariant(format!(
            "rank {me}: records addressed to non-neighbour {stray}"
        )));
    }
    let mut nbrs = neighbors.clone();
    nbrs.remove(&me);

    let counts_out: BTreeMap<usize, usize> =
        outgoing.iter().map(|(&r, v)| (r, v.len())).collect();
    let counts_in = size_exchange::exchange_sizes_symmetric(&counts_out, comm, tags.sizes, &nbrs)?;
    let mut received = data_exchange::exchange_data(&outgoing, &counts_in, comm, tags.data, kind)?;
    if let Some(local) = local {
        received.insert(me, local);
    }
    if wait == WaitPolicy::WaitAll {
        comm.barrier()?;
    }
    Ok(received)
}

/// Exchange records with every other rank.
pub fn all_to_all<T, C>(
    comm: &C,
    tags: ExchangeTags,
    kind: u16,
    outgoing: BTreeMap<usize, Vec<T>>,
    wait: WaitPolicy,
) -> Result<BTreeMap<usize, Vec<T>>, MeshHaloError>
where
    T: Pod,
    C: Communicator,
{
    let everyone: BTreeSet<usize> = (0..comm.size()).collect();
    sparse_exchange(comm, tags, kind, &everyone, outgoing, wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{CommTag, NoComm, RayonComm};

    #[test]
    fn serial_self_delivery() {
        let out = BTreeMap::from([(0usize, vec![1u64, 2, 3])]);
        let got = all_to_all(
            &NoComm,
            ExchangeTags::from_base(CommTag::new(0x0400)),
            1,
            out,
            WaitPolicy::WaitAll,
        )
        .unwrap();
        assert_eq!(got[&0], vec![1, 2, 3]);
    }

    #[test]
    fn three_rank_all_to_all() {
        let world = RayonComm::world(3);
        let got: Vec<BTreeMap<usize, Vec<u64>>> = std::thread::scope(|s| {
            let hs: Vec<_> = world
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let me = c.rank() as u64;
                        // rank r sends r+1 copies of 10*r + dst to each dst != r+1 mod 3
                        let out = (0..3usize)
                            .filter(|&d| d != (c.rank() + 1) % 3)
                            .map(|d| (d, vec![10 * me + d as u64; c.rank() + 1]))
                            .collect();
                        all_to_all(
                            c,
                            ExchangeTags::from_base(CommTag::new(0x0410)),
                            1,
                            out,
                            WaitPolicy::WaitAll,
                        )
                        .unwrap()
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        // rank 1 hears from 1 (self) and 2, not from 0
        assert_eq!(got[1].get(&0), None);
        assert_eq!(got[1][&1], vec![11, 11]);
        assert_eq!(got[1][&2], vec![21, 21, 21]);
        assert_eq!(got[0][&0], vec![0]);
    }

    #[test]
    fn stray_destination_is_rejected() {
        let world = RayonComm::world(2);
        let res = sparse_exchange(
            &world[0],
            ExchangeTags::from_base(CommTag::new(0x0420)),
            1,
            &BTreeSet::new(),
            BTreeMap::from([(1usize, vec![1u64])]),
            WaitPolicy::BestEffort,
        );
        assert!(matches!(res, Err(MeshHaloError::Invariant(_))));
    }
}
