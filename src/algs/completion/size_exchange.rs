//! Stage 1 of every sparse exchange: tell each neighbour how many records follow.
//!
//! All sends are posted before any receive is waited on, and every handle is
//! drained before returning, even if an error occurs.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::mesh_error::MeshHaloError;
use std::collections::{BTreeMap, BTreeSet};

/// Exchange record counts with every rank in `neighbors` (symmetric).
///
/// `outgoing` maps rank → number of records this rank will send; ranks in
/// `neighbors` missing from `outgoing` are sent a zero count.
/// Returns rank → number of records to expect.
pub fn exchange_sizes_symmetric<C>(
    outgoing: &BTreeMap<usize, usize>,
    comm: &C,
    tag: CommTag,
    neighbors: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, usize>, MeshHaloError>
where
    C: Communicator,
{
    // 1) post all sends and keep buffers alive until completion
    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let count = WireCount::new(outgoing.get(&nbr).copied().unwrap_or(0));
        pending_sends.push(comm.isend(
            nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        ));
    }

    // 2) post all receives
    let mut recv_size = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            nbr,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        recv_size.push((nbr, h, cnt));
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut sizes_in = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, h, mut cnt) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                if maybe_err.is_none() {
                    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                    sizes_in.insert(nbr, cnt.get());
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshHaloError::comm(
                    nbr,
                    format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireCount>(),
                        data.len()
                    ),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshHaloError::CommTimeout {
                    neighbor: nbr,
                    tag: tag.as_u16(),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}
