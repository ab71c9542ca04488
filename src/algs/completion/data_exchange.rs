//! Stage 2 of every sparse exchange: ship the records themselves.
//!
//! Each non-empty message is a [`WireHdr`] followed by `n` fixed-size records,
//! where `n` is the count agreed in stage 1.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WIRE_VERSION, WireHdr, cast_slice, expect_exact_len, records_from_bytes};
use crate::mesh_error::MeshHaloError;
use bytemuck::Pod;
use std::collections::BTreeMap;

/// Post sends for `outgoing`, receive `counts[nbr]` records from each
/// neighbour, and return them per source rank.
pub fn exchange_data<T, C>(
    outgoing: &BTreeMap<usize, Vec<T>>,
    counts: &BTreeMap<usize, usize>,
    comm: &C,
    tag: CommTag,
    kind: u16,
) -> Result<BTreeMap<usize, Vec<T>>, MeshHaloError>
where
    T: Pod,
    C: Communicator,
{
    let hdr = WireHdr::new(kind);
    let mut pending_sends = Vec::with_capacity(outgoing.len());
    for (&nbr, records) in outgoing {
        if records.is_empty() || nbr == comm.rank() {
            continue;
        }
        let mut buf = Vec::with_capacity(WireHdr::SIZE + std::mem::size_of_val(records.as_slice()));
        buf.extend_from_slice(cast_slice(std::slice::from_ref(&hdr)));
        buf.extend_from_slice(cast_slice(records));
        pending_sends.push(comm.isend(nbr, tag.as_u16(), &buf));
    }

    let mut recvs = Vec::with_capacity(counts.len());
    for (&nbr, &n) in counts {
        if n == 0 {
            continue;
        }
        let mut buf = vec![0u8; WireHdr::SIZE + n * std::mem::size_of::<T>()];
        let h = comm.irecv(nbr, tag.as_u16(), &mut buf);
        recvs.push((nbr, n, h));
    }

    let mut out = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, n, h) in recvs {
        let raw = match h.wait() {
            Some(raw) => raw,
            None => {
                maybe_err.get_or_insert(MeshHaloError::CommTimeout {
                    neighbor: nbr,
                    tag: tag.as_u16(),
                });
                continue;
            }
        };
        if maybe_err.is_some() {
            continue;
        }
        match decode_message::<T>(&raw, n, kind) {
            Ok(records) => {
                out.insert(nbr, records);
            }
            Err(e) => {
                maybe_err = Some(match e {
                    DecodeError::Version(v) => MeshHaloError::WireFormat {
                        neighbor: nbr,
                        message: format!("wire version {v}, expected {WIRE_VERSION}"),
                    },
                    DecodeError::Other(message) => MeshHaloError::CommError {
                        neighbor: nbr,
                        message,
                    },
                });
            }
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

enum DecodeError {
    Version(u16),
    Other(String),
}

fn decode_message<T: Pod>(raw: &[u8], n: usize, kind: u16) -> Result<Vec<T>, DecodeError> {
    expect_exact_len(raw.len(), WireHdr::SIZE + n * std::mem::size_of::<T>())
        .map_err(DecodeError::Other)?;
    let hdr: WireHdr = bytemuck::pod_read_unaligned(&raw[..WireHdr::SIZE]);
    if hdr.version() != WIRE_VERSION {
        return Err(DecodeError::Version(hdr.version()));
    }
    if hdr.kind() != kind {
        return Err(DecodeError::Other(format!(
            "message kind {} where {} was expected",
            hdr.kind(),
            kind
        )));
    }
    records_from_bytes(&raw[WireHdr::SIZE..]).map_err(DecodeError::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::RayonComm;

    #[test]
    fn rejects_foreign_version() {
        let world = RayonComm::world(2);
        let bad = WireHdr {
            version_le: 99u16.to_le(),
            kind_le: 1u16.to_le(),
            reserved_le: 0,
        };
        let mut buf = cast_slice(std::slice::from_ref(&bad)).to_vec();
        buf.extend_from_slice(&7u64.to_le_bytes());
        world[1].isend(0, 0x0300, &buf);
        let res = exchange_data::<u64, _>(
            &BTreeMap::new(),
            &BTreeMap::from([(1, 1)]),
            &world[0],
            CommTag::new(0x0300),
            1,
        );
        assert!(matches!(res, Err(MeshHaloError::WireFormat { neighbor: 1, .. })));
    }

    #[test]
    fn short_message_is_a_comm_error() {
        let world = RayonComm::world(2);
        let hdr = WireHdr::new(1);
        world[1].isend(0, 0x0301, cast_slice(std::slice::from_ref(&hdr)));
        let res = exchange_data::<u64, _>(
            &BTreeMap::new(),
            &BTreeMap::from([(1, 2)]),
            &world[0],
            CommTag::new(0x0301),
            1,
        );
        assert!(matches!(res, Err(MeshHaloError::CommError { neighbor: 1, .. })));
    }
}
