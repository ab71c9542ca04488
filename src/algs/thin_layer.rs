//! Thin-layer correction of sharing sets.
//!
//! A rank that installs a ghost tells only the owner. Other holders of the
//! same entity stay unaware of each other until the owner, which knows every
//! holder, advertises the complete holder set. Only entities with more than
//! two holders need this: with two, owner and ghost already know each other.

use crate::algs::communicator::{Communicator, ExchangeTags, tags};
use crate::algs::completion::{WaitPolicy, all_to_all};
use crate::algs::wire::WireHolder;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshHaloError;
use crate::topology::mesh::LocalMesh;
use crate::topology::ownership::PartitionRegistry;
use crate::topology::point::PointId;
use std::collections::BTreeMap;

const KIND_HOLDERS: u16 = 0x30;

#[derive(Copy, Clone, Debug, Default)]
pub struct ThinLayerCorrector {
    pub wait: WaitPolicy,
}

impl ThinLayerCorrector {
    pub fn new(wait: WaitPolicy) -> Self {
        Self { wait }
    }

    /// Push owner-known holder sets to every holder and merge what arrives.
    ///
    /// Returns the number of sharing links added or completed on this rank.
    /// Collective: every rank must call it.
    pub fn correct<C: Communicator>(
        &self,
        comm: &C,
        mesh: &LocalMesh,
        reg: &mut PartitionRegistry,
    ) -> Result<usize, MeshHaloError> {
        let me = comm.rank();
        let mut outgoing: BTreeMap<usize, Vec<WireHolder>> = BTreeMap::new();
        for p in reg.overlap().shared_points() {
            if !reg.is_owned(p) {
                continue;
            }
            let remotes: Vec<_> = reg.overlap().remotes(p).collect();
            if remotes.len() < 2 {
                continue;
            }
            let gid = mesh.gid(p)?;
            let mut holders = Vec::with_capacity(remotes.len() + 1);
            holders.push(WireHolder::new(gid, me, p.get(), me));
            holders.extend(remotes.iter().map(|r| {
                WireHolder::new(gid, r.rank, r.remote_point.map_or(0, PointId::get), me)
            }));
            for r in &remotes {
                outgoing.entry(r.rank).or_default().extend_from_slice(&holders);
            }
        }

        let incoming = all_to_all(
            comm,
            ExchangeTags::from_base(tags::THIN_LAYER),
            KIND_HOLDERS,
            outgoing,
            self.wait,
        )?;

        let mut added = 0;
        for records in incoming.into_values() {
            for r in records {
                let p = mesh.handle_or_err(r.gid())?;
                if reg.add_sharer(p, r.rank(), PointId::new(r.handle()).ok()) {
                    added += 1;
                }
            }
        }
        if added > 0 {
            log::debug!("rank {me}: thin-layer correction added {added} sharing links");
        }
        crate::debug_invariants!(reg.validate_invariants(), "ThinLayerCorrector::correct");
        Ok(added)
    }
}
