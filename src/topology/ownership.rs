//! Ownership and sharing metadata for local entities.
//!
//! [`PartitionRegistry`] records, for every entity of a [`LocalMesh`], the
//! owning rank, the ghost depth at which it arrived, and (through its
//! [`Overlap`]) the other ranks holding a copy. Ownership is resolved once by
//! [`PartitionRegistry::build`] and refined as ghost layers grow.

use crate::algs::communicator::{Communicator, ExchangeTags, tags};
use crate::algs::completion::{WaitPolicy, all_to_all};
use crate::algs::wire::{WireHolder, WireHolding};
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshHaloError;
use crate::overlap::overlap::Overlap;
use crate::topology::mesh::LocalMesh;
use crate::topology::point::{GlobalId, PointId};
use std::collections::{BTreeMap, BTreeSet};

/// Ownership status used by [`PartitionRegistry::filter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// The authoritative copy lives on this rank.
    Owned,
    /// The entity is owned by another rank.
    Ghost,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OwnershipEntry {
    pub gid: GlobalId,
    pub owner: usize,
    /// 0 for entities of the initial load, k for arrivals at growth iteration k.
    pub ghost_depth: u32,
}

#[derive(Clone, Debug, Default)]
pub struct PartitionRegistry {
    my_rank: usize,
    entries: Vec<Option<OwnershipEntry>>,
    overlap: Overlap,
    epoch: u64,
}

impl PartitionRegistry {
    pub fn new(my_rank: usize) -> Self {
        Self {
            my_rank,
            ..Self::default()
        }
    }

    /// Registry in which this rank owns every local entity (no resolution).
    pub fn local_only(mesh: &LocalMesh) -> Self {
        let mut reg = Self::new(mesh.rank());
        for p in mesh.entities() {
            if let Ok(gid) = mesh.gid(p) {
                reg.set_entry(p, gid, mesh.rank(), 0);
            }
        }
        reg
    }

    /// Resolve ownership and sharing for every local entity.
    ///
    /// Entities are matched across ranks by global id. The owner is the
    /// lowest holding rank unless `owner_hints` (partitioner-supplied owners)
    /// names one; all hints for an entity must agree.
    pub fn build<C: Communicator>(
        mesh: &LocalMesh,
        owner_hints: &BTreeMap<GlobalId, usize>,
        comm: &C,
        wait: WaitPolicy,
    ) -> Result<Self, MeshHaloError> {
        let me = comm.rank();
        let size = comm.size();

        // 1) tell each gid's directory rank that we hold it
        let mut queries: BTreeMap<usize, Vec<WireHolding>> = BTreeMap::new();
        for p in mesh.entities() {
            let gid = mesh.gid(p)?;
            queries
                .entry(gid.directory_rank(size))
                .or_default()
                .push(WireHolding::new(gid, p.get(), owner_hints.get(&gid).copied()));
        }
        let incoming = all_to_all(
            comm,
            ExchangeTags::from_base(tags::OWNERSHIP_QUERY),
            1,
            queries,
            wait,
        )?;

        // 2) directory: group holders per gid and pick the owner
        let mut holders: BTreeMap<GlobalId, Vec<(usize, u64, Option<usize>)>> = BTreeMap::new();
        for (rank, records) in incoming {
            for r in records {
                holders
                    .entry(r.gid())
                    .or_default()
                    .push((rank, r.handle(), r.owner_hint()));
            }
        }
        let mut replies: BTreeMap<usize, Vec<WireHolder>> = BTreeMap::new();
        let mut directory_err = None;
        for (gid, hs) in &holders {
            let owner = match resolve_owner(*gid, hs) {
                Ok(owner) => owner,
                Err(e) => {
                    directory_err.get_or_insert(e);
                    continue;
                }
            };
            for &(dst, _, _) in hs {
                let out = replies.entry(dst).or_default();
                out.extend(
                    hs.iter()
                        .map(|&(rank, handle, _)| WireHolder::new(*gid, rank, handle, owner)),
                );
            }
        }
        // reply even on error so no rank is left waiting
        let answers = all_to_all(
            comm,
            ExchangeTags::from_base(tags::OWNERSHIP_REPLY),
            2,
            replies,
            wait,
        )?;
        if let Some(e) = directory_err {
            return Err(e);
        }

        // 3) install owners and sharing links
        let mut reg = Self::new(me);
        reg.entries = vec![None; mesh.len()];
        for records in answers.into_values() {
            for r in records {
                let p = mesh.handle_or_err(r.gid())?;
                reg.set_entry(p, r.gid(), r.owner(), 0);
                if r.rank() != me {
                    reg.overlap
                        .add_link(p, r.rank(), PointId::new(r.handle()).ok());
                }
            }
        }
        for p in mesh.entities() {
            if reg.entry(p).is_none() {
                return Err(MeshHaloError::MissingOwnership {
                    gid: mesh.gid(p)?,
                    rank: me,
                });
            }
        }
        log::debug!(
            "rank {me}: ownership resolved for {} entities, {} shared",
            mesh.len(),
            reg.overlap.shared_points().count()
        );
        crate::debug_invariants!(reg.validate_invariants(), "PartitionRegistry::build");
        Ok(reg)
    }

    fn set_entry(&mut self, p: PointId, gid: GlobalId, owner: usize, ghost_depth: u32) {
        let idx = p.index();
        if idx >= self.entries.len() {
            self.entries.resize(idx + 1, None);
        }
        self.entries[idx] = Some(OwnershipEntry {
            gid,
            owner,
            ghost_depth,
        });
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Register an entity that arrived at growth iteration `depth`.
    pub fn insert_ghost(&mut self, p: PointId, gid: GlobalId, owner: usize, depth: u32) {
        self.set_entry(p, gid, owner, depth);
    }

    /// Record that `rank` holds a copy of `p`. Returns true if this was new.
    pub fn add_sharer(&mut self, p: PointId, rank: usize, remote: Option<PointId>) -> bool {
        if rank == self.my_rank {
            return false;
        }
        let changed = self.overlap.add_link(p, rank, remote);
        if changed {
            self.epoch = self.epoch.wrapping_add(1);
        }
        changed
    }

    pub fn rank(&self) -> usize {
        self.my_rank
    }

    /// Changes whenever ownership or sharing changes.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn entry(&self, p: PointId) -> Option<OwnershipEntry> {
        self.entries.get(p.index()).copied().flatten()
    }

    pub fn owner(&self, p: PointId) -> Option<usize> {
        self.entry(p).map(|e| e.owner)
    }

    pub fn ghost_depth(&self, p: PointId) -> Option<u32> {
        self.entry(p).map(|e| e.ghost_depth)
    }

    pub fn is_owned(&self, p: PointId) -> bool {
        self.owner(p) == Some(self.my_rank)
    }

    pub fn status(&self, p: PointId) -> Option<Status> {
        self.owner(p).map(|o| {
            if o == self.my_rank {
                Status::Owned
            } else {
                Status::Ghost
            }
        })
    }

    /// Other ranks holding a copy of `p`.
    pub fn sharers(&self, p: PointId) -> BTreeSet<usize> {
        self.overlap.sharer_set(p)
    }

    pub fn remote_handle(&self, p: PointId, rank: usize) -> Option<PointId> {
        self.overlap.remote_point(p, rank)
    }

    pub fn overlap(&self) -> &Overlap {
        &self.overlap
    }

    /// Ranks this rank shares anything with, or whose entities it ghosts.
    pub fn neighbor_ranks(&self) -> BTreeSet<usize> {
        let mut out = self.overlap.neighbor_ranks();
        out.extend(self.entries.iter().flatten().map(|e| e.owner));
        out.remove(&self.my_rank);
        out
    }

    /// The subset of `entities` with the given status, ascending by handle.
    pub fn filter<I>(&self, entities: I, status: Status) -> Vec<PointId>
    where
        I: IntoIterator<Item = PointId>,
    {
        let mut out: Vec<PointId> = entities
            .into_iter()
            .filter(|&p| self.status(p) == Some(status))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn owned_count(&self) -> usize {
        self.entries
            .iter()
            .flatten()
            .filter(|e| e.owner == self.my_rank)
            .count()
    }

    /// Local handles with an entry, ascending.
    pub fn local_points(&self) -> impl Iterator<Item = PointId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .map(|(i, _)| PointId::from_index(i))
    }
}

/// Owner of `gid` given its holders `(rank, handle, hint)`.
fn resolve_owner(
    gid: GlobalId,
    holders: &[(usize, u64, Option<usize>)],
) -> Result<usize, MeshHaloError> {
    let mut ranks: Vec<usize> = holders.iter().map(|h| h.0).collect();
    ranks.sort_unstable();
    if let Some(w) = ranks.windows(2).find(|w| w[0] == w[1]) {
        return Err(MeshHaloError::DuplicateGlobalId { gid, rank: w[0] });
    }
    let mut hint = None;
    for &(_, _, h) in holders {
        match (hint, h) {
            (None, Some(h)) => hint = Some(h),
            (Some(a), Some(b)) if a != b => {
                return Err(MeshHaloError::OwnerConflict {
                    gid,
                    first: a.min(b),
                    second: a.max(b),
                });
            }
            _ => {}
        }
    }
    match hint {
        Some(h) if ranks.binary_search(&h).is_err() => {
            Err(MeshHaloError::UnknownGlobalId { gid, rank: h })
        }
        Some(h) => Ok(h),
        None => Ok(ranks[0]),
    }
}

impl DebugInvariants for PartitionRegistry {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "PartitionRegistry");
    }

    fn validate_invariants(&self) -> Result<(), MeshHaloError> {
        for p in self.overlap.shared_points() {
            let entry = self.entry(p).ok_or_else(|| {
                MeshHaloError::Invariant(format!("shared point {p} has no ownership entry"))
            })?;
            if self.overlap.sharers(p).any(|r| r == self.my_rank) {
                return Err(MeshHaloError::Invariant(format!(
                    "rank {} lists itself as a sharer of {}",
                    self.my_rank, entry.gid
                )));
            }
            if entry.owner != self.my_rank && !self.overlap.sharers(p).any(|r| r == entry.owner) {
                return Err(MeshHaloError::Invariant(format!(
                    "rank {}: owner {} of {} is not a sharer",
                    self.my_rank, entry.owner, entry.gid
                )));
            }
        }
        for e in self.entries.iter().flatten() {
            if e.owner == self.my_rank && e.ghost_depth != 0 {
                return Err(MeshHaloError::Invariant(format!(
                    "rank {}: owned entity {} has ghost depth {}",
                    self.my_rank, e.gid, e.ghost_depth
                )));
            }
        }
        Ok(())
    }
}
