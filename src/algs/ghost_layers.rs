//! Ghost-layer growth.
//!
//! One loop grows the halo layer by layer. Each layer fetches, from their
//! owners, the cells sharing a bridge entity with the current frontier,
//! installs them together with their closure, and registers the new holders
//! on both sides. Bulk growth (`step == layers`) and iterative growth
//! (`step == 1`) run the same loop; they differ only in how often
//! thin-layer correction runs in between.
//!
//! Cross-rank adjacency comes from a rendezvous directory: every rank
//! publishes `(bridge, cell, owner)` for its owned cells to rank
//! `bridge mod size`, and frontier lookups query the same ranks.

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, tags};
use crate::algs::completion::{WaitPolicy, all_to_all};
use crate::algs::thin_layer::ThinLayerCorrector;
use crate::algs::wire::{WireAdjacency, WireGid, WireHolder, decode_defs, encode_defs};
use crate::mesh_error::MeshHaloError;
use crate::topology::entity::{EntityDef, EntityKind};
use crate::topology::mesh::LocalMesh;
use crate::topology::ownership::{PartitionRegistry, Status};
use crate::topology::point::{GlobalId, PointId};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const KIND_ADJ: u16 = 0x20;
const KIND_GID: u16 = 0x21;
const KIND_DEFS: u16 = 0x22;
const KIND_NOTIFY: u16 = 0x23;

/// Parameters of one growth run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostOpts {
    /// Total halo depth to reach.
    pub layers: u32,
    /// Layers grown between two thin-layer corrections.
    pub step: u32,
    /// Entity kind through which cells are adjacent.
    pub bridge: EntityKind,
    pub wait: WaitPolicy,
    pub correct_thin_layers: bool,
}

impl Default for GhostOpts {
    fn default() -> Self {
        Self {
            layers: 1,
            step: 1,
            bridge: EntityKind::Edge,
            wait: WaitPolicy::WaitAll,
            correct_thin_layers: true,
        }
    }
}

impl GhostOpts {
    pub fn layers(layers: u32) -> Self {
        Self {
            layers,
            ..Self::default()
        }
    }

    /// Grow everything in one go, correcting once at the end.
    pub fn bulk(layers: u32) -> Self {
        Self {
            layers,
            step: layers.max(1),
            ..Self::default()
        }
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    pub fn with_bridge(mut self, bridge: EntityKind) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn validate(&self) -> Result<(), MeshHaloError> {
        if self.step == 0 {
            return Err(MeshHaloError::InvalidConfig(
                "ghost growth step must be at least 1".into(),
            ));
        }
        if self.bridge == EntityKind::Cell {
            return Err(MeshHaloError::InvalidConfig(
                "bridge kind must be below cells".into(),
            ));
        }
        Ok(())
    }
}

/// Summary of a growth run on one rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrowthStats {
    /// Halo depth reached.
    pub depth: u32,
    /// Entities installed, all kinds.
    pub installed: usize,
    /// Cells installed.
    pub installed_cells: usize,
    /// Sharing links added by thin-layer correction.
    pub corrected_links: usize,
}

/// Directory shard held by this rank: bridge gid → adjacent (cell, owner).
#[derive(Clone, Debug, Default)]
struct AdjacencyDirectory {
    bridge: Option<EntityKind>,
    shard: BTreeMap<GlobalId, Vec<(GlobalId, usize)>>,
}

/// Grows ghost layers around a rank's partition.
#[derive(Clone, Debug)]
pub struct GhostLayerBuilder {
    opts: GhostOpts,
    depth: u32,
    directory: AdjacencyDirectory,
}

impl GhostLayerBuilder {
    pub fn new(opts: GhostOpts) -> Self {
        Self {
            opts,
            depth: 0,
            directory: AdjacencyDirectory::default(),
        }
    }

    pub fn opts(&self) -> &GhostOpts {
        &self.opts
    }

    /// Halo depth reached so far.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Grow to `opts.layers`.
    pub fn grow<C: Communicator>(
        &mut self,
        comm: &C,
        mesh: &mut LocalMesh,
        reg: &mut PartitionRegistry,
    ) -> Result<GrowthStats, MeshHaloError> {
        self.grow_to(comm, mesh, reg, self.opts.layers)
    }

    /// Grow from the current depth to `target`. Collective.
    ///
    /// # Errors
    /// Communication errors on lost or late messages, data-integrity errors
    /// when a delivered definition does not fit the local mesh.
    pub fn grow_to<C: Communicator>(
        &mut self,
        comm: &C,
        mesh: &mut LocalMesh,
        reg: &mut PartitionRegistry,
        target: u32,
    ) -> Result<GrowthStats, MeshHaloError> {
        self.opts.validate()?;
        let mut stats = GrowthStats {
            depth: self.depth,
            ..GrowthStats::default()
        };
        if target <= self.depth {
            return Ok(stats);
        }
        if self.depth == 0 {
            rank_preloaded_cells(mesh, reg, self.opts.bridge)?;
        }
        if self.directory.bridge != Some(self.opts.bridge) {
            self.directory = publish_adjacency(comm, mesh, reg, self.opts.bridge, self.opts.wait)?;
        }
        let corrector = ThinLayerCorrector::new(self.opts.wait);
        let mut since_correction = 0;
        while self.depth < target {
            let layer = self.depth + 1;
            let (entities, cells) = self.grow_layer(comm, mesh, reg, layer)?;
            stats.installed += entities;
            stats.installed_cells += cells;
            self.depth = layer;
            since_correction += 1;
            let last = self.depth == target;
            if self.opts.correct_thin_layers && (since_correction == self.opts.step || last) {
                stats.corrected_links += corrector.correct(comm, mesh, reg)?;
                since_correction = 0;
            }
        }
        stats.depth = self.depth;
        log::debug!(
            "rank {}: halo depth {} ({} entities, {} cells installed)",
            comm.rank(),
            stats.depth,
            stats.installed,
            stats.installed_cells
        );
        Ok(stats)
    }

    fn grow_layer<C: Communicator>(
        &self,
        comm: &C,
        mesh: &mut LocalMesh,
        reg: &mut PartitionRegistry,
        layer: u32,
    ) -> Result<(usize, usize), MeshHaloError> {
        let me = comm.rank();
        let size = comm.size();
        let wait = self.opts.wait;
        let bridge = self.opts.bridge;

        // 1) frontier bridges → directory
        let frontier: Vec<PointId> = mesh
            .entities_of(EntityKind::Cell)
            .into_iter()
            .filter(|&c| reg.ghost_depth(c) == Some(layer - 1))
            .collect();
        let mut bridges = BTreeSet::new();
        for &c in &frontier {
            for b in mesh.closure_of_kind(c, bridge) {
                bridges.insert(mesh.gid(b)?);
            }
        }
        let mut queries: BTreeMap<usize, Vec<WireGid>> = BTreeMap::new();
        for b in bridges {
            queries
                .entry(b.directory_rank(size))
                .or_default()
                .push(WireGid::of(b));
        }
        let asked = all_to_all(comm, exchange_tags(tags::ADJACENCY_QUERY), KIND_GID, queries, wait)?;

        // 2) directory answers with adjacent cells
        let mut answers: BTreeMap<usize, Vec<WireAdjacency>> = BTreeMap::new();
        for (src, gids) in asked {
            let out = answers.entry(src).or_default();
            for g in gids {
                let b = g.get();
                if let Some(cells) = self.directory.shard.get(&b) {
                    out.extend(cells.iter().map(|&(c, o)| WireAdjacency::new(b, c, o)));
                }
            }
        }
        let adjacent = all_to_all(comm, exchange_tags(tags::ADJACENCY_REPLY), KIND_ADJ, answers, wait)?;

        // 3) request missing cells from their owners
        let mut wanted: BTreeMap<usize, BTreeSet<GlobalId>> = BTreeMap::new();
        for r in adjacent.into_values().flatten() {
            if !mesh.contains_gid(r.cell()) {
                wanted.entry(r.owner()).or_default().insert(r.cell());
            }
        }
        let requests: BTreeMap<usize, Vec<WireGid>> = wanted
            .into_iter()
            .map(|(o, cells)| (o, cells.into_iter().map(WireGid::of).collect()))
            .collect();
        let requested = all_to_all(comm, exchange_tags(tags::GHOST_REQUEST), KIND_GID, requests, wait)?;

        // 4) owners reply with cell + closure definitions
        let mut defs_out: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        for (src, gids) in requested {
            let mut closure = BTreeSet::new();
            for g in gids {
                let c = mesh.handle_or_err(g.get())?;
                if !reg.is_owned(c) {
                    return Err(MeshHaloError::Invariant(format!(
                        "rank {me}: asked by rank {src} for cell {} it does not own",
                        g.get()
                    )));
                }
                closure.extend(mesh.closure(c));
            }
            let defs = closure
                .into_iter()
                .map(|q| mesh.to_def(q, reg.owner(q)))
                .collect::<Result<Vec<_>, _>>()?;
            defs_out.insert(src, encode_defs(&defs));
        }
        let delivered = all_to_all(comm, exchange_tags(tags::GHOST_DEFINITIONS), KIND_DEFS, defs_out, wait)?;

        // 5) install, lower dimensions first
        let mut incoming: Vec<EntityDef> = Vec::new();
        for (src, words) in delivered {
            let defs = decode_defs(&words).map_err(|m| MeshHaloError::WireFormat {
                neighbor: src,
                message: m,
            })?;
            incoming.extend(defs);
        }
        let incoming: Vec<EntityDef> = incoming
            .into_iter()
            .sorted_by_key(|d| (d.kind, d.gid))
            .dedup_by(|a, b| a.gid == b.gid)
            .collect();
        let mut notify: BTreeMap<usize, Vec<WireHolder>> = BTreeMap::new();
        let (mut installed, mut installed_cells) = (0, 0);
        for def in incoming {
            if mesh.contains_gid(def.gid) {
                continue;
            }
            let owner = def.owner.ok_or(MeshHaloError::MissingOwnership {
                gid: def.gid,
                rank: me,
            })?;
            let p = mesh.insert(&def)?;
            reg.insert_ghost(p, def.gid, owner, layer);
            reg.add_sharer(p, owner, None);
            notify
                .entry(owner)
                .or_default()
                .push(WireHolder::new(def.gid, me, p.get(), owner));
            installed += 1;
            if def.kind == EntityKind::Cell {
                installed_cells += 1;
            }
        }

        // 6) owners record the new holder and answer with their handle
        let notified = all_to_all(comm, exchange_tags(tags::GHOST_NOTIFY), KIND_NOTIFY, notify, wait)?;
        let mut acks: BTreeMap<usize, Vec<WireHolder>> = BTreeMap::new();
        for (src, records) in notified {
            for r in records {
                let p = mesh.handle_or_err(r.gid())?;
                reg.add_sharer(p, src, PointId::new(r.handle()).ok());
                acks.entry(src)
                    .or_default()
                    .push(WireHolder::new(r.gid(), me, p.get(), me));
            }
        }
        let acked = all_to_all(
            comm,
            exchange_tags(tags::GHOST_NOTIFY.offset(2)),
            KIND_NOTIFY,
            acks,
            wait,
        )?;
        for (src, records) in acked {
            for r in records {
                let p = mesh.handle_or_err(r.gid())?;
                reg.add_sharer(p, src, PointId::new(r.handle()).ok());
            }
        }

        log::debug!(
            "rank {me}: layer {layer}: frontier {} cells, installed {installed} entities",
            frontier.len()
        );
        Ok((installed, installed_cells))
    }
}

/// Give ghost cells delivered by the loader their hop distance from the
/// owned cells, so growth treats them as layers already grown.
fn rank_preloaded_cells(
    mesh: &LocalMesh,
    reg: &mut PartitionRegistry,
    bridge: EntityKind,
) -> Result<(), MeshHaloError> {
    let cells = mesh.entities_of(EntityKind::Cell);
    let pending: BTreeSet<PointId> = cells
        .iter()
        .copied()
        .filter(|&c| !reg.is_owned(c) && reg.ghost_depth(c) == Some(0))
        .collect();
    if pending.is_empty() {
        return Ok(());
    }
    let mut seen: BTreeSet<PointId> = reg.filter(cells, Status::Owned).into_iter().collect();
    let mut frontier: Vec<PointId> = seen.iter().copied().collect();
    let mut depth = 0;
    while !frontier.is_empty() {
        depth += 1;
        let mut next = Vec::new();
        for c in frontier {
            for n in mesh.bridge_neighbors(c, bridge) {
                if pending.contains(&n) && seen.insert(n) {
                    let owner = reg.owner(n).ok_or(MeshHaloError::MissingOwnership {
                        gid: mesh.gid(n)?,
                        rank: mesh.rank(),
                    })?;
                    reg.insert_ghost(n, mesh.gid(n)?, owner, depth);
                    next.push(n);
                }
            }
        }
        frontier = next;
    }
    Ok(())
}

fn exchange_tags(base: CommTag) -> ExchangeTags {
    ExchangeTags::from_base(base)
}

/// Publish `(bridge, cell, owner)` for every owned cell and collect this
/// rank's directory shard.
fn publish_adjacency<C: Communicator>(
    comm: &C,
    mesh: &LocalMesh,
    reg: &PartitionRegistry,
    bridge: EntityKind,
    wait: WaitPolicy,
) -> Result<AdjacencyDirectory, MeshHaloError> {
    let size = comm.size();
    let me = comm.rank();
    let mut outgoing: BTreeMap<usize, Vec<WireAdjacency>> = BTreeMap::new();
    for c in reg.filter(mesh.entities_of(EntityKind::Cell), Status::Owned) {
        let cell = mesh.gid(c)?;
        for b in mesh.closure_of_kind(c, bridge) {
            let b = mesh.gid(b)?;
            outgoing
                .entry(b.directory_rank(size))
                .or_default()
                .push(WireAdjacency::new(b, cell, me));
        }
    }
    let incoming = all_to_all(
        comm,
        ExchangeTags::from_base(tags::ADJACENCY_PUBLISH),
        KIND_ADJ,
        outgoing,
        wait,
    )?;
    let mut shard: BTreeMap<GlobalId, Vec<(GlobalId, usize)>> = BTreeMap::new();
    for r in incoming.into_values().flatten() {
        shard.entry(r.bridge()).or_default().push((r.cell(), r.owner()));
    }
    for cells in shard.values_mut() {
        cells.sort_unstable();
        cells.dedup();
    }
    Ok(AdjacencyDirectory {
        bridge: Some(bridge),
        shard,
    })
}
