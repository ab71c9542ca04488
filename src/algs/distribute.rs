//! Splitting a global mesh into per-rank pieces.

use crate::io::{GlobalMesh, MeshPiece};
use crate::mesh_error::MeshHaloError;
use crate::topology::entity::{EntityDef, EntityKind};
use crate::topology::mesh::LocalMesh;
use crate::topology::point::{GlobalId, PointId};
use std::collections::{BTreeMap, BTreeSet};

/// Contiguous blocks of cells in gid order; the first `n % size` ranks get
/// one extra cell.
pub fn trivial_partition(n_cells: usize, size: usize) -> Vec<usize> {
    let size = size.max(1);
    let base = n_cells / size;
    let extra = n_cells % size;
    let mut parts = Vec::with_capacity(n_cells);
    for r in 0..size {
        let n = base + usize::from(r < extra);
        parts.extend(std::iter::repeat_n(r, n));
    }
    parts
}

fn owners_of_cells(global: &GlobalMesh, parts: &[usize]) -> Result<BTreeMap<GlobalId, usize>, MeshHaloError> {
    let cells = global.cell_gids();
    if cells.len() != parts.len() {
        return Err(MeshHaloError::MeshIo(format!(
            "partition lists {} cells, mesh has {}",
            parts.len(),
            cells.len()
        )));
    }
    Ok(cells.into_iter().zip(parts.iter().copied()).collect())
}

/// Owned cells of `rank` plus their closure. Only cells carry owner hints.
pub fn extract_piece(global: &GlobalMesh, parts: &[usize], rank: usize) -> Result<MeshPiece, MeshHaloError> {
    extract_piece_with_halo(global, parts, rank, 0, EntityKind::Edge)
}

/// Like [`extract_piece`], plus every cell within `depth` bridge hops.
///
/// With `depth > 0` lower-dimensional entities also get owner hints (the
/// lowest rank owning an adjacent cell), so pre-loaded ghosts do not sway
/// ownership.
pub fn extract_piece_with_halo(
    global: &GlobalMesh,
    parts: &[usize],
    rank: usize,
    depth: u32,
    bridge: EntityKind,
) -> Result<MeshPiece, MeshHaloError> {
    let owners = owners_of_cells(global, parts)?;
    // the global mesh as one arena gives closures and adjacency for free
    let whole = LocalMesh::from_defs(rank, global.entities.iter().cloned())?;

    let mut cells: BTreeSet<PointId> = BTreeSet::new();
    for (&gid, &owner) in &owners {
        if owner == rank {
            cells.insert(whole.handle_or_err(gid)?);
        }
    }
    let mut frontier: Vec<PointId> = cells.iter().copied().collect();
    for _ in 0..depth {
        let mut next = Vec::new();
        for c in frontier {
            for n in whole.bridge_neighbors(c, bridge) {
                if cells.insert(n) {
                    next.push(n);
                }
            }
        }
        frontier = next;
    }

    let mut keep: BTreeSet<PointId> = BTreeSet::new();
    for &c in &cells {
        keep.extend(whole.closure(c));
    }
    let mut defs: Vec<EntityDef> = Vec::with_capacity(keep.len());
    for p in keep {
        let gid = whole.gid(p)?;
        let owner = match owners.get(&gid) {
            Some(&o) => Some(o),
            None if depth > 0 => lowest_cell_owner(&whole, p, &owners)?,
            None => None,
        };
        defs.push(whole.to_def(p, owner)?);
    }
    MeshPiece::from_defs(rank, defs)
}

fn lowest_cell_owner(
    whole: &LocalMesh,
    p: PointId,
    owners: &BTreeMap<GlobalId, usize>,
) -> Result<Option<usize>, MeshHaloError> {
    let mut best = None;
    for c in whole.star_of_kind(p, EntityKind::Cell) {
        if let Some(&o) = owners.get(&whole.gid(c)?) {
            best = Some(best.map_or(o, |b: usize| b.min(o)));
        }
    }
    Ok(best)
}
