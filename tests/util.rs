#![allow(dead_code)]
use mesh_halo::algs::communicator::RayonComm;
use mesh_halo::algs::completion::WaitPolicy;
use mesh_halo::algs::distribute::extract_piece;
use mesh_halo::io::GlobalMesh;
use mesh_halo::topology::entity::EntityKind;
use mesh_halo::topology::mesh::LocalMesh;
use mesh_halo::topology::ownership::{PartitionRegistry, Status};
use mesh_halo::topology::point::GlobalId;
use std::collections::BTreeSet;

/// Run `f` on `n` in-process ranks and collect the results in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(RayonComm) -> T + Sync,
{
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = RayonComm::world(n)
            .into_iter()
            .map(|c| s.spawn(move || f(c)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Load `rank`'s block of `global` and resolve ownership.
pub fn load_piece(
    comm: &RayonComm,
    global: &GlobalMesh,
    parts: &[usize],
) -> (LocalMesh, PartitionRegistry) {
    use mesh_halo::algs::communicator::Communicator;
    let piece = extract_piece(global, parts, comm.rank()).unwrap();
    let reg = PartitionRegistry::build(&piece.mesh, &piece.owner_hints, comm, WaitPolicy::WaitAll)
        .unwrap();
    (piece.mesh, reg)
}

pub fn gids_of(mesh: &LocalMesh, kind: EntityKind) -> BTreeSet<GlobalId> {
    mesh.entities_of(kind)
        .into_iter()
        .map(|p| mesh.gid(p).unwrap())
        .collect()
}

pub fn ghost_cell_gids(mesh: &LocalMesh, reg: &PartitionRegistry) -> BTreeSet<GlobalId> {
    reg.filter(mesh.entities_of(EntityKind::Cell), Status::Ghost)
        .into_iter()
        .map(|p| mesh.gid(p).unwrap())
        .collect()
}
