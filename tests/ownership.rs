//! Ownership resolution across ranks.

mod util;

use mesh_halo::algs::communicator::Communicator;
use mesh_halo::algs::completion::WaitPolicy;
use mesh_halo::algs::distribute::trivial_partition;
use mesh_halo::mesh_error::{ErrorCategory, MeshHaloError};
use mesh_halo::mesh_generation::equatorial_band;
use mesh_halo::topology::entity::{EntityDef, EntityKind};
use mesh_halo::topology::mesh::LocalMesh;
use mesh_halo::topology::ownership::{PartitionRegistry, Status};
use mesh_halo::topology::point::GlobalId;
use std::collections::BTreeMap;
use util::{load_piece, run_ranks};

#[test]
fn interface_entities_have_one_owner() {
    let global = equatorial_band(6, false).unwrap();
    let parts = trivial_partition(6, 3);
    let views = run_ranks(3, |c| {
        let (mesh, reg) = load_piece(&c, &global, &parts);
        mesh.entities()
            .map(|p| (mesh.gid(p).unwrap(), (reg.owner(p).unwrap(), reg.sharers(p))))
            .collect::<BTreeMap<_, _>>()
    });
    let mut owners: BTreeMap<GlobalId, usize> = BTreeMap::new();
    for (rank, view) in views.iter().enumerate() {
        for (gid, (owner, sharers)) in view {
            assert_eq!(*owners.entry(*gid).or_insert(*owner), *owner, "{gid}");
            // without hints the lowest holder owns interface entities
            let lowest = sharers.iter().copied().chain([rank]).min().unwrap();
            if global.entities.iter().any(|d| d.gid == *gid && d.kind != EntityKind::Cell) {
                assert_eq!(*owner, lowest);
            }
        }
    }
    let shared: Vec<_> = views[1]
        .iter()
        .filter(|(_, (_, s))| !s.is_empty())
        .collect();
    // two interface edges with two vertices each
    assert_eq!(shared.len(), 6);
}

#[test]
fn every_rank_counts_its_own_cells() {
    let global = equatorial_band(7, true).unwrap();
    let parts = trivial_partition(7, 3);
    let owned = run_ranks(3, |c| {
        let (mesh, reg) = load_piece(&c, &global, &parts);
        reg.filter(mesh.entities_of(EntityKind::Cell), Status::Owned).len()
    });
    assert_eq!(owned, vec![3, 2, 2]);
}

#[test]
fn conflicting_hints_fail_on_every_holder() {
    let results = run_ranks(2, |c| {
        let mesh = LocalMesh::from_defs(c.rank(), vec![EntityDef::vertex(1, [0.0, 0.0, 1.0])])
            .unwrap();
        let hints = BTreeMap::from([(GlobalId(1), c.rank())]);
        PartitionRegistry::build(&mesh, &hints, &c, WaitPolicy::WaitAll).unwrap_err()
    });
    // gid 1 lives in rank 1's directory shard
    assert_eq!(
        results[1],
        MeshHaloError::OwnerConflict {
            gid: GlobalId(1),
            first: 0,
            second: 1
        }
    );
    assert!(matches!(results[0], MeshHaloError::MissingOwnership { .. }));
    for e in &results {
        assert_eq!(e.category(), ErrorCategory::DataIntegrity);
    }
}

#[test]
fn remote_handles_are_recorded() {
    let global = equatorial_band(4, false).unwrap();
    let parts = trivial_partition(4, 2);
    let handles = run_ranks(2, |c| {
        let (mesh, reg) = load_piece(&c, &global, &parts);
        let other = 1 - c.rank();
        mesh.entities()
            .filter(|&p| !reg.sharers(p).is_empty())
            .map(|p| {
                let remote = reg.remote_handle(p, other).unwrap();
                (mesh.gid(p).unwrap(), (p, remote))
            })
            .collect::<BTreeMap<_, _>>()
    });
    for (gid, (local, remote)) in &handles[0] {
        let (their_local, their_remote) = handles[1][gid];
        assert_eq!(*remote, their_local);
        assert_eq!(*local, their_remote);
    }
}
