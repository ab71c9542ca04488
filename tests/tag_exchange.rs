//! Owner → ghost tag exchange across in-process ranks.

mod util;

use mesh_halo::algs::communicator::{Communicator, RayonComm};
use mesh_halo::algs::completion::WaitPolicy;
use mesh_halo::algs::distribute::trivial_partition;
use mesh_halo::algs::ghost_layers::{GhostLayerBuilder, GhostOpts};
use mesh_halo::algs::tag_exchange::TagExchangeEngine;
use mesh_halo::data::field_store::{FieldStore, TagId};
use mesh_halo::data::generators::{FieldGenerator, FnGenerator, ScalarWave, SphericalPosition, VectorHarmonic};
use mesh_halo::io::GlobalMesh;
use mesh_halo::mesh_error::{ErrorCategory, MeshHaloError};
use mesh_halo::mesh_generation::{equatorial_band, latlon_sphere};
use mesh_halo::topology::entity::EntityKind;
use mesh_halo::topology::mesh::LocalMesh;
use mesh_halo::topology::ownership::{PartitionRegistry, Status};
use mesh_halo::topology::point::{GlobalId, PointId};
use std::collections::BTreeMap;
use std::time::Duration;
use util::{load_piece, run_ranks};

const DEFAULT: f64 = -1.0;

struct Rank {
    comm: RayonComm,
    mesh: LocalMesh,
    reg: PartitionRegistry,
    cells: Vec<PointId>,
    owned: Vec<PointId>,
}

fn setup(comm: RayonComm, global: &GlobalMesh, parts: &[usize], layers: u32) -> Rank {
    setup_waiting(comm, global, parts, layers, WaitPolicy::WaitAll)
}

fn setup_waiting(
    comm: RayonComm,
    global: &GlobalMesh,
    parts: &[usize],
    layers: u32,
    wait: WaitPolicy,
) -> Rank {
    let (mut mesh, mut reg) = load_piece(&comm, global, parts);
    let opts = GhostOpts {
        wait,
        ..GhostOpts::layers(layers)
    };
    GhostLayerBuilder::new(opts)
        .grow(&comm, &mut mesh, &mut reg)
        .unwrap();
    let cells = mesh.entities_of(EntityKind::Cell);
    let owned = reg.filter(cells.iter().copied(), Status::Owned);
    Rank {
        comm,
        mesh,
        reg,
        cells,
        owned,
    }
}

fn snapshot(r: &Rank, store: &FieldStore, tag: TagId) -> BTreeMap<GlobalId, Vec<f64>> {
    r.cells
        .iter()
        .map(|&p| (r.mesh.gid(p).unwrap(), store.get(tag, p).unwrap().to_vec()))
        .collect()
}

fn sphere() -> (GlobalMesh, Vec<usize>) {
    let global = latlon_sphere(12, 6).unwrap();
    let parts = trivial_partition(global.num_cells(), 4);
    (global, parts)
}

#[test]
fn ghosts_hold_the_default_until_exchanged() {
    let (global, parts) = sphere();
    run_ranks(4, |c| {
        let r = setup(c, &global, &parts, 2);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("vector_variable", 3, &[DEFAULT; 3], r.cells.iter().copied())
            .unwrap();
        store
            .set(tag, &r.owned, &r.mesh, &r.reg, &VectorHarmonic { width: 3 })
            .unwrap();
        let ghosts = r.reg.filter(r.cells.iter().copied(), Status::Ghost);
        assert!(!ghosts.is_empty());
        for p in ghosts {
            assert_eq!(store.get(tag, p).unwrap(), &[DEFAULT; 3]);
        }
        for &p in &r.owned {
            assert!(store.get(tag, p).unwrap().iter().all(|&v| v > 0.0));
        }
    });
}

#[test]
fn ghost_copies_equal_the_owner_computation() {
    let (global, parts) = sphere();
    let views = run_ranks(4, |c| {
        let r = setup(c, &global, &parts, 2);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("scalar_variable", 1, &[DEFAULT], r.cells.iter().copied())
            .unwrap();
        store.set(tag, &r.owned, &r.mesh, &r.reg, &ScalarWave).unwrap();
        TagExchangeEngine::new(WaitPolicy::WaitAll)
            .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &r.cells)
            .unwrap();
        let owners: BTreeMap<GlobalId, usize> = r
            .cells
            .iter()
            .map(|&p| (r.mesh.gid(p).unwrap(), r.reg.owner(p).unwrap()))
            .collect();
        let centroids: BTreeMap<GlobalId, [f64; 3]> = r
            .cells
            .iter()
            .map(|&p| (r.mesh.gid(p).unwrap(), r.mesh.centroid(p).unwrap()))
            .collect();
        (snapshot(&r, &store, tag), owners, centroids)
    });
    for (rank, (values, owners, centroids)) in views.iter().enumerate() {
        for (gid, v) in values {
            let owner = owners[gid];
            assert_eq!(v, &views[owner].0[gid], "cell {gid} on rank {rank}");
            let mut expect = [0.0];
            ScalarWave.evaluate(SphericalPosition::from_cartesian(centroids[gid]), &mut expect);
            assert_eq!(v[0], expect[0]);
        }
    }
}

#[test]
fn repeated_exchange_is_idempotent_and_reuses_the_plan() {
    let (global, parts) = sphere();
    run_ranks(4, |c| {
        let r = setup(c, &global, &parts, 1);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("v", 2, &[DEFAULT; 2], r.cells.iter().copied())
            .unwrap();
        let r#gen = FnGenerator {
            width: 2,
            f: |pos: SphericalPosition, out: &mut [f64]| {
                out[0] = pos.lon;
                out[1] = pos.lat;
            },
        };
        store.set(tag, &r.owned, &r.mesh, &r.reg, &r#gen).unwrap();
        let mut engine = TagExchangeEngine::new(WaitPolicy::WaitAll);
        engine
            .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &r.cells)
            .unwrap();
        let first = snapshot(&r, &store, tag);
        for _ in 0..4 {
            engine
                .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &r.cells)
                .unwrap();
            assert_eq!(snapshot(&r, &store, tag), first);
        }
        assert_eq!(engine.plan_builds(), 1);
    });
}

#[test]
fn plan_is_rebuilt_when_the_halo_grows() {
    let (global, parts) = sphere();
    run_ranks(4, |c| {
        let mut r = setup(c, &global, &parts, 1);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("s", 1, &[DEFAULT], r.cells.iter().copied())
            .unwrap();
        let mut engine = TagExchangeEngine::new(WaitPolicy::WaitAll);
        engine
            .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &r.cells)
            .unwrap();
        let epoch = r.reg.epoch();
        GhostLayerBuilder::new(GhostOpts::layers(2))
            .grow(&r.comm, &mut r.mesh, &mut r.reg)
            .unwrap();
        assert!(r.reg.epoch() > epoch);
        // same domain, new sharing links
        engine
            .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &r.cells)
            .unwrap();
        assert_eq!(engine.plan_builds(), 2);
    });
}

#[test]
fn unexchanged_domain_keeps_defaults() {
    let (global, parts) = sphere();
    run_ranks(4, |c| {
        let r = setup(c, &global, &parts, 2);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("s", 1, &[DEFAULT], r.cells.iter().copied())
            .unwrap();
        store.set(tag, &r.owned, &r.mesh, &r.reg, &ScalarWave).unwrap();
        // owned cells and the first layer only
        let near: Vec<PointId> = r
            .cells
            .iter()
            .copied()
            .filter(|&p| r.reg.ghost_depth(p).unwrap() <= 1)
            .collect();
        TagExchangeEngine::new(WaitPolicy::WaitAll)
            .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &near)
            .unwrap();
        for &p in &r.cells {
            let v = store.get(tag, p).unwrap()[0];
            match r.reg.ghost_depth(p).unwrap() {
                2 => assert_eq!(v, DEFAULT),
                _ => assert_ne!(v, DEFAULT),
            }
        }
    });
}

#[test]
fn silent_owner_is_reported_on_the_ghost_rank_only() {
    let (global, parts) = sphere();
    let results = run_ranks(4, |c| {
        let r = setup(c, &global, &parts, 1);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("scalar_variable", 1, &[DEFAULT], r.cells.iter().copied())
            .unwrap();
        // rank 0 offers nothing, so its neighbours miss some ghosts
        let domain: Vec<PointId> = if r.comm.rank() == 0 { Vec::new() } else { r.cells.clone() };
        let needs_rank0 = domain.iter().any(|&p| r.reg.owner(p) == Some(0));
        let res = TagExchangeEngine::new(WaitPolicy::WaitAll).exchange(
            &r.comm,
            &r.mesh,
            &r.reg,
            &mut store,
            tag,
            &domain,
        );
        (needs_rank0, res.err())
    });
    assert!(results[0].1.is_none());
    assert!(results.iter().any(|(needs, _)| *needs));
    for (needs, err) in &results[1..] {
        match err {
            Some(e @ MeshHaloError::MissingOwner { tag, .. }) => {
                assert!(*needs);
                assert_eq!(tag, "scalar_variable");
                assert_eq!(e.category(), ErrorCategory::MissingOwner);
            }
            Some(other) => panic!("unexpected error {other}"),
            None => assert!(!*needs),
        }
    }
}

#[test]
fn computing_on_a_ghost_is_refused() {
    let (global, parts) = sphere();
    run_ranks(4, |c| {
        let r = setup(c, &global, &parts, 1);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("s", 1, &[DEFAULT], r.cells.iter().copied())
            .unwrap();
        let err = store
            .set(tag, &r.cells, &r.mesh, &r.reg, &ScalarWave)
            .unwrap_err();
        assert!(matches!(err, MeshHaloError::GhostWrite { .. }));
        assert!(r.cells.iter().all(|&p| store.get(tag, p) == Some(&[DEFAULT][..])));
    });
}

#[test]
fn empty_rank_and_alternating_domains_stay_in_step() {
    let global = equatorial_band(4, false).unwrap();
    // rank 2 holds nothing at all
    let parts = vec![0, 0, 1, 1];
    let results = run_ranks(3, |c| {
        let r = setup(c.with_timeout(Duration::from_secs(5)), &global, &parts, 1);
        let vertices = r.mesh.entities_of(EntityKind::Vertex);
        let owned_vertices = r.reg.filter(vertices.iter().copied(), Status::Owned);
        let mut store = FieldStore::new();
        let on_cells = store
            .create_tag("a", 1, &[DEFAULT], r.cells.iter().copied())
            .unwrap();
        let on_vertices = store
            .create_tag("b", 1, &[DEFAULT], vertices.iter().copied())
            .unwrap();
        store.set(on_cells, &r.owned, &r.mesh, &r.reg, &ScalarWave).unwrap();
        store
            .set(on_vertices, &owned_vertices, &r.mesh, &r.reg, &ScalarWave)
            .unwrap();

        let mut engine = TagExchangeEngine::new(WaitPolicy::WaitAll);
        for (tag, domain) in [
            (on_cells, &r.cells),
            (on_vertices, &vertices),
            (on_cells, &r.cells),
            (on_vertices, &vertices),
        ] {
            engine
                .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, domain)
                .unwrap();
        }
        for (tag, domain) in [(on_cells, &r.cells), (on_vertices, &vertices)] {
            for &p in domain {
                let mut expect = [0.0];
                ScalarWave.evaluate(
                    SphericalPosition::from_cartesian(r.mesh.centroid(p).unwrap()),
                    &mut expect,
                );
                assert_eq!(store.get(tag, p).unwrap(), &expect[..]);
            }
        }
        (r.mesh.len(), engine.plan_builds())
    });
    assert_eq!(results[2].0, 0);
    assert!(results.iter().all(|&(_, builds)| builds == results[0].1));
}

#[test]
fn unknown_record_is_reported_after_the_round() {
    let global = equatorial_band(4, false).unwrap();
    let parts = trivial_partition(4, 2);
    let results = run_ranks(2, |c| {
        let mut r = setup(c.with_timeout(Duration::from_secs(5)), &global, &parts, 1);
        if r.comm.rank() == 0 {
            // claim rank 1 holds a cell it never received
            let far = r
                .owned
                .iter()
                .copied()
                .find(|&p| r.reg.sharers(p).is_empty())
                .unwrap();
            r.reg.add_sharer(far, 1, None);
        }
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("s", 1, &[DEFAULT], r.cells.iter().copied())
            .unwrap();
        store.set(tag, &r.owned, &r.mesh, &r.reg, &ScalarWave).unwrap();
        TagExchangeEngine::new(WaitPolicy::WaitAll)
            .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &r.cells)
            .err()
    });
    assert_eq!(results[0], None);
    match &results[1] {
        Some(e @ MeshHaloError::UnknownGlobalId { rank: 1, .. }) => {
            assert_eq!(e.category(), ErrorCategory::DataIntegrity);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn best_effort_round_trip_matches_the_owner() {
    let (global, parts) = sphere();
    let views = run_ranks(4, |c| {
        let r = setup_waiting(c, &global, &parts, 2, WaitPolicy::BestEffort);
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("vector_variable", 3, &[DEFAULT; 3], r.cells.iter().copied())
            .unwrap();
        store
            .set(tag, &r.owned, &r.mesh, &r.reg, &VectorHarmonic { width: 3 })
            .unwrap();
        let mut engine = TagExchangeEngine::new(WaitPolicy::BestEffort);
        for _ in 0..3 {
            engine
                .exchange(&r.comm, &r.mesh, &r.reg, &mut store, tag, &r.cells)
                .unwrap();
        }
        let owners: BTreeMap<GlobalId, usize> = r
            .cells
            .iter()
            .map(|&p| (r.mesh.gid(p).unwrap(), r.reg.owner(p).unwrap()))
            .collect();
        (snapshot(&r, &store, tag), owners, engine.plan_builds())
    });
    for (rank, (values, owners, builds)) in views.iter().enumerate() {
        assert_eq!(*builds, 1);
        for (gid, v) in values {
            assert!(v.iter().all(|&x| x != DEFAULT), "cell {gid} on rank {rank}");
            assert_eq!(v, &views[owners[gid]].0[gid], "cell {gid} on rank {rank}");
        }
    }
}
