use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use mesh_halo::algs::communicator::{Communicator, NoComm, RayonComm};
use mesh_halo::algs::distribute::trivial_partition;
use mesh_halo::algs::completion::WaitPolicy;
use mesh_halo::algs::distribute::extract_piece;
use mesh_halo::algs::ghost_layers::{GhostLayerBuilder, GhostOpts};
use mesh_halo::algs::tag_exchange::TagExchangeEngine;
use mesh_halo::data::field_store::FieldStore;
use mesh_halo::data::generators::VectorHarmonic;
use mesh_halo::mesh_generation::latlon_sphere;
use mesh_halo::topology::entity::EntityKind;
use mesh_halo::topology::ownership::{PartitionRegistry, Status};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

// Serial runs: measures packing, plan lookup and local bookkeeping only.
fn bench_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("setup");
    for &(nlon, nlat) in &[(32, 16), (64, 32)] {
        let global = latlon_sphere(nlon, nlat).unwrap();
        let parts = vec![0; global.num_cells()];
        group.bench_with_input(
            BenchmarkId::new("load+grow", nlon * nlat),
            &global,
            |b, global| {
                b.iter(|| {
                    let piece = extract_piece(global, &parts, 0).unwrap();
                    let mut mesh = piece.mesh;
                    let mut reg = PartitionRegistry::build(
                        &mesh,
                        &piece.owner_hints,
                        &NoComm,
                        WaitPolicy::WaitAll,
                    )
                    .unwrap();
                    GhostLayerBuilder::new(GhostOpts::layers(3))
                        .grow(&NoComm, &mut mesh, &mut reg)
                        .unwrap();
                    mesh.len()
                })
            },
        );
    }
    group.finish();
}

fn bench_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange");
    let global = latlon_sphere(64, 32).unwrap();
    let piece = extract_piece(&global, &vec![0; global.num_cells()], 0).unwrap();
    let mesh = piece.mesh;
    let reg = PartitionRegistry::build(&mesh, &BTreeMap::new(), &NoComm, WaitPolicy::WaitAll)
        .unwrap();
    let cells = mesh.entities_of(EntityKind::Cell);
    let owned = reg.filter(cells.iter().copied(), Status::Owned);

    for &width in &[1usize, 3, 8] {
        let mut store = FieldStore::new();
        let tag = store
            .create_tag("v", width, &vec![-1.0; width], cells.iter().copied())
            .unwrap();
        store
            .set(tag, &owned, &mesh, &reg, &VectorHarmonic { width })
            .unwrap();
        let mut engine = TagExchangeEngine::new(WaitPolicy::WaitAll);
        group.bench_with_input(BenchmarkId::new("width", width), &width, |b, _| {
            b.iter(|| {
                engine
                    .exchange(&NoComm, &mesh, &reg, &mut store, tag, &cells)
                    .unwrap()
            })
        });
    }
    group.finish();
}

/// Four in-process ranks; reports the slowest rank's time.
fn bench_threaded_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange-4-ranks");
    let global = latlon_sphere(64, 32).unwrap();
    let parts = trivial_partition(global.num_cells(), 4);
    for &layers in &[1u32, 3] {
        group.bench_with_input(BenchmarkId::new("nghosts", layers), &layers, |b, &layers| {
            b.iter_custom(|iters| {
                let times: Vec<Duration> = std::thread::scope(|s| {
                    let handles: Vec<_> = RayonComm::world(4)
                        .into_iter()
                        .map(|comm| {
                            let global = &global;
                            let parts = &parts;
                            s.spawn(move || {
                                let piece = extract_piece(global, parts, comm.rank()).unwrap();
                                let mut mesh = piece.mesh;
                                let mut reg = PartitionRegistry::build(
                                    &mesh,
                                    &piece.owner_hints,
                                    &comm,
                                    WaitPolicy::WaitAll,
                                )
                                .unwrap();
                                GhostLayerBuilder::new(GhostOpts::layers(layers))
                                    .grow(&comm, &mut mesh, &mut reg)
                                    .unwrap();
                                let cells = mesh.entities_of(EntityKind::Cell);
                                let owned = reg.filter(cells.iter().copied(), Status::Owned);
                                let mut store = FieldStore::new();
                                let tag = store
                                    .create_tag("v", 3, &[-1.0; 3], cells.iter().copied())
                                    .unwrap();
                                store
                                    .set(tag, &owned, &mesh, &reg, &VectorHarmonic { width: 3 })
                                    .unwrap();
                                let mut engine = TagExchangeEngine::new(WaitPolicy::WaitAll);
                                let start = Instant::now();
                                for _ in 0..iters {
                                    engine
                                        .exchange(&comm, &mesh, &reg, &mut store, tag, &cells)
                                        .unwrap();
                                }
                                start.elapsed()
                            })
                        })
                        .collect();
                    handles.into_iter().map(|h| h.join().unwrap()).collect()
                });
                times.into_iter().max().unwrap_or_default()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_setup, bench_exchange, bench_threaded_exchange);
criterion_main!(benches);
