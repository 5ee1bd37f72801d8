//! Step throughput benchmarks.
//!
//! Run with: cargo bench --bench step

use blink_sim::{EntityId, EntityPatch, IrModule, SimConfig, Simulation, Value};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;

const COMBAT_IR: &str = include_str!("../tests/fixtures/combat.json");
const SKIRMISH_IR: &str = include_str!("../demos/skirmish.json");

/// Combat world with `pairs` duelling pairs, started and ready to run.
fn duel_world(pairs: usize) -> Simulation {
    let mut sim = Simulation::from_json(COMBAT_IR).unwrap();
    let hero = sim.entity_by_name("hero").unwrap();
    for _ in 0..pairs {
        let a = sim.clone_entity(hero, &EntityPatch::new()).unwrap();
        let b = sim.clone_entity(hero, &EntityPatch::new()).unwrap();
        sim.set_field(a, "Target", "entity", Value::Entity(b)).unwrap();
        sim.set_field(b, "Target", "entity", Value::Entity(a)).unwrap();
    }
    sim.start().unwrap();
    sim
}

fn bench_watchdog_battle(c: &mut Criterion) {
    let mut group = c.benchmark_group("watchdog_battle");
    for pairs in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(pairs), &pairs, |b, &pairs| {
            b.iter_with_setup(
                || duel_world(pairs),
                |mut sim| black_box(sim.run_until_complete().unwrap()),
            );
        });
    }
    group.finish();
}

fn bench_skirmish(c: &mut Criterion) {
    let module = IrModule::from_json(SKIRMISH_IR).unwrap();
    c.bench_function("skirmish_run", |b| {
        b.iter_with_setup(
            || {
                let mut sim =
                    Simulation::load_with_config(&module, SimConfig::default().with_seed(1)).unwrap();
                sim.start().unwrap();
                for id in [0, 1, 2] {
                    let fields = IndexMap::from([("source".to_string(), Value::Entity(EntityId(id)))]);
                    sim.schedule_event("DoAttack", 0.0, fields).unwrap();
                }
                sim
            },
            |mut sim| black_box(sim.run_until_complete().unwrap()),
        );
    });
}

fn bench_load(c: &mut Criterion) {
    let module = IrModule::from_json(SKIRMISH_IR).unwrap();
    c.bench_function("load_module", |b| {
        b.iter(|| black_box(Simulation::load(black_box(&module)).unwrap()))
    });
}

criterion_group!(benches, bench_watchdog_battle, bench_skirmish, bench_load);
criterion_main!(benches);
