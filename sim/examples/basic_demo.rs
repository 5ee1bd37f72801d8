//! Basic demonstration of the Blink simulation engine.
//!
//! Run with: cargo run --example basic_demo
//! Set RUST_LOG=blink_sim=debug to see every processed event.

use blink_sim::{SimConfig, Simulation, SimulationEvent, Value};
use indexmap::IndexMap;
use tracing_subscriber::EnvFilter;

const SKIRMISH: &str = include_str!("../demos/skirmish.json");

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blink_sim=info")),
        )
        .init();

    println!("=== Blink - Simulation Demo ===\n");

    let module = blink_sim::IrModule::from_json(SKIRMISH).expect("demo module parses");
    let config = SimConfig::default().with_seed(7);
    let mut sim = Simulation::load_with_config(&module, config).expect("demo module loads");
    let events = sim.subscribe();

    println!("Initial state:");
    print_health(&sim);

    // Everybody swings once; the rules keep the exchange going from there.
    sim.start().expect("start");
    for name in ["knight", "orc", "archer"] {
        let id = sim.entity_by_name(name).expect("named entity");
        let mut fields = IndexMap::new();
        fields.insert("source".to_string(), Value::Entity(id));
        sim.schedule_event("DoAttack", 0.0, fields).expect("schedule");
    }

    let summary = sim.run_until_complete().expect("run");

    println!("\n--- Notifications ---\n");
    for event in events.try_iter() {
        match event {
            SimulationEvent::EventProcessed {
                event_type,
                time,
                rules_fired,
                ..
            } => println!("  t={time:>5.1} {event_type:<10} rules={rules_fired}"),
            SimulationEvent::Error(failure) => println!("  error: {failure}"),
            SimulationEvent::Completed { time, steps } => {
                println!("  completed at t={time:.1} after {steps} steps")
            }
            _ => {}
        }
    }

    println!(
        "\nRun ended ({:?}) after {} steps at t={:.1}",
        summary.outcome, summary.steps, summary.time
    );
    println!("Stats: {:?}", sim.stats());
    print_health(&sim);

    println!("\n=== Final State (JSON) ===\n");
    println!("{}", sim.snapshot().to_json_pretty().expect("snapshot serializes"));
}

fn print_health(sim: &Simulation) {
    for id in sim.query(&["Health"]) {
        let name = sim.store().name_of(id).unwrap_or("?");
        let hp = sim.get_field(id, "Health", "current").unwrap_or_default();
        let armed = sim.get_component(id, "Attack").is_some();
        println!("    {name:<8} hp={hp:<6} {}", if armed { "" } else { "[disarmed]" });
    }
}
