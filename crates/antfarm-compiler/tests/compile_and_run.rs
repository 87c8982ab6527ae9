//! End-to-end: source through the compiler, the binary codec, and the VM.

use antfarm_compiler::compile;
use antfarm_core::{AntClass, PlayerRoster, SimulationConfig, World};
use std::sync::Arc;

const SPINNER: &str = "\
; spins until the energy runs out
DefineAnt Spinner(1):
Configuration:
$MyBackpackSize = 10
Program:
$x = 1 + 2
%loop:
Goto(%loop)
";

fn flat_config() -> SimulationConfig {
    SimulationConfig {
        number_of_players: 1,
        playfield_width: 8,
        playfield_height: 8,
        passable_ratio: 1.0,
        food_ratio: 0.0,
        stones_ratio: 0.0,
        food_regrow_rate: 0.0,
        initial_energy: 50,
        energy_per_food: 10,
        rng_seed: Some(11),
        ..SimulationConfig::default()
    }
}

fn world_with(class: AntClass) -> World {
    let rosters = vec![PlayerRoster {
        name: "solo".to_owned(),
        classes: vec![Arc::new(class)],
    }];
    World::new(flat_config(), rosters).expect("world")
}

#[test]
fn compiled_binary_round_trips_through_the_loader() {
    let class = compile(SPINNER).expect("compile");
    let bytes = class.to_bytes().expect("encode");
    let loaded = AntClass::from_bytes(&bytes).expect("decode");
    assert_eq!(loaded, class);
    assert_eq!(loaded.to_bytes().expect("re-encode"), bytes);
}

#[test]
fn compiled_spinner_runs_until_it_starves() {
    let class = compile(SPINNER).expect("compile");
    let bytes = class.to_bytes().expect("encode");
    let loaded = AntClass::from_bytes(&bytes).expect("decode");

    let mut world = world_with(loaded);
    let queens = world.spawn_queens().expect("queens");
    let id = queens[0];
    world.ant_mut(id).expect("ant").set_food(2);

    // 50 energy plus 2 food at 10 energy each pay for the 2-cost add and
    // then 68 one-cost jumps before the ant starves mid-spin.
    let mut executed = 0;
    let mut starved_at = None;
    for _ in 0..20 {
        let events = world.run_cycle().expect("cycle");
        executed += u64::from(events.executed);
        if events.starved.is_some() {
            starved_at = events.starved;
            break;
        }
    }

    assert_eq!(starved_at, Some(id));
    assert_eq!(executed, 69);
    assert_eq!(world.ant_count(), 0);
    assert!(world.consistency_errors().is_empty());

    // After the first instruction $x holds 3 — observable while alive.
    let class = compile(SPINNER).expect("compile");
    let mut world = world_with(class);
    let id = world.spawn_queens().expect("queens")[0];
    world.run_cycle().expect("cycle");
    assert_eq!(world.ant(id).expect("ant").variables()[5], 3);
}
