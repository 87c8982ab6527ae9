//! Whole-simulation tests: seeded determinism, long-run invariants, and a
//! small colony living out its full lifecycle.

use std::sync::Arc;

use antfarm_core::{
    AntClass, CycleEvents, OP1_CONSTANT, Opcode, PlayerRoster, SimulationConfig, World, direction,
};

fn encode(opcode: Opcode, op1_literal: bool) -> i16 {
    let mut word = opcode as i16;
    if op1_literal {
        word |= OP1_CONSTANT;
    }
    word
}

fn class(name: &str, id: i16, backpack: i16, instructions: &[[i16; 4]]) -> Arc<AntClass> {
    let code = instructions.iter().flatten().copied().collect();
    let class = AntClass::new(name, id, backpack, 8, code);
    class.validate().expect("well-formed test class");
    Arc::new(class)
}

/// Wanders east forever, eating whatever it finds on the way.
fn forager(id: i16) -> Arc<AntClass> {
    class(
        "forager",
        id,
        12,
        &[
            [encode(Opcode::Move, true), 5, direction::EAST, 0],
            [
                encode(Opcode::GetFood, true) | antfarm_core::OP2_CONSTANT,
                6,
                direction::SOUTH,
                3,
            ],
            [encode(Opcode::Goto, true), 0, 0, 0],
        ],
    )
}

/// Spawns workers of class id 2 for as long as the food lasts.
fn queen() -> Arc<AntClass> {
    class(
        "queen",
        1,
        10,
        &[
            [encode(Opcode::MakeAnt, true), 0, 2, 0],
            [encode(Opcode::Goto, true), 0, 0, 0],
        ],
    )
}

/// Burns one energy per instruction, going nowhere.
fn spinner(id: i16) -> Arc<AntClass> {
    class(
        "spinner",
        id,
        4,
        &[[encode(Opcode::Goto, true), 0, 0, 0]],
    )
}

fn roster(name: &str, classes: Vec<Arc<AntClass>>) -> PlayerRoster {
    PlayerRoster {
        name: name.to_owned(),
        classes,
    }
}

fn run(world: &mut World, cycles: usize) -> Vec<CycleEvents> {
    (0..cycles).map(|_| world.run_cycle().expect("cycle")).collect()
}

#[test]
fn seeded_simulations_are_deterministic() {
    let config = SimulationConfig {
        number_of_players: 2,
        playfield_width: 32,
        playfield_height: 32,
        passable_ratio: 0.9,
        food_ratio: 0.5,
        stones_ratio: 0.3,
        food_regrow_rate: 0.5,
        rng_seed: Some(0xA17_FA53),
        ..SimulationConfig::default()
    };
    let build = |seed: Option<u64>| {
        let config = SimulationConfig {
            rng_seed: seed,
            ..config.clone()
        };
        let rosters = vec![
            roster("red", vec![forager(1)]),
            roster("green", vec![forager(1)]),
        ];
        let mut world = World::new(config, rosters).expect("world");
        world.spawn_queens().expect("queens");
        world
    };

    let mut world_a = build(config.rng_seed);
    let mut world_b = build(config.rng_seed);
    let events_a = run(&mut world_a, 300);
    let events_b = run(&mut world_b, 300);
    assert_eq!(events_a, events_b, "identical seeds replay identically");

    let snapshot_a = world_a.snapshot_rect(0, 0, 32, 32).expect("snapshot");
    let snapshot_b = world_b.snapshot_rect(0, 0, 32, 32).expect("snapshot");
    assert_eq!(snapshot_a, snapshot_b);
    let positions_a: Vec<_> = world_a.ants().map(|(_, ant)| ant.position()).collect();
    let positions_b: Vec<_> = world_b.ants().map(|(_, ant)| ant.position()).collect();
    assert_eq!(positions_a, positions_b);

    let world_c = build(Some(0xB0B));
    let snapshot_c = world_c.snapshot_rect(0, 0, 32, 32).expect("snapshot");
    assert_ne!(snapshot_a, snapshot_c, "different seeds diverge");
}

#[test]
fn position_invariant_survives_long_runs() {
    let config = SimulationConfig {
        number_of_players: 2,
        playfield_width: 24,
        playfield_height: 24,
        passable_ratio: 0.8,
        food_ratio: 0.6,
        stones_ratio: 0.4,
        food_regrow_rate: 0.2,
        rng_seed: Some(99),
        ..SimulationConfig::default()
    };
    let rosters = vec![
        roster("red", vec![forager(1)]),
        roster("green", vec![forager(1)]),
    ];
    let mut world = World::new(config, rosters).expect("world");
    world.spawn_queens().expect("queens");

    for batch in 0..10 {
        run(&mut world, 50);
        let errors = world.consistency_errors();
        assert!(errors.is_empty(), "after batch {batch}: {errors:?}");
    }
}

#[test]
fn colony_spawns_workers_then_starves_out() {
    let config = SimulationConfig {
        number_of_players: 1,
        playfield_width: 10,
        playfield_height: 10,
        passable_ratio: 1.0,
        food_ratio: 0.0,
        stones_ratio: 0.0,
        food_regrow_rate: 0.0,
        initial_energy: 50,
        energy_per_food: 10,
        rng_seed: Some(5),
        ..SimulationConfig::default()
    };
    let rosters = vec![roster("solo", vec![queen(), spinner(2)])];
    let mut world = World::new(config, rosters).expect("world");
    let queens = world.spawn_queens().expect("queens");
    world
        .ant_mut(queens[0])
        .expect("queen")
        .set_food(8);

    let mut spawned = 0;
    let mut starved = 0;
    for _ in 0..200 {
        let events = world.run_cycle().expect("cycle");
        spawned += events.spawned.len();
        starved += usize::from(events.starved.is_some());
        assert!(world.consistency_errors().is_empty());
        if world.ant_count() == 0 {
            break;
        }
    }

    assert_eq!(spawned, 2, "eight food buys two backpack-4 workers");
    assert_eq!(starved, 3, "the queen and both workers starve");
    assert_eq!(world.ant_count(), 0);

    // With an empty schedule the loop reports nothing further to run.
    let events = world.run_cycle().expect("cycle");
    assert_eq!(events.ran, None);
}
