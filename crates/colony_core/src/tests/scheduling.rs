use super::*;
use crate::behaviors::{Administration, ListenToMusic, LISTENING};

#[test]
fn test_budget_is_never_exceeded() {
    let content = test_content();
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let mut sim = SimContext::new(&mut world, &content, &mut rng, EventLevel::Normal);

    let mut task = machine::start(
        Administration::new(&content.constants),
        &mut sim,
        &agent_id(ADA),
    )
    .unwrap();
    for _ in 0..4 {
        let step = task.advance(&mut sim, 10.0).unwrap();
        assert!(step.leftover.abs() < 1e-9);
        assert!(task.time_completed() <= 50.0);
    }
    let step = task.advance(&mut sim, 120.0).unwrap();
    assert_eq!(step.outcome, TaskOutcome::Completed);
    assert!((step.leftover - 110.0).abs() < 1e-9);
    assert!((task.time_completed() - 50.0).abs() < 1e-9);
}

#[test]
fn test_song_found_and_played_in_one_call() {
    let content = test_content();
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let mut sim = SimContext::new(&mut world, &content, &mut rng, EventLevel::Debug);

    let mut task = machine::start(
        ListenToMusic::new(&content.constants),
        &mut sim,
        &agent_id(ADA),
    )
    .unwrap();
    let step = task.advance(&mut sim, 10.0).unwrap();
    assert!(step.leftover.abs() < 1e-9);
    assert_eq!(task.phase(), Some(LISTENING));
    assert!(sim.events.iter().any(|e| matches!(
        &e.event,
        Event::TaskPhaseChanged { phase, .. } if phase == "LISTENING"
    )));
}

#[test]
fn test_music_relaxes() {
    let content = test_content();
    let mut world = test_world(&content);
    world
        .agents
        .get_mut(&agent_id(ADA))
        .unwrap()
        .condition
        .adjust_stress(20.0);
    let mut rng = make_rng();
    let mut sim = SimContext::new(&mut world, &content, &mut rng, EventLevel::Normal);

    let mut task = machine::start(
        ListenToMusic::new(&content.constants),
        &mut sim,
        &agent_id(ADA),
    )
    .unwrap();
    task.advance(&mut sim, 10.0).unwrap();
    assert!(sim.world.agents[&agent_id(ADA)].condition.stress < 20.0);
}

#[test]
fn test_leftover_time_chains_into_next_queued_task() {
    let mut content = test_content();
    content.constants.music_duration = 4.0;
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let commands = [
        assign(&world, ADA, TaskKind::ListenToMusic),
        assign(&world, ADA, TaskKind::Workout),
    ];

    let events = tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert!(completed(&events, ADA, "Listen To Music"));

    let task = world.agents[&agent_id(ADA)].task.as_ref().unwrap();
    assert_eq!(task.name(), "Workout");
    assert!((task.time_completed() - 6.0).abs() < 1e-9);
}

#[test]
fn test_queue_skips_tasks_that_cannot_start() {
    let content = test_content();
    let mut world = test_world(&content);
    world
        .facilities
        .try_acquire(&facility_id("medical_1"), &agent_id(BO))
        .unwrap();
    let mut rng = make_rng();
    let commands = [
        assign(&world, ADA, TaskKind::RestInSickBay),
        assign(&world, ADA, TaskKind::Workout),
    ];

    let events = tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert_eq!(aborted_with(&events, ADA), Some("no medical bed free"));
    let task = world.agents[&agent_id(ADA)].task.as_ref().unwrap();
    assert_eq!(task.name(), "Workout");
}

#[test]
fn test_end_task_clears_queue_and_releases_leases() {
    let content = test_content();
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let commands = [
        assign(&world, ADA, TaskKind::RestInSickBay),
        assign(&world, ADA, TaskKind::Workout),
    ];
    tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert_eq!(world.facilities.occupants(&facility_id("medical_1")), 1);

    let stop = end_task(&world, ADA);
    let events = tick(&mut world, &[stop], &content, &mut rng, EventLevel::Normal).unwrap();
    assert_eq!(aborted_with(&events, ADA), Some("ended by command"));
    assert!(world.agents[&agent_id(ADA)].is_idle());
    assert_eq!(total_occupants(&world), 0);
}

#[test]
fn test_commands_wait_for_their_tick() {
    let content = test_content();
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let mut later = assign(&world, ADA, TaskKind::Workout);
    later.execute_at_tick = 1;

    tick(&mut world, &[later.clone()], &content, &mut rng, EventLevel::Normal).unwrap();
    assert!(world.agents[&agent_id(ADA)].is_idle());
    tick(&mut world, &[later], &content, &mut rng, EventLevel::Normal).unwrap();
    assert!(!world.agents[&agent_id(ADA)].is_idle());
    assert_eq!(world.meta.tick, 2);
}

#[test]
fn test_unknown_agent_command_is_ignored() {
    let content = test_content();
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let ghost = assign(&world, "agent_nobody", TaskKind::Workout);
    let events = tick(&mut world, &[ghost], &content, &mut rng, EventLevel::Normal).unwrap();
    assert!(events.is_empty());
}

#[test]
fn test_event_ids_are_sequential() {
    let content = test_content();
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let commands = [
        assign(&world, ADA, TaskKind::Administration),
        assign(&world, BO, TaskKind::Workout),
    ];
    let events = tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert!(events.len() >= 4);
    for (n, envelope) in events.iter().enumerate() {
        assert_eq!(envelope.id, EventId(format!("evt_{n:06}")));
        assert_eq!(envelope.tick, 0);
    }
}

#[test]
fn test_same_seed_same_history() {
    fn run() -> String {
        let content = test_content();
        let mut world = test_world(&content);
        add_malfunction(&mut world, HAB, 30, &[(RepairWork::Inside, 30.0)], &[]);
        let mut rng = make_rng();
        let commands = [
            assign(&world, ADA, TaskKind::RepairMalfunction),
            assign(&world, BO, TaskKind::Administration),
            assign(&world, ROBOT, TaskKind::Maintenance),
        ];
        let mut history = Vec::new();
        history.extend(tick(&mut world, &commands, &content, &mut rng, EventLevel::Debug).unwrap());
        for _ in 0..10 {
            history.extend(tick(&mut world, &[], &content, &mut rng, EventLevel::Debug).unwrap());
        }
        serde_json::to_string(&history).unwrap()
    }
    assert_eq!(run(), run());
}
