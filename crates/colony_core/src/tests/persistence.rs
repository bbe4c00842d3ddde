use super::*;

/// Writes the world out and reads it back, as a save file would.
fn reload(world: &World) -> World {
    let json = serde_json::to_string(world).unwrap();
    serde_json::from_str(&json).unwrap()
}

#[test]
fn test_reloaded_world_frees_seats_of_unsaved_tasks() {
    let content = test_content();
    let mut world = test_world(&content);
    let mut rng = make_rng();
    let commands = [assign(&world, ADA, TaskKind::Administration)];
    tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert_eq!(world.facilities.occupants(&facility_id("office_1")), 1);

    let mut world = reload(&world);
    assert!(world.agents[&agent_id(ADA)].task.is_none());
    assert_eq!(release_orphaned(&mut world), 1);
    assert_eq!(total_occupants(&world), 0);

    // Ending the lost task is a no-op, and the seat can be taken again.
    let commands = [end_task(&world, ADA)];
    tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert_eq!(total_occupants(&world), 0);
    let commands = [assign(&world, ADA, TaskKind::Administration)];
    tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert_eq!(world.facilities.occupants(&facility_id("office_1")), 1);
}

#[test]
fn test_reloaded_world_drops_stale_repair_claims() {
    let content = test_content();
    let mut world = test_world(&content);
    let id = add_malfunction(&mut world, HAB, 40, &[(RepairWork::Inside, 100.0)], &[]);
    let mut rng = make_rng();
    let commands = [assign(&world, BO, TaskKind::RepairMalfunction)];
    tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();

    let active = |world: &World| {
        world.entities[&entity_id(HAB)]
            .malfunctions
            .malfunctions
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.bucket(RepairWork::Inside))
            .map_or(0, |b| b.active.len())
    };
    assert_eq!(active(&world), 1);

    let mut world = reload(&world);
    release_orphaned(&mut world);
    assert_eq!(active(&world), 0);
}

#[test]
fn test_sampler_left_outside_is_brought_back_with_its_load() {
    let content = test_content();
    let mut world = test_world(&content);
    world.agents.get_mut(&agent_id(ADA)).unwrap().location = Location::Vehicle(entity_id(ROVER));
    let mut rng = make_rng();
    let commands = [assign(
        &world,
        ADA,
        TaskKind::FieldSampling {
            target: entity_id(ROVER),
            site_duration: 100.0,
        },
    )];
    // 5 walking, 5 collecting.
    tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert!(matches!(
        world.agents[&agent_id(ADA)].location,
        Location::Outside { .. }
    ));
    assert_eq!(store_count(&world, ROVER_STORE, PART_EVA_SUIT), 0);

    let mut world = reload(&world);
    release_orphaned(&mut world);

    let agent = &world.agents[&agent_id(ADA)];
    assert_eq!(agent.location, Location::Vehicle(entity_id(ROVER)));
    assert!(agent.inventory.is_empty());
    assert_eq!(store_count(&world, ROVER_STORE, PART_EVA_SUIT), 1);
    assert_eq!(store_count(&world, ROVER_STORE, PART_SAMPLE_CONTAINER), 1);
    assert_eq!(store_count(&world, ROVER_STORE, PART_ROCK_SAMPLE), 1);
}

#[test]
fn test_ending_tasks_before_saving_leaves_nothing_held() {
    let content = test_content();
    let mut world = test_world(&content);
    world.agents.get_mut(&agent_id(ADA)).unwrap().location = Location::Vehicle(entity_id(ROVER));
    let mut rng = make_rng();
    let commands = [
        assign(
            &world,
            ADA,
            TaskKind::FieldSampling {
                target: entity_id(ROVER),
                site_duration: 100.0,
            },
        ),
        assign(&world, BO, TaskKind::Administration),
    ];
    tick(&mut world, &commands, &content, &mut rng, EventLevel::Normal).unwrap();
    assert_eq!(total_occupants(&world), 1);

    let events = end_all_tasks(
        &mut world,
        &content,
        &mut rng,
        EventLevel::Normal,
        "simulation saved",
    );
    assert_eq!(aborted_with(&events, ADA), Some("simulation saved"));
    assert_eq!(aborted_with(&events, BO), Some("simulation saved"));
    assert!(world.agents.values().all(|a| a.task.is_none()));

    let mut world = reload(&world);
    assert_eq!(release_orphaned(&mut world), 0);
    assert_eq!(total_occupants(&world), 0);
    assert_eq!(
        world.agents[&agent_id(ADA)].location,
        Location::Vehicle(entity_id(ROVER))
    );
    assert_eq!(store_count(&world, ROVER_STORE, PART_EVA_SUIT), 1);
}
