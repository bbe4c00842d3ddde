use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colony_control::{PlannerConfig, TaskPlanner, TaskSource};
use colony_core::{
    end_all_tasks, release_orphaned, Event, EventEnvelope, EventLevel, TaskContent, World,
};
use colony_world::{build_initial_state, load_content, load_settlement};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "colony_cli", about = "Settlement task simulation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the settlement for a fixed number of ticks.
    Run {
        #[arg(long)]
        ticks: u64,
        /// Build the settlement from content with this seed. Mutually exclusive with --state.
        #[arg(long, conflicts_with = "state_file")]
        seed: Option<u64>,
        /// Load a saved World from a JSON file. Mutually exclusive with --seed.
        #[arg(long = "state", conflicts_with = "seed")]
        state_file: Option<String>,
        #[arg(long, default_value = "./content")]
        content_dir: String,
        /// Planner thresholds as JSON. Defaults are used when omitted.
        #[arg(long)]
        planner: Option<String>,
        /// Write the final World to this file.
        #[arg(long)]
        save: Option<String>,
        #[arg(long, default_value_t = 100)]
        print_every: u64,
        #[arg(long, default_value = "normal", value_parser = ["normal", "debug"])]
        event_level: String,
    },
}

struct RunArgs {
    ticks: u64,
    seed: Option<u64>,
    state_file: Option<String>,
    content_dir: String,
    planner: Option<String>,
    save: Option<String>,
    print_every: u64,
    event_level: EventLevel,
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

fn load_world(args: &RunArgs, content: &TaskContent) -> Result<(World, ChaCha8Rng)> {
    if let Some(path) = &args.state_file {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading state file: {path}"))?;
        let mut loaded: World =
            serde_json::from_str(&json).with_context(|| format!("parsing state file: {path}"))?;
        // Active tasks are not saved; drop anything they were holding.
        let released = release_orphaned(&mut loaded);
        if released > 0 {
            info!(released, path = %path, "cleaned up state file");
        }
        let rng = ChaCha8Rng::seed_from_u64(loaded.meta.seed ^ loaded.meta.tick);
        return Ok((loaded, rng));
    }
    let settlement = load_settlement(&args.content_dir)?;
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let world = build_initial_state(content, &settlement, seed, &mut rng);
    Ok((world, rng))
}

fn load_planner(path: Option<&str>) -> Result<TaskPlanner> {
    let Some(path) = path else {
        return Ok(TaskPlanner::default());
    };
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading planner config: {path}"))?;
    let config: PlannerConfig =
        serde_json::from_str(&json).with_context(|| format!("parsing planner config: {path}"))?;
    Ok(TaskPlanner::new(config))
}

fn run(args: &RunArgs) -> Result<()> {
    let content = load_content(&args.content_dir)?;
    let (mut world, mut rng) = load_world(args, &content)?;
    let mut planner = load_planner(args.planner.as_deref())?;
    let mut next_command_id = world.counters.next_command_id;

    info!(
        seed = world.meta.seed,
        agents = world.agents.len(),
        content_version = %content.content_version,
        "starting run"
    );
    println!(
        "Starting simulation: ticks={} seed={} agents={} entities={} content_version={}",
        args.ticks,
        world.meta.seed,
        world.agents.len(),
        world.entities.len(),
        content.content_version,
    );
    println!("{}", "-".repeat(80));

    for _ in 0..args.ticks {
        let commands = planner.generate_commands(&world, &content, &mut next_command_id);
        debug!(tick = world.meta.tick, commands = commands.len(), "planned");
        world.counters.next_command_id = next_command_id;

        let events = colony_core::tick(&mut world, &commands, &content, &mut rng, args.event_level)
            .with_context(|| format!("tick {}", world.meta.tick))?;

        for event in &events {
            print_notable(event, world.meta.tick);
        }

        if world.meta.tick % args.print_every == 0 {
            print_status(&world, &content);
        }
    }

    println!("{}", "-".repeat(80));
    println!("Done. Final state at tick {}:", world.meta.tick);
    print_status(&world, &content);

    if let Some(path) = &args.save {
        let ended = end_all_tasks(
            &mut world,
            &content,
            &mut rng,
            args.event_level,
            "simulation saved",
        );
        debug!(events = ended.len(), "ended active tasks before saving");
        let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
        serde_json::to_writer_pretty(file, &world).with_context(|| format!("writing {path}"))?;
        println!("World saved to {path}.");
    }

    Ok(())
}

fn print_notable(envelope: &EventEnvelope, tick: u64) {
    match &envelope.event {
        Event::MalfunctionOccurred {
            entity, name, cause, ..
        } => println!("*** MALFUNCTION: {name} on {entity} ({cause}) at tick={tick:04} ***"),
        Event::MalfunctionRepaired { entity, name, .. } => {
            println!("*** REPAIRED: {name} on {entity} at tick={tick:04} ***");
        }
        Event::AccidentOccurred {
            agent,
            entity,
            label,
        } => println!("*** ACCIDENT: {agent} during {label} at {entity}, tick={tick:04} ***"),
        Event::SkillLevelUp {
            agent,
            skill,
            level,
        } => println!("*** {agent} reached {skill:?} {level} at tick={tick:04} ***"),
        _ => {}
    }
}

fn print_status(world: &World, content: &TaskContent) {
    let tick = world.meta.tick;
    let millisols = tick as f64 * content.constants.millisols_per_tick;
    let sol = (millisols / 1000.0).floor();
    let time_of_sol = millisols % 1000.0;

    let busy = world.agents.values().filter(|a| a.task.is_some()).count();
    let open_malfunctions: usize = world
        .entities
        .values()
        .map(|e| e.malfunctions.malfunctions.len())
        .sum();
    let seats: usize = world.facilities.iter().map(|f| f.occupants.len()).sum();
    let tasks: Vec<String> = world
        .agents
        .values()
        .map(|a| {
            let task = a.task.as_ref().map_or("idle", |t| t.name());
            format!("{}={task}", a.id)
        })
        .collect();

    println!(
        "[tick={tick:04}  sol={sol}  msol={time_of_sol:03.0}]  \
         busy={busy}/{agents}  malfunctions={open_malfunctions}  seats={seats}  [{tasks}]",
        agents = world.agents.len(),
        tasks = tasks.join(", "),
    );
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            ticks,
            seed,
            state_file,
            content_dir,
            planner,
            save,
            print_every,
            event_level,
        } => {
            let event_level = match event_level.as_str() {
                "debug" => EventLevel::Debug,
                _ => EventLevel::Normal,
            };
            run(&RunArgs {
                ticks,
                seed,
                state_file,
                content_dir,
                planner,
                save,
                print_every: print_every.max(1),
                event_level,
            })?;
        }
    }
    Ok(())
}
