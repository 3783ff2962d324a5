use std::path::{Path, PathBuf};

use character_controller::Character;
use character_settings::CharacterSettings;
use clap::{Parser, Subcommand, ValueEnum};
use physics_rapier::{NoDebug, PhysicsWorld};
use rapier3d::math::{Point, Vector};
use rapier3d::prelude::{ColliderBuilder, Real};

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_SETTINGS: i32 = 10;

const TICK_DT: Real = 1.0 / 60.0;

#[derive(Parser)]
#[command(name = "tools", version, about = "Character locomotion tools CLI")]
struct Cli {
    /// Log debug output (grounding transitions, jumps, heavy turns).
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Validate(ValidateArgs),
    Simulate(SimulateArgs),
}

#[derive(Parser)]
struct ValidateArgs {
    #[arg(long, value_name = "PATH")]
    settings: PathBuf,
}

#[derive(Parser)]
struct SimulateArgs {
    #[arg(long, value_enum)]
    scene: Scene,

    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[arg(long)]
    ticks: Option<u32>,

    #[arg(long, allow_hyphen_values = true)]
    move_x: Option<Real>,

    #[arg(long, allow_hyphen_values = true)]
    move_y: Option<Real>,

    #[arg(long, value_name = "TICK")]
    jump_at: Option<u32>,

    #[arg(long, value_name = "N")]
    report_every: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scene {
    Flat,
    Slope,
    Void,
}

fn main() {
    let cli = Cli::parse();
    // RUST_LOG overrides the default filter.
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_log_filter(cli.verbose)),
    )
    .format_timestamp(None)
    .try_init();
    let exit_code = match cli.command {
        Commands::Validate(args) => run_validate(&args.settings),
        Commands::Simulate(args) => run_simulate(args),
    };
    std::process::exit(exit_code);
}

fn default_log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

fn run_validate(path: &Path) -> i32 {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("settings read failed: {}: {}", path.display(), err);
            return EXIT_SETTINGS;
        }
    };
    let settings = match CharacterSettings::parse_toml(&text) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("settings parse failed: {}", err);
            return EXIT_SETTINGS;
        }
    };
    let validation = settings.validate();
    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    for error in &validation.errors {
        println!("error: {}", error);
    }
    if !validation.is_ok() {
        return EXIT_SETTINGS;
    }
    println!(
        "settings ok: {} ({} probe rays, {} active contacts)",
        path.display(),
        settings.probe.ray_count(),
        settings.probe.max_active_points
    );
    EXIT_SUCCESS
}

fn load_settings(path: Option<&Path>) -> Result<CharacterSettings, i32> {
    let Some(path) = path else {
        return Ok(CharacterSettings::default());
    };
    let text = std::fs::read_to_string(path).map_err(|err| {
        eprintln!("settings read failed: {}: {}", path.display(), err);
        EXIT_SETTINGS
    })?;
    CharacterSettings::load_toml(&text).map_err(|err| {
        eprintln!("settings invalid: {}", err);
        EXIT_SETTINGS
    })
}

fn build_scene(world: &mut PhysicsWorld, scene: Scene) {
    match scene {
        Scene::Flat => {
            let floor = ColliderBuilder::cuboid(100.0, 0.1, 100.0)
                .translation(Vector::new(0.0, -0.1, 0.0))
                .build();
            world.insert_static_collider(floor);
        }
        Scene::Slope => {
            let slope = ColliderBuilder::cuboid(100.0, 0.1, 100.0)
                .rotation(Vector::new(0.0, 0.0, 0.25))
                .translation(Vector::new(0.0, -0.1, 0.0))
                .build();
            world.insert_static_collider(slope);
        }
        Scene::Void => {}
    }
    world.update_queries();
}

fn run_simulate(args: SimulateArgs) -> i32 {
    let ticks = args.ticks.unwrap_or(300);
    let report_every = args.report_every.unwrap_or(30);
    if report_every == 0 {
        eprintln!("--report-every must be > 0");
        return EXIT_USAGE;
    }
    let settings = match load_settings(args.settings.as_deref()) {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let mut world = PhysicsWorld::new(Vector::new(0.0, -9.81, 0.0));
    build_scene(&mut world, args.scene);
    let spawn_height = settings.body.height * 0.5 + settings.ground.offset + 0.5;
    let mut character = match Character::spawn(&mut world, settings, Point::new(0.0, spawn_height, 0.0)) {
        Ok(character) => character,
        Err(err) => {
            eprintln!("settings invalid: {}", err);
            return EXIT_SETTINGS;
        }
    };

    // Move axis: x = right (+X), y = forward (-Z).
    let axis = [args.move_x.unwrap_or(0.0), args.move_y.unwrap_or(0.0)];
    let magnitude = (axis[0] * axis[0] + axis[1] * axis[1]).sqrt();
    let direction = Vector::new(axis[0], 0.0, -axis[1]);

    println!("simulate {:?}: {} ticks at {:.4}s", args.scene, ticks, TICK_DT);
    let mut grounded_ticks = 0u32;
    for tick in 0..ticks {
        if magnitude > 0.0 {
            character.apply_move(direction, magnitude.min(1.0));
            character.apply_turn(direction);
        }
        if args.jump_at == Some(tick) {
            character.jump();
        }
        let frame = character.tick(&mut world, TICK_DT, &mut NoDebug);
        world.step(TICK_DT);
        if frame.grounded {
            grounded_ticks += 1;
        }
        if frame.jumped {
            println!("tick {:>5}: jump", tick);
        }
        if tick % report_every == 0 || tick + 1 == ticks {
            let position = character.position(&world).unwrap_or(frame.position);
            println!(
                "tick {:>5}: pos ({:>7.3}, {:>7.3}, {:>7.3}) vel ({:>7.3}, {:>7.3}, {:>7.3}) grounded={} influence={:.3} contacts={}",
                tick,
                position.x,
                position.y,
                position.z,
                frame.velocity.x,
                frame.velocity.y,
                frame.velocity.z,
                frame.grounded,
                frame.ground.influence,
                frame.ground.active_count
            );
        }
    }
    println!("grounded {}/{} ticks", grounded_ticks, ticks);
    EXIT_SUCCESS
}
