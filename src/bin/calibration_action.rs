/**
 * Buoyancy Calibration Action
 *
 * Connects to the depth/attitude controller over UART and serves
 * calibration goals from the keyboard:
 *   s - start a calibration goal
 *   c - cancel the active goal
 *   r - report progress / last outcome
 *   x - exit
 */

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use buoy_cal::auv::{
    CalibrationServer, CalibrationSettings, CalibrationTask, GoalHandle, TopicCommandPort, TopicMeasurementPort,
};
use buoy_cal::uart::{UartLink, DEFAULT_BAUD};
use buoy_cal::TopicRegistry;
use clap::Parser;

/// Buoyancy calibration action server.
#[derive(Debug, Parser)]
#[command(author, version, about = "AUV buoyancy calibration over UART")]
struct Args {
    /// Serial port of the depth/attitude controller.
    #[arg(long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// YAML file with `properties.mass`.
    #[arg(long)]
    properties: PathBuf,

    /// Optional YAML calibration settings. Defaults are used if omitted.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Start a goal immediately after connecting.
    #[arg(long)]
    start: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let settings = match &args.settings {
        Some(path) => CalibrationSettings::from_yaml_file(path)?,
        None => CalibrationSettings::default(),
    };

    println!("==============================================");
    println!("  Buoyancy Calibration");
    println!("==============================================");
    println!("  Port: {}", args.port);
    println!("  Baud: {}", args.baud);
    println!("  Properties: {}", args.properties.display());
    println!("  Samples/phase: {}", settings.sample_count);
    println!("==============================================\n");

    let registry = Arc::new(TopicRegistry::new());
    let (link, bridge) = UartLink::open(&args.port, args.baud, Arc::clone(&registry))?;
    let server = CalibrationServer::new(&registry);
    let mut goal: Option<GoalHandle> = None;

    let start_goal = |goal: &mut Option<GoalHandle>| {
        let task = CalibrationTask::new(
            settings.clone(),
            args.properties.clone(),
            TopicCommandPort::new(&registry),
            TopicMeasurementPort::new(&registry),
            link.parameter_sink(),
        );
        match server.start(task) {
            Ok(handle) => {
                *goal = Some(handle);
                println!("[STARTED]");
            }
            Err(err) => println!("[REJECTED] {}", err),
        }
    };

    if args.start {
        start_goal(&mut goal);
    }

    println!("[Commands]");
    println!("  s - start calibration");
    println!("  c - cancel calibration");
    println!("  r - report status");
    println!("  x - exit\n");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        match input.trim() {
            "s" | "start" => {
                reap(&mut goal);
                start_goal(&mut goal);
            }
            "c" | "cancel" => match &goal {
                Some(handle) => {
                    handle.cancel();
                    println!("[CANCEL REQUESTED]");
                }
                None => println!("no active goal"),
            },
            "r" | "status" => {
                if let Some((feedback, _)) = server.feedback_topic().peek_latest() {
                    let cob = feedback.model.center_offset;
                    println!(
                        "[{}] samples={} Fb={:.3} N cob=({:.4}, {:.4}, {:.4}) m",
                        feedback.phase, feedback.samples_consumed, feedback.model.buoyant_force, cob.x, cob.y, cob.z
                    );
                }
                if !reap(&mut goal) && goal.is_some() {
                    println!("[ACTIVE]");
                }
            }
            "x" | "exit" | "quit" => break,
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }

    println!("[SHUTDOWN]");
    if let Some(handle) = goal.take() {
        handle.cancel();
        println!("[OUTCOME] {}", handle.join());
    }
    link.shutdown();
    let _ = bridge.join();
    Ok(())
}

// join a finished goal and print its outcome; true if one was reaped
fn reap(goal: &mut Option<GoalHandle>) -> bool {
    if goal.as_ref().is_some_and(|handle| handle.is_finished()) {
        if let Some(handle) = goal.take() {
            println!("[OUTCOME] {}", handle.join());
            return true;
        }
    }
    false
}
