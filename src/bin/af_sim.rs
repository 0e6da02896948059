use isp_autofocus::lens::StaticWindows;
use isp_autofocus::testing::{SyntheticLens, SyntheticScene};
use isp_autofocus::timing::ManualClock;
use isp_autofocus::{AfConfig, AfEvent, AfHandle, AfState, FrameStatus, SearchStrategy};
use serde::Serialize;
use std::env;
use std::sync::Arc;

const USAGE: &str = "Usage: af-sim [one-shot|tracking] [--strategy <full-range|hill-climbing|adaptive-range>] \
[--peak <pos>] [--start <pos>] [--max-focus <n>] [--frames <n>] [--frame-ms <ms>] [--config <file>] [--json]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Mode {
    OneShot,
    Tracking,
}

struct Options {
    mode: Mode,
    strategy: SearchStrategy,
    peak: i32,
    start: u32,
    max_focus: u32,
    frames: u32,
    frame_ms: u64,
    config: Option<String>,
    json: bool,
}

#[derive(Debug, Serialize)]
struct SimReport {
    mode: Mode,
    strategy: SearchStrategy,
    peak: i32,
    final_position: i32,
    frames: u32,
    settled: bool,
    moves: Vec<u32>,
    events: Vec<AfEvent>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    isp_autofocus::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let options = parse_args(&args)?;
    let report = run(&options)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options, Box<dyn std::error::Error>> {
    let mut options = Options {
        mode: Mode::OneShot,
        strategy: SearchStrategy::AdaptiveRange,
        peak: 500,
        start: 0,
        max_focus: 1000,
        frames: 3000,
        frame_ms: 33,
        config: None,
        json: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "one-shot" => options.mode = Mode::OneShot,
            "tracking" => options.mode = Mode::Tracking,
            "--strategy" => {
                i += 1;
                options.strategy = value(args, i)?.parse()?;
            }
            "--peak" => {
                i += 1;
                options.peak = value(args, i)?.parse()?;
            }
            "--start" => {
                i += 1;
                options.start = value(args, i)?.parse()?;
            }
            "--max-focus" => {
                i += 1;
                options.max_focus = value(args, i)?.parse()?;
            }
            "--frames" => {
                i += 1;
                options.frames = value(args, i)?.parse()?;
            }
            "--frame-ms" => {
                i += 1;
                options.frame_ms = value(args, i)?.parse()?;
            }
            "--config" => {
                i += 1;
                options.config = Some(value(args, i)?.to_string());
            }
            "--json" => options.json = true,
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("{}", USAGE);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if options.start > options.max_focus {
        return Err(format!(
            "--start {} is beyond --max-focus {}",
            options.start, options.max_focus
        )
        .into());
    }
    Ok(options)
}

fn value(args: &[String], i: usize) -> Result<&str, String> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {}", args[i - 1]))
}

fn run(options: &Options) -> Result<SimReport, Box<dyn std::error::Error>> {
    let config = match &options.config {
        Some(path) => AfConfig::load_from_file(path)?,
        None => AfConfig::load_or_default(),
    };

    let clock = ManualClock::new(1);
    let lens = SyntheticLens::new(options.max_focus, options.start);
    let scene = SyntheticScene::parabola(options.peak);

    let af = AfHandle::init_with_clock(config, Arc::new(clock.clone()))?;
    let events = af.subscribe()?;
    af.configure(
        Box::new(lens.clone()),
        Box::new(StaticWindows::only_a()),
        options.strategy,
    )?;

    match options.mode {
        Mode::OneShot => af.one_shot(options.strategy)?,
        Mode::Tracking => af.start(options.strategy)?,
    }

    let mut received = Vec::new();
    let mut frames = 0;
    let mut settled = false;
    while frames < options.frames {
        let status = af.process_frame(&scene.measure(lens.position()))?;
        clock.advance_ms(options.frame_ms);
        frames += 1;
        received.extend(events.try_iter());

        settled = af.settled()?;
        let done = match options.mode {
            Mode::OneShot => settled && !received.is_empty(),
            Mode::Tracking => settled && status == FrameStatus::Success && frames > 1,
        };
        if done {
            break;
        }
    }

    if matches!(af.state()?, AfState::Running | AfState::Tracking) {
        af.stop()?;
        af.process_frame(&scene.measure(lens.position()))?;
    }
    let final_position = lens.position();
    af.release()?;

    Ok(SimReport {
        mode: options.mode,
        strategy: options.strategy,
        peak: options.peak,
        final_position,
        frames,
        settled,
        moves: lens.moves(),
        events: received,
    })
}

fn print_report(report: &SimReport) {
    println!(
        "{} {} search, sharpness peak at {}",
        match report.mode {
            Mode::OneShot => "one-shot",
            Mode::Tracking => "tracking",
        },
        report.strategy.as_str(),
        report.peak
    );
    let trajectory: Vec<String> = report.moves.iter().map(|p| p.to_string()).collect();
    println!(
        "lens trajectory ({} moves): {}",
        report.moves.len(),
        trajectory.join(" -> ")
    );
    for event in &report.events {
        println!("event: {:?}", event);
    }
    if report.settled {
        println!(
            "focused at {} after {} frames",
            report.final_position, report.frames
        );
    } else {
        println!(
            "not settled after {} frames, lens at {}",
            report.frames, report.final_position
        );
    }
}
